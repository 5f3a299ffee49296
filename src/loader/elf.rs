//! ELF64 loader (component C12): validate header, map and copy `PT_LOAD` segments into a
//! fresh address space, zero BSS, and hand off the entry point + stack top for `execve()`
//! to jump into. Kept close to the teacher's header/phdr parsing and BSS-zeroing logic,
//! generalized to build a real per-process `AddressSpace` (teacher's `allocate_user_memory`
//! call site does not exist anywhere in its own tree) instead of mutating the caller's
//! live page tables in place.

use crate::memory::paging::{AddressSpace, PageFlags, USER_CODE_START, USER_STACK_SIZE, USER_STACK_TOP};
use crate::memory::pmm::{PAGE_SIZE, PMM};
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use core::fmt;
use spin::Mutex;

const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];
const ELFCLASS64: u8 = 2;
const ELFDATA2LSB: u8 = 1;
const ET_EXEC: u16 = 2;
const EM_X86_64: u16 = 62;
const PT_LOAD: u32 = 1;

struct Elf64Ehdr {
    e_entry: u64,
    e_phoff: u64,
    e_phentsize: u16,
    e_phnum: u16,
}

impl Elf64Ehdr {
    fn parse(data: &[u8]) -> Result<Self, ExecError> {
        if data.len() < 64 {
            return Err(ExecError::InvalidFormat);
        }
        if data[0..4] != ELF_MAGIC {
            return Err(ExecError::InvalidFormat);
        }
        if data[4] != ELFCLASS64 {
            return Err(ExecError::UnsupportedArch);
        }
        if data[5] != ELFDATA2LSB {
            return Err(ExecError::UnsupportedArch);
        }

        let e_type = u16::from_le_bytes([data[16], data[17]]);
        let e_machine = u16::from_le_bytes([data[18], data[19]]);
        if e_type != ET_EXEC {
            return Err(ExecError::UnsupportedType);
        }
        if e_machine != EM_X86_64 {
            return Err(ExecError::UnsupportedArch);
        }

        Ok(Elf64Ehdr {
            e_entry: u64::from_le_bytes(data[24..32].try_into().unwrap()),
            e_phoff: u64::from_le_bytes(data[32..40].try_into().unwrap()),
            e_phentsize: u16::from_le_bytes([data[54], data[55]]),
            e_phnum: u16::from_le_bytes([data[56], data[57]]),
        })
    }
}

struct Elf64Phdr {
    p_type: u32,
    p_offset: u64,
    p_vaddr: u64,
    p_filesz: u64,
    p_memsz: u64,
}

impl Elf64Phdr {
    fn parse(data: &[u8]) -> Result<Self, ExecError> {
        if data.len() < 56 {
            return Err(ExecError::InvalidFormat);
        }
        Ok(Elf64Phdr {
            p_type: u32::from_le_bytes(data[0..4].try_into().unwrap()),
            p_offset: u64::from_le_bytes(data[8..16].try_into().unwrap()),
            p_vaddr: u64::from_le_bytes(data[16..24].try_into().unwrap()),
            p_filesz: u64::from_le_bytes(data[32..40].try_into().unwrap()),
            p_memsz: u64::from_le_bytes(data[40..48].try_into().unwrap()),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecError {
    FileNotFound,
    InvalidFormat,
    UnsupportedArch,
    UnsupportedType,
    MemoryError,
    ReadError,
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ExecError::FileNotFound => write!(f, "file not found"),
            ExecError::InvalidFormat => write!(f, "invalid ELF format"),
            ExecError::UnsupportedArch => write!(f, "unsupported architecture"),
            ExecError::UnsupportedType => write!(f, "unsupported ELF type (need ET_EXEC)"),
            ExecError::MemoryError => write!(f, "memory allocation error"),
            ExecError::ReadError => write!(f, "file read error"),
        }
    }
}

/// Everything `process::scheduler::exec`/the initial spawn needs to install the new image.
pub struct LoadedProgram {
    pub pml4_phys: u64,
    pub allocations: Vec<(u64, u64)>,
    pub heap_start: u64,
    pub entry: u64,
    pub user_stack_top: u64,
}

struct PendingLaunch {
    entry: u64,
    user_stack_top: u64,
}

static PENDING_LAUNCH: Mutex<Option<PendingLaunch>> = Mutex::new(None);

/// Record the entry point/stack top for the next time `usermode_trampoline` runs. Single
/// slot is safe because the trampoline always runs as the very next thing scheduled onto
/// the process whose `exec` set it (see `process::scheduler::exec`).
pub fn set_pending_launch(entry: u64, user_stack_top: u64) {
    *PENDING_LAUNCH.lock() = Some(PendingLaunch { entry, user_stack_top });
}

/// Runs as the freshly-`exec`'d process's first instruction in kernel mode, then drops to
/// Ring 3. Grounded on the teacher's `usermode_trampoline` almost directly.
pub fn usermode_trampoline() {
    let launch = PENDING_LAUNCH.lock().take().expect("no pending launch recorded");

    let user_cs = crate::interrupts::gdt::user_code_selector().0;
    let user_ss = crate::interrupts::gdt::user_data_selector().0;

    crate::log_info!(
        "exec: entering Ring 3 at {:#x}, stack {:#x}",
        launch.entry,
        launch.user_stack_top
    );

    crate::interrupts::usermode::jump_to_usermode(launch.entry, launch.user_stack_top, user_cs, user_ss);
}

/// Validate, map, and populate a brand-new address space for `path`. Does not touch the
/// caller's existing address space — `process::scheduler::exec` swaps it in only after this
/// succeeds, so a failed `execve()` leaves the calling process completely untouched.
pub fn load(path: &str) -> Result<LoadedProgram, ExecError> {
    let file_data = read_file_all(path)?;
    let ehdr = Elf64Ehdr::parse(&file_data)?;

    let mut load_base: u64 = u64::MAX;
    let mut load_end: u64 = 0;
    for i in 0..ehdr.e_phnum as usize {
        let off = ehdr.e_phoff as usize + i * ehdr.e_phentsize as usize;
        let phdr = Elf64Phdr::parse(&file_data[off..])?;
        if phdr.p_type != PT_LOAD {
            continue;
        }
        if phdr.p_vaddr < load_base {
            load_base = phdr.p_vaddr;
        }
        let seg_end = phdr.p_vaddr + phdr.p_memsz;
        if seg_end > load_end {
            load_end = seg_end;
        }
    }
    if load_base == u64::MAX {
        return Err(ExecError::InvalidFormat);
    }
    if load_base < USER_CODE_START {
        return Err(ExecError::InvalidFormat);
    }

    let load_end_aligned = (load_end + (PAGE_SIZE as u64 - 1)) & !(PAGE_SIZE as u64 - 1);
    let user_stack_base = USER_STACK_TOP - USER_STACK_SIZE;

    let mut space = AddressSpace::create().map_err(|_| ExecError::MemoryError)?;
    let mut allocations = Vec::new();

    map_region(&mut space, load_base, load_end_aligned - load_base)?;
    allocations.push((load_base, load_end_aligned - load_base));

    map_region(&mut space, user_stack_base, USER_STACK_SIZE)?;
    allocations.push((user_stack_base, USER_STACK_SIZE));

    // PT_LOAD segments are copied through the kernel's identity-mapped view of the same
    // physical frames we just mapped into the child's address space (see SPEC_FULL.md §1's
    // identity-mapping assumption), so a direct physical-address copy is sufficient and we
    // never need to switch CR3 mid-load.
    for i in 0..ehdr.e_phnum as usize {
        let off = ehdr.e_phoff as usize + i * ehdr.e_phentsize as usize;
        let phdr = Elf64Phdr::parse(&file_data[off..])?;
        if phdr.p_type != PT_LOAD {
            continue;
        }

        let file_offset = phdr.p_offset as usize;
        let file_size = phdr.p_filesz as usize;
        let dest_phys = space
            .translate(phdr.p_vaddr)
            .ok_or(ExecError::MemoryError)?;

        if file_offset + file_size <= file_data.len() {
            unsafe {
                core::ptr::copy_nonoverlapping(
                    file_data[file_offset..].as_ptr(),
                    dest_phys as *mut u8,
                    file_size,
                );
            }
        }

        if phdr.p_memsz > phdr.p_filesz {
            let bss_size = (phdr.p_memsz - phdr.p_filesz) as usize;
            unsafe {
                core::ptr::write_bytes((dest_phys as *mut u8).add(file_size), 0, bss_size);
            }
        }
    }

    Ok(LoadedProgram {
        pml4_phys: space_leak(space),
        allocations,
        heap_start: load_end_aligned,
        entry: ehdr.e_entry,
        user_stack_top: USER_STACK_TOP,
    })
}

/// Hand ownership of the address space's PML4 to the caller (it becomes a process's
/// `page_table` field — lifetime now tied to that process, freed on exit via
/// `AddressSpace::clear_user_space` + `destroy`).
fn space_leak(space: AddressSpace) -> u64 {
    let phys = space.pml4_phys();
    core::mem::forget(space);
    phys
}

fn map_region(space: &mut AddressSpace, base: u64, size: u64) -> Result<(), ExecError> {
    let pages = (size as usize).div_ceil(PAGE_SIZE);
    let page_base = base & !(PAGE_SIZE as u64 - 1);
    for i in 0..pages {
        let virt = page_base + (i * PAGE_SIZE) as u64;
        let phys = PMM.lock().alloc_frame().ok_or(ExecError::MemoryError)?;
        space
            .map_page(virt, phys, PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::USER)
            .map_err(|_| ExecError::MemoryError)?;
    }
    Ok(())
}

fn read_file_all(path: &str) -> Result<Vec<u8>, ExecError> {
    let vfs = crate::fs::VFS.lock();
    let inode = vfs.lookup(path).map_err(|_| ExecError::FileNotFound)?;
    if inode.size == 0 {
        return Err(ExecError::InvalidFormat);
    }
    let mut buf = vec![0u8; inode.size];
    let bytes_read = vfs.read_file(path, 0, &mut buf).map_err(|_| ExecError::ReadError)?;
    buf.truncate(bytes_read);
    Ok(buf)
}

#[allow(dead_code)]
fn extract_filename(path: &str) -> String {
    path.rsplit('/').next().unwrap_or(path).into()
}
