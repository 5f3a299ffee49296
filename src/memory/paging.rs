//! Virtual memory manager — 4-level page table management per address space (component C3).
//!
//! Generalizes the teacher's stub (`active_level_4_table` only) to the full map/unmap/
//! translate/clone/clear/switch surface the original C kernel exposes in `vmm.c`
//! (`vmm_create_address_space`, `vmm_map_page`, `vmm_clone_address_space`,
//! `vmm_clear_user_space`). Physical memory is assumed identity-mapped into the kernel's
//! view (phys == virt for frame bookkeeping), matching the teacher's boot-time assumption
//! that the low gigabyte is identity mapped before Rust code runs.

use crate::error::KernelError;
use crate::memory::pmm::{PAGE_SIZE, PMM};
use bitflags::bitflags;
use x86_64::registers::control::{Cr3, Cr3Flags};
use x86_64::structures::paging::{PageTable, PageTableFlags};
use x86_64::{PhysAddr, VirtAddr};

pub const USER_STACK_TOP: u64 = 0x0000_7FFF_FFFF_E000;
pub const USER_STACK_SIZE: u64 = 0x0010_0000;
pub const USER_HEAP_START: u64 = 0x0040_0000;
pub const USER_CODE_START: u64 = 0x0010_0000;
pub const KERNEL_BASE: u64 = 0xFFFF_8000_0000_0000;

bitflags! {
    #[derive(Clone, Copy)]
    pub struct PageFlags: u64 {
        const PRESENT       = 1 << 0;
        const WRITABLE      = 1 << 1;
        const USER          = 1 << 2;
        const WRITE_THROUGH = 1 << 3;
        const CACHE_DISABLE = 1 << 4;
        const NO_EXECUTE    = 1 << 63;
    }
}

impl From<PageFlags> for PageTableFlags {
    fn from(f: PageFlags) -> Self {
        let mut out = PageTableFlags::empty();
        if f.contains(PageFlags::PRESENT) {
            out |= PageTableFlags::PRESENT;
        }
        if f.contains(PageFlags::WRITABLE) {
            out |= PageTableFlags::WRITABLE;
        }
        if f.contains(PageFlags::USER) {
            out |= PageTableFlags::USER_ACCESSIBLE;
        }
        if f.contains(PageFlags::WRITE_THROUGH) {
            out |= PageTableFlags::WRITE_THROUGH;
        }
        if f.contains(PageFlags::CACHE_DISABLE) {
            out |= PageTableFlags::NO_CACHE;
        }
        if f.contains(PageFlags::NO_EXECUTE) {
            out |= PageTableFlags::NO_EXECUTE;
        }
        out
    }
}

fn pml4_index(addr: u64) -> usize {
    ((addr >> 39) & 0x1FF) as usize
}
fn pdpt_index(addr: u64) -> usize {
    ((addr >> 30) & 0x1FF) as usize
}
fn pd_index(addr: u64) -> usize {
    ((addr >> 21) & 0x1FF) as usize
}
fn pt_index(addr: u64) -> usize {
    ((addr >> 12) & 0x1FF) as usize
}

unsafe fn table_at(phys: u64) -> &'static mut PageTable {
    &mut *(phys as *mut PageTable)
}

fn alloc_table_frame() -> Result<u64, KernelError> {
    PMM.lock().alloc_frame().ok_or(KernelError::OutOfMemory)
}

/// One process's (or the kernel's) top-level address space: a PML4 plus every table it
/// transitively owns.
pub struct AddressSpace {
    pml4_phys: u64,
}

impl AddressSpace {
    /// Wrap the PML4 CR3 currently points at (used once, at boot, for the kernel's own space).
    pub fn current() -> Self {
        let (frame, _) = Cr3::read();
        AddressSpace {
            pml4_phys: frame.start_address().as_u64(),
        }
    }

    /// Wrap an already-constructed PML4 belonging to some other (possibly not currently
    /// loaded) process — used by `fork()` to clone a parent that isn't the active task.
    pub fn from_pml4(pml4_phys: u64) -> Self {
        AddressSpace { pml4_phys }
    }

    pub fn pml4_phys(&self) -> u64 {
        self.pml4_phys
    }

    /// Allocate a fresh PML4 and share the kernel's upper-half mappings (indices 256..512)
    /// with the currently-active address space, so every process sees the same kernel image.
    pub fn create() -> Result<Self, KernelError> {
        let new_phys = alloc_table_frame()?;
        let new_table = unsafe { table_at(new_phys) };

        let (kernel_frame, _) = Cr3::read();
        let kernel_table = unsafe { table_at(kernel_frame.start_address().as_u64()) };

        for i in 0..256 {
            new_table[i].set_unused();
        }
        for i in 256..512 {
            new_table[i] = kernel_table[i].clone();
        }

        Ok(AddressSpace { pml4_phys: new_phys })
    }

    /// Walk (allocating intermediate tables as needed) and install a leaf PT entry.
    pub fn map_page(&mut self, virt: u64, phys: u64, flags: PageFlags) -> Result<(), KernelError> {
        let pml4 = unsafe { table_at(self.pml4_phys) };
        let pdpt_phys = ensure_next_level(&mut pml4[pml4_index(virt)], flags)?;
        let pdpt = unsafe { table_at(pdpt_phys) };
        let pd_phys = ensure_next_level(&mut pdpt[pdpt_index(virt)], flags)?;
        let pd = unsafe { table_at(pd_phys) };
        let pt_phys = ensure_next_level(&mut pd[pd_index(virt)], flags)?;
        let pt = unsafe { table_at(pt_phys) };

        let entry = &mut pt[pt_index(virt)];
        entry.set_addr(PhysAddr::new(phys), PageTableFlags::from(flags));
        flush_if_current(self.pml4_phys, virt);
        Ok(())
    }

    pub fn unmap_page(&mut self, virt: u64) -> Option<u64> {
        let pml4 = unsafe { table_at(self.pml4_phys) };
        let e = &pml4[pml4_index(virt)];
        if e.is_unused() {
            return None;
        }
        let pdpt = unsafe { table_at(e.addr().as_u64()) };
        let e = &pdpt[pdpt_index(virt)];
        if e.is_unused() {
            return None;
        }
        let pd = unsafe { table_at(e.addr().as_u64()) };
        let e = &pd[pd_index(virt)];
        if e.is_unused() {
            return None;
        }
        let pt = unsafe { table_at(e.addr().as_u64()) };
        let entry = &mut pt[pt_index(virt)];
        if entry.is_unused() {
            return None;
        }
        let phys = entry.addr().as_u64();
        entry.set_unused();
        flush_if_current(self.pml4_phys, virt);
        Some(phys)
    }

    pub fn translate(&self, virt: u64) -> Option<u64> {
        let pml4 = unsafe { table_at(self.pml4_phys) };
        let e = &pml4[pml4_index(virt)];
        if e.is_unused() {
            return None;
        }
        let pdpt = unsafe { table_at(e.addr().as_u64()) };
        let e = &pdpt[pdpt_index(virt)];
        if e.is_unused() {
            return None;
        }
        let pd = unsafe { table_at(e.addr().as_u64()) };
        let e = &pd[pd_index(virt)];
        if e.is_unused() {
            return None;
        }
        let pt = unsafe { table_at(e.addr().as_u64()) };
        let entry = &pt[pt_index(virt)];
        if entry.is_unused() {
            None
        } else {
            Some(entry.addr().as_u64() + (virt & 0xFFF))
        }
    }

    /// Load this address space into CR3 (context switch point, spec §4.3/§4.5).
    pub fn switch_to(&self) {
        let frame =
            x86_64::structures::paging::PhysFrame::containing_address(PhysAddr::new(self.pml4_phys));
        unsafe {
            Cr3::write(frame, Cr3Flags::empty());
        }
    }

    /// Deep-copy every present user-space (low-half) mapping into a brand-new address
    /// space: new frames, contents copied byte-for-byte. Used by `fork()` (spec §5.3).
    pub fn clone_user_space(&self) -> Result<Self, KernelError> {
        let mut child = AddressSpace::create()?;
        let pml4 = unsafe { table_at(self.pml4_phys) };

        for p4i in 0..256 {
            if pml4[p4i].is_unused() {
                continue;
            }
            let pdpt = unsafe { table_at(pml4[p4i].addr().as_u64()) };
            for p3i in 0..512 {
                if pdpt[p3i].is_unused() {
                    continue;
                }
                let pd = unsafe { table_at(pdpt[p3i].addr().as_u64()) };
                for p2i in 0..512 {
                    if pd[p2i].is_unused() {
                        continue;
                    }
                    let pt = unsafe { table_at(pd[p2i].addr().as_u64()) };
                    for p1i in 0..512 {
                        let entry = &pt[p1i];
                        if entry.is_unused() {
                            continue;
                        }
                        let virt = ((p4i as u64) << 39)
                            | ((p3i as u64) << 30)
                            | ((p2i as u64) << 21)
                            | ((p1i as u64) << 12);
                        let src_phys = entry.addr().as_u64();
                        let flags = entry.flags();

                        let dst_phys = alloc_table_frame()?;
                        unsafe {
                            core::ptr::copy_nonoverlapping(
                                src_phys as *const u8,
                                dst_phys as *mut u8,
                                PAGE_SIZE,
                            );
                        }
                        let page_flags = raw_flags_to_page_flags(flags);
                        child.map_page(virt, dst_phys, page_flags)?;
                    }
                }
            }
        }
        Ok(child)
    }

    /// Unmap and free every present low-half (user) page, leaving the kernel half intact.
    /// Used on `exit()` (spec §5.2) before the slot is reaped by `wait()`.
    pub fn clear_user_space(&mut self) {
        let pml4 = unsafe { table_at(self.pml4_phys) };
        for p4i in 0..256 {
            if pml4[p4i].is_unused() {
                continue;
            }
            let pdpt_phys = pml4[p4i].addr().as_u64();
            let pdpt = unsafe { table_at(pdpt_phys) };
            for p3i in 0..512 {
                if pdpt[p3i].is_unused() {
                    continue;
                }
                let pd_phys = pdpt[p3i].addr().as_u64();
                let pd = unsafe { table_at(pd_phys) };
                for p2i in 0..512 {
                    if pd[p2i].is_unused() {
                        continue;
                    }
                    let pt_phys = pd[p2i].addr().as_u64();
                    let pt = unsafe { table_at(pt_phys) };
                    for p1i in 0..512 {
                        let entry = &mut pt[p1i];
                        if entry.is_unused() {
                            continue;
                        }
                        PMM.lock()
                            .free_frame(entry.addr().as_u64())
                            .expect("clear_user_space: page frame double-freed");
                        entry.set_unused();
                    }
                    PMM.lock()
                        .free_frame(pt_phys)
                        .expect("clear_user_space: page table frame double-freed");
                    pd[p2i].set_unused();
                }
                PMM.lock()
                    .free_frame(pd_phys)
                    .expect("clear_user_space: page directory frame double-freed");
                pdpt[p3i].set_unused();
            }
            PMM.lock()
                .free_frame(pdpt_phys)
                .expect("clear_user_space: PDPT frame double-freed");
            pml4[p4i].set_unused();
        }
    }

    /// Every physical frame the user (low) half of this address space currently points at —
    /// leaf pages and the intermediate PDPT/PD/PT frames alike. Used by `debug_audit` to
    /// cross-check that every frame a live process's page tables reach is still marked used
    /// in the PMM bitmap (a walked frame reading as free would mean a use-after-free).
    pub fn walk_user_frames(&self) -> alloc::vec::Vec<u64> {
        let mut frames = alloc::vec::Vec::new();
        let pml4 = unsafe { table_at(self.pml4_phys) };
        for p4i in 0..256 {
            if pml4[p4i].is_unused() {
                continue;
            }
            let pdpt_phys = pml4[p4i].addr().as_u64();
            frames.push(pdpt_phys);
            let pdpt = unsafe { table_at(pdpt_phys) };
            for p3i in 0..512 {
                if pdpt[p3i].is_unused() {
                    continue;
                }
                let pd_phys = pdpt[p3i].addr().as_u64();
                frames.push(pd_phys);
                let pd = unsafe { table_at(pd_phys) };
                for p2i in 0..512 {
                    if pd[p2i].is_unused() {
                        continue;
                    }
                    let pt_phys = pd[p2i].addr().as_u64();
                    frames.push(pt_phys);
                    let pt = unsafe { table_at(pt_phys) };
                    for p1i in 0..512 {
                        let entry = &pt[p1i];
                        if entry.is_unused() {
                            continue;
                        }
                        frames.push(entry.addr().as_u64());
                    }
                }
            }
        }
        frames
    }

    /// Free the PML4 itself. Caller must have already cleared the user half.
    pub fn destroy(self) {
        PMM.lock()
            .free_frame(self.pml4_phys)
            .expect("destroy: PML4 frame double-freed");
    }
}

fn raw_flags_to_page_flags(flags: PageTableFlags) -> PageFlags {
    let mut out = PageFlags::empty();
    if flags.contains(PageTableFlags::PRESENT) {
        out |= PageFlags::PRESENT;
    }
    if flags.contains(PageTableFlags::WRITABLE) {
        out |= PageFlags::WRITABLE;
    }
    if flags.contains(PageTableFlags::USER_ACCESSIBLE) {
        out |= PageFlags::USER;
    }
    out
}

fn ensure_next_level(
    entry: &mut x86_64::structures::paging::PageTableEntry,
    flags: PageFlags,
) -> Result<u64, KernelError> {
    if entry.is_unused() {
        let phys = alloc_table_frame()?;
        let table = unsafe { table_at(phys) };
        for i in 0..512 {
            table[i].set_unused();
        }
        let mut intermediate_flags = PageTableFlags::PRESENT | PageTableFlags::WRITABLE;
        if flags.contains(PageFlags::USER) {
            intermediate_flags |= PageTableFlags::USER_ACCESSIBLE;
        }
        entry.set_addr(PhysAddr::new(phys), intermediate_flags);
        Ok(phys)
    } else {
        Ok(entry.addr().as_u64())
    }
}

fn flush_if_current(pml4_phys: u64, virt: u64) {
    let (current, _) = Cr3::read();
    if current.start_address().as_u64() == pml4_phys {
        x86_64::instructions::tlb::flush(VirtAddr::new(virt));
    }
}

/// Called once at boot: return a handle on the page tables the bootstrap already built.
pub fn kernel_address_space() -> AddressSpace {
    AddressSpace::current()
}
