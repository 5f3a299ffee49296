//! `sbrk` (spec §5.2, component C4's heap triple): grow or shrink the current process's
//! heap, mapping new frames into its address space on demand rather than pre-mapping a
//! fixed heap region the way `loader::elf::load` does for code/stack.

use crate::error::KernelError;
use crate::memory::paging::{AddressSpace, PageFlags};
use crate::memory::pmm::{PAGE_SIZE, PMM};
use crate::process::scheduler;

fn align_down(addr: u64) -> u64 {
    addr & !(PAGE_SIZE as u64 - 1)
}

fn align_up(addr: u64) -> u64 {
    (addr + PAGE_SIZE as u64 - 1) & !(PAGE_SIZE as u64 - 1)
}

/// Returns the *previous* break on success (the traditional `sbrk` convention), `u64::MAX`
/// on error (out of heap range, or out of physical memory while mapping new pages).
pub fn sys_sbrk(delta: i64) -> u64 {
    let result = scheduler::with_current(|proc| -> Result<u64, KernelError> {
        let old_break = proc.heap_current;
        let new_break = if delta >= 0 {
            old_break
                .checked_add(delta as u64)
                .ok_or(KernelError::InvalidArgument)?
        } else {
            old_break
                .checked_sub((-delta) as u64)
                .ok_or(KernelError::InvalidArgument)?
        };
        if new_break < proc.heap_start || new_break > proc.heap_max {
            return Err(KernelError::OutOfMemory);
        }

        if new_break > old_break {
            let mut space = AddressSpace::from_pml4(proc.page_table);
            let mut virt = align_down(old_break.max(proc.heap_start));
            let end = align_up(new_break);
            while virt < end {
                if space.translate(virt).is_none() {
                    let phys = PMM.lock().alloc_frame().ok_or(KernelError::OutOfMemory)?;
                    space
                        .map_page(virt, phys, PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::USER)
                        .map_err(|_| KernelError::OutOfMemory)?;
                    proc.pages_allocated += 1;
                }
                virt += PAGE_SIZE as u64;
            }
        }

        proc.heap_current = new_break;
        Ok(old_break)
    });

    match result {
        Some(Ok(old_break)) => old_break,
        _ => u64::MAX,
    }
}
