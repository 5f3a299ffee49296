//! Memory subsystem entry point: brings up the PMM, the kernel's own address space handle,
//! and the kernel heap, in that order (each later stage depends on the one before it).

pub mod pmm;
pub mod paging;
pub mod heap;

use spin::Mutex;
use lazy_static::lazy_static;

/// Conservative default when no memory map is available at this boot stage (asm boot stub
/// handoff is out of scope, see SPEC_FULL.md §1): enough for the kernel image, the process
/// table, the heap, and a handful of user address spaces.
const DEFAULT_MANAGED_MEMORY: usize = 256 * 1024 * 1024;

lazy_static! {
    static ref KERNEL_SPACE: Mutex<Option<paging::AddressSpace>> = Mutex::new(None);
}

#[cfg(not(test))]
pub fn init() {
    pmm::init(DEFAULT_MANAGED_MEMORY);
    crate::log_info!("PMM initialized over {} MiB.", DEFAULT_MANAGED_MEMORY / (1024 * 1024));

    let mut kernel_space = paging::kernel_address_space();
    heap::init_heap(&mut kernel_space).expect("kernel heap init must succeed at boot");
    crate::log_info!(
        "Kernel heap mapped at {:#x}, {} MiB.",
        heap::HEAP_START,
        heap::HEAP_SIZE / (1024 * 1024)
    );

    *KERNEL_SPACE.lock() = Some(kernel_space);
}

/// Borrow the kernel's own address space (used as the template new process spaces are
/// derived from, see `process::pcb::Pcb::spawn`).
pub fn kernel_address_space_pml4() -> u64 {
    KERNEL_SPACE
        .lock()
        .as_ref()
        .expect("memory::init must run before kernel_address_space_pml4")
        .pml4_phys()
}
