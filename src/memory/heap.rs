//! Kernel heap — first-fit byte allocator with inline chunk headers (component C2).
//!
//! Algorithm grounded on the original C kernel's `kmalloc`/`kfree`/`krealloc`
//! (`mm/kmalloc.c`): a singly-linked list of `BlockHeader`s threaded through the heap
//! region, first-fit search, split on over-sized match, coalesce-with-next on free.
//! `krealloc`'s shrink path (§4.2, resolved in SPEC_FULL.md §9) additionally coalesces
//! the freed tail into the following block when it is itself free.

use core::alloc::{GlobalAlloc, Layout};
use core::mem::size_of;
use core::ptr::NonNull;
use spin::Mutex;

pub const HEAP_START: usize = 0x0200_0000;
pub const HEAP_SIZE: usize = 0x0100_0000; // 16 MiB
const MIN_BLOCK_SIZE: usize = 16;
const ALIGN: usize = 8;

#[repr(C)]
struct BlockHeader {
    size: usize,
    next: *mut BlockHeader,
    free: bool,
}

const HEADER_SIZE: usize = size_of::<BlockHeader>();

fn align_up(n: usize, align: usize) -> usize {
    (n + align - 1) & !(align - 1)
}

pub struct FirstFitHeap {
    head: *mut BlockHeader,
    initialized: bool,
    allocated_bytes: usize,
    free_bytes: usize,
}

unsafe impl Send for FirstFitHeap {}

impl FirstFitHeap {
    pub const fn empty() -> Self {
        FirstFitHeap {
            head: core::ptr::null_mut(),
            initialized: false,
            allocated_bytes: 0,
            free_bytes: 0,
        }
    }

    /// # Safety
    /// `heap_start .. heap_start + heap_size` must be mapped, writable, and not aliased by
    /// any other allocator.
    pub unsafe fn init(&mut self, heap_start: usize, heap_size: usize) {
        let head = heap_start as *mut BlockHeader;
        (*head).size = heap_size - HEADER_SIZE;
        (*head).next = core::ptr::null_mut();
        (*head).free = true;
        self.head = head;
        self.initialized = true;
        self.free_bytes = heap_size - HEADER_SIZE;
        self.allocated_bytes = 0;
    }

    fn find_free(&self, size: usize) -> Option<*mut BlockHeader> {
        let mut current = self.head;
        unsafe {
            while !current.is_null() {
                if (*current).free && (*current).size >= size {
                    return Some(current);
                }
                current = (*current).next;
            }
        }
        None
    }

    unsafe fn split(&mut self, block: *mut BlockHeader, size: usize) {
        let total = (*block).size;
        if total >= size + HEADER_SIZE + MIN_BLOCK_SIZE {
            let new_block = (block as *mut u8).add(HEADER_SIZE + size) as *mut BlockHeader;
            (*new_block).size = total - size - HEADER_SIZE;
            (*new_block).free = true;
            (*new_block).next = (*block).next;
            (*block).size = size;
            (*block).next = new_block;
        }
    }

    unsafe fn coalesce(&mut self) {
        let mut current = self.head;
        while !current.is_null() && !(*current).next.is_null() {
            let next = (*current).next;
            if (*current).free && (*next).free {
                (*current).size += HEADER_SIZE + (*next).size;
                (*current).next = (*next).next;
            } else {
                current = (*current).next;
            }
        }
    }

    unsafe fn alloc(&mut self, layout: Layout) -> *mut u8 {
        if !self.initialized {
            return core::ptr::null_mut();
        }
        let size = align_up(layout.size().max(MIN_BLOCK_SIZE), ALIGN);
        let block = match self.find_free(size) {
            Some(b) => b,
            None => return core::ptr::null_mut(),
        };
        self.split(block, size);
        (*block).free = false;
        self.allocated_bytes += (*block).size;
        self.free_bytes = self.free_bytes.saturating_sub((*block).size);
        (block as *mut u8).add(HEADER_SIZE)
    }

    unsafe fn dealloc(&mut self, ptr: *mut u8, _layout: Layout) {
        if ptr.is_null() {
            return;
        }
        let block = ptr.sub(HEADER_SIZE) as *mut BlockHeader;
        debug_assert!(!(*block).free, "double free in kernel heap");
        (*block).free = true;
        self.allocated_bytes = self.allocated_bytes.saturating_sub((*block).size);
        self.free_bytes += (*block).size;
        self.coalesce();
    }

    /// Grow or shrink an existing allocation. Shrinking updates the header's size in
    /// place and, if the freed tail is itself large enough and followed by a free
    /// block, coalesces it into the next block rather than leaking it as permanent
    /// internal fragmentation (see SPEC_FULL.md §9).
    unsafe fn realloc(&mut self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if ptr.is_null() {
            return self.alloc(Layout::from_size_align_unchecked(new_size, layout.align()));
        }
        let block = ptr.sub(HEADER_SIZE) as *mut BlockHeader;
        let old_size = (*block).size;
        let aligned_new = align_up(new_size.max(MIN_BLOCK_SIZE), ALIGN);

        if aligned_new <= old_size {
            if old_size >= aligned_new + HEADER_SIZE + MIN_BLOCK_SIZE {
                self.allocated_bytes = self.allocated_bytes.saturating_sub(old_size - aligned_new);
                self.free_bytes += old_size - aligned_new;
                self.split(block, aligned_new);
                (*block).free = false;
                self.coalesce();
            }
            return ptr;
        }

        let new_ptr = self.alloc(Layout::from_size_align_unchecked(new_size, layout.align()));
        if new_ptr.is_null() {
            return core::ptr::null_mut();
        }
        core::ptr::copy_nonoverlapping(ptr, new_ptr, old_size.min(new_size));
        self.dealloc(ptr, layout);
        new_ptr
    }

    pub fn stats(&self) -> (usize, usize) {
        (self.allocated_bytes, self.free_bytes)
    }
}

pub struct LockedHeap(Mutex<FirstFitHeap>);

impl LockedHeap {
    pub const fn empty() -> Self {
        LockedHeap(Mutex::new(FirstFitHeap::empty()))
    }

    /// # Safety
    /// Same obligations as `FirstFitHeap::init`.
    pub unsafe fn init(&self, heap_start: usize, heap_size: usize) {
        self.0.lock().init(heap_start, heap_size);
    }

    pub fn stats(&self) -> (usize, usize) {
        self.0.lock().stats()
    }
}

unsafe impl GlobalAlloc for LockedHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        self.0.lock().alloc(layout)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        self.0.lock().dealloc(ptr, layout)
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        self.0.lock().realloc(ptr, layout, new_size)
    }
}

#[cfg(not(test))]
#[global_allocator]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

/// Map and hand the heap region to the global allocator. Called once from
/// `memory::init()` after the PMM and page tables are up.
#[cfg(not(test))]
pub fn init_heap(mapper: &mut crate::memory::paging::AddressSpace) -> Result<(), crate::error::KernelError> {
    use crate::memory::pmm::{PAGE_SIZE, PMM};
    use crate::memory::paging::PageFlags;

    let pages = HEAP_SIZE / PAGE_SIZE;
    for i in 0..pages {
        let virt = HEAP_START + i * PAGE_SIZE;
        let phys = PMM
            .lock()
            .alloc_frame()
            .ok_or(crate::error::KernelError::OutOfMemory)?;
        mapper.map_page(virt as u64, phys, PageFlags::PRESENT | PageFlags::WRITABLE)?;
    }

    unsafe { ALLOCATOR.init(HEAP_START, HEAP_SIZE) };
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::alloc::Layout;

    fn make_heap(size: usize) -> (Vec<u8>, FirstFitHeap) {
        let mut backing = vec![0u8; size];
        let mut heap = FirstFitHeap::empty();
        unsafe { heap.init(backing.as_mut_ptr() as usize, size) };
        (backing, heap)
    }

    #[test]
    fn alloc_dealloc_basic() {
        let (_backing, mut heap) = make_heap(4096);
        let layout = Layout::from_size_align(64, 8).unwrap();
        let p = unsafe { heap.alloc(layout) };
        assert!(!p.is_null());
        unsafe { heap.dealloc(p, layout) };
        let (allocated, _free) = heap.stats();
        assert_eq!(allocated, 0);
    }

    #[test]
    fn split_then_coalesce() {
        let (_backing, mut heap) = make_heap(4096);
        let layout = Layout::from_size_align(32, 8).unwrap();
        let a = unsafe { heap.alloc(layout) };
        let b = unsafe { heap.alloc(layout) };
        assert_ne!(a, b);
        unsafe {
            heap.dealloc(a, layout);
            heap.dealloc(b, layout);
        }
        let (allocated, _) = heap.stats();
        assert_eq!(allocated, 0);
    }

    #[test]
    fn realloc_shrink_coalesces_tail() {
        let (_backing, mut heap) = make_heap(4096);
        let big = Layout::from_size_align(256, 8).unwrap();
        let p = unsafe { heap.alloc(big) };
        let shrunk = unsafe { heap.realloc(p, big, 32) };
        assert_eq!(p, shrunk);
    }

    #[test]
    fn realloc_grow_copies_data() {
        let (_backing, mut heap) = make_heap(4096);
        let small = Layout::from_size_align(16, 8).unwrap();
        let p = unsafe { heap.alloc(small) };
        unsafe { *p = 0x42 };
        let grown = unsafe { heap.realloc(p, small, 128) };
        assert!(!grown.is_null());
        assert_eq!(unsafe { *grown }, 0x42);
    }

    #[test]
    fn out_of_memory_returns_null() {
        let (_backing, mut heap) = make_heap(128);
        let layout = Layout::from_size_align(4096, 8).unwrap();
        let p = unsafe { heap.alloc(layout) };
        assert!(p.is_null());
    }
}
