//! Physical memory manager — bitmap frame allocator (component C1).
//!
//! Generalizes the teacher's bump allocator (`frame_allocator.rs`, no `free()`) into the
//! bitmap scheme the original C kernel uses (`pmm_init`/`pmm_alloc_page`/`pmm_free_page`):
//! one bit per 4 KiB frame, 0 = free, 1 = used. Frames below `MANAGED_START` are never handed
//! out (kernel image + boot structures live there).

use crate::error::KernelError;
use spin::Mutex;
use lazy_static::lazy_static;

pub const PAGE_SIZE: usize = 4096;
const MANAGED_START: usize = 0x400000;
/// 128 KiB of bitmap bits 4 GiB of physical address space.
const BITMAP_WORDS: usize = (128 * 1024) / 4;

pub struct BitmapFrameAllocator {
    bitmap: [u32; BITMAP_WORDS],
    total_frames: usize,
    free_frames: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct PmmStats {
    pub total_frames: usize,
    pub free_frames: usize,
    pub used_frames: usize,
}

impl BitmapFrameAllocator {
    const fn new() -> Self {
        BitmapFrameAllocator {
            bitmap: [0xFFFF_FFFF; BITMAP_WORDS],
            total_frames: 0,
            free_frames: 0,
        }
    }

    /// Mark all frames from `MANAGED_START` up to `memory_size` bytes as free.
    fn init(&mut self, memory_size: usize) {
        let mut total = memory_size / PAGE_SIZE;
        let capacity = BITMAP_WORDS * 32;
        if total > capacity {
            total = capacity;
        }
        self.total_frames = total;

        let first_free = MANAGED_START / PAGE_SIZE;
        self.free_frames = 0;
        for frame in first_free..total {
            self.clear_bit(frame);
            self.free_frames += 1;
        }
    }

    fn test_bit(&self, frame: usize) -> bool {
        self.bitmap[frame / 32] & (1 << (frame % 32)) != 0
    }

    fn set_bit(&mut self, frame: usize) {
        self.bitmap[frame / 32] |= 1 << (frame % 32);
    }

    fn clear_bit(&mut self, frame: usize) {
        self.bitmap[frame / 32] &= !(1 << (frame % 32));
    }

    fn find_free(&self) -> Option<usize> {
        for (i, word) in self.bitmap.iter().enumerate() {
            if *word != 0xFFFF_FFFF {
                for bit in 0..32 {
                    if word & (1 << bit) == 0 {
                        let frame = i * 32 + bit;
                        if frame < self.total_frames {
                            return Some(frame);
                        }
                    }
                }
            }
        }
        None
    }

    pub fn alloc_frame(&mut self) -> Option<u64> {
        let frame = self.find_free()?;
        self.set_bit(frame);
        self.free_frames -= 1;
        let addr = (frame * PAGE_SIZE) as u64;
        zero_frame(addr);
        Some(addr)
    }

    /// Allocate `count` contiguous frames (used for process kernel stacks).
    pub fn alloc_frames(&mut self, count: usize) -> Option<u64> {
        if count == 0 {
            return None;
        }
        let first_candidate = MANAGED_START / PAGE_SIZE;
        'search: for start in first_candidate..=self.total_frames.saturating_sub(count) {
            for i in 0..count {
                if self.test_bit(start + i) {
                    continue 'search;
                }
            }
            for i in 0..count {
                self.set_bit(start + i);
            }
            self.free_frames -= count;
            let addr = (start * PAGE_SIZE) as u64;
            for i in 0..count {
                zero_frame(addr + (i * PAGE_SIZE) as u64);
            }
            return Some(addr);
        }
        None
    }

    /// Fails with `InvalidAddress` if `addr` is unaligned, below the managed region, or
    /// already free — a double-free is kernel-fatal (§4.1/§7), so callers must not swallow
    /// this error.
    pub fn free_frame(&mut self, addr: u64) -> Result<(), KernelError> {
        let addr = addr as usize;
        if addr % PAGE_SIZE != 0 {
            return Err(KernelError::InvalidAddress);
        }
        let frame = addr / PAGE_SIZE;
        if frame >= self.total_frames {
            return Err(KernelError::InvalidAddress);
        }
        if !self.test_bit(frame) {
            return Err(KernelError::InvalidAddress);
        }
        self.clear_bit(frame);
        self.free_frames += 1;
        Ok(())
    }

    pub fn free_frames_range(&mut self, addr: u64, count: usize) -> Result<(), KernelError> {
        for i in 0..count {
            self.free_frame(addr + (i * PAGE_SIZE) as u64)?;
        }
        Ok(())
    }

    pub fn stats(&self) -> PmmStats {
        PmmStats {
            total_frames: self.total_frames,
            free_frames: self.free_frames,
            used_frames: self.total_frames - self.free_frames,
        }
    }

    /// Whether the frame containing `addr` is currently marked used. Used by `debug_audit`
    /// to check that every frame a live process's page tables point at is actually accounted
    /// for in the bitmap (a frame walked into from a page table must never read as free).
    pub fn is_frame_used(&self, addr: u64) -> bool {
        let frame = addr as usize / PAGE_SIZE;
        frame < self.total_frames && self.test_bit(frame)
    }

    /// Recount free bits directly from the bitmap. Used by `debug_audit` to catch the
    /// tracked `free_frames` counter drifting from the bitmap it's supposed to summarize.
    pub fn count_free_bits(&self) -> usize {
        let mut count = 0;
        for word in 0..BITMAP_WORDS {
            count += self.bitmap[word].count_zeros() as usize;
        }
        count
    }
}

// Frame zeroing touches raw physical addresses, which only makes sense running on bare
// metal with identity-mapped low memory. Host-side `#[cfg(test)]` runs exercise the bitmap
// bookkeeping only (see SPEC_FULL.md §8/§10 on host-testable vs. QEMU-only properties).
#[cfg(not(test))]
fn zero_frame(phys_addr: u64) {
    unsafe {
        let ptr = phys_addr as *mut u64;
        for i in 0..(PAGE_SIZE / 8) {
            ptr.add(i).write_volatile(0);
        }
    }
}

#[cfg(test)]
fn zero_frame(_phys_addr: u64) {}

lazy_static! {
    pub static ref PMM: Mutex<BitmapFrameAllocator> = Mutex::new(BitmapFrameAllocator::new());
}

/// Assumes the bootstrap identity-maps all of `memory_size` bytes (out of scope — see
/// SPEC_FULL.md §1 boot bring-up note).
pub fn init(memory_size: usize) {
    PMM.lock().init(memory_size);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_free_roundtrip() {
        let mut pmm = BitmapFrameAllocator::new();
        pmm.init(8 * 1024 * 1024);
        let stats_before = pmm.stats();
        let f1 = pmm.alloc_frame().unwrap();
        let f2 = pmm.alloc_frame().unwrap();
        assert_ne!(f1, f2);
        assert_eq!(pmm.stats().free_frames, stats_before.free_frames - 2);
        pmm.free_frame(f1).unwrap();
        pmm.free_frame(f2).unwrap();
        assert_eq!(pmm.stats().free_frames, stats_before.free_frames);
    }

    #[test]
    fn double_free_is_rejected() {
        let mut pmm = BitmapFrameAllocator::new();
        pmm.init(8 * 1024 * 1024);
        let f1 = pmm.alloc_frame().unwrap();
        pmm.free_frame(f1).unwrap();
        assert!(pmm.free_frame(f1).is_err());
    }

    #[test]
    fn contiguous_allocation() {
        let mut pmm = BitmapFrameAllocator::new();
        pmm.init(8 * 1024 * 1024);
        let base = pmm.alloc_frames(4).unwrap();
        assert_eq!(base % PAGE_SIZE as u64, 0);
        pmm.free_frames_range(base, 4).unwrap();
    }

    #[test]
    fn exhaustion_returns_none() {
        let mut pmm = BitmapFrameAllocator::new();
        pmm.init(MANAGED_START + PAGE_SIZE * 2);
        assert!(pmm.alloc_frame().is_some());
        assert!(pmm.alloc_frame().is_some());
        assert!(pmm.alloc_frame().is_none());
    }
}
