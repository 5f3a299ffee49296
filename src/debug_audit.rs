//! Invariant checks (component C16, spec §8). None of these run automatically — they're
//! callable probes a debug build or a future kernel test harness can invoke after exercising
//! the scheduler/PMM/FS, the same role `original_source`'s scattered `assert()` calls played
//! but collected in one place and made non-fatal (a failed check is reported, not panicked on).

use crate::fs::pipe::PipeInner;
use crate::process::pcb::ProcessState;
use crate::process::scheduler;
use alloc::collections::BTreeSet;
use alloc::string::String;
use alloc::vec::Vec;
use spin::Mutex;

/// Exactly one task may be `Running` at a time (the one currently on CPU).
pub fn check_single_running() -> Result<(), String> {
    let tasks = scheduler::list_tasks();
    let running = tasks.iter().filter(|t| t.state == ProcessState::Running).count();
    if running == 1 {
        Ok(())
    } else {
        Err(alloc::format!("expected exactly 1 Running task, found {}", running))
    }
}

/// Every live PID must be unique across the current task and the ready queue.
pub fn check_pid_uniqueness() -> Result<(), String> {
    let tasks = scheduler::list_tasks();
    let mut seen = BTreeSet::new();
    for t in &tasks {
        if !seen.insert(t.pid) {
            return Err(alloc::format!("duplicate pid {} in scheduler state", t.pid));
        }
    }
    Ok(())
}

/// The PMM's tracked `free_frames` counter must match an independent recount of the bitmap.
pub fn check_pmm_conservation() -> Result<(), String> {
    let pmm = crate::memory::pmm::PMM.lock();
    let stats = pmm.stats();
    let recounted = pmm.count_free_bits();
    if stats.free_frames == recounted {
        Ok(())
    } else {
        Err(alloc::format!(
            "pmm free_frames counter ({}) disagrees with bitmap recount ({})",
            stats.free_frames,
            recounted
        ))
    }
}

/// A pipe's read/write cursors must never leave its ring buffer.
pub fn check_pipe(pipe: &Mutex<PipeInner>) -> Result<(), String> {
    if pipe.lock().cursors_in_bounds() {
        Ok(())
    } else {
        Err(String::from("pipe cursor out of bounds"))
    }
}

/// Every slot index sitting in the ready queue must point at an occupied process-table slot
/// whose state is actually `Ready` (§3: "ready queue PCB is READY").
pub fn check_ready_queue_membership() -> Result<(), String> {
    let sched = scheduler::SCHEDULER.lock();
    for &slot in sched.ready_queue.iter() {
        match sched.process_table.get(slot) {
            Some(Some(proc)) if proc.state == ProcessState::Ready => {}
            Some(Some(proc)) => {
                return Err(alloc::format!(
                    "ready_queue slot {} holds pid {} in state {:?}, not Ready",
                    slot,
                    proc.pid.0,
                    proc.state
                ))
            }
            _ => return Err(alloc::format!("ready_queue slot {} is empty", slot)),
        }
    }
    Ok(())
}

/// Every frame reachable by walking a live process's page tables must still be marked used
/// in the PMM bitmap — a walked frame reading as free would mean a use-after-free bug.
pub fn check_page_table_frames_vs_pmm() -> Result<(), String> {
    let sched = scheduler::SCHEDULER.lock();
    let pmm = crate::memory::pmm::PMM.lock();
    for entry in sched.process_table.iter() {
        let proc = match entry {
            Some(p) => p,
            None => continue,
        };
        let space = crate::memory::paging::AddressSpace::from_pml4(proc.page_table);
        for frame in space.walk_user_frames() {
            if !pmm.is_frame_used(frame) {
                return Err(alloc::format!(
                    "pid {}: page table references frame {:#x} that the PMM bitmap marks free",
                    proc.pid.0,
                    frame
                ));
            }
        }
    }
    Ok(())
}

/// Every stored file's `inode.size` must match the length of the bytes actually backing it.
pub fn check_file_sizes() -> Result<(), String> {
    crate::fs::ramfs::RAMFS_INSTANCE.check_sizes()?;
    crate::fs::ramfs::TMPFS_INSTANCE.check_sizes()
}

/// Run every process/memory/filesystem-level check and collect the failures (empty == all
/// invariants hold).
pub fn run_all() -> Vec<String> {
    let mut failures = Vec::new();
    let checks: [fn() -> Result<(), String>; 6] = [
        check_single_running,
        check_pid_uniqueness,
        check_pmm_conservation,
        check_ready_queue_membership,
        check_page_table_frames_vs_pmm,
        check_file_sizes,
    ];
    for check in checks {
        if let Err(e) = check() {
            failures.push(e);
        }
    }
    failures
}
