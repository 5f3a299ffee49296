//! Process control block (component C4), generalized from the teacher's `scheduler::task`
//! flat `Process` struct to the full field set of the original C kernel's `process_t`
//! (`include/kernel/process.h`): heap triple for `sbrk`, stack bounds, tick accounting and
//! priority for the round-robin scheduler, and a page-fault counter for `ps`/diagnostics.

use super::context::Context;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;

pub const MAX_FDS: usize = 16;
pub const KERNEL_STACK_SIZE: usize = 8192;
pub const DEFAULT_QUANTUM: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(pub u64);

/// Process state machine (spec §3): READY/RUNNING/BLOCKED/WAITING/ZOMBIE/TERMINATED.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Ready,
    Running,
    Blocked,
    Waiting,
    Zombie,
    Terminated,
}

pub struct Pcb {
    pub pid: ProcessId,
    pub parent_pid: Option<ProcessId>,
    pub name: String,
    pub state: ProcessState,
    pub exit_status: Option<i64>,
    pub children: Vec<ProcessId>,
    pub context: Context,

    /// Root of this process's address space (physical address of its PML4).
    pub page_table: u64,

    pub heap_start: u64,
    pub heap_current: u64,
    pub heap_max: u64,
    pub stack_bottom: u64,
    pub stack_top: u64,

    pub pages_allocated: usize,
    pub page_faults: u64,

    pub kernel_stack: alloc::boxed::Box<[u8]>,
    pub user_allocations: Vec<(u64, u64)>,

    pub ticks_total: u64,
    pub ticks_remaining: u64,
    pub priority: u32,

    pub fd_table: Vec<Option<Arc<Mutex<crate::fs::fd::File>>>>,
    pub cwd: String,

    /// Synchronous signal delivered but not yet acted on (spec §4.11/§6).
    pub pending_signal: Option<u32>,
}

pub fn new_fd_table() -> Vec<Option<Arc<Mutex<crate::fs::fd::File>>>> {
    use crate::fs::fd::File;
    let mut table = Vec::with_capacity(MAX_FDS);
    for _ in 0..MAX_FDS {
        table.push(None);
    }
    table[0] = Some(File::new_console());
    table[1] = Some(File::new_console());
    table[2] = Some(File::new_console());
    table
}

impl Pcb {
    pub fn is_runnable(&self) -> bool {
        matches!(self.state, ProcessState::Ready | ProcessState::Running)
    }
}
