//! Process management: PCB (C4), context switch (C5), scheduler (C6), and signals (C11).
//! Replaces the teacher's `scheduler/` module — same mechanisms, generalized PCB and
//! six-state model, plus quantum-tick preemption and signal delivery the teacher lacked.

pub mod context;
pub mod pcb;
pub mod scheduler;
pub mod signal;

pub use pcb::{ProcessId, ProcessState};

pub fn init() {
    scheduler::init();
}
