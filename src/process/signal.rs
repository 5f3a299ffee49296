//! Synchronous, handler-less signals (component C11). Grounded on
//! `original_source/include/ipc/signal.h` — there is no teacher equivalent, the teacher
//! never implements IPC signals at all.
//!
//! Every signal here acts immediately on the target's `ProcessState`: there is no deferred
//! delivery queue and no user-installable handler (spec §4.11 Non-goal), so `kill()` is
//! just a direct state transition guarded by a PID lookup.

use super::pcb::ProcessId;
use super::scheduler::{block_process, wake_process, with_process};
use crate::process::pcb::ProcessState;

pub const SIGINT: u32 = 2;
pub const SIGKILL: u32 = 9;
pub const SIGCONT: u32 = 18;
pub const SIGTERM: u32 = 15;
pub const SIGSTOP: u32 = 19;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalError {
    NoSuchProcess,
    InvalidSignal,
}

/// `kill(pid, sig)` (spec §5.6). Returns `Ok(())` if the target existed and the signal was
/// applied, `Err` otherwise.
pub fn kill(pid: u64, sig: u32) -> Result<(), SignalError> {
    match sig {
        SIGKILL | SIGTERM => {
            let applied = with_process(ProcessId(pid), |proc| {
                proc.state = ProcessState::Terminated;
                proc.exit_status = Some(-(sig as i64));
            });
            applied.ok_or(SignalError::NoSuchProcess)?;
            Ok(())
        }
        SIGSTOP => {
            if block_process(ProcessId(pid)) {
                Ok(())
            } else {
                Err(SignalError::NoSuchProcess)
            }
        }
        SIGCONT => {
            if wake_process(ProcessId(pid)) {
                Ok(())
            } else {
                Err(SignalError::NoSuchProcess)
            }
        }
        SIGINT => {
            // No handler table (§4.11 Non-goal): default action is termination, same as
            // SIGTERM, but recorded with its own signal number in `pending_signal` so `ps`
            // can distinguish why a process died.
            let applied = with_process(ProcessId(pid), |proc| {
                proc.pending_signal = Some(SIGINT);
                proc.state = ProcessState::Terminated;
                proc.exit_status = Some(-(SIGINT as i64));
            });
            applied.ok_or(SignalError::NoSuchProcess)?;
            Ok(())
        }
        _ => Err(SignalError::InvalidSignal),
    }
}
