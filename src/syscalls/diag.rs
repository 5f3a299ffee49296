//! `ps` (spec §5.11, component C17): print the live task table to the console. Ignores
//! every argument and returns 0, exactly like `original_source`'s `sys_ps` — there is no
//! output buffer to fill, this syscall's entire effect is the printout.

use crate::process::pcb::ProcessState;
use crate::process::scheduler;

fn state_str(state: ProcessState) -> &'static str {
    match state {
        ProcessState::Ready => "READY",
        ProcessState::Running => "RUN",
        ProcessState::Blocked => "BLOCK",
        ProcessState::Waiting => "WAIT",
        ProcessState::Zombie => "ZOMBIE",
        ProcessState::Terminated => "TERM",
    }
}

pub fn sys_ps() -> u64 {
    crate::println!("PID  PPID  STATE   NAME");
    crate::println!("---  ----  ------  ----------");
    for task in scheduler::list_tasks() {
        crate::println!(
            "{:<5}{:<6}{:<8}{}",
            task.pid,
            task.parent_pid.unwrap_or(0),
            state_str(task.state),
            task.name,
        );
    }
    0
}
