//! Process-lifecycle syscalls: exit, getpid, fork, wait, execve.

use crate::process::scheduler;

pub fn sys_exit(code: i64) -> ! {
    scheduler::exit_current(code)
}

pub fn sys_getpid() -> u64 {
    scheduler::current_pid().0
}

pub fn sys_fork() -> u64 {
    match scheduler::fork() {
        Ok(pid) => pid,
        Err(e) => {
            crate::log_warn!("fork failed: {}", e);
            u64::MAX
        }
    }
}

pub fn sys_wait(target_pid: u64) -> u64 {
    scheduler::wait(target_pid)
}

/// `execve(path)` (spec §5.5). Never returns to the caller on success — it jumps straight
/// into the new image. A failed load leaves the calling process untouched and returns `-1`.
pub fn sys_execve(path_ptr: *const u8, path_len: usize) -> u64 {
    let path = match unsafe { super::user_str(path_ptr, path_len) } {
        Some(p) => p,
        None => return u64::MAX,
    };

    match scheduler::exec(&path) {
        Ok(()) => unreachable!("exec does not return on success"),
        Err(e) => {
            crate::log_error!("execve({}) failed: {}", path, e);
            u64::MAX
        }
    }
}
