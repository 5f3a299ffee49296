//! `kill` (spec §5.6, component C11).

pub fn sys_kill(pid: u64, sig: u32) -> u64 {
    match crate::process::signal::kill(pid, sig) {
        Ok(()) => 0,
        Err(_) => u64::MAX,
    }
}
