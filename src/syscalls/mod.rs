//! Syscall dispatch (components C7/C17): the 18-call surface from
//! `original_source/include/kernel/syscall.h`, routed through the teacher's existing int 0x80
//! entry (`interrupts::usermode::syscall_handler_asm`) with its rax=number, rdi/rsi/rdx=args
//! convention unchanged. The teacher only ever had 13 numbers covering exit/read/write/yield/
//! getpid/fork/exec/wait/open/close/dup/dup2/pipe; this expands to the original's full set
//! and regroups the bodies by concern instead of one long match arm.

pub mod diag;
pub mod fsops;
pub mod io;
pub mod memory;
pub mod process;
pub mod signal;
pub mod time;

use alloc::string::String;

pub const SYS_EXIT: u64 = 1;
pub const SYS_WRITE: u64 = 2;
pub const SYS_READ: u64 = 3;
pub const SYS_GETPID: u64 = 4;
pub const SYS_SLEEP: u64 = 5;
pub const SYS_SBRK: u64 = 6;
pub const SYS_FORK: u64 = 7;
pub const SYS_WAIT: u64 = 8;
pub const SYS_EXECVE: u64 = 9;
pub const SYS_PS: u64 = 10;
pub const SYS_OPEN: u64 = 11;
pub const SYS_CLOSE: u64 = 12;
pub const SYS_STAT: u64 = 13;
pub const SYS_MKDIR: u64 = 14;
pub const SYS_READDIR: u64 = 15;
pub const SYS_KILL: u64 = 16;
pub const SYS_PIPE: u64 = 17;
pub const SYS_DUP2: u64 = 18;

const MAX_PATH_LEN: usize = 4096;

/// Copy a user-supplied `(ptr, len)` string argument into a kernel `String`. Same trust model
/// as the teacher's syscall bodies: no page-table walk to verify the range actually belongs
/// to the caller, just a length sanity check and a UTF-8 decode.
unsafe fn user_str(ptr: *const u8, len: usize) -> Option<String> {
    if len == 0 || len > MAX_PATH_LEN {
        return None;
    }
    let slice = unsafe { core::slice::from_raw_parts(ptr, len) };
    core::str::from_utf8(slice).ok().map(String::from)
}

/// Central syscall dispatcher — called from the int 0x80 handler.
/// Arguments come from registers: rax=number, rdi=arg0, rsi=arg1, rdx=arg2.
/// Returns result in rax.
pub extern "C" fn dispatch(number: u64, arg0: u64, arg1: u64, arg2: u64) -> u64 {
    // int 0x80 is an interrupt gate, so the CPU clears IF on entry; re-enable it so a
    // long-running syscall can still be preempted by the timer.
    x86_64::instructions::interrupts::enable();

    match number {
        SYS_EXIT => process::sys_exit(arg0 as i64),
        SYS_WRITE => io::sys_write(arg0 as usize, arg1 as *const u8, arg2 as usize),
        SYS_READ => io::sys_read(arg0 as usize, arg1 as *mut u8, arg2 as usize),
        SYS_GETPID => process::sys_getpid(),
        SYS_SLEEP => time::sys_sleep(arg0),
        SYS_SBRK => memory::sys_sbrk(arg0 as i64),
        SYS_FORK => process::sys_fork(),
        SYS_WAIT => process::sys_wait(arg0),
        SYS_EXECVE => process::sys_execve(arg0 as *const u8, arg1 as usize),
        SYS_PS => diag::sys_ps(),
        SYS_OPEN => io::sys_open(arg0 as *const u8, arg1 as usize, arg2),
        SYS_CLOSE => io::sys_close(arg0 as usize),
        SYS_STAT => fsops::sys_stat(arg0 as *const u8, arg1 as usize, arg2 as *mut u8),
        SYS_MKDIR => fsops::sys_mkdir(arg0 as *const u8, arg1 as usize),
        SYS_READDIR => fsops::sys_readdir(arg0 as usize, arg1 as *mut u8),
        SYS_KILL => signal::sys_kill(arg0, arg1 as u32),
        SYS_PIPE => io::sys_pipe(arg0 as *mut u32),
        SYS_DUP2 => io::sys_dup2(arg0 as usize, arg1 as usize),
        _ => {
            crate::log_warn!("syscall: unknown number {}", number);
            u64::MAX
        }
    }
}

pub fn init() {
    crate::log_info!("Syscall interface initialized (1..={} calls).", SYS_DUP2);
}
