//! Exercises `fork`/`wait` the way `original_source/src/programs/init.c`'s reap loop does,
//! minus the shell re-exec — one child, one parent, one reaped exit status.

#![no_std]
#![no_main]

use atomiclibc::{exit, fork, getpid, println, wait};

#[no_mangle]
pub extern "C" fn _start() -> ! {
    println!("[fork_wait] parent pid {}", getpid());

    let child = fork();
    if child == 0 {
        println!("[fork_wait] child pid {} running", getpid());
        exit(42);
    }

    if child == u64::MAX {
        println!("[fork_wait] fork failed");
        exit(1);
    }

    let reaped = wait(child);
    println!("[fork_wait] reaped pid {}", reaped);
    exit(0);
}
