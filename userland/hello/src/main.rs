//! Rust counterpart of `original_source/userspace/hello.c` — the smallest possible
//! freestanding ELF binary the loader can exec.

#![no_std]
#![no_main]

use atomiclibc::{exit, println};

#[no_mangle]
pub extern "C" fn _start() -> ! {
    println!("Hello from ELF!");
    exit(0);
}
