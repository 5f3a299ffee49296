#![no_std]
#![feature(abi_x86_interrupt)]

extern crate alloc;

#[cfg(test)]
extern crate std;

pub mod console;
pub mod serial;
pub mod error;
pub mod interrupts;
pub mod memory;
pub mod process;
pub mod syscalls;
pub mod fs;
pub mod loader;
pub mod drivers;
pub mod debug_audit;

use core::panic::PanicInfo;

/// Kernel entry point, reached after the bootloader collaborator has set up long mode,
/// paging, and handed off a `BootInfo` structure (out of scope — see SPEC_FULL.md §1).
#[cfg(not(test))]
#[no_mangle]
pub extern "C" fn _start() -> ! {
    console::init();
    serial::init();
    interrupts::init();
    log_info!("Lumen kernel started.");

    memory::init();
    log_info!("Memory subsystem initialized (PMM + kernel heap + paging).");

    fs::init();
    log_info!("RAM filesystem initialized.");

    process::init();
    syscalls::init();
    drivers::init();
    println!("Lumen kernel is running.");

    x86_64::instructions::interrupts::enable();

    // Idle loop for the boot (PID 0) thread: every other process is cooperatively
    // or preemptively scheduled away from here. The boot thread doubles as the
    // console's foreground reader so a keyboard can drive a future shell.
    loop {
        use crate::drivers::keyboard::scancodes::KeyCode;
        let key = crate::drivers::keyboard::read_char();

        match key {
            KeyCode::Char(c) => print!("{}", c),
            KeyCode::Enter => println!(),
            KeyCode::Backspace => crate::console::WRITER.lock().backspace(),
            _ => {}
        }
    }
}

#[cfg(not(test))]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    x86_64::instructions::interrupts::disable();
    println!("{}", info);
    log_error!("kernel panic: {}", info);
    loop {
        x86_64::instructions::hlt();
    }
}
