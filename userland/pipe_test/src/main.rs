//! Forks a child that writes into a pipe and a parent that reads it back — exercises
//! `pipe`/`fork`/`write`/`read` together (spec §5.9/§5.10's pipe component).

#![no_std]
#![no_main]

use atomiclibc::{close, exit, fork, pipe, println, read, write};

#[no_mangle]
pub extern "C" fn _start() -> ! {
    let fds = match pipe() {
        Some(fds) => fds,
        None => {
            println!("[pipe_test] pipe() failed");
            exit(1);
        }
    };
    let (read_fd, write_fd) = (fds[0] as u64, fds[1] as u64);

    let child = fork();
    if child == 0 {
        close(read_fd);
        write(write_fd, b"ping from child\n");
        close(write_fd);
        exit(0);
    }

    if child == u64::MAX {
        println!("[pipe_test] fork() failed");
        exit(1);
    }

    close(write_fd);
    let mut buf = [0u8; 64];
    let n = read(read_fd, &mut buf);
    if n > 0 {
        if let Ok(s) = core::str::from_utf8(&buf[..n as usize]) {
            println!("[pipe_test] parent read: {}", s.trim_end());
        }
    }
    close(read_fd);
    exit(0);
}
