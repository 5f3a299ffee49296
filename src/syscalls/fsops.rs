//! Path-based filesystem syscalls: stat, mkdir, readdir.

use crate::fs::inode::FileType as InodeType;
use crate::fs::VFS;

/// On-the-wire layout for `stat()` — mirrors `original_source/include/fs/fs.h`'s `fs_node_t`
/// trimmed to what a userland `stat` actually needs: size, type, nothing else (no
/// permission bits tracked per spec §4.9's Non-goal on access control).
#[repr(C)]
pub struct StatBuf {
    pub size: u64,
    pub file_type: u32,
    pub _pad: u32,
}

pub fn sys_stat(path_ptr: *const u8, path_len: usize, out: *mut u8) -> u64 {
    let path = match unsafe { super::user_str(path_ptr, path_len) } {
        Some(p) => p,
        None => return u64::MAX,
    };
    if out.is_null() {
        return u64::MAX;
    }

    let inode = match VFS.lock().lookup(&path) {
        Ok(i) => i,
        Err(_) => return u64::MAX,
    };

    let buf = StatBuf {
        size: inode.size as u64,
        file_type: match inode.file_type {
            InodeType::File => 1,
            InodeType::Directory => 2,
        },
        _pad: 0,
    };

    unsafe {
        core::ptr::write(out as *mut StatBuf, buf);
    }
    0
}

pub fn sys_mkdir(path_ptr: *const u8, path_len: usize) -> u64 {
    let path = match unsafe { super::user_str(path_ptr, path_len) } {
        Some(p) => p,
        None => return u64::MAX,
    };
    match VFS.lock().mkdir(&path) {
        Ok(_) => 0,
        Err(_) => u64::MAX,
    }
}

/// On-the-wire directory entry for `readdir()` — fixed-width so userland can index the
/// output buffer without an out-of-band count, matching `original_source`'s `fs_dirent_t`.
#[repr(C)]
pub struct DirEntryBuf {
    pub name: [u8; 32],
    pub file_type: u32,
}

/// `readdir(fd, out)` (spec row 15): writes the next entry into `out`, using the FD's own
/// offset as the iteration cursor (advanced by one per successful call, exactly like
/// `original_source`'s `sys_readdir`). Returns 1 when an entry was written, 0 at end of
/// directory, -1 (as `u64::MAX`) on error — never a count.
pub fn sys_readdir(fd: usize, out: *mut u8) -> u64 {
    use crate::process::pcb::MAX_FDS;
    use crate::process::scheduler;

    if out.is_null() || fd >= MAX_FDS {
        return u64::MAX;
    }

    let file_arc = match scheduler::with_current(|proc| proc.fd_table[fd].clone()).flatten() {
        Some(f) => f,
        None => return u64::MAX,
    };

    let (path, cursor) = {
        let file = file_arc.lock();
        if !matches!(file.file_type, crate::fs::fd::FileType::Directory) {
            return u64::MAX;
        }
        (file.path.clone(), file.offset as usize)
    };

    let entries = match VFS.lock().readdir(&path) {
        Ok(e) => e,
        Err(_) => return u64::MAX,
    };

    let entry = match entries.get(cursor) {
        Some(e) => e,
        None => return 0,
    };

    let mut name_buf = [0u8; 32];
    let bytes = entry.name.as_bytes();
    let n = bytes.len().min(31);
    name_buf[..n].copy_from_slice(&bytes[..n]);

    let dirent = DirEntryBuf {
        name: name_buf,
        file_type: match entry.inode.file_type {
            InodeType::File => 1,
            InodeType::Directory => 2,
        },
    };
    unsafe {
        core::ptr::write(out as *mut DirEntryBuf, dirent);
    }

    file_arc.lock().offset += 1;
    1
}
