//! File descriptors and the per-process FD table (component F). Grounded on
//! `kern/fd/fd.c`, with two fixes called out in spec §9:
//!
//! - `fd_create` in the source mallocs its own FD and overwrites the caller's
//!   out-pointer, leaking the caller's storage. Here `fd_create` returns only the
//!   slot index; the `Fd` object is owned by the table via `Arc`.
//! - `fd_table_copy_entries` re-opens the file by pathname, producing an independent
//!   vnode and seek offset per process. Here `table_copy` aliases the same `Fd`
//!   object (bumping its `Arc` refcount), so parent and child share seek state —
//!   the behavior spec §4.F prefers.

use std::sync::Arc;

use crate::error::SysError;
use crate::param::OPEN_MAX;
use crate::spinlock::SpinLock;
use crate::vfs::{Vnode, Whence};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFlags {
    pub readable: bool,
    pub writable: bool,
}

impl OpenFlags {
    pub const RDONLY: OpenFlags = OpenFlags { readable: true, writable: false };
    pub const WRONLY: OpenFlags = OpenFlags { readable: false, writable: true };
    pub const RDWR: OpenFlags = OpenFlags { readable: true, writable: true };
}

/// An open file: shared by every table slot that aliases it (via `Arc`), so the
/// seek offset advances consistently across `dup2`'d descriptors.
pub struct Fd {
    pub name: String,
    pub vnode: Arc<dyn Vnode>,
    pub flags: OpenFlags,
    offset: SpinLock<u64>,
}

impl Fd {
    fn new(name: String, vnode: Arc<dyn Vnode>, flags: OpenFlags) -> Arc<Fd> {
        Arc::new(Fd { name, vnode, flags, offset: SpinLock::new(0, "fd-offset") })
    }
}

/// Fixed-width `[0, OPEN_MAX)` array of FD slots plus a table lock. Slots 0-2 are
/// preseeded for standard streams at process creation.
pub struct FdTable {
    slots: SpinLock<[Option<Arc<Fd>>; OPEN_MAX]>,
}

impl FdTable {
    pub fn new() -> Self {
        Self { slots: SpinLock::new([const { None }; OPEN_MAX], "fd-table") }
    }

    /// Opens `vnode` and places it in the lowest-index free slot. Returns the index,
    /// or `TooManyOpenFiles` if the table is full.
    pub fn fd_create(&self, name: impl Into<String>, vnode: Arc<dyn Vnode>, flags: OpenFlags) -> Result<usize, SysError> {
        let mut slots = self.slots.lock();
        let idx = slots.iter().position(|s| s.is_none()).ok_or(SysError::TooManyOpenFiles)?;
        slots[idx] = Some(Fd::new(name.into(), vnode, flags));
        Ok(idx)
    }

    /// Places `vnode` at an explicit slot, used by process creation to seed
    /// stdin/stdout/stderr at slots 0, 1, 2.
    pub fn fd_create_at(&self, idx: usize, name: impl Into<String>, vnode: Arc<dyn Vnode>, flags: OpenFlags) {
        let mut slots = self.slots.lock();
        slots[idx] = Some(Fd::new(name.into(), vnode, flags));
    }

    /// Drops the slot. Because slots hold `Arc<Fd>`, the underlying vnode is only
    /// actually released once every aliasing slot (across every table) has done so —
    /// `Arc`'s strong count plays the role of the source's manual vnode refcount.
    pub fn fd_destroy(&self, idx: usize) -> Result<(), SysError> {
        let mut slots = self.slots.lock();
        let slot = slots.get_mut(idx).ok_or(SysError::BadFd)?;
        if slot.take().is_none() {
            return Err(SysError::BadFd);
        }
        Ok(())
    }

    fn get(&self, idx: usize) -> Result<Arc<Fd>, SysError> {
        let slots = self.slots.lock();
        slots.get(idx).and_then(|s| s.clone()).ok_or(SysError::BadFd)
    }

    pub fn read(&self, idx: usize, buf: &mut [u8]) -> Result<usize, SysError> {
        let fd = self.get(idx)?;
        if !fd.flags.readable {
            return Err(SysError::BadFd);
        }
        let mut offset = fd.offset.lock();
        let n = fd.vnode.read(*offset, buf)?;
        *offset += n as u64;
        Ok(n)
    }

    pub fn write(&self, idx: usize, buf: &[u8]) -> Result<usize, SysError> {
        let fd = self.get(idx)?;
        if !fd.flags.writable {
            return Err(SysError::BadFd);
        }
        let mut offset = fd.offset.lock();
        let n = fd.vnode.write(*offset, buf)?;
        *offset += n as u64;
        Ok(n)
    }

    pub fn lseek(&self, idx: usize, off: i64, whence: Whence) -> Result<u64, SysError> {
        let fd = self.get(idx)?;
        if !fd.vnode.seekable() {
            return Err(SysError::SeekOnPipe);
        }
        let mut offset = fd.offset.lock();
        let base: i64 = match whence {
            Whence::Set => 0,
            Whence::Cur => *offset as i64,
            Whence::End => fd.vnode.len() as i64,
        };
        let new_off = base + off;
        if new_off < 0 {
            return Err(SysError::Invalid);
        }
        *offset = new_off as u64;
        Ok(*offset)
    }

    /// `dup2`: no-op if `old == new`. Otherwise closes `new` (if occupied) and
    /// aliases it to the same `Fd` object as `old`.
    pub fn dup2(&self, old: usize, new: usize) -> Result<usize, SysError> {
        if old == new {
            let slots = self.slots.lock();
            if slots.get(old).map(|s| s.is_some()) != Some(true) {
                return Err(SysError::BadFd);
            }
            return Ok(new);
        }

        let mut slots = self.slots.lock();
        let old_fd = slots.get(old).and_then(|s| s.clone()).ok_or(SysError::BadFd)?;
        if slots.get(new).is_none() {
            return Err(SysError::BadFd);
        }
        slots[new] = Some(old_fd);
        Ok(new)
    }

    /// Aliases every occupied slot `3..OPEN_MAX` from `self` into `child` at the
    /// same index (slots 0-2 are seeded independently by process creation).
    pub fn table_copy(&self, child: &FdTable) {
        let src = self.slots.lock();
        let mut dst = child.slots.lock();
        for idx in 3..OPEN_MAX {
            dst[idx] = src[idx].clone();
        }
    }
}

impl Default for FdTable {
    fn default() -> Self {
        Self::new()
    }
}
