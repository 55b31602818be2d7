//! File-system contract (out of scope per spec §1): `vfs_open`, `VOP_READ`,
//! `VOP_WRITE`, vnode refcounting, etc. live outside this core. This module defines
//! the narrow trait the FD layer (component F) actually calls, plus an in-memory
//! test double standing in for the real VFS so component F is exercisable in
//! isolation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::SysError;

/// Whence values for `lseek`, per spec §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Set,
    Cur,
    End,
}

/// The external collaborator an open file ultimately refers to. Reference-counted
/// by `Arc`; `strong_count` stands in for the vnode refcount spec §4.F reasons about.
pub trait Vnode: Send + Sync {
    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<usize, SysError>;
    fn write(&self, offset: u64, buf: &[u8]) -> Result<usize, SysError>;
    fn len(&self) -> u64;
    fn seekable(&self) -> bool {
        true
    }
    /// Name used by `__getcwd` and FD bookkeeping; not a full path (path
    /// construction is the VFS's job, out of scope per spec §1).
    fn name(&self) -> &str {
        ""
    }
}

/// A named, growable in-memory file — enough of a VFS to test `open`/`read`/`write`/
/// `lseek`/`dup2` against.
pub struct MemVnode {
    pub name: String,
    data: Mutex<Vec<u8>>,
}

impl MemVnode {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self { name: name.into(), data: Mutex::new(Vec::new()) })
    }
}

impl Vnode for MemVnode {
    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<usize, SysError> {
        let data = self.data.lock().unwrap();
        let offset = offset as usize;
        if offset >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - offset);
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        Ok(n)
    }

    fn write(&self, offset: u64, buf: &[u8]) -> Result<usize, SysError> {
        let mut data = self.data.lock().unwrap();
        let offset = offset as usize;
        if data.len() < offset + buf.len() {
            data.resize(offset + buf.len(), 0);
        }
        data[offset..offset + buf.len()].copy_from_slice(buf);
        Ok(buf.len())
    }

    fn len(&self) -> u64 {
        self.data.lock().unwrap().len() as u64
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// The console device, `"con:"`, seeded into slots 0/1/2 at process creation. Reads
/// are not modeled (there is no input source in a hosted test); writes succeed and
/// are discarded, matching the spec's scope (the console driver itself is external).
pub struct Console {
    written: AtomicUsize,
}

impl Console {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { written: AtomicUsize::new(0) })
    }

    pub fn bytes_written(&self) -> usize {
        self.written.load(Ordering::Relaxed)
    }
}

impl Vnode for Console {
    fn read(&self, _offset: u64, _buf: &mut [u8]) -> Result<usize, SysError> {
        Ok(0)
    }

    fn write(&self, _offset: u64, buf: &[u8]) -> Result<usize, SysError> {
        self.written.fetch_add(buf.len(), Ordering::Relaxed);
        Ok(buf.len())
    }

    fn len(&self) -> u64 {
        0
    }

    fn seekable(&self) -> bool {
        false
    }

    fn name(&self) -> &str {
        "con:"
    }
}
