//! Kernel error taxonomy.
//!
//! Every kernel entry point returns `Result<T, SysError>`; the syscall boundary collapses
//! the error down to a negative register value. Kept as a hand-rolled enum (not `thiserror`)
//! to match the rest of the in-kernel data model: no alloc, no backtraces, just a tag.

use core::fmt;

#[repr(isize)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SysError {
    /// Allocator or frame allocator returned null/0.
    OutOfMemory = -1,
    /// Userspace pointer invalid, page has no mapping in any segment/stack, or
    /// there is no current process/address space to fault against.
    Fault = -2,
    /// Descriptor out of range, empty slot, or flags disallow the operation.
    BadFd = -3,
    /// Bad argument value (unsupported `opts`, negative seek, unaligned `sbrk`, bad `whence`).
    Invalid = -4,
    /// `waitpid` target PID is not a live process.
    NoSuchProcess = -5,
    /// `waitpid` target is not a child of the caller.
    NoChild = -6,
    /// No free slot in the FD table.
    TooManyOpenFiles = -7,
    /// Vnode rejects seek.
    SeekOnPipe = -8,
    /// PID table is full.
    ProcLimit = -9,
}

impl SysError {
    pub fn as_str(&self) -> &'static str {
        match self {
            SysError::OutOfMemory => "out of memory",
            SysError::Fault => "fault",
            SysError::BadFd => "bad file descriptor",
            SysError::Invalid => "invalid argument",
            SysError::NoSuchProcess => "no such process",
            SysError::NoChild => "no child process",
            SysError::TooManyOpenFiles => "too many open files",
            SysError::SeekOnPipe => "seek on non-seekable file",
            SysError::ProcLimit => "process limit reached",
        }
    }
}

impl fmt::Display for SysError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for SysError {}

pub type KResult<T> = Result<T, SysError>;
