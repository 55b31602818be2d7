//! Kernel-resident process and virtual-memory substrate for a small teaching-style
//! operating system. Supplies per-process address spaces backed by a physical frame
//! allocator, the TLB-miss fault handler, the file-descriptor table model, the
//! process lifecycle (fork/wait/exit) and PID allocation, and the synchronization
//! primitives everything else is built on.
//!
//! The boot ROM, trap vector, file system, ELF loader, and thread scheduler beyond
//! fork/yield/exit/wait-channel sleep are external collaborators and are out of
//! scope here; see [`vfs`] and [`tlb`] for the narrow contracts this crate actually
//! calls into them through.

pub mod addrspace;
pub mod coremap;
pub mod error;
pub mod fault;
pub mod fd;
pub mod param;
pub mod pid;
pub mod proc;
pub mod spinlock;
pub mod synch;
pub mod tlb;
pub mod vfs;
pub mod wchan;

pub use error::{KResult, SysError};
pub use proc::Kernel;
