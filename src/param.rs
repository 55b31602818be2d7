//! Kernel-wide tunables.
//!
//! Mirrors the xv6/os161 `param.h` convention of collecting magic numbers in one
//! place rather than scattering them through the modules that use them.

/// Size of a physical/virtual page, in bytes.
pub const PAGE_SIZE: usize = 4096;

/// Maximum number of processes the process table can hold.
pub const NPROC: usize = 64;

/// Smallest allocatable PID. 0 and 1 are reserved (1 = kernel process).
pub const PID_MIN: u32 = 2;

/// Largest allocatable PID.
pub const PID_MAX: u32 = 128;

/// Open files per process (size of a process's FD table).
pub const OPEN_MAX: usize = 16;

/// Top of user-addressable memory; the initial value of `stack_base`/`stack_top`.
pub const USERSTACK: usize = 0x8000_0000;

/// Maximum number of children tracked per process.
pub const MAX_CHILDREN: usize = NPROC;
