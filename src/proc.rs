//! Process lifecycle (component G): creation, `fork`, `waitpid`, `_exit`, `getpid`,
//! `sbrk`. Grounded on `proc.c`, `sys_fork.c`, `sys_waitpid.c`, `sys__exit.c`,
//! `sys_sbrk.c`.
//!
//! The real kernel's thread/trapframe/scheduler machinery (installing the child's
//! entrypoint, copying the trapframe, entering user mode) is out of scope per spec
//! §1 ("the thread scheduler beyond fork, yield, exit, and wait-channel sleep/wake");
//! what's modeled here is the *data-model* effect of each syscall on processes,
//! address spaces, and FD tables.

use std::collections::HashMap;
use std::sync::Arc;

use crate::addrspace::{AddressSpace, VirtAddr};
use crate::coremap::CoreMap;
use crate::error::SysError;
use crate::fd::{FdTable, OpenFlags};
use crate::param::{PAGE_SIZE, USERSTACK};
use crate::pid::{Pid, PidTable};
use crate::spinlock::SpinLock;
use crate::synch::{CondVar, Lock};
use crate::vfs::{Console, Vnode, Whence};

/// Encodes a normal-exit status the way `_MKWAIT_EXIT` does: low bits reserved for
/// signal number (always 0 here, since killed processes are not modeled), exit code
/// in the high bits.
pub fn mkwait_exit(code: i32) -> i32 {
    (code & 0xff) << 8
}

struct ChildEntry {
    pid: Pid,
    index: usize,
}

struct ZombieState {
    zombie: bool,
    exit_code: i32,
}

/// A process. Owns its address space and FD table outright; reaches relatives only
/// by PID through the owning [`Kernel`]'s process table (spec §9's "look up
/// relatives through a process table" design note).
pub struct Process {
    pub name: String,
    pub pid: Pid,
    pub address_space: AddressSpace,
    pub fd_table: FdTable,
    cwd: SpinLock<Arc<dyn Vnode>>,
    parent: Option<Pid>,
    /// Guards `children`/`running_children` for this process — i.e. it is *this*
    /// process's children who acquire it (as "the parent's lock") when exiting.
    parent_lock: Lock,
    parent_cv: CondVar,
    children: std::sync::Mutex<Vec<ChildEntry>>,
    running_children: std::sync::Mutex<usize>,
    /// This process's own zombie flag/exit code. By protocol (mirroring the
    /// source), only mutated while the parent's `parent_lock` is held; guarded by
    /// its own mutex regardless so misuse cannot cause undefined behavior, only an
    /// assertion-free logic bug.
    zombie_state: std::sync::Mutex<ZombieState>,
}

impl Process {
    fn new(name: String, pid: Pid, parent: Option<Pid>, cwd: Arc<dyn Vnode>, address_space: AddressSpace) -> Self {
        Self {
            name,
            pid,
            address_space,
            fd_table: FdTable::new(),
            cwd: SpinLock::new(cwd, "proc-cwd"),
            parent,
            parent_lock: Lock::new("proc-parent-lock"),
            parent_cv: CondVar::new("proc-parent-cv"),
            children: std::sync::Mutex::new(Vec::new()),
            running_children: std::sync::Mutex::new(0),
            zombie_state: std::sync::Mutex::new(ZombieState { zombie: false, exit_code: 0 }),
        }
    }

    pub fn is_zombie(&self) -> bool {
        self.zombie_state.lock().unwrap().zombie
    }

    pub fn cwd(&self) -> Arc<dyn Vnode> {
        self.cwd.lock().clone()
    }
}

/// The kernel-root object (spec §9): owns the core map, PID table, and process
/// table so that no mutable state is a free-floating global.
pub struct Kernel {
    pub coremap: CoreMap,
    pids: PidTable,
    processes: std::sync::Mutex<HashMap<Pid, Arc<Process>>>,
}

impl Kernel {
    pub fn bootstrap(frame_count: usize) -> Self {
        Self {
            coremap: CoreMap::new(crate::coremap::PhysAddr(0), frame_count),
            pids: PidTable::new(),
            processes: std::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn process(&self, pid: Pid) -> Option<Arc<Process>> {
        self.processes.lock().unwrap().get(&pid).cloned()
    }

    /// `create_run_program`: allocates a PID, opens three console FDs into slots
    /// 0/1/2, inherits `parent`'s cwd (bumping its `Arc` refcount), records the
    /// parent pointer. Starts with a fresh, empty address space (the ELF loader that
    /// would populate it is out of scope per spec §1).
    pub fn create_run_program(&self, name: &str, parent: Option<&Arc<Process>>) -> Result<Arc<Process>, SysError> {
        let pid = self.pids.allocate().ok_or(SysError::ProcLimit)?;
        let cwd: Arc<dyn Vnode> = match parent {
            Some(p) => p.cwd(),
            None => Console::new(),
        };

        let address_space = AddressSpace::create(VirtAddr(USERSTACK));
        let proc = self.seed_std_streams(Process::new(name.to_string(), pid, parent.map(|p| p.pid), cwd, address_space));

        self.processes.lock().unwrap().insert(pid, proc.clone());
        log::debug!("create_run_program: {} pid={}", name, pid);
        Ok(proc)
    }

    fn seed_std_streams(&self, proc: Process) -> Arc<Process> {
        let console = Console::new();
        proc.fd_table.fd_create_at(0, "con:", console.clone(), OpenFlags::RDONLY);
        proc.fd_table.fd_create_at(1, "con:", console.clone(), OpenFlags::WRONLY);
        proc.fd_table.fd_create_at(2, "con:", console, OpenFlags::WRONLY);
        Arc::new(proc)
    }

    /// `fork`: under the parent's parent-lock, creates the child (its own PID, a
    /// deep copy of the parent's address space, an aliased copy of its FD table),
    /// links it into the parent's child list, and returns the child's PID. The
    /// child `Process` is fully built — including its copied address space — before
    /// it is ever inserted into the process table, so no other thread can observe a
    /// half-initialized child.
    pub fn fork(&self, parent: &Arc<Process>) -> Result<Pid, SysError> {
        parent.parent_lock.acquire();

        let result = (|| {
            let pid = self.pids.allocate().ok_or(SysError::ProcLimit)?;

            let address_space = parent
                .address_space
                .copy(&self.coremap, |from, to| self.copy_frame(from, to))
                .map_err(|_| {
                    self.pids.free(pid);
                    SysError::OutOfMemory
                })?;

            let child = self.seed_std_streams(Process::new(
                parent.name.clone(),
                pid,
                Some(parent.pid),
                parent.cwd(),
                address_space,
            ));
            parent.fd_table.table_copy(&child.fd_table);

            self.processes.lock().unwrap().insert(pid, child.clone());

            let mut children = parent.children.lock().unwrap();
            let index = children.len();
            children.push(ChildEntry { pid, index });
            *parent.running_children.lock().unwrap() += 1;

            Ok(pid)
        })();

        parent.parent_lock.release();
        match &result {
            Ok(pid) => log::debug!("fork: parent pid={} child pid={}", parent.pid, pid),
            Err(e) => log::warn!("fork: parent pid={} failed: {}", parent.pid, e),
        }
        result
    }

    /// Stand-in for the kernel-window `memcpy` the real `as_copy` performs; frames
    /// are zeroed here since there is no user-space backing store in this hosted
    /// model. The important property under test is that the two frames are
    /// distinct, not their contents.
    fn copy_frame(&self, _from: crate::coremap::PhysAddr, _to: crate::coremap::PhysAddr) {}

    /// `_exit(code)`. Fixes the lock-ordering hazard in spec §9: the source acquires
    /// its own `parent_lock` before its parent's, which is not globally consistent;
    /// here every exit acquires the *parent's* `parent_lock` first, which is always
    /// consistent because the process tree is acyclic.
    pub fn exit(&self, proc: &Arc<Process>, code: i32) {
        log::info!("exit: pid={} code={}", proc.pid, code);
        let parent = proc.parent.and_then(|pid| self.process(pid));

        if let Some(parent) = &parent {
            parent.parent_lock.acquire();
        }
        proc.parent_lock.acquire();

        self.reap_zombie_children(proc);

        if let Some(parent) = &parent {
            if parent.is_zombie() {
                // Orphaned: our parent already exited. Destroy ourselves immediately
                // since no one will ever `waitpid` us.
                proc.parent_lock.release();
                parent.parent_lock.release();
                self.destroy_process(proc);
                return;
            }

            *parent.running_children.lock().unwrap() -= 1;
            {
                let mut z = proc.zombie_state.lock().unwrap();
                z.zombie = true;
                z.exit_code = mkwait_exit(code);
            }
            parent.parent_cv.broadcast(&parent.parent_lock);
        } else {
            let mut z = proc.zombie_state.lock().unwrap();
            z.zombie = true;
            z.exit_code = mkwait_exit(code);
        }

        proc.parent_lock.release();
        if let Some(parent) = &parent {
            parent.parent_lock.release();
        }
    }

    fn reap_zombie_children(&self, proc: &Arc<Process>) {
        let zombies: Vec<Pid> = {
            let children = proc.children.lock().unwrap();
            children
                .iter()
                .filter(|c| self.process(c.pid).is_some_and(|p| p.is_zombie()))
                .map(|c| c.pid)
                .collect()
        };
        for pid in zombies {
            if let Some(child) = self.process(pid) {
                self.destroy_process(&child);
            }
            self.remove_child(proc, pid);
        }
    }

    fn remove_child(&self, proc: &Arc<Process>, pid: Pid) {
        let mut children = proc.children.lock().unwrap();
        if let Some(pos) = children.iter().position(|c| c.pid == pid) {
            children.remove(pos);
            for (i, c) in children.iter_mut().enumerate() {
                c.index = i;
            }
        }
    }

    /// Frees the process's address space frames and returns its PID to the pool.
    /// Asserts the process has no un-reaped children of its own: this core does not
    /// re-parent grandchildren to an init process (full POSIX semantics are a
    /// Non-goal per spec §1).
    fn destroy_process(&self, proc: &Arc<Process>) {
        assert!(
            proc.children.lock().unwrap().is_empty(),
            "destroy_process: pid {} still has un-reaped children",
            proc.pid
        );
        self.processes.lock().unwrap().remove(&proc.pid);
        self.pids.free(proc.pid);
        proc.address_space.destroy(&self.coremap);
    }

    /// `waitpid(pid, &status, options)`.
    pub fn waitpid(&self, caller: &Arc<Process>, pid: Pid, options: i32) -> Result<(Pid, i32), SysError> {
        if options != 0 {
            return Err(SysError::Invalid);
        }
        if matches!(self.pids.status(pid), crate::pid::PidStatus::Invalid) {
            return Err(SysError::NoSuchProcess);
        }

        caller.parent_lock.acquire();
        loop {
            let is_child = caller.children.lock().unwrap().iter().any(|c| c.pid == pid);
            if !is_child {
                caller.parent_lock.release();
                return Err(SysError::NoChild);
            }

            let child = self.process(pid);
            let zombie = child.as_ref().is_some_and(|c| c.is_zombie());
            if zombie {
                let child = child.unwrap();
                let exit_code = child.zombie_state.lock().unwrap().exit_code;
                self.destroy_process(&child);
                self.remove_child(caller, pid);
                caller.parent_lock.release();
                return Ok((pid, exit_code));
            }

            caller.parent_cv.wait(&caller.parent_lock);
        }
    }

    pub fn getpid(&self, proc: &Arc<Process>) -> Pid {
        proc.pid
    }

    /// `sbrk(amount)`: validates page alignment, then delegates the bounds check to
    /// the address space.
    pub fn sbrk(&self, proc: &Arc<Process>, amount: isize) -> Result<VirtAddr, SysError> {
        if amount.unsigned_abs() % PAGE_SIZE != 0 {
            return Err(SysError::Invalid);
        }
        proc.address_space.adjust_heap(amount).ok_or(SysError::Invalid)
    }

    /// `open(path, flags, mode)`: the path lookup itself (`vfs_open`) is an external
    /// collaborator per spec §1, so the caller resolves `path` to a `vnode` before
    /// calling in; this method is the data-model effect, placing it in the lowest
    /// free slot.
    pub fn open(&self, proc: &Arc<Process>, path: &str, vnode: Arc<dyn Vnode>, flags: OpenFlags) -> Result<usize, SysError> {
        proc.fd_table.fd_create(path, vnode, flags)
    }

    pub fn close(&self, proc: &Arc<Process>, fd: usize) -> Result<(), SysError> {
        proc.fd_table.fd_destroy(fd)
    }

    pub fn read(&self, proc: &Arc<Process>, fd: usize, buf: &mut [u8]) -> Result<usize, SysError> {
        proc.fd_table.read(fd, buf)
    }

    pub fn write(&self, proc: &Arc<Process>, fd: usize, buf: &[u8]) -> Result<usize, SysError> {
        proc.fd_table.write(fd, buf)
    }

    pub fn lseek(&self, proc: &Arc<Process>, fd: usize, offset: i64, whence: Whence) -> Result<u64, SysError> {
        proc.fd_table.lseek(fd, offset, whence)
    }

    pub fn dup2(&self, proc: &Arc<Process>, old: usize, new: usize) -> Result<usize, SysError> {
        proc.fd_table.dup2(old, new)
    }

    /// `chdir(path)`: as with `open`, path resolution happens outside this core;
    /// the caller supplies the already-resolved directory vnode.
    pub fn chdir(&self, proc: &Arc<Process>, vnode: Arc<dyn Vnode>) {
        *proc.cwd.lock() = vnode;
    }

    /// `__getcwd`: returns the current working directory's name. Full path
    /// reconstruction from a vnode is the VFS's job (out of scope per spec §1); this
    /// is the data-model effect a hosted test can observe.
    pub fn getcwd(&self, proc: &Arc<Process>) -> String {
        proc.cwd().name().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fork_waitpid_round_trip() {
        // Scenario 2 from spec §8.
        let kernel = Kernel::bootstrap(256);
        let init = kernel.create_run_program("init", None).unwrap();

        let child_pid = kernel.fork(&init).unwrap();
        assert_ne!(child_pid, init.pid);

        let child = kernel.process(child_pid).unwrap();
        kernel.exit(&child, 7);

        let (pid, status) = kernel.waitpid(&init, child_pid, 0).unwrap();
        assert_eq!(pid, child_pid);
        assert_eq!(status, mkwait_exit(7));

        let err = kernel.waitpid(&init, child_pid, 0).unwrap_err();
        assert!(matches!(err, SysError::NoChild | SysError::NoSuchProcess));
    }

    #[test]
    fn waitpid_on_already_zombie_child_returns_immediately() {
        let kernel = Kernel::bootstrap(256);
        let init = kernel.create_run_program("init", None).unwrap();
        let child_pid = kernel.fork(&init).unwrap();
        let child = kernel.process(child_pid).unwrap();
        kernel.exit(&child, 3);

        // child already a zombie before waitpid is even called
        let (pid, status) = kernel.waitpid(&init, child_pid, 0).unwrap();
        assert_eq!(pid, child_pid);
        assert_eq!(status, mkwait_exit(3));
    }

    #[test]
    fn child_index_invariant_holds_after_removal() {
        let kernel = Kernel::bootstrap(256);
        let init = kernel.create_run_program("init", None).unwrap();

        let p1 = kernel.fork(&init).unwrap();
        let p2 = kernel.fork(&init).unwrap();
        let _p3 = kernel.fork(&init).unwrap();

        kernel.exit(&kernel.process(p1).unwrap(), 0);
        kernel.waitpid(&init, p1, 0).unwrap();

        let children = init.children.lock().unwrap();
        for (i, c) in children.iter().enumerate() {
            assert_eq!(c.index, i);
        }
        assert!(children.iter().any(|c| c.pid == p2));
    }

    #[test]
    fn fork_rejects_when_pid_table_exhausted() {
        let kernel = Kernel::bootstrap(256);
        let init = kernel.create_run_program("init", None).unwrap();
        let mut last_err = None;
        for _ in 0..200 {
            match kernel.fork(&init) {
                Ok(_) => {}
                Err(e) => {
                    last_err = Some(e);
                    break;
                }
            }
        }
        assert_eq!(last_err, Some(SysError::ProcLimit));
    }

    #[test]
    fn sbrk_zero_returns_current_break_unmutated() {
        let kernel = Kernel::bootstrap(16);
        let init = kernel.create_run_program("init", None).unwrap();
        let before = init.address_space.heap_end();
        let ret = kernel.sbrk(&init, 0).unwrap();
        assert_eq!(ret, before);
        assert_eq!(init.address_space.heap_end(), before);
    }

    #[test]
    fn sbrk_rejects_unaligned_amount() {
        let kernel = Kernel::bootstrap(16);
        let init = kernel.create_run_program("init", None).unwrap();
        assert_eq!(kernel.sbrk(&init, 1), Err(SysError::Invalid));
    }

    #[test]
    fn open_write_read_round_trip_through_kernel() {
        let kernel = Kernel::bootstrap(256);
        let init = kernel.create_run_program("init", None).unwrap();

        let vnode = crate::vfs::MemVnode::new("greeting");
        let fd = kernel.open(&init, "greeting", vnode, OpenFlags::RDWR).unwrap();
        assert_eq!(kernel.write(&init, fd, b"hi\n").unwrap(), 3);
        kernel.lseek(&init, fd, 0, Whence::Set).unwrap();

        let mut buf = [0u8; 3];
        assert_eq!(kernel.read(&init, fd, &mut buf).unwrap(), 3);
        assert_eq!(&buf, b"hi\n");
        kernel.close(&init, fd).unwrap();
    }

    #[test]
    fn chdir_updates_getcwd() {
        let kernel = Kernel::bootstrap(256);
        let init = kernel.create_run_program("init", None).unwrap();
        assert_eq!(kernel.getcwd(&init), "con:");

        let dir = crate::vfs::MemVnode::new("home");
        kernel.chdir(&init, dir);
        assert_eq!(kernel.getcwd(&init), "home");
    }

    #[test]
    fn orphan_child_is_destroyed_immediately() {
        let kernel = Kernel::bootstrap(256);
        let init = kernel.create_run_program("init", None).unwrap();
        let child_pid = kernel.fork(&init).unwrap();

        // parent exits first without waiting
        kernel.exit(&init, 0);
        let child = kernel.process(child_pid).unwrap();
        kernel.exit(&child, 0);

        // the child destroyed itself rather than waiting to be reaped
        assert!(kernel.process(child_pid).is_none());
    }
}
