//! Blocking synchronization objects (component B): semaphore, owner-tracking lock,
//! condition variable. Each is a thin protocol layered on a [`SpinLock`] plus a
//! [`WaitChannel`], mirroring `kern/thread/synch.c`.

use std::thread::{self, ThreadId};

use crate::spinlock::SpinLock;
use crate::wchan::WaitChannel;

/// A counting semaphore. `P` blocks while the count is zero; `V` increments and wakes
/// one waiter. Per spec §4.B, calling `P` from interrupt context is a contract
/// violation; there is no interrupt context in this hosted build so it is unchecked.
pub struct Semaphore {
    name: &'static str,
    count: SpinLock<usize>,
    wchan: WaitChannel,
}

impl Semaphore {
    pub const fn new(name: &'static str, initial: usize) -> Self {
        Self {
            name,
            count: SpinLock::new(initial, name),
            wchan: WaitChannel::new(name),
        }
    }

    pub fn p(&self) {
        let mut guard = self.count.lock();
        while *guard == 0 {
            self.wchan.sleep(guard);
            guard = self.count.lock();
        }
        *guard -= 1;
    }

    pub fn v(&self) {
        let mut guard = self.count.lock();
        *guard += 1;
        drop(guard);
        self.wchan.wake_one();
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// A mutual-exclusion lock with owner tracking. Unlike a [`SpinLock`] this may be
/// held across a sleep and is acquired from non-interrupt context only.
pub struct Lock {
    name: &'static str,
    inner: SpinLock<LockState>,
    wchan: WaitChannel,
}

struct LockState {
    held: bool,
    owner: Option<ThreadId>,
}

impl Lock {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            inner: SpinLock::new(LockState { held: false, owner: None }, name),
            wchan: WaitChannel::new(name),
        }
    }

    pub fn acquire(&self) {
        let mut guard = self.inner.lock();
        while guard.held {
            self.wchan.sleep(guard);
            guard = self.inner.lock();
        }
        guard.held = true;
        guard.owner = Some(thread::current().id());
    }

    pub fn release(&self) {
        let mut guard = self.inner.lock();
        assert!(
            guard.held && guard.owner == Some(thread::current().id()),
            "release {}: not held by caller",
            self.name
        );
        guard.held = false;
        guard.owner = None;
        drop(guard);
        self.wchan.wake_one();
    }

    pub fn holds_me(&self) -> bool {
        let guard = self.inner.lock();
        guard.held && guard.owner == Some(thread::current().id())
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// A condition variable. Always used together with an external [`Lock`] passed in at
/// each call; the CV itself holds no state of its own beyond the wait channel.
pub struct CondVar {
    name: &'static str,
    wchan: WaitChannel,
}

impl CondVar {
    pub const fn new(name: &'static str) -> Self {
        Self { name, wchan: WaitChannel::new(name) }
    }

    /// Atomically releases `lock` and parks; reacquires `lock` before returning.
    /// The wakeup generation is sampled while `lock` is still held, so a signaler
    /// (which must also hold `lock` to mutate the predicate and signal, per the
    /// usual protocol) cannot broadcast between the sample and the release — the
    /// sample is therefore never stale before it has a chance to matter.
    pub fn wait(&self, lock: &Lock) {
        let seen = self.wchan.generation();
        lock.release();
        self.wchan.sleep_since(seen);
        lock.acquire();
    }

    pub fn signal(&self, _lock: &Lock) {
        self.wchan.wake_one();
    }

    pub fn broadcast(&self, _lock: &Lock) {
        self.wchan.wake_all();
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}
