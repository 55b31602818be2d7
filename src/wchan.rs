//! Wait channels (component A).
//!
//! A wait channel is a named parking queue. `sleep` atomically releases the caller's
//! spinlock guard and parks the calling thread; `wake_one`/`wake_all` move parked
//! threads back to runnable. On real hardware this hands off to the scheduler; hosted,
//! it is backed by a `Condvar` plus a generation counter so that a wakeup issued before
//! the sleeper finishes registering is never lost (the classic missed-wakeup hazard of
//! naive condvar use).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};

use crate::spinlock::SpinLockGuard;

#[derive(Debug)]
pub struct WaitChannel {
    name: &'static str,
    generation: AtomicU64,
    gate: Mutex<()>,
    cv: Condvar,
}

impl WaitChannel {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            generation: AtomicU64::new(0),
            gate: Mutex::new(()),
            cv: Condvar::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Current wakeup generation. Sample this while still holding whatever lock
    /// protects the predicate being waited on, then release that lock, then call
    /// [`sleep_since`](Self::sleep_since) with the sampled value — a wakeup issued
    /// between the sample and the lock release is impossible (the waker needs the
    /// same lock), and one issued after the lock is released is caught by the
    /// recheck inside `sleep_since`.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Parks the caller unless `seen` is already stale, i.e. a wakeup landed after
    /// it was sampled. Returns after re-acquiring nothing; the caller is
    /// responsible for re-acquiring whatever lock it needs and re-checking its
    /// predicate (wakeups are not FIFO and may be spurious, matching spec §5's
    /// ordering guarantees).
    pub fn sleep_since(&self, seen: u64) {
        let lock = self.gate.lock().unwrap();
        if self.generation.load(Ordering::SeqCst) != seen {
            return;
        }
        let _unused = self.cv.wait(lock).unwrap();
    }

    /// Atomically releases `guard` and parks the caller until a wakeup is observed.
    pub fn sleep<T>(&self, guard: SpinLockGuard<'_, T>) {
        let seen = self.generation();
        drop(guard);
        self.sleep_since(seen);
    }

    pub fn wake_one(&self) {
        let _gate = self.gate.lock().unwrap();
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.cv.notify_one();
    }

    pub fn wake_all(&self) {
        let _gate = self.gate.lock().unwrap();
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.cv.notify_all();
    }
}
