//! Non-blocking spinlock (component A, floor primitive).
//!
//! A spinlock is acquired with interrupts disabled on the local CPU; while held, no
//! operation may sleep. On real hardware `push_off`/`pop_off` nest around the actual
//! interrupt-enable flag; here the interrupt controller is an external collaborator
//! (out of scope, see spec §1), so disabling is modeled with a thread-local nesting
//! counter that only exists to make `holding()` assertions meaningful under test.

use std::cell::Cell;
use std::hint;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;

thread_local! {
    static INTERRUPT_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Disables (simulated) interrupts on the calling thread; nests like `push_off`/`pop_off`.
fn push_off() {
    INTERRUPT_DEPTH.with(|d| d.set(d.get() + 1));
}

fn pop_off() {
    INTERRUPT_DEPTH.with(|d| {
        let v = d.get();
        assert!(v >= 1, "pop_off: not holding any spinlock");
        d.set(v - 1);
    });
}

/// A spinlock guarding a value of type `T`.
///
/// Locked when `owner` holds a thread id other than 0. The thread id space used here is
/// the `std::thread::ThreadId` debug form hashed into a `usize`; real kernels store the
/// scheduler's thread pointer instead.
#[derive(Debug)]
pub struct SpinLock<T> {
    name: &'static str,
    locked: AtomicBool,
    owner: AtomicUsize,
    data: std::cell::UnsafeCell<T>,
}

unsafe impl<T: Send> Sync for SpinLock<T> {}

pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

impl<T> SpinLock<T> {
    pub const fn new(value: T, name: &'static str) -> Self {
        Self {
            name,
            locked: AtomicBool::new(false),
            owner: AtomicUsize::new(0),
            data: std::cell::UnsafeCell::new(value),
        }
    }

    fn current_id() -> usize {
        // ThreadId has no stable numeric representation; hash its Debug form.
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        thread::current().id().hash(&mut hasher);
        let h = hasher.finish() as usize;
        if h == 0 { 1 } else { h }
    }

    fn holding(&self) -> bool {
        self.locked.load(Ordering::Relaxed) && self.owner.load(Ordering::Relaxed) == Self::current_id()
    }

    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        push_off();

        assert!(!self.holding(), "acquire {}: already held by this thread", self.name);

        loop {
            if self
                .locked
                .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                self.owner.store(Self::current_id(), Ordering::Relaxed);
                break;
            }
            hint::spin_loop();
        }

        SpinLockGuard { lock: self }
    }

    /// Attempts to acquire without spinning; returns `None` if already held.
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        push_off();
        if self
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            self.owner.store(Self::current_id(), Ordering::Relaxed);
            Some(SpinLockGuard { lock: self })
        } else {
            pop_off();
            None
        }
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        assert!(self.lock.holding(), "release {}: not held", self.lock.name);
        self.lock.owner.store(0, Ordering::Relaxed);
        self.lock.locked.store(false, Ordering::Release);
        pop_off();
    }
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}
