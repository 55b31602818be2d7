//! Scenario 5 from spec §8: the airballoon rope puzzle as a concurrency smoke test.
//! Two severer threads cut ropes from the hook side; eight swapper threads
//! ("flowerkiller") swap which rope each stake anchors, always acquiring the lower
//! stake index's lock first to avoid the classic two-stake deadlock; a balloon
//! thread waits for the last rope to fall and is the only thread allowed to signal
//! the orchestrator's exit condition.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use corevm::synch::{CondVar, Lock};

const NROPES: usize = 16;
const N_SWAPPERS: usize = 8;
const SWAPS_PER_THREAD: usize = 30;

struct Rope {
    lock: Lock,
    cut: Mutex<bool>,
}

struct Stake {
    lock: Lock,
    rope: Mutex<usize>,
}

#[test]
fn airballoon_ropes_all_cut_without_deadlock() {
    let _ = env_logger::try_init();

    let ropes: Vec<Arc<Rope>> = (0..NROPES)
        .map(|_| Arc::new(Rope { lock: Lock::new("rope-lock"), cut: Mutex::new(false) }))
        .collect();
    let stakes: Vec<Arc<Stake>> = (0..NROPES)
        .map(|i| Arc::new(Stake { lock: Lock::new("stake-lock"), rope: Mutex::new(i) }))
        .collect();
    let ropes_left = Arc::new(AtomicUsize::new(NROPES));

    let done_lock = Arc::new(Lock::new("airballoon-done-lock"));
    let done_cv = Arc::new(CondVar::new("airballoon-done-cv"));
    let signaled = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();

    // Two severer threads (Dandelion/Marigold), splitting ropes by parity.
    for severer in 0..2 {
        let ropes = ropes.clone();
        let ropes_left = ropes_left.clone();
        handles.push(thread::spawn(move || {
            for i in (severer..NROPES).step_by(2) {
                let rope = &ropes[i];
                rope.lock.acquire();
                let mut cut = rope.cut.lock().unwrap();
                if !*cut {
                    *cut = true;
                    ropes_left.fetch_sub(1, Ordering::SeqCst);
                }
                drop(cut);
                rope.lock.release();
            }
        }));
    }

    // Eight swapper threads (Lord FlowerKiller), always locking ascending stake
    // index first so two swappers racing over the same pair can't deadlock.
    for t in 0..N_SWAPPERS {
        let stakes = stakes.clone();
        handles.push(thread::spawn(move || {
            for step in 0..SWAPS_PER_THREAD {
                let a = (t * 3 + step) % NROPES;
                let b = (t * 5 + step * 7 + 1) % NROPES;
                if a == b {
                    continue;
                }
                let (lo, hi) = if a < b { (a, b) } else { (b, a) };
                stakes[lo].lock.acquire();
                stakes[hi].lock.acquire();

                let mut r_lo = stakes[lo].rope.lock().unwrap();
                let mut r_hi = stakes[hi].rope.lock().unwrap();
                std::mem::swap(&mut *r_lo, &mut *r_hi);
                drop(r_lo);
                drop(r_hi);

                stakes[hi].lock.release();
                stakes[lo].lock.release();
            }
        }));
    }

    // Balloon thread: the only thread permitted to signal the orchestrator.
    {
        let ropes_left = ropes_left.clone();
        let done_lock = done_lock.clone();
        let done_cv = done_cv.clone();
        let signaled = signaled.clone();
        handles.push(thread::spawn(move || {
            while ropes_left.load(Ordering::SeqCst) != 0 {
                thread::yield_now();
            }
            done_lock.acquire();
            signaled.store(1, Ordering::SeqCst);
            done_cv.broadcast(&done_lock);
            done_lock.release();
        }));
    }

    done_lock.acquire();
    while signaled.load(Ordering::SeqCst) == 0 {
        done_cv.wait(&done_lock);
    }
    done_lock.release();

    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(ropes_left.load(Ordering::SeqCst), 0, "all ropes must be cut");
    for rope in &ropes {
        assert!(*rope.cut.lock().unwrap());
    }

    // Every rope still anchors exactly one stake; swapping never drops or
    // duplicates an assignment.
    let mut seen = vec![false; NROPES];
    for stake in &stakes {
        let r = *stake.rope.lock().unwrap();
        assert!(!seen[r], "rope {r} assigned to more than one stake");
        seen[r] = true;
    }
    assert!(seen.iter().all(|&s| s), "every rope must still anchor some stake");
}
