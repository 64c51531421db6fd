//! Fixed-size worker pool with atomic-counter work distribution.
//!
//! `n_threads - 1` OS threads are spawned once, at construction, and parked
//! between dispatches; the thread that calls [`WorkerPool::dispatch`] always
//! participates as worker `0`. A dispatch is one *parallel region*: every
//! worker runs the same task closure, and the region ends only once all
//! workers have returned from it. Regions never nest — `dispatch` blocks
//! the caller until the region is done.
//!
//! Node-to-worker assignment is not decided up front. The task closure
//! itself claims grid indices from a shared [`std::sync::atomic::AtomicUsize`]
//! (see `assembler`/`performance`), so workers that land on cheap nodes
//! (e.g. adjacent to a duplicated event) simply claim more of them. Each
//! worker also claims its own identity via [`WorkerPool::claim_worker_id`]
//! at the start of a dispatch, to index into per-worker output slots.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

enum Job {
    Idle,
    Run(Arc<dyn Fn() + Send + Sync>),
    Shutdown,
}

struct PoolState {
    generation: u64,
    job: Job,
    remaining: usize,
}

struct Shared {
    state: Mutex<PoolState>,
    start: Condvar,
    done: Condvar,
    /// First panic payload caught from a helper thread's task this
    /// generation, re-raised by `dispatch` after every worker has reported
    /// back.
    panicked: Mutex<Option<Box<dyn std::any::Any + Send + 'static>>>,
}

/// A fixed pool of worker threads synchronized through a generation
/// counter: each [`dispatch`](WorkerPool::dispatch) bumps the generation,
/// wakes every parked thread, and waits for them to report back.
pub struct WorkerPool {
    n_threads: usize,
    shared: Arc<Shared>,
    handles: Vec<JoinHandle<()>>,
    next_worker_id: AtomicU64,
}

impl WorkerPool {
    /// Spawns `n_threads.saturating_sub(1)` helper threads. The calling
    /// thread itself fills worker slot 0 at every dispatch.
    pub fn new(n_threads: usize) -> Self {
        let n_threads = n_threads.max(1);
        let shared = Arc::new(Shared {
            state: Mutex::new(PoolState {
                generation: 0,
                job: Job::Idle,
                remaining: 0,
            }),
            start: Condvar::new(),
            done: Condvar::new(),
            panicked: Mutex::new(None),
        });

        let mut handles = Vec::with_capacity(n_threads - 1);
        for worker_id in 1..n_threads {
            let shared = Arc::clone(&shared);
            let handle = std::thread::Builder::new()
                .name(format!("shoot-worker-{worker_id}"))
                .spawn(move || worker_loop(shared))
                .expect("failed to spawn worker thread");
            handles.push(handle);
        }

        Self {
            n_threads,
            shared,
            handles,
            next_worker_id: AtomicU64::new(0),
        }
    }

    pub fn n_threads(&self) -> usize {
        self.n_threads
    }

    /// Atomically hands out sequential worker ids `0..n_threads`, reset at
    /// the start of every dispatch.
    pub fn claim_worker_id(&self) -> usize {
        self.next_worker_id.fetch_add(1, Ordering::Relaxed) as usize
    }

    fn reset_worker_ids(&self) {
        self.next_worker_id.store(0, Ordering::Relaxed);
    }

    /// Runs `task` on every worker (the calling thread included, as one of
    /// them) and blocks until all of them return. `task` must own everything
    /// it touches (`'static`): the helper threads are long-lived, so a
    /// borrowed closure would have to outlive this call, which the type
    /// system can't express without erasing the borrow. Callers share
    /// per-dispatch data by `Arc`-wrapping it, the same way the grounding
    /// example hands owned jobs to its worker threads.
    pub fn dispatch<F>(&self, task: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.reset_worker_ids();

        let boxed: Arc<dyn Fn() + Send + Sync> = Arc::new(task);

        let helpers = self.n_threads.saturating_sub(1);
        {
            let mut state = self.shared.state.lock().unwrap();
            state.generation = state.generation.wrapping_add(1);
            state.job = Job::Run(Arc::clone(&boxed));
            state.remaining = helpers;
        }
        // Workers are still parked on `start` until the `notify_all` below,
        // so clearing the previous generation's payload here can't race a
        // worker that has already started this generation's task.
        *self.shared.panicked.lock().unwrap() = None;
        self.shared.start.notify_all();

        // The calling thread participates too. A panic here would otherwise
        // skip the wait below and return with helpers still mid-task,
        // leaving them running a closure whose captured data the caller may
        // go on to drop; run it under `catch_unwind` and resume the panic
        // only after every worker has reported back.
        let inline_result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| boxed()));

        if helpers > 0 {
            let mut state = self.shared.state.lock().unwrap();
            while state.remaining != 0 {
                state = self.shared.done.wait(state).unwrap();
            }
        }

        let worker_panic = self.shared.panicked.lock().unwrap().take();
        match inline_result {
            Err(payload) => std::panic::resume_unwind(payload),
            Ok(()) => {
                if let Some(payload) = worker_panic {
                    std::panic::resume_unwind(payload);
                }
            }
        }
    }
}

fn worker_loop(shared: Arc<Shared>) {
    let mut seen_generation = 0u64;
    loop {
        let job = {
            let mut state = shared.state.lock().unwrap();
            while state.generation == seen_generation {
                state = shared.start.wait(state).unwrap();
            }
            seen_generation = state.generation;
            match &state.job {
                Job::Shutdown => return,
                Job::Run(f) => Arc::clone(f),
                Job::Idle => continue,
            }
        };

        // A panicking task must not take the thread down with it (it would
        // never rejoin a future generation) and must not skip the
        // `remaining` decrement below (the dispatcher would hang waiting for
        // a worker that is gone). Catch it, stash it for `dispatch` to
        // re-raise, and keep looping.
        if let Err(payload) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| job())) {
            let mut slot = shared.panicked.lock().unwrap();
            if slot.is_none() {
                *slot = Some(payload);
            }
        }

        let mut state = shared.state.lock().unwrap();
        state.remaining -= 1;
        if state.remaining == 0 {
            shared.done.notify_all();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.generation = state.generation.wrapping_add(1);
            state.job = Job::Shutdown;
        }
        self.shared.start.notify_all();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_index_claims_are_unique_and_exhaustive() {
        let pool = WorkerPool::new(4);
        let n = 37usize;
        let counter = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let claimed = Arc::new(Mutex::new(vec![false; n + 1]));

        let counter_clone = Arc::clone(&counter);
        let claimed_clone = Arc::clone(&claimed);
        pool.dispatch(move || loop {
            let i = counter_clone.fetch_add(1, Ordering::Relaxed);
            if i > n {
                break;
            }
            let mut c = claimed_clone.lock().unwrap();
            assert!(!c[i], "index {i} claimed twice");
            c[i] = true;
        });

        assert!(claimed.lock().unwrap().iter().all(|&v| v));
    }

    #[test]
    fn worker_ids_are_assigned_without_repeats_within_a_dispatch() {
        let pool = Arc::new(WorkerPool::new(4));
        let ids = Arc::new(Mutex::new(Vec::new()));
        let ids_clone = Arc::clone(&ids);
        let pool_clone = Arc::clone(&pool);
        pool.dispatch(move || {
            let id = pool_clone.claim_worker_id();
            ids_clone.lock().unwrap().push(id);
        });
        let mut collected = ids.lock().unwrap().clone();
        collected.sort_unstable();
        assert_eq!(collected, vec![0, 1, 2, 3]);
    }

    #[test]
    fn dispatch_recovers_after_a_worker_panics() {
        let pool = WorkerPool::new(4);
        let counter = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let counter_clone = Arc::clone(&counter);
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            pool.dispatch(move || {
                let id = counter_clone.fetch_add(1, Ordering::Relaxed);
                if id == 0 {
                    panic!("synthetic worker panic");
                }
            });
        }));
        assert!(outcome.is_err());

        // The pool must still be usable: every worker rejoined generation 2.
        let hit = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let hit_clone = Arc::clone(&hit);
        pool.dispatch(move || {
            hit_clone.fetch_add(1, Ordering::Relaxed);
        });
        assert_eq!(hit.load(Ordering::Relaxed), 4);
    }

    #[test]
    fn dispatch_runs_single_threaded_pool_inline() {
        let pool = WorkerPool::new(1);
        let hit = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let hit_clone = Arc::clone(&hit);
        pool.dispatch(move || {
            hit_clone.fetch_add(1, Ordering::Relaxed);
        });
        assert_eq!(hit.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn shutdown_joins_all_helper_threads() {
        let pool = WorkerPool::new(4);
        drop(pool);
    }
}
