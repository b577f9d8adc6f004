// Copyright 2025 Lodestone Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Bounded worker pool
//!
//! A [`WorkerPool`] pairs an owned rayon thread pool with a counting
//! semaphore. Callers acquire a [`Permit`] before spawning a task, which
//! bounds the number of in-flight tasks independently of the thread
//! count; the permit releases itself when dropped, so a panicking task
//! cannot leak capacity. The pool is owned by its creator, not a process
//! global, and `shutdown` wakes every waiter with an error.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::core::{Error, Result};

struct SemState {
    permits: usize,
    closed: bool,
}

struct Semaphore {
    state: Mutex<SemState>,
    cond: Condvar,
}

/// Thread pool with a bounded number of in-flight tasks
pub struct WorkerPool {
    threads: rayon::ThreadPool,
    sem: Arc<Semaphore>,
}

impl WorkerPool {
    /// Create a pool with `threads` worker threads and `permits`
    /// concurrent task slots
    pub fn new(threads: usize, permits: usize) -> Result<Self> {
        if threads == 0 || permits == 0 {
            return Err(Error::invalid_parameter(
                "worker pool needs at least one thread and one permit",
            ));
        }
        let threads = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .map_err(|e| Error::internal(format!("cannot build thread pool: {e}")))?;
        Ok(WorkerPool {
            threads,
            sem: Arc::new(Semaphore {
                state: Mutex::new(SemState {
                    permits,
                    closed: false,
                }),
                cond: Condvar::new(),
            }),
        })
    }

    /// Block until a task slot is free. Fails once the pool is shut down,
    /// including for callers already waiting.
    pub fn acquire(&self) -> Result<Permit> {
        let mut state = self.sem.state.lock();
        loop {
            if state.closed {
                return Err(Error::PoolClosed);
            }
            if state.permits > 0 {
                state.permits -= 1;
                return Ok(Permit {
                    sem: Arc::clone(&self.sem),
                });
            }
            self.sem.cond.wait(&mut state);
        }
    }

    /// Close the pool: every current and future `acquire` fails.
    /// Idempotent; already-running tasks finish normally.
    pub fn shutdown(&self) {
        let mut state = self.sem.state.lock();
        state.closed = true;
        self.sem.cond.notify_all();
    }

    /// Run a scoped task set on the pool's threads. The driving closure
    /// runs on the calling thread, not a pool worker, so it may block in
    /// [`WorkerPool::acquire`] without occupying a thread the spawned
    /// tasks need to make progress.
    pub fn scope<'scope, OP, R>(&self, op: OP) -> R
    where
        OP: FnOnce(&rayon::Scope<'scope>) -> R,
    {
        self.threads.in_place_scope(op)
    }
}

/// One task slot, returned to the pool on drop
pub struct Permit {
    sem: Arc<Semaphore>,
}

impl std::fmt::Debug for Permit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Permit").finish_non_exhaustive()
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        let mut state = self.sem.state.lock();
        state.permits += 1;
        self.sem.cond.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_acquire_and_release() {
        let pool = WorkerPool::new(2, 2).unwrap();
        let a = pool.acquire().unwrap();
        let _b = pool.acquire().unwrap();
        drop(a);
        // The released slot is reusable.
        let _c = pool.acquire().unwrap();
    }

    #[test]
    fn test_acquire_blocks_until_release() {
        let pool = Arc::new(WorkerPool::new(1, 1).unwrap());
        let held = pool.acquire().unwrap();
        let waiter = {
            let pool = Arc::clone(&pool);
            std::thread::spawn(move || pool.acquire().map(drop))
        };
        std::thread::sleep(Duration::from_millis(50));
        assert!(!waiter.is_finished());
        drop(held);
        waiter.join().unwrap().unwrap();
    }

    #[test]
    fn test_shutdown_fails_acquire() {
        let pool = WorkerPool::new(1, 1).unwrap();
        pool.shutdown();
        assert_eq!(pool.acquire().unwrap_err(), Error::PoolClosed);
        // Idempotent.
        pool.shutdown();
        assert_eq!(pool.acquire().unwrap_err(), Error::PoolClosed);
    }

    #[test]
    fn test_shutdown_wakes_waiters() {
        let pool = Arc::new(WorkerPool::new(1, 1).unwrap());
        let _held = pool.acquire().unwrap();
        let waiter = {
            let pool = Arc::clone(&pool);
            std::thread::spawn(move || pool.acquire().map(drop))
        };
        std::thread::sleep(Duration::from_millis(50));
        pool.shutdown();
        assert_eq!(waiter.join().unwrap().unwrap_err(), Error::PoolClosed);
    }

    #[test]
    fn test_permits_bound_concurrency() {
        let pool = Arc::new(WorkerPool::new(4, 2).unwrap());
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        pool.scope(|scope| {
            for _ in 0..8 {
                let permit = pool.acquire().unwrap();
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                scope.spawn(move |_| {
                    let _permit = permit;
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(10));
                    running.fetch_sub(1, Ordering::SeqCst);
                });
            }
        });
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn test_scope_driver_waits_off_the_workers() {
        // More tasks than threads and permits: each acquire in the
        // driving closure must block until a running task finishes, so
        // the closure cannot be allowed to occupy the only worker.
        let pool = Arc::new(WorkerPool::new(1, 1).unwrap());
        let done = Arc::new(AtomicUsize::new(0));
        pool.scope(|scope| {
            for _ in 0..4 {
                let permit = pool.acquire().unwrap();
                let done = Arc::clone(&done);
                scope.spawn(move |_| {
                    let _permit = permit;
                    done.fetch_add(1, Ordering::SeqCst);
                });
            }
        });
        assert_eq!(done.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_zero_sizes_rejected() {
        assert!(WorkerPool::new(0, 1).is_err());
        assert!(WorkerPool::new(1, 0).is_err());
    }
}
