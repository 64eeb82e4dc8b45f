//! Bounded worker pool with cooperative cancellation.
//!
//! [`WorkerPool::map`] runs one closure over a batch of inputs on at most `workers` threads and
//! returns the outputs in input order. Workers check the shared [`CancelToken`] before picking
//! up each task; a task that is already running always finishes.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use log::{debug, info};
use rayon::ThreadPoolBuilder;

use crate::error::{Error, Result};

/// Shared cancellation flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Returns `true` only for the call that actually set the flag.
    pub fn cancel(&self) -> bool {
        !self.flag.swap(true, Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// How tasks are isolated from each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PoolMode {
    /// A dedicated thread pool per batch; a panicking task becomes [`Error::WorkerPanic`]
    /// instead of taking the batch down.
    ///
    /// Tasks share the process: panics are caught with `catch_unwind`, but a hung task
    /// stalls its batch and an abort in native code ends the process.
    #[default]
    Isolated,
    /// Lightweight scoped threads for orchestration work that only waits on nested batches.
    Threaded,
}

/// Default worker count: one less than the number of cores, but at least two.
pub fn default_worker_count() -> usize {
    let cores = num_cpus::get();
    if cores > 2 { cores - 1 } else { 2 }
}

#[derive(Debug, Clone)]
pub struct WorkerPool {
    workers: usize,
    mode: PoolMode,
    cancel: CancelToken,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "worker panicked".to_string()
    }
}

/// State shared by the workers of one batch.
struct Batch<I, O> {
    inputs: Vec<Mutex<Option<I>>>,
    outputs: Vec<Mutex<Option<Result<O>>>>,
    cursor: AtomicUsize,
    completed: AtomicUsize,
    abort: AtomicBool,
}

impl<I, O> Batch<I, O> {
    fn new(items: Vec<I>) -> Self {
        let total = items.len();
        Self {
            inputs: items.into_iter().map(|item| Mutex::new(Some(item))).collect(),
            outputs: (0..total).map(|_| Mutex::new(None)).collect(),
            cursor: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            abort: AtomicBool::new(false),
        }
    }

    /// Pulls tasks until the batch is exhausted, cancelled or aborted by a failed task.
    fn work<F>(&self, cancel: &CancelToken, isolate: bool, task: &F)
    where
        F: Fn(I) -> Result<O>,
    {
        loop {
            if cancel.is_cancelled() || self.abort.load(Ordering::SeqCst) {
                return;
            }
            let index = self.cursor.fetch_add(1, Ordering::SeqCst);
            if index >= self.inputs.len() {
                return;
            }
            let Some(item) = lock(&self.inputs[index]).take() else {
                continue;
            };

            let outcome = if isolate {
                panic::catch_unwind(AssertUnwindSafe(|| task(item)))
                    .unwrap_or_else(|payload| Err(Error::WorkerPanic(panic_message(payload))))
            } else {
                task(item)
            };

            if outcome.is_ok() {
                self.completed.fetch_add(1, Ordering::SeqCst);
            } else {
                self.abort.store(true, Ordering::SeqCst);
            }
            *lock(&self.outputs[index]) = Some(outcome);
        }
    }

    fn finish(self, cancel: &CancelToken) -> Result<Vec<O>> {
        let total = self.inputs.len();
        if cancel.is_cancelled() {
            return Err(Error::Cancelled {
                completed: self.completed.load(Ordering::SeqCst),
                total,
            });
        }

        let mut results = Vec::with_capacity(total);
        let mut missing = 0;
        for slot in self.outputs {
            match slot.into_inner().unwrap_or_else(PoisonError::into_inner) {
                Some(Ok(output)) => results.push(output),
                Some(Err(e)) => return Err(e),
                None => missing += 1,
            }
        }
        if missing > 0 {
            return Err(Error::Other(format!("{} of {} tasks never ran", missing, total)));
        }
        Ok(results)
    }
}

impl WorkerPool {
    /// Creates a pool of `workers` threads; `0` picks [`default_worker_count`].
    pub fn new(workers: usize, mode: PoolMode, cancel: CancelToken) -> Self {
        let workers = if workers == 0 {
            default_worker_count()
        } else {
            workers
        };
        Self {
            workers,
            mode,
            cancel,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn mode(&self) -> PoolMode {
        self.mode
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Threads actually used for a batch of `total` tasks.
    pub fn effective_workers(&self, total: usize) -> usize {
        self.workers.min(total).max(1)
    }

    /// Applies `task` to every item and returns the outputs in input order.
    ///
    /// With a single effective worker the batch runs on the calling thread.
    ///
    /// # Errors
    ///
    /// * [`Error::Cancelled`] when the token was cancelled before or during the batch
    /// * the first task error in input order; once a task fails no new tasks start
    /// * [`Error::WorkerPanic`] for a panicking task in [`PoolMode::Isolated`]
    pub fn map<I, O, F>(&self, items: Vec<I>, task: F) -> Result<Vec<O>>
    where
        I: Send,
        O: Send,
        F: Fn(I) -> Result<O> + Send + Sync,
    {
        let total = items.len();
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled {
                completed: 0,
                total,
            });
        }
        if total == 0 {
            return Ok(Vec::new());
        }

        let workers = self.effective_workers(total);
        let isolate = self.mode == PoolMode::Isolated;
        let batch = Batch::new(items);
        debug!("dispatching {} tasks to {} {:?} workers", total, workers, self.mode);

        if workers == 1 {
            batch.work(&self.cancel, isolate, &task);
        } else {
            match self.mode {
                PoolMode::Isolated => {
                    let pool = ThreadPoolBuilder::new()
                        .num_threads(workers)
                        .thread_name(|i| format!("kaiso-worker-{}", i))
                        .build()?;
                    pool.scope(|scope| {
                        for _ in 0..workers {
                            scope.spawn(|_| batch.work(&self.cancel, true, &task));
                        }
                    });
                }
                PoolMode::Threaded => {
                    thread::scope(|scope| {
                        for _ in 0..workers {
                            scope.spawn(|| batch.work(&self.cancel, false, &task));
                        }
                    });
                }
            }
        }

        if self.cancel.is_cancelled() {
            info!(
                "batch cancelled after {} of {} tasks",
                batch.completed.load(Ordering::SeqCst),
                total
            );
        }
        batch.finish(&self.cancel)
    }
}
