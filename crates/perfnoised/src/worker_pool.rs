use std::fmt::Display;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crossbeam::queue::SegQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolReport {
    pub completed: usize,
    pub failed: usize,
    /// Items never popped because the pool was cancelled.
    pub abandoned: usize,
}

/// Fixed number of OS threads draining one pre-loaded FIFO. `run` returns
/// once every worker has exited.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    name: String,
    workers: usize,
    cancelled: Arc<AtomicBool>,
}

impl WorkerPool {
    pub fn new(name: impl Into<String>, workers: usize) -> Self {
        Self {
            name: name.into(),
            workers: workers.max(1),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Flag checked before every pop; setting it stops workers after their
    /// current item.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    /// Runs `work` once per item. A failing item is logged and counted; the
    /// worker moves on to the next one.
    pub fn run<T, E, F>(&self, items: Vec<T>, work: F) -> io::Result<PoolReport>
    where
        T: Send + Display,
        E: Display,
        F: Fn(&T) -> Result<(), E> + Sync,
    {
        let queue = SegQueue::new();
        for item in items {
            queue.push(item);
        }

        let completed = AtomicUsize::new(0);
        let failed = AtomicUsize::new(0);

        std::thread::scope(|scope| -> io::Result<()> {
            let mut handles = Vec::with_capacity(self.workers);
            for index in 0..self.workers {
                let queue = &queue;
                let work = &work;
                let completed = &completed;
                let failed = &failed;
                let cancelled = &self.cancelled;
                let handle = std::thread::Builder::new()
                    .name(format!("{}-{index}", self.name))
                    .spawn_scoped(scope, move || {
                        while !cancelled.load(Ordering::Acquire) {
                            let Some(item) = queue.pop() else {
                                return;
                            };
                            match work(&item) {
                                Ok(()) => {
                                    completed.fetch_add(1, Ordering::Relaxed);
                                }
                                Err(err) => {
                                    failed.fetch_add(1, Ordering::Relaxed);
                                    tracing::warn!(
                                        worker = index,
                                        item = %item,
                                        error = %err,
                                        "work item failed"
                                    );
                                }
                            }
                        }
                    })?;
                handles.push(handle);
            }

            for handle in handles {
                if handle.join().is_err() {
                    tracing::warn!(pool = %self.name, "worker thread panicked");
                }
            }
            Ok(())
        })?;

        Ok(PoolReport {
            completed: completed.into_inner(),
            failed: failed.into_inner(),
            abandoned: queue.len(),
        })
    }
}
