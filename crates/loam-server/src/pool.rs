//! Fixed-size worker pool that runs chunk generation jobs.
//!
//! Jobs are queued on an unbounded channel so that a job finishing a
//! generation phase can always submit the next one without blocking.

use std::io;
use std::panic::AssertUnwindSafe;
use std::thread::JoinHandle;

use crossbeam_channel::{Sender, unbounded};
use loam_voxel::{Executor, Job};

/// Threads pulling [`Job`]s from a shared queue.
pub struct WorkerPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `threads` workers (at least one).
    pub fn new(threads: usize) -> io::Result<Self> {
        let (sender, receiver) = unbounded::<Job>();
        let mut workers = Vec::with_capacity(threads.max(1));

        for index in 0..threads.max(1) {
            let receiver = receiver.clone();
            let handle = std::thread::Builder::new()
                .name(format!("chunk-gen-{index}"))
                .spawn(move || {
                    while let Ok(job) = receiver.recv() {
                        if std::panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                            tracing::error!("chunk generation job panicked");
                        }
                    }
                })?;
            workers.push(handle);
        }

        tracing::debug!(threads = workers.len(), "started chunk generation pool");
        Ok(Self {
            sender: Some(sender),
            workers,
        })
    }

    /// Number of worker threads.
    pub fn threads(&self) -> usize {
        self.workers.len()
    }
}

impl Executor for WorkerPool {
    fn execute(&self, job: Job) {
        let Some(sender) = &self.sender else {
            job();
            return;
        };
        if let Err(err) = sender.send(job) {
            tracing::warn!("generation pool is shut down; running job inline");
            (err.into_inner())();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Closing the queue lets every worker finish what is queued and exit.
        self.sender.take();
        let current = std::thread::current().id();
        for handle in self.workers.drain(..) {
            if handle.thread().id() != current {
                let _ = handle.join();
            }
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("threads", &self.workers.len())
            .finish()
    }
}
