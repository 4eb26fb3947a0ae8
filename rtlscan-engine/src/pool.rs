//! Fixed pool of estimation workers.
//!
//! Jobs queue without bound on a flume channel so the sweep thread never
//! waits on estimation. Dropping the pool closes the queue, lets queued jobs
//! finish and joins every worker.

use flume::{Receiver, Sender};
use log::{debug, error, info};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use crate::lock;

/// Default number of estimation threads.
pub const DEFAULT_WORKERS: usize = 4;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Jobs submitted but not yet completed.
#[derive(Default)]
struct Pending {
    count: Mutex<usize>,
    idle: Condvar,
}

impl Pending {
    fn add(&self) {
        *lock(&self.count) += 1;
    }

    fn done(&self) {
        let mut count = lock(&self.count);
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.idle.notify_all();
        }
    }
}

pub struct WorkerPool {
    job_tx: Option<Sender<Job>>,
    pending: Arc<Pending>,
    threads: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.threads.len())
            .field("pending", &self.pending())
            .finish()
    }
}

impl WorkerPool {
    /// Start `workers` threads (at least one).
    pub fn new(workers: usize) -> std::io::Result<Self> {
        let (job_tx, job_rx) = flume::unbounded::<Job>();
        let pending = Arc::new(Pending::default());

        let mut threads = Vec::new();
        for worker_id in 0..workers.max(1) {
            let job_rx = job_rx.clone();
            let pending = Arc::clone(&pending);
            let handle = thread::Builder::new()
                .name(format!("estimator-{worker_id}"))
                .spawn(move || worker_loop(worker_id, job_rx, pending))?;
            threads.push(handle);
        }

        info!("Worker pool started with {} threads", threads.len());
        Ok(Self {
            job_tx: Some(job_tx),
            pending,
            threads,
        })
    }

    pub fn workers(&self) -> usize {
        self.threads.len()
    }

    /// Queue a job. Returns `false` if the pool is shutting down.
    pub fn execute<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let Some(job_tx) = &self.job_tx else {
            return false;
        };
        self.pending.add();
        if job_tx.send(Box::new(job)).is_err() {
            self.pending.done();
            return false;
        }
        true
    }

    /// Jobs queued or running.
    pub fn pending(&self) -> usize {
        *lock(&self.pending.count)
    }

    /// Block until every submitted job has completed.
    pub fn wait_idle(&self) {
        let mut count = lock(&self.pending.count);
        while *count > 0 {
            count = self
                .pending
                .idle
                .wait(count)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Closing the queue ends each worker once it is empty
        self.job_tx.take();
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                error!("Estimator thread panicked");
            }
        }
        debug!("Worker pool stopped");
    }
}

fn worker_loop(worker_id: usize, job_rx: Receiver<Job>, pending: Arc<Pending>) {
    debug!("Estimator {worker_id} started");
    while let Ok(job) = job_rx.recv() {
        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
            error!("Estimation job panicked on worker {worker_id}");
        }
        pending.done();
    }
    debug!("Estimator {worker_id} exiting");
}
