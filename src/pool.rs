//! Fixed-size worker pool.
//!
//! Every submitted job holds its worker until it returns. Detection tasks
//! only return once cancelled, so a pool with N workers services at most N
//! tasks at a time; the rest wait in the job queue.

use anyhow::{anyhow, Result};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::error::WatchError;

type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct WorkerPool {
    tx: Option<Sender<Job>>,
    done_rx: Receiver<usize>,
    workers: Vec<Option<JoinHandle<()>>>,
    queued: Arc<AtomicUsize>,
    running: Arc<AtomicUsize>,
}

impl WorkerPool {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(anyhow!("worker pool capacity must be at least 1"));
        }
        let (tx, rx) = unbounded::<Job>();
        let (done_tx, done_rx) = unbounded();
        let queued = Arc::new(AtomicUsize::new(0));
        let running = Arc::new(AtomicUsize::new(0));

        let mut workers = Vec::with_capacity(capacity);
        for index in 0..capacity {
            let rx = rx.clone();
            let done_tx = done_tx.clone();
            let queued = queued.clone();
            let running = running.clone();
            let handle = std::thread::Builder::new()
                .name(format!("watch-worker-{}", index))
                .spawn(move || {
                    while let Ok(job) = rx.recv() {
                        queued.fetch_sub(1, Ordering::SeqCst);
                        running.fetch_add(1, Ordering::SeqCst);
                        if catch_unwind(AssertUnwindSafe(job)).is_err() {
                            log::error!("watch-worker-{}: job panicked; worker continues", index);
                        }
                        running.fetch_sub(1, Ordering::SeqCst);
                    }
                    let _ = done_tx.send(index);
                })
                .map_err(|e| anyhow!("failed to spawn worker thread: {}", e))?;
            workers.push(Some(handle));
        }

        Ok(Self {
            tx: Some(tx),
            done_rx,
            workers,
            queued,
            running,
        })
    }

    /// Queue `job`. It starts as soon as a worker is free.
    pub fn submit<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| anyhow!("worker pool is shut down"))?;
        self.queued.fetch_add(1, Ordering::SeqCst);
        if tx.send(Box::new(job)).is_err() {
            self.queued.fetch_sub(1, Ordering::SeqCst);
            return Err(anyhow!("worker pool is shut down"));
        }
        Ok(())
    }

    pub fn capacity(&self) -> usize {
        self.workers.len()
    }

    /// Jobs currently executing.
    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Jobs submitted but not yet picked up by a worker.
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    /// Close the job queue and wait up to `timeout` for every worker to exit.
    ///
    /// Jobs still queued are handed to workers and expected to return quickly
    /// (detection tasks see the cancelled token at their loop head). Workers
    /// still busy at the deadline are detached and reported.
    pub fn shutdown(&mut self, timeout: Duration) -> Result<()> {
        self.tx = None;
        let deadline = Instant::now() + timeout;

        while self.workers.iter().any(Option::is_some) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.done_rx.recv_timeout(remaining) {
                Ok(index) => {
                    if let Some(handle) = self.workers.get_mut(index).and_then(Option::take) {
                        let _ = handle.join();
                    }
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        let stragglers = self.workers.iter().filter(|w| w.is_some()).count();
        // Detach what is left; the threads exit on their own once their job returns.
        self.workers.iter_mut().for_each(|w| drop(w.take()));
        if stragglers > 0 {
            log::warn!("worker pool shutdown: {} worker(s) still busy", stragglers);
            return Err(WatchError::PoolShutdownTimeout { stragglers }.into());
        }
        Ok(())
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.tx = None;
    }
}
