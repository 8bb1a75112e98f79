//! Fixed-size worker pool with a single completion channel
//!
//! Jobs run on a dedicated rayon pool and report back through an unbounded
//! tokio channel drained by the owning thread. Every spawned job sends
//! exactly one message, even when it panics, so `in_flight` stays exact and
//! blocking drains always terminate.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use rayon::{ThreadPool, ThreadPoolBuilder};
use tokio::sync::mpsc;

use crate::core::{Error, Result};

/// Bounded pool of worker threads producing messages of type `T`
pub struct WorkerPool<T> {
    name: String,
    pool: ThreadPool,
    result_tx: mpsc::UnboundedSender<T>,
    result_rx: mpsc::UnboundedReceiver<T>,
    in_flight: usize,
}

impl<T: Send + 'static> WorkerPool<T> {
    /// Create a pool with `threads` worker threads named `{name}-{index}`
    pub fn new(name: &str, threads: usize) -> Result<Self> {
        if threads == 0 {
            return Err(Error::InvalidConfig(format!("{} pool needs at least one thread", name)));
        }

        let thread_prefix = name.to_string();
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(move |i| format!("{}-{}", thread_prefix, i))
            .build()
            .map_err(|e| Error::InvalidConfig(format!("failed to start {} pool: {}", name, e)))?;

        let (result_tx, result_rx) = mpsc::unbounded_channel();
        log::debug!("Started {} pool with {} threads", name, threads);

        Ok(Self {
            name: name.to_string(),
            pool,
            result_tx,
            result_rx,
            in_flight: 0,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn thread_count(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Jobs spawned whose message has not been received yet
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Run `job` on the pool. If it panics, `on_panic` turns the panic
    /// message into the job's completion message instead.
    pub fn spawn<F, P>(&mut self, job: F, on_panic: P)
    where
        F: FnOnce() -> T + Send + 'static,
        P: FnOnce(String) -> T + Send + 'static,
    {
        let result_tx = self.result_tx.clone();
        self.in_flight += 1;

        self.pool.spawn(move || {
            let message = match panic::catch_unwind(AssertUnwindSafe(job)) {
                Ok(message) => message,
                Err(payload) => on_panic(panic_message(payload.as_ref())),
            };
            // Receiver gone means the pool was dropped; nothing to report to
            let _ = result_tx.send(message);
        });
    }

    /// Next completion if one is ready (non-blocking)
    pub fn try_recv(&mut self) -> Option<T> {
        let message = self.result_rx.try_recv().ok()?;
        self.in_flight -= 1;
        Some(message)
    }

    /// Wait for the next completion; `None` when nothing is in flight.
    ///
    /// Must not be called from inside an async runtime.
    pub fn recv_blocking(&mut self) -> Option<T> {
        if self.in_flight == 0 {
            return None;
        }
        let message = self.result_rx.blocking_recv()?;
        self.in_flight -= 1;
        Some(message)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "worker panicked".to_string()
    }
}
