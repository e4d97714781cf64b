//! Single-worker execution lane and the completion handle it resolves.
//!
//! Every `Indexer` and `Searcher` owns one lane: a dedicated thread draining an
//! unbounded channel of jobs in submission order. A job never overlaps another
//! job of the same lane. Completions are always resolved on the lane thread,
//! after the job's storage work has finished.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, bounded, unbounded};
use tracing::{debug, error};

use crate::error::{Result, SearchKitError};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Handle to the eventual result of a queued operation.
///
/// Resolved exactly once. Dropping it does not cancel the operation.
#[must_use = "the operation runs regardless; wait on the completion to observe its result"]
pub struct Completion<T> {
    rx: Receiver<Result<T>>,
}

impl<T> std::fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion")
            .field("ready", &!self.rx.is_empty())
            .finish()
    }
}

impl<T> Completion<T> {
    /// A completion that is already resolved.
    pub fn ready(value: Result<T>) -> Self {
        let (tx, rx) = bounded(1);
        let _ = tx.send(value);
        Self { rx }
    }

    /// Block until the operation finishes.
    pub fn wait(self) -> Result<T> {
        self.rx.recv().unwrap_or(Err(SearchKitError::LaneClosed))
    }

    /// Block for at most `timeout`. `Ok(None)` means still running.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<Option<T>> {
        match self.rx.recv_timeout(timeout) {
            Ok(res) => res.map(Some),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(SearchKitError::LaneClosed),
        }
    }

    /// Non-blocking poll. `Ok(None)` means still running.
    pub fn try_wait(&self) -> Result<Option<T>> {
        match self.rx.try_recv() {
            Ok(res) => res.map(Some),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(SearchKitError::LaneClosed),
        }
    }
}

/// Serialized job queue backed by one named thread.
pub struct SerialLane {
    name: String,
    tx: Option<Sender<Job>>,
    handle: Option<JoinHandle<()>>,
    thread_id: ThreadId,
}

impl std::fmt::Debug for SerialLane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialLane")
            .field("name", &self.name)
            .field("pending", &self.pending())
            .finish()
    }
}

impl SerialLane {
    pub fn spawn(name: impl Into<String>) -> std::io::Result<Self> {
        let name = name.into();
        let (tx, rx) = unbounded::<Job>();
        let thread_name = name.clone();
        let handle = thread::Builder::new().name(name.clone()).spawn(move || {
            debug!(lane = %thread_name, "lane started");
            for job in rx {
                job();
            }
            debug!(lane = %thread_name, "lane stopped");
        })?;
        let thread_id = handle.thread().id();

        Ok(Self {
            name,
            tx: Some(tx),
            handle: Some(handle),
            thread_id,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Jobs queued but not yet started.
    pub fn pending(&self) -> usize {
        self.tx.as_ref().map_or(0, Sender::len)
    }

    /// Queue `job`; its result resolves the returned completion.
    pub fn submit<T, F>(&self, job: F) -> Completion<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let (done_tx, done_rx) = bounded(1);
        let lane = self.name.clone();
        let wrapped: Job = Box::new(move || {
            // A panicking job resolves its own completion; the lane keeps running.
            let result = catch_unwind(AssertUnwindSafe(job)).unwrap_or_else(|_| {
                error!(lane = %lane, "lane job panicked");
                Err(SearchKitError::JobPanicked { lane })
            });
            let _ = done_tx.send(result);
        });
        match &self.tx {
            Some(tx) if tx.send(wrapped).is_ok() => Completion { rx: done_rx },
            _ => Completion::ready(Err(SearchKitError::LaneClosed)),
        }
    }

    /// Block until every job queued so far has run.
    pub fn drain(&self) -> Result<()> {
        if thread::current().id() == self.thread_id {
            return Ok(());
        }
        self.submit(|| Ok(())).wait()
    }
}

impl Drop for SerialLane {
    fn drop(&mut self) {
        // Closing the channel lets the worker finish queued jobs and exit.
        self.tx.take();
        if let Some(handle) = self.handle.take()
            && thread::current().id() != self.thread_id
        {
            let _ = handle.join();
        }
    }
}
