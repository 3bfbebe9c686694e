//! Cross-thread job dispatch onto the simulation thread.
//!
//! Request threads hold a [`JobSender`]; the simulation thread owns the one
//! [`JobQueue`] and drains it between frames. Jobs run in submission order.
//! A blocking submit parks the caller on a one-shot channel until the job
//! has run and its result (or fault) is known.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use thiserror::Error;
use tracing::error;

/// Errors surfaced to the submitter of a job.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JobError {
    #[error("simulation thread is not running")]
    Unavailable,

    #[error("job failed: {0}")]
    Failed(String),

    #[error("job panicked: {0}")]
    Panicked(String),

    #[error("timed out waiting for the simulation thread")]
    Timeout,
}

type Job<M> = Box<dyn FnOnce(&mut M) + Send>;

/// Create a connected sender/queue pair.
#[must_use]
pub fn job_channel<M>() -> (JobSender<M>, JobQueue<M>) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (JobSender { tx }, JobQueue { rx })
}

/// Submitting half. Cheap to clone; one per request thread.
pub struct JobSender<M> {
    tx: Sender<Job<M>>,
}

impl<M> Clone for JobSender<M> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

impl<M: 'static> JobSender<M> {
    /// Queue a job without waiting for it.
    pub fn submit<F>(&self, job: F) -> Result<(), JobError>
    where
        F: FnOnce(&mut M) + Send + 'static,
    {
        self.tx
            .send(Box::new(job))
            .map_err(|_| JobError::Unavailable)
    }

    /// Queue a job and block until it has run on the simulation thread.
    ///
    /// With `timeout == None` the caller waits as long as it takes.
    pub fn submit_blocking<T, F>(&self, job: F, timeout: Option<Duration>) -> Result<T, JobError>
    where
        T: Send + 'static,
        F: FnOnce(&mut M) -> Result<T, JobError> + Send + 'static,
    {
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        self.submit(move |machine: &mut M| {
            let result = panic::catch_unwind(AssertUnwindSafe(|| job(machine)))
                .unwrap_or_else(|payload| Err(JobError::Panicked(panic_message(payload.as_ref()))));
            // The caller may have timed out and gone away.
            let _ = done_tx.send(result);
        })?;
        wait_for(&done_rx, timeout)
    }
}

fn wait_for<T>(rx: &Receiver<Result<T, JobError>>, timeout: Option<Duration>) -> Result<T, JobError> {
    match timeout {
        None => rx.recv().map_err(|_| JobError::Unavailable)?,
        Some(limit) => match rx.recv_timeout(limit) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(JobError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(JobError::Unavailable),
        },
    }
}

/// Consuming half, owned by the simulation thread.
pub struct JobQueue<M> {
    rx: Receiver<Job<M>>,
}

impl<M> JobQueue<M> {
    /// Run every job queued so far, in order. Returns how many ran.
    ///
    /// A panicking job is logged and skipped; later jobs still run.
    pub fn run_pending(&self, machine: &mut M) -> usize {
        let mut ran = 0;
        while let Ok(job) = self.rx.try_recv() {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| job(machine))) {
                error!(panic = %panic_message(payload.as_ref()), "simulation job panicked");
            }
            ran += 1;
        }
        ran
    }

    /// Jobs waiting to run.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
