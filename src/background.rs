//! Bounded queue for detached side effects.
//!
//! Cache writes and telemetry inserts are decoupled from the response path
//! by construction: callers submit a job and move on, a single drain task
//! runs jobs in order, and job failures flow to the drain task's error
//! handling instead of the request. A full queue drops the job with a
//! warning; these writes are allowed to be lost.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;

type Job = (
    &'static str,
    Pin<Box<dyn Future<Output = Result<(), String>> + Send>>,
);

/// Handle for submitting detached jobs.
pub struct BackgroundQueue {
    tx: mpsc::Sender<Job>,
}

impl BackgroundQueue {
    /// Create a queue holding at most `capacity` pending jobs and spawn its
    /// drain task.
    pub fn new(capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<Job>(capacity);

        tokio::spawn(async move {
            while let Some((label, job)) = rx.recv().await {
                if let Err(e) = job.await {
                    tracing::warn!(job = label, error = %e, "Background job failed");
                }
            }
        });

        Self { tx }
    }

    /// Submit a job. Never blocks: when the queue is full the job is
    /// dropped and a warning logged.
    pub fn submit<F>(&self, label: &'static str, job: F)
    where
        F: Future<Output = Result<(), String>> + Send + 'static,
    {
        if self.tx.try_send((label, Box::pin(job))).is_err() {
            tracing::warn!(job = label, "Background queue full, dropping job");
        }
    }
}
