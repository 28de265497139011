//! Background jobs with pollable status.

use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tokio::sync::watch;
use tracing::error;

/// State of a background job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobStatus<T> {
    Running,
    Done(T),
    Failed(String),
}

impl<T> JobStatus<T> {
    pub fn is_finished(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Handle to a spawned job. Dropping it does not cancel the job.
#[derive(Clone, Debug)]
pub struct JobHandle<T> {
    rx: watch::Receiver<JobStatus<T>>,
}

impl<T: Clone> JobHandle<T> {
    /// A handle for work that already finished.
    pub fn ready(value: T) -> Self {
        let (_tx, rx) = watch::channel(JobStatus::Done(value));
        Self { rx }
    }

    /// Current status without waiting.
    pub fn status(&self) -> JobStatus<T> {
        self.rx.borrow().clone()
    }

    /// Wait until the job finishes.
    pub async fn wait(mut self) -> JobStatus<T> {
        match self.rx.wait_for(JobStatus::is_finished).await {
            Ok(status) => status.clone(),
            Err(_) => JobStatus::Failed("job ended without reporting a result".to_string()),
        }
    }
}

/// Spawn `job` on the runtime.
///
/// `on_error` runs with the message of a failed or panicked job before the
/// handle observes the failure.
pub fn spawn<T, E, F, H>(name: &'static str, job: F, on_error: H) -> JobHandle<T>
where
    T: Clone + Send + Sync + 'static,
    E: std::fmt::Display + Send + 'static,
    F: Future<Output = Result<T, E>> + Send + 'static,
    H: FnOnce(&str) + Send + 'static,
{
    let (tx, rx) = watch::channel(JobStatus::Running);
    tokio::spawn(async move {
        let status = match AssertUnwindSafe(job).catch_unwind().await {
            Ok(Ok(value)) => JobStatus::Done(value),
            Ok(Err(err)) => JobStatus::Failed(err.to_string()),
            Err(_) => JobStatus::Failed(format!("{name} job panicked")),
        };
        if let JobStatus::Failed(message) = &status {
            error!(job = name, error = %message, "background job failed");
            on_error(message);
        }
        let _ = tx.send(status);
    });
    JobHandle { rx }
}
