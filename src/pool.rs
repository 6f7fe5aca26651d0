//! Bounded pool of blocking workers.
//!
//! Registrations and overlap estimations are CPU-bound, so each job runs on
//! tokio's blocking thread pool. A semaphore caps how many run at once and
//! results are returned in job order regardless of completion order.
//!
//! A blocking thread cannot be cancelled, so a job that times out keeps its
//! permit until its thread actually returns.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Outcome of one pooled job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome<T> {
    Done(T),
    /// The job did not finish within the time limit
    TimedOut(Duration),
    /// The job panicked or was cancelled
    Failed(String),
}

/// Run `jobs` on at most `workers` blocking threads at a time.
///
/// With a `timeout`, a job that has not finished in time is reported as
/// [`JobOutcome::TimedOut`] and its result, if any, is discarded. Its
/// thread still counts against `workers` until it returns.
pub async fn run_blocking<T, F>(
    workers: usize,
    jobs: Vec<F>,
    timeout: Option<Duration>,
) -> Vec<JobOutcome<T>>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let count = jobs.len();
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let mut set = JoinSet::new();

    debug!("Running {} jobs on {} workers", count, workers.max(1));

    for (index, job) in jobs.into_iter().enumerate() {
        let semaphore = Arc::clone(&semaphore);
        set.spawn(async move {
            let permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => return (index, JobOutcome::Failed(e.to_string())),
            };

            let handle = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                job()
            });
            let outcome = match timeout {
                Some(limit) => match tokio::time::timeout(limit, handle).await {
                    Ok(Ok(value)) => JobOutcome::Done(value),
                    Ok(Err(e)) => JobOutcome::Failed(e.to_string()),
                    Err(_) => JobOutcome::TimedOut(limit),
                },
                None => match handle.await {
                    Ok(value) => JobOutcome::Done(value),
                    Err(e) => JobOutcome::Failed(e.to_string()),
                },
            };
            (index, outcome)
        });
    }

    let mut outcomes: Vec<Option<JobOutcome<T>>> = (0..count).map(|_| None).collect();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((index, outcome)) => outcomes[index] = Some(outcome),
            Err(e) => warn!("Worker task failed: {}", e),
        }
    }

    outcomes
        .into_iter()
        .map(|o| o.unwrap_or_else(|| JobOutcome::Failed("worker task cancelled".to_string())))
        .collect()
}
