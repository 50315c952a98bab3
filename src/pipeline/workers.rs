//! Channel fan-out
//!
//! ```text
//!   channels ──► semaphore (max permits) ──► spawn_blocking(work) ──► outcomes
//! ```
//!
//! Each channel is an independent unit of work. A failure (or a panic) in
//! one channel is reported in its outcome and never stops the others.

use crate::error::{EngineError, EngineResult};
use crate::pipeline::Channel;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Worker count when none is configured
pub fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Result of one channel's work
#[derive(Debug)]
pub struct WorkerOutcome<T> {
    pub channel: Channel,
    pub result: EngineResult<T>,
}

impl<T> WorkerOutcome<T> {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Run `work` once per channel with at most `max_workers` running at a time.
///
/// Outcomes are returned in the order of `channels`.
pub async fn run_workers<T, F>(
    channels: Vec<Channel>,
    max_workers: usize,
    work: F,
) -> Vec<WorkerOutcome<T>>
where
    T: Send + 'static,
    F: Fn(Channel) -> EngineResult<T> + Send + Sync + 'static,
{
    let permits = Arc::new(Semaphore::new(max_workers.max(1)));
    let work = Arc::new(work);
    let mut handles = Vec::with_capacity(channels.len());

    for channel in channels {
        let permits = permits.clone();
        let work = work.clone();
        let job = channel.clone();
        let handle = tokio::spawn(async move {
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|e| EngineError::Worker(e.to_string()))?;
            let span = tracing::info_span!("channel", channel = %job);
            tokio::task::spawn_blocking(move || {
                let _entered = span.enter();
                tracing::info!("Worker started");
                let result = work(job);
                match &result {
                    Ok(_) => tracing::info!("Worker finished"),
                    Err(e) => tracing::error!("Worker failed: {}", e),
                }
                result
            })
            .await
            .map_err(|e| EngineError::Worker(e.to_string()))?
        });
        handles.push((channel, handle));
    }

    let mut outcomes = Vec::with_capacity(handles.len());
    for (channel, handle) in handles {
        let result = match handle.await {
            Ok(result) => result,
            Err(e) => Err(EngineError::Worker(e.to_string())),
        };
        outcomes.push(WorkerOutcome { channel, result });
    }
    outcomes
}
