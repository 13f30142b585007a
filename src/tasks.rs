use std::future::Future;

use tokio::task::JoinHandle;

/// Schedules `future` without tying it to the request that spawned it.
///
/// The caller never observes the outcome; failures are only logged.
pub fn detach<F>(task: &'static str, future: F) -> JoinHandle<()>
where
    F: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        match future.await {
            Ok(()) => tracing::debug!(task, "detached task finished"),
            Err(err) => tracing::warn!(task, error = %format!("{err:#}"), "detached task failed"),
        }
    })
}
