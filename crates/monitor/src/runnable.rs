//! Execution backend capability
//!
//! The monitoring core only knows this trait. One concrete backend (an LLM
//! agent loop, a scripted fake in tests) is chosen when the process is
//! configured.

use async_trait::async_trait;
use runtrace_core::{Content, ExecutionRecord, Outcome};
use tracing::{error, warn};

use crate::error::Result;
use crate::monitor::ExecutionMonitor;

/// Something that can answer a query while reporting progress to a monitor
#[async_trait]
pub trait Runnable: Send + Sync {
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    /// Produce a reply. Progress (stream fragments, tool calls) is reported
    /// through `monitor`, which is already executing.
    async fn run_async(&self, query: &Content, monitor: &ExecutionMonitor)
        -> anyhow::Result<Content>;

    /// Blocking variant of [`run_async`](Self::run_async). Must not be called
    /// from inside a tokio runtime.
    fn run(&self, query: &Content, monitor: &ExecutionMonitor) -> anyhow::Result<Content> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        runtime.block_on(self.run_async(query, monitor))
    }
}

/// Start `monitor`, run `runnable` against it and record how it ended.
///
/// A failing runnable finishes the execution as `Failed` with a descriptive
/// message; only monitoring errors are returned. Returns the final record.
pub async fn drive(
    runnable: &dyn Runnable,
    monitor: &ExecutionMonitor,
    query: Option<Content>,
) -> Result<ExecutionRecord> {
    monitor.start(query).await?;
    let query = monitor.snapshot().await.query.unwrap_or_default();

    let outcome = match runnable.run_async(&query, monitor).await {
        Ok(reply) => Outcome::Success(reply),
        Err(e) => {
            error!("{} failed on execution {}: {:#}", runnable.name(), monitor.id(), e);
            Outcome::Failure(format!("{} failed: {:#}", runnable.name(), e))
        }
    };

    if monitor.is_terminal().await {
        warn!(
            "{} finished execution {} itself; keeping its outcome",
            runnable.name(),
            monitor.id()
        );
    } else {
        monitor.finish(outcome).await?;
    }
    Ok(monitor.snapshot().await)
}
