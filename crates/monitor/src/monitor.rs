//! Live monitor around one execution record

use std::sync::Arc;

use chrono::{DateTime, Utc};
use runtrace_core::{
    Content, ExecutionRecord, ExecutionStatus, Outcome, RuntimeRepository, TaskRecord,
    ToolCallOutcome, ToolCallStatus, TransitionError,
};
use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

use crate::config::MonitorConfig;
use crate::error::Result;
use crate::event::{ChannelSubscriber, EventChannel, EventKind, MonitorEvent, Subscriber};
use crate::record::MonitoredRecord;

/// Monitor of one agent execution
pub type ExecutionMonitor = Monitor<ExecutionRecord>;
/// Monitor of one multi-step task
pub type TaskMonitor = Monitor<TaskRecord>;

/// A tool result that could not be matched to an opened tool call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Anomaly {
    pub execution_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    pub tool_use_id: String,
    pub observed_at: DateTime<Utc>,
}

pub(crate) struct MonitorState<R> {
    pub(crate) record: R,
    channel: EventChannel<R>,
    anomalies: Vec<Anomaly>,
    /// Cleared once the record is deleted so late changes stay in memory
    repository: Option<Arc<dyn RuntimeRepository>>,
}

/// Owns the live copy of a record. Every change is applied, announced to
/// subscribers and (per policy) persisted while the record is locked, so
/// observers and storage see changes in the order they happened.
pub struct Monitor<R> {
    id: String,
    state: Mutex<MonitorState<R>>,
    config: MonitorConfig,
}

impl<R: MonitoredRecord> Monitor<R> {
    pub fn new(
        record: R,
        repository: Option<Arc<dyn RuntimeRepository>>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            id: record.record_id().to_string(),
            state: Mutex::new(MonitorState {
                record,
                channel: EventChannel::new(),
                anomalies: Vec::new(),
                repository,
            }),
            config,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Clone of the current record
    pub async fn snapshot(&self) -> R {
        self.state.lock().await.record.clone()
    }

    pub async fn status(&self) -> ExecutionStatus {
        self.state.lock().await.record.status()
    }

    pub async fn is_terminal(&self) -> bool {
        self.status().await.is_terminal()
    }

    /// Register a callback for every future event
    pub async fn subscribe(&self, subscriber: Arc<dyn Subscriber<R>>) {
        self.state.lock().await.channel.subscribe(subscriber);
    }

    /// Receive future events on a bounded stream. Events are dropped, not
    /// queued, while the stream is full.
    pub async fn subscribe_channel(&self) -> ReceiverStream<MonitorEvent<R>> {
        let (subscriber, stream) = ChannelSubscriber::channel(self.config.channel_capacity);
        self.subscribe(Arc::new(subscriber)).await;
        stream
    }

    /// Tool results dropped so far
    pub async fn anomalies(&self) -> Vec<Anomaly> {
        self.state.lock().await.anomalies.clone()
    }

    /// Write the full record to the repository, replacing what is stored.
    /// Without a repository this does nothing.
    pub async fn persist(&self) -> Result<()> {
        let state = self.state.lock().await;
        self.save(&state).await
    }

    /// Stop writing to the repository. Used when the record is deleted.
    pub(crate) async fn detach(&self) {
        self.state.lock().await.repository = None;
    }

    pub async fn start(&self, query: Option<Content>) -> Result<()> {
        self.transition(
            |record| record.apply_start(query),
            |snapshot| MonitorEvent::new(EventKind::Start, snapshot),
        )
        .await?;
        info!("Started {} {}", R::KIND, self.id);
        Ok(())
    }

    pub async fn finish(&self, outcome: Outcome) -> Result<()> {
        let success = outcome.is_success();
        self.transition(
            |record| record.apply_finish(outcome),
            |snapshot| MonitorEvent::new(EventKind::Finish, snapshot),
        )
        .await?;
        if success {
            info!("{} {} completed", R::KIND, self.id);
        } else {
            info!("{} {} failed", R::KIND, self.id);
        }
        Ok(())
    }

    pub async fn cancel(&self) -> Result<()> {
        self.finish(Outcome::failure("cancelled")).await
    }

    async fn save(&self, state: &MonitorState<R>) -> Result<()> {
        let Some(repository) = &state.repository else {
            return Ok(());
        };
        state.record.save(repository.as_ref()).await?;
        debug!("Persisted {} {}", R::KIND, self.id);
        Ok(())
    }

    /// Apply a change and, on success, publish the event it produced
    pub(crate) async fn transition<T, F, E>(&self, apply: F, event: E) -> Result<T>
    where
        F: FnOnce(&mut R) -> std::result::Result<T, TransitionError>,
        E: FnOnce(R) -> MonitorEvent<R>,
    {
        let mut state = self.state.lock().await;
        let value = apply(&mut state.record)?;
        let event = event(state.record.clone());
        self.publish(&mut state, event).await;
        Ok(value)
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, MonitorState<R>> {
        self.state.lock().await
    }

    /// Notify subscribers and auto-persist per policy. Persistence failures
    /// are logged; the change stays applied.
    pub(crate) async fn publish(&self, state: &mut MonitorState<R>, event: MonitorEvent<R>) {
        state.channel.emit(&event);
        if self.config.persist_policy.persists(event.kind) {
            if let Err(e) = self.save(state).await {
                error!(
                    "Failed to persist {} {} after {:?} event: {}",
                    R::KIND,
                    self.id,
                    event.kind,
                    e
                );
            }
        }
    }

    pub(crate) fn record_anomaly(
        &self,
        state: &mut MonitorState<R>,
        step_id: Option<&str>,
        tool_use_id: &str,
    ) {
        match step_id {
            Some(step_id) => warn!(
                "Dropping result for unknown tool call {} in step {} of {} {}",
                tool_use_id,
                step_id,
                R::KIND,
                self.id
            ),
            None => warn!(
                "Dropping result for unknown tool call {} in {} {}",
                tool_use_id,
                R::KIND,
                self.id
            ),
        }
        state.anomalies.push(Anomaly {
            execution_id: self.id.clone(),
            step_id: step_id.map(str::to_string),
            tool_use_id: tool_use_id.to_string(),
            observed_at: Utc::now(),
        });
    }
}

impl Monitor<ExecutionRecord> {
    /// Append a streamed text fragment
    pub async fn apply_stream_fragment(&self, text: &str) -> Result<()> {
        self.transition(
            |record| record.append_stream(text),
            |snapshot| MonitorEvent::new(EventKind::Stream, snapshot).with_fragment(text),
        )
        .await
    }

    /// Mark the end of a complete message
    pub async fn end_message(&self) -> Result<()> {
        self.transition(
            |record| record.end_message(),
            |snapshot| MonitorEvent::new(EventKind::Update, snapshot),
        )
        .await
    }

    pub async fn open_tool_call(
        &self,
        tool_use_id: &str,
        tool_name: &str,
        tool_input: serde_json::Value,
    ) -> Result<()> {
        self.transition(
            |record| record.open_tool_call(tool_use_id, tool_name, tool_input),
            |snapshot| MonitorEvent::new(EventKind::Tool, snapshot),
        )
        .await?;
        debug!("Opened tool call {} ({}) in {}", tool_use_id, tool_name, self.id());
        Ok(())
    }

    /// Attach a tool result. A result for a tool call that was never opened
    /// is dropped and recorded as an anomaly.
    pub async fn close_tool_call(
        &self,
        tool_use_id: &str,
        result: serde_json::Value,
        status: ToolCallStatus,
    ) -> Result<ToolCallOutcome> {
        let mut state = self.lock().await;
        let outcome = state.record.close_tool_call(tool_use_id, result, status)?;
        match outcome {
            ToolCallOutcome::Applied => {
                let event = MonitorEvent::new(EventKind::Tool, state.record.clone());
                self.publish(&mut state, event).await;
            }
            ToolCallOutcome::Dropped => self.record_anomaly(&mut state, None, tool_use_id),
        }
        Ok(outcome)
    }
}
