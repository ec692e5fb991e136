//! Step operations of a task monitor
//!
//! A task's steps are sub-agent executions kept inside the task record.
//! Subscribers always receive the whole task; the event's `step_id` tells
//! which step changed.

use runtrace_core::repository::sort_chronologically;
use runtrace_core::{Content, ExecutionRecord, Outcome, TaskRecord, ToolCallOutcome, ToolCallStatus};
use tracing::{debug, info};

use crate::error::Result;
use crate::event::{EventKind, MonitorEvent};
use crate::monitor::Monitor;

impl Monitor<TaskRecord> {
    /// Start a step. Steps are only accepted while the task is executing.
    pub async fn begin_step(
        &self,
        step_id: &str,
        name: &str,
        query: Option<Content>,
    ) -> Result<()> {
        self.transition(
            |task| task.begin_step(step_id, name, query).map(|_| ()),
            |snapshot| MonitorEvent::new(EventKind::Update, snapshot).with_step(step_id),
        )
        .await?;
        info!("Task {} started step {} ({})", self.id(), step_id, name);
        Ok(())
    }

    pub async fn stream_step(&self, step_id: &str, text: &str) -> Result<()> {
        self.transition(
            |task| task.step_mut(step_id)?.append_stream(text),
            |snapshot| {
                MonitorEvent::new(EventKind::Stream, snapshot)
                    .with_step(step_id)
                    .with_fragment(text)
            },
        )
        .await
    }

    pub async fn end_step_message(&self, step_id: &str) -> Result<()> {
        self.transition(
            |task| task.step_mut(step_id)?.end_message(),
            |snapshot| MonitorEvent::new(EventKind::Update, snapshot).with_step(step_id),
        )
        .await
    }

    pub async fn open_step_tool_call(
        &self,
        step_id: &str,
        tool_use_id: &str,
        tool_name: &str,
        tool_input: serde_json::Value,
    ) -> Result<()> {
        self.transition(
            |task| {
                task.step_mut(step_id)?
                    .open_tool_call(tool_use_id, tool_name, tool_input)
            },
            |snapshot| MonitorEvent::new(EventKind::Tool, snapshot).with_step(step_id),
        )
        .await?;
        debug!(
            "Opened tool call {} ({}) in step {} of task {}",
            tool_use_id,
            tool_name,
            step_id,
            self.id()
        );
        Ok(())
    }

    /// Attach a tool result to a step. Unknown tool calls are dropped and
    /// recorded as anomalies; an unknown step is an error.
    pub async fn close_step_tool_call(
        &self,
        step_id: &str,
        tool_use_id: &str,
        result: serde_json::Value,
        status: ToolCallStatus,
    ) -> Result<ToolCallOutcome> {
        let mut state = self.lock().await;
        let outcome = state
            .record
            .step_mut(step_id)?
            .close_tool_call(tool_use_id, result, status)?;
        match outcome {
            ToolCallOutcome::Applied => {
                let event =
                    MonitorEvent::new(EventKind::Tool, state.record.clone()).with_step(step_id);
                self.publish(&mut state, event).await;
            }
            ToolCallOutcome::Dropped => {
                self.record_anomaly(&mut state, Some(step_id), tool_use_id)
            }
        }
        Ok(outcome)
    }

    /// Finish one step. The task itself stays executing until `finish`.
    pub async fn finish_step(&self, step_id: &str, outcome: Outcome) -> Result<()> {
        self.transition(
            |task| task.step_mut(step_id)?.finish(outcome),
            |snapshot| MonitorEvent::new(EventKind::Update, snapshot).with_step(step_id),
        )
        .await?;
        info!("Task {} finished step {}", self.id(), step_id);
        Ok(())
    }

    /// Snapshot of one step
    pub async fn step(&self, step_id: &str) -> Option<ExecutionRecord> {
        self.lock().await.record.steps.get(step_id).cloned()
    }

    /// Snapshot of every step in execution order
    pub async fn list_steps(&self) -> Vec<ExecutionRecord> {
        let mut steps: Vec<ExecutionRecord> =
            self.lock().await.record.steps.values().cloned().collect();
        sort_chronologically(&mut steps);
        steps
    }
}
