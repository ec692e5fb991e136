//! Execution record definitions and their state machine

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::status::{ExecutionStatus, ToolCallStatus};

/// A query or reply payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Content {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl Content {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            data: None,
        }
    }

    /// Attach structured data alongside the text
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

impl From<&str> for Content {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl From<String> for Content {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

/// One request/response cycle with an external tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub tool_use_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub tool_input: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<serde_json::Value>,
    #[serde(default)]
    pub status: ToolCallStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ToolCallRecord {
    pub fn new(
        tool_use_id: impl Into<String>,
        tool_name: impl Into<String>,
        tool_input: serde_json::Value,
    ) -> Self {
        Self {
            tool_use_id: tool_use_id.into(),
            tool_name: tool_name.into(),
            tool_input,
            tool_result: None,
            status: ToolCallStatus::Pending,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn duration(&self) -> Option<Duration> {
        match (self.started_at, self.completed_at) {
            (Some(started), Some(completed)) => Some(completed - started),
            _ => None,
        }
    }
}

/// How an execution ended
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success(Content),
    Failure(String),
}

impl Outcome {
    pub fn success(reply: impl Into<Content>) -> Self {
        Self::Success(reply.into())
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self::Failure(error.into())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// Result of reporting a tool result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolCallOutcome {
    /// The result was attached to an open tool call
    Applied,
    /// No tool call with that id was ever opened; nothing changed
    Dropped,
}

/// Rejected state changes. A rejected change never mutates the record.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Cannot {action} execution {id} while it is {status}")]
    InvalidTransition {
        id: String,
        action: &'static str,
        status: ExecutionStatus,
    },

    #[error("Tool call {tool_use_id} of execution {id} is already {status}")]
    ToolCallClosed {
        id: String,
        tool_use_id: String,
        status: ToolCallStatus,
    },

    #[error("Task {task_id} has no step {step_id}")]
    UnknownStep { task_id: String, step_id: String },

    #[error("Invalid {what} id {key:?} in execution {id}")]
    InvalidId {
        id: String,
        what: &'static str,
        key: String,
    },
}

/// Whether `id` can name a record, tool call or step in storage
pub fn is_valid_id(id: &str) -> bool {
    !(id.is_empty() || id == "." || id == "..")
}

fn require_valid_id(id: &str, what: &'static str, key: &str) -> Result<(), TransitionError> {
    if is_valid_id(key) {
        Ok(())
    } else {
        Err(TransitionError::InvalidId {
            id: id.to_string(),
            what,
            key: key.to_string(),
        })
    }
}

fn require(
    id: &str,
    status: ExecutionStatus,
    expected: ExecutionStatus,
    action: &'static str,
) -> Result<(), TransitionError> {
    if status == expected {
        Ok(())
    } else {
        Err(TransitionError::InvalidTransition {
            id: id.to_string(),
            action,
            status,
        })
    }
}

/// State of a single execution: one agent runtime or one task step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    #[serde(default)]
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<Content>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<Content>,
    #[serde(default)]
    pub streaming_text: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub tool_calls: BTreeMap<String, ToolCallRecord>,
}

impl ExecutionRecord {
    /// Create a pending record with a fresh id
    pub fn new(owner_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            owner_id: owner_id.into(),
            name: name.into(),
            status: ExecutionStatus::Pending,
            query: None,
            reply: None,
            streaming_text: String::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
            tool_calls: BTreeMap::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_query(mut self, query: impl Into<Content>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_completed(&self) -> bool {
        self.status == ExecutionStatus::Completed
    }

    /// Wall time between start and completion; `None` until terminal
    pub fn duration(&self) -> Option<Duration> {
        match (self.started_at, self.completed_at) {
            (Some(started), Some(completed)) => Some(completed - started),
            _ => None,
        }
    }

    pub fn tool_call(&self, tool_use_id: &str) -> Option<&ToolCallRecord> {
        self.tool_calls.get(tool_use_id)
    }

    /// Move from `Pending` to `Executing`. A `None` query keeps the one
    /// supplied at creation.
    pub fn start(&mut self, query: Option<Content>) -> Result<(), TransitionError> {
        require(&self.id, self.status, ExecutionStatus::Pending, "start")?;
        self.status = ExecutionStatus::Executing;
        self.started_at = Some(Utc::now());
        if query.is_some() {
            self.query = query;
        }
        Ok(())
    }

    pub fn append_stream(&mut self, text: &str) -> Result<(), TransitionError> {
        require(&self.id, self.status, ExecutionStatus::Executing, "stream into")?;
        self.streaming_text.push_str(text);
        Ok(())
    }

    /// Structural message boundary: the streamed text has been folded into a
    /// complete message.
    pub fn end_message(&mut self) -> Result<(), TransitionError> {
        require(&self.id, self.status, ExecutionStatus::Executing, "end a message of")?;
        self.streaming_text.clear();
        Ok(())
    }

    pub fn open_tool_call(
        &mut self,
        tool_use_id: &str,
        tool_name: &str,
        tool_input: serde_json::Value,
    ) -> Result<(), TransitionError> {
        require(&self.id, self.status, ExecutionStatus::Executing, "open a tool call on")?;
        require_valid_id(&self.id, "tool use", tool_use_id)?;
        if let Some(existing) = self.tool_calls.get(tool_use_id) {
            if existing.status.is_terminal() {
                return Err(TransitionError::ToolCallClosed {
                    id: self.id.clone(),
                    tool_use_id: tool_use_id.to_string(),
                    status: existing.status,
                });
            }
        }

        let mut call = ToolCallRecord::new(tool_use_id, tool_name, tool_input);
        call.status = ToolCallStatus::Executing;
        call.started_at = Some(Utc::now());
        self.tool_calls.insert(tool_use_id.to_string(), call);
        self.streaming_text.clear();
        Ok(())
    }

    /// Attach a tool result. Unknown ids are dropped, not failed. A JSON
    /// `null` result is stored as no result.
    pub fn close_tool_call(
        &mut self,
        tool_use_id: &str,
        result: serde_json::Value,
        status: ToolCallStatus,
    ) -> Result<ToolCallOutcome, TransitionError> {
        require(&self.id, self.status, ExecutionStatus::Executing, "close a tool call on")?;
        let Some(call) = self.tool_calls.get_mut(tool_use_id) else {
            return Ok(ToolCallOutcome::Dropped);
        };

        call.tool_result = (!result.is_null()).then_some(result);
        call.status = status;
        call.completed_at = status.is_terminal().then(Utc::now);
        self.streaming_text.clear();
        Ok(ToolCallOutcome::Applied)
    }

    pub fn finish(&mut self, outcome: Outcome) -> Result<(), TransitionError> {
        require(&self.id, self.status, ExecutionStatus::Executing, "finish")?;
        match outcome {
            Outcome::Success(reply) => {
                self.status = ExecutionStatus::Completed;
                self.reply = Some(reply);
                self.error = None;
            }
            Outcome::Failure(error) => {
                self.status = ExecutionStatus::Failed;
                self.error = Some(error);
                self.reply = None;
            }
        }
        self.completed_at = Some(Utc::now());
        self.streaming_text.clear();
        Ok(())
    }
}

/// State of a multi-step task; each step is a sub-agent execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    #[serde(default)]
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<Content>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<Content>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub steps: BTreeMap<String, ExecutionRecord>,
}

impl TaskRecord {
    pub fn new(owner_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            owner_id: owner_id.into(),
            name: name.into(),
            status: ExecutionStatus::Pending,
            query: None,
            reply: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            steps: BTreeMap::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_query(mut self, query: impl Into<Content>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn duration(&self) -> Option<Duration> {
        match (self.started_at, self.completed_at) {
            (Some(started), Some(completed)) => Some(completed - started),
            _ => None,
        }
    }

    pub fn start(&mut self, query: Option<Content>) -> Result<(), TransitionError> {
        require(&self.id, self.status, ExecutionStatus::Pending, "start")?;
        self.status = ExecutionStatus::Executing;
        self.started_at = Some(Utc::now());
        if query.is_some() {
            self.query = query;
        }
        Ok(())
    }

    /// Mark the task terminal. Step statuses are not consulted.
    pub fn finish(&mut self, outcome: Outcome) -> Result<(), TransitionError> {
        require(&self.id, self.status, ExecutionStatus::Executing, "finish")?;
        match outcome {
            Outcome::Success(reply) => {
                self.status = ExecutionStatus::Completed;
                self.reply = Some(reply);
                self.error = None;
            }
            Outcome::Failure(error) => {
                self.status = ExecutionStatus::Failed;
                self.error = Some(error);
                self.reply = None;
            }
        }
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Start a step, creating it if needed. The step is owned by this task.
    pub fn begin_step(
        &mut self,
        step_id: &str,
        name: &str,
        query: Option<Content>,
    ) -> Result<&ExecutionRecord, TransitionError> {
        require(&self.id, self.status, ExecutionStatus::Executing, "add a step to")?;
        require_valid_id(&self.id, "step", step_id)?;
        if let Some(step) = self.steps.get(step_id) {
            // Fail before touching the map so a rejected begin leaves no trace.
            require(&step.id, step.status, ExecutionStatus::Pending, "start")?;
        }

        let owner_id = self.id.clone();
        let step = self
            .steps
            .entry(step_id.to_string())
            .or_insert_with(|| ExecutionRecord::new(owner_id, name).with_id(step_id));
        step.start(query)?;
        Ok(step)
    }

    /// Mutable access to an existing step while the task is running
    pub fn step_mut(&mut self, step_id: &str) -> Result<&mut ExecutionRecord, TransitionError> {
        require(&self.id, self.status, ExecutionStatus::Executing, "update a step of")?;
        let task_id = self.id.clone();
        self.steps
            .get_mut(step_id)
            .ok_or_else(|| TransitionError::UnknownStep {
                task_id,
                step_id: step_id.to_string(),
            })
    }
}

/// Descriptive metadata about an agent that owns executions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub agent_id: String,
    pub agent_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AgentRecord {
    pub fn new(agent_id: impl Into<String>, agent_name: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            agent_name: agent_name.into(),
            system_prompt: None,
            description: None,
            created_at: Utc::now(),
        }
    }

    /// Set the system prompt
    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn running() -> ExecutionRecord {
        let mut record = ExecutionRecord::new("agent-1", "Calculator");
        record.start(Some("2+2".into())).unwrap();
        record
    }

    fn assert_invariants(record: &ExecutionRecord) {
        assert_eq!(record.completed_at.is_some(), record.status.is_terminal());
        assert_eq!(
            record.reply.is_some(),
            record.status == ExecutionStatus::Completed
        );
        assert_eq!(record.error.is_some(), record.status == ExecutionStatus::Failed);
    }

    #[test]
    fn test_create_record() {
        let record = ExecutionRecord::new("agent-1", "Calculator");
        assert_eq!(record.status, ExecutionStatus::Pending);
        assert!(Uuid::parse_str(&record.id).is_ok());
        assert!(record.started_at.is_none());
        assert!(record.duration().is_none());
        assert_invariants(&record);
    }

    #[test]
    fn test_start_keeps_creation_query() {
        let mut record = ExecutionRecord::new("agent-1", "Calculator").with_query("hello");
        record.start(None).unwrap();
        assert_eq!(record.status, ExecutionStatus::Executing);
        assert_eq!(record.query.as_ref().unwrap().text, "hello");
        assert!(record.started_at.is_some());
    }

    #[test]
    fn test_full_lifecycle() {
        let mut record = running();
        record.append_stream("thinking").unwrap();
        record
            .open_tool_call("t1", "calculator", json!({"expr": "2+2"}))
            .unwrap();
        assert!(record.streaming_text.is_empty());

        let outcome = record
            .close_tool_call("t1", json!(4), ToolCallStatus::Success)
            .unwrap();
        assert_eq!(outcome, ToolCallOutcome::Applied);

        record.finish(Outcome::success("4")).unwrap();
        assert_eq!(record.status, ExecutionStatus::Completed);
        assert_eq!(record.reply.as_ref().unwrap().text, "4");
        assert!(record.duration().is_some());

        let call = record.tool_call("t1").unwrap();
        assert_eq!(call.status, ToolCallStatus::Success);
        assert_eq!(call.tool_result, Some(json!(4)));
        assert!(call.completed_at.is_some());
        assert_invariants(&record);
    }

    #[test]
    fn test_failure_sets_error_only() {
        let mut record = running();
        record.finish(Outcome::failure("model unavailable")).unwrap();
        assert_eq!(record.status, ExecutionStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("model unavailable"));
        assert_invariants(&record);
    }

    #[test]
    fn test_rejected_transitions_do_not_mutate() {
        let mut record = ExecutionRecord::new("agent-1", "Calculator");
        let before = record.clone();

        let err = record.finish(Outcome::success("x")).unwrap_err();
        assert!(matches!(err, TransitionError::InvalidTransition { action: "finish", .. }));
        assert!(record.append_stream("x").is_err());
        assert_eq!(record, before);

        record.start(None).unwrap();
        record.finish(Outcome::success("done")).unwrap();
        let finished = record.clone();

        assert!(record.start(None).is_err());
        assert!(record.finish(Outcome::failure("again")).is_err());
        assert!(record.open_tool_call("t1", "x", json!(null)).is_err());
        assert_eq!(record, finished);
    }

    #[test]
    fn test_unknown_tool_result_is_dropped() {
        let mut record = running();
        let before = record.clone();
        let outcome = record
            .close_tool_call("unknown", json!("late"), ToolCallStatus::Success)
            .unwrap();
        assert_eq!(outcome, ToolCallOutcome::Dropped);
        assert_eq!(record, before);
    }

    #[test]
    fn test_reopen_closed_tool_call_fails() {
        let mut record = running();
        record.open_tool_call("t1", "search", json!({})).unwrap();
        record
            .close_tool_call("t1", json!("err"), ToolCallStatus::Failure)
            .unwrap();

        let err = record.open_tool_call("t1", "search", json!({})).unwrap_err();
        assert!(matches!(err, TransitionError::ToolCallClosed { .. }));

        // An open call can be re-announced (at-least-once delivery)
        record.open_tool_call("t2", "search", json!({"q": 1})).unwrap();
        record.open_tool_call("t2", "search", json!({"q": 1})).unwrap();
        assert_eq!(record.tool_calls.len(), 2);
    }

    #[test]
    fn test_unstorable_ids_are_rejected() {
        let mut record = running();
        let before = record.clone();
        for id in ["", ".", ".."] {
            let err = record.open_tool_call(id, "search", json!({})).unwrap_err();
            assert!(matches!(err, TransitionError::InvalidId { what: "tool use", .. }));
        }
        assert_eq!(record, before);

        let mut task = TaskRecord::new("user-1", "Report");
        task.start(None).unwrap();
        let err = task.begin_step("..", "Planner", None).unwrap_err();
        assert!(matches!(err, TransitionError::InvalidId { what: "step", .. }));
        assert!(task.steps.is_empty());
    }

    #[test]
    fn test_null_tool_result_is_absent() {
        let mut record = running();
        record.open_tool_call("t1", "lookup", json!({})).unwrap();
        record
            .close_tool_call("t1", json!(null), ToolCallStatus::Success)
            .unwrap();

        let call = record.tool_call("t1").unwrap();
        assert_eq!(call.tool_result, None);
        assert_eq!(call.status, ToolCallStatus::Success);

        let decoded: ToolCallRecord = serde_json::from_value(json!({
            "tool_use_id": "t1",
            "tool_name": "lookup",
            "tool_result": null,
            "started_at": null,
            "completed_at": null,
        }))
        .unwrap();
        assert_eq!(decoded.tool_result, None);
    }

    #[test]
    fn test_serialization_skips_absent_fields() {
        let record = ExecutionRecord::new("agent-1", "Calculator");
        let value = serde_json::to_value(&record).unwrap();
        assert!(value.get("reply").is_none());
        assert!(value.get("error").is_none());
        assert_eq!(value["status"], "pending");

        let decoded: ExecutionRecord = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_task_steps_are_independent_of_task_status() {
        let mut task = TaskRecord::new("user-1", "Report");
        assert!(task.begin_step("s1", "Planner", None).is_err());

        task.start(Some("write a report".into())).unwrap();
        task.begin_step("s1", "Planner", None).unwrap();
        task.step_mut("s1")
            .unwrap()
            .finish(Outcome::success("plan"))
            .unwrap();

        assert_eq!(task.status, ExecutionStatus::Executing);
        assert_eq!(task.steps["s1"].owner_id, task.id);
        assert_eq!(task.steps["s1"].status, ExecutionStatus::Completed);

        let err = task.begin_step("s1", "Planner", None).unwrap_err();
        assert!(matches!(err, TransitionError::InvalidTransition { .. }));
        assert!(matches!(
            task.step_mut("missing").unwrap_err(),
            TransitionError::UnknownStep { .. }
        ));

        task.finish(Outcome::failure("aborted")).unwrap();
        assert!(task.completed_at.is_some());
        assert!(task.step_mut("s1").is_err());
    }

    #[test]
    fn test_agent_builder() {
        let agent = AgentRecord::new("math", "Math Agent")
            .with_system_prompt("You are a math expert.")
            .with_description("Solves arithmetic");
        assert_eq!(agent.system_prompt.as_deref(), Some("You are a math expert."));
        assert_eq!(agent.description.as_deref(), Some("Solves arithmetic"));
    }
}
