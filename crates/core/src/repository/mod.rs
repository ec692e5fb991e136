//! Repository module
//!
//! Durable storage for execution records. Two backends implement the same
//! contract and must be observably equivalent:
//! - [`FileRuntimeRepository`]: one directory per execution
//! - [`SqliteRuntimeRepository`]: normalized tables with cascading deletes

mod config;
mod file_store;
mod sqlite_store;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::runtime::{is_valid_id, AgentRecord, ExecutionRecord, TaskRecord, ToolCallRecord};
use crate::{Error, Result};

pub use config::RepositoryConfig;
pub use file_store::FileRuntimeRepository;
pub use sqlite_store::SqliteRuntimeRepository;

/// Repository interface for execution records.
///
/// Every write is a complete replacement of the stored state for that
/// record. Deleting an id that does not exist is not an error.
#[async_trait]
pub trait RuntimeRepository: Send + Sync {
    /// Create or replace an agent execution, including its tool calls
    async fn upsert_execution(&self, record: &ExecutionRecord) -> Result<()>;

    /// Get an agent execution by ID
    async fn get_execution(&self, id: &str) -> Result<Option<ExecutionRecord>>;

    /// List agent executions, optionally restricted to one owner
    async fn list_executions(&self, owner_id: Option<&str>) -> Result<Vec<ExecutionRecord>>;

    /// Delete an execution or task together with its tool calls and steps
    async fn delete_execution(&self, id: &str) -> Result<()>;

    /// Create or replace one tool call of an existing execution
    async fn upsert_tool_call(&self, execution_id: &str, tool_call: &ToolCallRecord)
        -> Result<()>;

    /// Tool calls of an execution, ordered by tool use id
    async fn list_tool_calls(&self, execution_id: &str) -> Result<Vec<ToolCallRecord>>;

    /// Create or replace a task, including its steps
    async fn upsert_task(&self, task: &TaskRecord) -> Result<()>;

    /// Get a task by ID
    async fn get_task(&self, id: &str) -> Result<Option<TaskRecord>>;

    /// List all tasks
    async fn list_tasks(&self) -> Result<Vec<TaskRecord>>;

    /// Delete a task and its steps
    async fn delete_task(&self, id: &str) -> Result<()> {
        self.delete_execution(id).await
    }

    /// Create or replace one step of an existing task
    async fn upsert_step(&self, task_id: &str, step: &ExecutionRecord) -> Result<()>;

    /// Steps of a task, in execution order
    async fn list_steps(&self, task_id: &str) -> Result<Vec<ExecutionRecord>>;

    /// Create or replace agent metadata
    async fn upsert_agent(&self, agent: &AgentRecord) -> Result<()>;

    /// Get agent metadata by ID
    async fn get_agent(&self, agent_id: &str) -> Result<Option<AgentRecord>>;

    /// List agents ordered by creation time
    async fn list_agents(&self) -> Result<Vec<AgentRecord>>;

    /// Delete an agent and every execution it owns
    async fn delete_agent(&self, agent_id: &str) -> Result<()>;
}

fn validate_id(id: &str) -> Result<()> {
    if is_valid_id(id) {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!("Invalid record id: {:?}", id)))
    }
}

/// Check a record and every nested key before anything is written, so a
/// rejected upsert leaves storage untouched
fn validate_execution(record: &ExecutionRecord) -> Result<()> {
    validate_id(&record.id)?;
    for (key, call) in &record.tool_calls {
        validate_id(key)?;
        validate_id(&call.tool_use_id)?;
    }
    Ok(())
}

fn validate_task(task: &TaskRecord) -> Result<()> {
    validate_id(&task.id)?;
    for (key, step) in &task.steps {
        validate_id(key)?;
        validate_execution(step)?;
    }
    Ok(())
}

/// Ordering key shared by both backends: start time when known, creation
/// time otherwise, id as tie breaker.
pub trait Chronological {
    fn record_id(&self) -> &str;
    fn created_at(&self) -> DateTime<Utc>;
    fn started_at(&self) -> Option<DateTime<Utc>>;

    fn order_key(&self) -> DateTime<Utc> {
        self.started_at().unwrap_or_else(|| self.created_at())
    }
}

impl Chronological for ExecutionRecord {
    fn record_id(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }
}

impl Chronological for TaskRecord {
    fn record_id(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }
}

/// Sort records into repository listing order
pub fn sort_chronologically<T: Chronological>(records: &mut [T]) {
    records.sort_by(|a, b| {
        a.order_key()
            .cmp(&b.order_key())
            .then_with(|| a.record_id().cmp(b.record_id()))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_sort_prefers_start_time() {
        let now = Utc::now();
        let mut early_created = ExecutionRecord::new("a", "late start");
        early_created.created_at = now - Duration::seconds(10);
        early_created.started_at = Some(now + Duration::seconds(5));

        let mut pending = ExecutionRecord::new("a", "never started");
        pending.created_at = now;

        let mut started = ExecutionRecord::new("a", "started");
        started.created_at = now - Duration::seconds(20);
        started.started_at = Some(now - Duration::seconds(1));

        let mut records = vec![early_created.clone(), pending.clone(), started.clone()];
        sort_chronologically(&mut records);

        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec![started.id.as_str(), pending.id.as_str(), early_created.id.as_str()]);
    }
}
