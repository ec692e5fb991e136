//! SQLite-based runtime repository
//!
//! Normalized schema with foreign keys; deleting an execution cascades to
//! its tool calls and steps. Structured payloads are stored as JSON text.

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, Transaction};
use tracing::{debug, info, warn};

use super::{
    sort_chronologically, validate_execution, validate_id, validate_task, RuntimeRepository,
};
use crate::runtime::{
    AgentRecord, ExecutionRecord, ExecutionStatus, TaskRecord, ToolCallRecord, ToolCallStatus,
};
use crate::{Error, Result};

const SCHEMA_VERSION: i64 = 1;

const KIND_AGENT: &str = "agent";
const KIND_TASK: &str = "task";

const SCHEMA: &[&str] = &[
    r"
    CREATE TABLE IF NOT EXISTS executions (
        id TEXT PRIMARY KEY NOT NULL,
        kind TEXT NOT NULL DEFAULT 'agent',
        owner_id TEXT NOT NULL,
        name TEXT NOT NULL,
        status TEXT NOT NULL,
        query_json TEXT,
        reply_json TEXT,
        error TEXT,
        streaming_text TEXT NOT NULL DEFAULT '',
        created_at TEXT NOT NULL,
        started_at TEXT,
        completed_at TEXT
    )
    ",
    r"
    CREATE INDEX IF NOT EXISTS idx_executions_owner ON executions (kind, owner_id)
    ",
    r"
    CREATE TABLE IF NOT EXISTS tool_calls (
        execution_id TEXT NOT NULL REFERENCES executions(id) ON DELETE CASCADE,
        tool_use_id TEXT NOT NULL,
        tool_name TEXT NOT NULL,
        input_json TEXT NOT NULL,
        result_json TEXT,
        status TEXT NOT NULL,
        started_at TEXT,
        completed_at TEXT,
        PRIMARY KEY (execution_id, tool_use_id)
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS steps (
        execution_id TEXT NOT NULL REFERENCES executions(id) ON DELETE CASCADE,
        step_id TEXT NOT NULL,
        owner_id TEXT NOT NULL,
        name TEXT NOT NULL,
        status TEXT NOT NULL,
        query_json TEXT,
        reply_json TEXT,
        error TEXT,
        streaming_text TEXT NOT NULL DEFAULT '',
        tool_calls_json TEXT NOT NULL DEFAULT '{}',
        created_at TEXT NOT NULL,
        started_at TEXT,
        completed_at TEXT,
        PRIMARY KEY (execution_id, step_id)
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS agents (
        agent_id TEXT PRIMARY KEY NOT NULL,
        agent_name TEXT NOT NULL,
        system_prompt TEXT,
        description TEXT,
        created_at TEXT NOT NULL
    )
    ",
];

const EXECUTION_COLUMNS: &str = "id, owner_id, name, status, query_json, reply_json, error, \
     streaming_text, created_at, started_at, completed_at";

const STEP_COLUMNS: &str = "step_id, owner_id, name, status, query_json, reply_json, error, \
     streaming_text, tool_calls_json, created_at, started_at, completed_at";

const TOOL_CALL_COLUMNS: &str =
    "tool_use_id, tool_name, input_json, result_json, status, started_at, completed_at";

fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn parse_ts(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| Error::Storage(format!("Invalid timestamp {:?}: {}", value, e)))
}

fn parse_opt_ts(value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value.as_deref().map(parse_ts).transpose()
}

fn to_json<T: Serialize>(value: Option<&T>) -> Result<Option<String>> {
    value.map(serde_json::to_string).transpose().map_err(Into::into)
}

fn from_json<T: DeserializeOwned>(value: Option<String>) -> Result<Option<T>> {
    value
        .as_deref()
        .map(serde_json::from_str)
        .transpose()
        .map_err(Into::into)
}

fn parse_status(value: &str) -> Result<ExecutionStatus> {
    ExecutionStatus::parse(value)
        .ok_or_else(|| Error::Storage(format!("Unknown execution status: {}", value)))
}

fn tool_call_from_row(row: &SqliteRow) -> Result<ToolCallRecord> {
    let status: String = row.try_get("status")?;
    let input: String = row.try_get("input_json")?;
    let result: Option<serde_json::Value> = from_json(row.try_get("result_json")?)?;

    Ok(ToolCallRecord {
        tool_use_id: row.try_get("tool_use_id")?,
        tool_name: row.try_get("tool_name")?,
        tool_input: serde_json::from_str(&input)?,
        // A JSON null result reads back as absent, as it does from a document.
        tool_result: result.filter(|value| !value.is_null()),
        status: ToolCallStatus::parse(&status)
            .ok_or_else(|| Error::Storage(format!("Unknown tool call status: {}", status)))?,
        started_at: parse_opt_ts(row.try_get("started_at")?)?,
        completed_at: parse_opt_ts(row.try_get("completed_at")?)?,
    })
}

/// Columns shared by the executions and steps tables
fn execution_from_row(row: &SqliteRow, id_column: &str) -> Result<ExecutionRecord> {
    let status: String = row.try_get("status")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(ExecutionRecord {
        id: row.try_get(id_column)?,
        owner_id: row.try_get("owner_id")?,
        name: row.try_get("name")?,
        status: parse_status(&status)?,
        query: from_json(row.try_get("query_json")?)?,
        reply: from_json(row.try_get("reply_json")?)?,
        streaming_text: row.try_get("streaming_text")?,
        created_at: parse_ts(&created_at)?,
        started_at: parse_opt_ts(row.try_get("started_at")?)?,
        completed_at: parse_opt_ts(row.try_get("completed_at")?)?,
        error: row.try_get("error")?,
        tool_calls: BTreeMap::new(),
    })
}

fn step_from_row(row: &SqliteRow) -> Result<ExecutionRecord> {
    let mut step = execution_from_row(row, "step_id")?;
    let tool_calls: String = row.try_get("tool_calls_json")?;
    step.tool_calls = serde_json::from_str(&tool_calls)?;
    Ok(step)
}

fn task_from_row(row: &SqliteRow) -> Result<TaskRecord> {
    let base = execution_from_row(row, "id")?;
    Ok(TaskRecord {
        id: base.id,
        owner_id: base.owner_id,
        name: base.name,
        status: base.status,
        query: base.query,
        reply: base.reply,
        error: base.error,
        created_at: base.created_at,
        started_at: base.started_at,
        completed_at: base.completed_at,
        steps: BTreeMap::new(),
    })
}

fn agent_from_row(row: &SqliteRow) -> Result<AgentRecord> {
    let created_at: String = row.try_get("created_at")?;
    Ok(AgentRecord {
        agent_id: row.try_get("agent_id")?,
        agent_name: row.try_get("agent_name")?,
        system_prompt: row.try_get("system_prompt")?,
        description: row.try_get("description")?,
        created_at: parse_ts(&created_at)?,
    })
}

/// Decode a row, logging and discarding it when malformed
fn decode_or_skip<T>(what: &str, decoded: Result<T>) -> Option<T> {
    match decoded {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Ignoring malformed {} row: {}", what, e);
            None
        }
    }
}

/// Fields written to the executions table for either kind
struct ExecutionRow<'a> {
    id: &'a str,
    kind: &'static str,
    owner_id: &'a str,
    name: &'a str,
    status: ExecutionStatus,
    query_json: Option<String>,
    reply_json: Option<String>,
    error: Option<&'a str>,
    streaming_text: &'a str,
    created_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
}

impl<'a> ExecutionRow<'a> {
    fn from_execution(record: &'a ExecutionRecord) -> Result<Self> {
        Ok(Self {
            id: &record.id,
            kind: KIND_AGENT,
            owner_id: &record.owner_id,
            name: &record.name,
            status: record.status,
            query_json: to_json(record.query.as_ref())?,
            reply_json: to_json(record.reply.as_ref())?,
            error: record.error.as_deref(),
            streaming_text: &record.streaming_text,
            created_at: format_ts(&record.created_at),
            started_at: record.started_at.as_ref().map(format_ts),
            completed_at: record.completed_at.as_ref().map(format_ts),
        })
    }

    fn from_task(task: &'a TaskRecord) -> Result<Self> {
        Ok(Self {
            id: &task.id,
            kind: KIND_TASK,
            owner_id: &task.owner_id,
            name: &task.name,
            status: task.status,
            query_json: to_json(task.query.as_ref())?,
            reply_json: to_json(task.reply.as_ref())?,
            error: task.error.as_deref(),
            streaming_text: "",
            created_at: format_ts(&task.created_at),
            started_at: task.started_at.as_ref().map(format_ts),
            completed_at: task.completed_at.as_ref().map(format_ts),
        })
    }

    async fn write(&self, tx: &mut Transaction<'_, Sqlite>) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO executions (id, kind, owner_id, name, status, query_json, reply_json,
                                    error, streaming_text, created_at, started_at, completed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ON CONFLICT(id) DO UPDATE SET
                kind = excluded.kind,
                owner_id = excluded.owner_id,
                name = excluded.name,
                status = excluded.status,
                query_json = excluded.query_json,
                reply_json = excluded.reply_json,
                error = excluded.error,
                streaming_text = excluded.streaming_text,
                created_at = excluded.created_at,
                started_at = excluded.started_at,
                completed_at = excluded.completed_at
            ",
        )
        .bind(self.id)
        .bind(self.kind)
        .bind(self.owner_id)
        .bind(self.name)
        .bind(self.status.as_str())
        .bind(&self.query_json)
        .bind(&self.reply_json)
        .bind(self.error)
        .bind(self.streaming_text)
        .bind(&self.created_at)
        .bind(&self.started_at)
        .bind(&self.completed_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

/// Parent lookup inside the write transaction
async fn has_execution(tx: &mut Transaction<'_, Sqlite>, id: &str, kind: &str) -> Result<bool> {
    let row = sqlx::query("SELECT 1 FROM executions WHERE id = ?1 AND kind = ?2")
        .bind(id)
        .bind(kind)
        .fetch_optional(&mut **tx)
        .await?;
    Ok(row.is_some())
}

async fn write_tool_call(
    tx: &mut Transaction<'_, Sqlite>,
    execution_id: &str,
    call: &ToolCallRecord,
) -> Result<()> {
    sqlx::query(
        r"
        INSERT INTO tool_calls (execution_id, tool_use_id, tool_name, input_json, result_json,
                                status, started_at, completed_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        ON CONFLICT(execution_id, tool_use_id) DO UPDATE SET
            tool_name = excluded.tool_name,
            input_json = excluded.input_json,
            result_json = excluded.result_json,
            status = excluded.status,
            started_at = excluded.started_at,
            completed_at = excluded.completed_at
        ",
    )
    .bind(execution_id)
    .bind(&call.tool_use_id)
    .bind(&call.tool_name)
    .bind(serde_json::to_string(&call.tool_input)?)
    .bind(to_json(call.tool_result.as_ref())?)
    .bind(call.status.as_str())
    .bind(call.started_at.as_ref().map(format_ts))
    .bind(call.completed_at.as_ref().map(format_ts))
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn write_step(
    tx: &mut Transaction<'_, Sqlite>,
    task_id: &str,
    step: &ExecutionRecord,
) -> Result<()> {
    sqlx::query(
        r"
        INSERT INTO steps (execution_id, step_id, owner_id, name, status, query_json, reply_json,
                           error, streaming_text, tool_calls_json, created_at, started_at,
                           completed_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
        ON CONFLICT(execution_id, step_id) DO UPDATE SET
            owner_id = excluded.owner_id,
            name = excluded.name,
            status = excluded.status,
            query_json = excluded.query_json,
            reply_json = excluded.reply_json,
            error = excluded.error,
            streaming_text = excluded.streaming_text,
            tool_calls_json = excluded.tool_calls_json,
            created_at = excluded.created_at,
            started_at = excluded.started_at,
            completed_at = excluded.completed_at
        ",
    )
    .bind(task_id)
    .bind(&step.id)
    .bind(&step.owner_id)
    .bind(&step.name)
    .bind(step.status.as_str())
    .bind(to_json(step.query.as_ref())?)
    .bind(to_json(step.reply.as_ref())?)
    .bind(step.error.as_deref())
    .bind(&step.streaming_text)
    .bind(serde_json::to_string(&step.tool_calls)?)
    .bind(format_ts(&step.created_at))
    .bind(step.started_at.as_ref().map(format_ts))
    .bind(step.completed_at.as_ref().map(format_ts))
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// SQLite-backed repository. Connections are pooled and released on drop or
/// [`close`](Self::close).
#[derive(Debug, Clone)]
pub struct SqliteRuntimeRepository {
    pool: SqlitePool,
}

impl SqliteRuntimeRepository {
    /// Connect using a URL such as `sqlite:runtrace.db` or `sqlite::memory:`
    pub async fn new(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);

        // An in-memory database lives as long as its single connection.
        let in_memory = url.contains(":memory:") || url.contains("mode=memory");
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = pool_options.connect_with(options).await?;
        let repo = Self { pool };
        repo.migrate().await?;
        Ok(repo)
    }

    /// Open (creating if needed) a database file
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        Self::new(&format!("sqlite:{}", path.display())).await
    }

    /// Private in-memory database, mostly for tests
    pub async fn in_memory() -> Result<Self> {
        Self::new("sqlite::memory:").await
    }

    async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        sqlx::query(&format!("PRAGMA user_version = {}", SCHEMA_VERSION))
            .execute(&self.pool)
            .await?;
        debug!("SQLite schema at version {}", SCHEMA_VERSION);
        Ok(())
    }

    /// Schema version recorded in the database
    pub async fn schema_version(&self) -> Result<i64> {
        let row = sqlx::query("PRAGMA user_version").fetch_one(&self.pool).await?;
        Ok(row.try_get(0)?)
    }

    /// Close every pooled connection
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn fetch_tool_calls(
        &self,
        execution_id: &str,
    ) -> Result<BTreeMap<String, ToolCallRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM tool_calls WHERE execution_id = ?1 ORDER BY tool_use_id",
            TOOL_CALL_COLUMNS
        ))
        .bind(execution_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .filter_map(|row| decode_or_skip("tool call", tool_call_from_row(row)))
            .map(|call| (call.tool_use_id.clone(), call))
            .collect())
    }

    async fn fetch_steps(&self, task_id: &str) -> Result<BTreeMap<String, ExecutionRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM steps WHERE execution_id = ?1",
            STEP_COLUMNS
        ))
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .filter_map(|row| decode_or_skip("step", step_from_row(row)))
            .map(|step| (step.id.clone(), step))
            .collect())
    }
}

#[async_trait]
impl RuntimeRepository for SqliteRuntimeRepository {
    async fn upsert_execution(&self, record: &ExecutionRecord) -> Result<()> {
        validate_execution(record)?;
        let row = ExecutionRow::from_execution(record)?;

        let mut tx = self.pool.begin().await?;
        row.write(&mut tx).await?;
        sqlx::query("DELETE FROM steps WHERE execution_id = ?1")
            .bind(&record.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM tool_calls WHERE execution_id = ?1")
            .bind(&record.id)
            .execute(&mut *tx)
            .await?;
        for call in record.tool_calls.values() {
            write_tool_call(&mut tx, &record.id, call).await?;
        }
        tx.commit().await?;

        debug!("Saved execution {}", record.id);
        Ok(())
    }

    async fn get_execution(&self, id: &str) -> Result<Option<ExecutionRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM executions WHERE id = ?1 AND kind = ?2",
            EXECUTION_COLUMNS
        ))
        .bind(id)
        .bind(KIND_AGENT)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let Some(mut record) = decode_or_skip("execution", execution_from_row(&row, "id")) else {
            return Ok(None);
        };
        record.tool_calls = self.fetch_tool_calls(id).await?;
        Ok(Some(record))
    }

    async fn list_executions(&self, owner_id: Option<&str>) -> Result<Vec<ExecutionRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM executions WHERE kind = ?1 AND (?2 IS NULL OR owner_id = ?2)",
            EXECUTION_COLUMNS
        ))
        .bind(KIND_AGENT)
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            if let Some(mut record) = decode_or_skip("execution", execution_from_row(row, "id")) {
                record.tool_calls = self.fetch_tool_calls(&record.id).await?;
                records.push(record);
            }
        }
        sort_chronologically(&mut records);
        Ok(records)
    }

    async fn delete_execution(&self, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM executions WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() > 0 {
            info!("Deleted execution {}", id);
        }
        Ok(())
    }

    async fn upsert_tool_call(
        &self,
        execution_id: &str,
        tool_call: &ToolCallRecord,
    ) -> Result<()> {
        validate_id(execution_id)?;
        validate_id(&tool_call.tool_use_id)?;
        let mut tx = self.pool.begin().await?;
        if !has_execution(&mut tx, execution_id, KIND_AGENT).await? {
            return Err(Error::NotFound(format!("execution {}", execution_id)));
        }
        write_tool_call(&mut tx, execution_id, tool_call).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn list_tool_calls(&self, execution_id: &str) -> Result<Vec<ToolCallRecord>> {
        Ok(self.fetch_tool_calls(execution_id).await?.into_values().collect())
    }

    async fn upsert_task(&self, task: &TaskRecord) -> Result<()> {
        validate_task(task)?;
        let row = ExecutionRow::from_task(task)?;

        let mut tx = self.pool.begin().await?;
        row.write(&mut tx).await?;
        sqlx::query("DELETE FROM tool_calls WHERE execution_id = ?1")
            .bind(&task.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM steps WHERE execution_id = ?1")
            .bind(&task.id)
            .execute(&mut *tx)
            .await?;
        for step in task.steps.values() {
            write_step(&mut tx, &task.id, step).await?;
        }
        tx.commit().await?;

        debug!("Saved task {}", task.id);
        Ok(())
    }

    async fn get_task(&self, id: &str) -> Result<Option<TaskRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM executions WHERE id = ?1 AND kind = ?2",
            EXECUTION_COLUMNS
        ))
        .bind(id)
        .bind(KIND_TASK)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let Some(mut task) = decode_or_skip("task", task_from_row(&row)) else {
            return Ok(None);
        };
        task.steps = self.fetch_steps(id).await?;
        Ok(Some(task))
    }

    async fn list_tasks(&self) -> Result<Vec<TaskRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM executions WHERE kind = ?1",
            EXECUTION_COLUMNS
        ))
        .bind(KIND_TASK)
        .fetch_all(&self.pool)
        .await?;

        let mut tasks = Vec::with_capacity(rows.len());
        for row in &rows {
            if let Some(mut task) = decode_or_skip("task", task_from_row(row)) {
                task.steps = self.fetch_steps(&task.id).await?;
                tasks.push(task);
            }
        }
        sort_chronologically(&mut tasks);
        Ok(tasks)
    }

    async fn upsert_step(&self, task_id: &str, step: &ExecutionRecord) -> Result<()> {
        validate_id(task_id)?;
        validate_execution(step)?;
        let mut tx = self.pool.begin().await?;
        if !has_execution(&mut tx, task_id, KIND_TASK).await? {
            return Err(Error::NotFound(format!("task {}", task_id)));
        }
        write_step(&mut tx, task_id, step).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn list_steps(&self, task_id: &str) -> Result<Vec<ExecutionRecord>> {
        let mut steps: Vec<ExecutionRecord> =
            self.fetch_steps(task_id).await?.into_values().collect();
        sort_chronologically(&mut steps);
        Ok(steps)
    }

    async fn upsert_agent(&self, agent: &AgentRecord) -> Result<()> {
        validate_id(&agent.agent_id)?;
        sqlx::query(
            r"
            INSERT INTO agents (agent_id, agent_name, system_prompt, description, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(agent_id) DO UPDATE SET
                agent_name = excluded.agent_name,
                system_prompt = excluded.system_prompt,
                description = excluded.description,
                created_at = excluded.created_at
            ",
        )
        .bind(&agent.agent_id)
        .bind(&agent.agent_name)
        .bind(agent.system_prompt.as_deref())
        .bind(agent.description.as_deref())
        .bind(format_ts(&agent.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_agent(&self, agent_id: &str) -> Result<Option<AgentRecord>> {
        let row = sqlx::query(
            "SELECT agent_id, agent_name, system_prompt, description, created_at \
             FROM agents WHERE agent_id = ?1",
        )
        .bind(agent_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.and_then(|row| decode_or_skip("agent", agent_from_row(&row))))
    }

    async fn list_agents(&self) -> Result<Vec<AgentRecord>> {
        let rows = sqlx::query(
            "SELECT agent_id, agent_name, system_prompt, description, created_at FROM agents",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut agents: Vec<AgentRecord> = rows
            .iter()
            .filter_map(|row| decode_or_skip("agent", agent_from_row(row)))
            .collect();
        agents.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.agent_id.cmp(&b.agent_id))
        });
        Ok(agents)
    }

    async fn delete_agent(&self, agent_id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let deleted = sqlx::query("DELETE FROM agents WHERE agent_id = ?1")
            .bind(agent_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM executions WHERE kind = ?1 AND owner_id = ?2")
            .bind(KIND_AGENT)
            .bind(agent_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        if deleted.rows_affected() > 0 {
            info!("Deleted agent {}", agent_id);
        }
        Ok(())
    }
}
