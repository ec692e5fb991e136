//! File-based runtime repository
//!
//! Directory structure:
//! ```text
//! <root>/
//!   agents/
//!     {agent_id}.json
//!   execution_{id}/
//!     execution.json          # Record without its tool calls
//!     tool_calls/
//!       {tool_use_id}.json
//!   task_{id}/
//!     task.json               # Record without its steps
//!     steps/
//!       {step_id}.json        # Full step record, tool calls inline
//! ```
//!
//! Ids are URL-encoded into file names. Documents are pretty JSON and are
//! written to a temporary file first, then renamed into place.

use std::collections::{BTreeMap, HashSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::{
    sort_chronologically, validate_execution, validate_id, validate_task, RuntimeRepository,
};
use crate::runtime::{AgentRecord, ExecutionRecord, TaskRecord, ToolCallRecord};
use crate::{Error, Result};

const EXECUTION_PREFIX: &str = "execution_";
const TASK_PREFIX: &str = "task_";
const EXECUTION_FILE: &str = "execution.json";
const TASK_FILE: &str = "task.json";
const TOOL_CALLS_DIR: &str = "tool_calls";
const STEPS_DIR: &str = "steps";
const AGENTS_DIR: &str = "agents";

/// Repository storing one directory per execution
pub struct FileRuntimeRepository {
    root: PathBuf,
    /// Serializes writers; readers share
    lock: RwLock<()>,
}

/// File-name form of an id. Rejects ids that would escape their directory.
fn encode_id(id: &str) -> Result<String> {
    validate_id(id)?;
    Ok(urlencoding::encode(id).into_owned())
}

fn decode_stem(path: &Path) -> Option<String> {
    if path.extension().and_then(|e| e.to_str()) != Some("json") {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    urlencoding::decode(stem).ok().map(|s| s.into_owned())
}

fn is_not_found(err: &std::io::Error) -> bool {
    err.kind() == ErrorKind::NotFound
}

async fn exists(path: &Path) -> bool {
    fs::metadata(path).await.is_ok()
}

async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let content = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, content).await?;
    fs::rename(&tmp, path).await?;
    debug!("Saved {}", path.display());
    Ok(())
}

/// Read a document; missing or malformed documents are treated as absent.
async fn read_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let content = match fs::read(path).await {
        Ok(content) => content,
        Err(e) if is_not_found(&e) => return None,
        Err(e) => {
            warn!("Failed to read {}: {}", path.display(), e);
            return None;
        }
    };

    match serde_json::from_slice(&content) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Ignoring malformed document {}: {}", path.display(), e);
            None
        }
    }
}

/// Serialize a record without one of its nested collections
fn document_without<T: Serialize>(record: &T, nested: &str) -> Result<serde_json::Value> {
    let mut value = serde_json::to_value(record)?;
    if let Some(map) = value.as_object_mut() {
        map.remove(nested);
    }
    Ok(value)
}

/// Load every `{key}.json` document in a directory, keyed by decoded name
async fn read_nested<T: DeserializeOwned>(dir: &Path) -> Result<BTreeMap<String, T>> {
    let mut items = BTreeMap::new();
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if is_not_found(&e) => return Ok(items),
        Err(e) => return Err(e.into()),
    };

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let Some(key) = decode_stem(&path) else {
            continue;
        };
        if let Some(item) = read_json(&path).await {
            items.insert(key, item);
        }
    }
    Ok(items)
}

/// Replace the contents of a nested directory with exactly `items`
async fn replace_nested<T: Serialize>(dir: &Path, items: &BTreeMap<String, T>) -> Result<()> {
    fs::create_dir_all(dir).await?;

    let mut keep = HashSet::new();
    for (key, item) in items {
        let stem = encode_id(key)?;
        write_json(&dir.join(format!("{}.json", stem)), item).await?;
        keep.insert(key.clone());
    }

    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if let Some(key) = decode_stem(&path) {
            if !keep.contains(&key) {
                fs::remove_file(&path).await?;
            }
        }
    }
    Ok(())
}

async fn remove_dir_if_exists(dir: &Path) -> Result<bool> {
    match fs::remove_dir_all(dir).await {
        Ok(()) => Ok(true),
        Err(e) if is_not_found(&e) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

impl FileRuntimeRepository {
    /// Create a repository rooted at `root`, creating the directory if needed
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            lock: RwLock::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding one agent execution
    pub fn execution_dir(&self, id: &str) -> Result<PathBuf> {
        Ok(self.root.join(format!("{}{}", EXECUTION_PREFIX, encode_id(id)?)))
    }

    /// Directory holding one task
    pub fn task_dir(&self, id: &str) -> Result<PathBuf> {
        Ok(self.root.join(format!("{}{}", TASK_PREFIX, encode_id(id)?)))
    }

    fn agent_path(&self, agent_id: &str) -> Result<PathBuf> {
        Ok(self
            .root
            .join(AGENTS_DIR)
            .join(format!("{}.json", encode_id(agent_id)?)))
    }

    /// Top-level directories following a naming prefix
    async fn scan(&self, prefix: &str) -> Result<Vec<PathBuf>> {
        let mut dirs = Vec::new();
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if is_not_found(&e) => return Ok(dirs),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if !name.starts_with(prefix) {
                continue;
            }
            match entry.file_type().await {
                Ok(file_type) if file_type.is_dir() => dirs.push(entry.path()),
                Ok(_) => continue,
                Err(e) => {
                    warn!("Failed to read directory entry {}: {}", name, e);
                    continue;
                }
            }
        }
        Ok(dirs)
    }

    async fn load_execution(&self, dir: &Path) -> Result<Option<ExecutionRecord>> {
        let Some(mut record) = read_json::<ExecutionRecord>(&dir.join(EXECUTION_FILE)).await else {
            return Ok(None);
        };
        record.tool_calls = read_nested(&dir.join(TOOL_CALLS_DIR)).await?;
        Ok(Some(record))
    }

    async fn load_task(&self, dir: &Path) -> Result<Option<TaskRecord>> {
        let Some(mut task) = read_json::<TaskRecord>(&dir.join(TASK_FILE)).await else {
            return Ok(None);
        };
        task.steps = read_nested(&dir.join(STEPS_DIR)).await?;
        Ok(Some(task))
    }

    async fn remove_execution_dirs(&self, id: &str) -> Result<bool> {
        let removed_execution = remove_dir_if_exists(&self.execution_dir(id)?).await?;
        let removed_task = remove_dir_if_exists(&self.task_dir(id)?).await?;
        Ok(removed_execution || removed_task)
    }
}

#[async_trait]
impl RuntimeRepository for FileRuntimeRepository {
    async fn upsert_execution(&self, record: &ExecutionRecord) -> Result<()> {
        validate_execution(record)?;
        let dir = self.execution_dir(&record.id)?;
        let task_dir = self.task_dir(&record.id)?;
        let _guard = self.lock.write().await;

        remove_dir_if_exists(&task_dir).await?;
        fs::create_dir_all(&dir).await?;
        write_json(&dir.join(EXECUTION_FILE), &document_without(record, "tool_calls")?).await?;
        replace_nested(&dir.join(TOOL_CALLS_DIR), &record.tool_calls).await?;
        Ok(())
    }

    async fn get_execution(&self, id: &str) -> Result<Option<ExecutionRecord>> {
        let Ok(dir) = self.execution_dir(id) else {
            return Ok(None);
        };
        let _guard = self.lock.read().await;
        self.load_execution(&dir).await
    }

    async fn list_executions(&self, owner_id: Option<&str>) -> Result<Vec<ExecutionRecord>> {
        let _guard = self.lock.read().await;
        let mut records = Vec::new();
        for dir in self.scan(EXECUTION_PREFIX).await? {
            if let Some(record) = self.load_execution(&dir).await? {
                if owner_id.map_or(true, |owner| record.owner_id == owner) {
                    records.push(record);
                }
            }
        }
        sort_chronologically(&mut records);
        Ok(records)
    }

    async fn delete_execution(&self, id: &str) -> Result<()> {
        if encode_id(id).is_err() {
            return Ok(());
        }
        let _guard = self.lock.write().await;
        if self.remove_execution_dirs(id).await? {
            info!("Deleted execution {}", id);
        }
        Ok(())
    }

    async fn upsert_tool_call(
        &self,
        execution_id: &str,
        tool_call: &ToolCallRecord,
    ) -> Result<()> {
        let dir = self.execution_dir(execution_id)?;
        let stem = encode_id(&tool_call.tool_use_id)?;
        let _guard = self.lock.write().await;

        if !exists(&dir.join(EXECUTION_FILE)).await {
            return Err(Error::NotFound(format!("execution {}", execution_id)));
        }
        let calls_dir = dir.join(TOOL_CALLS_DIR);
        fs::create_dir_all(&calls_dir).await?;
        write_json(&calls_dir.join(format!("{}.json", stem)), tool_call).await
    }

    async fn list_tool_calls(&self, execution_id: &str) -> Result<Vec<ToolCallRecord>> {
        let Ok(dir) = self.execution_dir(execution_id) else {
            return Ok(Vec::new());
        };
        let _guard = self.lock.read().await;
        let calls: BTreeMap<String, ToolCallRecord> = read_nested(&dir.join(TOOL_CALLS_DIR)).await?;
        Ok(calls.into_values().collect())
    }

    async fn upsert_task(&self, task: &TaskRecord) -> Result<()> {
        validate_task(task)?;
        let dir = self.task_dir(&task.id)?;
        let execution_dir = self.execution_dir(&task.id)?;
        let _guard = self.lock.write().await;

        remove_dir_if_exists(&execution_dir).await?;
        fs::create_dir_all(&dir).await?;
        write_json(&dir.join(TASK_FILE), &document_without(task, "steps")?).await?;
        replace_nested(&dir.join(STEPS_DIR), &task.steps).await?;
        Ok(())
    }

    async fn get_task(&self, id: &str) -> Result<Option<TaskRecord>> {
        let Ok(dir) = self.task_dir(id) else {
            return Ok(None);
        };
        let _guard = self.lock.read().await;
        self.load_task(&dir).await
    }

    async fn list_tasks(&self) -> Result<Vec<TaskRecord>> {
        let _guard = self.lock.read().await;
        let mut tasks = Vec::new();
        for dir in self.scan(TASK_PREFIX).await? {
            if let Some(task) = self.load_task(&dir).await? {
                tasks.push(task);
            }
        }
        sort_chronologically(&mut tasks);
        Ok(tasks)
    }

    async fn upsert_step(&self, task_id: &str, step: &ExecutionRecord) -> Result<()> {
        validate_execution(step)?;
        let dir = self.task_dir(task_id)?;
        let stem = encode_id(&step.id)?;
        let _guard = self.lock.write().await;

        if !exists(&dir.join(TASK_FILE)).await {
            return Err(Error::NotFound(format!("task {}", task_id)));
        }
        let steps_dir = dir.join(STEPS_DIR);
        fs::create_dir_all(&steps_dir).await?;
        write_json(&steps_dir.join(format!("{}.json", stem)), step).await
    }

    async fn list_steps(&self, task_id: &str) -> Result<Vec<ExecutionRecord>> {
        let Ok(dir) = self.task_dir(task_id) else {
            return Ok(Vec::new());
        };
        let _guard = self.lock.read().await;
        let steps: BTreeMap<String, ExecutionRecord> = read_nested(&dir.join(STEPS_DIR)).await?;
        let mut steps: Vec<ExecutionRecord> = steps.into_values().collect();
        sort_chronologically(&mut steps);
        Ok(steps)
    }

    async fn upsert_agent(&self, agent: &AgentRecord) -> Result<()> {
        let path = self.agent_path(&agent.agent_id)?;
        let _guard = self.lock.write().await;
        fs::create_dir_all(self.root.join(AGENTS_DIR)).await?;
        write_json(&path, agent).await
    }

    async fn get_agent(&self, agent_id: &str) -> Result<Option<AgentRecord>> {
        let Ok(path) = self.agent_path(agent_id) else {
            return Ok(None);
        };
        let _guard = self.lock.read().await;
        Ok(read_json(&path).await)
    }

    async fn list_agents(&self) -> Result<Vec<AgentRecord>> {
        let _guard = self.lock.read().await;
        let agents: BTreeMap<String, AgentRecord> = read_nested(&self.root.join(AGENTS_DIR)).await?;
        let mut agents: Vec<AgentRecord> = agents.into_values().collect();
        agents.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.agent_id.cmp(&b.agent_id))
        });
        Ok(agents)
    }

    async fn delete_agent(&self, agent_id: &str) -> Result<()> {
        let Ok(path) = self.agent_path(agent_id) else {
            return Ok(());
        };
        let _guard = self.lock.write().await;

        match fs::remove_file(&path).await {
            Ok(()) => info!("Deleted agent {}", agent_id),
            Err(e) if is_not_found(&e) => {}
            Err(e) => return Err(e.into()),
        }

        for dir in self.scan(EXECUTION_PREFIX).await? {
            let owned = read_json::<ExecutionRecord>(&dir.join(EXECUTION_FILE))
                .await
                .is_some_and(|record| record.owner_id == agent_id);
            if owned {
                remove_dir_if_exists(&dir).await?;
            }
        }
        Ok(())
    }
}
