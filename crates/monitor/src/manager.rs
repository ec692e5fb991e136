//! Monitor manager - registry of live monitors backed by a repository

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use runtrace_core::repository::sort_chronologically;
use runtrace_core::{Content, ExecutionRecord, RuntimeRepository, TaskRecord};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::config::MonitorConfig;
use crate::error::{MonitorError, Result};
use crate::event::Subscriber;
use crate::monitor::Monitor;
use crate::record::MonitoredRecord;

/// Manager of agent execution monitors
pub type ExecutionMonitorManager = MonitorManager<ExecutionRecord>;
/// Manager of task monitors
pub type TaskMonitorManager = MonitorManager<TaskRecord>;

/// Request to create a monitored record
#[derive(Debug, Clone)]
pub struct MonitorRequest {
    /// Agent (or planner) owning the execution
    pub owner_id: String,
    /// Display name
    pub name: String,
    /// Query known up front; `start` may still supply one
    pub query: Option<Content>,
}

impl MonitorRequest {
    pub fn new(owner_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            name: name.into(),
            query: None,
        }
    }

    pub fn with_query(mut self, query: impl Into<Content>) -> Self {
        self.query = Some(query.into());
        self
    }
}

/// Registry of monitors by record id.
///
/// With a repository configured, new records are persisted on creation and
/// records missing from memory are loaded on demand.
pub struct MonitorManager<R> {
    config: MonitorConfig,
    repository: Option<Arc<dyn RuntimeRepository>>,
    monitors: Arc<RwLock<HashMap<String, Arc<Monitor<R>>>>>,
}

impl<R: MonitoredRecord> Default for MonitorManager<R> {
    fn default() -> Self {
        Self::new(MonitorConfig::default())
    }
}

impl<R: MonitoredRecord> MonitorManager<R> {
    /// Create an in-memory manager
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            config,
            repository: None,
            monitors: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Back the manager with a repository
    pub fn with_repository(mut self, repository: Arc<dyn RuntimeRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn repository(&self) -> Option<&Arc<dyn RuntimeRepository>> {
        self.repository.as_ref()
    }

    /// Allocate a pending record and its monitor.
    ///
    /// The subscriber, if any, is wired before the monitor is returned so it
    /// sees every event. With a repository the pending record is written
    /// first; on failure nothing is registered.
    pub async fn create(
        &self,
        request: MonitorRequest,
        subscriber: Option<Arc<dyn Subscriber<R>>>,
    ) -> Result<(String, Arc<Monitor<R>>)> {
        let record = R::pending(&request);
        let id = record.record_id().to_string();

        if let Some(repository) = &self.repository {
            record.save(repository.as_ref()).await?;
        }

        let monitor = Arc::new(Monitor::new(
            record,
            self.repository.clone(),
            self.config.clone(),
        ));
        if let Some(subscriber) = subscriber {
            monitor.subscribe(subscriber).await;
        }

        {
            let mut monitors = self.monitors.write().await;
            monitors.insert(id.clone(), Arc::clone(&monitor));
        }
        info!("Created {} {} for {}", R::KIND, id, request.owner_id);

        Ok((id, monitor))
    }

    /// Look up a monitor, loading it from the repository when it is not in
    /// memory
    pub async fn get(&self, id: &str) -> Result<Option<Arc<Monitor<R>>>> {
        {
            let monitors = self.monitors.read().await;
            if let Some(monitor) = monitors.get(id) {
                return Ok(Some(Arc::clone(monitor)));
            }
        }

        let Some(repository) = &self.repository else {
            return Ok(None);
        };

        // Read-through and delete both hold the write lock.
        let mut monitors = self.monitors.write().await;
        if let Some(monitor) = monitors.get(id) {
            return Ok(Some(Arc::clone(monitor)));
        }
        let Some(record) = R::load(repository.as_ref(), id).await? else {
            return Ok(None);
        };

        debug!("Rehydrated {} {} from repository", R::KIND, id);
        let monitor = Arc::new(Monitor::new(
            record,
            Some(Arc::clone(repository)),
            self.config.clone(),
        ));
        monitors.insert(id.to_string(), Arc::clone(&monitor));
        Ok(Some(monitor))
    }

    /// Cancel a running execution by id
    pub async fn cancel(&self, id: &str) -> Result<()> {
        let monitor = self
            .get(id)
            .await?
            .ok_or_else(|| MonitorError::not_found(id))?;
        monitor.cancel().await
    }

    /// Snapshots of every known record: in-memory monitors plus persisted
    /// records, the in-memory copy winning for a shared id
    pub async fn list(&self) -> Result<Vec<R>> {
        let monitors: Vec<Arc<Monitor<R>>> = {
            let monitors = self.monitors.read().await;
            monitors.values().cloned().collect()
        };
        let live = join_all(monitors.iter().map(|monitor| monitor.snapshot())).await;

        let mut by_id: HashMap<String, R> = HashMap::new();
        if let Some(repository) = &self.repository {
            for record in R::load_all(repository.as_ref()).await? {
                by_id.insert(record.record_id().to_string(), record);
            }
        }
        for record in live {
            by_id.insert(record.record_id().to_string(), record);
        }

        let mut records: Vec<R> = by_id.into_values().collect();
        sort_chronologically(&mut records);
        Ok(records)
    }

    /// Remove a record from memory and storage, nested tool calls and steps
    /// included. Returns whether a live monitor was dropped; unknown ids are
    /// not an error.
    ///
    /// Handles to a deleted monitor keep working in memory but no longer
    /// write to the repository.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let mut monitors = self.monitors.write().await;
        let monitor = monitors.remove(id);
        if let Some(monitor) = &monitor {
            monitor.detach().await;
        }
        if let Some(repository) = &self.repository {
            R::remove(repository.as_ref(), id).await?;
        }
        drop(monitors);

        let removed = monitor.is_some();
        if removed {
            info!("Deleted {} {}", R::KIND, id);
        }
        Ok(removed)
    }

    /// Number of monitors held in memory
    pub async fn len(&self) -> usize {
        self.monitors.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.monitors.read().await.is_empty()
    }

    /// Drop every in-memory monitor. Persisted records are kept.
    pub async fn clear(&self) {
        self.monitors.write().await.clear();
    }
}
