//! Records a monitor can own: agent executions and tasks

use async_trait::async_trait;
use runtrace_core::repository::Chronological;
use runtrace_core::{
    Content, ExecutionRecord, ExecutionStatus, Outcome, RuntimeRepository, TaskRecord,
    TransitionError,
};

use crate::manager::MonitorRequest;

/// Lifecycle and storage hooks shared by every monitored record type
#[async_trait]
pub trait MonitoredRecord: Chronological + Clone + Send + Sync + 'static {
    /// Label used in log lines
    const KIND: &'static str;

    /// Fresh `Pending` record for a create request
    fn pending(request: &MonitorRequest) -> Self;

    fn status(&self) -> ExecutionStatus;

    fn apply_start(&mut self, query: Option<Content>) -> Result<(), TransitionError>;

    fn apply_finish(&mut self, outcome: Outcome) -> Result<(), TransitionError>;

    async fn save(&self, repository: &dyn RuntimeRepository) -> runtrace_core::Result<()>;

    async fn load(
        repository: &dyn RuntimeRepository,
        id: &str,
    ) -> runtrace_core::Result<Option<Self>>;

    async fn load_all(repository: &dyn RuntimeRepository) -> runtrace_core::Result<Vec<Self>>;

    async fn remove(repository: &dyn RuntimeRepository, id: &str) -> runtrace_core::Result<()>;
}

#[async_trait]
impl MonitoredRecord for ExecutionRecord {
    const KIND: &'static str = "execution";

    fn pending(request: &MonitorRequest) -> Self {
        let mut record = ExecutionRecord::new(&request.owner_id, &request.name);
        record.query = request.query.clone();
        record
    }

    fn status(&self) -> ExecutionStatus {
        self.status
    }

    fn apply_start(&mut self, query: Option<Content>) -> Result<(), TransitionError> {
        self.start(query)
    }

    fn apply_finish(&mut self, outcome: Outcome) -> Result<(), TransitionError> {
        self.finish(outcome)
    }

    async fn save(&self, repository: &dyn RuntimeRepository) -> runtrace_core::Result<()> {
        repository.upsert_execution(self).await
    }

    async fn load(
        repository: &dyn RuntimeRepository,
        id: &str,
    ) -> runtrace_core::Result<Option<Self>> {
        repository.get_execution(id).await
    }

    async fn load_all(repository: &dyn RuntimeRepository) -> runtrace_core::Result<Vec<Self>> {
        repository.list_executions(None).await
    }

    async fn remove(repository: &dyn RuntimeRepository, id: &str) -> runtrace_core::Result<()> {
        repository.delete_execution(id).await
    }
}

#[async_trait]
impl MonitoredRecord for TaskRecord {
    const KIND: &'static str = "task";

    fn pending(request: &MonitorRequest) -> Self {
        let mut task = TaskRecord::new(&request.owner_id, &request.name);
        task.query = request.query.clone();
        task
    }

    fn status(&self) -> ExecutionStatus {
        self.status
    }

    fn apply_start(&mut self, query: Option<Content>) -> Result<(), TransitionError> {
        self.start(query)
    }

    fn apply_finish(&mut self, outcome: Outcome) -> Result<(), TransitionError> {
        self.finish(outcome)
    }

    async fn save(&self, repository: &dyn RuntimeRepository) -> runtrace_core::Result<()> {
        repository.upsert_task(self).await
    }

    async fn load(
        repository: &dyn RuntimeRepository,
        id: &str,
    ) -> runtrace_core::Result<Option<Self>> {
        repository.get_task(id).await
    }

    async fn load_all(repository: &dyn RuntimeRepository) -> runtrace_core::Result<Vec<Self>> {
        repository.list_tasks().await
    }

    async fn remove(repository: &dyn RuntimeRepository, id: &str) -> runtrace_core::Result<()> {
        repository.delete_task(id).await
    }
}
