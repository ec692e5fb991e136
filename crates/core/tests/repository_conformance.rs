//! Both repository backends must behave identically. Every check below runs
//! once against the file store and once against SQLite.

use std::sync::Arc;

use chrono::{Duration, Utc};
use runtrace_core::{
    AgentRecord, Error, ExecutionRecord, ExecutionStatus, FileRuntimeRepository, Outcome,
    RuntimeRepository, SqliteRuntimeRepository, TaskRecord, ToolCallRecord, ToolCallStatus,
};
use serde_json::json;
use tempfile::TempDir;

/// Keeps the temp dir alive for the lifetime of the repository
struct Fixture {
    repo: Arc<dyn RuntimeRepository>,
    _dir: Option<TempDir>,
}

async fn file_fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let repo = FileRuntimeRepository::new(dir.path().join("store")).await.unwrap();
    Fixture {
        repo: Arc::new(repo),
        _dir: Some(dir),
    }
}

async fn sqlite_fixture() -> Fixture {
    let repo = SqliteRuntimeRepository::in_memory().await.unwrap();
    Fixture {
        repo: Arc::new(repo),
        _dir: None,
    }
}

fn with_tool_calls(count: usize) -> ExecutionRecord {
    let mut record = ExecutionRecord::new("agent-1", "Calc").with_query("What is 2+3?");
    record.start(None).unwrap();
    for i in 0..count {
        let id = format!("tool_{}", i);
        record.open_tool_call(&id, "calculator", json!({"expression": "2+3", "n": i})).unwrap();
        if i % 2 == 0 {
            record
                .close_tool_call(&id, json!({"value": 5}), ToolCallStatus::Success)
                .unwrap();
        }
    }
    record.finish(Outcome::success("5")).unwrap();
    record
}

async fn round_trip_preserves_every_field(repo: Arc<dyn RuntimeRepository>) {
    for count in [0, 1, 5] {
        let record = with_tool_calls(count);
        repo.upsert_execution(&record).await.unwrap();

        let loaded = repo.get_execution(&record.id).await.unwrap().unwrap();
        assert_eq!(loaded, record);
        assert_eq!(loaded.duration(), record.duration());
        assert_eq!(repo.list_tool_calls(&record.id).await.unwrap().len(), count);
    }
}

async fn pending_record_round_trips(repo: Arc<dyn RuntimeRepository>) {
    let record = ExecutionRecord::new("agent-1", "Idle");
    repo.upsert_execution(&record).await.unwrap();

    let loaded = repo.get_execution(&record.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, ExecutionStatus::Pending);
    assert!(loaded.query.is_none());
    assert!(loaded.started_at.is_none());
    assert_eq!(loaded, record);
}

async fn upsert_is_idempotent_and_replaces(repo: Arc<dyn RuntimeRepository>) {
    let mut record = ExecutionRecord::new("agent-1", "Calc");
    record.start(Some("2+3".into())).unwrap();
    record.open_tool_call("a", "calculator", json!({})).unwrap();
    record.open_tool_call("b", "calculator", json!({})).unwrap();

    repo.upsert_execution(&record).await.unwrap();
    repo.upsert_execution(&record).await.unwrap();
    assert_eq!(repo.list_executions(None).await.unwrap().len(), 1);
    assert_eq!(repo.list_tool_calls(&record.id).await.unwrap().len(), 2);

    record.tool_calls.remove("b");
    repo.upsert_execution(&record).await.unwrap();
    let calls = repo.list_tool_calls(&record.id).await.unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].tool_use_id, "a");
}

async fn delete_cascades_to_tool_calls(repo: Arc<dyn RuntimeRepository>) {
    let record = with_tool_calls(3);
    repo.upsert_execution(&record).await.unwrap();

    repo.delete_execution(&record.id).await.unwrap();
    assert!(repo.get_execution(&record.id).await.unwrap().is_none());
    assert!(repo.list_tool_calls(&record.id).await.unwrap().is_empty());

    // Deleting again, or something that never existed, is a no-op.
    repo.delete_execution(&record.id).await.unwrap();
    repo.delete_execution("never-existed").await.unwrap();
}

async fn get_missing_is_none(repo: Arc<dyn RuntimeRepository>) {
    assert!(repo.get_execution("missing").await.unwrap().is_none());
    assert!(repo.get_task("missing").await.unwrap().is_none());
    assert!(repo.get_agent("missing").await.unwrap().is_none());
    assert!(repo.list_steps("missing").await.unwrap().is_empty());
}

async fn list_orders_by_start_then_creation(repo: Arc<dyn RuntimeRepository>) {
    let now = Utc::now();

    let mut late = ExecutionRecord::new("agent-1", "late").with_id("late");
    late.created_at = now - Duration::seconds(30);
    late.started_at = Some(now);

    let mut pending = ExecutionRecord::new("agent-2", "pending").with_id("pending");
    pending.created_at = now - Duration::seconds(10);

    let mut early = ExecutionRecord::new("agent-1", "early").with_id("early");
    early.created_at = now - Duration::seconds(5);
    early.started_at = Some(now - Duration::seconds(20));

    for record in [&late, &pending, &early] {
        repo.upsert_execution(record).await.unwrap();
    }

    let ids: Vec<String> = repo
        .list_executions(None)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(ids, vec!["early", "pending", "late"]);

    let owned: Vec<String> = repo
        .list_executions(Some("agent-1"))
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(owned, vec!["early", "late"]);
    assert!(repo.list_executions(Some("nobody")).await.unwrap().is_empty());
}

async fn tool_call_upserts_need_a_parent(repo: Arc<dyn RuntimeRepository>) {
    let call = ToolCallRecord::new("t1", "search", json!({"q": "rust"}));
    let err = repo.upsert_tool_call("ghost", &call).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));

    let mut record = ExecutionRecord::new("agent-1", "Search");
    record.start(None).unwrap();
    repo.upsert_execution(&record).await.unwrap();

    repo.upsert_tool_call(&record.id, &call).await.unwrap();
    let mut closed = call.clone();
    closed.status = ToolCallStatus::Failure;
    closed.tool_result = Some(json!("timeout"));
    closed.started_at = Some(Utc::now());
    closed.completed_at = Some(Utc::now());
    repo.upsert_tool_call(&record.id, &closed).await.unwrap();

    assert_eq!(repo.list_tool_calls(&record.id).await.unwrap(), vec![closed.clone()]);
    let loaded = repo.get_execution(&record.id).await.unwrap().unwrap();
    assert_eq!(loaded.tool_call("t1"), Some(&closed));
}

async fn path_like_ids_are_rejected(repo: Arc<dyn RuntimeRepository>) {
    for id in ["", ".", ".."] {
        let record = ExecutionRecord::new("agent-1", "Bad").with_id(id);
        assert!(matches!(
            repo.upsert_execution(&record).await,
            Err(Error::InvalidInput(_))
        ));
        assert!(repo.get_execution(id).await.unwrap().is_none());
        repo.delete_execution(id).await.unwrap();
    }

    // Separators are fine; they never escape the store.
    let record = ExecutionRecord::new("agent/1", "Slash").with_id("a/b");
    repo.upsert_execution(&record).await.unwrap();
    assert_eq!(repo.get_execution("a/b").await.unwrap(), Some(record));
}

async fn tasks_round_trip_with_steps(repo: Arc<dyn RuntimeRepository>) {
    let mut task = TaskRecord::new("planner", "Research").with_query("Find papers");
    task.start(None).unwrap();
    task.begin_step("search", "Searcher", Some("papers on rust".into()))
        .unwrap();
    {
        let step = task.step_mut("search").unwrap();
        step.open_tool_call("t1", "web_search", json!({"q": "rust"})).unwrap();
        step.close_tool_call("t1", json!(["a", "b"]), ToolCallStatus::Success)
            .unwrap();
        step.finish(Outcome::success("2 papers")).unwrap();
    }
    task.begin_step("summarize", "Summarizer", None).unwrap();
    repo.upsert_task(&task).await.unwrap();

    let loaded = repo.get_task(&task.id).await.unwrap().unwrap();
    assert_eq!(loaded, task);
    assert_eq!(loaded.steps["search"].owner_id, task.id);

    let steps = repo.list_steps(&task.id).await.unwrap();
    let ids: Vec<&str> = steps.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["search", "summarize"]);

    // Tasks and executions live in separate listings.
    assert_eq!(repo.list_tasks().await.unwrap().len(), 1);
    assert!(repo.list_executions(None).await.unwrap().is_empty());
    assert!(repo.get_execution(&task.id).await.unwrap().is_none());
}

async fn step_upserts_need_a_task(repo: Arc<dyn RuntimeRepository>) {
    let step = ExecutionRecord::new("ghost", "Step").with_id("s1");
    let err = repo.upsert_step("ghost", &step).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));

    let mut task = TaskRecord::new("planner", "Plan");
    task.start(None).unwrap();
    repo.upsert_task(&task).await.unwrap();

    let mut step = ExecutionRecord::new(task.id.clone(), "Step").with_id("s1");
    step.start(Some("go".into())).unwrap();
    repo.upsert_step(&task.id, &step).await.unwrap();
    step.finish(Outcome::failure("no route")).unwrap();
    repo.upsert_step(&task.id, &step).await.unwrap();

    assert_eq!(repo.list_steps(&task.id).await.unwrap(), vec![step.clone()]);
    let loaded = repo.get_task(&task.id).await.unwrap().unwrap();
    assert_eq!(loaded.steps.get("s1"), Some(&step));
    // A failed step does not change the task.
    assert_eq!(loaded.status, ExecutionStatus::Executing);
}

async fn deleting_a_task_removes_its_steps(repo: Arc<dyn RuntimeRepository>) {
    let mut task = TaskRecord::new("planner", "Plan");
    task.start(None).unwrap();
    task.begin_step("s1", "Step", None).unwrap();
    repo.upsert_task(&task).await.unwrap();

    repo.delete_task(&task.id).await.unwrap();
    assert!(repo.get_task(&task.id).await.unwrap().is_none());
    assert!(repo.list_steps(&task.id).await.unwrap().is_empty());
    assert!(repo.list_tasks().await.unwrap().is_empty());

    // A task id is deletable through the execution API too.
    repo.upsert_task(&task).await.unwrap();
    repo.delete_execution(&task.id).await.unwrap();
    assert!(repo.get_task(&task.id).await.unwrap().is_none());
}

async fn switching_kind_replaces_the_record(repo: Arc<dyn RuntimeRepository>) {
    let mut task = TaskRecord::new("planner", "Plan").with_id("shared");
    task.start(None).unwrap();
    task.begin_step("s1", "Step", None).unwrap();
    repo.upsert_task(&task).await.unwrap();

    let record = ExecutionRecord::new("agent-1", "Calc").with_id("shared");
    repo.upsert_execution(&record).await.unwrap();

    assert!(repo.get_task("shared").await.unwrap().is_none());
    assert!(repo.list_steps("shared").await.unwrap().is_empty());
    assert_eq!(repo.get_execution("shared").await.unwrap(), Some(record));
}

async fn agents_and_cascade(repo: Arc<dyn RuntimeRepository>) {
    let mut first = AgentRecord::new("calc", "Calculator").with_system_prompt("You add numbers.");
    first.created_at = Utc::now() - Duration::seconds(5);
    let second = AgentRecord::new("writer", "Writer").with_description("Drafts prose");
    repo.upsert_agent(&second).await.unwrap();
    repo.upsert_agent(&first).await.unwrap();

    assert_eq!(repo.get_agent("calc").await.unwrap(), Some(first.clone()));
    assert_eq!(repo.list_agents().await.unwrap(), vec![first.clone(), second.clone()]);

    let owned = ExecutionRecord::new("calc", "Calc run");
    let other = ExecutionRecord::new("writer", "Draft");
    repo.upsert_execution(&owned).await.unwrap();
    repo.upsert_execution(&other).await.unwrap();

    repo.delete_agent("calc").await.unwrap();
    assert!(repo.get_agent("calc").await.unwrap().is_none());
    assert!(repo.get_execution(&owned.id).await.unwrap().is_none());
    assert_eq!(repo.get_execution(&other.id).await.unwrap(), Some(other));

    repo.delete_agent("calc").await.unwrap();
}

async fn rejected_upsert_leaves_stored_copy(repo: Arc<dyn RuntimeRepository>) {
    let mut record = ExecutionRecord::new("agent-1", "Calc");
    record.start(Some("2+2".into())).unwrap();
    record.open_tool_call("t1", "calculator", json!({})).unwrap();
    repo.upsert_execution(&record).await.unwrap();
    let stored = repo.get_execution(&record.id).await.unwrap().unwrap();

    let mut broken = record.clone();
    broken.finish(Outcome::success("4")).unwrap();
    broken
        .tool_calls
        .insert(String::new(), ToolCallRecord::new("", "calculator", json!({})));
    let err = repo.upsert_execution(&broken).await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
    assert_eq!(repo.get_execution(&record.id).await.unwrap().unwrap(), stored);

    let mut task = TaskRecord::new("planner", "Survey");
    task.start(None).unwrap();
    task.begin_step("s1", "Searcher", None).unwrap();
    repo.upsert_task(&task).await.unwrap();

    let mut broken_task = task.clone();
    broken_task.finish(Outcome::failure("gave up")).unwrap();
    let step = ExecutionRecord::new(task.id.clone(), "Writer").with_id("..");
    broken_task.steps.insert("..".to_string(), step);
    let err = repo.upsert_task(&broken_task).await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
    assert_eq!(repo.get_task(&task.id).await.unwrap().unwrap(), task);
}

async fn null_tool_result_round_trips(repo: Arc<dyn RuntimeRepository>) {
    let mut record = ExecutionRecord::new("agent-1", "Lookup");
    record.start(None).unwrap();
    record.open_tool_call("t1", "lookup", json!({"key": "missing"})).unwrap();
    record
        .close_tool_call("t1", json!(null), ToolCallStatus::Success)
        .unwrap();
    record.finish(Outcome::success("nothing found")).unwrap();

    repo.upsert_execution(&record).await.unwrap();
    let loaded = repo.get_execution(&record.id).await.unwrap().unwrap();
    assert_eq!(loaded, record);
    assert!(loaded.tool_call("t1").unwrap().tool_result.is_none());
}

macro_rules! conformance {
    ($($check:ident),* $(,)?) => {
        mod file_backend {
            use super::*;
            $(
                #[tokio::test]
                async fn $check() {
                    let fixture = file_fixture().await;
                    super::$check(fixture.repo.clone()).await;
                }
            )*
        }

        mod sqlite_backend {
            use super::*;
            $(
                #[tokio::test]
                async fn $check() {
                    let fixture = sqlite_fixture().await;
                    super::$check(fixture.repo.clone()).await;
                }
            )*
        }
    };
}

conformance!(
    round_trip_preserves_every_field,
    pending_record_round_trips,
    upsert_is_idempotent_and_replaces,
    delete_cascades_to_tool_calls,
    get_missing_is_none,
    list_orders_by_start_then_creation,
    tool_call_upserts_need_a_parent,
    path_like_ids_are_rejected,
    tasks_round_trip_with_steps,
    step_upserts_need_a_task,
    deleting_a_task_removes_its_steps,
    switching_kind_replaces_the_record,
    agents_and_cascade,
    rejected_upsert_leaves_stored_copy,
    null_tool_result_round_trips,
);
