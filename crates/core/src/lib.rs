//! Core library for runtrace
//!
//! This crate contains the data side of execution monitoring:
//! - Execution, tool call, task and agent records with their lifecycle rules
//! - Durable repositories (JSON files or SQLite) behind one trait

pub mod error;
pub mod repository;
pub mod runtime;

pub use error::Error;
pub use repository::{
    FileRuntimeRepository, RepositoryConfig, RuntimeRepository, SqliteRuntimeRepository,
};
pub use runtime::{
    AgentRecord, Content, ExecutionRecord, ExecutionStatus, Outcome, TaskRecord, ToolCallOutcome,
    ToolCallRecord, ToolCallStatus, TransitionError,
};

pub type Result<T> = std::result::Result<T, Error>;
