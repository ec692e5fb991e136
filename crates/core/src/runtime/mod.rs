//! Runtime module
//!
//! Records describing agent executions, tasks and their tool calls.

mod history;
mod model;
mod status;

pub use history::{conversation, ChatMessage, MessageRole};
pub use model::*;
pub use status::{ExecutionStatus, ToolCallStatus};
