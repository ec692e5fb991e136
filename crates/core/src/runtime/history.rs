//! Replaying finished executions as conversation history

use serde::{Deserialize, Serialize};

use super::model::ExecutionRecord;

/// Message role in a chat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

/// A message reconstructed from an execution record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Execution the message came from
    pub execution_id: String,
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(execution_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            execution_id: execution_id.into(),
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(execution_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            execution_id: execution_id.into(),
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// Turn completed executions into alternating user/assistant messages.
///
/// Executions that did not complete are skipped entirely, as are empty
/// query or reply texts. Input order is preserved.
pub fn conversation<'a>(
    records: impl IntoIterator<Item = &'a ExecutionRecord>,
) -> Vec<ChatMessage> {
    let mut messages = Vec::new();
    for record in records {
        if !record.is_completed() {
            continue;
        }

        if let Some(query) = record.query.as_ref().filter(|q| !q.text.is_empty()) {
            messages.push(ChatMessage::user(&record.id, &query.text));
        }
        if let Some(reply) = record.reply.as_ref().filter(|r| !r.text.is_empty()) {
            messages.push(ChatMessage::assistant(&record.id, &reply.text));
        }
    }
    messages
}
