//! Domain entities persisted by the storage layer.

use super::{AssistantId, FileId, MessageId, RunId, ThreadId, ToolId};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A tool definition attached to an assistant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tool {
    /// Unique identifier.
    pub id: ToolId,
    /// Tool kind, e.g. `function` or `file_search`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Function name for function tools.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Human readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Creation timestamp (Unix epoch seconds).
    pub created_at: u64,
}

/// An assistant configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assistant {
    /// Unique identifier.
    pub id: AssistantId,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Model the assistant runs on.
    pub model: String,
    /// System instructions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    /// Tools available to the assistant.
    #[serde(default)]
    pub tools: Vec<Tool>,
    /// Caller supplied key/value pairs.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// Creation timestamp (Unix epoch seconds).
    pub created_at: u64,
}

impl Assistant {
    /// Creates an assistant with a generated id.
    #[must_use]
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            id: AssistantId::generate(),
            name: None,
            model: model.into(),
            instructions: None,
            tools: Vec::new(),
            metadata: BTreeMap::new(),
            created_at: crate::current_timestamp(),
        }
    }
}

/// A conversation thread. Owns messages and runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thread {
    /// Unique identifier.
    pub id: ThreadId,
    /// Assistant the thread was created for, if any.
    ///
    /// Recorded as `parentId` in the stored metadata so assistant cleanup can
    /// find the thread.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assistant_id: Option<AssistantId>,
    /// Caller supplied key/value pairs.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// Creation timestamp (Unix epoch seconds).
    pub created_at: u64,
}

impl Thread {
    /// Creates a thread with a generated id.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: ThreadId::generate(),
            assistant_id: None,
            metadata: BTreeMap::new(),
            created_at: crate::current_timestamp(),
        }
    }

    /// Associates the thread with an assistant.
    #[must_use]
    pub fn with_assistant(mut self, assistant_id: AssistantId) -> Self {
        self.assistant_id = Some(assistant_id);
        self
    }
}

impl Default for Thread {
    fn default() -> Self {
        Self::new()
    }
}

/// Author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// End user.
    User,
    /// Assistant output.
    Assistant,
}

/// A message inside a thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier.
    pub id: MessageId,
    /// Owning thread.
    pub thread_id: ThreadId,
    /// Author role.
    pub role: MessageRole,
    /// Text content.
    pub content: String,
    /// Run that produced this message, for assistant messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<RunId>,
    /// Attached files.
    #[serde(default)]
    pub file_ids: Vec<FileId>,
    /// Creation timestamp (Unix epoch seconds).
    pub created_at: u64,
}

impl Message {
    /// Creates a message in the given thread with a generated id.
    #[must_use]
    pub fn new(thread_id: ThreadId, role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::generate(),
            thread_id,
            role,
            content: content.into(),
            run_id: None,
            file_ids: Vec::new(),
            created_at: crate::current_timestamp(),
        }
    }
}

/// Lifecycle status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Waiting to start.
    Queued,
    /// Executing.
    InProgress,
    /// Waiting on tool outputs from the caller.
    RequiresAction,
    /// Cancellation requested.
    Cancelling,
    /// Cancelled.
    Cancelled,
    /// Failed with an error.
    Failed,
    /// Finished successfully.
    Completed,
    /// Timed out before finishing.
    Expired,
}

impl RunStatus {
    /// Returns the status as a string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::InProgress => "in_progress",
            Self::RequiresAction => "requires_action",
            Self::Cancelling => "cancelling",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
            Self::Completed => "completed",
            Self::Expired => "expired",
        }
    }

    /// Returns `true` for statuses a run never leaves.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Cancelled | Self::Failed | Self::Completed | Self::Expired
        )
    }

    /// Returns `true` if a run may move from `self` to `next`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        match self {
            Self::Queued => matches!(
                next,
                Self::InProgress | Self::Cancelling | Self::Cancelled | Self::Failed | Self::Expired
            ),
            Self::InProgress => matches!(
                next,
                Self::RequiresAction
                    | Self::Cancelling
                    | Self::Completed
                    | Self::Failed
                    | Self::Expired
            ),
            Self::RequiresAction => matches!(
                next,
                Self::InProgress | Self::Cancelling | Self::Failed | Self::Expired
            ),
            Self::Cancelling => matches!(next, Self::Cancelled | Self::Failed),
            Self::Cancelled | Self::Failed | Self::Completed | Self::Expired => false,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An execution of an assistant over a thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Run {
    /// Unique identifier.
    pub id: RunId,
    /// Thread the run executes on.
    pub thread_id: ThreadId,
    /// Assistant being run.
    pub assistant_id: AssistantId,
    /// Current lifecycle status.
    pub status: RunStatus,
    /// Model override for this run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Creation timestamp (Unix epoch seconds).
    pub created_at: u64,
    /// Time the run entered `in_progress`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<u64>,
    /// Time the run reached a terminal status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<u64>,
    /// Error message of a failed run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl Run {
    /// Creates a queued run with a generated id.
    #[must_use]
    pub fn new(thread_id: ThreadId, assistant_id: AssistantId) -> Self {
        Self {
            id: RunId::generate(),
            thread_id,
            assistant_id,
            status: RunStatus::Queued,
            model: None,
            created_at: crate::current_timestamp(),
            started_at: None,
            completed_at: None,
            last_error: None,
        }
    }

    /// Moves the run to `next`, stamping lifecycle timestamps.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the transition is not allowed.
    pub fn transition(&mut self, next: RunStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidInput(format!(
                "run {} cannot move from {} to {next}",
                self.id, self.status
            )));
        }
        let now = crate::current_timestamp();
        if next == RunStatus::InProgress && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.completed_at = Some(now);
        }
        self.status = next;
        Ok(())
    }
}

/// Metadata describing an uploaded file. The payload is stored separately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileObject {
    /// Unique identifier, shared by the metadata and blob objects.
    pub id: FileId,
    /// Original file name.
    pub filename: String,
    /// Intended use, e.g. `assistants`.
    pub purpose: String,
    /// MIME type of the payload.
    pub content_type: String,
    /// Payload size in bytes.
    pub bytes: u64,
    /// Creation timestamp (Unix epoch seconds).
    pub created_at: u64,
}

impl FileObject {
    /// Creates a file record with a generated id.
    #[must_use]
    pub fn new(
        filename: impl Into<String>,
        content_type: impl Into<String>,
        purpose: impl Into<String>,
        bytes: u64,
    ) -> Self {
        Self {
            id: FileId::generate(),
            filename: filename.into(),
            purpose: purpose.into(),
            content_type: content_type.into(),
            bytes,
            created_at: crate::current_timestamp(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_happy_path_transitions() {
        let mut run = Run::new(ThreadId::new("thread_1"), AssistantId::new("asst_1"));
        run.transition(RunStatus::InProgress).expect("queued -> in_progress");
        assert!(run.started_at.is_some());
        run.transition(RunStatus::RequiresAction)
            .expect("in_progress -> requires_action");
        run.transition(RunStatus::InProgress)
            .expect("requires_action -> in_progress");
        run.transition(RunStatus::Completed).expect("in_progress -> completed");
        assert!(run.completed_at.is_some());
        assert!(run.status.is_terminal());
    }

    #[test]
    fn test_run_rejects_leaving_terminal_state() {
        let mut run = Run::new(ThreadId::new("thread_1"), AssistantId::new("asst_1"));
        run.transition(RunStatus::Cancelled).expect("queued -> cancelled");
        let err = run.transition(RunStatus::InProgress).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert_eq!(run.status, RunStatus::Cancelled);
    }

    #[test]
    fn test_run_status_wire_names() {
        let json = serde_json::to_string(&RunStatus::RequiresAction).expect("serialize");
        assert_eq!(json, "\"requires_action\"");
    }

    #[test]
    fn test_thread_serialization_omits_missing_assistant() {
        let thread = Thread {
            id: ThreadId::new("thread_x"),
            assistant_id: None,
            metadata: BTreeMap::new(),
            created_at: 1,
        };
        let json = serde_json::to_string(&thread).expect("serialize");
        assert!(!json.contains("assistant_id"));
    }
}
