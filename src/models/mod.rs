//! Data models for ttlstore.
//!
//! This module contains the domain entities, their prefixed identifiers, the
//! metadata envelope attached to every stored object and the GC report types.

mod entities;
mod gc;
mod ids;
pub mod metadata;

pub use entities::{
    Assistant, FileObject, Message, MessageRole, Run, RunStatus, Thread, Tool,
};
pub use gc::{
    GcConfig, GcConfigOverrides, GcOperationResult, GcStatus, MAX_BATCH_SIZE, MIN_BATCH_SIZE,
    MIN_TIMEOUT_MS, OverallStats, ResourceStats, ResourceType,
};
pub use ids::{AssistantId, FileId, MessageId, RunId, ThreadId, ToolId};
pub use metadata::{MetadataKind, MetadataMap, ObjectMetadata, ObjectType};
