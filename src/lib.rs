//! # ttlstore
//!
//! TTL-aware persistence for assistant-platform objects (assistants, threads,
//! messages, runs, files) on top of a flat key/value object store.
//!
//! The crate has two halves that share one storage discipline:
//!
//! - **Storage** ([`storage`]): key schema, TTL metadata envelopes, an ETag
//!   compare-and-swap engine with exponential backoff, and typed per-entity
//!   facades that expire objects lazily on read.
//! - **Garbage collection** ([`gc`]): a rate-limited, bounded-concurrency sweep
//!   that pages through the store by prefix, deletes expired objects and
//!   cascades to their dependents.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ttlstore::gc::{GcConfigOverrides, GcOrchestrator};
//! use ttlstore::storage::{InMemoryObjectStore, StorageManager};
//!
//! let store = Arc::new(InMemoryObjectStore::new());
//! let manager = StorageManager::new(store.clone(), Default::default(), Default::default());
//! manager.threads().put(&thread, Default::default()).await?;
//!
//! let gc = GcOrchestrator::new(store, Default::default());
//! let report = gc.execute_gc(&GcConfigOverrides::default()).await;
//! println!("cleaned {}", report.overall_stats.total_cleaned);
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use serde::Serialize;
use thiserror::Error as ThisError;

pub mod config;
pub mod gc;
pub mod models;
pub mod observability;
pub mod storage;

pub use config::StoreConfig;
pub use gc::{GcConfig, GcConfigOverrides, GcOrchestrator, GcService};
pub use models::{
    Assistant, AssistantId, FileId, FileObject, GcOperationResult, Message, MessageId, Run,
    RunId, RunStatus, Thread, ThreadId,
};
pub use storage::{CasEngine, CasResult, ObjectStore, RetryPolicy, StorageManager, TtlPolicy};

/// Error type for ttlstore operations.
///
/// # Error Variant Triggers
///
/// | Variant | Code | Raised When |
/// |---------|------|-------------|
/// | `NotFound` | `NOT_FOUND` | A CAS write expected an object that is gone |
/// | `Conflict` | `CONFLICT` | The current ETag differs from the expected one |
/// | `InvalidInput` | `VALIDATION_ERROR` | Bad ids, bad TTLs, unparseable stored JSON or metadata |
/// | `TtlExpired` | `TTL_EXPIRED` | Reserved wire code; reads report expired objects as absent |
/// | `OperationFailed` | `INTERNAL_ERROR` | The backing store is unreachable or fails |
/// | `Unauthorized` | `UNAUTHORIZED` | A GC trigger carried the wrong admin key |
#[derive(Debug, ThisError)]
pub enum Error {
    /// The addressed object does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The object's version tag did not match the expected tag.
    #[error("conflict on '{key}': expected tag {expected:?}, found {current:?}")]
    Conflict {
        /// Store key of the contended object.
        key: String,
        /// Tag the caller expected.
        expected: Option<String>,
        /// Tag currently held by the store.
        current: Option<String>,
    },

    /// Invalid input was provided.
    ///
    /// Raised when:
    /// - An entity id is empty or contains `/`
    /// - A TTL is negative or longer than 365 days
    /// - A stored value or its metadata cannot be parsed
    /// - A GC request fails validation
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The object exists but its TTL has elapsed.
    ///
    /// Not raised by this crate: reads, updates and TTL extensions treat an
    /// expired object as absent. Kept so callers mapping errors to wire codes
    /// can report `TTL_EXPIRED`.
    #[error("ttl expired: {0}")]
    TtlExpired(String),

    /// An operation failed.
    ///
    /// Raised when:
    /// - The object store is unreachable or returns an I/O error
    /// - Serialization of a value fails
    /// - A background task panics or is cancelled
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// The admin key check failed.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
}

/// Wire-level error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Object absent.
    NotFound,
    /// CAS tag mismatch.
    Conflict,
    /// Malformed input.
    ValidationError,
    /// Object logically expired.
    TtlExpired,
    /// Store failure or unexpected exception.
    InternalError,
    /// Admin key rejected.
    Unauthorized,
}

impl ErrorCode {
    /// Returns the wire string for this code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "NOT_FOUND",
            Self::Conflict => "CONFLICT",
            Self::ValidationError => "VALIDATION_ERROR",
            Self::TtlExpired => "TTL_EXPIRED",
            Self::InternalError => "INTERNAL_ERROR",
            Self::Unauthorized => "UNAUTHORIZED",
        }
    }
}

impl Error {
    /// Returns the wire code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::Conflict { .. } => ErrorCode::Conflict,
            Self::InvalidInput(_) => ErrorCode::ValidationError,
            Self::TtlExpired(_) => ErrorCode::TtlExpired,
            Self::OperationFailed { .. } => ErrorCode::InternalError,
            Self::Unauthorized(_) => ErrorCode::Unauthorized,
        }
    }

    /// Returns `true` if the CAS retry loop may try the operation again.
    ///
    /// Only tag conflicts and store failures are retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::OperationFailed { .. })
    }

    /// Shorthand for an [`Error::OperationFailed`] built from any displayable cause.
    pub fn operation(operation: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Self::OperationFailed {
            operation: operation.into(),
            cause: cause.to_string(),
        }
    }
}

/// Result type alias for ttlstore operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Returns the current Unix timestamp in seconds.
///
/// Falls back to 0 if the system clock is before the Unix epoch.
#[must_use]
pub fn current_timestamp() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
