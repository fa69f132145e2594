//! Storage layer.
//!
//! Layers, bottom up:
//! - **Backends** ([`traits::ObjectStore`]): flat key/value stores with opaque
//!   version tags (in-memory, filesystem)
//! - **Key schema** ([`keys`]) and **TTL metadata** ([`ttl`])
//! - **CAS engine** ([`CasEngine`]): get-compare-write with backoff
//! - **Typed facades** ([`StorageManager`]): one store per entity, lazy expiry

// Allow match_same_arms for explicit enum handling.
#![allow(clippy::match_same_arms)]
// Sizes are byte counts that fit u64 on every supported target.
#![allow(clippy::cast_possible_truncation)]

pub mod cas;
pub mod filesystem;
pub mod keys;
pub mod manager;
pub mod memory;
pub mod traits;
pub mod ttl;

pub use cas::{CasAttempt, CasEngine, CasResult, CasStep, CasWrite, RetryPolicy};
pub use filesystem::FilesystemObjectStore;
pub use keys::{EntityKind, FilePart, ParsedKey};
pub use manager::{
    AssistantStore, EntityStore, FileStore, MessageStore, PutOptions, RunStore, StorageManager,
    StoredEntity, ThreadStore, ToolStore, Versioned,
};
pub use memory::InMemoryObjectStore;
pub use traits::{ETag, ListPage, ListRequest, ListedEntry, ObjectStore, StoredObject};
pub use ttl::TtlPolicy;
