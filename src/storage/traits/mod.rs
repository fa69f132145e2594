//! Storage backend traits.

mod object_store;

pub use object_store::{ETag, ListPage, ListRequest, ListedEntry, ObjectStore, StoredObject};
