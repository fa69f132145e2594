//! Object store trait.

use crate::Result;
use crate::models::MetadataMap;
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;

/// Opaque version tag assigned by the store on every write.
///
/// Tags are only ever compared for equality; their content carries no meaning.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ETag(String);

impl ETag {
    /// Wraps a store-provided tag.
    #[must_use]
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    /// Returns the tag as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ETag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An object as returned by [`ObjectStore::get`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// Store key.
    pub key: String,
    /// Raw value, a JSON document or a binary payload.
    pub value: Bytes,
    /// Current version tag.
    pub tag: ETag,
    /// Raw metadata map.
    pub metadata: MetadataMap,
}

/// One entry of a listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedEntry {
    /// Store key.
    pub key: String,
    /// Version tag at listing time.
    pub tag: ETag,
    /// Value size in bytes.
    pub size: u64,
    /// Raw metadata map.
    pub metadata: MetadataMap,
}

/// Parameters of a listing call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListRequest {
    /// Only keys starting with this prefix are returned.
    pub prefix: String,
    /// Continuation cursor from a previous page.
    pub cursor: Option<String>,
    /// Maximum entries to return. `None` lets the store pick.
    pub limit: Option<usize>,
}

impl ListRequest {
    /// Lists from the start of `prefix`.
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            cursor: None,
            limit: None,
        }
    }

    /// Resumes after `cursor`.
    #[must_use]
    pub fn with_cursor(mut self, cursor: Option<String>) -> Self {
        self.cursor = cursor;
        self
    }

    /// Caps the page size.
    #[must_use]
    pub const fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// One page of a listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    /// Entries in key order.
    pub objects: Vec<ListedEntry>,
    /// Cursor for the next page. `None` ends the listing.
    pub cursor: Option<String>,
    /// Whether more entries exist past this page.
    pub truncated: bool,
}

/// Flat key/value object store with opaque version tags.
///
/// The store offers no conditional writes: compare-and-swap is layered on top
/// by [`crate::storage::CasEngine`]. Listings are only required to be
/// eventually consistent.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Reads an object. Returns `None` if the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<StoredObject>>;

    /// Writes an object unconditionally and returns its new tag.
    async fn put(&self, key: &str, value: Bytes, metadata: MetadataMap) -> Result<ETag>;

    /// Deletes an object. Returns `false` if it did not exist.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Lists objects under a prefix, one page at a time.
    async fn list(&self, request: ListRequest) -> Result<ListPage>;

    /// Checks if an object exists.
    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }
}
