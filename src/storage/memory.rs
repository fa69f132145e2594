//! In-memory object store.
//!
//! Keeps every object in a `BTreeMap` so listings come back in key order, the
//! same contract the filesystem backend offers. Useful for tests and for
//! embedding the storage layer without external infrastructure.

use super::traits::{ETag, ListPage, ListRequest, ListedEntry, ObjectStore, StoredObject};
use crate::Result;
use crate::models::MetadataMap;
use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

/// Page size used when a listing does not ask for one.
pub const DEFAULT_LIST_LIMIT: usize = 1000;

#[derive(Debug, Clone)]
struct Entry {
    value: Bytes,
    tag: ETag,
    metadata: MetadataMap,
}

/// Object store backed by process memory.
#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    objects: RwLock<BTreeMap<String, Entry>>,
    writes: AtomicU64,
}

impl InMemoryObjectStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored objects.
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    /// Returns `true` if the store holds no objects.
    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }

    /// Returns all keys in order.
    pub async fn keys(&self) -> Vec<String> {
        self.objects.read().await.keys().cloned().collect()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn get(&self, key: &str) -> Result<Option<StoredObject>> {
        let objects = self.objects.read().await;
        Ok(objects.get(key).map(|entry| StoredObject {
            key: key.to_string(),
            value: entry.value.clone(),
            tag: entry.tag.clone(),
            metadata: entry.metadata.clone(),
        }))
    }

    async fn put(&self, key: &str, value: Bytes, metadata: MetadataMap) -> Result<ETag> {
        let write = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        let tag = compute_etag(&value, &write.to_string());
        let mut objects = self.objects.write().await;
        objects.insert(
            key.to_string(),
            Entry {
                value,
                tag: tag.clone(),
                metadata,
            },
        );
        Ok(tag)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.objects.write().await.remove(key).is_some())
    }

    async fn list(&self, request: ListRequest) -> Result<ListPage> {
        let objects = self.objects.read().await;
        let start = request.cursor.as_ref().map_or_else(
            || Bound::Included(request.prefix.clone()),
            |cursor| Bound::Excluded(cursor.clone()),
        );
        let entries = objects
            .range((start, Bound::Unbounded))
            .map(|(key, entry)| ListedEntry {
                key: key.clone(),
                tag: entry.tag.clone(),
                size: entry.value.len() as u64,
                metadata: entry.metadata.clone(),
            });
        Ok(page_from_sorted(entries, &request))
    }
}

/// Derives a version tag from the value and a per-write discriminator.
///
/// The discriminator guarantees a new tag even when identical bytes are
/// rewritten.
pub(crate) fn compute_etag(value: &[u8], discriminator: &str) -> ETag {
    let digest = Sha256::digest(value);
    ETag::new(format!("{}-{discriminator}", hex::encode(&digest[..8])))
}

/// Cuts one page out of entries sorted by key.
///
/// Entries at or before the cursor and outside the prefix are skipped; keys
/// sharing a prefix are contiguous in sort order, so the scan stops at the
/// first key past the prefix block.
pub(crate) fn page_from_sorted<I>(entries: I, request: &ListRequest) -> ListPage
where
    I: Iterator<Item = ListedEntry>,
{
    let limit = request.limit.unwrap_or(DEFAULT_LIST_LIMIT).max(1);
    let mut objects = Vec::new();
    let mut truncated = false;

    for entry in entries {
        if let Some(cursor) = &request.cursor
            && entry.key.as_str() <= cursor.as_str()
        {
            continue;
        }
        if !entry.key.starts_with(&request.prefix) {
            if entry.key.as_str() > request.prefix.as_str() {
                break;
            }
            continue;
        }
        if objects.len() == limit {
            truncated = true;
            break;
        }
        objects.push(entry);
    }

    let cursor = if truncated {
        objects.last().map(|e: &ListedEntry| e.key.clone())
    } else {
        None
    };
    ListPage {
        objects,
        cursor,
        truncated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seed(store: &InMemoryObjectStore, keys: &[&str]) {
        for key in keys {
            store
                .put(key, Bytes::from_static(b"{}"), MetadataMap::new())
                .await
                .expect("put");
        }
    }

    #[tokio::test]
    async fn test_put_assigns_new_tag_on_every_write() {
        let store = InMemoryObjectStore::new();
        let first = store
            .put("threads/a.json", Bytes::from_static(b"{}"), MetadataMap::new())
            .await
            .expect("put");
        let second = store
            .put("threads/a.json", Bytes::from_static(b"{}"), MetadataMap::new())
            .await
            .expect("put");
        assert_ne!(first, second);

        let current = store.get("threads/a.json").await.expect("get").expect("exists");
        assert_eq!(current.tag, second);
    }

    #[tokio::test]
    async fn test_delete_reports_presence() {
        let store = InMemoryObjectStore::new();
        seed(&store, &["runs/t/r.json"]).await;
        assert!(store.delete("runs/t/r.json").await.expect("delete"));
        assert!(!store.delete("runs/t/r.json").await.expect("delete"));
        assert!(store.get("runs/t/r.json").await.expect("get").is_none());
    }

    #[tokio::test]
    async fn test_list_respects_prefix_boundaries() {
        let store = InMemoryObjectStore::new();
        seed(
            &store,
            &[
                "messages/t1/m1.json",
                "messages/t10/m1.json",
                "messages/t2/m1.json",
                "runs/t1/r1.json",
                "assistants/a.json",
            ],
        )
        .await;

        let page = store
            .list(ListRequest::new("messages/t1/"))
            .await
            .expect("list");
        let keys: Vec<_> = page.objects.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["messages/t1/m1.json"]);
        assert!(!page.truncated);
        assert!(page.cursor.is_none());
    }

    #[tokio::test]
    async fn test_list_paginates_with_cursor() {
        let store = InMemoryObjectStore::new();
        seed(
            &store,
            &["threads/a.json", "threads/b.json", "threads/c.json"],
        )
        .await;

        let first = store
            .list(ListRequest::new("threads/").with_limit(2))
            .await
            .expect("list");
        assert_eq!(first.objects.len(), 2);
        assert!(first.truncated);
        assert_eq!(first.cursor.as_deref(), Some("threads/b.json"));

        let second = store
            .list(
                ListRequest::new("threads/")
                    .with_limit(2)
                    .with_cursor(first.cursor),
            )
            .await
            .expect("list");
        assert_eq!(second.objects.len(), 1);
        assert_eq!(second.objects[0].key, "threads/c.json");
        assert!(second.cursor.is_none());
    }

    #[tokio::test]
    async fn test_exact_page_boundary_has_no_cursor() {
        let store = InMemoryObjectStore::new();
        seed(&store, &["files/a/blob", "files/a/meta.json"]).await;
        let page = store
            .list(ListRequest::new("files/").with_limit(2))
            .await
            .expect("list");
        assert_eq!(page.objects.len(), 2);
        assert!(page.cursor.is_none());
    }
}
