//! Shared helpers for integration tests.

#![allow(dead_code, clippy::expect_used, clippy::unwrap_used)]

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{TimeDelta, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use ttlstore::models::MetadataMap;
use ttlstore::models::metadata::{CREATED_AT, EXPIRES_AT, OBJECT_TYPE, PARENT_ID, format_timestamp};
use ttlstore::storage::{
    ETag, InMemoryObjectStore, ListPage, ListRequest, ObjectStore, StoredObject,
};
use ttlstore::{Error, Result};

/// In-memory store with injectable faults.
///
/// - `fail_delete(key)`: deletes of `key` fail with a store error
/// - `fail_lists(n)`: the next `n` listings fail
/// - `interfere(key, value, n)`: the next `n` reads of `key` are followed by
///   a write of `value`, as if another writer raced the reader
#[derive(Default)]
pub struct FaultyStore {
    inner: InMemoryObjectStore,
    failing_deletes: Mutex<HashSet<String>>,
    list_failures: AtomicU32,
    interference: Mutex<HashMap<String, (Bytes, u32)>>,
    pub gets: AtomicUsize,
    pub puts: AtomicUsize,
    pub deletes: AtomicUsize,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inner(&self) -> &InMemoryObjectStore {
        &self.inner
    }

    pub fn fail_delete(&self, key: &str) {
        self.failing_deletes
            .lock()
            .unwrap()
            .insert(key.to_string());
    }

    pub fn fail_lists(&self, n: u32) {
        self.list_failures.store(n, Ordering::SeqCst);
    }

    pub fn interfere(&self, key: &str, value: impl Into<Bytes>, times: u32) {
        self.interference
            .lock()
            .unwrap()
            .insert(key.to_string(), (value.into(), times));
    }

    fn take_interference(&self, key: &str) -> Option<Bytes> {
        let mut map = self.interference.lock().unwrap();
        let (value, left) = map.get_mut(key)?;
        if *left == 0 {
            return None;
        }
        *left -= 1;
        Some(value.clone())
    }
}

#[async_trait]
impl ObjectStore for FaultyStore {
    async fn get(&self, key: &str) -> Result<Option<StoredObject>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        let read = self.inner.get(key).await?;
        if let (Some(object), Some(value)) = (&read, self.take_interference(key)) {
            self.inner
                .put(key, value, object.metadata.clone())
                .await?;
        }
        Ok(read)
    }

    async fn put(&self, key: &str, value: Bytes, metadata: MetadataMap) -> Result<ETag> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.inner.put(key, value, metadata).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        if self.failing_deletes.lock().unwrap().contains(key) {
            return Err(Error::operation("delete", format!("injected failure for {key}")));
        }
        self.inner.delete(key).await
    }

    async fn list(&self, request: ListRequest) -> Result<ListPage> {
        let failed = self
            .list_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(Error::operation("list", "injected listing failure"));
        }
        self.inner.list(request).await
    }
}

/// Metadata for an object that expired a minute ago.
pub fn expired_metadata(object_type: &str, parent: Option<&str>) -> MetadataMap {
    metadata_expiring(object_type, parent, TimeDelta::seconds(-60))
}

/// Metadata for an object that expires in an hour.
pub fn live_metadata(object_type: &str, parent: Option<&str>) -> MetadataMap {
    metadata_expiring(object_type, parent, TimeDelta::hours(1))
}

fn metadata_expiring(object_type: &str, parent: Option<&str>, offset: TimeDelta) -> MetadataMap {
    let now = Utc::now();
    let mut map = MetadataMap::new();
    map.insert(CREATED_AT.to_string(), format_timestamp(now - TimeDelta::days(1)));
    map.insert(EXPIRES_AT.to_string(), format_timestamp(now + offset));
    map.insert(OBJECT_TYPE.to_string(), object_type.to_string());
    if let Some(parent) = parent {
        map.insert(PARENT_ID.to_string(), parent.to_string());
    }
    map
}

/// Writes a raw JSON object.
pub async fn seed(store: &dyn ObjectStore, key: &str, metadata: MetadataMap) {
    store
        .put(key, Bytes::from_static(b"{}"), metadata)
        .await
        .expect("seed put");
}

/// Moves an object's `expiresAt` into the past, keeping everything else.
pub async fn backdate(store: &dyn ObjectStore, key: &str) {
    let object = store.get(key).await.expect("get").expect("object exists");
    let mut metadata = object.metadata;
    metadata.insert(
        EXPIRES_AT.to_string(),
        format_timestamp(Utc::now() - TimeDelta::seconds(1)),
    );
    store
        .put(key, object.value, metadata)
        .await
        .expect("backdate put");
}
