//! Typed storage facades.
//!
//! One [`EntityStore`] per domain entity, all sharing a [`CasEngine`]. Reads
//! expire lazily: an object past its `expiresAt` is deleted (best effort,
//! conditioned on the tag just read) and reported as absent. Writes always go
//! through the CAS engine.

use super::cas::{CasEngine, CasResult, RetryPolicy};
use super::keys::{self, EntityKind};
use super::traits::{ETag, ObjectStore, StoredObject};
use super::ttl::{self, TtlPolicy};
use crate::models::metadata::expires_at_from_wire;
use crate::models::{
    Assistant, AssistantId, FileId, FileObject, Message, MessageId, MetadataKind, MetadataMap,
    ObjectMetadata, ObjectType, Run, RunId, RunStatus, Thread, ThreadId, Tool, ToolId,
};
use crate::{Error, Result};
use bytes::Bytes;
use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, instrument};

/// A domain entity with a place in the key schema.
pub trait StoredEntity: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Type tag written to metadata.
    const OBJECT_TYPE: ObjectType;

    /// What addresses one entity: its id, or `(parent id, id)` for scoped kinds.
    type Locator: Send + Sync;

    /// Returns this entity's locator.
    fn locator(&self) -> Self::Locator;

    /// Maps a locator to its store key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if an id cannot be embedded in a key.
    fn storage_key(locator: &Self::Locator) -> Result<String>;

    /// Id recorded as `parentId` in metadata.
    fn parent_id(&self) -> Option<String> {
        None
    }

    /// Type-specific metadata for this value.
    fn metadata_kind(&self) -> MetadataKind {
        MetadataKind::Json {
            parent_id: self.parent_id(),
        }
    }
}

impl StoredEntity for Assistant {
    const OBJECT_TYPE: ObjectType = ObjectType::Assistant;
    type Locator = AssistantId;

    fn locator(&self) -> AssistantId {
        self.id.clone()
    }

    fn storage_key(id: &AssistantId) -> Result<String> {
        keys::key_for(EntityKind::Assistant, id.as_str())
    }
}

impl StoredEntity for Thread {
    const OBJECT_TYPE: ObjectType = ObjectType::Thread;
    type Locator = ThreadId;

    fn locator(&self) -> ThreadId {
        self.id.clone()
    }

    fn storage_key(id: &ThreadId) -> Result<String> {
        keys::key_for(EntityKind::Thread, id.as_str())
    }

    fn parent_id(&self) -> Option<String> {
        self.assistant_id.as_ref().map(ToString::to_string)
    }
}

impl StoredEntity for Tool {
    const OBJECT_TYPE: ObjectType = ObjectType::Tool;
    type Locator = ToolId;

    fn locator(&self) -> ToolId {
        self.id.clone()
    }

    fn storage_key(id: &ToolId) -> Result<String> {
        keys::key_for(EntityKind::Tool, id.as_str())
    }
}

impl StoredEntity for Message {
    const OBJECT_TYPE: ObjectType = ObjectType::Message;
    type Locator = (ThreadId, MessageId);

    fn locator(&self) -> Self::Locator {
        (self.thread_id.clone(), self.id.clone())
    }

    fn storage_key((thread_id, id): &Self::Locator) -> Result<String> {
        keys::scoped_key_for(EntityKind::Message, thread_id.as_str(), id.as_str())
    }

    fn parent_id(&self) -> Option<String> {
        Some(self.thread_id.to_string())
    }
}

impl StoredEntity for Run {
    const OBJECT_TYPE: ObjectType = ObjectType::Run;
    type Locator = (ThreadId, RunId);

    fn locator(&self) -> Self::Locator {
        (self.thread_id.clone(), self.id.clone())
    }

    fn storage_key((thread_id, id): &Self::Locator) -> Result<String> {
        keys::scoped_key_for(EntityKind::Run, thread_id.as_str(), id.as_str())
    }

    fn parent_id(&self) -> Option<String> {
        Some(self.thread_id.to_string())
    }
}

impl StoredEntity for FileObject {
    const OBJECT_TYPE: ObjectType = ObjectType::File;
    type Locator = FileId;

    fn locator(&self) -> FileId {
        self.id.clone()
    }

    fn storage_key(id: &FileId) -> Result<String> {
        keys::file_meta_key(id.as_str())
    }
}

/// Per-write options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PutOptions {
    /// Requested TTL. `None` or `0` uses the policy default.
    pub ttl_seconds: Option<i64>,
}

impl PutOptions {
    /// Requests a TTL.
    #[must_use]
    pub const fn with_ttl(ttl_seconds: i64) -> Self {
        Self {
            ttl_seconds: Some(ttl_seconds),
        }
    }
}

/// A value together with the tag and metadata it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned<E> {
    /// Parsed value.
    pub value: E,
    /// Tag at read time.
    pub tag: ETag,
    /// Parsed metadata.
    pub metadata: ObjectMetadata,
}

/// Typed facade for one entity type.
pub struct EntityStore<E> {
    engine: CasEngine,
    ttl: TtlPolicy,
    _entity: PhantomData<fn() -> E>,
}

impl<E> Clone for EntityStore<E> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            ttl: self.ttl,
            _entity: PhantomData,
        }
    }
}

impl<E> std::fmt::Debug for EntityStore<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityStore")
            .field("object_type", &std::any::type_name::<E>())
            .field("engine", &self.engine)
            .finish()
    }
}

/// Assistants: `assistants/{id}.json`.
pub type AssistantStore = EntityStore<Assistant>;
/// Threads: `threads/{id}.json`.
pub type ThreadStore = EntityStore<Thread>;
/// Messages: `messages/{threadId}/{id}.json`.
pub type MessageStore = EntityStore<Message>;
/// Runs: `runs/{threadId}/{id}.json`.
pub type RunStore = EntityStore<Run>;
/// Tools: `tools/{id}.json`.
pub type ToolStore = EntityStore<Tool>;

impl<E: StoredEntity> EntityStore<E> {
    /// Creates a facade over an engine.
    #[must_use]
    pub fn new(engine: CasEngine, ttl: TtlPolicy) -> Self {
        Self {
            engine,
            ttl,
            _entity: PhantomData,
        }
    }

    /// Reads an entity. Expired entities are deleted and reported as `None`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for an invalid id or unparseable stored
    /// data, and [`Error::OperationFailed`] if the store fails.
    pub async fn get(&self, locator: &E::Locator) -> Result<Option<E>> {
        Ok(self.get_versioned(locator).await?.map(|v| v.value))
    }

    /// Reads an entity with its tag and metadata.
    ///
    /// # Errors
    ///
    /// Same as [`Self::get`].
    pub async fn get_versioned(&self, locator: &E::Locator) -> Result<Option<Versioned<E>>> {
        let key = E::storage_key(locator)?;
        let Some(object) = self.engine.store().get(&key).await? else {
            return Ok(None);
        };
        if expire_if_due(&self.engine, &object, E::OBJECT_TYPE).await? {
            return Ok(None);
        }

        let value = serde_json::from_slice::<E>(&object.value)
            .map_err(|e| Error::InvalidInput(format!("stored JSON at '{key}': {e}")))?;
        let metadata = ObjectMetadata::from_wire(&object.metadata)?;
        Ok(Some(Versioned {
            value,
            tag: object.tag,
            metadata,
        }))
    }

    /// Writes an entity, replacing any previous version.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for an invalid id or TTL, and the CAS
    /// engine's final error if the write fails.
    pub async fn put(&self, entity: &E, options: PutOptions) -> Result<ETag> {
        self.put_with_cas(entity, options, None).await.into_result()
    }

    /// Writes an entity, conditioned on the stored tag matching `expected`
    /// when one is given.
    ///
    /// On a conflict the write is retried against the tag the conflict
    /// reported, within the engine's retry budget. The outcome is
    /// [`Error::NotFound`] if a tag was expected and the entity no longer
    /// exists, and [`Error::Conflict`] once retries are exhausted.
    pub async fn put_with_cas(
        &self,
        entity: &E,
        options: PutOptions,
        expected: Option<ETag>,
    ) -> CasResult<ETag> {
        let (key, body, metadata) = match self.encode(entity, options) {
            Ok(encoded) => encoded,
            Err(e) => return CasResult::rejected(e),
        };
        self.engine.put_with_cas(&key, body, metadata, expected).await
    }

    /// Read-modify-write of an entity.
    ///
    /// `updater` receives the current value (`None` if absent) and returns the
    /// new one. It may run several times under contention. An expired entity
    /// is handed over as `None`. The stored expiration is kept unless
    /// `options` carries a TTL.
    ///
    /// The outcome carries the updater's error, [`Error::InvalidInput`] for
    /// unparseable stored data, or [`Error::Conflict`] once retries are
    /// exhausted.
    pub async fn update_with_cas<F>(
        &self,
        locator: &E::Locator,
        options: PutOptions,
        updater: F,
    ) -> CasResult<E>
    where
        F: FnMut(Option<E>) -> Result<E> + Send,
    {
        let prepared = E::storage_key(locator).and_then(|key| {
            let ttl_secs = options
                .ttl_seconds
                .map(|ttl| self.ttl.resolve(E::OBJECT_TYPE, Some(ttl)))
                .transpose()?;
            Ok((key, ttl_secs))
        });
        let (key, ttl_secs) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => return CasResult::rejected(e),
        };
        self.engine
            .update_with_cas(&key, E::OBJECT_TYPE, ttl_secs, E::metadata_kind, updater)
            .await
    }

    /// Deletes an entity, conditioned on `expected` when given.
    ///
    /// Succeeds with `false` if the entity did not exist and no tag was
    /// expected. With a tag, a missing entity is [`Error::NotFound`] and a
    /// different tag is a conflict, retried within the engine's budget.
    pub async fn delete(&self, locator: &E::Locator, expected: Option<ETag>) -> CasResult<bool> {
        match E::storage_key(locator) {
            Ok(key) => self.engine.delete_with_cas(&key, expected).await,
            Err(e) => CasResult::rejected(e),
        }
    }

    /// Checks whether a live (unexpired) entity exists.
    ///
    /// # Errors
    ///
    /// Same as [`Self::get`].
    pub async fn exists(&self, locator: &E::Locator) -> Result<bool> {
        Ok(self.get_versioned(locator).await?.is_some())
    }

    /// Resets an entity's expiration to `now + ttl`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the entity does not exist and
    /// [`Error::InvalidInput`] for an invalid TTL.
    pub async fn extend_ttl(&self, locator: &E::Locator, ttl_seconds: i64) -> Result<ObjectMetadata> {
        let key = E::storage_key(locator)?;
        let ttl_secs = self.ttl.resolve(E::OBJECT_TYPE, Some(ttl_seconds))?;
        self.engine.extend_ttl(&key, ttl_secs).await.into_result()
    }

    fn encode(&self, entity: &E, options: PutOptions) -> Result<(String, Bytes, MetadataMap)> {
        let ttl_secs = self.ttl.resolve(E::OBJECT_TYPE, options.ttl_seconds)?;
        let key = E::storage_key(&entity.locator())?;
        let body = serde_json::to_vec(entity).map_err(|e| Error::operation("serialize", e))?;
        let metadata =
            ttl::metadata_envelope(E::OBJECT_TYPE, ttl_secs, entity.metadata_kind(), Utc::now());
        Ok((key, Bytes::from(body), metadata.to_wire()))
    }
}

impl EntityStore<Run> {
    /// Moves a run through its lifecycle.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the run does not exist and
    /// [`Error::InvalidInput`] if the transition is not allowed.
    #[instrument(
        name = "ttlstore.storage.run_transition",
        skip_all,
        fields(component = "storage", operation = "run_transition", run_id = %run_id, next = %next)
    )]
    pub async fn transition(
        &self,
        thread_id: &ThreadId,
        run_id: &RunId,
        next: RunStatus,
    ) -> Result<Run> {
        let locator = (thread_id.clone(), run_id.clone());
        let missing = format!("run {run_id} in thread {thread_id}");
        self.update_with_cas(&locator, PutOptions::default(), |current| {
            let mut run = current.ok_or_else(|| Error::NotFound(missing.clone()))?;
            run.transition(next)?;
            Ok(run)
        })
        .await
        .into_result()
    }
}

/// Files: `files/{id}/meta.json` plus `files/{id}/blob`.
#[derive(Debug, Clone)]
pub struct FileStore {
    meta: EntityStore<FileObject>,
    engine: CasEngine,
    ttl: TtlPolicy,
}

impl FileStore {
    /// Creates a facade over an engine.
    #[must_use]
    pub fn new(engine: CasEngine, ttl: TtlPolicy) -> Self {
        Self {
            meta: EntityStore::new(engine.clone(), ttl),
            engine,
            ttl,
        }
    }

    /// Reads a file's metadata document.
    ///
    /// # Errors
    ///
    /// See [`EntityStore::get`].
    pub async fn get(&self, id: &FileId) -> Result<Option<FileObject>> {
        self.meta.get(id).await
    }

    /// Writes a file's metadata document.
    ///
    /// # Errors
    ///
    /// See [`EntityStore::put`].
    pub async fn put(&self, file: &FileObject, options: PutOptions) -> Result<ETag> {
        self.meta.put(file, options).await
    }

    /// Writes a file's payload. Its metadata records content type, name and
    /// size.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for an invalid id or TTL and the CAS
    /// engine's final error if the write fails.
    pub async fn put_blob(&self, file: &FileObject, data: Bytes, options: PutOptions) -> Result<ETag> {
        let key = keys::file_blob_key(file.id.as_str())?;
        let ttl_secs = self.ttl.resolve(ObjectType::FileBlob, options.ttl_seconds)?;
        let kind = MetadataKind::File {
            content_type: file.content_type.clone(),
            filename: file.filename.clone(),
            size: data.len() as u64,
        };
        let metadata = ttl::metadata_envelope(ObjectType::FileBlob, ttl_secs, kind, Utc::now());
        self.engine
            .put_with_cas(&key, data, metadata.to_wire(), None)
            .await
            .into_result()
    }

    /// Reads a file's payload. An expired payload is deleted and reported as
    /// `None`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for an invalid id or unparseable
    /// metadata and [`Error::OperationFailed`] if the store fails.
    pub async fn get_blob(&self, id: &FileId) -> Result<Option<Bytes>> {
        let key = keys::file_blob_key(id.as_str())?;
        let Some(object) = self.engine.store().get(&key).await? else {
            return Ok(None);
        };
        if expire_if_due(&self.engine, &object, ObjectType::FileBlob).await? {
            return Ok(None);
        }
        Ok(Some(object.value))
    }

    /// Deletes both the metadata document and the payload.
    ///
    /// `expected` conditions the metadata delete; on a conflict the payload
    /// is left alone. Otherwise both deletes are attempted and the call
    /// succeeds only if both do, with `true` if either object existed. The
    /// outcome carries the first error and `attempts` sums both parts.
    pub async fn delete(&self, id: &FileId, expected: Option<ETag>) -> CasResult<bool> {
        let parts = keys::file_meta_key(id.as_str())
            .and_then(|meta| Ok((meta, keys::file_blob_key(id.as_str())?)));
        let (meta_key, blob_key) = match parts {
            Ok(keys) => keys,
            Err(e) => return CasResult::rejected(e),
        };

        let meta = self.engine.delete_with_cas(&meta_key, expected).await;
        if meta.is_conflict() {
            return meta;
        }
        let blob = self.engine.delete_with_cas(&blob_key, None).await;
        let outcome = match (meta.outcome, blob.outcome) {
            (Ok(meta), Ok(blob)) => Ok(meta || blob),
            (Err(e), _) | (_, Err(e)) => Err(e),
        };
        CasResult {
            outcome,
            tag: None,
            attempts: meta.attempts + blob.attempts,
        }
    }

    /// Checks whether a live metadata document exists.
    ///
    /// # Errors
    ///
    /// See [`EntityStore::exists`].
    pub async fn exists(&self, id: &FileId) -> Result<bool> {
        self.meta.exists(id).await
    }
}

/// Deletes `object` if its TTL has elapsed. Returns `true` if it had.
///
/// The delete is conditioned on the tag that was read and attempted once; a
/// concurrent rewrite wins and the failure is only logged.
async fn expire_if_due(
    engine: &CasEngine,
    object: &StoredObject,
    object_type: ObjectType,
) -> Result<bool> {
    let expires_at = expires_at_from_wire(&object.metadata)?;
    if !ttl::is_expired_at(expires_at, Utc::now()) {
        return Ok(false);
    }

    metrics::counter!(
        "storage_lazy_expirations_total",
        "object_type" => object_type.as_str()
    )
    .increment(1);

    let outcome = engine
        .with_policy(RetryPolicy::single_attempt())
        .delete_with_cas(&object.key, Some(object.tag.clone()))
        .await
        .outcome;
    if let Err(e) = outcome {
        debug!(key = %object.key, error = %e, "Lazy expiry delete skipped");
    }
    Ok(true)
}

/// All typed facades over one object store.
#[derive(Debug, Clone)]
pub struct StorageManager {
    engine: CasEngine,
    ttl: TtlPolicy,
}

impl StorageManager {
    /// Creates a manager.
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>, retry: RetryPolicy, ttl: TtlPolicy) -> Self {
        Self {
            engine: CasEngine::new(store, retry).with_ttl_policy(ttl),
            ttl,
        }
    }

    /// Returns the shared CAS engine.
    #[must_use]
    pub const fn engine(&self) -> &CasEngine {
        &self.engine
    }

    /// Returns the underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        self.engine.store()
    }

    /// Assistant facade.
    #[must_use]
    pub fn assistants(&self) -> AssistantStore {
        EntityStore::new(self.engine.clone(), self.ttl)
    }

    /// Thread facade.
    #[must_use]
    pub fn threads(&self) -> ThreadStore {
        EntityStore::new(self.engine.clone(), self.ttl)
    }

    /// Message facade.
    #[must_use]
    pub fn messages(&self) -> MessageStore {
        EntityStore::new(self.engine.clone(), self.ttl)
    }

    /// Run facade.
    #[must_use]
    pub fn runs(&self) -> RunStore {
        EntityStore::new(self.engine.clone(), self.ttl)
    }

    /// Tool facade.
    #[must_use]
    pub fn tools(&self) -> ToolStore {
        EntityStore::new(self.engine.clone(), self.ttl)
    }

    /// File facade.
    #[must_use]
    pub fn files(&self) -> FileStore {
        FileStore::new(self.engine.clone(), self.ttl)
    }
}
