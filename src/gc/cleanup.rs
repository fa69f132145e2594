//! Per-type deletion of expired objects, with cascades.
//!
//! | Type | Deletes |
//! |------|---------|
//! | message, run | the object |
//! | thread | `messages/{id}/*`, `runs/{id}/*`, then the thread |
//! | assistant | every thread whose `parentId` is the assistant (cascading), then the assistant |
//! | file | `files/{id}/meta.json` and `files/{id}/blob` |
//!
//! Cascades are not atomic: a parent is deleted even when some of its
//! children could not be, and the shortfall is reported in the result.
//! Deletes are conditioned on the tag seen at listing time and attempted once,
//! so an object rewritten after it was listed survives as a conflict failure.
//! Cascade targets are found page by page, each listing call taking a slot
//! from the sweep's [`RateLimiter`] when one is attached.

use super::batch::{BatchTransform, ListedObject};
use super::rate_limit::RateLimiter;
use crate::models::{ObjectMetadata, ResourceType};
use crate::storage::keys::{self, EntityKind, FilePart};
use crate::storage::traits::{ETag, ListPage, ListRequest, ObjectStore};
use crate::storage::{CasEngine, RetryPolicy};
use crate::{Error, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Extra counts attached to a cleanup result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum CleanupDetail {
    /// Plain delete.
    #[default]
    None,
    /// Thread or assistant cascade.
    Cascade {
        /// Dependents deleted.
        #[serde(rename = "cascadeDeletes")]
        deletes: usize,
        /// Dependents that could not be deleted or listed.
        #[serde(rename = "cascadeErrors")]
        errors: usize,
    },
    /// File metadata and payload.
    FileParts {
        /// Parts deleted.
        #[serde(rename = "partsDeleted")]
        deleted: usize,
        /// Parts whose delete failed.
        #[serde(rename = "partsFailed")]
        failed: usize,
    },
}

impl CleanupDetail {
    const fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

/// Outcome for one expired object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupResult {
    /// Whether the object was deleted (or would be, in a dry run).
    pub success: bool,
    /// Store key.
    pub key: String,
    /// Swept type.
    pub resource_type: ResourceType,
    /// Failure message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Bytes reclaimed.
    pub size_bytes: u64,
    /// Cascade or file-part counts.
    #[serde(rename = "metadata", skip_serializing_if = "CleanupDetail::is_none")]
    pub detail: CleanupDetail,
}

impl CleanupResult {
    fn deleted(object: &ListedObject, resource_type: ResourceType, size_bytes: u64) -> Self {
        Self {
            success: true,
            key: object.key().to_string(),
            resource_type,
            error: None,
            size_bytes,
            detail: CleanupDetail::None,
        }
    }

    fn failed(object: &ListedObject, resource_type: ResourceType, error: &Error) -> Self {
        Self {
            success: false,
            key: object.key().to_string(),
            resource_type,
            error: Some(error.to_string()),
            size_bytes: 0,
            detail: CleanupDetail::None,
        }
    }

    const fn with_detail(mut self, detail: CleanupDetail) -> Self {
        self.detail = detail;
        self
    }
}

enum DeleteOutcome {
    Deleted,
    Gone,
    Failed(Error),
}

#[derive(Debug, Default, Clone, Copy)]
struct CascadeCounts {
    deletes: usize,
    errors: usize,
}

impl CascadeCounts {
    fn absorb(&mut self, other: Self) {
        self.deletes += other.deletes;
        self.errors += other.errors;
    }
}

/// Deletes expired objects of any resource type.
#[derive(Debug, Clone)]
pub struct ResourceCleanupHandler {
    engine: CasEngine,
    limiter: Option<Arc<RateLimiter>>,
    page_size: usize,
    dry_run: bool,
}

impl ResourceCleanupHandler {
    /// Creates a handler over a store.
    ///
    /// `page_size` bounds the listings used to find cascade targets.
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>, page_size: usize, dry_run: bool) -> Self {
        Self {
            engine: CasEngine::new(store, RetryPolicy::single_attempt()),
            limiter: None,
            page_size: page_size.max(1),
            dry_run,
        }
    }

    /// Throttles cascade listings through `limiter`.
    #[must_use]
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Returns `true` if deletes are only simulated.
    #[must_use]
    pub const fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Cleans up the expired objects of one listed batch.
    ///
    /// Objects that are not expired are ignored. One result is returned per
    /// expired object, except for objects that vanished before they could be
    /// deleted and file payloads whose metadata document still exists (those
    /// go with the metadata). A failure never stops the batch.
    #[instrument(
        name = "ttlstore.gc.cleanup",
        skip_all,
        fields(
            component = "gc",
            operation = "cleanup",
            resource_type = %resource_type,
            dry_run = self.dry_run,
            objects = objects.len()
        )
    )]
    pub async fn process_batch_cleanup(
        &self,
        objects: Vec<ListedObject>,
        resource_type: ResourceType,
    ) -> Vec<CleanupResult> {
        let mut results = Vec::new();
        for object in objects.iter().filter(|o| o.expired) {
            let Some(result) = self.cleanup_object(object, resource_type).await else {
                continue;
            };
            if result.success {
                metrics::counter!(
                    "gc_objects_cleaned_total",
                    "resource_type" => resource_type.as_str(),
                    "dry_run" => self.dry_run.to_string()
                )
                .increment(1);
            } else {
                metrics::counter!(
                    "gc_objects_failed_total",
                    "resource_type" => resource_type.as_str()
                )
                .increment(1);
                warn!(
                    key = %result.key,
                    error = result.error.as_deref().unwrap_or_default(),
                    "Cleanup failed"
                );
            }
            results.push(result);
        }
        results
    }

    async fn cleanup_object(
        &self,
        object: &ListedObject,
        resource_type: ResourceType,
    ) -> Option<CleanupResult> {
        let kind = EntityKind::from(resource_type);
        let Some(parsed) = keys::parse_key(object.key(), kind) else {
            let error = Error::InvalidInput(format!("unrecognized {kind} key"));
            return Some(CleanupResult::failed(object, resource_type, &error));
        };

        match resource_type {
            ResourceType::Message | ResourceType::Run => self.cleanup_single(object, resource_type).await,
            ResourceType::Thread => {
                let cascade = self.cascade_thread_children(&parsed.id).await;
                self.cleanup_single(object, resource_type)
                    .await
                    .map(|r| r.with_detail(cascade_detail(cascade)))
            },
            ResourceType::Assistant => {
                let cascade = self.cascade_assistant_threads(&parsed.id).await;
                self.cleanup_single(object, resource_type)
                    .await
                    .map(|r| r.with_detail(cascade_detail(cascade)))
            },
            ResourceType::File => match parsed.part {
                Some(FilePart::Meta) => Some(self.cleanup_file(object, &parsed.id).await),
                _ => self.cleanup_orphan_blob(object, &parsed.id).await,
            },
        }
    }

    async fn cleanup_single(
        &self,
        object: &ListedObject,
        resource_type: ResourceType,
    ) -> Option<CleanupResult> {
        match self.delete(&object.entry.key, &object.entry.tag).await {
            DeleteOutcome::Deleted => Some(CleanupResult::deleted(
                object,
                resource_type,
                object.entry.size,
            )),
            DeleteOutcome::Gone => {
                debug!(key = %object.key(), "Already deleted");
                None
            },
            DeleteOutcome::Failed(e) => Some(CleanupResult::failed(object, resource_type, &e)),
        }
    }

    /// Deletes a file's metadata document and payload.
    async fn cleanup_file(&self, object: &ListedObject, file_id: &str) -> CleanupResult {
        let mut deleted = 0;
        let mut failed = 0;
        let mut size_bytes = 0;
        let mut first_error: Option<Error> = None;

        match self.delete(&object.entry.key, &object.entry.tag).await {
            DeleteOutcome::Deleted => {
                deleted += 1;
                size_bytes += object.entry.size;
            },
            DeleteOutcome::Gone => {},
            DeleteOutcome::Failed(e) => {
                failed += 1;
                first_error = Some(e);
            },
        }

        let blob = match keys::file_blob_key(file_id) {
            Ok(key) => self.engine.store().get(&key).await,
            Err(e) => Err(e),
        };
        match blob {
            Ok(Some(blob)) => match self.delete(&blob.key, &blob.tag).await {
                DeleteOutcome::Deleted => {
                    deleted += 1;
                    size_bytes += blob.value.len() as u64;
                },
                DeleteOutcome::Gone => {},
                DeleteOutcome::Failed(e) => {
                    failed += 1;
                    first_error.get_or_insert(e);
                },
            },
            Ok(None) => {},
            Err(e) => {
                failed += 1;
                first_error.get_or_insert(e);
            },
        }

        CleanupResult {
            success: failed == 0,
            key: object.key().to_string(),
            resource_type: ResourceType::File,
            error: first_error.map(|e| e.to_string()),
            size_bytes,
            detail: CleanupDetail::FileParts { deleted, failed },
        }
    }

    /// Payloads are reclaimed through their metadata document; only orphans
    /// are deleted directly.
    async fn cleanup_orphan_blob(&self, object: &ListedObject, file_id: &str) -> Option<CleanupResult> {
        let has_meta = match keys::file_meta_key(file_id) {
            Ok(key) => self.engine.store().exists(&key).await,
            Err(e) => Err(e),
        };
        match has_meta {
            Ok(true) => None,
            Ok(false) => self.cleanup_single(object, ResourceType::File).await,
            Err(e) => Some(CleanupResult::failed(object, ResourceType::File, &e)),
        }
    }

    /// Deletes every message and run of a thread.
    async fn cascade_thread_children(&self, thread_id: &str) -> CascadeCounts {
        let mut counts = CascadeCounts::default();
        for kind in [EntityKind::Message, EntityKind::Run] {
            let prefix = match keys::child_prefix(kind, thread_id) {
                Ok(prefix) => prefix,
                Err(e) => {
                    warn!(thread_id, error = %e, "Cannot derive child prefix");
                    counts.errors += 1;
                    continue;
                },
            };
            let mut cursor = None;
            loop {
                let page = match self.list_page(&prefix, cursor).await {
                    Ok(page) => page,
                    Err(_) => {
                        counts.errors += 1;
                        break;
                    },
                };
                for child in page.objects {
                    match self.delete(&child.key, &child.tag).await {
                        DeleteOutcome::Deleted => counts.deletes += 1,
                        DeleteOutcome::Gone => {},
                        DeleteOutcome::Failed(e) => {
                            debug!(key = %child.key, error = %e, "Cascade delete failed");
                            counts.errors += 1;
                        },
                    }
                }
                match page.cursor {
                    Some(next) => cursor = Some(next),
                    None => break,
                }
            }
        }
        counts
    }

    /// Deletes every thread recorded with `parentId == assistant_id`, each
    /// with its own cascade.
    async fn cascade_assistant_threads(&self, assistant_id: &str) -> CascadeCounts {
        let mut counts = CascadeCounts::default();
        let prefix = keys::prefix_for(EntityKind::Thread);
        let mut cursor = None;

        loop {
            let page = match self.list_page(&prefix, cursor).await {
                Ok(page) => page,
                Err(_) => {
                    counts.errors += 1;
                    break;
                },
            };
            let owned = page.objects.into_iter().filter(|thread| {
                ObjectMetadata::from_wire(&thread.metadata)
                    .is_ok_and(|m| m.parent_id() == Some(assistant_id))
            });
            for thread in owned {
                let Some(parsed) = keys::parse_key(&thread.key, EntityKind::Thread) else {
                    counts.errors += 1;
                    continue;
                };
                counts.absorb(self.cascade_thread_children(&parsed.id).await);
                match self.delete(&thread.key, &thread.tag).await {
                    DeleteOutcome::Deleted => counts.deletes += 1,
                    DeleteOutcome::Gone => {},
                    DeleteOutcome::Failed(e) => {
                        debug!(key = %thread.key, error = %e, "Cascade delete failed");
                        counts.errors += 1;
                    },
                }
            }
            match page.cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        counts
    }

    /// Lists one page of cascade targets under the rate limiter.
    async fn list_page(&self, prefix: &str, cursor: Option<String>) -> Result<ListPage> {
        if let Some(limiter) = &self.limiter {
            limiter.wait_for_slot().await;
        }
        let request = ListRequest::new(prefix)
            .with_limit(self.page_size)
            .with_cursor(cursor);
        self.engine.store().list(request).await.inspect_err(|e| {
            warn!(prefix, error = %e, "Cascade listing failed");
        })
    }

    async fn delete(&self, key: &str, tag: &ETag) -> DeleteOutcome {
        if self.dry_run {
            return DeleteOutcome::Deleted;
        }
        match self
            .engine
            .delete_with_cas(key, Some(tag.clone()))
            .await
            .into_result()
        {
            Ok(true) => DeleteOutcome::Deleted,
            Ok(false) | Err(Error::NotFound(_)) => DeleteOutcome::Gone,
            Err(e) => DeleteOutcome::Failed(e),
        }
    }
}

const fn cascade_detail(counts: CascadeCounts) -> CleanupDetail {
    CleanupDetail::Cascade {
        deletes: counts.deletes,
        errors: counts.errors,
    }
}

/// Adapts the handler to the batch processor for one resource type.
#[derive(Debug, Clone)]
pub struct CleanupTransform {
    handler: Arc<ResourceCleanupHandler>,
    resource_type: ResourceType,
}

impl CleanupTransform {
    /// Creates a transform.
    #[must_use]
    pub const fn new(handler: Arc<ResourceCleanupHandler>, resource_type: ResourceType) -> Self {
        Self {
            handler,
            resource_type,
        }
    }
}

#[async_trait]
impl BatchTransform for CleanupTransform {
    type Item = CleanupResult;

    async fn apply(&self, batch: Vec<ListedObject>) -> Result<Vec<CleanupResult>> {
        Ok(self
            .handler
            .process_batch_cleanup(batch, self.resource_type)
            .await)
    }
}
