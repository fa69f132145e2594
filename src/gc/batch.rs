//! Paged, rate-limited, bounded-concurrency batch processing.
//!
//! The processor pages through one resource type's key prefix and hands each
//! page to a [`BatchTransform`]. Up to `max_concurrent_batches` transforms run
//! at once; the processor then waits for the whole group before listing more.

use super::rate_limit::RateLimiter;
use crate::models::metadata::expires_at_from_wire;
use crate::models::{GcConfig, ObjectMetadata, ResourceType};
use crate::storage::keys;
use crate::storage::traits::{ListRequest, ListedEntry, ObjectStore};
use crate::storage::ttl;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// A listed object with its expiry already decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedObject {
    /// Raw listing entry.
    pub entry: ListedEntry,
    /// Parsed metadata; `None` if the envelope is foreign or incomplete.
    pub metadata: Option<ObjectMetadata>,
    /// Expiration read from metadata.
    pub expires_at: Option<DateTime<Utc>>,
    /// Whether `expires_at` had passed at listing time.
    pub expired: bool,
}

impl ListedObject {
    /// Attaches expiry information to a listing entry.
    #[must_use]
    pub fn from_entry(entry: ListedEntry, now: DateTime<Utc>) -> Self {
        let expires_at = expires_at_from_wire(&entry.metadata).unwrap_or_else(|e| {
            debug!(key = %entry.key, error = %e, "Ignoring unparseable expiresAt");
            None
        });
        let metadata = ObjectMetadata::from_wire(&entry.metadata).ok();
        Self {
            expired: ttl::is_expired_at(expires_at, now),
            expires_at,
            metadata,
            entry,
        }
    }

    /// Store key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.entry.key
    }
}

/// Work applied to each listed page.
#[async_trait]
pub trait BatchTransform: Send + Sync {
    /// Per-object outcome.
    type Item: Send;

    /// Processes one page. An error fails the whole page.
    async fn apply(&self, batch: Vec<ListedObject>) -> Result<Vec<Self::Item>>;
}

/// Knobs of one [`BatchProcessor::process_in_batches`] run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOptions {
    /// Objects per listing page.
    pub batch_size: usize,
    /// Transforms in flight before the processor waits.
    pub max_concurrent_batches: usize,
    /// Cap on objects examined. `None` is unbounded.
    pub max_objects: Option<usize>,
    /// Retry a failed listing instead of stopping.
    pub continue_on_errors: bool,
    /// Pause between pages.
    pub inter_batch_delay: Duration,
    /// Consecutive listing failures tolerated on one cursor.
    pub max_list_retries: u32,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self::from(&GcConfig::default())
    }
}

impl From<&GcConfig> for BatchOptions {
    fn from(config: &GcConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            max_concurrent_batches: config.max_concurrent_batches,
            max_objects: config.max_objects_per_type,
            continue_on_errors: config.continue_on_errors,
            inter_batch_delay: Duration::from_millis(config.inter_batch_delay_ms),
            max_list_retries: config.max_list_retries,
        }
    }
}

/// Merged outcome of every batch of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSummary<T> {
    /// Objects listed and dispatched.
    pub total_processed: usize,
    /// Listing failures plus failed batches.
    pub total_errors: usize,
    /// Per-object outcomes from successful batches.
    pub results: Vec<T>,
    /// Error messages.
    pub errors: Vec<String>,
}

impl<T> Default for BatchSummary<T> {
    fn default() -> Self {
        Self {
            total_processed: 0,
            total_errors: 0,
            results: Vec::new(),
            errors: Vec::new(),
        }
    }
}

impl<T> BatchSummary<T> {
    fn record_error(&mut self, message: String) {
        self.total_errors += 1;
        self.errors.push(message);
    }
}

type PendingBatch<'a, T> = Pin<Box<dyn Future<Output = Result<Vec<T>>> + Send + 'a>>;

/// Pages through the store under a shared rate limiter.
#[derive(Clone)]
pub struct BatchProcessor {
    store: Arc<dyn ObjectStore>,
    limiter: Arc<RateLimiter>,
}

impl fmt::Debug for BatchProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchProcessor")
            .field("limiter", &self.limiter)
            .finish_non_exhaustive()
    }
}

impl BatchProcessor {
    /// Creates a processor.
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>, limiter: Arc<RateLimiter>) -> Self {
        Self { store, limiter }
    }

    /// Sweeps one resource type.
    ///
    /// Each iteration takes a rate-limit slot, lists a page under the type's
    /// prefix, truncates it at `max_objects` and queues it on `transform`.
    /// The loop ends when the listing has no cursor, the cap is reached, or
    /// listing fails and may not be retried. With `continue_on_errors`, a
    /// failed listing is retried on the same cursor up to `max_list_retries`
    /// consecutive times.
    #[instrument(
        name = "ttlstore.gc.batch",
        skip_all,
        fields(
            component = "gc",
            operation = "process_in_batches",
            resource_type = %resource_type,
            batch_size = options.batch_size
        )
    )]
    pub async fn process_in_batches<T>(
        &self,
        resource_type: ResourceType,
        transform: &T,
        options: BatchOptions,
    ) -> BatchSummary<T::Item>
    where
        T: BatchTransform + ?Sized,
    {
        let prefix = keys::prefix_for(resource_type.into());
        let concurrency = options.max_concurrent_batches.max(1);
        let max_list_failures = options.max_list_retries.max(1);

        let mut summary = BatchSummary::default();
        let mut in_flight: Vec<PendingBatch<'_, T::Item>> = Vec::new();
        let mut cursor: Option<String> = None;
        let mut list_failures = 0u32;

        loop {
            self.limiter.wait_for_slot().await;

            let request = ListRequest::new(prefix.clone())
                .with_limit(options.batch_size.max(1))
                .with_cursor(cursor.clone());
            let page = match self.store.list(request).await {
                Ok(page) => {
                    list_failures = 0;
                    page
                },
                Err(e) => {
                    list_failures += 1;
                    warn!(
                        prefix = %prefix,
                        attempt = list_failures,
                        error = %e,
                        "Listing failed"
                    );
                    summary.record_error(format!("listing '{prefix}' failed: {e}"));
                    if !options.continue_on_errors || list_failures >= max_list_failures {
                        break;
                    }
                    tokio::time::sleep(options.inter_batch_delay).await;
                    continue;
                },
            };

            let now = Utc::now();
            let mut batch: Vec<ListedObject> = page
                .objects
                .into_iter()
                .map(|entry| ListedObject::from_entry(entry, now))
                .collect();
            if let Some(max) = options.max_objects {
                batch.truncate(max.saturating_sub(summary.total_processed));
            }
            summary.total_processed += batch.len();

            if !batch.is_empty() {
                debug!(objects = batch.len(), "Dispatching batch");
                in_flight.push(transform.apply(batch));
                if in_flight.len() >= concurrency {
                    flush(&mut in_flight, &mut summary).await;
                }
            }

            let cap_reached = options
                .max_objects
                .is_some_and(|max| summary.total_processed >= max);
            match page.cursor {
                Some(next) if !cap_reached => cursor = Some(next),
                _ => break,
            }
            tokio::time::sleep(options.inter_batch_delay).await;
        }

        flush(&mut in_flight, &mut summary).await;
        summary
    }
}

async fn flush<T>(in_flight: &mut Vec<PendingBatch<'_, T>>, summary: &mut BatchSummary<T>) {
    for outcome in join_all(std::mem::take(in_flight)).await {
        match outcome {
            Ok(items) => summary.results.extend(items),
            Err(e) => summary.record_error(format!("batch failed: {e}")),
        }
    }
}
