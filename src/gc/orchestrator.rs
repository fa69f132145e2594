//! GC orchestration across resource types.

use super::batch::{BatchOptions, BatchProcessor};
use super::cleanup::{CleanupTransform, ResourceCleanupHandler};
use super::rate_limit::RateLimiter;
use crate::models::{
    GcConfig, GcConfigOverrides, GcOperationResult, GcStatus, OverallStats, ResourceStats,
    ResourceType,
};
use crate::observability::{RequestContext, current_request_id, scope_request_context};
use crate::storage::traits::ObjectStore;
use chrono::Utc;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, instrument, warn};

/// Converts a duration to milliseconds, saturating at `u64::MAX`.
#[inline]
fn duration_to_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Converts u64 to f64 for metrics, capping at `u32::MAX`.
#[inline]
fn u64_to_f64(value: u64) -> f64 {
    let capped = u32::try_from(value).unwrap_or(u32::MAX);
    f64::from(capped)
}

/// Runs garbage collection operations against one store.
///
/// The orchestrator holds the default [`GcConfig`] and the rate limiter shared
/// by every operation it runs. An operation whose overrides change the rate
/// gets a limiter of its own.
///
/// # Example
///
/// ```rust,ignore
/// use ttlstore::gc::{GcConfigOverrides, GcOrchestrator};
///
/// let gc = GcOrchestrator::new(store, GcConfig::default());
/// let report = gc
///     .execute_gc(&GcConfigOverrides::new().with_dry_run(true))
///     .await;
/// println!("{}", report.summary());
/// ```
pub struct GcOrchestrator {
    store: Arc<dyn ObjectStore>,
    defaults: GcConfig,
    limiter: Arc<RateLimiter>,
}

impl fmt::Debug for GcOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GcOrchestrator")
            .field("defaults", &self.defaults)
            .field("limiter", &self.limiter)
            .finish_non_exhaustive()
    }
}

impl GcOrchestrator {
    /// Creates an orchestrator with the given defaults.
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>, defaults: GcConfig) -> Self {
        let limiter = Arc::new(RateLimiter::new(defaults.rate_limit_per_second));
        Self {
            store,
            defaults,
            limiter,
        }
    }

    /// Default configuration.
    #[must_use]
    pub const fn defaults(&self) -> &GcConfig {
        &self.defaults
    }

    /// Runs one GC operation.
    ///
    /// Overrides are merged onto the defaults and validated; a validation
    /// failure yields a `failed` result without touching the store. Types are
    /// swept in [`ResourceType::PRIORITY`] order. Per-object and per-type
    /// failures are recorded in the result and never stop the operation, so
    /// a validated operation always ends `completed`.
    ///
    /// The configured timeout is advisory: overrunning it is logged.
    pub async fn execute_gc(&self, overrides: &GcConfigOverrides) -> GcOperationResult {
        let context = RequestContext::with_prefix("gc");
        let operation_id = context.request_id().to_string();
        scope_request_context(context, self.run_operation(operation_id, overrides)).await
    }

    #[instrument(
        name = "ttlstore.gc.execute",
        skip_all,
        fields(
            request_id = tracing::field::Empty,
            component = "gc",
            operation = "execute_gc",
            operation_id = %operation_id
        )
    )]
    async fn run_operation(
        &self,
        operation_id: String,
        overrides: &GcConfigOverrides,
    ) -> GcOperationResult {
        if let Some(request_id) = current_request_id() {
            tracing::Span::current().record("request_id", request_id.as_str());
        }

        let start = Instant::now();
        let merged = self.defaults.clone().merged(overrides);
        let mut result = GcOperationResult {
            operation_id,
            status: GcStatus::InProgress,
            started_at: Utc::now(),
            completed_at: None,
            dry_run: merged.dry_run,
            config: merged.clone(),
            resource_stats: BTreeMap::new(),
            overall_stats: OverallStats::default(),
            errors: Vec::new(),
        };

        let config = match merged.validated() {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, "GC configuration rejected");
                result.errors.push(e.to_string());
                result.status = GcStatus::Failed;
                result.completed_at = Some(Utc::now());
                record_run_metrics(&result, start.elapsed());
                return result;
            },
        };
        result.config = config.clone();

        info!(
            resource_types = ?config.resource_types,
            dry_run = config.dry_run,
            batch_size = config.batch_size,
            "Starting GC"
        );

        let limiter = if config.rate_limit_per_second == self.limiter.max_per_window() {
            Arc::clone(&self.limiter)
        } else {
            Arc::new(RateLimiter::new(config.rate_limit_per_second))
        };
        let processor = BatchProcessor::new(Arc::clone(&self.store), Arc::clone(&limiter));
        let handler = Arc::new(
            ResourceCleanupHandler::new(Arc::clone(&self.store), config.batch_size, config.dry_run)
                .with_rate_limiter(limiter),
        );
        let options = BatchOptions::from(&config);

        for &resource_type in &config.resource_types {
            let (stats, sweep_errors) =
                sweep_type(&processor, &handler, resource_type, options).await;
            result.overall_stats.absorb(&stats);
            result.errors.extend(
                sweep_errors
                    .into_iter()
                    .map(|e| format!("{resource_type}: {e}")),
            );
            result
                .resource_stats
                .insert(resource_type.as_str().to_string(), stats);
        }

        let elapsed = start.elapsed();
        if duration_to_millis(elapsed) > config.timeout_ms {
            warn!(
                elapsed_ms = duration_to_millis(elapsed),
                timeout_ms = config.timeout_ms,
                "GC exceeded its advisory timeout"
            );
        }

        result.status = GcStatus::Completed;
        result.completed_at = Some(Utc::now());
        record_run_metrics(&result, elapsed);

        info!(
            total_processed = result.overall_stats.total_processed,
            total_cleaned = result.overall_stats.total_cleaned,
            total_failed = result.overall_stats.total_failed,
            total_size_bytes = result.overall_stats.total_size_bytes,
            duration_ms = duration_to_millis(elapsed),
            dry_run = result.dry_run,
            "GC completed"
        );
        result
    }
}

/// Sweeps one type and folds the batch summary into statistics.
///
/// Also returns the sweep-level errors (failed listings and batches), which
/// belong in the operation's error list. `expired_count` counts the cleanup
/// results, so expired objects that vanished before their delete are not
/// included.
async fn sweep_type(
    processor: &BatchProcessor,
    handler: &Arc<ResourceCleanupHandler>,
    resource_type: ResourceType,
    options: BatchOptions,
) -> (ResourceStats, Vec<String>) {
    let start = Instant::now();
    let transform = CleanupTransform::new(Arc::clone(handler), resource_type);
    let summary = processor
        .process_in_batches(resource_type, &transform, options)
        .await;

    let mut stats = ResourceStats::new(resource_type);
    stats.total_found = summary.total_processed;
    stats.expired_count = summary.results.len();
    stats.errors.clone_from(&summary.errors);
    for outcome in summary.results {
        if outcome.success {
            stats.cleaned_count += 1;
            stats.total_size_bytes += outcome.size_bytes;
        } else {
            stats.failed_count += 1;
            if let Some(error) = outcome.error {
                stats.errors.push(format!("{}: {error}", outcome.key));
            }
        }
    }
    stats.duration_ms = duration_to_millis(start.elapsed());
    (stats, summary.errors)
}

fn record_run_metrics(result: &GcOperationResult, elapsed: Duration) {
    let status = match result.status {
        GcStatus::InProgress => "in_progress",
        GcStatus::Completed => "completed",
        GcStatus::Failed => "failed",
    };
    metrics::counter!(
        "gc_runs_total",
        "status" => status,
        "dry_run" => result.dry_run.to_string()
    )
    .increment(1);
    metrics::histogram!("gc_duration_ms").record(u64_to_f64(duration_to_millis(elapsed)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MetadataMap;
    use crate::models::metadata::{EXPIRES_AT, format_timestamp};
    use crate::storage::memory::InMemoryObjectStore;
    use bytes::Bytes;

    fn expired() -> MetadataMap {
        let mut map = MetadataMap::new();
        map.insert(
            EXPIRES_AT.to_string(),
            format_timestamp(Utc::now() - chrono::TimeDelta::seconds(1)),
        );
        map
    }

    fn fast() -> GcConfigOverrides {
        GcConfigOverrides::new().with_inter_batch_delay_ms(0)
    }

    #[tokio::test]
    async fn test_invalid_overrides_fail_without_sweeping() {
        let store = Arc::new(InMemoryObjectStore::new());
        store
            .put("runs/t/r.json", Bytes::new(), expired())
            .await
            .expect("put");

        let gc = GcOrchestrator::new(store.clone(), GcConfig::default());
        let result = gc.execute_gc(&fast().with_batch_size(0)).await;

        assert_eq!(result.status, GcStatus::Failed);
        assert_eq!(result.errors.len(), 1);
        assert!(result.resource_stats.is_empty());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_operation_id_and_stats_per_requested_type() {
        let store = Arc::new(InMemoryObjectStore::new());
        store
            .put("runs/t/r1.json", Bytes::from_static(b"abc"), expired())
            .await
            .expect("put");
        store
            .put("runs/t/r2.json", Bytes::new(), MetadataMap::new())
            .await
            .expect("put");

        let gc = GcOrchestrator::new(store.clone(), GcConfig::default());
        let result = gc
            .execute_gc(&fast().with_resource_types(vec![ResourceType::Run]))
            .await;

        assert!(result.operation_id.starts_with("gc_"));
        assert_eq!(result.status, GcStatus::Completed);
        assert!(result.completed_at.is_some());
        let runs = result.stats_for(ResourceType::Run).expect("run stats");
        assert_eq!(runs.total_found, 2);
        assert_eq!(runs.expired_count, 1);
        assert_eq!(runs.cleaned_count, 1);
        assert_eq!(runs.total_size_bytes, 3);
        assert!(result.stats_for(ResourceType::Thread).is_none());
        assert_eq!(store.keys().await, vec!["runs/t/r2.json".to_string()]);
    }

    #[tokio::test]
    async fn test_result_serializes_camel_case() {
        let store = Arc::new(InMemoryObjectStore::new());
        let gc = GcOrchestrator::new(store, GcConfig::default());
        let result = gc.execute_gc(&fast().with_dry_run(true)).await;

        let json = serde_json::to_value(&result).expect("serialize");
        assert_eq!(json["status"], "completed");
        assert_eq!(json["dryRun"], true);
        assert!(json["resourceStats"]["assistant"]["cleanedCount"].is_number());
        assert!(json["overallStats"]["totalProcessed"].is_number());
    }
}
