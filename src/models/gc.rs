//! Garbage collection configuration and report types.
//!
//! These are the serialized shapes returned to GC callers; field names are
//! camelCase on the wire.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Smallest accepted batch size.
pub const MIN_BATCH_SIZE: usize = 1;
/// Largest accepted batch size.
pub const MAX_BATCH_SIZE: usize = 1000;
/// Smallest accepted advisory timeout.
pub const MIN_TIMEOUT_MS: u64 = 1000;

/// Resource types the garbage collector can sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    /// Assistants (cascade to their threads).
    Assistant,
    /// Threads (cascade to messages and runs).
    Thread,
    /// Messages.
    Message,
    /// Runs.
    Run,
    /// Files (metadata and blob).
    File,
}

impl ResourceType {
    /// All types in sweep priority order: parents before their dependents.
    pub const PRIORITY: [Self; 5] = [
        Self::Assistant,
        Self::Thread,
        Self::Message,
        Self::Run,
        Self::File,
    ];

    /// Returns the wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Assistant => "assistant",
            Self::Thread => "thread",
            Self::Message => "message",
            Self::Run => "run",
            Self::File => "file",
        }
    }

    /// Parses a wire name (case-insensitive, plural forms accepted).
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "assistant" | "assistants" => Some(Self::Assistant),
            "thread" | "threads" => Some(Self::Thread),
            "message" | "messages" => Some(Self::Message),
            "run" | "runs" => Some(Self::Run),
            "file" | "files" => Some(Self::File),
            _ => None,
        }
    }

    /// Position in [`Self::PRIORITY`].
    #[must_use]
    pub const fn priority(self) -> usize {
        self as usize
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Effective configuration of one GC operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GcConfig {
    /// Types to sweep. Always processed in [`ResourceType::PRIORITY`] order.
    pub resource_types: Vec<ResourceType>,
    /// Objects listed per page.
    pub batch_size: usize,
    /// Cap on objects examined per type. `None` sweeps everything.
    pub max_objects_per_type: Option<usize>,
    /// Per-batch transforms allowed in flight at once.
    pub max_concurrent_batches: usize,
    /// Keep sweeping a type after a listing failure.
    pub continue_on_errors: bool,
    /// Decide without deleting.
    pub dry_run: bool,
    /// Advisory wall-clock budget; exceeded budgets are logged, not enforced.
    pub timeout_ms: u64,
    /// Ceiling on listing calls per second.
    pub rate_limit_per_second: u32,
    /// Pause between pages.
    pub inter_batch_delay_ms: u64,
    /// Listing attempts on the same cursor before a type is abandoned.
    pub max_list_retries: u32,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            resource_types: ResourceType::PRIORITY.to_vec(),
            batch_size: 100,
            max_objects_per_type: Some(10_000),
            max_concurrent_batches: 3,
            continue_on_errors: true,
            dry_run: false,
            timeout_ms: 300_000,
            rate_limit_per_second: 10,
            inter_batch_delay_ms: 100,
            max_list_retries: 3,
        }
    }
}

impl GcConfig {
    /// Applies overrides on top of `self`.
    #[must_use]
    pub fn merged(mut self, overrides: &GcConfigOverrides) -> Self {
        if let Some(types) = &overrides.resource_types {
            self.resource_types.clone_from(types);
        }
        if let Some(batch_size) = overrides.batch_size {
            self.batch_size = batch_size;
        }
        if let Some(max) = overrides.max_objects_per_type {
            self.max_objects_per_type = max;
        }
        if let Some(n) = overrides.max_concurrent_batches {
            self.max_concurrent_batches = n;
        }
        if let Some(v) = overrides.continue_on_errors {
            self.continue_on_errors = v;
        }
        if let Some(v) = overrides.dry_run {
            self.dry_run = v;
        }
        if let Some(v) = overrides.timeout_ms {
            self.timeout_ms = v;
        }
        if let Some(v) = overrides.rate_limit_per_second {
            self.rate_limit_per_second = v;
        }
        if let Some(v) = overrides.inter_batch_delay_ms {
            self.inter_batch_delay_ms = v;
        }
        self
    }

    /// Validates bounds and normalizes the type list into priority order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] describing the first violated bound.
    pub fn validated(mut self) -> Result<Self> {
        if !(MIN_BATCH_SIZE..=MAX_BATCH_SIZE).contains(&self.batch_size) {
            return Err(Error::InvalidInput(format!(
                "batchSize must be between {MIN_BATCH_SIZE} and {MAX_BATCH_SIZE}, got {}",
                self.batch_size
            )));
        }
        if self.timeout_ms < MIN_TIMEOUT_MS {
            return Err(Error::InvalidInput(format!(
                "timeoutMs must be at least {MIN_TIMEOUT_MS}, got {}",
                self.timeout_ms
            )));
        }
        if self.max_concurrent_batches == 0 {
            return Err(Error::InvalidInput(
                "maxConcurrentBatches must be at least 1".to_string(),
            ));
        }
        if self.rate_limit_per_second == 0 {
            return Err(Error::InvalidInput(
                "rateLimitPerSecond must be at least 1".to_string(),
            ));
        }
        if self.resource_types.is_empty() {
            return Err(Error::InvalidInput(
                "at least one resource type is required".to_string(),
            ));
        }
        self.resource_types.sort_by_key(|t| t.priority());
        self.resource_types.dedup();
        Ok(self)
    }
}

/// Caller supplied changes to the default [`GcConfig`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GcConfigOverrides {
    /// Replacement type list.
    pub resource_types: Option<Vec<ResourceType>>,
    /// Replacement batch size.
    pub batch_size: Option<usize>,
    /// Replacement per-type cap (`Some(None)` removes the cap).
    pub max_objects_per_type: Option<Option<usize>>,
    /// Replacement concurrency cap.
    pub max_concurrent_batches: Option<usize>,
    /// Replacement listing-error policy.
    pub continue_on_errors: Option<bool>,
    /// Replacement dry-run flag.
    pub dry_run: Option<bool>,
    /// Replacement advisory timeout.
    pub timeout_ms: Option<u64>,
    /// Replacement rate limit.
    pub rate_limit_per_second: Option<u32>,
    /// Replacement inter-batch pause.
    pub inter_batch_delay_ms: Option<u64>,
}

impl GcConfigOverrides {
    /// Creates empty overrides.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts the sweep to the given types.
    #[must_use]
    pub fn with_resource_types(mut self, types: impl Into<Vec<ResourceType>>) -> Self {
        self.resource_types = Some(types.into());
        self
    }

    /// Sets the dry-run flag.
    #[must_use]
    pub const fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = Some(dry_run);
        self
    }

    /// Sets the batch size.
    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    /// Sets the per-type cap.
    #[must_use]
    pub const fn with_max_objects_per_type(mut self, max: Option<usize>) -> Self {
        self.max_objects_per_type = Some(max);
        self
    }

    /// Sets the inter-batch pause.
    #[must_use]
    pub const fn with_inter_batch_delay_ms(mut self, delay_ms: u64) -> Self {
        self.inter_batch_delay_ms = Some(delay_ms);
        self
    }
}

/// Terminal state of a GC operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GcStatus {
    /// Still running.
    InProgress,
    /// Ran to completion, possibly with per-object failures.
    Completed,
    /// Aborted by an orchestration-level error.
    Failed,
}

/// Statistics for one resource type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceStats {
    /// Type these numbers describe.
    pub resource_type: ResourceType,
    /// Objects listed.
    pub total_found: usize,
    /// Listed objects that were expired.
    pub expired_count: usize,
    /// Expired objects deleted (or that would be, in a dry run).
    pub cleaned_count: usize,
    /// Expired objects whose deletion failed.
    pub failed_count: usize,
    /// Bytes reclaimed.
    pub total_size_bytes: u64,
    /// Wall-clock time spent on this type.
    pub duration_ms: u64,
    /// Listing and per-object error messages.
    pub errors: Vec<String>,
}

impl ResourceStats {
    /// Creates empty statistics for a type.
    #[must_use]
    pub const fn new(resource_type: ResourceType) -> Self {
        Self {
            resource_type,
            total_found: 0,
            expired_count: 0,
            cleaned_count: 0,
            failed_count: 0,
            total_size_bytes: 0,
            duration_ms: 0,
            errors: Vec::new(),
        }
    }
}

/// Totals across all swept types.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverallStats {
    /// Objects listed.
    pub total_processed: usize,
    /// Objects deleted.
    pub total_cleaned: usize,
    /// Deletions that failed.
    pub total_failed: usize,
    /// Bytes reclaimed.
    pub total_size_bytes: u64,
    /// Sum of per-type durations.
    pub total_duration_ms: u64,
}

impl OverallStats {
    /// Folds one type's statistics into the totals.
    pub const fn absorb(&mut self, stats: &ResourceStats) {
        self.total_processed += stats.total_found;
        self.total_cleaned += stats.cleaned_count;
        self.total_failed += stats.failed_count;
        self.total_size_bytes += stats.total_size_bytes;
        self.total_duration_ms += stats.duration_ms;
    }
}

/// Report of one GC operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GcOperationResult {
    /// Unique operation id (`gc_<uuid>`).
    pub operation_id: String,
    /// Terminal state.
    pub status: GcStatus,
    /// Start time.
    pub started_at: DateTime<Utc>,
    /// End time, once finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Whether deletions were skipped.
    pub dry_run: bool,
    /// Effective configuration.
    pub config: GcConfig,
    /// Per-type statistics keyed by type name.
    pub resource_stats: BTreeMap<String, ResourceStats>,
    /// Totals.
    pub overall_stats: OverallStats,
    /// Operation-level errors.
    pub errors: Vec<String>,
}

impl GcOperationResult {
    /// Returns statistics for one type, if it was swept.
    #[must_use]
    pub fn stats_for(&self, resource_type: ResourceType) -> Option<&ResourceStats> {
        self.resource_stats.get(resource_type.as_str())
    }

    /// Returns a human-readable summary line.
    #[must_use]
    pub fn summary(&self) -> String {
        let action = if self.dry_run {
            "would delete"
        } else {
            "deleted"
        };
        format!(
            "GC {} {action} {} of {} objects ({} failed, {} bytes) in {}ms",
            self.operation_id,
            self.overall_stats.total_cleaned,
            self.overall_stats.total_processed,
            self.overall_stats.total_failed,
            self.overall_stats.total_size_bytes,
            self.overall_stats.total_duration_ms
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_type_parse() {
        assert_eq!(ResourceType::parse("Thread"), Some(ResourceType::Thread));
        assert_eq!(ResourceType::parse("files"), Some(ResourceType::File));
        assert_eq!(ResourceType::parse("vector_store"), None);
    }

    #[test]
    fn test_validated_sorts_into_priority_order() {
        let config = GcConfig {
            resource_types: vec![
                ResourceType::File,
                ResourceType::Thread,
                ResourceType::Assistant,
                ResourceType::Thread,
            ],
            ..GcConfig::default()
        }
        .validated()
        .expect("valid config");
        assert_eq!(
            config.resource_types,
            vec![
                ResourceType::Assistant,
                ResourceType::Thread,
                ResourceType::File
            ]
        );
    }

    #[test]
    fn test_validated_rejects_out_of_bounds() {
        let too_big = GcConfig::default().merged(&GcConfigOverrides::new().with_batch_size(5000));
        assert!(too_big.validated().is_err());

        let zero = GcConfig::default().merged(&GcConfigOverrides::new().with_batch_size(0));
        assert!(zero.validated().is_err());

        let short_timeout = GcConfig {
            timeout_ms: 10,
            ..GcConfig::default()
        };
        assert!(short_timeout.validated().is_err());

        let no_types = GcConfig::default()
            .merged(&GcConfigOverrides::new().with_resource_types(Vec::new()));
        assert!(no_types.validated().is_err());
    }

    #[test]
    fn test_merged_applies_only_present_fields() {
        let merged = GcConfig::default().merged(
            &GcConfigOverrides::new()
                .with_dry_run(true)
                .with_max_objects_per_type(None),
        );
        assert!(merged.dry_run);
        assert_eq!(merged.max_objects_per_type, None);
        assert_eq!(merged.batch_size, GcConfig::default().batch_size);
    }

    #[test]
    fn test_report_wire_field_names() {
        let mut stats = BTreeMap::new();
        stats.insert(
            "thread".to_string(),
            ResourceStats::new(ResourceType::Thread),
        );
        let result = GcOperationResult {
            operation_id: "gc_1".to_string(),
            status: GcStatus::Completed,
            started_at: Utc::now(),
            completed_at: None,
            dry_run: true,
            config: GcConfig::default(),
            resource_stats: stats,
            overall_stats: OverallStats::default(),
            errors: Vec::new(),
        };
        let value = serde_json::to_value(&result).expect("serialize");
        assert_eq!(value["status"], "completed");
        assert_eq!(value["dryRun"], true);
        assert_eq!(value["resourceStats"]["thread"]["resourceType"], "thread");
        assert_eq!(value["resourceStats"]["thread"]["totalFound"], 0);
        assert_eq!(value["overallStats"]["totalCleaned"], 0);
        assert_eq!(value["config"]["batchSize"], 100);
        assert!(value.get("completedAt").is_none());
    }
}
