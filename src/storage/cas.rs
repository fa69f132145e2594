//! Compare-and-swap over ETags.
//!
//! The object store only hands out opaque version tags, so every mutation is a
//! get-compare-write cycle: read the current tag, compare it with the tag the
//! caller expects, write. A mismatch is a conflict, retried with exponential
//! backoff and jitter up to the policy's attempt budget. The window between
//! the compare and the write is not closed by the store; a writer racing
//! inside it is only caught by the next reader's compare.
//!
//! # Metrics
//!
//! - `cas_attempts_total`: every get-compare-write cycle
//! - `cas_conflicts_total`: cycles that hit a tag mismatch

use super::traits::{ETag, ObjectStore, StoredObject};
use super::ttl::{self, TtlPolicy};
use crate::models::metadata::expires_at_from_wire;
use crate::models::{MetadataKind, MetadataMap, ObjectMetadata, ObjectType};
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Backoff parameters of the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Values below 1 are treated as 1.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Upper bound on a single delay, before jitter.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub const fn single_attempt() -> Self {
        Self {
            max_retries: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Sets the attempt budget.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the backoff bounds.
    #[must_use]
    pub const fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    const fn attempt_budget(&self) -> u32 {
        if self.max_retries == 0 {
            1
        } else {
            self.max_retries
        }
    }

    /// Un-jittered delay after the `retry`-th failed attempt (0-based):
    /// `min(initial * 2^retry, max)`.
    #[must_use]
    pub fn base_delay(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.min(31));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Delay with ±10% jitter applied.
    #[must_use]
    pub fn jittered_delay(&self, retry: u32) -> Duration {
        self.base_delay(retry).mul_f64(0.2f64.mul_add(rand_float(), 0.9))
    }
}

/// The write a CAS mutation decided on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasWrite {
    /// Replace the object.
    Put {
        /// New value.
        value: Bytes,
        /// New metadata.
        metadata: MetadataMap,
    },
    /// Remove the object.
    Delete,
}

/// Outcome of one get-compare-write cycle.
#[derive(Debug)]
pub enum CasAttempt<T> {
    /// The write went through.
    Applied {
        /// Step-specific result.
        value: T,
        /// Tag after the write; `None` after a delete.
        tag: Option<ETag>,
    },
    /// The current tag did not match the expected one.
    Conflict {
        /// Contended key.
        key: String,
        /// Tag the attempt expected.
        expected: Option<ETag>,
        /// Tag found in the store; `None` if the object is gone.
        current: Option<ETag>,
    },
    /// The attempt failed for another reason.
    Failed(Error),
}

impl<T> CasAttempt<T> {
    /// Maps the applied value.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CasAttempt<U> {
        match self {
            Self::Applied { value, tag } => CasAttempt::Applied {
                value: f(value),
                tag,
            },
            Self::Conflict {
                key,
                expected,
                current,
            } => CasAttempt::Conflict {
                key,
                expected,
                current,
            },
            Self::Failed(e) => CasAttempt::Failed(e),
        }
    }

    fn from_error(error: Error) -> Self {
        match error {
            Error::Conflict {
                key,
                expected,
                current,
            } => Self::Conflict {
                key,
                expected: expected.map(ETag::new),
                current: current.map(ETag::new),
            },
            other => Self::Failed(other),
        }
    }
}

/// Result of a retried CAS operation.
#[derive(Debug)]
pub struct CasResult<T> {
    /// Final outcome.
    pub outcome: Result<T>,
    /// Tag after the last successful write, or the last tag observed on failure.
    pub tag: Option<ETag>,
    /// Attempts made; 0 if the request was rejected before reaching the store.
    pub attempts: u32,
}

impl<T> CasResult<T> {
    /// A request rejected before any attempt, e.g. for an invalid id or TTL.
    #[must_use]
    pub fn rejected(error: Error) -> Self {
        Self {
            outcome: Err(error),
            tag: None,
            attempts: 0,
        }
    }

    /// Returns `true` if the operation succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Returns `true` if the operation gave up on a tag conflict.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self.outcome, Err(Error::Conflict { .. }))
    }

    /// Discards attempt bookkeeping.
    ///
    /// # Errors
    ///
    /// Returns the final error if the operation failed.
    pub fn into_result(self) -> Result<T> {
        self.outcome
    }
}

/// One retryable unit of CAS work.
///
/// `attempt` is called once per try with the tag the loop currently expects:
/// the caller's initial tag first, then the tag reported by the last conflict.
#[async_trait]
pub trait CasStep: Send {
    /// Value produced on success.
    type Output: Send;

    /// Runs one get-compare-write cycle.
    async fn attempt(&mut self, engine: &CasEngine, expected: Option<ETag>)
    -> CasAttempt<Self::Output>;
}

/// ETag compare-and-swap engine with retry.
#[derive(Clone)]
pub struct CasEngine {
    store: Arc<dyn ObjectStore>,
    policy: RetryPolicy,
    ttl: TtlPolicy,
}

impl std::fmt::Debug for CasEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CasEngine")
            .field("policy", &self.policy)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl CasEngine {
    /// Creates an engine over a store.
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>, policy: RetryPolicy) -> Self {
        Self {
            store,
            policy,
            ttl: TtlPolicy::default(),
        }
    }

    /// Sets the TTL policy used when an update creates an object.
    #[must_use]
    pub const fn with_ttl_policy(mut self, ttl: TtlPolicy) -> Self {
        self.ttl = ttl;
        self
    }

    /// Returns a copy of this engine with a different retry policy.
    #[must_use]
    pub fn with_policy(&self, policy: RetryPolicy) -> Self {
        Self {
            store: Arc::clone(&self.store),
            policy,
            ttl: self.ttl,
        }
    }

    /// Returns the underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Returns the retry policy.
    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Returns the TTL policy.
    #[must_use]
    pub const fn ttl_policy(&self) -> &TtlPolicy {
        &self.ttl
    }

    /// Runs one get-compare-write cycle.
    ///
    /// With an `expected` tag, a missing object fails with
    /// [`Error::NotFound`] and a different tag is a conflict. Without one, the
    /// write is unconditional. `mutate` sees the current object and decides
    /// the write; an [`Error::Conflict`] it returns is reported as a conflict.
    /// On success the value is `true` for puts and for deletes that removed
    /// something.
    pub async fn cas_operation<F>(
        &self,
        key: &str,
        expected: Option<&ETag>,
        mutate: F,
    ) -> CasAttempt<bool>
    where
        F: FnOnce(Option<&StoredObject>) -> Result<CasWrite> + Send,
    {
        let current = match self.store.get(key).await {
            Ok(current) => current,
            Err(e) => return CasAttempt::Failed(e),
        };

        if let Some(expected) = expected {
            match &current {
                None => {
                    return CasAttempt::Failed(Error::NotFound(key.to_string()));
                },
                Some(object) if &object.tag != expected => {
                    return CasAttempt::Conflict {
                        key: key.to_string(),
                        expected: Some(expected.clone()),
                        current: Some(object.tag.clone()),
                    };
                },
                Some(_) => {},
            }
        }

        let write = match mutate(current.as_ref()) {
            Ok(write) => write,
            Err(e) => return CasAttempt::from_error(e),
        };

        match write {
            CasWrite::Put { value, metadata } => match self.store.put(key, value, metadata).await {
                Ok(tag) => CasAttempt::Applied {
                    value: true,
                    tag: Some(tag),
                },
                Err(e) => CasAttempt::Failed(e),
            },
            CasWrite::Delete => match self.store.delete(key).await {
                Ok(existed) => CasAttempt::Applied {
                    value: existed,
                    tag: None,
                },
                Err(e) => CasAttempt::Failed(e),
            },
        }
    }

    /// Drives a step until it succeeds, fails permanently or runs out of
    /// attempts.
    ///
    /// Conflicts and retryable errors sleep for
    /// `min(initial * 2^retry, max)` ±10% before the next attempt; a conflict
    /// also replaces the expected tag with the one it reported.
    pub async fn execute_with_retry<S>(
        &self,
        step: &mut S,
        initial_tag: Option<ETag>,
    ) -> CasResult<S::Output>
    where
        S: CasStep + ?Sized,
    {
        let budget = self.policy.attempt_budget();
        let mut expected = initial_tag;
        let mut attempts = 0;

        loop {
            attempts += 1;
            metrics::counter!("cas_attempts_total").increment(1);

            let error = match step.attempt(self, expected.clone()).await {
                CasAttempt::Applied { value, tag } => {
                    return CasResult {
                        outcome: Ok(value),
                        tag,
                        attempts,
                    };
                },
                CasAttempt::Conflict {
                    key,
                    expected: stale,
                    current,
                } => {
                    metrics::counter!("cas_conflicts_total").increment(1);
                    expected.clone_from(&current);
                    Error::Conflict {
                        key,
                        expected: stale.map(|t| t.as_str().to_string()),
                        current: current.map(|t| t.as_str().to_string()),
                    }
                },
                CasAttempt::Failed(error) => error,
            };

            if !error.is_retryable() || attempts >= budget {
                if error.is_retryable() {
                    warn!(attempts, error = %error, "CAS retries exhausted");
                }
                return CasResult {
                    outcome: Err(error),
                    tag: expected,
                    attempts,
                };
            }

            let delay = self.policy.jittered_delay(attempts - 1);
            debug!(
                attempts,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %error,
                "Retrying CAS operation"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Writes a value, optionally conditioned on a tag.
    ///
    /// After a conflict the next attempt expects the tag the conflict
    /// reported.
    #[instrument(
        name = "ttlstore.cas.put",
        skip_all,
        fields(component = "storage", operation = "cas_put", key = %key)
    )]
    pub async fn put_with_cas(
        &self,
        key: &str,
        value: Bytes,
        metadata: MetadataMap,
        expected: Option<ETag>,
    ) -> CasResult<ETag> {
        let mut step = PutStep {
            key: key.to_string(),
            value,
            metadata,
        };
        let result = self.execute_with_retry(&mut step, expected).await;
        CasResult {
            outcome: result.outcome.and_then(|()| {
                result
                    .tag
                    .clone()
                    .ok_or_else(|| Error::operation("cas_put", "store returned no tag"))
            }),
            tag: result.tag,
            attempts: result.attempts,
        }
    }

    /// Deletes an object, optionally conditioned on a tag.
    ///
    /// Succeeds with `false` when the object was already gone and no tag was
    /// expected.
    #[instrument(
        name = "ttlstore.cas.delete",
        skip_all,
        fields(component = "storage", operation = "cas_delete", key = %key)
    )]
    pub async fn delete_with_cas(&self, key: &str, expected: Option<ETag>) -> CasResult<bool> {
        let mut step = DeleteStep {
            key: key.to_string(),
        };
        self.execute_with_retry(&mut step, expected).await
    }

    /// Read-modify-write of a JSON document.
    ///
    /// Each attempt reads the current document, hands it to `updater` and
    /// writes the result against the tag just read. An existing object keeps
    /// its `createdAt`, and its `expiresAt` unless `ttl_secs` is given; a new
    /// object gets the TTL policy's default. An expired object counts as
    /// absent: `updater` sees `None` and the write starts a fresh envelope. `kind_of` derives the
    /// type-specific metadata from the new value.
    ///
    /// Unparseable stored JSON or metadata is [`Error::InvalidInput`] and is
    /// not retried; neither are errors returned by `updater`.
    #[instrument(
        name = "ttlstore.cas.update",
        skip_all,
        fields(component = "storage", operation = "cas_update", key = %key, object_type = %object_type)
    )]
    pub async fn update_with_cas<T, F>(
        &self,
        key: &str,
        object_type: ObjectType,
        ttl_secs: Option<u64>,
        kind_of: fn(&T) -> MetadataKind,
        updater: F,
    ) -> CasResult<T>
    where
        T: Serialize + DeserializeOwned + Send,
        F: FnMut(Option<T>) -> Result<T> + Send,
    {
        let mut step = UpdateStep {
            key: key.to_string(),
            object_type,
            ttl_secs,
            kind_of,
            updater,
            _value: PhantomData,
        };
        self.execute_with_retry(&mut step, None).await
    }

    /// Resets an object's expiration to `now + ttl_secs`.
    ///
    /// The value and the rest of the metadata are rewritten unchanged. An
    /// object already past its expiration is [`Error::NotFound`].
    #[instrument(
        name = "ttlstore.cas.extend_ttl",
        skip_all,
        fields(component = "storage", operation = "cas_extend_ttl", key = %key, ttl_secs)
    )]
    pub async fn extend_ttl(&self, key: &str, ttl_secs: u64) -> CasResult<ObjectMetadata> {
        let mut step = ExtendStep {
            key: key.to_string(),
            ttl_secs,
        };
        self.execute_with_retry(&mut step, None).await
    }
}

struct PutStep {
    key: String,
    value: Bytes,
    metadata: MetadataMap,
}

#[async_trait]
impl CasStep for PutStep {
    type Output = ();

    async fn attempt(&mut self, engine: &CasEngine, expected: Option<ETag>) -> CasAttempt<()> {
        let write = CasWrite::Put {
            value: self.value.clone(),
            metadata: self.metadata.clone(),
        };
        engine
            .cas_operation(&self.key, expected.as_ref(), |_| Ok(write))
            .await
            .map(|_| ())
    }
}

struct DeleteStep {
    key: String,
}

#[async_trait]
impl CasStep for DeleteStep {
    type Output = bool;

    async fn attempt(&mut self, engine: &CasEngine, expected: Option<ETag>) -> CasAttempt<bool> {
        engine
            .cas_operation(&self.key, expected.as_ref(), |_| Ok(CasWrite::Delete))
            .await
    }
}

struct UpdateStep<T, F> {
    key: String,
    object_type: ObjectType,
    ttl_secs: Option<u64>,
    kind_of: fn(&T) -> MetadataKind,
    updater: F,
    _value: PhantomData<fn() -> T>,
}

impl<T, F> UpdateStep<T, F>
where
    T: Serialize + DeserializeOwned + Send,
    F: FnMut(Option<T>) -> Result<T> + Send,
{
    fn prepare(
        &mut self,
        current: Option<&StoredObject>,
        default_ttl: u64,
    ) -> Result<(T, CasWrite)> {
        let now = Utc::now();
        let live = match current {
            Some(object) => {
                let expires_at = expires_at_from_wire(&object.metadata)?;
                (!ttl::is_expired_at(expires_at, now)).then_some(object)
            },
            None => None,
        };
        let (existing, previous) = match live {
            Some(object) => {
                let value = serde_json::from_slice::<T>(&object.value).map_err(|e| {
                    Error::InvalidInput(format!("stored JSON at '{}': {e}", self.key))
                })?;
                let metadata = ObjectMetadata::from_wire(&object.metadata)?;
                (Some(value), Some(metadata))
            },
            None => (None, None),
        };

        let next = (self.updater)(existing)?;
        let bytes = serde_json::to_vec(&next).map_err(|e| Error::operation("cas_update", e))?;

        let ttl_secs = self.ttl_secs.unwrap_or(default_ttl);
        let mut metadata =
            ttl::metadata_envelope(self.object_type, ttl_secs, (self.kind_of)(&next), now);
        if let Some(previous) = previous {
            metadata.created_at = previous.created_at;
            if self.ttl_secs.is_none() {
                metadata.expires_at = previous.expires_at;
            }
        }

        Ok((
            next,
            CasWrite::Put {
                value: Bytes::from(bytes),
                metadata: metadata.to_wire(),
            },
        ))
    }
}

#[async_trait]
impl<T, F> CasStep for UpdateStep<T, F>
where
    T: Serialize + DeserializeOwned + Send,
    F: FnMut(Option<T>) -> Result<T> + Send,
{
    type Output = T;

    async fn attempt(&mut self, engine: &CasEngine, _expected: Option<ETag>) -> CasAttempt<T> {
        let current = match engine.store().get(&self.key).await {
            Ok(current) => current,
            Err(e) => return CasAttempt::Failed(e),
        };
        let default_ttl = engine.ttl_policy().default_for(self.object_type);
        let (next, write) = match self.prepare(current.as_ref(), default_ttl) {
            Ok(prepared) => prepared,
            Err(e) => return CasAttempt::Failed(e),
        };

        let read_tag = current.map(|object| object.tag);
        let key = self.key.clone();
        let created_concurrently = |now: Option<&StoredObject>| {
            if read_tag.is_none()
                && let Some(object) = now
            {
                return Err(Error::Conflict {
                    key,
                    expected: None,
                    current: Some(object.tag.as_str().to_string()),
                });
            }
            Ok(write)
        };

        engine
            .cas_operation(&self.key, read_tag.as_ref(), created_concurrently)
            .await
            .map(|_| next)
    }
}

struct ExtendStep {
    key: String,
    ttl_secs: u64,
}

#[async_trait]
impl CasStep for ExtendStep {
    type Output = ObjectMetadata;

    async fn attempt(
        &mut self,
        engine: &CasEngine,
        _expected: Option<ETag>,
    ) -> CasAttempt<ObjectMetadata> {
        let current = match engine.store().get(&self.key).await {
            Ok(Some(current)) => current,
            Ok(None) => return CasAttempt::Failed(Error::NotFound(self.key.clone())),
            Err(e) => return CasAttempt::Failed(e),
        };
        let now = Utc::now();
        let metadata = match ObjectMetadata::from_wire(&current.metadata) {
            Ok(metadata) if ttl::is_expired_at(metadata.expires_at, now) => {
                return CasAttempt::Failed(Error::NotFound(self.key.clone()));
            },
            Ok(metadata) => ttl::extend_expiration(metadata, self.ttl_secs, now),
            Err(e) => return CasAttempt::Failed(e),
        };
        let write = CasWrite::Put {
            value: current.value.clone(),
            metadata: metadata.to_wire(),
        };
        engine
            .cas_operation(&self.key, Some(&current.tag), |_| Ok(write))
            .await
            .map(|_| metadata)
    }
}

/// Generates a random float between 0.0 and 1.0.
///
/// Uses a time-seeded xorshift; good enough for jitter.
#[allow(clippy::cast_precision_loss)]
fn rand_float() -> f64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    let seed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(42, |d| {
            #[allow(clippy::cast_possible_truncation)]
            let nanos = d.as_nanos() as u64;
            nanos | 1
        });

    let mut x = seed;
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;

    (x as f64) / (u64::MAX as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::InMemoryObjectStore;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    struct Counter {
        value: u32,
    }

    fn json_kind(_: &Counter) -> MetadataKind {
        MetadataKind::Json { parent_id: None }
    }

    fn fast_policy(attempts: u32) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_retries(attempts)
            .with_backoff(Duration::from_millis(1), Duration::from_millis(4))
    }

    fn engine(attempts: u32) -> CasEngine {
        CasEngine::new(Arc::new(InMemoryObjectStore::new()), fast_policy(attempts))
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::default()
            .with_backoff(Duration::from_millis(100), Duration::from_millis(350));
        assert_eq!(policy.base_delay(0), Duration::from_millis(100));
        assert_eq!(policy.base_delay(1), Duration::from_millis(200));
        assert_eq!(policy.base_delay(2), Duration::from_millis(350));
        assert_eq!(policy.base_delay(40), Duration::from_millis(350));
    }

    #[test]
    fn test_jitter_stays_within_ten_percent() {
        let policy = RetryPolicy::default();
        for _ in 0..100 {
            let delay = policy.jittered_delay(0).as_secs_f64();
            assert!((0.089..=0.111).contains(&delay), "delay = {delay}");
        }
    }

    #[tokio::test]
    async fn test_expected_tag_on_missing_object_is_not_found() {
        let engine = engine(3);
        let result = engine
            .put_with_cas(
                "threads/t.json",
                Bytes::from_static(b"{}"),
                MetadataMap::new(),
                Some(ETag::new("stale")),
            )
            .await;
        assert!(matches!(result.outcome, Err(Error::NotFound(_))));
        assert_eq!(result.attempts, 1);
    }

    #[tokio::test]
    async fn test_stale_tag_conflicts_then_refreshes() {
        let engine = engine(3);
        let first = engine
            .put_with_cas("threads/t.json", Bytes::from_static(b"1"), MetadataMap::new(), None)
            .await
            .into_result()
            .expect("put");

        let result = engine
            .put_with_cas(
                "threads/t.json",
                Bytes::from_static(b"2"),
                MetadataMap::new(),
                Some(ETag::new("stale")),
            )
            .await;
        assert!(result.is_success());
        assert_eq!(result.attempts, 2);
        assert_ne!(result.tag, Some(first));
    }

    #[tokio::test]
    async fn test_stale_tag_with_single_attempt_reports_conflict() {
        let engine = engine(1);
        engine
            .put_with_cas("threads/t.json", Bytes::from_static(b"1"), MetadataMap::new(), None)
            .await
            .into_result()
            .expect("put");

        let result = engine
            .delete_with_cas("threads/t.json", Some(ETag::new("stale")))
            .await;
        assert!(result.is_conflict());
        assert_eq!(result.attempts, 1);
        assert!(engine.store().exists("threads/t.json").await.expect("exists"));
    }

    #[tokio::test]
    async fn test_update_creates_then_preserves_created_at() {
        let engine = engine(3);
        let created = engine
            .update_with_cas("tools/c.json", ObjectType::Tool, None, json_kind, |current| {
                assert!(current.is_none());
                Ok(Counter { value: 1 })
            })
            .await
            .into_result()
            .expect("create");
        assert_eq!(created.value, 1);

        let before = engine
            .store()
            .get("tools/c.json")
            .await
            .expect("get")
            .expect("exists");
        let before = ObjectMetadata::from_wire(&before.metadata).expect("metadata");

        let updated = engine
            .update_with_cas("tools/c.json", ObjectType::Tool, None, json_kind, |current| {
                let mut counter = current.expect("existing value");
                counter.value += 1;
                Ok(counter)
            })
            .await
            .into_result()
            .expect("update");
        assert_eq!(updated.value, 2);

        let after = engine
            .store()
            .get("tools/c.json")
            .await
            .expect("get")
            .expect("exists");
        let after = ObjectMetadata::from_wire(&after.metadata).expect("metadata");
        assert_eq!(after.created_at, before.created_at);
        assert_eq!(after.expires_at, before.expires_at);
    }

    #[tokio::test]
    async fn test_update_rejects_unparseable_json_without_retry() {
        let engine = engine(5);
        engine
            .store()
            .put("tools/bad.json", Bytes::from_static(b"not json"), MetadataMap::new())
            .await
            .expect("put");

        let result = engine
            .update_with_cas("tools/bad.json", ObjectType::Tool, None, json_kind, |_| {
                Ok(Counter { value: 0 })
            })
            .await;
        assert!(matches!(result.outcome, Err(Error::InvalidInput(_))));
        assert_eq!(result.attempts, 1);
    }

    #[tokio::test]
    async fn test_extend_ttl_replaces_expiration() {
        let engine = engine(3);
        engine
            .update_with_cas("tools/c.json", ObjectType::Tool, Some(10), json_kind, |_| {
                Ok(Counter { value: 1 })
            })
            .await
            .into_result()
            .expect("create");

        let extended = engine
            .extend_ttl("tools/c.json", 3600)
            .await
            .into_result()
            .expect("extend");
        let expires_at = extended.expires_at.expect("expiry");
        assert!(expires_at > Utc::now() + chrono::TimeDelta::seconds(3000));

        let missing = engine.extend_ttl("tools/none.json", 60).await;
        assert!(matches!(missing.outcome, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_update_treats_expired_object_as_absent() {
        let engine = engine(3);
        let then = Utc::now() - chrono::TimeDelta::days(2);
        let stale = ttl::metadata_envelope(
            ObjectType::Tool,
            60,
            MetadataKind::Json { parent_id: None },
            then,
        );
        engine
            .store()
            .put("tools/c.json", Bytes::from_static(br#"{"value":7}"#), stale.to_wire())
            .await
            .expect("put");

        let mut saw = Vec::new();
        let result = engine
            .update_with_cas("tools/c.json", ObjectType::Tool, None, json_kind, |current| {
                saw.push(current.clone());
                Ok(Counter { value: 1 })
            })
            .await;
        assert_eq!(result.into_result().expect("update"), Counter { value: 1 });
        assert_eq!(saw, vec![None]);

        let stored = engine
            .store()
            .get("tools/c.json")
            .await
            .expect("get")
            .expect("exists");
        let metadata = ObjectMetadata::from_wire(&stored.metadata).expect("metadata");
        assert!(metadata.created_at > then);
        assert!(!ttl::is_expired(&metadata));

        let backdated = ttl::metadata_envelope(
            ObjectType::Tool,
            60,
            MetadataKind::Json { parent_id: None },
            then,
        );
        engine
            .store()
            .put("tools/c.json", stored.value, backdated.to_wire())
            .await
            .expect("put");
        let extended = engine.extend_ttl("tools/c.json", 3600).await;
        assert!(matches!(extended.outcome, Err(Error::NotFound(_))));
    }

    #[test]
    fn test_rand_float_in_range() {
        for _ in 0..100 {
            let value = rand_float();
            assert!((0.0..=1.0).contains(&value), "rand_float() = {value}");
        }
    }
}
