//! TTL policy and expiration checks.
//!
//! Every object written through the storage layer carries an `expiresAt`
//! timestamp in its metadata. Expiry is logical: an expired object stays in
//! the store until a read deletes it lazily or the garbage collector sweeps it.

use crate::models::{MetadataKind, ObjectMetadata, ObjectType};
use crate::{Error, Result};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

const HOUR: u64 = 60 * 60;
const DAY: u64 = 24 * HOUR;

/// Longest TTL accepted: 365 days.
pub const MAX_TTL_SECS: u64 = 365 * DAY;

/// TTL applied to types without a dedicated recommendation: 48 hours.
pub const FALLBACK_TTL_SECS: u64 = 48 * HOUR;

/// Recommended TTL for an object type, in seconds.
///
/// | Type | TTL |
/// |------|-----|
/// | assistant, tool | 30 days |
/// | thread, message, file, file blob | 7 days |
/// | run | 24 hours |
#[must_use]
pub const fn recommended_ttl(object_type: ObjectType) -> u64 {
    match object_type {
        ObjectType::Assistant | ObjectType::Tool => 30 * DAY,
        ObjectType::Thread | ObjectType::Message | ObjectType::File | ObjectType::FileBlob => {
            7 * DAY
        },
        ObjectType::Run => DAY,
    }
}

/// Recommended TTL for an object type given by its wire tag.
///
/// Unknown tags get [`FALLBACK_TTL_SECS`].
#[must_use]
pub fn recommended_ttl_for(type_name: &str) -> u64 {
    ObjectType::parse(type_name).map_or(FALLBACK_TTL_SECS, recommended_ttl)
}

/// Validates a caller-supplied TTL.
///
/// Out-of-range values are rejected, never clamped.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] if the TTL is negative or exceeds
/// [`MAX_TTL_SECS`].
pub fn validate_ttl(ttl_seconds: i64) -> Result<u64> {
    let ttl = u64::try_from(ttl_seconds).map_err(|_| {
        Error::InvalidInput(format!("ttl must not be negative, got {ttl_seconds}"))
    })?;
    if ttl > MAX_TTL_SECS {
        return Err(Error::InvalidInput(format!(
            "ttl of {ttl}s exceeds the maximum of {MAX_TTL_SECS}s"
        )));
    }
    Ok(ttl)
}

/// Computes `now + ttl`.
#[must_use]
pub fn expiration_timestamp(ttl_secs: u64, now: DateTime<Utc>) -> DateTime<Utc> {
    let secs = i64::try_from(ttl_secs.min(MAX_TTL_SECS)).unwrap_or(0);
    now.checked_add_signed(TimeDelta::seconds(secs))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Returns `true` if the object's TTL has elapsed.
///
/// Objects without an `expiresAt` never expire.
#[must_use]
pub fn is_expired(metadata: &ObjectMetadata) -> bool {
    is_expired_at(metadata.expires_at, Utc::now())
}

/// Returns `true` if `now` is strictly past `expires_at`.
#[must_use]
pub fn is_expired_at(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    expires_at.is_some_and(|expires_at| now > expires_at)
}

/// Builds the metadata envelope for a fresh write.
#[must_use]
pub fn metadata_envelope(
    object_type: ObjectType,
    ttl_secs: u64,
    kind: MetadataKind,
    now: DateTime<Utc>,
) -> ObjectMetadata {
    ObjectMetadata {
        created_at: now,
        expires_at: Some(expiration_timestamp(ttl_secs, now)),
        object_type,
        kind,
    }
}

/// Replaces the expiration of an existing envelope with `now + ttl`.
///
/// The new expiration may be earlier than the old one.
#[must_use]
pub fn extend_expiration(
    mut metadata: ObjectMetadata,
    ttl_secs: u64,
    now: DateTime<Utc>,
) -> ObjectMetadata {
    metadata.expires_at = Some(expiration_timestamp(ttl_secs, now));
    metadata
}

/// How TTLs are chosen for writes that do not specify one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtlPolicy {
    /// Overrides the per-type recommendation for writes without a TTL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_ttl_secs: Option<u64>,
}

impl TtlPolicy {
    /// Uses the per-type recommendations.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            default_ttl_secs: None,
        }
    }

    /// Uses one TTL for every type. `0` keeps the per-type recommendations.
    #[must_use]
    pub const fn with_default_ttl(mut self, ttl_secs: u64) -> Self {
        self.default_ttl_secs = if ttl_secs == 0 { None } else { Some(ttl_secs) };
        self
    }

    /// Default TTL for an object type under this policy.
    #[must_use]
    pub fn default_for(&self, object_type: ObjectType) -> u64 {
        self.default_ttl_secs
            .filter(|ttl| *ttl > 0)
            .map_or_else(|| recommended_ttl(object_type), |ttl| ttl.min(MAX_TTL_SECS))
    }

    /// Resolves a requested TTL.
    ///
    /// `None` and `0` fall back to [`Self::default_for`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for a negative or oversized TTL.
    pub fn resolve(&self, object_type: ObjectType, requested: Option<i64>) -> Result<u64> {
        match requested {
            None | Some(0) => Ok(self.default_for(object_type)),
            Some(ttl) => validate_ttl(ttl),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use test_case::test_case;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().expect("valid timestamp")
    }

    #[test_case(ObjectType::Assistant, 30 * DAY ; "assistant")]
    #[test_case(ObjectType::Tool, 30 * DAY ; "tool")]
    #[test_case(ObjectType::Thread, 7 * DAY ; "thread")]
    #[test_case(ObjectType::Message, 7 * DAY ; "message")]
    #[test_case(ObjectType::File, 7 * DAY ; "file")]
    #[test_case(ObjectType::FileBlob, 7 * DAY ; "file blob")]
    #[test_case(ObjectType::Run, DAY ; "run")]
    fn test_recommended_ttls(object_type: ObjectType, expected: u64) {
        assert_eq!(recommended_ttl(object_type), expected);
    }

    #[test]
    fn test_unknown_type_falls_back() {
        assert_eq!(recommended_ttl_for("vector_store"), FALLBACK_TTL_SECS);
        assert_eq!(recommended_ttl_for("run"), DAY);
    }

    #[test_case(-1, false ; "negative")]
    #[test_case(0, true ; "zero")]
    #[test_case(3600, true ; "one hour")]
    #[test_case(31_536_000, true ; "exactly one year")]
    #[test_case(31_536_001, false ; "one year and a second")]
    fn test_validate_ttl_bounds(ttl: i64, ok: bool) {
        assert_eq!(validate_ttl(ttl).is_ok(), ok);
    }

    #[test]
    fn test_validate_ttl_does_not_clamp() {
        let err = validate_ttl(i64::MAX).expect_err("rejected");
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_resolve_zero_and_absent_use_recommendation() {
        let policy = TtlPolicy::new();
        assert_eq!(policy.resolve(ObjectType::Run, None).expect("ttl"), DAY);
        assert_eq!(policy.resolve(ObjectType::Run, Some(0)).expect("ttl"), DAY);
        assert_eq!(policy.resolve(ObjectType::Run, Some(60)).expect("ttl"), 60);
        assert!(policy.resolve(ObjectType::Run, Some(-5)).is_err());
    }

    #[test]
    fn test_policy_default_overrides_recommendation() {
        let policy = TtlPolicy::new().with_default_ttl(120);
        assert_eq!(policy.resolve(ObjectType::Assistant, None).expect("ttl"), 120);

        let zero = TtlPolicy::new().with_default_ttl(0);
        assert_eq!(zero, TtlPolicy::new());
        assert_eq!(zero.default_for(ObjectType::Run), recommended_ttl(ObjectType::Run));
    }

    #[test]
    fn test_expiry_is_strict() {
        let expires_at = Some(at(1_000));
        assert!(!is_expired_at(expires_at, at(999)));
        assert!(!is_expired_at(expires_at, at(1_000)));
        assert!(is_expired_at(expires_at, at(1_001)));
        assert!(!is_expired_at(None, at(i64::from(u32::MAX))));
    }

    #[test]
    fn test_envelope_and_extension() {
        let meta = metadata_envelope(
            ObjectType::Thread,
            60,
            MetadataKind::Json { parent_id: None },
            at(1_000),
        );
        assert_eq!(meta.created_at, at(1_000));
        assert_eq!(meta.expires_at, Some(at(1_060)));

        let shorter = extend_expiration(meta, 10, at(1_020));
        assert_eq!(shorter.created_at, at(1_000));
        assert_eq!(shorter.expires_at, Some(at(1_030)));
    }
}
