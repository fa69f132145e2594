//! GC trigger requests and the admin-key gate.
//!
//! A trigger is a JSON document:
//!
//! ```json
//! {
//!   "mode": "dry_run",
//!   "resourceTypes": ["thread", "message"],
//!   "maxObjectsPerType": 500,
//!   "batchSize": 50,
//!   "adminKey": "..."
//! }
//! ```
//!
//! `mode` and `adminKey` are required. The admin key is compared in constant
//! time over HMAC-SHA256 digests, so the comparison does not depend on where
//! the two keys first differ or on their lengths.

use super::orchestrator::GcOrchestrator;
use crate::models::{GcConfigOverrides, GcOperationResult, ResourceType};
use crate::{Error, Result};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sha2::Sha256;
use tracing::{info, instrument, warn};

type HmacSha256 = Hmac<Sha256>;

/// Domain label the admin key digests are keyed with.
const ADMIN_KEY_LABEL: &[u8] = b"ttlstore.gc.admin-key";

/// What a trigger asks the collector to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcMode {
    /// Delete expired objects.
    Cleanup,
    /// Report what would be deleted.
    DryRun,
}

impl GcMode {
    /// Parses a wire mode.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "cleanup" => Some(Self::Cleanup),
            "dry_run" => Some(Self::DryRun),
            _ => None,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRequest {
    mode: Option<String>,
    resource_types: Option<Vec<String>>,
    max_objects_per_type: Option<i64>,
    batch_size: Option<i64>,
    admin_key: Option<String>,
}

/// A validated GC trigger.
#[derive(Debug)]
pub struct GcRequest {
    /// Requested mode.
    pub mode: GcMode,
    /// Types to sweep; `None` sweeps the configured defaults.
    pub resource_types: Option<Vec<ResourceType>>,
    /// Per-type cap.
    pub max_objects_per_type: Option<usize>,
    /// Page size.
    pub batch_size: Option<usize>,
    /// Caller's admin key.
    pub admin_key: SecretString,
}

impl GcRequest {
    /// Parses and validates a JSON trigger.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the document is not JSON, `adminKey`
    /// or `mode` is missing, `mode` is unknown, `resourceTypes` names an
    /// unknown type, or a number is not positive.
    pub fn from_json(body: &str) -> Result<Self> {
        let raw: RawRequest = serde_json::from_str(body)
            .map_err(|e| Error::InvalidInput(format!("malformed GC request: {e}")))?;

        let admin_key = raw
            .admin_key
            .filter(|k| !k.is_empty())
            .map(SecretString::from)
            .ok_or_else(|| Error::InvalidInput("adminKey is required".to_string()))?;

        let mode = raw
            .mode
            .ok_or_else(|| Error::InvalidInput("mode is required".to_string()))?;
        let mode = GcMode::parse(&mode)
            .ok_or_else(|| Error::InvalidInput(format!("unknown mode '{mode}'")))?;

        let resource_types = raw
            .resource_types
            .map(|names| {
                names
                    .iter()
                    .map(|name| {
                        ResourceType::parse(name).ok_or_else(|| {
                            Error::InvalidInput(format!("unknown resource type '{name}'"))
                        })
                    })
                    .collect::<Result<Vec<_>>>()
            })
            .transpose()?;

        Ok(Self {
            mode,
            resource_types,
            max_objects_per_type: positive("maxObjectsPerType", raw.max_objects_per_type)?,
            batch_size: positive("batchSize", raw.batch_size)?,
            admin_key,
        })
    }

    /// Converts the request into orchestrator overrides.
    #[must_use]
    pub fn overrides(&self) -> GcConfigOverrides {
        let mut overrides = GcConfigOverrides::new().with_dry_run(self.mode == GcMode::DryRun);
        if let Some(types) = &self.resource_types {
            overrides = overrides.with_resource_types(types.clone());
        }
        if let Some(batch_size) = self.batch_size {
            overrides = overrides.with_batch_size(batch_size);
        }
        if let Some(max) = self.max_objects_per_type {
            overrides = overrides.with_max_objects_per_type(Some(max));
        }
        overrides
    }
}

fn positive(field: &str, value: Option<i64>) -> Result<Option<usize>> {
    value
        .map(|v| {
            usize::try_from(v)
                .ok()
                .filter(|v| *v > 0)
                .ok_or_else(|| Error::InvalidInput(format!("{field} must be positive, got {v}")))
        })
        .transpose()
}

/// Admin-gated entry point to the garbage collector.
#[derive(Debug)]
pub struct GcService {
    orchestrator: GcOrchestrator,
    admin_key: SecretString,
}

impl GcService {
    /// Creates a service that accepts triggers carrying `admin_key`.
    #[must_use]
    pub const fn new(orchestrator: GcOrchestrator, admin_key: SecretString) -> Self {
        Self {
            orchestrator,
            admin_key,
        }
    }

    /// Underlying orchestrator.
    #[must_use]
    pub const fn orchestrator(&self) -> &GcOrchestrator {
        &self.orchestrator
    }

    /// Checks the admin key and runs the requested operation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unauthorized`] if the key does not match. Failures
    /// during the sweep are reported inside the returned result.
    #[instrument(
        name = "ttlstore.gc.trigger",
        skip_all,
        fields(component = "gc", operation = "trigger", mode = ?request.mode)
    )]
    pub async fn trigger(&self, request: &GcRequest) -> Result<GcOperationResult> {
        if !admin_key_matches(&self.admin_key, &request.admin_key)? {
            warn!("GC trigger rejected: admin key mismatch");
            metrics::counter!("gc_trigger_rejected_total").increment(1);
            return Err(Error::Unauthorized("invalid admin key".to_string()));
        }
        info!("GC trigger accepted");
        Ok(self.orchestrator.execute_gc(&request.overrides()).await)
    }

    /// Parses a JSON trigger and runs it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for a malformed request and
    /// [`Error::Unauthorized`] for a wrong admin key.
    pub async fn trigger_json(&self, body: &str) -> Result<GcOperationResult> {
        let request = GcRequest::from_json(body)?;
        self.trigger(&request).await
    }
}

fn admin_key_digest(key: &SecretString) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(ADMIN_KEY_LABEL)
        .map_err(|e| Error::operation("admin_key_digest", e))?;
    mac.update(key.expose_secret().as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

fn admin_key_matches(expected: &SecretString, provided: &SecretString) -> Result<bool> {
    if expected.expose_secret().is_empty() {
        return Ok(false);
    }
    Ok(constant_time_eq(
        &admin_key_digest(expected)?,
        &admin_key_digest(provided)?,
    ))
}

/// Constant-time comparison to prevent timing attacks.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GcConfig, GcStatus};
    use crate::storage::memory::InMemoryObjectStore;
    use std::sync::Arc;
    use test_case::test_case;

    #[test]
    fn test_parses_full_request() {
        let request = GcRequest::from_json(
            r#"{"mode":"dry_run","resourceTypes":["thread","messages"],"maxObjectsPerType":5,"batchSize":2,"adminKey":"k"}"#,
        )
        .expect("valid request");
        assert_eq!(request.mode, GcMode::DryRun);
        assert_eq!(
            request.resource_types,
            Some(vec![ResourceType::Thread, ResourceType::Message])
        );

        let overrides = request.overrides();
        assert_eq!(overrides.dry_run, Some(true));
        assert_eq!(overrides.batch_size, Some(2));
        assert_eq!(overrides.max_objects_per_type, Some(Some(5)));
    }

    #[test_case(r#"{"mode":"cleanup"}"# ; "missing admin key")]
    #[test_case(r#"{"mode":"cleanup","adminKey":""}"# ; "empty admin key")]
    #[test_case(r#"{"adminKey":"k"}"# ; "missing mode")]
    #[test_case(r#"{"mode":"purge","adminKey":"k"}"# ; "unknown mode")]
    #[test_case(r#"{"mode":"cleanup","resourceTypes":["vector_store"],"adminKey":"k"}"# ; "unknown type")]
    #[test_case(r#"{"mode":"cleanup","batchSize":0,"adminKey":"k"}"# ; "zero batch size")]
    #[test_case(r#"{"mode":"cleanup","maxObjectsPerType":-3,"adminKey":"k"}"# ; "negative cap")]
    #[test_case("not json" ; "malformed")]
    fn test_rejects_invalid_request(body: &str) {
        let err = GcRequest::from_json(body).expect_err("invalid request");
        assert!(matches!(err, Error::InvalidInput(_)), "{err}");
    }

    #[test]
    fn test_admin_key_comparison() {
        let expected = SecretString::from("s3cret");
        assert!(admin_key_matches(&expected, &SecretString::from("s3cret")).expect("digest"));
        assert!(!admin_key_matches(&expected, &SecretString::from("s3cre")).expect("digest"));
        assert!(
            !admin_key_matches(&SecretString::from(""), &SecretString::from("")).expect("digest")
        );
    }

    fn service() -> GcService {
        let store = Arc::new(InMemoryObjectStore::new());
        GcService::new(
            GcOrchestrator::new(store, GcConfig::default()),
            SecretString::from("s3cret"),
        )
    }

    #[tokio::test]
    async fn test_trigger_rejects_wrong_key() {
        let err = service()
            .trigger_json(r#"{"mode":"cleanup","adminKey":"guess"}"#)
            .await
            .expect_err("unauthorized");
        assert!(matches!(err, Error::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_trigger_runs_with_right_key() {
        let result = service()
            .trigger_json(r#"{"mode":"dry_run","resourceTypes":["run"],"adminKey":"s3cret"}"#)
            .await
            .expect("authorized");
        assert_eq!(result.status, GcStatus::Completed);
        assert!(result.dry_run);
        assert_eq!(result.config.resource_types, vec![ResourceType::Run]);
    }
}
