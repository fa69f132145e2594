//! Property-based tests for the key schema, TTL validation and GC config.
//!
//! Uses proptest to verify invariants across random inputs:
//! - Every key the schema produces parses back to the same ids
//! - Distinct ids never share a key
//! - TTLs are accepted exactly on `0..=MAX_TTL_SECS`
//! - Validated GC configs are always in priority order without duplicates

// Property tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used)]

use proptest::prelude::*;
use ttlstore::gc::{GcConfig, ResourceType};
use ttlstore::storage::keys::{self, EntityKind, FilePart};
use ttlstore::storage::ttl::{MAX_TTL_SECS, validate_ttl};

/// Ids the schema accepts: no `/`, no control characters.
fn id_strategy() -> impl Strategy<Value = String> {
    "[A-Za-z0-9_.:-]{1,64}"
}

fn singleton_kind() -> impl Strategy<Value = EntityKind> {
    prop::sample::select(vec![
        EntityKind::Assistant,
        EntityKind::Thread,
        EntityKind::Tool,
    ])
}

fn scoped_kind() -> impl Strategy<Value = EntityKind> {
    prop::sample::select(vec![EntityKind::Message, EntityKind::Run])
}

// ============================================================================
// Key schema
// ============================================================================

proptest! {
    /// Property: singleton keys parse back to their id.
    #[test]
    fn prop_singleton_key_roundtrips(kind in singleton_kind(), id in id_strategy()) {
        let key = keys::key_for(kind, &id).unwrap();
        let parsed = keys::parse_key(&key, kind).unwrap();
        prop_assert_eq!(parsed.kind, kind);
        prop_assert_eq!(parsed.id, id);
        prop_assert!(parsed.parent_id.is_none());
        prop_assert!(key.starts_with(&keys::prefix_for(kind)));
    }

    /// Property: scoped keys parse back to `(parent, id)` and sit under the
    /// parent's child prefix.
    #[test]
    fn prop_scoped_key_roundtrips(
        kind in scoped_kind(),
        parent in id_strategy(),
        id in id_strategy(),
    ) {
        let key = keys::scoped_key_for(kind, &parent, &id).unwrap();
        let parsed = keys::parse_key(&key, kind).unwrap();
        prop_assert_eq!(parsed.id, id);
        prop_assert_eq!(parsed.parent_id.as_deref(), Some(parent.as_str()));
        prop_assert!(key.starts_with(&keys::child_prefix(kind, &parent).unwrap()));
    }

    /// Property: both file keys parse back to the same id.
    #[test]
    fn prop_file_keys_roundtrip(id in id_strategy()) {
        let meta = keys::parse_key(&keys::file_meta_key(&id).unwrap(), EntityKind::File).unwrap();
        let blob = keys::parse_key(&keys::file_blob_key(&id).unwrap(), EntityKind::File).unwrap();
        prop_assert_eq!(meta.part, Some(FilePart::Meta));
        prop_assert_eq!(blob.part, Some(FilePart::Blob));
        prop_assert_eq!(meta.id, id.clone());
        prop_assert_eq!(blob.id, id);
    }

    /// Property: distinct `(parent, id)` pairs never collide.
    #[test]
    fn prop_scoped_keys_are_injective(
        a in (id_strategy(), id_strategy()),
        b in (id_strategy(), id_strategy()),
    ) {
        prop_assume!(a != b);
        let key_a = keys::scoped_key_for(EntityKind::Message, &a.0, &a.1).unwrap();
        let key_b = keys::scoped_key_for(EntityKind::Message, &b.0, &b.1).unwrap();
        prop_assert_ne!(key_a, key_b);
    }

    /// Property: ids containing `/` are rejected rather than producing keys
    /// that parse differently.
    #[test]
    fn prop_ids_with_slash_rejected(left in id_strategy(), right in id_strategy()) {
        let id = format!("{left}/{right}");
        prop_assert!(keys::key_for(EntityKind::Thread, &id).is_err());
        prop_assert!(keys::scoped_key_for(EntityKind::Run, &id, "r").is_err());
        prop_assert!(keys::file_meta_key(&id).is_err());
    }

    /// Property: parsing never panics and only accepts keys of the expected
    /// kind.
    #[test]
    fn prop_parse_key_total(key in "\\PC{0,80}") {
        for kind in [
            EntityKind::Assistant,
            EntityKind::Thread,
            EntityKind::Message,
            EntityKind::Run,
            EntityKind::File,
            EntityKind::Tool,
        ] {
            if let Some(parsed) = keys::parse_key(&key, kind) {
                prop_assert_eq!(parsed.kind, kind);
                prop_assert!(key.starts_with(&keys::prefix_for(kind)));
            }
        }
    }
}

// ============================================================================
// TTL validation
// ============================================================================

proptest! {
    /// Property: TTLs in range are returned unchanged.
    #[test]
    fn prop_ttl_in_range_accepted(ttl in 0..=MAX_TTL_SECS) {
        let requested = i64::try_from(ttl).unwrap();
        prop_assert_eq!(validate_ttl(requested).unwrap(), ttl);
    }

    /// Property: negative TTLs are rejected.
    #[test]
    fn prop_negative_ttl_rejected(ttl in i64::MIN..0) {
        prop_assert!(validate_ttl(ttl).is_err());
    }

    /// Property: TTLs past the maximum are rejected, never clamped.
    #[test]
    fn prop_oversized_ttl_rejected(excess in 1i64..1_000_000_000) {
        let ttl = i64::try_from(MAX_TTL_SECS).unwrap() + excess;
        prop_assert!(validate_ttl(ttl).is_err());
    }
}

// ============================================================================
// GC configuration
// ============================================================================

proptest! {
    /// Property: validation orders types parent-first and drops duplicates.
    #[test]
    fn prop_validated_types_follow_priority(
        picks in prop::collection::vec(0usize..5, 1..12),
    ) {
        let types: Vec<ResourceType> = picks
            .iter()
            .map(|&i| ResourceType::PRIORITY[i])
            .collect();
        let config = GcConfig {
            resource_types: types.clone(),
            ..GcConfig::default()
        }
        .validated()
        .unwrap();

        let mut expected: Vec<ResourceType> = ResourceType::PRIORITY
            .iter()
            .copied()
            .filter(|t| types.contains(t))
            .collect();
        expected.dedup();
        prop_assert_eq!(config.resource_types, expected);
    }

    /// Property: batch sizes are accepted exactly on `1..=1000`.
    #[test]
    fn prop_batch_size_bounds(batch_size in 0usize..2000) {
        let result = GcConfig {
            batch_size,
            ..GcConfig::default()
        }
        .validated();
        prop_assert_eq!(result.is_ok(), (1..=1000).contains(&batch_size));
    }
}

// ============================================================================
// Listing
// ============================================================================

proptest! {
    /// Property: paging through a prefix yields every key under it exactly
    /// once, in order, whatever the page size.
    #[test]
    fn prop_listing_pages_cover_prefix(
        ids in prop::collection::btree_set(id_strategy(), 0..40),
        others in prop::collection::btree_set(id_strategy(), 0..10),
        limit in 1usize..12,
    ) {
        use ttlstore::models::MetadataMap;
        use ttlstore::storage::{InMemoryObjectStore, ListRequest, ObjectStore};

        let listed = tokio_test::block_on(async {
            let store = InMemoryObjectStore::new();
            for id in &ids {
                let key = keys::key_for(EntityKind::Thread, id).unwrap();
                store.put(&key, bytes::Bytes::new(), MetadataMap::new()).await.unwrap();
            }
            for id in &others {
                let key = keys::key_for(EntityKind::Assistant, id).unwrap();
                store.put(&key, bytes::Bytes::new(), MetadataMap::new()).await.unwrap();
            }

            let prefix = keys::prefix_for(EntityKind::Thread);
            let mut listed = Vec::new();
            let mut cursor = None;
            loop {
                let page = store
                    .list(ListRequest::new(prefix.clone()).with_limit(limit).with_cursor(cursor))
                    .await
                    .unwrap();
                assert!(page.objects.len() <= limit);
                listed.extend(page.objects.into_iter().map(|e| e.key));
                match page.cursor {
                    Some(next) => cursor = Some(next),
                    None => break,
                }
            }
            listed
        });

        let mut expected: Vec<String> = ids
            .iter()
            .map(|id| keys::key_for(EntityKind::Thread, id).unwrap())
            .collect();
        expected.sort();
        prop_assert_eq!(listed, expected);
    }
}
