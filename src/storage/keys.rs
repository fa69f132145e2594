//! Key schema.
//!
//! Maps `(entity kind, id[, parent id])` to object store keys and back:
//!
//! ```text
//! assistants/{id}.json
//! threads/{id}.json
//! tools/{id}.json
//! messages/{threadId}/{id}.json
//! runs/{threadId}/{id}.json
//! files/{id}/meta.json
//! files/{id}/blob
//! ```
//!
//! Ids are validated before they reach a key (non-empty, no `/`, no control
//! characters, at most [`MAX_ID_LEN`] bytes). That is what makes the mapping
//! injective and lets [`parse_key`] recover the exact ids for every key the
//! forward functions produce.

use crate::models::{ObjectType, ResourceType};
use crate::{Error, Result};
use std::fmt;

/// Longest id accepted in a key.
pub const MAX_ID_LEN: usize = 256;

const JSON_SUFFIX: &str = ".json";
const FILE_META: &str = "meta.json";
const FILE_BLOB: &str = "blob";

/// Entity families with their own key prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    /// `assistants/`
    Assistant,
    /// `threads/`
    Thread,
    /// `messages/`, scoped by thread.
    Message,
    /// `runs/`, scoped by thread.
    Run,
    /// `files/`, two objects per id.
    File,
    /// `tools/`
    Tool,
}

impl EntityKind {
    /// Key prefix without the trailing slash.
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Assistant => "assistants",
            Self::Thread => "threads",
            Self::Message => "messages",
            Self::Run => "runs",
            Self::File => "files",
            Self::Tool => "tools",
        }
    }

    /// Returns `true` for kinds addressed by `(parentId, id)`.
    #[must_use]
    pub const fn is_scoped(self) -> bool {
        matches!(self, Self::Message | Self::Run)
    }

    /// Object type tag written for this kind's JSON documents.
    #[must_use]
    pub const fn object_type(self) -> ObjectType {
        match self {
            Self::Assistant => ObjectType::Assistant,
            Self::Thread => ObjectType::Thread,
            Self::Message => ObjectType::Message,
            Self::Run => ObjectType::Run,
            Self::File => ObjectType::File,
            Self::Tool => ObjectType::Tool,
        }
    }
}

impl From<ResourceType> for EntityKind {
    fn from(resource_type: ResourceType) -> Self {
        match resource_type {
            ResourceType::Assistant => Self::Assistant,
            ResourceType::Thread => Self::Thread,
            ResourceType::Message => Self::Message,
            ResourceType::Run => Self::Run,
            ResourceType::File => Self::File,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Which of a file's two objects a key addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilePart {
    /// `files/{id}/meta.json`
    Meta,
    /// `files/{id}/blob`
    Blob,
}

/// Ids recovered from a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedKey {
    /// Entity family.
    pub kind: EntityKind,
    /// Entity id.
    pub id: String,
    /// Owning thread for messages and runs.
    pub parent_id: Option<String>,
    /// File object addressed, for files.
    pub part: Option<FilePart>,
}

/// Checks that an id can be embedded in a key.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] if the id is empty, too long, or contains
/// `/` or control characters.
pub fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(Error::InvalidInput("id must not be empty".to_string()));
    }
    if id.len() > MAX_ID_LEN {
        return Err(Error::InvalidInput(format!(
            "id exceeds {MAX_ID_LEN} bytes: {}...",
            id.chars().take(32).collect::<String>()
        )));
    }
    if id.contains('/') || id.chars().any(char::is_control) {
        return Err(Error::InvalidInput(format!(
            "id contains '/' or control characters: {id:?}"
        )));
    }
    Ok(())
}

/// Key of a singleton entity: `{prefix}/{id}.json`.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] for an invalid id or a kind that needs a
/// parent id or has a two-part layout.
pub fn key_for(kind: EntityKind, id: &str) -> Result<String> {
    if kind.is_scoped() || kind == EntityKind::File {
        return Err(Error::InvalidInput(format!(
            "{kind} keys are not singleton keys"
        )));
    }
    validate_id(id)?;
    Ok(format!("{}/{id}{JSON_SUFFIX}", kind.prefix()))
}

/// Key of a parent-scoped entity: `{prefix}/{parentId}/{id}.json`.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] for invalid ids or a kind that is not scoped.
pub fn scoped_key_for(kind: EntityKind, parent_id: &str, id: &str) -> Result<String> {
    if !kind.is_scoped() {
        return Err(Error::InvalidInput(format!(
            "{kind} keys are not parent-scoped"
        )));
    }
    validate_id(parent_id)?;
    validate_id(id)?;
    Ok(format!("{}/{parent_id}/{id}{JSON_SUFFIX}", kind.prefix()))
}

/// Key of a file's metadata document.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] for an invalid id.
pub fn file_meta_key(id: &str) -> Result<String> {
    validate_id(id)?;
    Ok(format!("{}/{id}/{FILE_META}", EntityKind::File.prefix()))
}

/// Key of a file's binary payload.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] for an invalid id.
pub fn file_blob_key(id: &str) -> Result<String> {
    validate_id(id)?;
    Ok(format!("{}/{id}/{FILE_BLOB}", EntityKind::File.prefix()))
}

/// Listing prefix covering every key of a kind.
#[must_use]
pub fn prefix_for(kind: EntityKind) -> String {
    format!("{}/", kind.prefix())
}

/// Listing prefix covering a parent's children: `{prefix}/{parentId}/`.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] for an invalid parent id.
pub fn child_prefix(kind: EntityKind, parent_id: &str) -> Result<String> {
    validate_id(parent_id)?;
    Ok(format!("{}/{parent_id}/", kind.prefix()))
}

/// Recovers ids from a key of the expected kind.
///
/// Returns `None` for any key that the forward functions could not have
/// produced for `expected`; never errors.
#[must_use]
pub fn parse_key(key: &str, expected: EntityKind) -> Option<ParsedKey> {
    let rest = key.strip_prefix(expected.prefix())?.strip_prefix('/')?;
    let segments: Vec<&str> = rest.split('/').collect();

    let parsed = match (expected, segments.as_slice()) {
        (EntityKind::File, [id, part]) => {
            let part = match *part {
                FILE_META => FilePart::Meta,
                FILE_BLOB => FilePart::Blob,
                _ => return None,
            };
            ParsedKey {
                kind: expected,
                id: (*id).to_string(),
                parent_id: None,
                part: Some(part),
            }
        },
        (EntityKind::Message | EntityKind::Run, [parent, leaf]) => ParsedKey {
            kind: expected,
            id: leaf.strip_suffix(JSON_SUFFIX)?.to_string(),
            parent_id: Some((*parent).to_string()),
            part: None,
        },
        (EntityKind::Assistant | EntityKind::Thread | EntityKind::Tool, [leaf]) => ParsedKey {
            kind: expected,
            id: leaf.strip_suffix(JSON_SUFFIX)?.to_string(),
            parent_id: None,
            part: None,
        },
        _ => return None,
    };

    if validate_id(&parsed.id).is_err()
        || parsed
            .parent_id
            .as_deref()
            .is_some_and(|p| validate_id(p).is_err())
    {
        return None;
    }
    Some(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_singleton_keys() {
        assert_eq!(
            key_for(EntityKind::Assistant, "asst_1").expect("key"),
            "assistants/asst_1.json"
        );
        assert_eq!(
            key_for(EntityKind::Thread, "thread_A").expect("key"),
            "threads/thread_A.json"
        );
    }

    #[test]
    fn test_scoped_keys() {
        assert_eq!(
            scoped_key_for(EntityKind::Message, "thread_A", "msg_1").expect("key"),
            "messages/thread_A/msg_1.json"
        );
        assert_eq!(
            scoped_key_for(EntityKind::Run, "thread_A", "run_1").expect("key"),
            "runs/thread_A/run_1.json"
        );
        assert!(scoped_key_for(EntityKind::Thread, "asst_1", "thread_A").is_err());
        assert!(key_for(EntityKind::Message, "msg_1").is_err());
    }

    #[test]
    fn test_file_keys() {
        assert_eq!(file_meta_key("file_1").expect("key"), "files/file_1/meta.json");
        assert_eq!(file_blob_key("file_1").expect("key"), "files/file_1/blob");
        assert!(key_for(EntityKind::File, "file_1").is_err());
    }

    #[test]
    fn test_invalid_ids_rejected() {
        assert!(key_for(EntityKind::Thread, "").is_err());
        assert!(key_for(EntityKind::Thread, "a/b").is_err());
        assert!(key_for(EntityKind::Thread, "a\nb").is_err());
        assert!(key_for(EntityKind::Thread, &"x".repeat(MAX_ID_LEN + 1)).is_err());
    }

    #[test]
    fn test_parse_round_trips() {
        let key = scoped_key_for(EntityKind::Message, "thread_A", "msg_1").expect("key");
        let parsed = parse_key(&key, EntityKind::Message).expect("parse");
        assert_eq!(parsed.id, "msg_1");
        assert_eq!(parsed.parent_id.as_deref(), Some("thread_A"));

        let parsed = parse_key("files/file_9/blob", EntityKind::File).expect("parse");
        assert_eq!(parsed.part, Some(FilePart::Blob));
        assert_eq!(parsed.id, "file_9");

        let parsed = parse_key("threads/t.json.json", EntityKind::Thread).expect("parse");
        assert_eq!(parsed.id, "t.json");
    }

    #[test]
    fn test_parse_rejects_malformed_keys() {
        assert!(parse_key("threads/a.json", EntityKind::Assistant).is_none());
        assert!(parse_key("threads/a.txt", EntityKind::Thread).is_none());
        assert!(parse_key("threads/x/a.json", EntityKind::Thread).is_none());
        assert!(parse_key("threads/.json", EntityKind::Thread).is_none());
        assert!(parse_key("messages/a.json", EntityKind::Message).is_none());
        assert!(parse_key("files/f/other", EntityKind::File).is_none());
        assert!(parse_key("threadsX/a.json", EntityKind::Thread).is_none());
        assert!(parse_key("", EntityKind::Thread).is_none());
    }

    #[test]
    fn test_prefixes() {
        assert_eq!(prefix_for(EntityKind::Run), "runs/");
        assert_eq!(
            child_prefix(EntityKind::Message, "thread_A").expect("prefix"),
            "messages/thread_A/"
        );
    }
}
