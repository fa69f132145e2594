//! Metadata envelope attached to every stored object.
//!
//! On the wire the envelope is a flat map of string scalars (`createdAt`,
//! `expiresAt`, `objectType`, plus `contentType`/`filename`/`size` for file
//! blobs and `parentId` for parent-scoped JSON documents). In memory it is a
//! typed [`ObjectMetadata`] whose [`MetadataKind`] separates JSON documents
//! from file payloads.

use crate::{Error, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// Raw string-keyed metadata as exchanged with the object store.
pub type MetadataMap = BTreeMap<String, String>;

/// Wire key for the creation timestamp.
pub const CREATED_AT: &str = "createdAt";
/// Wire key for the expiration timestamp.
pub const EXPIRES_AT: &str = "expiresAt";
/// Wire key for the object type tag.
pub const OBJECT_TYPE: &str = "objectType";
/// Wire key for a file payload's MIME type.
pub const CONTENT_TYPE: &str = "contentType";
/// Wire key for a file payload's original name.
pub const FILENAME: &str = "filename";
/// Wire key for a file payload's size in bytes.
pub const SIZE: &str = "size";
/// Wire key for the owning entity's id.
pub const PARENT_ID: &str = "parentId";

/// Tag identifying which domain entity a stored object holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    /// Assistant document.
    Assistant,
    /// Thread document.
    Thread,
    /// Message document.
    Message,
    /// Run document.
    Run,
    /// File metadata document.
    File,
    /// File payload.
    FileBlob,
    /// Tool document.
    Tool,
}

impl ObjectType {
    /// Returns the wire tag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Assistant => "assistant",
            Self::Thread => "thread",
            Self::Message => "message",
            Self::Run => "run",
            Self::File => "file",
            Self::FileBlob => "file_blob",
            Self::Tool => "tool",
        }
    }

    /// Parses a wire tag. Returns `None` for unrecognized tags.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "assistant" => Some(Self::Assistant),
            "thread" => Some(Self::Thread),
            "message" => Some(Self::Message),
            "run" => Some(Self::Run),
            "file" => Some(Self::File),
            "file_blob" => Some(Self::FileBlob),
            "tool" => Some(Self::Tool),
            _ => None,
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type-specific part of the envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataKind {
    /// A JSON document.
    Json {
        /// Id of the owning entity, when the key does not encode it.
        parent_id: Option<String>,
    },
    /// A binary file payload.
    File {
        /// MIME type.
        content_type: String,
        /// Original file name.
        filename: String,
        /// Payload size in bytes.
        size: u64,
    },
}

/// Typed metadata envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMetadata {
    /// When the object was first written. Preserved across updates.
    pub created_at: DateTime<Utc>,
    /// When the object expires. `None` means it never does.
    pub expires_at: Option<DateTime<Utc>>,
    /// Entity tag.
    pub object_type: ObjectType,
    /// Type-specific fields.
    pub kind: MetadataKind,
}

impl ObjectMetadata {
    /// Returns the parent id recorded for JSON documents.
    #[must_use]
    pub fn parent_id(&self) -> Option<&str> {
        match &self.kind {
            MetadataKind::Json { parent_id } => parent_id.as_deref(),
            MetadataKind::File { .. } => None,
        }
    }

    /// Serializes the envelope into its flat wire form.
    #[must_use]
    pub fn to_wire(&self) -> MetadataMap {
        let mut map = MetadataMap::new();
        map.insert(CREATED_AT.to_string(), format_timestamp(self.created_at));
        if let Some(expires_at) = self.expires_at {
            map.insert(EXPIRES_AT.to_string(), format_timestamp(expires_at));
        }
        map.insert(
            OBJECT_TYPE.to_string(),
            self.object_type.as_str().to_string(),
        );
        match &self.kind {
            MetadataKind::Json { parent_id } => {
                if let Some(parent_id) = parent_id {
                    map.insert(PARENT_ID.to_string(), parent_id.clone());
                }
            },
            MetadataKind::File {
                content_type,
                filename,
                size,
            } => {
                map.insert(CONTENT_TYPE.to_string(), content_type.clone());
                map.insert(FILENAME.to_string(), filename.clone());
                map.insert(SIZE.to_string(), size.to_string());
            },
        }
        map
    }

    /// Parses the flat wire form.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if a required field is missing, the
    /// object type is unknown or a timestamp or size does not parse.
    pub fn from_wire(map: &MetadataMap) -> Result<Self> {
        let created_at = map
            .get(CREATED_AT)
            .ok_or_else(|| missing(CREATED_AT))
            .and_then(|v| parse_timestamp(CREATED_AT, v))?;
        let expires_at = expires_at_from_wire(map)?;
        let tag = map.get(OBJECT_TYPE).ok_or_else(|| missing(OBJECT_TYPE))?;
        let object_type = ObjectType::parse(tag)
            .ok_or_else(|| Error::InvalidInput(format!("unknown objectType '{tag}'")))?;

        let kind = if object_type == ObjectType::FileBlob || map.contains_key(CONTENT_TYPE) {
            let size = map
                .get(SIZE)
                .ok_or_else(|| missing(SIZE))?
                .parse::<u64>()
                .map_err(|e| Error::InvalidInput(format!("invalid size metadata: {e}")))?;
            MetadataKind::File {
                content_type: map.get(CONTENT_TYPE).cloned().unwrap_or_default(),
                filename: map.get(FILENAME).cloned().unwrap_or_default(),
                size,
            }
        } else {
            MetadataKind::Json {
                parent_id: map.get(PARENT_ID).cloned(),
            }
        };

        Ok(Self {
            created_at,
            expires_at,
            object_type,
            kind,
        })
    }
}

impl Serialize for ObjectMetadata {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_wire().serialize(serializer)
    }
}

/// Reads only the `expiresAt` field of a wire map.
///
/// Used where the rest of the envelope may be foreign or incomplete but
/// expiry still has to be decided.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] if the field is present but unparseable.
pub fn expires_at_from_wire(map: &MetadataMap) -> Result<Option<DateTime<Utc>>> {
    map.get(EXPIRES_AT)
        .map(|v| parse_timestamp(EXPIRES_AT, v))
        .transpose()
}

/// Formats a timestamp the way it is stored: RFC 3339, millisecond precision, `Z`.
#[must_use]
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(field: &str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::InvalidInput(format!("invalid {field} '{value}': {e}")))
}

fn missing(field: &str) -> Error {
    Error::InvalidInput(format!("metadata is missing '{field}'"))
}
