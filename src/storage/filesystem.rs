//! Filesystem object store.
//!
//! Stores each object as one JSON envelope file under a root directory. Key
//! segments become path segments and the file gets an `.obj` suffix, so
//! `files/file_1/blob` lives at `<root>/files/file_1/blob.obj`:
//!
//! ```json
//! { "etag": "3f2a...-18c2e0", "metadata": { "objectType": "thread", ... }, "size": 2, "value": "<base64>" }
//! ```
//!
//! # Security
//!
//! - **Path traversal**: keys with empty, `.` or `..` segments, backslashes or
//!   NUL bytes are rejected before touching the filesystem
//! - **Torn writes**: envelopes are written to a temp file and renamed into place
//! - **File size limits**: envelopes larger than [`MAX_ENVELOPE_SIZE`] are refused

use super::memory::{compute_etag, page_from_sorted};
use super::traits::{ETag, ListPage, ListRequest, ListedEntry, ObjectStore, StoredObject};
use crate::models::MetadataMap;
use crate::{Error, Result};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Suffix of envelope files.
const OBJECT_SUFFIX: &str = ".obj";

/// Largest envelope read back from disk (64 MiB).
pub const MAX_ENVELOPE_SIZE: u64 = 64 * 1024 * 1024;

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    etag: String,
    #[serde(default)]
    metadata: MetadataMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    size: Option<u64>,
    value: String,
}

impl Envelope {
    /// Payload size, decoding the value only for envelopes written without one.
    fn value_size(&self, key: &str) -> Result<u64> {
        match self.size {
            Some(size) => Ok(size),
            None => Ok(self.decode_value(key)?.len() as u64),
        }
    }

    fn decode_value(&self, key: &str) -> Result<Bytes> {
        BASE64
            .decode(&self.value)
            .map(Bytes::from)
            .map_err(|e| Error::operation("decode_object", format!("{key}: {e}")))
    }
}

/// Object store backed by a directory tree.
#[derive(Debug, Clone)]
pub struct FilesystemObjectStore {
    root: Arc<PathBuf>,
    writes: Arc<AtomicU64>,
}

impl FilesystemObjectStore {
    /// Opens a store rooted at `root`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationFailed`] if the directory cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| Error::operation("create_storage_dir", e))?;
        Ok(Self {
            root: Arc::new(root),
            writes: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str) -> Result<PathBuf> {
        object_path(&self.root, key)
    }

    fn next_discriminator(&self) -> String {
        let write = self.writes.fetch_add(1, Ordering::Relaxed);
        let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
        format!("{nanos:x}{write:x}")
    }
}

fn is_safe_segment(segment: &str) -> bool {
    !(segment.is_empty() || segment == "." || segment == ".." || segment.contains(['\\', '\0']))
}

fn object_path(root: &Path, key: &str) -> Result<PathBuf> {
    let mut path = root.to_path_buf();
    let mut segments = key.split('/').peekable();
    while let Some(segment) = segments.next() {
        if !is_safe_segment(segment) {
            return Err(Error::InvalidInput(format!(
                "key is not a safe path: {key:?}"
            )));
        }
        if segments.peek().is_some() {
            path.push(segment);
        } else {
            path.push(format!("{segment}{OBJECT_SUFFIX}"));
        }
    }
    Ok(path)
}

fn read_envelope(path: &Path) -> Result<Option<Envelope>> {
    match fs::metadata(path) {
        Ok(meta) if meta.len() > MAX_ENVELOPE_SIZE => {
            return Err(Error::operation(
                "read_object",
                format!("{} exceeds {MAX_ENVELOPE_SIZE} bytes", path.display()),
            ));
        },
        Ok(_) => {},
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::operation("read_object", e)),
    }
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::operation("read_object", e)),
    };
    serde_json::from_slice(&raw)
        .map(Some)
        .map_err(|e| Error::operation("parse_object", format!("{}: {e}", path.display())))
}

fn write_envelope(path: &Path, envelope: &Envelope, discriminator: &str) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| Error::operation("write_object", "object path has no parent"))?;
    fs::create_dir_all(parent).map_err(|e| Error::operation("create_object_dir", e))?;

    let json = serde_json::to_vec(envelope).map_err(|e| Error::operation("serialize_object", e))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = parent.join(format!(".{file_name}.tmp-{discriminator}"));
    fs::write(&tmp, json).map_err(|e| Error::operation("write_object", e))?;
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        Error::operation("rename_object", e)
    })
}

/// Collects every key under `dir`, given the key prefix that `dir` stands for.
fn walk_keys(dir: &Path, key_prefix: &str, keys: &mut Vec<String>) -> Result<()> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(Error::operation("list_objects", e)),
    };
    for entry in entries {
        let entry = entry.map_err(|e| Error::operation("list_objects", e))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let file_type = entry
            .file_type()
            .map_err(|e| Error::operation("list_objects", e))?;
        if file_type.is_dir() {
            walk_keys(&entry.path(), &format!("{key_prefix}{name}/"), keys)?;
        } else if let Some(stem) = name.strip_suffix(OBJECT_SUFFIX)
            && !name.starts_with('.')
        {
            keys.push(format!("{key_prefix}{stem}"));
        }
    }
    Ok(())
}

/// Deepest directory that holds every key under `prefix`, with the key
/// prefix it stands for.
fn walk_root(root: &Path, prefix: &str) -> Result<(PathBuf, String)> {
    let Some((dirs, _)) = prefix.rsplit_once('/') else {
        return Ok((root.to_path_buf(), String::new()));
    };
    let mut dir = root.to_path_buf();
    for segment in dirs.split('/') {
        if !is_safe_segment(segment) {
            return Err(Error::InvalidInput(format!(
                "prefix is not a safe path: {prefix:?}"
            )));
        }
        dir.push(segment);
    }
    Ok((dir, format!("{dirs}/")))
}

fn list_blocking(root: &Path, request: &ListRequest) -> Result<ListPage> {
    let (walk_dir, walk_prefix) = walk_root(root, &request.prefix)?;
    let mut keys = Vec::new();
    walk_keys(&walk_dir, &walk_prefix, &mut keys)?;
    keys.sort_unstable();

    // Read envelopes until one past the page is live, so objects deleted
    // between the walk and the read never hide the overflow entry.
    let limit = request.limit.unwrap_or(super::memory::DEFAULT_LIST_LIMIT).max(1);
    let candidates = keys
        .into_iter()
        .filter(|key| key.starts_with(&request.prefix))
        .filter(|key| request.cursor.as_ref().is_none_or(|c| key.as_str() > c.as_str()));

    let mut entries = Vec::with_capacity(limit + 1);
    for key in candidates {
        if entries.len() > limit {
            break;
        }
        let path = object_path(root, &key)?;
        let Some(envelope) = read_envelope(&path)? else {
            continue;
        };
        let size = envelope.value_size(&key)?;
        entries.push(ListedEntry {
            key,
            tag: ETag::new(envelope.etag),
            size,
            metadata: envelope.metadata,
        });
    }
    Ok(page_from_sorted(entries.into_iter(), request))
}

async fn blocking<T, F>(operation: &'static str, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::operation(operation, e))?
}

#[async_trait]
impl ObjectStore for FilesystemObjectStore {
    async fn get(&self, key: &str) -> Result<Option<StoredObject>> {
        let path = self.object_path(key)?;
        let key = key.to_string();
        blocking("get_object", move || {
            let Some(envelope) = read_envelope(&path)? else {
                return Ok(None);
            };
            let value = envelope.decode_value(&key)?;
            Ok(Some(StoredObject {
                key,
                value,
                tag: ETag::new(envelope.etag),
                metadata: envelope.metadata,
            }))
        })
        .await
    }

    async fn put(&self, key: &str, value: Bytes, metadata: MetadataMap) -> Result<ETag> {
        let path = self.object_path(key)?;
        let discriminator = self.next_discriminator();
        let tag = compute_etag(&value, &discriminator);
        let envelope = Envelope {
            etag: tag.as_str().to_string(),
            metadata,
            size: Some(value.len() as u64),
            value: BASE64.encode(&value),
        };
        blocking("put_object", move || {
            write_envelope(&path, &envelope, &discriminator)
        })
        .await?;
        Ok(tag)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let path = self.object_path(key)?;
        blocking("delete_object", move || match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::operation("delete_object", e)),
        })
        .await
    }

    async fn list(&self, request: ListRequest) -> Result<ListPage> {
        let root = Arc::clone(&self.root);
        blocking("list_objects", move || list_blocking(&root, &request)).await
    }
}
