//! Blob storage.
//!
//! Every persisted artifact of a tenant lives under `<tenant>/` and is read
//! and written whole. [`FsBlobStore`] maps keys onto a directory tree;
//! [`MemoryBlobStore`] backs tests and dry runs.

use std::collections::BTreeMap;
use std::io;
use std::path::{Component, Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::ReconcileError;

pub trait BlobStore {
    /// `Ok(None)` when nothing is stored at `key`.
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, ReconcileError>;

    fn write(&mut self, key: &str, bytes: &[u8]) -> Result<(), ReconcileError>;
}

fn storage_error(key: &str, source: io::Error) -> ReconcileError {
    ReconcileError::Storage {
        key: key.to_string(),
        source,
    }
}

/// Local filesystem store rooted at a directory.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Keys are relative paths; anything escaping the root is rejected.
    fn path_for_key(&self, key: &str) -> Result<PathBuf, ReconcileError> {
        let relative = Path::new(key);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if key.is_empty() || escapes {
            return Err(storage_error(
                key,
                io::Error::new(io::ErrorKind::InvalidInput, "key must be a relative path inside the store"),
            ));
        }
        Ok(self.root.join(relative))
    }
}

impl BlobStore for FsBlobStore {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, ReconcileError> {
        let path = self.path_for_key(key)?;
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(storage_error(key, err)),
        }
    }

    fn write(&mut self, key: &str, bytes: &[u8]) -> Result<(), ReconcileError> {
        let path = self.path_for_key(key)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| storage_error(key, e))?;
        }
        std::fs::write(&path, bytes).map_err(|e| storage_error(key, e))?;
        debug!(key, bytes = bytes.len(), "wrote blob");
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryBlobStore {
    blobs: BTreeMap<String, Vec<u8>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, bytes: impl Into<Vec<u8>>) -> Self {
        self.blobs.insert(key.to_string(), bytes.into());
        self
    }

    pub fn get_text(&self, key: &str) -> Option<String> {
        self.blobs
            .get(key)
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.blobs.keys().map(String::as_str)
    }
}

impl BlobStore for MemoryBlobStore {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, ReconcileError> {
        Ok(self.blobs.get(key).cloned())
    }

    fn write(&mut self, key: &str, bytes: &[u8]) -> Result<(), ReconcileError> {
        self.blobs.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }
}

/// Records of a newline-delimited JSON blob plus the number of lines that
/// failed to parse. Blank lines are ignored.
pub fn parse_jsonl<T: DeserializeOwned>(raw: &[u8], key: &str) -> (Vec<T>, usize) {
    let text = String::from_utf8_lossy(raw);
    let mut records = Vec::new();
    let mut malformed = 0;
    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(record) => records.push(record),
            Err(err) => {
                malformed += 1;
                warn!(key, line = idx + 1, error = %err, "skipping malformed line");
            }
        }
    }
    (records, malformed)
}

/// One compact JSON record per line, newline-terminated.
pub fn to_jsonl<T: Serialize>(records: &[T]) -> Result<Vec<u8>, ReconcileError> {
    let mut out = Vec::new();
    for record in records {
        serde_json::to_writer(&mut out, record)?;
        out.push(b'\n');
    }
    Ok(out)
}

/// Blob keys of one tenant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLayout {
    tenant: String,
}

impl StorageLayout {
    pub fn new(tenant: impl Into<String>) -> Self {
        Self { tenant: tenant.into() }
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}/{suffix}", self.tenant)
    }

    pub fn mapping_table(&self) -> String {
        self.key("extractsheet/tgw_mapping_table.jsonl")
    }

    pub fn task_set(&self) -> String {
        self.key("extractsheet/tgw_config.jsonl")
    }

    pub fn tenant_config(&self) -> String {
        self.key("extractsheet/tgw_id_config.jsonl")
    }

    pub fn import_mapping(&self) -> String {
        self.key("extractsheet/cfn_import_mapping.json")
    }

    pub fn document(&self) -> String {
        self.key("cfn/tgw_routing_cfn.yaml")
    }

    pub fn document_diff(&self) -> String {
        self.key("cfn/tgw_routing_cfn.yaml.diff")
    }

    pub fn diagram(&self) -> String {
        self.key("mermaid/tgw_routing_diagram.md")
    }

    pub fn diagram_diff(&self) -> String {
        self.key("mermaid/tgw_routing_diagram_diff.md")
    }

    pub fn sheet(&self, name: &str) -> String {
        crate::sheet::sheet_key(&self.tenant, name)
    }
}
