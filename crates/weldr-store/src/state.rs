use crate::composes::Compose;
use crate::{fsync_dir, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use uuid::Uuid;
use weldr_schema::{Blueprint, Change, SourceConfig};

/// Everything persisted in `state.json`.
///
/// Top-level keys this version does not know are kept in `extra` and written
/// back unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateDocument {
    #[serde(default)]
    pub blueprints: BTreeMap<String, Blueprint>,
    #[serde(default)]
    pub workspace: BTreeMap<String, Blueprint>,
    #[serde(default)]
    pub changes: BTreeMap<String, Vec<Change>>,
    #[serde(default)]
    pub composes: BTreeMap<Uuid, Compose>,
    #[serde(default)]
    pub sources: BTreeMap<String, SourceConfig>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl StateDocument {
    /// Read the state file. A missing file yields an empty document.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let content = match fs::read(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&content)?)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, StoreError> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Atomically replace `path` with `data`: temp file, fsync, rename, fsync dir.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<(), StoreError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| StoreError::Io(e.error))?;
    fsync_dir(dir)?;
    Ok(())
}
