use crate::StoreError;
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

const STATE_FILE: &str = "state.json";
const LOCK_FILE: &str = "weldr.lock";
const OUTPUTS_DIR: &str = "outputs";

/// Paths inside the state directory.
#[derive(Debug, Clone)]
pub struct StateLayout {
    root: PathBuf,
}

impl StateLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn state_file(&self) -> PathBuf {
        self.root.join(STATE_FILE)
    }

    #[inline]
    pub fn lock_file(&self) -> PathBuf {
        self.root.join(LOCK_FILE)
    }

    #[inline]
    pub fn outputs_dir(&self) -> PathBuf {
        self.root.join(OUTPUTS_DIR)
    }

    /// Artifact directory of one compose.
    #[inline]
    pub fn output_dir(&self, id: Uuid) -> PathBuf {
        self.outputs_dir().join(id.to_string())
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.root)?;
        fs::create_dir_all(self.outputs_dir())?;
        Ok(())
    }
}
