use crate::StoreError;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use weldr_schema::SourceConfig;

/// User-defined repository sources keyed by id (v1) or name (v0).
///
/// System source ids are read-only here: they come from the repository
/// registry and can be neither replaced nor deleted.
#[derive(Debug, Default)]
pub struct SourceStore {
    inner: RwLock<BTreeMap<String, SourceConfig>>,
    system_ids: BTreeSet<String>,
}

impl SourceStore {
    pub fn new(system_ids: impl IntoIterator<Item = String>) -> Self {
        Self {
            inner: RwLock::new(BTreeMap::new()),
            system_ids: system_ids.into_iter().collect(),
        }
    }

    pub fn with_sources(mut self, sources: BTreeMap<String, SourceConfig>) -> Self {
        let user = sources
            .into_iter()
            .filter(|(id, _)| !self.system_ids.contains(id))
            .collect();
        self.inner = RwLock::new(user);
        self
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, SourceConfig>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, SourceConfig>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_system(&self, id: &str) -> bool {
        self.system_ids.contains(id)
    }

    pub fn snapshot(&self) -> BTreeMap<String, SourceConfig> {
        self.read().clone()
    }

    /// Insert or replace a user source.
    pub fn put(&self, id: &str, mut source: SourceConfig) -> Result<(), StoreError> {
        if self.is_system(id) {
            return Err(StoreError::SystemSource(id.to_owned()));
        }
        source.system = false;
        self.write().insert(id.to_owned(), source);
        tracing::info!(source = id, "stored source");
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<SourceConfig> {
        self.read().get(id).cloned()
    }

    /// Sorted ids of user sources.
    pub fn ids(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    /// Sorted, de-duplicated names of user sources.
    pub fn names(&self) -> Vec<String> {
        let names: BTreeSet<String> = self.read().values().map(|s| s.name.clone()).collect();
        names.into_iter().collect()
    }

    pub fn delete(&self, id: &str) -> Result<SourceConfig, StoreError> {
        if self.is_system(id) {
            return Err(StoreError::SystemSource(id.to_owned()));
        }
        let removed = self
            .write()
            .remove(id)
            .ok_or_else(|| StoreError::SourceNotFound(id.to_owned()))?;
        tracing::info!(source = id, "deleted source");
        Ok(removed)
    }

    /// Remove every source whose `name` matches. Returns how many were removed.
    pub fn delete_by_name(&self, name: &str) -> Result<usize, StoreError> {
        if self.is_system(name) {
            return Err(StoreError::SystemSource(name.to_owned()));
        }
        let mut map = self.write();
        let before = map.len();
        map.retain(|id, s| s.name != name && id != name);
        let removed = before - map.len();
        if removed == 0 {
            return Err(StoreError::SourceNotFound(name.to_owned()));
        }
        Ok(removed)
    }

    /// User sources that apply to `distro`: those without a distro list, or
    /// listing it explicitly.
    pub fn for_distro(&self, distro: &str) -> Vec<(String, SourceConfig)> {
        self.read()
            .iter()
            .filter(|(_, s)| s.distros.is_empty() || s.distros.iter().any(|d| d == distro))
            .map(|(id, s)| (id.clone(), s.clone()))
            .collect()
    }
}
