//! Repository sources: system repositories from the registry merged with
//! user sources from the store.

use crate::engine::Weldr;
use crate::{CoreError, ErrorEntry};
use std::collections::BTreeMap;
use tracing::{info, warn};
use weldr_backend::RepoConfig;
use weldr_schema::{validate_name, SourceConfig, SourceType};
use weldr_store::StoreError;

/// Describe a registry repository the way user sources are described.
pub fn system_source(repo: &RepoConfig) -> SourceConfig {
    let (kind, url) = if let Some(url) = &repo.metalink {
        (SourceType::Metalink, url)
    } else if let Some(url) = &repo.mirrorlist {
        (SourceType::MirrorList, url)
    } else {
        (SourceType::BaseUrl, repo.baseurl.as_ref().unwrap_or(&repo.id))
    };
    SourceConfig {
        name: if repo.name.is_empty() {
            repo.id.clone()
        } else {
            repo.name.clone()
        },
        source_type: kind.as_str().to_owned(),
        url: url.clone(),
        check_gpg: repo.check_gpg,
        check_ssl: !repo.ignore_ssl,
        system: true,
        gpgkeys: repo.gpg_keys.clone(),
        check_repogpg: repo.check_repogpg,
        module_hotfixes: repo.module_hotfixes,
        ..SourceConfig::default()
    }
}

impl Weldr {
    fn user_repositories(&self, distro: &str) -> Vec<RepoConfig> {
        self.sources
            .for_distro(distro)
            .iter()
            .map(|(id, s)| RepoConfig::from_source(id, s))
            .collect()
    }

    /// System repositories of `distro`/`arch` followed by matching user sources.
    pub fn repositories(&self, distro: &str, arch: &str) -> Result<Vec<RepoConfig>, CoreError> {
        let mut repos = self.registry.repos_for_arch(distro, arch)?;
        repos.extend(self.user_repositories(distro));
        Ok(repos)
    }

    pub(crate) fn image_repositories(
        &self,
        distro: &str,
        arch: &str,
        image_type: &str,
    ) -> Result<Vec<RepoConfig>, CoreError> {
        let mut repos = self.registry.repos_for_image_type(distro, arch, image_type)?;
        repos.extend(self.user_repositories(distro));
        Ok(repos)
    }

    /// Host repositories keyed by id, flagged as system sources.
    fn system_sources(&self) -> BTreeMap<String, SourceConfig> {
        let repos = self
            .registry
            .repos_for_arch(self.registry.host_distro(), self.registry.host_arch())
            .unwrap_or_default();
        repos.iter().map(|r| (r.id.clone(), system_source(r))).collect()
    }

    fn all_sources(&self) -> BTreeMap<String, SourceConfig> {
        let mut all = self.system_sources();
        all.extend(self.sources.snapshot());
        all
    }

    /// Source ids (v1) or names (v0), system sources included.
    pub fn source_list(&self, v1: bool) -> Vec<String> {
        let all = self.all_sources();
        let mut list: Vec<String> = if v1 {
            all.into_keys().collect()
        } else {
            all.into_values().map(|s| s.name).collect()
        };
        list.sort();
        list.dedup();
        list
    }

    /// Sources by id, or all of them for `*`.
    pub fn source_info(&self, ids: &[String]) -> (BTreeMap<String, SourceConfig>, Vec<ErrorEntry>) {
        let all = self.all_sources();
        if ids.iter().any(|i| i == "*") {
            return (all, Vec::new());
        }
        let mut found = BTreeMap::new();
        let mut errors = Vec::new();
        for id in ids {
            let by_name = || all.values().find(|s| &s.name == id);
            match all.get(id).or_else(by_name) {
                Some(s) => {
                    found.insert(id.clone(), s.clone());
                }
                None => errors.push(ErrorEntry::new(
                    "UnknownSource",
                    format!("{id} is not a valid source"),
                )),
            }
        }
        (found, errors)
    }

    /// Add or replace the user source `id`.
    pub fn source_new(&self, id: &str, source: SourceConfig) -> Result<(), CoreError> {
        validate_name("source id", id)?;
        source
            .validate()
            .map_err(|e| CoreError::Projects(format!("Problem parsing POST body: {e}")))?;
        source
            .kind()
            .map_err(|e| CoreError::Projects(format!("Problem parsing POST body: {e}")))?;
        let known = self.registry.distros();
        let invalid: Vec<&str> = source
            .distros
            .iter()
            .filter(|d| !known.contains(d))
            .map(String::as_str)
            .collect();
        if !invalid.is_empty() {
            return Err(CoreError::Projects(format!(
                "Invalid distributions: {}",
                invalid.join(", ")
            )));
        }
        self.sources.put(id, source).map_err(|e| match e {
            StoreError::SystemSource(_) => {
                CoreError::SystemSource(format!("{id} is a system source, it cannot be changed."))
            }
            other => other.into(),
        })?;
        self.persist();
        self.clean_cache();
        info!(source = id, "source saved");
        Ok(())
    }

    /// Delete a user source: by id on v1, by name on v0.
    pub fn source_delete(&self, id: &str, v1: bool) -> Result<(), CoreError> {
        let result = if v1 {
            self.sources.delete(id).map(|_| ())
        } else {
            self.sources.delete_by_name(id).map(|_| ())
        };
        result.map_err(|e| match e {
            StoreError::SystemSource(_) => {
                CoreError::SystemSource(format!("{id} is a system source, it cannot be deleted."))
            }
            StoreError::SourceNotFound(_) => {
                CoreError::UnknownSource(format!("{id} is not a valid source"))
            }
            other => other.into(),
        })?;
        self.persist();
        self.clean_cache();
        info!(source = id, "source deleted");
        Ok(())
    }

    pub(crate) fn clean_cache(&self) {
        if let Err(e) = self.depsolver.clean_cache() {
            warn!("failed to clean depsolver cache: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_source_reflects_repo() {
        let repo = RepoConfig {
            id: "fedora".to_owned(),
            metalink: Some("https://mirrors/metalink".to_owned()),
            check_gpg: true,
            ..RepoConfig::default()
        };
        let s = system_source(&repo);
        assert_eq!(s.name, "fedora");
        assert_eq!(s.source_type, "yum-metalink");
        assert!(s.system);
        assert!(s.check_ssl);
    }
}
