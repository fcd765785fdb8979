use crate::context::RequestContext;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use weldr_schema::{PackageRecord, PackageSpec, SourceConfig, SourceType};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DepsolveError {
    /// A requested package or group could not be found.
    #[error("{0}")]
    MarkingErrors(String),
    /// Requested packages were found but their dependencies do not resolve.
    #[error("{0}")]
    DepsolveError(String),
    /// Repository metadata could not be loaded.
    #[error("{0}")]
    FetchError(String),
    #[error("request deadline exceeded")]
    Timeout,
}

impl DepsolveError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MarkingErrors(_) => "MarkingErrors",
            Self::DepsolveError(_) => "DepsolveError",
            Self::FetchError(_) => "FetchError",
            Self::Timeout => "Timeout",
        }
    }
}

/// A repository the depsolver may read from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseurl: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metalink: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mirrorlist: Option<String>,
    #[serde(default)]
    pub check_gpg: bool,
    #[serde(default)]
    pub check_repogpg: bool,
    #[serde(default)]
    pub ignore_ssl: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gpg_keys: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_hotfixes: Option<bool>,
    /// Image type package sets this repository is limited to. Empty means all.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub package_sets: Vec<String>,
}

impl RepoConfig {
    /// Translate a user source into a repository definition.
    pub fn from_source(id: &str, source: &SourceConfig) -> Self {
        let mut repo = Self {
            id: id.to_owned(),
            name: source.name.clone(),
            check_gpg: source.check_gpg,
            check_repogpg: source.check_repogpg,
            ignore_ssl: !source.check_ssl,
            gpg_keys: source.gpgkeys.clone(),
            module_hotfixes: source.module_hotfixes,
            ..Self::default()
        };
        let url = Some(source.url.clone());
        match source.kind() {
            Ok(SourceType::Metalink) => repo.metalink = url,
            Ok(SourceType::MirrorList) => repo.mirrorlist = url,
            Ok(SourceType::BaseUrl) | Err(_) => repo.baseurl = url,
        }
        repo
    }
}

/// One step of a chained depsolve.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageSet {
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub enabled_modules: Vec<String>,
}

impl PackageSet {
    pub fn new(include: Vec<String>) -> Self {
        Self {
            include,
            ..Self::default()
        }
    }
}

pub trait Depsolver: Send + Sync {
    /// Resolve the union of `package_sets` into concrete packages sorted by name.
    fn depsolve(
        &self,
        package_sets: &[PackageSet],
        repos: &[RepoConfig],
        ctx: &RequestContext,
    ) -> Result<Vec<PackageSpec>, DepsolveError>;

    /// Every package available in `repos`.
    fn fetch_metadata(
        &self,
        repos: &[RepoConfig],
        ctx: &RequestContext,
    ) -> Result<Vec<PackageRecord>, DepsolveError>;

    /// Packages whose name matches one of `names` (shell globs allowed).
    fn search_metadata(
        &self,
        repos: &[RepoConfig],
        names: &[String],
        ctx: &RequestContext,
    ) -> Result<Vec<PackageRecord>, DepsolveError>;

    fn clean_cache(&self) -> Result<(), DepsolveError>;
}
