//! Depsolver backed by a static package catalog.
//!
//! The catalog is a JSON document listing packages with their `requires` and
//! `provides`, optionally pinned to a repository id, plus package groups.
//! Resolution is the transitive closure of the requested names over
//! `requires`, picking the newest build for each name.

use crate::context::RequestContext;
use crate::depsolve::{DepsolveError, Depsolver, PackageSet, RepoConfig};
use crate::BackendError;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use tracing::{debug, warn};
use weldr_schema::{Glob, PackageRecord, PackageSpec};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    #[serde(flatten)]
    pub record: PackageRecord,
    #[serde(default)]
    pub requires: Vec<String>,
    #[serde(default)]
    pub provides: Vec<String>,
    /// Repository the package lives in. `None` means every repository.
    #[serde(default)]
    pub repo: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub packages: Vec<CatalogEntry>,
    #[serde(default)]
    pub groups: BTreeMap<String, Vec<String>>,
}

impl Catalog {
    pub fn load(path: &Path) -> Result<Self, BackendError> {
        let content = std::fs::read(path)?;
        Ok(serde_json::from_slice(&content)?)
    }

    fn visible<'a>(&'a self, repos: &'a [RepoConfig]) -> impl Iterator<Item = &'a CatalogEntry> {
        self.packages.iter().filter(move |p| match &p.repo {
            None => true,
            Some(id) => repos.iter().any(|r| &r.id == id),
        })
    }
}

/// Compare two version strings segment by segment, numerically where both
/// segments are digits.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let split = |s: &str| -> Vec<String> {
        let mut segs = Vec::new();
        let mut cur = String::new();
        let mut digit = false;
        for c in s.chars() {
            if !c.is_ascii_alphanumeric() {
                if !cur.is_empty() {
                    segs.push(std::mem::take(&mut cur));
                }
                continue;
            }
            if !cur.is_empty() && c.is_ascii_digit() != digit {
                segs.push(std::mem::take(&mut cur));
            }
            digit = c.is_ascii_digit();
            cur.push(c);
        }
        if !cur.is_empty() {
            segs.push(cur);
        }
        segs
    };
    let (sa, sb) = (split(a), split(b));
    for (x, y) in sa.iter().zip(&sb) {
        let ord = match (x.parse::<u64>(), y.parse::<u64>()) {
            (Ok(nx), Ok(ny)) => nx.cmp(&ny),
            (Ok(_), Err(_)) => Ordering::Greater,
            (Err(_), Ok(_)) => Ordering::Less,
            (Err(_), Err(_)) => x.cmp(y),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    sa.len().cmp(&sb.len())
}

fn compare_builds(a: &PackageRecord, b: &PackageRecord) -> Ordering {
    a.epoch
        .cmp(&b.epoch)
        .then_with(|| compare_versions(&a.version, &b.version))
        .then_with(|| compare_versions(&a.release, &b.release))
}

pub struct CatalogDepsolver {
    catalog: RwLock<Catalog>,
    source: Option<PathBuf>,
}

impl CatalogDepsolver {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            catalog: RwLock::new(catalog),
            source: None,
        }
    }

    /// Load from a file; [`Depsolver::clean_cache`] re-reads it.
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, BackendError> {
        let path = path.into();
        let catalog = Catalog::load(&path)?;
        Ok(Self {
            catalog: RwLock::new(catalog),
            source: Some(path),
        })
    }

    fn resolve(
        catalog: &Catalog,
        package_sets: &[PackageSet],
        repos: &[RepoConfig],
        ctx: &RequestContext,
    ) -> Result<Vec<PackageSpec>, DepsolveError> {
        if repos.is_empty() {
            return Err(DepsolveError::FetchError(
                "no repositories configured".to_owned(),
            ));
        }
        let visible: Vec<&CatalogEntry> = catalog.visible(repos).collect();
        let mut chosen: BTreeMap<String, &CatalogEntry> = BTreeMap::new();
        let mut queue: VecDeque<&CatalogEntry> = VecDeque::new();
        let mut missing = Vec::new();
        let excluded: BTreeSet<&str> = package_sets
            .iter()
            .flat_map(|s| s.exclude.iter().map(String::as_str))
            .collect();

        for set in package_sets {
            for spec in &set.include {
                ctx.check()?;
                let names: Vec<String> = if let Some(group) = spec.strip_prefix('@') {
                    if let Some(members) = catalog.groups.get(group) {
                        members.clone()
                    } else {
                        missing.push(spec.clone());
                        continue;
                    }
                } else {
                    vec![spec.clone()]
                };
                for name in names {
                    if excluded.contains(name.as_str()) {
                        continue;
                    }
                    match match_spec(&visible, &name) {
                        Some(entry) => queue.push_back(entry),
                        None => missing.push(name),
                    }
                }
            }
        }
        if !missing.is_empty() {
            return Err(DepsolveError::MarkingErrors(format!(
                "Error occurred when marking packages for installation: \
                 Problems in request:\nmissing packages: {}",
                missing.join(", ")
            )));
        }

        while let Some(entry) = queue.pop_front() {
            ctx.check()?;
            if chosen.contains_key(&entry.record.name) {
                continue;
            }
            chosen.insert(entry.record.name.clone(), entry);
            for req in &entry.requires {
                let dep = newest(&visible, |e| {
                    e.record.name == *req || e.provides.iter().any(|p| p == req)
                })
                .ok_or_else(|| {
                    DepsolveError::DepsolveError(format!(
                        "nothing provides {req} needed by {}",
                        entry.record.to_spec().nevra()
                    ))
                })?;
                if !chosen.contains_key(&dep.record.name) {
                    queue.push_back(dep);
                }
            }
        }

        let base = repos.iter().find_map(|r| r.baseurl.as_deref());
        Ok(chosen
            .into_values()
            .map(|e| {
                let mut spec = e.record.to_spec();
                if let Some(base) = base {
                    spec.remote_location =
                        format!("{}/{}.rpm", base.trim_end_matches('/'), spec.nevra());
                }
                spec.check_gpg = repos.iter().any(|r| r.check_gpg);
                spec
            })
            .collect())
    }
}

fn newest<'a>(
    visible: &[&'a CatalogEntry],
    pred: impl Fn(&CatalogEntry) -> bool,
) -> Option<&'a CatalogEntry> {
    visible
        .iter()
        .copied()
        .filter(|e| pred(e))
        .max_by(|a, b| compare_builds(&a.record, &b.record))
}

/// Find the newest build matching `name`, `name-version`, or a glob over
/// either form.
fn match_spec<'a>(visible: &[&'a CatalogEntry], spec: &str) -> Option<&'a CatalogEntry> {
    if let Some(exact) = newest(visible, |e| e.record.name == spec) {
        return Some(exact);
    }
    let glob = Glob::new(spec).ok()?;
    newest(visible, |e| {
        let r = &e.record;
        glob.matches(&r.name)
            || glob.matches(&format!("{}-{}", r.name, r.version))
            || glob.matches(&format!("{}-{}-{}", r.name, r.version, r.release))
    })
}

impl Depsolver for CatalogDepsolver {
    fn depsolve(
        &self,
        package_sets: &[PackageSet],
        repos: &[RepoConfig],
        ctx: &RequestContext,
    ) -> Result<Vec<PackageSpec>, DepsolveError> {
        let catalog = self.catalog.read().unwrap_or_else(PoisonError::into_inner);
        let result = Self::resolve(&catalog, package_sets, repos, ctx);
        if let Ok(specs) = &result {
            debug!(packages = specs.len(), "depsolve complete");
        }
        result
    }

    fn fetch_metadata(
        &self,
        repos: &[RepoConfig],
        ctx: &RequestContext,
    ) -> Result<Vec<PackageRecord>, DepsolveError> {
        ctx.check()?;
        if repos.is_empty() {
            return Err(DepsolveError::FetchError(
                "no repositories configured".to_owned(),
            ));
        }
        let catalog = self.catalog.read().unwrap_or_else(PoisonError::into_inner);
        let mut records: Vec<PackageRecord> =
            catalog.visible(repos).map(|e| e.record.clone()).collect();
        records.sort_by(|a, b| {
            a.name
                .to_lowercase()
                .cmp(&b.name.to_lowercase())
                .then_with(|| compare_builds(a, b))
        });
        Ok(records)
    }

    fn search_metadata(
        &self,
        repos: &[RepoConfig],
        names: &[String],
        ctx: &RequestContext,
    ) -> Result<Vec<PackageRecord>, DepsolveError> {
        let globs: Vec<Glob> = names
            .iter()
            .map(|n| Glob::new(n).map_err(|e| DepsolveError::FetchError(e.to_string())))
            .collect::<Result<_, _>>()?;
        let all = self.fetch_metadata(repos, ctx)?;
        Ok(all
            .into_iter()
            .filter(|r| globs.iter().any(|g| g.matches(&r.name)))
            .collect())
    }

    fn clean_cache(&self) -> Result<(), DepsolveError> {
        let Some(path) = &self.source else {
            return Ok(());
        };
        match Catalog::load(path) {
            Ok(fresh) => {
                *self.catalog.write().unwrap_or_else(PoisonError::into_inner) = fresh;
                debug!("reloaded package catalog from {}", path.display());
                Ok(())
            }
            Err(e) => {
                warn!("failed to reload package catalog {}: {e}", path.display());
                Err(DepsolveError::FetchError(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{fixture_catalog, fixture_repos};

    fn solver() -> CatalogDepsolver {
        CatalogDepsolver::new(fixture_catalog())
    }

    fn names(specs: &[PackageSpec]) -> Vec<&str> {
        specs.iter().map(|s| s.name.as_str()).collect()
    }

    #[test]
    fn version_ordering() {
        assert_eq!(compare_versions("1.10", "1.9"), Ordering::Greater);
        assert_eq!(compare_versions("2.4.58", "2.4.58"), Ordering::Equal);
        assert_eq!(compare_versions("3.3a", "3.3"), Ordering::Greater);
        assert_eq!(compare_versions("1.0", "1.0.1"), Ordering::Less);
    }

    #[test]
    fn closure_over_requires() {
        let ctx = RequestContext::default();
        let specs = solver()
            .depsolve(&[PackageSet::new(vec!["tmux".to_owned()])], &fixture_repos(), &ctx)
            .unwrap();
        assert_eq!(names(&specs), vec!["glibc", "libevent", "ncurses-libs", "tmux"]);
        assert!(specs[0].remote_location.ends_with(".rpm"));
    }

    #[test]
    fn newest_build_wins_and_globs_pin() {
        let ctx = RequestContext::default();
        let repos = fixture_repos();
        let specs = solver()
            .depsolve(&[PackageSet::new(vec!["httpd".to_owned()])], &repos, &ctx)
            .unwrap();
        let httpd = specs.iter().find(|s| s.name == "httpd").unwrap();
        assert_eq!(httpd.version, "2.4.62");
        let pinned = solver()
            .depsolve(&[PackageSet::new(vec!["httpd-2.4.5*".to_owned()])], &repos, &ctx)
            .unwrap();
        let httpd = pinned.iter().find(|s| s.name == "httpd").unwrap();
        assert_eq!(httpd.version, "2.4.58");
    }

    #[test]
    fn groups_expand() {
        let ctx = RequestContext::default();
        let specs = solver()
            .depsolve(&[PackageSet::new(vec!["@core".to_owned()])], &fixture_repos(), &ctx)
            .unwrap();
        assert!(names(&specs).contains(&"bash"));
    }

    #[test]
    fn missing_package_is_marking_error() {
        let ctx = RequestContext::default();
        let err = solver()
            .depsolve(
                &[PackageSet::new(vec!["no-such-pkg".to_owned()])],
                &fixture_repos(),
                &ctx,
            )
            .unwrap_err();
        assert!(matches!(err, DepsolveError::MarkingErrors(ref m) if m.contains("no-such-pkg")));
    }

    #[test]
    fn broken_dependency_is_depsolve_error() {
        let ctx = RequestContext::default();
        let err = solver()
            .depsolve(&[PackageSet::new(vec!["broken".to_owned()])], &fixture_repos(), &ctx)
            .unwrap_err();
        assert!(matches!(
            err,
            DepsolveError::DepsolveError(ref m) if m.contains("nothing provides")
        ));
    }

    #[test]
    fn expired_context_times_out() {
        let ctx = RequestContext::with_timeout(std::time::Duration::ZERO);
        let err = solver()
            .depsolve(&[PackageSet::new(vec!["tmux".to_owned()])], &fixture_repos(), &ctx)
            .unwrap_err();
        assert_eq!(err, DepsolveError::Timeout);
    }

    #[test]
    fn search_matches_globs() {
        let ctx = RequestContext::default();
        let found = solver()
            .search_metadata(&fixture_repos(), &["tmu*".to_owned()], &ctx)
            .unwrap();
        assert!(found.iter().all(|r| r.name == "tmux"));
        assert!(!found.is_empty());
    }

    #[test]
    fn clean_cache_reloads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        std::fs::write(&path, serde_json::to_vec(&Catalog::default()).unwrap()).unwrap();
        let solver = CatalogDepsolver::from_file(&path).unwrap();
        let ctx = RequestContext::default();
        assert!(solver.fetch_metadata(&fixture_repos(), &ctx).unwrap().is_empty());
        std::fs::write(&path, serde_json::to_vec(&fixture_catalog()).unwrap()).unwrap();
        solver.clean_cache().unwrap();
        assert!(!solver.fetch_metadata(&fixture_repos(), &ctx).unwrap().is_empty());
    }
}
