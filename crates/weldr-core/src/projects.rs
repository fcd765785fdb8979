//! Package queries against the repositories of a distribution: projects,
//! modules, and ad-hoc depsolves.

use crate::engine::{Page, Weldr};
use crate::CoreError;
use serde::Serialize;
use weldr_backend::{DepsolveError, PackageSet};
use weldr_schema::{to_package_infos, PackageInfo, PackageRecord, PackageSpec};

/// Entry of a module listing. Every package is reported as an rpm module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleName {
    pub name: String,
    pub group_type: String,
}

impl ModuleName {
    fn rpm(name: String) -> Self {
        Self {
            name,
            group_type: "rpm".to_owned(),
        }
    }
}

impl Weldr {
    /// Distributions with repositories for `arch` (host arch when `None`), sorted.
    pub fn distros_list(&self, arch: Option<&str>) -> Vec<String> {
        let arch = arch.unwrap_or_else(|| self.registry.host_arch());
        let mut distros: Vec<String> = self
            .registry
            .distros()
            .into_iter()
            .filter(|d| self.registry.repos_for_arch(d, arch).is_ok())
            .collect();
        distros.sort();
        distros
    }

    /// Resolve the optional `distro`/`arch` query parameters to a concrete
    /// pair, defaulting to the host.
    pub fn resolve_distro(
        &self,
        distro: Option<&str>,
        arch: Option<&str>,
    ) -> Result<(String, String), CoreError> {
        let arch = arch
            .filter(|a| !a.is_empty())
            .unwrap_or_else(|| self.registry.host_arch())
            .to_owned();
        let distro = match distro.filter(|d| !d.is_empty()) {
            Some(d) if self.distros_list(Some(&arch)).iter().any(|v| v == d) => d.to_owned(),
            Some(d) => return Err(CoreError::Distro(format!("Invalid distro: {d}"))),
            None => self.registry.host_distro().to_owned(),
        };
        Ok((distro, arch))
    }

    fn search_packages(
        &self,
        distro: &str,
        arch: &str,
        names: &[String],
        family: fn(String) -> CoreError,
    ) -> Result<Vec<PackageRecord>, CoreError> {
        let repos = self.repositories(distro, arch)?;
        let ctx = self.request_context();
        let found = if names.is_empty() {
            self.depsolver.fetch_metadata(&repos, &ctx)
        } else {
            self.depsolver.search_metadata(&repos, names, &ctx)
        };
        found.map_err(|e| match e {
            DepsolveError::Timeout => CoreError::from(e),
            e => family(format!("msg: {e}")),
        })
    }

    /// Every available package as a project, paginated.
    pub fn projects_list(
        &self,
        distro: &str,
        arch: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Page<PackageInfo>, CoreError> {
        let records = self.search_packages(distro, arch, &[], CoreError::Projects)?;
        Ok(Page::window(to_package_infos(&records), offset, limit))
    }

    /// Project details for packages matching `names`.
    pub fn projects_info(
        &self,
        distro: &str,
        arch: &str,
        names: &[String],
    ) -> Result<Vec<PackageInfo>, CoreError> {
        if names.is_empty() {
            return Err(CoreError::UnknownProject("No packages specified.".to_owned()));
        }
        let records = self.search_packages(distro, arch, names, CoreError::Projects)?;
        if records.is_empty() {
            return Err(CoreError::UnknownProject(
                "No packages have been found.".to_owned(),
            ));
        }
        Ok(to_package_infos(&records))
    }

    /// Module names matching the `names` globs, or every module when empty.
    pub fn modules_list(
        &self,
        distro: &str,
        arch: &str,
        names: &[String],
        offset: usize,
        limit: usize,
    ) -> Result<Page<ModuleName>, CoreError> {
        let records = self.search_packages(distro, arch, names, CoreError::Modules)?;
        if records.is_empty() {
            return Err(CoreError::UnknownModule(
                "No packages have been found.".to_owned(),
            ));
        }
        let modules = to_package_infos(&records)
            .into_iter()
            .map(|p| ModuleName::rpm(p.name))
            .collect();
        Ok(Page::window(modules, offset, limit))
    }

    /// Module details for `names`, each with its depsolved dependencies.
    pub fn modules_info(
        &self,
        distro: &str,
        arch: &str,
        names: &[String],
    ) -> Result<Vec<PackageInfo>, CoreError> {
        if names.is_empty() {
            return Err(CoreError::UnknownModule("No packages specified.".to_owned()));
        }
        let records = self.search_packages(distro, arch, names, CoreError::Modules)?;
        if records.is_empty() {
            return Err(CoreError::UnknownModule(
                "No packages have been found.".to_owned(),
            ));
        }
        let repos = self.repositories(distro, arch)?;
        let ctx = self.request_context();
        let mut infos = to_package_infos(&records);
        for info in &mut infos {
            let set = PackageSet {
                include: vec![info.name.clone()],
                ..PackageSet::default()
            };
            let deps = self
                .depsolver
                .depsolve(&[set], &repos, &ctx)
                .map_err(|e| match e {
                    e @ DepsolveError::Timeout => CoreError::from(e),
                    e => CoreError::Modules(format!("Cannot depsolve package {}: {e}", info.name)),
                })?;
            info.dependencies = Some(deps);
        }
        self.clean_cache();
        Ok(infos)
    }

    /// Resolve `names` and their dependencies into concrete packages.
    pub fn projects_depsolve(
        &self,
        distro: &str,
        arch: &str,
        names: &[String],
    ) -> Result<Vec<PackageSpec>, CoreError> {
        if names.is_empty() {
            return Err(CoreError::UnknownProject("No packages specified.".to_owned()));
        }
        let repos = self.repositories(distro, arch)?;
        let set = PackageSet {
            include: names.to_vec(),
            ..PackageSet::default()
        };
        let deps = self
            .depsolver
            .depsolve(&[set], &repos, &self.request_context())
            .map_err(|e| match CoreError::from_depsolve(&e, CoreError::Projects) {
                CoreError::Projects(m) | CoreError::Blueprints(m) => {
                    CoreError::Projects(format!("BadRequest: {m}"))
                }
                other => other,
            })?;
        self.clean_cache();
        Ok(deps)
    }
}
