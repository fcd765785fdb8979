//! Deterministic fixtures for tests across the workspace.

use crate::catalog::{Catalog, CatalogDepsolver, CatalogEntry};
use crate::context::RequestContext;
use crate::depsolve::{DepsolveError, Depsolver, PackageSet, RepoConfig};
use crate::repos::{ArchConfig, DistroConfig, ImageTypeDef, RegistryConfig, StaticRepoRegistry};
use crate::worker::{JobAssignment, JobInfo, JobResult, WorkerError, WorkerQueue};
use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;
use weldr_schema::{PackageRecord, PackageSpec};

pub const FIXTURE_BASEURL: &str = "https://repo.example.com/fedora/40/x86_64";

fn entry(name: &str, version: &str, requires: &[&str]) -> CatalogEntry {
    CatalogEntry {
        record: PackageRecord {
            name: name.to_owned(),
            summary: format!("The {name} package"),
            description: format!("{name} for testing."),
            url: format!("https://example.com/{name}"),
            epoch: 0,
            version: version.to_owned(),
            release: "1.fc40".to_owned(),
            arch: "x86_64".to_owned(),
            build_time: "2024-04-01T12:00:00".to_owned(),
            license: "MIT".to_owned(),
        },
        requires: requires.iter().map(|s| (*s).to_owned()).collect(),
        provides: Vec::new(),
        repo: None,
    }
}

/// A small package universe: `tmux` with three dependencies, two `httpd`
/// builds, a `core` group, and a `broken` package with an unresolvable
/// requirement.
pub fn fixture_catalog() -> Catalog {
    let mut glibc = entry("glibc", "2.39", &[]);
    glibc.provides.push("libc.so.6".to_owned());
    let packages = vec![
        entry("bash", "5.2.26", &["libc.so.6"]),
        entry("broken", "1.0", &["libdoesnotexist.so.1"]),
        glibc,
        entry("httpd", "2.4.58", &["glibc"]),
        entry("httpd", "2.4.62", &["glibc"]),
        entry("kernel", "6.8.5", &[]),
        entry("libevent", "2.1.12", &["glibc"]),
        entry("ncurses-libs", "6.4", &["glibc"]),
        entry("openssh-server", "9.6p1", &["glibc"]),
        entry("tmux", "3.4", &["libevent", "ncurses-libs", "libc.so.6"]),
    ];
    let mut groups = BTreeMap::new();
    groups.insert("core".to_owned(), vec!["bash".to_owned(), "glibc".to_owned()]);
    Catalog { packages, groups }
}

pub fn fixture_depsolver() -> CatalogDepsolver {
    CatalogDepsolver::new(fixture_catalog())
}

pub fn fixture_repos() -> Vec<RepoConfig> {
    vec![RepoConfig {
        id: "fedora".to_owned(),
        name: "fedora".to_owned(),
        baseurl: Some(FIXTURE_BASEURL.to_owned()),
        check_gpg: true,
        ..RepoConfig::default()
    }]
}

fn fixture_image_type(
    name: &str,
    filename: &str,
    mime: &str,
    size: u64,
    bootable: bool,
) -> ImageTypeDef {
    ImageTypeDef {
        name: name.to_owned(),
        filename: filename.to_owned(),
        mime_type: mime.to_owned(),
        default_size: size,
        bootable,
        build_packages: vec!["bash".to_owned()],
        payload_packages: vec!["@core".to_owned()],
    }
}

pub fn fixture_registry_config() -> RegistryConfig {
    let image_types = vec![
        fixture_image_type("ami", "image.raw", "application/octet-stream", 6 << 30, true),
        fixture_image_type("qcow2", "disk.qcow2", "application/x-qemu-disk", 5 << 30, true),
        fixture_image_type("tar", "root.tar.xz", "application/x-tar", 0, false),
    ];
    let arch = |name: &str| ArchConfig {
        name: name.to_owned(),
        image_types: image_types.clone(),
        repos: fixture_repos(),
    };
    RegistryConfig {
        host_distro: "fedora-40".to_owned(),
        host_arch: "x86_64".to_owned(),
        distros: vec![
            DistroConfig {
                name: "fedora-40".to_owned(),
                arches: vec![arch("x86_64"), arch("aarch64")],
            },
            DistroConfig {
                name: "fedora-41".to_owned(),
                arches: vec![arch("x86_64")],
            },
        ],
    }
}

/// Two Fedora releases; `fedora-40` on x86_64 is the host.
pub fn fixture_registry() -> StaticRepoRegistry {
    match StaticRepoRegistry::from_config(fixture_registry_config()) {
        Ok(r) => r,
        Err(e) => panic!("fixture registry is invalid: {e}"),
    }
}

/// Fails every call with the configured error.
pub struct FailingDepsolver(pub DepsolveError);

impl Depsolver for FailingDepsolver {
    fn depsolve(
        &self,
        _: &[PackageSet],
        _: &[RepoConfig],
        _: &RequestContext,
    ) -> Result<Vec<PackageSpec>, DepsolveError> {
        Err(self.0.clone())
    }

    fn fetch_metadata(
        &self,
        _: &[RepoConfig],
        _: &RequestContext,
    ) -> Result<Vec<PackageRecord>, DepsolveError> {
        Err(self.0.clone())
    }

    fn search_metadata(
        &self,
        _: &[RepoConfig],
        _: &[String],
        _: &RequestContext,
    ) -> Result<Vec<PackageRecord>, DepsolveError> {
        Err(self.0.clone())
    }

    fn clean_cache(&self) -> Result<(), DepsolveError> {
        Ok(())
    }
}

/// Sleeps in small steps until the request deadline, then times out.
pub struct SlowDepsolver;

impl SlowDepsolver {
    fn stall(ctx: &RequestContext) -> DepsolveError {
        while ctx.check().is_ok() {
            std::thread::sleep(Duration::from_millis(5));
        }
        DepsolveError::Timeout
    }
}

impl Depsolver for SlowDepsolver {
    fn depsolve(
        &self,
        _: &[PackageSet],
        _: &[RepoConfig],
        ctx: &RequestContext,
    ) -> Result<Vec<PackageSpec>, DepsolveError> {
        Err(Self::stall(ctx))
    }

    fn fetch_metadata(
        &self,
        _: &[RepoConfig],
        ctx: &RequestContext,
    ) -> Result<Vec<PackageRecord>, DepsolveError> {
        Err(Self::stall(ctx))
    }

    fn search_metadata(
        &self,
        _: &[RepoConfig],
        _: &[String],
        ctx: &RequestContext,
    ) -> Result<Vec<PackageRecord>, DepsolveError> {
        Err(Self::stall(ctx))
    }

    fn clean_cache(&self) -> Result<(), DepsolveError> {
        Ok(())
    }
}

/// Refuses every enqueue.
pub struct RejectingQueue;

impl WorkerQueue for RejectingQueue {
    fn enqueue(&self, _: &str, _: serde_json::Value) -> Result<Uuid, WorkerError> {
        Err(WorkerError::Rejected("queue is full".to_owned()))
    }

    fn request_job(&self, _: &[&str], _: Duration) -> Result<Option<JobAssignment>, WorkerError> {
        Ok(None)
    }

    fn finish_job(&self, token: Uuid, _: JobResult) -> Result<(), WorkerError> {
        Err(WorkerError::UnknownToken(token))
    }

    fn job_info(&self, job_id: Uuid) -> Result<JobInfo, WorkerError> {
        Err(WorkerError::UnknownJob(job_id))
    }

    fn cancel(&self, job_id: Uuid) -> Result<(), WorkerError> {
        Err(WorkerError::UnknownJob(job_id))
    }

    fn forget(&self, job_id: Uuid) -> Result<(), WorkerError> {
        Err(WorkerError::UnknownJob(job_id))
    }
}
