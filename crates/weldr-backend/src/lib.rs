//! Adapters to the collaborators outside the control plane.
//!
//! Three traits describe the seams: [`Depsolver`] resolves package sets
//! against repositories, [`WorkerQueue`] hands build jobs to image workers
//! and reports their progress, and [`RepoRegistry`] knows the distributions,
//! architectures, image types, and system repositories the host supports.
//! Each has an in-process implementation ([`CatalogDepsolver`],
//! [`InMemoryJobQueue`], [`StaticRepoRegistry`]) and [`mock`] carries the
//! fixtures the other crates test against.

pub mod catalog;
pub mod context;
pub mod depsolve;
pub mod local_worker;
pub mod mock;
pub mod repos;
pub mod worker;

pub use catalog::{Catalog, CatalogDepsolver, CatalogEntry};
pub use context::{RequestContext, DEFAULT_REQUEST_TIMEOUT};
pub use depsolve::{DepsolveError, Depsolver, PackageSet, RepoConfig};
pub use local_worker::{LocalWorker, WorkerHandle};
pub use repos::{ImageTypeDef, RegistryConfig, RepoRegistry, StaticRepoRegistry};
pub use worker::{
    BuildPayload, InMemoryJobQueue, JobAssignment, JobFailure, JobInfo, JobResult, JobStatus,
    WorkerError, WorkerQueue, OSBUILD_JOB,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    Depsolve(#[from] DepsolveError),
    #[error(transparent)]
    Worker(#[from] WorkerError),
    #[error("unknown distro: {0}")]
    UnknownDistro(String),
    #[error("invalid architecture '{arch}' for distro {distro}")]
    UnknownArch { distro: String, arch: String },
    #[error("invalid image type: {0}")]
    UnknownImageType(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_error_display() {
        let e = BackendError::UnknownArch {
            distro: "fedora-40".to_owned(),
            arch: "s390x".to_owned(),
        };
        let msg = e.to_string();
        assert!(msg.contains("s390x"));
        assert!(msg.contains("fedora-40"));
        assert_eq!(
            BackendError::UnknownImageType("floppy".to_owned()).to_string(),
            "invalid image type: floppy"
        );
    }
}
