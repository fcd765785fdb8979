//! Core orchestration for the Weldr control plane.
//!
//! The [`Weldr`] engine bundles the blueprint, compose, and source stores with
//! the depsolver, worker queue, and repository registry adapters, and exposes
//! every API operation as a method returning [`CoreError`] on failure. Compose
//! state tracking lives in [`ComposeManager`]; blueprint freezing and diffing
//! in [`freeze`] and [`diff`]; manifest construction in [`manifest`].

pub mod compose;
pub mod concurrency;
pub mod diff;
pub mod engine;
pub mod freeze;
pub mod lifecycle;
pub mod manifest;
pub mod projects;
pub mod sources;

pub use compose::{
    ComposeManager, ComposeRequest, ImageArtifact, StatusFilter, TestMode, UploadRequest,
};
pub use concurrency::{install_signal_handler, shutdown_requested};
pub use diff::{diff_blueprints, BlueprintDiff, DiffItem};
pub use engine::{Adapters, ChangesPage, Page, Weldr, WeldrConfig};
pub use freeze::freeze_blueprint;
pub use lifecycle::validate_transition;
pub use projects::ModuleName;

use serde::Serialize;
use thiserror::Error;
use weldr_backend::{BackendError, DepsolveError, WorkerError};
use weldr_schema::BlueprintError;
use weldr_store::StoreError;

/// An API failure. Each variant maps to one external error id.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error("{0}")]
    InvalidChars(String),
    #[error("{0}")]
    BadLimitOrOffset(String),
    #[error("{0}")]
    UnknownBlueprint(String),
    #[error("{0}")]
    UnknownUuid(String),
    #[error("{0}")]
    UnknownSource(String),
    #[error("{0}")]
    UnknownCommit(String),
    #[error("{0}")]
    UnknownModule(String),
    #[error("{0}")]
    UnknownProject(String),
    #[error("{0}")]
    Blueprints(String),
    #[error("{0}")]
    Projects(String),
    #[error("{0}")]
    Modules(String),
    #[error("{0}")]
    ManifestCreationFailed(String),
    #[error("{0}")]
    Compose(String),
    #[error("{0}")]
    BuildInWrongState(String),
    #[error("{0}")]
    SystemSource(String),
    #[error("{0}")]
    InvalidVersion(String),
    #[error("{0}")]
    Distro(String),
    #[error("{0}")]
    RequestTimeout(String),
    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("{0}")]
    Internal(String),
}

impl CoreError {
    pub fn id(&self) -> &'static str {
        match self {
            Self::InvalidChars(_) => "InvalidChars",
            Self::BadLimitOrOffset(_) => "BadLimitOrOffset",
            Self::UnknownBlueprint(_) => "UnknownBlueprint",
            Self::UnknownUuid(_) => "UnknownUUID",
            Self::UnknownSource(_) => "UnknownSource",
            Self::UnknownCommit(_) => "UnknownCommit",
            Self::UnknownModule(_) => "UnknownModule",
            Self::UnknownProject(_) => "UnknownProject",
            Self::Blueprints(_) => "BlueprintsError",
            Self::Projects(_) => "ProjectsError",
            Self::Modules(_) => "ModulesError",
            Self::ManifestCreationFailed(_) => "ManifestCreationFailed",
            Self::Compose(_) => "ComposeError",
            Self::BuildInWrongState(_) => "BuildInWrongState",
            Self::SystemSource(_) => "SystemSource",
            Self::InvalidVersion(_) => "InvalidVersion",
            Self::Distro(_) => "DistroError",
            Self::RequestTimeout(_) => "RequestTimeout",
            Self::InvalidTransition { .. } | Self::Internal(_) => "InternalError",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Self::RequestTimeout(_) => 504,
            Self::InvalidTransition { .. } | Self::Internal(_) => 500,
            _ => 400,
        }
    }

    /// Map a depsolver failure on a package route. Marking and depsolve
    /// errors become `err` of the route's family; fetch errors are
    /// `ProjectsError`.
    pub fn from_depsolve(e: &DepsolveError, family: fn(String) -> CoreError) -> Self {
        match e {
            DepsolveError::Timeout => Self::RequestTimeout(e.to_string()),
            DepsolveError::FetchError(msg) => Self::Projects(msg.clone()),
            DepsolveError::MarkingErrors(msg) | DepsolveError::DepsolveError(msg) => {
                family(msg.clone())
            }
        }
    }

    /// Prefix the message with `name: `, keeping the id.
    #[must_use]
    pub fn for_name(self, name: &str) -> Self {
        let prefix = |m: String| format!("{name}: {m}");
        match self {
            Self::Blueprints(m) => Self::Blueprints(prefix(m)),
            Self::Projects(m) => Self::Projects(prefix(m)),
            Self::Modules(m) => Self::Modules(prefix(m)),
            other => other,
        }
    }
}

impl From<DepsolveError> for CoreError {
    fn from(e: DepsolveError) -> Self {
        Self::from_depsolve(&e, Self::Blueprints)
    }
}

impl From<BlueprintError> for CoreError {
    fn from(e: BlueprintError) -> Self {
        match e {
            BlueprintError::InvalidChars { .. } | BlueprintError::EmptyName => {
                Self::InvalidChars(e.to_string())
            }
            other => Self::Blueprints(other.to_string()),
        }
    }
}

impl From<StoreError> for CoreError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Blueprint(b) => b.into(),
            StoreError::BlueprintNotFound(name) => {
                Self::UnknownBlueprint(format!("Unknown blueprint name: {name}"))
            }
            StoreError::CommitNotFound { .. } => Self::UnknownCommit(e.to_string()),
            StoreError::NoCommits(_) | StoreError::AlreadyTagged { .. } => {
                Self::Blueprints(e.to_string())
            }
            StoreError::InvalidVersion { .. } | StoreError::VersionExhausted { .. } => {
                Self::InvalidVersion(e.to_string())
            }
            StoreError::ComposeNotFound(id) => {
                Self::UnknownUuid(format!("{id} is not a valid build uuid"))
            }
            StoreError::SourceNotFound(_) => Self::UnknownSource(e.to_string()),
            StoreError::SystemSource(_) => Self::SystemSource(e.to_string()),
            StoreError::Io(_)
            | StoreError::Serialization(_)
            | StoreError::LockFailed(_)
            | StoreError::ArtifactNotFound(_) => Self::Internal(e.to_string()),
        }
    }
}

impl From<BackendError> for CoreError {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::Depsolve(d) => d.into(),
            BackendError::UnknownDistro(d) => Self::Distro(format!("Unknown distribution: {d}")),
            BackendError::UnknownArch { distro, arch } => {
                Self::Distro(format!("Unknown distribution: {distro} for arch {arch}"))
            }
            BackendError::UnknownImageType(_) => Self::Compose(e.to_string()),
            BackendError::Io(_) | BackendError::Serialization(_) | BackendError::Worker(_) => {
                Self::Internal(e.to_string())
            }
        }
    }
}

impl From<WorkerError> for CoreError {
    fn from(e: WorkerError) -> Self {
        Self::Compose(e.to_string())
    }
}

impl From<std::io::Error> for CoreError {
    fn from(e: std::io::Error) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Internal(e.to_string())
    }
}

/// One entry of an `errors` array in an API reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorEntry {
    pub id: String,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
}

impl ErrorEntry {
    pub fn new(id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            msg: msg.into(),
            code: None,
        }
    }

    /// An `HTTPError` entry, the only kind that carries a numeric code.
    pub fn http(code: u16, msg: impl Into<String>) -> Self {
        Self {
            id: "HTTPError".to_owned(),
            msg: msg.into(),
            code: Some(code),
        }
    }
}

impl From<&CoreError> for ErrorEntry {
    fn from(e: &CoreError) -> Self {
        Self::new(e.id(), e.to_string())
    }
}

impl From<CoreError> for ErrorEntry {
    fn from(e: CoreError) -> Self {
        Self::from(&e)
    }
}
