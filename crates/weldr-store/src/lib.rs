//! In-memory entity stores and durable state for Weldr.
//!
//! This crate owns the mutable state of the control plane: the
//! [`BlueprintStore`] with its committed/workspace split and change log, the
//! [`ComposeRegistry`] of compose records and their upload [`Target`]s, the
//! [`SourceStore`] of user repositories, the on-disk [`StateDocument`] and its
//! background [`StateWriter`], the [`ArtifactStore`] for compose outputs, and
//! the [`StateLayout`]/[`StateLock`] pair guarding the state directory.

pub mod artifacts;
pub mod blueprints;
pub mod composes;
pub mod layout;
pub mod lock;
pub mod persist;
pub mod sources;
pub mod state;
pub mod target;

pub use artifacts::ArtifactStore;
pub use blueprints::{BlueprintSnapshot, BlueprintStore, EffectiveBlueprint};
pub use composes::{Compose, ComposeFailure, ComposeRegistry, ComposeState};
pub use layout::StateLayout;
pub use lock::StateLock;
pub use persist::{Mailbox, StateWriter, MAILBOX_CAPACITY};
pub use sources::SourceStore;
pub use state::{write_atomic, StateDocument};
pub use target::{Target, TargetOptions};

use std::path::Path;
use thiserror::Error;
use uuid::Uuid;
use weldr_schema::BlueprintError;

/// Fsync a directory so that a preceding `rename()` is durable.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    Blueprint(#[from] BlueprintError),
    #[error("lock acquisition failed: {0}")]
    LockFailed(String),
    #[error("Unknown blueprint")]
    BlueprintNotFound(String),
    #[error("Unknown commit")]
    CommitNotFound { name: String, commit: String },
    #[error("No commits for blueprint")]
    NoCommits(String),
    #[error("commit {commit} is already tagged as revision {revision}")]
    AlreadyTagged { commit: String, revision: u32 },
    #[error("New version ({new}) must be greater than the current version ({current}) of {name}")]
    InvalidVersion {
        name: String,
        new: String,
        current: String,
    },
    #[error("Version {current} of {name} cannot be bumped any further")]
    VersionExhausted { name: String, current: String },
    #[error("compose {0} does not exist")]
    ComposeNotFound(Uuid),
    #[error("{0} is not a valid source")]
    SourceNotFound(String),
    #[error("{0} is a system source")]
    SystemSource(String),
    #[error("artifact not found: {0}")]
    ArtifactNotFound(String),
}
