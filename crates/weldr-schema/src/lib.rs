//! Blueprint model, validation, version rules, and wire codecs for Weldr.
//!
//! This crate defines the schema layer shared by every other crate: the
//! [`Blueprint`] entity and its customizations, the name character rule
//! ([`validate_name`]), dotted-triple versions with patch bumping
//! ([`Version`]), JSON/TOML decoding and encoding ([`codec`]), change-log
//! entries and commit identity ([`Change`], [`compute_commit_id`]), repository
//! source configurations ([`SourceConfig`]), RPM package records
//! ([`PackageSpec`], [`PackageInfo`]), and shell-style glob matching used
//! by package filters and freezing.

pub mod blueprint;
pub mod change;
pub mod codec;
pub mod customizations;
pub mod glob;
pub mod identity;
pub mod rpm;
pub mod source;
pub mod types;
pub mod validate;
pub mod version;

pub use blueprint::{Blueprint, Container, EnabledModule, Group, Package};
pub use change::{Change, ChangeSummary};
pub use codec::{BodyFormat, OutputFormat};
pub use customizations::{Customizations, FilesystemCustomization, MinSize};
pub use glob::Glob;
pub use identity::compute_commit_id;
pub use rpm::{to_package_infos, PackageBuild, PackageInfo, PackageRecord, PackageSpec};
pub use source::{SourceConfig, SourceConfigV0, SourceConfigV1, SourceType};
pub use types::{CommitId, SourceId};
pub use validate::{is_valid_name, validate_name};
pub use version::{bump_version, Version};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BlueprintError {
    #[error("{0}")]
    ParseJson(#[from] serde_json::Error),
    #[error("{0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("failed to encode TOML: {0}")]
    EncodeToml(#[from] toml::ser::Error),
    #[error("blueprint must be in json or toml format")]
    UnsupportedFormat(String),
    #[error("empty blueprint name not allowed")]
    EmptyName,
    #[error("Invalid characters in {field}: '{value}'")]
    InvalidChars { field: &'static str, value: String },
    #[error("Invalid 'version', must use Semantic Versioning: {0}")]
    InvalidVersion(String),
    #[error("All package entries need to contain the name of the package. {0}")]
    MissingPackageName(String),
    #[error("invalid filesystem minsize '{0}'")]
    InvalidSize(String),
    #[error("invalid glob pattern '{pattern}': {reason}")]
    InvalidGlob { pattern: String, reason: String },
    #[error("'{0}' field is missing from request")]
    MissingField(&'static str),
    #[error("unknown source type '{0}', expected yum-baseurl, yum-metalink or yum-mirrorlist")]
    UnknownSourceType(String),
}
