//! RPM package records as returned by repository metadata and the depsolver.

use serde::{Deserialize, Serialize};

/// One concrete package build resolved by the depsolver.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PackageSpec {
    pub name: String,
    #[serde(default)]
    pub epoch: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub release: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub arch: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub remote_location: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub checksum: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub check_gpg: bool,
}

impl PackageSpec {
    /// `epoch:version-release.arch`, with the epoch omitted when it is zero.
    pub fn evra(&self) -> String {
        if self.epoch == 0 {
            format!("{}-{}.{}", self.version, self.release, self.arch)
        } else {
            format!("{}:{}-{}.{}", self.epoch, self.version, self.release, self.arch)
        }
    }

    pub fn nevra(&self) -> String {
        format!("{}-{}", self.name, self.evra())
    }
}

/// A single package entry from repository metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRecord {
    pub name: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub epoch: u32,
    pub version: String,
    pub release: String,
    pub arch: String,
    #[serde(default)]
    pub build_time: String,
    #[serde(default)]
    pub license: String,
}

impl PackageRecord {
    pub fn to_build(&self) -> PackageBuild {
        PackageBuild {
            arch: self.arch.clone(),
            build_time: self.build_time.clone(),
            epoch: self.epoch,
            release: self.release.clone(),
            source: PackageSource {
                license: self.license.clone(),
                version: self.version.clone(),
                source_ref: "SOURCE_REF".to_owned(),
                metadata: EmptyObject {},
            },
            changelog: "CHANGELOG_NEEDED".to_owned(),
            build_config_ref: "BUILD_CONFIG_REF".to_owned(),
            build_env_ref: "BUILD_ENV_REF".to_owned(),
            metadata: EmptyObject {},
        }
    }

    pub fn to_spec(&self) -> PackageSpec {
        PackageSpec {
            name: self.name.clone(),
            epoch: self.epoch,
            version: self.version.clone(),
            release: self.release.clone(),
            arch: self.arch.clone(),
            ..PackageSpec::default()
        }
    }
}

/// Serializes as `{}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmptyObject {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageSource {
    pub license: String,
    pub version: String,
    pub source_ref: String,
    pub metadata: EmptyObject,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageBuild {
    pub arch: String,
    pub build_time: String,
    pub epoch: u32,
    pub release: String,
    pub source: PackageSource,
    pub changelog: String,
    pub build_config_ref: String,
    pub build_env_ref: String,
    pub metadata: EmptyObject,
}

/// Package description grouped by name across all of its builds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageInfo {
    pub name: String,
    pub summary: String,
    pub description: String,
    pub homepage: String,
    pub upstream_vcs: String,
    pub builds: Vec<PackageBuild>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<Vec<PackageSpec>>,
}

/// Group records by name, preserving first-seen order and collecting each
/// build of the same package.
pub fn to_package_infos(records: &[PackageRecord]) -> Vec<PackageInfo> {
    let mut infos: Vec<PackageInfo> = Vec::new();
    let mut index = std::collections::HashMap::new();
    for rec in records {
        if let Some(&i) = index.get(rec.name.as_str()) {
            let info: &mut PackageInfo = &mut infos[i];
            info.builds.push(rec.to_build());
        } else {
            index.insert(rec.name.as_str(), infos.len());
            infos.push(PackageInfo {
                name: rec.name.clone(),
                summary: rec.summary.clone(),
                description: rec.description.clone(),
                homepage: rec.url.clone(),
                upstream_vcs: "UPSTREAM_VCS".to_owned(),
                builds: vec![rec.to_build()],
                dependencies: None,
            });
        }
    }
    infos
}
