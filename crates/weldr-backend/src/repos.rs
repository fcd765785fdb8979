//! Distributions, architectures, image types, and system repositories.

use crate::depsolve::RepoConfig;
use crate::BackendError;
use serde::{Deserialize, Serialize};

const GIB: u64 = 1 << 30;

/// An image type a compose may produce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageTypeDef {
    pub name: String,
    pub filename: String,
    pub mime_type: String,
    #[serde(default)]
    pub default_size: u64,
    #[serde(default)]
    pub bootable: bool,
    #[serde(default)]
    pub build_packages: Vec<String>,
    #[serde(default)]
    pub payload_packages: Vec<String>,
}

impl ImageTypeDef {
    /// Requested size rounded up to the type's default and the filesystem
    /// minimum. Types without a default size ignore the request.
    pub fn size(&self, requested: u64, filesystem_min: u64) -> u64 {
        if self.default_size == 0 {
            return 0;
        }
        requested.max(self.default_size).max(filesystem_min)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchConfig {
    pub name: String,
    #[serde(default)]
    pub image_types: Vec<ImageTypeDef>,
    #[serde(default)]
    pub repos: Vec<RepoConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistroConfig {
    pub name: String,
    #[serde(default)]
    pub arches: Vec<ArchConfig>,
}

/// Registry contents as read from the `[registry]` table of the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub host_distro: String,
    #[serde(default = "host_arch")]
    pub host_arch: String,
    pub distros: Vec<DistroConfig>,
}

fn host_arch() -> String {
    match std::env::consts::ARCH {
        "powerpc64" => "ppc64le".to_owned(),
        other => other.to_owned(),
    }
}

pub trait RepoRegistry: Send + Sync {
    fn host_distro(&self) -> &str;

    fn host_arch(&self) -> &str;

    /// Known distribution names, sorted.
    fn distros(&self) -> Vec<String>;

    fn image_types(&self, distro: &str, arch: &str) -> Result<Vec<ImageTypeDef>, BackendError>;

    fn image_type(
        &self,
        distro: &str,
        arch: &str,
        name: &str,
    ) -> Result<ImageTypeDef, BackendError> {
        self.image_types(distro, arch)?
            .into_iter()
            .find(|t| t.name == name)
            .ok_or_else(|| BackendError::UnknownImageType(name.to_owned()))
    }

    fn repos_for_arch(&self, distro: &str, arch: &str) -> Result<Vec<RepoConfig>, BackendError>;

    fn repos_for_image_type(
        &self,
        distro: &str,
        arch: &str,
        image_type: &str,
    ) -> Result<Vec<RepoConfig>, BackendError> {
        Ok(self
            .repos_for_arch(distro, arch)?
            .into_iter()
            .filter(|r| r.package_sets.is_empty() || r.package_sets.iter().any(|s| s == image_type))
            .collect())
    }

    /// Ids of the host's repositories. These cannot be changed through the API.
    fn system_source_ids(&self) -> Vec<String>;
}

#[derive(Debug, Clone)]
pub struct StaticRepoRegistry {
    config: RegistryConfig,
}

impl StaticRepoRegistry {
    pub fn from_config(mut config: RegistryConfig) -> Result<Self, BackendError> {
        config.distros.sort_by(|a, b| a.name.cmp(&b.name));
        if !config.distros.iter().any(|d| d.name == config.host_distro) {
            return Err(BackendError::UnknownDistro(config.host_distro));
        }
        Ok(Self { config })
    }

    fn arch(&self, distro: &str, arch: &str) -> Result<&ArchConfig, BackendError> {
        let d = self
            .config
            .distros
            .iter()
            .find(|d| d.name == distro)
            .ok_or_else(|| BackendError::UnknownDistro(distro.to_owned()))?;
        d.arches
            .iter()
            .find(|a| a.name == arch)
            .ok_or_else(|| BackendError::UnknownArch {
                distro: distro.to_owned(),
                arch: arch.to_owned(),
            })
    }

    /// A Fedora 40 registry for the host architecture with the common
    /// image types and the `fedora` and `updates` repositories.
    pub fn fedora_default() -> Self {
        let arch = host_arch();
        let mut arches = vec!["x86_64".to_owned(), "aarch64".to_owned()];
        if !arches.contains(&arch) {
            arches.push(arch.clone());
        }
        let config = RegistryConfig {
            host_distro: "fedora-40".to_owned(),
            host_arch: arch,
            distros: vec![DistroConfig {
                name: "fedora-40".to_owned(),
                arches: arches
                    .into_iter()
                    .map(|name| ArchConfig {
                        repos: default_repos(&name),
                        image_types: default_image_types(),
                        name,
                    })
                    .collect(),
            }],
        };
        Self { config }
    }
}

fn default_repos(arch: &str) -> Vec<RepoConfig> {
    ["fedora", "updates"]
        .into_iter()
        .map(|id| RepoConfig {
            id: id.to_owned(),
            name: id.to_owned(),
            metalink: Some(format!(
                "https://mirrors.fedoraproject.org/metalink?repo={}-40&arch={arch}",
                if id == "fedora" { "fedora" } else { "updates-released-f" }
            )),
            check_gpg: true,
            ..RepoConfig::default()
        })
        .collect()
}

fn image_type(name: &str, filename: &str, mime: &str, size: u64, bootable: bool) -> ImageTypeDef {
    ImageTypeDef {
        name: name.to_owned(),
        filename: filename.to_owned(),
        mime_type: mime.to_owned(),
        default_size: size,
        bootable,
        build_packages: vec!["dnf".to_owned(), "rpm".to_owned()],
        payload_packages: vec!["@core".to_owned()],
    }
}

fn default_image_types() -> Vec<ImageTypeDef> {
    vec![
        image_type("ami", "image.raw", "application/octet-stream", 6 * GIB, true),
        image_type("container", "container.tar", "application/x-tar", 0, false),
        image_type("image-installer", "installer.iso", "application/x-iso9660-image", 0, true),
        image_type("oci", "disk.qcow2", "application/x-qemu-disk", 6 * GIB, true),
        image_type("qcow2", "disk.qcow2", "application/x-qemu-disk", 5 * GIB, true),
        image_type("tar", "root.tar.xz", "application/x-tar", 0, false),
        image_type("vhd", "disk.vhd", "application/x-vhd", 2 * GIB, true),
        image_type("vmdk", "disk.vmdk", "application/x-vmdk", 2 * GIB, true),
    ]
}

impl RepoRegistry for StaticRepoRegistry {
    fn host_distro(&self) -> &str {
        &self.config.host_distro
    }

    fn host_arch(&self) -> &str {
        &self.config.host_arch
    }

    fn distros(&self) -> Vec<String> {
        self.config.distros.iter().map(|d| d.name.clone()).collect()
    }

    fn image_types(&self, distro: &str, arch: &str) -> Result<Vec<ImageTypeDef>, BackendError> {
        let mut types = self.arch(distro, arch)?.image_types.clone();
        types.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(types)
    }

    fn repos_for_arch(&self, distro: &str, arch: &str) -> Result<Vec<RepoConfig>, BackendError> {
        Ok(self.arch(distro, arch)?.repos.clone())
    }

    fn system_source_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .arch(&self.config.host_distro, &self.config.host_arch)
            .map(|a| a.repos.iter().map(|r| r.id.clone()).collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::fixture_registry;

    #[test]
    fn default_registry_knows_host() {
        let reg = StaticRepoRegistry::fedora_default();
        assert_eq!(reg.host_distro(), "fedora-40");
        let types = reg.image_types("fedora-40", reg.host_arch()).unwrap();
        assert!(types.iter().any(|t| t.name == "qcow2"));
        assert_eq!(reg.system_source_ids(), vec!["fedora", "updates"]);
    }

    #[test]
    fn unknown_lookups_fail() {
        let reg = fixture_registry();
        assert!(matches!(
            reg.image_types("nope-1", "x86_64"),
            Err(BackendError::UnknownDistro(_))
        ));
        assert!(matches!(
            reg.image_types("fedora-40", "s390x"),
            Err(BackendError::UnknownArch { .. })
        ));
        assert!(matches!(
            reg.image_type("fedora-40", "x86_64", "floppy"),
            Err(BackendError::UnknownImageType(_))
        ));
    }

    #[test]
    fn image_size_rules() {
        let reg = fixture_registry();
        let qcow2 = reg.image_type("fedora-40", "x86_64", "qcow2").unwrap();
        assert_eq!(qcow2.size(0, 0), qcow2.default_size);
        assert_eq!(qcow2.size(10 * GIB, 0), 10 * GIB);
        assert_eq!(qcow2.size(0, 8 * GIB), 8 * GIB);
        let tar = reg.image_type("fedora-40", "x86_64", "tar").unwrap();
        assert_eq!(tar.size(10 * GIB, 0), 0);
    }

    #[test]
    fn config_must_name_a_known_host_distro() {
        let cfg = RegistryConfig {
            host_distro: "rhel-9".to_owned(),
            host_arch: "x86_64".to_owned(),
            distros: Vec::new(),
        };
        assert!(StaticRepoRegistry::from_config(cfg).is_err());
    }

    #[test]
    fn registry_config_parses_from_json() {
        let cfg: RegistryConfig = serde_json::from_value(serde_json::json!({
            "host_distro": "fedora-40",
            "host_arch": "x86_64",
            "distros": [{"name": "fedora-40", "arches": [{"name": "x86_64"}]}]
        }))
        .unwrap();
        let reg = StaticRepoRegistry::from_config(cfg).unwrap();
        assert!(reg.image_types("fedora-40", "x86_64").unwrap().is_empty());
    }
}
