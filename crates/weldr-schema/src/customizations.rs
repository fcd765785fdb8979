use crate::BlueprintError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Mountpoints a filesystem customization may target. Sub-paths of these are
/// allowed too; `/` itself must match exactly.
pub const ALLOWED_MOUNTPOINTS: &[&str] = &[
    "/", "/var", "/opt", "/srv", "/usr", "/app", "/data", "/home", "/tmp", "/boot",
];

const SECTOR_SIZE: u64 = 512;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Customizations {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kernel: Option<KernelCustomization>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sshkey: Vec<SshKeyCustomization>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub user: Vec<UserCustomization>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub group: Vec<GroupCustomization>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<TimezoneCustomization>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<LocaleCustomization>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firewall: Option<FirewallCustomization>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub services: Option<ServicesCustomization>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filesystem: Vec<FilesystemCustomization>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelCustomization {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default)]
    pub append: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshKeyCustomization {
    pub user: String,
    pub key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCustomization {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gid: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupCustomization {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gid: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimezoneCustomization {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ntpservers: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocaleCustomization {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub languages: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyboard: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallCustomization {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub services: Option<ServicesCustomization>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicesCustomization {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enabled: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disabled: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilesystemCustomization {
    pub mountpoint: String,
    #[serde(alias = "size")]
    pub minsize: MinSize,
}

/// Filesystem size as either a byte count or a string such as `"20 GiB"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MinSize {
    Bytes(u64),
    Text(String),
}

impl MinSize {
    pub fn bytes(&self) -> Result<u64, BlueprintError> {
        match self {
            MinSize::Bytes(n) => Ok(*n),
            MinSize::Text(s) => parse_size(s),
        }
    }
}

fn parse_size(s: &str) -> Result<u64, BlueprintError> {
    let invalid = || BlueprintError::InvalidSize(s.to_owned());
    let trimmed = s.trim();
    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (digits, unit) = trimmed.split_at(split);
    let value: u64 = digits.parse().map_err(|_| invalid())?;
    let multiplier: u64 = match unit.trim() {
        "" | "B" => 1,
        "kB" => 1_000,
        "KiB" => 1 << 10,
        "MB" => 1_000_000,
        "MiB" => 1 << 20,
        "GB" => 1_000_000_000,
        "GiB" => 1 << 30,
        "TB" => 1_000_000_000_000,
        "TiB" => 1 << 40,
        _ => return Err(invalid()),
    };
    value.checked_mul(multiplier).ok_or_else(invalid)
}

/// True when `mountpoint` is one of [`ALLOWED_MOUNTPOINTS`] or lives below one
/// of them (other than `/`).
pub fn mountpoint_allowed(mountpoint: &str) -> bool {
    ALLOWED_MOUNTPOINTS.iter().any(|allowed| {
        mountpoint == *allowed
            || (*allowed != "/"
                && mountpoint
                    .strip_prefix(allowed)
                    .is_some_and(|rest| rest.starts_with('/')))
    })
}

impl Customizations {
    pub fn validate(&self) -> Result<(), BlueprintError> {
        for fs in &self.filesystem {
            fs.minsize.bytes()?;
        }
        Ok(())
    }

    /// Mountpoints that are not permitted in an image, in blueprint order.
    pub fn disallowed_mountpoints(&self) -> Vec<String> {
        self.filesystem
            .iter()
            .filter(|fs| !mountpoint_allowed(&fs.mountpoint))
            .map(|fs| fs.mountpoint.clone())
            .collect()
    }

    /// Sum of all filesystem minimum sizes, rounded up to a whole sector.
    pub fn filesystem_min_size(&self) -> Result<u64, BlueprintError> {
        let mut total: u64 = 0;
        for fs in &self.filesystem {
            total = total.saturating_add(fs.minsize.bytes()?);
        }
        Ok(total.div_ceil(SECTOR_SIZE) * SECTOR_SIZE)
    }
}
