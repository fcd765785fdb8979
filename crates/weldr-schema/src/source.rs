//! Package repository sources and their two API representations.
//!
//! Version 0 of the API keys sources by `name`; version 1 adds a separate
//! `id` and the `distros`, `rhsm`, and `check_repogpg` fields.

use crate::codec::{decode, BodyFormat};
use crate::BlueprintError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceType {
    BaseUrl,
    Metalink,
    MirrorList,
}

impl SourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BaseUrl => "yum-baseurl",
            Self::Metalink => "yum-metalink",
            Self::MirrorList => "yum-mirrorlist",
        }
    }
}

impl FromStr for SourceType {
    type Err = BlueprintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "yum-baseurl" => Ok(Self::BaseUrl),
            "yum-metalink" => Ok(Self::Metalink),
            "yum-mirrorlist" => Ok(Self::MirrorList),
            other => Err(BlueprintError::UnknownSourceType(other.to_owned())),
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user-defined repository as persisted by the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub source_type: String,
    pub url: String,
    #[serde(default)]
    pub check_gpg: bool,
    #[serde(default)]
    pub check_ssl: bool,
    #[serde(default)]
    pub system: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gpgkeys: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub distros: Vec<String>,
    #[serde(default)]
    pub rhsm: bool,
    #[serde(default)]
    pub check_repogpg: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_hotfixes: Option<bool>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl SourceConfig {
    /// Require the fields every source needs: name, type, and url.
    pub fn validate(&self) -> Result<(), BlueprintError> {
        if self.name.is_empty() {
            return Err(BlueprintError::MissingField("name"));
        }
        if self.source_type.is_empty() {
            return Err(BlueprintError::MissingField("type"));
        }
        if self.url.is_empty() {
            return Err(BlueprintError::MissingField("url"));
        }
        Ok(())
    }

    pub fn kind(&self) -> Result<SourceType, BlueprintError> {
        self.source_type.parse()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfigV0 {
    pub name: String,
    #[serde(rename = "type")]
    pub source_type: String,
    pub url: String,
    pub check_gpg: bool,
    pub check_ssl: bool,
    pub system: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub gpgkeys: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module_hotfixes: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfigV1 {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub source_type: String,
    pub url: String,
    pub check_gpg: bool,
    pub check_ssl: bool,
    pub system: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub gpgkeys: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub distros: Vec<String>,
    pub rhsm: bool,
    pub check_repogpg: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module_hotfixes: Option<bool>,
}

impl From<SourceConfigV0> for SourceConfig {
    fn from(v0: SourceConfigV0) -> Self {
        Self {
            name: v0.name,
            source_type: v0.source_type,
            url: v0.url,
            check_gpg: v0.check_gpg,
            check_ssl: v0.check_ssl,
            system: false,
            proxy: v0.proxy,
            gpgkeys: v0.gpgkeys,
            module_hotfixes: v0.module_hotfixes,
            ..Self::default()
        }
    }
}

impl From<SourceConfigV1> for SourceConfig {
    fn from(v1: SourceConfigV1) -> Self {
        Self {
            name: v1.name,
            source_type: v1.source_type,
            url: v1.url,
            check_gpg: v1.check_gpg,
            check_ssl: v1.check_ssl,
            system: false,
            proxy: v1.proxy,
            gpgkeys: v1.gpgkeys,
            distros: v1.distros,
            rhsm: v1.rhsm,
            check_repogpg: v1.check_repogpg,
            module_hotfixes: v1.module_hotfixes,
            extra: BTreeMap::new(),
        }
    }
}

impl SourceConfigV0 {
    pub fn from_config(s: &SourceConfig) -> Self {
        Self {
            name: s.name.clone(),
            source_type: s.source_type.clone(),
            url: s.url.clone(),
            check_gpg: s.check_gpg,
            check_ssl: s.check_ssl,
            system: s.system,
            proxy: s.proxy.clone(),
            gpgkeys: s.gpgkeys.clone(),
            module_hotfixes: s.module_hotfixes,
        }
    }

    /// Decode a v0 request body. TOML bodies may wrap the source in an
    /// `[id]` table; when several are present the first in sorted order wins.
    pub fn decode(format: BodyFormat, body: &str) -> Result<Self, BlueprintError> {
        decode_keyed(format, body).map(|(_, source)| source)
    }
}

impl SourceConfigV1 {
    pub fn from_config(id: &str, s: &SourceConfig) -> Self {
        Self {
            id: id.to_owned(),
            name: s.name.clone(),
            source_type: s.source_type.clone(),
            url: s.url.clone(),
            check_gpg: s.check_gpg,
            check_ssl: s.check_ssl,
            system: s.system,
            proxy: s.proxy.clone(),
            gpgkeys: s.gpgkeys.clone(),
            distros: s.distros.clone(),
            rhsm: s.rhsm,
            check_repogpg: s.check_repogpg,
            module_hotfixes: s.module_hotfixes,
        }
    }

    /// Decode a v1 request body. A missing `id` is taken from the TOML table
    /// key when there is one; otherwise it is an error.
    pub fn decode(format: BodyFormat, body: &str) -> Result<Self, BlueprintError> {
        let (key, mut source): (Option<String>, Self) = decode_keyed(format, body)?;
        if source.id.is_empty() {
            if let Some(key) = key {
                source.id = key;
            }
        }
        if source.id.is_empty() {
            return Err(BlueprintError::MissingField("id"));
        }
        Ok(source)
    }
}

fn decode_keyed<T>(format: BodyFormat, body: &str) -> Result<(Option<String>, T), BlueprintError>
where
    T: serde::de::DeserializeOwned,
{
    if format == BodyFormat::Toml {
        if let Ok(table) = toml::from_str::<BTreeMap<String, T>>(body) {
            if let Some((key, source)) = table.into_iter().next() {
                return Ok((Some(key), source));
            }
        }
    }
    Ok((None, decode(format, body)?))
}
