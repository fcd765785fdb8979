use crate::customizations::Customizations;
use crate::validate::validate_name;
use crate::version::Version;
use crate::BlueprintError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Declarative description of a system image.
///
/// Fields unknown to this version are kept in `extra` so that state written by
/// a newer server survives a round trip through an older one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Blueprint {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub packages: Vec<Package>,
    #[serde(default)]
    pub modules: Vec<Package>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enabled_modules: Vec<EnabledModule>,
    #[serde(default)]
    pub groups: Vec<Group>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub containers: Vec<Container>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customizations: Option<Customizations>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub distro: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub arch: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub minimal: bool,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// An RPM package reference. `version` may be a glob such as `*` or `1.2.*`.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Package {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
}

impl Package {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    /// `name-version`, or just `name` when the version is empty or `*`.
    pub fn to_name_version(&self) -> String {
        if self.version.is_empty() || self.version == "*" {
            self.name.clone()
        } else {
            format!("{}-{}", self.name, self.version)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnabledModule {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stream: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    pub source: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(
        rename = "tls-verify",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub tls_verify: Option<bool>,
    #[serde(
        rename = "local-storage",
        default,
        skip_serializing_if = "std::ops::Not::not"
    )]
    pub local_storage: bool,
}

impl Blueprint {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Check the name, version and package entries of a submitted blueprint.
    pub fn validate(&self) -> Result<(), BlueprintError> {
        validate_name("blueprint name", &self.name)?;
        if !self.version.is_empty() {
            self.version.parse::<Version>()?;
        }
        for (kind, list) in [("package", &self.packages), ("module", &self.modules)] {
            for (i, pkg) in list.iter().enumerate() {
                if pkg.name.is_empty() {
                    let detail = if pkg.version.is_empty() {
                        format!("Entry #{} has no name.", i + 1)
                    } else {
                        format!("Entry #{} has version '{}' but no name.", i + 1, pkg.version)
                    };
                    return Err(BlueprintError::MissingPackageName(format!("{kind} {detail}")));
                }
            }
        }
        for group in &self.groups {
            if group.name.is_empty() {
                return Err(BlueprintError::MissingPackageName(
                    "group entry has no name.".to_owned(),
                ));
            }
        }
        if let Some(c) = &self.customizations {
            c.validate()?;
        }
        Ok(())
    }

    /// The parsed version, if the field is set and well formed.
    pub fn parsed_version(&self) -> Option<Version> {
        self.version.parse().ok()
    }

    /// The shape returned to API clients: version defaults to `0.0.0`.
    #[must_use]
    pub fn with_read_defaults(mut self) -> Self {
        if self.version.is_empty() {
            "0.0.0".clone_into(&mut self.version);
        }
        self
    }

    /// True when both blueprints are identical apart from their version.
    pub fn same_content(&self, other: &Blueprint) -> bool {
        let strip = |bp: &Blueprint| Blueprint {
            version: String::new(),
            ..bp.clone()
        };
        strip(self) == strip(other)
    }

    /// Package specifiers handed to the depsolver: packages, modules,
    /// `@group` entries, and the kernel when `bootable`.
    pub fn package_specs(&self, bootable: bool) -> Vec<String> {
        let mut specs: Vec<String> = self
            .packages
            .iter()
            .chain(&self.modules)
            .map(Package::to_name_version)
            .collect();
        specs.extend(self.groups.iter().map(|g| format!("@{}", g.name)));
        if bootable {
            let kernel = self
                .customizations
                .as_ref()
                .and_then(|c| c.kernel.as_ref())
                .map_or("kernel", |k| k.name.as_str());
            let kernel = if kernel.is_empty() { "kernel" } else { kernel };
            specs.push(kernel.to_owned());
        }
        specs
    }

    pub fn enabled_module_specs(&self) -> Vec<String> {
        self.enabled_modules
            .iter()
            .map(|m| format!("{}:{}", m.name, m.stream))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn demo() -> Blueprint {
        Blueprint {
            name: "demo".to_owned(),
            version: "0.0.1".to_owned(),
            packages: vec![Package::new("bash", "*")],
            ..Blueprint::default()
        }
    }

    #[test]
    fn validate_accepts_minimal_blueprint() {
        assert!(demo().validate().is_ok());
    }

    #[test]
    fn validate_rejects_bad_version() {
        let mut bp = demo();
        bp.version = "1.0".to_owned();
        assert!(matches!(
            bp.validate(),
            Err(BlueprintError::InvalidVersion(_))
        ));
    }

    #[test]
    fn validate_rejects_nameless_package() {
        let mut bp = demo();
        bp.packages.push(Package::new("", "1.0"));
        let err = bp.validate().unwrap_err().to_string();
        assert!(err.contains("Entry #2 has version '1.0' but no name."), "{err}");
    }

    #[test]
    fn validate_rejects_invalid_name() {
        let mut bp = demo();
        bp.name = "I ｗ𝒊ll".to_owned();
        assert!(matches!(
            bp.validate(),
            Err(BlueprintError::InvalidChars { .. })
        ));
    }

    #[test]
    fn same_content_ignores_version() {
        let a = demo();
        let mut b = demo();
        b.version = "9.9.9".to_owned();
        assert!(a.same_content(&b));
        b.packages[0].version = "0.5.*".to_owned();
        assert!(!a.same_content(&b));
    }

    #[test]
    fn read_defaults_fill_version() {
        let bp = Blueprint::new("x").with_read_defaults();
        assert_eq!(bp.version, "0.0.0");
        assert!(bp.packages.is_empty());
    }

    #[test]
    fn package_specs_include_groups_and_kernel() {
        let mut bp = demo();
        bp.packages.push(Package::new("tmux", "3.1"));
        bp.groups.push(Group {
            name: "core".to_owned(),
        });
        let specs = bp.package_specs(true);
        assert_eq!(specs, vec!["bash", "tmux-3.1", "@core", "kernel"]);
        assert_eq!(bp.package_specs(false).len(), 3);
    }

    #[test]
    fn unknown_fields_are_preserved() {
        let json = r#"{"name":"x","version":"1.0.0","future_field":{"a":1}}"#;
        let bp: Blueprint = serde_json::from_str(json).unwrap();
        assert_eq!(bp.extra["future_field"]["a"], 1);
        let out = serde_json::to_value(&bp).unwrap();
        assert_eq!(out["future_field"]["a"], 1);
    }
}
