//! Build manifests handed to the image worker.
//!
//! The manifest is an osbuild-style JSON document: a `build` pipeline and an
//! `os` pipeline listing the resolved packages, an image pipeline for the
//! export, and a `sources` section mapping each package to its download URL.

use crate::CoreError;
use serde_json::{json, Map, Value};
use weldr_backend::{ImageTypeDef, PackageSet};
use weldr_schema::{Blueprint, PackageSpec};

/// Reject filesystem customizations that place partitions where images
/// cannot have them.
pub fn check_mountpoints(bp: &Blueprint) -> Result<(), CoreError> {
    let Some(c) = &bp.customizations else {
        return Ok(());
    };
    let bad = c.disallowed_mountpoints();
    if bad.is_empty() {
        return Ok(());
    }
    let quoted: Vec<String> = bad.iter().map(|m| format!("{m:?}")).collect();
    Err(CoreError::ManifestCreationFailed(format!(
        "failed to initialize osbuild manifest: \
         The following custom mountpoints are not supported [{}]",
        quoted.join(" ")
    )))
}

/// Final image size: the request, raised to the image type default and the
/// sum of filesystem minimum sizes.
pub fn image_size(
    bp: &Blueprint,
    image_type: &ImageTypeDef,
    requested: u64,
) -> Result<u64, CoreError> {
    let fs_min = match &bp.customizations {
        Some(c) => c.filesystem_min_size()?,
        None => 0,
    };
    Ok(image_type.size(requested, fs_min))
}

/// The chained package sets for an image: build tooling first, then the
/// image payload plus everything the blueprint asks for.
pub fn package_sets(bp: &Blueprint, image_type: &ImageTypeDef) -> Vec<PackageSet> {
    let mut payload = image_type.payload_packages.clone();
    payload.extend(bp.package_specs(image_type.bootable));
    let mut sets = Vec::with_capacity(2);
    if !image_type.build_packages.is_empty() {
        sets.push(PackageSet::new(image_type.build_packages.clone()));
    }
    sets.push(PackageSet {
        include: payload,
        exclude: Vec::new(),
        enabled_modules: bp.enabled_module_specs(),
    });
    sets
}

fn stages(bp: &Blueprint) -> Vec<Value> {
    let mut stages = Vec::new();
    let Some(c) = &bp.customizations else {
        return stages;
    };
    if let Some(hostname) = &c.hostname {
        stages.push(json!({"type": "org.osbuild.hostname", "options": {"hostname": hostname}}));
    }
    if let Some(tz) = c.timezone.as_ref().and_then(|t| t.timezone.as_ref()) {
        stages.push(json!({"type": "org.osbuild.timezone", "options": {"zone": tz}}));
    }
    if let Some(lang) = c.locale.as_ref().and_then(|l| l.languages.first()) {
        stages.push(json!({"type": "org.osbuild.locale", "options": {"language": lang}}));
    }
    if !c.user.is_empty() {
        let users: Map<String, Value> = c
            .user
            .iter()
            .map(|u| (u.name.clone(), serde_json::to_value(u).unwrap_or(Value::Null)))
            .collect();
        stages.push(json!({"type": "org.osbuild.users", "options": {"users": users}}));
    }
    if let Some(services) = &c.services {
        stages.push(json!({
            "type": "org.osbuild.systemd",
            "options": {
                "enabled_services": services.enabled,
                "disabled_services": services.disabled
            }
        }));
    }
    if let Some(kernel) = c.kernel.as_ref().filter(|k| !k.append.is_empty()) {
        stages.push(json!({
            "type": "org.osbuild.kernel-cmdline",
            "options": {"kernel_opts": kernel.append}
        }));
    }
    stages
}

/// Assemble the manifest for `bp` from the resolved package list.
pub fn build_manifest(
    bp: &Blueprint,
    image_type: &ImageTypeDef,
    distro: &str,
    arch: &str,
    packages: &[PackageSpec],
    size: u64,
) -> Value {
    let nevras: Vec<String> = packages.iter().map(PackageSpec::nevra).collect();
    let mut os_stages = vec![json!({"type": "org.osbuild.rpm", "options": {"packages": nevras}})];
    os_stages.extend(stages(bp));

    let mut items = Map::new();
    for p in packages.iter().filter(|p| !p.remote_location.is_empty()) {
        items.insert(p.nevra(), json!({"url": p.remote_location}));
    }

    json!({
        "version": "2",
        "pipelines": [
            {"name": "build", "runner": format!("org.osbuild.{distro}"), "stages": [
                {"type": "org.osbuild.rpm", "options": {"packages": image_type.build_packages}}
            ]},
            {"name": "os", "build": "name:build", "stages": os_stages},
            {"name": image_type.name, "build": "name:build", "stages": [
                {"type": "org.osbuild.export", "options": {
                    "filename": image_type.filename,
                    "size": size,
                    "arch": arch,
                }}
            ]},
        ],
        "sources": {"org.osbuild.curl": {"items": items}},
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use weldr_backend::mock::fixture_registry;
    use weldr_backend::RepoRegistry;
    use weldr_schema::{Customizations, FilesystemCustomization, MinSize, Package};

    fn qcow2() -> ImageTypeDef {
        fixture_registry().image_type("fedora-40", "x86_64", "qcow2").unwrap()
    }

    fn with_fs(mounts: &[(&str, u64)]) -> Blueprint {
        let mut bp = Blueprint::new("fs");
        bp.customizations = Some(Customizations {
            filesystem: mounts
                .iter()
                .map(|(m, s)| FilesystemCustomization {
                    mountpoint: (*m).to_owned(),
                    minsize: MinSize::Bytes(*s),
                })
                .collect(),
            ..Customizations::default()
        });
        bp
    }

    #[test]
    fn disallowed_mountpoints_fail_manifest_creation() {
        let err = check_mountpoints(&with_fs(&[("/", 1), ("/etc", 1)])).unwrap_err();
        assert_eq!(err.id(), "ManifestCreationFailed");
        assert!(err.to_string().contains("\"/etc\""));
        assert!(check_mountpoints(&with_fs(&[("/var/log", 1)])).is_ok());
    }

    #[test]
    fn size_honours_filesystem_minimum() {
        let image = qcow2();
        let bp = with_fs(&[("/", 20 << 30), ("/var", 1000)]);
        let size = image_size(&bp, &image, 0).unwrap();
        assert_eq!(size, (20 << 30) + 1024);
        assert_eq!(image_size(&Blueprint::new("x"), &image, 0).unwrap(), image.default_size);
    }

    #[test]
    fn payload_set_carries_blueprint_packages_and_kernel() {
        let mut bp = Blueprint::new("web");
        bp.packages.push(Package::new("httpd", "2.4.*"));
        let sets = package_sets(&bp, &qcow2());
        assert_eq!(sets.len(), 2);
        let payload = &sets[1].include;
        assert!(payload.contains(&"httpd-2.4.*".to_owned()));
        assert!(payload.contains(&"kernel".to_owned()));
        assert!(payload.contains(&"@core".to_owned()));
    }

    #[test]
    fn manifest_lists_packages_and_sources() {
        let pkg = PackageSpec {
            name: "tmux".to_owned(),
            version: "3.4".to_owned(),
            release: "1.fc40".to_owned(),
            arch: "x86_64".to_owned(),
            remote_location: "https://repo/tmux.rpm".to_owned(),
            ..PackageSpec::default()
        };
        let m = build_manifest(&Blueprint::new("t"), &qcow2(), "fedora-40", "x86_64", &[pkg], 42);
        assert_eq!(m["version"], "2");
        assert_eq!(
            m["pipelines"][1]["stages"][0]["options"]["packages"][0],
            "tmux-3.4-1.fc40.x86_64"
        );
        assert_eq!(
            m["sources"]["org.osbuild.curl"]["items"]["tmux-3.4-1.fc40.x86_64"]["url"],
            "https://repo/tmux.rpm"
        );
        assert_eq!(m["pipelines"][2]["stages"][0]["options"]["size"], 42);
    }
}
