use crate::CoreError;
use std::collections::BTreeMap;
use weldr_schema::glob::has_glob_chars;
use weldr_schema::{Blueprint, Glob, Package, PackageSpec};

/// Replace each package and module entry with the exact builds picked by the
/// depsolver. Name globs expand to every matching dependency.
pub fn freeze_blueprint(bp: &Blueprint, deps: &[PackageSpec]) -> Result<Blueprint, CoreError> {
    let mut frozen = bp.clone();
    frozen.packages = expand(deps, &bp.packages)?;
    frozen.modules = expand(deps, &bp.modules)?;
    Ok(frozen)
}

fn expand(deps: &[PackageSpec], packages: &[Package]) -> Result<Vec<Package>, CoreError> {
    let mut out: BTreeMap<String, Package> = BTreeMap::new();
    let mut add = |d: &PackageSpec| {
        out.insert(d.nevra(), Package::new(d.name.clone(), d.evra()));
    };
    for pkg in packages {
        if has_glob_chars(&pkg.name) {
            let glob = Glob::new(&pkg.name)?;
            deps.iter().filter(|d| glob.matches(&d.name)).for_each(&mut add);
        } else {
            let dep = deps
                .iter()
                .find(|d| d.name == pkg.name)
                .ok_or_else(|| {
                    CoreError::Blueprints(format!("{} missing from depsolve results", pkg.name))
                })?;
            add(dep);
        }
    }
    let mut frozen: Vec<Package> = out.into_values().collect();
    frozen.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(frozen)
}
