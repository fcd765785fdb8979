use serde::Serialize;
use std::collections::BTreeMap;
use weldr_schema::{Blueprint, Package};

/// A package or module entry, serialized as `{"Package": …}` or `{"Module": …}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum DiffItem {
    Package(Package),
    Module(Package),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlueprintDiff {
    pub old: Option<DiffItem>,
    pub new: Option<DiffItem>,
}

/// Package differences followed by module differences between the committed
/// copy and the workspace draft.
pub fn diff_blueprints(old: &Blueprint, new: &Blueprint) -> Vec<BlueprintDiff> {
    let mut diffs = diff_list(&old.packages, &new.packages, DiffItem::Package);
    diffs.extend(diff_list(&old.modules, &new.modules, DiffItem::Module));
    diffs
}

fn diff_list(
    old: &[Package],
    new: &[Package],
    wrap: fn(Package) -> DiffItem,
) -> Vec<BlueprintDiff> {
    let mut remaining: BTreeMap<&str, &Package> =
        old.iter().map(|p| (p.name.as_str(), p)).collect();
    let mut diffs = Vec::new();
    for pkg in new {
        match remaining.remove(pkg.name.as_str()) {
            Some(prev) if prev.version != pkg.version => diffs.push(BlueprintDiff {
                old: Some(wrap(prev.clone())),
                new: Some(wrap(pkg.clone())),
            }),
            Some(_) => {}
            None => diffs.push(BlueprintDiff {
                old: None,
                new: Some(wrap(pkg.clone())),
            }),
        }
    }
    diffs.extend(remaining.into_values().map(|prev| BlueprintDiff {
        old: Some(wrap(prev.clone())),
        new: None,
    }));
    diffs
}
