//! Committed blueprints, workspace drafts, and per-blueprint change logs.

use crate::StoreError;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use weldr_schema::{bump_version, compute_commit_id, Blueprint, Change, Version};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

#[derive(Debug, Default)]
struct BlueprintState {
    committed: BTreeMap<String, Blueprint>,
    drafts: BTreeMap<String, Blueprint>,
    /// Oldest change first.
    changes: BTreeMap<String, Vec<Change>>,
}

/// Serialized copy of the store used for persistence.
#[derive(Debug, Clone, Default)]
pub struct BlueprintSnapshot {
    pub blueprints: BTreeMap<String, Blueprint>,
    pub workspace: BTreeMap<String, Blueprint>,
    pub changes: BTreeMap<String, Vec<Change>>,
}

/// A blueprint as seen by readers: the draft when one exists, otherwise the
/// committed copy.
#[derive(Debug, Clone)]
pub struct EffectiveBlueprint {
    pub blueprint: Blueprint,
    pub changed: bool,
}

#[derive(Debug, Default)]
pub struct BlueprintStore {
    inner: RwLock<BlueprintState>,
}

impl BlueprintStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: BlueprintSnapshot) -> Self {
        Self {
            inner: RwLock::new(BlueprintState {
                committed: snapshot.blueprints,
                drafts: snapshot.workspace,
                changes: snapshot.changes,
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, BlueprintState> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BlueprintState> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> BlueprintSnapshot {
        let st = self.read();
        BlueprintSnapshot {
            blueprints: st.committed.clone(),
            workspace: st.drafts.clone(),
            changes: st.changes.clone(),
        }
    }

    /// Names of committed blueprints, sorted case-insensitively.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().committed.keys().cloned().collect();
        names.sort_by_cached_key(|n| (n.to_lowercase(), n.clone()));
        names
    }

    pub fn get(&self, name: &str) -> Option<EffectiveBlueprint> {
        let st = self.read();
        if let Some(draft) = st.drafts.get(name) {
            return Some(EffectiveBlueprint {
                blueprint: draft.clone(),
                changed: true,
            });
        }
        st.committed.get(name).map(|bp| EffectiveBlueprint {
            blueprint: bp.clone(),
            changed: false,
        })
    }

    pub fn get_committed(&self, name: &str) -> Option<Blueprint> {
        self.read().committed.get(name).cloned()
    }

    pub fn get_draft(&self, name: &str) -> Option<Blueprint> {
        self.read().drafts.get(name).cloned()
    }

    /// Commit `bp`, applying the version rules against the committed copy.
    ///
    /// Returns the appended change, or `None` when the content is identical to
    /// the tip at the same version. The draft is cleared either way.
    pub fn push(&self, bp: Blueprint, message: &str) -> Result<Option<Change>, StoreError> {
        bp.validate()?;
        let mut st = self.write();
        push_locked(&mut st, bp, message)
    }

    pub fn push_workspace(&self, bp: Blueprint) -> Result<(), StoreError> {
        bp.validate()?;
        self.write().drafts.insert(bp.name.clone(), bp);
        Ok(())
    }

    /// Remove the committed copy and draft. The change log is kept.
    pub fn delete(&self, name: &str) -> Result<(), StoreError> {
        let mut st = self.write();
        let had_committed = st.committed.remove(name).is_some();
        let had_draft = st.drafts.remove(name).is_some();
        if had_committed || had_draft {
            Ok(())
        } else {
            Err(StoreError::BlueprintNotFound(name.to_owned()))
        }
    }

    pub fn delete_workspace(&self, name: &str) -> Result<(), StoreError> {
        let mut st = self.write();
        if st.drafts.remove(name).is_some() || st.committed.contains_key(name) {
            Ok(())
        } else {
            Err(StoreError::BlueprintNotFound(name.to_owned()))
        }
    }

    /// Full change log, oldest first. `None` when the name has no history.
    pub fn changes(&self, name: &str) -> Option<Vec<Change>> {
        self.read()
            .changes
            .get(name)
            .filter(|log| !log.is_empty())
            .cloned()
    }

    pub fn change(&self, name: &str, commit: &str) -> Result<Change, StoreError> {
        let st = self.read();
        find_change(&st, name, commit).cloned()
    }

    /// Re-commit the content of `commit` on top of the current tip.
    pub fn undo(&self, name: &str, commit: &str) -> Result<Option<Change>, StoreError> {
        let mut st = self.write();
        let mut bp = find_change(&st, name, commit)?.blueprint.clone();
        if let Some(tip) = st.committed.get(name) {
            bp.version.clone_from(&tip.version);
        }
        let message = format!("{name}.toml reverted to commit {commit}");
        push_locked(&mut st, bp, &message)
    }

    /// Give the tip commit the next revision number.
    pub fn tag(&self, name: &str) -> Result<u32, StoreError> {
        let mut st = self.write();
        if !st.committed.contains_key(name) {
            return Err(StoreError::BlueprintNotFound(name.to_owned()));
        }
        let log = st
            .changes
            .get_mut(name)
            .filter(|log| !log.is_empty())
            .ok_or_else(|| StoreError::NoCommits(name.to_owned()))?;
        let next = log.iter().filter_map(|c| c.revision).max().unwrap_or(0) + 1;
        let Some(tip) = log.last_mut() else {
            return Err(StoreError::NoCommits(name.to_owned()));
        };
        if let Some(revision) = tip.revision {
            return Err(StoreError::AlreadyTagged {
                commit: tip.commit.to_string(),
                revision,
            });
        }
        tip.revision = Some(next);
        tracing::info!(blueprint = name, revision = next, "tagged blueprint");
        Ok(next)
    }
}

fn find_change<'a>(
    st: &'a BlueprintState,
    name: &str,
    commit: &str,
) -> Result<&'a Change, StoreError> {
    let log = st
        .changes
        .get(name)
        .ok_or_else(|| StoreError::BlueprintNotFound(name.to_owned()))?;
    log.iter()
        .find(|c| c.commit == commit)
        .ok_or_else(|| StoreError::CommitNotFound {
            name: name.to_owned(),
            commit: commit.to_owned(),
        })
}

fn push_locked(
    st: &mut BlueprintState,
    mut bp: Blueprint,
    message: &str,
) -> Result<Option<Change>, StoreError> {
    let name = bp.name.clone();
    if let Some(current) = st.committed.get(&name) {
        if bp.version.is_empty() {
            bp.version.clone_from(&current.version);
        }
        let current_version = current.version.parse::<Version>().ok();
        let new_version = bp.parsed_version();
        let ordering = match (new_version, current_version) {
            (Some(new), Some(cur)) => new.cmp(&cur),
            _ if bp.version == current.version => Ordering::Equal,
            _ => Ordering::Greater,
        };
        match ordering {
            Ordering::Less => {
                return Err(StoreError::InvalidVersion {
                    name,
                    new: bp.version,
                    current: current.version.clone(),
                });
            }
            Ordering::Equal if current.same_content(&bp) => {
                st.drafts.remove(&name);
                tracing::debug!(blueprint = %name, "push matches tip, no new change");
                return Ok(None);
            }
            Ordering::Equal => {
                bp.version = bump_version(&current.version).map_err(|_| {
                    StoreError::VersionExhausted {
                        name: name.clone(),
                        current: current.version.clone(),
                    }
                })?;
            }
            Ordering::Greater => {}
        }
    } else if bp.version.is_empty() {
        "0.0.1".clone_into(&mut bp.version);
    }

    let timestamp = chrono::Utc::now().format(TIMESTAMP_FORMAT).to_string();
    let log = st.changes.entry(name.clone()).or_default();
    let parent = log.last().map(|c| c.commit.clone());
    let commit = compute_commit_id(parent.as_ref(), &timestamp, &bp);
    let change = Change {
        commit,
        parent,
        message: message.to_owned(),
        revision: None,
        timestamp,
        blueprint: bp.clone(),
        extra: BTreeMap::new(),
    };
    log.push(change.clone());
    st.drafts.remove(&name);
    st.committed.insert(name, bp);
    tracing::debug!(commit = %change.commit, "committed blueprint change");
    Ok(Some(change))
}

#[cfg(test)]
mod tests {
    use super::*;
    use weldr_schema::Package;

    fn bp(name: &str, version: &str, packages: &[&str]) -> Blueprint {
        Blueprint {
            name: name.to_owned(),
            version: version.to_owned(),
            packages: packages.iter().map(|p| Package::new(*p, "*")).collect(),
            ..Blueprint::default()
        }
    }

    #[test]
    fn first_push_defaults_version() {
        let store = BlueprintStore::new();
        let change = store.push(bp("demo", "", &["bash"]), "m").unwrap().unwrap();
        assert_eq!(change.blueprint.version, "0.0.1");
        assert!(change.parent.is_none());
        assert_eq!(store.get_committed("demo").unwrap().version, "0.0.1");
    }

    #[test]
    fn equal_version_with_new_content_bumps_patch() {
        let store = BlueprintStore::new();
        store.push(bp("demo", "2.1.2", &["bash"]), "m").unwrap();
        store.push(bp("demo", "2.1.2", &["bash", "tmux"]), "m").unwrap();
        assert_eq!(store.get_committed("demo").unwrap().version, "2.1.3");
        assert_eq!(store.changes("demo").unwrap().len(), 2);
    }

    #[test]
    fn identical_push_adds_no_change_but_clears_draft() {
        let store = BlueprintStore::new();
        store.push(bp("demo", "1.0.0", &["bash"]), "m").unwrap();
        store.push_workspace(bp("demo", "1.0.0", &["vim"])).unwrap();
        let out = store.push(bp("demo", "1.0.0", &["bash"]), "m").unwrap();
        assert!(out.is_none());
        assert!(store.get_draft("demo").is_none());
        assert_eq!(store.changes("demo").unwrap().len(), 1);
    }

    #[test]
    fn lower_version_is_rejected() {
        let store = BlueprintStore::new();
        store.push(bp("demo", "1.0.0", &[]), "m").unwrap();
        let err = store.push(bp("demo", "0.9.0", &[]), "m").unwrap_err();
        assert!(matches!(err, StoreError::InvalidVersion { .. }));
    }

    #[test]
    fn bump_past_largest_patch_is_rejected() {
        let store = BlueprintStore::new();
        let max = format!("0.0.{}", u64::MAX);
        store.push(bp("demo", &max, &["bash"]), "m").unwrap();
        let err = store.push(bp("demo", &max, &["tmux"]), "m").unwrap_err();
        assert!(matches!(err, StoreError::VersionExhausted { .. }));
        assert_eq!(store.get_committed("demo").unwrap().version, max);
        assert_eq!(store.changes("demo").unwrap().len(), 1);
        // The lock is not poisoned.
        store.push(bp("demo", "0.1.0", &["tmux"]), "m").unwrap();
    }

    #[test]
    fn empty_version_counts_as_equal() {
        let store = BlueprintStore::new();
        store.push(bp("demo", "1.0.0", &[]), "m").unwrap();
        store.push(bp("demo", "", &["tmux"]), "m").unwrap();
        assert_eq!(store.get_committed("demo").unwrap().version, "1.0.1");
    }

    #[test]
    fn draft_shadows_committed() {
        let store = BlueprintStore::new();
        store.push(bp("demo", "1.0.0", &["bash"]), "m").unwrap();
        store.push_workspace(bp("demo", "1.0.0", &["zsh"])).unwrap();
        let eff = store.get("demo").unwrap();
        assert!(eff.changed);
        assert_eq!(eff.blueprint.packages[0].name, "zsh");
        store.delete_workspace("demo").unwrap();
        assert!(!store.get("demo").unwrap().changed);
    }

    #[test]
    fn delete_keeps_history() {
        let store = BlueprintStore::new();
        store.push(bp("demo", "1.0.0", &[]), "m").unwrap();
        store.delete("demo").unwrap();
        assert!(store.get("demo").is_none());
        assert_eq!(store.changes("demo").unwrap().len(), 1);
        assert!(matches!(
            store.delete("demo"),
            Err(StoreError::BlueprintNotFound(_))
        ));
    }

    #[test]
    fn undo_restores_content_at_next_version() {
        let store = BlueprintStore::new();
        let first = store
            .push(bp("demo", "1.0.0", &["bash"]), "m")
            .unwrap()
            .unwrap();
        store.push(bp("demo", "1.0.0", &["tmux"]), "m").unwrap();
        let undone = store.undo("demo", &first.commit).unwrap().unwrap();
        assert_eq!(undone.blueprint.version, "1.0.2");
        assert_eq!(undone.blueprint.packages[0].name, "bash");
        assert_eq!(
            undone.message,
            format!("demo.toml reverted to commit {}", first.commit)
        );
    }

    #[test]
    fn tag_assigns_increasing_revisions() {
        let store = BlueprintStore::new();
        store.push(bp("demo", "1.0.0", &[]), "m").unwrap();
        assert_eq!(store.tag("demo").unwrap(), 1);
        assert!(matches!(
            store.tag("demo"),
            Err(StoreError::AlreadyTagged { revision: 1, .. })
        ));
        store.push(bp("demo", "1.1.0", &[]), "m").unwrap();
        assert_eq!(store.tag("demo").unwrap(), 2);
        assert!(matches!(
            store.tag("nope"),
            Err(StoreError::BlueprintNotFound(_))
        ));
    }

    #[test]
    fn change_lookup_errors() {
        let store = BlueprintStore::new();
        store.push(bp("demo", "1.0.0", &[]), "m").unwrap();
        assert!(matches!(
            store.change("nope", "abc"),
            Err(StoreError::BlueprintNotFound(_))
        ));
        assert!(matches!(
            store.change("demo", "abc"),
            Err(StoreError::CommitNotFound { .. })
        ));
    }

    #[test]
    fn list_sorts_case_insensitively() {
        let store = BlueprintStore::new();
        for name in ["beta", "Alpha", "gamma"] {
            store.push(bp(name, "", &[]), "m").unwrap();
        }
        assert_eq!(store.list(), vec!["Alpha", "beta", "gamma"]);
    }

    #[test]
    fn parents_chain_commits() {
        let store = BlueprintStore::new();
        let a = store.push(bp("demo", "1.0.0", &[]), "m").unwrap().unwrap();
        let b = store.push(bp("demo", "1.0.1", &[]), "m").unwrap();
        // Same content at a higher version is still a new change.
        let b = b.unwrap();
        assert_eq!(b.parent.as_ref(), Some(&a.commit));
        assert_ne!(a.commit, b.commit);
    }
}
