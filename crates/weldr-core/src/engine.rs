use crate::compose::ComposeManager;
use crate::diff::{diff_blueprints, BlueprintDiff};
use crate::freeze::freeze_blueprint;
use crate::{CoreError, ErrorEntry};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use weldr_backend::{
    Depsolver, PackageSet, RepoRegistry, RequestContext, WorkerQueue, DEFAULT_REQUEST_TIMEOUT,
};
use weldr_schema::{Blueprint, Change, ChangeSummary, PackageSpec};
use weldr_store::{
    ArtifactStore, BlueprintSnapshot, BlueprintStore, ComposeRegistry, SourceStore, StateDocument,
    StateLayout, StateLock, StateWriter, StoreError,
};

#[derive(Debug, Clone)]
pub struct WeldrConfig {
    pub state_dir: PathBuf,
    pub request_timeout: Duration,
}

impl WeldrConfig {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// The external collaborators the engine talks to.
#[derive(Clone)]
pub struct Adapters {
    pub depsolver: Arc<dyn Depsolver>,
    pub queue: Arc<dyn WorkerQueue>,
    pub registry: Arc<dyn RepoRegistry>,
}

/// One window of a paginated listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
}

impl<T> Page<T> {
    /// Clamp `offset` and `limit` to `all` and cut the window out of it.
    pub fn window(all: Vec<T>, offset: usize, limit: usize) -> Self {
        let total = all.len();
        let offset = offset.min(total);
        let limit = limit.min(total - offset);
        let items = all.into_iter().skip(offset).take(limit).collect();
        Self {
            items,
            total,
            offset,
            limit,
        }
    }
}

/// Change histories of a batch of blueprints. `offset` and `limit` are
/// clamped against the longest history in the batch.
#[derive(Debug, Clone)]
pub struct ChangesPage {
    pub blueprints: Vec<BlueprintChanges>,
    pub errors: Vec<ErrorEntry>,
    pub offset: usize,
    pub limit: usize,
}

/// Change history of one blueprint, newest first.
#[derive(Debug, Clone, Serialize)]
pub struct BlueprintChanges {
    pub name: String,
    pub changes: Vec<ChangeSummary>,
    pub total: usize,
}

struct Persister {
    gate: Mutex<()>,
    writer: StateWriter,
    extra: BTreeMap<String, serde_json::Value>,
}

/// The control plane: stores, adapters, and the state writer.
///
/// Opening a `Weldr` takes an exclusive lock on the state directory, loads
/// `state.json`, and starts the background writer. Every mutating operation
/// publishes a fresh snapshot after its store lock is released.
pub struct Weldr {
    layout: StateLayout,
    pub(crate) blueprints: BlueprintStore,
    pub(crate) sources: SourceStore,
    pub(crate) composes: ComposeManager,
    pub(crate) depsolver: Arc<dyn Depsolver>,
    pub(crate) registry: Arc<dyn RepoRegistry>,
    persister: Persister,
    request_timeout: Duration,
    _lock: StateLock,
}

impl Weldr {
    pub fn open(config: &WeldrConfig, adapters: Adapters) -> Result<Self, CoreError> {
        let layout = StateLayout::new(config.state_dir.clone());
        layout.initialize()?;
        let lock = StateLock::try_acquire(&layout.lock_file())?.ok_or_else(|| {
            CoreError::from(StoreError::LockFailed(format!(
                "state directory {} is in use by another server",
                layout.root().display()
            )))
        })?;

        let StateDocument {
            blueprints,
            workspace,
            changes,
            composes,
            sources,
            extra,
        } = StateDocument::load(&layout.state_file())?;
        info!(
            blueprints = blueprints.len(),
            composes = composes.len(),
            sources = sources.len(),
            "loaded state from {}",
            layout.state_file().display()
        );

        let Adapters {
            depsolver,
            queue,
            registry,
        } = adapters;
        let blueprints = BlueprintStore::from_snapshot(BlueprintSnapshot {
            blueprints,
            workspace,
            changes,
        });
        let sources = SourceStore::new(registry.system_source_ids()).with_sources(sources);
        let composes = ComposeManager::new(
            ComposeRegistry::from_snapshot(composes),
            queue,
            ArtifactStore::new(layout.clone()),
            Arc::clone(&registry),
        );
        let writer = StateWriter::spawn(layout.state_file())?;
        if let Err(e) = depsolver.clean_cache() {
            warn!("failed to clean depsolver cache: {e}");
        }

        Ok(Self {
            layout,
            blueprints,
            sources,
            composes,
            depsolver,
            registry,
            persister: Persister {
                gate: Mutex::new(()),
                writer,
                extra,
            },
            request_timeout: config.request_timeout,
            _lock: lock,
        })
    }

    pub fn layout(&self) -> &StateLayout {
        &self.layout
    }

    pub fn registry(&self) -> &dyn RepoRegistry {
        self.registry.as_ref()
    }

    pub fn blueprint_store(&self) -> &BlueprintStore {
        &self.blueprints
    }

    pub fn source_store(&self) -> &SourceStore {
        &self.sources
    }

    /// The compose manager, synced with the worker queue.
    pub fn composes(&self) -> &ComposeManager {
        if self.composes.sync() {
            self.persist();
        }
        &self.composes
    }

    pub fn request_context(&self) -> RequestContext {
        RequestContext::with_timeout(self.request_timeout)
    }

    /// Publish a snapshot of every store to the state writer.
    pub fn persist(&self) {
        let _gate = self
            .persister
            .gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let BlueprintSnapshot {
            blueprints,
            workspace,
            changes,
        } = self.blueprints.snapshot();
        let doc = StateDocument {
            blueprints,
            workspace,
            changes,
            composes: self.composes.registry().snapshot(),
            sources: self.sources.snapshot(),
            extra: self.persister.extra.clone(),
        };
        match doc.to_bytes() {
            Ok(bytes) => self.persister.writer.publish(bytes),
            Err(e) => error!("failed to serialize state: {e}"),
        }
    }

    /// Block until every published snapshot is on disk.
    pub fn flush(&self) {
        self.persister.writer.flush();
    }

    /// Drain the state writer and stop it.
    pub fn close(&self) {
        self.persister.writer.close();
        debug!("engine closed");
    }

    fn check_distro(&self, bp: &Blueprint) -> Result<(), CoreError> {
        if bp.distro.is_empty() || self.registry.distros().contains(&bp.distro) {
            Ok(())
        } else {
            Err(CoreError::Blueprints(format!(
                "'{}' is not a valid distribution",
                bp.distro
            )))
        }
    }

    pub fn list_blueprints(&self, offset: usize, limit: usize) -> Page<String> {
        Page::window(self.blueprints.list(), offset, limit)
    }

    /// Effective blueprints with their `changed` flag. Unknown names are
    /// reported in the error list.
    pub fn blueprint_info(&self, names: &[String]) -> (Vec<(Blueprint, bool)>, Vec<ErrorEntry>) {
        let mut found = Vec::new();
        let mut errors = Vec::new();
        for name in names {
            match self.blueprints.get(name) {
                Some(eff) => found.push((eff.blueprint.with_read_defaults(), eff.changed)),
                None => errors.push(ErrorEntry::new("UnknownBlueprint", format!("{name}: "))),
            }
        }
        (found, errors)
    }

    pub fn push_blueprint(&self, bp: Blueprint) -> Result<(), CoreError> {
        bp.validate()?;
        self.check_distro(&bp)?;
        let message = format!("Recipe {}, version {} saved.", bp.name, bp.version);
        let name = bp.name.clone();
        if let Some(change) = self.blueprints.push(bp, &message)? {
            info!(blueprint = %name, version = %change.blueprint.version, "blueprint committed");
        }
        self.persist();
        Ok(())
    }

    pub fn push_workspace(&self, bp: Blueprint) -> Result<(), CoreError> {
        bp.validate()?;
        self.check_distro(&bp)?;
        debug!(blueprint = %bp.name, "workspace updated");
        self.blueprints.push_workspace(bp)?;
        self.persist();
        Ok(())
    }

    pub fn delete_blueprint(&self, name: &str) -> Result<(), CoreError> {
        self.blueprints.delete(name)?;
        info!(blueprint = name, "blueprint deleted");
        self.persist();
        Ok(())
    }

    pub fn delete_workspace(&self, name: &str) -> Result<(), CoreError> {
        self.blueprints.delete_workspace(name)?;
        self.persist();
        Ok(())
    }

    pub fn blueprint_changes(
        &self,
        names: &[String],
        offset: usize,
        limit: usize,
    ) -> ChangesPage {
        let mut found = Vec::new();
        let mut errors = Vec::new();
        for name in names {
            let Some(log) = self.blueprints.changes(name) else {
                errors.push(ErrorEntry::new("UnknownBlueprint", name.clone()));
                continue;
            };
            let newest_first: Vec<ChangeSummary> =
                log.iter().rev().map(ChangeSummary::from).collect();
            let page = Page::window(newest_first, offset, limit);
            found.push(BlueprintChanges {
                name: name.clone(),
                changes: page.items,
                total: page.total,
            });
        }
        let longest = found.iter().map(|b| b.total).max().unwrap_or(0);
        let offset = offset.min(longest);
        ChangesPage {
            blueprints: found,
            errors,
            offset,
            limit: limit.min(longest - offset),
        }
    }

    pub fn blueprint_change(&self, name: &str, commit: &str) -> Result<Change, CoreError> {
        self.blueprints.change(name, commit).map_err(commit_error)
    }

    pub fn undo_blueprint(&self, name: &str, commit: &str) -> Result<(), CoreError> {
        self.blueprints.undo(name, commit).map_err(commit_error)?;
        info!(blueprint = name, commit, "blueprint reverted");
        self.persist();
        Ok(())
    }

    pub fn tag_blueprint(&self, name: &str) -> Result<u32, CoreError> {
        let revision = self.blueprints.tag(name).map_err(|e| match e {
            StoreError::BlueprintNotFound(_) => {
                CoreError::Blueprints("Unknown blueprint".to_owned())
            }
            other => other.into(),
        })?;
        self.persist();
        Ok(revision)
    }

    /// Differences between the newest commit and the workspace draft.
    pub fn diff_blueprint(
        &self,
        name: &str,
        from: &str,
        to: &str,
    ) -> Result<Vec<BlueprintDiff>, CoreError> {
        for (reference, expected) in [(from, "NEWEST"), (to, "WORKSPACE")] {
            if reference != expected {
                return Err(CoreError::UnknownCommit(format!(
                    "ggit-error: revspec '{reference}' not found (-3)"
                )));
            }
        }
        let old = self
            .blueprints
            .get_committed(name)
            .ok_or_else(|| CoreError::UnknownBlueprint(format!("Unknown blueprint name: {name}")))?;
        Ok(match self.blueprints.get_draft(name) {
            Some(new) => diff_blueprints(&old, &new),
            None => Vec::new(),
        })
    }

    /// Resolve the packages of `bp` against the repositories of its distro.
    pub fn depsolve_blueprint(&self, bp: &Blueprint) -> Result<Vec<PackageSpec>, CoreError> {
        let distro = if bp.distro.is_empty() {
            self.registry.host_distro()
        } else {
            bp.distro.as_str()
        };
        let arch = if bp.arch.is_empty() {
            self.registry.host_arch()
        } else {
            bp.arch.as_str()
        };
        let repos = self.repositories(distro, arch)?;
        let set = PackageSet {
            include: bp.package_specs(false),
            exclude: Vec::new(),
            enabled_modules: bp.enabled_module_specs(),
        };
        let mut deps = self
            .depsolver
            .depsolve(&[set], &repos, &self.request_context())?;
        deps.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(deps)
    }

    /// Effective blueprints with their dependencies. A failed depsolve is
    /// reported as an error and leaves the dependency list empty.
    pub fn depsolve_blueprints(
        &self,
        names: &[String],
    ) -> Result<(Vec<(Blueprint, Vec<PackageSpec>)>, Vec<ErrorEntry>), CoreError> {
        let mut found = Vec::new();
        let mut errors = Vec::new();
        for name in names {
            let Some(eff) = self.blueprints.get(name) else {
                errors.push(ErrorEntry::new(
                    "UnknownBlueprint",
                    format!("{name}: blueprint not found"),
                ));
                continue;
            };
            let bp = eff.blueprint.with_read_defaults();
            match self.depsolve_blueprint(&bp) {
                Ok(deps) => found.push((bp, deps)),
                Err(e @ CoreError::RequestTimeout(_)) => return Err(e),
                Err(e) => {
                    errors.push(ErrorEntry::new("BlueprintsError", format!("{name}: {e}")));
                    found.push((bp, Vec::new()));
                }
            }
        }
        Ok((found, errors))
    }

    /// Blueprints with every package pinned to its depsolved build.
    pub fn freeze_blueprints(
        &self,
        names: &[String],
    ) -> Result<(Vec<Blueprint>, Vec<ErrorEntry>), CoreError> {
        let mut frozen = Vec::new();
        let mut errors = Vec::new();
        for name in names {
            let Some(eff) = self.blueprints.get(name) else {
                errors.push(ErrorEntry::new(
                    "UnknownBlueprint",
                    format!("{name}: blueprint not found"),
                ));
                continue;
            };
            let bp = eff.blueprint.with_read_defaults();
            match self
                .depsolve_blueprint(&bp)
                .and_then(|deps| freeze_blueprint(&bp, &deps))
            {
                Ok(f) => frozen.push(f),
                Err(e @ CoreError::RequestTimeout(_)) => return Err(e),
                Err(e) => errors.push(ErrorEntry::new("BlueprintsError", format!("{name}: {e}"))),
            }
        }
        Ok((frozen, errors))
    }
}

impl Drop for Weldr {
    fn drop(&mut self) {
        self.persister.writer.close();
    }
}

/// `change` and `undo` report an unknown blueprint as an unknown commit.
fn commit_error(e: StoreError) -> CoreError {
    match e {
        StoreError::BlueprintNotFound(_) => {
            CoreError::UnknownCommit("Unknown blueprint".to_owned())
        }
        other => other.into(),
    }
}
