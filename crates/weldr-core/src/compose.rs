//! Compose lifecycle: submit, worker state sync, views, cancel, delete, and
//! artifact access.

use crate::engine::Weldr;
use crate::lifecycle::validate_transition;
use crate::manifest::{build_manifest, check_mountpoints, image_size, package_sets};
use crate::{CoreError, ErrorEntry};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use weldr_backend::{
    BuildPayload, DepsolveError, JobInfo, RepoRegistry, WorkerError, WorkerQueue, OSBUILD_JOB,
};
use weldr_schema::validate_name;
use weldr_store::{
    ArtifactStore, Compose, ComposeFailure, ComposeRegistry, ComposeState, Target, TargetOptions,
};

const FALLBACK_FILENAME: &str = "image.raw";
const FALLBACK_MIME: &str = "application/octet-stream";

/// Body of `POST /compose`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ComposeRequest {
    pub blueprint_name: String,
    pub compose_type: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub branch: String,
    #[serde(default)]
    pub upload: Option<UploadRequest>,
}

/// The v1 `upload` object of a compose request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UploadRequest {
    pub provider: String,
    #[serde(default)]
    pub image_name: String,
    #[serde(default)]
    pub settings: serde_json::Value,
}

impl UploadRequest {
    pub fn to_target(&self) -> Result<Target, CoreError> {
        let options = if self.provider == "local" {
            TargetOptions::Local
        } else {
            serde_json::from_value(serde_json::json!({
                "provider": self.provider,
                "settings": self.settings,
            }))
            .map_err(|e| CoreError::Compose(format!("invalid upload settings: {e}")))?
        };
        Ok(Target::new(self.image_name.clone(), options))
    }
}

/// Outcome forced by `?test=1` and `?test=2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestMode {
    Fail,
    Finish,
}

#[derive(Debug, Clone, Default)]
pub struct StatusFilter {
    pub blueprint: Option<String>,
    pub status: Option<String>,
    pub image_type: Option<String>,
}

impl StatusFilter {
    fn matches(&self, c: &Compose) -> bool {
        self.blueprint.as_deref().map_or(true, |b| c.blueprint.name == b)
            && self.status.as_deref().map_or(true, |s| c.state.as_str() == s)
            && self.image_type.as_deref().map_or(true, |t| c.image_type == t)
    }
}

/// A finished image on disk.
#[derive(Debug, Clone)]
pub struct ImageArtifact {
    pub path: PathBuf,
    /// `<uuid>-<filename>`, as offered to the client.
    pub download_name: String,
    pub mime_type: String,
}

pub(crate) fn parse_uuid(s: &str) -> Result<Uuid, CoreError> {
    Uuid::parse_str(s).map_err(|_| CoreError::UnknownUuid(format!("{s} is not a valid build uuid")))
}

/// Compose records plus the worker queue they are built on.
pub struct ComposeManager {
    registry: ComposeRegistry,
    queue: Arc<dyn WorkerQueue>,
    artifacts: ArtifactStore,
    repos: Arc<dyn RepoRegistry>,
}

impl ComposeManager {
    pub fn new(
        registry: ComposeRegistry,
        queue: Arc<dyn WorkerQueue>,
        artifacts: ArtifactStore,
        repos: Arc<dyn RepoRegistry>,
    ) -> Self {
        Self {
            registry,
            queue,
            artifacts,
            repos,
        }
    }

    pub fn registry(&self) -> &ComposeRegistry {
        &self.registry
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    /// Pull job state from the worker queue into every non-terminal compose.
    /// Returns whether any record changed.
    pub fn sync(&self) -> bool {
        let pending = self.registry.pending_jobs();
        let mut changed = false;
        for (id, job) in pending {
            let info = self.queue.job_info(job);
            let outcome = self.registry.update(id, |c| apply_job_info(c, &info));
            let Some((updated, log)) = outcome else {
                continue;
            };
            if let Some(log) = log {
                if let Err(e) = self.artifacts.write_log(id, &log) {
                    warn!(compose = %id, "failed to write build log: {e}");
                }
            }
            changed |= updated;
        }
        changed
    }

    /// Record `compose` as WAITING and hand its job to the worker queue.
    /// The record is removed again when the queue refuses the job.
    pub fn enqueue(&self, compose: Compose, payload: &BuildPayload) -> Result<(), CoreError> {
        let id = compose.id;
        self.registry.insert(compose);
        let job = serde_json::to_value(payload)
            .map_err(CoreError::from)
            .and_then(|p| self.queue.enqueue(OSBUILD_JOB, p).map_err(CoreError::from));
        match job {
            Ok(job) => {
                self.registry.update(id, |c| c.job_id = Some(job));
                debug!(compose = %id, job = %job, "compose enqueued");
                Ok(())
            }
            Err(e) => {
                self.registry.remove(id);
                if let Err(err) = self.artifacts.remove(id) {
                    warn!(compose = %id, "failed to clean up artifacts: {err}");
                }
                Err(e)
            }
        }
    }

    /// `(new, run)`: WAITING and RUNNING composes.
    pub fn queue(&self) -> (Vec<Compose>, Vec<Compose>) {
        self.registry
            .all()
            .into_iter()
            .filter(|c| !c.state.is_terminal())
            .partition(|c| c.state == ComposeState::Waiting)
    }

    pub fn finished(&self) -> Vec<Compose> {
        self.in_state(ComposeState::Finished)
    }

    pub fn failed(&self) -> Vec<Compose> {
        self.in_state(ComposeState::Failed)
    }

    fn in_state(&self, state: ComposeState) -> Vec<Compose> {
        self.registry
            .all()
            .into_iter()
            .filter(|c| c.state == state)
            .collect()
    }

    /// Composes named by `uuids` (or every compose for `*`) that pass
    /// `filter`. Unknown uuids are skipped.
    pub fn status(
        &self,
        uuids: &[String],
        filter: &StatusFilter,
    ) -> Result<Vec<Compose>, CoreError> {
        let candidates = if uuids.iter().any(|u| u == "*") {
            self.registry.all()
        } else {
            let ids = uuids
                .iter()
                .map(|u| parse_uuid(u))
                .collect::<Result<Vec<_>, _>>()?;
            ids.into_iter().filter_map(|id| self.registry.get(id)).collect()
        };
        Ok(candidates.into_iter().filter(|c| filter.matches(c)).collect())
    }

    pub fn get(&self, uuid: &str) -> Result<Compose, CoreError> {
        let id = parse_uuid(uuid)?;
        self.registry
            .get(id)
            .ok_or_else(|| CoreError::UnknownUuid(format!("{uuid} is not a valid build uuid")))
    }

    /// Mark a WAITING or RUNNING compose FAILED and ask the worker to stop.
    pub fn cancel(&self, uuid: &str) -> Result<Uuid, CoreError> {
        let id = parse_uuid(uuid)?;
        let job = self
            .registry
            .update(id, |c| {
                if c.state.is_terminal() {
                    return Err(CoreError::BuildInWrongState(format!(
                        "Build {id} is not in WAITING or RUNNING."
                    )));
                }
                validate_transition(c.state, ComposeState::Failed)?;
                set_state(c, ComposeState::Failed);
                c.job_finished = Some(Utc::now());
                c.error = Some(ComposeFailure::new("Canceled", "compose was canceled"));
                Ok(c.job_id)
            })
            .ok_or_else(|| CoreError::UnknownUuid(format!("{uuid} is not a valid build uuid")))??;
        if let Some(job) = job {
            if let Err(e) = self.queue.cancel(job) {
                warn!(compose = %id, job = %job, "failed to cancel worker job: {e}");
            }
        }
        info!(compose = %id, "compose canceled");
        Ok(id)
    }

    /// Remove terminal composes, their artifacts and their queue jobs.
    pub fn delete(&self, uuids: &[String]) -> (Vec<Uuid>, Vec<ErrorEntry>) {
        let mut deleted = Vec::new();
        let mut errors = Vec::new();
        for uuid in uuids {
            let unknown =
                || ErrorEntry::new("UnknownUUID", format!("compose {uuid} doesn't exist"));
            let Ok(id) = Uuid::parse_str(uuid) else {
                errors.push(unknown());
                continue;
            };
            let removed = self.registry.remove_if(id, |c| {
                if c.state.is_terminal() {
                    Ok(())
                } else {
                    Err(CoreError::BuildInWrongState(format!(
                        "Compose {id} is not in FINISHED or FAILED."
                    )))
                }
            });
            match removed {
                None => errors.push(unknown()),
                Some(Err(e)) => errors.push(e.into()),
                Some(Ok(removed)) => {
                    if let Err(e) = self.artifacts.remove(id) {
                        warn!(compose = %id, "failed to remove artifacts: {e}");
                    }
                    // Jobs from before a restart are already gone.
                    if let Some(job) = removed.job_id {
                        match self.queue.forget(job) {
                            Ok(()) | Err(WorkerError::UnknownJob(_)) => {}
                            Err(e) => warn!(compose = %id, job = %job, "failed to drop job: {e}"),
                        }
                    }
                    info!(compose = %id, "compose deleted");
                    deleted.push(id);
                }
            }
        }
        (deleted, errors)
    }

    fn image_def(&self, c: &Compose) -> (String, String) {
        match self.repos.image_type(&c.distro, &c.arch, &c.image_type) {
            Ok(def) => (def.filename, def.mime_type),
            Err(_) => (FALLBACK_FILENAME.to_owned(), FALLBACK_MIME.to_owned()),
        }
    }

    fn terminal(&self, uuid: &str) -> Result<Compose, CoreError> {
        let c = self.get(uuid)?;
        if c.state.is_terminal() {
            Ok(c)
        } else {
            Err(CoreError::BuildInWrongState(format!(
                "Build {} not in FINISHED or FAILED state.",
                c.id
            )))
        }
    }

    pub fn image(&self, uuid: &str) -> Result<ImageArtifact, CoreError> {
        let c = self.get(uuid)?;
        if c.state != ComposeState::Finished {
            return Err(CoreError::BuildInWrongState(format!(
                "Build {} not in FINISHED state",
                c.id
            )));
        }
        let (filename, mime_type) = self.image_def(&c);
        let path = self
            .artifacts
            .image_path(c.id, &filename)
            .ok_or_else(|| CoreError::Internal(format!("image for build {} is missing", c.id)))?;
        Ok(ImageArtifact {
            path,
            download_name: format!("{}-{filename}", c.id),
            mime_type,
        })
    }

    pub fn metadata_tar(&self, uuid: &str) -> Result<(Uuid, Vec<u8>), CoreError> {
        let c = self.terminal(uuid)?;
        Ok((c.id, self.artifacts.metadata_tar(c.id)?))
    }

    pub fn results_tar(&self, uuid: &str) -> Result<(Uuid, Vec<u8>), CoreError> {
        let c = self.terminal(uuid)?;
        let (filename, _) = self.image_def(&c);
        Ok((c.id, self.artifacts.results_tar(c.id, Some(&filename))?))
    }

    pub fn logs_tar(&self, uuid: &str) -> Result<(Uuid, Vec<u8>), CoreError> {
        let c = self.terminal(uuid)?;
        Ok((c.id, self.artifacts.logs_tar(c.id)?))
    }

    /// The raw build log. A WAITING compose has none yet.
    pub fn log(&self, uuid: &str) -> Result<String, CoreError> {
        let c = self.get(uuid)?;
        match c.state {
            ComposeState::Waiting => Err(CoreError::BuildInWrongState(format!(
                "Build {} has not started yet. No logs to view.",
                c.id
            ))),
            ComposeState::Running => Ok(format!("Build {} is still running.\n", c.id)),
            ComposeState::Finished | ComposeState::Failed => Ok(self.artifacts.read_log(c.id)?),
        }
    }
}

fn set_state(c: &mut Compose, state: ComposeState) {
    c.state = state;
    if state.is_terminal() {
        for t in &mut c.targets {
            t.status = state;
        }
    }
}

/// Move `c` to `to` when the transition is legal.
fn step(c: &mut Compose, to: ComposeState) -> bool {
    match validate_transition(c.state, to) {
        Ok(()) => {
            info!(compose = %c.id, from = %c.state, to = %to, "compose state changed");
            set_state(c, to);
            true
        }
        Err(e) => {
            warn!(compose = %c.id, "ignoring worker update: {e}");
            false
        }
    }
}

/// Apply the worker's view of a job to its compose. Returns whether the
/// record changed and the build log to persist, if the job just finished.
fn apply_job_info(c: &mut Compose, info: &Result<JobInfo, WorkerError>) -> (bool, Option<String>) {
    if c.state.is_terminal() {
        return (false, None);
    }
    let info = match info {
        Ok(info) => info,
        Err(e) => {
            if !step(c, ComposeState::Failed) {
                return (false, None);
            }
            c.job_finished = Some(Utc::now());
            c.error = Some(ComposeFailure::new("JobLost", e.to_string()));
            return (true, None);
        }
    };
    let status = &info.status;
    if status.canceled {
        if !step(c, ComposeState::Failed) {
            return (false, None);
        }
        c.job_finished = Some(status.finished.unwrap_or_else(Utc::now));
        c.error
            .get_or_insert_with(|| ComposeFailure::new("Canceled", "compose was canceled"));
        return (true, None);
    }

    let mut changed = false;
    if let Some(started) = status.started {
        if c.state == ComposeState::Waiting && step(c, ComposeState::Running) {
            c.job_started.get_or_insert(started);
            changed = true;
        }
    }
    if let Some(finished) = status.finished {
        let failure = info.result.as_ref().and_then(|r| r.error.clone());
        let target = if failure.is_some() {
            ComposeState::Failed
        } else {
            ComposeState::Finished
        };
        if target == ComposeState::Finished && c.state == ComposeState::Waiting {
            changed |= started_late(c, status.started.unwrap_or(finished));
        }
        if step(c, target) {
            c.job_finished = Some(finished);
            c.error = failure.map(|f| ComposeFailure::new(f.kind, f.reason));
            let log = info.result.as_ref().map(|r| r.log.clone());
            return (true, log);
        }
    }
    (changed, None)
}

fn started_late(c: &mut Compose, started: DateTime<Utc>) -> bool {
    if step(c, ComposeState::Running) {
        c.job_started.get_or_insert(started);
        true
    } else {
        false
    }
}

impl Weldr {
    /// Submit a compose of the effective blueprint, so a workspace draft
    /// shadows the committed copy. In test mode no depsolve or worker is
    /// involved and the record is created already terminal.
    pub fn submit_compose(
        &self,
        req: &ComposeRequest,
        test: Option<TestMode>,
        v1: bool,
    ) -> Result<Uuid, CoreError> {
        validate_name("blueprint name", &req.blueprint_name)
            .map_err(|_| CoreError::InvalidChars("Invalid characters in API path".to_owned()))?;
        let bp = self
            .blueprints
            .get(&req.blueprint_name)
            .map(|eff| eff.blueprint)
            .ok_or_else(|| {
                CoreError::UnknownBlueprint(format!(
                    "Unknown blueprint name: {}",
                    req.blueprint_name
                ))
            })?;
        let distro = if bp.distro.is_empty() {
            self.registry.host_distro().to_owned()
        } else {
            bp.distro.clone()
        };
        let arch = if bp.arch.is_empty() {
            self.registry.host_arch().to_owned()
        } else {
            bp.arch.clone()
        };
        let types = self.registry.image_types(&distro, &arch).map_err(|_| {
            CoreError::Distro(format!("Unknown distribution: {distro} for arch {arch}"))
        })?;
        let image = types
            .into_iter()
            .find(|t| t.name == req.compose_type)
            .ok_or_else(|| {
                CoreError::Compose(format!(
                    "Failed to get compose type {:?}: invalid image type: {}",
                    req.compose_type, req.compose_type
                ))
            })?;

        let targets = match (&req.upload, v1) {
            (Some(upload), true) => vec![upload.to_target()?],
            _ => Vec::new(),
        };
        check_mountpoints(&bp)?;
        let size = image_size(&bp, &image, req.size)?;
        let id = Uuid::new_v4();
        let artifacts = self.composes.artifacts();

        if let Some(mode) = test {
            let manifest = build_manifest(&bp, &image, &distro, &arch, &[], size);
            let mut compose = Compose::new(id, bp, &image.name, size);
            compose.distro = distro;
            compose.arch = arch;
            compose.targets = targets;
            compose.manifest = manifest;
            let now = Utc::now();
            compose.job_started = Some(now);
            compose.job_finished = Some(now);
            artifacts.write_manifest(id, &compose.manifest)?;
            match mode {
                TestMode::Fail => {
                    set_state(&mut compose, ComposeState::Failed);
                    compose.error = Some(ComposeFailure::new("TestError", "test compose failed"));
                    artifacts.write_log(id, "Test compose failed.\n")?;
                }
                TestMode::Finish => {
                    set_state(&mut compose, ComposeState::Finished);
                    artifacts.write_image(id, &image.filename, b"test compose image\n")?;
                    artifacts.write_log(id, "Test compose finished.\n")?;
                }
            }
            info!(compose = %id, state = %compose.state, "test compose recorded");
            self.composes.registry().insert(compose);
            self.persist();
            return Ok(id);
        }

        let repos = self.image_repositories(&distro, &arch, &image.name)?;
        let packages = self
            .depsolver
            .depsolve(&package_sets(&bp, &image), &repos, &self.request_context())
            .map_err(|e| match e {
                DepsolveError::Timeout => CoreError::RequestTimeout(e.to_string()),
                other => CoreError::Blueprints(other.to_string()),
            })?;
        let manifest = build_manifest(&bp, &image, &distro, &arch, &packages, size);
        artifacts.write_manifest(id, &manifest)?;

        let payload = BuildPayload {
            compose_id: id,
            image_type: image.name.clone(),
            filename: image.filename.clone(),
            output_dir: self.layout().output_dir(id),
            manifest: manifest.clone(),
        };
        let mut compose = Compose::new(id, bp, &image.name, size);
        compose.distro = distro;
        compose.arch = arch;
        compose.targets = targets;
        compose.packages = packages;
        compose.manifest = manifest;
        self.composes.enqueue(compose, &payload)?;
        self.persist();
        info!(
            compose = %id,
            blueprint = %req.blueprint_name,
            image_type = %req.compose_type,
            "compose submitted"
        );
        Ok(id)
    }

    pub fn cancel_compose(&self, uuid: &str) -> Result<Uuid, CoreError> {
        let id = self.composes().cancel(uuid)?;
        self.persist();
        Ok(id)
    }

    pub fn delete_composes(&self, uuids: &[String]) -> (Vec<Uuid>, Vec<ErrorEntry>) {
        let (deleted, errors) = self.composes().delete(uuids);
        if !deleted.is_empty() {
            self.persist();
        }
        (deleted, errors)
    }

    /// Image type names for `distro`/`arch`, defaulting to the host.
    pub fn compose_types(
        &self,
        distro: Option<&str>,
        arch: Option<&str>,
    ) -> Result<Vec<String>, CoreError> {
        let distro = distro.unwrap_or_else(|| self.registry.host_distro());
        let arch = arch.unwrap_or_else(|| self.registry.host_arch());
        let types = self.registry.image_types(distro, arch).map_err(|_| {
            CoreError::Distro(format!("Unknown distribution: {distro} for arch {arch}"))
        })?;
        Ok(types.into_iter().map(|t| t.name).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weldr_backend::{JobResult, JobStatus};
    use weldr_schema::Blueprint;

    fn waiting() -> Compose {
        let mut c = Compose::new(Uuid::new_v4(), Blueprint::new("demo"), "qcow2", 0);
        c.job_id = Some(Uuid::new_v4());
        c
    }

    fn info(started: bool, finished: bool, result: Option<JobResult>) -> JobInfo {
        JobInfo {
            job_type: OSBUILD_JOB.to_owned(),
            status: JobStatus {
                queued: Utc::now(),
                started: started.then(Utc::now),
                finished: finished.then(Utc::now),
                canceled: false,
            },
            result,
        }
    }

    #[test]
    fn started_job_moves_compose_to_running() {
        let mut c = waiting();
        let (changed, log) = apply_job_info(&mut c, &Ok(info(true, false, None)));
        assert!(changed);
        assert!(log.is_none());
        assert_eq!(c.state, ComposeState::Running);
        let first_start = c.job_started;
        assert!(first_start.is_some());
        let (changed, _) = apply_job_info(&mut c, &Ok(info(true, false, None)));
        assert!(!changed);
        assert_eq!(c.job_started, first_start);
    }

    #[test]
    fn finished_job_skips_ahead_through_running() {
        let mut c = waiting();
        let (changed, log) =
            apply_job_info(&mut c, &Ok(info(true, true, Some(JobResult::success("done")))));
        assert!(changed);
        assert_eq!(log.as_deref(), Some("done"));
        assert_eq!(c.state, ComposeState::Finished);
        assert!(c.job_started.is_some() && c.job_finished.is_some());
        assert!(c.error.is_none());
    }

    #[test]
    fn failed_job_attaches_error() {
        let mut c = waiting();
        let result = JobResult::failure("BuildError", "osbuild failed");
        apply_job_info(&mut c, &Ok(info(true, true, Some(result))));
        assert_eq!(c.state, ComposeState::Failed);
        assert_eq!(c.error, Some(ComposeFailure::new("BuildError", "osbuild failed")));
    }

    #[test]
    fn canceled_or_lost_jobs_fail_the_compose() {
        let mut c = waiting();
        let mut i = info(false, true, None);
        i.status.canceled = true;
        apply_job_info(&mut c, &Ok(i));
        assert_eq!(c.state, ComposeState::Failed);
        assert_eq!(c.error.as_ref().map(|e| e.kind.as_str()), Some("Canceled"));

        let mut c = waiting();
        let (changed, _) = apply_job_info(&mut c, &Err(WorkerError::UnknownJob(Uuid::nil())));
        assert!(changed);
        assert_eq!(c.error.as_ref().map(|e| e.kind.as_str()), Some("JobLost"));
    }

    #[test]
    fn terminal_compose_ignores_updates() {
        let mut c = waiting();
        c.state = ComposeState::Failed;
        let done = info(true, true, Some(JobResult::success("")));
        let (changed, _) = apply_job_info(&mut c, &Ok(done));
        assert!(!changed);
        assert_eq!(c.state, ComposeState::Failed);
    }

    #[test]
    fn status_filter_ands_conditions() {
        let c = waiting();
        let filter = StatusFilter {
            blueprint: Some("demo".to_owned()),
            status: Some("WAITING".to_owned()),
            image_type: None,
        };
        assert!(filter.matches(&c));
        let filter = StatusFilter {
            image_type: Some("ami".to_owned()),
            ..filter
        };
        assert!(!filter.matches(&c));
    }

    #[test]
    fn local_upload_needs_no_settings() {
        let req = UploadRequest {
            provider: "local".to_owned(),
            image_name: "img".to_owned(),
            settings: serde_json::Value::Null,
        };
        assert_eq!(req.to_target().unwrap().options, TargetOptions::Local);
        let bad = UploadRequest {
            provider: "floppy".to_owned(),
            ..req
        };
        assert_eq!(bad.to_target().unwrap_err().id(), "ComposeError");
    }
}
