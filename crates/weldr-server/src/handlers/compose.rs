use super::epoch_seconds;
use crate::response::{ApiResult, Reply, JSON_MIME};
use crate::router::Ctx;
use serde::Serialize;
use serde_json::json;
use std::fs::File;
use uuid::Uuid;
use weldr_core::{ComposeRequest, CoreError, ErrorEntry, StatusFilter};
use weldr_schema::{is_valid_name, Blueprint, PackageSpec};
use weldr_store::{Compose, Target};

#[derive(Serialize)]
struct UploadView<'a> {
    uuid: Uuid,
    status: &'static str,
    provider_name: &'static str,
    image_name: &'a str,
    creation_time: f64,
    settings: serde_json::Value,
}

impl<'a> UploadView<'a> {
    fn new(target: &'a Target) -> Self {
        Self {
            uuid: target.uuid,
            status: target.status.as_str(),
            provider_name: target.options.provider_name(),
            image_name: &target.image_name,
            creation_time: epoch_seconds(target.created),
            settings: target.options.public_settings(),
        }
    }
}

fn uploads(c: &Compose, v1: bool) -> Option<Vec<UploadView<'_>>> {
    (v1 && !c.targets.is_empty()).then(|| c.targets.iter().map(UploadView::new).collect())
}

#[derive(Serialize)]
struct ComposeEntry<'a> {
    id: Uuid,
    blueprint: &'a str,
    version: &'a str,
    compose_type: &'a str,
    image_size: u64,
    queue_status: &'static str,
    job_created: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    job_started: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    job_finished: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    uploads: Option<Vec<UploadView<'a>>>,
}

impl<'a> ComposeEntry<'a> {
    fn new(c: &'a Compose, v1: bool) -> Self {
        Self {
            id: c.id,
            blueprint: &c.blueprint.name,
            version: &c.blueprint.version,
            compose_type: &c.image_type,
            image_size: c.image_size,
            queue_status: c.state.as_str(),
            job_created: epoch_seconds(c.job_created),
            job_started: c.job_started.map(epoch_seconds),
            job_finished: c.job_finished.map(epoch_seconds),
            uploads: uploads(c, v1),
        }
    }
}

fn entries(composes: &[Compose], v1: bool) -> Vec<ComposeEntry<'_>> {
    composes.iter().map(|c| ComposeEntry::new(c, v1)).collect()
}

#[derive(Serialize)]
struct Deps<'a> {
    packages: Vec<&'a PackageSpec>,
}

#[derive(Serialize)]
struct ComposeInfo<'a> {
    id: Uuid,
    config: &'static str,
    blueprint: &'a Blueprint,
    commit: &'static str,
    deps: Deps<'a>,
    compose_type: &'a str,
    queue_status: &'static str,
    image_size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    uploads: Option<Vec<UploadView<'a>>>,
}

pub fn submit(ctx: &Ctx<'_>) -> ApiResult {
    let is_json = ctx.req.content_type.as_deref().is_some_and(|ct| {
        ct.split(';')
            .next()
            .is_some_and(|m| m.trim().eq_ignore_ascii_case(JSON_MIME))
    });
    if !is_json {
        return Err(Reply::error(
            400,
            ErrorEntry::new("MissingPost", "blueprint must be json"),
        ));
    }
    let request: ComposeRequest =
        serde_json::from_slice(&ctx.req.body).map_err(|_| Reply::not_found())?;
    let id = ctx
        .weldr
        .submit_compose(&request, ctx.query().test_mode(), ctx.v1())?;
    Ok(Reply::json(&json!({
        "build_id": id,
        "status": true,
        "warnings": [],
    })))
}

pub fn types(ctx: &Ctx<'_>) -> ApiResult {
    let query = ctx.query();
    let names = ctx
        .weldr
        .compose_types(query.get("distro"), query.get("arch"))?;
    let types: Vec<_> = names
        .into_iter()
        .map(|name| json!({ "name": name, "enabled": true }))
        .collect();
    Ok(Reply::json(&json!({ "types": types })))
}

pub fn queue(ctx: &Ctx<'_>) -> ApiResult {
    let (new, run) = ctx.weldr.composes().queue();
    Ok(Reply::json(&json!({
        "new": entries(&new, ctx.v1()),
        "run": entries(&run, ctx.v1()),
    })))
}

pub fn finished(ctx: &Ctx<'_>) -> ApiResult {
    let finished = ctx.weldr.composes().finished();
    Ok(Reply::json(&json!({ "finished": entries(&finished, ctx.v1()) })))
}

pub fn failed(ctx: &Ctx<'_>) -> ApiResult {
    let failed = ctx.weldr.composes().failed();
    Ok(Reply::json(&json!({ "failed": entries(&failed, ctx.v1()) })))
}

pub fn status(ctx: &Ctx<'_>) -> ApiResult {
    let uuids = ctx.list(0);
    let query = ctx.query();
    if query.get("blueprint").is_some_and(|b| !is_valid_name(b)) {
        return Err(CoreError::InvalidChars("Invalid characters in API path".to_owned()).into());
    }
    let filter = StatusFilter {
        blueprint: query.get("blueprint").map(str::to_owned),
        status: query.get("status").map(str::to_owned),
        image_type: query.get("type").map(str::to_owned),
    };
    let composes = ctx.weldr.composes().status(&uuids, &filter)?;
    Ok(Reply::json(&json!({ "uuids": entries(&composes, ctx.v1()) })))
}

pub fn info(ctx: &Ctx<'_>) -> ApiResult {
    let c = ctx.weldr.composes().get(ctx.param(0))?;
    let mut packages: Vec<&PackageSpec> = c.packages.iter().collect();
    packages.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(Reply::json(&ComposeInfo {
        id: c.id,
        config: "",
        blueprint: &c.blueprint,
        commit: "",
        deps: Deps { packages },
        compose_type: &c.image_type,
        queue_status: c.state.as_str(),
        image_size: c.image_size,
        uploads: uploads(&c, ctx.v1()),
    }))
}

pub fn image(ctx: &Ctx<'_>) -> ApiResult {
    let artifact = ctx.weldr.composes().image(ctx.param(0))?;
    let file = File::open(&artifact.path).map_err(|e| {
        CoreError::Internal(format!("failed to open {}: {e}", artifact.path.display()))
    })?;
    Ok(Reply::file(file, &artifact.mime_type, artifact.download_name))
}

pub fn logs(ctx: &Ctx<'_>) -> ApiResult {
    let (id, data) = ctx.weldr.composes().logs_tar(ctx.param(0))?;
    Ok(Reply::tar(data, format!("{id}-logs.tar")))
}

pub fn metadata(ctx: &Ctx<'_>) -> ApiResult {
    let (id, data) = ctx.weldr.composes().metadata_tar(ctx.param(0))?;
    Ok(Reply::tar(data, format!("{id}-metadata.tar")))
}

pub fn results(ctx: &Ctx<'_>) -> ApiResult {
    let (id, data) = ctx.weldr.composes().results_tar(ctx.param(0))?;
    Ok(Reply::tar(data, format!("{id}.tar")))
}

/// A compose that has not started reports `BuildInWrongState` with a 200.
pub fn log(ctx: &Ctx<'_>) -> ApiResult {
    match ctx.weldr.composes().log(ctx.param(0)) {
        Ok(text) => Ok(Reply::text(text)),
        Err(e @ CoreError::BuildInWrongState(_)) => Err(Reply::error(200, ErrorEntry::from(&e))),
        Err(e) => Err(e.into()),
    }
}

pub fn cancel(ctx: &Ctx<'_>) -> ApiResult {
    let id = ctx.weldr.cancel_compose(ctx.param(0))?;
    Ok(Reply::json(&json!({ "uuid": id, "status": true })))
}

pub fn delete(ctx: &Ctx<'_>) -> ApiResult {
    let uuids = ctx.list(0);
    let (deleted, errors) = ctx.weldr.delete_composes(&uuids);
    let uuids: Vec<_> = deleted
        .into_iter()
        .map(|uuid| json!({ "uuid": uuid, "status": true }))
        .collect();
    Ok(Reply::json(&json!({ "uuids": uuids, "errors": errors })))
}
