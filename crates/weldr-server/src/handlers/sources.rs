use crate::response::{ApiResult, Reply};
use crate::router::Ctx;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use weldr_core::{CoreError, ErrorEntry};
use weldr_schema::codec::to_toml;
use weldr_schema::{
    is_valid_name, BlueprintError, OutputFormat, SourceConfig, SourceConfigV0, SourceConfigV1,
};

fn body_error(e: &BlueprintError) -> CoreError {
    match e {
        BlueprintError::MissingField(_) => CoreError::Projects(e.to_string()),
        _ => CoreError::Projects(format!("Problem parsing POST body: {e}")),
    }
}

fn encode<T: Serialize>(
    sources: &BTreeMap<String, T>,
    format: OutputFormat,
    errors: Vec<ErrorEntry>,
) -> ApiResult {
    match format {
        OutputFormat::Toml if !errors.is_empty() => Err(Reply::errors(400, errors)),
        OutputFormat::Toml => Ok(Reply::toml(to_toml(sources).map_err(CoreError::from)?)),
        OutputFormat::Json => Ok(Reply::json(&json!({ "sources": sources, "errors": errors }))),
    }
}

pub fn list(ctx: &Ctx<'_>) -> ApiResult {
    Ok(Reply::json(&json!({ "sources": ctx.weldr.source_list(ctx.v1()) })))
}

pub fn info(ctx: &Ctx<'_>) -> ApiResult {
    let ids = ctx.list(0);
    if ids.is_empty() {
        return Err(Reply::not_found());
    }
    if !ids.iter().all(|id| id == "*" || is_valid_name(id)) {
        return Err(CoreError::InvalidChars("Invalid characters in API path".to_owned()).into());
    }
    let format = ctx.query().format()?;
    let (found, errors) = ctx.weldr.source_info(&ids);
    if ctx.v1() {
        let sources: BTreeMap<String, SourceConfigV1> = found
            .iter()
            .map(|(id, s)| (id.clone(), SourceConfigV1::from_config(id, s)))
            .collect();
        encode(&sources, format, errors)
    } else {
        let sources: BTreeMap<String, SourceConfigV0> = found
            .iter()
            .map(|(id, s)| (id.clone(), SourceConfigV0::from_config(s)))
            .collect();
        encode(&sources, format, errors)
    }
}

/// v1 bodies carry an `id`; v0 sources are keyed by their name.
pub fn new(ctx: &Ctx<'_>) -> ApiResult {
    let (format, text) = ctx.body(CoreError::Projects, "Missing source")?;
    let (id, source): (String, SourceConfig) = if ctx.v1() {
        let v1 = SourceConfigV1::decode(format, &text).map_err(|e| body_error(&e))?;
        (v1.id.clone(), v1.into())
    } else {
        let v0 = SourceConfigV0::decode(format, &text).map_err(|e| body_error(&e))?;
        (v0.name.clone(), v0.into())
    };
    ctx.weldr.source_new(&id, source)?;
    Ok(Reply::ok())
}

pub fn delete(ctx: &Ctx<'_>) -> ApiResult {
    ctx.weldr.source_delete(ctx.name(0)?, ctx.v1())?;
    Ok(Reply::ok())
}
