use crate::response::{ApiResult, Reply};
use crate::router::Ctx;
use serde::Serialize;
use serde_json::json;
use weldr_core::CoreError;
use weldr_schema::codec::{decode, to_toml};
use weldr_schema::{Blueprint, OutputFormat, PackageSpec};

const TOML_ONE_BLUEPRINT: &str = "toml format only supported when requesting one blueprint";

#[derive(Serialize)]
struct ChangedFlag<'a> {
    name: &'a str,
    changed: bool,
}

#[derive(Serialize)]
struct Solved<'a> {
    blueprint: &'a Blueprint,
    dependencies: &'a [PackageSpec],
}

#[derive(Serialize)]
struct Frozen<'a> {
    blueprint: &'a Blueprint,
}

fn toml_reply(bp: &Blueprint) -> ApiResult {
    Ok(Reply::toml(to_toml(bp).map_err(CoreError::from)?))
}

fn decode_blueprint(ctx: &Ctx<'_>) -> Result<Blueprint, CoreError> {
    let (format, text) = ctx.body(CoreError::Blueprints, "Missing blueprint")?;
    Ok(decode(format, &text)?)
}

pub fn list(ctx: &Ctx<'_>) -> ApiResult {
    let (offset, limit) = ctx.query().offset_limit()?;
    let page = ctx.weldr.list_blueprints(offset, limit);
    Ok(Reply::json(&json!({
        "total": page.total,
        "offset": page.offset,
        "limit": page.limit,
        "blueprints": page.items,
    })))
}

pub fn info(ctx: &Ctx<'_>) -> ApiResult {
    let names = ctx.names(0)?;
    let format = ctx.query().format()?;
    if format == OutputFormat::Toml && names.len() > 1 {
        return Err(Reply::http_error(400, TOML_ONE_BLUEPRINT));
    }
    let (found, errors) = ctx.weldr.blueprint_info(&names);
    if format == OutputFormat::Toml {
        return match found.first() {
            Some((bp, _)) => toml_reply(bp),
            None => Err(Reply::errors(400, errors)),
        };
    }
    let blueprints: Vec<&Blueprint> = found.iter().map(|(bp, _)| bp).collect();
    let changes: Vec<ChangedFlag<'_>> = found
        .iter()
        .map(|(bp, changed)| ChangedFlag {
            name: &bp.name,
            changed: *changed,
        })
        .collect();
    Ok(Reply::json(&json!({
        "blueprints": blueprints,
        "changes": changes,
        "errors": errors,
    })))
}

pub fn new(ctx: &Ctx<'_>) -> ApiResult {
    let bp = decode_blueprint(ctx)?;
    ctx.weldr.push_blueprint(bp)?;
    Ok(Reply::ok())
}

pub fn workspace(ctx: &Ctx<'_>) -> ApiResult {
    let bp = decode_blueprint(ctx)?;
    ctx.weldr.push_workspace(bp)?;
    Ok(Reply::ok())
}

pub fn delete(ctx: &Ctx<'_>) -> ApiResult {
    ctx.weldr.delete_blueprint(ctx.name(0)?)?;
    Ok(Reply::ok())
}

pub fn delete_workspace(ctx: &Ctx<'_>) -> ApiResult {
    ctx.weldr.delete_workspace(ctx.name(0)?)?;
    Ok(Reply::ok())
}

pub fn changes(ctx: &Ctx<'_>) -> ApiResult {
    let names = ctx.names(0)?;
    let (offset, limit) = ctx.query().offset_limit()?;
    let page = ctx.weldr.blueprint_changes(&names, offset, limit);
    Ok(Reply::json(&json!({
        "blueprints": page.blueprints,
        "errors": page.errors,
        "offset": page.offset,
        "limit": page.limit,
    })))
}

pub fn change(ctx: &Ctx<'_>) -> ApiResult {
    let name = ctx.name(0)?;
    let commit = ctx.name(1)?;
    let format = ctx.query().format()?;
    let change = ctx.weldr.blueprint_change(name, commit)?;
    match format {
        OutputFormat::Toml => toml_reply(&change.blueprint),
        OutputFormat::Json => Ok(Reply::json(&change.blueprint)),
    }
}

pub fn undo(ctx: &Ctx<'_>) -> ApiResult {
    let name = ctx.name(0)?;
    let commit = ctx.name(1)?;
    ctx.weldr.undo_blueprint(name, commit)?;
    Ok(Reply::ok())
}

pub fn tag(ctx: &Ctx<'_>) -> ApiResult {
    ctx.weldr.tag_blueprint(ctx.name(0)?)?;
    Ok(Reply::ok())
}

pub fn depsolve(ctx: &Ctx<'_>) -> ApiResult {
    let names = ctx.names(0)?;
    let (solved, errors) = ctx.weldr.depsolve_blueprints(&names)?;
    let blueprints: Vec<Solved<'_>> = solved
        .iter()
        .map(|(blueprint, deps)| Solved {
            blueprint,
            dependencies: deps,
        })
        .collect();
    Ok(Reply::json(&json!({
        "blueprints": blueprints,
        "errors": errors,
    })))
}

pub fn freeze(ctx: &Ctx<'_>) -> ApiResult {
    let names = ctx.names(0)?;
    let format = ctx.query().format()?;
    if format == OutputFormat::Toml && names.len() > 1 {
        return Err(Reply::http_error(400, TOML_ONE_BLUEPRINT));
    }
    let (frozen, errors) = ctx.weldr.freeze_blueprints(&names)?;
    if format == OutputFormat::Toml {
        return match frozen.first() {
            Some(bp) => toml_reply(bp),
            None => Err(Reply::errors(400, errors)),
        };
    }
    let blueprints: Vec<Frozen<'_>> = frozen.iter().map(|blueprint| Frozen { blueprint }).collect();
    Ok(Reply::json(&json!({
        "blueprints": blueprints,
        "errors": errors,
    })))
}

pub fn diff(ctx: &Ctx<'_>) -> ApiResult {
    let name = ctx.name(0)?;
    let from = ctx.name(1)?;
    let to = ctx.name(2)?;
    let diff = ctx.weldr.diff_blueprint(name, from, to)?;
    Ok(Reply::json(&json!({ "diff": diff })))
}
