use crate::response::{ApiResult, Reply};
use crate::router::Ctx;
use serde_json::json;
use weldr_core::CoreError;

fn distro_arch(ctx: &Ctx<'_>) -> Result<(String, String), CoreError> {
    let query = ctx.query();
    ctx.weldr.resolve_distro(query.get("distro"), query.get("arch"))
}

pub fn modules_list(ctx: &Ctx<'_>) -> ApiResult {
    let names = ctx.list(0);
    let (offset, limit) = ctx.query().offset_limit()?;
    let (distro, arch) = distro_arch(ctx)?;
    let page = ctx.weldr.modules_list(&distro, &arch, &names, offset, limit)?;
    Ok(Reply::json(&json!({
        "total": page.total,
        "offset": page.offset,
        "limit": page.limit,
        "modules": page.items,
    })))
}

pub fn modules_info(ctx: &Ctx<'_>) -> ApiResult {
    let names = ctx.list(0);
    let (distro, arch) = distro_arch(ctx)?;
    let modules = ctx.weldr.modules_info(&distro, &arch, &names)?;
    Ok(Reply::json(&json!({ "modules": modules })))
}

pub fn projects_list(ctx: &Ctx<'_>) -> ApiResult {
    let (offset, limit) = ctx.query().offset_limit()?;
    let (distro, arch) = distro_arch(ctx)?;
    let page = ctx.weldr.projects_list(&distro, &arch, offset, limit)?;
    Ok(Reply::json(&json!({
        "total": page.total,
        "offset": page.offset,
        "limit": page.limit,
        "projects": page.items,
    })))
}

pub fn projects_info(ctx: &Ctx<'_>) -> ApiResult {
    let names = ctx.list(0);
    let (distro, arch) = distro_arch(ctx)?;
    let projects = ctx.weldr.projects_info(&distro, &arch, &names)?;
    Ok(Reply::json(&json!({ "projects": projects })))
}

pub fn projects_depsolve(ctx: &Ctx<'_>) -> ApiResult {
    let names = ctx.list(0);
    let (distro, arch) = distro_arch(ctx)?;
    let projects = ctx.weldr.projects_depsolve(&distro, &arch, &names)?;
    Ok(Reply::json(&json!({ "projects": projects })))
}

pub fn distros_list(ctx: &Ctx<'_>) -> ApiResult {
    let distros = ctx.weldr.distros_list(ctx.query().get("arch"));
    Ok(Reply::json(&json!({ "distros": distros })))
}
