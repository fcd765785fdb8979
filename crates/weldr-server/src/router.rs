//! Route table and dispatch.
//!
//! Paths are `/api/status` or `/api/v{0,1}/<route>`. Each route pattern is a
//! list of literal segments and `:param` placeholders; a placeholder matches
//! one non-empty, percent-decoded segment. A path that matches a pattern
//! under the wrong method gets 405, a path that matches nothing gets 404.

use crate::handlers::{blueprints, compose, projects, sources, status};
use crate::query::Query;
use crate::response::{ApiResult, Reply};
use percent_encoding::percent_decode_str;
use tiny_http::Method;
use weldr_core::{CoreError, Weldr};
use weldr_schema::{is_valid_name, BodyFormat};

const MAX_API_VERSION: u8 = 1;

/// A request with its body already read.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Query,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl ApiRequest {
    pub fn new(method: Method, url: &str) -> Self {
        let (path, query) = url.split_once('?').unwrap_or((url, ""));
        Self {
            method,
            path: path.to_owned(),
            query: Query::parse(query),
            content_type: None,
            body: Vec::new(),
        }
    }
}

/// Everything a handler needs.
pub struct Ctx<'a> {
    pub weldr: &'a Weldr,
    pub req: &'a ApiRequest,
    pub version: u8,
    pub params: Vec<String>,
}

impl Ctx<'_> {
    pub fn v1(&self) -> bool {
        self.version >= 1
    }

    pub fn query(&self) -> &Query {
        &self.req.query
    }

    pub fn param(&self, i: usize) -> &str {
        self.params.get(i).map_or("", String::as_str)
    }

    /// A single entity name from the path, screened against the name rule.
    pub fn name(&self, i: usize) -> Result<&str, Reply> {
        let name = self.param(i);
        if is_valid_name(name) {
            Ok(name)
        } else {
            Err(invalid_path())
        }
    }

    /// A comma separated batch of names, each screened.
    pub fn names(&self, i: usize) -> Result<Vec<String>, Reply> {
        let names: Vec<String> = self
            .param(i)
            .split(',')
            .filter(|n| !n.is_empty())
            .map(str::to_owned)
            .collect();
        if names.is_empty() {
            return Err(Reply::not_found());
        }
        if names.iter().all(|n| is_valid_name(n)) {
            Ok(names)
        } else {
            Err(invalid_path())
        }
    }

    /// A comma separated batch taken as-is (package globs, uuids).
    pub fn list(&self, i: usize) -> Vec<String> {
        self.param(i)
            .split(',')
            .filter(|n| !n.is_empty())
            .map(str::to_owned)
            .collect()
    }

    /// The body format and text; `family` builds the error for a missing
    /// header, an empty body, or an unsupported type.
    pub fn body(
        &self,
        family: fn(String) -> CoreError,
        missing: &str,
    ) -> Result<(BodyFormat, String), CoreError> {
        let Some(content_type) = &self.req.content_type else {
            return Err(family("missing Content-Type header".to_owned()));
        };
        if self.req.body.is_empty() {
            return Err(family(missing.to_owned()));
        }
        let format =
            BodyFormat::from_content_type(content_type).map_err(|e| family(e.to_string()))?;
        let text = String::from_utf8_lossy(&self.req.body).into_owned();
        Ok((format, text))
    }
}

fn invalid_path() -> Reply {
    Reply::from(CoreError::InvalidChars("Invalid characters in API path".to_owned()))
}

type Handler = fn(&Ctx<'_>) -> ApiResult;

struct Route {
    method: Method,
    pattern: &'static [&'static str],
    min_version: u8,
    handler: Handler,
}

const fn route(method: Method, pattern: &'static [&'static str], handler: Handler) -> Route {
    Route {
        method,
        pattern,
        min_version: 0,
        handler,
    }
}

const fn v1_route(method: Method, pattern: &'static [&'static str], handler: Handler) -> Route {
    Route {
        method,
        pattern,
        min_version: 1,
        handler,
    }
}

static ROUTES: &[Route] = &[
    route(Method::Get, &["blueprints", "list"], blueprints::list),
    route(Method::Get, &["blueprints", "info", ":names"], blueprints::info),
    route(Method::Post, &["blueprints", "new"], blueprints::new),
    route(Method::Post, &["blueprints", "workspace"], blueprints::workspace),
    route(Method::Delete, &["blueprints", "delete", ":name"], blueprints::delete),
    route(Method::Delete, &["blueprints", "workspace", ":name"], blueprints::delete_workspace),
    route(Method::Get, &["blueprints", "changes", ":names"], blueprints::changes),
    v1_route(Method::Get, &["blueprints", "change", ":name", ":commit"], blueprints::change),
    route(Method::Post, &["blueprints", "undo", ":name", ":commit"], blueprints::undo),
    route(Method::Post, &["blueprints", "tag", ":name"], blueprints::tag),
    route(Method::Get, &["blueprints", "depsolve", ":names"], blueprints::depsolve),
    route(Method::Get, &["blueprints", "freeze", ":names"], blueprints::freeze),
    route(Method::Get, &["blueprints", "diff", ":name", ":from", ":to"], blueprints::diff),
    route(Method::Get, &["modules", "list"], projects::modules_list),
    route(Method::Get, &["modules", "list", ":names"], projects::modules_list),
    route(Method::Get, &["modules", "info", ":names"], projects::modules_info),
    route(Method::Get, &["projects", "list"], projects::projects_list),
    route(Method::Get, &["projects", "info", ":names"], projects::projects_info),
    route(Method::Get, &["projects", "depsolve", ":names"], projects::projects_depsolve),
    route(Method::Get, &["projects", "source", "list"], sources::list),
    route(Method::Get, &["projects", "source", "info", ":ids"], sources::info),
    route(Method::Post, &["projects", "source", "new"], sources::new),
    route(Method::Delete, &["projects", "source", "delete", ":id"], sources::delete),
    route(Method::Post, &["compose"], compose::submit),
    route(Method::Get, &["compose", "types"], compose::types),
    route(Method::Get, &["compose", "queue"], compose::queue),
    route(Method::Get, &["compose", "finished"], compose::finished),
    route(Method::Get, &["compose", "failed"], compose::failed),
    route(Method::Get, &["compose", "status", ":uuids"], compose::status),
    route(Method::Get, &["compose", "info", ":uuid"], compose::info),
    route(Method::Get, &["compose", "image", ":uuid"], compose::image),
    route(Method::Get, &["compose", "logs", ":uuid"], compose::logs),
    route(Method::Get, &["compose", "log", ":uuid"], compose::log),
    route(Method::Get, &["compose", "metadata", ":uuid"], compose::metadata),
    route(Method::Get, &["compose", "results", ":uuid"], compose::results),
    route(Method::Delete, &["compose", "cancel", ":uuid"], compose::cancel),
    route(Method::Delete, &["compose", "delete", ":uuids"], compose::delete),
    v1_route(Method::Get, &["distros", "list"], projects::distros_list),
];

/// Split `/api/v<n>/rest` into the version and decoded segments.
fn split_versioned(path: &str) -> Option<(u8, Vec<String>)> {
    let rest = path.strip_prefix("/api/v")?;
    let (version, rest) = rest.split_once('/')?;
    let version: u8 = version.parse().ok()?;
    if version > MAX_API_VERSION {
        return None;
    }
    let rest = rest.strip_suffix('/').unwrap_or(rest);
    let segments = rest
        .split('/')
        .map(|s| percent_decode_str(s).decode_utf8_lossy().into_owned())
        .collect();
    Some((version, segments))
}

fn matches(pattern: &[&str], segments: &[String]) -> Option<Vec<String>> {
    if pattern.len() != segments.len() {
        return None;
    }
    let mut params = Vec::new();
    for (p, s) in pattern.iter().zip(segments) {
        if p.starts_with(':') {
            if s.is_empty() {
                return None;
            }
            params.push(s.clone());
        } else if p != s {
            return None;
        }
    }
    Some(params)
}

/// Dispatch one request to its handler.
pub fn route_request(weldr: &Weldr, req: &ApiRequest) -> Reply {
    if req.path == "/api/status" || req.path == "/api/status/" {
        return if req.method == Method::Get {
            status::status()
        } else {
            Reply::method_not_allowed()
        };
    }
    let Some((version, segments)) = split_versioned(&req.path) else {
        return Reply::not_found();
    };

    let mut path_matched = false;
    for r in ROUTES {
        if version < r.min_version {
            continue;
        }
        let Some(params) = matches(r.pattern, &segments) else {
            continue;
        };
        if r.method != req.method {
            path_matched = true;
            continue;
        }
        let ctx = Ctx {
            weldr,
            req,
            version,
            params,
        };
        return match (r.handler)(&ctx) {
            Ok(reply) | Err(reply) => reply,
        };
    }
    if path_matched {
        Reply::method_not_allowed()
    } else {
        Reply::not_found()
    }
}
