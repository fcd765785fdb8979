use crate::response::Reply;
use serde::Serialize;

pub const API_VERSION: &str = "1";
pub const BACKEND: &str = "osbuild-composer";

#[derive(Debug, Serialize)]
struct Status {
    api: &'static str,
    db_supported: bool,
    db_version: &'static str,
    schema_version: &'static str,
    backend: &'static str,
    build: &'static str,
    msgs: Vec<String>,
}

pub fn status() -> Reply {
    Reply::json(&Status {
        api: API_VERSION,
        db_supported: true,
        db_version: "0",
        schema_version: "0",
        backend: BACKEND,
        build: env!("CARGO_PKG_VERSION"),
        msgs: Vec::new(),
    })
}
