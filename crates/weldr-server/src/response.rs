//! Replies produced by handlers and their conversion to HTTP responses.

use serde::Serialize;
use serde_json::json;
use std::fs::File;
use std::io::Cursor;
use tiny_http::{Header, Response, StatusCode};
use tracing::error;
use weldr_core::{CoreError, ErrorEntry};

pub const JSON: &str = "application/json; charset=utf-8";
/// Bare media type, for matching request bodies.
pub const JSON_MIME: &str = "application/json";
pub const TOML: &str = "text/x-toml";
pub const TEXT: &str = "text/plain; charset=utf-8";
pub const TAR: &str = "application/x-tar";

/// Handlers return the reply on both arms so `?` can short-circuit with an
/// error reply.
pub type ApiResult = Result<Reply, Reply>;

pub enum Body {
    Bytes(Vec<u8>),
    File(File),
    Empty,
}

pub struct Reply {
    pub status: u16,
    pub content_type: Option<String>,
    pub attachment: Option<String>,
    pub body: Body,
}

impl Reply {
    fn new(status: u16, content_type: &str, body: Vec<u8>) -> Self {
        Self {
            status,
            content_type: Some(content_type.to_owned()),
            attachment: None,
            body: Body::Bytes(body),
        }
    }

    pub fn json<T: Serialize>(value: &T) -> Self {
        Self::json_status(200, value)
    }

    pub fn json_status<T: Serialize>(status: u16, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self::new(status, JSON, body),
            Err(e) => {
                error!("failed to encode response: {e}");
                Self::errors(500, vec![ErrorEntry::new("InternalError", e.to_string())])
            }
        }
    }

    /// `{"status": true}`
    pub fn ok() -> Self {
        Self::json(&json!({ "status": true }))
    }

    pub fn toml(text: String) -> Self {
        Self::new(200, TOML, text.into_bytes())
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new(200, TEXT, text.into().into_bytes())
    }

    pub fn tar(data: Vec<u8>, filename: String) -> Self {
        Self::new(200, TAR, data).with_attachment(filename)
    }

    pub fn file(file: File, mime_type: &str, filename: String) -> Self {
        Self {
            status: 200,
            content_type: Some(mime_type.to_owned()),
            attachment: Some(filename),
            body: Body::File(file),
        }
    }

    #[must_use]
    pub fn with_attachment(mut self, filename: String) -> Self {
        self.attachment = Some(filename);
        self
    }

    pub fn errors(status: u16, errors: Vec<ErrorEntry>) -> Self {
        Self::json_status(status, &json!({ "status": false, "errors": errors }))
    }

    pub fn error(status: u16, entry: ErrorEntry) -> Self {
        Self::errors(status, vec![entry])
    }

    /// An `HTTPError` entry carrying the status code.
    pub fn http_error(code: u16, msg: &str) -> Self {
        Self::error(code, ErrorEntry::http(code, msg))
    }

    pub fn not_found() -> Self {
        Self::http_error(404, "Not Found")
    }

    pub fn method_not_allowed() -> Self {
        Self {
            status: 405,
            content_type: None,
            attachment: None,
            body: Body::Empty,
        }
    }

    pub fn into_response(self) -> Response<Box<dyn std::io::Read + Send>> {
        let mut headers = Vec::new();
        if let Some(ct) = &self.content_type {
            if let Ok(h) = Header::from_bytes("Content-Type", ct.as_bytes()) {
                headers.push(h);
            }
        }
        if let Some(name) = &self.attachment {
            let value = format!("attachment; filename={name}");
            if let Ok(h) = Header::from_bytes("Content-Disposition", value.as_bytes()) {
                headers.push(h);
            }
        }
        let (reader, length): (Box<dyn std::io::Read + Send>, Option<usize>) = match self.body {
            Body::Bytes(data) => {
                let len = data.len();
                (Box::new(Cursor::new(data)), Some(len))
            }
            Body::File(file) => {
                let len = file.metadata().ok().map(|m| m.len() as usize);
                (Box::new(file), len)
            }
            Body::Empty => (Box::new(std::io::empty()), Some(0)),
        };
        Response::new(StatusCode(self.status), headers, reader, length, None)
    }
}

impl From<CoreError> for Reply {
    fn from(e: CoreError) -> Self {
        Self::error(e.status_code(), ErrorEntry::from(&e))
    }
}

impl From<&CoreError> for Reply {
    fn from(e: &CoreError) -> Self {
        Self::error(e.status_code(), ErrorEntry::from(e))
    }
}
