//! Request body decoding and response encoding for blueprints and sources.

use crate::blueprint::Blueprint;
use crate::BlueprintError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::str::FromStr;

pub const JSON_CONTENT_TYPE: &str = "application/json";
pub const TOML_CONTENT_TYPE: &str = "text/x-toml";

/// Format of a request body, chosen by its `Content-Type` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFormat {
    Json,
    Toml,
}

impl BodyFormat {
    /// Map a `Content-Type` value to a format. Parameters such as
    /// `; charset=utf-8` are ignored.
    pub fn from_content_type(content_type: &str) -> Result<Self, BlueprintError> {
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match mime.as_str() {
            JSON_CONTENT_TYPE => Ok(Self::Json),
            TOML_CONTENT_TYPE => Ok(Self::Toml),
            _ => Err(BlueprintError::UnsupportedFormat(content_type.to_owned())),
        }
    }
}

/// The `format` query parameter of the blueprint info route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Json,
    Toml,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "json" => Ok(Self::Json),
            "toml" => Ok(Self::Toml),
            other => Err(other.to_owned()),
        }
    }
}

pub fn decode<T: DeserializeOwned>(format: BodyFormat, body: &str) -> Result<T, BlueprintError> {
    match format {
        BodyFormat::Json => Ok(serde_json::from_str(body)?),
        BodyFormat::Toml => Ok(toml::from_str(body)?),
    }
}

pub fn parse_json(body: &str) -> Result<Blueprint, BlueprintError> {
    decode(BodyFormat::Json, body)
}

pub fn parse_toml(body: &str) -> Result<Blueprint, BlueprintError> {
    decode(BodyFormat::Toml, body)
}

/// Encode any serializable value as TOML.
pub fn to_toml<T: Serialize>(value: &T) -> Result<String, BlueprintError> {
    Ok(toml::to_string(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOML_BP: &str = r#"
name = "http-server"
description = "An example http server"
version = "0.0.1"

[[packages]]
name = "tmux"
version = "*"

[[modules]]
name = "httpd"
version = "2.4.*"

[customizations]
hostname = "web"
"#;

    #[test]
    fn content_type_parameters_are_ignored() {
        assert_eq!(
            BodyFormat::from_content_type("application/json; charset=utf-8").unwrap(),
            BodyFormat::Json
        );
        assert_eq!(
            BodyFormat::from_content_type("text/x-toml").unwrap(),
            BodyFormat::Toml
        );
        let err = BodyFormat::from_content_type("text/plain").unwrap_err();
        assert_eq!(err.to_string(), "blueprint must be in json or toml format");
    }

    #[test]
    fn toml_blueprint_decodes() {
        let bp = parse_toml(TOML_BP).unwrap();
        assert_eq!(bp.name, "http-server");
        assert_eq!(bp.packages[0].name, "tmux");
        assert_eq!(bp.modules[0].version, "2.4.*");
        assert_eq!(
            bp.customizations.unwrap().hostname.as_deref(),
            Some("web")
        );
    }

    #[test]
    fn toml_encoding_reads_back() {
        let bp = parse_toml(TOML_BP).unwrap();
        let text = to_toml(&bp).unwrap();
        assert!(text.contains("name = \"http-server\""), "{text}");
        assert_eq!(parse_toml(&text).unwrap(), bp);
    }

    #[test]
    fn malformed_json_reports_parser_error() {
        let err = parse_json("{\"name\":").unwrap_err();
        assert!(matches!(err, BlueprintError::ParseJson(_)));
    }

    #[test]
    fn output_format_parses() {
        assert_eq!("toml".parse::<OutputFormat>(), Ok(OutputFormat::Toml));
        assert_eq!("".parse::<OutputFormat>(), Ok(OutputFormat::Json));
        assert!("yaml".parse::<OutputFormat>().is_err());
    }
}
