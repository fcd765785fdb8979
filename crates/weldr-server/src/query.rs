//! Query string parameters.

use weldr_core::{CoreError, TestMode};
use weldr_schema::OutputFormat;

const DEFAULT_LIMIT: usize = 20;

#[derive(Debug, Clone, Default)]
pub struct Query {
    pairs: Vec<(String, String)>,
}

impl Query {
    /// Parse the part of a URL after `?`. Undecodable input yields no parameters.
    pub fn parse(raw: &str) -> Self {
        Self {
            pairs: serde_urlencoded::from_str(raw).unwrap_or_default(),
        }
    }

    /// First non-empty value of `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, v)| k == name && !v.is_empty())
            .map(|(_, v)| v.as_str())
    }

    fn unsigned(&self, name: &str, default: usize) -> Result<usize, CoreError> {
        match self.get(name) {
            None => Ok(default),
            Some(v) => v.parse().map_err(|e| {
                CoreError::BadLimitOrOffset(format!("BadRequest: invalid {name} {v:?}: {e}"))
            }),
        }
    }

    pub fn offset_limit(&self) -> Result<(usize, usize), CoreError> {
        Ok((self.unsigned("offset", 0)?, self.unsigned("limit", DEFAULT_LIMIT)?))
    }

    pub fn format(&self) -> Result<OutputFormat, CoreError> {
        self.get("format")
            .unwrap_or_default()
            .parse()
            .map_err(|f| CoreError::InvalidChars(format!("invalid format parameter: {f}")))
    }

    /// `?test=1` forces a failed compose, `?test=2` a finished one.
    pub fn test_mode(&self) -> Option<TestMode> {
        match self.get("test") {
            Some("1") => Some(TestMode::Fail),
            Some("2") => Some(TestMode::Finish),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_defaults() {
        assert_eq!(Query::parse("").offset_limit().unwrap(), (0, 20));
        assert_eq!(Query::parse("offset=5&limit=2").offset_limit().unwrap(), (5, 2));
    }

    #[test]
    fn negative_limit_is_rejected() {
        let err = Query::parse("limit=-1").offset_limit().unwrap_err();
        assert_eq!(err.id(), "BadLimitOrOffset");
        assert!(err.to_string().starts_with("BadRequest: "));
        assert!(Query::parse("offset=abc").offset_limit().is_err());
    }

    #[test]
    fn format_parameter() {
        assert_eq!(Query::parse("format=toml").format().unwrap(), OutputFormat::Toml);
        assert_eq!(Query::parse("").format().unwrap(), OutputFormat::Json);
        let err = Query::parse("format=yaml").format().unwrap_err();
        assert_eq!(err.to_string(), "invalid format parameter: yaml");
    }

    #[test]
    fn values_are_percent_decoded() {
        let q = Query::parse("blueprint=http%20server&test=2");
        assert_eq!(q.get("blueprint"), Some("http server"));
        assert_eq!(q.test_mode(), Some(TestMode::Finish));
    }
}
