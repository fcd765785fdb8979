use crate::BlueprintError;
use regex::Regex;

/// Shell-style pattern: `*` matches any run of characters, `?` a single one.
#[derive(Debug, Clone)]
pub struct Glob {
    pattern: String,
    regex: Regex,
}

impl Glob {
    pub fn new(pattern: &str) -> Result<Self, BlueprintError> {
        let mut expr = String::with_capacity(pattern.len() + 8);
        expr.push('^');
        for c in pattern.chars() {
            match c {
                '*' => expr.push_str(".*"),
                '?' => expr.push('.'),
                other => expr.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
            }
        }
        expr.push('$');
        let regex = Regex::new(&expr).map_err(|e| BlueprintError::InvalidGlob {
            pattern: pattern.to_owned(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            pattern: pattern.to_owned(),
            regex,
        })
    }

    pub fn matches(&self, candidate: &str) -> bool {
        self.regex.is_match(candidate)
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }
}

pub fn has_glob_chars(s: &str) -> bool {
    s.contains(['*', '?'])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn star_and_question_mark() {
        let g = Glob::new("tmu*").unwrap();
        assert!(g.matches("tmux"));
        assert!(g.matches("tmu"));
        assert!(!g.matches("xtmux"));
        let q = Glob::new("1.?.3").unwrap();
        assert!(q.matches("1.2.3"));
        assert!(!q.matches("1.22.3"));
    }

    #[test]
    fn regex_metacharacters_are_literal() {
        let g = Glob::new("lib+.so").unwrap();
        assert!(g.matches("lib+.so"));
        assert!(!g.matches("libb.so"));
        assert!(has_glob_chars("a*"));
        assert!(!has_glob_chars("a.b"));
    }
}
