//! Newtype wrappers for string identifiers.
//!
//! All newtypes serialize/deserialize as plain strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

macro_rules! string_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

string_newtype!(
    /// Content-derived identifier of a blueprint change-log entry.
    CommitId
);

string_newtype!(
    /// Short identifier of a repository source (the v1 API key).
    SourceId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_id_display_and_deref() {
        let id = CommitId::new("a1b2c3");
        assert_eq!(id.to_string(), "a1b2c3");
        assert_eq!(&*id, "a1b2c3");
        assert_eq!(id, "a1b2c3");
    }

    #[test]
    fn source_id_serializes_as_plain_string() {
        let id = SourceId::from("fedora");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"fedora\"");
        let back: SourceId = serde_json::from_str("\"fedora\"").unwrap();
        assert_eq!(back, id);
    }
}
