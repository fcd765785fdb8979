use crate::BlueprintError;
use std::fmt;
use std::str::FromStr;

/// A `major.minor.patch` version made of three unsigned integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl Version {
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// The next patch version, or `None` when the patch number is at its maximum.
    #[must_use]
    pub fn bump_patch(self) -> Option<Self> {
        Some(Self {
            patch: self.patch.checked_add(1)?,
            ..self
        })
    }
}

impl FromStr for Version {
    type Err = BlueprintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || BlueprintError::InvalidVersion(format!("'{s}' is not major.minor.patch"));
        let mut parts = s.split('.');
        let mut next = || -> Result<u64, BlueprintError> {
            let part = parts.next().ok_or_else(invalid)?;
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            part.parse().map_err(|_| invalid())
        };
        let version = Self::new(next()?, next()?, next()?);
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(version)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Increment the patch component of `old`. Unparsable input is returned unchanged.
pub fn bump_version(old: &str) -> Result<String, BlueprintError> {
    let Ok(v) = old.parse::<Version>() else {
        return Ok(old.to_owned());
    };
    v.bump_patch()
        .map(|next| next.to_string())
        .ok_or_else(|| BlueprintError::InvalidVersion(format!("'{old}' has no next patch version")))
}
