//! Managed runtime version strings and the "highest compatible" policy.

use crate::{ErrorKind, Result, Status};
use std::fmt;
use std::str::FromStr;

/// An installed or requested runtime version such as `v4.0.30319`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RuntimeVersion {
    pub major: u16,
    pub minor: u16,
    pub build: u32,
    pub revision: u32,
}

impl RuntimeVersion {
    pub const fn new(major: u16, minor: u16, build: u32) -> Self {
        Self {
            major,
            minor,
            build,
            revision: 0,
        }
    }

    /// Whether an assembly requesting `requested` can run on this version.
    ///
    /// Versions of the same major family run assemblies built for the same or
    /// an older version of that family.
    pub fn satisfies(&self, requested: &RuntimeVersion) -> bool {
        self.major == requested.major && self >= requested
    }
}

impl fmt::Display for RuntimeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}.{}", self.major, self.minor)?;
        if self.build != 0 || self.revision != 0 {
            write!(f, ".{}", self.build)?;
        }
        if self.revision != 0 {
            write!(f, ".{}", self.revision)?;
        }
        Ok(())
    }
}

impl FromStr for RuntimeVersion {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || {
            ErrorKind::VersionResolution
                .failure(Status::E_INVALIDARG, format!("parse runtime version '{}'", s))
        };

        let trimmed = s.trim().trim_end_matches('\0');
        let digits = trimmed
            .strip_prefix('v')
            .or_else(|| trimmed.strip_prefix('V'))
            .unwrap_or(trimmed);

        let parts: Vec<&str> = digits.split('.').collect();
        if parts.len() < 2 || parts.len() > 4 {
            return Err(invalid());
        }

        let major = parts[0].parse().map_err(|_| invalid())?;
        let minor = parts[1].parse().map_err(|_| invalid())?;
        let build = match parts.get(2) {
            Some(p) => p.parse().map_err(|_| invalid())?,
            None => 0,
        };
        let revision = match parts.get(3) {
            Some(p) => p.parse().map_err(|_| invalid())?,
            None => 0,
        };

        Ok(Self {
            major,
            minor,
            build,
            revision,
        })
    }
}

/// Pick the newest installed version that satisfies `requested`.
pub fn select_highest_compatible(
    installed: &[RuntimeVersion],
    requested: &RuntimeVersion,
) -> Option<RuntimeVersion> {
    installed
        .iter()
        .filter(|candidate| candidate.satisfies(requested))
        .max()
        .copied()
}
