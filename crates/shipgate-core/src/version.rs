use crate::error::{Result, ShipgateError};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// IncrementKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncrementKind {
    Major,
    Minor,
    Patch,
}

impl IncrementKind {
    pub fn as_str(self) -> &'static str {
        match self {
            IncrementKind::Major => "major",
            IncrementKind::Minor => "minor",
            IncrementKind::Patch => "patch",
        }
    }
}

impl fmt::Display for IncrementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for IncrementKind {
    type Err = ShipgateError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "major" => Ok(IncrementKind::Major),
            "minor" => Ok(IncrementKind::Minor),
            "patch" => Ok(IncrementKind::Patch),
            _ => Err(ShipgateError::InvalidIncrement(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// VersionIncrementer
// ---------------------------------------------------------------------------

/// Collaborator computing the next release version from the current one.
pub trait VersionIncrementer {
    fn next_version(&self, current: &str, kind: IncrementKind) -> Result<String>;
    fn validate(&self, version: &str, allow_prerelease: bool) -> Result<()>;
}

// ---------------------------------------------------------------------------
// SemverIncrementer
// ---------------------------------------------------------------------------

/// Default incrementer over `MAJOR.MINOR.PATCH` versions with an optional
/// leading `v` and an optional `-prerelease` suffix. Incrementing zeroes the
/// lower components and drops any prerelease.
#[derive(Debug, Clone, Copy, Default)]
pub struct SemverIncrementer;

struct Parsed {
    major: u64,
    minor: u64,
    patch: u64,
    prerelease: Option<String>,
    v_prefix: bool,
}

fn parse(version: &str) -> Result<Parsed> {
    let invalid = || ShipgateError::InvalidVersion(version.to_string());

    let trimmed = version.trim();
    let (v_prefix, rest) = match trimmed.strip_prefix('v') {
        Some(rest) => (true, rest),
        None => (false, trimmed),
    };
    let (core, prerelease) = match rest.split_once('-') {
        Some((core, pre)) if !pre.is_empty() => (core, Some(pre.to_string())),
        Some(_) => return Err(invalid()),
        None => (rest, None),
    };

    let mut parts = core.split('.');
    let component = |p: Option<&str>| -> Result<u64> {
        p.filter(|s| !s.is_empty())
            .and_then(|s| s.parse().ok())
            .ok_or_else(invalid)
    };
    let major = component(parts.next())?;
    let minor = component(parts.next())?;
    let patch = component(parts.next())?;
    if parts.next().is_some() {
        return Err(invalid());
    }

    Ok(Parsed {
        major,
        minor,
        patch,
        prerelease,
        v_prefix,
    })
}

impl VersionIncrementer for SemverIncrementer {
    fn next_version(&self, current: &str, kind: IncrementKind) -> Result<String> {
        let p = parse(current)?;
        let (major, minor, patch) = match kind {
            IncrementKind::Major => (p.major + 1, 0, 0),
            IncrementKind::Minor => (p.major, p.minor + 1, 0),
            IncrementKind::Patch => (p.major, p.minor, p.patch + 1),
        };
        let prefix = if p.v_prefix { "v" } else { "" };
        Ok(format!("{prefix}{major}.{minor}.{patch}"))
    }

    fn validate(&self, version: &str, allow_prerelease: bool) -> Result<()> {
        let p = parse(version)?;
        if p.prerelease.is_some() && !allow_prerelease {
            return Err(ShipgateError::InvalidVersion(version.to_string()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
