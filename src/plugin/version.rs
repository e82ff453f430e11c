//! Version Comparator
//!
//! Parses semantic version triples and evaluates the constraint forms plugins
//! use to declare platform and inter-plugin requirements.
//!
//! Supported constraints:
//! - `*` matches any version
//! - `^X.Y.Z` same major, at least X.Y.Z
//! - `~X.Y.Z` same major and minor, at least X.Y.Z
//! - `X.Y.Z` at least X.Y.Z
//!
//! Any other leading operator (`>=`, `=`, `v`, ...) is stripped and the bare
//! rule applies. Pre-release and build suffixes are ignored throughout, so
//! `1.2.3-beta` compares equal to `1.2.3`.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use log::debug;
use regex::Regex;
use crate::plugin::error::{PluginError, PluginResult};

static VERSION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9]+)\.([0-9]+)\.([0-9]+)").expect("version pattern is valid")
});

/// Numeric semantic version triple
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl Version {
    /// Create a version from its components
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self { major, minor, patch }
    }

    /// Parse the leading `MAJOR.MINOR.PATCH` of a version string
    pub fn parse(version: &str) -> PluginResult<Self> {
        let captures = VERSION_PATTERN
            .captures(version)
            .ok_or_else(|| PluginError::invalid_version(version))?;

        let component = |index: usize| -> PluginResult<u64> {
            captures[index]
                .parse::<u64>()
                .map_err(|_| PluginError::invalid_version(version))
        };

        Ok(Self {
            major: component(1)?,
            minor: component(2)?,
            patch: component(3)?,
        })
    }
}

impl FromStr for Version {
    type Err = PluginError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Version::parse(s)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Parsed version constraint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionConstraint {
    /// `*`
    Any,
    /// `^X.Y.Z`
    Caret(Version),
    /// `~X.Y.Z`
    Tilde(Version),
    /// `X.Y.Z` (and any unrecognised operator)
    AtLeast(Version),
}

impl VersionConstraint {
    /// Parse a constraint string
    pub fn parse(constraint: &str) -> PluginResult<Self> {
        let constraint = constraint.trim();

        if constraint.is_empty() || constraint == "*" {
            return Ok(Self::Any);
        }
        if let Some(rest) = constraint.strip_prefix('^') {
            return Ok(Self::Caret(Version::parse(rest.trim_start())?));
        }
        if let Some(rest) = constraint.strip_prefix('~') {
            return Ok(Self::Tilde(Version::parse(rest.trim_start())?));
        }

        let bare = constraint.trim_start_matches(|c: char| !c.is_ascii_digit());
        Version::parse(bare)
            .map(Self::AtLeast)
            .map_err(|_| PluginError::invalid_version(constraint))
    }

    /// Check whether a parsed version meets this constraint
    pub fn matches(&self, version: &Version) -> bool {
        match self {
            Self::Any => true,
            Self::Caret(required) => version.major == required.major && version >= required,
            Self::Tilde(required) => {
                version.major == required.major
                    && version.minor == required.minor
                    && version >= required
            }
            Self::AtLeast(required) => version >= required,
        }
    }
}

/// Parse a version string into its numeric triple
pub fn parse(version: &str) -> PluginResult<Version> {
    Version::parse(version)
}

/// Compare two version strings by their numeric triple
pub fn compare(a: &str, b: &str) -> PluginResult<Ordering> {
    Ok(Version::parse(a)?.cmp(&Version::parse(b)?))
}

/// Check a version against a constraint, surfacing malformed input
pub fn try_satisfies(version: &str, constraint: &str) -> PluginResult<bool> {
    let version = Version::parse(version)?;
    let constraint = VersionConstraint::parse(constraint)?;
    Ok(constraint.matches(&version))
}

/// Check a version against a constraint; malformed input never satisfies
pub fn satisfies(version: &str, constraint: &str) -> bool {
    match try_satisfies(version, constraint) {
        Ok(result) => result,
        Err(e) => {
            debug!("Constraint check '{}' against '{}' rejected: {}", version, constraint, e);
            false
        }
    }
}

/// True when moving from `from` to `to` crosses a major version
pub fn has_breaking_change(from: &str, to: &str) -> bool {
    match (Version::parse(from), Version::parse(to)) {
        (Ok(from), Ok(to)) => to.major > from.major,
        _ => false,
    }
}
