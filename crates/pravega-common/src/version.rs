//! Pravega version handling
//!
//! Versions arrive from users in loose forms such as `0.9.0`, `v0.9.0` or
//! `0.9.0-2752.3c5a6ff`. Everything that compares versions first reduces them
//! to their `MAJOR.MINOR.PATCH` prefix.

use semver::Version;

use crate::{Error, Result};

/// First version using the renamed segment store StatefulSet and its
/// emptyDir-backed cache
pub const SEGMENT_STORE_RENAME_VERSION: &str = "0.7.0";

/// First version exposing REST health endpoints used by the probes
pub const HEALTHCHECK_VERSION: &str = "0.10.0";

/// Reduce a user-supplied version to `MAJOR.MINOR.PATCH`
///
/// An optional leading `v` is accepted and anything after the patch number
/// is ignored.
pub fn normalize(version: &str) -> Result<Version> {
    let invalid = || Error::validation(format!("request version is not in valid format: {version}"));

    let rest = version.strip_prefix('v').unwrap_or(version);
    let mut parts = [0u64; 3];
    let mut chars = rest.char_indices().peekable();

    for (idx, slot) in parts.iter_mut().enumerate() {
        if idx > 0 {
            match chars.next() {
                Some((_, '.')) => {}
                _ => return Err(invalid()),
            }
        }
        let mut digits = String::new();
        while let Some((_, c)) = chars.peek() {
            if !c.is_ascii_digit() {
                break;
            }
            digits.push(*c);
            chars.next();
        }
        *slot = digits.parse().map_err(|_| invalid())?;
    }

    Ok(Version::new(parts[0], parts[1], parts[2]))
}

/// Normalize and render back to the canonical `MAJOR.MINOR.PATCH` string
pub fn normalized_string(version: &str) -> Result<String> {
    normalize(version).map(|v| v.to_string())
}

/// True if `v1` is strictly below `v2`
///
/// An empty `v1` counts as below anything; an empty `v2` is never exceeded.
/// Unparseable input compares as not below.
pub fn is_version_below(v1: &str, v2: &str) -> bool {
    if v1.is_empty() {
        return true;
    }
    if v2.is_empty() {
        return false;
    }
    match (normalize(v1), normalize(v2)) {
        (Ok(a), Ok(b)) => a < b,
        _ => false,
    }
}

/// Child-resource naming scheme, selected by version
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NamingEra {
    /// Versions below 0.7.0: `<n>-pravega-segmentstore` StatefulSet with
    /// per-replica cache claims
    Legacy,
    /// 0.7.0 and later: suffix-configurable StatefulSet without cache claims
    Modern,
}

impl NamingEra {
    /// Era used by the given version
    pub fn for_version(version: &str) -> Self {
        if is_version_below(version, SEGMENT_STORE_RENAME_VERSION) {
            NamingEra::Legacy
        } else {
            NamingEra::Modern
        }
    }
}

/// True if moving between the two versions changes the naming era
pub fn crosses_era(from: &str, to: &str) -> bool {
    NamingEra::for_version(from) != NamingEra::for_version(to)
}
