//! Protocol version identifiers.
//!
//! Documents advertise their version as a URI such as
//! `https://ansybl.org/version/1.0`. Migration rules are keyed by the
//! `major.minor` component only; patch releases never change the wire format.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::signing::SignatureAlgorithm;

/// Base of every version URI. The version number follows the final `/`.
pub const VERSION_URI_BASE: &str = "https://ansybl.org/version/";

/// Errors returned by [`ProtocolVersion::parse`].
#[derive(Debug, Error, PartialEq)]
pub enum VersionError {
    #[error("version string is empty")]
    Empty,
    #[error("version {0:?} is not of the form MAJOR.MINOR[.PATCH]")]
    Malformed(String),
}

/// A semantic protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProtocolVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ProtocolVersion {
    pub const V1_0: ProtocolVersion = ProtocolVersion::new(1, 0, 0);
    pub const V1_1: ProtocolVersion = ProtocolVersion::new(1, 1, 0);

    /// The version new documents are generated with.
    pub const CURRENT: ProtocolVersion = ProtocolVersion::V1_0;

    /// Every version this crate can read, sign and migrate between.
    pub const KNOWN: &'static [ProtocolVersion] = &[ProtocolVersion::V1_0, ProtocolVersion::V1_1];

    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }

    /// Parse a version URI, a bare `1.0` / `1.0.0`, or a `v`-prefixed form.
    ///
    /// Only the text after the last `/` is considered, so any URI base is
    /// accepted; [`ProtocolVersion::to_uri`] always renders [`VERSION_URI_BASE`].
    pub fn parse(s: &str) -> Result<Self, VersionError> {
        let trimmed = s.trim().trim_end_matches('/');
        if trimmed.is_empty() {
            return Err(VersionError::Empty);
        }
        let tail = trimmed.rsplit('/').next().unwrap_or(trimmed);
        let tail = tail.strip_prefix('v').unwrap_or(tail);

        let parts: Vec<&str> = tail.split('.').collect();
        if !(2..=3).contains(&parts.len()) {
            return Err(VersionError::Malformed(s.to_string()));
        }
        let mut numbers = [0u32; 3];
        for (slot, part) in numbers.iter_mut().zip(&parts) {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(VersionError::Malformed(s.to_string()));
            }
            *slot = part
                .parse()
                .map_err(|_| VersionError::Malformed(s.to_string()))?;
        }
        Ok(Self::new(numbers[0], numbers[1], numbers[2]))
    }

    /// `"1.0"`, the component used in migration rule keys.
    pub fn major_minor(&self) -> String {
        format!("{}.{}", self.major, self.minor)
    }

    /// Same `major.minor`, ignoring patch.
    pub fn same_line(&self, other: &ProtocolVersion) -> bool {
        self.major == other.major && self.minor == other.minor
    }

    /// The canonical version URI, e.g. `https://ansybl.org/version/1.0`.
    ///
    /// The patch component is included only when non-zero.
    pub fn to_uri(&self) -> String {
        format!("{VERSION_URI_BASE}{self}")
    }

    pub fn is_known(&self) -> bool {
        Self::KNOWN.iter().any(|v| v.same_line(self))
    }

    /// Signature algorithm identifier that documents of this version are
    /// signed with.
    pub fn signature_algorithm(&self) -> SignatureAlgorithm {
        if *self >= ProtocolVersion::V1_1 {
            SignatureAlgorithm::Ed25519Jcs
        } else {
            SignatureAlgorithm::Ed25519
        }
    }
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::CURRENT
    }
}

/// Formats as `major.minor`, or `major.minor.patch` when patch is non-zero.
impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.patch == 0 {
            write!(f, "{}.{}", self.major, self.minor)
        } else {
            write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
        }
    }
}

impl FromStr for ProtocolVersion {
    type Err = VersionError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for ProtocolVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ProtocolVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_uri_form() {
        let v = ProtocolVersion::parse("https://ansybl.org/version/1.0").unwrap();
        assert_eq!(v, ProtocolVersion::V1_0);
    }

    #[test]
    fn parses_bare_and_prefixed_forms() {
        assert_eq!(ProtocolVersion::parse("1.1").unwrap(), ProtocolVersion::V1_1);
        assert_eq!(ProtocolVersion::parse("v1.1").unwrap(), ProtocolVersion::V1_1);
        assert_eq!(
            ProtocolVersion::parse("1.2.3").unwrap(),
            ProtocolVersion::new(1, 2, 3)
        );
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(ProtocolVersion::parse(""), Err(VersionError::Empty));
        assert!(ProtocolVersion::parse("one.two").is_err());
        assert!(ProtocolVersion::parse("1").is_err());
        assert!(ProtocolVersion::parse("1.2.3.4").is_err());
        assert!(ProtocolVersion::parse("1.-2").is_err());
    }

    #[test]
    fn uri_round_trip() {
        let uri = ProtocolVersion::V1_1.to_uri();
        assert_eq!(uri, "https://ansybl.org/version/1.1");
        assert_eq!(ProtocolVersion::parse(&uri).unwrap(), ProtocolVersion::V1_1);
    }

    #[test]
    fn major_minor_ignores_patch() {
        let v = ProtocolVersion::new(1, 0, 4);
        assert_eq!(v.major_minor(), "1.0");
        assert!(v.same_line(&ProtocolVersion::V1_0));
        assert!(v.is_known());
    }

    #[test]
    fn algorithm_follows_version() {
        assert_eq!(
            ProtocolVersion::V1_0.signature_algorithm(),
            SignatureAlgorithm::Ed25519
        );
        assert_eq!(
            ProtocolVersion::V1_1.signature_algorithm(),
            SignatureAlgorithm::Ed25519Jcs
        );
    }
}
