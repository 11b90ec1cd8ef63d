//! Versioned protocol identifiers.
//!
//! A protocol id such as `/your-protocol/2.0.0` is held as a name plus an
//! optional `major.minor.patch` version rather than as an opaque string, so
//! handlers can branch on the negotiated version structurally:
//!
//! ```
//! use plexus_types::{ProtocolId, Version};
//!
//! let id: ProtocolId = "/your-protocol/2.0.0".parse().unwrap();
//! assert_eq!(id.name(), "/your-protocol");
//! assert_eq!(id.version(), Some(Version::new(2, 0, 0)));
//!
//! let plain: ProtocolId = "/node-1".parse().unwrap();
//! assert_eq!(plain.version(), None);
//! assert_eq!(plain.to_string(), "/node-1");
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::MAX_NEGOTIATION_LINE;
use crate::error::ProtocolIdError;

/// A `major.minor.patch` protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    fn parse(segment: &str) -> Option<Self> {
        let mut parts = segment.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next()?.parse().ok()?;
        let patch = parts.next()?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self::new(major, minor, patch))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// An application protocol identifier negotiated per stream.
///
/// Equality is structural: two ids match when both name and version match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProtocolId {
    name: String,
    version: Option<Version>,
}

impl ProtocolId {
    /// Build an id from a name (e.g. `/chat`) and optional version.
    pub fn new(name: impl Into<String>, version: Option<Version>) -> Result<Self, ProtocolIdError> {
        let name = name.into();
        validate(&name)?;
        let id = Self { name, version };
        if id.to_string().len() > MAX_NEGOTIATION_LINE {
            return Err(ProtocolIdError::TooLong {
                max: MAX_NEGOTIATION_LINE,
            });
        }
        Ok(id)
    }

    /// The protocol name without the version segment.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The version segment, if the id carried one.
    pub fn version(&self) -> Option<Version> {
        self.version
    }

    /// True when `other` names the same protocol, regardless of version.
    pub fn same_family(&self, other: &ProtocolId) -> bool {
        self.name == other.name
    }
}

fn validate(name: &str) -> Result<(), ProtocolIdError> {
    if name.is_empty() {
        return Err(ProtocolIdError::Empty);
    }
    if !name.starts_with('/') {
        return Err(ProtocolIdError::MissingLeadingSlash(name.to_string()));
    }
    if let Some(c) = name.chars().find(|c| c.is_whitespace() || c.is_control()) {
        return Err(ProtocolIdError::InvalidCharacter(c));
    }
    Ok(())
}

impl FromStr for ProtocolId {
    type Err = ProtocolIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        validate(s)?;
        if s.len() > MAX_NEGOTIATION_LINE {
            return Err(ProtocolIdError::TooLong {
                max: MAX_NEGOTIATION_LINE,
            });
        }

        if let Some((name, last)) = s.rsplit_once('/') {
            if !name.is_empty() {
                if let Some(version) = Version::parse(last) {
                    return Ok(Self {
                        name: name.to_string(),
                        version: Some(version),
                    });
                }
            }
        }

        Ok(Self {
            name: s.to_string(),
            version: None,
        })
    }
}

impl fmt::Display for ProtocolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.version {
            Some(version) => write!(f, "{}/{}", self.name, version),
            None => f.write_str(&self.name),
        }
    }
}

impl TryFrom<String> for ProtocolId {
    type Error = ProtocolIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl TryFrom<&str> for ProtocolId {
    type Error = ProtocolIdError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ProtocolId> for String {
    fn from(id: ProtocolId) -> Self {
        id.to_string()
    }
}
