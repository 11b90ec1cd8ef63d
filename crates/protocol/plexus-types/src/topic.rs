//! Pubsub topics and connection direction.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A pubsub topic name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topic(String);

impl Topic {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Topic {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Topic {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl AsRef<str> for Topic {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Which side opened a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// The remote peer dialed us.
    Inbound,
    /// We dialed the remote peer.
    Outbound,
}

impl Direction {
    pub fn is_outbound(&self) -> bool {
        matches!(self, Direction::Outbound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_conversions() {
        let a = Topic::from("news");
        let b = Topic::new(String::from("news"));
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "news");
        assert_eq!(a.to_string(), "news");
    }

    #[test]
    fn test_topic_serde_transparent() {
        let json = serde_json::to_string(&Topic::from("news")).unwrap();
        assert_eq!(json, "\"news\"");
    }

    #[test]
    fn test_direction() {
        assert!(Direction::Outbound.is_outbound());
        assert!(!Direction::Inbound.is_outbound());
        assert_eq!(
            serde_json::to_string(&Direction::Inbound).unwrap(),
            "\"inbound\""
        );
    }
}
