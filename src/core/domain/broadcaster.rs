use crate::utils::error::{RelayError, RelayResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a tracked live session.
///
/// The key is opaque to the relay: it is only trimmed, checked for emptiness and used as a map
/// key and as the `{broadcaster}` value in the source endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BroadcasterKey(String);

impl BroadcasterKey {
    /// Parses a broadcaster key, rejecting blank input.
    ///
    /// A leading `@` is stripped so that `@alice` and `alice` name the same session.
    pub fn parse(raw: &str) -> RelayResult<Self> {
        let trimmed = raw.trim();
        let trimmed = trimmed.strip_prefix('@').unwrap_or(trimmed);
        if trimmed.is_empty() {
            return Err(RelayError::InvalidRequest(
                "broadcaster key must not be empty".into(),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BroadcasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_strips_at_and_whitespace() {
        let key = BroadcasterKey::parse("  @alice ").unwrap();
        assert_eq!(key.as_str(), "alice");
        assert_eq!(key, BroadcasterKey::parse("alice").unwrap());
    }

    #[test]
    fn test_parse_rejects_blank() {
        assert!(matches!(
            BroadcasterKey::parse("   "),
            Err(RelayError::InvalidRequest(_))
        ));
        assert!(BroadcasterKey::parse("@").is_err());
    }
}
