use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::LeaderboardError;

/// Maximum stored length of a player name, in Unicode scalar values.
pub const MAX_PLAYER_NAME_CHARS: usize = 50;

/// A non-empty player name of at most 50 characters.
///
/// Longer input is truncated rather than rejected.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PlayerName(String);

impl PlayerName {
    /// Truncate `raw` to 50 characters and reject the empty result.
    pub fn new(raw: &str) -> Result<Self, LeaderboardError> {
        let name: String = raw.chars().take(MAX_PLAYER_NAME_CHARS).collect();
        if name.is_empty() {
            return Err(LeaderboardError::InvalidName {
                reason: "name must not be empty".to_string(),
            });
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for PlayerName {
    type Error = LeaderboardError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<PlayerName> for String {
    fn from(name: PlayerName) -> Self {
        name.0
    }
}

impl AsRef<str> for PlayerName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
