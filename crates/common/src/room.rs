// Room identifiers.
//
// A room is addressed by a workspace slug: lowercase ASCII letters, digits
// and hyphens. Input is trimmed and lowercased before validation, so
// "Demo" and " demo " address the same room.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MAX_ROOM_ID_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoomIdError {
    #[error("room id must not be empty")]
    Empty,
    #[error("room id exceeds {MAX_ROOM_ID_LEN} characters")]
    TooLong,
    #[error("room id contains invalid character {0:?}")]
    InvalidCharacter(char),
}

/// Normalized room slug.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomId(String);

impl RoomId {
    pub fn parse(raw: &str) -> Result<Self, RoomIdError> {
        let normalized = raw.trim().to_ascii_lowercase();
        if normalized.is_empty() {
            return Err(RoomIdError::Empty);
        }
        if normalized.chars().count() > MAX_ROOM_ID_LEN {
            return Err(RoomIdError::TooLong);
        }
        if let Some(invalid) = normalized
            .chars()
            .find(|ch| !(ch.is_ascii_lowercase() || ch.is_ascii_digit() || *ch == '-'))
        {
            return Err(RoomIdError::InvalidCharacter(invalid));
        }

        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Human-readable name derived from the slug: first letter capitalized,
    /// hyphens turned into spaces (`team-notes` → `Team notes`).
    pub fn default_display_name(&self) -> String {
        let mut chars = self.0.chars();
        let Some(first) = chars.next() else {
            return String::new();
        };

        let mut name = first.to_ascii_uppercase().to_string();
        name.push_str(&chars.as_str().replace('-', " "));
        name
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RoomId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RoomId {
    type Error = RoomIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RoomId> for String {
    fn from(value: RoomId) -> Self {
        value.0
    }
}
