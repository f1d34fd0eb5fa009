//! User identities and profiles.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Identifier of a user on the messaging endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Result<Self, DomainError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(DomainError::EmptyUserId);
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for UserId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

/// Display fields of a user (the local user or a chat peer)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub id: UserId,
    pub first_name: String,
    pub last_name: String,
    pub photo_url: Option<String>,
}

impl UserProfile {
    pub fn new(id: UserId, first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        Self {
            id,
            first_name: first_name.into(),
            last_name: last_name.into(),
            photo_url: None,
        }
    }

    /// Stand-in shown when neither the profile nor the connections list
    /// knows the peer.
    pub fn placeholder(id: UserId) -> Self {
        Self::new(id, "Unknown", "User")
    }

    pub fn display_name(&self) -> String {
        match (self.first_name.is_empty(), self.last_name.is_empty()) {
            (false, false) => format!("{} {}", self.first_name, self.last_name),
            (false, true) => self.first_name.clone(),
            (true, false) => self.last_name.clone(),
            (true, true) => self.id.to_string(),
        }
    }
}

/// The peer currently shown as typing in a conversation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingPeer {
    pub user_id: UserId,
    pub display_name: Option<String>,
}
