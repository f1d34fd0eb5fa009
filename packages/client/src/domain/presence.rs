//! Connection state and peer presence.

use std::{collections::HashSet, fmt};

use super::UserId;

/// Why the connection gave up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// No credential was available to connect with
    CredentialMissing,
    /// Every allowed connection attempt failed
    MaxAttemptsExceeded,
    /// The server rejected the credential
    AuthenticationFailed,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            FailureReason::CredentialMissing => "no authentication token found",
            FailureReason::MaxAttemptsExceeded => "max attempts exceeded",
            FailureReason::AuthenticationFailed => "authentication failed",
        };
        f.write_str(text)
    }
}

/// State of the client's single channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    /// Connection attempt in progress (1-based)
    Connecting(u32),
    Connected,
    /// Terminal until a manual reconnect or a credential change
    Failed(FailureReason),
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn attempt(&self) -> Option<u32> {
        match self {
            ConnectionState::Connecting(attempt) => Some(*attempt),
            _ => None,
        }
    }
}

/// Connection state together with the most recent error, as shown to the view
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub last_error: Option<String>,
}

impl ConnectionStatus {
    pub fn new(state: ConnectionState, last_error: Option<String>) -> Self {
        Self { state, last_error }
    }

    /// Human-readable status line.
    pub fn describe(&self, max_attempts: u32) -> String {
        match (&self.state, &self.last_error) {
            (ConnectionState::Connected, _) => "Connected".to_string(),
            (ConnectionState::Connecting(attempt), _) => {
                format!("Connecting... ({}/{})", attempt, max_attempts)
            }
            (ConnectionState::Failed(reason), _) => format!("Error: {}", reason),
            (ConnectionState::Disconnected, Some(error)) => format!("Disconnected ({})", error),
            (ConnectionState::Disconnected, None) => "Disconnected".to_string(),
        }
    }
}

/// Peers currently reported online by the server
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerPresenceSet {
    online: HashSet<UserId>,
}

impl PeerPresenceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the peer was not already online.
    pub fn mark_online(&mut self, peer: UserId) -> bool {
        self.online.insert(peer)
    }

    /// Returns `true` if the peer was online.
    pub fn mark_offline(&mut self, peer: &UserId) -> bool {
        self.online.remove(peer)
    }

    pub fn is_online(&self, peer: &UserId) -> bool {
        self.online.contains(peer)
    }

    pub fn clear(&mut self) {
        self.online.clear();
    }

    pub fn len(&self) -> usize {
        self.online.len()
    }

    pub fn is_empty(&self) -> bool {
        self.online.is_empty()
    }

    /// Online peers sorted by id for stable display
    pub fn sorted(&self) -> Vec<UserId> {
        let mut peers: Vec<UserId> = self.online.iter().cloned().collect();
        peers.sort();
        peers
    }
}
