//! Client configuration.

use std::time::Duration;

use chrono::FixedOffset;
use kizuna_shared::time::local_offset;

use crate::presence::ReconnectPolicy;

pub const DEFAULT_SOCKET_URL: &str = "ws://127.0.0.1:7777/socket";
pub const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:7777";

/// Quiet period after the last keystroke before typing-stop is emitted
pub const DEFAULT_TYPING_DEBOUNCE: Duration = Duration::from_secs(1);
/// Bound for REST requests, including the HTTP fallback send
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Bound for the WebSocket handshake
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Runtime settings for [`crate::MessagingClient`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// WebSocket endpoint of the messaging channel
    pub socket_url: String,
    /// Base URL of the REST endpoints (no trailing slash)
    pub api_base_url: String,
    pub reconnect: ReconnectPolicy,
    pub typing_debounce: Duration,
    pub request_timeout: Duration,
    pub handshake_timeout: Duration,
    /// Offset message times are displayed in (host time zone by default)
    pub display_offset: FixedOffset,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            socket_url: DEFAULT_SOCKET_URL.to_string(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            reconnect: ReconnectPolicy::default(),
            typing_debounce: DEFAULT_TYPING_DEBOUNCE,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            display_offset: local_offset(),
        }
    }
}

impl ClientConfig {
    pub fn new(socket_url: impl Into<String>, api_base_url: impl Into<String>) -> Self {
        Self {
            socket_url: socket_url.into(),
            api_base_url: api_base_url.into().trim_end_matches('/').to_string(),
            ..Self::default()
        }
    }
}
