//! Error types for the messaging client.

use std::{path::PathBuf, time::Duration};

use thiserror::Error;

/// Invalid values rejected by domain constructors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    #[error("user id must not be empty")]
    EmptyUserId,

    #[error("message id must not be empty")]
    EmptyMessageId,

    #[error("an optimistic message with temp id '{0}' is already pending")]
    DuplicateTempId(String),
}

/// Errors raised by the transport channel
#[derive(Debug, Error)]
pub enum TransportError {
    /// No channel is open
    #[error("channel is not connected")]
    NotConnected,

    /// Handshake failed before the channel opened
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// Server rejected the credential during the handshake
    #[error("credential rejected by server (status {0})")]
    Unauthorized(u16),

    #[error("handshake timed out after {0:?}")]
    Timeout(Duration),

    /// A newer connect or disconnect replaced this attempt
    #[error("connection attempt superseded")]
    Superseded,
}

impl TransportError {
    /// Whether the error means the credential itself is bad.
    pub fn is_auth(&self) -> bool {
        matches!(self, TransportError::Unauthorized(_))
    }
}

/// Errors raised by the REST endpoints
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("resource not found")]
    NotFound,

    #[error("server responded with status {0}")]
    Status(u16),

    #[error("request failed: {0}")]
    Request(String),

    #[error("failed to decode response: {0}")]
    Decode(String),

    /// Response was successful but carried no usable data
    #[error("response carried no data")]
    EmptyResponse,

    #[error("request timed out")]
    Timeout,
}

impl From<reqwest::Error> for ApiError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            ApiError::Timeout
        } else if error.is_decode() {
            ApiError::Decode(error.to_string())
        } else if let Some(status) = error.status() {
            ApiError::Status(status.as_u16())
        } else {
            ApiError::Request(error.to_string())
        }
    }
}

/// Errors surfaced to the user by a chat session
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("failed to send message: {0}")]
    SendFailed(#[source] ApiError),
}

/// Errors raised while loading a credential store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read store '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("store '{}' is not a JSON object of strings: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Client-specific errors
#[derive(Debug, Error)]
pub enum ClientError {
    /// No credential found in any store
    #[error("no authentication token found in cookies, local storage or session storage")]
    MissingCredential,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("terminal error: {0}")]
    Terminal(String),
}
