//! Real-time presence and messaging client.
//!
//! The crate keeps a single reconnecting channel to the messaging endpoint,
//! tracks which peers are online and drives per-conversation chat sessions
//! with an optimistic, reconciling message timeline.

// layers
pub mod chat;
pub mod credential;
pub mod domain;
pub mod infrastructure;
pub mod presence;
pub mod transport;

// application
pub mod config;
pub mod error;
pub mod runner;
pub mod session;
pub mod ui;

mod sync;

#[cfg(test)]
mod test_support;

pub use session::MessagingClient;
