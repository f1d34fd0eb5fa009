//! Data Transfer Objects (DTOs) for the messaging client.
//!
//! DTOs are organized by protocol:
//! - `websocket`: channel event frames
//! - `http`: REST request and response bodies

pub mod conversion;
pub mod http;
pub mod websocket;
