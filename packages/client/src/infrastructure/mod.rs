//! Infrastructure layer: wire formats and network adapters.
//!
//! - `dto`: WebSocket frames and REST bodies
//! - `websocket`: [`crate::transport::Connector`] over tokio-tungstenite
//! - `http`: [`crate::domain::ChatRepository`] over reqwest

pub mod dto;
pub mod http;
pub mod websocket;

pub use http::HttpChatRepository;
pub use websocket::WebSocketConnector;
