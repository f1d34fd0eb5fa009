//! Domain model of the messaging client.
//!
//! Pure types with no I/O: identities, messages and the timeline, connection
//! state and presence. The [`repository`] module declares the REST interface
//! the domain needs; infrastructure provides the implementation.

pub mod message;
pub mod presence;
pub mod repository;
pub mod user;

pub use message::{DeliveryState, Message, MessageId, MessageTimeline, TempId};
pub use presence::{ConnectionState, ConnectionStatus, FailureReason, PeerPresenceSet};
pub use repository::ChatRepository;
pub use user::{TypingPeer, UserId, UserProfile};
