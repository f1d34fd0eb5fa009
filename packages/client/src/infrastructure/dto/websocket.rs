//! Channel event frames.
//!
//! Every frame is a JSON text message `{"event": <name>, "data": <payload>}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Events emitted by the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    /// Enter the conversation room with a peer
    JoinChat(String),
    /// Leave the conversation room with a peer
    LeaveChat(String),
    SendMessage(SendMessagePayload),
    Typing(TypingPayload),
    MarkAsRead(MarkAsReadPayload),
}

impl ClientEvent {
    pub fn send_message(target_user_id: &str, content: &str, temp_id: &str) -> Self {
        ClientEvent::SendMessage(SendMessagePayload {
            target_user_id: target_user_id.to_string(),
            content: content.to_string(),
            temp_id: temp_id.to_string(),
        })
    }

    pub fn typing(target_user_id: &str, is_typing: bool) -> Self {
        ClientEvent::Typing(TypingPayload {
            target_user_id: target_user_id.to_string(),
            is_typing,
        })
    }

    /// Event name as it appears on the wire
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::JoinChat(_) => "joinChat",
            ClientEvent::LeaveChat(_) => "leaveChat",
            ClientEvent::SendMessage(_) => "sendMessage",
            ClientEvent::Typing(_) => "typing",
            ClientEvent::MarkAsRead(_) => "markAsRead",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    pub target_user_id: String,
    pub content: String,
    /// Echoed back by the server as `messageDelivered.messageId`
    pub temp_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub target_user_id: String,
    pub is_typing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkAsReadPayload {
    pub target_user_id: String,
    pub message_ids: Vec<String>,
}

/// Events pushed by the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "newMessage")]
    NewMessage(NewMessagePayload),
    #[serde(rename = "messageDelivered")]
    MessageDelivered(MessageDeliveredPayload),
    #[serde(rename = "userTyping")]
    UserTyping(TypingNotice),
    #[serde(rename = "userStoppedTyping")]
    UserStoppedTyping(TypingNotice),
    #[serde(rename = "userOnline")]
    UserOnline(PresenceNotice),
    #[serde(rename = "userOffline")]
    UserOffline(PresenceNotice),
    #[serde(rename = "auth_error")]
    AuthError(AuthErrorPayload),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessagePayload {
    /// Sender id
    pub from: String,
    pub message: MessageDto,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDeliveredPayload {
    /// Temp id the client attached to `sendMessage`
    pub message_id: String,
    pub message: MessageDto,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingNotice {
    pub user_id: String,
    #[serde(default)]
    pub user_info: Option<UserDto>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceNotice {
    pub user_id: String,
}

/// `auth_error` carries either a bare string or an object with a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AuthErrorPayload {
    Text(String),
    Detailed {
        #[serde(default)]
        message: String,
    },
}

impl AuthErrorPayload {
    pub fn message(&self) -> &str {
        match self {
            AuthErrorPayload::Text(message) => message,
            AuthErrorPayload::Detailed { message } => message,
        }
    }
}

/// Message record as stored by the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDto {
    #[serde(rename = "_id")]
    pub id: String,
    pub sender_id: UserRef,
    pub receiver_id: UserRef,
    pub content: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// A user reference that the server may or may not have populated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserRef {
    Id(String),
    Populated {
        #[serde(rename = "_id")]
        id: String,
    },
}

impl UserRef {
    pub fn id(&self) -> &str {
        match self {
            UserRef::Id(id) => id,
            UserRef::Populated { id } => id,
        }
    }
}

/// User record (profile, connection entry or typing `userInfo`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDto {
    #[serde(rename = "_id", default)]
    pub id: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub photo_url: Option<String>,
}
