//! Conversion logic between DTOs and domain entities.

use chrono::Utc;

use crate::domain::{Message, MessageId, TypingPeer, UserId, UserProfile};
use crate::error::DomainError;

use super::websocket::{MessageDto, TypingNotice, UserDto};

// ========================================
// DTO → Domain Entity
// ========================================

impl TryFrom<MessageDto> for Message {
    type Error = DomainError;

    fn try_from(dto: MessageDto) -> Result<Self, Self::Error> {
        let timestamp = dto.timestamp.or(dto.created_at).unwrap_or_else(Utc::now);
        Ok(Message::delivered(
            MessageId::new(dto.id)?,
            UserId::new(dto.sender_id.id())?,
            UserId::new(dto.receiver_id.id())?,
            dto.content,
            timestamp,
        ))
    }
}

impl TryFrom<UserDto> for UserProfile {
    type Error = DomainError;

    fn try_from(dto: UserDto) -> Result<Self, Self::Error> {
        let id = UserId::new(dto.id.unwrap_or_default())?;
        Ok(UserProfile {
            id,
            first_name: dto.first_name.unwrap_or_default(),
            last_name: dto.last_name.unwrap_or_default(),
            photo_url: dto.photo_url,
        })
    }
}

impl TryFrom<TypingNotice> for TypingPeer {
    type Error = DomainError;

    fn try_from(notice: TypingNotice) -> Result<Self, Self::Error> {
        let display_name = notice.user_info.and_then(|info| {
            let name = [info.first_name, info.last_name]
                .into_iter()
                .flatten()
                .filter(|part| !part.is_empty())
                .collect::<Vec<_>>()
                .join(" ");
            (!name.is_empty()).then_some(name)
        });
        Ok(TypingPeer {
            user_id: UserId::new(notice.user_id)?,
            display_name,
        })
    }
}

/// Convert a batch of records, dropping the ones that fail validation.
pub fn messages_from_dtos(dtos: Vec<MessageDto>) -> Vec<Message> {
    dtos.into_iter()
        .filter_map(|dto| match Message::try_from(dto) {
            Ok(message) => Some(message),
            Err(e) => {
                tracing::warn!("Skipping malformed message record: {}", e);
                None
            }
        })
        .collect()
}
