//! Chat messages and the per-conversation timeline.

use std::fmt;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::DomainError;

use super::UserId;

/// Server-assigned message identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Result<Self, DomainError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(DomainError::EmptyMessageId);
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Locally generated identifier of a message that has not been confirmed yet
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TempId(String);

impl TempId {
    /// Generate a new locally-unique temp id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wrap a temp id echoed back by the server.
    pub fn from_wire(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TempId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether the server has confirmed a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryState {
    /// Shown locally, waiting for the server record
    Optimistic { temp_id: TempId },
    /// Confirmed by the server
    Delivered,
}

/// A single chat message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Server id once delivered; mirrors the temp id while optimistic
    pub id: String,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub delivery: DeliveryState,
}

impl Message {
    /// Build a placeholder for a message the local user just sent.
    pub fn optimistic(
        temp_id: TempId,
        sender_id: UserId,
        receiver_id: UserId,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: temp_id.as_str().to_string(),
            sender_id,
            receiver_id,
            content: content.into(),
            timestamp,
            delivery: DeliveryState::Optimistic { temp_id },
        }
    }

    /// Build a server-confirmed message.
    pub fn delivered(
        id: MessageId,
        sender_id: UserId,
        receiver_id: UserId,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.0,
            sender_id,
            receiver_id,
            content: content.into(),
            timestamp,
            delivery: DeliveryState::Delivered,
        }
    }

    pub fn temp_id(&self) -> Option<&TempId> {
        match &self.delivery {
            DeliveryState::Optimistic { temp_id } => Some(temp_id),
            DeliveryState::Delivered => None,
        }
    }

    pub fn is_optimistic(&self) -> bool {
        matches!(self.delivery, DeliveryState::Optimistic { .. })
    }
}

/// Ordered messages of one conversation, in the order this client observed them.
///
/// Optimistic entries are promoted or removed in place; the position of every
/// other entry never changes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageTimeline {
    messages: Vec<Message>,
}

impl MessageTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    pub fn as_slice(&self) -> &[Message] {
        &self.messages
    }

    pub fn get(&self, index: usize) -> Option<&Message> {
        self.messages.get(index)
    }

    fn contains_id(&self, id: &str) -> bool {
        self.messages.iter().any(|m| m.id == id)
    }

    /// Index of the optimistic entry carrying `temp_id`.
    pub fn position_of(&self, temp_id: &TempId) -> Option<usize> {
        self.messages
            .iter()
            .position(|m| m.temp_id() == Some(temp_id))
    }

    /// Append an optimistic entry and return its index.
    pub fn push_optimistic(&mut self, message: Message) -> Result<usize, DomainError> {
        let Some(temp_id) = message.temp_id() else {
            return Ok(self.append_unchecked(message));
        };
        if self.position_of(temp_id).is_some() {
            return Err(DomainError::DuplicateTempId(temp_id.to_string()));
        }
        Ok(self.append_unchecked(message))
    }

    /// Append a message received from the server.
    ///
    /// Returns `false` without modifying the timeline when a message with the
    /// same id is already present.
    pub fn append(&mut self, message: Message) -> bool {
        if self.contains_id(&message.id) {
            return false;
        }
        self.append_unchecked(message);
        true
    }

    fn append_unchecked(&mut self, message: Message) -> usize {
        self.messages.push(message);
        self.messages.len() - 1
    }

    /// Replace the optimistic entry for `temp_id` with its confirmed record.
    ///
    /// Returns the index of the replaced entry, or `None` if no optimistic
    /// entry carries `temp_id`. When the confirmed record is already present
    /// (history loaded after the send) the optimistic entry is dropped and the
    /// index of the existing record is returned.
    pub fn promote(&mut self, temp_id: &TempId, mut confirmed: Message) -> Option<usize> {
        let index = self.position_of(temp_id)?;
        let duplicate = self
            .messages
            .iter()
            .enumerate()
            .any(|(i, m)| i != index && m.id == confirmed.id);
        if duplicate {
            self.messages.remove(index);
            return self.messages.iter().position(|m| m.id == confirmed.id);
        }
        confirmed.delivery = DeliveryState::Delivered;
        self.messages[index] = confirmed;
        Some(index)
    }

    /// Remove the optimistic entry for `temp_id` (rollback of a failed send).
    pub fn remove_optimistic(&mut self, temp_id: &TempId) -> Option<Message> {
        let index = self.position_of(temp_id)?;
        Some(self.messages.remove(index))
    }

    /// Put loaded history in front of whatever was appended while loading.
    pub fn prepend_history(&mut self, history: Vec<Message>) {
        let mut merged: Vec<Message> = Vec::with_capacity(history.len() + self.messages.len());
        for message in history {
            if !merged.iter().any(|m| m.id == message.id) {
                merged.push(message);
            }
        }
        for message in self.messages.drain(..) {
            if !merged.iter().any(|m| m.id == message.id) {
                merged.push(message);
            }
        }
        self.messages = merged;
    }

    /// Ids of confirmed messages sent by `sender`.
    pub fn delivered_ids_from(&self, sender: &UserId) -> Vec<String> {
        self.messages
            .iter()
            .filter(|m| !m.is_optimistic() && &m.sender_id == sender)
            .map(|m| m.id.clone())
            .collect()
    }

    pub fn optimistic_count(&self) -> usize {
        self.messages.iter().filter(|m| m.is_optimistic()).count()
    }
}

impl From<Vec<Message>> for MessageTimeline {
    fn from(messages: Vec<Message>) -> Self {
        let mut timeline = Self::new();
        timeline.prepend_history(messages);
        timeline
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> UserId {
        UserId::new("alice").unwrap()
    }

    fn bob() -> UserId {
        UserId::new("bob").unwrap()
    }

    fn delivered(id: &str, from: UserId, to: UserId, content: &str) -> Message {
        Message::delivered(MessageId::new(id).unwrap(), from, to, content, Utc::now())
    }

    #[test]
    fn test_promote_replaces_in_place() {
        // テスト項目: 楽観的メッセージが同じ位置で確定メッセージに置き換えられる
        // given (前提条件):
        let mut timeline = MessageTimeline::from(vec![delivered("m1", bob(), alice(), "hi")]);
        let temp_id = TempId::generate();
        timeline
            .push_optimistic(Message::optimistic(
                temp_id.clone(),
                alice(),
                bob(),
                "hello",
                Utc::now(),
            ))
            .unwrap();
        timeline.append(delivered("m2", bob(), alice(), "are you there?"));

        // when (操作):
        let index = timeline.promote(&temp_id, delivered("m3", alice(), bob(), "hello"));

        // then (期待する結果):
        assert_eq!(index, Some(1));
        assert_eq!(timeline.len(), 3);
        let promoted = timeline.get(1).unwrap();
        assert_eq!(promoted.id, "m3");
        assert_eq!(promoted.content, "hello");
        assert_eq!(promoted.delivery, DeliveryState::Delivered);
        assert_eq!(timeline.get(2).unwrap().id, "m2");
    }

    #[test]
    fn test_promote_drops_placeholder_when_record_already_loaded() {
        // テスト項目: 確定レコードが履歴で既に読み込まれている場合、楽観的メッセージは削除され重複しない
        // given (前提条件):
        let mut timeline = MessageTimeline::new();
        let temp_id = TempId::generate();
        timeline
            .push_optimistic(Message::optimistic(
                temp_id.clone(),
                alice(),
                bob(),
                "hello",
                Utc::now(),
            ))
            .unwrap();
        timeline.prepend_history(vec![
            delivered("m1", bob(), alice(), "hi"),
            delivered("m2", alice(), bob(), "hello"),
        ]);

        // when (操作):
        let index = timeline.promote(&temp_id, delivered("m2", alice(), bob(), "hello"));

        // then (期待する結果):
        assert_eq!(index, Some(1));
        assert_eq!(timeline.len(), 2);
        assert_eq!(timeline.optimistic_count(), 0);
        let ids: Vec<&str> = timeline.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2"]);
    }

    #[test]
    fn test_promote_forces_delivered_state() {
        // テスト項目: 確定レコードが楽観的状態でも Delivered として格納される
        // given (前提条件):
        let mut timeline = MessageTimeline::new();
        let temp_id = TempId::generate();
        timeline
            .push_optimistic(Message::optimistic(
                temp_id.clone(),
                alice(),
                bob(),
                "x",
                Utc::now(),
            ))
            .unwrap();
        let echoed = Message::optimistic(TempId::generate(), alice(), bob(), "x", Utc::now());

        // when (操作):
        timeline.promote(&temp_id, echoed);

        // then (期待する結果):
        assert_eq!(timeline.optimistic_count(), 0);
    }

    #[test]
    fn test_promote_unknown_temp_id_is_noop() {
        // テスト項目: 存在しない temp id の確定通知はタイムラインを変更しない
        // given (前提条件):
        let mut timeline = MessageTimeline::from(vec![delivered("m1", bob(), alice(), "hi")]);
        let before = timeline.clone();

        // when (操作):
        let index = timeline.promote(
            &TempId::from_wire("missing"),
            delivered("m9", alice(), bob(), "?"),
        );

        // then (期待する結果):
        assert!(index.is_none());
        assert_eq!(timeline, before);
    }

    #[test]
    fn test_remove_optimistic_restores_length() {
        // テスト項目: 送信失敗時のロールバックでタイムラインの長さが元に戻る
        // given (前提条件):
        let mut timeline = MessageTimeline::from(vec![delivered("m1", bob(), alice(), "hi")]);
        let temp_id = TempId::generate();
        timeline
            .push_optimistic(Message::optimistic(
                temp_id.clone(),
                alice(),
                bob(),
                "oops",
                Utc::now(),
            ))
            .unwrap();

        // when (操作):
        let removed = timeline.remove_optimistic(&temp_id);

        // then (期待する結果):
        assert_eq!(removed.map(|m| m.content), Some("oops".to_string()));
        assert_eq!(timeline.len(), 1);
    }

    #[test]
    fn test_push_optimistic_rejects_duplicate_temp_id() {
        // テスト項目: 同じ temp id の楽観的メッセージは 2 つ目が拒否される
        // given (前提条件):
        let mut timeline = MessageTimeline::new();
        let temp_id = TempId::from_wire("1700000000000");
        let first = Message::optimistic(temp_id.clone(), alice(), bob(), "a", Utc::now());
        let second = Message::optimistic(temp_id.clone(), alice(), bob(), "b", Utc::now());
        timeline.push_optimistic(first).unwrap();

        // when (操作):
        let result = timeline.push_optimistic(second);

        // then (期待する結果):
        assert_eq!(
            result,
            Err(DomainError::DuplicateTempId("1700000000000".to_string()))
        );
        assert_eq!(timeline.len(), 1);
    }

    #[test]
    fn test_append_skips_known_id() {
        // テスト項目: 既に存在する ID のメッセージは追加されない
        // given (前提条件):
        let mut timeline = MessageTimeline::from(vec![delivered("m1", bob(), alice(), "hi")]);

        // when (操作):
        let appended = timeline.append(delivered("m1", bob(), alice(), "hi"));

        // then (期待する結果):
        assert!(!appended);
        assert_eq!(timeline.len(), 1);
    }

    #[test]
    fn test_prepend_history_keeps_entries_added_while_loading() {
        // テスト項目: 読み込み中に追加されたメッセージは履歴の後ろに残る
        // given (前提条件):
        let mut timeline = MessageTimeline::new();
        timeline.append(delivered("m3", bob(), alice(), "live"));
        let history = vec![
            delivered("m1", bob(), alice(), "old"),
            delivered("m3", bob(), alice(), "live"),
        ];

        // when (操作):
        timeline.prepend_history(history);

        // then (期待する結果):
        let ids: Vec<&str> = timeline.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m3"]);
    }

    #[test]
    fn test_delivered_ids_from_excludes_optimistic_and_other_senders() {
        // テスト項目: 既読対象は相手から届いた確定メッセージのみ
        // given (前提条件):
        let mut timeline = MessageTimeline::from(vec![
            delivered("m1", bob(), alice(), "hi"),
            delivered("m2", alice(), bob(), "hey"),
        ]);
        timeline
            .push_optimistic(Message::optimistic(
                TempId::generate(),
                alice(),
                bob(),
                "pending",
                Utc::now(),
            ))
            .unwrap();

        // when (操作):
        let ids = timeline.delivered_ids_from(&bob());

        // then (期待する結果):
        assert_eq!(ids, vec!["m1".to_string()]);
    }
}
