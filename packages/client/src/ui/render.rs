//! Incremental rendering of a conversation timeline.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, FixedOffset, Utc};

use crate::chat::ConversationView;
use crate::domain::UserId;

use super::MessageFormatter;

/// Prints only what changed since the previous view snapshot
pub struct TimelineRenderer {
    local_user: UserId,
    local_name: String,
    /// Offset clock times are shown in
    offset: FixedOffset,
    /// Delivered message ids already printed
    seen: HashSet<String>,
    /// Optimistic messages already printed, by temp id, with their content
    pending: HashMap<String, String>,
    peer_was_typing: bool,
}

impl TimelineRenderer {
    pub fn new(local_user: UserId, local_name: impl Into<String>, offset: FixedOffset) -> Self {
        Self {
            local_user,
            local_name: local_name.into(),
            offset,
            seen: HashSet::new(),
            pending: HashMap::new(),
            peer_was_typing: false,
        }
    }

    /// Output for the changes in `view`, or an empty string.
    pub fn render(&mut self, view: &ConversationView, now: DateTime<Utc>) -> String {
        let mut output = String::new();
        let peer_name = view.peer.display_name();

        let live_temp_ids: HashSet<&str> = view
            .timeline
            .iter()
            .filter_map(|m| m.temp_id().map(|t| t.as_str()))
            .collect();
        let mut settled: Vec<(String, String)> = self
            .pending
            .iter()
            .filter(|(temp_id, _)| !live_temp_ids.contains(temp_id.as_str()))
            .map(|(temp_id, content)| (temp_id.clone(), content.clone()))
            .collect();

        for message in view.timeline.iter() {
            if let Some(temp_id) = message.temp_id() {
                if !self.pending.contains_key(temp_id.as_str()) {
                    self.pending
                        .insert(temp_id.to_string(), message.content.clone());
                    output.push_str(&MessageFormatter::format_chat_message(
                        &self.local_name,
                        message,
                        now,
                        self.offset,
                    ));
                }
                continue;
            }
            if !self.seen.insert(message.id.clone()) {
                continue;
            }

            let promoted = (message.sender_id == self.local_user)
                .then(|| {
                    settled
                        .iter()
                        .position(|(_, content)| content == &message.content)
                })
                .flatten();
            if let Some(index) = promoted {
                let (temp_id, _) = settled.remove(index);
                self.pending.remove(&temp_id);
                output.push_str(&MessageFormatter::format_sent_confirmation(
                    message.timestamp,
                    self.offset,
                ));
                continue;
            }

            let sender = if message.sender_id == self.local_user {
                self.local_name.as_str()
            } else {
                peer_name.as_str()
            };
            output.push_str(&MessageFormatter::format_chat_message(
                sender,
                message,
                now,
                self.offset,
            ));
        }

        // rolled back; the failure notice is printed separately
        for (temp_id, _) in settled {
            self.pending.remove(&temp_id);
        }

        match (&view.peer_typing, self.peer_was_typing) {
            (Some(typing), false) => {
                let name = typing.display_name.clone().unwrap_or_else(|| peer_name.clone());
                output.push_str(&MessageFormatter::format_peer_typing(&name));
                self.peer_was_typing = true;
            }
            (None, true) => self.peer_was_typing = false,
            _ => {}
        }

        output
    }
}
