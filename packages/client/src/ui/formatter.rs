//! Message formatting utilities for client display.

use chrono::{DateTime, FixedOffset, Utc};
use kizuna_shared::time::{format_message_time, to_rfc3339_at};

use crate::chat::SendFailure;
use crate::domain::{Message, UserId, UserProfile};

const RULE: &str = "------------------------------------------------------------";
const DOUBLE_RULE: &str = "============================================================";

/// Message formatter for client display
pub struct MessageFormatter;

impl MessageFormatter {
    /// Format the header shown once a conversation has loaded
    ///
    /// # Arguments
    ///
    /// * `peer` - Profile of the conversation partner
    /// * `online` - Whether the peer is currently online
    /// * `message_count` - Number of messages in the loaded history
    pub fn format_conversation_header(peer: &UserProfile, online: bool, message_count: usize) -> String {
        let presence = if online { "online" } else { "offline" };
        format!(
            "\n\n{}\nChat with {} ({})\n{} message(s) in history\n{}\n",
            DOUBLE_RULE,
            peer.display_name(),
            presence,
            message_count,
            DOUBLE_RULE
        )
    }

    /// Format a chat message
    ///
    /// # Arguments
    ///
    /// * `sender_name` - Display name of the sender
    /// * `message` - The message to show
    /// * `now` - Current instant, for the relative timestamp
    /// * `offset` - Offset the clock time is shown in
    pub fn format_chat_message(
        sender_name: &str,
        message: &Message,
        now: DateTime<Utc>,
        offset: FixedOffset,
    ) -> String {
        let status = if message.is_optimistic() {
            "sending...".to_string()
        } else {
            format!("sent {}", format_message_time(message.timestamp, now, offset))
        };
        format!(
            "\n{}\n@{}: {}\n{}\n{}\n",
            RULE, sender_name, message.content, status, RULE
        )
    }

    /// Format a confirmation after the server stored a sent message
    pub fn format_sent_confirmation(sent_at: DateTime<Utc>, offset: FixedOffset) -> String {
        format!("delivered at {}\n", to_rfc3339_at(sent_at, offset))
    }

    /// Format a failed send; the message has been removed from the timeline
    pub fn format_send_failure(failure: &SendFailure) -> String {
        format!(
            "\n! Failed to send \"{}\": {}\n",
            failure.content, failure.error
        )
    }

    /// Format the connection status line
    pub fn format_status(status_text: &str) -> String {
        format!("\n[status] {}\n", status_text)
    }

    /// Format the list of online peers
    ///
    /// # Arguments
    ///
    /// * `peers` - Online peers, sorted
    /// * `current_peer` - The peer of the open conversation (marked)
    pub fn format_online_peers(peers: &[UserId], current_peer: &UserId) -> String {
        let mut output = String::new();
        output.push_str(&format!("\n{}\nOnline:\n", DOUBLE_RULE));

        if peers.is_empty() {
            output.push_str("(Nobody online)\n");
        } else {
            for peer in peers {
                let suffix = if peer == current_peer { " (chatting)" } else { "" };
                output.push_str(&format!("{}{}\n", peer, suffix));
            }
        }

        output.push_str(DOUBLE_RULE);
        output.push('\n');
        output
    }

    /// Format the inbound typing indicator
    pub fn format_peer_typing(name: &str) -> String {
        format!("\n... {} is typing\n", name)
    }

    /// Format the help text listing the slash commands
    pub fn format_help() -> String {
        [
            "/status     show the connection status",
            "/online     list online peers",
            "/reconnect  reconnect with a fresh token",
            "/read       mark the peer's messages as read",
            "/debug      show connection diagnostics",
            "/quit       leave the chat",
        ]
        .iter()
        .fold(String::from("\n"), |mut output, line| {
            output.push_str(line);
            output.push('\n');
            output
        })
    }
}
