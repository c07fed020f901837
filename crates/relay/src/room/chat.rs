// Bounded per-room chat history.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use huddle_common::types::{ChatMessage, Identity, MessageKind};
use uuid::Uuid;

pub const CHAT_HISTORY_LIMIT: usize = 50;
pub const MAX_MESSAGE_CHARS: usize = 1000;

/// Outcome of validating raw chat input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizedContent {
    Accepted(String),
    /// Whitespace-only input.
    Empty,
    /// More than [`MAX_MESSAGE_CHARS`] characters after trimming.
    TooLong { chars: usize },
}

/// Neither `Empty` nor `TooLong` is reported back to the sender.
pub fn normalize_content(raw: &str) -> NormalizedContent {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return NormalizedContent::Empty;
    }
    let chars = trimmed.chars().count();
    if chars > MAX_MESSAGE_CHARS {
        return NormalizedContent::TooLong { chars };
    }
    NormalizedContent::Accepted(trimmed.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Appended {
    pub message: ChatMessage,
    pub evicted: Option<ChatMessage>,
}

/// FIFO log capped at [`CHAT_HISTORY_LIMIT`]; eviction only ever removes the head.
#[derive(Debug, Default)]
pub struct ChatHistory {
    messages: VecDeque<ChatMessage>,
}

impl ChatHistory {
    pub fn append(
        &mut self,
        sender: Identity,
        content: String,
        kind: MessageKind,
        created_at: DateTime<Utc>,
    ) -> Appended {
        let message = ChatMessage {
            id: Uuid::now_v7().to_string(),
            content,
            sender,
            kind,
            created_at,
        };

        self.messages.push_back(message.clone());
        let evicted = if self.messages.len() > CHAT_HISTORY_LIMIT {
            self.messages.pop_front()
        } else {
            None
        };

        Appended { message, evicted }
    }

    /// Oldest-first copy of the retained messages.
    pub fn snapshot(&self) -> Vec<ChatMessage> {
        self.messages.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ada() -> Identity {
        Identity::new("user-ada", "Ada")
    }

    #[test]
    fn normalize_trims_and_drops_whitespace() {
        assert_eq!(
            normalize_content("  hello \n"),
            NormalizedContent::Accepted("hello".to_string())
        );
        assert_eq!(normalize_content(" \t\n "), NormalizedContent::Empty);
        assert_eq!(normalize_content(""), NormalizedContent::Empty);
    }

    #[test]
    fn normalize_counts_characters_not_bytes() {
        let at_limit = "é".repeat(MAX_MESSAGE_CHARS);
        assert!(matches!(normalize_content(&at_limit), NormalizedContent::Accepted(_)));

        let padded = format!("  {}  ", "a".repeat(MAX_MESSAGE_CHARS));
        assert!(matches!(normalize_content(&padded), NormalizedContent::Accepted(_)));

        let over_limit = "a".repeat(MAX_MESSAGE_CHARS + 1);
        assert_eq!(
            normalize_content(&over_limit),
            NormalizedContent::TooLong { chars: MAX_MESSAGE_CHARS + 1 }
        );
    }

    #[test]
    fn history_retains_at_most_limit_oldest_first() {
        let mut history = ChatHistory::default();
        let mut evicted = Vec::new();

        for index in 1..=CHAT_HISTORY_LIMIT + 1 {
            let appended =
                history.append(ada(), format!("post {index}"), MessageKind::Text, Utc::now());
            if let Some(message) = appended.evicted {
                evicted.push(message.content);
            }
        }

        let snapshot = history.snapshot();
        assert_eq!(history.len(), CHAT_HISTORY_LIMIT);
        assert_eq!(snapshot.first().map(|m| m.content.as_str()), Some("post 2"));
        assert_eq!(snapshot.last().map(|m| m.content.as_str()), Some("post 51"));
        assert_eq!(evicted, vec!["post 1".to_string()]);
    }

    #[test]
    fn message_ids_are_unique_and_ordered() {
        let mut history = ChatHistory::default();
        let first = history.append(ada(), "a".into(), MessageKind::Text, Utc::now()).message;
        let second = history.append(ada(), "b".into(), MessageKind::Text, Utc::now()).message;

        assert_ne!(first.id, second.id);
        assert!(first.id < second.id);
        assert_eq!(first.sender, ada());
    }

    #[test]
    fn snapshot_is_detached_from_later_appends() {
        let mut history = ChatHistory::default();
        history.append(ada(), "a".into(), MessageKind::Text, Utc::now());
        let before = history.snapshot();
        history.append(ada(), "b".into(), MessageKind::Text, Utc::now());

        assert_eq!(before.len(), 1);
        assert_eq!(history.snapshot().len(), 2);
    }
}
