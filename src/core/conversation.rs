use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::message::{Message, Part};

/// A persisted conversation: stable id, lazily-assigned title, and the
/// ordered transcript. "New chat" is simply a conversation that has not been
/// persisted yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn empty() -> Self {
        Self::of_id(Uuid::new_v4().to_string())
    }

    pub fn of_id(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            title: String::new(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn of_user(prompt: impl Into<String>) -> Self {
        let mut conversation = Self::empty();
        conversation.messages.push(Message::user(prompt));
        conversation
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Local image references currently held by the transcript, for the file
    /// manager to diff against when cleaning up orphaned uploads.
    pub fn local_image_urls(&self) -> Vec<String> {
        self.messages
            .iter()
            .flat_map(|message| message.parts.iter())
            .filter_map(|part| match part {
                Part::Image { url, is_local: true } => Some(url.clone()),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn of_user_seeds_the_transcript() {
        let conversation = Conversation::of_user("hello");
        assert_eq!(conversation.messages.len(), 1);
        assert!(conversation.messages[0].role.is_user());
        assert!(conversation.title.is_empty());
    }

    #[test]
    fn round_trips_through_serde() {
        let mut conversation = Conversation::of_user("hi");
        conversation.title = "Greetings".to_string();
        let json = serde_json::to_string(&conversation).unwrap();
        let back: Conversation = serde_json::from_str(&json).unwrap();
        assert_eq!(back, conversation);
    }

    #[test]
    fn lists_only_local_images() {
        let mut conversation = Conversation::empty();
        conversation.messages.push(Message::new(
            crate::core::message::Role::User,
            vec![
                Part::text("see"),
                Part::image("file:///tmp/a.png", true),
                Part::image("https://img.example/b.png", false),
            ],
        ));
        assert_eq!(conversation.local_image_urls(), vec!["file:///tmp/a.png"]);
    }
}
