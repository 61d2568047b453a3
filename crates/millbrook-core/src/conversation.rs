//! Conversation state for the active character: an append-only transcript
//! plus the evolving system prompt.
//!
//! Messages are never edited or reordered once appended. Switching
//! characters is the only operation that replaces the list, and it always
//! replaces it with a single scripted greeting. The system prompt starts at
//! the character's base prompt and only grows, by blank-line concatenation
//! of model-suggested deltas.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::character::Character;

/// Speaker id attached to user-authored messages.
pub const USER_ID: &str = "user";
/// Display name attached to user-authored messages.
pub const USER_NAME: &str = "You";

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One transcript entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique within the conversation, strictly increasing.
    pub id: u64,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Authoring speaker: a character id, or [`USER_ID`].
    pub character_id: String,
    pub character_name: String,
}

/// Transcript and prompt state for one active character.
#[derive(Debug, Clone)]
pub struct Conversation {
    active_character_id: String,
    system_prompt: String,
    messages: Vec<Message>,
    next_id: u64,
}

impl Conversation {
    /// Open a conversation with `character`: one greeting message, prompt
    /// state at the character's base prompt.
    pub fn start_with(character: &Character) -> Self {
        let mut conversation = Self {
            active_character_id: String::new(),
            system_prompt: String::new(),
            messages: Vec::new(),
            next_id: 1,
        };
        conversation.reset_for(character);
        conversation
    }

    /// Replace the transcript with `character`'s greeting and drop any
    /// accumulated prompt deltas. The one operation that is not append-only.
    pub fn reset_for(&mut self, character: &Character) {
        self.active_character_id = character.id.clone();
        self.system_prompt = character.base_prompt.clone();
        self.messages.clear();
        self.next_id = 1;
        self.append(Role::Assistant, &character.greeting, &character.id, &character.display_name);
    }

    /// Append what the user said. Returns the new message id.
    pub fn push_user(&mut self, content: &str) -> u64 {
        self.append(Role::User, content, USER_ID, USER_NAME)
    }

    /// Append a character's spoken line. Returns the new message id.
    pub fn push_assistant(&mut self, character: &Character, content: &str) -> u64 {
        self.append(Role::Assistant, content, &character.id, &character.display_name)
    }

    /// Grow the system prompt by one model-suggested delta. Concatenation
    /// only; the prompt is never replaced or shortened. Blank deltas are
    /// ignored.
    pub fn apply_prompt_delta(&mut self, delta: &str) {
        let delta = delta.trim();
        if delta.is_empty() {
            return;
        }
        self.system_prompt.push_str("\n\n");
        self.system_prompt.push_str(delta);
        debug!(
            "Conversation: prompt for '{}' grew by {} chars",
            self.active_character_id,
            delta.len()
        );
    }

    pub fn active_character_id(&self) -> &str {
        &self.active_character_id
    }

    /// Current system prompt: base prompt plus every adopted delta.
    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// Full transcript in append order.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Most recent assistant line (replay source), if any.
    pub fn last_assistant(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.role == Role::Assistant)
    }

    fn append(&mut self, role: Role, content: &str, character_id: &str, character_name: &str) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.messages.push(Message {
            id,
            role,
            content: content.to_string(),
            timestamp: Utc::now(),
            character_id: character_id.to_string(),
            character_name: character_name.to_string(),
        });
        id
    }
}
