//! Prompt context assembly.
//!
//! Turns a channel's recent history into the role-tagged entries handed to
//! the text generation service. User turns carry a `Name: text` speaker tag
//! so the model can tell channel members apart.

use crate::message::Message;
use serde::{Deserialize, Serialize};

/// Instructions appended to every persona prompt.
pub const SPEAKER_INSTRUCTIONS: &str = "Always keep track of who said what. \
Address users by their display names. \
Do not prefix your replies with your name. Reply directly. \
The following context includes speaker tags like \"Name: message\".";

/// Role of a context entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextRole {
    System,
    User,
    Assistant,
}

/// A single role-tagged entry of generation context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub role: ContextRole,
    pub content: String,
}

impl ContextEntry {
    fn new(role: ContextRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Builds the context for one reply.
#[derive(Debug, Clone)]
pub struct ContextBuilder<'a> {
    system_prompt: &'a str,
    speaker_profile: Option<&'a str>,
    history: &'a [Message],
}

impl<'a> ContextBuilder<'a> {
    /// Starts a context with the given persona prompt.
    #[must_use]
    pub fn new(system_prompt: &'a str) -> Self {
        Self {
            system_prompt,
            speaker_profile: None,
            history: &[],
        }
    }

    /// Adds what is remembered about the current speaker.
    ///
    /// Empty profiles are ignored.
    #[must_use]
    pub fn with_speaker_profile(mut self, profile: &'a str) -> Self {
        self.speaker_profile = Some(profile).filter(|p| !p.is_empty());
        self
    }

    /// Adds prior turns, oldest first.
    #[must_use]
    pub fn with_history(mut self, history: &'a [Message]) -> Self {
        self.history = history;
        self
    }

    /// Finishes the context with the new user turn.
    #[must_use]
    pub fn build(self, speaker: &str, text: &str) -> Vec<ContextEntry> {
        let mut system = format!("{}\n{SPEAKER_INSTRUCTIONS}", self.system_prompt.trim_end());
        if let Some(profile) = self.speaker_profile {
            system.push_str("\nKnown about the current speaker: ");
            system.push_str(profile);
        }

        let mut entries = Vec::with_capacity(self.history.len() + 2);
        entries.push(ContextEntry::new(ContextRole::System, system));
        entries.extend(self.history.iter().map(|message| {
            if message.is_assistant() {
                ContextEntry::new(ContextRole::Assistant, message.text.clone())
            } else {
                ContextEntry::new(ContextRole::User, speaker_tagged(&message.name, &message.text))
            }
        }));
        entries.push(ContextEntry::new(ContextRole::User, speaker_tagged(speaker, text)));
        entries
    }
}

fn speaker_tagged(name: &str, text: &str) -> String {
    format!("{name}: {text}")
}
