//! Centralized bot configuration.
//!
//! This module provides strongly-typed configuration for the bot, loaded
//! via the `config` crate from environment variables. Nested fields use
//! `__` as the separator, e.g. `MEMORY__CHANNEL_LIMIT=150`.
//!
//! See [`OpenRouterConfig`] for the generation settings read from
//! `GENERATION__*`.

use kanna_ai::OpenRouterConfig;
use kanna_conversation::DEFAULT_CHANNEL_LIMIT;
use kanna_core::UserId;
use serde::Deserialize;
use std::path::PathBuf;

/// Bot configuration composed from library configs.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BotConfig {
    /// Conversation memory configuration.
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Assistant persona and context configuration.
    #[serde(default)]
    pub assistant: AssistantConfig,

    /// Text generation backend configuration.
    #[serde(default)]
    pub generation: OpenRouterConfig,
}

/// Conversation memory configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MemoryConfig {
    /// Location of the persisted document.
    #[serde(default = "default_memory_path")]
    pub path: PathBuf,

    /// Messages retained per channel.
    #[serde(default = "default_channel_limit")]
    pub channel_limit: usize,
}

fn default_memory_path() -> PathBuf {
    PathBuf::from("data/memory.json")
}

fn default_channel_limit() -> usize {
    DEFAULT_CHANNEL_LIMIT
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            path: default_memory_path(),
            channel_limit: default_channel_limit(),
        }
    }
}

/// How the assistant presents itself and how much history it reads.
#[derive(Debug, Clone, Deserialize)]
pub struct AssistantConfig {
    /// User id recorded on assistant turns (the bot account's id).
    #[serde(default = "default_assistant_user_id")]
    pub user_id: UserId,

    /// Display name recorded on assistant turns.
    #[serde(default = "default_assistant_name")]
    pub name: String,

    /// Persona prompt placed at the start of every context.
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Number of recent messages read back as context.
    /// Independent of the retained channel limit.
    #[serde(default = "default_history_window")]
    pub history_window: usize,
}

fn default_assistant_user_id() -> UserId {
    UserId::from("assistant")
}

fn default_assistant_name() -> String {
    "Kanna".to_string()
}

fn default_system_prompt() -> String {
    "You are Kanna Akizuki, a friendly, helpful AI assistant for this Discord server. \
     Keep replies concise and helpful."
        .to_string()
}

fn default_history_window() -> usize {
    30
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            user_id: default_assistant_user_id(),
            name: default_assistant_name(),
            system_prompt: default_system_prompt(),
            history_window: default_history_window(),
        }
    }
}

impl BotConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable cannot be converted to its field type.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_config_has_correct_defaults() {
        let config = MemoryConfig::default();
        assert_eq!(config.path, PathBuf::from("data/memory.json"));
        assert_eq!(config.channel_limit, 200);
    }

    #[test]
    fn assistant_config_has_correct_defaults() {
        let config = AssistantConfig::default();
        assert_eq!(config.name, "Kanna");
        assert_eq!(config.history_window, 30);
        assert!(config.system_prompt.starts_with("You are Kanna Akizuki"));
    }

    #[test]
    fn nested_overrides_are_applied() {
        let config: BotConfig = config::Config::builder()
            .set_override("memory.channel_limit", 3)
            .expect("override")
            .set_override("assistant.user_id", "999")
            .expect("override")
            .set_override("generation.model", "anthropic/claude")
            .expect("override")
            .build()
            .expect("build")
            .try_deserialize()
            .expect("deserialize");

        assert_eq!(config.memory.channel_limit, 3);
        assert_eq!(config.memory.path, PathBuf::from("data/memory.json"));
        assert_eq!(config.assistant.user_id, UserId::from("999"));
        assert_eq!(config.assistant.name, "Kanna");
        assert_eq!(config.generation.model, "anthropic/claude");
        assert!(config.generation.api_key.is_none());
    }
}
