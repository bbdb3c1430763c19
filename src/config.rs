//! Configuration loading and validation.

use crate::error::{ConfigError, Result};
use anyhow::Context as _;
use std::time::Duration;

/// Babelhook configuration, loaded once from the environment at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Data directory path (policy persistence lives here).
    pub data_dir: std::path::PathBuf,

    /// Discord bot token.
    pub discord_token: String,

    /// Translation engine settings.
    pub translator: TranslatorConfig,
}

/// Translation engine configuration.
#[derive(Debug, Clone)]
pub struct TranslatorConfig {
    /// OpenRouter API key.
    pub api_key: String,

    /// Chat-completions model used for translation.
    pub model: String,

    /// Pinned source language. `None` means "detect per message".
    pub source_lang: Option<String>,

    /// Target language code.
    pub target_lang: String,

    /// Bodies with fewer words than this are not translated.
    pub min_words: usize,

    /// Per-call timeout for engine requests.
    pub timeout: Duration,

    /// Maximum engine calls in flight at once.
    pub max_in_flight: usize,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: "deepseek/deepseek-chat:free".into(),
            source_lang: Some("en".into()),
            target_lang: "zh".into(),
            min_words: 5,
            timeout: Duration::from_secs(20),
            max_in_flight: 4,
        }
    }
}

impl Config {
    /// Load configuration from the environment.
    pub fn load() -> Result<Self> {
        let data_dir = dirs::data_dir()
            .map(|d| d.join("babelhook"))
            .unwrap_or_else(|| std::path::PathBuf::from("./data"));

        // Ensure data directory exists
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

        let discord_token = std::env::var("DISCORD_TOKEN")
            .map_err(|_| ConfigError::MissingVar("DISCORD_TOKEN".into()))?;

        let api_key = std::env::var("OPENROUTER_API_KEY")
            .map_err(|_| ConfigError::MissingVar("OPENROUTER_API_KEY".into()))?;

        let defaults = TranslatorConfig::default();

        let source_lang = match std::env::var("BABELHOOK_SOURCE_LANG") {
            Ok(value) if value.eq_ignore_ascii_case("auto") => None,
            Ok(value) if !value.is_empty() => Some(value),
            _ => defaults.source_lang.clone(),
        };

        let min_words = match std::env::var("BABELHOOK_MIN_WORDS") {
            Ok(value) => value.parse().map_err(|_| {
                ConfigError::Invalid(format!("BABELHOOK_MIN_WORDS is not a number: {value}"))
            })?,
            Err(_) => defaults.min_words,
        };

        let timeout = match std::env::var("BABELHOOK_TRANSLATE_TIMEOUT_SECS") {
            Ok(value) => {
                let seconds: u64 = value.parse().map_err(|_| {
                    ConfigError::Invalid(format!(
                        "BABELHOOK_TRANSLATE_TIMEOUT_SECS is not a number: {value}"
                    ))
                })?;
                Duration::from_secs(seconds)
            }
            Err(_) => defaults.timeout,
        };

        let translator = TranslatorConfig {
            api_key,
            model: std::env::var("BABELHOOK_MODEL").unwrap_or(defaults.model),
            source_lang,
            target_lang: std::env::var("BABELHOOK_TARGET_LANG").unwrap_or(defaults.target_lang),
            min_words,
            timeout,
            max_in_flight: defaults.max_in_flight,
        };

        Ok(Self {
            data_dir,
            discord_token,
            translator,
        })
    }

    /// Path of the persisted channel-policy file.
    pub fn policy_path(&self) -> std::path::PathBuf {
        self.data_dir.join("policies.json")
    }
}
