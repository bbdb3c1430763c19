//! Translation adapter over the OpenRouter chat-completions API.
//!
//! Translation failure is never fatal: every error path inside
//! [`Translator::translate`] degrades to returning the original text so a
//! relay can proceed (or be skipped as unchanged) without surfacing the
//! engine problem to the channel.

use crate::config::TranslatorConfig;
use crate::error::TranslateError;
use crate::sanitize;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Semaphore;

const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Outcome of one translation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationResult {
    pub text: String,
    /// False whenever the adapter skipped or fell back to the input.
    pub changed: bool,
}

impl TranslationResult {
    fn unchanged(text: &str) -> Self {
        Self {
            text: text.to_string(),
            changed: false,
        }
    }
}

/// External translation engine boundary.
#[async_trait::async_trait]
pub trait TranslationEngine: Send + Sync {
    /// Detect the dominant language of `text`, returning a short code
    /// such as `en` or `zh`.
    async fn detect_language(&self, text: &str) -> Result<String, TranslateError>;

    /// Translate `text` from `source` into `target`.
    async fn translate(
        &self,
        text: &str,
        source: &str,
        target: &str,
    ) -> Result<String, TranslateError>;
}

/// OpenRouter-backed engine.
pub struct OpenRouterEngine {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

impl OpenRouterEngine {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    async fn complete(&self, prompt: String) -> Result<String, TranslateError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .client
            .post(OPENROUTER_URL)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|error| TranslateError::Request(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TranslateError::BadStatus {
                status: status.as_u16(),
            });
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|error| TranslateError::Request(error.to_string()))?;

        body.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or(TranslateError::EmptyResponse)
    }
}

#[async_trait::async_trait]
impl TranslationEngine for OpenRouterEngine {
    async fn detect_language(&self, text: &str) -> Result<String, TranslateError> {
        let prompt = format!(
            "Reply with only the ISO 639-1 code of the language this text is written in:\n\n{text}"
        );
        let code = self.complete(prompt).await?;
        Ok(code.to_lowercase())
    }

    async fn translate(
        &self,
        text: &str,
        source: &str,
        target: &str,
    ) -> Result<String, TranslateError> {
        let prompt = format!(
            "Translate the following {source} text to {target}. \
             Preserve line breaks and any @@PROTECTED_MENTION_N@@ tokens exactly. \
             Reply with only the translation:\n\n{text}"
        );
        self.complete(prompt).await
    }
}

/// Policy wrapper around an engine: thresholds, timeout, bounded
/// concurrency, whitespace cleanup, and graceful fallback.
pub struct Translator {
    engine: Arc<dyn TranslationEngine>,
    config: TranslatorConfig,
    permits: Arc<Semaphore>,
}

impl Translator {
    pub fn new(engine: Arc<dyn TranslationEngine>, config: TranslatorConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_in_flight.max(1)));
        Self {
            engine,
            config,
            permits,
        }
    }

    /// Translate one text field. Skips the engine entirely for empty,
    /// too-short, or already-target-language input.
    pub async fn translate(&self, text: &str) -> TranslationResult {
        if self.below_threshold(text) {
            return TranslationResult::unchanged(text);
        }
        self.translate_fragment(text).await
    }

    /// Whether `text` has too few words to be worth an engine call. The
    /// extractor evaluates this once over the whole body, so individual
    /// short lines inside a long message still translate.
    pub fn below_threshold(&self, text: &str) -> bool {
        let stripped = sanitize::strip_decorations(text);
        stripped.split_whitespace().count() < self.config.min_words
    }

    /// Translate a fragment whose overall length was already judged by
    /// the caller. Still skips empty and already-target-language input.
    pub async fn translate_fragment(&self, text: &str) -> TranslationResult {
        if text.trim().is_empty() {
            return TranslationResult::unchanged(text);
        }

        let stripped = sanitize::strip_decorations(text);
        if sanitize::is_already_target_language(&stripped) {
            return TranslationResult::unchanged(text);
        }

        let source = match &self.config.source_lang {
            Some(lang) => lang.clone(),
            None => match self.detect(&stripped).await {
                Some(lang) if !lang.starts_with(&self.config.target_lang) => lang,
                // Detector says target language (or failed): leave alone.
                _ => return TranslationResult::unchanged(text),
            },
        };

        // The permit bounds concurrent engine calls so a burst of messages
        // cannot open unbounded connections; waiting here suspends only
        // this message's task.
        let _permit = match self.permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return TranslationResult::unchanged(text),
        };

        let call = self
            .engine
            .translate(text, &source, &self.config.target_lang);
        let translated = match tokio::time::timeout(self.config.timeout, call).await {
            Ok(Ok(translated)) => translated,
            Ok(Err(error)) => {
                tracing::warn!(%error, "translation failed, keeping original text");
                return TranslationResult::unchanged(text);
            }
            Err(_) => {
                let error = TranslateError::Timeout {
                    seconds: self.config.timeout.as_secs(),
                };
                tracing::warn!(%error, "keeping original text");
                return TranslationResult::unchanged(text);
            }
        };

        let normalized = normalize_whitespace(text, &translated);
        let changed = normalized.trim() != text.trim();
        TranslationResult {
            text: normalized,
            changed,
        }
    }

    async fn detect(&self, text: &str) -> Option<String> {
        let call = self.engine.detect_language(text);
        match tokio::time::timeout(self.config.timeout, call).await {
            Ok(Ok(lang)) => Some(lang),
            Ok(Err(error)) => {
                tracing::debug!(%error, "language detection failed");
                None
            }
            Err(_) => {
                tracing::debug!("language detection timed out");
                None
            }
        }
    }
}

/// Clean up whitespace artifacts the engine tends to introduce. When the
/// translation kept the source's line count, blank lines are rebuilt at
/// the source's positions. Otherwise line counts diverged and the best we
/// can do is trim trailing spaces and, for sources without paragraph
/// breaks, collapse any the engine inserted.
fn normalize_whitespace(source: &str, translated: &str) -> String {
    let source_lines: Vec<&str> = source.lines().collect();
    let source_content = source_lines
        .iter()
        .filter(|line| !line.trim().is_empty())
        .count();
    let content: Vec<&str> = translated
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .collect();

    if content.len() == source_content {
        let mut next = content.into_iter();
        let rebuilt: Vec<&str> = source_lines
            .iter()
            .map(|line| {
                if line.trim().is_empty() {
                    ""
                } else {
                    next.next().unwrap_or("")
                }
            })
            .collect();
        return rebuilt.join("\n").trim_end().to_string();
    }

    let mut result = translated
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n");

    if !source.contains("\n\n") {
        while result.contains("\n\n") {
            result = result.replace("\n\n", "\n");
        }
    }

    result.trim_end().to_string()
}
