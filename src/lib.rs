//! Babelhook: a Discord bot that translates channel messages and reposts
//! them through a webhook under the original author's name and avatar.

pub mod compose;
pub mod config;
pub mod error;
pub mod extract;
pub mod gateway;
pub mod impersonate;
pub mod platform;
pub mod policy;
pub mod relay;
pub mod sanitize;
pub mod translate;

pub use error::{Error, Result};

use serde::{Deserialize, Serialize};

/// Channel identifier type (Discord snowflake).
pub type ChannelId = u64;

/// Message identifier type (Discord snowflake).
pub type MessageId = u64;

/// User identifier type (Discord snowflake).
pub type UserId = u64;

/// The author of an inbound message as the gateway saw it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Author {
    pub id: UserId,
    pub display_name: String,
    pub avatar_url: Option<String>,
    /// True for any bot account, including this process.
    pub is_bot: bool,
}

/// One inbound message, immutable for the lifetime of its relay task.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub channel_id: ChannelId,
    pub message_id: MessageId,
    pub author: Author,
    pub body: String,
    pub cards: Vec<RichCard>,
    pub attachment_urls: Vec<String>,
    /// True when the message was posted through a webhook this process
    /// owns for its channel. Required for loop prevention.
    pub via_own_impersonation: bool,
}

/// Display identity used when reposting a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Persona {
    pub display_name: String,
    pub avatar_url: Option<String>,
}

/// Author block inside a rich card. The name is an identity and is never
/// translated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardAuthor {
    pub name: String,
    pub icon_url: Option<String>,
}

/// Footer block inside a rich card.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardFooter {
    pub text: String,
    pub icon_url: Option<String>,
}

/// Named field inside a rich card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

/// A rich card (Discord embed). Text fields are translatable; colour,
/// URLs, and timestamps are carried through unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RichCard {
    pub title: Option<String>,
    pub description: Option<String>,
    pub color: Option<u32>,
    pub url: Option<String>,
    /// RFC 3339 timestamp, passed through verbatim.
    pub timestamp: Option<String>,
    pub author: Option<CardAuthor>,
    pub footer: Option<CardFooter>,
    pub image: Option<String>,
    pub thumbnail: Option<String>,
    pub fields: Vec<CardField>,
}

impl RichCard {
    /// Whether the card carries any textual content. Cards without text
    /// but with an image are demoted to plain media links during
    /// extraction so Discord renders the image without an empty border.
    pub fn has_text(&self) -> bool {
        self.title.as_deref().is_some_and(|t| !t.trim().is_empty())
            || self
                .description
                .as_deref()
                .is_some_and(|d| !d.trim().is_empty())
            || self
                .footer
                .as_ref()
                .is_some_and(|f| !f.text.trim().is_empty())
            || !self.fields.is_empty()
    }
}

/// Structured, language-neutral result of extracting one message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranslatedParts {
    pub body: String,
    pub cards: Vec<RichCard>,
    /// Images and attachments kept as bare links so the platform renders
    /// them inline without a card border.
    pub media_urls: Vec<String>,
}

impl TranslatedParts {
    /// True when there is nothing worth sending.
    pub fn is_empty(&self) -> bool {
        self.body.trim().is_empty() && self.cards.is_empty() && self.media_urls.is_empty()
    }
}
