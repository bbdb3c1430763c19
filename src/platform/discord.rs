//! Serenity-backed implementation of the platform boundary.

use crate::error::PlatformError;
use crate::impersonate::ImpersonationHandle;
use crate::platform::{PlatformClient, WebhookInfo};
use crate::{ChannelId, MessageId, Persona, RichCard, TranslatedParts};

use serenity::all::{
    ChannelId as DiscordChannelId, Colour, CreateEmbed, CreateEmbedAuthor, CreateEmbedFooter,
    CreateMessage, CreateWebhook, ExecuteWebhook, MessageId as DiscordMessageId, Timestamp,
    Webhook, WebhookId,
};
use secrecy::ExposeSecret;
use serenity::http::Http;
use std::sync::Arc;

/// Discord messages are limited to 2000 characters.
const MAX_MESSAGE_LENGTH: usize = 2000;

/// Production platform client over serenity's HTTP API.
pub struct DiscordPlatform {
    http: Arc<Http>,
}

impl DiscordPlatform {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

#[async_trait::async_trait]
impl PlatformClient for DiscordPlatform {
    async fn list_webhooks(
        &self,
        channel_id: ChannelId,
    ) -> Result<Vec<WebhookInfo>, PlatformError> {
        let webhooks = DiscordChannelId::new(channel_id)
            .webhooks(&self.http)
            .await
            .map_err(|error| classify(error, "list webhooks"))?;

        Ok(webhooks
            .into_iter()
            .map(|webhook| WebhookInfo {
                id: webhook.id.get(),
                name: webhook.name,
                token: expose_token(webhook.token),
            })
            .collect())
    }

    async fn create_webhook(
        &self,
        channel_id: ChannelId,
        name: &str,
    ) -> Result<WebhookInfo, PlatformError> {
        let webhook = DiscordChannelId::new(channel_id)
            .create_webhook(&self.http, CreateWebhook::new(name))
            .await
            .map_err(|error| classify(error, "create webhook"))?;

        Ok(WebhookInfo {
            id: webhook.id.get(),
            name: webhook.name,
            token: expose_token(webhook.token),
        })
    }

    async fn send_as_persona(
        &self,
        _channel_id: ChannelId,
        handle: &ImpersonationHandle,
        persona: &Persona,
        parts: &TranslatedParts,
    ) -> Result<(), PlatformError> {
        let webhook = Webhook::from_id_with_token(
            &self.http,
            WebhookId::new(handle.webhook_id),
            &handle.token,
        )
        .await
        .map_err(|error| classify(error, "resolve webhook"))?;

        let embeds: Vec<CreateEmbed> = parts.cards.iter().map(build_embed).collect();
        let chunks = split_message(&render_body(parts), MAX_MESSAGE_LENGTH);
        let last = chunks.len().saturating_sub(1);

        for (index, chunk) in chunks.into_iter().enumerate() {
            let mut builder = ExecuteWebhook::new()
                .content(chunk)
                .username(&persona.display_name);
            if let Some(avatar_url) = &persona.avatar_url {
                builder = builder.avatar_url(avatar_url);
            }
            // Cards ride on the final chunk so they appear below the text.
            if index == last && !embeds.is_empty() {
                builder = builder.embeds(embeds.clone());
            }
            webhook
                .execute(&self.http, true, builder)
                .await
                .map_err(|error| classify(error, "execute webhook"))?;
        }

        Ok(())
    }

    async fn send_plain(
        &self,
        channel_id: ChannelId,
        parts: &TranslatedParts,
    ) -> Result<(), PlatformError> {
        let embeds: Vec<CreateEmbed> = parts.cards.iter().map(build_embed).collect();
        let chunks = split_message(&render_body(parts), MAX_MESSAGE_LENGTH);
        let last = chunks.len().saturating_sub(1);

        for (index, chunk) in chunks.into_iter().enumerate() {
            let mut builder = CreateMessage::new().content(chunk);
            if index == last && !embeds.is_empty() {
                builder = builder.embeds(embeds.clone());
            }
            DiscordChannelId::new(channel_id)
                .send_message(&self.http, builder)
                .await
                .map_err(|error| classify(error, "send message"))?;
        }

        Ok(())
    }

    async fn delete_message(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
    ) -> Result<(), PlatformError> {
        DiscordChannelId::new(channel_id)
            .delete_message(&self.http, DiscordMessageId::new(message_id))
            .await
            .map_err(|error| classify(error, "delete message"))
    }
}

/// Serenity wraps webhook tokens in a redacting type; the relay stores
/// them as plain strings since they are re-presented to the API on every
/// send.
fn expose_token(token: Option<secrecy::SecretString>) -> Option<String> {
    token.map(|token| token.expose_secret().clone())
}

/// Body text plus media links, which Discord auto-renders inline.
fn render_body(parts: &TranslatedParts) -> String {
    let mut body = parts.body.trim_end().to_string();
    for url in &parts.media_urls {
        if !body.is_empty() {
            body.push('\n');
        }
        body.push_str(url);
    }
    body
}

fn build_embed(card: &RichCard) -> CreateEmbed {
    let mut embed = CreateEmbed::new();
    if let Some(title) = &card.title {
        embed = embed.title(title);
    }
    if let Some(description) = &card.description {
        embed = embed.description(description);
    }
    if let Some(color) = card.color {
        embed = embed.colour(Colour::new(color));
    }
    if let Some(url) = &card.url {
        embed = embed.url(url);
    }
    if let Some(timestamp) = card
        .timestamp
        .as_deref()
        .and_then(|raw| Timestamp::parse(raw).ok())
    {
        embed = embed.timestamp(timestamp);
    }
    if let Some(author) = &card.author {
        let mut builder = CreateEmbedAuthor::new(&author.name);
        if let Some(icon_url) = &author.icon_url {
            builder = builder.icon_url(icon_url);
        }
        embed = embed.author(builder);
    }
    if let Some(footer) = &card.footer {
        let mut builder = CreateEmbedFooter::new(&footer.text);
        if let Some(icon_url) = &footer.icon_url {
            builder = builder.icon_url(icon_url);
        }
        embed = embed.footer(builder);
    }
    if let Some(image) = &card.image {
        embed = embed.image(image);
    }
    if let Some(thumbnail) = &card.thumbnail {
        embed = embed.thumbnail(thumbnail);
    }
    for field in &card.fields {
        embed = embed.field(&field.name, &field.value, field.inline);
    }
    embed
}

/// Map a serenity error onto the relay's error taxonomy. Status-coded
/// HTTP failures classify by code; everything else is transport.
fn classify(error: serenity::Error, context: &str) -> PlatformError {
    if let serenity::Error::Http(serenity::http::HttpError::UnsuccessfulRequest(response)) = &error
    {
        let detail = format!("{context}: {}", response.error.message);
        return match response.status_code.as_u16() {
            404 => PlatformError::NotFound(detail),
            401 | 403 => PlatformError::PermissionDenied(detail),
            429 => PlatformError::RateLimited(detail),
            _ => PlatformError::Transport(detail),
        };
    }
    PlatformError::Transport(format!("{context}: {error}"))
}

/// Split a message into chunks within Discord's character limit.
/// Tries to split at newlines, then spaces, then hard-cuts. Limits are
/// in characters, not bytes, so CJK text splits on valid boundaries.
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.chars().count() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        let window_end = remaining
            .char_indices()
            .nth(max_len)
            .map(|(index, _)| index)
            .unwrap_or(remaining.len());
        let window = &remaining[..window_end];
        let split_at = window
            .rfind('\n')
            .or_else(|| window.rfind(' '))
            .filter(|&at| at > 0)
            .unwrap_or(window_end);

        chunks.push(remaining[..split_at].to_string());
        remaining = &remaining[split_at..];
        // Drop the separator itself but keep anything after it, so a
        // paragraph break at the boundary survives into the next chunk.
        if remaining.starts_with(['\n', ' ']) {
            remaining = &remaining[1..];
        }
    }

    if chunks.is_empty() {
        chunks.push(String::new());
    }
    chunks
}
