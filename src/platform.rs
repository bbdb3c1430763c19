//! Outbound platform boundary: the handful of Discord operations the
//! relay consumes, behind an object-safe trait so the dispatcher and
//! webhook cache can be exercised against test doubles.

pub mod discord;

use crate::error::PlatformError;
use crate::impersonate::ImpersonationHandle;
use crate::{ChannelId, MessageId, Persona, TranslatedParts};

pub use discord::DiscordPlatform;

/// A webhook as listed or created on the platform.
#[derive(Debug, Clone)]
pub struct WebhookInfo {
    pub id: u64,
    pub name: Option<String>,
    /// Present only for webhooks this bot can execute. Listing includes
    /// other owners' webhooks with no token; those are unusable here.
    pub token: Option<String>,
}

/// Platform operations consumed by the relay pipeline.
#[async_trait::async_trait]
pub trait PlatformClient: Send + Sync {
    /// List the webhooks attached to a channel.
    async fn list_webhooks(&self, channel_id: ChannelId)
    -> Result<Vec<WebhookInfo>, PlatformError>;

    /// Create a webhook on a channel.
    async fn create_webhook(
        &self,
        channel_id: ChannelId,
        name: &str,
    ) -> Result<WebhookInfo, PlatformError>;

    /// Execute a webhook so the payload renders under `persona`'s
    /// display name and avatar.
    async fn send_as_persona(
        &self,
        channel_id: ChannelId,
        handle: &ImpersonationHandle,
        persona: &Persona,
        parts: &TranslatedParts,
    ) -> Result<(), PlatformError>;

    /// Ordinary bot-identity send, used as the impersonation fallback.
    async fn send_plain(
        &self,
        channel_id: ChannelId,
        parts: &TranslatedParts,
    ) -> Result<(), PlatformError>;

    /// Delete one message.
    async fn delete_message(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
    ) -> Result<(), PlatformError>;
}
