//! Webhook acquisition and caching, one webhook per physical channel.
//!
//! Acquisition is cache-first with single-flight creation: concurrent
//! acquirers for the same channel wait on one in-flight resolution
//! instead of racing to create duplicate webhooks.

use crate::error::PlatformError;
use crate::platform::PlatformClient;
use crate::ChannelId;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// An executable webhook this process owns for one channel.
#[derive(Debug, Clone)]
pub struct ImpersonationHandle {
    pub webhook_id: u64,
    pub token: String,
}

type Slot = Arc<Mutex<Option<ImpersonationHandle>>>;

/// Cache of per-channel impersonation webhooks.
pub struct ImpersonationManager {
    platform: Arc<dyn PlatformClient>,
    /// Name used when creating webhooks, and to recognize ours in listings.
    webhook_name: String,
    slots: RwLock<HashMap<ChannelId, Slot>>,
    /// Every webhook id this process has ever resolved, kept across
    /// invalidation so loop detection still recognizes in-flight messages
    /// from an evicted webhook.
    known_ids: RwLock<HashSet<u64>>,
}

impl ImpersonationManager {
    pub fn new(platform: Arc<dyn PlatformClient>, webhook_name: impl Into<String>) -> Self {
        Self {
            platform,
            webhook_name: webhook_name.into(),
            slots: RwLock::new(HashMap::new()),
            known_ids: RwLock::new(HashSet::new()),
        }
    }

    /// Get the channel's webhook, resolving (existing or newly created)
    /// on cache miss. Holding the slot lock across resolution is what
    /// makes creation single-flight per channel.
    pub async fn acquire(
        &self,
        channel_id: ChannelId,
    ) -> Result<ImpersonationHandle, PlatformError> {
        let slot = self.slot(channel_id).await;
        let mut guard = slot.lock().await;

        if let Some(handle) = guard.as_ref() {
            return Ok(handle.clone());
        }

        let handle = self.resolve(channel_id).await?;
        self.known_ids.write().await.insert(handle.webhook_id);
        *guard = Some(handle.clone());
        Ok(handle)
    }

    /// Drop the cached handle so the next acquire re-resolves. Called
    /// after NotFound-class send failures (webhook deleted out of band).
    pub async fn invalidate(&self, channel_id: ChannelId) {
        let slot = {
            let slots = self.slots.read().await;
            slots.get(&channel_id).cloned()
        };
        if let Some(slot) = slot {
            let mut guard = slot.lock().await;
            if let Some(handle) = guard.take() {
                tracing::debug!(
                    channel_id,
                    webhook_id = handle.webhook_id,
                    "evicted impersonation webhook"
                );
            }
        }
    }

    /// Whether a webhook id belongs to this process (used for loop
    /// detection on inbound webhook-authored messages).
    pub async fn is_own_webhook(&self, webhook_id: u64) -> bool {
        self.known_ids.read().await.contains(&webhook_id)
    }

    async fn slot(&self, channel_id: ChannelId) -> Slot {
        {
            let slots = self.slots.read().await;
            if let Some(slot) = slots.get(&channel_id) {
                return slot.clone();
            }
        }
        let mut slots = self.slots.write().await;
        slots.entry(channel_id).or_default().clone()
    }

    /// Find an existing webhook of ours (name matches and the token is
    /// readable, which Discord only exposes to the owner), else create one.
    async fn resolve(&self, channel_id: ChannelId) -> Result<ImpersonationHandle, PlatformError> {
        let existing = self.platform.list_webhooks(channel_id).await?;
        for webhook in existing {
            let ours = webhook.name.as_deref() == Some(self.webhook_name.as_str());
            if let (true, Some(token)) = (ours, webhook.token) {
                tracing::debug!(
                    channel_id,
                    webhook_id = webhook.id,
                    "reusing existing impersonation webhook"
                );
                return Ok(ImpersonationHandle {
                    webhook_id: webhook.id,
                    token,
                });
            }
        }

        let created = self
            .platform
            .create_webhook(channel_id, &self.webhook_name)
            .await?;
        let token = created.token.ok_or_else(|| {
            PlatformError::Transport("created webhook came back without a token".into())
        })?;

        tracing::info!(
            channel_id,
            webhook_id = created.id,
            "created impersonation webhook"
        );
        Ok(ImpersonationHandle {
            webhook_id: created.id,
            token,
        })
    }
}
