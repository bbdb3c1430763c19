//! Per-channel relay policy: how (and whether) a channel participates,
//! plus persona overrides. Policies survive restarts via a JSON file
//! written on every mutation.

use crate::error::Result;
use crate::{ChannelId, Persona, UserId};

use anyhow::Context as _;
use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Whether and how a channel participates in relaying.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelMode {
    /// Channel is not processed at all.
    #[default]
    Off,
    /// Delete the original and repost the translation in its place.
    Replace,
    /// Leave the original and post the translation after it.
    Reply,
}

/// How translated structure is rendered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStyle {
    /// Text stays text, cards stay cards.
    #[default]
    Auto,
    /// Everything flattened to plain text blocks.
    Flat,
    /// Plain text promoted into a single card.
    Card,
}

/// Which messages are relayed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Only messages whose translation actually changed the text.
    #[default]
    TranslateOnly,
    /// Every message with any content, reformatted even when untranslated.
    AllMessages,
}

/// One channel's relay configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelPolicy {
    #[serde(default)]
    pub mode: ChannelMode,
    #[serde(default)]
    pub style: OutputStyle,
    #[serde(default)]
    pub scope: Scope,
    /// Relay messages whose only content is an untranslated card or
    /// attachment (re-renders card borders at the cost of extra posts).
    #[serde(default)]
    pub relay_untranslated_cards: bool,
    /// Keyed by author id (as a decimal string) or display name.
    #[serde(default)]
    pub personas: HashMap<String, Persona>,
}

/// Owner of all per-channel policies. Reads are lock-free snapshots;
/// mutations copy, persist, then swap, so readers never block and the
/// file on disk never lags behind an acknowledged command.
pub struct PolicyStore {
    path: PathBuf,
    policies: ArcSwap<HashMap<ChannelId, ChannelPolicy>>,
    /// Serializes the copy-persist-swap sequence across mutators.
    write_lock: std::sync::Mutex<()>,
}

impl PolicyStore {
    /// Load the store from `path`, starting empty if the file is absent.
    pub fn load(path: PathBuf) -> Result<Self> {
        let policies: HashMap<ChannelId, ChannelPolicy> = match std::fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents)
                .with_context(|| format!("corrupt policy file: {}", path.display()))?,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(error) => return Err(error.into()),
        };

        tracing::info!(
            channels = policies.len(),
            path = %path.display(),
            "channel policies loaded"
        );

        Ok(Self {
            path,
            policies: ArcSwap::from_pointee(policies),
            write_lock: std::sync::Mutex::new(()),
        })
    }

    /// Policy for a channel; absent means `Off` with defaults.
    pub fn get(&self, channel_id: ChannelId) -> ChannelPolicy {
        self.policies
            .load()
            .get(&channel_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Mutate one channel's policy and persist before returning, so an
    /// acknowledged admin command can never diverge from disk.
    pub fn update<F>(&self, channel_id: ChannelId, mutate: F) -> Result<ChannelPolicy>
    where
        F: FnOnce(&mut ChannelPolicy),
    {
        let _guard = self.write_lock.lock().expect("policy write lock poisoned");

        let mut policies: HashMap<ChannelId, ChannelPolicy> =
            (**self.policies.load()).clone();
        let policy = policies.entry(channel_id).or_default();
        mutate(policy);
        let updated = policy.clone();

        self.persist(&policies)?;
        self.policies.store(Arc::new(policies));
        Ok(updated)
    }

    /// Resolve a persona override: author id first, display name second.
    pub fn persona_for(
        &self,
        channel_id: ChannelId,
        author_id: UserId,
        display_name: &str,
    ) -> Option<Persona> {
        let policies = self.policies.load();
        let personas = &policies.get(&channel_id)?.personas;
        personas
            .get(&author_id.to_string())
            .or_else(|| personas.get(display_name))
            .cloned()
    }

    /// Atomic write: temp file in the same directory, then rename.
    fn persist(&self, policies: &HashMap<ChannelId, ChannelPolicy>) -> Result<()> {
        let contents = serde_json::to_string_pretty(policies)
            .context("failed to serialize channel policies")?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, contents)
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to replace {}", self.path.display()))?;
        Ok(())
    }
}
