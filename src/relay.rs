//! The relay dispatcher: decides, per inbound message, whether to act,
//! extracts and reshapes the content, and performs the delete-and-repost
//! (or reply) against the platform.
//!
//! Every message reaches exactly one terminal outcome. No error from this
//! pipeline propagates into the gateway's event loop; callers log the
//! `Err` outcomes and move on.

use crate::compose::compose;
use crate::error::{PlatformError, RelayError};
use crate::extract::extract;
use crate::impersonate::ImpersonationManager;
use crate::platform::PlatformClient;
use crate::policy::{ChannelMode, PolicyStore, Scope};
use crate::translate::Translator;
use crate::{ChannelId, Persona, RawMessage, RichCard, TranslatedParts};

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

/// Terminal result of processing one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Authored by this process (directly or via its webhook).
    SkippedOwn,
    /// No persona override and the channel mode is off.
    SkippedPolicy,
    /// Nothing in the translation differed from the original.
    SkippedUnchanged,
    /// Nothing worth sending after extraction/composition.
    SkippedEmpty,
    Sent {
        /// The original message was deleted first.
        deleted: bool,
        /// Impersonation was unavailable; sent as a plain bot message.
        fallback: bool,
    },
}

/// Per-message orchestrator. All mutable state lives in the injected
/// stores; the dispatcher itself only holds the per-channel send locks
/// that keep the delete+send pair from interleaving across messages.
pub struct RelayDispatcher {
    policies: Arc<PolicyStore>,
    translator: Arc<Translator>,
    webhooks: Arc<ImpersonationManager>,
    platform: Arc<dyn PlatformClient>,
    /// This bot's own user id, set once the gateway is ready. Zero means
    /// not yet known.
    self_user_id: AtomicU64,
    send_locks: std::sync::Mutex<HashMap<ChannelId, Arc<Mutex<()>>>>,
}

impl RelayDispatcher {
    pub fn new(
        policies: Arc<PolicyStore>,
        translator: Arc<Translator>,
        webhooks: Arc<ImpersonationManager>,
        platform: Arc<dyn PlatformClient>,
    ) -> Self {
        Self {
            policies,
            translator,
            webhooks,
            platform,
            self_user_id: AtomicU64::new(0),
            send_locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn set_self_user(&self, user_id: u64) {
        self.self_user_id.store(user_id, Ordering::Relaxed);
    }

    /// Run one message through the pipeline to its terminal outcome.
    pub async fn handle_message(&self, raw: &RawMessage) -> Result<RelayOutcome, RelayError> {
        // Loop check: never reprocess our own output.
        if raw.via_own_impersonation
            || raw.author.id == self.self_user_id.load(Ordering::Relaxed)
        {
            return Ok(RelayOutcome::SkippedOwn);
        }

        let policy = self.policies.get(raw.channel_id);
        let persona_override =
            self.policies
                .persona_for(raw.channel_id, raw.author.id, &raw.author.display_name);

        if persona_override.is_none() && policy.mode == ChannelMode::Off {
            return Ok(RelayOutcome::SkippedPolicy);
        }

        let parts = extract(raw, &self.translator).await?;

        // Relevance: a persona override is an identity substitution and
        // always relays; plain content must have actually changed (or the
        // channel opted into relaying everything).
        let relay = if persona_override.is_some() {
            true
        } else {
            match policy.scope {
                Scope::AllMessages => !parts.is_empty(),
                Scope::TranslateOnly => {
                    content_changed(raw, &parts)
                        || (policy.relay_untranslated_cards
                            && (!parts.cards.is_empty() || !parts.media_urls.is_empty()))
                }
            }
        };
        if !relay {
            return Ok(if parts.is_empty() {
                RelayOutcome::SkippedEmpty
            } else {
                RelayOutcome::SkippedUnchanged
            });
        }

        let parts = compose(parts, policy.style);
        if parts.is_empty() {
            return Ok(RelayOutcome::SkippedEmpty);
        }

        let persona = persona_override.clone().unwrap_or_else(|| Persona {
            display_name: raw.author.display_name.clone(),
            avatar_url: raw.author.avatar_url.clone(),
        });

        // The lock scopes the delete+send pair per channel so a later
        // message's repost cannot land between this message's delete and
        // its replacement.
        let lock = self.send_lock(raw.channel_id);
        let _guard = lock.lock().await;

        let mut deleted = false;
        if persona_override.is_some() || policy.mode == ChannelMode::Replace {
            match self
                .platform
                .delete_message(raw.channel_id, raw.message_id)
                .await
            {
                Ok(()) => deleted = true,
                Err(source) => {
                    // Already gone or permissions revoked; keep going.
                    let error = RelayError::DeleteFailed {
                        message_id: raw.message_id,
                        source,
                    };
                    tracing::warn!(channel_id = raw.channel_id, %error, "sending anyway");
                }
            }
        }

        let outcome = match self.webhooks.acquire(raw.channel_id).await {
            Ok(handle) => {
                match self
                    .platform
                    .send_as_persona(raw.channel_id, &handle, &persona, &parts)
                    .await
                {
                    Ok(()) => RelayOutcome::Sent {
                        deleted,
                        fallback: false,
                    },
                    Err(PlatformError::NotFound(detail)) => {
                        // The cached webhook was deleted out from under
                        // us. Evict and resend once with a fresh one.
                        tracing::info!(channel_id = raw.channel_id, %detail, "stale webhook");
                        self.webhooks.invalidate(raw.channel_id).await;
                        match self.webhooks.acquire(raw.channel_id).await {
                            Ok(fresh) => {
                                self.platform
                                    .send_as_persona(raw.channel_id, &fresh, &persona, &parts)
                                    .await
                                    .map_err(|source| RelayError::SendFailed {
                                        channel_id: raw.channel_id,
                                        source,
                                    })?;
                                RelayOutcome::Sent {
                                    deleted,
                                    fallback: false,
                                }
                            }
                            Err(source) => {
                                self.send_fallback(raw.channel_id, &persona, &parts, source)
                                    .await?;
                                RelayOutcome::Sent {
                                    deleted,
                                    fallback: true,
                                }
                            }
                        }
                    }
                    Err(source) => {
                        return Err(RelayError::SendFailed {
                            channel_id: raw.channel_id,
                            source,
                        });
                    }
                }
            }
            Err(source) => {
                self.send_fallback(raw.channel_id, &persona, &parts, source)
                    .await?;
                RelayOutcome::Sent {
                    deleted,
                    fallback: true,
                }
            }
        };

        Ok(outcome)
    }

    /// Plain bot-identity send with the persona name in brackets, used
    /// whenever the impersonation webhook cannot be had.
    async fn send_fallback(
        &self,
        channel_id: ChannelId,
        persona: &Persona,
        parts: &TranslatedParts,
        cause: PlatformError,
    ) -> Result<(), RelayError> {
        let error = RelayError::ImpersonationUnavailable {
            channel_id,
            source: cause,
        };
        tracing::warn!(%error, "sending plain message instead");

        let mut fallback = parts.clone();
        fallback.body = if parts.body.trim().is_empty() {
            format!("**[{}]**", persona.display_name)
        } else {
            format!("**[{}]** {}", persona.display_name, parts.body)
        };

        self.platform
            .send_plain(channel_id, &fallback)
            .await
            .map_err(|source| RelayError::SendFailed { channel_id, source })
    }

    fn send_lock(&self, channel_id: ChannelId) -> Arc<Mutex<()>> {
        let mut locks = self.send_locks.lock().expect("send lock map poisoned");
        locks.entry(channel_id).or_default().clone()
    }
}

/// Trimmed textual comparison between the original message and its
/// extraction. Structural changes alone (a demoted image card) do not
/// count as changed content.
fn content_changed(raw: &RawMessage, parts: &TranslatedParts) -> bool {
    if parts.body.trim() != raw.body.trim() {
        return true;
    }

    let original_cards: Vec<&RichCard> = raw.cards.iter().filter(|card| card.has_text()).collect();
    original_cards
        .iter()
        .zip(&parts.cards)
        .any(|(original, translated)| card_text(original) != card_text(translated))
}

fn card_text(card: &RichCard) -> Vec<String> {
    let mut text = Vec::new();
    if let Some(title) = &card.title {
        text.push(title.trim().to_string());
    }
    if let Some(description) = &card.description {
        text.push(description.trim().to_string());
    }
    for field in &card.fields {
        text.push(field.name.trim().to_string());
        text.push(field.value.trim().to_string());
    }
    if let Some(footer) = &card.footer {
        text.push(footer.text.trim().to_string());
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TranslatorConfig;
    use crate::error::TranslateError;
    use crate::impersonate::ImpersonationHandle;
    use crate::platform::WebhookInfo;
    use crate::policy::OutputStyle;
    use crate::translate::TranslationEngine;
    use crate::{Author, MessageId};
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::AtomicUsize;

    const LAUNCH_EN: &str = "This product launch exceeded every expectation we had.";
    const LAUNCH_ZH: &str = "这次产品发布超出了我们所有的预期。";
    const METRICS_EN: &str = "Our weekly metrics report is ready for review now.";
    const METRICS_ZH: &str = "我们的每周指标报告现在可以审阅了。";

    /// Engine double with one known translation; everything else echoes.
    struct FixtureEngine {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl TranslationEngine for FixtureEngine {
        async fn detect_language(&self, _text: &str) -> Result<String, TranslateError> {
            Ok("en".into())
        }

        async fn translate(
            &self,
            text: &str,
            _source: &str,
            _target: &str,
        ) -> Result<String, TranslateError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if text == LAUNCH_EN {
                Ok(LAUNCH_ZH.into())
            } else if text == METRICS_EN {
                Ok(METRICS_ZH.into())
            } else {
                Ok(text.into())
            }
        }
    }

    /// Everything the dispatcher did to the platform, in order.
    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Delete(ChannelId, MessageId),
        SendPersona {
            channel_id: ChannelId,
            display_name: String,
            avatar_url: Option<String>,
            body: String,
        },
        SendPlain {
            channel_id: ChannelId,
            body: String,
        },
    }

    #[derive(Default)]
    struct RecordingPlatform {
        calls: StdMutex<Vec<Call>>,
        deny_webhooks: bool,
        /// Fail this many persona sends with NotFound before succeeding.
        stale_sends: AtomicUsize,
        /// Hold each persona send this long before recording it.
        send_delay: Option<std::time::Duration>,
    }

    impl RecordingPlatform {
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl PlatformClient for RecordingPlatform {
        async fn list_webhooks(
            &self,
            _channel_id: ChannelId,
        ) -> Result<Vec<WebhookInfo>, PlatformError> {
            if self.deny_webhooks {
                return Err(PlatformError::PermissionDenied("no MANAGE_WEBHOOKS".into()));
            }
            Ok(Vec::new())
        }

        async fn create_webhook(
            &self,
            _channel_id: ChannelId,
            name: &str,
        ) -> Result<WebhookInfo, PlatformError> {
            if self.deny_webhooks {
                return Err(PlatformError::PermissionDenied("no MANAGE_WEBHOOKS".into()));
            }
            Ok(WebhookInfo {
                id: 9001,
                name: Some(name.to_string()),
                token: Some("token".into()),
            })
        }

        async fn send_as_persona(
            &self,
            channel_id: ChannelId,
            _handle: &ImpersonationHandle,
            persona: &Persona,
            parts: &TranslatedParts,
        ) -> Result<(), PlatformError> {
            if self
                .stale_sends
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(PlatformError::NotFound("webhook gone".into()));
            }
            if let Some(delay) = self.send_delay {
                tokio::time::sleep(delay).await;
            }
            self.calls.lock().unwrap().push(Call::SendPersona {
                channel_id,
                display_name: persona.display_name.clone(),
                avatar_url: persona.avatar_url.clone(),
                body: parts.body.clone(),
            });
            Ok(())
        }

        async fn send_plain(
            &self,
            channel_id: ChannelId,
            parts: &TranslatedParts,
        ) -> Result<(), PlatformError> {
            self.calls.lock().unwrap().push(Call::SendPlain {
                channel_id,
                body: parts.body.clone(),
            });
            Ok(())
        }

        async fn delete_message(
            &self,
            channel_id: ChannelId,
            message_id: MessageId,
        ) -> Result<(), PlatformError> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Delete(channel_id, message_id));
            Ok(())
        }
    }

    struct Fixture {
        dispatcher: RelayDispatcher,
        platform: Arc<RecordingPlatform>,
        policies: Arc<PolicyStore>,
        _dir: tempfile::TempDir,
    }

    fn fixture(platform: RecordingPlatform) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let policies = Arc::new(PolicyStore::load(dir.path().join("policies.json")).unwrap());
        let platform = Arc::new(platform);
        let translator = Arc::new(Translator::new(
            Arc::new(FixtureEngine {
                calls: AtomicUsize::new(0),
            }),
            TranslatorConfig::default(),
        ));
        let webhooks = Arc::new(ImpersonationManager::new(platform.clone(), "babelhook"));
        let dispatcher = RelayDispatcher::new(
            policies.clone(),
            translator,
            webhooks,
            platform.clone(),
        );
        Fixture {
            dispatcher,
            platform,
            policies,
            _dir: dir,
        }
    }

    fn alice_message(body: &str) -> RawMessage {
        RawMessage {
            channel_id: 100,
            message_id: 555,
            author: Author {
                id: 42,
                display_name: "Alice".into(),
                avatar_url: Some("https://cdn.example.com/alice.png".into()),
                is_bot: false,
            },
            body: body.into(),
            cards: Vec::new(),
            attachment_urls: Vec::new(),
            via_own_impersonation: false,
        }
    }

    #[tokio::test]
    async fn test_own_webhook_message_never_processed() {
        let fix = fixture(RecordingPlatform::default());
        fix.policies
            .update(100, |p| p.mode = ChannelMode::Replace)
            .unwrap();

        let mut message = alice_message(LAUNCH_EN);
        message.via_own_impersonation = true;

        let outcome = fix.dispatcher.handle_message(&message).await.unwrap();
        assert_eq!(outcome, RelayOutcome::SkippedOwn);
        assert!(fix.platform.calls().is_empty());
    }

    #[tokio::test]
    async fn test_own_user_message_never_processed() {
        let fix = fixture(RecordingPlatform::default());
        fix.policies
            .update(100, |p| p.mode = ChannelMode::Replace)
            .unwrap();
        fix.dispatcher.set_self_user(42);

        let outcome = fix
            .dispatcher
            .handle_message(&alice_message(LAUNCH_EN))
            .await
            .unwrap();
        assert_eq!(outcome, RelayOutcome::SkippedOwn);
        assert!(fix.platform.calls().is_empty());
    }

    #[tokio::test]
    async fn test_mode_off_without_override_skips() {
        let fix = fixture(RecordingPlatform::default());

        let outcome = fix
            .dispatcher
            .handle_message(&alice_message(LAUNCH_EN))
            .await
            .unwrap();
        assert_eq!(outcome, RelayOutcome::SkippedPolicy);
        assert!(fix.platform.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unchanged_target_language_body_is_noop() {
        let fix = fixture(RecordingPlatform::default());
        fix.policies
            .update(100, |p| p.mode = ChannelMode::Replace)
            .unwrap();

        // Already in the target language: translation skips, nothing
        // changed, so no delete and no send may happen.
        let outcome = fix
            .dispatcher
            .handle_message(&alice_message("这条消息本来就是中文的，不需要任何处理"))
            .await
            .unwrap();
        assert_eq!(outcome, RelayOutcome::SkippedUnchanged);
        assert!(fix.platform.calls().is_empty());
    }

    #[tokio::test]
    async fn test_translate_and_replace_scenario() {
        let fix = fixture(RecordingPlatform::default());
        fix.policies
            .update(100, |p| {
                p.mode = ChannelMode::Replace;
                p.scope = Scope::TranslateOnly;
            })
            .unwrap();

        let outcome = fix
            .dispatcher
            .handle_message(&alice_message(LAUNCH_EN))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            RelayOutcome::Sent {
                deleted: true,
                fallback: false
            }
        );
        assert_eq!(
            fix.platform.calls(),
            vec![
                Call::Delete(100, 555),
                Call::SendPersona {
                    channel_id: 100,
                    display_name: "Alice".into(),
                    avatar_url: Some("https://cdn.example.com/alice.png".into()),
                    body: LAUNCH_ZH.into(),
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_reply_mode_keeps_original() {
        let fix = fixture(RecordingPlatform::default());
        fix.policies
            .update(100, |p| p.mode = ChannelMode::Reply)
            .unwrap();

        let outcome = fix
            .dispatcher
            .handle_message(&alice_message(LAUNCH_EN))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            RelayOutcome::Sent {
                deleted: false,
                fallback: false
            }
        );
        let calls = fix.platform.calls();
        assert_eq!(calls.len(), 1);
        assert!(matches!(calls[0], Call::SendPersona { .. }));
    }

    #[tokio::test]
    async fn test_persona_override_relays_unchanged_text() {
        let fix = fixture(RecordingPlatform::default());
        fix.policies
            .update(100, |p| {
                p.personas.insert(
                    "Bot42".into(),
                    Persona {
                        display_name: "CoolName".into(),
                        avatar_url: Some("https://cdn.example.com/cool.png".into()),
                    },
                );
            })
            .unwrap();

        let mut message = alice_message("你好");
        message.author.display_name = "Bot42".into();
        message.author.is_bot = true;

        let outcome = fix.dispatcher.handle_message(&message).await.unwrap();

        // Identity substitution relays even though the text is unchanged
        // and the channel mode is still Off.
        assert_eq!(
            outcome,
            RelayOutcome::Sent {
                deleted: true,
                fallback: false
            }
        );
        assert_eq!(
            fix.platform.calls(),
            vec![
                Call::Delete(100, 555),
                Call::SendPersona {
                    channel_id: 100,
                    display_name: "CoolName".into(),
                    avatar_url: Some("https://cdn.example.com/cool.png".into()),
                    body: "你好".into(),
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_all_messages_scope_relays_unchanged_content() {
        let fix = fixture(RecordingPlatform::default());
        fix.policies
            .update(100, |p| {
                p.mode = ChannelMode::Reply;
                p.scope = Scope::AllMessages;
                p.style = OutputStyle::Flat;
            })
            .unwrap();

        let outcome = fix
            .dispatcher
            .handle_message(&alice_message("短消息"))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            RelayOutcome::Sent {
                deleted: false,
                fallback: false
            }
        );
    }

    #[tokio::test]
    async fn test_webhook_denied_falls_back_to_plain_send() {
        let fix = fixture(RecordingPlatform {
            deny_webhooks: true,
            ..RecordingPlatform::default()
        });
        fix.policies
            .update(100, |p| p.mode = ChannelMode::Replace)
            .unwrap();

        let outcome = fix
            .dispatcher
            .handle_message(&alice_message(LAUNCH_EN))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            RelayOutcome::Sent {
                deleted: true,
                fallback: true
            }
        );
        let calls = fix.platform.calls();
        assert_eq!(calls[0], Call::Delete(100, 555));
        match &calls[1] {
            Call::SendPlain { channel_id, body } => {
                assert_eq!(*channel_id, 100);
                assert_eq!(body, &format!("**[Alice]** {LAUNCH_ZH}"));
            }
            other => panic!("expected plain send, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stale_webhook_evicted_and_resent() {
        let fix = fixture(RecordingPlatform {
            stale_sends: AtomicUsize::new(1),
            ..RecordingPlatform::default()
        });
        fix.policies
            .update(100, |p| p.mode = ChannelMode::Replace)
            .unwrap();

        let outcome = fix
            .dispatcher
            .handle_message(&alice_message(LAUNCH_EN))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            RelayOutcome::Sent {
                deleted: true,
                fallback: false
            }
        );
        // The second persona send (after eviction) is the one recorded.
        let calls = fix.platform.calls();
        assert!(matches!(calls.last(), Some(Call::SendPersona { .. })));
    }

    #[tokio::test]
    async fn test_concurrent_messages_keep_delete_and_send_paired() {
        let fix = fixture(RecordingPlatform {
            send_delay: Some(std::time::Duration::from_millis(50)),
            ..RecordingPlatform::default()
        });
        fix.policies
            .update(100, |p| p.mode = ChannelMode::Replace)
            .unwrap();

        let first = alice_message(LAUNCH_EN);
        let mut second = alice_message(METRICS_EN);
        second.message_id = 556;

        let dispatcher = Arc::new(fix.dispatcher);
        let tasks = [first, second].map(|message| {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move { dispatcher.handle_message(&message).await })
        });
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        // The channel lock scopes each delete with its own repost; one
        // message's delete can never land inside another's pair.
        let calls = fix.platform.calls();
        assert_eq!(calls.len(), 4);
        for pair in calls.chunks(2) {
            let Call::Delete(_, message_id) = &pair[0] else {
                panic!("expected a delete first in {pair:?}");
            };
            let Call::SendPersona { body, .. } = &pair[1] else {
                panic!("expected the matching send in {pair:?}");
            };
            let expected = if *message_id == 555 {
                LAUNCH_ZH
            } else {
                METRICS_ZH
            };
            assert_eq!(body, expected);
        }
    }

    #[tokio::test]
    async fn test_empty_message_in_all_scope_skipped() {
        let fix = fixture(RecordingPlatform::default());
        fix.policies
            .update(100, |p| {
                p.mode = ChannelMode::Replace;
                p.scope = Scope::AllMessages;
            })
            .unwrap();

        let outcome = fix
            .dispatcher
            .handle_message(&alice_message("   "))
            .await
            .unwrap();
        assert_eq!(outcome, RelayOutcome::SkippedEmpty);
        assert!(fix.platform.calls().is_empty());
    }
}
