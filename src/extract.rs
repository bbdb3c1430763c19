//! Content extraction: walks one inbound message and runs every
//! translatable field through the sanitize → translate → restore path,
//! producing the structured intermediate the composer and dispatcher
//! work with.

use crate::error::RelayError;
use crate::sanitize;
use crate::translate::Translator;
use crate::{RawMessage, RichCard, TranslatedParts};

/// Upper bound on translatable text per message. Anything larger is not
/// ordinary chat and aborts extraction rather than flooding the engine.
const MAX_CONTENT_BYTES: usize = 32 * 1024;

/// Extract and translate one message. Read-only with respect to the
/// platform; the dispatcher discards the message on error.
pub async fn extract(
    raw: &RawMessage,
    translator: &Translator,
) -> Result<TranslatedParts, RelayError> {
    let text_budget: usize = raw.body.len()
        + raw
            .cards
            .iter()
            .map(|card| {
                card.title.as_deref().map_or(0, str::len)
                    + card.description.as_deref().map_or(0, str::len)
                    + card
                        .fields
                        .iter()
                        .map(|f| f.name.len() + f.value.len())
                        .sum::<usize>()
            })
            .sum::<usize>();
    if text_budget > MAX_CONTENT_BYTES {
        return Err(RelayError::Extraction(format!(
            "message {} carries {} bytes of text, over the {} byte cap",
            raw.message_id, text_budget, MAX_CONTENT_BYTES
        )));
    }

    let body = translate_body(&raw.body, translator).await;

    let mut cards = Vec::new();
    let mut media_urls = Vec::new();
    for card in &raw.cards {
        if card.has_text() {
            cards.push(translate_card(card, translator).await);
        } else if let Some(url) = card.image.clone().or_else(|| card.thumbnail.clone()) {
            // An image in an otherwise-empty card renders as a bare
            // bordered box; demote it to a plain link instead.
            media_urls.push(url);
        }
    }

    media_urls.extend(raw.attachment_urls.iter().cloned());

    Ok(TranslatedParts {
        body,
        cards,
        media_urls,
    })
}

/// Translate the body, preserving paragraph and bullet structure for
/// multi-line input. Single-block bodies go through in one call.
async fn translate_body(body: &str, translator: &Translator) -> String {
    if body.trim().is_empty() {
        return body.to_string();
    }

    let (protected, table) = sanitize::sanitize(body);
    // The word-count threshold applies to the message as a whole; a body
    // over it translates every line, bullets included.
    if translator.below_threshold(&protected) {
        return body.to_string();
    }

    let translated = if protected.contains('\n') {
        let mut paragraphs = Vec::new();
        for paragraph in protected.split("\n\n") {
            let mut lines = Vec::new();
            for line in paragraph.split('\n') {
                lines.push(translate_line(line, translator).await);
            }
            paragraphs.push(lines.join("\n"));
        }
        paragraphs.join("\n\n")
    } else {
        translator.translate_fragment(&protected).await.text
    };

    sanitize::restore(&translated, &table)
}

/// Translate one line, keeping any bullet prefix untranslated.
async fn translate_line(line: &str, translator: &Translator) -> String {
    let stripped = line.trim_start();
    let indent = &line[..line.len() - stripped.len()];
    for prefix in ["• ", "- ", "* "] {
        if let Some(rest) = stripped.strip_prefix(prefix) {
            let translated = translator.translate_fragment(rest).await.text;
            return format!("{indent}{prefix}{translated}");
        }
    }
    translator.translate_fragment(line).await.text
}

/// Rebuild a card with every text field translated and everything else
/// copied through. The author name is an identity, never translated.
async fn translate_card(card: &RichCard, translator: &Translator) -> RichCard {
    let mut translated = card.clone();

    if let Some(title) = &card.title {
        translated.title = Some(translate_field(title, translator).await);
    }
    if let Some(description) = &card.description {
        translated.description = Some(translate_field(description, translator).await);
    }
    if let Some(footer) = &mut translated.footer {
        footer.text = translate_field(&footer.text, translator).await;
    }
    for field in &mut translated.fields {
        field.name = translate_field(&field.name, translator).await;
        field.value = translate_field(&field.value, translator).await;
    }

    translated
}

async fn translate_field(text: &str, translator: &Translator) -> String {
    let (protected, table) = sanitize::sanitize(text);
    let result = translator.translate(&protected).await;
    sanitize::restore(&result.text, &table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TranslatorConfig;
    use crate::error::TranslateError;
    use crate::translate::TranslationEngine;
    use crate::{Author, CardField, CardFooter};
    use indoc::indoc;
    use std::sync::Arc;
    use std::sync::Mutex;

    /// Engine double that wraps input in 译[…] and records what it saw.
    #[derive(Default)]
    struct TaggingEngine {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl TranslationEngine for TaggingEngine {
        async fn detect_language(&self, _text: &str) -> Result<String, TranslateError> {
            Ok("en".into())
        }

        async fn translate(
            &self,
            text: &str,
            _source: &str,
            _target: &str,
        ) -> Result<String, TranslateError> {
            self.seen.lock().unwrap().push(text.to_string());
            Ok(format!("译[{text}]"))
        }
    }

    fn translator(engine: Arc<TaggingEngine>) -> Translator {
        Translator::new(
            engine,
            TranslatorConfig {
                min_words: 1,
                ..TranslatorConfig::default()
            },
        )
    }

    fn raw(body: &str) -> RawMessage {
        RawMessage {
            channel_id: 1,
            message_id: 2,
            author: Author {
                id: 3,
                display_name: "Alice".into(),
                avatar_url: None,
                is_bot: false,
            },
            body: body.into(),
            cards: Vec::new(),
            attachment_urls: Vec::new(),
            via_own_impersonation: false,
        }
    }

    #[tokio::test]
    async fn test_plain_body_translates_whole() {
        let engine = Arc::new(TaggingEngine::default());
        let parts = extract(&raw("hello there friend"), &translator(engine))
            .await
            .unwrap();
        assert_eq!(parts.body, "译[hello there friend]");
    }

    #[tokio::test]
    async fn test_bullet_prefixes_survive_untranslated() {
        let engine = Arc::new(TaggingEngine::default());
        let body = indoc! {"
            Release summary below

            - faster startup
            * fewer crashes
            • better logs"};
        let parts = extract(&raw(body.trim_end()), &translator(engine))
            .await
            .unwrap();

        let expected = indoc! {"
            译[Release summary below]

            - 译[faster startup]
            * 译[fewer crashes]
            • 译[better logs]"};
        assert_eq!(parts.body, expected.trim_end());
    }

    #[tokio::test]
    async fn test_short_bullets_translate_when_body_qualifies() {
        // Default five-word minimum: the body as a whole is well over it,
        // so the two-word bullets must still reach the engine.
        let engine = Arc::new(TaggingEngine::default());
        let translator = Translator::new(engine.clone(), TranslatorConfig::default());
        let body = indoc! {"
            Here is the launch summary for everyone

            - faster startup
            - fewer crashes"};

        let parts = extract(&raw(body.trim_end()), &translator).await.unwrap();

        let expected = indoc! {"
            译[Here is the launch summary for everyone]

            - 译[faster startup]
            - 译[fewer crashes]"};
        assert_eq!(parts.body, expected.trim_end());
    }

    #[tokio::test]
    async fn test_short_multiline_body_stays_untranslated() {
        let engine = Arc::new(TaggingEngine::default());
        let translator = Translator::new(engine.clone(), TranslatorConfig::default());

        let parts = extract(&raw("hi\nthere"), &translator).await.unwrap();

        assert_eq!(parts.body, "hi\nthere");
        assert!(engine.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_engine_never_sees_mention_tokens() {
        let engine = Arc::new(TaggingEngine::default());
        let parts = extract(
            &raw("ping <@123> about the launch @everyone"),
            &translator(engine.clone()),
        )
        .await
        .unwrap();

        for seen in engine.seen.lock().unwrap().iter() {
            assert!(!seen.contains("<@123>"), "engine saw a raw mention");
            assert!(!seen.contains("@everyone"), "engine saw a broadcast");
        }
        // Mentions restored verbatim in the output.
        assert!(parts.body.contains("<@123>"));
        assert!(parts.body.contains("@everyone"));
    }

    #[tokio::test]
    async fn test_image_only_card_demoted_to_media() {
        let engine = Arc::new(TaggingEngine::default());
        let mut message = raw("");
        message.cards.push(RichCard {
            image: Some("https://cdn.example.com/photo.png".into()),
            ..RichCard::default()
        });

        let parts = extract(&message, &translator(engine)).await.unwrap();

        assert!(parts.cards.is_empty());
        assert_eq!(parts.media_urls, vec!["https://cdn.example.com/photo.png"]);
    }

    #[tokio::test]
    async fn test_text_card_rebuilt_with_fields_translated() {
        let engine = Arc::new(TaggingEngine::default());
        let mut message = raw("");
        message.cards.push(RichCard {
            title: Some("Launch report".into()),
            description: Some("All metrics green".into()),
            color: Some(0xFF00FF),
            url: Some("https://example.com/report".into()),
            author: Some(crate::CardAuthor {
                name: "Metrics Bot".into(),
                icon_url: Some("https://cdn.example.com/icon.png".into()),
            }),
            footer: Some(CardFooter {
                text: "generated nightly".into(),
                icon_url: None,
            }),
            image: Some("https://cdn.example.com/graph.png".into()),
            fields: vec![CardField {
                name: "Uptime".into(),
                value: "four nines".into(),
                inline: true,
            }],
            ..RichCard::default()
        });

        let parts = extract(&message, &translator(engine)).await.unwrap();
        let card = &parts.cards[0];

        assert_eq!(card.title.as_deref(), Some("译[Launch report]"));
        assert_eq!(card.description.as_deref(), Some("译[All metrics green]"));
        assert_eq!(card.footer.as_ref().unwrap().text, "译[generated nightly]");
        assert_eq!(card.fields[0].name, "译[Uptime]");
        assert_eq!(card.fields[0].value, "译[four nines]");
        // Identity and non-text fields pass through unchanged.
        assert_eq!(card.author.as_ref().unwrap().name, "Metrics Bot");
        assert_eq!(card.color, Some(0xFF00FF));
        assert_eq!(card.url.as_deref(), Some("https://example.com/report"));
        assert_eq!(card.image.as_deref(), Some("https://cdn.example.com/graph.png"));
    }

    #[tokio::test]
    async fn test_attachments_appended_verbatim() {
        let engine = Arc::new(TaggingEngine::default());
        let mut message = raw("see attached");
        message
            .attachment_urls
            .push("https://cdn.example.com/specs.pdf".into());

        let parts = extract(&message, &translator(engine)).await.unwrap();
        assert_eq!(parts.media_urls, vec!["https://cdn.example.com/specs.pdf"]);
    }

    #[tokio::test]
    async fn test_oversized_body_aborts_extraction() {
        let engine = Arc::new(TaggingEngine::default());
        let huge = "word ".repeat(10_000);
        let error = extract(&raw(&huge), &translator(engine)).await.unwrap_err();
        assert!(matches!(error, RelayError::Extraction(_)));
    }
}
