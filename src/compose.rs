//! Output re-shaping: converts extracted parts into the shape a channel's
//! configured output style asks for.

use crate::policy::OutputStyle;
use crate::{RichCard, TranslatedParts};

/// Re-shape `parts` according to `style`. Total over any input, and
/// idempotent: applying the same style twice is a no-op.
pub fn compose(parts: TranslatedParts, style: OutputStyle) -> TranslatedParts {
    match style {
        OutputStyle::Auto => parts,
        OutputStyle::Flat => flatten(parts),
        OutputStyle::Card => carded(parts),
    }
}

/// Flatten every card into body-text blocks and demote card images to
/// media links. The result carries zero cards.
fn flatten(parts: TranslatedParts) -> TranslatedParts {
    let mut blocks: Vec<String> = Vec::new();
    if !parts.body.trim().is_empty() {
        blocks.push(parts.body.trim().to_string());
    }

    let mut media_urls = Vec::new();
    for card in parts.cards {
        let mut lines: Vec<String> = Vec::new();
        if let Some(author) = &card.author {
            if !author.name.trim().is_empty() {
                lines.push(author.name.trim().to_string());
            }
        }
        if let Some(title) = card.title.as_deref().map(str::trim) {
            if !title.is_empty() {
                lines.push(format!("**{title}**"));
            }
        }
        if let Some(description) = card.description.as_deref().map(str::trim) {
            if !description.is_empty() {
                lines.push(description.to_string());
            }
        }
        for field in &card.fields {
            lines.push(format!("{}: {}", field.name.trim(), field.value.trim()));
        }
        if let Some(footer) = &card.footer {
            if !footer.text.trim().is_empty() {
                lines.push(footer.text.trim().to_string());
            }
        }
        if !lines.is_empty() {
            blocks.push(lines.join("\n"));
        }
        if let Some(image) = card.image {
            media_urls.push(image);
        }
        if let Some(thumbnail) = card.thumbnail {
            media_urls.push(thumbnail);
        }
    }
    media_urls.extend(parts.media_urls);

    TranslatedParts {
        body: blocks.join("\n\n"),
        cards: Vec::new(),
        media_urls,
    }
}

/// Promote plain body text (and the first media link) into one synthetic
/// card when no card exists yet. Pre-existing cards pass through.
fn carded(mut parts: TranslatedParts) -> TranslatedParts {
    if !parts.cards.is_empty() {
        return parts;
    }

    let body = parts.body.trim().to_string();
    let image = if parts.media_urls.is_empty() {
        None
    } else {
        Some(parts.media_urls.remove(0))
    };

    if body.is_empty() && image.is_none() {
        // Nothing to promote.
        return parts;
    }

    let card = RichCard {
        description: if body.is_empty() { None } else { Some(body) },
        image,
        ..RichCard::default()
    };

    TranslatedParts {
        body: String::new(),
        cards: vec![card],
        media_urls: parts.media_urls,
    }
}
