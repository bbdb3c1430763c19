//! Mention protection and text cleanup ahead of translation.
//!
//! Translation engines mangle Discord mention tokens (`<@123>` becomes
//! `<@ 123 >` or worse), so every mention is swapped for an opaque
//! placeholder before the engine sees the text and restored verbatim
//! afterwards.

use regex::Regex;
use std::sync::LazyLock;

/// Reserved marker prefix. Chosen to be vanishingly unlikely in chat text;
/// `sanitize` asserts the input does not already contain it.
const MARKER_PREFIX: &str = "@@PROTECTED_MENTION_";

static MENTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    // Broadcast mentions plus structured user/member/role/channel tokens.
    Regex::new(r"@everyone|@here|<@[!&]?\d+>|<#\d+>").expect("mention regex is valid")
});

static MD_LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]*)\]\([^)]*\)").expect("markdown link regex is valid"));

static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://[^\s<>]+").expect("url regex is valid"));

/// Ordered placeholder-to-original mapping produced by [`sanitize`].
#[derive(Debug, Clone, Default)]
pub struct PlaceholderTable {
    entries: Vec<(String, String)>,
}

impl PlaceholderTable {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Replace every mention token with a unique placeholder, returning the
/// protected text and the table needed to undo the substitution.
pub fn sanitize(text: &str) -> (String, PlaceholderTable) {
    debug_assert!(
        !text.contains(MARKER_PREFIX),
        "input already contains the reserved placeholder marker"
    );

    let mut table = PlaceholderTable::default();
    let protected = MENTION_RE
        .replace_all(text, |caps: &regex::Captures| {
            let placeholder = format!("{}{}@@", MARKER_PREFIX, table.entries.len());
            table
                .entries
                .push((placeholder.clone(), caps[0].to_string()));
            placeholder
        })
        .into_owned();

    (protected, table)
}

/// Substitute placeholders back in insertion order. Text that lost a
/// placeholder in translation is left as-is; the remaining entries still
/// resolve.
pub fn restore(text: &str, table: &PlaceholderTable) -> String {
    let mut restored = text.to_string();
    for (placeholder, original) in &table.entries {
        restored = restored.replace(placeholder.as_str(), original);
    }
    restored
}

/// Strip decorative substrings that should not count toward translation
/// thresholds: bare URLs, markdown link syntax (keeping the display text),
/// and zero-width characters.
pub fn strip_decorations(text: &str) -> String {
    let text = MD_LINK_RE.replace_all(text, "$1");
    let text = URL_RE.replace_all(&text, "");
    text.chars()
        .filter(|c| !matches!(c, '\u{200B}'..='\u{200D}' | '\u{FEFF}' | '\u{2060}'))
        .collect()
}

/// Cheap script-range pre-filter: text containing Han ideographs is
/// treated as already in the target language, skipping the network
/// detector entirely.
pub fn is_already_target_language(text: &str) -> bool {
    text.chars().any(is_han)
}

fn is_han(c: char) -> bool {
    matches!(c,
        '\u{4E00}'..='\u{9FFF}'      // CJK Unified Ideographs
        | '\u{3400}'..='\u{4DBF}'    // Extension A
        | '\u{F900}'..='\u{FAFF}'    // Compatibility Ideographs
    )
}
