use std::sync::OnceLock;

use regex::Regex;

/// Opening sentence of a reply that is followed, somewhere later, by a
/// numbered choice list (`1.` or `1)`).
const CAPTION_PATTERN: &str = r"(?ms)^\s*([^.\n]+\.)\s.*?\b1[.)]\s";

fn caption_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(CAPTION_PATTERN).expect("caption pattern compiles"))
}

/// Derives the image prompt for a narrator reply.
///
/// Replies usually open with a one-sentence scene description before the
/// numbered choices; that sentence is the caption. Anything else (no list,
/// no terminal period) falls back to the whole reply. Several sentences
/// before the list still yield only the first one.
pub fn extract_caption(reply: &str) -> String {
    caption_regex()
        .captures(reply)
        .and_then(|caps| caps.get(1))
        .map(|sentence| sentence.as_str().trim().to_string())
        .filter(|sentence| !sentence.is_empty())
        .unwrap_or_else(|| reply.to_string())
}
