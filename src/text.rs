//! Sentence splitting for the change preview.
//!
//! Boundaries are purely punctuation based: a sentence ends right after `.`,
//! `?` or `!` when whitespace follows. Abbreviations ("e.g. this") and
//! decimals followed by a space are split like any other boundary.

use once_cell::sync::Lazy;
use regex::Regex;

static SENTENCE_BOUNDARY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[.?!]\s+").expect("sentence boundary pattern is valid"));

/// Split `text` into trimmed, non-empty sentences in reading order.
///
/// The terminal punctuation stays with its sentence and the whitespace run
/// after it is dropped. Text without any boundary comes back as a single
/// sentence; blank input yields an empty vector.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut start = 0;

    for boundary in SENTENCE_BOUNDARY.find_iter(text) {
        // The punctuation mark is a single ASCII byte.
        push_trimmed(&mut sentences, &text[start..boundary.start() + 1]);
        start = boundary.end();
    }
    push_trimmed(&mut sentences, &text[start..]);

    sentences
}

fn push_trimmed(out: &mut Vec<String>, candidate: &str) {
    let trimmed = candidate.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
}

/// Collapse every whitespace run to a single space and trim the ends.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
