//! Text helpers shared by retrieval, resolution and grounding.
//!
//! Everything here is deterministic and allocation-light: normalization
//! for keyword matching, stop-word-filtered subject extraction, sentence
//! splitting, and stable deduplication.

use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

static SENTENCE_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?]+[\s]+").expect("valid sentence regex"));

static ENUMERATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:[\d\-\*\.•]+\s*)+").expect("valid enumeration regex"));

const STOP_WORDS: &[&str] = &[
    "a", "about", "again", "all", "also", "am", "an", "and", "any", "are", "as", "at", "be",
    "because", "been", "being", "but", "by", "can", "could", "did", "do", "does", "doing", "dont",
    "explain", "for", "from", "had", "has", "have", "he", "her", "here", "him", "his", "how", "i",
    "if", "in", "into", "is", "isnt", "it", "its", "itself", "me", "more", "my", "no", "not",
    "of", "on", "or", "our", "please", "she", "should", "shouldnt", "so", "some", "tell", "than",
    "that", "the", "their", "them", "then", "there", "these", "they", "this", "those", "to",
    "too", "us", "was", "we", "were", "what", "whats", "when", "where", "which", "who", "whom",
    "why", "will", "with", "would", "you", "your",
];

/// Lowercase and strip everything except alphanumerics and whitespace.
pub fn normalize(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .flat_map(|c| c.to_lowercase())
        .collect()
}

/// Normalized whitespace-separated words.
pub fn words(text: &str) -> Vec<String> {
    normalize(text)
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

pub fn is_stop_word(word: &str) -> bool {
    STOP_WORDS.contains(&word)
}

/// Content words of a question: normalized, stop words and one-letter
/// tokens removed, duplicates dropped, order preserved.
pub fn subject_tokens(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    words(text)
        .into_iter()
        .filter(|w| w.chars().count() > 1 && !is_stop_word(w))
        .filter(|w| seen.insert(w.clone()))
        .collect()
}

/// True when any token appears as a whole word in `text`.
pub fn mentions_any(text: &str, tokens: &[String]) -> bool {
    if tokens.is_empty() {
        return false;
    }
    let present: HashSet<String> = words(text).into_iter().collect();
    tokens.iter().any(|t| present.contains(t))
}

/// Split prose into sentences on terminal punctuation followed by
/// whitespace. Punctuation stays attached to its sentence.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut start = 0;
    for m in SENTENCE_END.find_iter(text) {
        let end = m.start() + m.as_str().trim_end().len();
        push_trimmed(&mut sentences, &text[start..end]);
        start = m.end();
    }
    push_trimmed(&mut sentences, &text[start..]);
    sentences
}

fn push_trimmed(out: &mut Vec<String>, piece: &str) {
    let trimmed = piece.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
}

/// Remove a leading list marker such as `1.`, `-`, `*` or `2. -`.
pub fn strip_enumeration(line: &str) -> String {
    ENUMERATION.replace(line.trim(), "").trim().to_string()
}

/// Drop exact duplicates, keeping the first occurrence of each.
pub fn dedup_stable(items: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|s| seen.insert(s.clone()))
        .collect()
}
