// ZapLine Engine — Outbound Segmenter
//
// Splits a long reply into human-sized messages at safe boundaries. Pure
// and deterministic: no I/O, no randomness — the same text always yields
// the same chunks. All lengths are measured in characters (replies are
// routinely accented Portuguese, so byte offsets are never used as cut
// points).
//
// Policy by length:
//   ≤ 200          one chunk
//   201–400        at most one split, at the sentence end nearest the midpoint
//   > 400          blank-line paragraphs when there are several, otherwise
//                  sentence extraction + greedy regrouping under 300 chars

use regex::Regex;
use std::sync::LazyLock;

use crate::atoms::constants::{SEGMENT_GROUP_MAX, SEGMENT_MIDPOINT_MAX, SEGMENT_SINGLE_MAX};

static PARAGRAPH_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n\s*\n").expect("paragraph regex"));

/// Split `text` into delivery chunks: order-preserving, trimmed, non-empty.
pub fn segment(text: &str) -> Vec<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    let chars: Vec<char> = trimmed.chars().collect();
    let n = chars.len();

    if n <= SEGMENT_SINGLE_MAX {
        return vec![trimmed.to_string()];
    }

    if n <= SEGMENT_MIDPOINT_MAX {
        return match split_near_midpoint(&chars) {
            Some(pair) => pair,
            None => vec![trimmed.to_string()],
        };
    }

    let paragraphs = split_paragraphs(trimmed);
    if paragraphs.len() > 1 {
        return paragraphs;
    }

    merge_sentences(split_sentences(&chars))
}

// ── Boundary classification ────────────────────────────────────────────────

fn is_terminator(c: char) -> bool {
    matches!(c, '.' | '!' | '?')
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// A `.` that belongs to an email address or URL rather than ending a
/// sentence: word characters immediately on both sides, or an `@` within a
/// ±10-character window.
fn is_address_dot(chars: &[char], i: usize) -> bool {
    if chars[i] != '.' {
        return false;
    }
    let prev_word = i > 0 && is_word_char(chars[i - 1]);
    let next_word = i + 1 < chars.len() && is_word_char(chars[i + 1]);
    if prev_word && next_word {
        return true;
    }
    let lo = i.saturating_sub(10);
    let hi = (i + 10).min(chars.len() - 1);
    chars[lo..=hi].contains(&'@')
}

/// Terminator at `i` that genuinely closes a sentence: not address
/// punctuation, and followed by whitespace or end of text (never cutting
/// inside a word).
fn is_sentence_break(chars: &[char], i: usize) -> bool {
    if !is_terminator(chars[i]) {
        return false;
    }
    if chars[i] == '.' && is_address_dot(chars, i) {
        return false;
    }
    i + 1 == chars.len() || chars[i + 1].is_whitespace()
}

// ── Splitting strategies ───────────────────────────────────────────────────

/// For medium texts: one split at the valid sentence break nearest the
/// midpoint, searched within [0.6·mid, 1.4·mid]. `None` when no break in
/// the window qualifies.
fn split_near_midpoint(chars: &[char]) -> Option<Vec<String>> {
    let n = chars.len();
    let mid = n / 2;
    let lo = mid * 3 / 5;
    let hi = (mid * 7 / 5).min(n - 1);

    let mut best: Option<usize> = None;
    for i in lo..=hi {
        if is_sentence_break(chars, i) {
            let closer = best.map(|b| i.abs_diff(mid) < b.abs_diff(mid)).unwrap_or(true);
            if closer {
                best = Some(i);
            }
        }
    }

    let cut = best?;
    let head = chars[..=cut].iter().collect::<String>().trim().to_string();
    let tail = chars[cut + 1..].iter().collect::<String>().trim().to_string();
    if head.is_empty() || tail.is_empty() {
        return None;
    }
    Some(vec![head, tail])
}

fn split_paragraphs(text: &str) -> Vec<String> {
    PARAGRAPH_BREAK
        .split(text)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(String::from)
        .collect()
}

/// Character scan accumulating sentences; a text with no terminator at all
/// comes back as one sentence.
fn split_sentences(chars: &[char]) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();

    for (i, &c) in chars.iter().enumerate() {
        current.push(c);
        if is_sentence_break(chars, i) {
            let sentence = current.trim();
            if !sentence.is_empty() {
                sentences.push(sentence.to_string());
            }
            current.clear();
        }
    }

    let tail = current.trim();
    if !tail.is_empty() {
        sentences.push(tail.to_string());
    }
    sentences
}

/// Greedily merge consecutive sentences into groups under the cap, so a
/// reply with many short sentences doesn't become a flood of tiny messages.
fn merge_sentences(sentences: Vec<String>) -> Vec<String> {
    let mut groups: Vec<String> = Vec::new();
    let mut current = String::new();

    for sentence in sentences {
        if current.is_empty() {
            current = sentence;
        } else if current.chars().count() + 1 + sentence.chars().count() <= SEGMENT_GROUP_MAX {
            current.push(' ');
            current.push_str(&sentence);
        } else {
            groups.push(current);
            current = sentence;
        }
    }
    if !current.is_empty() {
        groups.push(current);
    }
    groups
}
