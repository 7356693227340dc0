//! Turns raw model output into a presentable chat reply.
//!
//! The cleaning stages, prompt echo removal included, are applied until the
//! text stops changing, so running [`sanitize`] or [`clean`] on their own output
//! is a no-op. Nothing in here can fail: input that cleans down to nothing
//! becomes [`FALLBACK_REPLY`].

use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;

pub const FALLBACK_REPLY: &str =
    "I'm not sure how to respond to that. Could you try asking something else?";

const MAX_PASSES: usize = 16;
const TERMINATORS: [char; 3] = ['.', '!', '?'];

static ROLE_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(?:AI|Assistant|Human):").expect("role label pattern is valid")
});

static BRACKETED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[.*?\]").expect("bracket pattern is valid")
});

/// Cleans `raw` generated for `prompt`, falling back to a fixed sentence when
/// nothing usable is left.
pub fn sanitize(raw: &str, prompt: &str) -> String {
    // Already clean, and may itself start with the prompt.
    if raw == FALLBACK_REPLY {
        return raw.to_string();
    }
    let cleaned = settle(raw, |text| clean_once(strip_prompt(text, prompt)));
    if cleaned.is_empty() {
        FALLBACK_REPLY.to_string()
    } else {
        cleaned
    }
}

/// Runs the cleaning stages to a fixed point. May return an empty string.
pub fn clean(text: &str) -> String {
    settle(text, clean_once)
}

fn settle(text: &str, pass: impl Fn(&str) -> String) -> String {
    let mut current = pass(text);
    for _ in 0..MAX_PASSES {
        let next = pass(&current);
        if next == current {
            return current;
        }
        current = next;
    }
    debug!("Reply cleaning did not settle after {} passes", MAX_PASSES);
    current
}

fn strip_prompt<'a>(text: &'a str, prompt: &str) -> &'a str {
    if prompt.is_empty() {
        return text;
    }
    text.strip_prefix(prompt).unwrap_or(text)
}

fn clean_once(text: &str) -> String {
    let text = strip_role_labels(text);
    let text = truncate_at_blank_line(text.trim_start());
    let text = BRACKETED.replace_all(text, "");
    let text = dedupe_sentences(&text);
    ensure_terminated(text)
}

fn strip_role_labels(mut text: &str) -> &str {
    while let Some(m) = ROLE_LABEL.find(text) {
        text = &text[m.end()..];
    }
    text
}

fn truncate_at_blank_line(text: &str) -> &str {
    match text.find("\n\n") {
        Some(pos) => &text[..pos],
        None => text,
    }
}

/// Splits into `(body, terminator)` pairs. A terminator is a run of `.`, `!` or `?`;
/// trailing text without one gets an empty terminator.
fn split_sentences(text: &str) -> Vec<(&str, &str)> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if !TERMINATORS.contains(&c) {
            continue;
        }
        let mut end = i + c.len_utf8();
        while let Some(&(j, next)) = chars.peek() {
            if !TERMINATORS.contains(&next) {
                break;
            }
            end = j + next.len_utf8();
            chars.next();
        }
        sentences.push((&text[start..i], &text[i..end]));
        start = end;
    }
    if start < text.len() {
        sentences.push((&text[start..], ""));
    }
    sentences
}

/// Keeps the first occurrence of every sentence, compared on trimmed text.
fn dedupe_sentences(text: &str) -> String {
    let mut seen: Vec<&str> = Vec::new();
    let mut kept: Vec<String> = Vec::new();

    for (body, terminator) in split_sentences(text) {
        let body = body.trim();
        if body.is_empty() || seen.contains(&body) {
            continue;
        }
        seen.push(body);
        kept.push(format!("{}{}", body, terminator));
    }
    kept.join(" ")
}

fn ensure_terminated(mut text: String) -> String {
    if !text.is_empty() && !text.ends_with(TERMINATORS) {
        text.push('.');
    }
    text
}
