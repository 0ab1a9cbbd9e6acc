// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2024 Jonathan Lee
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License version 3
// as published by the Free Software Foundation.
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see https://www.gnu.org/licenses/.

//! Extracts a well-formed code candidate from raw oracle text.
//!
//! Responses routinely wrap the candidate object in prose or markdown
//! fences, use single quotes, or leave raw newlines and quotes inside the
//! `code` field. Extraction locates the first balanced object with a
//! depth counter, then applies repair passes until the object decodes.
//! A response that never yields a complete candidate is a [`ParseError`];
//! a partially populated candidate is never returned.

use serde::Deserialize;
use tracing::debug;

use crate::types::CodeCandidate;

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("no balanced candidate object found in oracle response")]
    NoObject,
    #[error("candidate object did not decode: {0}")]
    Undecodable(String),
    #[error("candidate object is missing a non-empty 'code' field")]
    MissingCode,
}

#[derive(Debug, Deserialize)]
struct CandidateWire {
    language: Option<String>,
    execution: Option<String>,
    code: Option<String>,
}

/// Decodes the single candidate object embedded in `raw`.
pub fn extract_candidate(raw: &str) -> Result<CodeCandidate, ParseError> {
    let mut found_object = false;

    for text in candidate_texts(raw) {
        found_object = true;
        if let Some(candidate) = try_decode(&text) {
            debug!("candidate object decoded");
            return finalise(candidate);
        }
        for repaired in repair_passes(&text) {
            if let Some(candidate) = try_decode(&repaired) {
                debug!("candidate object decoded after repair");
                return finalise(candidate);
            }
        }
    }

    if found_object {
        Err(ParseError::Undecodable(
            "balanced object found but no repair pass produced valid fields".to_string(),
        ))
    } else {
        Err(ParseError::NoObject)
    }
}

/// Object-shaped texts to attempt, most specific first: fenced blocks, then
/// balanced spans of the full response (string-aware scan first, naive depth
/// scan as a fallback for objects whose quoting is itself broken).
fn candidate_texts(raw: &str) -> Vec<String> {
    let mut texts = Vec::new();
    let mut push = |t: String| {
        let t = t.trim().to_string();
        if t.starts_with('{') && !texts.contains(&t) {
            texts.push(t);
        }
    };

    for block in fenced_blocks(raw) {
        if let Some(span) = balanced_object(&block, true) {
            push(span.to_string());
        }
        push(block);
    }
    if let Some(span) = balanced_object(raw, true) {
        push(span.to_string());
    }
    if let Some(span) = balanced_object(raw, false) {
        push(span.to_string());
    }
    texts
}

fn repair_passes(text: &str) -> Vec<String> {
    let mut passes = Vec::new();
    let requoted = normalise_quotes(text);
    if requoted != text {
        passes.push(requoted.clone());
        if let Some(fixed) = reescape_code_field(&requoted) {
            passes.push(fixed);
        }
    }
    if let Some(fixed) = reescape_code_field(text) {
        passes.push(fixed);
    }
    passes
}

fn try_decode(text: &str) -> Option<CandidateWire> {
    serde_json::from_str::<CandidateWire>(text).ok()
}

fn finalise(wire: CandidateWire) -> Result<CodeCandidate, ParseError> {
    let code = wire.code.map(|c| strip_fences(&c)).unwrap_or_default();
    if code.trim().is_empty() {
        return Err(ParseError::MissingCode);
    }
    Ok(CodeCandidate {
        language: wire.language.map(|l| l.trim().to_ascii_lowercase()),
        execution: wire.execution.map(|e| e.trim().to_ascii_lowercase()),
        code,
    })
}

/// First balanced `{...}` span. With `track_strings` the depth counter
/// ignores braces inside double-quoted strings (escape-aware); without it
/// every brace counts, which rescues objects whose own quoting is invalid.
fn balanced_object(text: &str, track_strings: bool) -> Option<&str> {
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text.char_indices() {
        if track_strings {
            if escaped {
                escaped = false;
                continue;
            }
            match ch {
                '\\' if in_string => {
                    escaped = true;
                    continue;
                }
                '"' => {
                    in_string = !in_string;
                    continue;
                }
                _ if in_string => continue,
                _ => {}
            }
        }
        match ch {
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' => {
                if depth > 0 {
                    depth -= 1;
                    if depth == 0 {
                        return start.map(|s| &text[s..=i]);
                    }
                }
            }
            _ => {}
        }
    }
    None
}

fn fenced_blocks(text: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut lines = text.lines();
    while let Some(line) = lines.next() {
        if line.trim().starts_with("```") {
            let mut content = String::new();
            for inner in lines.by_ref() {
                if inner.trim().starts_with("```") {
                    break;
                }
                if !content.is_empty() {
                    content.push('\n');
                }
                content.push_str(inner);
            }
            blocks.push(content);
        }
    }
    blocks
}

/// Converts single-quote string delimiters to the JSON standard, escaping
/// any double quotes that were inside them.
fn normalise_quotes(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_double = false;
    let mut in_single = false;
    let mut escaped = false;

    for ch in text.chars() {
        if escaped {
            out.push(ch);
            escaped = false;
            continue;
        }
        match ch {
            '\\' => {
                out.push(ch);
                escaped = true;
            }
            '"' if in_single => out.push_str("\\\""),
            '"' => {
                in_double = !in_double;
                out.push(ch);
            }
            '\'' if !in_double => {
                in_single = !in_single;
                out.push('"');
            }
            _ => out.push(ch),
        }
    }
    out
}

/// Re-escapes the value of the `code` field in place: the raw span is
/// unescaped, then re-serialised as a JSON string, which escapes interior
/// quotes and raw control characters without touching the rest of the
/// object.
fn reescape_code_field(object_text: &str) -> Option<String> {
    let key_pos = object_text.find("\"code\"")?;
    let after_key = &object_text[key_pos + "\"code\"".len()..];
    let colon = after_key.find(':')?;
    let after_colon = &after_key[colon + 1..];
    let quote_offset = after_colon.find('"')?;
    let value_start =
        key_pos + "\"code\"".len() + colon + 1 + quote_offset + 1;

    let bytes = object_text.as_bytes();
    let mut closing_before_brace = None;
    let mut closing_before_comma = None;
    for j in value_start..bytes.len() {
        if bytes[j] != b'"' {
            continue;
        }
        let rest = object_text[j + 1..].trim_start();
        if rest.starts_with('}') {
            closing_before_brace = Some(j);
        } else if rest.starts_with(',') && closing_before_comma.is_none() {
            closing_before_comma = Some(j);
        }
    }
    // Prefer the last quote that closes the object: the prompt places the
    // code field last, so a quote followed by '}' ends the value even when
    // the code itself contains quotes.
    let value_end = closing_before_brace.or(closing_before_comma)?;

    let raw_value = &object_text[value_start..value_end];
    let unescaped = unescape_fragment(raw_value);
    let reserialised = serde_json::to_string(&unescaped).ok()?;

    let mut rebuilt = String::with_capacity(object_text.len() + 16);
    rebuilt.push_str(&object_text[..value_start - 1]);
    rebuilt.push_str(&reserialised);
    rebuilt.push_str(&object_text[value_end + 1..]);
    Some(rebuilt)
}

fn unescape_fragment(fragment: &str) -> String {
    let mut out = String::with_capacity(fragment.len());
    let mut chars = fragment.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Removes markdown fence lines the oracle sometimes leaves inside the code
/// value itself.
fn strip_fences(code: &str) -> String {
    if !code.contains("```") {
        return code.trim().to_string();
    }
    code.lines()
        .filter(|line| !line.trim().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}
