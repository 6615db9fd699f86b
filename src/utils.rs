//! Utility functions for the view engine.
//!
//! - JS string escaping (injection-safe)
//! - JSON embedding inside `<script>` tags
//! - Path normalization for manifest keys

use std::path::{Component, Path};

use serde::Serialize;

// ---------------------------------------------------------------------------
// JS String Escaping
// ---------------------------------------------------------------------------

/// Escape a string for safe embedding inside a JS double-quoted string literal.
pub fn escape_js_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 16);
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            c => out.push(c),
        }
    }
    out
}

/// Serialize a value to JSON that can be placed verbatim inside a `<script>` element.
///
/// `<`, `>` and `&` are emitted as unicode escapes so the payload can never
/// close the surrounding element or open a comment.
pub fn to_script_json<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_json::Error> {
    let json = serde_json::to_string(value)?;
    let mut out = String::with_capacity(json.len());
    for c in json.chars() {
        match c {
            '<' => out.push_str("\\u003c"),
            '>' => out.push_str("\\u003e"),
            '&' => out.push_str("\\u0026"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            c => out.push(c),
        }
    }
    Ok(out)
}

/// Escape a value for an HTML attribute (double-quoted).
pub fn escape_html_attr(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            c => out.push(c),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// Join the normal components of a relative path with `/`, whatever the host separator.
pub fn to_slash(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Strip the last extension of a slash-separated key (`a/b.c.svelte` → `a/b.c`).
pub fn strip_extension(key: &str) -> &str {
    let file_start = key.rfind('/').map_or(0, |i| i + 1);
    match key[file_start..].rfind('.') {
        Some(dot) if dot > 0 => &key[..file_start + dot],
        _ => key,
    }
}

/// Join a public host prefix and a slash-separated asset path.
pub fn join_url(host: &str, asset: &str) -> String {
    let asset = asset.trim_start_matches('/');
    if host.is_empty() {
        format!("/{}", asset)
    } else {
        format!("{}/{}", host.trim_end_matches('/'), asset)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
