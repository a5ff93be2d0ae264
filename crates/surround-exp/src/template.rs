//! Minimal `{{ path }}` substitution used for `results.html`.
//!
//! `{{ a.b }}` inserts the value at dot path `a.b` HTML-escaped, `{{& a.b }}`
//! inserts it verbatim. Strings render without quotes, other values as JSON,
//! missing paths as nothing.

use serde_json::Value;
use surround_core::{ErrorInfo, SurroundError};

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// Renders `template` against `context`.
pub fn render(template: &str, context: &Value) -> Result<String, SurroundError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find(OPEN) {
        out.push_str(&rest[..start]);
        let after = &rest[start + OPEN.len()..];
        let end = after.find(CLOSE).ok_or_else(|| {
            SurroundError::Serde(
                ErrorInfo::new("surround.exp.template", "unterminated '{{' in template")
                    .with_context("offset", (template.len() - rest.len() + start).to_string()),
            )
        })?;
        let tag = after[..end].trim();
        match tag.strip_prefix('&') {
            Some(path) => out.push_str(&lookup(context, path.trim())),
            None => out.push_str(&escape_html(&lookup(context, tag))),
        }
        rest = &after[end + CLOSE.len()..];
    }
    out.push_str(rest);
    Ok(out)
}

fn lookup(context: &Value, path: &str) -> String {
    let mut node = context;
    if path != "." {
        for segment in path.split('.') {
            let next = match node {
                Value::Object(map) => map.get(segment),
                Value::Array(items) => segment.parse::<usize>().ok().and_then(|index| items.get(index)),
                _ => None,
            };
            match next {
                Some(value) => node = value,
                None => return String::new(),
            }
        }
    }
    match node {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}
