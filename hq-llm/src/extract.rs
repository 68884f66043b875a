//! Best-effort plain-text extraction from a provider response envelope.
//!
//! Shapes are tried in priority order; the first one yielding non-blank text
//! wins. Extraction never fails: a reply with no text anywhere yields `""`.

use serde_json::Value;

type ShapeMatcher = fn(&Value) -> Option<String>;

const SHAPE_MATCHERS: &[(&str, ShapeMatcher)] = &[
    ("top_level_text", top_level_text),
    ("output_blocks", output_blocks),
    ("chat_choices", chat_choices),
    ("deep_scan", deep_scan),
];

/// Deep scan stops descending past this many nested containers.
const MAX_SCAN_DEPTH: usize = 64;

pub fn extract_text(response: &Value) -> String {
    for (shape, matcher) in SHAPE_MATCHERS {
        if let Some(text) = matcher(response) {
            tracing::trace!(shape, len = text.len(), "response text extracted");
            return text;
        }
    }
    String::new()
}

fn non_blank(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// A `text` field is either a plain string or an object carrying `value`/`text`.
fn text_value(v: Option<&Value>) -> Option<&str> {
    match v? {
        Value::String(s) => Some(s.as_str()),
        Value::Object(map) => map
            .get("value")
            .and_then(Value::as_str)
            .or_else(|| map.get("text").and_then(Value::as_str)),
        _ => None,
    }
}

fn top_level_text(response: &Value) -> Option<String> {
    ["output_text", "outputText"]
        .iter()
        .filter_map(|key| response.get(*key).and_then(Value::as_str))
        .find_map(|s| non_blank(s.to_string()))
}

fn output_blocks(response: &Value) -> Option<String> {
    let items = response.get("output")?.as_array()?;
    let mut preferred = String::new();
    let mut generic = String::new();

    for item in items {
        match item.get("content") {
            Some(Value::Array(blocks)) => {
                for block in blocks {
                    let is_output_text =
                        block.get("type").and_then(Value::as_str) == Some("output_text");
                    if is_output_text {
                        if let Some(t) = text_value(block.get("text")) {
                            preferred.push_str(t);
                            continue;
                        }
                    }
                    if let Some(t) = text_value(block.get("text")) {
                        generic.push_str(t);
                    }
                    if let Some(t) = text_value(block.get("transcript")) {
                        generic.push_str(t);
                    }
                }
            }
            Some(Value::String(s)) => generic.push_str(s),
            _ => {}
        }
        if let Some(t) = text_value(item.get("text")) {
            generic.push_str(t);
        }
    }

    non_blank(preferred).or_else(|| non_blank(generic))
}

fn chat_choices(response: &Value) -> Option<String> {
    let content = response
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"))
        .or_else(|| response.get("message"))
        .and_then(|message| message.get("content"))?;

    match content {
        Value::String(s) => non_blank(s.clone()),
        Value::Array(blocks) => non_blank(
            blocks
                .iter()
                .filter_map(|b| text_value(b.get("text")))
                .collect::<String>(),
        ),
        _ => None,
    }
}

fn deep_scan(response: &Value) -> Option<String> {
    let mut parts = Vec::new();
    scan_node(response, 0, &mut parts);
    non_blank(parts.concat())
}

fn scan_node<'a>(node: &'a Value, depth: usize, parts: &mut Vec<&'a str>) {
    if depth > MAX_SCAN_DEPTH {
        return;
    }
    match node {
        Value::Object(map) => {
            if let Some(s) = map.get("output_text").and_then(Value::as_str) {
                parts.push(s);
            }
            match map.get("text") {
                Some(Value::String(s)) => parts.push(s),
                Some(Value::Object(inner)) => {
                    if let Some(s) = inner.get("value").and_then(Value::as_str) {
                        parts.push(s);
                    }
                }
                _ => {}
            }
            if let Some(s) = map.get("transcript").and_then(Value::as_str) {
                parts.push(s);
            }
            for child in map.values() {
                if child.is_object() || child.is_array() {
                    scan_node(child, depth + 1, parts);
                }
            }
        }
        Value::Array(items) => {
            for child in items {
                scan_node(child, depth + 1, parts);
            }
        }
        _ => {}
    }
}
