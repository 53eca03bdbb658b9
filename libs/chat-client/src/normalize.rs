//! Maps bot payloads of any shape onto [`InboundMessage`].
//!
//! Lookups are ordered and the first non-null match wins:
//!
//! | field   | primary          | fallback                   |
//! |---------|------------------|----------------------------|
//! | text    | `text`           | `message.text`             |
//! | image   | `image`          | `attachment.payload.src`   |
//! | options | `buttons`        | `payload.buttons`          |
//! | data    | `custom`         | `payload.custom`           |
//!
//! `quick_replies` short-circuits into a [`InboundMessage::Choice`]. Anything that
//! resolves to nothing is kept whole as [`InboundMessage::Custom`].

use serde_json::Value;
use tracing::debug;

use crate::types::{ChoiceOption, InboundMessage};

pub const DEFAULT_CHOICE_PROMPT: &str = "Choose:";
const PREVIEW_CHARS: usize = 120;

pub fn normalize(raw: &Value) -> InboundMessage {
    if let Some(quick_replies) = lookup(raw, "/quick_replies") {
        let prompt = string_at(raw, "/text").unwrap_or_else(|| DEFAULT_CHOICE_PROMPT.to_string());
        return InboundMessage::Choice {
            prompt: Some(prompt),
            options: options_from(quick_replies),
        };
    }

    let text = string_at(raw, "/text").or_else(|| string_at(raw, "/message/text"));
    let image = string_at(raw, "/image").or_else(|| string_at(raw, "/attachment/payload/src"));
    let options = lookup(raw, "/buttons")
        .or_else(|| lookup(raw, "/payload/buttons"))
        .map(options_from)
        .filter(|options| !options.is_empty());
    let data = lookup(raw, "/custom")
        .or_else(|| lookup(raw, "/payload/custom"))
        .cloned();

    match (text, image, options, data) {
        (None, None, None, None) => {
            debug!(preview = %preview(raw), "unrecognized bot payload kept as custom");
            InboundMessage::Custom { data: raw.clone() }
        }
        (Some(text), None, None, None) => InboundMessage::Text { text },
        (text, image, options, data) => InboundMessage::Composite {
            text,
            image,
            options,
            data,
        },
    }
}

/// Short single-line rendering of a payload for logs and fallback bubbles.
pub fn preview(raw: &Value) -> String {
    let rendered = raw.to_string();
    match rendered.char_indices().nth(PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}...", &rendered[..cut]),
        None => rendered,
    }
}

fn lookup<'a>(raw: &'a Value, pointer: &str) -> Option<&'a Value> {
    raw.pointer(pointer).filter(|value| !value.is_null())
}

fn string_at(raw: &Value, pointer: &str) -> Option<String> {
    lookup(raw, pointer)
        .and_then(Value::as_str)
        .map(|s| s.to_string())
}

fn options_from(value: &Value) -> Vec<ChoiceOption> {
    match value {
        Value::Array(items) => items.iter().filter_map(option_from).collect(),
        other => option_from(other).into_iter().collect(),
    }
}

fn option_from(item: &Value) -> Option<ChoiceOption> {
    match item {
        Value::Null => None,
        Value::Object(obj) => {
            let label = ["title", "label", "text"]
                .iter()
                .find_map(|key| obj.get(*key).and_then(Value::as_str))
                .map(|s| s.to_string());
            let payload = obj.get("payload").and_then(scalar_string);
            match (label, payload) {
                (Some(label), Some(payload)) => Some(ChoiceOption { label, payload }),
                (Some(label), None) => Some(ChoiceOption {
                    payload: label.clone(),
                    label,
                }),
                (None, Some(payload)) => Some(ChoiceOption {
                    label: payload.clone(),
                    payload,
                }),
                // unlabeled entries stay selectable and carry their whole JSON
                (None, None) => Some(ChoiceOption {
                    label: preview(item),
                    payload: item.to_string(),
                }),
            }
        }
        other => scalar_string(other).map(|s| ChoiceOption::new(s.clone(), s)),
    }
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
