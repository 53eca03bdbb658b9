use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One user-originated event attributed to a sender.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutboundEnvelope {
    pub sender_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
}

impl OutboundEnvelope {
    pub fn text(sender_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            sender_id: sender_id.into(),
            text: Some(text.into()),
            raw: None,
        }
    }

    pub fn raw(sender_id: impl Into<String>, raw: Value) -> Self {
        Self {
            sender_id: sender_id.into(),
            text: None,
            raw: Some(raw),
        }
    }

    /// Attaches extra payload fields to a text envelope.
    pub fn with_raw(mut self, raw: Value) -> Self {
        self.raw = Some(raw);
        self
    }

    /// True when the envelope carries no typed text, only a structured payload.
    pub fn is_payload(&self) -> bool {
        self.text.is_none() && self.raw.is_some()
    }

    /// Body sent over either transport: `{message, sender, ...raw}`.
    ///
    /// Fields of an object `raw` are merged last and win over `message`/`sender`.
    /// A non-object `raw` without text becomes the `message` itself.
    pub fn wire_body(&self) -> Value {
        let message = match (&self.text, &self.raw) {
            (Some(text), _) => Value::String(text.clone()),
            (None, Some(raw)) if !raw.is_object() => raw.clone(),
            _ => Value::String(String::new()),
        };

        let mut body = Map::new();
        body.insert("message".into(), message);
        body.insert("sender".into(), Value::String(self.sender_id.clone()));
        if let Some(Value::Object(fields)) = &self.raw {
            for (key, value) in fields {
                body.insert(key.clone(), value.clone());
            }
        }
        Value::Object(body)
    }
}

/// A selectable reply offered by the bot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceOption {
    pub label: String,
    pub payload: String,
}

impl ChoiceOption {
    pub fn new(label: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            payload: payload.into(),
        }
    }
}

/// Normalized inbound bot message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    Text {
        text: String,
    },
    Image {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
    },
    Choice {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prompt: Option<String>,
        options: Vec<ChoiceOption>,
    },
    Custom {
        data: Value,
    },
    Composite {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        image: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        options: Option<Vec<ChoiceOption>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },
}

impl InboundMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Image { .. } => "image",
            Self::Choice { .. } => "choice",
            Self::Custom { .. } => "custom",
            Self::Composite { .. } => "composite",
        }
    }

    /// Options the user can pick from, if the message offers any.
    pub fn options(&self) -> &[ChoiceOption] {
        match self {
            Self::Choice { options, .. } => options,
            Self::Composite {
                options: Some(options),
                ..
            } => options,
            _ => &[],
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportStatus {
    #[default]
    Idle,
    Connecting,
    Connected,
    Disconnected,
    TypingIndicator,
}

impl TransportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::TypingIndicator => "typing",
        }
    }
}

impl fmt::Display for TransportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
