use std::sync::{Mutex, PoisonError};

use gsm_chat_client::{
    ChatEvent, ChatSink, ChoiceOption, InboundMessage, normalize::preview,
};

/// Prints chat events to stdout and remembers the latest offered options.
#[derive(Default)]
pub struct ConsoleSink {
    options: Mutex<Vec<ChoiceOption>>,
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn option(&self, index: usize) -> Option<ChoiceOption> {
        let options = self.options.lock().unwrap_or_else(PoisonError::into_inner);
        index.checked_sub(1).and_then(|i| options.get(i).cloned())
    }
}

impl ChatSink for ConsoleSink {
    fn deliver(&self, event: ChatEvent) {
        if let ChatEvent::Message(message) = &event {
            if !message.options().is_empty() {
                *self.options.lock().unwrap_or_else(PoisonError::into_inner) =
                    message.options().to_vec();
            }
        }
        if let Some(text) = render(&event) {
            println!("{text}");
        }
    }
}

pub fn render(event: &ChatEvent) -> Option<String> {
    match event {
        ChatEvent::Outbound { text } => Some(format!("you> {text}")),
        ChatEvent::Message(message) => Some(render_message(message)),
        ChatEvent::TypingStarted => Some("bot is typing...".into()),
        ChatEvent::TypingStopped => None,
        ChatEvent::Status(status) => Some(format!("-- {status} --")),
        ChatEvent::Visibility { open: true } => Some("-- chat opened --".into()),
        ChatEvent::Visibility { open: false } => Some("-- chat closed --".into()),
    }
}

fn render_message(message: &InboundMessage) -> String {
    let mut lines = Vec::new();
    match message {
        InboundMessage::Text { text } => lines.push(text.clone()),
        InboundMessage::Image { url, caption } => {
            lines.push(format!("[image] {url}"));
            lines.extend(caption.clone());
        }
        InboundMessage::Choice { prompt, options } => {
            lines.extend(prompt.clone());
            push_options(&mut lines, options);
        }
        InboundMessage::Custom { data } => lines.push(format!("[custom] {}", preview(data))),
        InboundMessage::Composite {
            text,
            image,
            options,
            data,
        } => {
            lines.extend(text.clone());
            if let Some(url) = image {
                lines.push(format!("[image] {url}"));
            }
            if let Some(options) = options {
                push_options(&mut lines, options);
            }
            if let Some(data) = data {
                lines.push(format!("[custom] {}", preview(data)));
            }
        }
    }
    format!("bot> {}", lines.join("\n     "))
}

fn push_options(lines: &mut Vec<String>, options: &[ChoiceOption]) {
    for (i, option) in options.iter().enumerate() {
        lines.push(format!("{}) {}", i + 1, option.label));
    }
}

#[cfg(test)]
mod tests {
    use gsm_chat_client::TransportStatus;
    use serde_json::json;

    use super::*;

    #[test]
    fn renders_conversation_lines() {
        assert_eq!(
            render(&ChatEvent::Outbound {
                text: "hello".into()
            })
            .as_deref(),
            Some("you> hello")
        );
        assert_eq!(
            render(&ChatEvent::Message(InboundMessage::text("hi"))).as_deref(),
            Some("bot> hi")
        );
        assert_eq!(
            render(&ChatEvent::Status(TransportStatus::Disconnected)).as_deref(),
            Some("-- disconnected --")
        );
        assert_eq!(render(&ChatEvent::TypingStopped), None);
    }

    #[test]
    fn renders_choices_numbered() {
        let message = InboundMessage::Choice {
            prompt: Some("Pick".into()),
            options: vec![ChoiceOption::new("Red", "/red"), ChoiceOption::new("Blue", "/blue")],
        };
        assert_eq!(
            render(&ChatEvent::Message(message)).as_deref(),
            Some("bot> Pick\n     1) Red\n     2) Blue")
        );
    }

    #[test]
    fn renders_composite_parts() {
        let message = InboundMessage::Composite {
            text: Some("Look".into()),
            image: Some("http://img.test/a.png".into()),
            options: None,
            data: Some(json!({"k": 1})),
        };
        assert_eq!(
            render(&ChatEvent::Message(message)).as_deref(),
            Some("bot> Look\n     [image] http://img.test/a.png\n     [custom] {\"k\":1}")
        );
    }

    #[test]
    fn remembers_latest_options() {
        let sink = ConsoleSink::new();
        sink.deliver(ChatEvent::Message(InboundMessage::Choice {
            prompt: None,
            options: vec![ChoiceOption::new("Yes", "/yes")],
        }));
        sink.deliver(ChatEvent::Message(InboundMessage::text("ok")));

        assert_eq!(sink.option(1), Some(ChoiceOption::new("Yes", "/yes")));
        assert_eq!(sink.option(2), None);
        assert_eq!(sink.option(0), None);
    }
}
