use anyhow::{Context, Result, bail};
use serde_json::Value;

/// One line typed at the prompt.
#[derive(Debug, PartialEq)]
pub enum Command {
    Text(String),
    Payload(Value),
    /// 1-based index into the latest offered options.
    Choose(usize),
    Open,
    Close,
    Quit,
    Help,
    Empty,
}

pub const HELP: &str = "\
commands:
  <text>            send a message
  /payload <json>   send a structured payload without echoing it
  /choose <n>       pick option n of the latest choice
  /open, /close     show or hide the conversation
  /quit             leave";

pub fn parse(line: &str) -> Result<Command> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Command::Empty);
    }

    let (head, rest) = match line.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (line, ""),
    };
    match head {
        "/payload" => {
            if rest.is_empty() {
                bail!("usage: /payload <json>");
            }
            let value = serde_json::from_str(rest).context("payload is not valid JSON")?;
            Ok(Command::Payload(value))
        }
        "/choose" => {
            let index: usize = rest
                .parse()
                .with_context(|| format!("`{rest}` is not an option number"))?;
            if index == 0 {
                bail!("options are numbered from 1");
            }
            Ok(Command::Choose(index))
        }
        "/open" => Ok(Command::Open),
        "/close" => Ok(Command::Close),
        "/quit" | "/exit" => Ok(Command::Quit),
        "/help" => Ok(Command::Help),
        // anything else, slash commands for the bot included, goes out verbatim
        _ => Ok(Command::Text(line.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn plain_and_bot_commands_are_text() {
        assert_eq!(parse("  hello there ").unwrap(), Command::Text("hello there".into()));
        assert_eq!(parse("/restart").unwrap(), Command::Text("/restart".into()));
        assert_eq!(parse("   ").unwrap(), Command::Empty);
    }

    #[test]
    fn payload_requires_json() {
        assert_eq!(
            parse(r#"/payload {"message": "/greet", "lang": "en"}"#).unwrap(),
            Command::Payload(json!({"message": "/greet", "lang": "en"}))
        );
        assert!(parse("/payload").is_err());
        assert!(parse("/payload {oops").is_err());
    }

    #[test]
    fn choose_takes_one_based_index() {
        assert_eq!(parse("/choose 2").unwrap(), Command::Choose(2));
        assert!(parse("/choose 0").is_err());
        assert!(parse("/choose two").is_err());
    }

    #[test]
    fn client_commands() {
        assert_eq!(parse("/open").unwrap(), Command::Open);
        assert_eq!(parse("/close").unwrap(), Command::Close);
        assert_eq!(parse("/quit").unwrap(), Command::Quit);
        assert_eq!(parse("/help").unwrap(), Command::Help);
    }
}
