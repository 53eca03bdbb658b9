use std::{collections::HashMap, env, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use gsm_chat_client::{ChatEngine, ClientConfig, FileKeyValueStore};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

mod command;
mod render;

use command::{Command, HELP};
use render::ConsoleSink;

/// Talk to a conversational bot from the terminal.
///
/// Every flag falls back to its `CHAT_*` environment variable.
#[derive(Parser, Debug)]
#[command(name = "gsm-chat", version)]
struct Cli {
    /// Bot endpoint: the REST webhook URL or the WebSocket URL.
    #[arg(long, value_name = "URL")]
    endpoint: Option<String>,
    /// `rest` or `duplex`.
    #[arg(long)]
    transport: Option<String>,
    /// Bearer credential attached to every request.
    #[arg(long)]
    credential: Option<String>,
    #[arg(long, value_name = "SECS")]
    session_timeout_secs: Option<u64>,
    #[arg(long, value_name = "MS")]
    reconnect_interval_ms: Option<u64>,
    #[arg(long)]
    storage_key: Option<String>,
    /// Sent once, silently, when the conversation starts.
    #[arg(long, value_name = "TEXT")]
    initial_payload: Option<String>,
    /// Directory holding the persisted session.
    #[arg(long, value_name = "PATH", default_value = ".gsm-chat")]
    storage_dir: PathBuf,
}

impl Cli {
    fn client_config(&self) -> Result<ClientConfig> {
        let mut flags = HashMap::new();
        let mut set = |name: &'static str, value: Option<String>| {
            if let Some(value) = value {
                flags.insert(name, value);
            }
        };
        set("CHAT_ENDPOINT", self.endpoint.clone());
        set("CHAT_TRANSPORT", self.transport.clone());
        set("CHAT_CREDENTIAL", self.credential.clone());
        set(
            "CHAT_SESSION_TIMEOUT_SECS",
            self.session_timeout_secs.map(|v| v.to_string()),
        );
        set(
            "CHAT_RECONNECT_INTERVAL_MS",
            self.reconnect_interval_ms.map(|v| v.to_string()),
        );
        set("CHAT_STORAGE_KEY", self.storage_key.clone());
        set("CHAT_INITIAL_PAYLOAD", self.initial_payload.clone());

        ClientConfig::from_lookup(|name| {
            flags
                .get(name)
                .cloned()
                .or_else(|| env::var(name).ok())
        })
        .context("invalid chat configuration (see --help)")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    gsm_telemetry::install("gsm-chat-cli")?;

    let config = cli.client_config()?;
    let storage = FileKeyValueStore::open(&cli.storage_dir).with_context(|| {
        format!("cannot open storage directory {}", cli.storage_dir.display())
    })?;
    let sink = Arc::new(ConsoleSink::new());
    let engine = ChatEngine::builder(config, sink.clone())
        .storage(Arc::new(storage))
        .build()
        .context("failed to start chat engine")?;

    info!(
        endpoint = engine.config().endpoint(),
        transport = %engine.config().transport(),
        sender_id = %engine.session().sender_id,
        "chat started"
    );
    println!("connected as {} (/help for commands)", engine.session().sender_id);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        match command::parse(&line) {
            Ok(Command::Text(text)) => engine.send_text(&text),
            Ok(Command::Payload(payload)) => engine.send_custom_payload(payload),
            Ok(Command::Choose(index)) => match sink.option(index) {
                Some(option) => engine.select_option(&option),
                None => println!("no option {index} on offer"),
            },
            Ok(Command::Open) => engine.open(),
            Ok(Command::Close) => engine.close(),
            Ok(Command::Help) => println!("{HELP}"),
            Ok(Command::Quit) => break,
            Ok(Command::Empty) => {}
            Err(err) => println!("{err:#}"),
        }
    }

    engine.shutdown();
    Ok(())
}
