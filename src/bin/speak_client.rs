//! # Speak Client
//!
//! Terminal client for the voice bridge. Opens one session, then turns each
//! line of input into a command:
//!
//! - `m` (or `mic`) toggles the microphone
//! - `q` (or `quit`) disconnects and exits
//! - anything else is sent as a text turn
//!
//! Built with `--features native-audio` the client talks to the real
//! microphone and speaker via cpal; without it the null devices let every
//! protocol path run on a headless machine.
//!
//! ## Usage:
//! ```text
//! speak-client <userId> [ws-url]
//! ```
//! When no URL is given the client dials the configured server address.

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use teacher_voice_backend::client::{self, ClientCommand};
use teacher_voice_backend::config::AppConfig;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing()?;

    let mut args = std::env::args().skip(1);
    let user_id = match args.next() {
        Some(id) => id,
        None => {
            eprintln!("usage: speak-client <userId> [ws-url]");
            std::process::exit(2);
        }
    };

    let config = AppConfig::load()?;
    config.validate()?;

    let url = match args.next() {
        Some(url) => url,
        None => {
            // A server bound to 0.0.0.0 is still dialed via loopback
            let host = if config.server.host == "0.0.0.0" {
                "127.0.0.1"
            } else {
                config.server.host.as_str()
            };
            format!(
                "ws://{}:{}/ws/speak?userId={}",
                host, config.server.port, user_id
            )
        }
    };

    let (commands_tx, commands_rx) = mpsc::unbounded_channel();

    // Keyboard loop: one command per line
    let stdin_commands = commands_tx.clone();
    tokio::spawn(async move {
        println!("m = toggle microphone, q = quit, anything else = text turn");
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let line = line.trim().to_string();
            let command = match line.as_str() {
                "" => continue,
                "m" | "mic" => ClientCommand::ToggleMic,
                "q" | "quit" => ClientCommand::Disconnect,
                _ => ClientCommand::SendText(line),
            };
            let quitting = matches!(command, ClientCommand::Disconnect);
            if stdin_commands.send(command).is_err() || quitting {
                break;
            }
        }
    });

    // Ctrl+C becomes an orderly disconnect
    let interrupt_commands = commands_tx;
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, disconnecting");
            let _ = interrupt_commands.send(ClientCommand::Disconnect);
        }
    });

    if let Err(err) = client::run(&config, &url, commands_rx).await {
        error!("session ended with error: {}", err);
        std::process::exit(1);
    }

    info!("session closed");
    Ok(())
}

fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "teacher_voice_backend=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}
