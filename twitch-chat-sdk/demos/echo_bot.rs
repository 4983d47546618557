//! Minimal echo bot for Twitch chat.
//!
//! Joins a channel and answers `!ping` and `!echo <text>`. Without a token
//! it connects as a guest and only prints what it sees.
//!
//! Usage:
//!   cargo run --example echo_bot -- --channel somechannel
//!   cargo run --example echo_bot -- --channel somechannel --username mybot --token <oauth token>
//!
//! Set `RUST_LOG=twitch_chat_sdk=debug` to see the protocol traffic.

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;
use twitch_chat_sdk::config::DEFAULT_URL;
use twitch_chat_sdk::{ConnectConfig, Credentials, Handlers, Message, Session};

#[derive(Parser)]
#[command(name = "echo-bot", about = "Minimal Twitch chat echo bot")]
struct Args {
    /// Chat server URL (wss://, ws://, ircs:// or irc://)
    #[arg(long, default_value = DEFAULT_URL)]
    url: String,

    /// Channel to join
    #[arg(long)]
    channel: String,

    /// Bot account name. Omit to connect as a guest.
    #[arg(long, requires = "token")]
    username: Option<String>,

    /// OAuth token for the bot account
    #[arg(long, env = "TWITCH_TOKEN", requires = "username")]
    token: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let credentials = match (&args.username, &args.token) {
        (Some(username), Some(token)) => Credentials::oauth(username, token),
        _ => Credentials::guest(),
    };

    // Handlers only forward; replies happen in the main loop below.
    let (tx, mut messages) = mpsc::unbounded_channel::<Message>();
    let handlers = Handlers::new()
        .on_message(move |msg| {
            let tx = tx.clone();
            async move {
                tx.send(msg)?;
                Ok(())
            }
        })
        .on_notice(|notice| async move {
            println!("-- notice [{}] {}", notice.channel, notice.message);
            Ok(())
        })
        .on_timeout(|t| async move {
            match t.duration() {
                Some(d) => println!("-- {} timed out for {}s", t.username, d.as_secs()),
                None => println!("-- {} banned", t.username),
            }
            Ok(())
        });

    println!("Connecting to {} as {}...", args.url, credentials.username());
    let config = ConnectConfig {
        url: args.url.clone(),
        ..Default::default()
    };
    let session = Session::connect_with_config(credentials, handlers, config).await?;
    let channel = session.join(&args.channel)?;
    println!("Joined #{}", channel.name());

    loop {
        tokio::select! {
            Some(msg) = messages.recv() => {
                println!("[#{}] <{}> {}", msg.channel, msg.author(), msg.message);
                if msg.message == "!ping" {
                    channel.send("pong")?;
                } else if let Some(text) = msg.message.strip_prefix("!echo ") {
                    channel.send(text)?;
                }
            }
            _ = session.closed() => {
                println!("Connection closed");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                channel.leave()?;
                session.disconnect()?;
                // Let the writer flush the PART before the runtime stops.
                if tokio::time::timeout(Duration::from_secs(5), session.closed()).await.is_err() {
                    tracing::warn!("Connection did not close in time");
                }
                break;
            }
        }
    }

    Ok(())
}
