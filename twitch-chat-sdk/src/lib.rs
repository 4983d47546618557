//! Twitch chat SDK
//!
//! An async client for Twitch chat: connect (with an OAuth token or as a
//! read-only guest), join channels, send messages, and receive typed events
//! through handlers.
//!
//! ```rust,no_run
//! use twitch_chat_sdk::{Handlers, Session};
//!
//! # async fn run() -> twitch_chat_sdk::Result<()> {
//! let handlers = Handlers::new().on_message(|msg| async move {
//!     println!("#{} <{}> {}", msg.channel, msg.author(), msg.message);
//!     Ok(())
//! });
//! let session = Session::connect_as_guest(handlers).await?;
//! let _channel = session.join("#somechannel")?;
//! session.closed().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`session`]: connection, handshake, receive loop, ping
//! - [`channel`]: handle to a joined channel
//! - [`handler`]: event handlers and their dispatcher
//! - [`event`]: typed events built from protocol lines
//! - [`tags`]: IRCv3 tag decoding
//! - [`irc`]: line tokenizer and outbound commands
//! - [`transport`]: WebSocket and TCP/TLS line transports
//! - [`config`]: connection settings and credentials

pub mod channel;
pub mod config;
pub mod error;
pub mod event;
pub mod handler;
pub mod irc;
pub mod session;
pub mod tags;
pub mod transport;

pub use channel::Channel;
pub use config::{ConnectConfig, Credentials};
pub use error::{Error, Result};
pub use event::{Event, Message, Notice, RoomState, Timeout};
pub use handler::Handlers;
pub use session::Session;
pub use transport::Transport;
