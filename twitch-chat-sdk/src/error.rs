//! Errors returned by the SDK.

use tokio_rustls::rustls::pki_types::InvalidDnsNameError;
use tokio_tungstenite::tungstenite;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid server name: {0}")]
    InvalidDnsName(#[from] InvalidDnsNameError),

    #[error("unsupported server url '{0}' (expected ws://, wss://, irc:// or ircs://)")]
    InvalidUrl(String),

    /// The transport closed before the server sent a single line.
    #[error("connection closed during handshake")]
    HandshakeFailed,

    #[error("server did not answer the handshake in time")]
    HandshakeTimeout,

    /// `Session::disconnect` was called; the session can no longer be used.
    #[error("session was disconnected")]
    Disconnected,

    /// The connection ended (remote close or write failure).
    #[error("connection closed")]
    Closed,

    #[error("channel #{0} was already left")]
    ChannelLeft(String),

    #[error("invalid channel name '{0}'")]
    InvalidChannel(String),
}
