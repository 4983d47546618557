//! Connection settings and login credentials.

use std::fmt;
use std::time::Duration;

/// Twitch's public WebSocket chat endpoint.
pub const DEFAULT_URL: &str = "wss://irc-ws.chat.twitch.tv:443";

/// Anonymous login Twitch accepts for read-only connections.
pub const GUEST_USERNAME: &str = "justinfan12345";
pub const GUEST_PASSWORD: &str = "SCHMOOPIIE";

/// Configuration for connecting to the chat server.
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    /// Server URL: `wss://`/`ws://` for WebSocket, `ircs://`/`irc://` for a
    /// raw TLS or plain TCP line stream.
    pub url: String,
    /// Capabilities requested with `CAP REQ` during the handshake.
    pub capabilities: Vec<String>,
    /// Decoded events waiting for a handler. When full, the receive loop
    /// waits for the dispatcher.
    pub event_queue_capacity: usize,
    /// Upper bound on handler invocations running at once. `1` delivers
    /// events one at a time in arrival order.
    pub max_concurrent_handlers: usize,
    /// Give up on `connect` if the server sends nothing for this long.
    /// `None` waits until the server answers or closes the connection.
    pub handshake_timeout: Option<Duration>,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            capabilities: vec![
                "twitch.tv/tags".to_string(),
                "twitch.tv/commands".to_string(),
            ],
            event_queue_capacity: 256,
            max_concurrent_handlers: 16,
            handshake_timeout: None,
        }
    }
}

/// Login sent with `PASS`/`NICK` during the handshake.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: String,
    guest: bool,
}

impl Credentials {
    /// Log in as `username` with an OAuth token. The `oauth:` prefix is
    /// added unless the token already carries it.
    pub fn oauth(username: &str, token: &str) -> Self {
        let token = token.strip_prefix("oauth:").unwrap_or(token);
        Self {
            username: username.to_ascii_lowercase(),
            password: format!("oauth:{token}"),
            guest: false,
        }
    }

    /// Anonymous read-only login.
    pub fn guest() -> Self {
        Self {
            username: GUEST_USERNAME.to_string(),
            password: GUEST_PASSWORD.to_string(),
            guest: true,
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub(crate) fn password(&self) -> &str {
        &self.password
    }

    pub fn is_guest(&self) -> bool {
        self.guest
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .field("guest", &self.guest)
            .finish()
    }
}
