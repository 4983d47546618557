//! IRC line tokenizer and outbound command formatting.
//!
//! Inbound lines have the shape `[@tags ][:prefix ]COMMAND [params...] [:trailing]`.
//! [`Line`] borrows from the raw line; tag decoding is left to [`crate::tags`].

use std::fmt;

/// One tokenized inbound line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line<'a> {
    /// Raw tag block including the leading `@`, or `""` if the line has none.
    pub tags: &'a str,
    pub prefix: Option<&'a str>,
    pub command: &'a str,
    pub params: Vec<&'a str>,
}

impl<'a> Line<'a> {
    /// Tokenize a raw line. Returns `None` for blank lines and lines that
    /// end before a command.
    pub fn parse(line: &'a str) -> Option<Self> {
        let mut rest = line.trim_end_matches(['\r', '\n']).trim_start_matches(' ');
        if rest.is_empty() {
            return None;
        }

        let mut tags = "";
        if rest.starts_with('@') {
            let (block, tail) = rest.split_once(' ')?;
            tags = block;
            rest = tail.trim_start_matches(' ');
        }

        let mut prefix = None;
        if let Some(stripped) = rest.strip_prefix(':') {
            let (pfx, tail) = stripped.split_once(' ')?;
            prefix = Some(pfx);
            rest = tail.trim_start_matches(' ');
        }

        let (command, mut rest) = match rest.split_once(' ') {
            Some((command, tail)) => (command, tail.trim_start_matches(' ')),
            None => (rest, ""),
        };
        if command.is_empty() {
            return None;
        }

        let mut params = Vec::new();
        while !rest.is_empty() {
            if let Some(trailing) = rest.strip_prefix(':') {
                params.push(trailing);
                break;
            }
            match rest.split_once(' ') {
                Some((param, tail)) => {
                    params.push(param);
                    rest = tail.trim_start_matches(' ');
                }
                None => {
                    params.push(rest);
                    break;
                }
            }
        }

        Some(Line {
            tags,
            prefix,
            command,
            params,
        })
    }

    /// Nick part of a `nick!user@host` prefix.
    pub fn nick(&self) -> Option<&'a str> {
        self.prefix
            .and_then(|p| p.split('!').next())
            .filter(|n| !n.is_empty())
    }
}

/// Commands the session writes to the server.
#[derive(Clone, PartialEq, Eq)]
pub enum Command {
    CapReq(Vec<String>),
    Pass(String),
    Nick(String),
    User(String),
    Join(String),
    Part(String),
    Privmsg { channel: String, text: String },
    Ping(String),
    Pong(String),
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::CapReq(caps) => write!(f, "CAP REQ :{}", caps.join(" ")),
            Command::Pass(pass) => write!(f, "PASS {pass}"),
            Command::Nick(nick) => write!(f, "NICK {nick}"),
            Command::User(user) => write!(f, "USER {user} 8 * :{user}"),
            Command::Join(channel) => write!(f, "JOIN #{channel}"),
            Command::Part(channel) => write!(f, "PART #{channel}"),
            Command::Privmsg { channel, text } => write!(f, "PRIVMSG #{channel} :{text}"),
            Command::Ping(token) => write!(f, "PING :{token}"),
            Command::Pong(token) if token.is_empty() => write!(f, "PONG"),
            Command::Pong(token) => write!(f, "PONG :{token}"),
        }
    }
}

// Keeps the password out of logs.
impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Pass(_) => write!(f, "PASS ***"),
            other => write!(f, "{other}"),
        }
    }
}
