//! Typed chat events decoded from inbound lines.
//!
//! Every builder is best-effort: missing or malformed tags fall back to a
//! default so a protocol change on the server side never stops the
//! receive loop.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::irc::Line;
use crate::tags::{self, Badge, Tags};

/// Events delivered to the handlers registered on a session.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Message(Message),
    Notice(Notice),
    RoomState(RoomState),
    Timeout(Timeout),
}

impl Event {
    /// Build the event carried by `line`, if it is one of the four kinds
    /// the SDK understands and has all the fields it needs.
    pub fn decode(line: &Line<'_>) -> Option<Event> {
        match (line.command, line.params.as_slice()) {
            ("PRIVMSG", [channel, text, ..]) if is_channel(channel) => {
                let login = line.nick()?;
                Some(Event::Message(Message::build(line.tags, channel, login, text)))
            }
            ("NOTICE", [target, text, ..]) => {
                let channel = if is_channel(target) { *target } else { "" };
                Some(Event::Notice(Notice::build(line.tags, channel, text)))
            }
            ("ROOMSTATE", [channel, ..]) if is_channel(channel) => {
                Some(Event::RoomState(RoomState::build(line.tags, channel)))
            }
            ("CLEARCHAT", [channel, username, ..]) if is_channel(channel) => {
                Some(Event::Timeout(Timeout::build(line.tags, channel, username)))
            }
            _ => None,
        }
    }

    /// Channel the event belongs to.
    pub fn channel(&self) -> &str {
        match self {
            Event::Message(m) => &m.channel,
            Event::Notice(n) => &n.channel,
            Event::RoomState(r) => &r.channel,
            Event::Timeout(t) => &t.channel,
        }
    }
}

/// A chat message posted in a channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub channel: String,
    pub message: String,
    /// Login name of the sender, taken from the line prefix.
    pub login: String,
    pub display_name: Option<String>,
    /// Hex color like `#FF0000`, if the user picked one.
    pub color: Option<String>,
    pub user_id: Option<String>,
    pub user_type: Option<String>,
    pub msg_id: Option<String>,
    /// Unique id of this message (`id` tag).
    pub id: Option<String>,
    pub badges: Vec<Badge>,
    pub badge_info: Vec<Badge>,
    pub moderator: bool,
    pub subscriber: bool,
    pub turbo: bool,
    /// Milliseconds since the Unix epoch (`tmi-sent-ts`).
    pub timestamp: Option<i64>,
}

impl Message {
    pub fn build(header: &str, channel: &str, login: &str, text: &str) -> Self {
        let info = tags::decode(header);
        Self {
            channel: normalize_channel(channel),
            message: text.to_string(),
            login: login.to_ascii_lowercase(),
            display_name: info.text("display-name"),
            color: info.text("color"),
            user_id: info.text("user-id"),
            user_type: info.text("user-type"),
            msg_id: info.text("msg-id"),
            id: info.text("id"),
            badges: info.badges("badges"),
            badge_info: info.badges("badge-info"),
            moderator: info.flag("mod"),
            subscriber: info.flag("subscriber"),
            turbo: info.flag("turbo"),
            timestamp: info.int("tmi-sent-ts"),
        }
    }

    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        self.timestamp.and_then(DateTime::from_timestamp_millis)
    }

    /// Display name if set, login otherwise.
    pub fn author(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.login)
    }

    pub fn has_badge(&self, name: &str) -> bool {
        self.badges.iter().any(|b| b.name == name)
    }
}

/// A human-readable notice such as "This room is now in slow mode".
///
/// For machine-readable room settings use [`RoomState`] instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    /// Empty for server-wide notices (e.g. login failures).
    pub channel: String,
    pub message: String,
    pub msg_id: Option<String>,
}

impl Notice {
    pub fn build(header: &str, channel: &str, text: &str) -> Self {
        let info = tags::decode(header);
        Self {
            channel: normalize_channel(channel),
            message: text.to_string(),
            msg_id: info.text("msg-id"),
        }
    }
}

/// Room settings. Sent only when they change, never polled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomState {
    pub channel: String,
    pub msg_id: Option<String>,
    pub emote_only: bool,
    /// `-1` when disabled, otherwise the minimum follow age in minutes.
    pub followers_only: i64,
    pub r9k: bool,
    /// Seconds between messages, `0` when slow mode is off.
    pub slow: u32,
    pub subscribers_only: bool,
}

impl RoomState {
    pub fn build(header: &str, channel: &str) -> Self {
        let info = tags::decode(header);
        Self {
            channel: normalize_channel(channel),
            msg_id: info.text("msg-id"),
            emote_only: info.flag("emote-only"),
            followers_only: info.int("followers-only").unwrap_or(-1),
            r9k: info.flag("r9k"),
            slow: info.int("slow").unwrap_or(0),
            subscribers_only: info.flag("subs-only"),
        }
    }
}

/// A user was timed out or banned (`CLEARCHAT` with a target user).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeout {
    pub channel: String,
    pub username: String,
    pub target_user_id: Option<String>,
    /// Seconds; `None` means a permanent ban.
    pub ban_duration: Option<u64>,
    pub timestamp: Option<i64>,
}

impl Timeout {
    pub fn build(header: &str, channel: &str, username: &str) -> Self {
        let info = tags::decode(header);
        Self {
            channel: normalize_channel(channel),
            username: username.to_ascii_lowercase(),
            target_user_id: info.text("target-user-id"),
            ban_duration: info.int("ban-duration"),
            timestamp: info.int("tmi-sent-ts"),
        }
    }

    pub fn is_permanent(&self) -> bool {
        self.ban_duration.is_none()
    }

    pub fn duration(&self) -> Option<Duration> {
        self.ban_duration.map(Duration::from_secs)
    }
}

fn is_channel(param: &str) -> bool {
    param.len() > 1 && param.starts_with('#')
}

/// `#Foo` → `foo`.
pub(crate) fn normalize_channel(channel: &str) -> String {
    channel.trim_start_matches('#').to_ascii_lowercase()
}
