//! IRCv3 message tag decoding.
//!
//! Twitch attaches metadata to most lines as a leading tag block:
//! `@badges=moderator/1;color=#1E90FF;display-name=Foo :foo!foo@foo.tmi.twitch.tv PRIVMSG ...`
//!
//! Decoding never fails. Missing or malformed values are left to the
//! accessors on [`Tags`], which fall back to a default.

use std::collections::HashMap;
use std::str::FromStr;

/// Decode a raw tag block (including the leading `@`) into a map.
///
/// Returns an empty map if `header` is not a tag block. Segments without
/// `=` are skipped and a repeated key keeps its last value.
pub fn decode(header: &str) -> HashMap<String, String> {
    let mut tags = HashMap::new();
    let Some(body) = header.strip_prefix('@') else {
        return tags;
    };
    for segment in body.split(';') {
        if let Some((key, value)) = segment.split_once('=') {
            tags.insert(key.to_string(), unescape_tag_value(value));
        }
    }
    tags
}

/// A `name/version` pair from the `badges` or `badge-info` tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Badge {
    pub name: String,
    pub version: String,
}

/// Typed lookups over a decoded tag map.
pub trait Tags {
    /// Tag value, with an empty value treated as absent.
    fn text(&self, key: &str) -> Option<String>;

    /// Numeric tag value. `None` if missing or not a number.
    fn int<T: FromStr>(&self, key: &str) -> Option<T>;

    /// `1`-style boolean tag. Anything that is not a non-zero number is false.
    fn flag(&self, key: &str) -> bool {
        self.int::<i64>(key).is_some_and(|v| v != 0)
    }

    /// Comma-separated badge list, e.g. `broadcaster/1,subscriber/12`.
    fn badges(&self, key: &str) -> Vec<Badge>;
}

impl Tags for HashMap<String, String> {
    fn text(&self, key: &str) -> Option<String> {
        self.get(key).filter(|v| !v.is_empty()).cloned()
    }

    fn int<T: FromStr>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|v| v.parse().ok())
    }

    fn badges(&self, key: &str) -> Vec<Badge> {
        let Some(raw) = self.get(key) else {
            return Vec::new();
        };
        raw.split(',')
            .filter(|b| !b.is_empty())
            .map(|b| {
                let (name, version) = b.split_once('/').unwrap_or((b, ""));
                Badge {
                    name: name.to_string(),
                    version: version.to_string(),
                }
            })
            .collect()
    }
}

/// Unescape IRCv3 tag values.
/// `\:` → `;`, `\s` → space, `\\` → `\`, `\r` → CR, `\n` → LF
fn unescape_tag_value(s: &str) -> String {
    if !s.contains('\\') {
        return s.to_string();
    }
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(':') => result.push(';'),
                Some('s') => result.push(' '),
                Some('\\') => result.push('\\'),
                Some('r') => result.push('\r'),
                Some('n') => result.push('\n'),
                Some(other) => result.push(other),
                None => {}
            }
        } else {
            result.push(c);
        }
    }
    result
}
