//! Handle to a joined channel.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::irc::Command;
use crate::session::Outbound;

/// A channel joined with [`crate::Session::join`].
///
/// Clones share state: once any clone calls [`Channel::leave`], every clone
/// rejects further use with [`Error::ChannelLeft`].
#[derive(Clone)]
pub struct Channel {
    name: String,
    outbound: Outbound,
    guest: bool,
    left: Arc<AtomicBool>,
}

impl Channel {
    pub(crate) fn new(name: String, outbound: Outbound, guest: bool) -> Self {
        Self {
            name,
            outbound,
            guest,
            left: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Lowercase channel name without the `#`.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_left(&self) -> bool {
        self.left.load(Ordering::Acquire)
    }

    /// Post `text` in the channel.
    ///
    /// Line breaks are replaced by spaces. On a guest session the message is
    /// dropped without being sent, since the server would reject it anyway.
    pub fn send(&self, text: &str) -> Result<()> {
        if self.is_left() {
            return Err(Error::ChannelLeft(self.name.clone()));
        }
        if self.guest {
            self.outbound.check()?;
            tracing::debug!(channel = %self.name, "Guest session, message not sent");
            return Ok(());
        }
        self.outbound.send(Command::Privmsg {
            channel: self.name.clone(),
            text: text.replace(['\r', '\n'], " "),
        })
    }

    /// Leave the channel. The handle is unusable afterwards.
    pub fn leave(&self) -> Result<()> {
        if self.left.swap(true, Ordering::AcqRel) {
            return Err(Error::ChannelLeft(self.name.clone()));
        }
        tracing::debug!(channel = %self.name, "Leaving");
        self.outbound.send(Command::Part(self.name.clone()))
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.name)
            .field("guest", &self.guest)
            .field("left", &self.is_left())
            .finish()
    }
}
