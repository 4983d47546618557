//! Event handlers and the dispatcher that runs them.
//!
//! The receive loop pushes decoded events into a bounded queue. A single
//! dispatcher task drains it and runs each handler invocation as its own
//! task, with at most `max_concurrent_handlers` in flight. A failing or
//! panicking handler is logged and does not affect other invocations.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;

use crate::event::{Event, Message, Notice, RoomState, Timeout};

type HandlerFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

type Handler<T> = Arc<dyn Fn(T) -> HandlerFuture + Send + Sync>;

/// Callbacks for each kind of event. Unset handlers drop their events.
///
/// ```rust,no_run
/// use twitch_chat_sdk::Handlers;
///
/// let handlers = Handlers::new()
///     .on_message(|msg| async move {
///         println!("[#{}] {}: {}", msg.channel, msg.author(), msg.message);
///         Ok(())
///     })
///     .on_timeout(|t| async move {
///         println!("{} timed out in #{}", t.username, t.channel);
///         Ok(())
///     });
/// ```
#[derive(Clone, Default)]
pub struct Handlers {
    message: Option<Handler<Message>>,
    notice: Option<Handler<Notice>>,
    room_state: Option<Handler<RoomState>>,
    timeout: Option<Handler<Timeout>>,
}

fn boxed<T, F, Fut>(handler: F) -> Handler<T>
where
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |event: T| -> HandlerFuture { Box::pin(handler(event)) })
}

impl Handlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called for every chat message.
    pub fn on_message<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.message = Some(boxed(handler));
        self
    }

    /// Called for every notice, including server-wide ones.
    pub fn on_notice<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Notice) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.notice = Some(boxed(handler));
        self
    }

    /// Called when a channel's settings change.
    pub fn on_room_state<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(RoomState) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.room_state = Some(boxed(handler));
        self
    }

    /// Called when a user is timed out or banned.
    pub fn on_timeout<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Timeout) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.timeout = Some(boxed(handler));
        self
    }

    /// Whether a handler is registered for this kind of event.
    pub(crate) fn accepts(&self, event: &Event) -> bool {
        match event {
            Event::Message(_) => self.message.is_some(),
            Event::Notice(_) => self.notice.is_some(),
            Event::RoomState(_) => self.room_state.is_some(),
            Event::Timeout(_) => self.timeout.is_some(),
        }
    }

    /// The invocation for `event`, deferred until polled so a handler that
    /// panics on entry is caught like any other.
    fn invocation(&self, event: Event) -> Option<(&'static str, HandlerFuture)> {
        fn defer<T: Send + 'static>(handler: &Option<Handler<T>>, value: T) -> Option<HandlerFuture> {
            let handler = handler.clone()?;
            let invocation: HandlerFuture = Box::pin(async move { handler(value).await });
            Some(invocation)
        }
        match event {
            Event::Message(m) => defer(&self.message, m).map(|f| ("message", f)),
            Event::Notice(n) => defer(&self.notice, n).map(|f| ("notice", f)),
            Event::RoomState(r) => defer(&self.room_state, r).map(|f| ("room_state", f)),
            Event::Timeout(t) => defer(&self.timeout, t).map(|f| ("timeout", f)),
        }
    }
}

/// Drain `events`, running handlers with bounded concurrency.
/// Returns when the sending side (the receive loop) is gone.
pub(crate) fn spawn_dispatcher(
    handlers: Handlers,
    mut events: mpsc::Receiver<Event>,
    max_concurrent: usize,
) -> JoinHandle<()> {
    let permits = Arc::new(Semaphore::new(max_concurrent.max(1)));
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let Some((kind, invocation)) = handlers.invocation(event) else {
                continue;
            };
            let Ok(permit) = permits.clone().acquire_owned().await else {
                break;
            };
            tokio::spawn(async move {
                let _permit = permit;
                match AssertUnwindSafe(invocation).catch_unwind().await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => tracing::warn!(handler = kind, "Handler failed: {e:#}"),
                    Err(_) => tracing::error!(handler = kind, "Handler panicked"),
                }
            });
        }
        tracing::debug!("Dispatcher stopped");
    })
}
