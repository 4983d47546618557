//! Session tests against an in-process fake chat server.
//!
//! Most tests talk to the session over an in-memory duplex stream; one runs
//! the full WebSocket path against a local listener.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;
use twitch_chat_sdk::{ConnectConfig, Credentials, Error, Event, Handlers, Session, Transport};

const WAIT: Duration = Duration::from_secs(2);

const WELCOME: &str = ":tmi.twitch.tv 001 foo :Welcome, GLHF!";

const PRIVMSG: &str = "@badge-info=;badges=moderator/1;color=#FF0000;display-name=Foo;mod=1;\
subscriber=0;tmi-sent-ts=1700000000000;user-id=42 :foo!foo@foo.tmi.twitch.tv PRIVMSG #bar :hello world";

/// Server end of a duplex connection.
struct FakeServer {
    lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
    writer: WriteHalf<DuplexStream>,
}

impl FakeServer {
    fn new(io: DuplexStream) -> Self {
        let (read, writer) = tokio::io::split(io);
        Self {
            lines: BufReader::new(read).lines(),
            writer,
        }
    }

    async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{line}\r\n").as_bytes())
            .await
            .unwrap();
    }

    async fn send_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.unwrap();
    }

    /// Next line written by the client.
    async fn expect_line(&mut self) -> String {
        match timeout(WAIT, self.lines.next_line()).await {
            Ok(Ok(Some(line))) => line,
            Ok(Ok(None)) => panic!("Client closed the connection"),
            Ok(Err(e)) => panic!("Read error: {e}"),
            Err(_) => panic!("Timeout waiting for a line from the client"),
        }
    }

    /// Next line must be a `PING`; returns its token.
    async fn expect_ping(&mut self) -> String {
        let line = self.expect_line().await;
        match line.strip_prefix("PING :") {
            Some(token) if !token.is_empty() => token.to_string(),
            _ => panic!("Expected a PING with a token, got {line:?}"),
        }
    }

    async fn expect_closed(&mut self) {
        match timeout(WAIT, self.lines.next_line()).await {
            Ok(Ok(None)) => {}
            Ok(Ok(Some(line))) => panic!("Expected close, got {line:?}"),
            Ok(Err(e)) => panic!("Read error: {e}"),
            Err(_) => panic!("Timeout waiting for the client to close"),
        }
    }

    async fn expect_handshake(&mut self, pass: &str, nick: &str) {
        assert_eq!(
            self.expect_line().await,
            "CAP REQ :twitch.tv/tags twitch.tv/commands"
        );
        assert_eq!(self.expect_line().await, format!("PASS {pass}"));
        assert_eq!(self.expect_line().await, format!("NICK {nick}"));
        assert_eq!(self.expect_line().await, format!("USER {nick} 8 * :{nick}"));
    }
}

/// Helper: handlers that forward every event to a channel.
fn recording_handlers() -> (Handlers, mpsc::UnboundedReceiver<Event>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let (m, n, r, t) = (tx.clone(), tx.clone(), tx.clone(), tx);
    let handlers = Handlers::new()
        .on_message(move |msg| {
            let _ = m.send(Event::Message(msg));
            async { Ok(()) }
        })
        .on_notice(move |notice| {
            let _ = n.send(Event::Notice(notice));
            async { Ok(()) }
        })
        .on_room_state(move |state| {
            let _ = r.send(Event::RoomState(state));
            async { Ok(()) }
        })
        .on_timeout(move |to| {
            let _ = t.send(Event::Timeout(to));
            async { Ok(()) }
        });
    (handlers, rx)
}

/// Helper: wait for the next event delivered to a handler.
async fn expect_event(events: &mut mpsc::UnboundedReceiver<Event>, description: &str) -> Event {
    match timeout(WAIT, events.recv()).await {
        Ok(Some(event)) => event,
        Ok(None) => panic!("Channel closed while waiting for: {description}"),
        Err(_) => panic!("Timeout waiting for: {description}"),
    }
}

/// Helper: connect over a duplex stream and complete the handshake.
async fn connect(credentials: Credentials, handlers: Handlers) -> (Session, FakeServer) {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let mut server = FakeServer::new(server);
    let (pass, nick) = if credentials.is_guest() {
        ("SCHMOOPIIE".to_string(), "justinfan12345".to_string())
    } else {
        ("oauth:abc123".to_string(), credentials.username().to_string())
    };

    let connecting = tokio::spawn(Session::connect_with_transport(
        Transport::from_stream(client),
        credentials,
        handlers,
        ConnectConfig::default(),
    ));
    server.expect_handshake(&pass, &nick).await;
    server.send(WELCOME).await;

    let session = timeout(WAIT, connecting)
        .await
        .expect("connect timed out")
        .unwrap()
        .unwrap();
    (session, server)
}

async fn connect_user(handlers: Handlers) -> (Session, FakeServer) {
    connect(Credentials::oauth("Foo", "abc123"), handlers).await
}

// ── Handshake ───────────────────────────────────────────────────────

#[tokio::test]
async fn connect_waits_for_first_server_line() {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let mut server = FakeServer::new(server);
    let connecting = tokio::spawn(Session::connect_with_transport(
        Transport::from_stream(client),
        Credentials::oauth("Foo", "oauth:abc123"),
        Handlers::new(),
        ConnectConfig::default(),
    ));

    server.expect_handshake("oauth:abc123", "foo").await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!connecting.is_finished(), "connect returned before the server spoke");

    server.send(WELCOME).await;
    let session = timeout(WAIT, connecting).await.unwrap().unwrap().unwrap();
    assert_eq!(session.username(), "foo");
    assert!(!session.is_guest());
    assert!(!session.is_closed());
}

#[tokio::test]
async fn guest_handshake() {
    let (session, _server) = connect(Credentials::guest(), Handlers::new()).await;
    assert!(session.is_guest());
    assert_eq!(session.username(), "justinfan12345");
}

#[tokio::test]
async fn connect_fails_when_server_hangs_up() {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let mut server = FakeServer::new(server);
    let connecting = tokio::spawn(Session::connect_with_transport(
        Transport::from_stream(client),
        Credentials::guest(),
        Handlers::new(),
        ConnectConfig::default(),
    ));

    server.expect_handshake("SCHMOOPIIE", "justinfan12345").await;
    drop(server);

    let result = timeout(WAIT, connecting).await.unwrap().unwrap();
    assert!(matches!(result, Err(Error::HandshakeFailed)), "{result:?}");
}

#[tokio::test]
async fn connect_times_out_on_silent_server() {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let _server = FakeServer::new(server);
    let config = ConnectConfig {
        handshake_timeout: Some(Duration::from_millis(50)),
        ..Default::default()
    };

    let result = Session::connect_with_transport(
        Transport::from_stream(client),
        Credentials::guest(),
        Handlers::new(),
        config,
    )
    .await;
    assert!(matches!(result, Err(Error::HandshakeTimeout)), "{result:?}");
}

// ── Keepalive ───────────────────────────────────────────────────────

#[tokio::test]
async fn server_ping_is_answered() {
    let (_session, mut server) = connect_user(Handlers::new()).await;
    server.send("PING :tmi.twitch.tv").await;
    assert_eq!(server.expect_line().await, "PONG :tmi.twitch.tv");
}

#[tokio::test]
async fn ping_resolves_on_pong() {
    let (session, mut server) = connect_user(Handlers::new()).await;

    let (alive, ()) = tokio::join!(session.ping(Some(WAIT)), async {
        let token = server.expect_ping().await;
        server.send(&format!(":tmi.twitch.tv PONG tmi.twitch.tv :{token}")).await;
    });
    assert!(alive.unwrap());
}

#[tokio::test]
async fn ping_times_out_without_pong() {
    let (session, mut server) = connect_user(Handlers::new()).await;
    let alive = session.ping(Some(Duration::from_millis(50))).await.unwrap();
    assert!(!alive);
    server.expect_ping().await;
}

#[tokio::test]
async fn late_pong_does_not_answer_next_ping() {
    let (session, mut server) = connect_user(Handlers::new()).await;

    assert!(!session.ping(Some(Duration::from_millis(50))).await.unwrap());
    let stale = server.expect_ping().await;

    let (alive, ()) = tokio::join!(session.ping(Some(Duration::from_millis(200))), async {
        let current = server.expect_ping().await;
        assert_ne!(current, stale);
        server.send(&format!(":tmi.twitch.tv PONG tmi.twitch.tv :{stale}")).await;
    });
    assert!(!alive.unwrap(), "stale PONG answered a newer ping");

    let (alive, ()) = tokio::join!(session.ping(Some(WAIT)), async {
        let token = server.expect_ping().await;
        server.send(&format!(":tmi.twitch.tv PONG tmi.twitch.tv :{token}")).await;
    });
    assert!(alive.unwrap());
}

#[tokio::test]
async fn overlapping_pings_share_one_pong() {
    let (session, mut server) = connect_user(Handlers::new()).await;

    let (first, second, ()) = tokio::join!(
        session.ping(Some(WAIT)),
        session.ping(Some(WAIT)),
        async {
            server.expect_ping().await;
            server.expect_ping().await;
            // No token: answers every ping sent so far.
            server.send("PONG").await;
        }
    );
    assert!(first.unwrap());
    assert!(second.unwrap());
}

#[tokio::test]
async fn pending_ping_fails_when_connection_ends() {
    let (session, mut server) = connect_user(Handlers::new()).await;

    let (result, ()) = tokio::join!(session.ping(None), async {
        server.expect_ping().await;
        drop(server);
    });
    assert!(matches!(result, Err(Error::Closed)), "{result:?}");
}

// ── Events ──────────────────────────────────────────────────────────

#[tokio::test]
async fn events_reach_handlers() {
    let (handlers, mut events) = recording_handlers();
    let (_session, mut server) = connect_user(handlers).await;

    server.send(PRIVMSG).await;
    let Event::Message(msg) = expect_event(&mut events, "message").await else {
        panic!("expected a message");
    };
    assert_eq!(msg.channel, "bar");
    assert_eq!(msg.login, "foo");
    assert_eq!(msg.message, "hello world");
    assert_eq!(msg.display_name.as_deref(), Some("Foo"));
    assert_eq!(msg.user_id.as_deref(), Some("42"));
    assert!(msg.moderator);
    assert!(!msg.subscriber);
    assert_eq!(msg.timestamp, Some(1_700_000_000_000));

    server
        .send("@msg-id=slow_on :tmi.twitch.tv NOTICE #bar :This room is now in slow mode.")
        .await;
    let Event::Notice(notice) = expect_event(&mut events, "notice").await else {
        panic!("expected a notice");
    };
    assert_eq!(notice.channel, "bar");
    assert_eq!(notice.msg_id.as_deref(), Some("slow_on"));

    server
        .send("@emote-only=0;followers-only=10;r9k=0;slow=30;subs-only=1 :tmi.twitch.tv ROOMSTATE #bar")
        .await;
    let Event::RoomState(state) = expect_event(&mut events, "roomstate").await else {
        panic!("expected a room state");
    };
    assert_eq!(state.followers_only, 10);
    assert_eq!(state.slow, 30);
    assert!(state.subscribers_only);

    server
        .send("@ban-duration=600;target-user-id=7;tmi-sent-ts=1700000000000 :tmi.twitch.tv CLEARCHAT #bar :spammer")
        .await;
    let Event::Timeout(to) = expect_event(&mut events, "timeout").await else {
        panic!("expected a timeout");
    };
    assert_eq!(to.username, "spammer");
    assert_eq!(to.duration(), Some(Duration::from_secs(600)));
}

#[tokio::test]
async fn malformed_lines_are_skipped() {
    let (handlers, mut events) = recording_handlers();
    let (_session, mut server) = connect_user(handlers).await;

    server.send(":foo!foo@foo.tmi.twitch.tv PRIVMSG #bar").await;
    server.send(":tmi.twitch.tv CLEARCHAT").await;
    server.send(":tmi.twitch.tv NOTICE").await;
    server.send(":tmi.twitch.tv ROOMSTATE").await;
    server.send(":tmi.twitch.tv USERSTATE #bar").await;
    server.send(PRIVMSG).await;

    let event = expect_event(&mut events, "the valid message").await;
    assert!(matches!(event, Event::Message(ref m) if m.message == "hello world"), "{event:?}");
}

#[tokio::test]
async fn undecodable_bytes_do_not_end_the_session() {
    let (handlers, mut events) = recording_handlers();
    let (session, mut server) = connect_user(handlers).await;

    server.send_raw(b":foo!foo@foo PRIVMSG #bar :\xff\xfe\xfd\r\n").await;
    let oversized = format!(":foo!foo@foo PRIVMSG #bar :{}\r\n", "a".repeat(20 * 1024));
    server.send_raw(oversized.as_bytes()).await;
    server.send(":foo!foo@foo PRIVMSG #bar :after").await;

    // Handlers run concurrently, so arrival order is not fixed.
    let mut texts = Vec::new();
    for _ in 0..2 {
        match expect_event(&mut events, "message after bad lines").await {
            Event::Message(msg) => texts.push(msg.message),
            other => panic!("unexpected event {other:?}"),
        }
    }
    texts.sort();
    // The invalid UTF-8 line is repaired; the oversized one is dropped.
    assert_eq!(texts[0], "after");
    assert!(texts[1].contains('\u{FFFD}'), "{texts:?}");
    assert!(timeout(Duration::from_millis(50), events.recv()).await.is_err());
    assert!(!session.is_closed());
}

#[tokio::test]
async fn failing_handler_does_not_stop_the_session() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handlers = Handlers::new().on_message(move |msg| {
        let tx = tx.clone();
        async move {
            if msg.message == "boom" {
                anyhow::bail!("handler failed on purpose");
            }
            tx.send(msg.message).unwrap();
            Ok(())
        }
    });
    let (_session, mut server) = connect_user(handlers).await;

    server.send(":foo!foo@foo.tmi.twitch.tv PRIVMSG #bar :boom").await;
    server.send(":foo!foo@foo.tmi.twitch.tv PRIVMSG #bar :still here").await;

    let text = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(text, "still here");
}

// ── Channels ────────────────────────────────────────────────────────

#[tokio::test]
async fn join_send_leave() {
    let (session, mut server) = connect_user(Handlers::new()).await;

    let channel = session.join("#Bar").unwrap();
    assert_eq!(channel.name(), "bar");
    assert_eq!(server.expect_line().await, "JOIN #bar");

    channel.send("hello\r\nworld").unwrap();
    assert_eq!(server.expect_line().await, "PRIVMSG #bar :hello  world");

    channel.leave().unwrap();
    assert_eq!(server.expect_line().await, "PART #bar");
    assert!(channel.is_left());
}

#[tokio::test]
async fn left_channel_rejects_use() {
    let (session, mut server) = connect_user(Handlers::new()).await;
    let channel = session.join("bar").unwrap();
    assert_eq!(server.expect_line().await, "JOIN #bar");

    let clone = channel.clone();
    channel.leave().unwrap();
    assert_eq!(server.expect_line().await, "PART #bar");

    assert!(matches!(clone.send("hi"), Err(Error::ChannelLeft(ref c)) if c == "bar"));
    assert!(matches!(channel.leave(), Err(Error::ChannelLeft(_))));

    // Nothing was written for the rejected calls.
    let _ = session.ping(Some(Duration::from_millis(10))).await;
    server.expect_ping().await;
}

#[tokio::test]
async fn guest_messages_stay_local() {
    let (session, mut server) = connect(Credentials::guest(), Handlers::new()).await;
    let channel = session.join("bar").unwrap();
    assert_eq!(server.expect_line().await, "JOIN #bar");

    channel.send("hello").unwrap();

    let _ = session.ping(Some(Duration::from_millis(10))).await;
    server.expect_ping().await;
}

#[tokio::test]
async fn invalid_channel_names_are_rejected() {
    let (session, _server) = connect_user(Handlers::new()).await;
    for name in ["", "#", "two words", "a,b"] {
        assert!(
            matches!(session.join(name), Err(Error::InvalidChannel(_))),
            "{name:?} accepted"
        );
    }
}

// ── Shutdown ────────────────────────────────────────────────────────

#[tokio::test]
async fn disconnect_closes_everything() {
    let (session, mut server) = connect_user(Handlers::new()).await;
    let channel = session.join("bar").unwrap();
    assert_eq!(server.expect_line().await, "JOIN #bar");

    session.disconnect().unwrap();
    timeout(WAIT, session.closed()).await.unwrap();
    assert!(session.is_closed());
    server.expect_closed().await;

    assert!(matches!(session.disconnect(), Err(Error::Disconnected)));
    assert!(matches!(session.join("baz"), Err(Error::Disconnected)));
    assert!(matches!(session.ping(None).await, Err(Error::Disconnected)));
    assert!(matches!(channel.send("hi"), Err(Error::Disconnected)));
}

#[tokio::test]
async fn queued_lines_are_flushed_before_closed() {
    let (session, mut server) = connect_user(Handlers::new()).await;
    let channel = session.join("bar").unwrap();

    channel.leave().unwrap();
    session.disconnect().unwrap();
    timeout(WAIT, session.closed()).await.unwrap();

    assert_eq!(server.expect_line().await, "JOIN #bar");
    assert_eq!(server.expect_line().await, "PART #bar");
    server.expect_closed().await;
}

#[tokio::test]
async fn server_close_is_observed() {
    let (session, server) = connect_user(Handlers::new()).await;
    drop(server);

    timeout(WAIT, session.closed()).await.unwrap();
    assert!(session.is_closed());
    assert!(matches!(session.join("bar"), Err(Error::Closed)));
}

#[tokio::test]
async fn dropping_the_session_closes_the_connection() {
    let (session, mut server) = connect_user(Handlers::new()).await;
    drop(session);
    server.expect_closed().await;
}

// ── WebSocket ───────────────────────────────────────────────────────

async fn next_text(ws: &mut WebSocketStream<TcpStream>) -> String {
    loop {
        match timeout(WAIT, ws.next()).await.unwrap() {
            Some(Ok(WsMessage::Text(text))) => return text.as_str().to_string(),
            Some(Ok(_)) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

#[tokio::test]
async fn websocket_end_to_end() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();

        assert_eq!(next_text(&mut ws).await, "CAP REQ :twitch.tv/tags twitch.tv/commands");
        assert_eq!(next_text(&mut ws).await, "PASS oauth:abc123");
        assert_eq!(next_text(&mut ws).await, "NICK foo");
        assert_eq!(next_text(&mut ws).await, "USER foo 8 * :foo");

        // Several lines in one frame.
        ws.send(WsMessage::text(format!("{WELCOME}\r\nPING :tmi.twitch.tv\r\n")))
            .await
            .unwrap();
        let pong = next_text(&mut ws).await;
        assert_eq!(pong, "PONG :tmi.twitch.tv");

        ws.send(WsMessage::text(PRIVMSG)).await.unwrap();
        ws.close(None).await.unwrap();
    });

    let (handlers, mut events) = recording_handlers();
    let config = ConnectConfig {
        url: format!("ws://{addr}"),
        ..Default::default()
    };
    let session = timeout(
        WAIT,
        Session::connect_with_config(Credentials::oauth("foo", "abc123"), handlers, config),
    )
    .await
    .unwrap()
    .unwrap();

    let Event::Message(msg) = expect_event(&mut events, "message over websocket").await else {
        panic!("expected a message");
    };
    assert_eq!(msg.message, "hello world");

    timeout(WAIT, session.closed()).await.unwrap();
    server.await.unwrap();
}
