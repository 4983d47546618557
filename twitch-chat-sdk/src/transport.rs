//! Line-oriented transports.
//!
//! Twitch serves chat over WebSocket (one or more lines per text frame) and
//! over plain IRC (TCP or TLS, one line per `\r\n`). Both are exposed to the
//! session as a stream of inbound lines plus a sink of outbound lines.

use std::io;
use std::pin::Pin;
use std::sync::Arc;

use bytes::{BufMut, BytesMut};
use futures::future;
use futures::stream::{self, SplitSink};
use futures::{Sink, SinkExt, Stream, StreamExt, TryStreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::rustls;
use tokio_rustls::TlsConnector;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{Connector, WebSocketStream};
use tokio_util::codec::{Decoder, Encoder, Framed};

use crate::error::{Error, Result};

/// Longest inbound line accepted on IRC transports. Twitch tag blocks can
/// be large but stay well below this.
const MAX_LINE_LENGTH: usize = 16 * 1024;

pub(crate) type LineStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;
pub(crate) type LineSink = Pin<Box<dyn Sink<String, Error = Error> + Send>>;

/// An open connection to a chat server, split into inbound and outbound lines.
pub struct Transport {
    pub(crate) lines: LineStream,
    pub(crate) sink: LineSink,
}

impl Transport {
    /// Open a connection to `url`.
    ///
    /// `ws://` and `wss://` connect over WebSocket; `irc://host[:port]` and
    /// `ircs://host[:port]` connect over plain TCP or TLS (default ports 6667
    /// and 6697).
    pub async fn open(url: &str) -> Result<Self> {
        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| Error::InvalidUrl(url.to_string()))?;

        match scheme {
            "ws" | "wss" => {
                tracing::debug!(%url, "Opening WebSocket");
                let connector = Connector::Rustls(Arc::new(rustls_config()));
                let (ws, _) = tokio_tungstenite::connect_async_tls_with_config(
                    url,
                    None,
                    false,
                    Some(connector),
                )
                .await?;
                Ok(Self::from_websocket(ws))
            }
            "irc" | "ircs" => {
                let tls = scheme == "ircs";
                let host_port = rest.trim_end_matches('/');
                if host_port.is_empty() {
                    return Err(Error::InvalidUrl(url.to_string()));
                }
                let addr = if host_port.contains(':') {
                    host_port.to_string()
                } else {
                    format!("{host_port}:{}", if tls { 6697 } else { 6667 })
                };

                tracing::debug!(%addr, tls, "Opening TCP connection");
                let tcp = TcpStream::connect(&addr).await?;
                if !tls {
                    return Ok(Self::from_stream(tcp));
                }

                let host = addr.rsplit_once(':').map_or(addr.as_str(), |(h, _)| h);
                let connector = TlsConnector::from(Arc::new(rustls_config()));
                let dns_name = rustls::pki_types::ServerName::try_from(host.to_string())?;
                let tls_stream = connector.connect(dns_name, tcp).await?;
                tracing::debug!(%addr, "TLS handshake complete");
                Ok(Self::from_stream(tls_stream))
            }
            _ => Err(Error::InvalidUrl(url.to_string())),
        }
    }

    /// Wrap an established WebSocket. Each text frame may carry several
    /// lines; non-text frames are skipped.
    pub fn from_websocket<S>(ws: WebSocketStream<S>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, frames) = ws.split();
        let lines = frames.flat_map(|frame| {
            let lines: Vec<Result<String>> = match frame {
                Ok(WsMessage::Text(text)) => split_lines(text.as_str())
                    .map(|line| Ok(line.to_string()))
                    .collect(),
                Ok(_) => Vec::new(),
                Err(e) => vec![Err(Error::from(e))],
            };
            stream::iter(lines)
        });
        let sink = sink.with(|line: String| future::ready(Ok::<_, Error>(WsMessage::text(line))));
        Self::from_parts(lines, sink)
    }

    /// Wrap any byte stream carrying `\n`- or `\r\n`-terminated lines.
    ///
    /// Over-long inbound lines are dropped and invalid UTF-8 is replaced, so
    /// only an I/O error ends the line stream.
    pub fn from_stream<S>(io: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let framed = Framed::new(io, LineCodec::new(MAX_LINE_LENGTH));
        let (sink, lines): (SplitSink<_, String>, _) = framed.split();
        Self::from_parts(lines.map_err(Error::from), sink.sink_map_err(Error::from))
    }

    /// Build a transport from a custom line stream and sink.
    pub fn from_parts<L, S>(lines: L, sink: S) -> Self
    where
        L: Stream<Item = Result<String>> + Send + 'static,
        S: Sink<String, Error = Error> + Send + 'static,
    {
        Self {
            lines: Box::pin(lines),
            sink: Box::pin(sink),
        }
    }
}

/// `\r\n` line framing that never fails on a single bad line.
#[derive(Debug)]
struct LineCodec {
    max_length: usize,
    /// Inside an over-long line; skip until the next `\n`.
    discarding: bool,
}

impl LineCodec {
    fn new(max_length: usize) -> Self {
        Self {
            max_length,
            discarding: false,
        }
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> io::Result<Option<String>> {
        loop {
            let Some(end) = buf.iter().position(|b| *b == b'\n') else {
                if self.discarding || buf.len() > self.max_length {
                    if !self.discarding {
                        tracing::debug!(max = self.max_length, "Dropping over-long line");
                    }
                    self.discarding = true;
                    buf.clear();
                }
                return Ok(None);
            };

            let raw = buf.split_to(end + 1);
            if std::mem::take(&mut self.discarding) {
                continue;
            }
            if end > self.max_length {
                tracing::debug!(len = end, max = self.max_length, "Dropping over-long line");
                continue;
            }
            if let Some(line) = decode_line(&raw) {
                return Ok(Some(line));
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> io::Result<Option<String>> {
        if let Some(line) = self.decode(buf)? {
            return Ok(Some(line));
        }
        // Unterminated tail.
        let raw = buf.split();
        if std::mem::take(&mut self.discarding) {
            return Ok(None);
        }
        Ok(decode_line(&raw))
    }
}

impl Encoder<String> for LineCodec {
    type Error = io::Error;

    fn encode(&mut self, line: String, buf: &mut BytesMut) -> io::Result<()> {
        buf.reserve(line.len() + 2);
        buf.put_slice(line.as_bytes());
        buf.put_slice(b"\r\n");
        Ok(())
    }
}

/// One line without its terminator. Empty lines are skipped.
fn decode_line(raw: &[u8]) -> Option<String> {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    if raw.is_empty() {
        return None;
    }
    match std::str::from_utf8(raw) {
        Ok(line) => Some(line.to_string()),
        Err(e) => {
            tracing::debug!("Replacing invalid UTF-8 in line: {e}");
            Some(String::from_utf8_lossy(raw).into_owned())
        }
    }
}

fn split_lines(text: &str) -> impl Iterator<Item = &str> {
    text.split(['\r', '\n']).filter(|line| !line.is_empty())
}

fn rustls_config() -> rustls::ClientConfig {
    // Both ring and aws-lc can be linked in; pick one explicitly.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let root_store =
        rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth()
}
