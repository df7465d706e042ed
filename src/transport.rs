//! The session capability: connect to one game server, say things, hear chat.
//!
//! The game protocol itself lives behind [`Transport`].  A transport reports
//! what happens on its connection by pushing [`TransportEvent`]s into the
//! channel it was opened with; the session manager consumes that channel in
//! order, one task per session.
//!
//! [`LineConnector`] is a small adapter that speaks JSON lines over TCP.  It
//! lets the bot run against a relay that bridges to real servers.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::codec::{Framed, LinesCodec};

use crate::address::Endpoint;
use crate::error::{Error, Result};

/// Chat visibility.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Visible to every player.
    All,
    /// Visible to the sender's team.
    Team,
    /// Whispers, server notices, and anything else.
    Other,
}

impl Scope {
    /// Maps the game's team field onto a scope: 0 is all-chat, 1 is team chat.
    pub fn from_team(team: i64) -> Self {
        match team {
            0 => Scope::All,
            1 => Scope::Team,
            _ => Scope::Other,
        }
    }
}

/// One chat line heard on a session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundChatEvent {
    /// Name of the player who sent it.
    pub sender: String,
    /// The line as the server rendered it, normally `name: message`.
    pub raw_text: String,
    /// Where it was said.
    pub scope: Scope,
}

impl InboundChatEvent {
    /// Creates a chat event.
    pub fn new(sender: impl Into<String>, raw_text: impl Into<String>, scope: Scope) -> Self {
        Self {
            sender: sender.into(),
            raw_text: raw_text.into(),
            scope,
        }
    }
}

/// Something that happened on a transport.
#[derive(Debug)]
pub enum TransportEvent {
    /// The server accepted us.
    Connected,
    /// Chat was heard.
    Message(InboundChatEvent),
    /// The connection was lost or refused after being attempted.
    Disconnected(String),
    /// A failure that did not by itself end the connection.
    Error(Error),
}

/// Sender half of a transport's event channel.
pub type EventSender = mpsc::UnboundedSender<TransportEvent>;

/// Name and clan presented to a server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    /// Player name.
    pub name: String,
    /// Clan tag.
    pub clan: String,
}

/// A connection to one game server.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Start connecting.  Success means the attempt is underway; the outcome
    /// arrives as [`TransportEvent::Connected`] or [`TransportEvent::Disconnected`].
    async fn connect(&self) -> Result<()>;

    /// Say `text` in all-chat.
    async fn send(&self, text: &str) -> Result<()>;

    /// Leave the server.  No [`TransportEvent::Disconnected`] is required afterwards.
    async fn disconnect(&self) -> Result<()>;
}

/// Creates transports.
pub trait Connector: Send + Sync {
    /// Creates an unconnected transport for `endpoint` that reports into `events`.
    fn open(&self, endpoint: &Endpoint, identity: &Identity, events: EventSender)
    -> Arc<dyn Transport>;
}

//////////////////////////////////////////// LineConnector ///////////////////////////////////////////

const MAX_LINE_LENGTH: usize = 8192;
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum WireIn<'a> {
    Hello { name: &'a str, clan: &'a str },
    Say { text: &'a str },
    Bye {},
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum WireOut {
    Ready {},
    Chat {
        sender: String,
        text: String,
        #[serde(default)]
        team: i64,
    },
    Error { text: String },
    Closed {
        #[serde(default)]
        reason: Option<String>,
    },
}

type LineSink = SplitSink<Framed<TcpStream, LinesCodec>, String>;
type LineStream = SplitStream<Framed<TcpStream, LinesCodec>>;

/// Opens [`LineTransport`]s.
#[derive(Clone, Debug)]
pub struct LineConnector {
    connect_timeout: Duration,
}

impl LineConnector {
    /// Creates a connector with the default connect timeout.
    pub fn new() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl Default for LineConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl Connector for LineConnector {
    fn open(
        &self,
        endpoint: &Endpoint,
        identity: &Identity,
        events: EventSender,
    ) -> Arc<dyn Transport> {
        Arc::new(LineTransport {
            endpoint: endpoint.clone(),
            identity: identity.clone(),
            connect_timeout: self.connect_timeout,
            events,
            writer: Mutex::new(None),
            reader: Mutex::new(None),
        })
    }
}

/// JSON lines over TCP.
///
/// The client writes `{"op":"hello",...}`, `{"op":"say",...}` and `{"op":"bye"}`;
/// the relay writes `ready`, `chat`, `error` and `closed` records.
pub struct LineTransport {
    endpoint: Endpoint,
    identity: Identity,
    connect_timeout: Duration,
    events: EventSender,
    writer: Mutex<Option<LineSink>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl LineTransport {
    fn encode(&self, record: &WireIn<'_>) -> Result<String> {
        Ok(serde_json::to_string(record)?)
    }

    async fn write(&self, line: String) -> Result<()> {
        let mut writer = self.writer.lock().await;
        let Some(sink) = writer.as_mut() else {
            return Err(Error::not_connected(&self.endpoint));
        };
        sink.send(line)
            .await
            .map_err(|err| Error::transport(&self.endpoint, err.to_string()))
    }
}

#[async_trait::async_trait]
impl Transport for LineTransport {
    async fn connect(&self) -> Result<()> {
        let address = (self.endpoint.host(), self.endpoint.port());
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| {
                Error::timeout(
                    format!("connecting to {}", self.endpoint),
                    Some(self.connect_timeout.as_secs_f64()),
                )
            })?
            .map_err(|err| Error::transport(&self.endpoint, err.to_string()))?;

        let framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
        let (mut sink, stream) = framed.split();
        let hello = self.encode(&WireIn::Hello {
            name: &self.identity.name,
            clan: &self.identity.clan,
        })?;
        sink.send(hello)
            .await
            .map_err(|err| Error::transport(&self.endpoint, err.to_string()))?;

        *self.writer.lock().await = Some(sink);
        let reader = tokio::spawn(read_loop(
            self.endpoint.clone(),
            stream,
            self.events.clone(),
        ));
        if let Some(previous) = self.reader.lock().await.replace(reader) {
            previous.abort();
        }
        Ok(())
    }

    async fn send(&self, text: &str) -> Result<()> {
        let line = self.encode(&WireIn::Say { text })?;
        self.write(line).await
    }

    async fn disconnect(&self) -> Result<()> {
        if let Some(reader) = self.reader.lock().await.take() {
            reader.abort();
        }
        let Some(mut sink) = self.writer.lock().await.take() else {
            return Ok(());
        };
        let bye = self.encode(&WireIn::Bye {})?;
        let sent = sink.send(bye).await;
        let closed = sink.close().await;
        sent.and(closed)
            .map_err(|err| Error::transport(&self.endpoint, err.to_string()))
    }
}

async fn read_loop(endpoint: Endpoint, mut stream: LineStream, events: EventSender) {
    let reason = loop {
        let line = match stream.next().await {
            Some(Ok(line)) => line,
            Some(Err(err)) => break err.to_string(),
            None => break "connection closed by peer".to_string(),
        };
        let event = match serde_json::from_str::<WireOut>(&line) {
            Ok(WireOut::Ready {}) => TransportEvent::Connected,
            Ok(WireOut::Chat { sender, text, team }) => {
                TransportEvent::Message(InboundChatEvent::new(sender, text, Scope::from_team(team)))
            }
            Ok(WireOut::Error { text }) => TransportEvent::Error(Error::transport(&endpoint, text)),
            Ok(WireOut::Closed { reason }) => {
                break reason.unwrap_or_else(|| "closed by server".to_string());
            }
            Err(err) => {
                tracing::debug!(endpoint = %endpoint, error = %err, "skipping unreadable line");
                continue;
            }
        };
        if events.send(event).is_err() {
            return;
        }
    };
    let _ = events.send(TransportEvent::Disconnected(reason));
}
