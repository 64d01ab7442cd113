//! Row-change feed from the hosted realtime service.
//!
//! Each opened table gets its own websocket speaking the Phoenix channel
//! protocol: a `phx_join` on `realtime:public:<table>` requesting
//! `postgres_changes`, periodic heartbeats on the `phoenix` topic, and
//! `postgres_changes` frames carrying the changed row. Decoded changes are
//! delivered through a bounded channel wrapped in a [`ChangeStream`].
//!
//! A socket that drops is reconnected and the channel joined again after a
//! fixed delay, for as long as the stream is alive.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{Sink, SinkExt, Stream, StreamExt};
use hostel_core::error::{HostelError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use crate::postgrest::parse_base;
use crate::retry::DEFAULT_RETRY_DELAY;

/// Interval between Phoenix heartbeats.
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(30);

/// Protocol version announced in the socket URL.
const PROTOCOL_VSN: &str = "1.0.0";

/// Buffered changes per stream before the socket reader waits.
const CHANNEL_CAPACITY: usize = 256;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ── Change types ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ChangeKind::Insert => "INSERT",
            ChangeKind::Update => "UPDATE",
            ChangeKind::Delete => "DELETE",
        })
    }
}

/// One undecoded row change: `{eventType, new, old}`.
///
/// Empty row objects (the service sends `{}` for the absent side) are
/// normalised to `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct RawChange {
    pub table: String,
    pub kind: ChangeKind,
    pub new: Option<Value>,
    pub old: Option<Value>,
}

/// Receiving end of one table subscription.
///
/// Dropping the stream stops the task feeding it.
pub struct ChangeStream {
    rx: mpsc::Receiver<RawChange>,
    pump: Option<JoinHandle<()>>,
}

impl ChangeStream {
    /// Stream fed by a task that is aborted when the stream is dropped.
    pub fn with_pump(rx: mpsc::Receiver<RawChange>, pump: JoinHandle<()>) -> Self {
        Self {
            rx,
            pump: Some(pump),
        }
    }

    /// Stream fed directly by whoever holds the sender.
    pub fn from_receiver(rx: mpsc::Receiver<RawChange>) -> Self {
        Self { rx, pump: None }
    }

    /// Next change, or `None` once the feed has ended.
    pub async fn next(&mut self) -> Option<RawChange> {
        self.rx.recv().await
    }
}

impl Drop for ChangeStream {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

/// Opens per-table change streams.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    async fn open(&self, table: &str) -> Result<ChangeStream>;
}

/// Supplies the current access token for authorising realtime channels.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn bearer_token(&self) -> Option<String>;
}

// ── Phoenix frames ────────────────────────────────────────────────────────────

/// What a decoded socket frame means for the subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Change(RawChange),
    /// The server ended or rejected the channel.
    Closed(String),
    /// Replies, heartbeats acks, presence and other traffic.
    Ignored,
}

#[derive(Debug, Deserialize)]
struct PhoenixMessage {
    topic: String,
    event: String,
    #[serde(default)]
    payload: Value,
}

#[derive(Debug, Deserialize)]
struct ChangeData {
    #[serde(rename = "type", alias = "eventType")]
    kind: ChangeKind,
    table: String,
    #[serde(default, alias = "new")]
    record: Option<Value>,
    #[serde(default, alias = "old")]
    old_record: Option<Value>,
}

/// Topic a table's channel is joined on.
pub fn channel_topic(table: &str) -> String {
    format!("realtime:public:{table}")
}

/// Websocket endpoint under the data API base URL.
pub fn socket_url(data_url: &str, anon_key: Option<&str>) -> Result<String> {
    let mut url = parse_base(data_url)?
        .join("realtime/v1/websocket")
        .map_err(|e| HostelError::Config(format!("invalid realtime path: {e}")))?;
    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => {
            return Err(HostelError::Config(format!(
                "unsupported realtime scheme {other:?}"
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| HostelError::Config(format!("cannot use {scheme} for {data_url}")))?;
    {
        let mut pairs = url.query_pairs_mut();
        if let Some(key) = anon_key {
            pairs.append_pair("apikey", key);
        }
        pairs.append_pair("vsn", PROTOCOL_VSN);
    }
    Ok(url.to_string())
}

/// `phx_join` asking for every change to `table`.
pub fn join_message(table: &str, access_token: Option<&str>, msg_ref: u64) -> Value {
    let mut payload = json!({
        "config": {
            "broadcast": { "self": false },
            "presence": { "key": "" },
            "postgres_changes": [
                { "event": "*", "schema": "public", "table": table }
            ]
        }
    });
    if let Some(token) = access_token {
        payload["access_token"] = Value::String(token.to_string());
    }
    json!({
        "topic": channel_topic(table),
        "event": "phx_join",
        "payload": payload,
        "ref": msg_ref.to_string(),
        "join_ref": msg_ref.to_string()
    })
}

fn heartbeat_message(msg_ref: u64) -> Value {
    json!({
        "topic": "phoenix",
        "event": "heartbeat",
        "payload": {},
        "ref": msg_ref.to_string()
    })
}

fn access_token_message(topic: &str, token: &str, msg_ref: u64) -> Value {
    json!({
        "topic": topic,
        "event": "access_token",
        "payload": { "access_token": token },
        "ref": msg_ref.to_string()
    })
}

fn non_empty(row: Option<Value>) -> Option<Value> {
    match row {
        Some(Value::Null) => None,
        Some(Value::Object(map)) if map.is_empty() => None,
        other => other,
    }
}

fn error_reason(payload: &Value, fallback: &str) -> String {
    ["reason", "message"]
        .iter()
        .find_map(|k| {
            payload
                .get("response")
                .and_then(|r| r.get(*k))
                .or_else(|| payload.get(*k))
                .and_then(Value::as_str)
        })
        .unwrap_or(fallback)
        .to_string()
}

/// Decode one text frame received on the channel joined at `topic`.
pub fn decode_frame(text: &str, topic: &str) -> Result<Frame> {
    let msg: PhoenixMessage = serde_json::from_str(text)?;
    if msg.topic != topic {
        return Ok(Frame::Ignored);
    }

    match msg.event.as_str() {
        "postgres_changes" => {
            let data = msg
                .payload
                .get("data")
                .cloned()
                .ok_or_else(|| HostelError::Realtime("change frame without data".to_string()))?;
            let data: ChangeData = serde_json::from_value(data)?;
            Ok(Frame::Change(RawChange {
                table: data.table,
                kind: data.kind,
                new: non_empty(data.record),
                old: non_empty(data.old_record),
            }))
        }
        "phx_reply" => {
            if msg.payload.get("status").and_then(Value::as_str) == Some("error") {
                Ok(Frame::Closed(error_reason(&msg.payload, "join rejected")))
            } else {
                Ok(Frame::Ignored)
            }
        }
        "system" => {
            if msg.payload.get("status").and_then(Value::as_str) == Some("error") {
                Ok(Frame::Closed(error_reason(&msg.payload, "subscription failed")))
            } else {
                Ok(Frame::Ignored)
            }
        }
        "phx_error" => Ok(Frame::Closed("channel error".to_string())),
        "phx_close" => Ok(Frame::Closed("channel closed".to_string())),
        _ => Ok(Frame::Ignored),
    }
}

// ── Socket feed ───────────────────────────────────────────────────────────────

/// [`ChangeFeed`] backed by one websocket per table.
pub struct RealtimeSocketFeed {
    socket_url: String,
    tokens: Option<Arc<dyn TokenSource>>,
    heartbeat: Duration,
    reconnect_delay: Duration,
}

impl RealtimeSocketFeed {
    pub fn new(data_url: &str, anon_key: Option<&str>) -> Result<Self> {
        Ok(Self {
            socket_url: socket_url(data_url, anon_key)?,
            tokens: None,
            heartbeat: DEFAULT_HEARTBEAT,
            reconnect_delay: DEFAULT_RETRY_DELAY,
        })
    }

    /// Authorise channels with (and keep pushing) the session's token.
    pub fn with_tokens(mut self, tokens: Arc<dyn TokenSource>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    pub fn with_heartbeat(mut self, heartbeat: Duration) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    /// Pause before each attempt to rejoin a dropped channel.
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }
}

/// One socket with the channel join already sent.
struct Joined<W, R> {
    write: W,
    read: R,
    token: Option<String>,
}

/// Connect, then join `table`'s channel with the current token.
async fn join(
    socket_url: &str,
    tokens: Option<&Arc<dyn TokenSource>>,
    table: &str,
) -> Result<Joined<SplitSink<Socket, Message>, SplitStream<Socket>>> {
    let token = match tokens {
        Some(tokens) => tokens.bearer_token().await,
        None => None,
    };

    let (ws, _) = connect_async(socket_url)
        .await
        .map_err(|e| HostelError::Realtime(e.to_string()))?;
    let (mut write, read) = ws.split();

    write
        .send(Message::text(join_message(table, token.as_deref(), 1).to_string()))
        .await
        .map_err(|e| HostelError::Realtime(e.to_string()))?;
    tracing::debug!(table, "realtime channel join sent");

    Ok(Joined { write, read, token })
}

#[async_trait]
impl ChangeFeed for RealtimeSocketFeed {
    async fn open(&self, table: &str) -> Result<ChangeStream> {
        let first = join(&self.socket_url, self.tokens.as_ref(), table).await?;

        let rejoin = {
            let socket_url = self.socket_url.clone();
            let tokens = self.tokens.clone();
            let table = table.to_string();
            move || {
                let socket_url = socket_url.clone();
                let tokens = tokens.clone();
                let table = table.clone();
                async move { join(&socket_url, tokens.as_ref(), &table).await }
            }
        };

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let channel = Channel {
            topic: channel_topic(table),
            tokens: self.tokens.clone(),
            last_token: None,
            heartbeat: self.heartbeat,
            reconnect_delay: self.reconnect_delay,
            next_ref: 2,
        };
        let pump = tokio::spawn(channel.run(first, rejoin, tx));
        Ok(ChangeStream::with_pump(rx, pump))
    }
}

/// How one socket's pump ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PumpExit {
    ConsumerGone,
    /// The socket failed or the server closed the channel.
    Dropped,
}

/// Per-channel state owned by the pump task.
struct Channel {
    topic: String,
    tokens: Option<Arc<dyn TokenSource>>,
    last_token: Option<String>,
    heartbeat: Duration,
    reconnect_delay: Duration,
    next_ref: u64,
}

impl Channel {
    /// Pump `first`, then keep rejoining through `rejoin` whenever the socket
    /// drops, until the consumer goes away.
    async fn run<W, R, C, F>(mut self, first: Joined<W, R>, mut rejoin: C, tx: mpsc::Sender<RawChange>)
    where
        W: Sink<Message> + Unpin,
        W::Error: fmt::Display,
        R: Stream<Item = std::result::Result<Message, tungstenite::Error>> + Unpin,
        C: FnMut() -> F,
        F: Future<Output = Result<Joined<W, R>>>,
    {
        let mut joined = first;
        loop {
            self.last_token = joined.token;
            self.next_ref = 2;
            if self.pump(joined.write, joined.read, &tx).await == PumpExit::ConsumerGone {
                return;
            }

            joined = loop {
                tokio::select! {
                    _ = tx.closed() => return,
                    _ = tokio::time::sleep(self.reconnect_delay) => {}
                }
                match rejoin().await {
                    Ok(joined) => {
                        tracing::info!(topic = %self.topic, "realtime channel rejoined");
                        break joined;
                    }
                    Err(e) => tracing::warn!(
                        topic = %self.topic,
                        error = %e,
                        retry_in_secs = self.reconnect_delay.as_secs(),
                        "realtime reconnect failed"
                    ),
                }
            };
        }
    }

    fn take_ref(&mut self) -> u64 {
        let r = self.next_ref;
        self.next_ref += 1;
        r
    }

    /// Forward decoded changes from one socket until it drops or the
    /// consumer goes away.
    async fn pump<W, R>(&mut self, mut write: W, mut read: R, tx: &mpsc::Sender<RawChange>) -> PumpExit
    where
        W: Sink<Message> + Unpin,
        W::Error: fmt::Display,
        R: Stream<Item = std::result::Result<Message, tungstenite::Error>> + Unpin,
    {
        let start = tokio::time::Instant::now() + self.heartbeat;
        let mut heartbeat = tokio::time::interval_at(start, self.heartbeat);

        loop {
            tokio::select! {
                _ = tx.closed() => {
                    tracing::debug!(topic = %self.topic, "change consumer gone; closing socket");
                    return PumpExit::ConsumerGone;
                }
                _ = heartbeat.tick() => {
                    let msg_ref = self.take_ref();
                    if let Err(e) = write.send(Message::text(heartbeat_message(msg_ref).to_string())).await {
                        tracing::warn!(topic = %self.topic, error = %e, "heartbeat failed");
                        return PumpExit::Dropped;
                    }
                    if let Err(e) = self.push_token(&mut write).await {
                        tracing::warn!(topic = %self.topic, error = %e, "token push failed");
                        return PumpExit::Dropped;
                    }
                }
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => match decode_frame(&text, &self.topic) {
                        Ok(Frame::Change(change)) => {
                            tracing::debug!(table = %change.table, kind = %change.kind, "row change received");
                            if tx.send(change).await.is_err() {
                                return PumpExit::ConsumerGone;
                            }
                        }
                        Ok(Frame::Closed(reason)) => {
                            tracing::warn!(topic = %self.topic, reason = %reason, "realtime channel closed by server");
                            return PumpExit::Dropped;
                        }
                        Ok(Frame::Ignored) => {}
                        Err(e) => {
                            tracing::warn!(topic = %self.topic, error = %e, "undecodable realtime frame");
                        }
                    },
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::debug!(topic = %self.topic, "realtime socket closed");
                        return PumpExit::Dropped;
                    }
                    Some(Err(e)) => {
                        tracing::warn!(topic = %self.topic, error = %e, "realtime socket error");
                        return PumpExit::Dropped;
                    }
                    Some(Ok(_)) => {}
                },
            }
        }
    }

    /// Send the current access token when it changed since the last push.
    async fn push_token<W>(&mut self, write: &mut W) -> std::result::Result<(), W::Error>
    where
        W: Sink<Message> + Unpin,
    {
        let Some(tokens) = self.tokens.clone() else {
            return Ok(());
        };
        let Some(token) = tokens.bearer_token().await else {
            return Ok(());
        };
        if self.last_token.as_deref() == Some(token.as_str()) {
            return Ok(());
        }
        let msg_ref = self.take_ref();
        write
            .send(Message::text(
                access_token_message(&self.topic, &token, msg_ref).to_string(),
            ))
            .await?;
        self.last_token = Some(token);
        Ok(())
    }
}
