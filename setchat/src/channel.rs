//! WebSocket channel to the relay, bound to one identity at a time.
//!
//! The adapter owns at most one live connection. Switching identity tears
//! the old connection down completely (close frame, reader task aborted
//! and awaited) before the new one is opened. Each connection gets a
//! generation number; the reader tags inbound events with it and
//! [`ChannelAdapter::recv`] drops anything that is not from the current
//! generation.
//!
//! Sending is fire-and-forget: [`ChannelAdapter::send`] reports whether the
//! frame reached the socket and never returns an error. Nothing is buffered
//! while disconnected.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use setchat_proto::codec;
use setchat_proto::event::{ClientEvent, ServerEvent};
use setchat_proto::identity::Identity;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;
type WsSender = futures_util::stream::SplitSink<WsStream, Message>;
type WsReader = futures_util::stream::SplitStream<WsStream>;

/// Default timeout for opening a connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default capacity of the inbound event queue.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Errors from opening a connection.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The configured server URL could not be parsed.
    #[error("invalid server URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The connection attempt did not finish in time.
    #[error("connecting to {url} timed out")]
    Timeout { url: String },

    /// Nothing is listening at the server address.
    #[error("server at {url} is unreachable: {source}")]
    Unreachable {
        url: String,
        #[source]
        source: std::io::Error,
    },

    /// The server answered the upgrade with an HTTP error.
    #[error("server rejected the connection with status {status}")]
    Rejected { status: u16 },

    /// Any other WebSocket failure.
    #[error("WebSocket error: {0}")]
    WebSocket(Box<tungstenite::Error>),

    /// The adapter was shut down.
    #[error("channel is shut down")]
    Shutdown,
}

/// One live connection and its reader task.
struct Connection {
    identity: Identity,
    sender: WsSender,
    reader: JoinHandle<()>,
}

impl Connection {
    /// Sends a close frame and waits for the reader task to stop.
    async fn shutdown(mut self) {
        if let Err(e) = self.sender.send(Message::Close(None)).await {
            tracing::debug!(identity = %self.identity, err = %e, "close frame not sent");
        }
        let _ = self.sender.close().await;
        self.reader.abort();
        let _ = self.reader.await;
        tracing::info!(identity = %self.identity, "connection closed");
    }
}

/// WebSocket channel to the relay.
pub struct ChannelAdapter {
    server_url: Url,
    connect_timeout: Duration,
    /// Held for a whole identity switch.
    switching: Mutex<()>,
    /// Held only while a frame is written or a connection swapped in or out.
    connection: Mutex<Option<Connection>>,
    identity: parking_lot::RwLock<Option<Identity>>,
    connected: Arc<AtomicBool>,
    generation: AtomicU64,
    inbound_tx: parking_lot::Mutex<Option<mpsc::Sender<(u64, ServerEvent)>>>,
    inbound_rx: Mutex<mpsc::Receiver<(u64, ServerEvent)>>,
}

impl ChannelAdapter {
    /// Creates a disconnected adapter for the relay at `server_url`.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::InvalidUrl`] if `server_url` does not parse.
    pub fn new(server_url: &str) -> Result<Self, ChannelError> {
        Self::with_options(server_url, DEFAULT_CONNECT_TIMEOUT, DEFAULT_CHANNEL_CAPACITY)
    }

    /// Creates a disconnected adapter with explicit timeout and queue size.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::InvalidUrl`] if `server_url` does not parse.
    pub fn with_options(
        server_url: &str,
        connect_timeout: Duration,
        capacity: usize,
    ) -> Result<Self, ChannelError> {
        let server_url = Url::parse(server_url)?;
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Ok(Self {
            server_url,
            connect_timeout,
            switching: Mutex::new(()),
            connection: Mutex::new(None),
            identity: parking_lot::RwLock::new(None),
            connected: Arc::new(AtomicBool::new(false)),
            generation: AtomicU64::new(0),
            inbound_tx: parking_lot::Mutex::new(Some(tx)),
            inbound_rx: Mutex::new(rx),
        })
    }

    /// Binds the channel to `identity`.
    ///
    /// Any existing connection is closed first. `None` (or an empty
    /// identity) leaves the adapter disconnected. Setting the identity the
    /// adapter is already connected as is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError`] if the new connection cannot be opened. The
    /// adapter is then disconnected.
    pub async fn set_identity(&self, identity: Option<Identity>) -> Result<(), ChannelError> {
        let identity = identity.filter(|id| !id.is_empty());
        let _switching = self.switching.lock().await;

        let old = {
            let mut slot = self.connection.lock().await;
            let unchanged = match (slot.as_ref(), identity.as_ref()) {
                (Some(current), Some(wanted)) => current.identity == *wanted,
                _ => false,
            };
            if unchanged && self.connected.load(Ordering::Acquire) {
                return Ok(());
            }
            self.connected.store(false, Ordering::Release);
            slot.take()
        };
        // Sends fail fast from here until the new connection is swapped in.
        if let Some(old) = old {
            old.shutdown().await;
        }
        *self.identity.write() = None;
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;

        let Some(identity) = identity else {
            return Ok(());
        };
        let Some(inbound) = self.inbound_tx.lock().clone() else {
            return Err(ChannelError::Shutdown);
        };

        let url = connect_url(&self.server_url, &identity);
        let ws = self.open(&url).await?;
        let (sender, reader) = ws.split();

        self.connected.store(true, Ordering::Release);
        let reader = tokio::spawn(reader_loop(
            reader,
            generation,
            inbound,
            Arc::clone(&self.connected),
        ));
        tracing::info!(identity = %identity, generation, "connected");

        *self.identity.write() = Some(identity.clone());
        *self.connection.lock().await = Some(Connection {
            identity,
            sender,
            reader,
        });
        Ok(())
    }

    async fn open(&self, url: &Url) -> Result<WsStream, ChannelError> {
        let (ws, _response) = tokio::time::timeout(self.connect_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| {
                tracing::warn!(%url, "connect timed out");
                ChannelError::Timeout {
                    url: url.to_string(),
                }
            })?
            .map_err(|e| {
                tracing::warn!(%url, err = %e, "connect failed");
                map_ws_connect_error(url, e)
            })?;
        Ok(ws)
    }

    /// Sends `event` over the current connection.
    ///
    /// Returns `false` if there is no live connection or the write failed.
    pub async fn send(&self, event: &ClientEvent) -> bool {
        let mut slot = self.connection.lock().await;
        let Some(conn) = slot.as_mut() else {
            tracing::debug!(event = event.name(), "not connected, dropping event");
            return false;
        };
        if !self.connected.load(Ordering::Acquire) {
            tracing::debug!(event = event.name(), "connection lost, dropping event");
            return false;
        }

        let bytes = match codec::encode_client(event) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(err = %e, "failed to encode event");
                return false;
            }
        };
        if let Err(e) = conn.sender.send(Message::Binary(bytes.into())).await {
            tracing::warn!(identity = %conn.identity, err = %e, "send failed");
            self.connected.store(false, Ordering::Release);
            return false;
        }
        true
    }

    /// Waits for the next event from the current connection.
    ///
    /// Events that arrived on a connection that has since been replaced are
    /// discarded. Returns `None` once the adapter is shut down and the queue
    /// is drained.
    pub async fn recv(&self) -> Option<ServerEvent> {
        let mut rx = self.inbound_rx.lock().await;
        loop {
            let (generation, event) = rx.recv().await?;
            let current = self.generation.load(Ordering::Acquire);
            if generation == current {
                return Some(event);
            }
            tracing::debug!(generation, current, "dropping event from stale connection");
        }
    }

    /// Whether a connection is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// The identity the adapter is connected as, if any.
    #[must_use]
    pub fn identity(&self) -> Option<Identity> {
        self.identity.read().clone()
    }

    /// Closes the current connection, if any. The adapter can be bound
    /// again afterwards.
    pub async fn close(&self) {
        // Only fails after shutdown, when there is nothing to close.
        let _ = self.set_identity(None).await;
    }

    /// Closes the connection and ends the inbound stream. Later
    /// [`set_identity`](Self::set_identity) calls fail.
    pub async fn shutdown(&self) {
        self.close().await;
        self.inbound_tx.lock().take();
    }
}

/// Builds the connect URL: `base` with its `id` query parameter set to
/// `identity`.
fn connect_url(base: &Url, identity: &Identity) -> Url {
    let kept: Vec<(String, String)> = base
        .query_pairs()
        .filter(|(key, _)| key != "id")
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    let mut url = base.clone();
    url.set_query(None);
    url.query_pairs_mut()
        .extend_pairs(kept)
        .append_pair("id", identity.as_str());
    url
}

/// Decodes server frames and forwards them tagged with `generation`.
/// Undecodable frames are logged and skipped.
async fn reader_loop(
    mut reader: WsReader,
    generation: u64,
    tx: mpsc::Sender<(u64, ServerEvent)>,
    connected: Arc<AtomicBool>,
) {
    while let Some(frame) = reader.next().await {
        match frame {
            Ok(Message::Binary(data)) => match codec::decode_server(&data) {
                Ok(ServerEvent::Error { reason }) => {
                    tracing::warn!(reason = %reason, "server reported an error");
                }
                Ok(event) => {
                    if tx.send((generation, event)).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(err = %e, "malformed frame, skipping");
                }
            },
            Ok(Message::Close(_)) => {
                tracing::info!(generation, "server closed the connection");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(generation, err = %e, "read error");
                break;
            }
        }
    }
    connected.store(false, Ordering::Release);
    tracing::debug!(generation, "reader task exiting");
}

fn map_ws_connect_error(url: &Url, err: tungstenite::Error) -> ChannelError {
    use tungstenite::Error as WsError;
    match err {
        WsError::Io(source)
            if matches!(
                source.kind(),
                std::io::ErrorKind::ConnectionRefused | std::io::ErrorKind::AddrNotAvailable
            ) =>
        {
            ChannelError::Unreachable {
                url: url.to_string(),
                source,
            }
        }
        WsError::Http(response) => ChannelError::Rejected {
            status: response.status().as_u16(),
        },
        other => ChannelError::WebSocket(Box::new(other)),
    }
}
