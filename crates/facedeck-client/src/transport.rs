//! Live subscription transport.
//!
//! A [`Connector`] opens a [`Subscription`]: a stream of [`TransportEvent`]s
//! plus a shutdown handle. The WebSocket implementation runs a pump task
//! that owns the socket, forwards frames over an mpsc channel and sends a
//! Close frame when the subscription is closed or dropped.

use crate::error::{ClientError, Result};
use futures_util::{SinkExt, StreamExt};
use std::future::Future;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

const EVENT_BUFFER: usize = 64;

/// What the subscription observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One text message from the server.
    Message(String),
    /// The connection failed; no further events follow.
    Error(String),
    /// The connection closed cleanly; no further events follow.
    Closed,
}

/// Shutdown handle of a subscription. Dropping it closes the connection.
pub struct Closer(Option<oneshot::Sender<()>>);

impl Closer {
    /// Ask the transport to close. Idempotent.
    pub fn close(&mut self) {
        if let Some(tx) = self.0.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for Closer {
    fn drop(&mut self) {
        self.close();
    }
}

/// An open subscription. Dropping it closes the connection.
pub struct Subscription {
    events: mpsc::Receiver<TransportEvent>,
    closer: Closer,
}

impl Subscription {
    pub fn new(events: mpsc::Receiver<TransportEvent>, shutdown: oneshot::Sender<()>) -> Self {
        Self {
            events,
            closer: Closer(Some(shutdown)),
        }
    }

    /// Separate the event stream from the shutdown handle.
    pub fn into_parts(self) -> (mpsc::Receiver<TransportEvent>, Closer) {
        (self.events, self.closer)
    }
}

/// Opens subscriptions to a push endpoint.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self, url: &str) -> impl Future<Output = Result<Subscription>> + Send;
}

/// WebSocket connector over `tokio-tungstenite`.
#[derive(Debug, Clone)]
pub struct WsConnector {
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Subscription> {
        let (stream, response) =
            tokio::time::timeout(self.connect_timeout, tokio_tungstenite::connect_async(url))
                .await
                .map_err(|_| ClientError::Timeout(timeout_secs(self.connect_timeout)))??;

        tracing::info!(url, status = response.status().as_u16(), "subscription opened");

        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        tokio::spawn(pump(stream, events_tx, shutdown_rx));

        Ok(Subscription::new(events_rx, shutdown_tx))
    }
}

/// Timeout for error messages, rounded up so it never reads as zero.
fn timeout_secs(timeout: Duration) -> u64 {
    timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0)
}

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Forward socket frames until the server closes, the socket fails, or the
/// subscription asks to shut down.
async fn pump(
    socket: Socket,
    events: mpsc::Sender<TransportEvent>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let (mut sink, mut source) = socket.split();

    loop {
        tokio::select! {
            // Fires on an explicit close and when the Subscription is dropped.
            _ = &mut shutdown => {
                tracing::debug!("closing subscription");
                if let Err(e) = sink.send(Message::Close(None)).await {
                    tracing::debug!(error = %e, "close frame not delivered");
                }
                break;
            }
            frame = source.next() => {
                let event = match frame {
                    Some(Ok(Message::Text(text))) => TransportEvent::Message(text),
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                        Ok(text) => TransportEvent::Message(text),
                        Err(_) => {
                            tracing::warn!("ignoring non-UTF-8 binary frame");
                            continue;
                        }
                    },
                    Some(Ok(Message::Close(frame))) => {
                        tracing::info!(?frame, "server closed subscription");
                        let _ = events.send(TransportEvent::Closed).await;
                        break;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "subscription failed");
                        let _ = events.send(TransportEvent::Error(e.to_string())).await;
                        break;
                    }
                    None => {
                        let _ = events.send(TransportEvent::Closed).await;
                        break;
                    }
                };
                if events.send(event).await.is_err() {
                    // Nobody is listening any more.
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    }
}
