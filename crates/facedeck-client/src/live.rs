//! Live recognition feed.
//!
//! Holds at most one subscription to the appliance's recognition push
//! endpoint and keeps a bounded, newest-first history of what arrived.
//! Connecting and disconnecting are driven by the user through
//! [`LiveFeed::toggle`]; the feed never reconnects on its own.
//!
//! State machine:
//!
//! ```text
//!   Disconnected --toggle--> Connecting --opened--> Connected
//!        ^   ^                   |                    |  |
//!        |   +--resolve failed---+                    |  |
//!        |                       +--open failed--> Error |
//!        +----------------toggle / clean close-----------+
//!   Connected --transport error--> Error --close--> Disconnected
//!   Error --toggle--> Connecting
//! ```

use crate::api::ApiClient;
use crate::config::Config;
use crate::error::{ClientError, Result};
use crate::notify::{Notice, Notifier};
use crate::transport::{Closer, Connector, TransportEvent, WsConnector};
use facedeck_core::{FeedHistory, FeedState, RecognitionResult};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

const UPDATE_BUFFER: usize = 64;

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("a connection attempt is already in progress")]
    Busy,
    #[error("failed to resolve live feed endpoint: {0}")]
    Resolve(#[source] ClientError),
    #[error("failed to open live feed: {0}")]
    Connect(#[source] ClientError),
}

/// Looks up the push endpoint before each connection attempt.
pub trait EndpointResolver: Send + Sync + 'static {
    fn resolve(&self) -> impl Future<Output = Result<String>> + Send;
}

impl EndpointResolver for ApiClient {
    async fn resolve(&self) -> Result<String> {
        Ok(self.websocket_info().await?.websocket_url)
    }
}

struct FeedInner {
    state: FeedState,
    history: FeedHistory<RecognitionResult>,
    /// Bumped on every connect attempt and disconnect; events carrying an
    /// older session are discarded.
    session: u64,
    closer: Option<Closer>,
    reader: Option<JoinHandle<()>>,
}

struct Shared {
    inner: Mutex<FeedInner>,
    transitions: broadcast::Sender<FeedState>,
    updates: broadcast::Sender<RecognitionResult>,
    notifier: Arc<dyn Notifier>,
    dropped: AtomicU64,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, FeedInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, inner: &mut FeedInner, state: FeedState) {
        if inner.state != state {
            tracing::info!(from = %inner.state, to = %state, "live feed state changed");
            let _ = self.transitions.send(state);
        }
        inner.state = state;
    }

    fn disconnect(&self, inner: &mut FeedInner) {
        inner.session += 1;
        if let Some(mut closer) = inner.closer.take() {
            closer.close();
        }
        if let Some(reader) = inner.reader.take() {
            reader.abort();
        }
        self.set_state(inner, FeedState::Disconnected);
    }

    /// Settle a failed connection attempt, unless it was cancelled meanwhile.
    fn fail_attempt(&self, session: u64, state: FeedState, message: &str) {
        let mut inner = self.lock();
        if inner.session != session || inner.state != FeedState::Connecting {
            return;
        }
        self.set_state(&mut inner, state);
        drop(inner);
        self.notifier.notify(Notice::Error, message);
    }

    fn deliver(&self, session: u64, text: &str) {
        let record = match RecognitionResult::parse(text) {
            Ok(record) => record,
            Err(e) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %e, bytes = text.len(), "dropping malformed recognition message");
                return;
            }
        };

        {
            let mut inner = self.lock();
            if inner.session != session || inner.state != FeedState::Connected {
                tracing::debug!("ignoring message from a closed subscription");
                return;
            }
            let evicted = inner.history.push(record.clone());
            tracing::debug!(
                score = record.score,
                channel = %record.channel,
                evicted,
                "live recognition"
            );
        }

        // No receivers is fine: nobody is rendering right now.
        let _ = self.updates.send(record);
    }

    /// The subscription went away. A failed transport passes through
    /// `Error` before settling in `Disconnected`, as every close does.
    fn end_session(&self, session: u64, failed: bool) {
        let mut inner = self.lock();
        if inner.session != session || inner.state != FeedState::Connected {
            return;
        }
        inner.closer = None;
        inner.reader = None;
        if failed {
            self.set_state(&mut inner, FeedState::Error);
        }
        self.set_state(&mut inner, FeedState::Disconnected);
    }
}

/// Live Recognition Feed Client.
pub struct LiveFeed<R = ApiClient, C = WsConnector> {
    shared: Arc<Shared>,
    resolver: R,
    connector: C,
}

impl LiveFeed<ApiClient, WsConnector> {
    /// Feed resolving its endpoint through the dashboard API and connecting over WebSocket.
    pub fn from_config(api: ApiClient, config: &Config, notifier: Arc<dyn Notifier>) -> Self {
        Self::new(
            api,
            WsConnector::new(config.connect_timeout()),
            notifier,
            config.history_capacity,
        )
    }
}

impl<R: EndpointResolver, C: Connector> LiveFeed<R, C> {
    pub fn new(resolver: R, connector: C, notifier: Arc<dyn Notifier>, capacity: usize) -> Self {
        let (transitions, _) = broadcast::channel(UPDATE_BUFFER);
        let (updates, _) = broadcast::channel(UPDATE_BUFFER);
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(FeedInner {
                    state: FeedState::Disconnected,
                    history: FeedHistory::new(capacity),
                    session: 0,
                    closer: None,
                    reader: None,
                }),
                transitions,
                updates,
                notifier,
                dropped: AtomicU64::new(0),
            }),
            resolver,
            connector,
        }
    }

    /// Disconnect if connected; otherwise resolve the endpoint and connect.
    ///
    /// Returns the state the feed settled in. A toggle while a connection
    /// attempt is in flight is rejected with [`FeedError::Busy`].
    pub async fn toggle(&self) -> std::result::Result<FeedState, FeedError> {
        let session = {
            let mut inner = self.shared.lock();
            match inner.state {
                FeedState::Connected => {
                    self.shared.disconnect(&mut inner);
                    return Ok(FeedState::Disconnected);
                }
                FeedState::Connecting => return Err(FeedError::Busy),
                FeedState::Disconnected | FeedState::Error => {
                    inner.session += 1;
                    self.shared.set_state(&mut inner, FeedState::Connecting);
                    inner.session
                }
            }
        };

        let url = match self.resolver.resolve().await {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(error = %e, "live feed endpoint lookup failed");
                self.shared.fail_attempt(
                    session,
                    FeedState::Disconnected,
                    &format!("Failed to connect to live feed: {e}"),
                );
                return Err(FeedError::Resolve(e));
            }
        };

        tracing::info!(url = %url, "opening live feed");
        let subscription = match self.connector.connect(&url).await {
            Ok(subscription) => subscription,
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "live feed connection failed");
                self.shared.fail_attempt(
                    session,
                    FeedState::Error,
                    &format!("Failed to connect to live feed: {e}"),
                );
                return Err(FeedError::Connect(e));
            }
        };

        let mut inner = self.shared.lock();
        if inner.session != session || inner.state != FeedState::Connecting {
            // Cancelled while connecting; dropping the subscription closes it.
            return Ok(inner.state);
        }
        self.shared.set_state(&mut inner, FeedState::Connected);
        let (events, closer) = subscription.into_parts();
        let shared = Arc::clone(&self.shared);
        inner.closer = Some(closer);
        inner.reader = Some(tokio::spawn(read_loop(shared, session, events)));
        Ok(FeedState::Connected)
    }

    /// Close the subscription or abandon a connection attempt. No-op when idle.
    pub fn disconnect(&self) {
        let mut inner = self.shared.lock();
        match inner.state {
            FeedState::Connected | FeedState::Connecting => self.shared.disconnect(&mut inner),
            FeedState::Disconnected | FeedState::Error => {}
        }
    }
}

impl<R, C> LiveFeed<R, C> {
    pub fn state(&self) -> FeedState {
        self.shared.lock().state
    }

    /// Receive every state change in order, including a transient `Error`.
    pub fn transitions(&self) -> broadcast::Receiver<FeedState> {
        self.shared.transitions.subscribe()
    }

    /// Receive each record as it is added to the history.
    pub fn updates(&self) -> broadcast::Receiver<RecognitionResult> {
        self.shared.updates.subscribe()
    }

    /// Most recent recognition, if any arrived.
    pub fn latest(&self) -> Option<RecognitionResult> {
        self.shared.lock().history.latest().cloned()
    }

    /// Current history, newest first.
    pub fn history(&self) -> Vec<RecognitionResult> {
        self.shared.lock().history.to_vec()
    }

    pub fn capacity(&self) -> usize {
        self.shared.lock().history.capacity()
    }

    /// Number of malformed messages discarded so far.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

impl<R, C> Drop for LiveFeed<R, C> {
    fn drop(&mut self) {
        let mut inner = self.shared.lock();
        inner.closer = None;
        if let Some(reader) = inner.reader.take() {
            reader.abort();
        }
    }
}

async fn read_loop(
    shared: Arc<Shared>,
    session: u64,
    mut events: mpsc::Receiver<TransportEvent>,
) {
    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::Message(text) => shared.deliver(session, &text),
            TransportEvent::Error(reason) => {
                tracing::warn!(reason = %reason, "live feed transport error");
                shared.end_session(session, true);
                return;
            }
            TransportEvent::Closed => {
                shared.end_session(session, false);
                return;
            }
        }
    }
    shared.end_session(session, false);
}
