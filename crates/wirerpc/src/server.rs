//! # Service Server
//!
//! The serving side. A `ServiceServer` owns a `Registry`, accepts any number
//! of transports, answers `Call` envelopes with exactly one `Result` or
//! `Error`, and fans feed publications out to subscribed connections.
//!
//! Per-connection state (the transport, feed subscriptions) is dropped by
//! `disconnect`, which the pump calls when its transport ends.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::Weak;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use dashmap::DashSet;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;

use crate::callable::CallContext;
use crate::config::ServerConfig;
use crate::envelope::Classification;
use crate::envelope::Envelope;
use crate::envelope::peek_correlation;
use crate::error::CallError;
use crate::feed;
use crate::feed::PublicationFeed;
use crate::feed::Publisher;
use crate::handles::ConnectionId;
use crate::handles::CorrelationId;
use crate::handles::FeedId;
use crate::handles::ProtocolId;
use crate::protocol::Registry;
use crate::transport::Transport;

struct ServerInner {
    config: ServerConfig,
    registry: Registry,
    next_connection: AtomicU64,
    connections: DashMap<ConnectionId, Arc<dyn Transport>>,
    published: DashSet<(ProtocolId, FeedId)>,
    subscribers: DashMap<(ProtocolId, FeedId), HashSet<ConnectionId>>,
    attached: Mutex<Vec<(FeedId, Weak<PublicationFeed>, Publisher)>>,
}

impl Drop for ServerInner {
    fn drop(&mut self) {
        let attached = std::mem::take(self.attached.get_mut().unwrap_or_else(PoisonError::into_inner));
        for (id, feed, publisher) in attached {
            let Some(feed) = feed.upgrade() else { continue };
            if feed.detach(id, &publisher) {
                debug!(feed = id, "feed detached from dropped server");
            }
        }
    }
}

#[derive(Clone)]
pub struct ServiceServer {
    inner: Arc<ServerInner>,
}

impl ServiceServer {
    pub fn new(registry: Registry) -> Self {
        Self::with_config(registry, ServerConfig::default())
    }

    /// Builds a server and attaches a fan-out publisher to every feed the
    /// registry's protocols have registered.
    pub fn with_config(registry: Registry, config: ServerConfig) -> Self {
        let server = Self {
            inner: Arc::new(ServerInner {
                config,
                registry,
                next_connection: AtomicU64::new(1),
                connections: DashMap::new(),
                published: DashSet::new(),
                subscribers: DashMap::new(),
                attached: Mutex::new(Vec::new()),
            }),
        };
        for protocol in server.inner.registry.ids() {
            let Some(feeds) = server.inner.registry.protocol(protocol).map(|p| p.feeds()) else {
                continue;
            };
            for (id, feed) in feeds {
                if let Err(e) = server.attach_feed(protocol, id, &feed) {
                    warn!(protocol, feed = id, error = %e, "could not attach feed");
                }
            }
        }
        server
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    /// Attaches a publisher to `feed` that broadcasts to subscribers of
    /// `(protocol, id)`. The publisher holds the server weakly and is
    /// removed from `feed` when the server is dropped.
    pub fn attach_feed(&self, protocol: ProtocolId, id: FeedId, feed: &Arc<PublicationFeed>) -> feed::Result<()> {
        let server: Weak<ServerInner> = Arc::downgrade(&self.inner);
        let publisher: Publisher = Arc::new(move |id: FeedId, payload: &[u8]| {
            if let Some(inner) = server.upgrade() {
                ServiceServer { inner }.broadcast(protocol, id, payload);
            }
        });
        feed.attach(id, publisher.clone())?;
        self.inner
            .attached
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::downgrade(feed), publisher));
        self.inner.published.insert((protocol, id));
        debug!(protocol, feed = id, "feed attached");
        Ok(())
    }

    /// Registers a transport and returns its connection id. Frames must be
    /// fed to `handle_frame`; see `accept` for the pumped variant.
    pub fn attach(&self, transport: Arc<dyn Transport>) -> ConnectionId {
        let connection = ConnectionId(self.inner.next_connection.fetch_add(1, Ordering::Relaxed));
        self.inner.connections.insert(connection, transport);
        debug!(%connection, "connection attached");
        connection
    }

    /// Attaches a transport and spawns a task reading from it until it ends.
    /// Must be called inside a tokio runtime.
    pub fn accept(&self, transport: Arc<dyn Transport>) -> ConnectionId {
        let connection = self.attach(transport.clone());
        let server = self.clone();

        tokio::spawn(async move {
            loop {
                match transport.recv().await {
                    Ok(Some(frame)) => server.handle_inbound(connection, frame),
                    Ok(None) => {
                        info!(%connection, "transport closed");
                        break;
                    }
                    Err(e) => {
                        warn!(%connection, error = %e, "transport failed");
                        break;
                    }
                }
            }
            server.disconnect(connection);
        });
        connection
    }

    /// Forgets a connection and its subscriptions. Returns `false` if unknown.
    pub fn disconnect(&self, connection: ConnectionId) -> bool {
        let known = self.inner.connections.remove(&connection).is_some();
        self.inner.subscribers.retain(|_, subscribers| {
            subscribers.remove(&connection);
            !subscribers.is_empty()
        });
        if known {
            info!(%connection, "connection detached");
        }
        known
    }

    pub fn connection_count(&self) -> usize {
        self.inner.connections.len()
    }

    pub fn subscriber_count(&self, protocol: ProtocolId, feed: FeedId) -> usize {
        self.inner.subscribers.get(&(protocol, feed)).map_or(0, |s| s.len())
    }

    /// Sends `payload` to every connection subscribed to the pair. Returns how
    /// many connections accepted it.
    pub fn broadcast(&self, protocol: ProtocolId, feed: FeedId, payload: &[u8]) -> usize {
        let targets: Vec<ConnectionId> = match self.inner.subscribers.get(&(protocol, feed)) {
            Some(subscribers) => subscribers.iter().copied().collect(),
            None => return 0,
        };
        let frame = match (Envelope::Feed { protocol, feed, payload }).encode() {
            Ok(frame) => frame,
            Err(e) => {
                warn!(protocol, feed, error = %e, "could not encode feed payload");
                return 0;
            }
        };
        let delivered = targets
            .into_iter()
            .filter(|connection| self.send_frame(*connection, frame.clone()))
            .count();
        trace!(protocol, feed, delivered, "feed broadcast");
        delivered
    }

    /// Handles one inbound frame from `connection`.
    pub fn handle_frame(&self, connection: ConnectionId, frame: &[u8]) {
        trace!(%connection, len = frame.len(), "frame received");
        let envelope = match Envelope::decode(frame) {
            Ok(envelope) => envelope,
            Err(e) => return self.reject_malformed(connection, frame, e),
        };

        match envelope {
            Envelope::Call { protocol, function, correlation, args } => {
                let ctx = CallContext { connection, protocol, function, correlation };
                let outcome = self.inner.registry.invoke(&ctx, args);
                if let Err(e) = &outcome {
                    debug!(protocol, function, correlation, code = e.code, "call failed");
                }
                self.reply(connection, correlation, outcome);
            }
            Envelope::Subscribe { protocol, feed } => self.subscribe(connection, protocol, feed),
            Envelope::Unsubscribe { protocol, feed } => self.unsubscribe(connection, protocol, feed),
            other => {
                warn!(
                    %connection,
                    classification = ?other.classification(),
                    "unexpected frame on server dropped"
                );
            }
        }
    }

    /// Only calls go to the blocking pool; control frames stay in order on
    /// the pump.
    pub(crate) fn handle_inbound(&self, connection: ConnectionId, frame: Vec<u8>) {
        let is_call = matches!(peek_correlation(&frame), Some((Classification::Call, _)));
        if self.inner.config.blocking_invoke && is_call {
            let server = self.clone();
            tokio::task::spawn_blocking(move || server.handle_frame(connection, &frame));
        } else {
            self.handle_frame(connection, &frame);
        }
    }

    fn subscribe(&self, connection: ConnectionId, protocol: ProtocolId, feed: FeedId) {
        if !self.inner.published.contains(&(protocol, feed)) {
            warn!(%connection, protocol, feed, "subscribe to unknown feed ignored");
            return;
        }
        let mut subscribers = self.inner.subscribers.entry((protocol, feed)).or_default();
        if !self.inner.connections.contains_key(&connection) {
            debug!(%connection, protocol, feed, "subscribe from detached connection ignored");
            drop(subscribers);
            self.inner.subscribers.remove_if(&(protocol, feed), |_, s| s.is_empty());
            return;
        }
        subscribers.insert(connection);
        drop(subscribers);
        debug!(%connection, protocol, feed, "subscribed");
    }

    fn unsubscribe(&self, connection: ConnectionId, protocol: ProtocolId, feed: FeedId) {
        let key = (protocol, feed);
        if let Some(mut subscribers) = self.inner.subscribers.get_mut(&key) {
            subscribers.remove(&connection);
        }
        self.inner.subscribers.remove_if(&key, |_, subscribers| subscribers.is_empty());
        debug!(%connection, protocol, feed, "unsubscribed");
    }

    fn reject_malformed(&self, connection: ConnectionId, frame: &[u8], error: crate::envelope::Error) {
        match peek_correlation(frame) {
            Some((Classification::Call, correlation)) => {
                warn!(%connection, correlation, %error, "malformed call");
                self.reply(connection, correlation, Err(CallError::decode_failure(error)));
            }
            _ => warn!(%connection, %error, "malformed frame dropped"),
        }
    }

    fn reply(&self, connection: ConnectionId, correlation: CorrelationId, outcome: Result<Vec<u8>, CallError>) {
        let encoded = match &outcome {
            Ok(value) => Envelope::Result { correlation, value: value.as_slice() }.encode(),
            Err(error) => Envelope::error(correlation, error).encode(),
        };
        match encoded {
            Ok(frame) => {
                self.send_frame(connection, frame);
            }
            Err(e) => {
                warn!(%connection, correlation, error = %e, "could not encode reply");
                let fallback = CallError::internal(format!("could not encode reply: {}", e));
                if let Ok(frame) = Envelope::error(correlation, &fallback).encode() {
                    self.send_frame(connection, frame);
                }
            }
        }
    }

    fn send_frame(&self, connection: ConnectionId, frame: Vec<u8>) -> bool {
        let Some(transport) = self.inner.connections.get(&connection).map(|t| t.value().clone()) else {
            debug!(%connection, "frame for detached connection dropped");
            return false;
        };
        match transport.send(frame) {
            Ok(()) => true,
            Err(e) => {
                warn!(%connection, error = %e, "send failed");
                false
            }
        }
    }
}

impl std::fmt::Debug for ServiceServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceServer")
            .field("protocols", &self.inner.registry.ids())
            .field("connections", &self.inner.connections.len())
            .finish()
    }
}
