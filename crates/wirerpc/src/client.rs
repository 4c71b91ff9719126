//! # Service Client
//!
//! The calling side of a connection. `call` encodes a `Call` envelope, hands
//! it to the transport and returns a `Promise`; replies and feed data arriving
//! on the same transport are routed back by `handle_frame`, normally driven by
//! the pump task that `connect` spawns.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::sync::Weak;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;

use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;

use crate::callable::Arguments;
use crate::callable::pack_arguments;
use crate::config::ClientConfig;
use crate::dispatcher::Dispatcher;
use crate::envelope::Classification;
use crate::envelope::Envelope;
use crate::envelope::peek_correlation;
use crate::error::CallError;
use crate::handles::ConnectionId;
use crate::handles::FeedId;
use crate::handles::FunctionId;
use crate::handles::ProtocolId;
use crate::promise::Outcome;
use crate::promise::Promise;
use crate::subscription::Subscription;
use crate::subscription::SubscriptionRegistry;
use crate::transport::Transport;

struct ClientInner {
    connection: ConnectionId,
    transport: Arc<dyn Transport>,
    dispatcher: Arc<Dispatcher>,
    subscriptions: SubscriptionRegistry,
    control: Mutex<Control>,
    closed: AtomicBool,
}

/// What the server has been told about each feed pair.
#[derive(Default)]
struct Control {
    subscribed: HashSet<(ProtocolId, FeedId)>,
    pending: HashSet<(ProtocolId, FeedId)>,
    busy: bool,
}

/// Cheap to clone; clones share one connection.
#[derive(Clone)]
pub struct ServiceClient {
    inner: Arc<ClientInner>,
}

impl ServiceClient {
    /// Builds a client with its own dispatcher. Nothing reads the transport
    /// until frames are fed to `handle_frame`; see `connect`.
    pub fn new(connection: ConnectionId, transport: Arc<dyn Transport>, config: &ClientConfig) -> Self {
        let dispatcher = Arc::new(Dispatcher::with_config(config.dispatcher.clone()));
        Self::with_dispatcher(connection, transport, dispatcher)
    }

    /// Builds a client that tracks its calls in a shared dispatcher.
    /// `connection` must be unique among the dispatcher's users.
    pub fn with_dispatcher(connection: ConnectionId, transport: Arc<dyn Transport>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                connection,
                transport,
                dispatcher,
                subscriptions: SubscriptionRegistry::new(),
                control: Mutex::new(Control::default()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Builds a client and spawns its pump, plus a periodic cleanup task if
    /// the config asks for one. Must be called inside a tokio runtime.
    pub fn connect(connection: ConnectionId, transport: Arc<dyn Transport>, config: ClientConfig) -> Self {
        let client = Self::new(connection, transport, &config);
        client.spawn_pump();
        if let Some(period) = config.cleanup_interval {
            client.spawn_cleanup(period);
        }
        client
    }

    pub fn connection(&self) -> ConnectionId {
        self.inner.connection
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.inner.dispatcher
    }

    pub fn subscriptions(&self) -> &SubscriptionRegistry {
        &self.inner.subscriptions
    }

    /// True once the pump has seen the transport end.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Calls `function` of `protocol` with an argument tuple.
    ///
    /// Never fails synchronously: every failure, including encoding or
    /// delivery problems, arrives through the returned promise.
    pub fn call<A: Arguments>(&self, protocol: ProtocolId, function: FunctionId, args: A) -> Promise {
        match pack_arguments(&args) {
            Ok(bytes) => self.call_packed(protocol, function, &bytes),
            Err(error) => {
                let (promise, resolver) = Promise::new();
                resolver.fail(error);
                promise
            }
        }
    }

    /// Calls with pre-encoded argument items.
    pub fn call_packed(&self, protocol: ProtocolId, function: FunctionId, args: &[u8]) -> Promise {
        let inner = &self.inner;
        let correlation = inner.dispatcher.next_correlation_id();
        let promise = match inner.dispatcher.register_exchange(inner.connection, correlation) {
            Ok(promise) => promise,
            Err(e) => {
                let (promise, resolver) = Promise::with_id(correlation);
                resolver.fail(CallError::internal(e));
                return promise;
            }
        };
        if inner.closed.load(Ordering::SeqCst) {
            debug!(protocol, function, correlation, "call on closed connection");
            inner.dispatcher.dispatch(
                inner.connection,
                correlation,
                Outcome::Failed(CallError::connection_lost(inner.connection)),
            );
            return promise;
        }

        debug!(protocol, function, correlation, connection = %inner.connection, "issuing call");
        let envelope = Envelope::Call { protocol, function, correlation, args };
        let sent = match envelope.encode() {
            Ok(frame) => inner.transport.send(frame).map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        if let Err(reason) = sent {
            warn!(protocol, function, correlation, %reason, "call not delivered");
            inner.dispatcher.dispatch(
                inner.connection,
                correlation,
                Outcome::Failed(CallError::could_not_deliver(reason)),
            );
        }
        promise
    }

    /// Subscribes to a feed. The server is told on the first live
    /// subscription for the pair, and told again to stop once all of them
    /// are dropped and the next payload arrives. If another thread is busy
    /// updating the server, it sends the SUBSCRIBE on this call's behalf.
    pub fn subscribe(&self, protocol: ProtocolId, feed: FeedId) -> Subscription {
        let inner = &self.inner;
        let (subscription, first) = inner.subscriptions.register(Some(inner.connection), protocol, feed);
        if first {
            self.reconcile_feed(protocol, feed);
        }
        subscription
    }

    /// Routes one inbound frame. Returns `true` if it resolved a promise or
    /// reached at least one subscription.
    pub fn handle_frame(&self, frame: &[u8]) -> bool {
        let inner = &self.inner;
        trace!(connection = %inner.connection, len = frame.len(), "frame received");
        let envelope = match Envelope::decode(frame) {
            Ok(envelope) => envelope,
            Err(e) => return self.reject_malformed(frame, e),
        };

        match envelope {
            Envelope::Result { correlation, value } => {
                inner.dispatcher.dispatch(inner.connection, correlation, Outcome::Value(value.to_vec()))
            }
            Envelope::Error { correlation, code, message } => inner.dispatcher.dispatch(
                inner.connection,
                correlation,
                Outcome::Failed(CallError::new(code, message)),
            ),
            Envelope::Feed { protocol, feed, payload } => {
                let delivery = inner.subscriptions.dispatch(inner.connection, protocol, feed, payload);
                if delivery.emptied {
                    self.reconcile_feed(protocol, feed);
                } else if delivery.delivered == 0 {
                    debug!(protocol, feed, "feed data with no subscriber");
                }
                delivery.delivered > 0
            }
            other => {
                warn!(
                    connection = %inner.connection,
                    classification = ?other.classification(),
                    "unexpected frame on client dropped"
                );
                false
            }
        }
    }

    /// Fails every call still pending on this connection.
    pub fn connection_lost(&self) -> usize {
        self.inner.dispatcher.notify_connection_failure(self.inner.connection)
    }

    /// Fails pending calls older than the exchange timeout.
    pub fn cleanup(&self) -> usize {
        self.inner.dispatcher.cleanup(Instant::now())
    }

    fn reject_malformed(&self, frame: &[u8], error: crate::envelope::Error) -> bool {
        let inner = &self.inner;
        match peek_correlation(frame) {
            Some((Classification::Result | Classification::Error, correlation)) => {
                warn!(correlation, connection = %inner.connection, %error, "malformed reply");
                inner.dispatcher.dispatch(
                    inner.connection,
                    correlation,
                    Outcome::Failed(CallError::decode_failure(error)),
                )
            }
            _ => {
                warn!(connection = %inner.connection, %error, "malformed frame dropped");
                false
            }
        }
    }

    fn control(&self) -> MutexGuard<'_, Control> {
        self.inner.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Tells the server to start or stop sending a pair so that it matches
    /// the local registry. One caller sends at a time, in order; a caller that
    /// finds another one busy leaves its pair queued for it.
    fn reconcile_feed(&self, protocol: ProtocolId, feed: FeedId) {
        {
            let mut control = self.control();
            control.pending.insert((protocol, feed));
            if control.busy {
                return;
            }
            control.busy = true;
        }

        loop {
            let ((protocol, feed), wanted) = {
                let mut control = self.control();
                let next = control.pending.iter().next().copied();
                let Some(key) = next else {
                    control.busy = false;
                    return;
                };
                control.pending.remove(&key);
                let wanted = self.inner.subscriptions.live_count(key.0, key.1) > 0;
                if wanted == control.subscribed.contains(&key) {
                    continue;
                }
                if wanted {
                    control.subscribed.insert(key);
                } else {
                    control.subscribed.remove(&key);
                }
                (key, wanted)
            };

            let connection = self.inner.connection;
            if wanted {
                debug!(protocol, feed, %connection, "subscribing");
                self.send_control(Envelope::Subscribe { protocol, feed });
            } else {
                debug!(protocol, feed, %connection, "last subscription gone, unsubscribing");
                self.send_control(Envelope::Unsubscribe { protocol, feed });
            }
        }
    }

    fn send_control(&self, envelope: Envelope<'_>) {
        let sent = envelope
            .encode()
            .map_err(|e| e.to_string())
            .and_then(|frame| self.inner.transport.send(frame).map_err(|e| e.to_string()));
        if let Err(reason) = sent {
            warn!(classification = ?envelope.classification(), %reason, "control frame not delivered");
        }
    }

    fn spawn_pump(&self) {
        let weak: Weak<ClientInner> = Arc::downgrade(&self.inner);
        let transport = self.inner.transport.clone();
        let connection = self.inner.connection;

        tokio::spawn(async move {
            loop {
                match transport.recv().await {
                    Ok(Some(frame)) => {
                        let Some(inner) = weak.upgrade() else { return };
                        ServiceClient { inner }.handle_frame(&frame);
                    }
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
            if let Some(inner) = weak.upgrade() {
                inner.closed.store(true, Ordering::SeqCst);
                inner.dispatcher.notify_connection_failure(connection);
            }
        });
    }

    fn spawn_cleanup(&self, period: Duration) {
        let dispatcher = Arc::downgrade(&self.inner.dispatcher);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(dispatcher) = dispatcher.upgrade() else { break };
                dispatcher.cleanup(Instant::now());
            }
        });
    }
}

impl std::fmt::Debug for ServiceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceClient")
            .field("connection", &self.inner.connection)
            .field("pending", &self.inner.dispatcher.pending_count())
            .finish()
    }
}
