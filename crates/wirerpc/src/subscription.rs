//! # Subscriptions
//!
//! Client-side registrations for pushed feed data. The registry only holds
//! subscriptions weakly: dropping a `Subscription` is how you unsubscribe.
//! Dead entries are pruned lazily, the next time their feed delivers.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::sync::RwLock;
use std::sync::Weak;

use tracing::warn;
use wirepack::Unpack;

use crate::handles::ConnectionId;
use crate::handles::FeedId;
use crate::handles::ProtocolId;

pub type FeedHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;

struct Entry {
    source: Option<ConnectionId>,
    protocol: ProtocolId,
    feed: FeedId,
    handler: RwLock<Option<FeedHandler>>,
}

impl Entry {
    fn handler(&self) -> Option<FeedHandler> {
        self.handler.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn accepts(&self, source: ConnectionId) -> bool {
        self.source.is_none_or(|s| s == source)
    }
}

/// A live interest in one `(protocol, feed)` pair. Drop it to stop receiving.
pub struct Subscription {
    entry: Arc<Entry>,
}

impl Subscription {
    /// Replaces the handler invoked with each raw payload.
    pub fn set_handler(&self, handler: impl Fn(&[u8]) + Send + Sync + 'static) {
        *self.entry.handler.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(handler));
    }

    /// Like `set_handler`, decoding each payload as `T` first. Payloads that
    /// do not decode are logged and skipped.
    pub fn set_value_handler<T, F>(&self, handler: F)
    where
        T: Unpack + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        let (protocol, feed) = (self.entry.protocol, self.entry.feed);
        self.set_handler(move |payload| match wirepack::from_bytes::<T>(payload) {
            Ok(value) => handler(value),
            Err(e) => warn!(protocol, feed, error = %e, "undecodable feed payload skipped"),
        });
    }

    pub fn clear_handler(&self) {
        *self.entry.handler.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn protocol(&self) -> ProtocolId {
        self.entry.protocol
    }

    pub fn feed(&self) -> FeedId {
        self.entry.feed
    }

    /// The only connection this subscription accepts data from, if restricted.
    pub fn source(&self) -> Option<ConnectionId> {
        self.entry.source
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("protocol", &self.entry.protocol)
            .field("feed", &self.entry.feed)
            .field("source", &self.entry.source)
            .finish()
    }
}

/// Result of delivering one payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Handlers invoked.
    pub delivered: usize,
    /// Pruning left no subscriptions for the pair.
    pub emptied: bool,
}

#[derive(Default)]
pub struct SubscriptionRegistry {
    entries: Mutex<HashMap<(ProtocolId, FeedId), Vec<Weak<Entry>>>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<(ProtocolId, FeedId), Vec<Weak<Entry>>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscribes to data from any connection.
    pub fn subscribe(&self, protocol: ProtocolId, feed: FeedId) -> Subscription {
        self.register(None, protocol, feed).0
    }

    /// Subscribes to data arriving over `source` only.
    pub fn subscribe_from(&self, source: ConnectionId, protocol: ProtocolId, feed: FeedId) -> Subscription {
        self.register(Some(source), protocol, feed).0
    }

    /// Adds a subscription. The flag is true when it is the only live one for
    /// the pair.
    pub(crate) fn register(
        &self,
        source: Option<ConnectionId>,
        protocol: ProtocolId,
        feed: FeedId,
    ) -> (Subscription, bool) {
        let entry = Arc::new(Entry { source, protocol, feed, handler: RwLock::new(None) });
        let mut entries = self.lock();
        let list = entries.entry((protocol, feed)).or_default();
        list.retain(|weak| weak.strong_count() > 0);
        list.push(Arc::downgrade(&entry));
        let first = list.len() == 1;
        (Subscription { entry }, first)
    }

    /// Delivers `payload` to every live subscription for the pair that accepts
    /// `source`. Handlers run after the registry lock is released.
    pub fn dispatch(&self, source: ConnectionId, protocol: ProtocolId, feed: FeedId, payload: &[u8]) -> Delivery {
        let key = (protocol, feed);
        let (live, emptied) = {
            let mut entries = self.lock();
            let Some(list) = entries.get_mut(&key) else {
                return Delivery::default();
            };
            let mut live = Vec::with_capacity(list.len());
            list.retain(|weak| match weak.upgrade() {
                Some(entry) => {
                    live.push(entry);
                    true
                }
                None => false,
            });
            let emptied = list.is_empty();
            if emptied {
                entries.remove(&key);
            }
            (live, emptied)
        };

        let mut delivered = 0;
        for entry in live.iter().filter(|e| e.accepts(source)) {
            let Some(handler) = entry.handler() else { continue };
            match std::panic::catch_unwind(AssertUnwindSafe(|| handler(payload))) {
                Ok(()) => delivered += 1,
                Err(_) => warn!(protocol, feed, %source, "feed handler panicked"),
            }
        }
        Delivery { delivered, emptied }
    }

    /// Live subscriptions for the pair.
    pub fn live_count(&self, protocol: ProtocolId, feed: FeedId) -> usize {
        self.lock()
            .get(&(protocol, feed))
            .map_or(0, |list| list.iter().filter(|w| w.strong_count() > 0).count())
    }

    /// Drops dead entries everywhere. Returns the pairs left with no subscriber.
    pub fn prune(&self) -> Vec<(ProtocolId, FeedId)> {
        let mut entries = self.lock();
        let mut emptied = Vec::new();
        entries.retain(|key, list| {
            list.retain(|weak| weak.strong_count() > 0);
            if list.is_empty() {
                emptied.push(*key);
            }
            !list.is_empty()
        });
        emptied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    fn counter(sub: &Subscription) -> Arc<AtomicUsize> {
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = hits.clone();
        sub.set_handler(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        hits
    }

    #[test]
    fn test_dropped_subscription_is_pruned() {
        let registry = SubscriptionRegistry::new();
        let kept = registry.subscribe(1, 1);
        let dropped = registry.subscribe(1, 1);
        let kept_hits = counter(&kept);
        let dropped_hits = counter(&dropped);
        drop(dropped);

        let delivery = registry.dispatch(ConnectionId(1), 1, 1, b"x");
        assert_eq!(delivery, Delivery { delivered: 1, emptied: false });
        assert_eq!(kept_hits.load(Ordering::SeqCst), 1);
        assert_eq!(dropped_hits.load(Ordering::SeqCst), 0);
        assert_eq!(registry.live_count(1, 1), 1);

        drop(kept);
        let delivery = registry.dispatch(ConnectionId(1), 1, 1, b"x");
        assert_eq!(delivery, Delivery { delivered: 0, emptied: true });
    }

    #[test]
    fn test_source_filter() {
        let registry = SubscriptionRegistry::new();
        let sub = registry.subscribe_from(ConnectionId(2), 4, 5);
        let hits = counter(&sub);
        assert_eq!(registry.dispatch(ConnectionId(3), 4, 5, b"").delivered, 0);
        assert_eq!(registry.dispatch(ConnectionId(2), 4, 5, b"").delivered, 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(sub.source(), Some(ConnectionId(2)));
    }

    #[test]
    fn test_first_registration_flag() {
        let registry = SubscriptionRegistry::new();
        let (a, first) = registry.register(None, 1, 2);
        assert!(first);
        let (_b, first) = registry.register(None, 1, 2);
        assert!(!first);
        drop(a);
        assert_eq!(registry.live_count(1, 2), 1);
    }

    #[test]
    fn test_value_handler_decodes() {
        let registry = SubscriptionRegistry::new();
        let sub = registry.subscribe(1, 1);
        let total = Arc::new(AtomicUsize::new(0));
        let sum = total.clone();
        sub.set_value_handler(move |n: u32| {
            sum.fetch_add(n as usize, Ordering::SeqCst);
        });
        registry.dispatch(ConnectionId(0), 1, 1, &wirepack::to_bytes(&5u32).unwrap());
        registry.dispatch(ConnectionId(0), 1, 1, &wirepack::to_bytes("nope").unwrap());
        assert_eq!(total.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_prune_reports_empty_pairs() {
        let registry = SubscriptionRegistry::new();
        let a = registry.subscribe(1, 1);
        let _b = registry.subscribe(2, 2);
        drop(a);
        assert_eq!(registry.prune(), vec![(1, 1)]);
    }
}
