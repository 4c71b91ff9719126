//! # Publication Feeds
//!
//! A `PublicationFeed` is the server-side source of pushed data. The
//! application owns it and calls `publish`; whoever attached a publisher for
//! that feed id (normally a `ServiceServer`) fans the payload out to its
//! subscribers.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::PoisonError;
use std::sync::RwLock;

use tracing::trace;
use tracing::warn;
use wirepack::Pack;

use crate::handles::FeedId;

/// Capacity of a feed built with `PublicationFeed::new`.
pub const DEFAULT_FEED_CAPACITY: usize = 256;

/// Receives every payload published on one feed id.
pub type Publisher = Arc<dyn Fn(FeedId, &[u8]) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    DuplicatePublisher(FeedId),
    CapacityExceeded { feed: FeedId, capacity: usize },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::DuplicatePublisher(id) => write!(f, "feed {} already has a publisher", id),
            Error::CapacityExceeded { feed, capacity } => {
                write!(f, "cannot add feed {}: capacity of {} reached", feed, capacity)
            }
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

pub struct PublicationFeed {
    capacity: usize,
    publishers: RwLock<HashMap<FeedId, Publisher>>,
}

impl Default for PublicationFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl PublicationFeed {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_FEED_CAPACITY)
    }

    /// A feed accepting at most `capacity` distinct feed ids.
    pub fn with_capacity(capacity: usize) -> Self {
        Self { capacity, publishers: RwLock::new(HashMap::new()) }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn create_publisher(
        &self,
        feed: FeedId,
        publisher: impl Fn(FeedId, &[u8]) + Send + Sync + 'static,
    ) -> Result<()> {
        self.attach(feed, Arc::new(publisher))
    }

    /// Installs an already shared publisher, so the caller can later
    /// `detach` exactly this one.
    pub fn attach(&self, feed: FeedId, publisher: Publisher) -> Result<()> {
        let mut publishers = self.publishers.write().unwrap_or_else(PoisonError::into_inner);
        if publishers.contains_key(&feed) {
            return Err(Error::DuplicatePublisher(feed));
        }
        if publishers.len() >= self.capacity {
            return Err(Error::CapacityExceeded { feed, capacity: self.capacity });
        }
        publishers.insert(feed, publisher);
        Ok(())
    }

    pub fn remove_publisher(&self, feed: FeedId) -> bool {
        let mut publishers = self.publishers.write().unwrap_or_else(PoisonError::into_inner);
        publishers.remove(&feed).is_some()
    }

    /// Removes the publisher of `feed` only if it is `publisher`.
    pub fn detach(&self, feed: FeedId, publisher: &Publisher) -> bool {
        let mut publishers = self.publishers.write().unwrap_or_else(PoisonError::into_inner);
        match publishers.get(&feed) {
            Some(current) if Arc::ptr_eq(current, publisher) => publishers.remove(&feed).is_some(),
            _ => false,
        }
    }

    pub fn is_registered(&self, feed: FeedId) -> bool {
        let publishers = self.publishers.read().unwrap_or_else(PoisonError::into_inner);
        publishers.contains_key(&feed)
    }

    /// Hands `payload` to the publisher of `feed`. Returns `false` (and logs)
    /// if nothing is attached for that id.
    pub fn publish(&self, feed: FeedId, payload: &[u8]) -> bool {
        let publisher = {
            let publishers = self.publishers.read().unwrap_or_else(PoisonError::into_inner);
            publishers.get(&feed).cloned()
        };
        match publisher {
            Some(publisher) => {
                trace!(feed, len = payload.len(), "publishing");
                publisher(feed, payload);
                true
            }
            None => {
                warn!(feed, "publish to unregistered feed dropped");
                false
            }
        }
    }

    /// Encodes `value` and publishes it.
    pub fn publish_value<T: Pack + ?Sized>(&self, feed: FeedId, value: &T) -> wirepack::Result<bool> {
        let payload = wirepack::to_bytes(value)?;
        Ok(self.publish(feed, &payload))
    }
}

impl std::fmt::Debug for PublicationFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let publishers = self.publishers.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("PublicationFeed")
            .field("capacity", &self.capacity)
            .field("feeds", &publishers.keys().collect::<Vec<_>>())
            .finish()
    }
}
