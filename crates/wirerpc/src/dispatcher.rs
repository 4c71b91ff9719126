//! # Dispatcher
//!
//! Tracks every in-flight call (an *exchange*) by correlation id, routes
//! replies to the matching `Promise`, and reclaims exchanges whose connection
//! died or whose reply never came.
//!
//! Exchanges live in one map keyed by correlation id, with a second index from
//! connection to the ids it owns. The two maps are never locked at the same
//! time: every operation finishes with one before touching the other.

use std::collections::HashSet;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Instant;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::config::DispatcherConfig;
use crate::error::CallError;
use crate::handles::ConnectionId;
use crate::handles::CorrelationId;
use crate::promise::Outcome;
use crate::promise::Promise;
use crate::promise::Resolver;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    DuplicateExchange(CorrelationId),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::DuplicateExchange(id) => write!(f, "correlation id {} is already pending", id),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

struct Exchange {
    resolver: Resolver,
    created_at: Instant,
    connection: ConnectionId,
}

pub struct Dispatcher {
    config: DispatcherConfig,
    next_id: AtomicU64,
    pending: DashMap<CorrelationId, Exchange>,
    by_connection: DashMap<ConnectionId, HashSet<CorrelationId>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::with_config(DispatcherConfig::default())
    }

    pub fn with_config(config: DispatcherConfig) -> Self {
        Self {
            config,
            next_id: AtomicU64::new(1),
            pending: DashMap::new(),
            by_connection: DashMap::new(),
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Allocates a fresh id. Ids increase strictly per dispatcher.
    pub fn next_correlation_id(&self) -> CorrelationId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn register_exchange(&self, connection: ConnectionId, id: CorrelationId) -> Result<Promise> {
        self.register_exchange_at(connection, id, Instant::now())
    }

    /// Registers an exchange with an explicit creation time.
    pub fn register_exchange_at(
        &self,
        connection: ConnectionId,
        id: CorrelationId,
        created_at: Instant,
    ) -> Result<Promise> {
        let promise = match self.pending.entry(id) {
            Entry::Occupied(_) => return Err(Error::DuplicateExchange(id)),
            Entry::Vacant(slot) => {
                let (promise, resolver) = Promise::with_id(id);
                slot.insert(Exchange { resolver, created_at, connection });
                promise
            }
        };
        self.by_connection.entry(connection).or_default().insert(id);
        debug!(correlation = id, %connection, "exchange registered");
        Ok(promise)
    }

    /// Resolves and removes the exchange `id`, if it is pending on `connection`.
    ///
    /// Returns `false` for unknown ids (already resolved, timed out, or never
    /// issued) and for ids owned by another connection.
    pub fn dispatch(&self, connection: ConnectionId, id: CorrelationId, outcome: Outcome) -> bool {
        let Some((_, exchange)) = self.pending.remove_if(&id, |_, e| e.connection == connection) else {
            match self.connection_of(id) {
                Some(owner) => warn!(correlation = id, %connection, %owner, "reply from wrong connection dropped"),
                None => debug!(correlation = id, %connection, "reply for unknown exchange dropped"),
            }
            return false;
        };
        self.forget(connection, id);
        debug!(correlation = id, %connection, success = outcome.is_value(), "exchange resolved");
        exchange.resolver.resolve(outcome)
    }

    /// Fails every exchange pending on `connection` with a connection-lost error.
    /// Returns how many were failed.
    pub fn notify_connection_failure(&self, connection: ConnectionId) -> usize {
        let Some((_, ids)) = self.by_connection.remove(&connection) else {
            return 0;
        };
        let mut failed = 0;
        for id in ids {
            if let Some((_, exchange)) = self.pending.remove(&id) {
                if exchange.resolver.fail(CallError::connection_lost(connection)) {
                    failed += 1;
                }
            }
        }
        info!(%connection, failed, "connection failure reclaimed exchanges");
        failed
    }

    /// Fails every exchange older than the configured timeout, as seen at `now`.
    /// Returns how many were reclaimed.
    pub fn cleanup(&self, now: Instant) -> usize {
        let timeout = self.config.exchange_timeout;
        let expired = |e: &Exchange| now.saturating_duration_since(e.created_at) > timeout;

        let candidates: Vec<CorrelationId> = self
            .pending
            .iter()
            .filter(|entry| expired(entry.value()))
            .map(|entry| *entry.key())
            .collect();

        let mut reclaimed = 0;
        for id in candidates {
            let Some((_, exchange)) = self.pending.remove_if(&id, |_, e| expired(e)) else {
                continue;
            };
            self.forget(exchange.connection, id);
            let age = now.saturating_duration_since(exchange.created_at);
            if exchange.resolver.fail(CallError::timeout(age)) {
                reclaimed += 1;
            }
        }
        if reclaimed > 0 {
            info!(reclaimed, "timed out exchanges reclaimed");
        }
        reclaimed
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, id: CorrelationId) -> bool {
        self.pending.contains_key(&id)
    }

    pub fn connection_of(&self, id: CorrelationId) -> Option<ConnectionId> {
        self.pending.get(&id).map(|e| e.connection)
    }

    fn forget(&self, connection: ConnectionId, id: CorrelationId) {
        if let Some(mut ids) = self.by_connection.get_mut(&connection) {
            ids.remove(&id);
        }
        self.by_connection.remove_if(&connection, |_, ids| ids.is_empty());
    }
}
