//! # Protocols and the Registry
//!
//! A `Protocol` is a numbered bundle of callables plus the publication feeds it
//! exposes. A `Registry` maps protocol ids to protocols and is what a server
//! routes inbound calls through.
//!
//! Protocols hold their feeds weakly: the application owns each
//! `PublicationFeed`, and a feed that has been dropped simply disappears from
//! `feeds()`.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::PoisonError;
use std::sync::RwLock;
use std::sync::Weak;

use wirepack::Pack;

use crate::callable;
use crate::callable::CallContext;
use crate::callable::Callable;
use crate::callable::ContextHandler;
use crate::callable::Handler;
use crate::callable::MethodHandler;
use crate::error::CallError;
use crate::feed::PublicationFeed;
use crate::handles::FeedId;
use crate::handles::FunctionId;
use crate::handles::ProtocolId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    DuplicateFunction(FunctionId),
    DuplicateProtocol(ProtocolId),
    DuplicateFeed(FeedId),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::DuplicateFunction(id) => write!(f, "function {} already exposed", id),
            Error::DuplicateProtocol(id) => write!(f, "protocol {} already registered", id),
            Error::DuplicateFeed(id) => write!(f, "feed {} already registered", id),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Default)]
pub struct Protocol {
    functions: HashMap<FunctionId, Box<dyn Callable>>,
    feeds: RwLock<HashMap<FeedId, Weak<PublicationFeed>>>,
}

impl Protocol {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expose(&mut self, function: FunctionId, callable: Box<dyn Callable>) -> Result<()> {
        if self.functions.contains_key(&function) {
            return Err(Error::DuplicateFunction(function));
        }
        self.functions.insert(function, callable);
        Ok(())
    }

    pub fn expose_fn<F, Args, R>(&mut self, function: FunctionId, f: F) -> Result<()>
    where
        F: Handler<Args, R>,
        Args: 'static,
        R: Pack + 'static,
    {
        self.expose(function, callable::function(f))
    }

    pub fn expose_fallible<F, Args, R>(&mut self, function: FunctionId, f: F) -> Result<()>
    where
        F: Handler<Args, std::result::Result<R, CallError>>,
        Args: 'static,
        R: Pack + 'static,
    {
        self.expose(function, callable::fallible(f))
    }

    pub fn expose_method<S, F, Args, R>(&mut self, function: FunctionId, receiver: Arc<S>, f: F) -> Result<()>
    where
        S: Send + Sync + 'static,
        F: MethodHandler<S, Args, R>,
        Args: 'static,
        R: Pack + 'static,
    {
        self.expose(function, callable::method(receiver, f))
    }

    pub fn expose_contextual<F, Args, R>(&mut self, function: FunctionId, f: F) -> Result<()>
    where
        F: ContextHandler<Args, std::result::Result<R, CallError>>,
        Args: 'static,
        R: Pack + 'static,
    {
        self.expose(function, callable::contextual(f))
    }

    pub fn has_function(&self, function: FunctionId) -> bool {
        self.functions.contains_key(&function)
    }

    pub fn arity(&self, function: FunctionId) -> Option<usize> {
        self.functions.get(&function).map(|c| c.arity())
    }

    /// Exposed function ids, ascending.
    pub fn functions(&self) -> Vec<FunctionId> {
        let mut ids: Vec<_> = self.functions.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Runs `ctx.function` on `params`.
    pub fn invoke(&self, ctx: &CallContext, params: &[u8]) -> std::result::Result<Vec<u8>, CallError> {
        match self.functions.get(&ctx.function) {
            Some(callable) => callable.invoke(ctx, params),
            None => Err(CallError::function_not_found(ctx.protocol, ctx.function)),
        }
    }

    /// Associates `feed` with this protocol under `id`. Only a weak reference
    /// is kept; an id whose feed was dropped may be registered again.
    pub fn register_feed(&self, id: FeedId, feed: &Arc<PublicationFeed>) -> Result<()> {
        let mut feeds = self.feeds.write().unwrap_or_else(PoisonError::into_inner);
        if feeds.get(&id).is_some_and(|f| f.strong_count() > 0) {
            return Err(Error::DuplicateFeed(id));
        }
        feeds.insert(id, Arc::downgrade(feed));
        Ok(())
    }

    /// Live feeds, ascending by id. Dropped feeds are pruned.
    pub fn feeds(&self) -> Vec<(FeedId, Arc<PublicationFeed>)> {
        let mut feeds = self.feeds.write().unwrap_or_else(PoisonError::into_inner);
        feeds.retain(|_, f| f.strong_count() > 0);
        let mut live: Vec<_> = feeds
            .iter()
            .filter_map(|(id, f)| f.upgrade().map(|f| (*id, f)))
            .collect();
        live.sort_unstable_by_key(|(id, _)| *id);
        live
    }

    pub fn has_feed(&self, id: FeedId) -> bool {
        let feeds = self.feeds.read().unwrap_or_else(PoisonError::into_inner);
        feeds.get(&id).is_some_and(|f| f.strong_count() > 0)
    }
}

impl std::fmt::Debug for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Protocol")
            .field("functions", &self.functions())
            .field("feeds", &self.feeds().iter().map(|(id, _)| *id).collect::<Vec<_>>())
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct Registry {
    protocols: HashMap<ProtocolId, Protocol>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, id: ProtocolId, protocol: Protocol) -> Result<()> {
        if self.protocols.contains_key(&id) {
            return Err(Error::DuplicateProtocol(id));
        }
        self.protocols.insert(id, protocol);
        Ok(())
    }

    /// Exposes one callable, creating the protocol on first use.
    pub fn register(&mut self, protocol: ProtocolId, function: FunctionId, callable: Box<dyn Callable>) -> Result<()> {
        self.protocols.entry(protocol).or_default().expose(function, callable)
    }

    pub fn protocol(&self, id: ProtocolId) -> Option<&Protocol> {
        self.protocols.get(&id)
    }

    /// Registered protocol ids, ascending.
    pub fn ids(&self) -> Vec<ProtocolId> {
        let mut ids: Vec<_> = self.protocols.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn invoke(&self, ctx: &CallContext, params: &[u8]) -> std::result::Result<Vec<u8>, CallError> {
        match self.protocols.get(&ctx.protocol) {
            Some(protocol) => protocol.invoke(ctx, params),
            None => Err(CallError::protocol_not_found(ctx.protocol)),
        }
    }
}
