//! # Wirerpc
//!
//! A small RPC framework: numbered protocols of numbered functions, called
//! over any frame-preserving transport, with results delivered through
//! promises and server-pushed data delivered through feeds.
//!
//! ## Layers
//!
//! - **Callables** (`callable`, `protocol`): functions and methods adapted to
//!   `bytes -> bytes`, grouped into a `Protocol`, grouped into a `Registry`.
//! - **Exchanges** (`promise`, `dispatcher`): each outbound call gets a
//!   correlation id and a `Promise`; the `Dispatcher` resolves it when the
//!   reply arrives, the connection dies, or the call times out.
//! - **Endpoints** (`client`, `server`, `envelope`, `transport`): the wire
//!   format and the two sides of a connection.
//! - **Feeds** (`feed`, `subscription`): one-way pushed data, fanned out by
//!   the server and delivered to weakly held client subscriptions.
//!
//! Values are encoded with `wirepack`; anything implementing `Pack`/`Unpack`
//! can be an argument, a result or a feed payload.
//!
//! ## Guarantees
//!
//! - A promise resolves at most once. Whatever resolves it first (reply,
//!   connection failure, timeout) wins and later attempts are ignored.
//! - Every call reaching a server is answered with exactly one reply.
//! - No failure is raised synchronously at the call site.

pub mod callable;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod feed;
pub mod handles;
pub mod promise;
pub mod protocol;
pub mod server;
pub mod subscription;
pub mod transport;

pub use callable::CallContext;
pub use callable::Callable;
pub use client::ServiceClient;
pub use config::ClientConfig;
pub use config::DispatcherConfig;
pub use config::ServerConfig;
pub use dispatcher::Dispatcher;
pub use envelope::Envelope;
pub use error::CallError;
pub use error::ErrorKind;
pub use feed::PublicationFeed;
pub use handles::ConnectionId;
pub use handles::CorrelationId;
pub use handles::FeedId;
pub use handles::FunctionId;
pub use handles::ProtocolId;
pub use promise::Outcome;
pub use promise::Promise;
pub use promise::PromiseState;
pub use promise::Resolver;
pub use protocol::Protocol;
pub use protocol::Registry;
pub use server::ServiceServer;
pub use subscription::Subscription;
pub use subscription::SubscriptionRegistry;
pub use transport::DuplexTransport;
pub use transport::Transport;
