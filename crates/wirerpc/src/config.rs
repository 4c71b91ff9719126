//! Tunables for dispatchers, clients and servers.

use std::time::Duration;

pub const DEFAULT_EXCHANGE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Pending exchanges older than this are failed by `Dispatcher::cleanup`.
    pub exchange_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self { exchange_timeout: DEFAULT_EXCHANGE_TIMEOUT }
    }
}

impl DispatcherConfig {
    pub fn with_exchange_timeout(mut self, timeout: Duration) -> Self {
        self.exchange_timeout = timeout;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub dispatcher: DispatcherConfig,
    /// When set, `ServiceClient::connect` also runs `cleanup` on this period.
    pub cleanup_interval: Option<Duration>,
}

impl ClientConfig {
    pub fn with_dispatcher(mut self, dispatcher: DispatcherConfig) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn with_exchange_timeout(mut self, timeout: Duration) -> Self {
        self.dispatcher.exchange_timeout = timeout;
        self
    }

    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = Some(interval);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    /// Run call handling on tokio's blocking pool instead of the connection task.
    /// Turn this on when callables block or take long.
    pub blocking_invoke: bool,
}

impl ServerConfig {
    pub fn with_blocking_invoke(mut self, blocking: bool) -> Self {
        self.blocking_invoke = blocking;
        self
    }
}
