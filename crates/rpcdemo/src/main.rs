//! Runs a calculator service and a price ticker in one process, connected by
//! an in-memory transport. Set `RUST_LOG=wirerpc=debug` to watch the frames.

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Context;
use tracing::info;
use tracing::warn;
use tracing_subscriber::EnvFilter;
use wirerpc::CallError;
use wirerpc::ClientConfig;
use wirerpc::ConnectionId;
use wirerpc::DuplexTransport;
use wirerpc::Protocol;
use wirerpc::PublicationFeed;
use wirerpc::Registry;
use wirerpc::ServerConfig;
use wirerpc::ServiceClient;
use wirerpc::ServiceServer;

mod calc {
    pub const PROTOCOL: u32 = 1;
    pub const ADD: u32 = 1;
    pub const DIVIDE: u32 = 2;
    pub const ACCUMULATE: u32 = 3;
    pub const DIVIDE_BY_ZERO: u64 = 1;
}

mod ticker {
    pub const PROTOCOL: u32 = 2;
    pub const PRICES: u32 = 1;
}

/// Running total shared by every caller.
#[derive(Default)]
struct Accumulator {
    total: Mutex<i64>,
}

impl Accumulator {
    fn accumulate(&self, amount: i64) -> i64 {
        let mut total = self.total.lock().unwrap_or_else(|e| e.into_inner());
        *total += amount;
        *total
    }
}

fn divide(a: i64, b: i64) -> Result<i64, CallError> {
    if b == 0 {
        return Err(CallError::business(calc::DIVIDE_BY_ZERO, "division by zero"));
    }
    Ok(a / b)
}

fn registry(prices: &Arc<PublicationFeed>) -> anyhow::Result<Registry> {
    let mut calculator = Protocol::new();
    calculator.expose_fn(calc::ADD, |a: i64, b: i64| a + b)?;
    calculator.expose_fallible(calc::DIVIDE, divide)?;
    calculator.expose_method(calc::ACCUMULATE, Arc::new(Accumulator::default()), Accumulator::accumulate)?;

    let market = Protocol::new();
    market.register_feed(ticker::PRICES, prices)?;

    let mut registry = Registry::new();
    registry.add(calc::PROTOCOL, calculator)?;
    registry.add(ticker::PROTOCOL, market)?;
    Ok(registry)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let prices = Arc::new(PublicationFeed::new());
    let server = ServiceServer::with_config(registry(&prices)?, ServerConfig::default());

    let (client_end, server_end) = DuplexTransport::pair();
    server.accept(Arc::new(server_end));
    let config = ClientConfig::default()
        .with_exchange_timeout(Duration::from_secs(5))
        .with_cleanup_interval(Duration::from_secs(1));
    let client = ServiceClient::connect(ConnectionId(1), Arc::new(client_end), config);

    let sum: i64 = client.call(calc::PROTOCOL, calc::ADD, (2i64, 3i64)).get_async().await?;
    info!(sum, "add(2, 3)");

    match client.call(calc::PROTOCOL, calc::DIVIDE, (1i64, 0i64)).get_async::<i64>().await {
        Ok(quotient) => warn!(quotient, "divide(1, 0) unexpectedly succeeded"),
        Err(e) => info!(code = e.code, message = %e.message, "divide(1, 0) failed as expected"),
    }

    let promises: Vec<_> = (1..=10i64)
        .map(|n| client.call(calc::PROTOCOL, calc::ACCUMULATE, (n,)))
        .collect();
    for promise in &promises {
        promise.get_async::<i64>().await?;
    }
    let total: i64 = client.call(calc::PROTOCOL, calc::ACCUMULATE, (0i64,)).get_async().await?;
    info!(total, "accumulated 1..=10");

    let received = Arc::new(Mutex::new(Vec::new()));
    let subscription = client.subscribe(ticker::PROTOCOL, ticker::PRICES);
    let sink = received.clone();
    subscription.set_value_handler(move |price: f64| {
        info!(price, "price update");
        sink.lock().unwrap_or_else(|e| e.into_inner()).push(price);
    });

    while server.subscriber_count(ticker::PROTOCOL, ticker::PRICES) == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    for price in [101.5f64, 102.25, 99.75] {
        prices.publish_value(ticker::PRICES, &price).context("encoding price")?;
    }

    tokio::time::timeout(Duration::from_secs(5), async {
        while received.lock().unwrap_or_else(|e| e.into_inner()).len() < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .context("price updates did not arrive")?;

    drop(subscription);
    info!(pending = client.dispatcher().pending_count(), "done");
    Ok(())
}
