//! Server-pushed feed data reaching client subscriptions.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::OnceLock;
use std::time::Duration;

use wirerpc::ClientConfig;
use wirerpc::ConnectionId;
use wirerpc::DuplexTransport;
use wirerpc::Envelope;
use wirerpc::Protocol;
use wirerpc::PublicationFeed;
use wirerpc::Registry;
use wirerpc::ServiceClient;
use wirerpc::ServiceServer;
use wirerpc::Subscription;
use wirerpc::Transport;
use wirerpc::envelope::Classification;
use wirerpc::transport;

const TICKER: u32 = 5;
const PRICES: u32 = 3;

/// Polls `check` until it holds or a second passes.
async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}

fn setup() -> (Arc<PublicationFeed>, ServiceServer, ServiceClient) {
    let feed = Arc::new(PublicationFeed::new());
    let ticker = Protocol::new();
    ticker.register_feed(PRICES, &feed).expect("register feed");
    let mut registry = Registry::new();
    registry.add(TICKER, ticker).expect("add protocol");

    let server = ServiceServer::new(registry);
    let (client_end, server_end) = DuplexTransport::pair();
    server.accept(Arc::new(server_end));
    let client = ServiceClient::connect(ConnectionId(1), Arc::new(client_end), ClientConfig::default());
    (feed, server, client)
}

/// Three publications arrive, in order, at the one subscription.
#[tokio::test]
async fn test_three_publications_delivered() {
    let (feed, server, client) = setup();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let subscription = client.subscribe(TICKER, PRICES);
    let sink = seen.clone();
    subscription.set_value_handler(move |price: u64| sink.lock().unwrap().push(price));
    assert!(eventually(|| server.subscriber_count(TICKER, PRICES) == 1).await);

    for price in [100u64, 101, 99] {
        assert!(feed.publish_value(PRICES, &price).expect("encode"));
    }
    assert!(eventually(|| seen.lock().unwrap().len() == 3).await);
    assert_eq!(*seen.lock().unwrap(), vec![100, 101, 99]);
}

/// The same value published three times is seen exactly three times.
#[tokio::test]
async fn test_same_value_three_times() {
    let (feed, server, client) = setup();
    let count = Arc::new(Mutex::new(0usize));

    let subscription = client.subscribe(TICKER, PRICES);
    let counter = count.clone();
    subscription.set_value_handler(move |value: String| {
        assert_eq!(value, "V");
        *counter.lock().unwrap() += 1;
    });
    assert!(eventually(|| server.subscriber_count(TICKER, PRICES) == 1).await);

    for _ in 0..3 {
        feed.publish_value(PRICES, "V").expect("encode");
    }
    assert!(eventually(|| *count.lock().unwrap() == 3).await);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(*count.lock().unwrap(), 3);
}

/// Every live subscription on the pair sees each payload.
#[tokio::test]
async fn test_multiple_subscriptions_share_a_feed() {
    let (feed, server, client) = setup();
    let hits = Arc::new(Mutex::new(0usize));

    let subscriptions: Vec<_> = (0..3).map(|_| client.subscribe(TICKER, PRICES)).collect();
    for subscription in &subscriptions {
        let hits = hits.clone();
        subscription.set_handler(move |_| *hits.lock().unwrap() += 1);
    }
    assert_eq!(client.subscriptions().live_count(TICKER, PRICES), 3);
    assert!(eventually(|| server.subscriber_count(TICKER, PRICES) == 1).await);

    feed.publish_value(PRICES, &1u64).expect("encode");
    assert!(eventually(|| *hits.lock().unwrap() == 3).await);
}

/// Dropping the last subscription unsubscribes at the next payload.
#[tokio::test]
async fn test_dropped_subscription_unsubscribes() {
    let (feed, server, client) = setup();
    let seen = Arc::new(Mutex::new(0usize));

    let subscription = client.subscribe(TICKER, PRICES);
    let sink = seen.clone();
    subscription.set_handler(move |_| *sink.lock().unwrap() += 1);
    assert!(eventually(|| server.subscriber_count(TICKER, PRICES) == 1).await);

    drop(subscription);
    feed.publish_value(PRICES, &7u64).expect("encode");
    assert!(eventually(|| server.subscriber_count(TICKER, PRICES) == 0).await);
    assert_eq!(client.subscriptions().live_count(TICKER, PRICES), 0);
    assert_eq!(*seen.lock().unwrap(), 0);

    feed.publish_value(PRICES, &8u64).expect("encode");
    assert_eq!(server.broadcast(TICKER, PRICES, &[]), 0);
}

/// Subscribing again after an unsubscribe resumes delivery.
#[tokio::test]
async fn test_resubscribe() {
    let (feed, server, client) = setup();
    drop(client.subscribe(TICKER, PRICES));
    assert!(eventually(|| server.subscriber_count(TICKER, PRICES) == 1).await);
    feed.publish_value(PRICES, &1u64).expect("encode");
    assert!(eventually(|| server.subscriber_count(TICKER, PRICES) == 0).await);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let subscription = client.subscribe(TICKER, PRICES);
    let sink = seen.clone();
    subscription.set_value_handler(move |price: u64| sink.lock().unwrap().push(price));
    assert!(eventually(|| server.subscriber_count(TICKER, PRICES) == 1).await);
    feed.publish_value(PRICES, &2u64).expect("encode");
    assert!(eventually(|| *seen.lock().unwrap() == vec![2]).await);
}

/// Closing the connection removes it from every feed.
#[tokio::test]
async fn test_disconnect_clears_subscriptions() {
    let feed = Arc::new(PublicationFeed::new());
    let server = ServiceServer::new(Registry::new());
    server.attach_feed(TICKER, PRICES, &feed).expect("attach");

    let (client_end, server_end) = DuplexTransport::pair();
    server.accept(Arc::new(server_end));
    let client_end = Arc::new(client_end);
    let client = ServiceClient::connect(ConnectionId(1), client_end.clone(), ClientConfig::default());
    let _subscription = client.subscribe(TICKER, PRICES);
    assert!(eventually(|| server.subscriber_count(TICKER, PRICES) == 1).await);

    client_end.close();
    assert!(eventually(|| server.connection_count() == 0).await);
    assert_eq!(server.subscriber_count(TICKER, PRICES), 0);
}

/// Records control frames and subscribes again from inside the send of an
/// UNSUBSCRIBE, the narrowest window between the two.
#[derive(Default)]
struct Resubscriber {
    sent: Mutex<Vec<Classification>>,
    client: OnceLock<ServiceClient>,
    kept: Mutex<Vec<Subscription>>,
}

#[async_trait::async_trait]
impl Transport for Resubscriber {
    fn send(&self, frame: Vec<u8>) -> transport::Result<()> {
        let kind = Envelope::decode(&frame).expect("well-formed frame").classification();
        self.sent.lock().unwrap().push(kind);
        if kind == Classification::Unsubscribe {
            if let Some(client) = self.client.get() {
                let subscription = client.subscribe(TICKER, PRICES);
                self.kept.lock().unwrap().push(subscription);
            }
        }
        Ok(())
    }

    async fn recv(&self) -> transport::Result<Option<Vec<u8>>> {
        Ok(None)
    }
}

/// A subscribe racing the unsubscribe of the same pair still leaves the
/// server subscribed, because its SUBSCRIBE goes out last.
#[test]
fn test_resubscribe_during_unsubscribe() {
    let transport = Arc::new(Resubscriber::default());
    let client = ServiceClient::new(ConnectionId(1), transport.clone(), &ClientConfig::default());
    let _ = transport.client.set(client.clone());

    drop(client.subscribe(TICKER, PRICES));
    let frame = Envelope::Feed { protocol: TICKER, feed: PRICES, payload: &[] }.encode().expect("encode");
    assert!(!client.handle_frame(&frame));

    assert_eq!(
        *transport.sent.lock().unwrap(),
        vec![Classification::Subscribe, Classification::Unsubscribe, Classification::Subscribe]
    );
    assert_eq!(client.subscriptions().live_count(TICKER, PRICES), 1);
}

/// Subscribers on other threads racing the emptying payload never leave the
/// server unsubscribed while one of them is alive.
#[test]
fn test_concurrent_resubscribe_ends_subscribed() {
    #[derive(Default)]
    struct Log(Mutex<Vec<Classification>>);

    #[async_trait::async_trait]
    impl Transport for Log {
        fn send(&self, frame: Vec<u8>) -> transport::Result<()> {
            let kind = Envelope::decode(&frame).expect("well-formed frame").classification();
            self.0.lock().unwrap().push(kind);
            Ok(())
        }

        async fn recv(&self) -> transport::Result<Option<Vec<u8>>> {
            Ok(None)
        }
    }

    for _ in 0..50 {
        let log = Arc::new(Log::default());
        let client = ServiceClient::new(ConnectionId(1), log.clone(), &ClientConfig::default());
        drop(client.subscribe(TICKER, PRICES));
        let frame = Envelope::Feed { protocol: TICKER, feed: PRICES, payload: &[] }.encode().expect("encode");

        let racer = {
            let client = client.clone();
            std::thread::spawn(move || client.subscribe(TICKER, PRICES))
        };
        client.handle_frame(&frame);
        let subscription = racer.join().expect("racer");

        let sent = log.0.lock().unwrap().clone();
        assert_eq!(sent.last(), Some(&Classification::Subscribe), "{:?}", sent);
        assert_eq!(client.subscriptions().live_count(TICKER, PRICES), 1);
        drop(subscription);
    }
}
