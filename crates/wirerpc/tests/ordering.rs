//! Replies arriving in any order, and more than once.

use std::sync::Arc;

use rand::seq::SliceRandom;
use wirerpc::ClientConfig;
use wirerpc::ConnectionId;
use wirerpc::DuplexTransport;
use wirerpc::Envelope;
use wirerpc::Promise;
use wirerpc::ServiceClient;
use wirerpc::Transport;

/// Issues `n` calls and collects the frames the peer would receive.
async fn issue(client: &ServiceClient, peer: &DuplexTransport, n: u32) -> Vec<(Promise, u64, u32)> {
    let mut calls = Vec::new();
    for i in 0..n {
        let promise = client.call(1, 1, (i,));
        let frame = peer.recv().await.expect("recv").expect("frame");
        let Envelope::Call { correlation, args, .. } = Envelope::decode(&frame).expect("decode") else {
            panic!("expected a call");
        };
        let arg: u32 = wirepack::from_bytes(args).expect("one u32 argument");
        calls.push((promise, correlation, arg));
    }
    calls
}

fn reply(correlation: u64, value: u32) -> Vec<u8> {
    let value = wirepack::to_bytes(&value).expect("encode value");
    Envelope::Result { correlation, value: &value }.encode().expect("encode reply")
}

/// Shuffled replies still land on the promise that asked for them.
#[tokio::test]
async fn test_out_of_order_replies() {
    let (client_end, peer) = DuplexTransport::pair();
    let client = ServiceClient::new(ConnectionId(1), Arc::new(client_end), &ClientConfig::default());
    let calls = issue(&client, &peer, 64).await;

    let mut replies: Vec<Vec<u8>> = calls.iter().map(|(_, id, arg)| reply(*id, arg * 3)).collect();
    replies.shuffle(&mut rand::thread_rng());
    for frame in &replies {
        assert!(client.handle_frame(frame));
    }

    for (promise, _, arg) in &calls {
        assert_eq!(promise.get::<u32>(), Ok(arg * 3));
    }
    assert_eq!(client.dispatcher().pending_count(), 0);
}

/// Correlation ids are unique and increasing.
#[tokio::test]
async fn test_correlation_ids_increase() {
    let (client_end, peer) = DuplexTransport::pair();
    let client = ServiceClient::new(ConnectionId(1), Arc::new(client_end), &ClientConfig::default());
    let calls = issue(&client, &peer, 16).await;
    let ids: Vec<u64> = calls.iter().map(|(_, id, _)| *id).collect();
    assert!(ids.windows(2).all(|w| w[0] < w[1]));
    assert!(calls.iter().all(|(promise, id, _)| promise.id() == *id));
}

/// A duplicated reply resolves nothing the second time.
#[tokio::test]
async fn test_duplicate_reply_ignored() {
    let (client_end, peer) = DuplexTransport::pair();
    let client = ServiceClient::new(ConnectionId(1), Arc::new(client_end), &ClientConfig::default());
    let calls = issue(&client, &peer, 1).await;
    let (promise, id, _) = &calls[0];

    assert!(client.handle_frame(&reply(*id, 1)));
    assert!(!client.handle_frame(&reply(*id, 2)));
    assert_eq!(promise.get::<u32>(), Ok(1));
}
