//! End-to-end calls between a ServiceClient and a ServiceServer over an
//! in-memory transport.

use std::sync::Arc;
use std::time::Duration;

use wirerpc::CallError;
use wirerpc::ClientConfig;
use wirerpc::ConnectionId;
use wirerpc::DuplexTransport;
use wirerpc::ErrorKind;
use wirerpc::Protocol;
use wirerpc::Registry;
use wirerpc::ServerConfig;
use wirerpc::ServiceClient;
use wirerpc::ServiceServer;

const CALC: u32 = 1;
const ADD: u32 = 5;
const DIVIDE: u32 = 7;
const GREET: u32 = 9;

fn calculator() -> Registry {
    let mut calc = Protocol::new();
    calc.expose_fn(ADD, |a: i32, b: i32| a + b).expect("expose add");
    calc.expose_fallible(DIVIDE, |a: i32, b: i32| {
        if b == 0 {
            Err(CallError::business(42, "bad args"))
        } else {
            Ok(a / b)
        }
    })
    .expect("expose divide");
    calc.expose_fn(GREET, |name: String| format!("hello, {}", name)).expect("expose greet");

    let mut registry = Registry::new();
    registry.add(CALC, calc).expect("add protocol");
    registry
}

/// Wires a server and a pumped client together.
fn connect(config: ServerConfig) -> (ServiceServer, ServiceClient) {
    let server = ServiceServer::with_config(calculator(), config);
    let (client_end, server_end) = DuplexTransport::pair();
    server.accept(Arc::new(server_end));
    let client = ServiceClient::connect(ConnectionId(1), Arc::new(client_end), ClientConfig::default());
    (server, client)
}

/// Add(2, 3) comes back as 5.
#[tokio::test]
async fn test_add_round_trip() -> anyhow::Result<()> {
    let (_server, client) = connect(ServerConfig::default());
    let sum: i32 = client.call(CALC, ADD, (2i32, 3i32)).get_async().await?;
    assert_eq!(sum, 5);
    assert_eq!(client.dispatcher().pending_count(), 0);
    Ok(())
}

/// Strings go both ways.
#[tokio::test]
async fn test_string_arguments() -> anyhow::Result<()> {
    let (_server, client) = connect(ServerConfig::default());
    let greeting: String = client.call(CALC, GREET, ("wire",)).get_async().await?;
    assert_eq!(greeting, "hello, wire");
    Ok(())
}

/// A thousand calls in flight at once each get their own answer.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_thousand_concurrent_calls() -> anyhow::Result<()> {
    let (_server, client) = connect(ServerConfig::default());

    let mut tasks = Vec::new();
    for i in 0..1000i32 {
        let client = client.clone();
        tasks.push(tokio::spawn(async move {
            let promise = client.call(CALC, ADD, (i, i));
            (i, promise.get_async::<i32>().await)
        }));
    }

    for task in tasks {
        let (i, result) = task.await?;
        assert_eq!(result?, 2 * i);
    }
    assert_eq!(client.dispatcher().pending_count(), 0);
    Ok(())
}

/// Business errors arrive with their code and message intact.
#[tokio::test]
async fn test_business_error_reaches_caller() {
    let (_server, client) = connect(ServerConfig::default());
    let err = client
        .call(CALC, DIVIDE, (1i32, 0i32))
        .get_async::<i32>()
        .await
        .expect_err("divide by zero should fail");
    assert_eq!(err.code, 42);
    assert!(err.message.contains("bad args"));
    assert_eq!(err.kind(), ErrorKind::Business);
}

/// Unknown protocol and function ids come back as FunctionNotFound.
#[tokio::test]
async fn test_unknown_function() {
    let (_server, client) = connect(ServerConfig::default());
    let no_function = client.call(CALC, 99, ()).resolved().await;
    let no_protocol = client.call(77, ADD, (1i32, 1i32)).resolved().await;
    assert_eq!(no_function.error().map(|e| e.kind()), Some(ErrorKind::FunctionNotFound));
    assert_eq!(no_protocol.error().map(|e| e.kind()), Some(ErrorKind::FunctionNotFound));
}

/// Arguments that do not match the signature come back as DecodeFailure.
#[tokio::test]
async fn test_signature_mismatch() {
    let (_server, client) = connect(ServerConfig::default());
    let err = client
        .call(CALC, ADD, ("two", 3i32))
        .get_async::<i32>()
        .await
        .expect_err("mismatched arguments should fail");
    assert_eq!(err.kind(), ErrorKind::DecodeFailure);
}

/// Reading a reply as the wrong type is a local decode failure.
#[tokio::test]
async fn test_wrong_result_type() {
    let (_server, client) = connect(ServerConfig::default());
    let err = client
        .call(CALC, ADD, (1i32, 1i32))
        .get_async::<String>()
        .await
        .expect_err("an i32 is not a string");
    assert_eq!(err.kind(), ErrorKind::DecodeFailure);
}

/// Blocking waits from plain threads work against a server that invokes on
/// the blocking pool.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_blocking_wait_with_blocking_invoke() -> anyhow::Result<()> {
    let (_server, client) = connect(ServerConfig::default().with_blocking_invoke(true));

    let sums = tokio::task::spawn_blocking(move || {
        (0..20i32)
            .map(|i| client.call(CALC, ADD, (i, 1i32)))
            .collect::<Vec<_>>()
            .into_iter()
            .map(|promise| promise.wait_timeout(Duration::from_secs(5)))
            .collect::<Vec<_>>()
    })
    .await?;

    for (i, outcome) in sums.into_iter().enumerate() {
        let outcome = outcome.expect("reply within five seconds");
        assert_eq!(outcome.decode::<i32>()?, i as i32 + 1);
    }
    Ok(())
}

/// Two clients on separate connections do not see each other's replies.
#[tokio::test]
async fn test_two_clients_one_server() -> anyhow::Result<()> {
    let server = ServiceServer::new(calculator());
    let mut clients = Vec::new();
    for n in 1..=2u64 {
        let (client_end, server_end) = DuplexTransport::pair();
        server.accept(Arc::new(server_end));
        clients.push(ServiceClient::connect(ConnectionId(n), Arc::new(client_end), ClientConfig::default()));
    }
    assert_eq!(server.connection_count(), 2);

    let a = clients[0].call(CALC, ADD, (1i32, 1i32));
    let b = clients[1].call(CALC, ADD, (10i32, 10i32));
    assert_eq!(a.get_async::<i32>().await?, 2);
    assert_eq!(b.get_async::<i32>().await?, 20);
    Ok(())
}
