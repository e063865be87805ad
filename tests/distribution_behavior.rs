//! Behavior-driven tests for the TCP distribution server: protocol
//! responses, subscription semantics, broadcast targeting, and the
//! connection bound.

use std::time::Duration;

use ratewire_core::config::ServerConfig;
use ratewire_core::publisher::RatePublisher;
use ratewire_core::{Rate, UtcDateTime};
use ratewire_server::DistributionServer;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::watch;

struct TestServer {
    addr: std::net::SocketAddr,
    sink: ratewire_server::ServerSink,
    registry: std::sync::Arc<ratewire_server::SubscriptionRegistry>,
    shutdown: watch::Sender<bool>,
}

async fn start_server(max_connections: usize) -> TestServer {
    let config = ServerConfig {
        bind: "127.0.0.1:0".to_owned(),
        max_connections,
        session_queue: 8,
    };
    let server = DistributionServer::bind(
        &config,
        ["EURUSD".to_owned(), "GBPUSD".to_owned(), "EURUSD-MARGIN".to_owned()],
    )
    .await
    .expect("bind");

    let addr = server.local_addr();
    let sink = server.sink();
    let registry = server.registry();
    let (shutdown, shutdown_rx) = watch::channel(false);
    tokio::spawn(server.run(shutdown_rx));

    TestServer {
        addr,
        sink,
        registry,
        shutdown,
    }
}

struct Client {
    reader: BufReader<TcpStream>,
}

impl Client {
    async fn connect(addr: std::net::SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect");
        let mut client = Self {
            reader: BufReader::new(stream),
        };
        assert_eq!(
            client.read_line().await,
            "WELCOME|Connected to Rate TCP Server"
        );
        client
    }

    async fn send(&mut self, line: &str) {
        let framed = format!("{line}\r\n");
        self.reader
            .get_mut()
            .write_all(framed.as_bytes())
            .await
            .expect("write");
    }

    async fn read_line(&mut self) -> String {
        let mut line = String::new();
        let read = tokio::time::timeout(Duration::from_secs(2), self.reader.read_line(&mut line))
            .await
            .expect("read timed out")
            .expect("read");
        assert!(read > 0, "connection closed");
        line.trim_end().to_owned()
    }

    async fn expect_no_line(&mut self) {
        let mut line = String::new();
        let result =
            tokio::time::timeout(Duration::from_millis(150), self.reader.read_line(&mut line))
                .await;
        assert!(
            result.is_err() || line.trim_end().is_empty(),
            "unexpected line: {line:?}"
        );
    }
}

fn rate(name: &str, bid: f64) -> Rate {
    Rate::new(name, bid, bid + 0.0002, UtcDateTime::now()).expect("valid rate")
}

// =============================================================================
// Protocol responses
// =============================================================================

#[tokio::test]
async fn subscribe_unsubscribe_round_trip() {
    let server = start_server(16).await;
    let mut client = Client::connect(server.addr).await;

    client.send("subscribe|EURUSD").await;
    assert_eq!(client.read_line().await, "Subscribed to EURUSD");

    client.send("unsubscribe|EURUSD").await;
    assert_eq!(client.read_line().await, "Unsubscribed from EURUSD");

    let _ = server.shutdown.send(true);
}

#[tokio::test]
async fn malformed_input_reports_error_and_keeps_the_connection() {
    let server = start_server(16).await;
    let mut client = Client::connect(server.addr).await;

    client.send("hello there").await;
    assert_eq!(client.read_line().await, "ERROR|Invalid request format");

    // Connection still usable.
    client.send("subscribe|EURUSD").await;
    assert_eq!(client.read_line().await, "Subscribed to EURUSD");

    let _ = server.shutdown.send(true);
}

#[tokio::test]
async fn unsubscribe_without_subscription_reports_error_and_preserves_others() {
    let server = start_server(16).await;
    let mut client = Client::connect(server.addr).await;

    client.send("subscribe|EURUSD").await;
    assert_eq!(client.read_line().await, "Subscribed to EURUSD");

    client.send("unsubscribe|GBPUSD").await;
    assert_eq!(
        client.read_line().await,
        "ERROR|You are not subscribed to: GBPUSD"
    );

    // The EURUSD subscription is unaffected.
    server.sink.publish(&rate("EURUSD", 1.2));
    let pushed = client.read_line().await;
    assert!(pushed.contains("\"EURUSD\""), "{pushed}");

    let _ = server.shutdown.send(true);
}

#[tokio::test]
async fn unknown_symbol_reports_rate_not_found() {
    let server = start_server(16).await;
    let mut client = Client::connect(server.addr).await;

    client.send("subscribe|XAUXAG").await;
    assert_eq!(client.read_line().await, "ERROR|Rate not found: XAUXAG");

    let _ = server.shutdown.send(true);
}

// =============================================================================
// Broadcast targeting
// =============================================================================

#[tokio::test]
async fn broadcast_reaches_exactly_the_subscribed_sessions() {
    let server = start_server(16).await;
    let mut eur_client = Client::connect(server.addr).await;
    let mut gbp_client = Client::connect(server.addr).await;

    eur_client.send("subscribe|EURUSD").await;
    assert_eq!(eur_client.read_line().await, "Subscribed to EURUSD");
    gbp_client.send("subscribe|GBPUSD").await;
    assert_eq!(gbp_client.read_line().await, "Subscribed to GBPUSD");

    server.sink.publish(&rate("EURUSD", 1.2));

    let pushed = eur_client.read_line().await;
    let value: serde_json::Value = serde_json::from_str(&pushed).expect("json rate line");
    assert_eq!(value["name"], "EURUSD");
    assert!(value["ask"].as_f64().expect("ask") > value["bid"].as_f64().expect("bid"));

    gbp_client.expect_no_line().await;

    let _ = server.shutdown.send(true);
}

#[tokio::test]
async fn duplicate_subscribe_does_not_duplicate_delivery() {
    let server = start_server(16).await;
    let mut client = Client::connect(server.addr).await;

    client.send("subscribe|EURUSD").await;
    assert_eq!(client.read_line().await, "Subscribed to EURUSD");
    client.send("subscribe|EURUSD").await;
    assert_eq!(client.read_line().await, "Subscribed to EURUSD");

    server.sink.publish(&rate("EURUSD", 1.2));

    let first = client.read_line().await;
    assert!(first.contains("\"EURUSD\""));
    client.expect_no_line().await;

    let _ = server.shutdown.send(true);
}

#[tokio::test]
async fn derived_rate_names_are_broadcast_like_raw_symbols() {
    let server = start_server(16).await;
    let mut client = Client::connect(server.addr).await;

    client.send("subscribe|EURUSD-MARGIN").await;
    assert_eq!(client.read_line().await, "Subscribed to EURUSD-MARGIN");

    server.sink.publish(&rate("EURUSD-MARGIN", 1.32));
    let pushed = client.read_line().await;
    assert!(pushed.contains("EURUSD-MARGIN"), "{pushed}");

    let _ = server.shutdown.send(true);
}

#[tokio::test]
async fn disconnected_session_stops_receiving_and_is_purged() {
    let server = start_server(16).await;
    let mut staying = Client::connect(server.addr).await;
    let mut leaving = Client::connect(server.addr).await;

    staying.send("subscribe|EURUSD").await;
    assert_eq!(staying.read_line().await, "Subscribed to EURUSD");
    leaving.send("subscribe|EURUSD").await;
    assert_eq!(leaving.read_line().await, "Subscribed to EURUSD");
    assert_eq!(server.registry.subscriber_count("EURUSD"), 2);

    drop(leaving);

    // Give the server a moment to observe the close.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.registry.subscriber_count("EURUSD"), 1);

    server.sink.publish(&rate("EURUSD", 1.2));
    let pushed = staying.read_line().await;
    assert!(pushed.contains("\"EURUSD\""));

    let _ = server.shutdown.send(true);
}

// =============================================================================
// Connection bound
// =============================================================================

#[tokio::test]
async fn connections_beyond_the_bound_are_refused() {
    let server = start_server(1).await;
    let _first = Client::connect(server.addr).await;

    // The second connection gets the capacity error instead of WELCOME.
    let stream = TcpStream::connect(server.addr).await.expect("connect");
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    tokio::time::timeout(Duration::from_secs(2), reader.read_line(&mut line))
        .await
        .expect("read timed out")
        .expect("read");
    assert_eq!(line.trim_end(), "ERROR|Server at connection capacity");

    let _ = server.shutdown.send(true);
}
