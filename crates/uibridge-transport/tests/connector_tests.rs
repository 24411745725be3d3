//! Connector behaviour against real loopback listeners.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use uibridge_transport::{AtomicMetrics, RetryPolicy, TcpConnector, TransportConfig, frame_stream};

fn config_for(port: u16, attempts: u32) -> TransportConfig {
    TransportConfig::builder()
        .port(port)
        .connect_timeout(Duration::from_secs(1))
        .retry(
            RetryPolicy::default()
                .with_max_attempts(attempts)
                .with_delays(Duration::from_millis(20), Duration::from_millis(100)),
        )
        .build()
}

#[tokio::test]
async fn connects_and_exchanges_framed_objects() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let mut framed = frame_stream(socket, 1024);
        let frame = framed.next().await.unwrap().unwrap();
        framed.send(frame).await.unwrap();
    });

    let connector = TcpConnector::new(config_for(port, 1), Arc::new(AtomicMetrics::new()));
    let mut stream = connector.connect().await.unwrap();
    stream.send(r#"{"hello":"{world}"}"#.to_string()).await.unwrap();
    let echoed = stream.next().await.unwrap().unwrap();

    assert_eq!(echoed, r#"{"hello":"{world}"}"#);
    server.await.unwrap();
}

#[tokio::test]
async fn retries_until_listener_appears() {
    let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = probe.local_addr().unwrap().port();
    drop(probe);

    let late_server = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(60)).await;
        let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
        let _ = listener.accept().await.unwrap();
    });

    let metrics = Arc::new(AtomicMetrics::new());
    let connector = TcpConnector::new(config_for(port, 10), Arc::clone(&metrics));
    connector.connect().await.unwrap();

    let snapshot = metrics.snapshot();
    assert!(snapshot.connection_attempts >= 2);
    assert_eq!(snapshot.failed_connections, snapshot.connection_attempts - 1);
    late_server.await.unwrap();
}
