//! Drives the real admin TCP line protocol end to end: binds an ephemeral
//! port, connects a plain `TcpStream` the way an operator's `nc` session
//! would, and checks the batch-client JSON-line replies against a live
//! [`Agent`](rio_agent::manager::Agent).

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use rio_agent::config::{save, BrokerConfig, Settings};

fn write_settings(path: &std::path::Path) {
    let settings = Settings {
        id: "D01".to_string(),
        broker: BrokerConfig::default(),
        http_ingest_url: None,
        proxy: None,
        location: None,
        admin_enabled: true,
        admin_port: 0,
        features: Vec::new(),
    };
    save(path, &settings).unwrap();
}

/// Sends one line and reads one JSON-line reply back, as a batch (non-
/// interactive) client: writing immediately after connect beats the
/// admin endpoint's interactive-probe window, so no banner is sent.
async fn batch_roundtrip(addr: std::net::SocketAddr, line: &str) -> String {
    let stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    write_half.write_all(format!("{line}\n").as_bytes()).await.unwrap();
    let mut lines = BufReader::new(read_half).lines();
    lines.next_line().await.unwrap().expect("admin endpoint closed without replying")
}

#[tokio::test]
async fn status_and_unrecognized_verbs_round_trip_over_the_admin_socket() {
    let dir = tempfile::tempdir().unwrap();
    let settings_path = dir.path().join("settings.json");
    write_settings(&settings_path);

    let plugins: Vec<Arc<dyn rio_agent::plugin::FeaturePlugin>> = Vec::new();
    let cancel = CancellationToken::new();
    let agent = rio_agent::manager::Agent::bootstrap(settings_path, dir.path().to_path_buf(), plugins, cancel.clone())
        .await
        .unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let admin_cancel = cancel.clone();
    let handle = tokio::spawn(rio_agent::admin::run(
        listener,
        agent.router.clone(),
        agent.notify_tx.clone(),
        admin_cancel,
    ));

    let status_reply = batch_roundtrip(addr, "status").await;
    assert!(status_reply.contains("\"reply\""));
    assert!(status_reply.contains("device"));
    assert!(status_reply.contains("D01"));

    let unknown_reply = batch_roundtrip(addr, "frobnicate").await;
    assert!(unknown_reply.contains("unrecognized command"));

    let ok_reply = batch_roundtrip(addr, "test").await;
    assert!(ok_reply.contains("ok"));

    cancel.cancel();
    handle.await.unwrap();
}
