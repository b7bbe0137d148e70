mod common;

use common::{relay_request, send_raw, start_relay, FakeFactory};
use mimic_relay::capture::CapturedFingerprint;
use mimic_relay::profile::ResolvedFingerprint;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsConnector;

/// Accepts connections and reads them until the peer goes away.
async fn sink_upstream() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                while matches!(stream.read(&mut buf).await, Ok(n) if n > 0) {}
            });
        }
    });
    addr
}

async fn free_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Starts a real TLS handshake through the capture proxy. It never completes
/// because the sink upstream does not answer.
fn browser_handshake(capture_addr: SocketAddr, server_name: &'static str) {
    let config = ClientConfig::builder()
        .with_root_certificates(RootCertStore::empty())
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(config));
    tokio::spawn(async move {
        let tcp = TcpStream::connect(capture_addr).await.unwrap();
        let name = ServerName::try_from(server_name).unwrap();
        let _ = tokio::time::timeout(Duration::from_secs(5), connector.connect(name, tcp)).await;
    });
}

async fn wait_for_capture(server: &mimic_relay::RelayServer) -> Arc<CapturedFingerprint> {
    for _ in 0..100 {
        if let Some(fp) = server.capture().fingerprint() {
            return fp;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("capture proxy recorded nothing");
}

fn capture_profile(enabled: bool, capture: SocketAddr, upstream: SocketAddr) -> String {
    format!(
        r#"{{"host":"example.com","fingerprint":"firefox_121","useInterceptedFingerprint":{enabled},"interceptProxyAddr":"{capture}","upstreamControllerAddr":"{upstream}"}}"#
    )
}

#[tokio::test]
async fn test_captured_handshake_drives_later_requests() {
    let factory = FakeFactory::new(b"ok");
    let (server, addr) = start_relay(factory.clone()).await;
    let upstream = sink_upstream().await;
    let capture_addr = free_addr().await;

    // Turns capture on; nothing has been observed yet
    let resp = send_raw(
        &server,
        addr,
        &relay_request("example.com", "/", &capture_profile(true, capture_addr, upstream), &[]),
    )
    .await;
    assert_eq!(resp.status, 200);
    assert!(server.capture().is_active().await);
    assert_eq!(server.capture().listen_addr().await, Some(capture_addr));

    browser_handshake(capture_addr, "capture.test");
    let captured = wait_for_capture(&server).await;
    assert_eq!(captured.server_name.as_deref(), Some("capture.test"));
    assert!(captured.ja3.starts_with("771,"), "unexpected JA3 {}", captured.ja3);
    assert!(captured.client_hello_hex.starts_with("01"));

    // Same profile again picks up the captured handshake
    let resp = send_raw(
        &server,
        addr,
        &relay_request("example.com", "/", &capture_profile(true, capture_addr, upstream), &[]),
    )
    .await;
    assert_eq!(resp.status, 200);

    // Flag cleared: capture stops and the preset is used again
    let resp = send_raw(
        &server,
        addr,
        &relay_request("example.com", "/", &capture_profile(false, capture_addr, upstream), &[]),
    )
    .await;
    assert_eq!(resp.status, 200);
    assert!(!server.capture().is_active().await);
    TcpListener::bind(capture_addr)
        .await
        .expect("capture address should be released");

    let fingerprints = factory.fingerprints();
    assert_eq!(fingerprints.len(), 3);
    assert_eq!(fingerprints[0], ResolvedFingerprint::Preset("firefox_121".into()));
    assert_eq!(fingerprints[1], ResolvedFingerprint::Captured(captured));
    assert_eq!(fingerprints[2], ResolvedFingerprint::Preset("firefox_121".into()));

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_capture_bind_failure_is_reported_and_nothing_is_sent() {
    let factory = FakeFactory::new(b"ok");
    let (server, addr) = start_relay(factory.clone()).await;
    let upstream = sink_upstream().await;
    let occupied = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let capture_addr = occupied.local_addr().unwrap();

    let resp = send_raw(
        &server,
        addr,
        &relay_request("example.com", "/", &capture_profile(true, capture_addr, upstream), &[]),
    )
    .await;

    assert_eq!(resp.status, 500);
    let body = String::from_utf8(resp.body).unwrap();
    assert!(
        body.starts_with("TLS relay error: Capture toggle failed: failed to bind capture listener"),
        "unexpected body: {body}"
    );
    assert!(!server.capture().is_active().await);
    assert!(factory.sent().is_empty());

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_stopping_relay_stops_capture() {
    let factory = FakeFactory::new(b"ok");
    let (server, addr) = start_relay(factory).await;
    let upstream = sink_upstream().await;
    let capture_addr = free_addr().await;

    send_raw(
        &server,
        addr,
        &relay_request("example.com", "/", &capture_profile(true, capture_addr, upstream), &[]),
    )
    .await;
    assert!(server.capture().is_active().await);

    server.stop().await.unwrap();
    assert!(!server.capture().is_active().await);
    TcpListener::bind(capture_addr)
        .await
        .expect("capture address should be released");
}
