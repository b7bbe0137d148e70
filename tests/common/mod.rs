#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use mimic_relay::config::ServerSettings;
use mimic_relay::error::{ClientBuildError, UpstreamError};
use mimic_relay::profile::{ResolvedFingerprint, TransportProfile};
use mimic_relay::relay::{BoxError, ResponseBody, Transport, TransportFactory};
use mimic_relay::RelayServer;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

/// What the fake destination saw for one request.
#[derive(Debug, Clone)]
pub struct SentRequest {
    pub method: String,
    pub uri: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

/// Answers every request with a fixed body and records what it was sent.
pub struct FakeDestination {
    pub sent: Mutex<Vec<SentRequest>>,
    pub body: &'static [u8],
}

#[async_trait]
impl Transport for FakeDestination {
    async fn send(&self, req: Request<Full<Bytes>>) -> Result<Response<ResponseBody>, UpstreamError> {
        let (parts, body) = req.into_parts();
        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(never) => match never {},
        };
        self.sent.lock().unwrap().push(SentRequest {
            method: parts.method.to_string(),
            uri: parts.uri.to_string(),
            headers: parts
                .headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_str().unwrap().to_string()))
                .collect(),
            body,
        });

        let body = Full::new(Bytes::from_static(self.body))
            .map_err(|never| -> BoxError { match never {} })
            .boxed_unsync();
        Ok(Response::builder()
            .status(StatusCode::OK)
            .header("Content-Length", "4096")
            .header("X-Destination", "fake")
            .body(body)
            .unwrap())
    }
}

/// Hands out the fake destination and records each resolved fingerprint.
pub struct FakeFactory {
    pub destination: Arc<FakeDestination>,
    pub fingerprints: Mutex<Vec<ResolvedFingerprint>>,
}

impl FakeFactory {
    pub fn new(body: &'static [u8]) -> Arc<Self> {
        Arc::new(Self {
            destination: Arc::new(FakeDestination {
                sent: Mutex::new(Vec::new()),
                body,
            }),
            fingerprints: Mutex::new(Vec::new()),
        })
    }

    pub fn sent(&self) -> Vec<SentRequest> {
        self.destination.sent.lock().unwrap().clone()
    }

    pub fn fingerprints(&self) -> Vec<ResolvedFingerprint> {
        self.fingerprints.lock().unwrap().clone()
    }
}

impl TransportFactory for FakeFactory {
    fn build(
        &self,
        fingerprint: &ResolvedFingerprint,
        _profile: &TransportProfile,
    ) -> Result<Arc<dyn Transport>, ClientBuildError> {
        self.fingerprints.lock().unwrap().push(fingerprint.clone());
        Ok(self.destination.clone() as Arc<dyn Transport>)
    }
}

pub async fn start_relay(factory: Arc<FakeFactory>) -> (RelayServer, SocketAddr) {
    let server = RelayServer::new(ServerSettings::default(), factory).unwrap();
    let addr = server.start("127.0.0.1:0".parse().unwrap()).await.unwrap();
    (server, addr)
}

/// Parsed HTTP/1.1 response read off the wire.
#[derive(Debug)]
pub struct WireResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl WireResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Sends a raw HTTP/1.1 request over TLS, trusting only the relay's certificate.
pub async fn send_raw(server: &RelayServer, addr: SocketAddr, request: &str) -> WireResponse {
    let pem = server.certificate_pem().await.expect("relay not running");
    let mut roots = RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut pem.as_bytes()) {
        roots.add(cert.unwrap()).unwrap();
    }
    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(config));

    let tcp = TcpStream::connect(addr).await.unwrap();
    let mut tls = connector
        .connect(ServerName::try_from("localhost").unwrap(), tcp)
        .await
        .expect("TLS handshake with relay failed");
    tls.write_all(request.as_bytes()).await.unwrap();

    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        let n = tls.read(&mut chunk).await.unwrap();
        assert!(n > 0, "connection closed before response headers");
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8(buf[..header_end].to_vec()).unwrap();
    let mut lines = head.split("\r\n");
    let status: u16 = lines.next().unwrap().split(' ').nth(1).unwrap().parse().unwrap();
    let headers: Vec<(String, String)> = lines
        .map(|line| {
            let (k, v) = line.split_once(':').unwrap();
            (k.trim().to_string(), v.trim().to_string())
        })
        .collect();

    let length: usize = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
        .map(|(_, v)| v.parse().unwrap())
        .unwrap_or(0);
    let mut body = buf[header_end + 4..].to_vec();
    while body.len() < length {
        let n = tls.read(&mut chunk).await.unwrap();
        assert!(n > 0, "connection closed before full body");
        body.extend_from_slice(&chunk[..n]);
    }

    WireResponse {
        status,
        headers,
        body,
    }
}

/// Request line plus headers, with the profile in the control header.
pub fn relay_request(
    host: &str,
    path: &str,
    profile: &str,
    extra_headers: &[(&str, &str)],
) -> String {
    let mut request = format!("GET {path} HTTP/1.1\r\nHost: {host}\r\n");
    for (name, value) in extra_headers {
        request.push_str(&format!("{name}: {value}\r\n"));
    }
    request.push_str(&format!("Tlsprofile: {profile}\r\nConnection: close\r\n\r\n"));
    request
}
