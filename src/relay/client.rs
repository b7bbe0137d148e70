//! Fingerprint-shaped HTTPS client
//!
//! Maps a [`ClientHelloSpec`] onto a BoringSSL connector. [`wire_spec`]
//! narrows a requested spec to what BoringSSL will actually emit, and that
//! narrowed spec is what gets configured and logged. BoringSSL picks the
//! extension order itself, so only the set of extensions is reproduced.

use super::{BoxError, ResponseBody, Transport, TransportFactory};
use crate::error::{ClientBuildError, UpstreamError};
use crate::fingerprint::client_hello::{cert_compression, extension};
use crate::fingerprint::{preset, ClientHello, ClientHelloSpec, TLS1_3};
use crate::profile::{ResolvedFingerprint, TransportProfile};
use async_trait::async_trait;
use boring::ssl::{
    CertificateCompressionAlgorithm, CertificateCompressor, SslConnector, SslMethod, SslOptions,
    SslVerifyMode, SslVersion,
};
use bytes::Bytes;
use http::uri::{Authority, PathAndQuery, Scheme};
use http::{header, Request, Response, Uri, Version};
use http_body_util::{BodyExt, Full};
use hyper_util::rt::{TokioExecutor, TokioIo};
use std::io::{Read, Write};
use std::net::IpAddr;
use std::sync::Arc;
use tokio::net::TcpStream;

const HTTPS_PORT: u16 = 443;

/// BoringSSL always offers these in this order when AES hardware is present.
const TLS13_SUITES: [u16; 3] = [0x1301, 0x1302, 0x1303];

/// Extensions the connector can emit, in the order they are appended when a
/// spec does not list them itself.
const SENDABLE_EXTENSIONS: [u16; 14] = [
    extension::SERVER_NAME,
    extension::EXTENDED_MASTER_SECRET,
    extension::RENEGOTIATION_INFO,
    extension::SUPPORTED_GROUPS,
    extension::EC_POINT_FORMATS,
    extension::SESSION_TICKET,
    extension::ALPN,
    extension::STATUS_REQUEST,
    extension::SIGNATURE_ALGORITHMS,
    extension::SIGNED_CERTIFICATE_TIMESTAMP,
    extension::KEY_SHARE,
    extension::PSK_KEY_EXCHANGE_MODES,
    extension::SUPPORTED_VERSIONS,
    extension::COMPRESS_CERTIFICATE,
];

const FALLBACK_GROUPS: [u16; 3] = [0x001d, 0x0017, 0x0018];
const FALLBACK_SIGALGS: [u16; 8] = [0x0403, 0x0804, 0x0401, 0x0503, 0x0805, 0x0501, 0x0806, 0x0601];
const FALLBACK_TLS12_SUITES: [u16; 4] = [0xc02b, 0xc02f, 0xc02c, 0xc030];

/// Resolves a fingerprint into concrete handshake parameters.
pub fn client_hello_spec(fingerprint: &ResolvedFingerprint) -> Result<ClientHelloSpec, ClientBuildError> {
    match fingerprint {
        ResolvedFingerprint::Preset(name) => {
            preset(name).ok_or_else(|| ClientBuildError::UnknownPreset(name.clone()))
        }
        ResolvedFingerprint::RawClientHello(raw) => {
            let hello = ClientHello::from_hex(raw).map_err(|e| match e {
                crate::fingerprint::ClientHelloError::InvalidHex(reason) => ClientBuildError::InvalidHex(reason),
                other => ClientBuildError::MalformedClientHello(other.to_string()),
            })?;
            Ok(ClientHelloSpec::from_client_hello("raw", &hello))
        }
        ResolvedFingerprint::Captured(captured) => {
            let hello = ClientHello::from_hex(&captured.client_hello_hex)
                .map_err(|e| ClientBuildError::MalformedClientHello(e.to_string()))?;
            Ok(ClientHelloSpec::from_client_hello("captured", &hello))
        }
    }
}

/// The handshake BoringSSL emits when configured from `spec`.
///
/// Values without a BoringSSL name are dropped, extensions BoringSSL adds for
/// the version range are appended, and the TLS 1.3 suites take BoringSSL's
/// fixed order. Padding depends on the final hello length and is never listed.
pub fn wire_spec(spec: &ClientHelloSpec) -> ClientHelloSpec {
    let tls13 = spec.max_version >= TLS1_3;
    let mut tls12_suites = known(&spec.cipher_suites, cipher_name);
    let mut min_version = spec.min_version;
    if tls12_suites.is_empty() {
        if tls13 {
            min_version = TLS1_3;
        } else {
            tls12_suites = FALLBACK_TLS12_SUITES.to_vec();
        }
    }
    let tls12 = min_version < TLS1_3;

    let mut cipher_suites = Vec::new();
    if tls13 {
        cipher_suites.extend_from_slice(&TLS13_SUITES);
    }
    if tls12 {
        cipher_suites.extend(tls12_suites);
    }

    let mut supported_groups = known(&spec.supported_groups, group_name);
    if supported_groups.is_empty() {
        supported_groups = FALLBACK_GROUPS.to_vec();
    }
    let mut signature_algorithms = known(&spec.signature_algorithms, sigalg_name);
    if signature_algorithms.is_empty() {
        signature_algorithms = FALLBACK_SIGALGS.to_vec();
    }

    let mut certificate_compression: Vec<u16> = Vec::new();
    for &alg in &spec.certificate_compression {
        let supported = matches!(alg, cert_compression::ZLIB | cert_compression::BROTLI);
        if supported && !certificate_compression.contains(&alg) {
            certificate_compression.push(alg);
        }
    }

    let emitted = |ext: u16| match ext {
        extension::SERVER_NAME | extension::STATUS_REQUEST | extension::SIGNED_CERTIFICATE_TIMESTAMP => {
            spec.offers_extension(ext)
        }
        extension::SESSION_TICKET => tls12 && spec.offers_extension(ext),
        extension::EXTENDED_MASTER_SECRET | extension::RENEGOTIATION_INFO | extension::EC_POINT_FORMATS => tls12,
        extension::SUPPORTED_GROUPS | extension::SIGNATURE_ALGORITHMS => true,
        extension::ALPN => !spec.alpn_protocols.is_empty(),
        extension::KEY_SHARE | extension::PSK_KEY_EXCHANGE_MODES | extension::SUPPORTED_VERSIONS => tls13,
        extension::COMPRESS_CERTIFICATE => !certificate_compression.is_empty(),
        _ => false,
    };
    let mut extensions: Vec<u16> = Vec::new();
    for &ext in spec.extensions.iter().chain(SENDABLE_EXTENSIONS.iter()) {
        if emitted(ext) && !extensions.contains(&ext) {
            extensions.push(ext);
        }
    }

    ClientHelloSpec {
        name: spec.name.clone(),
        cipher_suites,
        extensions,
        supported_groups,
        signature_algorithms,
        ec_point_formats: if tls12 { vec![0] } else { Vec::new() },
        alpn_protocols: spec.alpn_protocols.clone(),
        min_version,
        max_version: spec.max_version,
        grease: spec.grease,
        certificate_compression,
        permute_extensions: spec.permute_extensions,
    }
}

/// Builds BoringSSL-backed transports.
#[derive(Debug, Clone)]
pub struct MimicTransportFactory {
    verify_certificates: bool,
}

impl MimicTransportFactory {
    pub fn new(verify_certificates: bool) -> Self {
        Self { verify_certificates }
    }

    /// Configures a connector that emits exactly `spec`, which should come
    /// from [`wire_spec`].
    fn connector(&self, spec: &ClientHelloSpec) -> Result<SslConnector, ClientBuildError> {
        let mut builder = SslConnector::builder(SslMethod::tls())?;

        builder.set_min_proto_version(ssl_version(spec.min_version))?;
        builder.set_max_proto_version(ssl_version(spec.max_version))?;

        if !self.verify_certificates {
            builder.set_verify(SslVerifyMode::NONE);
        }

        // TLS 1.3 suites are fixed in BoringSSL, only the 1.2 order is settable
        let ciphers = names(&spec.cipher_suites, cipher_name);
        if !ciphers.is_empty() {
            builder.set_cipher_list(&ciphers)?;
        }
        builder.set_curves_list(&names(&spec.supported_groups, group_name))?;
        builder.set_sigalgs_list(&names(&spec.signature_algorithms, sigalg_name))?;

        if !spec.alpn_protocols.is_empty() {
            builder.set_alpn_protos(&alpn_wire(&spec.alpn_protocols))?;
        }

        builder.set_grease_enabled(spec.grease);
        builder.set_permute_extensions(spec.permute_extensions);
        if spec.offers_extension(extension::STATUS_REQUEST) {
            builder.enable_ocsp_stapling();
        }
        if spec.offers_extension(extension::SIGNED_CERTIFICATE_TIMESTAMP) {
            builder.enable_signed_cert_timestamps();
        }
        if spec.offers_extension(extension::SESSION_TICKET) {
            builder.clear_options(SslOptions::NO_TICKET);
        } else {
            builder.set_options(SslOptions::NO_TICKET);
        }

        for &alg in &spec.certificate_compression {
            match alg {
                cert_compression::BROTLI => builder.add_certificate_compression_algorithm(BrotliCertificates)?,
                cert_compression::ZLIB => builder.add_certificate_compression_algorithm(ZlibCertificates)?,
                _ => {}
            }
        }

        Ok(builder.build())
    }
}

impl TransportFactory for MimicTransportFactory {
    fn build(
        &self,
        fingerprint: &ResolvedFingerprint,
        profile: &TransportProfile,
    ) -> Result<Arc<dyn Transport>, ClientBuildError> {
        let requested = client_hello_spec(fingerprint)?;
        let mut spec = wire_spec(&requested);
        if spec.ja3n_string() != requested.ja3n_string() {
            tracing::warn!(
                fingerprint = %requested.name,
                requested = %requested.ja3n_string(),
                emitted = %spec.ja3n_string(),
                "Handshake cannot be reproduced exactly, sending the closest BoringSSL hello"
            );
        }
        let connector = self.connector(&spec)?;

        let authority: Authority = profile
            .host
            .parse()
            .map_err(|e: http::uri::InvalidUri| ClientBuildError::Tls(e.to_string()))?;
        let host = authority
            .host()
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();

        // No server_name is sent for IP literals
        if host.parse::<IpAddr>().is_ok() {
            spec.extensions.retain(|e| *e != extension::SERVER_NAME);
        }

        tracing::debug!(host = %host, fingerprint = %spec.name, ja3n = %spec.ja3n_string(), "Built mimicking client");

        Ok(Arc::new(MimicTransport {
            connector,
            port: authority.port_u16().unwrap_or(HTTPS_PORT),
            host,
            sni: spec.offers_extension(extension::SERVER_NAME),
            verify_certificates: self.verify_certificates,
        }))
    }
}

struct MimicTransport {
    connector: SslConnector,
    host: String,
    port: u16,
    sni: bool,
    verify_certificates: bool,
}

#[async_trait]
impl Transport for MimicTransport {
    async fn send(&self, req: Request<Full<Bytes>>) -> Result<Response<ResponseBody>, UpstreamError> {
        let addr = format!("{}:{}", self.host, self.port);
        let tcp = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(|e| UpstreamError::Connect {
                addr: addr.clone(),
                reason: e.to_string(),
            })?;
        if let Err(e) = tcp.set_nodelay(true) {
            tracing::debug!(upstream = %addr, error = %e, "Failed to set TCP_NODELAY on upstream socket");
        }

        let handshake_err = |reason: String| UpstreamError::Handshake {
            host: self.host.clone(),
            reason,
        };

        let mut config = self
            .connector
            .configure()
            .map_err(|e| handshake_err(e.to_string()))?;
        config.set_verify_hostname(self.verify_certificates);
        config.set_use_server_name_indication(self.sni);

        let tls = tokio_boring::connect(config, &self.host, tcp)
            .await
            .map_err(|e| handshake_err(e.to_string()))?;

        let h2 = tls.ssl().selected_alpn_protocol() == Some(b"h2".as_slice());
        tracing::debug!(upstream = %addr, h2, "Upstream handshake complete");

        let io = TokioIo::new(tls);
        let response = if h2 {
            let (mut sender, conn) = hyper::client::conn::http2::handshake(TokioExecutor::new(), io)
                .await
                .map_err(|e| UpstreamError::Http(e.to_string()))?;
            tokio::spawn(async move {
                if let Err(e) = conn.await {
                    tracing::debug!(error = %e, "Upstream HTTP/2 connection closed");
                }
            });
            sender
                .send_request(into_h2(req)?)
                .await
                .map_err(|e| UpstreamError::Http(e.to_string()))?
        } else {
            let (mut sender, conn) = hyper::client::conn::http1::Builder::new()
                .preserve_header_case(true)
                .title_case_headers(true)
                .handshake(io)
                .await
                .map_err(|e| UpstreamError::Http(e.to_string()))?;
            tokio::spawn(async move {
                if let Err(e) = conn.await {
                    tracing::debug!(error = %e, "Upstream HTTP/1.1 connection closed");
                }
            });
            sender
                .send_request(into_h1(req)?)
                .await
                .map_err(|e| UpstreamError::Http(e.to_string()))?
        };

        Ok(response.map(|body| body.map_err(|e| Box::new(e) as BoxError).boxed_unsync()))
    }
}

/// HTTP/2 carries the authority in the pseudo-header, not in Host. The
/// inbound Host value becomes the `:authority`.
fn into_h2(mut req: Request<Full<Bytes>>) -> Result<Request<Full<Bytes>>, UpstreamError> {
    if let Some(host) = req.headers_mut().remove(header::HOST) {
        let authority = Authority::try_from(host.as_bytes())
            .map_err(|e| UpstreamError::InvalidRequest(format!("invalid Host header: {e}")))?;
        let mut parts = req.uri().clone().into_parts();
        parts.scheme.get_or_insert(Scheme::HTTPS);
        parts.authority = Some(authority);
        parts
            .path_and_query
            .get_or_insert_with(|| PathAndQuery::from_static("/"));
        *req.uri_mut() = Uri::from_parts(parts).map_err(|e| UpstreamError::InvalidRequest(e.to_string()))?;
    }
    *req.version_mut() = Version::HTTP_2;
    Ok(req)
}

/// HTTP/1.1 request lines use origin-form.
fn into_h1(mut req: Request<Full<Bytes>>) -> Result<Request<Full<Bytes>>, UpstreamError> {
    let path = req
        .uri()
        .path_and_query()
        .cloned()
        .unwrap_or_else(|| PathAndQuery::from_static("/"));
    *req.uri_mut() = Uri::builder()
        .path_and_query(path)
        .build()
        .map_err(|e| UpstreamError::InvalidRequest(e.to_string()))?;
    *req.version_mut() = Version::HTTP_11;
    Ok(req)
}

fn ssl_version(version: u16) -> Option<SslVersion> {
    match version {
        0x0301 => Some(SslVersion::TLS1),
        0x0302 => Some(SslVersion::TLS1_1),
        0x0303 => Some(SslVersion::TLS1_2),
        0x0304 => Some(SslVersion::TLS1_3),
        _ => None,
    }
}

fn names(ids: &[u16], lookup: fn(u16) -> Option<&'static str>) -> String {
    ids.iter().filter_map(|&id| lookup(id)).collect::<Vec<_>>().join(":")
}

fn known(ids: &[u16], lookup: fn(u16) -> Option<&'static str>) -> Vec<u16> {
    let mut kept: Vec<u16> = Vec::new();
    for &id in ids {
        if lookup(id).is_some() && !kept.contains(&id) {
            kept.push(id);
        }
    }
    kept
}

/// Accepts brotli-compressed server certificates.
struct BrotliCertificates;

impl CertificateCompressor for BrotliCertificates {
    const ALGORITHM: CertificateCompressionAlgorithm = CertificateCompressionAlgorithm::BROTLI;
    const CAN_COMPRESS: bool = false;
    const CAN_DECOMPRESS: bool = true;

    fn decompress<W>(&self, input: &[u8], output: &mut W) -> std::io::Result<()>
    where
        W: Write,
    {
        let mut decoded = Vec::new();
        brotli::Decompressor::new(input, 4096).read_to_end(&mut decoded)?;
        output.write_all(&decoded)
    }
}

/// Accepts zlib-compressed server certificates.
struct ZlibCertificates;

impl CertificateCompressor for ZlibCertificates {
    const ALGORITHM: CertificateCompressionAlgorithm = CertificateCompressionAlgorithm::ZLIB;
    const CAN_COMPRESS: bool = false;
    const CAN_DECOMPRESS: bool = true;

    fn decompress<W>(&self, input: &[u8], output: &mut W) -> std::io::Result<()>
    where
        W: Write,
    {
        let mut decoded = Vec::new();
        flate2::read::ZlibDecoder::new(input).read_to_end(&mut decoded)?;
        output.write_all(&decoded)
    }
}

fn alpn_wire(protocols: &[String]) -> Vec<u8> {
    let mut wire = Vec::new();
    for proto in protocols {
        let bytes = proto.as_bytes();
        wire.push(bytes.len() as u8);
        wire.extend_from_slice(bytes);
    }
    wire
}

fn cipher_name(suite: u16) -> Option<&'static str> {
    match suite {
        0xc02b => Some("ECDHE-ECDSA-AES128-GCM-SHA256"),
        0xc02f => Some("ECDHE-RSA-AES128-GCM-SHA256"),
        0xc02c => Some("ECDHE-ECDSA-AES256-GCM-SHA384"),
        0xc030 => Some("ECDHE-RSA-AES256-GCM-SHA384"),
        0xcca9 => Some("ECDHE-ECDSA-CHACHA20-POLY1305"),
        0xcca8 => Some("ECDHE-RSA-CHACHA20-POLY1305"),
        0xc009 => Some("ECDHE-ECDSA-AES128-SHA"),
        0xc00a => Some("ECDHE-ECDSA-AES256-SHA"),
        0xc013 => Some("ECDHE-RSA-AES128-SHA"),
        0xc014 => Some("ECDHE-RSA-AES256-SHA"),
        0x009c => Some("AES128-GCM-SHA256"),
        0x009d => Some("AES256-GCM-SHA384"),
        0x002f => Some("AES128-SHA"),
        0x0035 => Some("AES256-SHA"),
        _ => None,
    }
}

fn group_name(group: u16) -> Option<&'static str> {
    match group {
        0x001d => Some("X25519"),
        0x0017 => Some("P-256"),
        0x0018 => Some("P-384"),
        0x0019 => Some("P-521"),
        0x6399 => Some("X25519Kyber768Draft00"),
        _ => None,
    }
}

fn sigalg_name(alg: u16) -> Option<&'static str> {
    match alg {
        0x0403 => Some("ECDSA+SHA256"),
        0x0503 => Some("ECDSA+SHA384"),
        0x0603 => Some("ECDSA+SHA512"),
        0x0804 => Some("RSA-PSS+SHA256"),
        0x0805 => Some("RSA-PSS+SHA384"),
        0x0806 => Some("RSA-PSS+SHA512"),
        0x0401 => Some("RSA+SHA256"),
        0x0501 => Some("RSA+SHA384"),
        0x0601 => Some("RSA+SHA512"),
        0x0807 => Some("ed25519"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::CapturedFingerprint;
    use crate::config::ProfileDefaults;
    use crate::fingerprint::client_hello::reassemble_records;
    use crate::fingerprint::client_hello::tests::reference_hello;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    fn profile() -> TransportProfile {
        TransportProfile::template("example.com", &ProfileDefaults::default())
    }

    #[test]
    fn test_spec_from_preset() {
        let spec = client_hello_spec(&ResolvedFingerprint::Preset("default".into())).unwrap();
        assert_eq!(spec.name, "chrome_120");

        let err = client_hello_spec(&ResolvedFingerprint::Preset("netscape_4".into())).unwrap_err();
        assert!(matches!(err, ClientBuildError::UnknownPreset(name) if name == "netscape_4"));
    }

    #[test]
    fn test_spec_from_raw_hello() {
        let raw = hex::encode(reference_hello());
        let spec = client_hello_spec(&ResolvedFingerprint::RawClientHello(raw)).unwrap();
        assert_eq!(spec.cipher_suites, vec![0x1301, 0x1302, 0xc02b, 0xc02f]);
        assert!(spec.grease);

        let err = client_hello_spec(&ResolvedFingerprint::RawClientHello("zz".into())).unwrap_err();
        assert!(matches!(err, ClientBuildError::InvalidHex(_)));

        let err = client_hello_spec(&ResolvedFingerprint::RawClientHello("160301".into())).unwrap_err();
        assert!(matches!(err, ClientBuildError::MalformedClientHello(_)));
    }

    #[test]
    fn test_spec_from_captured() {
        let hello = ClientHello::parse(&reference_hello()).unwrap();
        let captured = Arc::new(CapturedFingerprint::from_client_hello(&hello));
        let spec = client_hello_spec(&ResolvedFingerprint::Captured(captured.clone())).unwrap();
        assert_eq!(spec.ja3_string(), captured.ja3);
    }

    #[test]
    fn test_factory_builds_every_preset() {
        let factory = MimicTransportFactory::new(true);
        for name in crate::fingerprint::preset_names() {
            factory
                .build(&ResolvedFingerprint::Preset(name.to_string()), &profile())
                .unwrap_or_else(|e| panic!("preset {name} failed: {e}"));
        }
    }

    #[test]
    fn test_name_tables_skip_unknown_ids() {
        assert_eq!(names(&[0xc02b, 0x1301, 0xc02f], cipher_name), "ECDHE-ECDSA-AES128-GCM-SHA256:ECDHE-RSA-AES128-GCM-SHA256");
        assert_eq!(names(&[0x001d, 0x0100], group_name), "X25519");
        assert_eq!(alpn_wire(&["h2".into(), "http/1.1".into()]), b"\x02h2\x08http/1.1".to_vec());
    }

    #[test]
    fn test_h1_request_uses_origin_form() {
        let req = Request::builder()
            .uri("https://example.com/search?q=1")
            .body(Full::new(Bytes::new()))
            .unwrap();
        let req = into_h1(req).unwrap();
        assert_eq!(req.uri().to_string(), "/search?q=1");
        assert_eq!(req.version(), Version::HTTP_11);
    }

    #[test]
    fn test_h2_request_drops_host() {
        let req = Request::builder()
            .uri("https://example.com/")
            .header(header::HOST, "example.com")
            .body(Full::new(Bytes::new()))
            .unwrap();
        let req = into_h2(req).unwrap();
        assert!(req.headers().get(header::HOST).is_none());
        assert_eq!(req.uri().authority().map(|a| a.as_str()), Some("example.com"));
        assert_eq!(req.version(), Version::HTTP_2);
    }

    #[test]
    fn test_h2_request_takes_authority_from_host() {
        let req = Request::builder()
            .uri("https://example.com/feed?page=2")
            .header(header::HOST, "api.example.com:8443")
            .body(Full::new(Bytes::new()))
            .unwrap();
        let req = into_h2(req).unwrap();
        assert_eq!(req.uri().to_string(), "https://api.example.com:8443/feed?page=2");
        assert!(req.headers().get(header::HOST).is_none());

        let req = Request::builder()
            .uri("https://example.com/")
            .header(header::HOST, "bad host")
            .body(Full::new(Bytes::new()))
            .unwrap();
        assert!(matches!(into_h2(req), Err(UpstreamError::InvalidRequest(_))));
    }

    #[test]
    fn test_presets_are_emitted_unchanged() {
        for name in crate::fingerprint::preset_names() {
            let spec = preset(name).unwrap();
            assert_eq!(wire_spec(&spec), spec, "preset {name} lists something BoringSSL cannot send");
        }
    }

    #[test]
    fn test_wire_spec_drops_what_cannot_be_sent() {
        let mut requested = preset("firefox_121").unwrap();
        requested.cipher_suites = vec![0x1303, 0x1301, 0x1302, 0xc02b, 0x000a, 0xc02b];
        requested.supported_groups.push(0x0100);
        requested.extensions.push(0x4469);
        requested.extensions.push(0x0022);
        requested.extensions.push(extension::PADDING);
        requested.certificate_compression = vec![cert_compression::ZSTD, cert_compression::BROTLI];

        let wire = wire_spec(&requested);
        assert_eq!(wire.cipher_suites, vec![0x1301, 0x1302, 0x1303, 0xc02b]);
        assert_eq!(wire.supported_groups, vec![0x001d, 0x0017, 0x0018, 0x0019]);
        assert!(!wire.offers_extension(0x4469));
        assert!(!wire.offers_extension(0x0022));
        assert!(!wire.offers_extension(extension::PADDING));
        assert_eq!(wire.certificate_compression, vec![cert_compression::BROTLI]);
        assert_eq!(wire.extensions.last(), Some(&extension::COMPRESS_CERTIFICATE));
        assert_ne!(wire.ja3n_string(), requested.ja3n_string());
    }

    #[test]
    fn test_wire_spec_for_tls13_only() {
        let mut requested = preset("chrome_120").unwrap();
        requested.min_version = TLS1_3;
        let wire = wire_spec(&requested);

        assert_eq!(wire.cipher_suites, TLS13_SUITES.to_vec());
        assert!(wire.ec_point_formats.is_empty());
        for ext in [
            extension::EXTENDED_MASTER_SECRET,
            extension::RENEGOTIATION_INFO,
            extension::EC_POINT_FORMATS,
            extension::SESSION_TICKET,
        ] {
            assert!(!wire.offers_extension(ext), "extension {ext} is TLS 1.2 only");
        }
        assert!(wire.offers_extension(extension::KEY_SHARE));

        // No TLS 1.2 suite BoringSSL knows: the range narrows to 1.3
        let mut requested = preset("safari_17").unwrap();
        requested.cipher_suites.retain(|s| TLS13_SUITES.contains(s));
        assert_eq!(wire_spec(&requested).min_version, TLS1_3);
    }

    /// Runs the connector against a silent listener and parses what it sent.
    async fn first_client_hello(spec: &ClientHelloSpec) -> ClientHello {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connector = MimicTransportFactory::new(false).connector(spec).unwrap();
        let sni = spec.offers_extension(extension::SERVER_NAME);

        let client = tokio::spawn(async move {
            let tcp = TcpStream::connect(addr).await.unwrap();
            let mut config = connector.configure().unwrap();
            config.set_verify_hostname(false);
            config.set_use_server_name_indication(sni);
            let _ = tokio_boring::connect(config, "localhost", tcp).await;
        });

        let (mut stream, _) = listener.accept().await.unwrap();
        let mut received = Vec::new();
        let mut chunk = [0u8; 4096];
        let message = loop {
            if let Some(message) = reassemble_records(&received).unwrap() {
                break message;
            }
            let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut chunk))
                .await
                .expect("client stalled before finishing its hello")
                .unwrap();
            assert!(n > 0, "client closed before sending a ClientHello");
            received.extend_from_slice(&chunk[..n]);
        };
        drop(stream);
        client.abort();
        ClientHello::parse_message(&message).unwrap()
    }

    /// TLS 1.3 suites as a set (their order follows the CPU), then the rest in order.
    fn suites(ids: &[u16]) -> (Vec<u16>, Vec<u16>) {
        let (mut tls13, rest): (Vec<u16>, Vec<u16>) = ids.iter().copied().partition(|id| TLS13_SUITES.contains(id));
        tls13.sort_unstable();
        (tls13, rest)
    }

    fn extension_set(ids: &[u16]) -> Vec<u16> {
        let mut set: Vec<u16> = ids.iter().copied().filter(|e| *e != extension::PADDING).collect();
        set.sort_unstable();
        set
    }

    #[tokio::test]
    async fn test_emitted_hello_matches_every_preset() {
        for name in crate::fingerprint::preset_names() {
            let expected = wire_spec(&preset(name).unwrap());
            let hello = first_client_hello(&expected).await;
            let seen = ClientHelloSpec::from_client_hello("wire", &hello);

            assert_eq!(suites(&seen.cipher_suites), suites(&expected.cipher_suites), "{name} ciphers");
            assert_eq!(extension_set(&seen.extensions), extension_set(&expected.extensions), "{name} extensions");
            assert_eq!(seen.supported_groups, expected.supported_groups, "{name} groups");
            assert_eq!(seen.signature_algorithms, expected.signature_algorithms, "{name} sigalgs");
            assert_eq!(seen.ec_point_formats, expected.ec_point_formats, "{name} point formats");
            assert_eq!(seen.alpn_protocols, expected.alpn_protocols, "{name} alpn");
            assert_eq!(
                (seen.min_version, seen.max_version),
                (expected.min_version, expected.max_version),
                "{name} versions"
            );
            assert_eq!(seen.grease, expected.grease, "{name} grease");
            assert_eq!(seen.certificate_compression, expected.certificate_compression, "{name} compression");
            assert_eq!(hello.server_name.as_deref(), Some("localhost"));
        }
    }
}
