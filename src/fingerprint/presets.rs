//! Named browser handshake presets.
//!
//! Every preset lists only what the BoringSSL connector can put on the wire,
//! so its JA3N is the one a server observes. TLS 1.3 suites always go out in
//! BoringSSL's fixed order.

use super::client_hello::cert_compression;
use super::client_hello::extension::*;
use super::{ClientHelloSpec, TLS1_2, TLS1_3};

/// Name that resolves to the relay's default browser profile.
pub const DEFAULT_PRESET: &str = "default";

const PRESETS: &[&str] = &[
    DEFAULT_PRESET,
    "chrome_120",
    "chrome_android",
    "edge_120",
    "firefox_121",
    "safari_17",
];

mod cipher {
    pub const TLS_AES_128_GCM_SHA256: u16 = 0x1301;
    pub const TLS_AES_256_GCM_SHA384: u16 = 0x1302;
    pub const TLS_CHACHA20_POLY1305_SHA256: u16 = 0x1303;
    pub const ECDHE_ECDSA_AES128_GCM: u16 = 0xc02b;
    pub const ECDHE_RSA_AES128_GCM: u16 = 0xc02f;
    pub const ECDHE_ECDSA_AES256_GCM: u16 = 0xc02c;
    pub const ECDHE_RSA_AES256_GCM: u16 = 0xc030;
    pub const ECDHE_ECDSA_CHACHA20: u16 = 0xcca9;
    pub const ECDHE_RSA_CHACHA20: u16 = 0xcca8;
    pub const ECDHE_RSA_AES128_SHA: u16 = 0xc013;
    pub const ECDHE_RSA_AES256_SHA: u16 = 0xc014;
    pub const RSA_AES128_GCM: u16 = 0x009c;
    pub const RSA_AES256_GCM: u16 = 0x009d;
    pub const RSA_AES128_SHA: u16 = 0x002f;
    pub const RSA_AES256_SHA: u16 = 0x0035;
}

mod group {
    pub const X25519: u16 = 0x001d;
    pub const SECP256R1: u16 = 0x0017;
    pub const SECP384R1: u16 = 0x0018;
    pub const SECP521R1: u16 = 0x0019;
}

mod sigalg {
    pub const ECDSA_SECP256R1_SHA256: u16 = 0x0403;
    pub const ECDSA_SECP384R1_SHA384: u16 = 0x0503;
    pub const ECDSA_SECP521R1_SHA512: u16 = 0x0603;
    pub const RSA_PSS_RSAE_SHA256: u16 = 0x0804;
    pub const RSA_PSS_RSAE_SHA384: u16 = 0x0805;
    pub const RSA_PSS_RSAE_SHA512: u16 = 0x0806;
    pub const RSA_PKCS1_SHA256: u16 = 0x0401;
    pub const RSA_PKCS1_SHA384: u16 = 0x0501;
    pub const RSA_PKCS1_SHA512: u16 = 0x0601;
    pub const ED25519: u16 = 0x0807;
}

pub fn preset_names() -> &'static [&'static str] {
    PRESETS
}

/// Looks up a preset by name, case-insensitively.
pub fn preset(name: &str) -> Option<ClientHelloSpec> {
    let spec = match name.trim().to_ascii_lowercase().as_str() {
        DEFAULT_PRESET | "chrome_120" => chrome_120(),
        "chrome_android" => chrome_android(),
        "edge_120" => ClientHelloSpec {
            name: "edge_120".into(),
            ..chrome_120()
        },
        "firefox_121" => firefox_121(),
        "safari_17" => safari_17(),
        _ => return None,
    };
    Some(spec)
}

fn h2_alpn() -> Vec<String> {
    vec!["h2".to_string(), "http/1.1".to_string()]
}

fn chrome_120() -> ClientHelloSpec {
    use cipher::*;
    use group::*;
    use sigalg::*;

    ClientHelloSpec {
        name: "chrome_120".into(),
        cipher_suites: vec![
            TLS_AES_128_GCM_SHA256,
            TLS_AES_256_GCM_SHA384,
            TLS_CHACHA20_POLY1305_SHA256,
            ECDHE_ECDSA_AES128_GCM,
            ECDHE_RSA_AES128_GCM,
            ECDHE_ECDSA_AES256_GCM,
            ECDHE_RSA_AES256_GCM,
            ECDHE_ECDSA_CHACHA20,
            ECDHE_RSA_CHACHA20,
            ECDHE_RSA_AES128_SHA,
            ECDHE_RSA_AES256_SHA,
            RSA_AES128_GCM,
            RSA_AES256_GCM,
            RSA_AES128_SHA,
            RSA_AES256_SHA,
        ],
        extensions: vec![
            SERVER_NAME,
            EXTENDED_MASTER_SECRET,
            RENEGOTIATION_INFO,
            SUPPORTED_GROUPS,
            EC_POINT_FORMATS,
            SESSION_TICKET,
            ALPN,
            STATUS_REQUEST,
            SIGNATURE_ALGORITHMS,
            SIGNED_CERTIFICATE_TIMESTAMP,
            KEY_SHARE,
            PSK_KEY_EXCHANGE_MODES,
            SUPPORTED_VERSIONS,
            COMPRESS_CERTIFICATE,
        ],
        supported_groups: vec![X25519, SECP256R1, SECP384R1],
        signature_algorithms: vec![
            ECDSA_SECP256R1_SHA256,
            RSA_PSS_RSAE_SHA256,
            RSA_PKCS1_SHA256,
            ECDSA_SECP384R1_SHA384,
            RSA_PSS_RSAE_SHA384,
            RSA_PKCS1_SHA384,
            RSA_PSS_RSAE_SHA512,
            RSA_PKCS1_SHA512,
        ],
        ec_point_formats: vec![0],
        alpn_protocols: h2_alpn(),
        min_version: TLS1_2,
        max_version: TLS1_3,
        grease: true,
        certificate_compression: vec![cert_compression::BROTLI],
        permute_extensions: true,
    }
}

fn chrome_android() -> ClientHelloSpec {
    use sigalg::*;

    let base = chrome_120();
    ClientHelloSpec {
        name: "chrome_android".into(),
        cipher_suites: base.cipher_suites[..9].to_vec(),
        extensions: base
            .extensions
            .iter()
            .copied()
            .filter(|e| *e != SIGNED_CERTIFICATE_TIMESTAMP)
            .collect(),
        signature_algorithms: vec![
            ECDSA_SECP256R1_SHA256,
            RSA_PSS_RSAE_SHA256,
            RSA_PKCS1_SHA256,
            ECDSA_SECP384R1_SHA384,
            RSA_PSS_RSAE_SHA384,
            RSA_PKCS1_SHA384,
        ],
        ..base
    }
}

fn firefox_121() -> ClientHelloSpec {
    use cipher::*;
    use group::*;
    use sigalg::*;

    ClientHelloSpec {
        name: "firefox_121".into(),
        cipher_suites: vec![
            TLS_AES_128_GCM_SHA256,
            TLS_AES_256_GCM_SHA384,
            TLS_CHACHA20_POLY1305_SHA256,
            ECDHE_ECDSA_AES128_GCM,
            ECDHE_RSA_AES128_GCM,
            ECDHE_ECDSA_CHACHA20,
            ECDHE_RSA_CHACHA20,
            ECDHE_ECDSA_AES256_GCM,
            ECDHE_RSA_AES256_GCM,
            ECDHE_RSA_AES128_SHA,
            ECDHE_RSA_AES256_SHA,
            RSA_AES128_GCM,
            RSA_AES256_GCM,
            RSA_AES128_SHA,
            RSA_AES256_SHA,
        ],
        extensions: vec![
            SERVER_NAME,
            EXTENDED_MASTER_SECRET,
            RENEGOTIATION_INFO,
            SUPPORTED_GROUPS,
            EC_POINT_FORMATS,
            SESSION_TICKET,
            ALPN,
            STATUS_REQUEST,
            KEY_SHARE,
            SUPPORTED_VERSIONS,
            SIGNATURE_ALGORITHMS,
            PSK_KEY_EXCHANGE_MODES,
        ],
        supported_groups: vec![X25519, SECP256R1, SECP384R1, SECP521R1],
        signature_algorithms: vec![
            ECDSA_SECP256R1_SHA256,
            ECDSA_SECP384R1_SHA384,
            ECDSA_SECP521R1_SHA512,
            RSA_PSS_RSAE_SHA256,
            RSA_PSS_RSAE_SHA384,
            RSA_PSS_RSAE_SHA512,
            RSA_PKCS1_SHA256,
            RSA_PKCS1_SHA384,
            RSA_PKCS1_SHA512,
            ED25519,
        ],
        ec_point_formats: vec![0],
        alpn_protocols: h2_alpn(),
        min_version: TLS1_2,
        max_version: TLS1_3,
        grease: false,
        certificate_compression: Vec::new(),
        permute_extensions: false,
    }
}

fn safari_17() -> ClientHelloSpec {
    use cipher::*;
    use group::*;
    use sigalg::*;

    ClientHelloSpec {
        name: "safari_17".into(),
        cipher_suites: vec![
            TLS_AES_128_GCM_SHA256,
            TLS_AES_256_GCM_SHA384,
            TLS_CHACHA20_POLY1305_SHA256,
            ECDHE_ECDSA_AES256_GCM,
            ECDHE_ECDSA_AES128_GCM,
            ECDHE_ECDSA_CHACHA20,
            ECDHE_RSA_AES256_GCM,
            ECDHE_RSA_AES128_GCM,
            ECDHE_RSA_CHACHA20,
            RSA_AES256_GCM,
            RSA_AES128_GCM,
        ],
        extensions: vec![
            SERVER_NAME,
            EXTENDED_MASTER_SECRET,
            RENEGOTIATION_INFO,
            SUPPORTED_GROUPS,
            EC_POINT_FORMATS,
            ALPN,
            STATUS_REQUEST,
            SIGNATURE_ALGORITHMS,
            SIGNED_CERTIFICATE_TIMESTAMP,
            KEY_SHARE,
            PSK_KEY_EXCHANGE_MODES,
            SUPPORTED_VERSIONS,
        ],
        supported_groups: vec![X25519, SECP256R1, SECP384R1, SECP521R1],
        signature_algorithms: vec![
            ECDSA_SECP256R1_SHA256,
            ECDSA_SECP384R1_SHA384,
            ECDSA_SECP521R1_SHA512,
            RSA_PSS_RSAE_SHA256,
            RSA_PSS_RSAE_SHA384,
            RSA_PSS_RSAE_SHA512,
            RSA_PKCS1_SHA256,
            RSA_PKCS1_SHA384,
            RSA_PKCS1_SHA512,
        ],
        ec_point_formats: vec![0],
        alpn_protocols: h2_alpn(),
        min_version: TLS1_2,
        max_version: TLS1_3,
        grease: false,
        certificate_compression: Vec::new(),
        permute_extensions: false,
    }
}
