//! ClientHello fingerprints
//!
//! A [`ClientHelloSpec`] describes the handshake the outbound client should
//! present. It is built either from a named browser preset or from a raw
//! ClientHello captured on the wire.

pub mod client_hello;
pub mod presets;

pub use client_hello::{is_grease, ClientHello, ClientHelloError};
pub use presets::{preset, preset_names, DEFAULT_PRESET};

pub const TLS1_2: u16 = 0x0303;
pub const TLS1_3: u16 = 0x0304;

/// Handshake shaping parameters for one outbound connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHelloSpec {
    pub name: String,
    /// Cipher suites in offer order, GREASE removed.
    pub cipher_suites: Vec<u16>,
    /// Extension types in wire order, GREASE removed.
    pub extensions: Vec<u16>,
    pub supported_groups: Vec<u16>,
    pub signature_algorithms: Vec<u16>,
    pub ec_point_formats: Vec<u8>,
    pub alpn_protocols: Vec<String>,
    pub min_version: u16,
    pub max_version: u16,
    pub grease: bool,
    /// compress_certificate algorithms in offer order
    pub certificate_compression: Vec<u16>,
    /// Shuffle the extension order per connection, as Chrome does
    pub permute_extensions: bool,
}

impl ClientHelloSpec {
    pub fn from_client_hello(name: impl Into<String>, hello: &ClientHello) -> Self {
        let strip = |values: &[u16]| values.iter().copied().filter(|v| !is_grease(*v)).collect::<Vec<_>>();

        let versions = strip(&hello.supported_versions);
        let (min_version, max_version) = match (versions.iter().min(), versions.iter().max()) {
            (Some(&min), Some(&max)) => (min, max),
            _ => (hello.legacy_version, hello.legacy_version),
        };

        Self {
            name: name.into(),
            cipher_suites: strip(&hello.cipher_suites),
            extensions: strip(&hello.extensions),
            supported_groups: strip(&hello.supported_groups),
            signature_algorithms: hello.signature_algorithms.clone(),
            ec_point_formats: hello.ec_point_formats.clone(),
            alpn_protocols: hello.alpn_protocols.clone(),
            min_version,
            max_version,
            grease: hello.has_grease(),
            certificate_compression: hello.certificate_compression.clone(),
            permute_extensions: false,
        }
    }

    pub fn offers_extension(&self, ext: u16) -> bool {
        self.extensions.contains(&ext)
    }

    pub fn ja3_string(&self) -> String {
        client_hello::ja3_string(
            TLS1_2.min(self.max_version),
            &self.cipher_suites,
            &self.extensions,
            &self.supported_groups,
            &self.ec_point_formats,
        )
    }

    /// JA3 with the extension list sorted. Stable across permuted handshakes.
    pub fn ja3n_string(&self) -> String {
        let mut extensions = self.extensions.clone();
        extensions.sort_unstable();
        client_hello::ja3_string(
            TLS1_2.min(self.max_version),
            &self.cipher_suites,
            &extensions,
            &self.supported_groups,
            &self.ec_point_formats,
        )
    }
}
