//! TLS ClientHello parsing
//!
//! Accepts either a record-framed ClientHello as it appears on the wire
//! (`16 03 xx ...`, possibly spread over several handshake records) or a bare
//! handshake message (`01 ...`), and extracts the fields that identify the
//! TLS implementation that produced it.

use thiserror::Error;

pub const RECORD_TYPE_HANDSHAKE: u8 = 0x16;
pub const HANDSHAKE_TYPE_CLIENT_HELLO: u8 = 0x01;
const RECORD_HEADER_LEN: usize = 5;
const HANDSHAKE_HEADER_LEN: usize = 4;

pub mod extension {
    pub const SERVER_NAME: u16 = 0x0000;
    pub const STATUS_REQUEST: u16 = 0x0005;
    pub const SUPPORTED_GROUPS: u16 = 0x000a;
    pub const EC_POINT_FORMATS: u16 = 0x000b;
    pub const SIGNATURE_ALGORITHMS: u16 = 0x000d;
    pub const ALPN: u16 = 0x0010;
    pub const SIGNED_CERTIFICATE_TIMESTAMP: u16 = 0x0012;
    pub const PADDING: u16 = 0x0015;
    pub const EXTENDED_MASTER_SECRET: u16 = 0x0017;
    pub const COMPRESS_CERTIFICATE: u16 = 0x001b;
    pub const SESSION_TICKET: u16 = 0x0023;
    pub const SUPPORTED_VERSIONS: u16 = 0x002b;
    pub const PSK_KEY_EXCHANGE_MODES: u16 = 0x002d;
    pub const KEY_SHARE: u16 = 0x0033;
    pub const RENEGOTIATION_INFO: u16 = 0xff01;
}

/// compress_certificate algorithm ids.
pub mod cert_compression {
    pub const ZLIB: u16 = 0x0001;
    pub const BROTLI: u16 = 0x0002;
    pub const ZSTD: u16 = 0x0003;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClientHelloError {
    #[error("input is empty")]
    Empty,

    #[error("not valid hex: {0}")]
    InvalidHex(String),

    #[error("unexpected record type 0x{0:02x}")]
    NotHandshakeRecord(u8),

    #[error("handshake message type 0x{0:02x} is not a ClientHello")]
    NotClientHello(u8),

    #[error("truncated {0}")]
    Truncated(&'static str),

    #[error("malformed {0}")]
    Malformed(&'static str),
}

/// GREASE values (RFC 8701) are `0x?a?a` with identical bytes.
pub fn is_grease(value: u16) -> bool {
    (value & 0x0f0f) == 0x0a0a && (value >> 8) == (value & 0x00ff)
}

/// A decoded ClientHello. Lists keep the order they had on the wire,
/// GREASE entries included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHello {
    pub legacy_version: u16,
    pub cipher_suites: Vec<u16>,
    pub compression_methods: Vec<u8>,
    pub extensions: Vec<u16>,
    pub server_name: Option<String>,
    pub supported_groups: Vec<u16>,
    pub ec_point_formats: Vec<u8>,
    pub signature_algorithms: Vec<u16>,
    pub alpn_protocols: Vec<String>,
    pub supported_versions: Vec<u16>,
    /// Algorithms offered in compress_certificate (RFC 8879)
    pub certificate_compression: Vec<u16>,
    message: Vec<u8>,
}

impl ClientHello {
    pub fn from_hex(input: &str) -> Result<Self, ClientHelloError> {
        let cleaned: String = input
            .trim()
            .trim_start_matches("0x")
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        if cleaned.is_empty() {
            return Err(ClientHelloError::Empty);
        }
        let bytes = hex::decode(&cleaned).map_err(|e| ClientHelloError::InvalidHex(e.to_string()))?;
        Self::parse(&bytes)
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, ClientHelloError> {
        match bytes.first() {
            None => Err(ClientHelloError::Empty),
            Some(&RECORD_TYPE_HANDSHAKE) => {
                let message = reassemble_records(bytes)?
                    .ok_or(ClientHelloError::Truncated("handshake records"))?;
                Self::parse_message(&message)
            }
            Some(&HANDSHAKE_TYPE_CLIENT_HELLO) => Self::parse_message(bytes),
            Some(&other) => Err(ClientHelloError::NotHandshakeRecord(other)),
        }
    }

    /// Parses a complete handshake message (header included).
    pub fn parse_message(message: &[u8]) -> Result<Self, ClientHelloError> {
        let mut reader = Reader::new(message);
        let msg_type = reader.u8("handshake header")?;
        if msg_type != HANDSHAKE_TYPE_CLIENT_HELLO {
            return Err(ClientHelloError::NotClientHello(msg_type));
        }
        let length = reader.u24("handshake header")?;
        let body = reader.take(length, "ClientHello body")?;
        if !reader.is_empty() {
            return Err(ClientHelloError::Malformed("trailing bytes after ClientHello"));
        }

        let mut body = Reader::new(body);
        let legacy_version = body.u16("client version")?;
        body.take(32, "random")?;
        let session_id_len = body.u8("session id")? as usize;
        body.take(session_id_len, "session id")?;

        let suites_len = body.u16("cipher suites")? as usize;
        if suites_len % 2 != 0 {
            return Err(ClientHelloError::Malformed("cipher suite list"));
        }
        let cipher_suites = Reader::new(body.take(suites_len, "cipher suites")?).u16_list("cipher suites")?;

        let compression_len = body.u8("compression methods")? as usize;
        let compression_methods = body.take(compression_len, "compression methods")?.to_vec();

        let mut hello = ClientHello {
            legacy_version,
            cipher_suites,
            compression_methods,
            extensions: Vec::new(),
            server_name: None,
            supported_groups: Vec::new(),
            ec_point_formats: Vec::new(),
            signature_algorithms: Vec::new(),
            alpn_protocols: Vec::new(),
            supported_versions: Vec::new(),
            certificate_compression: Vec::new(),
            message: message[..HANDSHAKE_HEADER_LEN + length].to_vec(),
        };

        if body.is_empty() {
            return Ok(hello);
        }

        let extensions_len = body.u16("extensions")? as usize;
        let mut extensions = Reader::new(body.take(extensions_len, "extensions")?);
        if !body.is_empty() {
            return Err(ClientHelloError::Malformed("trailing bytes after extensions"));
        }

        while !extensions.is_empty() {
            let ext_type = extensions.u16("extension header")?;
            let ext_len = extensions.u16("extension header")? as usize;
            let data = extensions.take(ext_len, "extension body")?;
            hello.extensions.push(ext_type);
            hello.read_extension(ext_type, data)?;
        }

        Ok(hello)
    }

    fn read_extension(&mut self, ext_type: u16, data: &[u8]) -> Result<(), ClientHelloError> {
        let mut reader = Reader::new(data);
        match ext_type {
            extension::SERVER_NAME => {
                let mut list = Reader::new(reader.vec16("server name list")?);
                while !list.is_empty() {
                    let name_type = list.u8("server name entry")?;
                    let name = list.vec16("server name entry")?;
                    if name_type == 0 && self.server_name.is_none() {
                        self.server_name = Some(String::from_utf8_lossy(name).into_owned());
                    }
                }
            }
            extension::SUPPORTED_GROUPS => {
                self.supported_groups = Reader::new(reader.vec16("supported groups")?).u16_list("supported groups")?;
            }
            extension::EC_POINT_FORMATS => {
                self.ec_point_formats = reader.vec8("ec point formats")?.to_vec();
            }
            extension::SIGNATURE_ALGORITHMS => {
                self.signature_algorithms =
                    Reader::new(reader.vec16("signature algorithms")?).u16_list("signature algorithms")?;
            }
            extension::ALPN => {
                let mut list = Reader::new(reader.vec16("alpn list")?);
                while !list.is_empty() {
                    let proto = list.vec8("alpn protocol")?;
                    self.alpn_protocols.push(String::from_utf8_lossy(proto).into_owned());
                }
            }
            extension::SUPPORTED_VERSIONS => {
                self.supported_versions =
                    Reader::new(reader.vec8("supported versions")?).u16_list("supported versions")?;
            }
            extension::COMPRESS_CERTIFICATE => {
                self.certificate_compression =
                    Reader::new(reader.vec8("compress certificate")?).u16_list("compress certificate")?;
            }
            _ => {}
        }
        Ok(())
    }

    /// The handshake message bytes this hello was parsed from.
    pub fn message_bytes(&self) -> &[u8] {
        &self.message
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.message)
    }

    pub fn has_grease(&self) -> bool {
        self.cipher_suites.iter().any(|&c| is_grease(c)) || self.extensions.iter().any(|&e| is_grease(e))
    }

    /// JA3-style normalised form: `version,ciphers,extensions,groups,point_formats`
    /// with GREASE removed and wire order preserved.
    pub fn ja3_string(&self) -> String {
        ja3_string(
            self.legacy_version,
            &self.cipher_suites,
            &self.extensions,
            &self.supported_groups,
            &self.ec_point_formats,
        )
    }

    /// Like [`ja3_string`](Self::ja3_string) with the extension list sorted,
    /// so clients that permute their extensions still compare equal.
    pub fn ja3n_string(&self) -> String {
        let mut extensions = self.extensions.clone();
        extensions.sort_unstable();
        ja3_string(
            self.legacy_version,
            &self.cipher_suites,
            &extensions,
            &self.supported_groups,
            &self.ec_point_formats,
        )
    }
}

pub(crate) fn ja3_string(
    version: u16,
    cipher_suites: &[u16],
    extensions: &[u16],
    groups: &[u16],
    point_formats: &[u8],
) -> String {
    fn join(values: impl Iterator<Item = String>) -> String {
        values.collect::<Vec<_>>().join("-")
    }

    format!(
        "{},{},{},{},{}",
        version,
        join(cipher_suites.iter().filter(|v| !is_grease(**v)).map(|v| v.to_string())),
        join(extensions.iter().filter(|v| !is_grease(**v)).map(|v| v.to_string())),
        join(groups.iter().filter(|v| !is_grease(**v)).map(|v| v.to_string())),
        join(point_formats.iter().map(|v| v.to_string())),
    )
}

/// Concatenates the payloads of consecutive handshake records until one full
/// handshake message is available.
///
/// Returns `Ok(None)` when more bytes are needed.
pub fn reassemble_records(bytes: &[u8]) -> Result<Option<Vec<u8>>, ClientHelloError> {
    let mut payload = Vec::new();
    let mut offset = 0;

    loop {
        if payload.len() >= HANDSHAKE_HEADER_LEN {
            if payload[0] != HANDSHAKE_TYPE_CLIENT_HELLO {
                return Err(ClientHelloError::NotClientHello(payload[0]));
            }
            let length = u32::from_be_bytes([0, payload[1], payload[2], payload[3]]) as usize;
            if payload.len() >= HANDSHAKE_HEADER_LEN + length {
                payload.truncate(HANDSHAKE_HEADER_LEN + length);
                return Ok(Some(payload));
            }
        }

        let Some(header) = bytes.get(offset..offset + RECORD_HEADER_LEN) else {
            return Ok(None);
        };
        if header[0] != RECORD_TYPE_HANDSHAKE {
            return Err(ClientHelloError::NotHandshakeRecord(header[0]));
        }
        let record_len = u16::from_be_bytes([header[3], header[4]]) as usize;
        if record_len == 0 {
            return Err(ClientHelloError::Malformed("empty handshake record"));
        }
        let start = offset + RECORD_HEADER_LEN;
        let Some(fragment) = bytes.get(start..start + record_len) else {
            return Ok(None);
        };
        payload.extend_from_slice(fragment);
        offset = start + record_len;
    }
}

struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn take(&mut self, n: usize, what: &'static str) -> Result<&'a [u8], ClientHelloError> {
        if self.buf.len() < n {
            return Err(ClientHelloError::Truncated(what));
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn u8(&mut self, what: &'static str) -> Result<u8, ClientHelloError> {
        Ok(self.take(1, what)?[0])
    }

    fn u16(&mut self, what: &'static str) -> Result<u16, ClientHelloError> {
        let b = self.take(2, what)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u24(&mut self, what: &'static str) -> Result<usize, ClientHelloError> {
        let b = self.take(3, what)?;
        Ok(u32::from_be_bytes([0, b[0], b[1], b[2]]) as usize)
    }

    fn vec8(&mut self, what: &'static str) -> Result<&'a [u8], ClientHelloError> {
        let len = self.u8(what)? as usize;
        self.take(len, what)
    }

    fn vec16(&mut self, what: &'static str) -> Result<&'a [u8], ClientHelloError> {
        let len = self.u16(what)? as usize;
        self.take(len, what)
    }

    fn u16_list(&mut self, what: &'static str) -> Result<Vec<u16>, ClientHelloError> {
        if self.buf.len() % 2 != 0 {
            return Err(ClientHelloError::Malformed(what));
        }
        let mut values = Vec::with_capacity(self.buf.len() / 2);
        while !self.is_empty() {
            values.push(self.u16(what)?);
        }
        Ok(values)
    }
}
