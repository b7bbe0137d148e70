use crate::fingerprint::client_hello::{reassemble_records, RECORD_TYPE_HANDSHAKE};
use crate::fingerprint::ClientHello;

/// Bytes inspected before the sniffer gives up on a connection.
pub const MAX_SNIFF_BYTES: usize = 64 * 1024;

const CONNECT: &[u8] = b"CONNECT ";
const HEADER_END: &[u8] = b"\r\n\r\n";

#[derive(Debug)]
pub enum Sniffed {
    /// Not enough bytes yet
    Incomplete,
    Hello(Box<ClientHello>),
    /// The stream does not start with a ClientHello; stop looking
    NotTls,
}

/// Looks for a ClientHello at the start of a client-to-upstream byte stream.
///
/// A leading HTTP `CONNECT` request is skipped, since browsers talk to the
/// capture listener as if it were an HTTP proxy.
pub fn sniff(buf: &[u8]) -> Sniffed {
    let tls = match skip_connect_preamble(buf) {
        Some(rest) => rest,
        None if buf.len() >= MAX_SNIFF_BYTES => return Sniffed::NotTls,
        None => return preamble_or_not_tls(buf),
    };

    if tls.is_empty() {
        return Sniffed::Incomplete;
    }
    if tls[0] != RECORD_TYPE_HANDSHAKE {
        return Sniffed::NotTls;
    }

    match reassemble_records(tls) {
        Ok(Some(message)) => match ClientHello::parse_message(&message) {
            Ok(hello) => Sniffed::Hello(Box::new(hello)),
            Err(_) => Sniffed::NotTls,
        },
        Ok(None) if buf.len() >= MAX_SNIFF_BYTES => Sniffed::NotTls,
        Ok(None) => Sniffed::Incomplete,
        Err(_) => Sniffed::NotTls,
    }
}

/// Returns the bytes after the preamble, the whole buffer when there is no
/// preamble, or None while the preamble is still arriving.
fn skip_connect_preamble(buf: &[u8]) -> Option<&[u8]> {
    if !starts_with_ignore_case(buf, CONNECT) {
        return if buf.first() == Some(&RECORD_TYPE_HANDSHAKE) {
            Some(buf)
        } else {
            None
        };
    }
    buf.windows(HEADER_END.len())
        .position(|w| w == HEADER_END)
        .map(|pos| &buf[pos + HEADER_END.len()..])
}

fn preamble_or_not_tls(buf: &[u8]) -> Sniffed {
    let prefix = buf.len().min(CONNECT.len());
    if buf.is_empty() || starts_with_ignore_case(CONNECT, &buf[..prefix]) {
        Sniffed::Incomplete
    } else {
        Sniffed::NotTls
    }
}

fn starts_with_ignore_case(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.len() >= needle.len() && haystack[..needle.len()].eq_ignore_ascii_case(needle)
}
