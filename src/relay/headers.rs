use crate::error::UpstreamError;
use crate::profile::TransportProfile;
use bytes::Bytes;
use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::{request, response, Request, Response, Uri};
use http_body_util::Full;
use std::collections::HashSet;
use std::io::Read;

/// Connection-scoped headers that must not cross the relay.
fn is_hop_by_hop(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "transfer-encoding" | "connection" | "keep-alive" | "proxy-connection" | "upgrade"
    )
}

/// Reorders `headers` so the names in `order` come first.
///
/// Names are matched case-insensitively and keep every value. The rest follow
/// in their original order.
pub fn order_headers(headers: &HeaderMap, order: &[String]) -> HeaderMap {
    let mut ordered = HeaderMap::with_capacity(headers.len());
    let mut placed = HashSet::new();

    for name in order {
        let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
            continue;
        };
        if !placed.insert(name.clone()) {
            continue;
        }
        for value in headers.get_all(&name) {
            ordered.append(name.clone(), value.clone());
        }
    }

    for (name, value) in headers {
        if !placed.contains(name) {
            ordered.append(name.clone(), value.clone());
        }
    }

    ordered
}

/// Rewrites an inbound request into the request sent to the destination.
pub fn outbound_request(
    parts: request::Parts,
    body: Bytes,
    profile: &TransportProfile,
) -> Result<Request<Full<Bytes>>, UpstreamError> {
    let mut headers = parts.headers;
    headers.remove(header::CONTENT_LENGTH);
    let hop_by_hop: Vec<HeaderName> = headers.keys().filter(|n| is_hop_by_hop(n)).cloned().collect();
    for name in hop_by_hop {
        headers.remove(&name);
    }
    if !headers.contains_key(header::HOST) {
        let host = HeaderValue::from_str(&profile.host)
            .map_err(|e| UpstreamError::InvalidRequest(e.to_string()))?;
        headers.insert(header::HOST, host);
    }

    let path = parts
        .uri
        .path_and_query()
        .map(|p| p.as_str())
        .unwrap_or("/");
    let uri: Uri = format!("{}://{}{}", profile.scheme.to_ascii_lowercase(), profile.host, path)
        .parse()
        .map_err(|e: http::uri::InvalidUri| UpstreamError::InvalidRequest(e.to_string()))?;

    let mut req = Request::builder()
        .method(parts.method)
        .uri(uri)
        .body(Full::new(body))
        .map_err(|e| UpstreamError::InvalidRequest(e.to_string()))?;
    *req.headers_mut() = order_headers(&headers, &profile.header_order);
    // Carries the inbound header casing through to the HTTP/1.1 encoder
    *req.extensions_mut() = parts.extensions;

    Ok(req)
}

/// Decodes a gzip, deflate or brotli body and drops Content-Encoding.
///
/// Other encodings are left untouched.
pub fn decode_body(headers: &mut HeaderMap, body: Bytes) -> Result<Bytes, UpstreamError> {
    let encoding = match headers.get(header::CONTENT_ENCODING).and_then(|v| v.to_str().ok()) {
        Some(value) => value.trim().to_ascii_lowercase(),
        None => return Ok(body),
    };

    let mut decoded = Vec::new();
    let result = match encoding.as_str() {
        "gzip" | "x-gzip" => GzDecoder::new(body.as_ref()).read_to_end(&mut decoded),
        // Servers disagree on whether deflate is zlib-wrapped
        "deflate" => ZlibDecoder::new(body.as_ref())
            .read_to_end(&mut decoded)
            .or_else(|_| {
                decoded.clear();
                DeflateDecoder::new(body.as_ref()).read_to_end(&mut decoded)
            }),
        "br" => brotli::Decompressor::new(body.as_ref(), 4096).read_to_end(&mut decoded),
        _ => return Ok(body),
    };
    result.map_err(|e| UpstreamError::Body(format!("{encoding} decode failed: {e}")))?;

    headers.remove(header::CONTENT_ENCODING);
    Ok(Bytes::from(decoded))
}

/// Builds the response written back to the control tool.
///
/// Headers are copied verbatim except for the framing ones. Content-Length
/// always matches the buffered body.
pub fn relay_response(parts: response::Parts, body: Bytes) -> Response<Full<Bytes>> {
    let mut headers = HeaderMap::with_capacity(parts.headers.len() + 1);
    for (name, value) in &parts.headers {
        if *name != header::CONTENT_LENGTH && *name != header::TRANSFER_ENCODING {
            headers.append(name.clone(), value.clone());
        }
    }
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));

    let mut response = Response::new(Full::new(body));
    *response.status_mut() = parts.status;
    *response.headers_mut() = headers;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProfileDefaults;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use http::StatusCode;
    use std::io::Write;

    fn names(headers: &HeaderMap) -> Vec<&str> {
        headers.keys().map(|n| n.as_str()).collect()
    }

    #[test]
    fn test_order_headers_puts_listed_names_first() {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static("*/*"));
        headers.insert(header::USER_AGENT, HeaderValue::from_static("ua"));
        headers.append(header::COOKIE, HeaderValue::from_static("a=1"));
        headers.append(header::COOKIE, HeaderValue::from_static("b=2"));
        headers.insert(header::HOST, HeaderValue::from_static("example.com"));

        let ordered = order_headers(&headers, &["host".into(), "Cookie".into(), "X-Missing".into(), "HOST".into()]);

        assert_eq!(names(&ordered), vec!["host", "cookie", "accept", "user-agent"]);
        let cookies: Vec<_> = ordered
            .get_all(header::COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap())
            .collect();
        assert_eq!(cookies, vec!["a=1", "b=2"]);
    }

    #[test]
    fn test_outbound_request_rewrites_target() {
        let mut profile = crate::profile::TransportProfile::template("example.com", &ProfileDefaults::default());
        profile.header_order = vec!["Host".into(), "User-Agent".into()];

        let inbound = Request::builder()
            .method("POST")
            .uri("/api/items?page=2")
            .header(header::USER_AGENT, "Mozilla/5.0")
            .header(header::CONTENT_LENGTH, "999")
            .header(header::CONNECTION, "keep-alive")
            .header(header::TRANSFER_ENCODING, "chunked")
            .header("x-trace", "1")
            .body(())
            .unwrap();
        let (parts, ()) = inbound.into_parts();

        let req = outbound_request(parts, Bytes::from_static(b"{}"), &profile).unwrap();

        assert_eq!(*req.method(), http::Method::POST);
        assert_eq!(req.uri().to_string(), "https://example.com/api/items?page=2");
        assert_eq!(names(req.headers()), vec!["host", "user-agent", "x-trace"]);
        assert_eq!(req.headers()[header::HOST], "example.com");
    }

    #[test]
    fn test_outbound_request_keeps_inbound_host() {
        let profile = crate::profile::TransportProfile::template("example.com", &ProfileDefaults::default());
        let (parts, ()) = Request::builder()
            .uri("/")
            .header(header::HOST, "127.0.0.1:8887")
            .body(())
            .unwrap()
            .into_parts();

        let req = outbound_request(parts, Bytes::new(), &profile).unwrap();
        assert_eq!(req.headers()[header::HOST], "127.0.0.1:8887");
        assert_eq!(req.uri().to_string(), "https://example.com/");
    }

    #[test]
    fn test_relay_response_recomputes_length() {
        let (parts, ()) = Response::builder()
            .status(StatusCode::CREATED)
            .header(header::CONTENT_LENGTH, "1000")
            .header(header::TRANSFER_ENCODING, "chunked")
            .header(header::SET_COOKIE, "a=1")
            .header(header::SET_COOKIE, "b=2")
            .body(())
            .unwrap()
            .into_parts();

        let response = relay_response(parts, Bytes::from_static(b"hello"));

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "5");
        assert!(response.headers().get(header::TRANSFER_ENCODING).is_none());
        assert_eq!(response.headers().get_all(header::SET_COOKIE).iter().count(), 2);
    }

    #[test]
    fn test_decode_gzip_body() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"compressed payload").unwrap();
        let gz = encoder.finish().unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        let body = decode_body(&mut headers, Bytes::from(gz)).unwrap();

        assert_eq!(body, Bytes::from_static(b"compressed payload"));
        assert!(headers.get(header::CONTENT_ENCODING).is_none());
    }

    #[test]
    fn test_decode_brotli() {
        let mut compressed = Vec::new();
        {
            let mut writer = brotli::CompressorWriter::new(&mut compressed, 4096, 5, 22);
            writer.write_all(b"brotli payload").unwrap();
        }
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static("br"));
        let body = decode_body(&mut headers, Bytes::from(compressed)).unwrap();

        assert_eq!(body, Bytes::from_static(b"brotli payload"));
        assert!(headers.get(header::CONTENT_ENCODING).is_none());
    }

    #[test]
    fn test_decode_leaves_unknown_encodings() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static("zstd"));
        let body = decode_body(&mut headers, Bytes::from_static(b"\x01\x02")).unwrap();

        assert_eq!(body.as_ref(), b"\x01\x02");
        assert!(headers.contains_key(header::CONTENT_ENCODING));
    }
}
