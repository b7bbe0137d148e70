//! Per-request transport profiles
//!
//! The control tool serializes a [`TransportProfile`] as JSON into a single
//! request header. The profile names the destination, the handshake to mimic
//! and the outbound header order, and it switches the capture sub-proxy on or
//! off.

use crate::capture::CapturedFingerprint;
use crate::config::{default_fingerprint, default_http_timeout_seconds, ProfileDefaults};
use crate::error::ProfileError;
use http::HeaderName;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

const HTTPS: &str = "https";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TransportProfile {
    /// Listen address for the capture sub-proxy
    #[serde(default)]
    pub intercept_proxy_addr: String,

    /// Where the capture sub-proxy relays its connections to
    #[serde(default)]
    pub upstream_controller_addr: String,

    #[serde(default = "default_http_timeout_seconds")]
    pub http_timeout_seconds: u64,

    /// Preset name, or "default"
    #[serde(default = "default_fingerprint")]
    pub fingerprint: String,

    #[serde(default)]
    pub use_intercepted_fingerprint: bool,

    /// Hex of a full ClientHello; overrides `fingerprint` when set
    #[serde(default)]
    pub raw_client_hello_hex: String,

    /// Destination authority, optionally with a port
    pub host: String,

    #[serde(default = "default_scheme")]
    pub scheme: String,

    #[serde(default)]
    pub header_order: Vec<String>,
}

fn default_scheme() -> String {
    HTTPS.to_string()
}

/// Decodes and validates a serialized profile.
pub fn parse(serialized: &str) -> Result<TransportProfile, ProfileError> {
    let profile: TransportProfile = serde_json::from_str(serialized.trim())?;
    profile.validate()?;
    Ok(profile)
}

pub fn serialize(profile: &TransportProfile) -> Result<String, ProfileError> {
    Ok(serde_json::to_string(profile)?)
}

impl TransportProfile {
    /// A profile for `host` carrying the configured defaults.
    pub fn template(host: impl Into<String>, defaults: &ProfileDefaults) -> Self {
        Self {
            intercept_proxy_addr: defaults.intercept_proxy_addr.clone(),
            upstream_controller_addr: defaults.upstream_controller_addr.clone(),
            http_timeout_seconds: defaults.http_timeout_seconds,
            fingerprint: defaults.fingerprint.clone(),
            use_intercepted_fingerprint: false,
            raw_client_hello_hex: String::new(),
            host: host.into(),
            scheme: default_scheme(),
            header_order: Vec::new(),
        }
    }

    pub fn validate(&self) -> Result<(), ProfileError> {
        if self.host.trim().is_empty() {
            return Err(invalid("host", "must not be empty"));
        }
        if self.host.parse::<http::uri::Authority>().is_err() {
            return Err(invalid("host", format!("'{}' is not a valid authority", self.host)));
        }
        if !self.scheme.eq_ignore_ascii_case(HTTPS) {
            return Err(invalid("scheme", format!("'{}' is not supported, only https", self.scheme)));
        }
        if self.http_timeout_seconds == 0 {
            return Err(invalid("httpTimeoutSeconds", "must be greater than 0"));
        }
        if self.fingerprint.trim().is_empty() && self.raw_client_hello_hex.trim().is_empty() {
            return Err(invalid(
                "fingerprint",
                "must not be empty unless rawClientHelloHex is set",
            ));
        }
        if let Some(name) = self
            .header_order
            .iter()
            .find(|name| HeaderName::from_bytes(name.as_bytes()).is_err())
        {
            return Err(invalid("headerOrder", format!("'{name}' is not a valid header name")));
        }
        if self.use_intercepted_fingerprint {
            self.capture_addrs()?;
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_seconds)
    }

    /// Capture listen address and upstream controller address.
    pub fn capture_addrs(&self) -> Result<(SocketAddr, SocketAddr), ProfileError> {
        let listen = parse_addr("interceptProxyAddr", &self.intercept_proxy_addr)?;
        let upstream = parse_addr("upstreamControllerAddr", &self.upstream_controller_addr)?;
        Ok((listen, upstream))
    }

    /// Picks the handshake to mimic.
    ///
    /// A captured fingerprint wins only when the profile asks for it. A raw
    /// ClientHello wins over the preset name.
    pub fn resolve_fingerprint(
        &self,
        captured: Option<Arc<CapturedFingerprint>>,
    ) -> ResolvedFingerprint {
        if self.use_intercepted_fingerprint {
            if let Some(captured) = captured {
                return ResolvedFingerprint::Captured(captured);
            }
        }
        let raw = self.raw_client_hello_hex.trim();
        if raw.is_empty() {
            ResolvedFingerprint::Preset(self.fingerprint.trim().to_string())
        } else {
            ResolvedFingerprint::RawClientHello(raw.to_string())
        }
    }
}

fn parse_addr(field: &'static str, value: &str) -> Result<SocketAddr, ProfileError> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid(field, format!("'{value}' is not a socket address")))
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ProfileError {
    ProfileError::InvalidField {
        field,
        reason: reason.into(),
    }
}

/// The handshake source chosen for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedFingerprint {
    Preset(String),
    RawClientHello(String),
    Captured(Arc<CapturedFingerprint>),
}

impl ResolvedFingerprint {
    /// Short label for logs.
    pub fn describe(&self) -> String {
        match self {
            ResolvedFingerprint::Preset(name) => format!("preset:{name}"),
            ResolvedFingerprint::RawClientHello(_) => "raw-client-hello".to_string(),
            ResolvedFingerprint::Captured(fp) => format!("captured:{}", fp.ja3),
        }
    }
}
