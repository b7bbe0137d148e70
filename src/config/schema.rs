use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub defaults: ProfileDefaults,
}

/// Settings for the relay listener and the forwarding engine.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerSettings {
    /// Address the relay listens on (e.g., "127.0.0.1:8887")
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Request header that carries the serialized transport profile
    #[serde(default = "default_control_header")]
    pub control_header: String,

    /// Prefix of the plain-text body returned with every 500 response
    #[serde(default = "default_error_prefix")]
    pub error_prefix: String,

    /// How long stop() waits for in-flight requests before closing them
    #[serde(default = "default_shutdown_grace_seconds")]
    pub shutdown_grace_seconds: u64,

    /// Whether stopping the server also stops a running capture sub-proxy
    #[serde(default = "default_true")]
    pub stop_capture_on_shutdown: bool,

    /// Whether destination certificates are checked against the system roots
    #[serde(default = "default_true")]
    pub verify_upstream_certificates: bool,

    /// Decode gzip, deflate and br response bodies before relaying them
    #[serde(default)]
    pub decompress_responses: bool,
}

/// Values used when building a profile template for the control tool.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProfileDefaults {
    #[serde(default = "default_intercept_proxy_addr")]
    pub intercept_proxy_addr: String,

    #[serde(default = "default_upstream_controller_addr")]
    pub upstream_controller_addr: String,

    #[serde(default = "default_http_timeout_seconds")]
    pub http_timeout_seconds: u64,

    #[serde(default = "default_fingerprint")]
    pub fingerprint: String,
}

// Default value functions
fn default_listen_addr() -> String {
    "127.0.0.1:8887".to_string()
}

fn default_control_header() -> String {
    "Tlsprofile".to_string()
}

fn default_error_prefix() -> String {
    "TLS relay error".to_string()
}

fn default_shutdown_grace_seconds() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

fn default_intercept_proxy_addr() -> String {
    "127.0.0.1:8886".to_string()
}

fn default_upstream_controller_addr() -> String {
    "127.0.0.1:8080".to_string()
}

pub(crate) fn default_http_timeout_seconds() -> u64 {
    30
}

pub(crate) fn default_fingerprint() -> String {
    crate::fingerprint::DEFAULT_PRESET.to_string()
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            control_header: default_control_header(),
            error_prefix: default_error_prefix(),
            shutdown_grace_seconds: default_shutdown_grace_seconds(),
            stop_capture_on_shutdown: true,
            verify_upstream_certificates: true,
            decompress_responses: false,
        }
    }
}

impl Default for ProfileDefaults {
    fn default() -> Self {
        Self {
            intercept_proxy_addr: default_intercept_proxy_addr(),
            upstream_controller_addr: default_upstream_controller_addr(),
            http_timeout_seconds: default_http_timeout_seconds(),
            fingerprint: default_fingerprint(),
        }
    }
}

impl ServerSettings {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }
}
