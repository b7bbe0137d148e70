use std::io;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid transport profile: {0}")]
    Profile(#[from] ProfileError),

    #[error("Capture toggle failed: {0}")]
    CaptureToggle(#[from] CaptureError),

    #[error("Client build failed: {0}")]
    ClientBuild(#[from] ClientBuildError),

    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("Server error: {0}")]
    Server(#[from] ServerError),
}

/// Relay settings could not be loaded or failed validation.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

/// The per-request control header was missing or did not describe a usable profile.
#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("missing control header '{0}'")]
    MissingHeader(String),

    #[error("control header is not valid UTF-8")]
    Encoding,

    #[error("malformed profile payload: {0}")]
    Malformed(String),

    #[error("invalid field '{field}': {reason}")]
    InvalidField { field: &'static str, reason: String },
}

impl From<serde_json::Error> for ProfileError {
    fn from(err: serde_json::Error) -> Self {
        ProfileError::Malformed(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("failed to bind capture listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("capture proxy task failed: {0}")]
    TaskFailed(String),
}

#[derive(Error, Debug)]
pub enum ClientBuildError {
    #[error("unknown fingerprint preset '{0}'")]
    UnknownPreset(String),

    #[error("raw ClientHello is not valid hex: {0}")]
    InvalidHex(String),

    #[error("malformed ClientHello: {0}")]
    MalformedClientHello(String),

    #[error("TLS connector setup failed: {0}")]
    Tls(String),
}

impl From<boring::error::ErrorStack> for ClientBuildError {
    fn from(err: boring::error::ErrorStack) -> Self {
        ClientBuildError::Tls(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum UpstreamError {
    #[error("failed to read inbound request body: {0}")]
    InboundBody(String),

    #[error("invalid outbound request: {0}")]
    InvalidRequest(String),

    #[error("connection to {addr} failed: {reason}")]
    Connect { addr: String, reason: String },

    #[error("TLS handshake with {host} failed: {reason}")]
    Handshake { host: String, reason: String },

    #[error("HTTP exchange failed: {0}")]
    Http(String),

    #[error("failed to read response body: {0}")]
    Body(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("failed to generate relay identity: {0}")]
    Identity(String),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("accept loop failed: {0}")]
    Accept(#[source] io::Error),

    #[error("server task crashed: {0}")]
    Crashed(String),

    #[error("{0} connection(s) still in flight after the grace period, forced closed")]
    DrainTimeout(usize),
}

pub type Result<T> = std::result::Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_carry_context() {
        let err: RelayError = ProfileError::InvalidField {
            field: "host",
            reason: "must not be empty".into(),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "Invalid transport profile: invalid field 'host': must not be empty"
        );

        let err: RelayError = UpstreamError::Timeout(Duration::from_secs(3)).into();
        assert_eq!(err.to_string(), "Upstream error: request timed out after 3s");
    }
}
