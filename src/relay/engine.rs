//! Per-request forwarding state machine.

use super::headers::{decode_body, outbound_request, relay_response};
use super::TransportFactory;
use crate::capture::CaptureController;
use crate::config::ServerSettings;
use crate::error::{ConfigError, ProfileError, RelayError, UpstreamError};
use crate::profile::{self, TransportProfile};
use bytes::Bytes;
use http::header::{self, HeaderName, HeaderValue};
use http::{Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use std::fmt;
use std::sync::Arc;

/// Steps a request goes through on its way to the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    ConfigParsed,
    CaptureToggled,
    FingerprintResolved,
    ClientBuilt,
    UpstreamSent,
    ResponseReceived,
    ResponseWritten,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Received => "received",
            Stage::ConfigParsed => "config_parsed",
            Stage::CaptureToggled => "capture_toggled",
            Stage::FingerprintResolved => "fingerprint_resolved",
            Stage::ClientBuilt => "client_built",
            Stage::UpstreamSent => "upstream_sent",
            Stage::ResponseReceived => "response_received",
            Stage::ResponseWritten => "response_written",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request error together with the step that was being attempted.
struct Failure {
    stage: Stage,
    error: RelayError,
}

trait AtStage<T> {
    fn at(self, stage: Stage) -> Result<T, Failure>;
}

impl<T, E: Into<RelayError>> AtStage<T> for Result<T, E> {
    fn at(self, stage: Stage) -> Result<T, Failure> {
        self.map_err(|e| Failure {
            stage,
            error: e.into(),
        })
    }
}

pub struct ForwardingEngine {
    control_header: HeaderName,
    error_prefix: String,
    decompress: bool,
    capture: Arc<CaptureController>,
    transports: Arc<dyn TransportFactory>,
}

impl ForwardingEngine {
    pub fn new(
        settings: &ServerSettings,
        capture: Arc<CaptureController>,
        transports: Arc<dyn TransportFactory>,
    ) -> Result<Self, ConfigError> {
        let control_header = HeaderName::from_bytes(settings.control_header.as_bytes()).map_err(|_| {
            ConfigError::Validation(format!(
                "control_header '{}' is not a valid header name",
                settings.control_header
            ))
        })?;

        Ok(Self {
            control_header,
            error_prefix: settings.error_prefix.clone(),
            decompress: settings.decompress_responses,
            capture,
            transports,
        })
    }

    pub fn capture(&self) -> &Arc<CaptureController> {
        &self.capture
    }

    /// Forwards one request. Every failure becomes a 500 response.
    pub async fn handle<B>(&self, req: Request<B>) -> Response<Full<Bytes>>
    where
        B: Body,
        B::Error: fmt::Display,
    {
        match self.forward(req).await {
            Ok(response) => response,
            Err(Failure { stage, error }) => {
                tracing::error!(stage = %stage, error = %error, "Request failed");
                self.error_response(&error)
            }
        }
    }

    async fn forward<B>(&self, req: Request<B>) -> Result<Response<Full<Bytes>>, Failure>
    where
        B: Body,
        B::Error: fmt::Display,
    {
        let (mut parts, body) = req.into_parts();
        tracing::debug!(stage = %Stage::Received, method = %parts.method, uri = %parts.uri, "Request received");

        // The control header never leaves the relay, even on failure
        let raw = parts.headers.remove(&self.control_header);
        let profile = self.parse_profile(raw.as_ref()).at(Stage::ConfigParsed)?;
        tracing::debug!(stage = %Stage::ConfigParsed, host = %profile.host, "Profile parsed");

        self.toggle_capture(&profile).await.at(Stage::CaptureToggled)?;

        let captured = if profile.use_intercepted_fingerprint {
            self.capture.active_fingerprint().await
        } else {
            None
        };
        let fingerprint = profile.resolve_fingerprint(captured);
        tracing::debug!(stage = %Stage::FingerprintResolved, fingerprint = %fingerprint.describe(), "Fingerprint resolved");

        let transport = self.transports.build(&fingerprint, &profile).at(Stage::ClientBuilt)?;

        let body = body
            .collect()
            .await
            .map_err(|e| UpstreamError::InboundBody(e.to_string()))
            .at(Stage::UpstreamSent)?
            .to_bytes();
        let outbound = outbound_request(parts, body, &profile).at(Stage::UpstreamSent)?;

        let timeout = profile.request_timeout();
        let exchange = async {
            let response = transport.send(outbound).await?;
            let (parts, body) = response.into_parts();
            let body = body
                .collect()
                .await
                .map_err(|e| UpstreamError::Body(e.to_string()))?
                .to_bytes();
            Ok::<_, UpstreamError>((parts, body))
        };
        let (mut parts, body) = tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| UpstreamError::Timeout(timeout))
            .and_then(|result| result)
            .at(Stage::UpstreamSent)?;
        tracing::debug!(stage = %Stage::ResponseReceived, status = %parts.status, bytes = body.len(), "Response received");

        let body = if self.decompress {
            decode_body(&mut parts.headers, body).at(Stage::ResponseReceived)?
        } else {
            body
        };

        let response = relay_response(parts, body);
        tracing::info!(
            stage = %Stage::ResponseWritten,
            host = %profile.host,
            status = %response.status(),
            fingerprint = %fingerprint.describe(),
            "Request relayed"
        );
        Ok(response)
    }

    fn parse_profile(&self, raw: Option<&HeaderValue>) -> Result<TransportProfile, ProfileError> {
        let raw = raw.ok_or_else(|| ProfileError::MissingHeader(self.control_header.to_string()))?;
        let raw = raw.to_str().map_err(|_| ProfileError::Encoding)?;
        profile::parse(raw)
    }

    async fn toggle_capture(&self, profile: &TransportProfile) -> Result<(), RelayError> {
        let wanted = if profile.use_intercepted_fingerprint {
            Some(profile.capture_addrs()?)
        } else {
            None
        };
        let toggle = self.capture.apply(wanted).await?;
        tracing::debug!(stage = %Stage::CaptureToggled, toggle = ?toggle, "Capture state applied");
        Ok(())
    }

    fn error_response(&self, error: &RelayError) -> Response<Full<Bytes>> {
        let body = Bytes::from(format!("{}: {}", self.error_prefix, error));
        let mut response = Response::new(Full::new(body.clone()));
        *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        let headers = response.headers_mut();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));
        response
    }
}
