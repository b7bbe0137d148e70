//! Outbound leg of the relay
//!
//! The [`ForwardingEngine`] turns one inbound request into one outbound
//! request. It reaches the network only through a [`TransportFactory`], so
//! tests can swap the mimicking client for an in-memory fake.

pub mod client;
pub mod engine;
pub mod headers;

pub use client::MimicTransportFactory;
pub use engine::{ForwardingEngine, Stage};

use crate::error::{ClientBuildError, UpstreamError};
use crate::profile::{ResolvedFingerprint, TransportProfile};
use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::Full;
use std::sync::Arc;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Body of a destination response, before it is buffered.
pub type ResponseBody = UnsyncBoxBody<Bytes, BoxError>;

/// A client that has been shaped for one request's fingerprint.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, req: Request<Full<Bytes>>) -> Result<Response<ResponseBody>, UpstreamError>;
}

/// Builds a [`Transport`] for a resolved fingerprint.
#[cfg_attr(test, mockall::automock)]
pub trait TransportFactory: Send + Sync {
    fn build(
        &self,
        fingerprint: &ResolvedFingerprint,
        profile: &TransportProfile,
    ) -> Result<Arc<dyn Transport>, ClientBuildError>;
}
