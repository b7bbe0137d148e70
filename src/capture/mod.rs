//! Capture sub-proxy
//!
//! Sits between a browser and the upstream controller, relays their bytes
//! unchanged and keeps the fingerprint of the most recent ClientHello it saw.
//! The session itself is never decrypted.

mod proxy;
pub mod sniffer;

pub use proxy::CaptureProxy;

use crate::error::CaptureError;
use crate::fingerprint::ClientHello;
use arc_swap::ArcSwapOption;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Most recent fingerprint, shared between relay tasks and the engine.
pub type FingerprintSlot = Arc<ArcSwapOption<CapturedFingerprint>>;

/// A ClientHello observed by the capture sub-proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapturedFingerprint {
    /// Handshake message bytes as hex, without record framing
    pub client_hello_hex: String,
    pub server_name: Option<String>,
    /// `version,ciphers,extensions,groups,pointFormats` with GREASE removed
    pub ja3: String,
}

impl CapturedFingerprint {
    pub fn from_client_hello(hello: &ClientHello) -> Self {
        Self {
            client_hello_hex: hello.to_hex(),
            server_name: hello.server_name.clone(),
            ja3: hello.ja3_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toggle {
    Started(SocketAddr),
    Stopped,
    Unchanged,
}

/// Owns the capture sub-proxy and the fingerprint slot.
///
/// At most one sub-proxy runs at a time. The toggle lock is held across the
/// start and stop calls, so a failed start or stop leaves the previous state intact.
pub struct CaptureController {
    slot: FingerprintSlot,
    active: Mutex<Option<CaptureProxy>>,
}

impl CaptureController {
    pub fn new() -> Self {
        Self {
            slot: Arc::new(ArcSwapOption::empty()),
            active: Mutex::new(None),
        }
    }

    /// Brings the sub-proxy to the wanted state.
    ///
    /// `Some((listen, upstream))` asks for it to run, `None` asks for it to be
    /// stopped. A running proxy is left alone even if the addresses differ.
    pub async fn apply(
        &self,
        wanted: Option<(SocketAddr, SocketAddr)>,
    ) -> Result<Toggle, CaptureError> {
        let mut active = self.active.lock().await;

        match (active.take(), wanted) {
            (None, Some((listen, upstream))) => {
                let proxy = CaptureProxy::start(listen, upstream, self.slot.clone()).await?;
                let addr = proxy.local_addr();
                *active = Some(proxy);
                Ok(Toggle::Started(addr))
            }
            (Some(mut proxy), None) => match proxy.stop().await {
                Ok(()) => Ok(Toggle::Stopped),
                Err(e) => {
                    // State stays enabled; the next stop finds nothing to join and clears it
                    *active = Some(proxy);
                    Err(e)
                }
            },
            (current, _) => {
                *active = current;
                Ok(Toggle::Unchanged)
            }
        }
    }

    pub async fn start(&self, listen: SocketAddr, upstream: SocketAddr) -> Result<Toggle, CaptureError> {
        self.apply(Some((listen, upstream))).await
    }

    pub async fn stop(&self) -> Result<Toggle, CaptureError> {
        self.apply(None).await
    }

    pub async fn is_active(&self) -> bool {
        self.active.lock().await.is_some()
    }

    /// Address the running sub-proxy is bound to.
    pub async fn listen_addr(&self) -> Option<SocketAddr> {
        self.active.lock().await.as_ref().map(CaptureProxy::local_addr)
    }

    /// Most recently observed fingerprint, running or not.
    pub fn fingerprint(&self) -> Option<Arc<CapturedFingerprint>> {
        self.slot.load_full()
    }

    /// The observed fingerprint, but only while the sub-proxy is running.
    pub async fn active_fingerprint(&self) -> Option<Arc<CapturedFingerprint>> {
        let active = self.active.lock().await;
        active.as_ref().and_then(|_| self.slot.load_full())
    }
}

impl Default for CaptureController {
    fn default() -> Self {
        Self::new()
    }
}
