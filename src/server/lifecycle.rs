use super::listener::serve;
use crate::capture::CaptureController;
use crate::config::{RelayConfig, ServerSettings};
use crate::error::{ConfigError, ServerError};
use crate::identity::RootIdentity;
use crate::relay::{ForwardingEngine, MimicTransportFactory, TransportFactory};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;

struct RunningServer {
    local_addr: SocketAddr,
    certificate_pem: String,
    certificate_sha256: String,
    shutdown_tx: broadcast::Sender<()>,
    handle: JoinHandle<Result<(), ServerError>>,
}

impl RunningServer {
    async fn shutdown(self) -> Result<(), ServerError> {
        let _ = self.shutdown_tx.send(());
        match self.handle.await {
            Ok(result) => result,
            Err(e) => Err(ServerError::Crashed(e.to_string())),
        }
    }
}

/// Owns the relay listener and the capture sub-proxy.
///
/// At most one listener runs at a time. Each start generates a fresh TLS
/// identity.
pub struct RelayServer {
    settings: ServerSettings,
    engine: Arc<ForwardingEngine>,
    capture: Arc<CaptureController>,
    running: Mutex<Option<RunningServer>>,
    stopped: Arc<watch::Sender<bool>>,
}

impl RelayServer {
    pub fn new(
        settings: ServerSettings,
        transports: Arc<dyn TransportFactory>,
    ) -> Result<Self, ConfigError> {
        let capture = Arc::new(CaptureController::new());
        let engine = Arc::new(ForwardingEngine::new(&settings, capture.clone(), transports)?);
        let (stopped, _) = watch::channel(true);

        Ok(Self {
            settings,
            engine,
            capture,
            running: Mutex::new(None),
            stopped: Arc::new(stopped),
        })
    }

    /// Server backed by the BoringSSL mimicking client.
    pub fn from_config(config: &RelayConfig) -> Result<Self, ConfigError> {
        let transports = Arc::new(MimicTransportFactory::new(
            config.server.verify_upstream_certificates,
        ));
        Self::new(config.server.clone(), transports)
    }

    /// Binds `addr` and serves in the background.
    ///
    /// A failed bind leaves any running listener untouched. A successful one
    /// replaces it.
    pub async fn start(&self, addr: SocketAddr) -> Result<SocketAddr, ServerError> {
        let identity = RootIdentity::generate().map_err(|e| ServerError::Identity(e.to_string()))?;
        let tls_config = identity
            .server_config()
            .map_err(|e| ServerError::Identity(e.to_string()))?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| ServerError::Bind {
            addr: addr.to_string(),
            source,
        })?;

        let mut running = self.running.lock().await;
        if let Some(prior) = running.take() {
            tracing::info!(listen_addr = %prior.local_addr, "Replacing running relay listener");
            if let Err(e) = prior.shutdown().await {
                tracing::warn!(error = %e, "Previous relay listener did not stop cleanly");
            }
        }

        let (shutdown_tx, _) = broadcast::channel(1);
        let stopped = self.stopped.clone();
        let serving = serve(
            listener,
            TlsAcceptor::from(tls_config),
            self.engine.clone(),
            shutdown_tx.clone(),
            self.settings.shutdown_grace(),
        );
        self.stopped.send_replace(false);
        let handle = tokio::spawn(async move {
            let result = serving.await;
            if let Err(e) = &result {
                tracing::error!(error = %e, "Relay listener stopped with error");
            }
            stopped.send_replace(true);
            result
        });

        tracing::info!(
            listen_addr = %local_addr,
            certificate_sha256 = %identity.sha256_fingerprint(),
            "Relay listening"
        );

        *running = Some(RunningServer {
            local_addr,
            certificate_pem: identity.certificate_pem().to_string(),
            certificate_sha256: identity.sha256_fingerprint(),
            shutdown_tx,
            handle,
        });

        Ok(local_addr)
    }

    /// Gracefully stops the listener. Stopping an idle server does nothing.
    pub async fn stop(&self) -> Result<(), ServerError> {
        let prior = self.running.lock().await.take();

        let result = match prior {
            Some(server) => {
                tracing::info!(listen_addr = %server.local_addr, "Stopping relay");
                server.shutdown().await
            }
            None => Ok(()),
        };

        if self.settings.stop_capture_on_shutdown {
            if let Err(e) = self.capture.stop().await {
                tracing::warn!(error = %e, "Capture proxy did not stop cleanly");
            }
        }

        result
    }

    /// Resolves once no listener is running, including after a fatal error.
    pub async fn wait_stopped(&self) {
        let mut rx = self.stopped.subscribe();
        let _ = rx.wait_for(|stopped| *stopped).await;
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().await.as_ref().map(|s| s.local_addr)
    }

    /// PEM of the certificate the current listener presents.
    pub async fn certificate_pem(&self) -> Option<String> {
        self.running
            .lock()
            .await
            .as_ref()
            .map(|s| s.certificate_pem.clone())
    }

    pub async fn certificate_sha256(&self) -> Option<String> {
        self.running
            .lock()
            .await
            .as_ref()
            .map(|s| s.certificate_sha256.clone())
    }

    pub fn capture(&self) -> &Arc<CaptureController> {
        &self.capture
    }
}
