use super::sniffer::{sniff, Sniffed};
use super::{CapturedFingerprint, FingerprintSlot};
use crate::error::CaptureError;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::{JoinHandle, JoinSet};

/// A running capture listener.
///
/// Relays every accepted connection to the upstream controller byte for byte
/// and records the ClientHello it sees on the way.
pub struct CaptureProxy {
    local_addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl CaptureProxy {
    /// Binds `listen` and starts relaying to `upstream` in the background.
    pub async fn start(
        listen: SocketAddr,
        upstream: SocketAddr,
        slot: FingerprintSlot,
    ) -> Result<Self, CaptureError> {
        let listener = TcpListener::bind(listen)
            .await
            .map_err(|source| CaptureError::Bind {
                addr: listen.to_string(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| CaptureError::Bind {
            addr: listen.to_string(),
            source,
        })?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(accept_loop(listener, upstream, slot, shutdown_rx));

        tracing::info!(listen_addr = %local_addr, upstream = %upstream, "Capture proxy started");

        Ok(Self {
            local_addr,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Closes the listener and aborts every in-flight relay.
    ///
    /// Returns once the listening socket has been released.
    pub async fn stop(&mut self) -> Result<(), CaptureError> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle
                .await
                .map_err(|e| CaptureError::TaskFailed(e.to_string()))?;
        }
        tracing::info!(listen_addr = %self.local_addr, "Capture proxy stopped");
        Ok(())
    }
}

impl Drop for CaptureProxy {
    fn drop(&mut self) {
        if let Some(handle) = &self.handle {
            handle.abort();
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    upstream: SocketAddr,
    slot: FingerprintSlot,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut relays = JoinSet::new();

    loop {
        tokio::select! {
            _ = &mut shutdown_rx => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    relays.spawn(relay_connection(stream, peer, upstream, slot.clone()));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Capture proxy accept failed");
                }
            },
            Some(_) = relays.join_next(), if !relays.is_empty() => {}
        }
    }

    drop(listener);
    relays.shutdown().await;
}

async fn relay_connection(
    client: TcpStream,
    peer: SocketAddr,
    upstream_addr: SocketAddr,
    slot: FingerprintSlot,
) {
    let upstream = match TcpStream::connect(upstream_addr).await {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!(peer = %peer, upstream = %upstream_addr, error = %e, "Capture proxy could not reach upstream");
            return;
        }
    };

    let (mut client_read, mut client_write) = client.into_split();
    let (mut upstream_read, mut upstream_write) = upstream.into_split();

    let outbound = async {
        sniff_and_forward(&mut client_read, &mut upstream_write, &slot).await?;
        tokio::io::copy(&mut client_read, &mut upstream_write).await?;
        upstream_write.shutdown().await
    };
    let inbound = async {
        tokio::io::copy(&mut upstream_read, &mut client_write).await?;
        client_write.shutdown().await
    };

    if let Err(e) = tokio::try_join!(outbound, inbound) {
        tracing::debug!(peer = %peer, error = %e, "Capture relay closed");
    }
}

/// Forwards bytes unchanged until a ClientHello has been seen or sniffing
/// gives up, storing the fingerprint when one is found.
async fn sniff_and_forward<R, W>(
    reader: &mut R,
    writer: &mut W,
    slot: &FingerprintSlot,
) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut seen = Vec::new();
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        writer.write_all(&chunk[..n]).await?;
        seen.extend_from_slice(&chunk[..n]);

        match sniff(&seen) {
            Sniffed::Incomplete => continue,
            Sniffed::NotTls => {
                tracing::debug!("Capture stream is not a TLS handshake, relaying blind");
                return Ok(());
            }
            Sniffed::Hello(hello) => {
                let fingerprint = CapturedFingerprint::from_client_hello(&hello);
                tracing::info!(
                    ja3 = %fingerprint.ja3,
                    sni = fingerprint.server_name.as_deref().unwrap_or("-"),
                    "Captured ClientHello fingerprint"
                );
                slot.store(Some(Arc::new(fingerprint)));
                return Ok(());
            }
        }
    }
}
