use crate::error::ServerError;
use crate::relay::ForwardingEngine;
use http::Request;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;

/// Accepts relay connections until shutdown is broadcast, then drains them.
///
/// Connections still open after `grace` are aborted and reported as a drain
/// timeout.
pub(crate) async fn serve(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    engine: Arc<ForwardingEngine>,
    shutdown: broadcast::Sender<()>,
    grace: Duration,
) -> Result<(), ServerError> {
    let mut shutdown_rx = shutdown.subscribe();
    let mut connections = JoinSet::new();

    let result = loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break Ok(()),
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tracing::debug!(peer = %peer, "Accepted relay connection");
                    connections.spawn(serve_connection(
                        stream,
                        peer,
                        acceptor.clone(),
                        engine.clone(),
                        shutdown.subscribe(),
                    ));
                }
                Err(e) if is_transient(&e) => {
                    tracing::warn!(error = %e, "Transient accept error");
                }
                Err(e) => break Err(ServerError::Accept(e)),
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    };

    drop(listener);
    // Reaches connections accepted before a fatal accept error too
    let _ = shutdown.send(());

    let drained = tokio::time::timeout(grace, async {
        while connections.join_next().await.is_some() {}
    })
    .await;

    if drained.is_err() {
        let remaining = connections.len();
        connections.shutdown().await;
        tracing::warn!(remaining, "Grace period elapsed, closed remaining connections");
        result?;
        return Err(ServerError::DrainTimeout(remaining));
    }

    result
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    acceptor: TlsAcceptor,
    engine: Arc<ForwardingEngine>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let tls = tokio::select! {
        tls = acceptor.accept(stream) => match tls {
            Ok(tls) => tls,
            Err(e) => {
                tracing::debug!(peer = %peer, error = %e, "TLS handshake with control client failed");
                return;
            }
        },
        _ = shutdown_rx.recv() => return,
    };

    let service = service_fn(move |req: Request<Incoming>| {
        let engine = engine.clone();
        async move { Ok::<_, Infallible>(engine.handle(req).await) }
    });

    let conn = hyper::server::conn::http1::Builder::new()
        .preserve_header_case(true)
        .serve_connection(TokioIo::new(tls), service);
    tokio::pin!(conn);

    let result = tokio::select! {
        result = conn.as_mut() => result,
        _ = shutdown_rx.recv() => {
            conn.as_mut().graceful_shutdown();
            conn.await
        }
    };

    if let Err(e) = result {
        tracing::debug!(peer = %peer, error = %e, "Relay connection closed with error");
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}
