//! Server module for accepting connections and serving HTTP/1.1.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Instant;

use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::TokioIo;
use strata_core::query::params::mask_path_and_query;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::handlers::{ProxyResponse, SharedProxy};

/// Accept connections on `listener` until `shutdown` is cancelled.
///
/// Each connection is served on its own task. With a TLS acceptor the
/// handshake happens on that task too, so a slow client cannot stall accepts.
pub async fn start_server(
    listener: TcpListener,
    proxy: SharedProxy,
    tls_acceptor: Option<TlsAcceptor>,
    shutdown: CancellationToken,
) -> Result<()> {
    info!(
        addr = %listener.local_addr()?,
        tls = tls_acceptor.is_some(),
        backends = proxy.registry().len(),
        "InfluxDB proxy is running"
    );

    loop {
        let (stream, peer) = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(err) => {
                    warn!(error = %err, "accept failed");
                    continue;
                }
            },
        };
        let proxy = proxy.clone();

        if let Some(acceptor) = &tls_acceptor {
            let acceptor = acceptor.clone();
            tokio::task::spawn(async move {
                match acceptor.accept(stream).await {
                    Ok(tls_stream) => serve_connection(tls_stream, proxy, peer).await,
                    Err(e) => warn!(%peer, error = %e, "TLS handshake failed"),
                }
            });
        } else {
            // Unencrypted fallback
            tokio::task::spawn(serve_connection(stream, proxy, peer));
        }
    }

    info!("listener closed");
    Ok(())
}

async fn serve_connection<S>(stream: S, proxy: SharedProxy, peer: SocketAddr)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let io = TokioIo::new(stream);
    let service = service_fn(move |req| handle_request(proxy.clone(), req, peer));
    if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
        debug!(%peer, error = ?err, "error serving connection");
    }
}

/// Serve one request and write the access-log line with credentials masked.
async fn handle_request(
    proxy: SharedProxy,
    req: Request<Incoming>,
    peer: SocketAddr,
) -> std::result::Result<ProxyResponse, Infallible> {
    let start = Instant::now();
    let method = req.method().clone();
    let uri = mask_path_and_query(req.uri().path(), req.uri().query());

    let response = proxy.handle(req).await;

    info!(
        %method,
        uri = %uri,
        %peer,
        status = response.status().as_u16(),
        latency = ?start.elapsed(),
        "request"
    );
    Ok(response)
}
