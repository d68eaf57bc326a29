//! The three listeners (§4.I): plain HTTP, TLS with SNI, and admin. Each
//! runs its own accept loop over a `tokio::net::TcpListener`, spawning one
//! task per connection onto a shared `hyper::server::conn::http1` server.

use std::net::SocketAddr;
use std::sync::Arc;

use hyper::service::service_fn;
use hyper_util::rt::{TokioIo, TokioTimer};
use rustls::ServerConfig;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info};

use crate::certs::reconcile::SniResolver;
use crate::dispatch::dispatch;
use crate::forwarder::Forwarder;
use crate::state::SharedState;
use crate::status;

/// Binds a `TcpListener` at `addr`. With `reuse_port`, the socket is
/// created and bound via `socket2` with `SO_REUSEPORT` set before being
/// handed to tokio, so multiple instances can share the port (§4.I).
fn bind_listener(addr: SocketAddr, reuse_port: bool) -> std::io::Result<TcpListener> {
    if !reuse_port {
        return std::net::TcpListener::bind(addr).and_then(|l| {
            l.set_nonblocking(true)?;
            TcpListener::from_std(l)
        });
    }

    let domain = if addr.is_ipv4() {
        socket2::Domain::IPV4
    } else {
        socket2::Domain::IPV6
    };
    let socket = socket2::Socket::new(domain, socket2::Type::STREAM, Some(socket2::Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_reuse_port(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;
    TcpListener::from_std(socket.into())
}

/// Serves plain HTTP (§4.I). Runs forever; a fatal accept error exits the
/// process (matches the source's `log.Fatal` on listener failure).
pub async fn serve_http(state: SharedState, forwarder: Forwarder, addr: SocketAddr) -> crate::error::Result<()> {
    let listener = bind_listener(addr, state.config.reuse_port)?;
    info!(%addr, "plain http listener started");

    loop {
        let (stream, client_addr) = listener.accept().await?;
        let state = state.clone();
        let forwarder = forwarder.clone();
        tokio::spawn(async move {
            serve_connection(state, forwarder, stream, client_addr, false).await;
        });
    }
}

/// Serves TLS with SNI certificate resolution (§4.D, §4.I). Rejects the
/// handshake (per §7) when the SNI resolver itself cannot produce even a
/// self-signed fallback — surfaced here as a `rustls` handshake failure.
pub async fn serve_tls(state: SharedState, forwarder: Forwarder, addr: SocketAddr) -> crate::error::Result<()> {
    let listener = bind_listener(addr, state.config.reuse_port)?;

    let resolver = Arc::new(SniResolver::new(state.clone())?);
    let mut server_config = ServerConfig::builder_with_protocol_versions(&[&rustls::version::TLS12, &rustls::version::TLS13])
        .with_no_client_auth()
        .with_cert_resolver(resolver);
    server_config.alpn_protocols = vec![b"http/1.1".to_vec()];
    let acceptor = TlsAcceptor::from(Arc::new(server_config));

    info!(%addr, "tls listener started");

    loop {
        let (stream, client_addr) = listener.accept().await?;
        let state = state.clone();
        let forwarder = forwarder.clone();
        let acceptor = acceptor.clone();
        tokio::spawn(async move {
            let tls_stream = match acceptor.accept(stream).await {
                Ok(s) => s,
                Err(err) => {
                    debug!(%client_addr, error = %err, "tls handshake failed");
                    return;
                }
            };
            serve_connection(state, forwarder, tls_stream, client_addr, true).await;
        });
    }
}

/// Serves the admin plane: metrics plus profiling stubs (§6). No TLS, no
/// proxying — every request goes straight to `status::serve_admin`.
pub async fn serve_admin(state: SharedState, addr: SocketAddr) -> crate::error::Result<()> {
    let listener = std::net::TcpListener::bind(addr).and_then(|l| {
        l.set_nonblocking(true)?;
        TcpListener::from_std(l)
    })?;
    info!(%addr, "admin listener started");

    loop {
        let (stream, client_addr) = listener.accept().await?;
        let state = state.clone();
        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let service = service_fn(move |req: http::Request<hyper::body::Incoming>| {
                let resp = status::serve_admin(&state, req.uri().path());
                async move { Ok::<_, std::convert::Infallible>(resp) }
            });
            if let Err(err) = hyper::server::conn::http1::Builder::new()
                .timer(TokioTimer::new())
                .serve_connection(io, service)
                .await
            {
                debug!(%client_addr, error = %err, "admin connection error");
            }
        });
    }
}

async fn serve_connection<IO>(
    state: SharedState,
    forwarder: Forwarder,
    stream: IO,
    client_addr: SocketAddr,
    is_tls: bool,
) where
    IO: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let io = TokioIo::new(stream);
    let service = service_fn(move |req| {
        let state = state.clone();
        let forwarder = forwarder.clone();
        async move { dispatch(state, forwarder, client_addr, is_tls, req).await }
    });

    if let Err(err) = hyper::server::conn::http1::Builder::new()
        .timer(TokioTimer::new())
        .serve_connection(io, service)
        .await
    {
        debug!(%client_addr, error = %err, "connection error");
    }
}

