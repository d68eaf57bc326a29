//! Shared outbound HTTP transport: a pooled `hyper-util` client over a
//! DNS-cached connector, with bounded per-host idle connections and a dial
//! timeout. Upstream endpoints are always plain HTTP since the inventory
//! resolver only ever materializes `http://` backends, so there is no TLS
//! handshake on this path; TLS minimum version is instead a property of the
//! inbound listener (`crate::listener`).

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use http::Uri;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty, Full};
use hyper_util::client::legacy::Client as LegacyClient;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use tokio::net::TcpStream;
use tower_service::Service;
use tracing::debug;

use crate::dns::DnsCache;
use crate::error::{Error, Result};

const DIAL_TIMEOUT: Duration = Duration::from_secs(1);
const POOL_IDLE_PER_HOST: usize = 10;
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(5);

pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

pub fn empty_body() -> ProxyBody {
    Empty::<Bytes>::new().map_err(|never| match never {}).boxed()
}

pub fn full_body(data: impl Into<Bytes>) -> ProxyBody {
    Full::new(data.into()).map_err(|never| match never {}).boxed()
}

/// Dials backends through the DNS cache instead of letting the connector
/// resolve directly, so a cache miss falls back to an uncached lookup
/// rather than silently dialing an empty host (§9).
#[derive(Clone)]
struct CachedConnector {
    dns: DnsCache,
}

impl Service<Uri> for CachedConnector {
    type Response = TokioIo<TcpStream>;
    type Error = std::io::Error;
    type Future = Pin<Box<dyn Future<Output = std::result::Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, uri: Uri) -> Self::Future {
        let dns = self.dns.clone();
        Box::pin(async move {
            let host = uri.host().unwrap_or_default().to_string();
            let port = uri.port_u16().unwrap_or(80);

            let addr = match dns.resolve(&host).await {
                Ok(addr) => addr,
                Err(err) => {
                    debug!(host, error = %err, "dns resolution failed, dialing host directly");
                    return TcpStream::connect((host.as_str(), port))
                        .await
                        .map(TokioIo::new);
                }
            };

            tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect((addr, port)))
                .await
                .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "dial timed out"))?
                .map(TokioIo::new)
        })
    }
}

/// The shared outbound transport every `PROXY_RR` frontend forwards
/// through.
#[derive(Clone)]
pub struct Forwarder {
    client: LegacyClient<CachedConnector, ProxyBody>,
}

impl Forwarder {
    pub fn new(dns: DnsCache) -> Self {
        let client = LegacyClient::builder(TokioExecutor::new())
            .timer(TokioTimer::new())
            .pool_max_idle_per_host(POOL_IDLE_PER_HOST)
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .build(CachedConnector { dns });

        Forwarder { client }
    }

    /// Forwards `req` to `upstream` and returns whatever the upstream
    /// returned; the caller owns translating transport errors into a
    /// client-facing status.
    pub async fn forward(
        &self,
        req: http::Request<ProxyBody>,
    ) -> Result<http::Response<hyper::body::Incoming>> {
        self.client
            .request(req)
            .await
            .map_err(|e| Error::Other(anyhow::anyhow!("upstream request failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dial_times_out_on_unreachable_address() {
        let dns = DnsCache::new();
        let mut connector = CachedConnector { dns };
        // TEST-NET-1, reserved for documentation; never routable.
        let uri: Uri = "http://192.0.2.1:9".parse().unwrap();
        let result = connector.call(uri).await;
        assert!(result.is_err());
    }
}
