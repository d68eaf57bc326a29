//! Certificate reconcile loop (§4.D): parallels the backend reconciler but
//! loads keypairs from one of three sources instead of resolving routes.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::Secret;
use kube::api::ListParams;
use kube::{Api, Client, ResourceExt};
use rustls::crypto::ring::sign::any_supported_type;
use rustls::sign::CertifiedKey;
use tracing::{error, info, warn};
use x509_parser::prelude::{FromDer, X509Certificate};

use super::map::{CertMap, HostCert};
use super::selfsigned;
use crate::error::{Error, Result};
use crate::reload::Coalescer;
use crate::state::SharedState;

pub const SECRET_HOSTNAME_LABEL: &str = "ingress.hostname";

#[derive(Clone)]
pub enum CertSource {
    Kubernetes { namespace: String },
    Files { pairs: Vec<(String, String, String)> },
    Disabled,
}

impl CertSource {
    pub fn from_config(config: &crate::config::AppConfig) -> Self {
        if let Some(namespace) = &config.cert_namespace {
            CertSource::Kubernetes {
                namespace: namespace.clone(),
            }
        } else if !config.cert_file_pairs.is_empty() {
            CertSource::Files {
                pairs: config.cert_file_pairs.clone(),
            }
        } else {
            CertSource::Disabled
        }
    }
}

fn parse_keypair(cert_pem: &[u8], key_pem: &[u8]) -> Result<(Arc<CertifiedKey>, i64)> {
    let cert_der = rustls_pemfile::certs(&mut &cert_pem[..])
        .next()
        .ok_or_else(|| Error::Tls("no certificate PEM block found".to_string()))?
        .map_err(|e| Error::Tls(format!("invalid certificate PEM: {e}")))?;

    let key_der = rustls_pemfile::pkcs8_private_keys(&mut &key_pem[..])
        .next()
        .ok_or_else(|| Error::Tls("no private key PEM block found".to_string()))?
        .map_err(|e| Error::Tls(format!("invalid private key PEM: {e}")))?;

    let signing_key = any_supported_type(&rustls::pki_types::PrivateKeyDer::Pkcs8(key_der))
        .map_err(|e| Error::Tls(format!("unsupported private key type: {e}")))?;

    let expiry_days = match X509Certificate::from_der(&cert_der) {
        Ok((_, parsed)) => {
            let not_after = parsed.validity().not_after.timestamp();
            let now = chrono::Utc::now().timestamp();
            (not_after - now) / 86_400
        }
        Err(e) => {
            warn!(error = %e, "failed to parse certificate for expiry extraction");
            -1
        }
    };

    Ok((Arc::new(CertifiedKey::new(vec![cert_der], signing_key)), expiry_days))
}

/// Hostnames whose secret/file pair carried an unparseable keypair. These
/// never make it into the published `CertMap` (there's no usable key to
/// serve), but still need an `expiry_days = -1` gauge entry so the alerting
/// hook sees them (§4.D, §7).
type FailedHosts = Vec<String>;

async fn load_from_kubernetes(client: &Client, namespace: &str) -> Result<(CertMap, FailedHosts)> {
    let api: Api<Secret> = Api::namespaced(client.clone(), namespace);
    let lp = ListParams::default().labels(SECRET_HOSTNAME_LABEL);
    let secrets = api.list(&lp).await?;

    let mut map = CertMap::new();
    let mut failed = Vec::new();
    for secret in &secrets.items {
        let Some(hostname) = secret
            .labels()
            .get(SECRET_HOSTNAME_LABEL)
            .map(|s| s.to_string())
        else {
            continue;
        };

        let Some(data) = secret.data.as_ref() else {
            continue;
        };
        let Some(cert_raw) = data.get("cert") else {
            warn!(hostname, secret = secret.name_any(), "secret missing 'cert' key");
            continue;
        };
        let Some(key_raw) = data.get("key") else {
            warn!(hostname, secret = secret.name_any(), "secret missing 'key' key");
            continue;
        };

        match parse_keypair(&cert_raw.0, &key_raw.0) {
            Ok((certified_key, expiry_days)) => {
                map.insert(
                    hostname,
                    HostCert {
                        certified_key,
                        expiry_days,
                    },
                );
            }
            Err(err) => {
                error!(hostname, error = %err, "failed to parse x509 keypair from secret");
                failed.push(hostname);
            }
        }
    }

    Ok((map, failed))
}

async fn load_from_files(pairs: &[(String, String, String)]) -> Result<(CertMap, FailedHosts)> {
    let mut map = CertMap::new();
    let mut failed = Vec::new();
    for (host, pub_path, priv_path) in pairs {
        let cert_pem = tokio::fs::read(pub_path).await?;
        let key_pem = tokio::fs::read(priv_path).await?;

        match parse_keypair(&cert_pem, &key_pem) {
            Ok((certified_key, expiry_days)) => {
                map.insert(
                    host.clone(),
                    HostCert {
                        certified_key,
                        expiry_days,
                    },
                );
            }
            Err(err) => {
                error!(host, error = %err, "failed to parse x509 keypair from file pair");
                failed.push(host.clone());
            }
        }
    }
    Ok((map, failed))
}

async fn load(source: &CertSource, client: &Client) -> Result<(CertMap, FailedHosts)> {
    match source {
        CertSource::Kubernetes { namespace } => load_from_kubernetes(client, namespace).await,
        CertSource::Files { pairs } => load_from_files(pairs).await,
        CertSource::Disabled => Ok((CertMap::new(), Vec::new())),
    }
}

fn update_expiry_gauges(state: &SharedState, map: &CertMap, failed: &[String]) {
    state.metrics.cert_expiry_days.reset();
    for (host, cert) in map.iter() {
        state
            .metrics
            .cert_expiry_days
            .with_label_values(&[host])
            .set(cert.expiry_days as f64);
    }
    for host in failed {
        state.metrics.cert_expiry_days.with_label_values(&[host]).set(-1.0);
    }
    let now = chrono::Utc::now().timestamp() as f64;
    state.metrics.cert_expiry_last_update_epoch.set(now);
}

/// Runs forever; no-op loop (logged once) when the source is `Disabled`.
pub async fn run(state: SharedState, client: Client, coalescer: Arc<Coalescer>, source: CertSource) {
    if matches!(source, CertSource::Disabled) {
        info!("certificate loader disabled, no namespace or file pairs configured");
        return;
    }

    coalescer.trigger("initial");

    let timer_coalescer = coalescer.clone();
    let reload_every = Duration::from_secs(state.config.reload_every.max(1));
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(reload_every).await;
            timer_coalescer.trigger("reload-every-time-elapsed");
        }
    });

    let retry_coalescer = coalescer.clone();
    coalescer
        .poll(Duration::from_secs(state.config.reload_rollup.max(1)), |reload| {
            let state = state.clone();
            let client = client.clone();
            let source = source.clone();
            let retry_coalescer = retry_coalescer.clone();
            async move {
                match load(&source, &client).await {
                    Ok((map, failed)) => {
                        state.cert_consecutive_errors.store(0, Ordering::SeqCst);
                        update_expiry_gauges(&state, &map, &failed);
                        state.certs.store(Arc::new(map));
                        info!(reason = reload.reason, "certificate reload applied");
                    }
                    Err(err) => {
                        let consecutive_errors =
                            state.cert_consecutive_errors.fetch_add(1, Ordering::SeqCst) + 1;
                        error!(error = %err, consecutive_errors, "certificate reload failed");
                        retry_coalescer.trigger("retry");
                    }
                }
            }
        })
        .await;
}

/// The SNI resolver: live cert map lookup, falling back to a self-signed
/// certificate when nothing matches (§4.D).
pub struct SniResolver {
    state: SharedState,
    fallback: Arc<CertifiedKey>,
}

impl SniResolver {
    pub fn new(state: SharedState) -> Result<Self> {
        Ok(SniResolver {
            state,
            fallback: selfsigned::generate()?,
        })
    }
}

impl std::fmt::Debug for SniResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SniResolver").finish()
    }
}

impl rustls::server::ResolvesServerCert for SniResolver {
    fn resolve(&self, client_hello: rustls::server::ClientHello) -> Option<Arc<CertifiedKey>> {
        let host = client_hello.server_name()?;
        let certs = self.state.certs.load();
        certs
            .lookup(host, &self.state.config.wildcard_cert_prefix)
            .or_else(|| Some(self.fallback.clone()))
    }
}
