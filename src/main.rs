mod balancer;
mod certs;
mod config;
mod dispatch;
mod dns;
mod error;
mod forwarder;
mod inventory;
mod listener;
mod metrics;
mod reconcile;
mod reload;
mod shutdown;
mod state;
mod status;
mod watchers;

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::certs::reconcile::CertSource;
use crate::config::{AppConfig, Cli, LogFormat};
use crate::forwarder::Forwarder;
use crate::reload::Coalescer;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let log_format = cli.log_format;
    let log_level = cli.log_level.clone();
    init_tracing(log_format, log_level.as_deref());

    let config = AppConfig::from_cli(cli)?;

    if let Some(kubeconfig) = &config.kubeconfig {
        std::env::set_var("KUBECONFIG", kubeconfig);
    }
    let client = kube::Client::try_default().await?;

    let state = Arc::new(AppState::new(config));
    let forwarder = Forwarder::new(dns::DnsCache::new());

    let backend_coalescer = Arc::new(Coalescer::new());
    tokio::spawn(reconcile::backend::run(
        state.clone(),
        client.clone(),
        backend_coalescer.clone(),
    ));

    if !state.config.disable_watch {
        let ignore_namespaces = state.config.ignore_namespaces.clone();
        tokio::spawn(watchers::k8s::watch_backends(
            client.clone(),
            ignore_namespaces,
            backend_coalescer,
        ));
    }

    let cert_source = CertSource::from_config(&state.config);
    let cert_coalescer = Arc::new(Coalescer::new());
    tokio::spawn(certs::reconcile::run(
        state.clone(),
        client.clone(),
        cert_coalescer.clone(),
        cert_source.clone(),
    ));

    if !state.config.disable_watch {
        match &cert_source {
            CertSource::Kubernetes { .. } => {
                tokio::spawn(watchers::k8s::watch_secrets(client.clone(), cert_coalescer));
            }
            CertSource::Files { pairs } => {
                let paths: Vec<String> = pairs
                    .iter()
                    .flat_map(|(_, pub_path, priv_path)| [pub_path.clone(), priv_path.clone()])
                    .collect();
                tokio::spawn(watchers::files::watch_files(paths, cert_coalescer));
            }
            CertSource::Disabled => {}
        }
    }

    let http_addr: std::net::SocketAddr = ([0, 0, 0, 0], state.config.port).into();
    let tls_addr: std::net::SocketAddr = ([0, 0, 0, 0], state.config.tlsport).into();
    let admin_addr: std::net::SocketAddr = ([0, 0, 0, 0], state.config.metrics_port).into();

    let http_task = tokio::spawn(listener::serve_http(state.clone(), forwarder.clone(), http_addr));
    let tls_task = tokio::spawn(listener::serve_tls(state.clone(), forwarder, tls_addr));
    let admin_task = tokio::spawn(listener::serve_admin(state.clone(), admin_addr));

    tokio::select! {
        result = http_task => {
            result??;
        }
        result = tls_task => {
            result??;
        }
        result = admin_task => {
            result??;
        }
        _ = shutdown::wait_for_shutdown(state.clone()) => {
            tracing::info!("shutdown sequence complete, exiting");
        }
    }

    Ok(())
}

fn init_tracing(format: LogFormat, log_level: Option<&str>) {
    let filter = match log_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);

    match format {
        LogFormat::Text => subscriber.init(),
        LogFormat::Json => subscriber.json().init(),
    }
}
