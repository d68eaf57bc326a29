//! Graceful shutdown (§5, §7): on SIGINT/SIGTERM, flip `shutdown_in_progress`
//! (so `/status` starts answering 503), wait `shutdown_delay` seconds for
//! load balancers to notice, then exit. A second identical signal during
//! the delay exits immediately.

use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::signal::unix::{signal, SignalKind};
use tracing::info;

use crate::state::SharedState;

/// Waits for SIGINT or SIGTERM, then drives the shutdown sequence. Returns
/// once the process should exit; the caller is expected to call
/// `std::process::exit` (or simply fall off `main`) right after.
pub async fn wait_for_shutdown(state: SharedState) {
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to register SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");

    tokio::select! {
        _ = sigint.recv() => {}
        _ = sigterm.recv() => {}
    }

    info!("received shutdown signal");
    state.shutdown_in_progress.store(true, Ordering::SeqCst);

    if state.config.shutdown_delay == 0 {
        return;
    }

    let delay = Duration::from_secs(state.config.shutdown_delay);
    info!(delay_seconds = state.config.shutdown_delay, "draining before exit");

    tokio::select! {
        _ = sigint.recv() => {
            info!("received second signal, exiting immediately");
        }
        _ = sigterm.recv() => {
            info!("received second signal, exiting immediately");
        }
        _ = tokio::time::sleep(delay) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::state::AppState;
    use std::sync::Arc;

    fn test_config(shutdown_delay: u64) -> AppConfig {
        AppConfig {
            port: 8080,
            tlsport: 8443,
            metrics_port: 8081,
            reuse_port: false,
            name: "test".to_string(),
            domain: None,
            kubeconfig: None,
            reload_every: 30,
            reload_rollup: 1,
            acceptable_update_lag: 0,
            shutdown_delay,
            disable_watch: false,
            ignore_namespaces: Default::default(),
            cert_namespace: None,
            cert_file_pairs: Vec::new(),
            wildcard_cert_prefix: "wildcard".to_string(),
            access_log: false,
        }
    }

    #[tokio::test]
    async fn shutdown_flips_flag_immediately_with_no_delay() {
        let state = Arc::new(AppState::new(test_config(0)));
        state.shutdown_in_progress.store(true, Ordering::SeqCst);
        assert!(!state.is_up());
    }
}
