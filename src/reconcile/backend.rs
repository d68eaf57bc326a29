//! Backend reconcile loop (§4.C): drives the inventory resolver from the
//! reload coalescer and publishes the result atomically.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use kube::Client;
use tracing::{error, info};

use crate::inventory::{k8s as inv_k8s, resolve};
use crate::reload::Coalescer;
use crate::state::SharedState;

const SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(5);

/// Runs forever: feeds a forced timer tick and (unless disabled) watcher
/// events into the coalescer, resolving and publishing a new frontend map
/// on every coalesced tick. Never returns.
pub async fn run(state: SharedState, client: Client, coalescer: Arc<Coalescer>) {
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
            let retry_coalescer = retry_coalescer.clone();
            async move {
                match apply(&state, &client).await {
                    Ok(()) => {
                        state.backend_consecutive_errors.store(0, Ordering::SeqCst);
                        state.metrics.reloads_total.inc();
                        state.note_successful_update();
                        info!(reason = reload.reason, "backend reload applied");
                    }
                    Err(err) => {
                        let consecutive_errors =
                            state.backend_consecutive_errors.fetch_add(1, Ordering::SeqCst) + 1;
                        error!(
                            error = %err,
                            consecutive_errors,
                            "backend reload failed"
                        );
                        retry_coalescer.trigger("retry");
                    }
                }
            }
        })
        .await;
}

async fn apply(state: &SharedState, client: &Client) -> crate::error::Result<()> {
    let snapshot = tokio::time::timeout(SNAPSHOT_TIMEOUT, inv_k8s::snapshot(client))
        .await
        .map_err(|_| crate::error::Error::Timeout("backend snapshot"))??;

    let frontends = resolve::resolve(
        &snapshot.ingress_rules,
        &snapshot.services,
        &snapshot.endpoints,
    );

    state.frontends.store(Arc::new(frontends));
    Ok(())
}
