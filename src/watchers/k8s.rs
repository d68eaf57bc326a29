//! Cluster-side change watchers (§4.E): Ingress/Service/Endpoints feed the
//! backend coalescer, labeled Secrets feed the cert coalescer. Endpoint
//! events from ignored namespaces are dropped here, not downstream.

use std::collections::HashSet;
use std::sync::Arc;

use futures_util::StreamExt;
use k8s_openapi::api::core::v1::{Endpoints, Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client, ResourceExt};
use tracing::warn;

use crate::certs::reconcile::SECRET_HOSTNAME_LABEL;
use crate::reload::Coalescer;

/// Watches Ingress and Service objects unconditionally, and Endpoints
/// objects outside `ignore_namespaces`. Any admitted event triggers
/// `"api-change-backends"`. Runs until the stream ends (only happens on a
/// fatal watch error after `kube`'s own retry budget is exhausted).
pub async fn watch_backends(client: Client, ignore_namespaces: HashSet<String>, coalescer: Arc<Coalescer>) {
    let ingress_api: Api<Ingress> = Api::all(client.clone());
    let service_api: Api<Service> = Api::all(client.clone());
    let endpoints_api: Api<Endpoints> = Api::all(client.clone());

    let ingress_coalescer = coalescer.clone();
    let ingress_task = tokio::spawn(async move {
        let mut stream = watcher(ingress_api, watcher::Config::default()).default_backoff().boxed();
        while let Some(event) = stream.next().await {
            match event {
                Ok(watcher::Event::Apply(_) | watcher::Event::Delete(_) | watcher::Event::InitApply(_)) => {
                    ingress_coalescer.trigger("api-change-backends");
                }
                Ok(_) => {}
                Err(err) => warn!(error = %err, "ingress watch error"),
            }
        }
    });

    let service_coalescer = coalescer.clone();
    let service_task = tokio::spawn(async move {
        let mut stream = watcher(service_api, watcher::Config::default()).default_backoff().boxed();
        while let Some(event) = stream.next().await {
            match event {
                Ok(watcher::Event::Apply(_) | watcher::Event::Delete(_) | watcher::Event::InitApply(_)) => {
                    service_coalescer.trigger("api-change-backends");
                }
                Ok(_) => {}
                Err(err) => warn!(error = %err, "service watch error"),
            }
        }
    });

    let endpoints_coalescer = coalescer.clone();
    let endpoints_task = tokio::spawn(async move {
        let mut stream = watcher(endpoints_api, watcher::Config::default()).default_backoff().boxed();
        while let Some(event) = stream.next().await {
            match event {
                Ok(watcher::Event::Apply(ep) | watcher::Event::InitApply(ep)) => {
                    if !ignore_namespaces.contains(&ep.namespace().unwrap_or_default()) {
                        endpoints_coalescer.trigger("api-change-backends");
                    }
                }
                Ok(watcher::Event::Delete(ep)) => {
                    if !ignore_namespaces.contains(&ep.namespace().unwrap_or_default()) {
                        endpoints_coalescer.trigger("api-change-backends");
                    }
                }
                Ok(_) => {}
                Err(err) => warn!(error = %err, "endpoints watch error"),
            }
        }
    });

    let _ = tokio::join!(ingress_task, service_task, endpoints_task);
}

/// Watches Secrets carrying the `ingress.hostname` label; any admitted
/// event triggers a cert reload.
pub async fn watch_secrets(client: Client, coalescer: Arc<Coalescer>) {
    let api: Api<Secret> = Api::all(client);
    let config = watcher::Config::default().labels(SECRET_HOSTNAME_LABEL);
    let mut stream = watcher(api, config).default_backoff().boxed();

    while let Some(event) = stream.next().await {
        match event {
            Ok(watcher::Event::Apply(_) | watcher::Event::Delete(_) | watcher::Event::InitApply(_)) => {
                coalescer.trigger("api-change-secrets");
            }
            Ok(_) => {}
            Err(err) => warn!(error = %err, "secret watch error"),
        }
    }
}
