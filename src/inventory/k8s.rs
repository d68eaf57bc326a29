//! Snapshot fetch against the live cluster API, and the `*Like` trait
//! impls that let `super::resolve::resolve` run directly over
//! `k8s_openapi` types.

use k8s_openapi::api::core::v1::{Endpoints, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::{api::ListParams, Api, Client, ResourceExt};
use tracing::warn;

use super::resolve::{EndpointsLike, IngressLike, ServiceLike};
use super::types::{Endpoint, Object, ServicePort};
use crate::error::Result;

/// One admitted rule extracted from an `Ingress`'s `spec.rules`. An Ingress
/// with N rules fans out to N of these; each carries a clone of the
/// Ingress's own metadata/annotations since annotations are per-object, not
/// per-rule.
pub struct IngressRuleRef {
    object: Object,
    host: String,
    path: String,
    service_name: String,
    service_port: Option<u16>,
    annotations: std::collections::BTreeMap<String, String>,
}

impl IngressLike for IngressRuleRef {
    fn object(&self) -> Object {
        self.object.clone()
    }
    fn host(&self) -> &str {
        &self.host
    }
    fn path(&self) -> &str {
        &self.path
    }
    fn backend_service_name(&self) -> &str {
        &self.service_name
    }
    fn backend_service_port(&self) -> Option<u16> {
        self.service_port
    }
    fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(|s| s.as_str())
    }
}

/// Flattens one Ingress object's rules into zero or more `IngressRuleRef`s.
/// Rules with no HTTP path list, or whose sole admitted path has no
/// service backend, are dropped here (the merge step drops the rest).
fn flatten_ingress(ing: &Ingress) -> Vec<IngressRuleRef> {
    let namespace = ing.namespace().unwrap_or_else(|| "default".to_string());
    let annotations = ing.metadata.annotations.clone().unwrap_or_default();

    let Some(spec) = ing.spec.as_ref() else {
        return Vec::new();
    };
    let Some(rules) = spec.rules.as_ref() else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for rule in rules {
        let Some(host) = rule.host.clone() else {
            continue;
        };
        let Some(http) = rule.http.as_ref() else {
            continue;
        };

        let mut chosen_path = None;
        for path in &http.paths {
            let p = path.path.clone().unwrap_or_default();
            if p.is_empty() || p == "/" {
                chosen_path = Some(path);
            }
        }
        let Some(path) = chosen_path else {
            continue;
        };

        let Some(backend_svc) = path.backend.service.as_ref() else {
            continue;
        };

        let service_port = match &backend_svc.port {
            Some(port) => match port.number {
                Some(n) if n > 0 && n < u16::MAX as i32 => Some(n as u16),
                _ => None,
            },
            None => None,
        };

        out.push(IngressRuleRef {
            object: Object {
                name: backend_svc.name.clone(),
                namespace: namespace.clone(),
            },
            host,
            path: path.path.clone().unwrap_or_default(),
            service_name: backend_svc.name.clone(),
            service_port,
            annotations: annotations.clone(),
        });
    }
    out
}

pub struct ServiceRef {
    object: Object,
    ports: Vec<ServicePort>,
}

impl ServiceLike for ServiceRef {
    fn object(&self) -> Object {
        self.object.clone()
    }
    fn ports(&self) -> Vec<ServicePort> {
        self.ports.clone()
    }
}

fn map_service(svc: &Service) -> ServiceRef {
    let object = Object {
        name: svc.name_any(),
        namespace: svc.namespace().unwrap_or_else(|| "default".to_string()),
    };

    let mut ports = Vec::new();
    if let Some(spec) = svc.spec.as_ref() {
        for p in spec.ports.iter().flatten() {
            let source_port = p.port;
            let target_port = match &p.target_port {
                Some(k8s_openapi::apimachinery::pkg::util::intstr::IntOrString::Int(v)) => *v,
                _ => source_port,
            };
            if source_port > 0 && source_port < u16::MAX as i32 && target_port > 0 && target_port < u16::MAX as i32 {
                ports.push(ServicePort {
                    source_port: source_port as u16,
                    target_port: target_port as u16,
                });
            }
        }
    }

    ServiceRef { object, ports }
}

pub struct EndpointsRef {
    object: Object,
    endpoints: Vec<Endpoint>,
}

impl EndpointsLike for EndpointsRef {
    fn object(&self) -> Object {
        self.object.clone()
    }
    fn tcp_endpoints(&self) -> Vec<Endpoint> {
        self.endpoints.clone()
    }
}

fn map_endpoints(ep: &Endpoints) -> EndpointsRef {
    let object = Object {
        name: ep.name_any(),
        namespace: ep.namespace().unwrap_or_else(|| "default".to_string()),
    };

    let mut endpoints = Vec::new();
    for subset in ep.subsets.iter().flatten() {
        for port in subset.ports.iter().flatten() {
            if port.protocol.as_deref().unwrap_or("TCP") != "TCP" {
                continue;
            }
            if port.port <= 0 || port.port >= u16::MAX as i32 {
                continue;
            }
            for addr in subset.addresses.iter().flatten() {
                endpoints.push(Endpoint {
                    address: addr.ip.clone(),
                    port: port.port as u16,
                });
            }
        }
    }

    EndpointsRef { object, endpoints }
}

/// One point-in-time read of the three inventory object kinds, ready to
/// feed straight into `resolve::resolve`.
pub struct Snapshot {
    pub ingress_rules: Vec<IngressRuleRef>,
    pub services: Vec<ServiceRef>,
    pub endpoints: Vec<EndpointsRef>,
}

pub async fn snapshot(client: &Client) -> Result<Snapshot> {
    let ingress_api: Api<Ingress> = Api::all(client.clone());
    let service_api: Api<Service> = Api::all(client.clone());
    let endpoints_api: Api<Endpoints> = Api::all(client.clone());

    let lp = ListParams::default();
    let (ingresses, services, endpoints) = tokio::try_join!(
        ingress_api.list(&lp),
        service_api.list(&lp),
        endpoints_api.list(&lp),
    )?;

    let ingress_rules = ingresses.items.iter().flat_map(flatten_ingress).collect();
    let services = services.items.iter().map(map_service).collect();
    let endpoints = endpoints.items.iter().map(map_endpoints).collect();

    if ingress_rules.is_empty() {
        warn!("snapshot resolved zero admitted ingress rules");
    }

    Ok(Snapshot {
        ingress_rules,
        services,
        endpoints,
    })
}
