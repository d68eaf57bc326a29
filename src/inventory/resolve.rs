//! The merge algorithm (§4.B): Ingresses + Services + Endpoints -> FrontendMap.

use std::collections::HashMap;

use tracing::{debug, warn};

use super::types::{
    Backend, Endpoint, Frontend, FrontendMap, HostMatch, Intercept, InterceptAction,
    IngressRule, Object, PlainHttpPolicy, PortMatch, ServicePort,
};

/// Anything that looks enough like an admitted Ingress rule to feed the
/// merge algorithm. The production implementation backs this with
/// `networking.k8s.io/v1` objects; tests back it with plain structs.
pub trait IngressLike {
    fn object(&self) -> Object;
    fn host(&self) -> &str;
    fn path(&self) -> &str;
    /// `None` if the backend references a named port rather than a number
    /// (unsupported; the rule is dropped with a warn log).
    fn backend_service_name(&self) -> &str;
    fn backend_service_port(&self) -> Option<u16>;
    fn annotation(&self, key: &str) -> Option<&str>;
}

/// Anything that looks enough like an admitted Service port map.
pub trait ServiceLike {
    fn object(&self) -> Object;
    fn ports(&self) -> Vec<ServicePort>;
}

/// Anything that looks enough like an admitted Endpoints object.
pub trait EndpointsLike {
    fn object(&self) -> Object;
    fn tcp_endpoints(&self) -> Vec<Endpoint>;
}

fn parse_plain_http_policy<I: IngressLike>(rule: &I) -> PlainHttpPolicy {
    rule.annotation("shelob.plain.http.policy")
        .and_then(PlainHttpPolicy::parse)
        .unwrap_or_default()
}

/// Annotation precedence: `shelob.redirect.url` beats `shelob.response.code`
/// beats plain service routing.
fn parse_intercept<I: IngressLike>(rule: &I) -> Option<Intercept> {
    if let Some(url) = rule.annotation("shelob.redirect.url") {
        if !url.is_empty() {
            let code = rule
                .annotation("shelob.redirect.code")
                .and_then(|v| v.parse::<u16>().ok());
            return Some(Intercept::redirect(url.to_string(), code));
        }
    }

    if let Some(code_str) = rule.annotation("shelob.response.code") {
        if let Ok(code) = code_str.parse::<u16>() {
            let text = rule.annotation("shelob.response.text").map(|s| s.to_string());
            return Some(Intercept::respond(Some(code), text));
        }
    }

    None
}

fn admit_ingress_rule<I: IngressLike>(rule: &I) -> Option<(HostMatch, IngressRule)> {
    if rule.host().is_empty() {
        return None;
    }
    if !(rule.path().is_empty() || rule.path() == "/") {
        debug!(host = rule.host(), path = rule.path(), "ignoring ingress rule for non-root path");
        return None;
    }

    let plain_http_policy = parse_plain_http_policy(rule);
    let intercept = parse_intercept(rule);

    let source_port = match intercept {
        Some(_) => 0,
        None => match rule.backend_service_port() {
            Some(p) => p,
            None => {
                warn!(
                    name = rule.backend_service_name(),
                    "dropping ingress backend with invalid port (hint: port names not supported)"
                );
                return None;
            }
        },
    };

    let object = Object {
        name: rule.backend_service_name().to_string(),
        namespace: rule.object().namespace,
    };

    Some((
        HostMatch {
            object,
            host: rule.host().to_string(),
        },
        IngressRule {
            scheme: "http",
            name: rule.backend_service_name().to_string(),
            source_port,
            plain_http_policy,
            intercept,
        },
    ))
}

fn index_services<S: ServiceLike>(services: &[S]) -> HashMap<PortMatch, ServicePort> {
    let mut out = HashMap::new();
    for svc in services {
        let object = svc.object();
        for port in svc.ports() {
            if port.source_port == 0 || port.target_port == 0 {
                continue;
            }
            out.insert(
                PortMatch {
                    object: object.clone(),
                    source_port: port.source_port,
                },
                port,
            );
        }
    }
    out
}

fn index_endpoints<E: EndpointsLike>(endpoints: &[E]) -> HashMap<Object, Vec<Endpoint>> {
    let mut out = HashMap::new();
    for ep in endpoints {
        out.insert(ep.object(), ep.tcp_endpoints());
    }
    out
}

fn backend_list(scheme: &str, service: Option<&ServicePort>, endpoints: &[Endpoint]) -> Vec<Backend> {
    let Some(service) = service else {
        return Vec::new();
    };
    endpoints
        .iter()
        .filter(|e| e.port == service.target_port)
        .filter_map(|e| {
            url::Url::parse(&format!("{scheme}://{}:{}", e.address, e.port))
                .ok()
                .map(|url| Backend { url })
        })
        .collect()
}

/// Merges snapshot lists into a hostname-keyed frontend table.
pub fn resolve<I: IngressLike, S: ServiceLike, E: EndpointsLike>(
    ingress_rules: &[I],
    services: &[S],
    endpoints: &[E],
) -> FrontendMap {
    let service_index = index_services(services);
    let endpoint_index = index_endpoints(endpoints);

    let mut admitted: HashMap<HostMatch, IngressRule> = HashMap::new();
    for rule in ingress_rules {
        if let Some((host_match, ingress_rule)) = admit_ingress_rule(rule) {
            admitted.insert(host_match, ingress_rule);
        }
    }

    let mut out = FrontendMap::new();
    for (host_match, ingress_rule) in admitted {
        if let Some(intercept) = ingress_rule.intercept {
            out.insert(
                host_match.host,
                Frontend::intercept(intercept, ingress_rule.plain_http_policy),
            );
            continue;
        }

        let port_match = PortMatch {
            object: host_match.object.clone(),
            source_port: ingress_rule.source_port,
        };
        let service = service_index.get(&port_match);
        let empty = Vec::new();
        let endpoints = endpoint_index.get(&host_match.object).unwrap_or(&empty);
        let backends = backend_list(ingress_rule.scheme, service, endpoints);

        if backends.is_empty() {
            debug!(host = %host_match.host, "omitting host with no live backends and no intercept");
            continue;
        }

        out.insert(
            host_match.host,
            Frontend::proxy(backends, ingress_rule.plain_http_policy),
        );
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::types::Action;

    struct FakeIngress {
        object: Object,
        host: String,
        path: String,
        service_name: String,
        service_port: Option<u16>,
        annotations: HashMap<String, String>,
    }

    impl IngressLike for FakeIngress {
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

    struct FakeService {
        object: Object,
        ports: Vec<ServicePort>,
    }

    impl ServiceLike for FakeService {
        fn object(&self) -> Object {
            self.object.clone()
        }
        fn ports(&self) -> Vec<ServicePort> {
            self.ports.clone()
        }
    }

    struct FakeEndpoints {
        object: Object,
        endpoints: Vec<Endpoint>,
    }

    impl EndpointsLike for FakeEndpoints {
        fn object(&self) -> Object {
            self.object.clone()
        }
        fn tcp_endpoints(&self) -> Vec<Endpoint> {
            self.endpoints.clone()
        }
    }

    fn obj(name: &str) -> Object {
        Object {
            name: name.to_string(),
            namespace: "default".to_string(),
        }
    }

    #[test]
    fn merges_ingress_service_endpoints_into_proxy_frontend() {
        let ingress = vec![FakeIngress {
            object: obj("web-ing"),
            host: "example.com".to_string(),
            path: "/".to_string(),
            service_name: "web".to_string(),
            service_port: Some(80),
            annotations: HashMap::new(),
        }];
        let services = vec![FakeService {
            object: obj("web"),
            ports: vec![ServicePort {
                source_port: 80,
                target_port: 8080,
            }],
        }];
        let endpoints = vec![FakeEndpoints {
            object: obj("web"),
            endpoints: vec![
                Endpoint {
                    address: "10.0.0.1".to_string(),
                    port: 8080,
                },
                Endpoint {
                    address: "10.0.0.2".to_string(),
                    port: 8080,
                },
            ],
        }];

        let frontends = resolve(&ingress, &services, &endpoints);
        let fe = frontends.get("example.com").expect("frontend present");
        assert_eq!(fe.action, Action::ProxyRr);
        assert_eq!(fe.backends.len(), 2);
    }

    #[test]
    fn redirect_annotation_wins_over_response_annotation() {
        let mut annotations = HashMap::new();
        annotations.insert("shelob.redirect.url".to_string(), "https://example.org".to_string());
        annotations.insert("shelob.response.code".to_string(), "404".to_string());

        let ingress = vec![FakeIngress {
            object: obj("web-ing"),
            host: "example.com".to_string(),
            path: "/".to_string(),
            service_name: "web".to_string(),
            service_port: Some(80),
            annotations,
        }];

        let frontends: FrontendMap = resolve(&ingress, &Vec::<FakeService>::new(), &Vec::<FakeEndpoints>::new());
        let fe = frontends.get("example.com").unwrap();
        assert_eq!(fe.action, Action::Redirect);
        assert_eq!(fe.intercept.as_ref().unwrap().action, InterceptAction::Redirect);
    }

    #[test]
    fn host_with_no_backend_and_no_intercept_is_omitted() {
        let ingress = vec![FakeIngress {
            object: obj("web-ing"),
            host: "orphan.example.com".to_string(),
            path: "/".to_string(),
            service_name: "nope".to_string(),
            service_port: Some(80),
            annotations: HashMap::new(),
        }];

        let frontends: FrontendMap = resolve(&ingress, &Vec::<FakeService>::new(), &Vec::<FakeEndpoints>::new());
        assert!(frontends.is_empty());
    }

    #[test]
    fn named_service_port_is_dropped() {
        let ingress = vec![FakeIngress {
            object: obj("web-ing"),
            host: "example.com".to_string(),
            path: "/".to_string(),
            service_name: "web".to_string(),
            service_port: None,
            annotations: HashMap::new(),
        }];

        let frontends: FrontendMap = resolve(&ingress, &Vec::<FakeService>::new(), &Vec::<FakeEndpoints>::new());
        assert!(frontends.is_empty());
    }

    #[test]
    fn non_root_path_rule_is_ignored() {
        let ingress = vec![FakeIngress {
            object: obj("web-ing"),
            host: "example.com".to_string(),
            path: "/admin".to_string(),
            service_name: "web".to_string(),
            service_port: Some(80),
            annotations: HashMap::new(),
        }];

        let frontends: FrontendMap = resolve(&ingress, &Vec::<FakeService>::new(), &Vec::<FakeEndpoints>::new());
        assert!(frontends.is_empty());
    }
}
