//! Core routing data model: the types the resolver (`super::resolve`) builds
//! and the dispatcher (`crate::dispatch`) consumes.

use std::collections::HashMap;

use serde::Serialize;
use url::Url;

use crate::balancer::RoundRobin;

/// Identifies one orchestrator object: `(name, namespace)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Object {
    pub name: String,
    pub namespace: String,
}

/// Join key between an Ingress rule and the Service port it targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PortMatch {
    pub object: Object,
    pub source_port: u16,
}

/// Join key between an Ingress rule and the Frontend it produces.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostMatch {
    pub object: Object,
    pub host: String,
}

/// A single ready upstream instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub address: String,
    pub port: u16,
}

/// A Service's port mapping: the port clients dial vs. the port the pod
/// actually listens on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServicePort {
    pub source_port: u16,
    pub target_port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PlainHttpPolicy {
    Allow,
    Redirect,
    Reject,
}

impl Default for PlainHttpPolicy {
    fn default() -> Self {
        PlainHttpPolicy::Redirect
    }
}

impl PlainHttpPolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "allow" => Some(PlainHttpPolicy::Allow),
            "redirect" => Some(PlainHttpPolicy::Redirect),
            "reject" => Some(PlainHttpPolicy::Reject),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum InterceptAction {
    Redirect,
    Respond,
}

/// A non-proxy action declared by Ingress annotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Intercept {
    pub action: InterceptAction,
    pub url: Option<String>,
    pub code: u16,
    pub response_text: Option<String>,
}

impl Intercept {
    pub const DEFAULT_REDIRECT_CODE: u16 = 307;
    pub const DEFAULT_RESPOND_CODE: u16 = 400;

    pub fn redirect(url: String, code: Option<u16>) -> Self {
        let code = match code {
            Some(c @ (301 | 302 | 307)) => c,
            _ => Self::DEFAULT_REDIRECT_CODE,
        };
        Intercept {
            action: InterceptAction::Redirect,
            url: Some(url),
            code,
            response_text: None,
        }
    }

    pub fn respond(code: Option<u16>, text: Option<String>) -> Self {
        let code = match code {
            Some(c @ (400 | 403 | 404 | 410)) => c,
            _ => Self::DEFAULT_RESPOND_CODE,
        };
        Intercept {
            action: InterceptAction::Respond,
            url: None,
            code,
            response_text: text,
        }
    }
}

/// An admitted Ingress rule, reduced to what the merge step needs.
#[derive(Debug, Clone)]
pub struct IngressRule {
    pub scheme: &'static str,
    pub name: String,
    pub source_port: u16,
    pub plain_http_policy: PlainHttpPolicy,
    pub intercept: Option<Intercept>,
}

/// One upstream URL a `PROXY_RR` frontend may forward to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Backend {
    #[serde(rename = "url")]
    pub url: Url,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Action {
    ServeInternal,
    ProxyRr,
    Redirect,
    Respond,
}

/// The routing decision for one hostname.
#[derive(Debug, Clone, Serialize)]
pub struct Frontend {
    pub action: Action,
    pub plain_http_policy: PlainHttpPolicy,
    pub intercept: Option<Intercept>,
    pub backends: Vec<Backend>,
    #[serde(skip)]
    pub rr: Option<RoundRobin>,
}

impl Frontend {
    pub fn intercept(intercept: Intercept, plain_http_policy: PlainHttpPolicy) -> Self {
        let action = match intercept.action {
            InterceptAction::Redirect => Action::Redirect,
            InterceptAction::Respond => Action::Respond,
        };
        Frontend {
            action,
            plain_http_policy,
            intercept: Some(intercept),
            backends: Vec::new(),
            rr: None,
        }
    }

    pub fn proxy(backends: Vec<Backend>, plain_http_policy: PlainHttpPolicy) -> Self {
        let rr = RoundRobin::new(backends.iter().map(|b| b.url.clone()).collect());
        Frontend {
            action: Action::ProxyRr,
            plain_http_policy,
            intercept: None,
            backends,
            rr: Some(rr),
        }
    }
}

/// `map[hostname] Frontend`, the output of one resolve pass.
pub type FrontendMap = HashMap<String, Frontend>;
