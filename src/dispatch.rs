//! The per-request pipeline: host normalization, frontend lookup, plain-HTTP
//! policy, action execution, metrics, access log. Plain-HTTP policy folds
//! into a request-local decision rather than mutating the shared
//! `Frontend`, so concurrent requests against the same frontend never race
//! on its scheme policy.

use std::net::SocketAddr;
use std::time::Instant;

use http::{HeaderValue, Request, Response, StatusCode};
use hyper::body::Incoming;
use tracing::info;

use crate::balancer::RoundRobin;
use crate::forwarder::{empty_body, full_body, Forwarder, ProxyBody};
use crate::inventory::{Action, Frontend, PlainHttpPolicy};
use crate::state::SharedState;
use crate::status;

const XFH_HEADER: &str = "x-forwarded-host";

/// What this request actually does, after folding in plain-HTTP policy.
/// Never written back to the shared `Frontend`.
enum ResolvedAction {
    ServeInternal,
    Proxy(RoundRobin),
    Redirect { location: String, code: u16 },
    Respond { code: u16, text: Option<String> },
}

fn kind_label(action: &ResolvedAction) -> &'static str {
    match action {
        ResolvedAction::ServeInternal => "internal",
        ResolvedAction::Proxy(_) => "proxy",
        ResolvedAction::Redirect { .. } => "redirect",
        ResolvedAction::Respond { .. } => "respond",
    }
}

/// §4.H step 2: collapse repeated/comma-joined `X-Forwarded-Host` into a
/// single value, or report the "must not be repeated" violation.
fn normalize_forwarded_host(req: &Request<Incoming>) -> std::result::Result<Option<String>, ()> {
    let mut values = req.headers().get_all(XFH_HEADER).iter();
    let Some(first) = values.next() else {
        return Ok(None);
    };
    if values.next().is_some() {
        return Err(());
    }
    let Ok(raw) = first.to_str() else {
        return Err(());
    };
    let host = raw.split(',').next().unwrap_or(raw).trim().to_string();
    Ok(Some(host))
}

fn strip_port(host: &str) -> &str {
    host.split_once(':').map(|(h, _)| h).unwrap_or(host)
}

fn https_clone_url(host: &str, path_and_query: &str) -> String {
    format!("https://{host}{path_and_query}")
}

/// §4.H step 6 redirect: substitutes the request's path+query when the
/// configured redirect URL carries none of its own.
fn redirect_location(base: &str, path_and_query: &str) -> String {
    let Ok(parsed) = url::Url::parse(base) else {
        return base.to_string();
    };
    if !parsed.path().is_empty() && parsed.path() != "/" {
        return base.to_string();
    }
    let authority = match parsed.port() {
        Some(port) => format!("{}:{port}", parsed.host_str().unwrap_or_default()),
        None => parsed.host_str().unwrap_or_default().to_string(),
    };
    format!("{}://{authority}{path_and_query}", parsed.scheme())
}

fn path_and_query(req: &Request<Incoming>) -> String {
    req.uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string())
}

/// Resolves the frontend's declared action plus plain-HTTP policy into
/// what this specific request should do.
fn resolve_action(frontend: &Frontend, is_tls: bool, host: &str, req: &Request<Incoming>) -> ResolvedAction {
    if !is_tls {
        match frontend.plain_http_policy {
            PlainHttpPolicy::Redirect => {
                return ResolvedAction::Redirect {
                    location: https_clone_url(host, &path_and_query(req)),
                    code: 302,
                };
            }
            PlainHttpPolicy::Reject => {
                return ResolvedAction::Respond { code: 403, text: None };
            }
            PlainHttpPolicy::Allow => {}
        }
    }

    match frontend.action {
        Action::ServeInternal => ResolvedAction::ServeInternal,
        Action::ProxyRr => match &frontend.rr {
            Some(rr) => ResolvedAction::Proxy(rr.clone()),
            None => ResolvedAction::Respond {
                code: 503,
                text: None,
            },
        },
        Action::Redirect => {
            let intercept = frontend.intercept.as_ref().expect("redirect frontend carries an intercept");
            ResolvedAction::Redirect {
                location: redirect_location(
                    intercept.url.as_deref().unwrap_or_default(),
                    &path_and_query(req),
                ),
                code: intercept.code,
            }
        }
        Action::Respond => {
            let intercept = frontend.intercept.as_ref().expect("respond frontend carries an intercept");
            ResolvedAction::Respond {
                code: intercept.code,
                text: intercept.response_text.clone(),
            }
        }
    }
}

fn respond_with_reason(code: u16, text: Option<String>) -> Response<ProxyBody> {
    let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = text.unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("unknown status")
            .to_string()
    });
    Response::builder()
        .status(status)
        .header(http::header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(full_body(body))
        .expect("static response builder never fails")
}

fn redirect_response(location: String, code: u16) -> Response<ProxyBody> {
    let status = StatusCode::from_u16(code).unwrap_or(StatusCode::TEMPORARY_REDIRECT);
    let mut resp = Response::builder().status(status);
    if let Ok(value) = HeaderValue::from_str(&location) {
        resp = resp.header(http::header::LOCATION, value);
    }
    resp.body(empty_body()).expect("static response builder never fails")
}

async fn proxy_response(
    forwarder: &Forwarder,
    rr: &RoundRobin,
    host: &str,
    is_tls: bool,
    client_addr: SocketAddr,
    mut req: Request<Incoming>,
) -> Response<ProxyBody> {
    let Some(backend) = rr.next() else {
        return respond_with_reason(503, None);
    };

    let pq = path_and_query(&req);
    let authority = match backend.port() {
        Some(port) => format!("{}:{port}", backend.host_str().unwrap_or_default()),
        None => backend.host_str().unwrap_or_default().to_string(),
    };
    let uri = match http::Uri::builder()
        .scheme(backend.scheme())
        .authority(authority)
        .path_and_query(pq.as_str())
        .build()
    {
        Ok(uri) => uri,
        Err(_) => return respond_with_reason(502, Some("invalid upstream URL".to_string())),
    };
    *req.uri_mut() = uri;

    // The forwarder passes the original Host header downstream (§4.F); we
    // only add client-identifying headers, never overwrite Host.
    if let Ok(value) = HeaderValue::from_str(&client_addr.ip().to_string()) {
        req.headers_mut().insert("x-forwarded-for", value);
    }
    if let Ok(value) = HeaderValue::from_str(host) {
        req.headers_mut().insert("x-forwarded-host", value);
    }
    // §4.H step 5: backends learn the inbound scheme the client actually used.
    let proto = if is_tls { "https" } else { "http" };
    req.headers_mut()
        .insert("x-forwarded-proto", HeaderValue::from_static(proto));

    let (parts, body) = req.into_parts();
    let boxed_req = Request::from_parts(parts, http_body_util::BodyExt::boxed(body));

    match forwarder.forward(boxed_req).await {
        Ok(resp) => {
            let (parts, body) = resp.into_parts();
            Response::from_parts(parts, http_body_util::BodyExt::boxed(body))
        }
        Err(err) => {
            tracing::warn!(error = %err, host, "upstream request failed");
            respond_with_reason(502, Some("bad gateway".to_string()))
        }
    }
}

/// Entry point wired into the hyper service for both the plain-HTTP and
/// TLS listeners (§4.I); `is_tls` distinguishes them for X-Forwarded-Proto
/// and plain-HTTP policy.
pub async fn dispatch(
    state: SharedState,
    forwarder: Forwarder,
    client_addr: SocketAddr,
    is_tls: bool,
    req: Request<Incoming>,
) -> std::result::Result<Response<ProxyBody>, std::convert::Infallible> {
    let start = Instant::now();
    let method = req.method().to_string();
    let url = req.uri().to_string();
    let user_agent = req
        .headers()
        .get(http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();
    let protocol = format!("{:?}", req.version());
    let raw_host = req
        .headers()
        .get(http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let host = match normalize_forwarded_host(&req) {
        Ok(Some(forwarded)) => forwarded,
        Ok(None) => raw_host.clone(),
        Err(()) => {
            let resp = respond_with_reason(400, Some("X-Forwarded-Host must not be repeated".to_string()));
            record(&state, &raw_host, 400, &method, "respond", start, client_addr, &user_agent, &url, &protocol);
            return Ok(resp);
        }
    };
    let lookup_key = strip_port(&host).to_string();

    let frontends = state.frontends.load();
    let Some(frontend) = frontends.get(&lookup_key) else {
        let resp = status::serve_internal(&state, req.uri().path());
        let code = resp.status().as_u16();
        record(&state, &lookup_key, code, &method, "internal", start, client_addr, &user_agent, &url, &protocol);
        return Ok(resp);
    };

    let resolved = resolve_action(frontend, is_tls, &host, &req);
    let kind = kind_label(&resolved);

    let resp = match resolved {
        ResolvedAction::ServeInternal => status::serve_internal(&state, req.uri().path()),
        ResolvedAction::Proxy(rr) => proxy_response(&forwarder, &rr, &host, is_tls, client_addr, req).await,
        ResolvedAction::Redirect { location, code } => redirect_response(location, code),
        ResolvedAction::Respond { code, text } => respond_with_reason(code, text),
    };

    let code = resp.status().as_u16();
    record(&state, &lookup_key, code, &method, kind, start, client_addr, &user_agent, &url, &protocol);
    Ok(resp)
}

#[allow(clippy::too_many_arguments)]
fn record(
    state: &SharedState,
    domain: &str,
    code: u16,
    method: &str,
    kind: &str,
    start: Instant,
    client_addr: SocketAddr,
    user_agent: &str,
    url: &str,
    protocol: &str,
) {
    state.metrics.record_request(domain, code, method, kind);

    if state.config.access_log {
        let duration_ms = start.elapsed().as_secs_f64() * 1000.0;
        info!(
            event = "request",
            duration_ms,
            client_addr = %client_addr,
            user_agent,
            domain,
            url,
            method,
            protocol,
            status = code,
            "access log"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_port_removes_suffix() {
        assert_eq!(strip_port("example.com:8080"), "example.com");
        assert_eq!(strip_port("example.com"), "example.com");
    }

    #[test]
    fn redirect_location_substitutes_missing_path() {
        let got = redirect_location("https://new.example.com", "/foo?x=1");
        assert_eq!(got, "https://new.example.com/foo?x=1");
    }

    #[test]
    fn redirect_location_keeps_explicit_path() {
        let got = redirect_location("https://new.example.com/landing", "/foo?x=1");
        assert_eq!(got, "https://new.example.com/landing");
    }

    #[test]
    fn https_clone_url_preserves_host_and_path() {
        let got = https_clone_url("secure.example.com", "/foo?x=1");
        assert_eq!(got, "https://secure.example.com/foo?x=1");
    }
}
