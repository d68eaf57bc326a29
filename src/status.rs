//! The internal status/listing mux (§6): served on the main plane when a
//! request's host doesn't match any configured frontend, and on the admin
//! plane alongside the profiling stubs.

use bytes::Bytes;
use http::{Response, StatusCode};
use prometheus::{Encoder, TextEncoder};

use crate::forwarder::{full_body, ProxyBody};
use crate::state::SharedState;

fn html_response(body: String) -> Response<ProxyBody> {
    Response::builder()
        .status(StatusCode::OK)
        .header(http::header::CONTENT_TYPE, "text/html; charset=utf-8")
        .body(full_body(body))
        .expect("static response builder never fails")
}

fn json_response(status: StatusCode, body: String) -> Response<ProxyBody> {
    Response::builder()
        .status(status)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(full_body(body))
        .expect("static response builder never fails")
}

fn plain_response(status: StatusCode, body: impl Into<Bytes>) -> Response<ProxyBody> {
    Response::builder()
        .status(status)
        .header(http::header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(full_body(body))
        .expect("static response builder never fails")
}

/// `GET /` — an HTML list of every configured domain, linking to it.
pub fn list_applications_html(state: &SharedState) -> Response<ProxyBody> {
    let frontends = state.frontends.load();
    let mut items = String::new();
    let mut domains: Vec<&String> = frontends.keys().collect();
    domains.sort();
    for domain in domains {
        items.push_str(&format!(
            "\t\t\t<li><a href=\"http://{domain}\">{domain}</a></li>\n"
        ));
    }

    let page = format!(
        "<!DOCTYPE html>\n\
<html>\n\
\t<head>\n\
\t\t<meta charset=\"UTF-8\">\n\
\t\t<title>shelob</title>\n\
\t</head>\n\
\t<body>\n\
\t\t<h1>Available applications:</h1>\n\
\t\t<ul>\n{items}\t\t</ul>\n\
\t</body>\n\
</html>"
    );

    html_response(page)
}

/// `GET /api/applications` — a JSON dump of the live frontend table.
pub fn list_applications_json(state: &SharedState) -> Response<ProxyBody> {
    let frontends = state.frontends.load();
    match serde_json::to_string(&**frontends) {
        Ok(body) => json_response(StatusCode::OK, body),
        Err(err) => json_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("{{\"error\":\"{err}\"}}"),
        ),
    }
}

/// `GET /status` — `ShelobStatus` as JSON; 200 if `ok`, 503 otherwise.
pub fn status(state: &SharedState) -> Response<ProxyBody> {
    let status = state.status();
    let code = if status.ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = serde_json::to_string(&status).unwrap_or_else(|_| "{}".to_string());
    json_response(code, body)
}

/// `GET /metrics` — Prometheus text exposition, served on both the main
/// plane (for the "internal" host) and the admin plane. Gathers from this
/// state's own `Registry` rather than Prometheus's process-global default,
/// since the default registry is shared process-wide and a second
/// `Metrics::new()` (as every test binary builds) would collide with it.
pub fn metrics(state: &SharedState) -> Response<ProxyBody> {
    let metric_families = state.metrics.registry.gather();
    let encoder = TextEncoder::new();
    let mut buf = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buf) {
        return plain_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to encode metrics: {err}"),
        );
    }
    Response::builder()
        .status(StatusCode::OK)
        .header(http::header::CONTENT_TYPE, encoder.format_type())
        .body(full_body(buf))
        .expect("static response builder never fails")
}

/// Dispatches one request on the main-plane internal mux (§6); anything
/// unmatched 404s like Go's default `http.ServeMux`.
pub fn serve_internal(state: &SharedState, path: &str) -> Response<ProxyBody> {
    match path {
        "/" => list_applications_html(state),
        "/api/applications" => list_applications_json(state),
        "/status" => status(state),
        "/metrics" => metrics(state),
        _ => plain_response(StatusCode::NOT_FOUND, "404 page not found"),
    }
}

/// Dispatches one request on the admin plane: metrics plus documented
/// profiling stubs (no `pprof`-equivalent crate in the dependency stack;
/// see DESIGN.md).
pub fn serve_admin(state: &SharedState, path: &str) -> Response<ProxyBody> {
    if path == "/metrics" {
        return metrics(state);
    }
    if let Some(rest) = path.strip_prefix("/debug/pprof") {
        let _ = rest;
        return plain_response(
            StatusCode::NOT_IMPLEMENTED,
            "profiling endpoints are not implemented",
        );
    }
    plain_response(StatusCode::NOT_FOUND, "404 page not found")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::inventory::{Backend, Frontend, PlainHttpPolicy};
    use crate::state::AppState;
    use std::sync::Arc;

    fn test_config() -> AppConfig {
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
            shutdown_delay: 0,
            disable_watch: false,
            ignore_namespaces: Default::default(),
            cert_namespace: None,
            cert_file_pairs: Vec::new(),
            wildcard_cert_prefix: "wildcard".to_string(),
            access_log: false,
        }
    }

    #[test]
    fn status_is_503_before_any_successful_update() {
        let state = Arc::new(AppState::new(test_config()));
        let resp = status(&state);
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn status_is_200_after_successful_update() {
        let state = Arc::new(AppState::new(test_config()));
        state.note_successful_update();
        let resp = status(&state);
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[test]
    fn application_listing_includes_configured_domains() {
        let state = Arc::new(AppState::new(test_config()));
        let mut map = crate::inventory::FrontendMap::new();
        map.insert(
            "example.com".to_string(),
            Frontend::proxy(
                vec![Backend {
                    url: url::Url::parse("http://10.0.0.1:8080").unwrap(),
                }],
                PlainHttpPolicy::Allow,
            ),
        );
        state.frontends.store(Arc::new(map));
        let resp = list_applications_json(&state);
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[test]
    fn admin_mux_404s_on_unknown_path() {
        let state = Arc::new(AppState::new(test_config()));
        let resp = serve_admin(&state, "/nope");
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
