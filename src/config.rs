//! CLI flags (§6) parsed via `clap` and normalized into `AppConfig`.

use std::collections::HashSet;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "shelob", version, about = "Kubernetes-driven HTTP/HTTPS reverse proxy")]
pub struct Cli {
    /// Plain HTTP listen port
    #[arg(long, default_value_t = 8080)]
    pub port: u16,

    /// TLS listen port
    #[arg(long, default_value_t = 8443)]
    pub tlsport: u16,

    /// Admin/metrics listen port
    #[arg(long, default_value_t = 8081)]
    pub metrics_port: u16,

    /// Enable SO_REUSEPORT on the main port
    #[arg(long, default_value_t = false)]
    pub reuse_port: bool,

    /// Instance name for the status page; defaults to hostname:port
    #[arg(long)]
    pub name: Option<String>,

    /// Suffix under which the internal mux answers as a catch-all
    #[arg(long)]
    pub domain: Option<String>,

    /// Path to a cluster-client config; in-cluster config is used if unset
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<String>,

    /// Forced reload interval, in seconds
    #[arg(long, default_value_t = 30)]
    pub reload_every: u64,

    /// Reload coalescing window, in seconds
    #[arg(long, default_value_t = 1)]
    pub reload_rollup: u64,

    /// Max seconds since the last successful update before status goes stale; 0 disables
    #[arg(long, default_value_t = 0)]
    pub acceptable_update_lag: u64,

    /// Grace period between receiving a shutdown signal and exiting
    #[arg(long, default_value_t = 0)]
    pub shutdown_delay: u64,

    /// Only reload on the timer, never on API watch events
    #[arg(long, default_value_t = false)]
    pub disable_watch: bool,

    /// Namespaces whose Endpoint change events are suppressed
    #[arg(long, default_value = "default,kube-system")]
    pub ignore_namespaces: String,

    /// Source certificates from cluster secrets in this namespace
    #[arg(long)]
    pub cert_namespace: Option<String>,

    /// Alternative certificate source: `host:pubpath:privpath,...`
    #[arg(long)]
    pub cert_file_pairs: Option<String>,

    /// Prefix used for fallback wildcard certificate lookup
    #[arg(long, default_value = "wildcard")]
    pub wildcard_cert_prefix: String,

    /// Emit a structured access log line per request
    #[arg(long, default_value_t = false)]
    pub access_log: bool,

    /// Log output format
    #[arg(long, default_value = "text")]
    pub log_format: LogFormat,

    /// Overrides RUST_LOG-style filtering when set
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// The validated, derived configuration threaded through every component.
/// Built once at startup and never mutated; `shutdown_in_progress` lives
/// separately since it's the one piece of state that legitimately changes.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub tlsport: u16,
    pub metrics_port: u16,
    pub reuse_port: bool,
    pub name: String,
    pub domain: Option<String>,
    pub kubeconfig: Option<String>,
    pub reload_every: u64,
    pub reload_rollup: u64,
    pub acceptable_update_lag: u64,
    pub shutdown_delay: u64,
    pub disable_watch: bool,
    pub ignore_namespaces: HashSet<String>,
    pub cert_namespace: Option<String>,
    pub cert_file_pairs: Vec<(String, String, String)>,
    pub wildcard_cert_prefix: String,
    pub access_log: bool,
}

impl AppConfig {
    pub fn from_cli(cli: Cli) -> anyhow::Result<Self> {
        let name = cli.name.unwrap_or_else(|| {
            let hostname = hostname_or_unknown();
            format!("{hostname}:{}", cli.port)
        });

        let ignore_namespaces = cli
            .ignore_namespaces
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let cert_file_pairs = match cli.cert_file_pairs {
            Some(raw) => parse_cert_file_pairs(&raw)?,
            None => Vec::new(),
        };

        Ok(AppConfig {
            port: cli.port,
            tlsport: cli.tlsport,
            metrics_port: cli.metrics_port,
            reuse_port: cli.reuse_port,
            name,
            domain: cli.domain,
            kubeconfig: cli.kubeconfig,
            reload_every: cli.reload_every,
            reload_rollup: cli.reload_rollup,
            acceptable_update_lag: cli.acceptable_update_lag,
            shutdown_delay: cli.shutdown_delay,
            disable_watch: cli.disable_watch,
            ignore_namespaces,
            cert_namespace: cli.cert_namespace,
            cert_file_pairs,
            wildcard_cert_prefix: cli.wildcard_cert_prefix,
            access_log: cli.access_log,
        })
    }
}

fn hostname_or_unknown() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "shelob".to_string())
}

fn parse_cert_file_pairs(raw: &str) -> anyhow::Result<Vec<(String, String, String)>> {
    let mut out = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let parts: Vec<&str> = entry.splitn(3, ':').collect();
        let [host, pub_path, priv_path] = parts.as_slice() else {
            anyhow::bail!("invalid --cert-file-pairs entry {entry:?}, expected host:pubpath:privpath");
        };
        out.push((host.to_string(), pub_path.to_string(), priv_path.to_string()));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_multiple_cert_file_pairs() {
        let pairs = parse_cert_file_pairs("a.com:/a.pem:/a.key,b.com:/b.pem:/b.key").unwrap();
        assert_eq!(
            pairs,
            vec![
                ("a.com".to_string(), "/a.pem".to_string(), "/a.key".to_string()),
                ("b.com".to_string(), "/b.pem".to_string(), "/b.key".to_string()),
            ]
        );
    }

    #[test]
    fn rejects_malformed_cert_file_pair() {
        assert!(parse_cert_file_pairs("a.com:/a.pem").is_err());
    }

    #[test]
    fn ignore_namespaces_defaults_split_on_comma() {
        let cli = Cli::parse_from(["shelob"]);
        let cfg = AppConfig::from_cli(cli).unwrap();
        assert!(cfg.ignore_namespaces.contains("default"));
        assert!(cfg.ignore_namespaces.contains("kube-system"));
        assert_eq!(cfg.ignore_namespaces.len(), 2);
    }
}
