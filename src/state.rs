//! The process-wide shared state: atomic routing/cert tables plus the
//! handful of counters every component reads or writes (§5 Concurrency &
//! Resource Model).

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::Serialize;

use crate::certs::map::CertMap;
use crate::config::AppConfig;
use crate::inventory::FrontendMap;
use crate::metrics::Metrics;

pub struct AppState {
    pub config: AppConfig,
    pub metrics: Metrics,
    pub frontends: ArcSwap<FrontendMap>,
    pub certs: ArcSwap<CertMap>,
    pub shutdown_in_progress: AtomicBool,
    pub has_been_updated: AtomicBool,
    pub last_update_epoch: AtomicU64,
    pub backend_consecutive_errors: AtomicU32,
    pub cert_consecutive_errors: AtomicU32,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        AppState {
            config,
            metrics: Metrics::new(),
            frontends: ArcSwap::from_pointee(FrontendMap::new()),
            certs: ArcSwap::from_pointee(CertMap::new()),
            shutdown_in_progress: AtomicBool::new(false),
            has_been_updated: AtomicBool::new(false),
            last_update_epoch: AtomicU64::new(0),
            backend_consecutive_errors: AtomicU32::new(0),
            cert_consecutive_errors: AtomicU32::new(0),
        }
    }

    pub fn note_successful_update(&self) {
        self.has_been_updated.store(true, Ordering::SeqCst);
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        self.last_update_epoch.store(now, Ordering::SeqCst);
        self.metrics.last_update_epoch.set(now as i64);
    }

    /// `ok = up ∧ ¬stale` (§3 ShelobStatus).
    pub fn is_stale(&self) -> bool {
        if !self.has_been_updated.load(Ordering::SeqCst) {
            return true;
        }
        let lag_limit = self.config.acceptable_update_lag;
        if lag_limit == 0 {
            return false;
        }
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let last = self.last_update_epoch.load(Ordering::SeqCst);
        now.saturating_sub(last) > lag_limit
    }

    pub fn is_up(&self) -> bool {
        !self.shutdown_in_progress.load(Ordering::SeqCst)
    }

    pub fn is_ok(&self) -> bool {
        self.is_up() && !self.is_stale()
    }

    /// Builds the `/status` JSON payload (§3 ShelobStatus, §6).
    pub fn status(&self) -> ShelobStatus {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let last_update = self.last_update_epoch.load(Ordering::SeqCst);
        ShelobStatus {
            name: self.config.name.clone(),
            ok: self.is_ok(),
            up: self.is_up(),
            stale: self.is_stale(),
            last_update,
            update_lag_seconds: now.saturating_sub(last_update),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShelobStatus {
    pub name: String,
    pub ok: bool,
    pub up: bool,
    pub stale: bool,
    pub last_update: u64,
    pub update_lag_seconds: u64,
}

pub type SharedState = Arc<AppState>;
