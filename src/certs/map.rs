//! The published TLS cert table (§3 CertMap / §4.D) and SNI resolution,
//! including the wildcard-prefix fallback lookup.

use std::collections::HashMap;
use std::sync::Arc;

use rustls::sign::CertifiedKey;
use tracing::warn;

/// One parsed keypair plus the expiry we extracted from it at load time.
#[derive(Clone)]
pub struct HostCert {
    pub certified_key: Arc<CertifiedKey>,
    /// Days until expiry at the time this entry was built; -1 if the
    /// certificate failed to parse for expiry purposes (still usable for
    /// TLS, but flagged for alerting per §4.D).
    pub expiry_days: i64,
}

#[derive(Clone, Default)]
pub struct CertMap {
    by_host: HashMap<String, HostCert>,
}

impl CertMap {
    pub fn new() -> Self {
        CertMap::default()
    }

    pub fn insert(&mut self, host: String, cert: HostCert) {
        self.by_host.insert(host, cert);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &HostCert)> {
        self.by_host.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.by_host.is_empty()
    }

    /// Exact match first; on miss, tries `{wildcard_prefix}.{parent}` where
    /// `parent` drops the leftmost label of `host` (§3 CertMap).
    pub fn lookup(&self, host: &str, wildcard_prefix: &str) -> Option<Arc<CertifiedKey>> {
        if let Some(hit) = self.by_host.get(host) {
            return Some(hit.certified_key.clone());
        }

        let parent = host.split_once('.').map(|(_, rest)| rest)?;
        let wildcard_host = format!("{wildcard_prefix}.{parent}");
        let hit = self.by_host.get(&wildcard_host)?;
        warn!(host, wildcard_host, "serving wildcard certificate for unmatched host");
        Some(hit.certified_key.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustls::crypto::ring::sign::any_supported_type;
    use rustls_pemfile::{certs, pkcs8_private_keys};

    fn fake_certified_key() -> Arc<CertifiedKey> {
        let generated = rcgen::generate_simple_self_signed(vec!["example.com".to_string()]).unwrap();
        let cert_pem = generated.cert.pem();
        let key_pem = generated.signing_key.serialize_pem();

        let cert_der = certs(&mut cert_pem.as_bytes())
            .next()
            .unwrap()
            .unwrap();
        let key_der = pkcs8_private_keys(&mut key_pem.as_bytes())
            .next()
            .unwrap()
            .unwrap();

        let signing_key = any_supported_type(&rustls::pki_types::PrivateKeyDer::Pkcs8(key_der)).unwrap();
        Arc::new(CertifiedKey::new(vec![cert_der], signing_key))
    }

    #[test]
    fn exact_host_match_is_preferred_over_wildcard() {
        let mut map = CertMap::new();
        map.insert(
            "example.com".to_string(),
            HostCert {
                certified_key: fake_certified_key(),
                expiry_days: 30,
            },
        );
        assert!(map.lookup("example.com", "wildcard").is_some());
    }

    #[test]
    fn falls_back_to_wildcard_prefix_on_miss() {
        let mut map = CertMap::new();
        map.insert(
            "wildcard.example.com".to_string(),
            HostCert {
                certified_key: fake_certified_key(),
                expiry_days: 30,
            },
        );
        assert!(map.lookup("app.example.com", "wildcard").is_some());
        assert!(map.lookup("example.com", "wildcard").is_none());
    }

    #[test]
    fn unmatched_host_with_no_wildcard_returns_none() {
        let map = CertMap::new();
        assert!(map.lookup("nothing.example.com", "wildcard").is_none());
    }
}
