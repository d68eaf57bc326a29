//! Round-robin selection over a backend set (§4.G).
//!
//! Backends are shuffled once at construction so that multiple proxy
//! instances rebuilding their tables at roughly the same time don't all
//! pick the same first backend; the rotation is deterministic thereafter.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rand::seq::SliceRandom;
use url::Url;

#[derive(Debug)]
struct Inner {
    servers: Vec<Url>,
    next: AtomicUsize,
}

/// A cheap-to-clone handle over a fixed, shuffled backend list.
#[derive(Debug, Clone)]
pub struct RoundRobin {
    inner: Arc<Inner>,
}

impl RoundRobin {
    pub fn new(mut servers: Vec<Url>) -> Self {
        servers.shuffle(&mut rand::thread_rng());
        RoundRobin {
            inner: Arc::new(Inner {
                servers,
                next: AtomicUsize::new(0),
            }),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inner.servers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.servers.len()
    }

    /// The backend list as published, in shuffled order.
    pub fn servers(&self) -> &[Url] {
        &self.inner.servers
    }

    /// Picks the next backend in rotation. Returns `None` if the set is
    /// empty.
    pub fn next(&self) -> Option<&Url> {
        if self.inner.servers.is_empty() {
            return None;
        }
        let i = self.inner.next.fetch_add(1, Ordering::Relaxed) % self.inner.servers.len();
        Some(&self.inner.servers[i])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn empty_round_robin_yields_nothing() {
        let rr = RoundRobin::new(vec![]);
        assert!(rr.is_empty());
        assert!(rr.next().is_none());
    }

    #[test]
    fn rotates_evenly_over_many_calls() {
        let servers = vec![
            url("http://10.0.0.1:8080/"),
            url("http://10.0.0.2:8080/"),
            url("http://10.0.0.3:8080/"),
        ];
        let rr = RoundRobin::new(servers.clone());

        let mut counts = std::collections::HashMap::new();
        let n = 301;
        for _ in 0..n {
            let picked = rr.next().unwrap();
            *counts.entry(picked.clone()).or_insert(0) += 1;
        }

        assert_eq!(counts.len(), servers.len());
        let lo = n / servers.len();
        let hi = lo + 1;
        for count in counts.values() {
            assert!(*count == lo || *count == hi, "count {count} out of range");
        }
    }

    #[test]
    fn servers_reflects_input_set_regardless_of_shuffle() {
        let servers = vec![url("http://a/"), url("http://b/"), url("http://c/")];
        let rr = RoundRobin::new(servers.clone());
        let mut got: Vec<_> = rr.servers().to_vec();
        got.sort();
        let mut want = servers;
        want.sort();
        assert_eq!(got, want);
    }
}
