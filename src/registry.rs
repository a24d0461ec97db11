//! Endpoint registry (component C4): the single owner of crawl-wide
//! frontier state. Grounded on zebra-network's `CandidateSet`/`AddressBook`
//! pattern of keeping a set of known peers behind one mutex rather than
//! scattering state across tasks.

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::Mutex;

use crate::types::Endpoint;

struct RegistryState {
    discovered: HashSet<Endpoint>,
    crawled: HashSet<Endpoint>,
    failed: HashSet<Endpoint>,
}

/// Three disjoint endpoint sets guarded by a single lock: `discovered`
/// (known, not yet attempted), `crawled` (session completed, regardless of
/// outcome detail), `failed` (session errored out). An endpoint moves
/// discovered -> {crawled, failed} exactly once; it is never re-queued.
pub struct Registry {
    state: Mutex<RegistryState>,
}

impl Registry {
    pub fn new(seeds: impl IntoIterator<Item = Endpoint>) -> Self {
        Registry {
            state: Mutex::new(RegistryState {
                discovered: seeds.into_iter().collect(),
                crawled: HashSet::new(),
                failed: HashSet::new(),
            }),
        }
    }

    /// A routable IPv4 address: not unspecified, not loopback, not
    /// multicast, and carrying a non-zero port.
    pub fn is_routable(endpoint: &Endpoint) -> bool {
        let ip = endpoint.ip;
        endpoint.port != 0 && !ip.is_unspecified() && !ip.is_loopback() && !ip.is_multicast() && !is_private(ip)
    }

    /// Adds `endpoint` to `discovered` unless it's already known in any of
    /// the three sets. Returns whether it was newly added.
    pub fn offer(&self, endpoint: Endpoint) -> bool {
        if !Self::is_routable(&endpoint) {
            return false;
        }
        let mut state = self.state.lock().unwrap();
        if state.discovered.contains(&endpoint) || state.crawled.contains(&endpoint) || state.failed.contains(&endpoint) {
            return false;
        }
        state.discovered.insert(endpoint);
        true
    }

    pub fn offer_all(&self, endpoints: impl IntoIterator<Item = Endpoint>) -> usize {
        endpoints.into_iter().filter(|e| self.offer(*e)).count()
    }

    /// Removes up to `n` endpoints from `discovered` and moves them into
    /// `crawled` immediately, before the caller has even attempted a
    /// session — this is what prevents the same endpoint being handed out
    /// to two concurrent batches.
    pub fn select(&self, n: usize) -> Vec<Endpoint> {
        let mut state = self.state.lock().unwrap();
        let batch: Vec<Endpoint> = state.discovered.iter().take(n).copied().collect();
        for endpoint in &batch {
            state.discovered.remove(endpoint);
            state.crawled.insert(*endpoint);
        }
        batch
    }

    /// Additionally records a failed attempt. `endpoint` is expected to
    /// already be in `crawled` from the [`Registry::select`] that handed it
    /// out.
    pub fn mark_failed(&self, endpoint: Endpoint) {
        self.state.lock().unwrap().failed.insert(endpoint);
    }

    pub fn discovered_count(&self) -> usize {
        self.state.lock().unwrap().discovered.len()
    }

    pub fn crawled_count(&self) -> usize {
        self.state.lock().unwrap().crawled.len()
    }

    pub fn failed_count(&self) -> usize {
        self.state.lock().unwrap().failed.len()
    }
}

fn is_private(ip: Ipv4Addr) -> bool {
    ip.is_private() || ip.is_link_local() || ip.is_broadcast() || ip.is_documentation()
}

#[cfg(test)]
mod test {
    use super::*;

    fn ep(a: u8, b: u8, c: u8, d: u8, port: u16) -> Endpoint {
        Endpoint::new(Ipv4Addr::new(a, b, c, d), port)
    }

    #[test]
    fn offer_rejects_duplicates_and_non_routable() {
        let registry = Registry::new(std::iter::empty());
        assert!(registry.offer(ep(8, 8, 8, 8, 8333)));
        assert!(!registry.offer(ep(8, 8, 8, 8, 8333)));
        assert!(!registry.offer(ep(10, 0, 0, 1, 8333)));
        assert!(!registry.offer(ep(127, 0, 0, 1, 8333)));
        assert!(!registry.offer(ep(8, 8, 8, 8, 0)));
        assert_eq!(registry.discovered_count(), 1);
    }

    #[test]
    fn select_moves_endpoints_into_crawled() {
        let registry = Registry::new([ep(1, 1, 1, 1, 8333), ep(2, 2, 2, 2, 8333)]);
        let batch = registry.select(10);
        assert_eq!(batch.len(), 2);
        assert_eq!(registry.discovered_count(), 0);
        assert_eq!(registry.crawled_count(), 2);
    }

    #[test]
    fn offer_after_crawled_does_not_resurrect_endpoint() {
        let registry = Registry::new(std::iter::empty());
        let endpoint = ep(3, 3, 3, 3, 8333);
        registry.offer(endpoint);
        registry.select(1);
        assert!(!registry.offer(endpoint));
        assert_eq!(registry.discovered_count(), 0);
    }

    #[test]
    fn mark_failed_is_additional_to_crawled() {
        let registry = Registry::new([ep(4, 4, 4, 4, 8333)]);
        let batch = registry.select(1);
        registry.mark_failed(batch[0]);
        assert_eq!(registry.crawled_count(), 1);
        assert_eq!(registry.failed_count(), 1);
    }
}
