//! Boundary traits (component of §6): persistence and geolocation are
//! consulted by the orchestrator, never by the crawl core itself. Grounded
//! on the teacher's `ConversationTopicHandler` trait-at-the-seam idiom, but
//! expressed with native async-fn-in-trait rather than a handler enum since
//! these two boundaries are simple request/response calls.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Mutex;

use tokio::sync::Semaphore;

use crate::types::{GeoInfo, PeerRecord};

/// Receives the finished crawl's records in one batch. `insert_batch` is
/// called exactly once, at the end of the crawl; implementations key each
/// record on `(ip, port)` with replace-on-conflict semantics.
pub trait PeerSink {
    type Error: std::fmt::Display;

    async fn insert_batch(&self, records: &[PeerRecord]) -> Result<(), Self::Error>;
}

/// Resolves an IP to geographic metadata. A lookup failure is absorbed as
/// `None`, never propagated — geolocation is enrichment, not a crawl
/// dependency.
pub trait Geolocator {
    async fn locate(&self, ip: Ipv4Addr) -> Option<GeoInfo>;
}

/// Runs `geolocator.locate` over the distinct IPs in `records`, bounded to
/// `concurrency` in-flight lookups at a time, and merges the results back
/// in. Records whose IP fails to resolve keep `geo: None`.
pub async fn enrich<G: Geolocator>(records: Vec<PeerRecord>, geolocator: &G, concurrency: usize) -> Vec<PeerRecord> {
    let semaphore = Semaphore::new(concurrency.max(1));
    let mut cache: HashMap<Ipv4Addr, Option<GeoInfo>> = HashMap::new();

    let mut out = Vec::with_capacity(records.len());
    for mut record in records {
        if let Some(geo) = cache.get(&record.ip) {
            record.geo = geo.clone();
        } else {
            let _permit = semaphore.acquire().await.expect("semaphore never closes");
            let geo = geolocator.locate(record.ip).await;
            cache.insert(record.ip, geo.clone());
            record.geo = geo;
        }
        out.push(record);
    }
    out
}

/// In-memory [`PeerSink`] keyed by `(ip, port)`, used by the demo binary and
/// by integration tests. No concrete database-backed sink ships here.
#[derive(Default)]
pub struct InMemorySink {
    records: Mutex<HashMap<(Ipv4Addr, u16), PeerRecord>>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<PeerRecord> {
        self.records.lock().unwrap().values().cloned().collect()
    }
}

impl PeerSink for InMemorySink {
    type Error = std::convert::Infallible;

    async fn insert_batch(&self, records: &[PeerRecord]) -> Result<(), Self::Error> {
        let mut guard = self.records.lock().unwrap();
        for record in records {
            guard.insert((record.ip, record.port), record.clone());
        }
        Ok(())
    }
}

/// [`Geolocator`] that never resolves anything, for tests and as the demo
/// binary's default when no real provider is wired in.
pub struct NullGeolocator;

impl Geolocator for NullGeolocator {
    async fn locate(&self, _ip: Ipv4Addr) -> Option<GeoInfo> {
        None
    }
}
