//! Crawl scheduler (component C3): frontier-driven batch loop, grounded on
//! the original Python crawler's `asyncio.gather`-per-batch shape and on
//! snarkOS's periodic `update_peers` sleep-and-reschedule loop.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::registry::Registry;
use crate::session::run_session;
use crate::types::{CrawlConfig, Endpoint, NodeDesc, PeerRecord};

const INTER_BATCH_SLEEP: Duration = Duration::from_millis(300);
const PROGRESS_THRESHOLD: usize = 20;

/// Invoked with the accumulated record buffer each time at least
/// [`PROGRESS_THRESHOLD`] new records have landed since the last call. A
/// panic inside the callback is caught and logged, never propagated.
pub trait ProgressCallback {
    fn on_progress(&mut self, snapshot: &[PeerRecord]);
}

impl<F: FnMut(&[PeerRecord])> ProgressCallback for F {
    fn on_progress(&mut self, snapshot: &[PeerRecord]) {
        self(snapshot)
    }
}

/// Runs the crawl to completion and returns every successfully collected
/// record. Terminates when `|crawled| >= config.max_nodes` or when the
/// frontier runs dry at a batch boundary. Seeds are filtered through the
/// same routability check as gossiped peers.
pub async fn crawl(
    seeds: impl IntoIterator<Item = Endpoint>,
    config: &CrawlConfig,
    local: &NodeDesc,
    progress: Option<&mut dyn ProgressCallback>,
) -> Vec<PeerRecord> {
    let registry = Arc::new(Registry::new(std::iter::empty()));
    let accepted = registry.offer_all(seeds);
    log::info!("crawl starting with {accepted} accepted seeds, max_nodes={}", config.max_nodes);

    crawl_from_registry(registry, config, local, progress).await
}

/// The batch loop proper, parameterized over an already-populated
/// [`Registry`] so the seed-acceptance policy in [`crawl`] stays separate
/// from the scheduling algorithm itself.
pub(crate) async fn crawl_from_registry(
    registry: Arc<Registry>,
    config: &CrawlConfig,
    local: &NodeDesc,
    mut progress: Option<&mut dyn ProgressCallback>,
) -> Vec<PeerRecord> {
    let semaphore = Arc::new(Semaphore::new(config.max_concurrent));
    let mut records: Vec<PeerRecord> = Vec::new();
    let mut since_last_progress = 0usize;

    loop {
        if registry.crawled_count() >= config.max_nodes {
            break;
        }

        let batch = registry.select(config.max_concurrent);
        if batch.is_empty() {
            log::debug!("frontier exhausted at {} crawled", registry.crawled_count());
            break;
        }

        let mut tasks = JoinSet::new();
        for endpoint in batch {
            let registry = Arc::clone(&registry);
            let semaphore = Arc::clone(&semaphore);
            let config = config.clone();
            let local = local.clone();

            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore never closes");
                let outcome = run_session(endpoint, &config, &local).await;
                (endpoint, outcome, registry)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let (endpoint, outcome, registry) = match joined {
                Ok(v) => v,
                Err(join_err) => {
                    log::warn!("session task panicked: {join_err}");
                    continue;
                }
            };

            match outcome {
                Ok(session) => {
                    let discovered = registry.offer_all(session.new_peers);
                    log::debug!("{endpoint} produced a record and {discovered} newly discovered peers");
                    records.push(session.record);
                    since_last_progress += 1;
                }
                Err(err) => {
                    log::debug!("{endpoint} failed: {err}");
                    registry.mark_failed(endpoint);
                }
            }
        }

        if since_last_progress >= PROGRESS_THRESHOLD {
            if let Some(cb) = progress.as_deref_mut() {
                if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(|| cb.on_progress(&records))) {
                    log::warn!("progress callback panicked: {panic:?}");
                }
            }
            since_last_progress = 0;
        }

        if registry.crawled_count() >= config.max_nodes {
            break;
        }

        tokio::time::sleep(INTER_BATCH_SLEEP).await;
    }

    log::info!(
        "crawl finished: {} records, {} crawled, {} failed",
        records.len(),
        registry.crawled_count(),
        registry.failed_count()
    );
    records
}

#[cfg(test)]
mod test {
    use std::net::{Ipv4Addr, SocketAddrV4};
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    use super::*;
    use crate::types::{Network, NodeService, NodeServiceSet};
    use crate::wire::messages::{build_addr_payload, build_verack, build_version};

    fn mock_desc() -> NodeDesc {
        NodeDesc {
            network: Network::Regtest,
            protocol_version: 70015,
            services: NodeServiceSet(vec![NodeService::NodeNetwork]),
            user_agent: "/mock-peer:1.0/".to_string(),
            start_height: 0,
        }
    }

    /// Binds a local listener that completes one handshake and then replies
    /// to `getaddr` with an empty address book, closing immediately after.
    /// Returns the endpoint other tasks should connect to.
    async fn spawn_empty_mock_peer() -> Endpoint {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = Endpoint::new(Ipv4Addr::LOCALHOST, listener.local_addr().unwrap().port());

        tokio::spawn(async move {
            let (mut socket, peer_addr) = listener.accept().await.unwrap();
            let peer_addr = match peer_addr {
                std::net::SocketAddr::V4(v4) => v4,
                _ => SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0),
            };

            let mut out = Vec::new();
            out.extend(build_version(&mock_desc(), peer_addr));
            out.extend(build_verack(Network::Regtest));
            out.extend(crate::wire::frame::encode_frame(
                Network::Regtest,
                crate::wire::frame::command::ADDR,
                build_addr_payload(&[]),
            ));
            let _ = socket.write_all(&out).await;
            let _ = socket.shutdown().await;
        });

        endpoint
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn terminates_at_max_nodes_and_reports_progress_at_least_twice() {
        const POOL_SIZE: usize = 50;
        let mut pool = Vec::with_capacity(POOL_SIZE);
        for _ in 0..POOL_SIZE {
            pool.push(spawn_empty_mock_peer().await);
        }

        let registry = Arc::new(Registry::new(pool));
        let config = CrawlConfig {
            network: Network::Regtest,
            max_nodes: POOL_SIZE,
            max_concurrent: 10,
            timeout: Duration::from_secs(5),
        };
        let local = mock_desc();

        let calls = AtomicUsize::new(0);
        let mut progress = |_snapshot: &[PeerRecord]| {
            calls.fetch_add(1, Ordering::SeqCst);
        };

        let progress_ref: &mut dyn ProgressCallback = &mut progress;
        let records = crawl_from_registry(Arc::clone(&registry), &config, &local, Some(progress_ref)).await;

        assert!(registry.crawled_count() >= POOL_SIZE);
        assert!(registry.crawled_count() < POOL_SIZE + config.max_concurrent);
        assert_eq!(records.len(), POOL_SIZE);
        assert!(calls.load(Ordering::SeqCst) >= 2);
    }
}
