use std::net::SocketAddrV4;
use std::time::Duration;

use clap::Parser;
use log::LevelFilter;
use simple_logger::SimpleLogger;

use peer_crawler::{crawl, CrawlConfig, Endpoint, InMemorySink, Network, NodeDesc, NodeService, NodeServiceSet, PeerSink, ProgressCallback};

const PROTOCOL_VERSION: i32 = 70016; // matches bitcoin core v24

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// One or more seed peers, e.g. 127.0.0.1:18445
    #[arg(short, long, required = true)]
    seed: Vec<SocketAddrV4>,

    /// Stop once this many endpoints have been attempted.
    #[arg(long, default_value_t = 200)]
    max_nodes: usize,

    /// Concurrent in-flight sessions.
    #[arg(long, default_value_t = 50)]
    max_concurrent: usize,

    /// Per-operation connect/read timeout, in seconds.
    #[arg(long, default_value_t = 10)]
    timeout_secs: u64,

    #[arg(long, value_enum, default_value_t = CliNetwork::Regtest)]
    network: CliNetwork,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum CliNetwork {
    Mainnet,
    Testnet3,
    Regtest,
}

impl From<CliNetwork> for Network {
    fn from(value: CliNetwork) -> Self {
        match value {
            CliNetwork::Mainnet => Network::Mainnet,
            CliNetwork::Testnet3 => Network::Testnet3,
            CliNetwork::Regtest => Network::Regtest,
        }
    }
}

fn init_logging() {
    SimpleLogger::new()
        .with_colors(true)
        .with_level(LevelFilter::Debug)
        .with_local_timestamps()
        .init()
        .unwrap();
}

#[tokio::main]
async fn main() {
    init_logging();
    let args = Args::parse();

    let local = NodeDesc {
        network: args.network.into(),
        protocol_version: PROTOCOL_VERSION,
        services: NodeServiceSet(vec![NodeService::NodeNetwork]),
        user_agent: "/peer-crawler:0.1/".to_string(),
        start_height: 0,
    };

    let config = CrawlConfig {
        network: local.network,
        max_nodes: args.max_nodes,
        max_concurrent: args.max_concurrent,
        timeout: Duration::from_secs(args.timeout_secs),
    };

    let seeds: Vec<Endpoint> = args.seed.iter().map(|s| Endpoint::new(*s.ip(), s.port())).collect();
    log::info!("starting crawl from {} seed(s) on {:?}", seeds.len(), config.network);

    let mut last_reported = 0usize;
    let mut on_progress = |snapshot: &[peer_crawler::PeerRecord]| {
        log::info!("progress: {} records collected so far", snapshot.len());
        last_reported = snapshot.len();
    };

    let progress_ref: &mut dyn ProgressCallback = &mut on_progress;
    let records = crawl(seeds, &config, &local, Some(progress_ref)).await;
    log::info!("crawl complete: {} peer records collected ({} reported at last progress tick)", records.len(), last_reported);

    let sink = InMemorySink::new();
    if let Err(err) = sink.insert_batch(&records).await {
        log::warn!("sink failed to persist the batch: {err}");
    }

    for record in sink.snapshot() {
        println!(
            "{}:{}\tv{}\tservices={:#x}\tagent={}\tpeers_discovered={}",
            record.ip, record.port, record.protocol_version, record.services, record.user_agent, record.peers_discovered
        );
    }
}
