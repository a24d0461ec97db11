use std::fmt::{Display, Formatter};
use std::net::Ipv4Addr;
use std::ops::BitOr;
use std::time::Duration;

use strum::{EnumIter, IntoEnumIterator};

use crate::error::PeerError;

/// `(ip, port)` identity used throughout the frontier. IPv6 peers never
/// reach this type — they are dropped at the point the wire codec parses
/// an `addr` record.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub ip: Ipv4Addr,
    pub port: u16,
}

impl Endpoint {
    pub fn new(ip: Ipv4Addr, port: u16) -> Self {
        Endpoint { ip, port }
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// Which network variant a session/crawl targets. The magic value is the
/// sole interop contract: a peer on a different network is rejected by the
/// codec rather than silently accepted.
#[derive(Copy, Clone, Debug, PartialEq, Eq, EnumIter)]
pub enum Network {
    Mainnet,
    Testnet3,
    Regtest,
}

impl Network {
    pub fn magic_value(&self) -> u32 {
        match self {
            Network::Mainnet => 0xD9B4_BEF9,
            Network::Testnet3 => 0x0709_110B,
            Network::Regtest => 0xDAB5_BFFA,
        }
    }
}

impl TryFrom<u32> for Network {
    type Error = PeerError;

    fn try_from(magic: u32) -> Result<Self, Self::Error> {
        Network::iter()
            .find(|n| n.magic_value() == magic)
            .ok_or_else(|| PeerError::Protocol(format!("no known network has magic {magic:#010x}")))
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, EnumIter)]
#[repr(u64)]
pub enum NodeService {
    NodeNetwork = 0x1,
    NodeBloom = 0x4,
    NodeWitness = 0x8,
    NodeCompactFilters = 0x40,
    NodeNetworkLimited = 0x400,
}

impl NodeService {
    pub fn as_u64(self) -> u64 {
        self as u64
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct NodeServiceSet(pub Vec<NodeService>);

impl NodeServiceSet {
    pub fn as_bitmask(&self) -> u64 {
        self.0.iter().fold(0u64, |mask, bit| mask.bitor(bit.as_u64()))
    }

    pub fn from_bitmask(mask: u64) -> Self {
        NodeServiceSet(NodeService::iter().filter(|bit| mask & bit.as_u64() != 0).collect())
    }
}

/// The identity this crate's own session advertises in its `version`
/// message, and the network it crawls on.
#[derive(Clone, Debug)]
pub struct NodeDesc {
    pub network: Network,
    pub protocol_version: i32,
    pub services: NodeServiceSet,
    pub user_agent: String,
    pub start_height: i32,
}

/// Knobs supplied by the orchestrator: §6 names these as the parameters the
/// core doesn't default for itself.
#[derive(Clone, Debug)]
pub struct CrawlConfig {
    pub network: Network,
    pub max_nodes: usize,
    pub max_concurrent: usize,
    pub timeout: Duration,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        CrawlConfig {
            network: Network::Mainnet,
            max_nodes: 1000,
            max_concurrent: 500,
            timeout: Duration::from_secs(10),
        }
    }
}

/// Optional enrichment merged in after the crawl by a [`crate::external::Geolocator`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GeoInfo {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub country: Option<String>,
    pub country_code: Option<String>,
    pub city: Option<String>,
    pub region: Option<String>,
    pub timezone: Option<String>,
    pub isp: Option<String>,
}

/// Output of one successful peer session, the unit the sink persists.
#[derive(Clone, Debug, PartialEq)]
pub struct PeerRecord {
    pub ip: Ipv4Addr,
    pub port: u16,
    pub protocol_version: i32,
    pub services: u64,
    pub user_agent: String,
    pub timestamp_iso: String,
    pub peers_discovered: usize,
    pub geo: Option<GeoInfo>,
}

impl PeerRecord {
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.ip, self.port)
    }
}

#[cfg(test)]
mod test {
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn service_bitmask_round_trips() {
        let set = NodeServiceSet(vec![NodeService::NodeNetwork, NodeService::NodeWitness]);
        let mask = set.as_bitmask();
        assert_eq!(mask, 0x1 | 0x8);
        assert_eq!(NodeServiceSet::from_bitmask(mask), set);
    }

    #[test]
    fn network_magic_round_trips() {
        for network in Network::iter() {
            assert_eq!(Network::try_from(network.magic_value()).unwrap(), network);
        }
        assert!(Network::try_from(0xdead_beef).is_err());
    }
}
