//! A concurrent crawler for Bitcoin-protocol peer-to-peer networks: it
//! speaks just enough of the wire protocol to complete a handshake, ask a
//! peer for its address book, and fan out across everything it hears
//! about.
//!
//! The crate is organized by the four components a single crawl touches:
//! the wire codec ([`wire`], internal), one peer session ([`session`]), the
//! shared discovery frontier ([`registry`]), and the scheduler that drives
//! them all ([`scheduler`]). [`external`] holds the trait boundaries a host
//! application implements to receive results.

mod error;
mod external;
mod registry;
mod scheduler;
mod session;
mod types;
mod wire;

pub use error::{PeerError, PeerResult};
pub use external::{enrich, Geolocator, InMemorySink, NullGeolocator, PeerSink};
pub use registry::Registry;
pub use scheduler::{crawl, ProgressCallback};
pub use session::{run_session, SessionOutcome};
pub use types::{CrawlConfig, Endpoint, GeoInfo, Network, NodeDesc, NodeService, NodeServiceSet, PeerRecord};
