use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::{SystemTime, UNIX_EPOCH};

use rand::{thread_rng, Rng};

use crate::error::PeerResult;
use crate::types::{Network, NodeDesc, NodeServiceSet};
use crate::wire::buffer::{ByteBufferComposer, ByteBufferParser};
use crate::wire::frame::{command, encode_frame};
use crate::wire::varint::decode_varint;

/// Decoded `version` payload. Address fields and nonce are parsed only far
/// enough to be skipped at fixed offsets, per the wire format in §3.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct VersionInfo {
    pub protocol_version: i32,
    pub services: NodeServiceSet,
    pub timestamp: i64,
    pub user_agent: String,
    pub start_height: i32,
}

/// size | field        | type     | description
/// ---  | -----        | ----     | ------------
/// 4    | version      | i32      | protocol version
/// 8    | services     | u64      | services bitfield
/// 8    | timestamp    | i64      | unix seconds
/// 26   | addr_recv    | net_addr | receiver address record
/// 26   | addr_from    | net_addr | sender address record (ignorable)
/// 8    | nonce        | u64      | random nonce
/// ?    | user_agent   | var_str  | user agent
/// 4    | start_height | i32      | last block height known to the sender
/// 1    | relay        | bool     | relay flag, see BIP 0037
pub(crate) fn build_version(local: &NodeDesc, remote: SocketAddrV4) -> Vec<u8> {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    let nonce: u64 = thread_rng().gen();

    let mut c = ByteBufferComposer::new();
    c.append(&local.protocol_version.to_le_bytes());
    c.append(&local.services.as_bitmask().to_le_bytes());
    c.append(&timestamp.to_le_bytes());
    c.append_net_addr_no_time(&local.services, &remote);
    c.append_net_addr_no_time(&local.services, &SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0));
    c.append(&nonce.to_le_bytes());
    c.append_var_string(&local.user_agent);
    c.append(&local.start_height.to_le_bytes());
    c.append(&[1u8]); // relay = true

    encode_frame(local.network, command::VERSION, c.result())
}

pub(crate) fn parse_version(payload: &[u8]) -> PeerResult<VersionInfo> {
    let mut parser = ByteBufferParser::new(payload);

    let protocol_version = parser.read_i32_le()?;
    let services = NodeServiceSet::from_bitmask(parser.read_u64_le()?);
    let timestamp = parser.read_i64_le()?;
    parser.skip_bytes(26)?; // addr_recv
    parser.skip_bytes(26)?; // addr_from
    parser.skip_bytes(8)?; // nonce

    let user_agent = parser.read_var_string_lossy();
    let start_height = parser.read_i32_le().unwrap_or(0);

    Ok(VersionInfo {
        protocol_version,
        services,
        timestamp,
        user_agent,
        start_height,
    })
}

pub(crate) fn build_verack(network: Network) -> Vec<u8> {
    encode_frame(network, command::VERACK, vec![])
}

pub(crate) fn build_getaddr(network: Network) -> Vec<u8> {
    encode_frame(network, command::GETADDR, vec![])
}

/// One 30-byte record of an `addr` payload: `4-byte timestamp, 8-byte
/// services, 16-byte IP, 2-byte big-endian port`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub(crate) struct AddrEntry {
    pub ip: Ipv4Addr,
    pub port: u16,
    pub timestamp: u32,
}

const ADDR_RECORD_LEN: usize = 30;
const MAX_ADDR_ENTRIES: usize = 1000;

/// Parses the `addr` payload: a var-int count followed by up to
/// `min(count, 1000)` 30-byte records. Non-IPv4-mapped records are skipped
/// (advancing the full 30 bytes) rather than erroring. Any structural
/// problem causes the function to return whatever it parsed so far, never
/// an error — `addr` parsing is meant to be best-effort.
pub(crate) fn parse_addr(payload: &[u8]) -> Vec<AddrEntry> {
    let mut entries = Vec::new();

    let (count, mut offset) = match decode_varint(payload, 0) {
        Ok(v) => v,
        Err(_) => return entries,
    };

    let limit = (count as usize).min(MAX_ADDR_ENTRIES);
    for _ in 0..limit {
        if offset + ADDR_RECORD_LEN > payload.len() {
            break;
        }

        let mut parser = ByteBufferParser::new(&payload[offset..offset + ADDR_RECORD_LEN]);
        let timestamp = match parser.read_u32_le() {
            Ok(v) => v,
            Err(_) => break,
        };
        let _services = parser.read_u64_le().unwrap_or(0);
        let ip = parser.read_ipv4_mapped_opt();
        let port = parser.read_u16_be().unwrap_or(0);

        offset += ADDR_RECORD_LEN;

        if let Ok(Some(ip)) = ip {
            entries.push(AddrEntry { ip, port, timestamp });
        }
        // a pure-IPv6 record (or a malformed one) is silently dropped, but
        // the offset has already advanced by the full record length.
    }

    entries
}

/// Builds an `addr` payload from a set of entries. Used only by tests, as
/// the mirror image of [`parse_addr`].
#[cfg(test)]
pub(crate) fn build_addr_payload(entries: &[AddrEntry]) -> Vec<u8> {
    let mut c = ByteBufferComposer::new();
    c.append(&crate::wire::varint::encode_varint(entries.len() as u64));
    for entry in entries {
        c.append(&entry.timestamp.to_le_bytes());
        c.append(&0u64.to_le_bytes());
        c.append(&entry.ip.to_ipv6_mapped().octets());
        c.append(&entry.port.to_be_bytes());
    }
    c.result()
}

#[cfg(test)]
mod test {
    use std::net::Ipv6Addr;

    use super::*;
    use crate::types::{NodeService, NodeServiceSet};

    fn local_desc() -> NodeDesc {
        NodeDesc {
            network: Network::Regtest,
            protocol_version: 70015,
            services: NodeServiceSet(vec![NodeService::NodeNetwork]),
            user_agent: "/crawler:1.0/".to_string(),
            start_height: 0,
        }
    }

    #[test]
    fn version_round_trips_through_build_and_parse() {
        let frame = build_version(&local_desc(), SocketAddrV4::new(Ipv4Addr::new(1, 2, 3, 4), 8333));
        // strip the 24-byte header to get straight at the payload.
        let payload = &frame[24..];

        let info = parse_version(payload).unwrap();
        assert_eq!(info.protocol_version, 70015);
        assert_eq!(info.services, NodeServiceSet(vec![NodeService::NodeNetwork]));
        assert_eq!(info.user_agent, "/crawler:1.0/");
    }

    #[test]
    fn parse_version_matches_fixed_payload() {
        let mut c = ByteBufferComposer::new();
        c.append(&70015i32.to_le_bytes());
        c.append(&1u64.to_le_bytes());
        c.append(&0i64.to_le_bytes());
        c.append(&[0u8; 26]);
        c.append(&[0u8; 26]);
        c.append(&0u64.to_le_bytes());
        c.append_var_string("/Satoshi:24.0.1/");
        c.append(&0i32.to_le_bytes());
        c.append(&[1u8]);

        let info = parse_version(&c.result()).unwrap();
        assert_eq!(info.protocol_version, 70015);
        assert_eq!(info.services, NodeServiceSet(vec![NodeService::NodeNetwork]));
        assert_eq!(info.user_agent, "/Satoshi:24.0.1/");
    }

    #[test]
    fn parse_addr_drops_ipv6_but_keeps_ipv4() {
        let ipv4_entry = AddrEntry {
            ip: Ipv4Addr::new(10, 0, 0, 1),
            port: 8333,
            timestamp: 1_700_000_000,
        };

        let mut c = ByteBufferComposer::new();
        c.append(&crate::wire::varint::encode_varint(2));
        // entry 1: ipv4-mapped, should survive.
        c.append(&ipv4_entry.timestamp.to_le_bytes());
        c.append(&0u64.to_le_bytes());
        c.append(&ipv4_entry.ip.to_ipv6_mapped().octets());
        c.append(&ipv4_entry.port.to_be_bytes());
        // entry 2: genuine ipv6, should be dropped.
        c.append(&1_700_000_001u32.to_le_bytes());
        c.append(&0u64.to_le_bytes());
        c.append(&Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1).octets());
        c.append(&8333u16.to_be_bytes());

        let entries = parse_addr(&c.result());
        assert_eq!(entries, vec![ipv4_entry]);
    }

    #[test]
    fn parse_addr_caps_at_a_thousand_entries() {
        let entries: Vec<_> = (0..5)
            .map(|i| AddrEntry {
                ip: Ipv4Addr::new(10, 0, 0, i as u8),
                port: 8333,
                timestamp: 0,
            })
            .collect();
        let payload = build_addr_payload(&entries);
        assert_eq!(parse_addr(&payload), entries);
    }

    #[test]
    fn parse_addr_on_garbage_returns_empty_instead_of_panicking() {
        assert!(parse_addr(&[0xFF, 0x01]).is_empty());
        assert!(parse_addr(&[]).is_empty());
    }
}
