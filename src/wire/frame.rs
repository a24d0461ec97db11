use sha2::digest::FixedOutput;
use sha2::{Digest, Sha256};

use crate::error::{PeerError, PeerResult};
use crate::types::Network;
use crate::wire::buffer::{ByteBufferComposer, ByteBufferParser};

/// ASCII command identifiers, NUL padded to 12 bytes. Non-NUL padding or an
/// unrecognized string is not an error at this layer — unknown commands are
/// passed through as raw bytes and it is up to the caller to decide whether
/// to act on them.
pub mod command {
    pub const VERSION: &[u8; 12] = b"version\0\0\0\0\0";
    pub const VERACK: &[u8; 12] = b"verack\0\0\0\0\0\0";
    pub const GETADDR: &[u8; 12] = b"getaddr\0\0\0\0\0";
    pub const ADDR: &[u8; 12] = b"addr\0\0\0\0\0\0\0\0";
}

pub const MAX_PAYLOAD_LEN: usize = 2 * 1024 * 1024;
const HEADER_LEN: usize = 4 + 12 + 4 + 4;

/// A decoded wire frame: network magic already checked against the
/// expected network, command left as raw bytes, payload still unparsed.
#[derive(Debug)]
pub(crate) struct RawFrame {
    pub command: [u8; 12],
    pub payload: Vec<u8>,
}

#[derive(Debug)]
pub(crate) enum DecodeOutcome {
    Frame { frame: RawFrame, next_offset: usize },
    Incomplete,
}

/// Message structure (https://en.bitcoin.it/wiki/Protocol_documentation#Message_structure):
///
/// size | field    | type     | description
/// ---  | -----    | ----     | ------------
/// 4    | magic    | u32      | network the message originates from
/// 12   | command  | [u8; 12] | ASCII command, NUL padded
/// 4    | length   | u32      | payload length in bytes
/// 4    | checksum | u32      | first 4 bytes of sha256(sha256(payload))
/// ?    | payload  | Vec<u8>  | the actual data
pub(crate) fn encode_frame(network: Network, command: &[u8; 12], payload: Vec<u8>) -> Vec<u8> {
    let mut c = ByteBufferComposer::new();
    c.append(&network.magic_value().to_le_bytes());
    c.append(command);
    c.append(&(payload.len() as u32).to_le_bytes());
    let checksum = double_sha256(&payload);
    c.append(&checksum[..4]);
    c.append(&payload);
    c.result()
}

/// Attempts to decode one frame starting at `offset`. Returns `Incomplete`
/// if fewer than `24 + length` bytes are available from `offset`, or an
/// error if the magic doesn't match `expected_network`, the payload
/// exceeds [`MAX_PAYLOAD_LEN`], or the checksum fails.
pub(crate) fn decode_frame(
    buffer: &[u8],
    offset: usize,
    expected_network: Network,
) -> PeerResult<DecodeOutcome> {
    let available = &buffer[offset..];
    if available.len() < HEADER_LEN {
        return Ok(DecodeOutcome::Incomplete);
    }

    let mut parser = ByteBufferParser::new(available);
    let magic = parser.read_u32_le()?;
    if magic != expected_network.magic_value() {
        return Err(PeerError::Protocol(format!(
            "magic {:#010x} does not match configured network {:?} ({:#010x})",
            magic,
            expected_network,
            expected_network.magic_value()
        )));
    }

    let command: [u8; 12] = parser.read(12)?.try_into().unwrap();
    let payload_len = parser.read_u32_le()? as usize;
    if payload_len > MAX_PAYLOAD_LEN {
        return Err(PeerError::Protocol(format!(
            "payload length {payload_len} exceeds maximum of {MAX_PAYLOAD_LEN}"
        )));
    }
    let checksum: [u8; 4] = parser.read(4)?.try_into().unwrap();

    if parser.remaining() < payload_len {
        return Ok(DecodeOutcome::Incomplete);
    }

    let payload = parser.read(payload_len)?.to_vec();
    verify_checksum(&payload, &checksum)?;

    Ok(DecodeOutcome::Frame {
        frame: RawFrame { command, payload },
        next_offset: offset + parser.pos(),
    })
}

fn verify_checksum(payload: &[u8], checksum: &[u8; 4]) -> PeerResult<()> {
    if double_sha256(payload)[..4] == *checksum {
        Ok(())
    } else {
        Err(PeerError::Protocol("checksum mismatch".into()))
    }
}

pub(crate) fn double_sha256(input: &[u8]) -> [u8; 32] {
    sha256(&sha256(input))
}

fn sha256(input: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::default();
    hasher.update(input);
    hasher.finalize_fixed().into()
}

/// Human-readable rendering of a raw command field, for logging.
pub(crate) fn command_name(raw: &[u8; 12]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

#[cfg(test)]
mod test {
    use hex_literal::hex;
    use rstest::*;

    use super::*;

    #[rstest]
    #[case(b"hello world", &hex!("b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"))]
    fn test_sha256(#[case] input: &[u8], #[case] expected: &[u8; 32]) {
        assert_eq!(&sha256(input), expected);
    }

    #[test]
    fn verack_frame_matches_known_bytes_on_mainnet() {
        let bytes = encode_frame(Network::Mainnet, command::VERACK, vec![]);
        assert_eq!(bytes.len(), HEADER_LEN);
        assert_eq!(&bytes[0..4], &hex!("f9beb4d9"));
        assert_eq!(&bytes[4..16], b"verack\0\0\0\0\0\0");
        assert_eq!(&bytes[16..20], &[0, 0, 0, 0]);
        assert_eq!(&bytes[20..24], &hex!("5df6e0e2"));
    }

    #[test]
    fn encode_then_decode_round_trips() {
        let payload = b"some payload bytes".to_vec();
        let bytes = encode_frame(Network::Regtest, command::ADDR, payload.clone());

        match decode_frame(&bytes, 0, Network::Regtest).unwrap() {
            DecodeOutcome::Frame { frame, next_offset } => {
                assert_eq!(frame.command, *command::ADDR);
                assert_eq!(frame.payload, payload);
                assert_eq!(next_offset, bytes.len());
            }
            DecodeOutcome::Incomplete => panic!("expected a complete frame"),
        }
    }

    #[test]
    fn decode_reports_incomplete_on_truncated_buffer() {
        let bytes = encode_frame(Network::Regtest, command::ADDR, b"payload".to_vec());
        let truncated = &bytes[..bytes.len() - 1];
        match decode_frame(truncated, 0, Network::Regtest).unwrap() {
            DecodeOutcome::Incomplete => {}
            DecodeOutcome::Frame { .. } => panic!("expected incomplete"),
        }
    }

    #[test]
    fn decode_rejects_wrong_network() {
        let bytes = encode_frame(Network::Mainnet, command::VERACK, vec![]);
        let err = decode_frame(&bytes, 0, Network::Testnet3).unwrap_err();
        assert!(matches!(err, PeerError::Protocol(_)));
    }

    #[test]
    fn decode_rejects_corrupted_payload() {
        let mut bytes = encode_frame(Network::Regtest, command::ADDR, b"payload".to_vec());
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        let err = decode_frame(&bytes, 0, Network::Regtest).unwrap_err();
        assert!(matches!(err, PeerError::Protocol(_)));
    }

    #[test]
    fn decode_rejects_oversized_payload_length() {
        let mut bytes = encode_frame(Network::Regtest, command::ADDR, vec![]);
        bytes[16..20].copy_from_slice(&((MAX_PAYLOAD_LEN as u32) + 1).to_le_bytes());
        let err = decode_frame(&bytes, 0, Network::Regtest).unwrap_err();
        assert!(matches!(err, PeerError::Protocol(_)));
    }
}
