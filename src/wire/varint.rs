//! Variable-length integer encoding used for length prefixes throughout the
//! wire protocol: `< 0xFD` one byte literal, `0xFD` + 2 bytes LE, `0xFE` + 4
//! bytes LE, `0xFF` + 8 bytes LE.

use crate::error::{PeerError, PeerResult};

pub(crate) fn encode_varint(value: u64) -> Vec<u8> {
    if value < 0xFD {
        vec![value as u8]
    } else if value <= 0xFFFF {
        let mut out = vec![0xFD];
        out.extend_from_slice(&(value as u16).to_le_bytes());
        out
    } else if value <= 0xFFFF_FFFF {
        let mut out = vec![0xFE];
        out.extend_from_slice(&(value as u32).to_le_bytes());
        out
    } else {
        let mut out = vec![0xFF];
        out.extend_from_slice(&value.to_le_bytes());
        out
    }
}

/// Returns the decoded value and the offset just past the varint.
pub(crate) fn decode_varint(buffer: &[u8], offset: usize) -> PeerResult<(u64, usize)> {
    let first = *buffer
        .get(offset)
        .ok_or_else(|| PeerError::Parse("insufficient data for varint".into()))?;

    let read_bytes = |n: usize| -> PeerResult<&[u8]> {
        buffer
            .get(offset + 1..offset + 1 + n)
            .ok_or_else(|| PeerError::Parse("insufficient data for varint".into()))
    };

    match first {
        0xFD => {
            let bytes = read_bytes(2)?;
            let value = u16::from_le_bytes(bytes.try_into().unwrap()) as u64;
            Ok((value, offset + 3))
        }
        0xFE => {
            let bytes = read_bytes(4)?;
            let value = u32::from_le_bytes(bytes.try_into().unwrap()) as u64;
            Ok((value, offset + 5))
        }
        0xFF => {
            let bytes = read_bytes(8)?;
            let value = u64::from_le_bytes(bytes.try_into().unwrap());
            Ok((value, offset + 9))
        }
        n => Ok((n as u64, offset + 1)),
    }
}

#[cfg(test)]
mod test {
    use rstest::*;

    use super::*;

    #[rstest]
    #[case(0, 1)]
    #[case(0xFC, 1)]
    #[case(0xFD, 3)]
    #[case(0xFFFF, 3)]
    #[case(0x1_0000, 5)]
    #[case(0xFFFF_FFFF, 5)]
    #[case(0x1_0000_0000, 9)]
    fn round_trips_and_matches_length_boundaries(#[case] value: u64, #[case] expected_len: usize) {
        let encoded = encode_varint(value);
        assert_eq!(encoded.len(), expected_len);

        let (decoded, next_offset) = decode_varint(&encoded, 0).unwrap();
        assert_eq!(decoded, value);
        assert_eq!(next_offset, encoded.len());
    }

    #[test]
    fn decode_fails_on_truncated_input() {
        assert!(decode_varint(&[0xFD, 0x01], 0).is_err());
        assert!(decode_varint(&[], 0).is_err());
    }
}
