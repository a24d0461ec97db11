use std::net::{Ipv4Addr, SocketAddrV4};

use crate::error::{PeerError, PeerResult};
use crate::types::NodeServiceSet;

/// Cursor over a byte slice. Almost all integers on the wire are little
/// endian; only the IP/port pair inside a network address record is big
/// endian, which is why the two `u16`/`u32` readers below come in both
/// flavors.
pub(crate) struct ByteBufferParser<'a> {
    buffer: &'a [u8],
    pos: usize,
}

impl<'a> ByteBufferParser<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        ByteBufferParser { buffer, pos: 0 }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.pos
    }

    pub fn skip_bytes(&mut self, count: usize) -> PeerResult<()> {
        self.eof_check(count)?;
        self.pos += count;
        Ok(())
    }

    pub fn read(&mut self, size: usize) -> PeerResult<&'a [u8]> {
        self.eof_check(size)?;
        let range = self.pos..self.pos + size;
        self.pos += size;
        Ok(&self.buffer[range])
    }

    pub fn read_u16_be(&mut self) -> PeerResult<u16> {
        Ok(u16::from_be_bytes(self.read(2)?.try_into().unwrap()))
    }

    pub fn read_u32_le(&mut self) -> PeerResult<u32> {
        Ok(u32::from_le_bytes(self.read(4)?.try_into().unwrap()))
    }

    pub fn read_i32_le(&mut self) -> PeerResult<i32> {
        Ok(i32::from_le_bytes(self.read(4)?.try_into().unwrap()))
    }

    pub fn read_u64_le(&mut self) -> PeerResult<u64> {
        Ok(u64::from_le_bytes(self.read(8)?.try_into().unwrap()))
    }

    pub fn read_i64_le(&mut self) -> PeerResult<i64> {
        Ok(i64::from_le_bytes(self.read(8)?.try_into().unwrap()))
    }

    /// Reads the 16-byte IPv4-mapped-IPv6 address used everywhere in this
    /// protocol. Returns `None` if the prefix doesn't match the IPv4-mapped
    /// form (i.e. the record describes a real IPv6 peer), while still
    /// consuming all 16 bytes.
    pub fn read_ipv4_mapped_opt(&mut self) -> PeerResult<Option<Ipv4Addr>> {
        let raw: [u8; 16] = self.read(16)?.try_into().unwrap();
        const IPV4_MAPPED_PREFIX: [u8; 12] = [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xFF, 0xFF];
        if raw[..12] == IPV4_MAPPED_PREFIX {
            Ok(Some(Ipv4Addr::new(raw[12], raw[13], raw[14], raw[15])))
        } else {
            Ok(None)
        }
    }

    /// `1+ length varint, ? string char[]`, decoded defensively: any
    /// structural problem yields an empty string rather than an error.
    pub fn read_var_string_lossy(&mut self) -> String {
        let before = self.pos;
        match self.try_read_var_string() {
            Ok(s) => s,
            Err(_) => {
                self.pos = before;
                String::new()
            }
        }
    }

    fn try_read_var_string(&mut self) -> PeerResult<String> {
        let (len, next) = crate::wire::varint::decode_varint(self.buffer, self.pos)?;
        self.pos = next;
        let bytes = self.read(len as usize)?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    fn eof_check(&self, want_bytes: usize) -> PeerResult<()> {
        if self.remaining() < want_bytes {
            Err(PeerError::Parse(format!(
                "can not read {} bytes from buffer of size {}, {} remaining",
                want_bytes,
                self.buffer.len(),
                self.remaining()
            )))
        } else {
            Ok(())
        }
    }
}

pub(crate) struct ByteBufferComposer {
    buffer: Vec<u8>,
}

impl ByteBufferComposer {
    pub fn new() -> Self {
        ByteBufferComposer { buffer: vec![] }
    }

    pub fn result(self) -> Vec<u8> {
        self.buffer
    }

    pub fn append(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Net address record without the leading time field (used for
    /// `addr_recv`/`addr_from` in a `version` payload).
    pub fn append_net_addr_no_time(&mut self, services: &NodeServiceSet, addr: &SocketAddrV4) {
        self.append(&services.as_bitmask().to_le_bytes());
        self.append(&addr.ip().to_ipv6_mapped().octets());
        self.append(&addr.port().to_be_bytes());
    }

    pub fn append_var_string(&mut self, s: &str) {
        self.append(&crate::wire::varint::encode_varint(s.len() as u64));
        self.append(s.as_bytes());
    }
}

/// Growable accumulation buffer for partially-received frames. Mirrors the
/// `shift_left`/`expose_writable_part` idiom of a fixed-size ring reader,
/// but grows on demand since `addr` payloads can run well past a few
/// kilobytes.
pub(crate) struct IoBuffer {
    buf: Vec<u8>,
    filled: usize,
}

impl IoBuffer {
    pub fn with_capacity(cap: usize) -> Self {
        IoBuffer {
            buf: vec![0u8; cap],
            filled: 0,
        }
    }

    pub fn content(&self) -> &[u8] {
        &self.buf[..self.filled]
    }

    /// Returns at least `min_free` writable bytes at the end of the buffer,
    /// growing the backing storage if necessary.
    pub fn writable(&mut self, min_free: usize) -> &mut [u8] {
        if self.buf.len() - self.filled < min_free {
            self.buf.resize(self.filled + min_free, 0);
        }
        &mut self.buf[self.filled..]
    }

    /// Registers `n` freshly written bytes at the end of the buffer.
    pub fn commit(&mut self, n: usize) {
        assert!(self.filled + n <= self.buf.len());
        self.filled += n;
    }

    /// Drops the first `n` bytes of content, shifting the remainder down.
    pub fn consume(&mut self, n: usize) {
        assert!(n <= self.filled);
        self.buf.copy_within(n..self.filled, 0);
        self.filled -= n;
    }
}
