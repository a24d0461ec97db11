//! Peer session (component C2): the full message sequence against one
//! remote endpoint, from TCP connect to socket close. Grounded on the
//! teacher's `NodeConnection::proceed_conversation` read loop, generalized
//! with the bounded drain policy this crawl needs after `getaddr`.

use std::net::SocketAddrV4;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::error::{PeerError, PeerResult};
use crate::types::{CrawlConfig, Endpoint, NodeDesc, PeerRecord};
use crate::wire::buffer::IoBuffer;
use crate::wire::frame::{command, command_name, decode_frame, DecodeOutcome, RawFrame};
use crate::wire::messages::{build_getaddr, build_verack, build_version, parse_addr, parse_version, AddrEntry};

const POST_GETADDR_DELAY: Duration = Duration::from_millis(300);
const DRAIN_READ_TIMEOUT: Duration = Duration::from_millis(1500);
const DRAIN_READ_SIZE: usize = 16 * 1024;
const DRAIN_MAX_ATTEMPTS: u32 = 8;
const DRAIN_MIN_ATTEMPTS_WITH_ADDR: u32 = 2;
const SALVAGE_OFFSETS: [usize; 3] = [0, 24, 48];
const INITIAL_BUFFER_CAPACITY: usize = 32 * 1024;

pub struct SessionOutcome {
    pub record: PeerRecord,
    pub new_peers: Vec<Endpoint>,
}

/// Runs one full session against `endpoint`: connect, handshake, `getaddr`
/// drain, then close. The socket closes on every exit path because it only
/// ever lives as a local variable that gets dropped, whether that happens
/// via a normal return or via `?`.
pub async fn run_session(endpoint: Endpoint, config: &CrawlConfig, local: &NodeDesc) -> PeerResult<SessionOutcome> {
    let remote = SocketAddrV4::new(endpoint.ip, endpoint.port);

    let mut socket = timeout(config.timeout, TcpStream::connect(remote))
        .await
        .map_err(|_| PeerError::Transport(format!("connect to {endpoint} timed out")))??;

    let mut buffer = IoBuffer::with_capacity(INITIAL_BUFFER_CAPACITY);

    socket.write_all(&build_version(local, remote)).await?;
    let version_frame = read_first_frame(&mut socket, &mut buffer, config, local.network, command::VERSION).await?;
    let version_info = parse_version(&version_frame.payload)?;

    socket.write_all(&build_verack(local.network)).await?;
    read_until_frame(&mut socket, &mut buffer, config, local.network, command::VERACK).await?;

    socket.write_all(&build_getaddr(local.network)).await?;
    tokio::time::sleep(POST_GETADDR_DELAY).await;

    let addr_entries = drain_addr_frames(&mut socket, &mut buffer, local.network).await?;

    let timestamp_iso = format_now_rfc3339();
    let record = PeerRecord {
        ip: endpoint.ip,
        port: endpoint.port,
        protocol_version: version_info.protocol_version,
        services: version_info.services.as_bitmask(),
        user_agent: version_info.user_agent,
        timestamp_iso,
        peers_discovered: addr_entries.len(),
        geo: None,
    };

    let new_peers = addr_entries
        .into_iter()
        .map(|e| Endpoint::new(e.ip, e.port))
        .collect();

    Ok(SessionOutcome { record, new_peers })
}

/// Reads exactly the next frame and requires its command to be `expected`.
/// Used for the `version` step, where anything other than `version` as the
/// very first frame is a protocol violation, not something to skip past.
async fn read_first_frame(
    socket: &mut TcpStream,
    buffer: &mut IoBuffer,
    config: &CrawlConfig,
    network: crate::types::Network,
    expected: &[u8; 12],
) -> PeerResult<RawFrame> {
    let frame = read_next_frame(socket, buffer, config.timeout, network).await?;
    if frame.command != *expected {
        return Err(PeerError::Protocol(format!(
            "expected '{}' as first message, got '{}'",
            command_name(expected),
            command_name(&frame.command)
        )));
    }
    Ok(frame)
}

/// Reads and discards frames until one with command `expected` shows up, or
/// the overall timeout elapses. Used for `verack`, where the remote may
/// interleave other housekeeping messages first.
async fn read_until_frame(
    socket: &mut TcpStream,
    buffer: &mut IoBuffer,
    config: &CrawlConfig,
    network: crate::types::Network,
    expected: &[u8; 12],
) -> PeerResult<()> {
    timeout(config.timeout, async {
        loop {
            let frame = read_next_frame_no_timeout(socket, buffer, network).await?;
            if frame.command == *expected {
                return Ok(());
            }
            log::debug!("ignoring '{}' while waiting for '{}'", command_name(&frame.command), command_name(expected));
        }
    })
    .await
    .map_err(|_| PeerError::Transport(format!("timed out waiting for '{}'", command_name(expected))))?
}

/// Reads bytes off the socket (with `read_timeout`) until a complete frame
/// can be decoded from the front of `buffer`, then consumes it.
async fn read_next_frame(
    socket: &mut TcpStream,
    buffer: &mut IoBuffer,
    read_timeout: Duration,
    network: crate::types::Network,
) -> PeerResult<RawFrame> {
    timeout(read_timeout, read_next_frame_no_timeout(socket, buffer, network))
        .await
        .map_err(|_| PeerError::Transport("timed out waiting for a frame".into()))?
}

async fn read_next_frame_no_timeout(
    socket: &mut TcpStream,
    buffer: &mut IoBuffer,
    network: crate::types::Network,
) -> PeerResult<RawFrame> {
    loop {
        if let DecodeOutcome::Frame { frame, next_offset } = decode_frame(buffer.content(), 0, network)? {
            buffer.consume(next_offset);
            return Ok(frame);
        }

        let n = socket.read(buffer.writable(DRAIN_READ_SIZE)).await?;
        if n == 0 {
            return Err(PeerError::Transport("remote closed the connection".into()));
        }
        buffer.commit(n);
    }
}

/// Decodes and consumes every complete frame currently sitting in `buffer`,
/// harvesting `addr` payloads as it goes. Pulled out of
/// [`drain_addr_frames`] so bytes already buffered from the handshake phase
/// (the `version`/`verack` reads can easily pull in more than they need)
/// get processed without waiting on a fresh socket read.
fn drain_buffered_frames(
    buffer: &mut IoBuffer,
    network: crate::types::Network,
    entries: &mut Vec<AddrEntry>,
    addr_frames_seen: &mut u32,
) {
    loop {
        match decode_frame(buffer.content(), 0, network) {
            Ok(DecodeOutcome::Frame { frame, next_offset }) => {
                if frame.command == *command::ADDR {
                    entries.extend(parse_addr(&frame.payload));
                    *addr_frames_seen += 1;
                }
                buffer.consume(next_offset);
            }
            Ok(DecodeOutcome::Incomplete) => break,
            Err(err) => {
                log::debug!("ignoring undecodable frame during drain: {err}");
                break;
            }
        }
    }
}

/// Bounded read loop after `getaddr`: up to [`DRAIN_MAX_ATTEMPTS`] reads of
/// [`DRAIN_READ_SIZE`] bytes each with a [`DRAIN_READ_TIMEOUT`] per read,
/// decoding every complete frame found and harvesting `addr` payloads.
/// Terminates early once at least one `addr` frame has been seen and at
/// least [`DRAIN_MIN_ATTEMPTS_WITH_ADDR`] attempts have elapsed.
async fn drain_addr_frames(
    socket: &mut TcpStream,
    buffer: &mut IoBuffer,
    network: crate::types::Network,
) -> PeerResult<Vec<AddrEntry>> {
    let mut entries = Vec::new();
    let mut addr_frames_seen = 0u32;
    let mut any_bytes_received = !buffer.content().is_empty();

    drain_buffered_frames(buffer, network, &mut entries, &mut addr_frames_seen);

    for attempt in 1..=DRAIN_MAX_ATTEMPTS {
        match timeout(DRAIN_READ_TIMEOUT, socket.read(buffer.writable(DRAIN_READ_SIZE))).await {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => {
                any_bytes_received = true;
                buffer.commit(n);
                drain_buffered_frames(buffer, network, &mut entries, &mut addr_frames_seen);
            }
            Ok(Err(err)) => return Err(err.into()),
            Err(_) => { /* read timed out this attempt; keep going */ }
        }

        if addr_frames_seen >= 1 && attempt >= DRAIN_MIN_ATTEMPTS_WITH_ADDR {
            break;
        }
    }

    if entries.is_empty() && any_bytes_received {
        for &start in &SALVAGE_OFFSETS {
            if start >= buffer.content().len() {
                continue;
            }
            if let Ok(DecodeOutcome::Frame { frame, .. }) = decode_frame(buffer.content(), start, network) {
                if frame.command == *command::ADDR {
                    entries = parse_addr(&frame.payload);
                    break;
                }
            }
        }
    }

    Ok(entries)
}

fn format_now_rfc3339() -> String {
    use time::format_description::well_known::Rfc3339;
    use time::OffsetDateTime;

    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}
