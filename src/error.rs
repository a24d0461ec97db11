use std::fmt::{Display, Formatter};

pub type PeerResult<T> = Result<T, PeerError>;

/// Error taxonomy for the crawl engine, split along the lines §7 of the
/// design draws between transport, protocol, and parse failures. Sink and
/// callback errors don't get their own variants here — a sink error is
/// raised straight to the caller via the sink's own `Result`, and callback
/// panics are caught and logged without ever reaching this type.
#[derive(Debug)]
pub enum PeerError {
    /// Connect refused/unreachable, OS error, TCP reset, read/write timeout.
    Transport(String),
    /// Magic mismatch, oversized frame, checksum mismatch, wrong command in
    /// wrong state, EOF before the handshake completed.
    Protocol(String),
    /// A malformed payload that couldn't be parsed at all (recoverable
    /// `addr`-payload parse errors are absorbed internally and never
    /// surface as this variant).
    Parse(String),
}

impl Display for PeerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerError::Transport(msg) => write!(f, "transport error: {msg}"),
            PeerError::Protocol(msg) => write!(f, "protocol error: {msg}"),
            PeerError::Parse(msg) => write!(f, "parse error: {msg}"),
        }
    }
}

impl std::error::Error for PeerError {}

impl From<std::io::Error> for PeerError {
    fn from(value: std::io::Error) -> Self {
        PeerError::Transport(value.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for PeerError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        PeerError::Transport("operation timed out".into())
    }
}
