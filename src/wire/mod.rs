//! The peer-protocol wire codec (component C1): framing, var-ints, and the
//! handful of message payloads the crawl needs to speak (`version`,
//! `verack`, `getaddr`, `addr`). Nothing in this module ever suspends.

pub(crate) mod buffer;
pub(crate) mod frame;
pub(crate) mod messages;
pub(crate) mod varint;
