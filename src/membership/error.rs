use super::types::PeerId;
use crate::network::NetworkError;
use thiserror::Error;

/// Reasons a buffer could not be decoded into a protocol message.
///
/// Every variant is treated the same way by the engine: the message is
/// dropped and logged.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("buffer truncated: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("unknown message type {0:#04x}")]
    UnknownMessageType(u8),

    #[error("{0} unexpected trailing bytes")]
    TrailingBytes(usize),
}

#[derive(Debug, Error)]
pub enum MembershipError {
    #[error("malformed message: {0}")]
    Malformed(#[from] CodecError),

    /// Upsert for a peer this node already evicted.
    #[error("peer {0} was already evicted")]
    ReEvictedPeer(PeerId),

    /// Join bootstrap could not reach the introducer.
    #[error("introducer {introducer} unreachable")]
    IntroducerUnreachable {
        introducer: PeerId,
        #[source]
        source: NetworkError,
    },
}
