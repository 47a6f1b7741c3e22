//! Network Module
//!
//! The transport the protocol engine sends through. The engine only needs a
//! best-effort `send(from, to, bytes)`; delivery happens into a per-node
//! inbound queue that the driver drains.
//!
//! - **`Transport`**: the seam between the engine and the network.
//! - **`emulnet`**: an in-memory network with configurable message loss, used
//!   by the simulation and the tests.

pub mod emulnet;

use bytes::Bytes;
use std::sync::Arc;
use thiserror::Error;

use crate::membership::types::PeerId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("no node registered at {0}")]
    UnknownPeer(PeerId),
}

/// Best-effort, unordered delivery of opaque buffers.
pub trait Transport {
    fn send(&self, from: &PeerId, to: &PeerId, bytes: Bytes) -> Result<(), NetworkError>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn send(&self, from: &PeerId, to: &PeerId, bytes: Bytes) -> Result<(), NetworkError> {
        (**self).send(from, to, bytes)
    }
}
