//! Membership & Failure Detection Module
//!
//! Implements a gossip-based heartbeat membership protocol. Each node keeps its
//! own view of the group, spreads liveness by periodically gossiping its table,
//! and evicts peers only after a suspicion window.
//!
//! ## Core Mechanisms
//! - **Heartbeat Gossip**: Every `H` ticks a node bumps its own counter and sends its
//!   whole table to a random subset of peers (anti-entropy).
//! - **Monotonic Merge**: A peer's heartbeat is accepted only if strictly greater than
//!   the stored one, so duplicated or reordered messages never roll the view back.
//! - **Suspicion Before Removal**: A silent peer is first suspected and gossiped as such;
//!   other nodes probe it directly and relay any proof of life back. Only continued
//!   silence through the grace window evicts it.
//! - **Epidemic Removal**: Evictions are gossiped so the rest of the group converges.
//!
//! ## Submodules
//! - **`codec`**: Fixed-layout binary wire format.
//! - **`table`**: The membership table and dead set.
//! - **`suspicion`**: Suspects awaiting confirmation and local suspicions.
//! - **`gossip`**: Probabilistic fan-out.
//! - **`engine`**: Message dispatch and the periodic tick.

pub mod codec;
pub mod engine;
pub mod error;
pub mod gossip;
pub mod suspicion;
pub mod table;
pub mod types;

#[cfg(test)]
mod tests;
