//! Gossip Membership Library
//!
//! Node-local group membership and failure detection over an unreliable network.
//!
//! ## Modules
//!
//! - **`membership`**: The protocol core. Wire codec, membership table, suspicion
//!   tracking, gossip fan-out and the engine that ties them together.
//! - **`network`**: The transport seam plus an in-memory emulated network with
//!   configurable message loss.
//! - **`simulation`**: Runs a whole group of engines against the emulated network,
//!   tick by tick, with crash injection.
//! - **`config`**: Protocol constants and simulation parameters.

pub mod config;
pub mod membership;
pub mod network;
pub mod simulation;
