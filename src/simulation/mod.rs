//! Simulation Module
//!
//! Runs a whole group of protocol engines in one process on top of the
//! emulated network. Each logical tick the driver:
//! 1. starts the next node (nodes join one per tick, introducer first),
//! 2. crashes nodes when the configured failure tick is reached,
//! 3. delivers every live node's inbound queue and then ticks it.
//!
//! `handlers` exposes the running cluster over HTTP for inspection.

pub mod cluster;
pub mod handlers;

pub use cluster::{Cluster, NodeView};
