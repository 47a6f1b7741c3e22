//! Gossip Disseminator
//!
//! Each candidate peer is picked independently with probability
//! `p = min(1, K / candidates)`, so the expected number of recipients stays
//! around `K` no matter how large the group grows.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::codec::{self, Envelope};
use super::table::MembershipTable;
use super::types::PeerId;
use crate::network::Transport;

pub struct GossipDisseminator {
    fanout: usize,
    rng: StdRng,
}

impl GossipDisseminator {
    pub fn new(fanout: usize) -> Self {
        Self {
            fanout,
            rng: StdRng::from_entropy(),
        }
    }

    /// Reproducible selection, for tests and simulations.
    pub fn with_seed(fanout: usize, seed: u64) -> Self {
        Self {
            fanout,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn fanout_target(&self) -> usize {
        self.fanout
    }

    /// Per-peer forwarding probability for `candidates` eligible peers.
    pub fn probability(&self, candidates: usize) -> f64 {
        if candidates == 0 {
            return 0.0;
        }
        (self.fanout as f64 / candidates as f64).min(1.0)
    }

    /// Draws the recipients for one gossip round. The local node is never a
    /// candidate.
    pub fn select_targets(&mut self, table: &MembershipTable, excluding: &[PeerId]) -> Vec<PeerId> {
        let candidates: Vec<PeerId> = table
            .remote_peers()
            .map(|entry| entry.peer)
            .filter(|peer| !excluding.contains(peer))
            .collect();

        let p = self.probability(candidates.len());
        candidates
            .into_iter()
            .filter(|_| self.rng.gen_bool(p))
            .collect()
    }

    /// Encodes `envelope` once and sends it to a random subset of the table.
    /// Returns the peers the message was handed to.
    pub fn fanout<T: Transport>(
        &mut self,
        transport: &T,
        table: &MembershipTable,
        envelope: &Envelope,
        excluding: &[PeerId],
    ) -> Vec<PeerId> {
        let targets = self.select_targets(table, excluding);
        if targets.is_empty() {
            return targets;
        }

        let bytes = codec::encode(envelope);
        targets
            .into_iter()
            .filter(|target| {
                match transport.send(&envelope.sender, target, bytes.clone()) {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::warn!("Failed to gossip to {}: {}", target, e);
                        false
                    }
                }
            })
            .collect()
    }
}
