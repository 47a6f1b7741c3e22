use anyhow::{Result, bail};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::config::{ProtocolConfig, SimulationConfig};
use crate::membership::engine::ProtocolEngine;
use crate::membership::gossip::GossipDisseminator;
use crate::membership::types::{MemberEntry, MembershipEvent, PeerId};
use crate::network::emulnet::{EmulNet, NetworkStats};

pub type SimNode = ProtocolEngine<Arc<EmulNet>>;

/// What one node currently believes, for reporting.
#[derive(Debug, Clone, Serialize)]
pub struct NodeView {
    pub peer: PeerId,
    pub in_group: bool,
    pub failed: bool,
    pub members: Vec<MemberEntry>,
}

pub struct Cluster {
    sim: SimulationConfig,
    network: Arc<EmulNet>,
    nodes: Vec<SimNode>,
    started: usize,
    now: u64,
    rng: StdRng,
    malformed: u64,
}

impl Cluster {
    pub fn new(protocol: ProtocolConfig, sim: SimulationConfig) -> Result<Self> {
        Self::build(protocol, sim, None)
    }

    /// Same as [`Cluster::new`] but with reproducible gossip and failure choices.
    pub fn with_seed(protocol: ProtocolConfig, sim: SimulationConfig, seed: u64) -> Result<Self> {
        Self::build(protocol, sim, Some(seed))
    }

    fn build(protocol: ProtocolConfig, sim: SimulationConfig, seed: Option<u64>) -> Result<Self> {
        protocol.validate()?;
        sim.validate()?;

        let mut peers: Vec<PeerId> = (1..=sim.nodes).map(|id| PeerId::new(id, 0)).collect();
        if !peers.contains(&protocol.introducer) {
            bail!(
                "introducer {} is not one of the {} simulated nodes",
                protocol.introducer,
                sim.nodes
            );
        }
        // The introducer has to be up before anybody can join.
        peers.sort_by_key(|peer| *peer != protocol.introducer);

        let network = Arc::new(EmulNet::new(sim.drop_rate));
        let nodes = peers
            .into_iter()
            .map(|peer| {
                network.register(peer);
                let gossip = match seed {
                    Some(seed) => GossipDisseminator::with_seed(
                        protocol.fanout,
                        seed.wrapping_add(peer.id as u64),
                    ),
                    None => GossipDisseminator::new(protocol.fanout),
                };
                ProtocolEngine::with_gossip(peer, protocol.clone(), network.clone(), gossip)
            })
            .collect();

        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Ok(Self {
            sim,
            network,
            nodes,
            started: 0,
            now: 0,
            rng,
            malformed: 0,
        })
    }

    /// Advances the whole group by one logical tick and returns the
    /// membership events it produced, tagged with the observing node.
    pub fn step(&mut self) -> Result<Vec<(PeerId, MembershipEvent)>> {
        let now = self.now;

        if self.started < self.nodes.len() {
            self.nodes[self.started].start(now)?;
            self.started += 1;
        }

        self.retry_joins(now)?;

        if self.sim.fail_count > 0 && now == self.sim.fail_at {
            self.inject_failures();
        }

        let mut events = Vec::new();
        for node in self.nodes[..self.started].iter_mut() {
            if node.is_failed() {
                continue;
            }

            for bytes in self.network.receive(&node.local()) {
                if node.receive(&bytes, now).is_err() {
                    self.malformed += 1;
                }
            }
            node.tick(now);

            let local = node.local();
            events.extend(node.drain_events().into_iter().map(|e| (local, e)));
        }

        self.now += 1;
        Ok(events)
    }

    /// Runs until `total_ticks` logical ticks have elapsed.
    pub fn run(&mut self) -> Result<Vec<(PeerId, MembershipEvent)>> {
        let mut events = Vec::new();
        while self.now < self.sim.total_ticks {
            events.extend(self.step()?);
        }
        Ok(events)
    }

    /// Re-sends JOIN_REQUEST for nodes still outside the group half a
    /// suspicion window after their last attempt; either the request or the
    /// reply was lost. A node whose reply was lost is already in its peers'
    /// tables and has to join before they evict it for silence.
    fn retry_joins(&mut self, now: u64) -> Result<()> {
        for node in self.nodes[..self.started].iter_mut() {
            if node.is_failed() || node.is_in_group() {
                continue;
            }
            let period = (node.config().t_suspect / 2).max(1);
            if now.saturating_sub(node.join_requested_at()) >= period {
                node.retry_join(now)?;
            }
        }
        Ok(())
    }

    fn inject_failures(&mut self) {
        let introducer = self
            .nodes
            .first()
            .map(|node| node.config().introducer);

        let mut candidates: Vec<usize> = (0..self.started)
            .filter(|&i| !self.nodes[i].is_failed() && Some(self.nodes[i].local()) != introducer)
            .collect();
        candidates.shuffle(&mut self.rng);

        for i in candidates.into_iter().take(self.sim.fail_count) {
            let node = &mut self.nodes[i];
            node.fail();
            self.network.shutdown(&node.local());
            tracing::info!("Crashed {} at tick {}", node.local(), self.now);
        }
    }

    /// Crashes one specific node right now.
    pub fn crash(&mut self, peer: &PeerId) -> bool {
        match self.nodes.iter_mut().find(|node| node.local() == *peer) {
            Some(node) => {
                node.fail();
                self.network.shutdown(peer);
                true
            }
            None => false,
        }
    }

    pub fn now(&self) -> u64 {
        self.now
    }

    pub fn node(&self, peer: &PeerId) -> Option<&SimNode> {
        self.nodes.iter().find(|node| node.local() == *peer)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &SimNode> {
        self.nodes.iter()
    }

    /// Started nodes that have not crashed.
    pub fn live_peers(&self) -> BTreeSet<PeerId> {
        self.nodes[..self.started]
            .iter()
            .filter(|node| !node.is_failed())
            .map(|node| node.local())
            .collect()
    }

    pub fn failed_peers(&self) -> BTreeSet<PeerId> {
        self.nodes
            .iter()
            .filter(|node| node.is_failed())
            .map(|node| node.local())
            .collect()
    }

    pub fn views(&self) -> Vec<NodeView> {
        self.nodes
            .iter()
            .map(|node| NodeView {
                peer: node.local(),
                in_group: node.is_in_group(),
                failed: node.is_failed(),
                members: node.snapshot(),
            })
            .collect()
    }

    /// Every node has started, and every live node is in the group and
    /// knows exactly the live nodes.
    pub fn converged(&self) -> bool {
        if self.started < self.nodes.len() {
            return false;
        }

        let live = self.live_peers();
        self.nodes
            .iter()
            .filter(|node| !node.is_failed())
            .all(|node| {
                let known: BTreeSet<PeerId> = node.snapshot().iter().map(|e| e.peer).collect();
                node.is_in_group() && known == live
            })
    }

    pub fn network_stats(&self) -> NetworkStats {
        self.network.stats()
    }

    pub fn malformed_messages(&self) -> u64 {
        self.malformed
    }
}
