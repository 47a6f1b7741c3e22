//! Protocol Engine
//!
//! Dispatches decoded messages and drives the periodic tick. Everything here
//! is synchronous: one inbound message or one tick at a time, against state
//! owned by the engine. Time is the caller's logical clock, passed in as
//! `now` on every call.
//!
//! Per-peer lifecycle as seen locally:
//!
//! ```text
//! UNKNOWN --first heartbeat/join--> ALIVE --silent >= t_suspect--> SUSPECTED
//!    SUSPECTED --newer heartbeat--> ALIVE
//!    SUSPECTED --silent >= t_suspect + t_fail--> DEAD (evicted, removal gossiped)
//! ```

use bytes::Bytes;

use super::codec::{self, Envelope, Message};
use super::error::MembershipError;
use super::gossip::GossipDisseminator;
use super::suspicion::{SuspectOutcome, SuspicionTracker};
use super::table::MembershipTable;
use super::types::{MemberEntry, MemberStatus, MembershipEvent, PeerId, Upsert};
use crate::config::ProtocolConfig;
use crate::network::Transport;

pub struct ProtocolEngine<T: Transport> {
    local: PeerId,
    config: ProtocolConfig,
    table: MembershipTable,
    suspicion: SuspicionTracker,
    gossip: GossipDisseminator,
    transport: T,
    in_group: bool,
    failed: bool,
    last_heartbeat_at: u64,
    join_requested_at: u64,
    events: Vec<MembershipEvent>,
}

impl<T: Transport> ProtocolEngine<T> {
    pub fn new(local: PeerId, config: ProtocolConfig, transport: T) -> Self {
        let gossip = GossipDisseminator::new(config.fanout);
        Self::with_gossip(local, config, transport, gossip)
    }

    pub fn with_gossip(
        local: PeerId,
        config: ProtocolConfig,
        transport: T,
        gossip: GossipDisseminator,
    ) -> Self {
        Self {
            local,
            config,
            table: MembershipTable::new(local, 0),
            suspicion: SuspicionTracker::new(),
            gossip,
            transport,
            in_group: false,
            failed: false,
            last_heartbeat_at: 0,
            join_requested_at: 0,
            events: Vec::new(),
        }
    }

    // ------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------

    /// Boots the node: resets local state, then either founds the group (when
    /// this node is the introducer) or asks the introducer to admit it.
    ///
    /// Failing to reach the introducer is the one fatal condition; it is
    /// returned to the caller. Lost requests are the caller's to retry, see
    /// [`ProtocolEngine::retry_join`].
    pub fn start(&mut self, now: u64) -> Result<(), MembershipError> {
        self.table = MembershipTable::new(self.local, now);
        self.suspicion.clear();
        self.in_group = false;
        self.failed = false;
        self.last_heartbeat_at = now;

        if self.local == self.config.introducer {
            tracing::info!("{}: starting up group", self.local);
            self.enter_group(now);
            return Ok(());
        }

        self.send_join_request()?;
        self.join_requested_at = now;
        tracing::info!("{}: trying to join via {}", self.local, self.config.introducer);
        Ok(())
    }

    /// Asks the introducer again when the previous request, or its reply,
    /// may have been lost. Keeps the table and the local heartbeat, so peers
    /// that already know this node keep accepting its updates.
    ///
    /// A no-op once the node is in the group, and for a failed node.
    pub fn retry_join(&mut self, now: u64) -> Result<(), MembershipError> {
        if self.failed || self.in_group {
            return Ok(());
        }

        self.send_join_request()?;
        self.join_requested_at = now;
        tracing::info!(
            "{}: still outside the group, asking {} again",
            self.local,
            self.config.introducer
        );
        Ok(())
    }

    /// Tick at which the last JOIN_REQUEST went out.
    pub fn join_requested_at(&self) -> u64 {
        self.join_requested_at
    }

    fn send_join_request(&self) -> Result<(), MembershipError> {
        let introducer = self.config.introducer;
        let request = Envelope::new(
            self.local,
            Message::JoinRequest {
                heartbeat: self.table.local_entry().heartbeat,
            },
        );
        self.transport
            .send(&self.local, &introducer, codec::encode(&request))
            .map_err(|source| MembershipError::IntroducerUnreachable { introducer, source })
    }

    /// Crash-stops the node: it ignores every message and tick from now on.
    pub fn fail(&mut self) {
        tracing::info!("{}: node failed", self.local);
        self.failed = true;
    }

    /// Leaves the group locally and drops all membership state.
    pub fn finish(&mut self) {
        self.table = MembershipTable::new(self.local, self.last_heartbeat_at);
        self.suspicion.clear();
        self.in_group = false;
        self.events.clear();
    }

    // ------------------------------------------------------------
    // Inbound messages
    // ------------------------------------------------------------

    /// Decodes and handles one inbound buffer. A malformed buffer is logged
    /// and dropped; the error is returned only so callers can count it.
    pub fn receive(&mut self, bytes: &[u8], now: u64) -> Result<(), MembershipError> {
        if self.failed {
            return Ok(());
        }

        match codec::decode(bytes) {
            Ok(envelope) => {
                self.handle(envelope, now);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(
                    "{}: dropping malformed message ({} bytes): {}",
                    self.local,
                    bytes.len(),
                    e
                );
                Err(e.into())
            }
        }
    }

    pub fn handle(&mut self, envelope: Envelope, now: u64) {
        if self.failed {
            return;
        }

        let sender = envelope.sender;
        tracing::debug!(
            "{}: {:?} from {}",
            self.local,
            envelope.message.message_type(),
            sender
        );

        match envelope.message {
            Message::JoinRequest { heartbeat } => self.handle_join_request(sender, heartbeat, now),
            Message::JoinReply { members } => {
                self.merge_members(&members, now);
                if !self.in_group {
                    tracing::info!("{}: joined group via {}", self.local, sender);
                    self.enter_group(now);
                }
            }
            Message::Ping { members } | Message::IsAlive { members } => {
                self.merge_members(&members, now);
            }
            Message::Suspect { suspects } => self.handle_suspect(sender, &suspects, now),
            Message::Check => self.handle_check(sender, now),
            Message::Remove { peer } => self.handle_remove(sender, &[peer], now),
            Message::RemoveBatch { peers } => self.handle_remove(sender, &peers, now),
        }
    }

    fn handle_join_request(&mut self, sender: PeerId, heartbeat: u64, now: u64) {
        match self.table.upsert(sender, heartbeat, now) {
            Ok(outcome) => self.record_upsert(sender, outcome, now),
            Err(e) => {
                tracing::warn!("{}: refusing join from {}: {}", self.local, sender, e);
                return;
            }
        }

        let reply = Message::JoinReply {
            members: self.table.snapshot(),
        };
        self.send_direct(sender, reply);
    }

    /// Merges a list of heartbeats. Any entry that advanced also settles
    /// pending liveness checks for that peer.
    fn merge_members(&mut self, members: &[MemberEntry], now: u64) {
        for entry in members {
            if entry.peer == self.local {
                continue;
            }

            match self.table.upsert(entry.peer, entry.heartbeat, now) {
                Ok(Upsert::Stale) => {}
                Ok(outcome) => {
                    self.record_upsert(entry.peer, outcome, now);
                    self.acknowledge_alive(entry.peer);
                }
                Err(e) => tracing::trace!("{}: {}", self.local, e),
            }
        }
    }

    fn record_upsert(&mut self, peer: PeerId, outcome: Upsert, now: u64) {
        match outcome {
            Upsert::Inserted => {
                tracing::info!("{}: node {} added", self.local, peer);
                self.events.push(MembershipEvent::Added { peer, at: now });
            }
            Upsert::Refreshed => {
                if self.suspicion.clear_local(&peer) {
                    tracing::info!("{}: {} is alive again", self.local, peer);
                }
            }
            Upsert::Stale => {}
        }
    }

    /// Relays proof of life for `peer` to everyone who asked about it.
    fn acknowledge_alive(&mut self, peer: PeerId) {
        let requesters = self.suspicion.confirm_alive(&peer);
        if requesters.is_empty() {
            return;
        }
        let Some(entry) = self.table.get(&peer).copied() else {
            return;
        };

        tracing::debug!(
            "{}: {} confirmed alive, notifying {} requester(s)",
            self.local,
            peer,
            requesters.len()
        );
        for requester in requesters {
            self.send_direct(
                requester,
                Message::IsAlive {
                    members: vec![entry],
                },
            );
        }
    }

    fn handle_suspect(&mut self, sender: PeerId, suspects: &[MemberEntry], now: u64) {
        for suspect in suspects {
            if suspect.peer == self.local {
                tracing::info!("{}: suspected by {}, refuting", self.local, sender);
                self.reply_alive(sender, now);
                continue;
            }

            match self
                .suspicion
                .on_suspect_received(&self.table, suspect.peer, sender)
            {
                SuspectOutcome::Probe => {
                    tracing::debug!(
                        "{}: probing {} on behalf of {}",
                        self.local,
                        suspect.peer,
                        sender
                    );
                    self.send_direct(suspect.peer, Message::Check);
                }
                SuspectOutcome::Pending => {}
                SuspectOutcome::Ignored => {
                    tracing::trace!("{}: ignoring suspicion of {}", self.local, suspect.peer);
                }
            }
        }
    }

    fn handle_check(&mut self, sender: PeerId, now: u64) {
        self.reply_alive(sender, now);
    }

    /// Answers a probe with a freshly advanced heartbeat, so the reply is
    /// newer than anything the prober already holds.
    fn reply_alive(&mut self, to: PeerId, now: u64) {
        self.table.bump_local(now);
        let entry = self.table.local_entry();
        self.send_direct(
            to,
            Message::IsAlive {
                members: vec![entry],
            },
        );
    }

    fn handle_remove(&mut self, sender: PeerId, peers: &[MemberEntry], now: u64) {
        let mut removed = Vec::new();

        for entry in peers {
            if entry.peer == self.local {
                tracing::warn!("{}: {} reported this node as dead", self.local, sender);
                continue;
            }

            match self.evict(entry.peer, now) {
                Some(evicted) => removed.push(evicted),
                // Remember it anyway so stale gossip cannot introduce it later.
                None => self.table.mark_dead(entry.peer),
            }
        }

        // Forward only what was news to us; this is what ends the epidemic.
        if !removed.is_empty() {
            self.disseminate_removal(removed, &[sender]);
        }
    }

    // ------------------------------------------------------------
    // Periodic work
    // ------------------------------------------------------------

    /// Runs one round of failure detection and, every `heartbeat_interval`
    /// ticks, heartbeat gossip. Does nothing until the node is in the group.
    pub fn tick(&mut self, now: u64) {
        if self.failed || !self.in_group {
            return;
        }

        // Read-only classification first, mutation second.
        let mut newly_suspect = Vec::new();
        let mut expired = Vec::new();
        for entry in self.table.remote_peers() {
            let silent_for = now.saturating_sub(entry.last_updated);
            let suspected = self.suspicion.is_locally_suspected(&entry.peer);

            if suspected && silent_for >= self.config.t_remove() {
                expired.push(entry.peer);
            } else if !suspected && silent_for >= self.config.t_suspect {
                newly_suspect.push(*entry);
            }
        }

        for entry in newly_suspect {
            if self.suspicion.mark_locally_suspect(entry) {
                tracing::warn!(
                    "{}: suspecting {} (silent since {})",
                    self.local,
                    entry.peer,
                    entry.last_updated
                );
                self.events.push(MembershipEvent::Suspected {
                    peer: entry.peer,
                    at: now,
                });
            }
        }

        let removed: Vec<MemberEntry> = expired
            .into_iter()
            .filter_map(|peer| self.evict(peer, now))
            .collect();
        if !removed.is_empty() {
            self.disseminate_removal(removed, &[]);
        }

        let suspects = self.suspicion.drain_pending();
        if !suspects.is_empty() {
            self.broadcast_message(Message::Suspect { suspects }, &[]);
        }

        if now.saturating_sub(self.last_heartbeat_at) >= self.config.heartbeat_interval {
            self.last_heartbeat_at = now;
            self.table.bump_local(now);
            self.broadcast_message(
                Message::Ping {
                    members: self.table.snapshot(),
                },
                &[],
            );
        }
    }

    // ------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------

    fn enter_group(&mut self, now: u64) {
        self.in_group = true;
        self.events.push(MembershipEvent::Joined { at: now });
    }

    fn evict(&mut self, peer: PeerId, now: u64) -> Option<MemberEntry> {
        let evicted = self.table.evict(&peer)?;
        self.suspicion.abandon(&peer);
        tracing::info!("{}: node {} removed", self.local, peer);
        self.events.push(MembershipEvent::Removed { peer, at: now });
        Some(evicted)
    }

    fn disseminate_removal(&mut self, mut removed: Vec<MemberEntry>, excluding: &[PeerId]) {
        let message = if removed.len() == 1 {
            Message::Remove {
                peer: removed.remove(0),
            }
        } else {
            Message::RemoveBatch { peers: removed }
        };
        self.broadcast_message(message, excluding);
    }

    fn broadcast_message(&mut self, message: Message, excluding: &[PeerId]) -> Vec<PeerId> {
        let envelope = Envelope::new(self.local, message);
        let recipients = self
            .gossip
            .fanout(&self.transport, &self.table, &envelope, excluding);
        tracing::debug!(
            "{}: gossiped {:?} to {} peer(s)",
            self.local,
            envelope.message.message_type(),
            recipients.len()
        );
        recipients
    }

    fn send_direct(&self, to: PeerId, message: Message) -> bool {
        let bytes: Bytes = codec::encode(&Envelope::new(self.local, message));
        match self.transport.send(&self.local, &to, bytes) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("{}: failed to send to {}: {}", self.local, to, e);
                false
            }
        }
    }

    // ------------------------------------------------------------
    // Observability
    // ------------------------------------------------------------

    pub fn local(&self) -> PeerId {
        self.local
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    pub fn is_in_group(&self) -> bool {
        self.in_group
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    pub fn table(&self) -> &MembershipTable {
        &self.table
    }

    pub fn suspicion(&self) -> &SuspicionTracker {
        &self.suspicion
    }

    pub fn snapshot(&self) -> Vec<MemberEntry> {
        self.table.snapshot()
    }

    pub fn status_of(&self, peer: &PeerId) -> MemberStatus {
        if self.table.contains(peer) {
            if self.suspicion.is_locally_suspected(peer) {
                MemberStatus::Suspected
            } else {
                MemberStatus::Alive
            }
        } else if self.table.is_dead(peer) {
            MemberStatus::Dead
        } else {
            MemberStatus::Unknown
        }
    }

    /// Membership changes since the previous call.
    pub fn drain_events(&mut self) -> Vec<MembershipEvent> {
        std::mem::take(&mut self.events)
    }
}
