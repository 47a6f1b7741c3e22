//! Suspicion Tracker
//!
//! Two pieces of state:
//! - suspects named by *other* nodes, each with the set of requesters waiting
//!   for this node to confirm the suspect is still alive;
//! - peers *this* node suspects, plus the not-yet-gossiped subset of them.

use std::collections::{BTreeMap, BTreeSet};

use super::table::MembershipTable;
use super::types::{MemberEntry, PeerId};

/// What the engine should do after a SUSPECT naming a peer arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspectOutcome {
    /// First request for this suspect: probe it directly.
    Probe,
    /// A probe is already outstanding; the requester was added to it.
    Pending,
    /// The suspect is not in the table; nothing to verify.
    Ignored,
}

#[derive(Default)]
pub struct SuspicionTracker {
    awaiting: BTreeMap<PeerId, BTreeSet<PeerId>>,
    suspected: BTreeSet<PeerId>,
    pending: Vec<MemberEntry>,
}

impl SuspicionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `requester` as waiting on a liveness confirmation for
    /// `suspect`, provided the suspect is still a live table entry.
    pub fn on_suspect_received(
        &mut self,
        table: &MembershipTable,
        suspect: PeerId,
        requester: PeerId,
    ) -> SuspectOutcome {
        if !table.contains(&suspect) || suspect == requester {
            return SuspectOutcome::Ignored;
        }

        let requesters = self.awaiting.entry(suspect).or_default();
        let first = requesters.is_empty();
        requesters.insert(requester);

        if first {
            SuspectOutcome::Probe
        } else {
            SuspectOutcome::Pending
        }
    }

    /// The suspect proved alive: returns every distinct requester exactly
    /// once and forgets the suspect.
    pub fn confirm_alive(&mut self, suspect: &PeerId) -> Vec<PeerId> {
        self.awaiting
            .remove(suspect)
            .map(|requesters| requesters.into_iter().collect())
            .unwrap_or_default()
    }

    /// The suspect was evicted: nobody will be notified.
    pub fn abandon(&mut self, suspect: &PeerId) {
        self.awaiting.remove(suspect);
        self.suspected.remove(suspect);
        self.pending.retain(|e| e.peer != *suspect);
    }

    /// Queues `entry` for the next SUSPECT gossip. Returns `false` if the
    /// peer was already suspected locally.
    pub fn mark_locally_suspect(&mut self, entry: MemberEntry) -> bool {
        if !self.suspected.insert(entry.peer) {
            return false;
        }
        self.pending.push(entry);
        true
    }

    /// Drops a local suspicion after the peer's heartbeat advanced again.
    pub fn clear_local(&mut self, peer: &PeerId) -> bool {
        self.pending.retain(|e| e.peer != *peer);
        self.suspected.remove(peer)
    }

    pub fn is_locally_suspected(&self, peer: &PeerId) -> bool {
        self.suspected.contains(peer)
    }

    pub fn drain_pending(&mut self) -> Vec<MemberEntry> {
        std::mem::take(&mut self.pending)
    }

    pub fn is_awaiting(&self, suspect: &PeerId) -> bool {
        self.awaiting.contains_key(suspect)
    }

    pub fn requesters(&self, suspect: &PeerId) -> Vec<PeerId> {
        self.awaiting
            .get(suspect)
            .map(|r| r.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn clear(&mut self) {
        self.awaiting.clear();
        self.suspected.clear();
        self.pending.clear();
    }
}
