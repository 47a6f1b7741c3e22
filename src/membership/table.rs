//! Membership Table
//!
//! The local, authoritative view of `{peer -> heartbeat, last updated}`.
//! The table always holds the local node's own entry. Entries only move
//! forward: a heartbeat is accepted when it is strictly greater than the
//! stored one, so duplicates and reordered gossip never regress the view.
//!
//! Evicted peers go into the dead set and can never be re-admitted during
//! this node's lifetime.

use std::collections::{BTreeMap, BTreeSet};

use super::error::MembershipError;
use super::types::{MemberEntry, PeerId, Upsert};

pub struct MembershipTable {
    local: PeerId,
    entries: BTreeMap<PeerId, MemberEntry>,
    dead: BTreeSet<PeerId>,
}

impl MembershipTable {
    /// Creates a table holding only the local entry at heartbeat 0.
    pub fn new(local: PeerId, now: u64) -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(local, MemberEntry::new(local, 0, now));
        Self {
            local,
            entries,
            dead: BTreeSet::new(),
        }
    }

    pub fn local(&self) -> PeerId {
        self.local
    }

    /// Merges a heartbeat observation for `peer`.
    ///
    /// * Unknown peer: inserted, unless it was evicted before.
    /// * Known peer: refreshed when `heartbeat` is newer, otherwise a no-op.
    pub fn upsert(
        &mut self,
        peer: PeerId,
        heartbeat: u64,
        now: u64,
    ) -> Result<Upsert, MembershipError> {
        if self.dead.contains(&peer) {
            return Err(MembershipError::ReEvictedPeer(peer));
        }

        match self.entries.get_mut(&peer) {
            Some(existing) => {
                if heartbeat > existing.heartbeat {
                    tracing::trace!(
                        "{}: heartbeat {} -> {}",
                        peer,
                        existing.heartbeat,
                        heartbeat
                    );
                    existing.heartbeat = heartbeat;
                    existing.last_updated = now;
                    Ok(Upsert::Refreshed)
                } else {
                    Ok(Upsert::Stale)
                }
            }
            None => {
                self.entries
                    .insert(peer, MemberEntry::new(peer, heartbeat, now));
                Ok(Upsert::Inserted)
            }
        }
    }

    /// Advances the local heartbeat by one and returns the new value.
    pub fn bump_local(&mut self, now: u64) -> u64 {
        let entry = self
            .entries
            .entry(self.local)
            .or_insert_with(|| MemberEntry::new(self.local, 0, now));
        entry.heartbeat += 1;
        entry.last_updated = now;
        entry.heartbeat
    }

    /// Deletes the entry for `peer`. The caller decides whether the peer also
    /// goes into the dead set.
    pub fn remove(&mut self, peer: &PeerId) -> Option<MemberEntry> {
        if *peer == self.local {
            return None;
        }
        self.entries.remove(peer)
    }

    pub fn mark_dead(&mut self, peer: PeerId) {
        self.dead.insert(peer);
    }

    /// Removes `peer` and records it as dead in one step.
    pub fn evict(&mut self, peer: &PeerId) -> Option<MemberEntry> {
        let removed = self.remove(peer)?;
        self.mark_dead(*peer);
        Some(removed)
    }

    pub fn is_dead(&self, peer: &PeerId) -> bool {
        self.dead.contains(peer)
    }

    pub fn get(&self, peer: &PeerId) -> Option<&MemberEntry> {
        self.entries.get(peer)
    }

    pub fn contains(&self, peer: &PeerId) -> bool {
        self.entries.contains_key(peer)
    }

    pub fn local_entry(&self) -> MemberEntry {
        self.entries
            .get(&self.local)
            .copied()
            .unwrap_or_else(|| MemberEntry::new(self.local, 0, 0))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Point-in-time copy of every entry, local node included.
    pub fn snapshot(&self) -> Vec<MemberEntry> {
        self.entries.values().copied().collect()
    }

    /// Every known peer other than the local node.
    pub fn remote_peers(&self) -> impl Iterator<Item = &MemberEntry> {
        self.entries.values().filter(move |e| e.peer != self.local)
    }

    pub fn dead_peers(&self) -> impl Iterator<Item = &PeerId> {
        self.dead.iter()
    }
}
