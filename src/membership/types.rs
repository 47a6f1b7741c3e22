use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// Network identity of a group member.
///
/// The `id` is the four address bytes (little-endian, as they travel on the
/// wire) and `port` the two port bytes. Together they form the fixed six-byte
/// address carried in every message header.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId {
    pub id: u32,
    pub port: u16,
}

impl PeerId {
    pub const fn new(id: u32, port: u16) -> Self {
        Self { id, port }
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", Ipv4Addr::from(self.id.to_le_bytes()), self.port)
    }
}

impl FromStr for PeerId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, port) = s
            .rsplit_once(':')
            .ok_or_else(|| anyhow::anyhow!("peer id '{}' is missing a port", s))?;
        let addr: Ipv4Addr = addr.parse()?;
        Ok(Self {
            id: u32::from_le_bytes(addr.octets()),
            port: port.parse()?,
        })
    }
}

/// One row of the membership table.
///
/// `heartbeat` only ever moves forward; `last_updated` is the local logical
/// time at which the heartbeat last advanced.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemberEntry {
    pub peer: PeerId,
    pub heartbeat: u64,
    pub last_updated: u64,
}

impl MemberEntry {
    pub fn new(peer: PeerId, heartbeat: u64, last_updated: u64) -> Self {
        Self {
            peer,
            heartbeat,
            last_updated,
        }
    }
}

/// Lifecycle of a peer as observed by the local node.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MemberStatus {
    /// Never heard of.
    Unknown,
    /// In the table and heartbeating within the suspicion window.
    Alive,
    /// In the table but silent for at least `t_suspect` ticks.
    Suspected,
    /// Evicted; present in the dead set.
    Dead,
}

/// Result of merging a heartbeat into the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    /// First contact with this peer.
    Inserted,
    /// Heartbeat advanced.
    Refreshed,
    /// Heartbeat was not newer than the stored one.
    Stale,
}

impl Upsert {
    /// Whether the merge carried new information worth re-gossiping.
    pub fn changed(self) -> bool {
        !matches!(self, Upsert::Stale)
    }
}

/// Membership changes surfaced to whoever drives the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipEvent {
    Added { peer: PeerId, at: u64 },
    Suspected { peer: PeerId, at: u64 },
    Removed { peer: PeerId, at: u64 },
    /// The local node received its join reply and is now a full member.
    Joined { at: u64 },
}
