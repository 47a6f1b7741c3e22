//! Emulated Network
//!
//! Every registered node owns a mailbox. `send` appends to the receiver's
//! mailbox unless the message is randomly dropped; `receive` drains it.
//! Mailboxes live in a `DashMap` so node tasks can share one network without
//! a global lock.

use bytes::Bytes;
use dashmap::DashMap;
use rand::Rng;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use super::{NetworkError, Transport};
use crate::membership::types::PeerId;

struct Mailbox {
    queue: VecDeque<Bytes>,
    up: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetworkStats {
    pub sent: u64,
    pub delivered: u64,
    pub dropped: u64,
}

pub struct EmulNet {
    mailboxes: DashMap<PeerId, Mailbox>,
    drop_rate: f64,
    sent: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl EmulNet {
    /// `drop_rate` is clamped to `0.0..=1.0`.
    pub fn new(drop_rate: f64) -> Self {
        Self {
            mailboxes: DashMap::new(),
            drop_rate: drop_rate.clamp(0.0, 1.0),
            sent: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn lossless() -> Self {
        Self::new(0.0)
    }

    pub fn register(&self, peer: PeerId) {
        self.mailboxes.insert(
            peer,
            Mailbox {
                queue: VecDeque::new(),
                up: true,
            },
        );
        tracing::debug!("Registered {} on emulated network", peer);
    }

    /// Takes a node off the network: queued and future messages are lost.
    /// Senders are not told.
    pub fn shutdown(&self, peer: &PeerId) {
        if let Some(mut mailbox) = self.mailboxes.get_mut(peer) {
            mailbox.up = false;
            mailbox.queue.clear();
        }
    }

    /// Drains everything waiting for `peer`.
    pub fn receive(&self, peer: &PeerId) -> Vec<Bytes> {
        match self.mailboxes.get_mut(peer) {
            Some(mut mailbox) => {
                let messages: Vec<Bytes> = mailbox.queue.drain(..).collect();
                self.delivered
                    .fetch_add(messages.len() as u64, Ordering::Relaxed);
                messages
            }
            None => Vec::new(),
        }
    }

    pub fn pending(&self, peer: &PeerId) -> usize {
        self.mailboxes
            .get(peer)
            .map(|mailbox| mailbox.queue.len())
            .unwrap_or(0)
    }

    pub fn stats(&self) -> NetworkStats {
        NetworkStats {
            sent: self.sent.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

impl Transport for EmulNet {
    fn send(&self, from: &PeerId, to: &PeerId, bytes: Bytes) -> Result<(), NetworkError> {
        let mut mailbox = self
            .mailboxes
            .get_mut(to)
            .ok_or(NetworkError::UnknownPeer(*to))?;

        self.sent.fetch_add(1, Ordering::Relaxed);

        // A crashed node looks like a black hole, same as over UDP.
        if !mailbox.up || (self.drop_rate > 0.0 && rand::thread_rng().gen_bool(self.drop_rate)) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::trace!("Dropped {} bytes from {} to {}", bytes.len(), from, to);
            return Ok(());
        }

        mailbox.queue.push_back(bytes);
        Ok(())
    }
}
