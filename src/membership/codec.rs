//! Wire Codec
//!
//! Fixed-layout binary framing for every protocol message:
//!
//! ```text
//! [ type: u8 ][ sender id: u32 ][ sender port: u16 ][ payload ... ]
//! ```
//!
//! Payloads are either a single heartbeat (`JoinRequest`), nothing (`Check`),
//! one member record (`Remove`) or a `u32` count followed by that many member
//! records. A member record is `id: u32, port: u16, heartbeat: u64,
//! timestamp: u64`. All integers are little-endian.
//!
//! Lengths are checked before every read, so a short or garbled buffer yields
//! a [`CodecError`] instead of an out-of-bounds access.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::error::CodecError;
use super::types::{MemberEntry, PeerId};

/// Size of the sender address on the wire.
pub const PEER_ID_LEN: usize = 4 + 2;
/// Size of the fixed header shared by all messages.
pub const HEADER_LEN: usize = 1 + PEER_ID_LEN;
/// Size of one encoded member record.
pub const MEMBER_ENTRY_LEN: usize = PEER_ID_LEN + 8 + 8;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    JoinRequest = 0,
    JoinReply = 1,
    Ping = 2,
    Suspect = 3,
    Check = 4,
    IsAlive = 5,
    Remove = 6,
    RemoveBatch = 7,
}

impl TryFrom<u8> for MessageType {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => MessageType::JoinRequest,
            1 => MessageType::JoinReply,
            2 => MessageType::Ping,
            3 => MessageType::Suspect,
            4 => MessageType::Check,
            5 => MessageType::IsAlive,
            6 => MessageType::Remove,
            7 => MessageType::RemoveBatch,
            other => return Err(CodecError::UnknownMessageType(other)),
        })
    }
}

/// Protocol messages, decoded once at the boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// A new node asks the introducer to admit it.
    JoinRequest { heartbeat: u64 },
    /// The introducer's full table, sent back to a joiner.
    JoinReply { members: Vec<MemberEntry> },
    /// Periodic heartbeat gossip carrying the sender's table.
    Ping { members: Vec<MemberEntry> },
    /// Peers the sender suspects and wants verified.
    Suspect { suspects: Vec<MemberEntry> },
    /// Direct liveness probe.
    Check,
    /// Proof of life: the replier's own entry, or a relayed suspect's entry.
    IsAlive { members: Vec<MemberEntry> },
    /// A single evicted peer.
    Remove { peer: MemberEntry },
    /// Several peers evicted on the same tick.
    RemoveBatch { peers: Vec<MemberEntry> },
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::JoinRequest { .. } => MessageType::JoinRequest,
            Message::JoinReply { .. } => MessageType::JoinReply,
            Message::Ping { .. } => MessageType::Ping,
            Message::Suspect { .. } => MessageType::Suspect,
            Message::Check => MessageType::Check,
            Message::IsAlive { .. } => MessageType::IsAlive,
            Message::Remove { .. } => MessageType::Remove,
            Message::RemoveBatch { .. } => MessageType::RemoveBatch,
        }
    }
}

/// A message together with the address of the node that sent it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub sender: PeerId,
    pub message: Message,
}

impl Envelope {
    pub fn new(sender: PeerId, message: Message) -> Self {
        Self { sender, message }
    }
}

pub fn encode(envelope: &Envelope) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload_len(&envelope.message));

    buf.put_u8(envelope.message.message_type() as u8);
    put_peer(&mut buf, &envelope.sender);

    match &envelope.message {
        Message::JoinRequest { heartbeat } => buf.put_u64_le(*heartbeat),
        Message::JoinReply { members }
        | Message::Ping { members }
        | Message::IsAlive { members } => put_entries(&mut buf, members),
        Message::Suspect { suspects } => put_entries(&mut buf, suspects),
        Message::RemoveBatch { peers } => put_entries(&mut buf, peers),
        Message::Remove { peer } => put_entry(&mut buf, peer),
        Message::Check => {}
    }

    buf.freeze()
}

pub fn decode(bytes: &[u8]) -> Result<Envelope, CodecError> {
    let mut buf = bytes;

    ensure(buf, HEADER_LEN)?;
    let message_type = MessageType::try_from(buf.get_u8())?;
    let sender = get_peer(&mut buf);

    let message = match message_type {
        MessageType::JoinRequest => {
            ensure(buf, 8)?;
            Message::JoinRequest {
                heartbeat: buf.get_u64_le(),
            }
        }
        MessageType::JoinReply => Message::JoinReply {
            members: get_entries(&mut buf)?,
        },
        MessageType::Ping => Message::Ping {
            members: get_entries(&mut buf)?,
        },
        MessageType::Suspect => Message::Suspect {
            suspects: get_entries(&mut buf)?,
        },
        MessageType::Check => Message::Check,
        MessageType::IsAlive => Message::IsAlive {
            members: get_entries(&mut buf)?,
        },
        MessageType::Remove => {
            ensure(buf, MEMBER_ENTRY_LEN)?;
            Message::Remove {
                peer: get_entry(&mut buf),
            }
        }
        MessageType::RemoveBatch => Message::RemoveBatch {
            peers: get_entries(&mut buf)?,
        },
    };

    if buf.has_remaining() {
        return Err(CodecError::TrailingBytes(buf.remaining()));
    }

    Ok(Envelope { sender, message })
}

fn payload_len(message: &Message) -> usize {
    match message {
        Message::JoinRequest { .. } => 8,
        Message::Check => 0,
        Message::Remove { .. } => MEMBER_ENTRY_LEN,
        Message::JoinReply { members }
        | Message::Ping { members }
        | Message::IsAlive { members }
        | Message::Suspect { suspects: members }
        | Message::RemoveBatch { peers: members } => 4 + members.len() * MEMBER_ENTRY_LEN,
    }
}

fn ensure(buf: &[u8], needed: usize) -> Result<(), CodecError> {
    if buf.len() < needed {
        return Err(CodecError::Truncated {
            needed,
            available: buf.len(),
        });
    }
    Ok(())
}

fn put_peer(buf: &mut BytesMut, peer: &PeerId) {
    buf.put_u32_le(peer.id);
    buf.put_u16_le(peer.port);
}

fn get_peer(buf: &mut &[u8]) -> PeerId {
    let id = buf.get_u32_le();
    let port = buf.get_u16_le();
    PeerId { id, port }
}

fn put_entry(buf: &mut BytesMut, entry: &MemberEntry) {
    put_peer(buf, &entry.peer);
    buf.put_u64_le(entry.heartbeat);
    buf.put_u64_le(entry.last_updated);
}

fn get_entry(buf: &mut &[u8]) -> MemberEntry {
    let peer = get_peer(buf);
    let heartbeat = buf.get_u64_le();
    let last_updated = buf.get_u64_le();
    MemberEntry {
        peer,
        heartbeat,
        last_updated,
    }
}

/// The count field caps a list at `u32::MAX` entries. Anything past that is
/// not encoded, so the frame stays self-consistent.
fn put_entries(buf: &mut BytesMut, entries: &[MemberEntry]) {
    let count = u32::try_from(entries.len());
    debug_assert!(count.is_ok(), "{} entries overflow the count field", entries.len());
    let count = count.unwrap_or(u32::MAX);
    buf.put_u32_le(count);
    for entry in entries.iter().take(count as usize) {
        put_entry(buf, entry);
    }
}

fn get_entries(buf: &mut &[u8]) -> Result<Vec<MemberEntry>, CodecError> {
    ensure(*buf, 4)?;
    let count = buf.get_u32_le() as usize;

    // Validate the whole list up front; `count` comes off the wire.
    let needed = count
        .checked_mul(MEMBER_ENTRY_LEN)
        .ok_or(CodecError::Truncated {
            needed: usize::MAX,
            available: buf.len(),
        })?;
    ensure(*buf, needed)?;

    Ok((0..count).map(|_| get_entry(buf)).collect())
}
