//! Membership Module Tests
//!
//! Drives a single `ProtocolEngine` by hand against the emulated network and
//! inspects what lands in the other nodes' mailboxes.
//!
//! ## Test Scopes
//! - **Join**: Introducer bootstrap, join request/reply, unreachable introducer.
//! - **Heartbeats**: Monotonic merge through the engine, heartbeat interval.
//! - **Failure Detection**: Suspicion timing, eviction timing, refutation.
//! - **Suspicion Relay**: Probing suspects and acknowledging requesters.
//! - **Removal**: Epidemic re-dissemination and the dead set.

#[cfg(test)]
mod tests {
    use crate::config::ProtocolConfig;
    use crate::membership::codec::{self, Envelope, Message};
    use crate::membership::engine::ProtocolEngine;
    use crate::membership::error::MembershipError;
    use crate::membership::gossip::GossipDisseminator;
    use crate::membership::types::{MemberEntry, MemberStatus, MembershipEvent, PeerId};
    use crate::network::emulnet::EmulNet;
    use std::sync::Arc;

    type Engine = ProtocolEngine<Arc<EmulNet>>;

    fn peer(id: u32) -> PeerId {
        PeerId::new(id, 0)
    }

    fn entry(id: u32, heartbeat: u64) -> MemberEntry {
        MemberEntry::new(peer(id), heartbeat, 0)
    }

    // Fan-out larger than any table below, so every gossip reaches every peer.
    fn config() -> ProtocolConfig {
        ProtocolConfig {
            fanout: 10,
            t_suspect: 5,
            t_fail: 5,
            heartbeat_interval: 1,
            introducer: peer(1),
        }
    }

    fn network(ids: &[u32]) -> Arc<EmulNet> {
        let net = Arc::new(EmulNet::lossless());
        for id in ids {
            net.register(peer(*id));
        }
        net
    }

    fn engine(id: u32, net: &Arc<EmulNet>, config: ProtocolConfig) -> Engine {
        let gossip = GossipDisseminator::with_seed(config.fanout, id as u64);
        ProtocolEngine::with_gossip(peer(id), config, net.clone(), gossip)
    }

    fn inbox(net: &EmulNet, id: u32) -> Vec<Envelope> {
        net.receive(&peer(id))
            .iter()
            .map(|bytes| codec::decode(bytes).expect("engine sent undecodable bytes"))
            .collect()
    }

    fn messages(net: &EmulNet, id: u32) -> Vec<Message> {
        inbox(net, id).into_iter().map(|e| e.message).collect()
    }

    /// Introducer 1 that already knows `others` at heartbeat 1, learned at tick 0.
    fn seeded_introducer(net: &Arc<EmulNet>, others: &[u32], config: ProtocolConfig) -> Engine {
        let mut node = engine(1, net, config);
        node.start(0).unwrap();
        let members = others.iter().map(|id| entry(*id, 1)).collect();
        node.handle(Envelope::new(peer(others[0]), Message::Ping { members }), 0);
        for id in others {
            net.receive(&peer(*id));
        }
        node.drain_events();
        node
    }

    // ============================================================
    // JOIN TESTS
    // ============================================================

    #[test]
    fn test_introducer_founds_group() {
        let net = network(&[1]);
        let mut node = engine(1, &net, config());

        node.start(0).unwrap();

        assert!(node.is_in_group());
        assert_eq!(node.snapshot(), vec![MemberEntry::new(peer(1), 0, 0)]);
        assert_eq!(node.drain_events(), vec![MembershipEvent::Joined { at: 0 }]);
    }

    #[test]
    fn test_join_handshake() {
        let net = network(&[1, 2]);
        let mut a1 = engine(1, &net, config());
        let mut a2 = engine(2, &net, config());
        a1.start(0).unwrap();
        a2.start(0).unwrap();
        assert!(!a2.is_in_group());

        let request = inbox(&net, 1);
        assert_eq!(
            request,
            vec![Envelope::new(peer(2), Message::JoinRequest { heartbeat: 0 })]
        );
        a1.handle(request[0].clone(), 1);

        assert!(a1.table().contains(&peer(2)));
        assert!(a1
            .drain_events()
            .contains(&MembershipEvent::Added { peer: peer(2), at: 1 }));

        let reply = inbox(&net, 2);
        assert_eq!(reply.len(), 1);
        let Message::JoinReply { members } = &reply[0].message else {
            panic!("expected JoinReply, got {:?}", reply[0].message);
        };
        let mut ids: Vec<PeerId> = members.iter().map(|e| e.peer).collect();
        ids.sort();
        assert_eq!(ids, vec![peer(1), peer(2)]);

        a2.receive(&codec::encode(&reply[0]), 2).unwrap();

        assert!(a2.is_in_group());
        assert!(a2.table().contains(&peer(1)));
        assert!(a2.table().contains(&peer(2)));
        let events = a2.drain_events();
        assert!(events.contains(&MembershipEvent::Added { peer: peer(1), at: 2 }));
        assert!(events.contains(&MembershipEvent::Joined { at: 2 }));
    }

    #[test]
    fn test_unreachable_introducer_is_fatal() {
        let net = network(&[2]);
        let mut node = engine(2, &net, config());

        let err = node.start(0).unwrap_err();

        assert!(matches!(
            err,
            MembershipError::IntroducerUnreachable { introducer, .. } if introducer == peer(1)
        ));
    }

    #[test]
    fn test_retry_join_after_lost_request() {
        let net = network(&[1, 2]);
        let mut a1 = engine(1, &net, config());
        let mut a2 = engine(2, &net, config());
        a1.start(0).unwrap();
        a2.start(0).unwrap();
        assert_eq!(a2.join_requested_at(), 0);

        // The first request never arrives.
        net.receive(&peer(1));

        a2.retry_join(5).unwrap();
        assert_eq!(a2.join_requested_at(), 5);

        let request = inbox(&net, 1);
        assert_eq!(
            request,
            vec![Envelope::new(peer(2), Message::JoinRequest { heartbeat: 0 })]
        );
        a1.handle(request[0].clone(), 5);
        for envelope in inbox(&net, 2) {
            a2.handle(envelope, 6);
        }

        assert!(a2.is_in_group());
        assert!(a2.table().contains(&peer(1)));
    }

    #[test]
    fn test_retry_join_after_lost_reply_keeps_heartbeat() {
        let net = network(&[1, 2]);
        let mut a1 = engine(1, &net, config());
        let mut a2 = engine(2, &net, config());
        a1.start(0).unwrap();
        a2.start(0).unwrap();
        for envelope in inbox(&net, 1) {
            a1.handle(envelope, 1);
        }

        // The reply is lost; the introducer already counts 2 as a member and
        // 2 refutes a suspicion, advancing its heartbeat.
        net.receive(&peer(2));
        a2.handle(
            Envelope::new(peer(1), Message::Suspect { suspects: vec![entry(2, 0)] }),
            3,
        );
        for envelope in inbox(&net, 1) {
            a1.handle(envelope, 3);
        }
        assert_eq!(a1.table().get(&peer(2)).unwrap().heartbeat, 1);
        assert!(!a2.is_in_group());

        a2.retry_join(6).unwrap();

        let request = inbox(&net, 1);
        assert_eq!(
            request,
            vec![Envelope::new(peer(2), Message::JoinRequest { heartbeat: 1 })]
        );
        a1.handle(request[0].clone(), 6);
        for envelope in inbox(&net, 2) {
            a2.handle(envelope, 7);
        }
        assert!(a2.is_in_group());

        // Once in, the next heartbeat is news to the introducer.
        a2.tick(8);
        for envelope in inbox(&net, 1) {
            a1.handle(envelope, 8);
        }
        assert_eq!(a1.table().get(&peer(2)).unwrap().heartbeat, 2);

        // Further retries are no-ops.
        a2.retry_join(20).unwrap();
        assert_eq!(net.pending(&peer(1)), 0);
        assert_eq!(a2.join_requested_at(), 6);
    }

    #[test]
    fn test_not_in_group_does_not_tick() {
        let net = network(&[1, 2]);
        let mut node = engine(2, &net, config());
        node.start(0).unwrap();
        net.receive(&peer(1));

        for now in 1..20 {
            node.tick(now);
        }

        assert_eq!(net.pending(&peer(1)), 0);
        assert_eq!(node.table().local_entry().heartbeat, 0);
    }

    // ============================================================
    // INBOUND VALIDATION TESTS
    // ============================================================

    #[test]
    fn test_malformed_message_is_dropped() {
        let net = network(&[1, 2]);
        let mut node = seeded_introducer(&net, &[2], config());
        let before = node.snapshot();

        assert!(matches!(
            node.receive(&[2, 1], 1),
            Err(MembershipError::Malformed(_))
        ));
        assert!(matches!(
            node.receive(&[0x42, 2, 0, 0, 0, 0, 0], 1),
            Err(MembershipError::Malformed(_))
        ));

        assert_eq!(node.snapshot(), before);
        assert_eq!(net.pending(&peer(2)), 0);
    }

    #[test]
    fn test_stale_and_duplicate_heartbeats_are_ignored() {
        let net = network(&[1, 2]);
        let mut node = seeded_introducer(&net, &[2], config());

        let ping = |hb| Envelope::new(peer(2), Message::Ping { members: vec![entry(2, hb)] });
        node.handle(ping(7), 1);
        node.handle(ping(7), 2);
        node.handle(ping(3), 3);

        assert_eq!(
            node.table().get(&peer(2)),
            Some(&MemberEntry::new(peer(2), 7, 1))
        );
    }

    #[test]
    fn test_gossip_about_self_is_ignored() {
        let net = network(&[1, 2]);
        let mut node = seeded_introducer(&net, &[2], config());

        node.handle(
            Envelope::new(peer(2), Message::Ping { members: vec![entry(1, 99)] }),
            1,
        );

        assert_eq!(node.table().local_entry().heartbeat, 0);
    }

    // ============================================================
    // HEARTBEAT TESTS
    // ============================================================

    #[test]
    fn test_heartbeat_every_interval() {
        let net = network(&[1, 2]);
        let mut node = seeded_introducer(
            &net,
            &[2],
            ProtocolConfig {
                heartbeat_interval: 3,
                ..config()
            },
        );

        let mut pings = Vec::new();
        for now in 1..=4 {
            // Keep peer 2 fresh so only heartbeats are sent.
            node.handle(
                Envelope::new(peer(2), Message::Ping { members: vec![entry(2, now + 1)] }),
                now,
            );
            node.tick(now);
            for message in messages(&net, 2) {
                if let Message::Ping { members } = message {
                    pings.push((now, members));
                }
            }
        }

        assert_eq!(pings.len(), 1);
        let (at, members) = &pings[0];
        assert_eq!(*at, 3);
        assert!(members.contains(&MemberEntry::new(peer(1), 1, 3)));
        assert!(members.iter().any(|e| e.peer == peer(2)));
    }

    // ============================================================
    // FAILURE DETECTION TESTS
    // ============================================================

    #[test]
    fn test_silent_peer_is_suspected_then_evicted() {
        let net = network(&[1, 2, 3]);
        let mut node = seeded_introducer(&net, &[2, 3], config());

        let mut suspected_at = None;
        let mut removed_at = None;
        for now in 1..=12 {
            node.handle(
                Envelope::new(peer(2), Message::Ping { members: vec![entry(2, now + 1)] }),
                now,
            );
            node.tick(now);

            if now == 9 {
                assert_eq!(node.status_of(&peer(3)), MemberStatus::Suspected);
            }

            for message in messages(&net, 2) {
                match message {
                    Message::Suspect { suspects } => {
                        assert_eq!(suspects.len(), 1);
                        assert_eq!(suspects[0].peer, peer(3));
                        assert!(suspected_at.is_none(), "suspicion gossiped twice");
                        suspected_at = Some(now);
                    }
                    Message::Remove { peer: removed } => {
                        assert_eq!(removed.peer, peer(3));
                        removed_at = Some(now);
                    }
                    Message::Ping { .. } => {}
                    other => panic!("unexpected {:?}", other),
                }
            }
        }

        assert_eq!(suspected_at, Some(5));
        assert_eq!(removed_at, Some(10));
        assert_eq!(node.status_of(&peer(3)), MemberStatus::Dead);
        assert_eq!(node.status_of(&peer(2)), MemberStatus::Alive);

        let events = node.drain_events();
        assert!(events.contains(&MembershipEvent::Suspected { peer: peer(3), at: 5 }));
        assert!(events.contains(&MembershipEvent::Removed { peer: peer(3), at: 10 }));
    }

    #[test]
    fn test_newer_heartbeat_cancels_suspicion() {
        let net = network(&[1, 2]);
        let mut node = seeded_introducer(&net, &[2], config());

        for now in 1..=5 {
            node.tick(now);
        }
        assert_eq!(node.status_of(&peer(2)), MemberStatus::Suspected);

        node.handle(
            Envelope::new(peer(2), Message::Ping { members: vec![entry(2, 2)] }),
            6,
        );
        assert_eq!(node.status_of(&peer(2)), MemberStatus::Alive);

        for now in 7..=10 {
            node.tick(now);
        }
        assert!(node.table().contains(&peer(2)));
    }

    #[test]
    fn test_eviction_always_follows_suspicion() {
        let net = network(&[1, 2]);
        let mut node = seeded_introducer(&net, &[2], config());

        // Ticks were skipped: the peer is far beyond both windows.
        node.tick(100);
        assert_eq!(node.status_of(&peer(2)), MemberStatus::Suspected);

        node.tick(101);
        assert_eq!(node.status_of(&peer(2)), MemberStatus::Dead);
    }

    #[test]
    fn test_simultaneous_evictions_are_batched() {
        let net = network(&[1, 2, 3, 4]);
        let mut node = seeded_introducer(&net, &[2, 3, 4], config());

        let mut removals = Vec::new();
        for now in 1..=10 {
            node.handle(
                Envelope::new(peer(4), Message::Ping { members: vec![entry(4, now + 1)] }),
                now,
            );
            node.tick(now);
            for message in messages(&net, 4) {
                match message {
                    Message::RemoveBatch { peers } => removals.push(peers),
                    Message::Remove { .. } => panic!("expected batched removal"),
                    _ => {}
                }
            }
        }

        assert_eq!(removals.len(), 1);
        let removed: Vec<PeerId> = removals[0].iter().map(|e| e.peer).collect();
        assert_eq!(removed, vec![peer(2), peer(3)]);
    }

    #[test]
    fn test_failed_node_is_inert() {
        let net = network(&[1, 2]);
        let mut node = seeded_introducer(&net, &[2], config());
        node.fail();

        node.handle(
            Envelope::new(peer(2), Message::Ping { members: vec![entry(2, 9)] }),
            1,
        );
        node.handle(Envelope::new(peer(2), Message::Check), 1);
        for now in 1..=20 {
            node.tick(now);
        }

        assert!(node.is_failed());
        assert_eq!(node.table().get(&peer(2)).unwrap().heartbeat, 1);
        assert_eq!(net.pending(&peer(2)), 0);
    }

    // ============================================================
    // SUSPICION RELAY TESTS
    // ============================================================

    #[test]
    fn test_probe_reply_carries_fresh_heartbeat() {
        let net = network(&[1, 2]);
        let mut node = engine(1, &net, config());
        node.start(0).unwrap();

        node.handle(Envelope::new(peer(2), Message::Check), 3);

        assert_eq!(
            messages(&net, 2),
            vec![Message::IsAlive {
                members: vec![MemberEntry::new(peer(1), 1, 3)]
            }]
        );
    }

    #[test]
    fn test_suspect_is_probed_and_requesters_notified_once() {
        let net = network(&[1, 2, 3, 4]);
        let mut b = engine(2, &net, config());
        b.start(0).unwrap();
        b.handle(
            Envelope::new(
                peer(1),
                Message::Ping {
                    members: vec![entry(1, 1), entry(3, 1), entry(4, 1)],
                },
            ),
            0,
        );
        for id in [1, 3, 4] {
            net.receive(&peer(id));
        }

        let suspicion = |from| {
            Envelope::new(
                peer(from),
                Message::Suspect {
                    suspects: vec![entry(3, 1)],
                },
            )
        };
        b.handle(suspicion(1), 1);
        b.handle(suspicion(4), 1);
        b.handle(suspicion(1), 1);

        assert_eq!(messages(&net, 3), vec![Message::Check]);
        assert_eq!(b.suspicion().requesters(&peer(3)), vec![peer(1), peer(4)]);

        b.handle(
            Envelope::new(
                peer(3),
                Message::IsAlive {
                    members: vec![entry(3, 5)],
                },
            ),
            2,
        );

        let ack = Message::IsAlive {
            members: vec![MemberEntry::new(peer(3), 5, 2)],
        };
        assert_eq!(messages(&net, 1), vec![ack.clone()]);
        assert_eq!(messages(&net, 4), vec![ack]);
        assert!(!b.suspicion().is_awaiting(&peer(3)));

        b.handle(
            Envelope::new(
                peer(3),
                Message::IsAlive {
                    members: vec![entry(3, 6)],
                },
            ),
            3,
        );
        assert_eq!(net.pending(&peer(1)), 0);
    }

    #[test]
    fn test_suspicion_of_unknown_peer_is_ignored() {
        let net = network(&[1, 2, 9]);
        let mut node = seeded_introducer(&net, &[2], config());

        node.handle(
            Envelope::new(peer(2), Message::Suspect { suspects: vec![entry(9, 1)] }),
            1,
        );

        assert_eq!(net.pending(&peer(9)), 0);
        assert!(!node.suspicion().is_awaiting(&peer(9)));
    }

    #[test]
    fn test_suspected_node_refutes() {
        let net = network(&[1, 2]);
        let mut node = seeded_introducer(&net, &[2], config());

        node.handle(
            Envelope::new(peer(2), Message::Suspect { suspects: vec![entry(1, 0)] }),
            4,
        );

        assert_eq!(
            messages(&net, 2),
            vec![Message::IsAlive {
                members: vec![MemberEntry::new(peer(1), 1, 4)]
            }]
        );
    }

    #[test]
    fn test_relayed_ack_clears_local_suspicion() {
        let net = network(&[1, 2, 3]);
        let mut node = seeded_introducer(&net, &[2, 3], config());
        for now in 1..=5 {
            node.handle(
                Envelope::new(peer(2), Message::Ping { members: vec![entry(2, now + 1)] }),
                now,
            );
            node.tick(now);
        }
        assert_eq!(node.status_of(&peer(3)), MemberStatus::Suspected);

        // Peer 2 probed 3 and relays the answer.
        node.handle(
            Envelope::new(peer(2), Message::IsAlive { members: vec![entry(3, 4)] }),
            6,
        );

        assert_eq!(node.status_of(&peer(3)), MemberStatus::Alive);
    }

    // ============================================================
    // REMOVAL TESTS
    // ============================================================

    #[test]
    fn test_removal_is_redisseminated_once() {
        let net = network(&[1, 2, 3, 4]);
        let mut node = seeded_introducer(&net, &[2, 3, 4], config());

        let removal = Envelope::new(peer(2), Message::Remove { peer: entry(3, 1) });
        node.handle(removal.clone(), 1);

        assert_eq!(node.status_of(&peer(3)), MemberStatus::Dead);
        assert_eq!(messages(&net, 4), vec![Message::Remove { peer: entry(3, 1) }]);
        assert_eq!(net.pending(&peer(2)), 0, "sender must be excluded");
        assert_eq!(net.pending(&peer(3)), 0, "removed peer is not a target");

        node.handle(removal, 2);
        assert_eq!(net.pending(&peer(4)), 0);
    }

    #[test]
    fn test_removed_peer_is_not_readmitted() {
        let net = network(&[1, 2, 3]);
        let mut node = seeded_introducer(&net, &[2, 3], config());
        node.handle(
            Envelope::new(peer(2), Message::Remove { peer: entry(3, 1) }),
            1,
        );

        node.handle(
            Envelope::new(peer(2), Message::Ping { members: vec![entry(3, 50)] }),
            2,
        );
        node.handle(Envelope::new(peer(3), Message::JoinRequest { heartbeat: 0 }), 3);

        assert!(!node.table().contains(&peer(3)));
        assert_eq!(net.pending(&peer(3)), 0);
    }

    #[test]
    fn test_removal_of_unknown_peer_blocks_late_gossip() {
        let net = network(&[1, 2]);
        let mut node = seeded_introducer(&net, &[2], config());

        node.handle(
            Envelope::new(peer(2), Message::Remove { peer: entry(7, 1) }),
            1,
        );
        node.handle(
            Envelope::new(peer(2), Message::Ping { members: vec![entry(7, 1)] }),
            2,
        );

        assert_eq!(node.status_of(&peer(7)), MemberStatus::Dead);
        assert_eq!(net.pending(&peer(2)), 0);
    }

    #[test]
    fn test_removal_naming_self_is_ignored() {
        let net = network(&[1, 2]);
        let mut node = seeded_introducer(&net, &[2], config());

        node.handle(
            Envelope::new(peer(2), Message::RemoveBatch { peers: vec![entry(1, 0)] }),
            1,
        );

        assert!(node.table().contains(&peer(1)));
        assert_eq!(node.status_of(&peer(1)), MemberStatus::Alive);
    }
}
