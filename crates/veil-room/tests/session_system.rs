//! Integration tests for session actors and the session manager.
//!
//! Every test runs with paused time: accrual timers are minutes long,
//! and auto-advance makes them fire instantly once the runtime is idle.
//! `handle.get_info()` doubles as a barrier, since the actor processes
//! commands in order.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver};
use veil_economy::{MemoryStore, RetryPolicy, StoreWriter, UserStats};
use veil_protocol::{ClientId, RelayKind, ServerMessage, SessionId, SessionKind};
use veil_room::{EndReason, Member, SessionConfig, SessionManager, SessionState};

// =========================================================================
// Helpers
// =========================================================================

fn cid(id: &str) -> ClientId {
    ClientId::from(id)
}

fn member(id: &str) -> (Member, UnboundedReceiver<ServerMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let member = Member {
        client_id: cid(id),
        display_name: id.to_uppercase(),
        outbox: tx,
    };
    (member, rx)
}

fn manager() -> (SessionManager, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let writer = StoreWriter::new(store.clone(), RetryPolicy::default());
    (SessionManager::new(SessionConfig::default(), writer), store)
}

fn drain(rx: &mut UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
    let mut out = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        out.push(msg);
    }
    out
}

/// Lets spawned store writes run to completion.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

struct Pair {
    mgr: SessionManager,
    store: Arc<MemoryStore>,
    id: SessionId,
    a: UnboundedReceiver<ServerMessage>,
    b: UnboundedReceiver<ServerMessage>,
}

/// Creates an `a`/`b` session and discards the `match` messages.
fn pair(kind: SessionKind) -> Pair {
    let (mgr, store) = manager();
    let (ma, mut a) = member("a");
    let (mb, mut b) = member("b");
    let handle = mgr.create(kind, [ma, mb]).unwrap();
    drain(&mut a);
    drain(&mut b);
    Pair {
        mgr,
        store,
        id: handle.session_id(),
        a,
        b,
    }
}

impl Pair {
    async fn connect(&self) {
        let handle = self.mgr.get(self.id).unwrap();
        handle.connected(cid("a")).await.unwrap();
        handle.get_info().await.unwrap();
    }

    async fn state(&self) -> SessionState {
        self.mgr.get(self.id).unwrap().get_info().await.unwrap().state
    }
}

// =========================================================================
// Creation
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_create_notifies_both_with_same_session() {
    let (mgr, _store) = manager();
    let (ma, mut a) = member("a");
    let (mb, mut b) = member("b");

    let handle = mgr.create(SessionKind::Random, [ma, mb]).unwrap();

    let (ServerMessage::Match { session_id: sa, kind, members }, ServerMessage::Match { session_id: sb, .. }) =
        (a.try_recv().unwrap(), b.try_recv().unwrap())
    else {
        panic!("expected match on both sides");
    };
    assert_eq!(sa, sb);
    assert_eq!(sa, handle.session_id());
    assert_eq!(kind, SessionKind::Random);
    let ids: Vec<_> = members.iter().map(|p| p.client_id.clone()).collect();
    assert_eq!(ids, vec![cid("a"), cid("b")]);

    assert_eq!(mgr.session_of(&cid("a")), Some(sa));
    assert_eq!(mgr.session_of(&cid("b")), Some(sa));
    assert!(sa.0 >= 1 && sa.0 <= SessionId::MAX_SAFE);
    assert_eq!(handle.get_info().await.unwrap().state, SessionState::Negotiating);
}

#[tokio::test(start_paused = true)]
async fn test_create_rejects_member_already_in_session() {
    let (mgr, _store) = manager();
    let (ma, _a) = member("a");
    let (mb, _b) = member("b");
    let (ma2, _a2) = member("a");
    let (mc, _c) = member("c");

    mgr.create(SessionKind::Random, [ma, mb]).unwrap();
    assert!(mgr.create(SessionKind::Friend, [ma2, mc]).is_err());
    assert_eq!(mgr.len(), 1);
    assert_eq!(mgr.session_of(&cid("c")), None);
}

#[tokio::test(start_paused = true)]
async fn test_create_records_session_start() {
    let p = pair(SessionKind::Friend);
    settle().await;
    let record = p.store.session(p.id).unwrap();
    assert_eq!(record.kind, SessionKind::Friend);
    assert_eq!(record.members, [cid("a"), cid("b")]);
}

// =========================================================================
// Relay
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_relay_forwards_to_other_member_only() {
    let mut p = pair(SessionKind::Random);
    let handle = p.mgr.get(p.id).unwrap();
    let sdp = serde_json::json!({"type": "offer", "sdp": "v=0"});

    handle
        .relay(cid("a"), RelayKind::Offer, sdp.clone())
        .await
        .unwrap();
    handle.get_info().await.unwrap();

    assert_eq!(
        drain(&mut p.b),
        vec![ServerMessage::Offer {
            session_id: p.id,
            from: cid("a"),
            payload: sdp
        }]
    );
    assert!(drain(&mut p.a).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_relay_from_non_member_is_dropped() {
    let mut p = pair(SessionKind::Random);
    let handle = p.mgr.get(p.id).unwrap();

    handle
        .relay(cid("mallory"), RelayKind::Candidate, serde_json::json!({}))
        .await
        .unwrap();
    handle.get_info().await.unwrap();

    assert!(drain(&mut p.a).is_empty());
    assert!(drain(&mut p.b).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unknown_session_lookup_is_none() {
    let (mgr, _store) = manager();
    assert!(mgr.get(SessionId(12345)).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_chat_is_broadcast_to_both() {
    let mut p = pair(SessionKind::Friend);
    let handle = p.mgr.get(p.id).unwrap();

    handle.chat(cid("b"), "hi".into()).await.unwrap();
    handle.get_info().await.unwrap();

    for rx in [&mut p.a, &mut p.b] {
        match drain(rx).as_slice() {
            [ServerMessage::Chat { from, text, .. }] => {
                assert_eq!(from, &cid("b"));
                assert_eq!(text, "hi");
            }
            other => panic!("expected one chat, got {other:?}"),
        }
    }
}

// =========================================================================
// State machine
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_connected_random_session_becomes_concealed() {
    let p = pair(SessionKind::Random);
    p.connect().await;
    assert_eq!(p.state().await, SessionState::Concealed);

    // A second acknowledgment changes nothing.
    p.mgr.get(p.id).unwrap().connected(cid("b")).await.unwrap();
    assert_eq!(p.state().await, SessionState::Concealed);
}

#[tokio::test(start_paused = true)]
async fn test_connected_friend_session_becomes_revealed() {
    let p = pair(SessionKind::Friend);
    p.connect().await;
    assert_eq!(p.state().await, SessionState::Revealed);
}

#[tokio::test(start_paused = true)]
async fn test_relayed_answer_completes_negotiation() {
    let mut p = pair(SessionKind::Random);
    let handle = p.mgr.get(p.id).unwrap();

    handle
        .relay(cid("a"), RelayKind::Offer, serde_json::json!({"type": "offer"}))
        .await
        .unwrap();
    assert_eq!(p.state().await, SessionState::Negotiating);

    let answer = serde_json::json!({"type": "answer"});
    handle
        .relay(cid("b"), RelayKind::Answer, answer.clone())
        .await
        .unwrap();
    assert_eq!(p.state().await, SessionState::Concealed);
    assert_eq!(
        drain(&mut p.a),
        vec![ServerMessage::Answer {
            session_id: p.id,
            from: cid("b"),
            payload: answer
        }]
    );

    // A late `connected` is a no-op and reveals now work.
    handle.connected(cid("a")).await.unwrap();
    handle.reveal_request(cid("a")).await.unwrap();
    handle.reveal_accept(cid("b")).await.unwrap();
    assert_eq!(p.state().await, SessionState::Revealed);
}

// =========================================================================
// Reveal handshake
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_reveal_request_alone_does_not_reveal() {
    let mut p = pair(SessionKind::Random);
    p.connect().await;
    let handle = p.mgr.get(p.id).unwrap();

    handle.reveal_request(cid("a")).await.unwrap();
    // The requester cannot accept its own request.
    handle.reveal_accept(cid("a")).await.unwrap();

    let info = handle.get_info().await.unwrap();
    assert_eq!(info.state, SessionState::Concealed);
    assert_eq!(info.reveal_requested, [true, false]);
    assert_eq!(
        drain(&mut p.b),
        vec![ServerMessage::RevealRequested {
            session_id: p.id,
            from: cid("a")
        }]
    );
    assert!(drain(&mut p.a).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_reveal_accept_by_peer_reveals_both() {
    let mut p = pair(SessionKind::Random);
    p.connect().await;
    let handle = p.mgr.get(p.id).unwrap();

    handle.reveal_request(cid("a")).await.unwrap();
    handle.reveal_accept(cid("b")).await.unwrap();
    handle.reveal_accept(cid("b")).await.unwrap();
    let info = handle.get_info().await.unwrap();

    assert_eq!(info.state, SessionState::Revealed);
    assert_eq!(info.coins, 15);

    let revealed = ServerMessage::Revealed { session_id: p.id };
    let bonus = ServerMessage::CoinsAwarded {
        session_id: p.id,
        amount: 15,
        total: 15,
    };
    assert_eq!(drain(&mut p.a), vec![revealed.clone(), bonus.clone()]);
    assert_eq!(
        drain(&mut p.b),
        vec![
            ServerMessage::RevealRequested {
                session_id: p.id,
                from: cid("a")
            },
            revealed,
            bonus
        ]
    );

    settle().await;
    assert_eq!(p.store.friends_of(&cid("a")), vec![cid("b")]);
    assert!(p.store.session(p.id).unwrap().revealed_at.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_reveal_request_before_connected_is_ignored() {
    let mut p = pair(SessionKind::Random);
    let handle = p.mgr.get(p.id).unwrap();

    handle.reveal_request(cid("a")).await.unwrap();
    let info = handle.get_info().await.unwrap();

    assert_eq!(info.reveal_requested, [false, false]);
    assert!(drain(&mut p.b).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cross_requests_either_accept_reveals() {
    let p = pair(SessionKind::Random);
    p.connect().await;
    let handle = p.mgr.get(p.id).unwrap();

    handle.reveal_request(cid("a")).await.unwrap();
    handle.reveal_request(cid("b")).await.unwrap();
    handle.reveal_accept(cid("a")).await.unwrap();

    assert_eq!(p.state().await, SessionState::Revealed);
}

// =========================================================================
// Ending
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_end_twice_notifies_once_and_counts_once() {
    let mut p = pair(SessionKind::Random);
    p.connect().await;

    let first = p.mgr.end(p.id, EndReason::PeerDisconnected(cid("a"))).await;
    let second = p.mgr.end(p.id, EndReason::PeerDisconnected(cid("a"))).await;
    let third = p.mgr.detach_for(&cid("b"));

    assert!(first.is_some());
    assert!(second.is_none());
    assert!(third.is_none());
    assert_eq!(
        drain(&mut p.b),
        vec![ServerMessage::PeerDisconnected { session_id: p.id }]
    );
    assert!(drain(&mut p.a).is_empty());
    assert!(p.mgr.get(p.id).is_none());
    assert_eq!(p.mgr.session_of(&cid("a")), None);
    assert_eq!(p.mgr.session_of(&cid("b")), None);

    settle().await;
    for user in ["a", "b"] {
        assert_eq!(p.store.stats(&cid(user)).total_sessions, 1);
    }
    assert!(p.store.session(p.id).unwrap().ended_at.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_leave_tells_leaver_and_peer_differently() {
    let mut p = pair(SessionKind::Friend);

    let summary = p.mgr.end(p.id, EndReason::PeerLeft(cid("b"))).await.unwrap();

    assert_eq!(summary.members, [cid("a"), cid("b")]);
    assert_eq!(
        drain(&mut p.a),
        vec![ServerMessage::PeerDisconnected { session_id: p.id }]
    );
    assert_eq!(
        drain(&mut p.b),
        vec![ServerMessage::SessionEnded { session_id: p.id }]
    );
}

#[tokio::test(start_paused = true)]
async fn test_relay_after_end_is_impossible() {
    let p = pair(SessionKind::Random);
    let stale = p.mgr.get(p.id).unwrap();
    p.mgr.end(p.id, EndReason::Shutdown).await;

    assert!(p.mgr.get(p.id).is_none());
    // A handle cloned before the end finds the actor gone.
    assert!(
        stale
            .relay(cid("a"), RelayKind::Answer, serde_json::json!({}))
            .await
            .is_err()
    );
}

#[tokio::test(start_paused = true)]
async fn test_detach_all_then_finalize_ends_every_session() {
    let (mgr, _store) = manager();
    let mut inboxes = Vec::new();
    for (x, y) in [("a", "b"), ("c", "d")] {
        let (mx, rx) = member(x);
        let (my, ry) = member(y);
        mgr.create(SessionKind::Random, [mx, my]).unwrap();
        inboxes.extend([rx, ry]);
    }

    let handles = mgr.detach_all();
    assert_eq!(handles.len(), 2);
    assert!(mgr.is_empty());
    assert!(mgr.detach_all().is_empty());

    for handle in handles {
        mgr.finalize(handle, EndReason::Shutdown).await;
    }
    for rx in &mut inboxes {
        let msgs = drain(rx);
        assert!(matches!(msgs.first(), Some(ServerMessage::Match { .. })));
        assert!(matches!(msgs.last(), Some(ServerMessage::SessionEnded { .. })));
    }
}

#[tokio::test(start_paused = true)]
async fn test_detach_frees_tables_before_anyone_is_told() {
    let mut p = pair(SessionKind::Random);
    p.connect().await;

    let handle = p.mgr.detach(p.id).unwrap();

    assert!(p.mgr.get(p.id).is_none());
    assert_eq!(p.mgr.session_of(&cid("a")), None);
    assert_eq!(p.mgr.session_of(&cid("b")), None);
    // The actor is still running and has told nobody yet.
    assert_eq!(handle.get_info().await.unwrap().state, SessionState::Concealed);
    assert!(drain(&mut p.b).is_empty());

    let summary = p
        .mgr
        .finalize(handle, EndReason::PeerDisconnected(cid("a")))
        .await;

    assert_eq!(summary.session_id, p.id);
    assert_eq!(
        drain(&mut p.b),
        vec![ServerMessage::PeerDisconnected { session_id: p.id }]
    );
    assert!(p.mgr.end(p.id, EndReason::Shutdown).await.is_none());
}

// =========================================================================
// Economy through the actor
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_concealed_session_accrues_after_quiet_period() {
    let mut p = pair(SessionKind::Random);
    p.connect().await;

    tokio::time::sleep(Duration::from_secs(8 * 60 + 30)).await;
    let summary = p.mgr.end(p.id, EndReason::PeerLeft(cid("a"))).await.unwrap();
    settle().await;

    assert_eq!(summary.coins, 3);
    assert!(!summary.revealed);
    let awards: Vec<_> = drain(&mut p.a)
        .into_iter()
        .filter(|m| matches!(m, ServerMessage::CoinsAwarded { .. }))
        .collect();
    assert_eq!(awards.len(), 3);
    assert_eq!(
        p.store.stats(&cid("b")),
        UserStats {
            coins: 3,
            total_sessions: 1,
            total_reveals: 0
        }
    );
    assert_eq!(p.store.session(p.id).unwrap().coins, 3);
}

#[tokio::test(start_paused = true)]
async fn test_reveal_after_first_tick_pays_sixteen() {
    let p = pair(SessionKind::Random);
    p.connect().await;
    let handle = p.mgr.get(p.id).unwrap();

    tokio::time::sleep(Duration::from_secs(6 * 60 + 30)).await;
    handle.reveal_request(cid("b")).await.unwrap();
    handle.reveal_accept(cid("a")).await.unwrap();
    tokio::time::sleep(Duration::from_secs(10 * 60)).await;

    let summary = p.mgr.end(p.id, EndReason::PeerLeft(cid("b"))).await.unwrap();
    settle().await;

    assert!(summary.revealed);
    assert_eq!(summary.coins, 16);
    for user in ["a", "b"] {
        assert_eq!(
            p.store.stats(&cid(user)),
            UserStats {
                coins: 16,
                total_sessions: 1,
                total_reveals: 1
            }
        );
    }
}

#[tokio::test(start_paused = true)]
async fn test_requester_disconnects_before_answer_no_reveal_no_bonus() {
    let mut p = pair(SessionKind::Random);
    p.connect().await;
    let handle = p.mgr.get(p.id).unwrap();
    handle.reveal_request(cid("a")).await.unwrap();
    handle.get_info().await.unwrap();
    drain(&mut p.b);

    let summary = p
        .mgr
        .end(p.id, EndReason::PeerDisconnected(cid("a")))
        .await
        .unwrap();
    settle().await;

    assert!(!summary.revealed);
    assert_eq!(summary.coins, 0);
    assert_eq!(
        drain(&mut p.b),
        vec![ServerMessage::PeerDisconnected { session_id: p.id }]
    );
    assert_eq!(p.store.stats(&cid("b")).total_reveals, 0);
    assert_eq!(p.store.stats(&cid("b")).coins, 0);
}

#[tokio::test(start_paused = true)]
async fn test_friend_session_never_earns() {
    let mut p = pair(SessionKind::Friend);
    p.connect().await;

    tokio::time::sleep(Duration::from_secs(2 * 3600)).await;
    let summary = p.mgr.end(p.id, EndReason::Shutdown).await.unwrap();
    settle().await;

    assert_eq!(summary.coins, 0);
    assert!(
        !drain(&mut p.a)
            .iter()
            .any(|m| matches!(m, ServerMessage::CoinsAwarded { .. }))
    );
    assert_eq!(p.store.stats(&cid("a")), UserStats::default());
}
