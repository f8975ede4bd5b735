use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use duelsync_core::{
    Action, ChannelTransport, ConnectionState, EventRecorder, GameId, GameSession, GameState,
    HookDecision, MoveDelta, NoopHooks, Payload, PlayerId, ReducerError, SessionConfig,
    SessionEvent, SessionHooks, StateHash, SyncError, Value,
    clock::stamp,
    hooks::ProposedMove,
    recovery::RecoverySnapshot,
    resync::ResyncState,
};
use duelsync_proto::{
    Envelope,
    messages::{
        presence::Ping,
        sync::{ActionErrorCode, ActionMsg},
    },
};
use tokio::sync::mpsc;

fn initial_state() -> GameState {
    GameState::new(
        GameId::from("g1"),
        vec![PlayerId::from("A"), PlayerId::from("B")],
        Payload::new(),
        0,
    )
    .unwrap()
}

struct Peer {
    session: GameSession,
    outbox: mpsc::Receiver<Bytes>,
}

impl Peer {
    fn new(player: &str, config: SessionConfig, hooks: Arc<dyn SessionHooks>) -> Self {
        let (transport, outbox) = ChannelTransport::pair(256);
        let session = GameSession::new(
            initial_state(),
            PlayerId::from(player),
            config,
            Box::new(transport),
            hooks,
        )
        .unwrap();
        Self { session, outbox }
    }

    fn sent(&mut self) -> Vec<Bytes> {
        let mut out = Vec::new();
        while let Ok(bytes) = self.outbox.try_recv() {
            out.push(bytes);
        }
        out
    }

    fn deliver(&mut self, packets: Vec<Bytes>, now: Instant) {
        for bytes in packets {
            self.session.handle_message(&bytes, now).unwrap();
        }
    }
}

fn decode(packets: &[Bytes]) -> Vec<Envelope> {
    packets
        .iter()
        .map(|bytes| Envelope::decode(bytes).unwrap())
        .collect()
}

fn merge(key: &str, value: i64) -> MoveDelta {
    let mut delta = Payload::new();
    delta.insert(key.to_string(), Value::Int(value));
    MoveDelta::Merge(delta)
}

/// Two connected peers that already exchanged the host's opening snapshot.
fn connected_pair(config: SessionConfig, t0: Instant) -> (Peer, Peer) {
    let mut a = Peer::new("A", config.clone(), Arc::new(NoopHooks));
    let mut b = Peer::new("B", config, Arc::new(NoopHooks));
    a.session.on_transport_open(t0).unwrap();
    b.session.on_transport_open(t0).unwrap();
    let opening = a.sent();
    assert!(matches!(decode(&opening)[..], [Envelope::Snapshot(_)]));
    assert!(b.sent().is_empty());
    b.deliver(opening, t0);
    a.session.take_events();
    b.session.take_events();
    (a, b)
}

/// A turn override attributed to `actor` carrying a bogus post-hash.
fn forged_set_turn(state: &GameState, actor: &str, player: &str) -> Bytes {
    let mut meta = stamp(
        duelsync_core::ClockMode::Lamport,
        state.clocks(),
        &PlayerId::from(actor),
    );
    meta.post_hash = Some(StateHash([9; 32]));
    let action = Action::SystemSetTurn {
        player: PlayerId::from(player),
        meta,
    };
    Bytes::from(Envelope::Action(ActionMsg { action }).encode().unwrap())
}

#[test]
fn moves_replicate_and_turn_lock_holds() {
    let t0 = Instant::now();
    let (mut a, mut b) = connected_pair(SessionConfig::default(), t0);

    let state = a.session.make_move(merge("x", 1), t0).unwrap();
    assert_eq!(state.turn_number(), 1);
    assert_eq!(state.current_turn(), &PlayerId::from("B"));

    let err = a.session.make_move(merge("x", 2), t0).unwrap_err();
    assert!(matches!(
        err,
        SyncError::Reducer(ReducerError::NotYourTurn { .. })
    ));

    b.deliver(a.sent(), t0);
    assert_eq!(b.session.state().hash(), a.session.state().hash());
    assert_eq!(b.session.state().payload()["x"], Value::Int(1));
    assert!(
        !b.session
            .take_events()
            .iter()
            .any(|e| matches!(e, SessionEvent::Diverged { .. }))
    );

    b.session.make_move(merge("y", 5), t0).unwrap();
    a.deliver(b.sent(), t0);
    assert_eq!(a.session.state().hash(), b.session.state().hash());
    assert_eq!(a.session.state().turn_number(), 2);
    assert_eq!(a.session.action_log().len(), 2);
}

#[test]
fn closure_moves_travel_as_replacements() {
    let t0 = Instant::now();
    let (mut a, _b) = connected_pair(SessionConfig::default(), t0);

    a.session
        .make_move_with(
            |payload| {
                let mut next = payload.clone();
                next.insert("board".to_string(), Value::Text("x........".to_string()));
                next
            },
            t0,
        )
        .unwrap();

    let sent = decode(&a.sent());
    assert!(matches!(
        &sent[..],
        [Envelope::Action(ActionMsg {
            action: Action::MakeMove {
                delta: MoveDelta::Replace(_),
                ..
            }
        })]
    ));
}

#[test]
fn out_of_turn_peer_action_is_answered_with_error() {
    let t0 = Instant::now();
    let (mut a, mut b) = connected_pair(SessionConfig::default(), t0);

    a.session.make_move(merge("x", 1), t0).unwrap();
    let first = a.sent();
    b.deliver(first.clone(), t0);
    b.session.take_events();

    // Replaying A's move when it is B's turn must be rejected.
    b.deliver(first, t0);
    let replies = decode(&b.sent());
    assert!(matches!(
        &replies[..],
        [Envelope::ActionError(err)] if err.code == ActionErrorCode::NotYourTurn
    ));
    assert!(b.session.take_events().iter().any(|e| matches!(
        e,
        SessionEvent::PeerActionRejected {
            code: ActionErrorCode::NotYourTurn,
            ..
        }
    )));
    assert_eq!(b.session.state().turn_number(), 1);

    a.deliver(replies_as_bytes(&replies), t0);
    assert!(
        a.session
            .take_events()
            .iter()
            .any(|e| matches!(e, SessionEvent::ActionRejectedByPeer { .. }))
    );
}

fn replies_as_bytes(envelopes: &[Envelope]) -> Vec<Bytes> {
    envelopes
        .iter()
        .map(|e| Bytes::from(e.encode().unwrap()))
        .collect()
}

#[test]
fn hash_mismatch_requests_exactly_one_resync() {
    let t0 = Instant::now();
    let (mut a, mut b) = connected_pair(SessionConfig::default(), t0);

    let forged = forged_set_turn(b.session.state(), "A", "A");
    b.deliver(vec![forged], t0);

    let local = b.session.state().hash();
    let sent = decode(&b.sent());
    assert_eq!(sent.len(), 1);
    match &sent[0] {
        Envelope::RequestResync(req) => assert_eq!(req.to_hash, local),
        other => panic!("expected requestResync, got {other:?}"),
    }
    assert!(matches!(
        b.session.resync_state(),
        ResyncState::ResyncRequested { to_hash, .. } if to_hash == local
    ));
    let events = b.session.take_events();
    assert!(events.iter().any(|e| matches!(e, SessionEvent::Diverged { .. })));

    // A second mismatch while the request is outstanding sends nothing.
    let forged = forged_set_turn(b.session.state(), "A", "B");
    b.deliver(vec![forged], t0 + Duration::from_millis(10));
    assert!(b.sent().is_empty());

    // A answers with its snapshot and B converges onto it.
    a.deliver(replies_as_bytes(&sent), t0);
    let snapshot = a.sent();
    assert!(matches!(decode(&snapshot)[..], [Envelope::Snapshot(_)]));
    b.deliver(snapshot, t0);
    assert_eq!(b.session.state().hash(), a.session.state().hash());
    assert_eq!(b.session.resync_state(), ResyncState::InSync);
    assert!(
        b.session
            .take_events()
            .iter()
            .any(|e| matches!(e, SessionEvent::ResyncCompleted { .. }))
    );
}

#[test]
fn repeated_divergence_becomes_unresolved_until_forced_push() {
    let t0 = Instant::now();
    let config = SessionConfig {
        resync_max_attempts: 1,
        ..Default::default()
    };
    let (mut a, mut b) = connected_pair(config, t0);

    b.deliver(vec![forged_set_turn(b.session.state(), "A", "A")], t0);
    a.deliver(b.sent(), t0);
    b.deliver(a.sent(), t0);
    assert!(b.session.is_trusted());

    // The override hands B the turn, but B's state is no longer trusted.
    b.deliver(vec![forged_set_turn(b.session.state(), "A", "B")], t0);
    assert!(!b.session.is_trusted());
    assert!(b.sent().is_empty());
    assert!(
        b.session
            .take_events()
            .iter()
            .any(|e| matches!(e, SessionEvent::DivergenceUnresolved { .. }))
    );

    let turn_before = b.session.state().turn_number();
    assert!(matches!(
        b.session.make_move(merge("x", 1), t0),
        Err(SyncError::DivergenceUnresolved)
    ));
    assert!(matches!(
        b.session.make_move_with(|p| p.clone(), t0),
        Err(SyncError::DivergenceUnresolved)
    ));
    assert_eq!(b.session.state().turn_number(), turn_before);
    assert!(b.session.pending().is_empty());
    assert!(b.sent().is_empty());

    b.session.force_snapshot_push().unwrap();
    assert!(b.session.is_trusted());
    assert!(matches!(decode(&b.sent())[..], [Envelope::Snapshot(_)]));

    b.session.make_move(merge("x", 1), t0).unwrap();
    assert!(matches!(decode(&b.sent())[..], [Envelope::Action(_)]));
}

#[test]
fn only_the_host_may_override_the_turn() {
    let t0 = Instant::now();
    let (mut a, mut b) = connected_pair(SessionConfig::default(), t0);

    assert!(matches!(
        b.session.set_turn(PlayerId::from("B"), t0),
        Err(SyncError::NotHost(player)) if player == PlayerId::from("B")
    ));
    assert_eq!(b.session.state().current_turn(), &PlayerId::from("A"));
    assert!(b.sent().is_empty());

    // A hand-built override claiming to come from B is refused by the host.
    let before = a.session.state().hash();
    a.deliver(vec![forged_set_turn(a.session.state(), "B", "B")], t0);
    assert_eq!(a.session.state().hash(), before);
    assert_eq!(a.session.state().current_turn(), &PlayerId::from("A"));
    assert!(matches!(
        &decode(&a.sent())[..],
        [Envelope::ActionError(err)] if err.code == ActionErrorCode::NotHost
    ));
    assert!(a.session.take_events().iter().any(|e| matches!(
        e,
        SessionEvent::PeerActionRejected {
            code: ActionErrorCode::NotHost,
            ..
        }
    )));

    // The host's own override still replicates.
    a.session.set_turn(PlayerId::from("B"), t0).unwrap();
    b.deliver(a.sent(), t0);
    assert_eq!(b.session.state().current_turn(), &PlayerId::from("B"));
    assert_eq!(b.session.state().hash(), a.session.state().hash());
    b.session.make_move(merge("y", 1), t0).unwrap();
}

#[test]
fn buffered_actions_flush_in_causal_order_on_reconnect() {
    let t0 = Instant::now();
    let (mut a, mut b) = connected_pair(SessionConfig::default(), t0);

    a.session.on_transport_close(t0);
    assert_eq!(a.session.connection_state(), ConnectionState::Disconnected);

    a.session.make_move(merge("x", 1), t0).unwrap();
    a.session.set_turn(PlayerId::from("A"), t0).unwrap();
    a.session.make_move(merge("x", 2), t0).unwrap();
    assert_eq!(a.session.pending().len(), 3);
    assert!(a.sent().is_empty());

    let later = t0 + Duration::from_secs(3);
    assert!(a.session.begin_reconnect(later));
    a.session.on_transport_open(later).unwrap();
    assert!(a.session.pending().is_empty());

    let flushed = a.sent();
    let lamports: Vec<u64> = decode(&flushed)
        .iter()
        .map(|env| match env {
            Envelope::Action(ActionMsg { action }) => action.causal_key().0,
            other => panic!("expected action, got {other:?}"),
        })
        .collect();
    assert_eq!(lamports, vec![0, 1, 2]);
    assert!(
        a.session
            .take_events()
            .contains(&SessionEvent::PendingFlushed { count: 3 })
    );

    b.deliver(flushed, later);
    assert_eq!(b.session.state().hash(), a.session.state().hash());
    assert_eq!(b.session.state().payload()["x"], Value::Int(2));
}

#[test]
fn per_player_buffered_actions_flush_by_counter() {
    let t0 = Instant::now();
    let config = SessionConfig {
        clock_mode: duelsync_core::ClockMode::PerPlayer,
        ..Default::default()
    };
    let (mut a, mut b) = connected_pair(config, t0);

    a.session.on_transport_close(t0);
    a.session.make_move(merge("x", 1), t0).unwrap();
    a.session.set_turn(PlayerId::from("A"), t0).unwrap();
    a.session.make_move(merge("x", 2), t0).unwrap();
    assert_eq!(a.session.pending().len(), 3);

    let later = t0 + Duration::from_secs(3);
    assert!(a.session.begin_reconnect(later));
    a.session.on_transport_open(later).unwrap();

    let flushed = a.sent();
    let keys: Vec<(u64, u64)> = decode(&flushed)
        .iter()
        .map(|env| match env {
            Envelope::Action(ActionMsg { action }) => action.causal_key(),
            other => panic!("expected action, got {other:?}"),
        })
        .collect();
    // The shared scalar never moves in this mode; only A's counter orders.
    assert_eq!(keys, vec![(0, 0), (0, 1), (0, 2)]);

    b.deliver(flushed, later);
    assert_eq!(b.session.state().hash(), a.session.state().hash());
    assert_eq!(b.session.state().payload()["x"], Value::Int(2));
    assert_eq!(b.session.state().clocks().counter(&PlayerId::from("A")), 3);
}

#[test]
fn undrained_events_are_capped_but_hooks_see_all() {
    let t0 = Instant::now();
    let recorder = Arc::new(EventRecorder::new());
    let config = SessionConfig {
        event_buffer_capacity: 2,
        ..Default::default()
    };
    let mut a = Peer::new("A", config, recorder.clone());

    for _ in 0..5 {
        a.session.set_turn(PlayerId::from("A"), t0).unwrap();
    }

    let buffered = a.session.take_events();
    assert_eq!(buffered.len(), 2);
    assert!(matches!(
        buffered.last(),
        Some(SessionEvent::StateAdvanced { hash, .. }) if *hash == a.session.state().hash()
    ));
    assert_eq!(recorder.len(), 5);
    assert!(a.session.take_events().is_empty());
}

#[test]
fn ping_is_answered_and_garbage_is_dropped() {
    let t0 = Instant::now();
    let (mut a, _b) = connected_pair(SessionConfig::default(), t0);

    let ping = Bytes::from(Envelope::Ping(Ping { t_ms: 42 }).encode().unwrap());
    a.deliver(vec![ping], t0);
    match &decode(&a.sent())[..] {
        [Envelope::Pong(pong)] => assert_eq!(pong.t_ms, 42),
        other => panic!("expected pong, got {other:?}"),
    }

    a.session.handle_message(b"not a packet", t0).unwrap();
    assert!(
        a.session
            .take_events()
            .iter()
            .any(|e| matches!(e, SessionEvent::InvalidAction { .. }))
    );
    assert_eq!(a.session.state().turn_number(), 0);
}

#[test]
fn heartbeat_and_presence_follow_the_clock() {
    let t0 = Instant::now();
    let config = SessionConfig {
        heartbeat_interval_ms: 1_000,
        idle_threshold_ms: 5_000,
        ..Default::default()
    };
    let (mut a, _b) = connected_pair(config, t0);

    a.session.tick(t0 + Duration::from_millis(1_000));
    assert!(matches!(decode(&a.sent())[..], [Envelope::Ping(_)]));

    a.session.tick(t0 + Duration::from_secs(6));
    assert!(
        a.session
            .take_events()
            .contains(&SessionEvent::PresenceChanged(
                duelsync_core::PresenceLevel::Idle
            ))
    );
}

#[test]
fn closed_session_stops_everything() {
    let t0 = Instant::now();
    let (mut a, _b) = connected_pair(SessionConfig::default(), t0);

    a.session.close();
    assert!(matches!(
        a.session.make_move(merge("x", 1), t0),
        Err(SyncError::SessionClosed)
    ));
    a.session.tick(t0 + Duration::from_secs(60));
    assert!(a.sent().is_empty());
    assert!(!a.session.begin_reconnect(t0 + Duration::from_secs(60)));
}

struct NoNegatives;

impl SessionHooks for NoNegatives {
    fn before_move(&self, _state: &GameState, proposed: ProposedMove<'_>) -> HookDecision {
        let payload = match proposed {
            ProposedMove::Delta(MoveDelta::Merge(p) | MoveDelta::Replace(p)) => p,
            ProposedMove::Computed(p) => p,
        };
        if payload.values().any(|v| v.as_int().is_some_and(|n| n < 0)) {
            return HookDecision::Veto("negative values are not allowed".to_string());
        }
        HookDecision::Allow
    }
}

#[test]
fn hooks_can_veto_and_observe() {
    let t0 = Instant::now();
    let mut a = Peer::new("A", SessionConfig::default(), Arc::new(NoNegatives));
    a.session.on_transport_open(t0).unwrap();

    assert!(matches!(
        a.session.make_move(merge("x", -1), t0),
        Err(SyncError::Vetoed(_))
    ));
    assert_eq!(a.session.state().turn_number(), 0);

    let recorder = Arc::new(EventRecorder::new());
    let mut b = Peer::new("B", SessionConfig::default(), recorder.clone());
    b.session.on_transport_open(t0).unwrap();
    b.deliver(a.sent(), t0);
    a.session.make_move(merge("x", 1), t0).unwrap();
    b.deliver(a.sent(), t0);

    assert_eq!(recorder.moves_applied(), 1);
    let events = recorder.take();
    assert!(events.contains(&SessionEvent::StatusChanged(ConnectionState::Open)));
    assert!(
        events
            .iter()
            .any(|e| matches!(e, SessionEvent::StateAdvanced { remote: true, .. }))
    );
}

#[test]
fn recovery_snapshot_restores_and_rejects_tampering() {
    let t0 = Instant::now();
    let mut a = Peer::new("A", SessionConfig::default(), Arc::new(NoopHooks));
    a.session.make_move(merge("x", 1), t0).unwrap();
    a.session.set_turn(PlayerId::from("A"), t0).unwrap();

    let bytes = a.session.recovery_snapshot(1_000).to_bytes().unwrap();
    let recovery = RecoverySnapshot::from_bytes(&bytes).unwrap();
    assert_eq!(recovery.timestamp_ms, 1_000);
    assert_eq!(recovery.pending_action_queue.len(), 2);

    let (transport, _rx) = ChannelTransport::pair(8);
    let restored = GameSession::restore(
        recovery.clone(),
        SessionConfig::default(),
        Box::new(transport),
        Arc::new(NoopHooks),
    )
    .unwrap();
    assert_eq!(restored.state().hash(), a.session.state().hash());
    assert_eq!(restored.pending().len(), 2);
    assert_eq!(restored.action_log().len(), 2);
    assert_eq!(restored.connection_state(), ConnectionState::Connecting);

    let mut tampered = recovery;
    tampered.state.turn_number += 1;
    let (transport, _rx) = ChannelTransport::pair(8);
    assert!(matches!(
        GameSession::restore(
            tampered,
            SessionConfig::default(),
            Box::new(transport),
            Arc::new(NoopHooks),
        ),
        Err(SyncError::TaintedState)
    ));
}

#[test]
fn spectators_receive_every_applied_change() {
    let t0 = Instant::now();
    let (mut a, mut b) = connected_pair(SessionConfig::default(), t0);
    let (spectator, mut watch) = ChannelTransport::pair(16);
    b.session.add_spectator(Box::new(spectator));

    a.session.make_move(merge("x", 1), t0).unwrap();
    b.deliver(a.sent(), t0);
    b.session.make_move(merge("x", 2), t0).unwrap();

    let mut seen = 0;
    while let Ok(bytes) = watch.try_recv() {
        assert!(matches!(Envelope::decode(&bytes), Ok(Envelope::Action(_))));
        seen += 1;
    }
    assert_eq!(seen, 2);
}

#[test]
fn ice_candidates_pass_through() {
    let t0 = Instant::now();
    let (mut a, mut b) = connected_pair(SessionConfig::default(), t0);

    a.session.send_ice_candidate("candidate:1 1 udp 2122260223 10.0.0.2 4444 typ host".to_string());
    b.deliver(a.sent(), t0);
    assert!(b.session.take_events().iter().any(|e| matches!(
        e,
        SessionEvent::IceCandidate(c) if c.starts_with("candidate:1")
    )));
}
