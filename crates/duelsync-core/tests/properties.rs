use duelsync_core::{
    Action, ClockMode, GameId, GameState, MoveDelta, Payload, PlayerId, ReducerError, Value,
    clock::{is_monotonic, stamp},
    reducer::Reducer,
};
use proptest::prelude::*;

fn players() -> Vec<PlayerId> {
    vec![PlayerId::from("A"), PlayerId::from("B")]
}

fn value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Int),
        "[a-z]{0,8}".prop_map(Value::Text),
    ]
}

fn payload_strategy() -> impl Strategy<Value = Payload> {
    prop::collection::btree_map("[a-d]", value_strategy(), 0..4)
}

fn clock_mode() -> impl Strategy<Value = ClockMode> {
    prop_oneof![Just(ClockMode::Lamport), Just(ClockMode::PerPlayer)]
}

/// Apply `deltas` as alternating moves by whoever owns the turn.
fn play(mode: ClockMode, deltas: &[Payload]) -> GameState {
    let reducer = Reducer::new(mode);
    let mut state = GameState::new(GameId::from("g"), players(), Payload::new(), 0).unwrap();
    for (i, delta) in deltas.iter().enumerate() {
        let actor = state.current_turn().clone();
        let action = Action::MakeMove {
            delta: MoveDelta::Merge(delta.clone()),
            meta: stamp(mode, state.clocks(), &actor),
        };
        state = reducer.apply(&state, &action, &actor, i as u64).unwrap();
    }
    state
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 128, .. ProptestConfig::default() })]

    #[test]
    fn identical_histories_hash_identically(
        mode in clock_mode(),
        deltas in prop::collection::vec(payload_strategy(), 0..8),
    ) {
        let left = play(mode, &deltas);
        let right = play(mode, &deltas);
        prop_assert_eq!(left.hash(), right.hash());
        prop_assert_eq!(left.recompute_hash().unwrap(), left.hash());
    }

    #[test]
    fn only_the_turn_owner_may_move(
        deltas in prop::collection::vec(payload_strategy(), 0..6),
        delta in payload_strategy(),
    ) {
        let state = play(ClockMode::Lamport, &deltas);
        let intruder = state.next_player().clone();
        let action = Action::MakeMove {
            delta: MoveDelta::Merge(delta),
            meta: stamp(ClockMode::Lamport, state.clocks(), &intruder),
        };
        let result = Reducer::default().apply(&state, &action, &intruder, 0);
        prop_assert!(
            matches!(result, Err(ReducerError::NotYourTurn { .. })),
            "expected NotYourTurn"
        );
    }

    #[test]
    fn clocks_never_move_backward(
        mode in clock_mode(),
        remote in prop::collection::vec((0u64..50, 0u64..50, any::<bool>()), 1..16),
    ) {
        // Arbitrary (possibly stale or reordered) remote meta values.
        let reducer = Reducer::new(mode);
        let mut state = GameState::new(GameId::from("g"), players(), Payload::new(), 0).unwrap();
        for (lamport, counter, by_a) in remote {
            let actor = PlayerId::from(if by_a { "A" } else { "B" });
            let mut meta = stamp(mode, state.clocks(), &actor);
            meta.lamport = lamport;
            meta.counter = counter;
            let action = Action::SystemSetTurn { player: actor.clone(), meta };
            let next = reducer.apply(&state, &action, &actor, 0).unwrap();
            prop_assert!(is_monotonic(state.clocks(), next.clocks()));
            state = next;
        }
    }

    #[test]
    fn snapshot_application_is_idempotent(
        deltas in prop::collection::vec(payload_strategy(), 0..6),
        other in prop::collection::vec(payload_strategy(), 0..6),
    ) {
        let source = play(ClockMode::Lamport, &deltas);
        let target = play(ClockMode::Lamport, &other);
        let action = Action::SyncSnapshot { snapshot: source.to_snapshot() };
        let me = PlayerId::from("B");

        let once = Reducer::default().apply(&target, &action, &me, 0).unwrap();
        let twice = Reducer::default().apply(&once, &action, &me, 0).unwrap();
        prop_assert_eq!(once.hash(), source.hash());
        prop_assert_eq!(twice.hash(), once.hash());
        prop_assert_eq!(twice.payload(), source.payload());
    }
}
