//! Property-based tests for BroadcastEngine
//!
//! Random interleavings of Join/Publish/Leave/session-end checked against
//! the ordering and exactly-once guarantees of the engine.

use std::{collections::HashMap, sync::Arc};

use chitchat_proto::EventKind;
use chitchat_server::{
    BroadcastEngine, ChannelId, ClientId, EngineConfig, EngineError, Event, LogicalTimestamp,
    MAX_MESSAGE_LEN,
};
use proptest::prelude::*;
use tokio::sync::mpsc::Receiver;

#[derive(Debug, Clone)]
enum Op {
    Join(u8),
    Publish(u8, usize),
    Leave(u8),
    SessionEnd(u8),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..4).prop_map(Op::Join),
        (0u8..4, 0usize..=(MAX_MESSAGE_LEN + 8)).prop_map(|(c, len)| Op::Publish(c, len)),
        (0u8..4).prop_map(Op::Leave),
        (0u8..4).prop_map(Op::SessionEnd),
    ]
}

fn client(n: u8) -> ClientId {
    ClientId::new(format!("client-{n}")).unwrap()
}

fn engine() -> BroadcastEngine {
    BroadcastEngine::new(EngineConfig { outbound_capacity: 1024, ..EngineConfig::default() })
}

fn drain(rx: &mut Receiver<Arc<Event>>) -> Vec<Arc<Event>> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Property: assigned timestamps are exactly 1, 2, 3, ... in emission order
    #[test]
    fn prop_timestamps_are_gapless(ops in prop::collection::vec(op_strategy(), 1..60)) {
        let engine = engine();
        let mut sessions: HashMap<u8, ChannelId> = HashMap::new();
        let mut receivers = Vec::new();
        let mut assigned = Vec::new();

        for op in ops {
            match op {
                Op::Join(c) => {
                    let (channel, rx) = engine.open_channel();
                    sessions.insert(c, channel.id());
                    receivers.push(rx);
                    assigned.push(engine.join(client(c), channel)?.timestamp());
                },
                Op::Publish(c, len) => {
                    if let Ok(broadcast) = engine.publish(&client(c), &"x".repeat(len)) {
                        assigned.push(broadcast.timestamp());
                    }
                },
                Op::Leave(c) => {
                    if let Some(broadcast) = engine.leave(&client(c))? {
                        assigned.push(broadcast.timestamp());
                    }
                },
                Op::SessionEnd(c) => {
                    let Some(channel) = sessions.get(&c) else { continue };
                    if let Some(broadcast) = engine.on_session_end(&client(c), *channel)? {
                        assigned.push(broadcast.timestamp());
                    }
                },
            }
        }

        let expected: Vec<_> = (1..=assigned.len() as i64).map(LogicalTimestamp::new).collect();
        prop_assert_eq!(&assigned, &expected);
        prop_assert_eq!(engine.now(), LogicalTimestamp::new(assigned.len() as i64));

        // every subscriber observes a strictly increasing subsequence
        for rx in &mut receivers {
            let seen: Vec<_> = drain(rx).iter().map(|e| e.timestamp()).collect();
            prop_assert!(seen.windows(2).all(|w| w[0] < w[1]));
        }
    }

    /// Property: publish succeeds iff len <= 128, and only success is observable
    #[test]
    fn prop_publish_length_limit(len in 0usize..=(MAX_MESSAGE_LEN * 2), subscribers in 1u8..5) {
        let engine = engine();
        let mut receivers = Vec::new();
        for c in 0..subscribers {
            let (channel, rx) = engine.open_channel();
            engine.join(client(c), channel)?;
            receivers.push(rx);
        }
        for rx in &mut receivers {
            drain(rx);
        }
        let before = engine.now();

        let result = engine.publish(&client(0), &"y".repeat(len));

        if len <= MAX_MESSAGE_LEN {
            let broadcast = result?;
            prop_assert_eq!(broadcast.delivered, subscribers as usize);
            prop_assert_eq!(engine.now().get(), before.get() + 1);
            for rx in &mut receivers {
                let events = drain(rx);
                prop_assert_eq!(events.len(), 1);
                prop_assert_eq!(events[0].kind(), EventKind::Chat);
            }
        } else {
            prop_assert!(matches!(result, Err(EngineError::InvalidArgument(_))));
            prop_assert_eq!(engine.now(), before);
            for rx in &mut receivers {
                prop_assert!(drain(rx).is_empty());
            }
        }
    }

    /// Property: repeated Leave broadcasts at most once and always succeeds
    #[test]
    fn prop_leave_is_idempotent(repeats in 1usize..5) {
        let engine = engine();
        let (alice, _alice_rx) = engine.open_channel();
        let (bob, mut bob_rx) = engine.open_channel();
        engine.join(client(0), alice)?;
        engine.join(client(1), bob)?;
        drain(&mut bob_rx);

        let mut broadcasts = 0;
        for _ in 0..repeats {
            if engine.leave(&client(0))?.is_some() {
                broadcasts += 1;
            }
        }

        prop_assert_eq!(broadcasts, 1);
        let leaves = drain(&mut bob_rx);
        prop_assert_eq!(leaves.len(), 1);
        prop_assert_eq!(leaves[0].kind(), EventKind::Leave);
    }
}

#[test]
fn concurrent_joins_register_everyone() {
    const CLIENTS: usize = 32;

    let engine = Arc::new(engine());
    let handles: Vec<_> = (0..CLIENTS)
        .map(|n| {
            let engine = Arc::clone(&engine);
            std::thread::spawn(move || {
                let (channel, rx) = engine.open_channel();
                let id = ClientId::new(format!("thread-{n}")).unwrap();
                engine.join(id, channel).unwrap();
                rx
            })
        })
        .collect();

    let mut receivers: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(engine.subscriber_count(), CLIENTS);
    assert_eq!(engine.now(), LogicalTimestamp::new(CLIENTS as i64));

    // The k-th joiner (by timestamp) sees its own Join and every later one.
    let mut total = 0;
    for rx in &mut receivers {
        let events = drain(rx);
        assert!(events.iter().all(|e| e.kind() == EventKind::Join));
        let first = events[0].timestamp().get();
        assert_eq!(events.len() as i64, CLIENTS as i64 - first + 1);
        total += events.len();
    }
    assert_eq!(total, CLIENTS * (CLIENTS + 1) / 2);
}

#[test]
fn session_end_without_leave_emits_exactly_one_leave() {
    let engine = engine();
    let (watcher, mut watcher_rx) = engine.open_channel();
    let (alice, alice_rx) = engine.open_channel();
    let alice_channel = alice.id();
    engine.join(client(0), watcher).unwrap();
    engine.join(client(1), alice).unwrap();
    drop(alice_rx);
    drain(&mut watcher_rx);

    assert!(engine.on_session_end(&client(1), alice_channel).unwrap().is_some());
    assert!(engine.on_session_end(&client(1), alice_channel).unwrap().is_none());
    assert!(engine.leave(&client(1)).unwrap().is_none());

    let events = drain(&mut watcher_rx);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind(), EventKind::Leave);
    assert_eq!(events[0].client_id(), &client(1));
    assert_eq!(engine.snapshot(), vec![client(0)]);
}
