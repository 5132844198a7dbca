//! Client against a real server over QUIC on localhost.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use chitchat_client::{ChatClient, ClientError, Subscription};
use chitchat_proto::{BroadcastEvent, EventKind};
use chitchat_server::{BroadcastEngine, ClientId, LogicalTimestamp, Server, ServerConfig};

const STEP: Duration = Duration::from_secs(5);

async fn start_server() -> (SocketAddr, Arc<BroadcastEngine>) {
    let config = ServerConfig { bind_address: "127.0.0.1:0".to_string(), ..ServerConfig::default() };
    let server = Server::bind(config).await.unwrap();
    let addr = server.local_addr().unwrap();
    let engine = Arc::clone(server.engine());
    tokio::spawn(server.run());
    (addr, engine)
}

async fn next(subscription: &mut Subscription) -> BroadcastEvent {
    tokio::time::timeout(STEP, subscription.next())
        .await
        .expect("timed out waiting for event")
        .expect("subscription ended early")
}

async fn wait_for(engine: &BroadcastEngine, condition: impl Fn(&BroadcastEngine) -> bool) {
    tokio::time::timeout(STEP, async {
        while !condition(engine) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached");
}

#[tokio::test]
async fn alice_and_bob_over_quic() {
    let (addr, engine) = start_server().await;

    let alice = ChatClient::connect(addr, "alice").await.unwrap();
    let mut alice_events = alice.subscribe().await.unwrap();
    let join = next(&mut alice_events).await;
    assert_eq!((join.kind, join.client_id.as_str(), join.timestamp), (EventKind::Join, "alice", 1));

    let bob = ChatClient::connect(addr, "bob").await.unwrap();
    let mut bob_events = bob.subscribe().await.unwrap();
    assert_eq!(next(&mut bob_events).await.timestamp, 2);
    assert_eq!(next(&mut alice_events).await.client_id, "bob");

    let ack = alice.publish("hi").await.unwrap();
    assert!(ack.ack);

    for events in [&mut alice_events, &mut bob_events] {
        let chat = next(events).await;
        assert_eq!(chat.kind, EventKind::Chat);
        assert_eq!(chat.message, "hi");
        assert_eq!(chat.timestamp, 3);
    }

    assert!(bob.leave().await.unwrap());
    let leave = next(&mut alice_events).await;
    assert_eq!((leave.kind, leave.client_id.as_str(), leave.timestamp), (EventKind::Leave, "bob", 4));

    let end = tokio::time::timeout(STEP, bob_events.next()).await.unwrap();
    assert!(end.is_none(), "bob's stream should terminate after leave");

    assert_eq!(engine.now(), LogicalTimestamp::new(4));
}

#[tokio::test]
async fn oversized_publish_is_rejected_over_quic() {
    let (addr, engine) = start_server().await;

    let alice = ChatClient::connect(addr, "alice").await.unwrap();
    let mut events = alice.subscribe().await.unwrap();
    next(&mut events).await;

    let ack = alice.publish("a".repeat(129)).await.unwrap();
    assert!(!ack.ack);
    assert!(ack.error.contains("too long"));
    assert_eq!(engine.now(), LogicalTimestamp::new(1));

    assert!(alice.publish("b".repeat(128)).await.unwrap().ack);
    assert_eq!(next(&mut events).await.timestamp, 2);
}

#[tokio::test]
async fn disconnect_broadcasts_leave() {
    let (addr, engine) = start_server().await;

    let alice = ChatClient::connect(addr, "alice").await.unwrap();
    let mut alice_events = alice.subscribe().await.unwrap();
    next(&mut alice_events).await;

    let bob = ChatClient::connect(addr, "bob").await.unwrap();
    let bob_events = bob.subscribe().await.unwrap();
    next(&mut alice_events).await;

    drop(bob_events);
    bob.close().await;

    let leave = next(&mut alice_events).await;
    assert_eq!((leave.kind, leave.client_id.as_str()), (EventKind::Leave, "bob"));
    wait_for(&engine, |engine| engine.subscriber_count() == 1).await;
}

#[tokio::test]
async fn dropped_subscription_broadcasts_leave_while_connected() {
    let (addr, engine) = start_server().await;

    let alice = ChatClient::connect(addr, "alice").await.unwrap();
    let mut alice_events = alice.subscribe().await.unwrap();
    next(&mut alice_events).await;

    let bob = ChatClient::connect(addr, "bob").await.unwrap();
    let bob_events = bob.subscribe().await.unwrap();
    next(&mut alice_events).await;

    drop(bob_events);

    let leave = next(&mut alice_events).await;
    assert_eq!((leave.kind, leave.client_id.as_str(), leave.timestamp), (EventKind::Leave, "bob", 3));
    wait_for(&engine, |engine| engine.subscriber_count() == 1).await;
    assert!(!engine.is_subscribed(&ClientId::new("bob").unwrap()));

    // Connection is still usable after the subscription went away.
    assert!(bob.publish("still here").await.unwrap().ack);
    assert_eq!(next(&mut alice_events).await.message, "still here");
}

#[tokio::test]
async fn leave_without_subscription_is_acknowledged() {
    let (addr, engine) = start_server().await;

    let carol = ChatClient::connect(addr, "carol").await.unwrap();
    assert!(carol.leave().await.unwrap());
    assert!(carol.leave().await.unwrap());

    assert_eq!(engine.now(), LogicalTimestamp::new(0));
}

#[tokio::test]
async fn empty_client_id_is_rejected_locally() {
    let (addr, _engine) = start_server().await;

    let result = ChatClient::connect(addr, "").await;
    assert!(matches!(result, Err(ClientError::InvalidArgument(_))));
}
