use super::{connected_pair, text_to, Harness};
use crate::event::SessionEvent;
use crate::remote::RemoteStore;
use crate::transport::{PeerMessage, PeerTransport, PROTOCOL_VERSION};
use courier_api::types::DeliveryStatus;
use std::time::Duration;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::time::timeout;

#[tokio::test]
async fn incompatible_protocol_version_is_dropped() {
    let mut harness = Harness::new();
    let (a, b) = connected_pair(&mut harness).await;

    harness
        .transport
        .send(
            &b.account_id().to_hex(),
            PeerMessage {
                sender: a.account_id().to_hex(),
                version: PROTOCOL_VERSION + 1,
                bytes: b"{}".to_vec(),
            },
        )
        .await
        .expect("inject");
    // Unparseable payloads on a matching version are dropped the same way.
    harness
        .transport
        .send(
            &b.account_id().to_hex(),
            PeerMessage {
                sender: a.account_id().to_hex(),
                version: PROTOCOL_VERSION,
                bytes: b"not json".to_vec(),
            },
        )
        .await
        .expect("inject");

    b.poll_once().await.expect("poll survives bad input");
    assert!(b.conversation(&a.account_id()).await.is_empty());

    a.shutdown();
    b.shutdown();
}

#[tokio::test]
async fn repolling_is_idempotent() {
    let mut harness = Harness::new();
    let (a, b) = connected_pair(&mut harness).await;
    let mut b_events = b.subscribe();

    a.send(text_to(&b, "once only")).await.expect("send");
    b.poll_once().await.expect("first poll");
    b.poll_once().await.expect("second poll");
    a.poll_once().await.expect("a first poll");
    a.poll_once().await.expect("a second poll");

    assert_eq!(b.conversation(&a.account_id()).await.len(), 1);
    let a_view = a.conversation(&b.account_id()).await;
    assert_eq!(a_view.len(), 1);
    assert_eq!(a_view[0].delivery_status, DeliveryStatus::Delivered);
    assert_eq!(a_view[0].acks.len(), 1);

    let first = timeout(Duration::from_secs(2), b_events.recv())
        .await
        .expect("timely")
        .expect("recv");
    assert!(matches!(first, SessionEvent::Message(_)));
    assert_eq!(b_events.try_recv().unwrap_err(), TryRecvError::Empty);

    a.shutdown();
    b.shutdown();
}

#[tokio::test]
async fn push_subscription_delivers_without_polling() {
    let mut harness = Harness::new();
    let (a, b) = connected_pair(&mut harness).await;
    let mut b_events = b.subscribe();
    harness
        .transport
        .set_offline(&b.account_id().to_hex(), true)
        .await;

    let id = a.send(text_to(&b, "pushed to you")).await.expect("send");

    // No explicit poll on the recipient; the push listener picks it up.
    let event = timeout(Duration::from_secs(2), b_events.recv())
        .await
        .expect("timely")
        .expect("recv");
    match event {
        SessionEvent::Message(message) => {
            assert_eq!(message.message_id, id);
            assert_eq!(message.body, "pushed to you");
        }
        other => panic!("unexpected event {:?}", other),
    }
    let b_view = b.conversation(&a.account_id()).await;
    assert_eq!(b_view.len(), 1);
    assert_eq!(b_view[0].content, "pushed to you");

    a.shutdown();
    b.shutdown();
}

#[tokio::test]
async fn duplicate_replica_copies_converge() {
    let mut harness = Harness::new();
    let (a, b) = connected_pair(&mut harness).await;
    let mut b_events = b.subscribe();
    harness
        .transport
        .set_offline(&b.account_id().to_hex(), true)
        .await;

    a.send(text_to(&b, "replicated")).await.expect("send");
    b.poll_once().await.expect("first poll");
    timeout(Duration::from_secs(2), b_events.recv())
        .await
        .expect("timely")
        .expect("recv");

    // A second device of the sender replays the same wire copy.
    let replica = harness
        .remote
        .pull(&b.account_id().to_hex(), 0)
        .await
        .expect("pull")
        .envelopes
        .into_iter()
        .find(|e| e.recipient == b.account_id().to_hex())
        .expect("wire copy");
    harness
        .remote
        .push(&b.account_id().to_hex(), replica)
        .await
        .expect("replay");
    b.poll_once().await.expect("second poll");

    let b_view = b.conversation(&a.account_id()).await;
    assert_eq!(b_view.len(), 1);
    assert_eq!(b_view[0].content, "replicated");
    assert_eq!(b_view[0].delivery_status, DeliveryStatus::Delivered);
    assert_eq!(b_events.try_recv().unwrap_err(), TryRecvError::Empty);

    a.shutdown();
    b.shutdown();
}

#[tokio::test]
async fn conversation_merges_all_messages_in_time_order() {
    let mut harness = Harness::new();
    let (a, b) = connected_pair(&mut harness).await;

    a.send(text_to(&b, "first")).await.expect("send");
    a.send(text_to(&b, "second")).await.expect("send");
    b.poll_once().await.expect("b poll");

    let b_view = b.conversation(&a.account_id()).await;
    assert_eq!(b_view.len(), 2);
    assert!(b_view[0].timestamp <= b_view[1].timestamp);
    let mut bodies: Vec<&str> = b_view.iter().map(|e| e.content.as_str()).collect();
    bodies.sort();
    assert_eq!(bodies, vec!["first", "second"]);
    assert!(b_view.iter().all(|e| e.delivery_status == DeliveryStatus::Delivered));

    a.shutdown();
    b.shutdown();
}
