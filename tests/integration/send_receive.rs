#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::missing_panics_doc,
    clippy::future_not_send
)]

//! Two clients exchanging messages through an in-process hub.

use std::sync::Arc;
use std::time::Duration;

use wirechat::chat::{Applied, DeliveryState};
use wirechat::config::ReconnectConfig;
use wirechat::connection::{Endpoint, Identity};
use wirechat::session::{SessionCoordinator, SessionStatus, SessionUpdate};
use wirechat::transport::websocket::WsConnector;
use wirechat_hub::hub::{self, HubState};
use wirechat_proto::message::UserId;

const ALICE: UserId = UserId::new(1);
const BOB: UserId = UserId::new(2);

type Session = SessionCoordinator<WsConnector>;

async fn start_hub() -> (Endpoint, Arc<HubState>) {
    let state = Arc::new(HubState::new());
    let (addr, _handle) = hub::start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .unwrap();
    (Endpoint::new("127.0.0.1").with_port(addr.port()), state)
}

fn session(endpoint: &Endpoint, user: UserId, peer: UserId) -> Session {
    let mut session = SessionCoordinator::new(
        Arc::new(WsConnector::new()),
        endpoint.clone(),
        ReconnectConfig::default(),
    );
    session.sign_in(Identity::user(user)).unwrap();
    session.select_peer(peer);
    session
}

/// Pump updates until `pred` matches one, failing after five seconds.
async fn wait_for(session: &mut Session, pred: impl Fn(&SessionUpdate) -> bool) -> SessionUpdate {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let update = session.next_update().await.expect("event stream ended");
            if pred(&update) {
                return update;
            }
        }
    })
    .await
    .expect("timed out waiting for session update")
}

async fn connected(session: &mut Session) {
    wait_for(session, |u| *u == SessionUpdate::Status(SessionStatus::Connected)).await;
}

async fn registered(state: &HubState, user: UserId) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while state.connection_count(user).await == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("user never registered with the hub");
}

#[tokio::test]
async fn message_reaches_peer_and_is_acknowledged() {
    let (endpoint, state) = start_hub().await;
    let mut alice = session(&endpoint, ALICE, BOB);
    let mut bob = session(&endpoint, BOB, ALICE);
    connected(&mut alice).await;
    connected(&mut bob).await;
    registered(&state, BOB).await;

    let provisional = alice.send("hello bob").unwrap();
    assert_eq!(provisional.id, None);
    assert_eq!(alice.timeline()[0].1, DeliveryState::Pending);

    let update = wait_for(&mut bob, |u| matches!(u, SessionUpdate::Message { .. })).await;
    assert_eq!(
        update,
        SessionUpdate::Message {
            peer: Some(ALICE),
            applied: Applied::Appended,
        }
    );
    let bob_view = bob.timeline();
    assert_eq!(bob_view.len(), 1);
    assert_eq!(bob_view[0].0.body, "hello bob");
    assert_eq!(bob_view[0].0.from, Some(ALICE));
    assert!(bob_view[0].0.id.is_some());

    let reconciled = wait_for(&mut alice, |u| matches!(u, SessionUpdate::Message { .. })).await;
    assert_eq!(
        reconciled,
        SessionUpdate::Message {
            peer: Some(BOB),
            applied: Applied::Reconciled,
        }
    );
    wait_for(&mut alice, |u| matches!(u, SessionUpdate::Delivered(_))).await;

    let alice_view = alice.timeline();
    assert_eq!(alice_view.len(), 1, "provisional copy must be replaced, not duplicated");
    assert_eq!(alice_view[0].0.id, bob_view[0].0.id);
    assert_eq!(alice_view[0].1, DeliveryState::Delivered);
}

#[tokio::test]
async fn conversation_keeps_order_in_both_directions() {
    let (endpoint, state) = start_hub().await;
    let mut alice = session(&endpoint, ALICE, BOB);
    let mut bob = session(&endpoint, BOB, ALICE);
    connected(&mut alice).await;
    connected(&mut bob).await;
    registered(&state, ALICE).await;
    registered(&state, BOB).await;

    alice.send("one").unwrap();
    wait_for(&mut bob, |u| matches!(u, SessionUpdate::Message { .. })).await;
    bob.send("two").unwrap();
    wait_for(&mut alice, |u| {
        *u == SessionUpdate::Message {
            peer: Some(BOB),
            applied: Applied::Appended,
        }
    })
    .await;

    let bodies: Vec<String> = alice.timeline().into_iter().map(|(m, _)| m.body).collect();
    assert_eq!(bodies, vec!["one", "two"]);
}

#[tokio::test]
async fn send_before_open_is_flushed_on_connect() {
    let (endpoint, state) = start_hub().await;
    let mut bob = session(&endpoint, BOB, ALICE);
    connected(&mut bob).await;
    registered(&state, BOB).await;

    let mut alice = session(&endpoint, ALICE, BOB);
    alice.send("early").unwrap();

    wait_for(&mut bob, |u| matches!(u, SessionUpdate::Message { .. })).await;
    assert_eq!(bob.timeline()[0].0.body, "early");
    wait_for(&mut alice, |u| matches!(u, SessionUpdate::Delivered(_))).await;
}

#[tokio::test]
async fn offline_peer_leaves_message_sent_but_not_delivered() {
    let (endpoint, state) = start_hub().await;
    let mut alice = session(&endpoint, ALICE, BOB);
    connected(&mut alice).await;

    alice.send("anyone there?").unwrap();
    wait_for(&mut alice, |u| matches!(u, SessionUpdate::Message { .. })).await;

    assert_eq!(alice.timeline()[0].1, DeliveryState::Sent);
    let history = state.log.between(ALICE, BOB, 10).await;
    assert_eq!(history.len(), 1);
    assert!(!history[0].delivered);
}
