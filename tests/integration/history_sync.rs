#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::missing_panics_doc,
    clippy::future_not_send
)]

//! History loading and its reconciliation with live traffic.

use std::sync::Arc;
use std::time::Duration;

use wirechat::api::{ApiError, ChatApi, RestClient};
use wirechat::chat::{Applied, DeliveryState};
use wirechat::config::ReconnectConfig;
use wirechat::connection::{Endpoint, Identity};
use wirechat::session::{SessionCoordinator, SessionStatus, SessionUpdate};
use wirechat::transport::websocket::WsConnector;
use wirechat_hub::hub::{self, HubState};
use wirechat_proto::message::{Message, UserId};

const ALICE: UserId = UserId::new(1);
const BOB: UserId = UserId::new(2);
const CAROL: UserId = UserId::new(3);

type Session = SessionCoordinator<WsConnector>;

async fn start_hub() -> (Endpoint, Arc<HubState>) {
    let state = Arc::new(HubState::new());
    let (addr, _handle) = hub::start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .unwrap();
    (Endpoint::new("127.0.0.1").with_port(addr.port()), state)
}

fn session(endpoint: &Endpoint, identity: Identity) -> Session {
    let mut session = SessionCoordinator::new(
        Arc::new(WsConnector::new()),
        endpoint.clone(),
        ReconnectConfig::default(),
    );
    session.sign_in(identity).unwrap();
    session
}

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

async fn seed(state: &HubState, exchange: &[(UserId, UserId, &str)]) -> Vec<Message> {
    let mut stored = Vec::new();
    for (from, to, body) in exchange {
        stored.push(state.log.append(&Message::provisional(*from, *to, *body)).await);
    }
    stored
}

#[tokio::test]
async fn history_fills_the_selected_timeline() {
    let (endpoint, state) = start_hub().await;
    let stored = seed(
        &state,
        &[
            (ALICE, BOB, "hi bob"),
            (BOB, ALICE, "hi alice"),
            (ALICE, CAROL, "not for bob"),
        ],
    )
    .await;
    state.log.mark_delivered(stored[0].id.unwrap()).await;

    let api = RestClient::for_endpoint(&endpoint, None).unwrap();
    let mut alice = session(&endpoint, Identity::user(ALICE));
    alice.select_peer(BOB);

    let history = alice.refresh_history(&api).await.unwrap();
    let bodies: Vec<&str> = history.iter().map(|m| m.body.as_str()).collect();
    assert_eq!(bodies, vec!["hi bob", "hi alice"]);

    let timeline = alice.timeline();
    assert_eq!(timeline[0].1, DeliveryState::Delivered);
    assert_eq!(timeline[1].0.from, Some(BOB));
    assert_eq!(timeline[1].1, DeliveryState::Sent);
}

#[tokio::test]
async fn history_reload_keeps_live_message_once() {
    let (endpoint, state) = start_hub().await;
    let api = RestClient::for_endpoint(&endpoint, None).unwrap();

    let mut alice = session(&endpoint, Identity::user(ALICE));
    alice.select_peer(BOB);
    let mut bob = session(&endpoint, Identity::user(BOB));
    bob.select_peer(ALICE);
    wait_for(&mut alice, |u| *u == SessionUpdate::Status(SessionStatus::Connected)).await;
    wait_for(&mut bob, |u| *u == SessionUpdate::Status(SessionStatus::Connected)).await;
    tokio::time::timeout(Duration::from_secs(5), async {
        while state.connection_count(ALICE).await == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    bob.send("ping").unwrap();
    wait_for(&mut alice, |u| {
        *u == SessionUpdate::Message {
            peer: Some(BOB),
            applied: Applied::Appended,
        }
    })
    .await;

    // Reloading history after the live copy arrived must not duplicate it.
    let live_id = alice.timeline()[0].0.id;
    alice.refresh_history(&api).await.unwrap();
    let timeline = alice.timeline();
    assert_eq!(timeline.len(), 1);
    assert_eq!(timeline[0].0.id, live_id);
}

#[tokio::test]
async fn token_identity_resolves_user_and_peers() {
    let (endpoint, state) = start_hub().await;
    state.directory.add_user(ALICE, "alice").await;
    state.directory.add_user(BOB, "bob").await;
    let token = state.directory.issue_token(ALICE).await;

    let api = RestClient::for_endpoint(&endpoint, Some(token.clone())).unwrap();
    let mut alice = session(&endpoint, Identity::token(token));
    assert_eq!(alice.local_user(), None);

    assert_eq!(alice.resolve_local_user(&api).await.unwrap(), ALICE);
    assert_eq!(alice.local_user(), Some(ALICE));

    let peers = alice.list_peers(&api).await;
    let names: Vec<&str> = peers.iter().map(|u| u.name.as_str()).collect();
    assert_eq!(names, vec!["bob"]);

    wait_for(&mut alice, |u| *u == SessionUpdate::Status(SessionStatus::Connected)).await;
    assert_eq!(state.connection_count(ALICE).await, 1);
}

#[tokio::test]
async fn rest_errors_surface_status_and_message() {
    let (endpoint, _state) = start_hub().await;
    let api = RestClient::for_endpoint(&endpoint, Some("bogus".into())).unwrap();

    match api.current_user().await {
        Err(ApiError::Status { status, message }) => {
            assert_eq!(status, 401);
            assert!(message.contains("unauthorized"));
        }
        other => panic!("expected a 401, got {other:?}"),
    }
}

#[tokio::test]
async fn unreachable_history_leaves_timeline_alone() {
    let (endpoint, _state) = start_hub().await;
    let dead = RestClient::for_endpoint(&Endpoint::new("127.0.0.1").with_port(1), None).unwrap();
    let mut alice = session(&endpoint, Identity::user(ALICE));
    alice.select_peer(BOB);
    wait_for(&mut alice, |u| *u == SessionUpdate::Status(SessionStatus::Connected)).await;

    alice.send("kept").unwrap();
    assert!(alice.refresh_history(&dead).await.unwrap().is_empty());
    assert_eq!(alice.timeline().len(), 1);
    assert_eq!(alice.timeline()[0].0.body, "kept");
}
