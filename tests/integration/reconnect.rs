#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::missing_panics_doc,
    clippy::future_not_send
)]

//! Reconnect behavior against a real hub.
//!
//! Disconnects are produced with [`HubState::close_all_connections`], which
//! sends a Close frame down every socket. Outage tests dial a port nobody
//! listens on and start the hub there later.

use std::sync::Arc;
use std::time::Duration;

use wirechat::config::ReconnectConfig;
use wirechat::connection::{
    ChannelObserver, ConnectionEvent, ConnectionManager, ConnectionPhase, Endpoint, Identity,
};
use wirechat::session::{SessionCoordinator, SessionStatus, SessionUpdate};
use wirechat::transport::websocket::WsConnector;
use wirechat_hub::hub::{self, HubState};
use wirechat_proto::codec;
use wirechat_proto::message::{Message, UserId};

const ALICE: UserId = UserId::new(1);
const BOB: UserId = UserId::new(2);

fn fast_reconnect() -> ReconnectConfig {
    ReconnectConfig {
        initial_delay: Duration::from_millis(20),
        max_delay: Duration::from_millis(200),
        max_exponent: 8,
    }
}

async fn start_hub_at(addr: &str) -> Arc<HubState> {
    let state = Arc::new(HubState::new());
    hub::start_server_with_state(addr, Arc::clone(&state))
        .await
        .unwrap();
    state
}

/// A loopback port with nothing listening on it.
async fn free_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

async fn wait_for(
    session: &mut SessionCoordinator<WsConnector>,
    pred: impl Fn(&SessionUpdate) -> bool,
) -> SessionUpdate {
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

async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition never held");
}

#[tokio::test]
async fn session_reconnects_after_server_drops_link() {
    let port = free_port().await;
    let state = start_hub_at(&format!("127.0.0.1:{port}")).await;
    let endpoint = Endpoint::new("127.0.0.1").with_port(port);

    let mut alice =
        SessionCoordinator::new(Arc::new(WsConnector::new()), endpoint.clone(), fast_reconnect());
    alice.sign_in(Identity::user(ALICE)).unwrap();
    alice.select_peer(BOB);
    wait_for(&mut alice, |u| *u == SessionUpdate::Status(SessionStatus::Connected)).await;

    state.close_all_connections().await;

    wait_for(&mut alice, |u| *u == SessionUpdate::Status(SessionStatus::Disconnected)).await;
    let scheduled = wait_for(&mut alice, |u| matches!(u, SessionUpdate::Reconnecting { .. })).await;
    assert_eq!(
        scheduled,
        SessionUpdate::Reconnecting {
            attempt: 1,
            delay: Duration::from_millis(20),
        }
    );
    wait_for(&mut alice, |u| *u == SessionUpdate::Status(SessionStatus::Connected)).await;

    alice.send("still here").unwrap();
    wait_for(&mut alice, |u| matches!(u, SessionUpdate::Message { .. })).await;
    assert!(alice.timeline()[0].0.id.is_some());
}

#[tokio::test]
async fn frames_queued_during_outage_arrive_in_order() {
    let port = free_port().await;
    let endpoint = Endpoint::new("127.0.0.1").with_port(port);

    let manager = ConnectionManager::new(Arc::new(WsConnector::new()), fast_reconnect());
    let (observer, mut events) = ChannelObserver::new();
    manager.register(Arc::new(observer));
    manager.open(&endpoint, &Identity::user(ALICE)).unwrap();

    for body in ["first", "second", "third"] {
        manager.send(codec::encode(&Message::outbound(BOB, body)).unwrap());
    }

    // Let a couple of dial attempts fail before the hub comes up.
    let mut failures = 0;
    while failures < 2 {
        if let Some(ConnectionEvent::ReconnectScheduled { .. }) = events.recv().await {
            failures += 1;
        }
    }
    assert_eq!(manager.snapshot().pending, 3);

    let state = start_hub_at(&format!("127.0.0.1:{port}")).await;
    eventually(|| {
        let state = Arc::clone(&state);
        async move { state.log.len().await == 3 }
    })
    .await;

    let bodies: Vec<String> = state
        .log
        .between(ALICE, BOB, 10)
        .await
        .into_iter()
        .map(|r| r.body)
        .collect();
    assert_eq!(bodies, vec!["first", "second", "third"]);
    assert_eq!(manager.snapshot().pending, 0);
    assert_eq!(manager.snapshot().attempts, 0);

    manager.close();
    manager.closed().await;
}

#[tokio::test]
async fn close_during_outage_stops_dialing() {
    let port = free_port().await;
    let endpoint = Endpoint::new("127.0.0.1").with_port(port);

    let manager = ConnectionManager::new(Arc::new(WsConnector::new()), fast_reconnect());
    let (observer, mut events) = ChannelObserver::new();
    manager.register(Arc::new(observer));
    manager.open(&endpoint, &Identity::user(ALICE)).unwrap();

    loop {
        if let Some(ConnectionEvent::ReconnectScheduled { .. }) = events.recv().await {
            break;
        }
    }
    manager.send("dropped");
    manager.close();
    tokio::time::timeout(Duration::from_secs(5), manager.closed())
        .await
        .unwrap();

    let snapshot = manager.snapshot();
    assert_eq!(snapshot.phase, ConnectionPhase::ClosedFinal);
    assert_eq!(snapshot.pending, 0);

    // Nothing dials the port after close, so a hub started now stays idle.
    let state = start_hub_at(&format!("127.0.0.1:{port}")).await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(state.connection_count(ALICE).await, 0);
    assert!(state.log.is_empty().await);
}
