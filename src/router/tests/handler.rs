use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde_json::{Value, json};

use crate::clock::ServerClock;
use crate::config::ServerConfig;
use crate::library::{FileCleanup, NoSamples, SampleLibrary, StaticSampleLibrary};
use crate::router::event::Envelope;
use crate::router::handler::{ConnCtx, EventRouter};
use crate::session::registry::SessionRegistry;
use crate::testing::TestConn;
use crate::transport::TransportStats;
use crate::transport::server::reaper_pass;
use crate::types::Track;

/// File-cleanup collaborator that records what it was asked to remove.
#[derive(Debug, Default)]
struct RecordingCleanup {
    removed: StdMutex<Vec<String>>,
}

#[async_trait::async_trait]
impl FileCleanup for RecordingCleanup {
    async fn remove_upload(&self, filename: &str) {
        self.removed.lock().unwrap().push(filename.to_string());
    }
}

struct Fx {
    router: EventRouter,
    registry: Arc<SessionRegistry>,
    cleanup: Arc<RecordingCleanup>,
    dyn_cleanup: Arc<dyn FileCleanup>,
    clock: ServerClock,
    config: ServerConfig,
}

fn fx_with(config: ServerConfig, library: Arc<dyn SampleLibrary>) -> Fx {
    let clock = ServerClock::new();
    let registry = Arc::new(SessionRegistry::new(config.clone()));
    let cleanup = Arc::new(RecordingCleanup::default());
    let dyn_cleanup: Arc<dyn FileCleanup> = cleanup.clone() as Arc<dyn FileCleanup>;
    let router = EventRouter::new(
        Arc::clone(&registry),
        clock.clone(),
        config.clone(),
        library,
        Arc::clone(&dyn_cleanup),
        Arc::new(TransportStats::default()),
    );
    Fx {
        router,
        registry,
        cleanup,
        dyn_cleanup,
        clock,
        config,
    }
}

fn fx() -> Fx {
    fx_with(ServerConfig::default(), Arc::new(NoSamples))
}

struct Peer {
    conn: TestConn,
    ctx: ConnCtx,
}

fn peer(fx: &Fx, id: u64) -> Peer {
    let conn = TestConn::new(id);
    let ctx = ConnCtx::new(conn.handle.clone(), &fx.config);
    Peer { conn, ctx }
}

/// Dispatch one event with an ack and return the ack payload.
async fn send(fx: &Fx, peer: &mut Peer, event: &str, payload: Value) -> Value {
    let envelope = Envelope {
        event: event.to_string(),
        payload,
        ack: Some(1),
    };
    let received = fx.clock.now_wall_ms();
    let frame = fx
        .router
        .dispatch(&mut peer.ctx, envelope, received)
        .await
        .expect("expected an ack frame");
    let value: Value = serde_json::from_str(&frame).unwrap();
    assert_eq!(value["event"], "ack");
    value["payload"].clone()
}

async fn join(fx: &Fx, peer: &mut Peer, session: &str, client: &str) -> Value {
    send(
        fx,
        peer,
        "join_session",
        json!({ "session_id": session, "client_id": client }),
    )
    .await
}

fn assert_success(ack: &Value) {
    assert_eq!(ack["success"], true, "expected success, got {ack}");
}

// --- join & controller election ----------------------------------------

#[tokio::test]
async fn test_controller_election_on_cold_session() {
    let samples = vec![Track::new("/audio/uploads/samples/seed.mp3", "Seed")];
    let fx = fx_with(
        ServerConfig::default(),
        Arc::new(StaticSampleLibrary::new(samples)),
    );
    let mut alice = peer(&fx, 1);
    let mut bob = peer(&fx, 2);

    let ack = join(&fx, &mut alice, "blue-star-42", "alice").await;
    assert_success(&ack);
    assert_eq!(ack["controller_client_id"], "alice");
    assert!(!ack["queue"].as_array().unwrap().is_empty());

    let ack = join(&fx, &mut bob, "blue-star-42", "bob").await;
    assert_success(&ack);
    // A remains controller after B joins.
    assert_eq!(ack["controller_client_id"], "alice");
    assert_eq!(ack["controller_conn_id"], 1);

    // Both observe a clients_update carrying two members.
    for p in [&mut alice, &mut bob] {
        let updates = p.conn.drain_named("clients_update");
        let last = updates.last().expect("clients_update expected");
        assert_eq!(last["clients"].as_array().unwrap().len(), 2);
    }
}

#[tokio::test]
async fn test_join_rejects_malformed_identifiers() {
    let fx = fx();
    let mut alice = peer(&fx, 1);

    let ack = join(&fx, &mut alice, "bad session!", "alice").await;
    assert!(ack["error"].as_str().unwrap().contains("session id"));

    let ack = join(&fx, &mut alice, "ok-session", "no spaces allowed").await;
    assert!(ack["error"].as_str().unwrap().contains("client id"));

    let long_name = "n".repeat(65);
    let ack = send(
        &fx,
        &mut alice,
        "join_session",
        json!({ "session_id": "ok-session", "client_id": "alice", "display_name": long_name }),
    )
    .await;
    assert!(ack["error"].as_str().unwrap().contains("Display name"));
}

#[tokio::test]
async fn test_rejoin_from_new_connection_preserves_controller() {
    let fx = fx();
    let mut first = peer(&fx, 1);
    let mut second = peer(&fx, 9);

    join(&fx, &mut first, "s1", "alice").await;
    let ack = join(&fx, &mut second, "s1", "alice").await;

    assert_success(&ack);
    assert_eq!(ack["controller_client_id"], "alice");
    assert_eq!(ack["controller_conn_id"], 9);
    // The stale connection is told to go away.
    assert!(first.conn.shutdown_signalled());
}

// --- playback -----------------------------------------------------------

#[tokio::test]
async fn test_play_pause_ordering_and_versions() {
    let fx = fx();
    let mut alice = peer(&fx, 1);
    let mut bob = peer(&fx, 2);
    join(&fx, &mut alice, "s1", "alice").await;
    join(&fx, &mut bob, "s1", "bob").await;
    send(&fx, &mut alice, "add_to_queue", json!({"session_id": "s1", "url": "u1"})).await;
    bob.conn.drain_events();

    assert_success(&send(&fx, &mut alice, "play", json!({"session_id": "s1", "timestamp": 1000})).await);
    assert_success(&send(&fx, &mut alice, "pause", json!({"session_id": "s1", "timestamp": 3500})).await);

    let states = bob.conn.drain_named("sync_state");
    assert_eq!(states.len(), 2);
    assert!(states[0]["sync_version"].as_u64() < states[1]["sync_version"].as_u64());
    assert_eq!(states[1]["is_playing"], false);
    assert_eq!(states[1]["timestamp_ms"], 3500);
}

#[tokio::test]
async fn test_playback_from_listener_is_silently_dropped() {
    let fx = fx();
    let mut alice = peer(&fx, 1);
    let mut bob = peer(&fx, 2);
    join(&fx, &mut alice, "s1", "alice").await;
    join(&fx, &mut bob, "s1", "bob").await;
    alice.conn.drain_events();

    let ack = send(&fx, &mut bob, "play", json!({"session_id": "s1", "timestamp": 1000})).await;
    assert_success(&ack);
    assert!(alice.conn.drain_named("sync_state").is_empty());
}

#[tokio::test]
async fn test_seek_zero_on_empty_queue_still_syncs() {
    let fx = fx();
    let mut alice = peer(&fx, 1);
    join(&fx, &mut alice, "s1", "alice").await;
    alice.conn.drain_events();

    let ack = send(&fx, &mut alice, "seek", json!({"session_id": "s1", "timestamp": 0})).await;
    assert_success(&ack);
    let states = alice.conn.drain_named("sync_state");
    assert_eq!(states.len(), 1);
    assert_eq!(states[0]["timestamp_ms"], 0);
}

#[tokio::test]
async fn test_playback_rejects_negative_timestamp() {
    let fx = fx();
    let mut alice = peer(&fx, 1);
    join(&fx, &mut alice, "s1", "alice").await;

    let ack = send(&fx, &mut alice, "play", json!({"session_id": "s1", "timestamp": -5})).await;
    assert!(ack["error"].as_str().unwrap().contains("timestamp"));
}

#[tokio::test]
async fn test_track_change_appends_custom_track_once() {
    let fx = fx();
    let mut alice = peer(&fx, 1);
    let mut bob = peer(&fx, 2);
    join(&fx, &mut alice, "s1", "alice").await;
    join(&fx, &mut bob, "s1", "bob").await;
    bob.conn.drain_events();

    let ack = send(
        &fx,
        &mut alice,
        "track_change",
        json!({"session_id": "s1", "track": {"url": "u9", "title": "Nine"}}),
    )
    .await;
    assert_success(&ack);

    let events = bob.conn.drain_events();
    let names: Vec<&str> = events.iter().map(|(e, _)| e.as_str()).collect();
    assert_eq!(names.iter().filter(|n| **n == "sync_state").count(), 1);
    assert_eq!(names.iter().filter(|n| **n == "queue_update").count(), 1);
    let change = events
        .iter()
        .find(|(e, _)| e == "track_change")
        .map(|(_, p)| p)
        .unwrap();
    assert_eq!(change["idx"], 0);
    assert_eq!(change["track"]["url"], "u9");
}

// --- queue --------------------------------------------------------------

#[tokio::test]
async fn test_queue_duplicate_rejection() {
    let fx = fx();
    let mut alice = peer(&fx, 1);
    let mut bob = peer(&fx, 2);
    join(&fx, &mut alice, "s1", "alice").await;
    join(&fx, &mut bob, "s1", "bob").await;
    bob.conn.drain_events();

    let ack = send(&fx, &mut alice, "add_to_queue", json!({"session_id": "s1", "url": "u1"})).await;
    assert_success(&ack);
    let updates = bob.conn.drain_named("queue_update");
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0]["queue"].as_array().unwrap().len(), 1);

    // Same URL from another member: rejected, no broadcast.
    let ack = send(&fx, &mut bob, "add_to_queue", json!({"session_id": "s1", "url": "u1"})).await;
    assert_eq!(ack["error"], "Track already in queue");
    assert!(bob.conn.drain_named("queue_update").is_empty());
}

#[tokio::test]
async fn test_remove_from_queue_is_controller_only() {
    let fx = fx();
    let mut alice = peer(&fx, 1);
    let mut bob = peer(&fx, 2);
    join(&fx, &mut alice, "s1", "alice").await;
    join(&fx, &mut bob, "s1", "bob").await;
    send(&fx, &mut alice, "add_to_queue", json!({"session_id": "s1", "url": "u1"})).await;

    let ack = send(&fx, &mut bob, "remove_from_queue", json!({"session_id": "s1", "index": 0})).await;
    assert!(ack["error"].as_str().unwrap().contains("controller"));
}

#[tokio::test]
async fn test_remove_last_track_empties_queue_and_cleans_upload() {
    let fx = fx();
    let mut alice = peer(&fx, 1);
    join(&fx, &mut alice, "s1", "alice").await;
    send(
        &fx,
        &mut alice,
        "add_to_queue",
        json!({"session_id": "s1", "url": "/audio/uploads/my%20song.mp3"}),
    )
    .await;
    alice.conn.drain_events();

    let ack = send(&fx, &mut alice, "remove_from_queue", json!({"session_id": "s1", "index": 0})).await;
    assert_success(&ack);

    let changes = alice.conn.drain_named("track_change");
    assert_eq!(changes.len(), 1);
    assert!(changes[0]["idx"].is_null());
    assert!(changes[0]["track"].is_null());
    assert_eq!(changes[0]["reason"], "track_removed_queue_empty");

    assert_eq!(
        *fx.cleanup.removed.lock().unwrap(),
        vec!["my song.mp3".to_string()]
    );
}

// --- controller handover -------------------------------------------------

#[tokio::test]
async fn test_controller_transfer_by_approval() {
    let fx = fx();
    let mut alice = peer(&fx, 1);
    let mut bob = peer(&fx, 2);
    join(&fx, &mut alice, "s1", "alice").await;
    join(&fx, &mut bob, "s1", "bob").await;
    alice.conn.drain_events();
    bob.conn.drain_events();

    assert_success(&send(&fx, &mut bob, "request_controller", json!({"session_id": "s1"})).await);

    // The controller hears about the request directly.
    let received = alice.conn.drain_named("controller_request_received");
    assert_eq!(received.len(), 1);
    assert_eq!(received[0]["client_id"], "bob");
    bob.conn.drain_events();

    assert_success(
        &send(
            &fx,
            &mut alice,
            "approve_controller_request",
            json!({"session_id": "s1", "requesterClientId": "bob"}),
        )
        .await,
    );

    let events = bob.conn.drain_events();
    let change = events.iter().find(|(e, _)| e == "controller_change").unwrap();
    assert_eq!(change.1["controller_conn_id"], 2);
    assert_eq!(change.1["controller_client_id"], "bob");

    let client_change = events
        .iter()
        .find(|(e, _)| e == "controller_client_change")
        .unwrap();
    assert_eq!(client_change.1["controller_client_id"], "bob");

    let requests = events
        .iter()
        .find(|(e, _)| e == "controller_requests_update")
        .unwrap();
    assert!(requests.1["requests"].as_array().unwrap().is_empty());

    assert!(events.iter().any(|(e, _)| e == "sync_state"));
}

#[tokio::test]
async fn test_request_then_cancel_restores_pending_set() {
    let fx = fx();
    let mut alice = peer(&fx, 1);
    let mut bob = peer(&fx, 2);
    join(&fx, &mut alice, "s1", "alice").await;
    join(&fx, &mut bob, "s1", "bob").await;
    alice.conn.drain_events();

    send(&fx, &mut bob, "request_controller", json!({"session_id": "s1"})).await;
    send(&fx, &mut bob, "cancel_controller_request", json!({"session_id": "s1"})).await;

    let updates = alice.conn.drain_named("controller_requests_update");
    assert_eq!(updates.len(), 2);
    assert_eq!(updates[0]["requests"].as_array().unwrap().len(), 1);
    assert!(updates[1]["requests"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_request_from_controller_conflicts() {
    let fx = fx();
    let mut alice = peer(&fx, 1);
    join(&fx, &mut alice, "s1", "alice").await;

    let ack = send(&fx, &mut alice, "request_controller", json!({"session_id": "s1"})).await;
    assert!(ack["error"].as_str().unwrap().contains("already"));
}

#[tokio::test]
async fn test_offer_accept_flow() {
    let fx = fx();
    let mut alice = peer(&fx, 1);
    let mut bob = peer(&fx, 2);
    join(&fx, &mut alice, "s1", "alice").await;
    join(&fx, &mut bob, "s1", "bob").await;
    alice.conn.drain_events();
    bob.conn.drain_events();

    assert_success(
        &send(
            &fx,
            &mut alice,
            "offer_controller",
            json!({"session_id": "s1", "targetClientId": "bob"}),
        )
        .await,
    );

    let offers = bob.conn.drain_named("controller_offer_received");
    assert_eq!(offers.len(), 1);
    assert_eq!(offers[0]["offerer_client_id"], "alice");
    let sent = alice.conn.drain_named("controller_offer_sent");
    assert_eq!(sent.len(), 1);

    assert_success(
        &send(
            &fx,
            &mut bob,
            "accept_controller_offer",
            json!({"session_id": "s1", "offererClientId": "alice"}),
        )
        .await,
    );

    let change = alice
        .conn
        .drain_named("controller_change")
        .pop()
        .expect("controller_change expected");
    assert_eq!(change["controller_client_id"], "bob");
}

#[tokio::test]
async fn test_offer_decline_informs_offerer_only() {
    let fx = fx();
    let mut alice = peer(&fx, 1);
    let mut bob = peer(&fx, 2);
    let mut carol = peer(&fx, 3);
    join(&fx, &mut alice, "s1", "alice").await;
    join(&fx, &mut bob, "s1", "bob").await;
    join(&fx, &mut carol, "s1", "carol").await;
    alice.conn.drain_events();
    carol.conn.drain_events();

    send(&fx, &mut alice, "offer_controller", json!({"session_id": "s1", "targetClientId": "bob"})).await;
    assert_success(
        &send(&fx, &mut bob, "decline_controller_offer", json!({"session_id": "s1", "offererClientId": "alice"})).await,
    );

    let declined = alice.conn.drain_named("controller_offer_declined");
    assert_eq!(declined.len(), 1);
    assert_eq!(declined[0]["target_client_id"], "bob");
    assert!(carol.conn.drain_named("controller_offer_declined").is_empty());

    // Controller did not move.
    let snapshot = send(&fx, &mut bob, "sync_request", json!({"session_id": "s1"})).await;
    assert_eq!(snapshot["controller_client_id"], "alice");
}

#[tokio::test]
async fn test_stale_offer_is_rejected_after_controller_change() {
    let fx = fx();
    let mut alice = peer(&fx, 1);
    let mut bob = peer(&fx, 2);
    let mut carol = peer(&fx, 3);
    join(&fx, &mut alice, "s1", "alice").await;
    join(&fx, &mut bob, "s1", "bob").await;
    join(&fx, &mut carol, "s1", "carol").await;

    send(&fx, &mut alice, "offer_controller", json!({"session_id": "s1", "targetClientId": "bob"})).await;

    // Alice hands the role to carol before bob accepts.
    send(&fx, &mut carol, "request_controller", json!({"session_id": "s1"})).await;
    send(&fx, &mut alice, "approve_controller_request", json!({"session_id": "s1", "requesterClientId": "carol"})).await;

    let ack = send(&fx, &mut bob, "accept_controller_offer", json!({"session_id": "s1", "offererClientId": "alice"})).await;
    assert!(ack["error"].as_str().unwrap().contains("no longer valid"));
}

// --- chat ----------------------------------------------------------------

#[tokio::test]
async fn test_chat_rate_limit_trips_on_sixth_message() {
    let fx = fx();
    let mut alice = peer(&fx, 1);
    let mut bob = peer(&fx, 2);
    join(&fx, &mut alice, "s1", "alice").await;
    join(&fx, &mut bob, "s1", "bob").await;
    bob.conn.drain_events();

    for i in 0..5 {
        let ack = send(
            &fx,
            &mut alice,
            "chat_message",
            json!({"session_id": "s1", "message": format!("msg {i}")}),
        )
        .await;
        assert_success(&ack);
    }

    let ack = send(&fx, &mut alice, "chat_message", json!({"session_id": "s1", "message": "one too many"})).await;
    assert!(ack["error"].as_str().unwrap().contains("slow down"));

    assert_eq!(bob.conn.drain_named("chat_message").len(), 5);
}

#[tokio::test]
async fn test_chat_messages_are_sanitized() {
    let fx = fx();
    let mut alice = peer(&fx, 1);
    let mut bob = peer(&fx, 2);
    join(&fx, &mut alice, "s1", "alice").await;
    join(&fx, &mut bob, "s1", "bob").await;
    bob.conn.drain_events();

    send(&fx, &mut alice, "chat_message", json!({"session_id": "s1", "message": "<script>hi</script>"})).await;

    let messages = bob.conn.drain_named("chat_message");
    assert_eq!(messages[0]["message"], "&lt;script&gt;hi&lt;/script&gt;");
}

#[tokio::test]
async fn test_edit_and_delete_flow() {
    let fx = fx();
    let mut alice = peer(&fx, 1);
    let mut bob = peer(&fx, 2);
    join(&fx, &mut alice, "s1", "alice").await;
    join(&fx, &mut bob, "s1", "bob").await;

    let ack = send(&fx, &mut alice, "chat_message", json!({"session_id": "s1", "message": "original"})).await;
    let message_id = ack["message_id"].as_str().unwrap().to_string();
    bob.conn.drain_events();

    // Another member cannot edit.
    let ack = send(&fx, &mut bob, "edit_message", json!({"session_id": "s1", "messageId": message_id, "message": "hijack"})).await;
    assert!(ack["error"].as_str().unwrap().contains("sender"));

    assert_success(
        &send(&fx, &mut alice, "edit_message", json!({"session_id": "s1", "messageId": message_id, "message": "fixed"})).await,
    );
    let edited = bob.conn.drain_named("message_edited");
    assert_eq!(edited[0]["message"], "fixed");
    assert_eq!(edited[0]["edited"], true);

    assert_success(
        &send(&fx, &mut alice, "delete_message", json!({"session_id": "s1", "messageId": message_id})).await,
    );
    let deleted = bob.conn.drain_named("message_deleted");
    assert_eq!(deleted[0]["message_id"].as_str().unwrap(), message_id);
}

#[tokio::test]
async fn test_reactions_round_trip() {
    let fx = fx();
    let mut alice = peer(&fx, 1);
    let mut bob = peer(&fx, 2);
    join(&fx, &mut alice, "s1", "alice").await;
    join(&fx, &mut bob, "s1", "bob").await;

    let ack = send(&fx, &mut alice, "chat_message", json!({"session_id": "s1", "message": "react to me"})).await;
    let message_id = ack["message_id"].as_str().unwrap().to_string();
    alice.conn.drain_events();

    send(&fx, &mut bob, "emoji_reaction", json!({"session_id": "s1", "messageId": message_id, "emoji": "🔥"})).await;
    let updates = alice.conn.drain_named("message_reactions_updated");
    assert_eq!(updates[0]["reactions"]["🔥"], json!(["bob"]));

    send(&fx, &mut bob, "remove_emoji_reaction", json!({"session_id": "s1", "messageId": message_id, "emoji": "🔥"})).await;
    let updates = alice.conn.drain_named("message_reactions_updated");
    assert!(updates[0]["reactions"].as_object().unwrap().is_empty());
}

#[tokio::test]
async fn test_typing_excludes_sender() {
    let fx = fx();
    let mut alice = peer(&fx, 1);
    let mut bob = peer(&fx, 2);
    join(&fx, &mut alice, "s1", "alice").await;
    join(&fx, &mut bob, "s1", "bob").await;
    alice.conn.drain_events();
    bob.conn.drain_events();

    send(&fx, &mut alice, "typing", json!({"session_id": "s1"})).await;
    assert!(alice.conn.drain_named("user_typing").is_empty());
    let typing = bob.conn.drain_named("user_typing");
    assert_eq!(typing[0]["client_id"], "alice");

    send(&fx, &mut alice, "stop_typing", json!({"session_id": "s1"})).await;
    assert_eq!(bob.conn.drain_named("user_stop_typing").len(), 1);
}

// --- time sync & drift ---------------------------------------------------

#[tokio::test]
async fn test_time_sync_arithmetic() {
    let fx = fx();
    let mut alice = peer(&fx, 1);

    let ack = send(&fx, &mut alice, "time_sync", json!({"client_sent": 123_456})).await;
    assert_success(&ack);
    assert_eq!(ack["client_sent"], 123_456);
    let received = ack["server_received_ms"].as_u64().unwrap();
    let processed = ack["server_processed_ms"].as_u64().unwrap();
    assert!(processed >= received);
    assert!(ack["server_iso"].as_str().unwrap().contains('T'));
}

#[tokio::test]
async fn test_drift_report_feeds_snapshot() {
    let fx = fx();
    let mut alice = peer(&fx, 1);
    join(&fx, &mut alice, "s1", "alice").await;

    let now = fx.clock.now_wall_ms();
    assert_success(
        &send(
            &fx,
            &mut alice,
            "drift_report",
            json!({"session_id": "s1", "clientId": "alice", "drift_s": 0.05, "wall_ms": now}),
        )
        .await,
    );

    let snapshot = send(&fx, &mut alice, "sync_request", json!({"session_id": "s1"})).await;
    let drift = snapshot["drift"].as_f64().unwrap();
    assert!((drift - 0.05).abs() < 1e-9);
    assert!(snapshot["sync_version"].is_u64());
}

#[tokio::test]
async fn test_drift_report_identity_must_match() {
    let fx = fx();
    let mut alice = peer(&fx, 1);
    join(&fx, &mut alice, "s1", "alice").await;

    let ack = send(
        &fx,
        &mut alice,
        "drift_report",
        json!({"session_id": "s1", "clientId": "mallory", "drift_s": 0.0, "wall_ms": 1}),
    )
    .await;
    assert!(ack["error"].as_str().unwrap().contains("client_id"));
}

// --- signaling -----------------------------------------------------------

#[tokio::test]
async fn test_peer_signaling_relays_verbatim() {
    let fx = fx();
    let mut alice = peer(&fx, 1);
    let mut bob = peer(&fx, 2);
    join(&fx, &mut alice, "s1", "alice").await;
    join(&fx, &mut bob, "s1", "bob").await;
    bob.conn.drain_events();

    let payload = json!({"to": "bob", "sdp": "offer-sdp", "extra": {"nested": true}});
    assert_success(&send(&fx, &mut alice, "peer-offer", payload.clone()).await);

    let relayed = bob.conn.drain_named("peer-offer");
    assert_eq!(relayed.len(), 1);
    assert_eq!(relayed[0], payload);
}

#[tokio::test]
async fn test_peer_signaling_to_unknown_target() {
    let fx = fx();
    let mut alice = peer(&fx, 1);
    join(&fx, &mut alice, "s1", "alice").await;

    let ack = send(&fx, &mut alice, "peer-answer", json!({"to": "ghost"})).await;
    assert!(ack["error"].as_str().unwrap().contains("not connected"));
}

// --- lifecycle -----------------------------------------------------------

#[tokio::test]
async fn test_controller_disconnect_unbinds_and_announces() {
    let fx = fx();
    let mut alice = peer(&fx, 1);
    let mut bob = peer(&fx, 2);
    join(&fx, &mut alice, "s1", "alice").await;
    join(&fx, &mut bob, "s1", "bob").await;
    bob.conn.drain_events();

    fx.router.handle_disconnect(&mut alice.ctx).await;

    let events = bob.conn.drain_events();
    let change = events.iter().find(|(e, _)| e == "controller_change").unwrap();
    assert!(change.1["controller_conn_id"].is_null());
    assert!(events.iter().any(|(e, _)| e == "sync_state"));
    let clients = events.iter().find(|(e, _)| e == "clients_update").unwrap();
    assert_eq!(clients.1["clients"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_last_leave_destroys_session_and_cleans_uploads() {
    let fx = fx();
    let mut alice = peer(&fx, 1);
    join(&fx, &mut alice, "s1", "alice").await;
    send(
        &fx,
        &mut alice,
        "add_to_queue",
        json!({"session_id": "s1", "url": "/audio/uploads/last%20one.mp3"}),
    )
    .await;

    assert_success(&send(&fx, &mut alice, "leave_session", json!({})).await);

    let session_id = crate::types::SessionId::parse("s1").unwrap();
    assert!(fx.registry.get(&session_id).await.is_none());
    assert_eq!(
        *fx.cleanup.removed.lock().unwrap(),
        vec!["last one.mp3".to_string()]
    );
}

#[tokio::test]
async fn test_joiner_receives_chat_history_and_reactions() {
    let fx = fx();
    let mut alice = peer(&fx, 1);
    join(&fx, &mut alice, "s1", "alice").await;
    let ack = send(&fx, &mut alice, "chat_message", json!({"session_id": "s1", "message": "hello"})).await;
    let message_id = ack["message_id"].as_str().unwrap().to_string();
    send(&fx, &mut alice, "emoji_reaction", json!({"session_id": "s1", "messageId": message_id, "emoji": "🔥"})).await;

    let mut bob = peer(&fx, 2);
    join(&fx, &mut bob, "s1", "bob").await;

    let events = bob.conn.drain_events();
    let history = events.iter().find(|(e, _)| e == "chat_history").unwrap();
    assert_eq!(history.1["messages"].as_array().unwrap().len(), 1);
    assert!(events.iter().any(|(e, _)| e == "message_reactions_updated"));
    assert!(events.iter().any(|(e, _)| e == "queue_update"));
}

#[tokio::test]
async fn test_unknown_event_acks_invalid_argument() {
    let fx = fx();
    let mut alice = peer(&fx, 1);
    let ack = send(&fx, &mut alice, "warp_speed", json!({})).await;
    assert!(ack["error"].as_str().unwrap().contains("Unknown event"));
}

#[tokio::test]
async fn test_events_require_membership() {
    let fx = fx();
    let mut alice = peer(&fx, 1);

    let ack = send(&fx, &mut alice, "play", json!({"session_id": "s1", "timestamp": 0})).await;
    assert!(ack["error"].as_str().unwrap().contains("Join a session"));
}

#[tokio::test]
async fn test_reaper_closes_expired_sessions() {
    let config = ServerConfig {
        session_ttl: Duration::from_millis(50),
        ..ServerConfig::default()
    };
    let fx = fx_with(config, Arc::new(NoSamples));
    let mut alice = peer(&fx, 1);
    join(&fx, &mut alice, "s1", "alice").await;
    send(
        &fx,
        &mut alice,
        "add_to_queue",
        json!({"session_id": "s1", "url": "/audio/uploads/stale.mp3"}),
    )
    .await;
    alice.conn.drain_events();

    let far_future = fx.clock.now_wall_ms() + 60_000;
    reaper_pass(&fx.registry, &fx.dyn_cleanup, far_future).await;

    let closed = alice.conn.drain_named("session_closed");
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0]["session_id"], "s1");
    assert!(alice.conn.shutdown_signalled());

    let session_id = crate::types::SessionId::parse("s1").unwrap();
    assert!(fx.registry.get(&session_id).await.is_none());
    assert_eq!(
        *fx.cleanup.removed.lock().unwrap(),
        vec!["stale.mp3".to_string()]
    );
}

#[tokio::test]
async fn test_reaper_sweeps_expired_controller_requests() {
    let config = ServerConfig {
        request_ttl: Duration::from_millis(10),
        ..ServerConfig::default()
    };
    let fx = fx_with(config, Arc::new(NoSamples));
    let mut alice = peer(&fx, 1);
    let mut bob = peer(&fx, 2);
    join(&fx, &mut alice, "s1", "alice").await;
    join(&fx, &mut bob, "s1", "bob").await;
    send(&fx, &mut bob, "request_controller", json!({"session_id": "s1"})).await;
    alice.conn.drain_events();

    let later = fx.clock.now_wall_ms() + 60_000;
    reaper_pass(&fx.registry, &fx.dyn_cleanup, later).await;

    let updates = alice.conn.drain_named("controller_requests_update");
    assert_eq!(updates.len(), 1);
    assert!(updates[0]["requests"].as_array().unwrap().is_empty());
}
