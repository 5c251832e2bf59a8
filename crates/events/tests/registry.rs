//! Tests for `ConnectionRegistry`.
//!
//! These exercise registration bookkeeping and per-user fan-out directly,
//! using in-process channels and a handle that always fails.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use docpipe_events::{ChannelHandle, ConnectionRegistry, DeliveryError, Frame};

/// A channel whose client has gone away.
struct BrokenHandle {
    attempts: AtomicUsize,
}

impl BrokenHandle {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            attempts: AtomicUsize::new(0),
        })
    }
}

impl ChannelHandle for BrokenHandle {
    fn push(&self, _frame: Frame) -> Result<(), DeliveryError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(DeliveryError::ChannelClosed)
    }
}

fn text(s: &str) -> Frame {
    Frame::Text(s.to_string())
}

// ---------------------------------------------------------------------------
// Test: new registry starts empty
// ---------------------------------------------------------------------------

#[tokio::test]
async fn new_registry_is_empty() {
    let registry = ConnectionRegistry::new();

    assert_eq!(registry.connection_count().await, 0);
    assert_eq!(registry.count_for_user("u1").await, 0);
}

// ---------------------------------------------------------------------------
// Test: register then unregister leaves no trace of the user
// ---------------------------------------------------------------------------

#[tokio::test]
async fn register_then_unregister_clears_user() {
    let registry = ConnectionRegistry::new();

    let _rx = registry.connect("c1", "u1").await;
    assert_eq!(registry.count_for_user("u1").await, 1);
    assert!(registry.connected_at("c1").await.is_some());

    registry.unregister("c1").await;
    assert_eq!(registry.count_for_user("u1").await, 0);
    assert_eq!(registry.connection_count().await, 0);
    assert!(registry.connected_at("c1").await.is_none());
}

// ---------------------------------------------------------------------------
// Test: unregister with unknown id is a no-op
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unregister_unknown_id_is_noop() {
    let registry = ConnectionRegistry::new();

    let _rx = registry.connect("c1", "u1").await;
    registry.unregister("nonexistent").await;

    assert_eq!(registry.connection_count().await, 1);
}

// ---------------------------------------------------------------------------
// Test: re-registering the same id does not duplicate it
// ---------------------------------------------------------------------------

#[tokio::test]
async fn reregistration_keeps_count_constant() {
    let registry = ConnectionRegistry::new();

    let mut old_rx = registry.connect("c1", "u1").await;
    let mut new_rx = registry.connect("c1", "u1").await;

    assert_eq!(registry.count_for_user("u1").await, 1);
    assert_eq!(registry.connection_count().await, 1);

    // Only the replacement handle receives.
    assert_eq!(registry.send_to_user("u1", text("hi")).await, 1);
    assert_eq!(new_rx.try_recv().unwrap(), text("hi"));
    assert!(old_rx.try_recv().is_err());
}

// ---------------------------------------------------------------------------
// Test: re-registering under a different user moves the connection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn reregistration_moves_connection_between_users() {
    let registry = ConnectionRegistry::new();

    let _old = registry.connect("c1", "u1").await;
    let _new = registry.connect("c1", "u2").await;

    assert_eq!(registry.count_for_user("u1").await, 0);
    assert_eq!(registry.count_for_user("u2").await, 1);
    assert_eq!(registry.connection_count().await, 1);
}

// ---------------------------------------------------------------------------
// Test: send_to_user reaches every channel of that user only
// ---------------------------------------------------------------------------

#[tokio::test]
async fn send_to_user_fans_out_to_all_user_channels() {
    let registry = ConnectionRegistry::new();

    let mut a1 = registry.connect("a1", "alice").await;
    let mut a2 = registry.connect("a2", "alice").await;
    let mut b1 = registry.connect("b1", "bob").await;

    let delivered = registry.send_to_user("alice", text("update")).await;

    assert_eq!(delivered, 2);
    assert_eq!(a1.try_recv().unwrap(), text("update"));
    assert_eq!(a2.try_recv().unwrap(), text("update"));
    assert!(b1.try_recv().is_err());
}

// ---------------------------------------------------------------------------
// Test: send_to_user for a user without channels is a no-op
// ---------------------------------------------------------------------------

#[tokio::test]
async fn send_to_unknown_user_is_noop() {
    let registry = ConnectionRegistry::new();

    assert_eq!(registry.send_to_user("ghost", text("x")).await, 0);
    assert_eq!(registry.connection_count().await, 0);
}

// ---------------------------------------------------------------------------
// Test: a broken channel is removed and the healthy one still receives
// ---------------------------------------------------------------------------

#[tokio::test]
async fn broken_channel_is_removed_without_blocking_others() {
    let registry = ConnectionRegistry::new();

    let broken = BrokenHandle::new();
    registry.register("dead", "u1", broken.clone()).await;
    let mut healthy = registry.connect("live", "u1").await;

    let delivered = registry.send_to_user("u1", text("event")).await;

    assert_eq!(delivered, 1);
    assert_eq!(healthy.try_recv().unwrap(), text("event"));
    assert_eq!(broken.attempts.load(Ordering::SeqCst), 1);
    assert_eq!(registry.count_for_user("u1").await, 1);
    assert!(registry.connected_at("dead").await.is_none());

    // The dead channel is not retried.
    registry.send_to_user("u1", text("again")).await;
    assert_eq!(broken.attempts.load(Ordering::SeqCst), 1);
}

// ---------------------------------------------------------------------------
// Test: a dropped receiver counts as a broken channel
// ---------------------------------------------------------------------------

#[tokio::test]
async fn dropped_receiver_is_cleaned_up() {
    let registry = ConnectionRegistry::new();

    let rx = registry.connect("c1", "u1").await;
    drop(rx);

    assert_eq!(registry.send_to_user("u1", text("x")).await, 0);
    assert_eq!(registry.count_for_user("u1").await, 0);
}

// ---------------------------------------------------------------------------
// Test: ping_all reaches every connection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ping_all_reaches_everyone() {
    let registry = ConnectionRegistry::new();

    let mut rx1 = registry.connect("c1", "u1").await;
    let mut rx2 = registry.connect("c2", "u2").await;

    registry.ping_all().await;

    assert_eq!(rx1.try_recv().unwrap(), Frame::Ping);
    assert_eq!(rx2.try_recv().unwrap(), Frame::Ping);
}

// ---------------------------------------------------------------------------
// Test: shutdown_all() sends Close and clears all connections
// ---------------------------------------------------------------------------

#[tokio::test]
async fn shutdown_all_sends_close_and_clears() {
    let registry = ConnectionRegistry::new();

    let mut rx1 = registry.connect("c1", "u1").await;
    let mut rx2 = registry.connect("c2", "u1").await;

    registry.shutdown_all().await;

    assert_eq!(registry.connection_count().await, 0);
    assert_eq!(registry.count_for_user("u1").await, 0);
    assert_eq!(rx1.recv().await, Some(Frame::Close));
    assert_eq!(rx2.recv().await, Some(Frame::Close));
}

// ---------------------------------------------------------------------------
// Test: concurrent churn leaves both indexes consistent
// ---------------------------------------------------------------------------

#[tokio::test]
async fn concurrent_register_and_unregister_stay_consistent() {
    let registry = Arc::new(ConnectionRegistry::new());

    let mut handles = Vec::new();
    for i in 0..32 {
        let registry = Arc::clone(&registry);
        handles.push(tokio::spawn(async move {
            let conn_id = format!("c{i}");
            let _rx = registry.connect(conn_id.clone(), "u1").await;
            registry.send_to_user("u1", Frame::Ping).await;
            if i % 2 == 0 {
                registry.unregister(&conn_id).await;
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    // Odd connections dropped their receivers; one send purges them.
    registry.send_to_user("u1", Frame::Ping).await;
    assert_eq!(registry.count_for_user("u1").await, 0);
    assert_eq!(registry.connection_count().await, 0);
}
