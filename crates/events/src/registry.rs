//! Per-user registry of live delivery channels.
//!
//! A user may hold any number of connections (browser tabs, devices); a
//! connection belongs to exactly one user. Both indexes live behind a single
//! lock so a connection is never visible in one map but not the other.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use docpipe_core::types::{ConnectionId, Timestamp, UserId};
use tokio::sync::{mpsc, RwLock};

/// A frame queued for a client connection.
///
/// Transport-neutral; the WebSocket layer maps each variant onto its own
/// message type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Ping,
    Close,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("Delivery channel closed")]
    ChannelClosed,
}

/// Push side of a client connection.
///
/// Implementations must not block: a push either queues the frame or fails.
pub trait ChannelHandle: Send + Sync {
    fn push(&self, frame: Frame) -> Result<(), DeliveryError>;
}

impl ChannelHandle for mpsc::UnboundedSender<Frame> {
    fn push(&self, frame: Frame) -> Result<(), DeliveryError> {
        self.send(frame).map_err(|_| DeliveryError::ChannelClosed)
    }
}

struct Entry {
    user_id: UserId,
    handle: Arc<dyn ChannelHandle>,
    connected_at: Timestamp,
}

#[derive(Default)]
struct RegistryState {
    connections: HashMap<ConnectionId, Entry>,
    by_user: HashMap<UserId, HashSet<ConnectionId>>,
}

impl RegistryState {
    fn detach(&mut self, conn_id: &str) -> Option<Entry> {
        let entry = self.connections.remove(conn_id)?;
        if let Some(set) = self.by_user.get_mut(&entry.user_id) {
            set.remove(conn_id);
            if set.is_empty() {
                self.by_user.remove(&entry.user_id);
            }
        }
        Some(entry)
    }
}

/// Manages all live delivery channels, indexed by connection and by user.
///
/// Designed to be wrapped in `Arc` and shared across the application.
pub struct ConnectionRegistry {
    state: RwLock<RegistryState>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
        }
    }

    /// Register `handle` as connection `conn_id` of `user_id`.
    ///
    /// Re-registering an existing id replaces its handle (and moves it to the
    /// new user if that changed) without duplicating the user's entry.
    pub async fn register(
        &self,
        conn_id: impl Into<ConnectionId>,
        user_id: impl Into<UserId>,
        handle: Arc<dyn ChannelHandle>,
    ) {
        let conn_id = conn_id.into();
        let user_id = user_id.into();

        let mut state = self.state.write().await;
        state.detach(&conn_id);
        state
            .by_user
            .entry(user_id.clone())
            .or_default()
            .insert(conn_id.clone());
        state.connections.insert(
            conn_id,
            Entry {
                user_id,
                handle,
                connected_at: chrono::Utc::now(),
            },
        );
    }

    /// Register a fresh unbounded channel and return its receiving half.
    pub async fn connect(
        &self,
        conn_id: impl Into<ConnectionId>,
        user_id: impl Into<UserId>,
    ) -> mpsc::UnboundedReceiver<Frame> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.register(conn_id, user_id, Arc::new(tx)).await;
        rx
    }

    /// Remove a connection. Unknown ids are a no-op.
    pub async fn unregister(&self, conn_id: &str) {
        self.state.write().await.detach(conn_id);
    }

    /// Push `frame` to every channel of `user_id`.
    ///
    /// Channels that fail are unregistered; the rest still receive the frame.
    /// Returns the number of successful pushes.
    pub async fn send_to_user(&self, user_id: &str, frame: Frame) -> usize {
        let mut delivered = 0;
        let mut failed: Vec<(ConnectionId, Arc<dyn ChannelHandle>)> = Vec::new();

        {
            let state = self.state.read().await;
            let Some(conn_ids) = state.by_user.get(user_id) else {
                return 0;
            };
            for conn_id in conn_ids {
                let Some(entry) = state.connections.get(conn_id) else {
                    continue;
                };
                match entry.handle.push(frame.clone()) {
                    Ok(()) => delivered += 1,
                    Err(e) => {
                        tracing::debug!(
                            conn_id = %conn_id,
                            user_id = %user_id,
                            error = %e,
                            "Dropping dead connection",
                        );
                        failed.push((conn_id.clone(), Arc::clone(&entry.handle)));
                    }
                }
            }
        }

        if !failed.is_empty() {
            let mut state = self.state.write().await;
            for (conn_id, handle) in failed {
                // The id may have been re-registered with a live handle since.
                let still_same = state
                    .connections
                    .get(&conn_id)
                    .is_some_and(|entry| Arc::ptr_eq(&entry.handle, &handle));
                if still_same {
                    state.detach(&conn_id);
                }
            }
        }

        delivered
    }

    /// Total number of registered connections.
    pub async fn connection_count(&self) -> usize {
        self.state.read().await.connections.len()
    }

    /// Number of connections registered for `user_id`.
    pub async fn count_for_user(&self, user_id: &str) -> usize {
        self.state
            .read()
            .await
            .by_user
            .get(user_id)
            .map_or(0, HashSet::len)
    }

    /// When `conn_id` was registered, if it still is.
    pub async fn connected_at(&self, conn_id: &str) -> Option<Timestamp> {
        self.state
            .read()
            .await
            .connections
            .get(conn_id)
            .map(|entry| entry.connected_at)
    }

    /// Send a Ping frame to every connection.
    ///
    /// Used by the heartbeat task; a failed push is left for the next
    /// `send_to_user` or the connection's own receive loop to clean up.
    pub async fn ping_all(&self) {
        let state = self.state.read().await;
        for entry in state.connections.values() {
            let _ = entry.handle.push(Frame::Ping);
        }
    }

    /// Send a Close frame to every connection, then clear both indexes.
    pub async fn shutdown_all(&self) {
        let mut state = self.state.write().await;
        let count = state.connections.len();
        for entry in state.connections.values() {
            let _ = entry.handle.push(Frame::Close);
        }
        state.connections.clear();
        state.by_user.clear();
        tracing::info!(count, "Closed all delivery channels");
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
