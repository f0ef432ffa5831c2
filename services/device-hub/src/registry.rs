use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, Notify};
use tracing::info;

use crate::config::DuplicatePolicy;
use crate::error::{HubError, SendError};
use crate::models::OutboundMessage;

/// Close code sent to a connection that lost its registry slot.
pub const CLOSE_POLICY: u16 = 1008;

/// What the writer task of a connection is asked to do.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Message(OutboundMessage),
    Close { code: u16, reason: String },
}

/// Write side of one open device connection.
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    conn_id: u64,
    device_id: String,
    device_type: String,
    sender: mpsc::Sender<Outbound>,
    close_signal: Arc<Notify>,
}

impl ConnectionHandle {
    pub fn new(
        conn_id: u64,
        device_id: impl Into<String>,
        device_type: impl Into<String>,
        buffer: usize,
    ) -> (Self, mpsc::Receiver<Outbound>) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        let handle = Self {
            conn_id,
            device_id: device_id.into(),
            device_type: device_type.into(),
            sender,
            close_signal: Arc::new(Notify::new()),
        };
        (handle, receiver)
    }

    pub fn conn_id(&self) -> u64 {
        self.conn_id
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn device_type(&self) -> &str {
        &self.device_type
    }

    /// Queue a message without waiting; a slow or dead writer is reported, not awaited.
    pub fn send(&self, message: OutboundMessage) -> Result<(), SendError> {
        self.sender
            .try_send(Outbound::Message(message))
            .map_err(|err| match err {
                mpsc::error::TrySendError::Full(_) => SendError::Full,
                mpsc::error::TrySendError::Closed(_) => SendError::Closed,
            })
    }

    /// Ask the owning session to end: queue a close frame and wake its read loop.
    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.sender.try_send(Outbound::Close {
            code,
            reason: reason.to_string(),
        });
        self.close_signal.notify_one();
    }

    /// Resolves once [`ConnectionHandle::close`] has been called.
    pub async fn closed(&self) {
        self.close_signal.notified().await;
    }

    pub fn is_open(&self) -> bool {
        !self.sender.is_closed()
    }
}

/// Live connections keyed by device id.
pub struct ConnectionRegistry {
    policy: DuplicatePolicy,
    conn_counter: AtomicU64,
    connections: Mutex<HashMap<String, ConnectionHandle>>,
}

impl ConnectionRegistry {
    pub fn new(policy: DuplicatePolicy) -> Self {
        Self {
            policy,
            conn_counter: AtomicU64::new(0),
            connections: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> DuplicatePolicy {
        self.policy
    }

    pub fn next_conn_id(&self) -> u64 {
        self.conn_counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Insert `handle` under its device id. Returns the handle it displaced, which
    /// has already been told to close.
    pub async fn register(
        &self,
        handle: ConnectionHandle,
    ) -> Result<Option<ConnectionHandle>, HubError> {
        let previous = {
            let mut connections = self.connections.lock().await;
            if let Some(existing) = connections.get(handle.device_id()) {
                if self.policy == DuplicatePolicy::Reject && existing.is_open() {
                    return Err(HubError::DuplicateDevice(handle.device_id.clone()));
                }
            }
            connections.insert(handle.device_id.clone(), handle.clone())
        };

        if let Some(previous) = &previous {
            info!(
                event = "device_superseded",
                device_id = %previous.device_id,
                old_conn_id = previous.conn_id,
                new_conn_id = handle.conn_id
            );
            previous.close(CLOSE_POLICY, "superseded");
        }
        Ok(previous)
    }

    /// Remove the entry for `device_id` only while it still belongs to `conn_id`.
    pub async fn unregister(&self, device_id: &str, conn_id: u64) -> bool {
        let mut connections = self.connections.lock().await;
        match connections.get(device_id) {
            Some(current) if current.conn_id == conn_id => {
                connections.remove(device_id);
                true
            }
            _ => false,
        }
    }

    pub async fn lookup(&self, device_id: &str) -> Option<ConnectionHandle> {
        self.connections.lock().await.get(device_id).cloned()
    }

    pub async fn contains(&self, device_id: &str) -> bool {
        self.connections.lock().await.contains_key(device_id)
    }

    /// Registered and its writer still running; the rule `register` applies under `Reject`.
    pub async fn has_live(&self, device_id: &str) -> bool {
        self.connections
            .lock()
            .await
            .get(device_id)
            .map(ConnectionHandle::is_open)
            .unwrap_or(false)
    }

    pub async fn connected_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.connections.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn len(&self) -> usize {
        self.connections.lock().await.len()
    }

    pub async fn send(&self, device_id: &str, message: OutboundMessage) -> Result<(), SendError> {
        // Clone out so the map lock is not held while queueing.
        let handle = self.lookup(device_id).await.ok_or(SendError::NotConnected)?;
        handle.send(message)
    }
}
