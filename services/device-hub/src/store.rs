use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::info;

use crate::models::DeviceState;

#[derive(Clone, Debug, PartialEq)]
pub struct DeviceRecord {
    pub state: DeviceState,
    /// Connection currently owning the entry; cleared when that connection closes.
    pub live_conn: Option<u64>,
}

impl DeviceRecord {
    pub fn is_live(&self) -> bool {
        self.live_conn.is_some()
    }
}

/// Last reported state per device, retained across disconnects.
#[derive(Default)]
pub struct StateStore {
    entries: Mutex<HashMap<String, DeviceRecord>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the entry for `state.device_id` and mark it live for `conn_id`.
    pub async fn put(&self, mut state: DeviceState, conn_id: u64) -> DeviceState {
        let mut entries = self.entries.lock().await;
        if let Some(previous) = entries.get(&state.device_id) {
            // Wall clock may step back; last_seen must not.
            if state.last_seen < previous.state.last_seen {
                state.last_seen = previous.state.last_seen;
            }
        }
        entries.insert(
            state.device_id.clone(),
            DeviceRecord {
                state: state.clone(),
                live_conn: Some(conn_id),
            },
        );
        state
    }

    pub async fn get(&self, device_id: &str) -> Option<DeviceState> {
        self.entries
            .lock()
            .await
            .get(device_id)
            .map(|record| record.state.clone())
    }

    pub async fn record(&self, device_id: &str) -> Option<DeviceRecord> {
        self.entries.lock().await.get(device_id).cloned()
    }

    pub async fn is_live(&self, device_id: &str) -> bool {
        self.entries
            .lock()
            .await
            .get(device_id)
            .map(DeviceRecord::is_live)
            .unwrap_or(false)
    }

    /// Hand an existing entry to a newly registered connection. No-op without state.
    pub async fn mark_live(&self, device_id: &str, conn_id: u64) -> bool {
        match self.entries.lock().await.get_mut(device_id) {
            Some(record) => {
                record.live_conn = Some(conn_id);
                true
            }
            None => false,
        }
    }

    /// Clear the live flag, but only while `conn_id` still owns the entry.
    pub async fn mark_offline(&self, device_id: &str, conn_id: u64) -> bool {
        match self.entries.lock().await.get_mut(device_id) {
            Some(record) if record.live_conn == Some(conn_id) => {
                record.live_conn = None;
                true
            }
            _ => false,
        }
    }

    /// Point-in-time copy ordered by device id.
    pub async fn snapshot_all(&self) -> Vec<DeviceRecord> {
        let mut records: Vec<DeviceRecord> =
            self.entries.lock().await.values().cloned().collect();
        records.sort_by(|a, b| a.state.device_id.cmp(&b.state.device_id));
        records
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Drop offline entries not seen within `ttl` of `now`.
    pub async fn evict_stale(&self, now: DateTime<Utc>, ttl: Duration) -> usize {
        let cutoff = match chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_sub_signed(ttl))
        {
            Some(cutoff) => cutoff,
            None => return 0,
        };

        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, record| record.is_live() || record.state.last_seen >= cutoff);
        before - entries.len()
    }

    pub fn spawn_reaper(self: Arc<Self>, ttl: Duration, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let evicted = self.evict_stale(Utc::now(), ttl).await;
                if evicted > 0 {
                    info!(event = "device_state_evicted", count = evicted);
                }
            }
        })
    }
}
