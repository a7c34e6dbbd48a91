//! Ephemeral per-room presence (spec §4.6), grounded on
//! `collabkit/presence.py`. Presence data is not part of the CRDT
//! document: it's a shallow, last-write-wins dict per user that expires
//! on its own without needing conflict resolution.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

fn now_seconds() -> f64 {
    crate::crdt::now_seconds()
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct PresenceEntry {
    pub user_id: String,
    pub data: serde_json::Value,
    pub last_updated: f64,
}

impl PresenceEntry {
    fn new(user_id: String, data: serde_json::Value) -> Self {
        Self {
            user_id,
            data,
            last_updated: now_seconds(),
        }
    }

    /// Shallow merge: caller's keys win, untouched keys survive
    /// (`collabkit/presence.py::PresenceData.update` does `dict.update`).
    fn merge(&mut self, data: serde_json::Value) {
        if let (serde_json::Value::Object(existing), serde_json::Value::Object(incoming)) = (&mut self.data, data) {
            for (k, v) in incoming {
                existing.insert(k, v);
            }
        } else if let serde_json::Value::Object(_) = &self.data {
            // incoming wasn't an object; nothing sensible to merge, ignore.
        }
        self.last_updated = now_seconds();
    }
}

#[derive(Default)]
struct RoomPresence {
    users: HashMap<String, PresenceEntry>,
}

/// A callback invoked after a successful `update_presence`, to broadcast
/// it to the room (spec §4.6: "on successful update, invoke the
/// registered broadcast callback").
pub type PresenceBroadcastCallback = Arc<dyn Fn(String, String, serde_json::Value) + Send + Sync>;

pub struct PresenceManager {
    rooms: Mutex<HashMap<String, RoomPresence>>,
    stale_timeout: f64,
    cleanup_interval_secs: u64,
    broadcast_callback: Mutex<Option<PresenceBroadcastCallback>>,
    stop: Arc<Notify>,
    cleanup_task: Mutex<Option<JoinHandle<()>>>,
}

impl PresenceManager {
    pub fn new(stale_timeout: f64, cleanup_interval_secs: f64) -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            stale_timeout,
            cleanup_interval_secs: cleanup_interval_secs.max(1.0) as u64,
            broadcast_callback: Mutex::new(None),
            stop: Arc::new(Notify::new()),
            cleanup_task: Mutex::new(None),
        }
    }

    pub async fn set_broadcast_callback(&self, callback: PresenceBroadcastCallback) {
        *self.broadcast_callback.lock().await = Some(callback);
    }

    pub async fn join_room(&self, room_id: &str, user_id: &str, data: serde_json::Value) {
        let mut rooms = self.rooms.lock().await;
        let room = rooms.entry(room_id.to_string()).or_default();
        room.users.insert(user_id.to_string(), PresenceEntry::new(user_id.to_string(), data));
    }

    pub async fn leave_room(&self, room_id: &str, user_id: &str) {
        let mut rooms = self.rooms.lock().await;
        if let Some(room) = rooms.get_mut(room_id) {
            room.users.remove(user_id);
            if room.users.is_empty() {
                rooms.remove(room_id);
            }
        }
    }

    /// Update a user's presence data, broadcasting the merged result on
    /// success if `broadcast` is set and a callback is registered.
    pub async fn update_presence(&self, room_id: &str, user_id: &str, data: serde_json::Value, broadcast: bool) -> bool {
        let merged = {
            let mut rooms = self.rooms.lock().await;
            let Some(room) = rooms.get_mut(room_id) else {
                return false;
            };
            let Some(entry) = room.users.get_mut(user_id) else {
                return false;
            };
            entry.merge(data);
            entry.data.clone()
        };

        if broadcast {
            if let Some(callback) = self.broadcast_callback.lock().await.as_ref() {
                callback(room_id.to_string(), user_id.to_string(), merged);
            }
        }
        true
    }

    pub async fn get_room_users(&self, room_id: &str) -> Vec<String> {
        self.rooms.lock().await.get(room_id).map(|r| r.users.keys().cloned().collect()).unwrap_or_default()
    }

    pub async fn get_room_presence(&self, room_id: &str) -> HashMap<String, PresenceEntry> {
        self.rooms.lock().await.get(room_id).map(|r| r.users.clone()).unwrap_or_default()
    }

    pub async fn get_user_presence(&self, room_id: &str, user_id: &str) -> Option<PresenceEntry> {
        self.rooms.lock().await.get(room_id)?.users.get(user_id).cloned()
    }

    pub async fn is_user_in_room(&self, room_id: &str, user_id: &str) -> bool {
        self.rooms.lock().await.get(room_id).map(|r| r.users.contains_key(user_id)).unwrap_or(false)
    }

    pub async fn get_user_rooms(&self, user_id: &str) -> Vec<String> {
        self.rooms
            .lock()
            .await
            .iter()
            .filter(|(_, room)| room.users.contains_key(user_id))
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.lock().await.len()
    }

    pub async fn total_users(&self) -> usize {
        self.rooms.lock().await.values().map(|r| r.users.len()).sum()
    }

    async fn cleanup_stale(&self) {
        let now = now_seconds();
        let mut rooms = self.rooms.lock().await;
        let mut empty = Vec::new();
        for (room_id, room) in rooms.iter_mut() {
            room.users.retain(|_, entry| now - entry.last_updated < self.stale_timeout);
            if room.users.is_empty() {
                empty.push(room_id.clone());
            }
        }
        for room_id in empty {
            rooms.remove(&room_id);
        }
    }

    /// Spawn the periodic stale-entry reaper. Idempotent: calling twice
    /// without an intervening `stop()` leaves the first task running.
    pub async fn start(self: &Arc<Self>) {
        let mut task = self.cleanup_task.lock().await;
        if task.is_some() {
            return;
        }
        let manager = self.clone();
        let stop = self.stop.clone();
        let interval = std::time::Duration::from_secs(self.cleanup_interval_secs);
        *task = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        manager.cleanup_stale().await;
                    }
                    _ = stop.notified() => {
                        break;
                    }
                }
            }
        }));
    }

    /// Cancel the reaper task and wait for it to exit
    /// (`collabkit/presence.py::PresenceManager.stop` cancels and awaits
    /// its cleanup task).
    pub async fn stop(&self) {
        let handle = self.cleanup_task.lock().await.take();
        if let Some(handle) = handle {
            self.stop.notify_one();
            let _ = handle.await;
        }
    }
}
