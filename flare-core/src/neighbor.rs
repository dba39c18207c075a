//! Neighbor table: peers heard recently, keyed by sender id and bounded in size.

use std::collections::HashMap;

use serde::Serialize;

/// A peer observed via a received frame. Field names are the JSON listing's keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NeighborRecord {
    pub device_id: String,
    pub address: String,
    pub rssi: i32,
    pub last_seen: u64,
}

/// Bounded set of neighbors.
#[derive(Debug)]
pub struct NeighborTable {
    neighbors: HashMap<String, NeighborRecord>,
    capacity: usize,
}

impl NeighborTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            neighbors: HashMap::new(),
            capacity,
        }
    }

    /// Create or refresh a neighbor. When the table is full, unseen senders are not tracked.
    /// Returns false if the sender was not tracked.
    pub fn observe(&mut self, device_id: &str, address: &str, rssi: i32, now: u64) -> bool {
        if let Some(n) = self.neighbors.get_mut(device_id) {
            n.rssi = rssi;
            n.last_seen = now;
            if !address.is_empty() {
                n.address = address.to_string();
            }
            return true;
        }
        if self.neighbors.len() >= self.capacity {
            return false;
        }
        self.neighbors.insert(
            device_id.to_string(),
            NeighborRecord {
                device_id: device_id.to_string(),
                address: address.to_string(),
                rssi,
                last_seen: now,
            },
        );
        true
    }

    /// Drop neighbors unseen for more than `max_silence_secs`. Returns how many were dropped.
    pub fn purge_stale(&mut self, now: u64, max_silence_secs: u64) -> usize {
        let before = self.neighbors.len();
        self.neighbors
            .retain(|_, n| now.saturating_sub(n.last_seen) <= max_silence_secs);
        before - self.neighbors.len()
    }

    pub fn get(&self, device_id: &str) -> Option<&NeighborRecord> {
        self.neighbors.get(device_id)
    }

    /// Snapshot of all neighbors, sorted by device id.
    pub fn records(&self) -> Vec<NeighborRecord> {
        let mut out: Vec<NeighborRecord> = self.neighbors.values().cloned().collect();
        out.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        out
    }

    /// JSON array of all neighbors: `[{"device_id":..,"address":..,"rssi":..,"last_seen":..}]`.
    pub fn to_json(&self) -> String {
        // Serializing plain strings and integers cannot fail.
        serde_json::to_string(&self.records()).unwrap_or_else(|_| String::from("[]"))
    }

    pub fn len(&self) -> usize {
        self.neighbors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.neighbors.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.neighbors.clear();
    }
}
