//! Dedupe: suppress redelivery of a message id within the dedupe window.

use std::collections::HashMap;

/// Tracks when each message id was last delivered.
#[derive(Debug, Default)]
pub struct DedupeTracker {
    delivered: HashMap<u32, u64>,
}

impl DedupeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `message_id` may be delivered at `now`: never seen, or last delivery older than the window.
    pub fn is_eligible(&self, message_id: u32, now: u64, window_secs: u64) -> bool {
        match self.delivered.get(&message_id) {
            Some(&at) => now.saturating_sub(at) > window_secs,
            None => true,
        }
    }

    /// Record a delivery if eligible. Returns true if the caller should deliver.
    pub fn check_and_record(&mut self, message_id: u32, now: u64, window_secs: u64) -> bool {
        if !self.is_eligible(message_id, now, window_secs) {
            return false;
        }
        self.delivered.insert(message_id, now);
        true
    }

    /// Timestamp of the last recorded delivery.
    pub fn last_delivered(&self, message_id: u32) -> Option<u64> {
        self.delivered.get(&message_id).copied()
    }

    /// Forget deliveries older than the window. Returns how many were dropped.
    pub fn purge_expired(&mut self, now: u64, window_secs: u64) -> usize {
        let before = self.delivered.len();
        self.delivered
            .retain(|_, &mut at| now.saturating_sub(at) <= window_secs);
        before - self.delivered.len()
    }

    pub fn len(&self) -> usize {
        self.delivered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.delivered.is_empty()
    }

    pub fn clear(&mut self) {
        self.delivered.clear();
    }
}
