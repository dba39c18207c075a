//! Reassembly: collect fragments per message id, rebuild the payload once every index is present.

use std::collections::HashMap;

use crate::protocol::{MAX_FRAGMENTS, MAX_PENDING_REASSEMBLIES};
use crate::wire::Frame;

/// Partially received message.
#[derive(Debug, Clone)]
pub struct ReassemblyEntry {
    pub message_id: u32,
    /// Fixed by the first fragment seen for this id.
    fragment_count: u8,
    fragments: Vec<Vec<u8>>,
    received_mask: u32,
    pub sender_id: String,
    pub first_seen: u64,
}

impl ReassemblyEntry {
    pub fn new(message_id: u32, fragment_count: u8, sender_id: String, now: u64) -> Self {
        let count = fragment_count.clamp(1, MAX_FRAGMENTS as u8);
        Self {
            message_id,
            fragment_count: count,
            fragments: vec![Vec::new(); count as usize],
            received_mask: 0,
            sender_id,
            first_seen: now,
        }
    }

    pub fn fragment_count(&self) -> u8 {
        self.fragment_count
    }

    /// Store a fragment. Returns false (and stores nothing) if the index is out of range.
    /// A repeated index overwrites the earlier bytes.
    pub fn insert(&mut self, index: u8, payload: &[u8]) -> bool {
        if index >= self.fragment_count {
            return false;
        }
        self.fragments[index as usize] = payload.to_vec();
        self.received_mask |= 1u32 << index;
        true
    }

    pub fn is_received(&self, index: u8) -> bool {
        index < self.fragment_count && self.received_mask & (1u32 << index) != 0
    }

    pub fn is_complete(&self) -> bool {
        let full = u32::MAX >> (32 - u32::from(self.fragment_count));
        self.received_mask & full == full
    }

    /// Concatenate fragments in index order. Call only when `is_complete()`.
    pub fn reassemble(&self) -> Vec<u8> {
        let total = self.fragments.iter().map(Vec::len).sum();
        let mut out = Vec::with_capacity(total);
        for f in &self.fragments {
            out.extend_from_slice(f);
        }
        out
    }

    pub fn is_expired(&self, now: u64, max_age_secs: u64) -> bool {
        now.saturating_sub(self.first_seen) > max_age_secs
    }
}

/// Result of feeding one fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FragmentOutcome {
    /// All fragments present; the entry was removed.
    Complete { payload: Vec<u8>, sender_id: String },
    InProgress,
    /// Index outside the expected fragment count.
    Discarded,
}

/// Open reassemblies keyed by message id. At most `capacity` are open at once;
/// a new message id evicts the oldest entry when the table is full.
#[derive(Debug)]
pub struct ReassemblyTable {
    entries: HashMap<u32, ReassemblyEntry>,
    capacity: usize,
}

impl Default for ReassemblyTable {
    fn default() -> Self {
        Self::with_capacity(MAX_PENDING_REASSEMBLIES)
    }
}

impl ReassemblyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Feed a decoded frame. Creates the entry on first sight of its message id.
    /// A first fragment whose index is outside its own count creates nothing.
    pub fn on_fragment(&mut self, frame: &Frame<'_>, now: u64) -> FragmentOutcome {
        let header = &frame.header;
        if !self.entries.contains_key(&header.message_id) {
            if header.fragment_index >= header.fragment_count {
                return FragmentOutcome::Discarded;
            }
            if self.entries.len() >= self.capacity {
                self.evict_oldest();
            }
        }
        let entry = self.entries.entry(header.message_id).or_insert_with(|| {
            ReassemblyEntry::new(
                header.message_id,
                header.fragment_count,
                header.sender_id.clone().into_owned(),
                now,
            )
        });
        if !entry.insert(header.fragment_index, frame.payload) {
            return FragmentOutcome::Discarded;
        }
        if !entry.is_complete() {
            return FragmentOutcome::InProgress;
        }
        match self.entries.remove(&header.message_id) {
            Some(entry) => FragmentOutcome::Complete {
                payload: entry.reassemble(),
                sender_id: entry.sender_id,
            },
            None => FragmentOutcome::InProgress,
        }
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .entries
            .values()
            .min_by_key(|e| (e.first_seen, e.message_id))
            .map(|e| e.message_id);
        if let Some(id) = oldest {
            self.entries.remove(&id);
        }
    }

    /// Drop reassemblies older than `max_age_secs`. Returns how many were dropped.
    pub fn purge_expired(&mut self, now: u64, max_age_secs: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired(now, max_age_secs));
        before - self.entries.len()
    }

    pub fn get(&self, message_id: u32) -> Option<&ReassemblyEntry> {
        self.entries.get(&message_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
