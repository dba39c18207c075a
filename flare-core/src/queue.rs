//! Delivery queue: reassembled, de-duplicated payloads waiting for the application.

use std::collections::VecDeque;

/// Application payload ready for consumption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredPacket {
    pub payload: Vec<u8>,
    pub rssi: i32,
    pub source_address: String,
    pub sender_id: String,
    /// Receipt time, seconds since the Unix epoch.
    pub received_at: u64,
}

/// Bounded FIFO. Pushing past capacity evicts the oldest packet.
#[derive(Debug)]
pub struct DeliveryQueue {
    packets: VecDeque<DeliveredPacket>,
    capacity: usize,
}

impl DeliveryQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            packets: VecDeque::new(),
            capacity,
        }
    }

    /// Enqueue a packet. Returns how many old packets were evicted to make room.
    pub fn push(&mut self, packet: DeliveredPacket) -> usize {
        self.packets.push_back(packet);
        self.trim()
    }

    pub fn pop(&mut self) -> Option<DeliveredPacket> {
        self.packets.pop_front()
    }

    pub fn peek(&self) -> Option<&DeliveredPacket> {
        self.packets.front()
    }

    /// Drop from the front until within capacity. Returns how many were dropped.
    pub fn trim(&mut self) -> usize {
        let excess = self.packets.len().saturating_sub(self.capacity);
        self.packets.drain(..excess);
        excess
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.packets.clear();
    }
}
