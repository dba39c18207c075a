//! Host-driven state machine: the caller passes frames and the current time; the core never does I/O.

use tracing::{debug, info, trace};

use crate::dedupe::DedupeTracker;
use crate::neighbor::{NeighborRecord, NeighborTable};
use crate::protocol::{EngineConfig, LOOPBACK_ADDRESS, UNKNOWN_SENDER_ID};
use crate::queue::{DeliveredPacket, DeliveryQueue};
use crate::reassembly::{FragmentOutcome, ReassemblyTable};
use crate::wire::{self, Frame, FrameDecodeError, FrameEncodeError};

/// All protocol state for one device. Not synchronized; see `MeshEngine` for the locked surface.
#[derive(Debug)]
pub struct MeshCore {
    config: EngineConfig,
    self_id: String,
    next_message_id: u32,
    neighbors: NeighborTable,
    reassembly: ReassemblyTable,
    dedupe: DedupeTracker,
    queue: DeliveryQueue,
}

impl MeshCore {
    pub fn new(self_id: Option<&str>, config: EngineConfig, now: u64) -> Self {
        let mut core = Self {
            neighbors: NeighborTable::new(config.max_neighbors),
            reassembly: ReassemblyTable::with_capacity(config.max_pending_reassemblies),
            dedupe: DedupeTracker::new(),
            queue: DeliveryQueue::new(config.max_queue_depth),
            config,
            self_id: String::new(),
            next_message_id: 0,
        };
        core.init(self_id, now);
        core
    }

    /// Reset all state, set our sender id (or "unknown") and reseed message ids from the clock.
    pub fn init(&mut self, self_id: Option<&str>, now: u64) {
        self.self_id = self_id.unwrap_or(UNKNOWN_SENDER_ID).to_string();
        self.neighbors.clear();
        self.reassembly.clear();
        self.dedupe.clear();
        self.queue.clear();
        self.next_message_id = (now & 0x7fff_ffff) as u32;
        info!(self_id = %self.self_id, "mesh core initialized");
    }

    pub fn self_id(&self) -> &str {
        &self.self_id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Fragment and encode `message` under a fresh message id. Returns the frames for the transport.
    /// With loopback on, the frames are also fed through the receive pipeline as locally originated.
    pub fn send_broadcast(
        &mut self,
        message: &[u8],
        now: u64,
    ) -> Result<Vec<Vec<u8>>, FrameEncodeError> {
        self.next_message_id = self.next_message_id.wrapping_add(1);
        let message_id = self.next_message_id;
        let frames = wire::fragment_message(
            message_id,
            &self.self_id,
            self.config.hop_budget,
            message,
            self.config.fragment_payload(),
        )?;
        debug!(message_id, fragments = frames.len(), "broadcast encoded");

        if self.config.loopback {
            for bytes in &frames {
                if let Ok(frame) = wire::decode_frame(bytes) {
                    self.process_frame(&frame, 0, LOOPBACK_ADDRESS, now, false);
                }
            }
            self.collect_garbage(now);
        }
        Ok(frames)
    }

    /// Frame count and total bytes `send_broadcast` would return for a message of `message_len` bytes.
    pub fn encoded_len(&self, message_len: usize) -> Result<(usize, usize), FrameEncodeError> {
        wire::encoded_len(message_len, &self.self_id, self.config.fragment_payload())
    }

    /// Handle one raw frame from the medium. Malformed frames are ignored, not errors.
    /// The collector always runs before returning.
    pub fn receive_raw(
        &mut self,
        bytes: &[u8],
        rssi: i32,
        source_address: &str,
        now: u64,
    ) -> ReceiveOutcome {
        let outcome = match wire::decode_frame(bytes) {
            Ok(frame) => self.process_frame(&frame, rssi, source_address, now, true),
            Err(e) => {
                trace!(error = %e, len = bytes.len(), "ignoring frame");
                ReceiveOutcome::Ignored(e)
            }
        };
        self.collect_garbage(now);
        outcome
    }

    fn process_frame(
        &mut self,
        frame: &Frame<'_>,
        rssi: i32,
        source_address: &str,
        now: u64,
        track_neighbor: bool,
    ) -> ReceiveOutcome {
        let message_id = frame.header.message_id;
        let fragment = self.reassembly.on_fragment(frame, now);
        if fragment == FragmentOutcome::Discarded {
            trace!(
                message_id,
                index = frame.header.fragment_index,
                "fragment index out of range"
            );
            return ReceiveOutcome::Discarded;
        }

        let sender = &frame.header.sender_id;
        if track_neighbor && !sender.is_empty() {
            self.neighbors.observe(sender, source_address, rssi, now);
        }

        let (payload, sender_id) = match fragment {
            FragmentOutcome::Complete { payload, sender_id } => (payload, sender_id),
            _ => return ReceiveOutcome::Pending,
        };
        if !self
            .dedupe
            .check_and_record(message_id, now, self.config.dedupe_window_secs)
        {
            trace!(message_id, "duplicate message suppressed");
            return ReceiveOutcome::Duplicate;
        }
        debug!(message_id, len = payload.len(), sender = %sender_id, "message delivered");
        let evicted = self.queue.push(DeliveredPacket {
            payload,
            rssi,
            source_address: source_address.to_string(),
            sender_id,
            received_at: now,
        });
        if evicted > 0 {
            debug!(evicted, "delivery queue full, dropped oldest");
        }
        ReceiveOutcome::Delivered
    }

    /// Enforce time and size bounds on every table.
    pub fn collect_garbage(&mut self, now: u64) -> SweepStats {
        let window = self.config.dedupe_window_secs;
        let stats = SweepStats {
            dedupe: self.dedupe.purge_expired(now, window),
            reassembly: self.reassembly.purge_expired(now, window),
            queue: self.queue.trim(),
            neighbors: self
                .neighbors
                .purge_stale(now, self.config.neighbor_expiry_secs()),
        };
        if stats.total() > 0 {
            debug!(?stats, "swept expired state");
        }
        stats
    }

    /// Dequeue the oldest delivered packet.
    pub fn poll_packet(&mut self) -> Option<DeliveredPacket> {
        self.queue.pop()
    }

    /// Dequeue the oldest packet and copy as much of its payload as fits into `buf`.
    pub fn poll_incoming(&mut self, buf: &mut [u8]) -> Poll {
        let Some(packet) = self.queue.pop() else {
            return Poll::Empty;
        };
        let total = packet.payload.len();
        let copied = total.min(buf.len());
        buf[..copied].copy_from_slice(&packet.payload[..copied]);
        if copied < total {
            Poll::Truncated { copied, total }
        } else {
            Poll::Copied(copied)
        }
    }

    pub fn neighbors(&self) -> Vec<NeighborRecord> {
        self.neighbors.records()
    }

    /// Neighbor listing as JSON. Fails if the text plus a NUL terminator exceeds `max_len`.
    pub fn neighbors_json(&self, max_len: usize) -> Result<String, EngineError> {
        let json = self.neighbors.to_json();
        let needed = json.len() + 1;
        if needed > max_len {
            return Err(EngineError::CapacityExceeded {
                needed,
                available: max_len,
            });
        }
        Ok(json)
    }

    pub fn neighbor_count(&self) -> usize {
        self.neighbors.len()
    }

    pub fn pending_reassemblies(&self) -> usize {
        self.reassembly.len()
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn dedupe_records(&self) -> usize {
        self.dedupe.len()
    }
}

/// What happened to one received frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// Not a valid frame of this protocol.
    Ignored(FrameDecodeError),
    /// Fragment index outside the message's fragment count.
    Discarded,
    /// Stored; more fragments needed.
    Pending,
    /// Message complete and queued for the application.
    Delivered,
    /// Message complete but delivered within the dedupe window already.
    Duplicate,
}

/// Result of copying a delivered payload into a caller buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Poll {
    Empty,
    Copied(usize),
    /// Buffer was smaller than the payload; the rest was dropped.
    Truncated { copied: usize, total: usize },
}

impl Poll {
    /// Bytes written into the caller buffer.
    pub fn copied(&self) -> usize {
        match *self {
            Poll::Empty => 0,
            Poll::Copied(n) => n,
            Poll::Truncated { copied, .. } => copied,
        }
    }
}

/// Entries removed by one collector sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub dedupe: usize,
    pub reassembly: usize,
    pub queue: usize,
    pub neighbors: usize,
}

impl SweepStats {
    pub fn total(&self) -> usize {
        self.dedupe + self.reassembly + self.queue + self.neighbors
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("invalid argument")]
    InvalidArgument,
    #[error("output needs {needed} bytes, only {available} available")]
    CapacityExceeded { needed: usize, available: usize },
    #[error("encode failed: {0}")]
    Encode(#[from] FrameEncodeError),
}
