//! Flare wire protocol: magic, version, header layout and build-time limits.

/// Two-byte magic at the start of every frame.
pub const MAGIC: [u8; 2] = *b"EP";

/// Current protocol version. Frames with any other version are rejected.
pub const PROTOCOL_VERSION: u8 = 1;

/// Fixed header bytes before the sender id: magic, version, msg id, index, count, hop budget, id length.
pub const FIXED_HEADER_LEN: usize = 11;

/// Smallest decodable frame: fixed header plus the 2-byte payload length (empty sender id and payload).
pub const MIN_FRAME_LEN: usize = FIXED_HEADER_LEN + 2;

/// Completion mask is 32 bits wide, so a message has at most 32 fragments.
pub const MAX_FRAGMENTS: usize = 32;

/// Hop budget stamped on outbound frames. Carried only; no relay logic reads it.
pub const DEFAULT_HOP_BUDGET: u8 = 4;

/// Maximum tracked neighbors; new senders beyond this are not tracked.
pub const MAX_NEIGHBORS: usize = 256;

/// Dedupe window in seconds (5 minutes). Also the reassembly timeout; neighbors expire after twice this.
pub const DEDUPE_WINDOW_SECS: u64 = 300;

/// Maximum delivered packets waiting for the application.
pub const MAX_QUEUE_DEPTH: usize = 1024;

/// Maximum messages being reassembled at once; a new message id evicts the oldest.
pub const MAX_PENDING_REASSEMBLIES: usize = 128;

/// Maximum sender id bytes put on the wire.
pub const MAX_SENDER_ID_LEN: usize = 31;

/// Payload bytes per fragment; sized for a BLE advertisement after the header.
pub const MAX_FRAGMENT_PAYLOAD: usize = 20;

/// Sender id used when the host does not supply one.
pub const UNKNOWN_SENDER_ID: &str = "unknown";

/// Source address attached to frames fed back by loopback.
pub const LOOPBACK_ADDRESS: &str = "local";

/// Engine limits. Chosen once when the engine is built; defaults are the constants above.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub max_neighbors: usize,
    pub dedupe_window_secs: u64,
    pub max_queue_depth: usize,
    pub max_pending_reassemblies: usize,
    pub max_fragment_payload: usize,
    pub hop_budget: u8,
    /// Feed sent frames back through the receive pipeline (no transport attached).
    pub loopback: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_neighbors: MAX_NEIGHBORS,
            dedupe_window_secs: DEDUPE_WINDOW_SECS,
            max_queue_depth: MAX_QUEUE_DEPTH,
            max_pending_reassemblies: MAX_PENDING_REASSEMBLIES,
            max_fragment_payload: MAX_FRAGMENT_PAYLOAD,
            hop_budget: DEFAULT_HOP_BUDGET,
            loopback: true,
        }
    }
}

impl EngineConfig {
    /// Fragment payload size actually used; zero falls back to the default.
    pub fn fragment_payload(&self) -> usize {
        if self.max_fragment_payload == 0 {
            MAX_FRAGMENT_PAYLOAD
        } else {
            self.max_fragment_payload
        }
    }

    /// Neighbors are dropped after being silent for this long.
    pub fn neighbor_expiry_secs(&self) -> u64 {
        self.dedupe_window_secs.saturating_mul(2)
    }
}
