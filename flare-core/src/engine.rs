//! Synchronized API surface. One lock guards all state; every call holds it until it returns.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::clock::{Clock, SystemClock};
use crate::core::{EngineError, MeshCore, Poll, ReceiveOutcome};
use crate::neighbor::NeighborRecord;
use crate::protocol::EngineConfig;
use crate::queue::DeliveredPacket;

/// Protocol engine owned by the host. Share it between the transport and application threads via `Arc`.
pub struct MeshEngine {
    core: Mutex<MeshCore>,
    clock: Box<dyn Clock>,
}

impl MeshEngine {
    /// Engine with default limits and the wall clock.
    pub fn new(self_id: Option<&str>) -> Self {
        Self::with_config(self_id, EngineConfig::default(), SystemClock)
    }

    pub fn with_config(
        self_id: Option<&str>,
        config: EngineConfig,
        clock: impl Clock + 'static,
    ) -> Self {
        let now = clock.now_secs();
        Self {
            core: Mutex::new(MeshCore::new(self_id, config, now)),
            clock: Box::new(clock),
        }
    }

    // Every mutation leaves the tables consistent, so a panic elsewhere does not invalidate them.
    fn lock(&self) -> MutexGuard<'_, MeshCore> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reset all state and set our sender id ("unknown" when absent).
    pub fn init(&self, self_id: Option<&str>) {
        let mut core = self.lock();
        core.init(self_id, self.clock.now_secs());
    }

    pub fn self_id(&self) -> String {
        self.lock().self_id().to_string()
    }

    pub fn config(&self) -> EngineConfig {
        self.lock().config().clone()
    }

    /// Encode a broadcast. Returns the frames to hand to the transport.
    pub fn send_broadcast(&self, message: impl AsRef<[u8]>) -> Result<Vec<Vec<u8>>, EngineError> {
        let mut core = self.lock();
        let now = self.clock.now_secs();
        Ok(core.send_broadcast(message.as_ref(), now)?)
    }

    /// Like `send_broadcast`, but first checks that `batch_len(frames, bytes)` fits in `available`.
    /// On `CapacityExceeded` nothing was sent: no message id used, no loopback delivery.
    pub fn send_broadcast_within(
        &self,
        message: impl AsRef<[u8]>,
        available: usize,
        batch_len: impl FnOnce(usize, usize) -> usize,
    ) -> Result<Vec<Vec<u8>>, EngineError> {
        let message = message.as_ref();
        let mut core = self.lock();
        let (frames, bytes) = core.encoded_len(message.len())?;
        let needed = batch_len(frames, bytes);
        if needed > available {
            return Err(EngineError::CapacityExceeded { needed, available });
        }
        let now = self.clock.now_secs();
        Ok(core.send_broadcast(message, now)?)
    }

    /// Feed one frame heard on the medium. Empty input is an error; malformed frames are not.
    pub fn receive_raw(
        &self,
        bytes: &[u8],
        rssi: i32,
        source_address: &str,
    ) -> Result<ReceiveOutcome, EngineError> {
        if bytes.is_empty() {
            return Err(EngineError::InvalidArgument);
        }
        let mut core = self.lock();
        let now = self.clock.now_secs();
        Ok(core.receive_raw(bytes, rssi, source_address, now))
    }

    /// Copy the oldest delivered payload into `buf`.
    pub fn poll_incoming(&self, buf: &mut [u8]) -> Poll {
        self.lock().poll_incoming(buf)
    }

    /// Take the oldest delivered packet with its metadata.
    pub fn poll_packet(&self) -> Option<DeliveredPacket> {
        self.lock().poll_packet()
    }

    pub fn neighbors(&self) -> Vec<NeighborRecord> {
        self.lock().neighbors()
    }

    /// Neighbor listing as JSON; `max_len` counts a NUL terminator.
    pub fn neighbors_json(&self, max_len: usize) -> Result<String, EngineError> {
        self.lock().neighbors_json(max_len)
    }
}
