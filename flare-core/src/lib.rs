//! Flare emergency mesh protocol engine.
//! Host-driven: no I/O; the host passes received frames in and transmits the frames it gets back.

pub mod clock;
pub mod core;
pub mod dedupe;
pub mod engine;
pub mod ffi;
pub mod neighbor;
pub mod protocol;
pub mod queue;
pub mod reassembly;
pub mod wire;

#[cfg(test)]
mod proptests;

pub use clock::{Clock, ManualClock, SystemClock};
pub use crate::core::{EngineError, MeshCore, Poll, ReceiveOutcome, SweepStats};
pub use engine::MeshEngine;
pub use neighbor::NeighborRecord;
pub use protocol::{EngineConfig, PROTOCOL_VERSION};
pub use queue::DeliveredPacket;
pub use wire::{decode_frame, fragment_message, Frame, FrameDecodeError, FrameEncodeError};
