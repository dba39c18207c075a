//! Property-based tests for the codec and the receive pipeline.
//!
//! - Any message that fits in 32 fragments survives fragmentation and reassembly in any order
//! - A complete message is delivered exactly once within the dedupe window
//! - Arbitrary bytes never panic the decoder or the engine

use proptest::prelude::*;

use crate::clock::ManualClock;
use crate::core::{MeshCore, ReceiveOutcome};
use crate::engine::MeshEngine;
use crate::protocol::{EngineConfig, MAX_FRAGMENTS, MIN_FRAME_LEN};
use crate::wire::{decode_frame, fragment_message};

const T0: u64 = 1_700_000_000;

fn quiet_core() -> MeshCore {
    let config = EngineConfig {
        loopback: false,
        ..EngineConfig::default()
    };
    MeshCore::new(Some("me"), config, T0)
}

/// A message, a fragment size that keeps it within 32 fragments, and a permutation of its fragments.
fn message_and_order() -> impl Strategy<Value = (Vec<u8>, usize, Vec<usize>)> {
    (1usize..=40)
        .prop_flat_map(|size| {
            (
                prop::collection::vec(any::<u8>(), 0..=size * MAX_FRAGMENTS),
                Just(size),
            )
        })
        .prop_flat_map(|(msg, size)| {
            let count = msg.len().div_ceil(size).max(1);
            let order = Just((0..count).collect::<Vec<usize>>()).prop_shuffle();
            (Just(msg), Just(size), order)
        })
}

proptest! {
    #[test]
    fn reassembles_in_any_order((msg, size, order) in message_and_order()) {
        let frames = fragment_message(42, "peer", 4, &msg, size).unwrap();
        prop_assert_eq!(frames.len(), order.len());

        let mut core = quiet_core();
        let mut delivered = 0;
        for &i in &order {
            if core.receive_raw(&frames[i], -60, "AA", T0) == ReceiveOutcome::Delivered {
                delivered += 1;
            }
        }
        prop_assert_eq!(delivered, 1);
        let packet = core.poll_packet().unwrap();
        prop_assert_eq!(packet.payload, msg);
        prop_assert!(core.poll_packet().is_none());
        prop_assert_eq!(core.pending_reassemblies(), 0);
    }

    #[test]
    fn repeated_feed_delivers_once((msg, size, order) in message_and_order(), rounds in 2usize..4) {
        let frames = fragment_message(7, "peer", 4, &msg, size).unwrap();
        let mut core = quiet_core();
        for _ in 0..rounds {
            for &i in &order {
                core.receive_raw(&frames[i], 0, "AA", T0 + 1);
            }
        }
        prop_assert_eq!(core.queued(), 1);
    }

    #[test]
    fn every_fragment_respects_size((msg, size, _order) in message_and_order()) {
        let frames = fragment_message(1, "peer", 4, &msg, size).unwrap();
        for f in &frames {
            let frame = decode_frame(f).unwrap();
            prop_assert!(frame.payload.len() <= size);
            prop_assert_eq!(frame.header.fragment_count as usize, frames.len());
        }
    }

    #[test]
    fn decoder_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..128)) {
        let _ = decode_frame(&bytes);
    }

    #[test]
    fn header_shaped_garbage_never_panics(
        tail in prop::collection::vec(any::<u8>(), 0..64),
        id in any::<u32>(),
        index in any::<u8>(),
        count in any::<u8>(),
    ) {
        let mut bytes = vec![b'E', b'P', 1];
        bytes.extend_from_slice(&id.to_be_bytes());
        bytes.extend_from_slice(&[index, count, 4]);
        bytes.extend_from_slice(&tail);
        let engine = MeshEngine::with_config(Some("me"), EngineConfig::default(), ManualClock::new(T0));
        if bytes.len() >= MIN_FRAME_LEN {
            prop_assert!(engine.receive_raw(&bytes, 0, "AA").is_ok());
        }
        let mut buf = [0u8; 16];
        let _ = engine.poll_incoming(&mut buf);
        prop_assert!(engine.neighbors_json(1 << 16).is_ok());
    }
}
