//! Framing: fixed big-endian header + sender id + length-prefixed payload.
//!
//! ```text
//! [0..2]   magic 'E','P'
//! [2]      version (1)
//! [3..7]   message id (u32 BE)
//! [7]      fragment index
//! [8]      fragment count (1..=32)
//! [9]      hop budget
//! [10]     sender id length N
//! [11..]   sender id (N bytes, UTF-8)
//! [..+2]   payload length M (u16 BE)
//! [..+M]   payload
//! ```

use std::borrow::Cow;

use crate::protocol::{
    FIXED_HEADER_LEN, MAGIC, MAX_FRAGMENTS, MAX_SENDER_ID_LEN, MIN_FRAME_LEN, PROTOCOL_VERSION,
};

const PAYLOAD_LEN_SIZE: usize = 2;

/// Decoded frame header. The sender id borrows from the input buffer when it is valid UTF-8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader<'a> {
    pub message_id: u32,
    pub fragment_index: u8,
    pub fragment_count: u8,
    pub hop_budget: u8,
    pub sender_id: Cow<'a, str>,
}

/// One validated frame: header plus a view of its payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame<'a> {
    pub header: FrameHeader<'a>,
    pub payload: &'a [u8],
}

/// Truncate a sender id to what fits on the wire, on a character boundary.
pub fn truncate_sender_id(sender_id: &str) -> &str {
    if sender_id.len() <= MAX_SENDER_ID_LEN {
        return sender_id;
    }
    let mut end = MAX_SENDER_ID_LEN;
    while !sender_id.is_char_boundary(end) {
        end -= 1;
    }
    &sender_id[..end]
}

/// Encode a single frame. The sender id is truncated to `MAX_SENDER_ID_LEN` bytes.
pub fn encode_frame(header: &FrameHeader<'_>, payload: &[u8]) -> Result<Vec<u8>, FrameEncodeError> {
    let count = header.fragment_count as usize;
    if count == 0 || count > MAX_FRAGMENTS || header.fragment_index >= header.fragment_count {
        return Err(FrameEncodeError::InvalidFragment {
            index: header.fragment_index,
            count: header.fragment_count,
        });
    }
    let payload_len =
        u16::try_from(payload.len()).map_err(|_| FrameEncodeError::PayloadTooLarge(payload.len()))?;
    let sender = truncate_sender_id(&header.sender_id).as_bytes();

    let mut out =
        Vec::with_capacity(FIXED_HEADER_LEN + sender.len() + PAYLOAD_LEN_SIZE + payload.len());
    out.extend_from_slice(&MAGIC);
    out.push(PROTOCOL_VERSION);
    out.extend_from_slice(&header.message_id.to_be_bytes());
    out.push(header.fragment_index);
    out.push(header.fragment_count);
    out.push(header.hop_budget);
    // truncate_sender_id keeps this within u8
    out.push(sender.len() as u8);
    out.extend_from_slice(sender);
    out.extend_from_slice(&payload_len.to_be_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

fn chunk_size(max_payload: usize) -> usize {
    max_payload.clamp(1, u16::MAX as usize)
}

/// Number of fragments a message of `message_len` bytes is split into.
pub fn fragment_count(message_len: usize, max_payload: usize) -> Result<usize, FrameEncodeError> {
    let count = message_len.div_ceil(chunk_size(max_payload)).max(1);
    if count > MAX_FRAGMENTS {
        return Err(FrameEncodeError::TooManyFragments(count));
    }
    Ok(count)
}

/// Total bytes of the frames `fragment_message` produces, without encoding them.
/// Returns the fragment count alongside.
pub fn encoded_len(
    message_len: usize,
    sender_id: &str,
    max_payload: usize,
) -> Result<(usize, usize), FrameEncodeError> {
    let count = fragment_count(message_len, max_payload)?;
    let per_frame = FIXED_HEADER_LEN + truncate_sender_id(sender_id).len() + PAYLOAD_LEN_SIZE;
    Ok((count, count * per_frame + message_len))
}

/// Split a message into `max_payload`-sized chunks and encode one frame per chunk.
/// An empty message still yields one (empty) fragment.
pub fn fragment_message(
    message_id: u32,
    sender_id: &str,
    hop_budget: u8,
    message: &[u8],
    max_payload: usize,
) -> Result<Vec<Vec<u8>>, FrameEncodeError> {
    let size = chunk_size(max_payload);
    let count = fragment_count(message.len(), max_payload)?;
    let chunks: Vec<&[u8]> = if message.is_empty() {
        vec![message]
    } else {
        message.chunks(size).collect()
    };
    let sender_id = truncate_sender_id(sender_id);
    chunks
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| {
            let header = FrameHeader {
                message_id,
                fragment_index: i as u8,
                fragment_count: count as u8,
                hop_budget,
                sender_id: Cow::Borrowed(sender_id),
            };
            encode_frame(&header, chunk)
        })
        .collect()
}

/// Error encoding a frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameEncodeError {
    #[error("message needs {0} fragments (max {MAX_FRAGMENTS})")]
    TooManyFragments(usize),
    #[error("payload of {0} bytes does not fit a frame")]
    PayloadTooLarge(usize),
    #[error("fragment index {index} invalid for count {count}")]
    InvalidFragment { index: u8, count: u8 },
}

/// Decode and validate one frame. Bytes after the payload are ignored.
pub fn decode_frame(bytes: &[u8]) -> Result<Frame<'_>, FrameDecodeError> {
    if bytes.len() < MIN_FRAME_LEN {
        return Err(FrameDecodeError::TooShort(bytes.len()));
    }
    if bytes[0..2] != MAGIC {
        return Err(FrameDecodeError::BadMagic);
    }
    if bytes[2] != PROTOCOL_VERSION {
        return Err(FrameDecodeError::UnsupportedVersion(bytes[2]));
    }
    let message_id = u32::from_be_bytes([bytes[3], bytes[4], bytes[5], bytes[6]]);
    let fragment_index = bytes[7];
    let fragment_count = bytes[8];
    if fragment_count == 0 || fragment_count as usize > MAX_FRAGMENTS {
        return Err(FrameDecodeError::InvalidFragmentCount(fragment_count));
    }
    let hop_budget = bytes[9];
    let sender_len = bytes[10] as usize;

    let mut idx = FIXED_HEADER_LEN;
    if idx + sender_len + PAYLOAD_LEN_SIZE > bytes.len() {
        return Err(FrameDecodeError::Truncated);
    }
    let sender_id = String::from_utf8_lossy(&bytes[idx..idx + sender_len]);
    idx += sender_len;
    let payload_len = u16::from_be_bytes([bytes[idx], bytes[idx + 1]]) as usize;
    idx += PAYLOAD_LEN_SIZE;
    if idx + payload_len > bytes.len() {
        return Err(FrameDecodeError::Truncated);
    }

    Ok(Frame {
        header: FrameHeader {
            message_id,
            fragment_index,
            fragment_count,
            hop_budget,
            sender_id,
        },
        payload: &bytes[idx..idx + payload_len],
    })
}

/// Error decoding a frame. Foreign or corrupt traffic on the medium lands here.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameDecodeError {
    #[error("frame too short ({0} bytes)")]
    TooShort(usize),
    #[error("bad magic")]
    BadMagic,
    #[error("unsupported version {0}")]
    UnsupportedVersion(u8),
    #[error("invalid fragment count {0}")]
    InvalidFragmentCount(u8),
    #[error("declared length runs past end of frame")]
    Truncated,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(sender: &str) -> FrameHeader<'_> {
        FrameHeader {
            message_id: 0xdead_beef,
            fragment_index: 1,
            fragment_count: 3,
            hop_budget: 4,
            sender_id: Cow::Borrowed(sender),
        }
    }

    #[test]
    fn roundtrip_frame() {
        let frame = encode_frame(&header("device-A"), b"HELP").unwrap();
        let decoded = decode_frame(&frame).unwrap();
        assert_eq!(decoded.header, header("device-A"));
        assert_eq!(decoded.payload, b"HELP");
    }

    #[test]
    fn layout_is_big_endian() {
        let frame = encode_frame(&header("ab"), b"xyz").unwrap();
        assert_eq!(&frame[0..3], &[b'E', b'P', 1]);
        assert_eq!(&frame[3..7], &[0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(&frame[7..11], &[1, 3, 4, 2]);
        assert_eq!(&frame[11..13], b"ab");
        assert_eq!(&frame[13..15], &[0, 3]);
        assert_eq!(&frame[15..], b"xyz");
    }

    #[test]
    fn fragment_count_and_sizes() {
        let msg = b"HELP 37.5,-122.1";
        let frames = fragment_message(7, "device-A", 4, msg, 10).unwrap();
        assert_eq!(frames.len(), 2);
        let a = decode_frame(&frames[0]).unwrap();
        let b = decode_frame(&frames[1]).unwrap();
        assert_eq!(a.header.fragment_count, 2);
        assert_eq!(a.payload, b"HELP 37.5,");
        assert_eq!(b.header.fragment_index, 1);
        assert_eq!(b.payload, b"-122.1");
    }

    #[test]
    fn empty_message_yields_one_fragment() {
        let frames = fragment_message(1, "a", 4, b"", 20).unwrap();
        assert_eq!(frames.len(), 1);
        let f = decode_frame(&frames[0]).unwrap();
        assert_eq!(f.header.fragment_count, 1);
        assert!(f.payload.is_empty());
    }

    #[test]
    fn too_many_fragments_rejected() {
        let msg = vec![0u8; 33];
        assert_eq!(
            fragment_message(1, "a", 4, &msg, 1),
            Err(FrameEncodeError::TooManyFragments(33))
        );
        assert!(fragment_message(1, "a", 4, &msg[..32], 1).is_ok());
    }

    #[test]
    fn oversized_payload_rejected() {
        let big = vec![0u8; u16::MAX as usize + 1];
        let mut h = header("a");
        h.fragment_index = 0;
        assert_eq!(
            encode_frame(&h, &big),
            Err(FrameEncodeError::PayloadTooLarge(big.len()))
        );
    }

    #[test]
    fn sender_id_truncated_on_char_boundary() {
        let long = "é".repeat(20); // 40 bytes
        let t = truncate_sender_id(&long);
        assert_eq!(t.len(), 30);
        assert_eq!(truncate_sender_id("short"), "short");
        let frame = encode_frame(&header(&long), b"").unwrap();
        let decoded = decode_frame(&frame).unwrap();
        assert_eq!(decoded.header.sender_id, t);
    }

    #[test]
    fn rejects_short_buffer() {
        let frame = encode_frame(&header("a"), b"x").unwrap();
        assert_eq!(
            decode_frame(&frame[..MIN_FRAME_LEN - 1]),
            Err(FrameDecodeError::TooShort(MIN_FRAME_LEN - 1))
        );
        assert_eq!(decode_frame(&[]), Err(FrameDecodeError::TooShort(0)));
    }

    #[test]
    fn rejects_bad_magic_and_version() {
        let mut frame = encode_frame(&header("a"), b"x").unwrap();
        frame[2] = 2;
        assert_eq!(
            decode_frame(&frame),
            Err(FrameDecodeError::UnsupportedVersion(2))
        );
        frame[2] = 1;
        frame[0] = b'X';
        assert_eq!(decode_frame(&frame), Err(FrameDecodeError::BadMagic));
    }

    #[test]
    fn rejects_invalid_fragment_count() {
        let mut frame = encode_frame(&header("a"), b"x").unwrap();
        frame[8] = 0;
        assert_eq!(
            decode_frame(&frame),
            Err(FrameDecodeError::InvalidFragmentCount(0))
        );
        frame[8] = 33;
        assert_eq!(
            decode_frame(&frame),
            Err(FrameDecodeError::InvalidFragmentCount(33))
        );
    }

    #[test]
    fn rejects_lengths_past_end() {
        let frame = encode_frame(&header("device"), b"payload").unwrap();
        // payload cut short
        assert_eq!(
            decode_frame(&frame[..frame.len() - 1]),
            Err(FrameDecodeError::Truncated)
        );
        // sender id length claims more than present
        let mut bad = frame.clone();
        bad[10] = 200;
        assert_eq!(decode_frame(&bad), Err(FrameDecodeError::Truncated));
    }

    #[test]
    fn trailing_bytes_ignored() {
        let mut frame = encode_frame(&header("a"), b"abc").unwrap();
        frame.extend_from_slice(&[0, 0, 0]);
        assert_eq!(decode_frame(&frame).unwrap().payload, b"abc");
    }

    #[test]
    fn invalid_utf8_sender_is_lossy() {
        let mut frame = encode_frame(&header("ab"), b"").unwrap();
        frame[11] = 0xff;
        let decoded = decode_frame(&frame).unwrap();
        assert_eq!(decoded.header.sender_id, "\u{fffd}b");
    }

    #[test]
    fn encoded_len_matches_fragments() {
        let long_sender = "x".repeat(40);
        for (len, sender, size) in [
            (0, "a", 20),
            (16, "device-A", 10),
            (20, "device-A", 20),
            (21, long_sender.as_str(), 20),
            (640, "peer", 20),
        ] {
            let msg = vec![b'm'; len];
            let frames = fragment_message(1, sender, 4, &msg, size).unwrap();
            let total: usize = frames.iter().map(Vec::len).sum();
            assert_eq!(encoded_len(len, sender, size).unwrap(), (frames.len(), total));
        }
        assert_eq!(
            encoded_len(641, "peer", 20),
            Err(FrameEncodeError::TooManyFragments(33))
        );
    }
}
