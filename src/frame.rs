// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! Poll and response frame codec
//!
//! Frames have no length or type field of their own. A frame is recognised
//! only by its exact length and the protocol constants at fixed offsets, so
//! the codec is the one place that knows those offsets.

use std::fmt;
use crate::chunk::Chunk;
use crate::protocol::*;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("expected {expected} bytes, got {actual}")]
    Length { expected: usize, actual: usize },
    #[error("frame of {0} bytes is too short")]
    TooShort(usize),
    #[error("frame of {0} bytes exceeds the maximum frame length")]
    TooLong(usize),
    #[error("byte {index} is 0x{actual:02X}, expected 0x{expected:02X}")]
    Header { index: usize, expected: u8, actual: u8 },
}

// ============================================================================
// Addresses
// ============================================================================

/// 64-bit device identifier carried by a poll and echoed as the response destination
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId(pub [u8; 8]);

impl DeviceId {
    /// Build an id from up to eight bytes of text, space padded
    pub fn from_text(text: &str) -> Self {
        let mut id = [b' '; 8];
        for (slot, byte) in id.iter_mut().zip(text.bytes()) {
            *slot = byte;
        }
        DeviceId(id)
    }
}

impl Default for DeviceId {
    fn default() -> Self {
        DeviceId(DEFAULT_DEVICE_ID)
    }
}

impl fmt::Debug for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceId({})", self)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
            write!(f, "{}", String::from_utf8_lossy(&self.0))
        } else {
            for b in &self.0 {
                write!(f, "{:02X}", b)?;
            }
            Ok(())
        }
    }
}

// ============================================================================
// Frames
// ============================================================================

/// Blink frame asking the responder for the chunk behind `sequence`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollFrame {
    pub sequence: u8,
    pub source: DeviceId,
}

impl PollFrame {
    pub fn new(sequence: u8, source: DeviceId) -> Self {
        PollFrame { sequence, source }
    }

    pub fn set_sequence(&mut self, sequence: u8) {
        self.sequence = sequence;
    }

    pub fn encode(&self) -> [u8; POLL_FRAME_LEN] {
        let mut buf = [0u8; POLL_FRAME_LEN];
        buf[0] = POLL_FRAME_CONTROL;
        buf[POLL_SEQUENCE_IDX] = self.sequence;
        buf[POLL_SOURCE_IDX..POLL_SOURCE_IDX + 8].copy_from_slice(&self.source.0);
        buf[POLL_ENCODING_IDX] = POLL_ENCODING_HEADER;
        buf[POLL_EXT_IDX] = POLL_EXT_RESPONSE_EXPECTED;
        buf
    }
}

/// Data frame answering a poll; borrows its payload from the received bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseFrame<'a> {
    pub sequence: u8,
    pub destination: DeviceId,
    pub payload: &'a [u8],
}

/// Any frame this protocol puts on the air
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame<'a> {
    Poll(PollFrame),
    Response(ResponseFrame<'a>),
}

impl<'a> Frame<'a> {
    /// Classify received bytes, or report why they belong to neither shape
    pub fn decode(bytes: &'a [u8]) -> Result<Frame<'a>, FrameError> {
        match decode_poll(bytes) {
            Ok(poll) => Ok(Frame::Poll(poll)),
            Err(poll_err) => {
                if bytes.len() < RESPONSE_OVERHEAD || bytes[..2] != RESPONSE_FRAME_CONTROL {
                    return Err(poll_err);
                }
                decode_response(bytes).map(Frame::Response)
            }
        }
    }
}

// ============================================================================
// Codec
// ============================================================================

pub fn encode_poll(sequence: u8, source: DeviceId) -> [u8; POLL_FRAME_LEN] {
    PollFrame::new(sequence, source).encode()
}

pub fn decode_poll(bytes: &[u8]) -> Result<PollFrame, FrameError> {
    if bytes.len() != POLL_FRAME_LEN {
        return Err(FrameError::Length { expected: POLL_FRAME_LEN, actual: bytes.len() });
    }

    expect_byte(bytes, 0, POLL_FRAME_CONTROL)?;
    expect_byte(bytes, POLL_ENCODING_IDX, POLL_ENCODING_HEADER)?;
    expect_byte(bytes, POLL_EXT_IDX, POLL_EXT_RESPONSE_EXPECTED)?;

    let mut source = [0u8; 8];
    source.copy_from_slice(&bytes[POLL_SOURCE_IDX..POLL_SOURCE_IDX + 8]);

    Ok(PollFrame {
        sequence: bytes[POLL_SEQUENCE_IDX],
        source: DeviceId(source),
    })
}

/// Build a response echoing `sequence`, addressed to `destination`, carrying `chunk`.
/// The trailing FCS bytes are left zero for the radio to fill.
pub fn encode_response(sequence: u8, destination: DeviceId, chunk: &Chunk) -> Vec<u8> {
    let mut buf = vec![0u8; RESPONSE_OVERHEAD + chunk.len()];
    buf[..2].copy_from_slice(&RESPONSE_FRAME_CONTROL);
    buf[RESPONSE_SEQUENCE_IDX] = sequence;
    buf[RESPONSE_APP_ID_IDX..RESPONSE_APP_ID_IDX + 2].copy_from_slice(&RESPONSE_APP_ID);
    buf[RESPONSE_DEST_IDX..RESPONSE_DEST_IDX + 8].copy_from_slice(&destination.0);
    buf[RESPONSE_SOURCE_IDX..RESPONSE_SOURCE_IDX + 2].copy_from_slice(&RESPONSE_SOURCE_ADDR);
    buf[RESPONSE_FUNCTION_IDX] = RESPONSE_FUNCTION_CODE;
    buf[RESPONSE_ACTIVITY_IDX] = RESPONSE_ACTIVITY_CODE;
    buf[RESPONSE_HEADER_LEN..RESPONSE_HEADER_LEN + chunk.len()].copy_from_slice(chunk);
    buf
}

/// Expose the sequence echo and payload region of a response.
/// Only the length is checked; header content is taken as is.
pub fn decode_response(bytes: &[u8]) -> Result<ResponseFrame<'_>, FrameError> {
    if bytes.len() < RESPONSE_OVERHEAD {
        return Err(FrameError::TooShort(bytes.len()));
    }
    if bytes.len() > MAX_FRAME_LEN {
        return Err(FrameError::TooLong(bytes.len()));
    }

    let mut destination = [0u8; 8];
    destination.copy_from_slice(&bytes[RESPONSE_DEST_IDX..RESPONSE_DEST_IDX + 8]);

    Ok(ResponseFrame {
        sequence: bytes[RESPONSE_SEQUENCE_IDX],
        destination: DeviceId(destination),
        payload: &bytes[RESPONSE_HEADER_LEN..bytes.len() - FCS_LEN],
    })
}

fn expect_byte(bytes: &[u8], index: usize, expected: u8) -> Result<(), FrameError> {
    let actual = bytes[index];
    if actual == expected {
        Ok(())
    } else {
        Err(FrameError::Header { index, expected, actual })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::ChunkStore;

    fn store() -> ChunkStore<Vec<u8>> {
        ChunkStore::new((0..200u8).collect(), CHUNK_SIZE)
    }

    #[test]
    fn test_poll_layout() {
        let frame = encode_poll(7, DeviceId::default());
        assert_eq!(
            frame,
            [0xC5, 7, b'D', b'E', b'C', b'A', b'W', b'A', b'V', b'E', 0x43, 0x02, 0, 0]
        );
    }

    #[test]
    fn test_poll_sequence_recovered() {
        let id = DeviceId::from_text("TAG01");
        for s in 0..=255u8 {
            let poll = decode_poll(&encode_poll(s, id)).expect("valid poll");
            assert_eq!(poll.sequence, s);
            assert_eq!(poll.source, id);
        }
    }

    #[test]
    fn test_poll_set_sequence() {
        let mut poll = PollFrame::new(5, DeviceId::default());
        poll.set_sequence(6);
        assert_eq!(poll.encode()[POLL_SEQUENCE_IDX], 6);
    }

    #[test]
    fn test_decode_poll_rejects_wrong_length() {
        let frame = encode_poll(9, DeviceId::default());
        assert_eq!(
            decode_poll(&frame[..13]),
            Err(FrameError::Length { expected: 14, actual: 13 })
        );

        let mut long = frame.to_vec();
        long.push(0);
        assert!(decode_poll(&long).is_err());
        assert!(decode_poll(&[]).is_err());
    }

    #[test]
    fn test_decode_poll_rejects_header_mismatch() {
        let mut frame = encode_poll(9, DeviceId::default());
        frame[0] = 0x41;
        assert_eq!(
            decode_poll(&frame),
            Err(FrameError::Header { index: 0, expected: 0xC5, actual: 0x41 })
        );

        let mut frame = encode_poll(9, DeviceId::default());
        frame[POLL_ENCODING_IDX] = 0x00;
        assert!(decode_poll(&frame).is_err());

        let mut frame = encode_poll(9, DeviceId::default());
        frame[POLL_EXT_IDX] = 0x00;
        assert!(decode_poll(&frame).is_err());
    }

    #[test]
    fn test_response_layout() {
        let chunk = store().get_chunk(1);
        let id = DeviceId(*b"ABCDEFGH");
        let frame = encode_response(6, id, &chunk);

        assert_eq!(frame.len(), 87);
        assert_eq!(
            &frame[..RESPONSE_HEADER_LEN],
            &[
                0x41, 0x8C, 6, 0x9A, 0x60,
                b'A', b'B', b'C', b'D', b'E', b'F', b'G', b'H',
                b'D', b'W', 0x10, 0x00, 0x00, 0x00,
            ]
        );
        assert_eq!(&frame[RESPONSE_HEADER_LEN..85], &chunk[..]);
        assert_eq!(&frame[85..], &[0, 0]);
    }

    #[test]
    fn test_response_length_fixed() {
        let store = store();
        for index in [0u32, 1, 3, 4, 200] {
            let frame = encode_response(0, DeviceId::default(), &store.get_chunk(index));
            assert_eq!(frame.len(), 21 + 66);
        }
        let empty = ChunkStore::new(Vec::new(), CHUNK_SIZE);
        assert_eq!(empty.blob_len(), 0);
        assert_eq!(encode_response(0, DeviceId::default(), &empty.get_chunk(1)).len(), 87);
    }

    #[test]
    fn test_decode_response() {
        let chunk = store().get_chunk(2);
        let id = DeviceId::from_text("TAG01");
        let frame = encode_response(7, id, &chunk);

        let resp = decode_response(&frame).expect("valid response");
        assert_eq!(resp.sequence, 7);
        assert_eq!(resp.destination, id);
        assert_eq!(resp.payload, &chunk[..]);
    }

    #[test]
    fn test_decode_response_rejects_bad_length() {
        assert_eq!(decode_response(&[0x41; 20]), Err(FrameError::TooShort(20)));
        assert_eq!(decode_response(&[0x41; 128]), Err(FrameError::TooLong(128)));
        assert!(decode_response(&[]).is_err());

        // A bare header with no payload is still a response
        let resp = decode_response(&[0u8; 21]).expect("minimal response");
        assert!(resp.payload.is_empty());
    }

    #[test]
    fn test_frame_classification() {
        let poll = encode_poll(12, DeviceId::default());
        assert_eq!(
            Frame::decode(&poll),
            Ok(Frame::Poll(PollFrame::new(12, DeviceId::default())))
        );

        let response = encode_response(12, DeviceId::default(), &store().get_chunk(0));
        match Frame::decode(&response) {
            Ok(Frame::Response(resp)) => assert_eq!(resp.sequence, 12),
            other => panic!("expected response, got {:?}", other),
        }

        assert!(Frame::decode(&[0u8; 30]).is_err());
        assert!(Frame::decode(&[0xC5, 1, 2]).is_err());
    }

    #[test]
    fn test_device_id_text() {
        assert_eq!(DeviceId::from_text("TAG").0, *b"TAG     ");
        assert_eq!(DeviceId::from_text("LONGER THAN EIGHT").0, *b"LONGER T");
        assert_eq!(DeviceId::default().to_string(), "DECAWAVE");
        assert_eq!(DeviceId([0, 1, 2, 3, 4, 5, 6, 0xFF]).to_string(), "00010203040506FF");
    }
}
