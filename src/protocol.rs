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

//! Blink/response wire constants

use std::time::Duration;

/// Bytes of frame check sequence appended to every frame by the radio
pub const FCS_LEN: usize = 2;

/// Largest frame the radio will report (standard PHY header)
pub const MAX_FRAME_LEN: usize = 127;

// ----------------------------------------------------------------------------
// Poll (blink) frame
// ----------------------------------------------------------------------------

/// Poll frame length on air, FCS included
pub const POLL_FRAME_LEN: usize = 14;

/// Frame control - multipurpose frame using 64-bit addressing
pub const POLL_FRAME_CONTROL: u8 = 0xC5;

pub const POLL_SEQUENCE_IDX: usize = 1;

pub const POLL_SOURCE_IDX: usize = 2;

pub const POLL_ENCODING_IDX: usize = 10;

/// Encoding header - no extended id, temperature or battery status
pub const POLL_ENCODING_HEADER: u8 = 0x43;

pub const POLL_EXT_IDX: usize = 11;

/// Extension header - sender listens for a response right after the blink
pub const POLL_EXT_RESPONSE_EXPECTED: u8 = 0x02;

/// Device id announced by the initiator unless configured otherwise
pub const DEFAULT_DEVICE_ID: [u8; 8] = *b"DECAWAVE";

// ----------------------------------------------------------------------------
// Response (data) frame
// ----------------------------------------------------------------------------

/// Frame control - data frame, 16-bit source and 64-bit destination addressing
pub const RESPONSE_FRAME_CONTROL: [u8; 2] = [0x41, 0x8C];

pub const RESPONSE_SEQUENCE_IDX: usize = 2;

/// Application id for data frames
pub const RESPONSE_APP_ID: [u8; 2] = [0x9A, 0x60];

pub const RESPONSE_APP_ID_IDX: usize = 3;

pub const RESPONSE_DEST_IDX: usize = 5;

pub const RESPONSE_SOURCE_IDX: usize = 13;

/// Fixed 16-bit source address of the responder
pub const RESPONSE_SOURCE_ADDR: [u8; 2] = *b"DW";

pub const RESPONSE_FUNCTION_IDX: usize = 15;

/// Function code - activity control message
pub const RESPONSE_FUNCTION_CODE: u8 = 0x10;

pub const RESPONSE_ACTIVITY_IDX: usize = 16;

/// Activity code - activity finished
pub const RESPONSE_ACTIVITY_CODE: u8 = 0x00;

/// Header bytes preceding the chunk (two reserved bytes at 17/18)
pub const RESPONSE_HEADER_LEN: usize = 19;

/// Bytes a response adds around its chunk
pub const RESPONSE_OVERHEAD: usize = RESPONSE_HEADER_LEN + FCS_LEN;

// ----------------------------------------------------------------------------
// Chunks
// ----------------------------------------------------------------------------

/// Bytes of blob carried by each response
pub const CHUNK_SIZE: usize = 66;

/// Fill of the priming chunk (index 0)
pub const PRIMING_FILL: u8 = 0xFF;

/// Fill for chunk bytes past the end of the blob
pub const PADDING_FILL: u8 = 0xAA;

/// Sequence number that maps to chunk index 0
pub const SEQUENCE_OFFSET: u8 = 5;

// ----------------------------------------------------------------------------
// Timing
// ----------------------------------------------------------------------------

/// Delay from end of poll transmission to receiver activation, in UWB microseconds
pub const TX_TO_RX_DELAY_UUS: u32 = 60;

/// Response timeout, in UWB microseconds
pub const RX_RESP_TIMEOUT_UUS: u32 = 100_000;

/// Convert UWB microseconds (512/499.2 us each) to a duration
pub fn uus_to_duration(uus: u32) -> Duration {
    Duration::from_nanos(uus as u64 * 512_000 * 10 / 4992)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uus_conversion() {
        assert_eq!(uus_to_duration(0), Duration::ZERO);
        // 4992 uus are exactly 5120 us
        assert_eq!(uus_to_duration(4992), Duration::from_micros(5120));
        let timeout = uus_to_duration(RX_RESP_TIMEOUT_UUS);
        assert!(timeout > Duration::from_millis(102) && timeout < Duration::from_millis(103));
    }

    #[test]
    fn test_frame_lengths() {
        assert_eq!(RESPONSE_OVERHEAD, 21);
        assert_eq!(RESPONSE_OVERHEAD + CHUNK_SIZE, 87);
        assert!(RESPONSE_OVERHEAD + CHUNK_SIZE <= MAX_FRAME_LEN);
    }
}
