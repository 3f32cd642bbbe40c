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

//! Role settings and their reference defaults

use std::time::Duration;
use crate::frame::DeviceId;
use crate::protocol::*;
use crate::signal::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("chunk size must be at least 1 byte")]
    EmptyChunk,
    #[error("chunk size {0} gives a {} byte response, over the {} byte frame limit", .0 + RESPONSE_OVERHEAD, MAX_FRAME_LEN)]
    ChunkTooLarge(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponderConfig {
    pub chunk_size: usize,
    /// Sequence number answered with chunk index 0
    pub sequence_offset: u8,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        ResponderConfig {
            chunk_size: CHUNK_SIZE,
            sequence_offset: SEQUENCE_OFFSET,
        }
    }
}

impl ResponderConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::EmptyChunk);
        }
        if self.chunk_size + RESPONSE_OVERHEAD > MAX_FRAME_LEN {
            return Err(ConfigError::ChunkTooLarge(self.chunk_size));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitiatorConfig {
    pub device_id: DeviceId,
    pub start_sequence: u8,
    /// Receiver activation delay after each poll
    pub turnaround: Duration,
    /// Response window; zero waits forever
    pub response_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for InitiatorConfig {
    fn default() -> Self {
        InitiatorConfig {
            device_id: DeviceId::default(),
            start_sequence: SEQUENCE_OFFSET,
            turnaround: uus_to_duration(TX_TO_RX_DELAY_UUS),
            response_timeout: uus_to_duration(RX_RESP_TIMEOUT_UUS),
            retry: RetryPolicy::default(),
        }
    }
}
