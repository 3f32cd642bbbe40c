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

use std::marker::PhantomData;
use tracing::{debug, info, trace, warn};
use crate::chunk::{chunk_index, max_blob_len, BlobSource, ChunkStore};
use crate::config::{ConfigError, ResponderConfig};
use crate::frame::{encode_response, Frame, PollFrame};
use crate::radio::{Radio, RadioError, RadioEvent};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ResponderError {
    #[error("{source} (in state: {state})")]
    Radio {
        state: &'static str,
        #[source]
        source: RadioError,
    },
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

// ============================================================================
// States
// ============================================================================

pub struct AwaitingPoll;
pub struct ValidatingFrame;
pub struct BuildingResponse;
pub struct Transmitting;

// ============================================================================
// FSM Structure
// ============================================================================

pub struct ResponderFsm<State> {
    state: PhantomData<State>,
    radio: Box<dyn Radio>,
    store: ChunkStore<Box<dyn BlobSource>>,
    config: ResponderConfig,
    rx_frame: Vec<u8>,
    poll: Option<PollFrame>,
    tx_frame: Vec<u8>,
    responses_sent: u64,
}

// ============================================================================
// Traits
// ============================================================================

pub trait ResponderStatus {
    fn state(&self) -> &'static str;
    fn responses_sent(&self) -> u64;
}

pub trait ResponderState: ResponderStatus + Send {
    fn step(self: Box<Self>) -> Result<Box<dyn ResponderState>, ResponderError>;
}

impl<S> ResponderStatus for ResponderFsm<S> {
    fn state(&self) -> &'static str {
        Self::state_name()
    }

    fn responses_sent(&self) -> u64 {
        self.responses_sent
    }
}

// ============================================================================
// Helper to transition states
// ============================================================================

impl<S> ResponderFsm<S> {
    fn transition<T>(self) -> Box<ResponderFsm<T>> {
        Box::new(ResponderFsm {
            state: PhantomData,
            radio: self.radio,
            store: self.store,
            config: self.config,
            rx_frame: self.rx_frame,
            poll: self.poll,
            tx_frame: self.tx_frame,
            responses_sent: self.responses_sent,
        })
    }

    fn state_name() -> &'static str {
        let type_name = std::any::type_name::<S>();
        type_name.split("::").last().unwrap_or(type_name)
    }

    fn radio_error(source: RadioError) -> ResponderError {
        ResponderError::Radio { state: Self::state_name(), source }
    }
}

// ============================================================================
// State Implementations
// ============================================================================

impl ResponderState for ResponderFsm<AwaitingPoll> {
    fn step(self: Box<Self>) -> Result<Box<dyn ResponderState>, ResponderError> {
        let mut fsm = *self;
        fsm.radio.enable_receive().map_err(Self::radio_error)?;

        match fsm.radio.wait_event().map_err(Self::radio_error)? {
            RadioEvent::FrameReceived => {
                fsm.rx_frame = fsm.radio.read_received_frame().map_err(Self::radio_error)?;
                fsm.radio.clear_event(RadioEvent::FrameReceived);
                trace!(len = fsm.rx_frame.len(), "frame received");
                let next = fsm.transition::<ValidatingFrame>();
                Ok(next as Box<dyn ResponderState>)
            }
            RadioEvent::ReceiveError => {
                fsm.radio.clear_event(RadioEvent::ReceiveError);
                trace!("receive error, listening again");
                Ok(Box::new(fsm) as Box<dyn ResponderState>)
            }
            other => {
                fsm.radio.clear_event(other);
                Ok(Box::new(fsm) as Box<dyn ResponderState>)
            }
        }
    }
}

impl ResponderState for ResponderFsm<ValidatingFrame> {
    fn step(self: Box<Self>) -> Result<Box<dyn ResponderState>, ResponderError> {
        let mut fsm = *self;

        let poll = match Frame::decode(&fsm.rx_frame) {
            Ok(Frame::Poll(poll)) => Some(poll),
            Ok(Frame::Response(resp)) => {
                trace!(sequence = resp.sequence, "response from another responder ignored");
                None
            }
            Err(e) => {
                trace!(error = %e, "frame discarded");
                None
            }
        };

        match poll {
            Some(poll) => {
                debug!(sequence = poll.sequence, source = %poll.source, "poll received");
                fsm.poll = Some(poll);
                let next = fsm.transition::<BuildingResponse>();
                Ok(next as Box<dyn ResponderState>)
            }
            None => {
                let next = fsm.transition::<AwaitingPoll>();
                Ok(next as Box<dyn ResponderState>)
            }
        }
    }
}

impl ResponderState for ResponderFsm<BuildingResponse> {
    fn step(self: Box<Self>) -> Result<Box<dyn ResponderState>, ResponderError> {
        let mut fsm = *self;
        let Some(poll) = fsm.poll.take() else {
            let next = fsm.transition::<AwaitingPoll>();
            return Ok(next as Box<dyn ResponderState>);
        };

        // Sequences below the offset have no chunk; answer them like index 0
        let index = chunk_index(poll.sequence, fsm.config.sequence_offset);
        let chunk = fsm.store.get_chunk(index.unwrap_or(0));
        fsm.tx_frame = encode_response(poll.sequence, poll.source, &chunk);

        debug!(sequence = poll.sequence, chunk = ?index, dest = %poll.source, "response built");
        let next = fsm.transition::<Transmitting>();
        Ok(next as Box<dyn ResponderState>)
    }
}

impl ResponderState for ResponderFsm<Transmitting> {
    fn step(self: Box<Self>) -> Result<Box<dyn ResponderState>, ResponderError> {
        let mut fsm = *self;
        fsm.radio.transmit(&fsm.tx_frame, false).map_err(Self::radio_error)?;

        // No timeout: a transmit that never completes holds the loop here
        loop {
            match fsm.radio.wait_event().map_err(Self::radio_error)? {
                RadioEvent::TransmitDone => {
                    fsm.radio.clear_event(RadioEvent::TransmitDone);
                    break;
                }
                other => fsm.radio.clear_event(other),
            }
        }

        fsm.responses_sent += 1;
        debug!(
            len = fsm.tx_frame.len(),
            sent = fsm.responses_sent,
            data = %hex::encode_upper(&fsm.tx_frame),
            "response sent"
        );
        let next = fsm.transition::<AwaitingPoll>();
        Ok(next as Box<dyn ResponderState>)
    }
}

// ============================================================================
// Constructor
// ============================================================================

impl ResponderFsm<AwaitingPoll> {
    pub fn new(
        radio: Box<dyn Radio>,
        blob: Box<dyn BlobSource>,
        config: ResponderConfig,
    ) -> Result<Box<dyn ResponderState>, ResponderError> {
        config.validate()?;

        let store = ChunkStore::new(blob, config.chunk_size);
        info!(
            blob_len = store.blob_len(),
            chunk_size = store.chunk_size(),
            chunks = store.data_chunks(),
            first_sequence = config.sequence_offset as u32 + 1,
            "responder ready"
        );

        let capacity = max_blob_len(config.sequence_offset, config.chunk_size);
        if store.blob_len() as u64 > capacity {
            warn!(
                blob_len = store.blob_len(),
                capacity,
                "blob is larger than one pass of the sequence number; initiators see only the first part"
            );
        }

        Ok(Box::new(ResponderFsm {
            state: PhantomData::<AwaitingPoll>,
            radio,
            store,
            config,
            rx_frame: Vec::new(),
            poll: None,
            tx_frame: Vec::new(),
            responses_sent: 0,
        }))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{encode_poll, DeviceId};
    use crate::protocol::*;
    use crate::radio::{MockRadio, MockRx};

    fn blob(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 256) as u8).collect()
    }

    // Runs until the mock's script is exhausted
    fn run_responder(mut fsm: Box<dyn ResponderState>) -> ResponderError {
        loop {
            match fsm.step() {
                Ok(next) => fsm = next,
                Err(e) => return e,
            }
        }
    }

    fn expected_response(sequence: u8, source: DeviceId, data: &[u8]) -> Vec<u8> {
        let store = ChunkStore::new(data.to_vec(), CHUNK_SIZE);
        let index = chunk_index(sequence, SEQUENCE_OFFSET).unwrap_or(0);
        encode_response(sequence, source, &store.get_chunk(index))
    }

    fn assert_link_closed(err: ResponderError) {
        match err {
            ResponderError::Radio { state, source: RadioError::Disconnected } => {
                assert_eq!(state, "AwaitingPoll");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_priming_poll() {
        let tag = DeviceId::from_text("TAG01");
        let data = blob(200);

        let response = expected_response(5, tag, &data);
        assert!(response[RESPONSE_HEADER_LEN..RESPONSE_HEADER_LEN + CHUNK_SIZE].iter().all(|&b| b == 0xFF));

        let mock = MockRadio::new(vec![MockRx::Frame(encode_poll(5, tag).to_vec())], vec![response]);
        let fsm = ResponderFsm::new(Box::new(mock), Box::new(data), ResponderConfig::default()).unwrap();

        assert_link_closed(run_responder(fsm));
    }

    #[test]
    fn test_state_progression() {
        let tag = DeviceId::default();
        let data = blob(10);
        let mock = MockRadio::new(
            vec![MockRx::Frame(encode_poll(6, tag).to_vec())],
            vec![expected_response(6, tag, &data)],
        );

        let mut fsm = ResponderFsm::new(Box::new(mock), Box::new(data), ResponderConfig::default()).unwrap();
        let mut states = vec![fsm.state()];
        for _ in 0..4 {
            fsm = fsm.step().expect("step");
            states.push(fsm.state());
        }

        assert_eq!(
            states,
            vec!["AwaitingPoll", "ValidatingFrame", "BuildingResponse", "Transmitting", "AwaitingPoll"]
        );
        assert_eq!(fsm.responses_sent(), 1);
        assert!(fsm.step().is_err());
    }

    #[test]
    fn test_serves_blob_in_chunks() {
        let tag = DeviceId::from_text("TAG02");
        let data = blob(200);

        let mut script = Vec::new();
        let mut expected = Vec::new();
        for s in 6..=9u8 {
            script.push(MockRx::Frame(encode_poll(s, tag).to_vec()));
            expected.push(expected_response(s, tag, &data));
        }

        assert_eq!(&expected[0][19..85], &data[0..66]);
        assert_eq!(&expected[1][19..85], &data[66..132]);
        assert_eq!(&expected[2][19..85], &data[132..198]);
        assert_eq!(&expected[3][19..21], &data[198..200]);
        assert!(expected[3][21..85].iter().all(|&b| b == 0xAA));

        let mock = MockRadio::new(script, expected);
        let fsm = ResponderFsm::new(Box::new(mock), Box::new(data), ResponderConfig::default()).unwrap();
        assert_link_closed(run_responder(fsm));
    }

    #[test]
    fn test_destination_follows_poll_source() {
        let data = blob(66);
        let first = DeviceId::from_text("FIRST");
        let second = DeviceId::from_text("SECOND");

        let mock = MockRadio::new(
            vec![
                MockRx::Frame(encode_poll(6, first).to_vec()),
                MockRx::Frame(encode_poll(6, second).to_vec()),
            ],
            vec![expected_response(6, first, &data), expected_response(6, second, &data)],
        );
        let fsm = ResponderFsm::new(Box::new(mock), Box::new(data), ResponderConfig::default()).unwrap();
        assert_link_closed(run_responder(fsm));
    }

    #[test]
    fn test_noise_is_ignored() {
        let tag = DeviceId::default();
        let data = blob(100);

        let mut bad_header = encode_poll(6, tag);
        bad_header[POLL_ENCODING_IDX] = 0x44;

        let foreign_response = expected_response(9, tag, &data);

        let mock = MockRadio::new(
            vec![
                MockRx::Error,
                MockRx::Frame(vec![0xC5; 10]),
                MockRx::Frame(bad_header.to_vec()),
                MockRx::Timeout,
                MockRx::Frame(foreign_response),
                MockRx::Frame(encode_poll(7, tag).to_vec()),
            ],
            vec![expected_response(7, tag, &data)],
        );
        let fsm = ResponderFsm::new(Box::new(mock), Box::new(data), ResponderConfig::default()).unwrap();
        assert_link_closed(run_responder(fsm));
    }

    #[test]
    fn test_sequence_below_offset_gets_priming_chunk() {
        let tag = DeviceId::default();
        let data = blob(100);
        let primed = expected_response(2, tag, &data);
        assert!(primed[19..85].iter().all(|&b| b == 0xFF));

        let mock = MockRadio::new(vec![MockRx::Frame(encode_poll(2, tag).to_vec())], vec![primed]);
        let fsm = ResponderFsm::new(Box::new(mock), Box::new(data), ResponderConfig::default()).unwrap();
        assert_link_closed(run_responder(fsm));
    }

    #[test]
    fn test_custom_offset_and_chunk_size() {
        let tag = DeviceId::default();
        let data: Vec<u8> = (1..=10).collect();
        let config = ResponderConfig { chunk_size: 4, sequence_offset: 0 };

        let expected = encode_response(3, tag, &ChunkStore::new(data.clone(), 4).get_chunk(3));
        assert_eq!(expected.len(), RESPONSE_OVERHEAD + 4);
        assert_eq!(&expected[RESPONSE_HEADER_LEN..RESPONSE_HEADER_LEN + 4], &[9, 10, 0xAA, 0xAA]);

        let mock = MockRadio::new(vec![MockRx::Frame(encode_poll(3, tag).to_vec())], vec![expected]);
        let fsm = ResponderFsm::new(Box::new(mock), Box::new(data), config).unwrap();
        assert_link_closed(run_responder(fsm));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mock = MockRadio::new(vec![], vec![]);
        let config = ResponderConfig { chunk_size: 200, ..ResponderConfig::default() };
        match ResponderFsm::new(Box::new(mock), Box::new(blob(1)), config) {
            Err(ResponderError::Config(ConfigError::ChunkTooLarge(200))) => {}
            Err(e) => panic!("unexpected error: {:?}", e),
            Ok(_) => panic!("config accepted"),
        }
    }
}
