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
use tracing::{debug, info};
use crate::config::InitiatorConfig;
use crate::frame::{encode_poll, PollFrame};
use crate::protocol::POLL_FRAME_LEN;
use crate::radio::{InterruptRadio, Radio, RadioError};
use crate::signal::{EventBridge, Outcome, Signal};
use crate::sink::ChunkSink;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum InitiatorError {
    #[error("{source} (in state: {state})")]
    Radio {
        state: &'static str,
        #[source]
        source: RadioError,
    },
    #[error("cannot store chunk: {0}")]
    Sink(#[from] std::io::Error),
    #[error("transfer complete")]
    TransferComplete,
}

// ============================================================================
// States
// ============================================================================

pub struct Idle;
pub struct Polling;
pub struct AwaitingEvent;
pub struct Settling;

// ============================================================================
// FSM Structure
// ============================================================================

pub struct InitiatorFsm<State> {
    state: PhantomData<State>,
    radio: InterruptRadio,
    bridge: EventBridge,
    sink: Box<dyn ChunkSink>,
    poll: PollFrame,
    tx_frame: [u8; POLL_FRAME_LEN],
    signal: Option<Signal>,
    polls_sent: u64,
}

// ============================================================================
// Traits
// ============================================================================

pub trait InitiatorStatus {
    fn state(&self) -> &'static str;
    /// Sequence number of the next poll
    fn sequence(&self) -> u8;
    fn accepted(&self) -> u32;
    fn polls_sent(&self) -> u64;
}

pub trait InitiatorState: InitiatorStatus + Send {
    fn step(self: Box<Self>) -> Result<Box<dyn InitiatorState>, InitiatorError>;
}

impl<S> InitiatorStatus for InitiatorFsm<S> {
    fn state(&self) -> &'static str {
        Self::state_name()
    }

    fn sequence(&self) -> u8 {
        self.bridge.sequence()
    }

    fn accepted(&self) -> u32 {
        self.bridge.accepted()
    }

    fn polls_sent(&self) -> u64 {
        self.polls_sent
    }
}

// ============================================================================
// Helper to transition states
// ============================================================================

impl<S> InitiatorFsm<S> {
    fn transition<T>(self) -> Box<InitiatorFsm<T>> {
        Box::new(InitiatorFsm {
            state: PhantomData,
            radio: self.radio,
            bridge: self.bridge,
            sink: self.sink,
            poll: self.poll,
            tx_frame: self.tx_frame,
            signal: self.signal,
            polls_sent: self.polls_sent,
        })
    }

    fn state_name() -> &'static str {
        let type_name = std::any::type_name::<S>();
        type_name.split("::").last().unwrap_or(type_name)
    }

    fn radio_error(source: RadioError) -> InitiatorError {
        InitiatorError::Radio { state: Self::state_name(), source }
    }
}

// ============================================================================
// State Implementations
// ============================================================================

impl InitiatorState for InitiatorFsm<Idle> {
    fn step(self: Box<Self>) -> Result<Box<dyn InitiatorState>, InitiatorError> {
        let mut fsm = *self;
        fsm.poll.set_sequence(fsm.bridge.sequence());
        fsm.tx_frame = encode_poll(fsm.poll.sequence, fsm.poll.source);
        let next = fsm.transition::<Polling>();
        Ok(next as Box<dyn InitiatorState>)
    }
}

impl InitiatorState for InitiatorFsm<Polling> {
    fn step(self: Box<Self>) -> Result<Box<dyn InitiatorState>, InitiatorError> {
        let mut fsm = *self;

        // Receiver turns on after the turnaround delay; the response timeout runs from there
        fsm.radio.transmit(&fsm.tx_frame, true).map_err(Self::radio_error)?;
        fsm.polls_sent += 1;
        debug!(sequence = fsm.poll.sequence, polls = fsm.polls_sent, "poll transmitted");

        let next = fsm.transition::<AwaitingEvent>();
        Ok(next as Box<dyn InitiatorState>)
    }
}

impl InitiatorState for InitiatorFsm<AwaitingEvent> {
    fn step(self: Box<Self>) -> Result<Box<dyn InitiatorState>, InitiatorError> {
        let mut fsm = *self;

        // Suspension point: each service call blocks until the radio raises an event
        // and runs its callback. Only good-frame, timeout and error events set the signal.
        fsm.signal = loop {
            if let Some(signal) = fsm.bridge.signal().peek() {
                break Some(signal);
            }
            fsm.radio.service().map_err(Self::radio_error)?;
        };

        let next = fsm.transition::<Settling>();
        Ok(next as Box<dyn InitiatorState>)
    }
}

impl InitiatorState for InitiatorFsm<Settling> {
    fn step(self: Box<Self>) -> Result<Box<dyn InitiatorState>, InitiatorError> {
        let mut fsm = *self;

        if let Some((sequence, payload)) = fsm.bridge.take_payload() {
            fsm.sink.accept(sequence, &payload)?;
        }

        if let Some(signal) = fsm.signal.take() {
            match signal.outcome {
                Outcome::Advanced => debug!(next = fsm.bridge.sequence(), "exchange complete"),
                Outcome::Ignored => debug!(sequence = fsm.poll.sequence, "response ignored, polling again"),
                Outcome::TimedOut | Outcome::Failed => {
                    debug!(sequence = fsm.poll.sequence, outcome = ?signal.outcome, "no response, polling again")
                }
            }
            if !signal.delay.is_zero() {
                std::thread::sleep(signal.delay);
            }
        }

        // Events raised during the delay are dropped with the slot
        fsm.bridge.signal().take();

        if fsm.sink.is_complete() {
            info!(accepted = fsm.bridge.accepted(), polls = fsm.polls_sent, "transfer finished");
            return Err(InitiatorError::TransferComplete);
        }

        let next = fsm.transition::<Idle>();
        Ok(next as Box<dyn InitiatorState>)
    }
}

// ============================================================================
// Constructor
// ============================================================================

impl InitiatorFsm<Idle> {
    pub fn new(radio: Box<dyn Radio>, sink: Box<dyn ChunkSink>, config: InitiatorConfig) -> Box<dyn InitiatorState> {
        let bridge = EventBridge::new(config.start_sequence, config.retry);

        let mut radio = InterruptRadio::new(radio);
        radio.register_callbacks(bridge.callbacks());
        radio.set_turnaround_delay(config.turnaround);
        radio.set_response_timeout(config.response_timeout);

        info!(
            device = %config.device_id,
            start_sequence = config.start_sequence,
            timeout_us = config.response_timeout.as_micros() as u64,
            "initiator ready"
        );

        Box::new(InitiatorFsm {
            state: PhantomData::<Idle>,
            radio,
            bridge,
            sink,
            poll: PollFrame::new(config.start_sequence, config.device_id),
            tx_frame: [0; POLL_FRAME_LEN],
            signal: None,
            polls_sent: 0,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use crate::chunk::ChunkStore;
    use crate::frame::{encode_response, DeviceId};
    use crate::protocol::*;
    use crate::radio::{MockRadio, MockRx};
    use crate::signal::RetryPolicy;
    use crate::sink::FileSink;

    /// Records every payload handed to the sink
    #[derive(Clone, Default)]
    struct RecordingSink(Arc<Mutex<Vec<(u8, Vec<u8>)>>>);

    impl ChunkSink for RecordingSink {
        fn accept(&mut self, sequence: u8, payload: &[u8]) -> std::io::Result<()> {
            self.0.lock().unwrap().push((sequence, payload.to_vec()));
            Ok(())
        }
    }

    fn run_initiator(mut fsm: Box<dyn InitiatorState>) -> Result<(), InitiatorError> {
        loop {
            match fsm.step() {
                Ok(next) => fsm = next,
                Err(InitiatorError::TransferComplete) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    fn poll(sequence: u8) -> Vec<u8> {
        encode_poll(sequence, DeviceId::default()).to_vec()
    }

    fn response(sequence: u8, store: &ChunkStore<Vec<u8>>) -> Vec<u8> {
        let index = crate::chunk::chunk_index(sequence, SEQUENCE_OFFSET).unwrap_or(0);
        encode_response(sequence, DeviceId::default(), &store.get_chunk(index))
    }

    #[test]
    fn test_priming_exchange_advances() {
        let store = ChunkStore::new(vec![1u8; 10], CHUNK_SIZE);
        let mock = MockRadio::new(vec![MockRx::Frame(response(5, &store))], vec![poll(5)]);
        let sink = RecordingSink::default();

        let mut fsm = InitiatorFsm::new(Box::new(mock), Box::new(sink.clone()), InitiatorConfig::default());
        assert_eq!(fsm.sequence(), 5);

        let mut states = vec![fsm.state()];
        for _ in 0..4 {
            fsm = fsm.step().expect("step");
            states.push(fsm.state());
        }

        assert_eq!(states, vec!["Idle", "Polling", "AwaitingEvent", "Settling", "Idle"]);
        assert_eq!(fsm.sequence(), 6);
        assert_eq!(fsm.accepted(), 1);
        assert_eq!(fsm.polls_sent(), 1);
        assert_eq!(*sink.0.lock().unwrap(), vec![(5u8, vec![0xFF; 66])]);
    }

    #[test]
    fn test_mismatched_echo_keeps_sequence() {
        let store = ChunkStore::new(vec![1u8; 10], CHUNK_SIZE);
        let mock = MockRadio::new(
            vec![MockRx::Frame(response(4, &store)), MockRx::Timeout, MockRx::Error],
            vec![poll(5), poll(5), poll(5)],
        );
        let sink = RecordingSink::default();

        let mut fsm = InitiatorFsm::new(Box::new(mock), Box::new(sink.clone()), InitiatorConfig::default());
        for _ in 0..12 {
            fsm = fsm.step().expect("step");
        }

        assert_eq!(fsm.state(), "Idle");
        assert_eq!(fsm.sequence(), 5);
        assert_eq!(fsm.accepted(), 0);
        assert_eq!(fsm.polls_sent(), 3);
        assert!(sink.0.lock().unwrap().is_empty());
    }

    #[test]
    fn test_retry_delay_applied() {
        let store = ChunkStore::new(vec![1u8; 10], CHUNK_SIZE);
        let mock = MockRadio::new(
            vec![MockRx::Timeout, MockRx::Frame(response(5, &store))],
            vec![poll(5), poll(5)],
        );
        let config = InitiatorConfig {
            retry: RetryPolicy { after_timeout: Duration::from_millis(20), ..RetryPolicy::default() },
            ..InitiatorConfig::default()
        };

        let mut fsm = InitiatorFsm::new(Box::new(mock), Box::new(RecordingSink::default()), config);
        let started = std::time::Instant::now();
        for _ in 0..8 {
            fsm = fsm.step().expect("step");
        }

        assert!(started.elapsed() >= Duration::from_millis(20));
        assert_eq!(fsm.sequence(), 6);
    }

    #[test]
    fn test_full_transfer_to_file() {
        let data: Vec<u8> = (0..200).map(|i| (i * 3 % 256) as u8).collect();
        let store = ChunkStore::new(data.clone(), CHUNK_SIZE);

        let mut script = Vec::new();
        let mut expected = Vec::new();
        for s in 5..=9u8 {
            expected.push(poll(s));
            script.push(MockRx::Frame(response(s, &store)));
        }
        // Lost response for sequence 7 is retried
        script.insert(2, MockRx::Timeout);
        expected.insert(2, poll(7));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let sink = FileSink::create(&path, SEQUENCE_OFFSET, Some(data.len() as u64)).unwrap();

        let mock = MockRadio::new(script, expected);
        let fsm = InitiatorFsm::new(Box::new(mock), Box::new(sink), InitiatorConfig::default());
        run_initiator(fsm).expect("transfer");

        assert_eq!(std::fs::read(&path).unwrap(), data);
    }

    #[test]
    fn test_link_loss_reported_with_state() {
        let mock = MockRadio::new(vec![], vec![poll(5)]);
        let fsm = InitiatorFsm::new(Box::new(mock), Box::new(RecordingSink::default()), InitiatorConfig::default());

        match run_initiator(fsm) {
            Err(InitiatorError::Radio { state, source: RadioError::Disconnected }) => {
                assert_eq!(state, "AwaitingEvent");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_start_sequence_and_device_id() {
        let store = ChunkStore::new(vec![7u8; 66], CHUNK_SIZE);
        let tag = DeviceId::from_text("TAG09");
        let mut reply = response(0, &store);
        reply[RESPONSE_DEST_IDX..RESPONSE_DEST_IDX + 8].copy_from_slice(&tag.0);

        let mock = MockRadio::new(
            vec![MockRx::Frame(reply)],
            vec![encode_poll(0, tag).to_vec()],
        );
        let config = InitiatorConfig { device_id: tag, start_sequence: 0, ..InitiatorConfig::default() };

        let mut fsm = InitiatorFsm::new(Box::new(mock), Box::new(RecordingSink::default()), config);
        for _ in 0..4 {
            fsm = fsm.step().expect("step");
        }
        assert_eq!(fsm.sequence(), 1);
    }
}
