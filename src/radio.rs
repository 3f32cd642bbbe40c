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

use std::time::{Duration, Instant};
use crate::protocol::{FCS_LEN, MAX_FRAME_LEN};

// ============================================================================
// Events and Errors
// ============================================================================

/// Status events raised by the radio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioEvent {
    /// A frame with a good FCS is waiting to be read
    FrameReceived,
    /// Reception failed (bad FCS, sync loss, oversized frame)
    ReceiveError,
    /// The response window closed with nothing received
    ReceiveTimeout,
    /// The last transmission left the antenna
    TransmitDone,
}

#[derive(Debug, thiserror::Error)]
pub enum RadioError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),
    #[error("frame of {0} bytes cannot be transmitted")]
    FrameLength(usize),
    #[error("receiver is off and no event is pending")]
    Idle,
    #[error("radio link closed")]
    Disconnected,
}

// ============================================================================
// Radio Trait
// ============================================================================

/// Polled radio surface used by both roles
pub trait Radio: Send {
    /// Queue `frame` for transmission; its last `FCS_LEN` bytes are overwritten
    /// by the radio. With `response_expected` the receiver turns on after the
    /// turnaround delay and the response timeout starts.
    fn transmit(&mut self, frame: &[u8], response_expected: bool) -> Result<(), RadioError>;

    fn enable_receive(&mut self) -> Result<(), RadioError>;

    /// Block until a status event is pending and report it. The event stays
    /// pending, and is reported again, until `clear_event` acknowledges it.
    fn wait_event(&mut self) -> Result<RadioEvent, RadioError>;

    /// Bytes of the last good frame, FCS included
    fn read_received_frame(&mut self) -> Result<Vec<u8>, RadioError>;

    fn clear_event(&mut self, event: RadioEvent);

    /// Zero disables the timeout
    fn set_response_timeout(&mut self, timeout: Duration);

    fn set_turnaround_delay(&mut self, delay: Duration);
}

// ============================================================================
// Status Register
// ============================================================================

/// Receiver bookkeeping shared by the radio implementations
#[derive(Debug, Default)]
pub struct StatusRegister {
    pending: Option<RadioEvent>,
    listening: bool,
    deadline: Option<Instant>,
    response_timeout: Duration,
    turnaround: Duration,
    rx_frame: Vec<u8>,
}

impl StatusRegister {
    pub fn pending(&self) -> Option<RadioEvent> {
        self.pending
    }

    pub fn listening(&self) -> bool {
        self.listening
    }

    pub fn set_response_timeout(&mut self, timeout: Duration) {
        self.response_timeout = timeout;
    }

    pub fn set_turnaround_delay(&mut self, delay: Duration) {
        self.turnaround = delay;
    }

    pub fn transmitted(&mut self, response_expected: bool) {
        self.pending = Some(RadioEvent::TransmitDone);
        if response_expected {
            self.arm(self.turnaround);
        }
    }

    pub fn enable_receive(&mut self) {
        self.arm(Duration::ZERO);
    }

    fn arm(&mut self, lead: Duration) {
        self.listening = true;
        self.deadline = if self.response_timeout.is_zero() {
            None
        } else {
            Some(Instant::now() + lead + self.response_timeout)
        };
    }

    /// Time left in the response window, `None` when unbounded
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline.map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Raise a timeout if the response window has closed
    pub fn expire(&mut self) -> bool {
        match self.deadline {
            Some(deadline) if self.listening && Instant::now() >= deadline => {
                self.timed_out();
                true
            }
            _ => false,
        }
    }

    pub fn timed_out(&mut self) {
        self.listening = false;
        self.deadline = None;
        self.pending = Some(RadioEvent::ReceiveTimeout);
    }

    /// Latch a frame heard on the air; the receiver turns off as on real hardware
    pub fn deliver(&mut self, frame: Vec<u8>) {
        self.listening = false;
        self.deadline = None;
        if frame.len() < FCS_LEN || frame.len() > MAX_FRAME_LEN {
            self.pending = Some(RadioEvent::ReceiveError);
        } else {
            self.rx_frame = frame;
            self.pending = Some(RadioEvent::FrameReceived);
        }
    }

    pub fn receive_failed(&mut self) {
        self.listening = false;
        self.deadline = None;
        self.pending = Some(RadioEvent::ReceiveError);
    }

    pub fn rx_frame(&self) -> &[u8] {
        &self.rx_frame
    }

    pub fn clear(&mut self, event: RadioEvent) {
        if self.pending == Some(event) {
            self.pending = None;
        }
    }
}

// ============================================================================
// Interrupt Dispatch
// ============================================================================

/// Handlers run when the radio raises an event
pub struct RadioCallbacks {
    pub on_good_frame: Box<dyn FnMut(&[u8]) + Send>,
    pub on_timeout: Box<dyn FnMut() + Send>,
    pub on_error: Box<dyn FnMut() + Send>,
    pub on_tx_confirmed: Box<dyn FnMut() + Send>,
}

/// Callback-driven view of a radio: each serviced event is handed to the
/// registered handler and acknowledged, the way an interrupt routine would.
pub struct InterruptRadio {
    radio: Box<dyn Radio>,
    callbacks: Option<RadioCallbacks>,
}

impl InterruptRadio {
    pub fn new(radio: Box<dyn Radio>) -> Self {
        InterruptRadio { radio, callbacks: None }
    }

    pub fn register_callbacks(&mut self, callbacks: RadioCallbacks) {
        self.callbacks = Some(callbacks);
    }

    pub fn transmit(&mut self, frame: &[u8], response_expected: bool) -> Result<(), RadioError> {
        self.radio.transmit(frame, response_expected)
    }

    pub fn set_response_timeout(&mut self, timeout: Duration) {
        self.radio.set_response_timeout(timeout);
    }

    pub fn set_turnaround_delay(&mut self, delay: Duration) {
        self.radio.set_turnaround_delay(delay);
    }

    /// Wait for one radio event and run its handler. Events with no
    /// registered handler are acknowledged and dropped.
    pub fn service(&mut self) -> Result<RadioEvent, RadioError> {
        let event = self.radio.wait_event()?;

        if let Some(cb) = self.callbacks.as_mut() {
            match event {
                RadioEvent::FrameReceived => {
                    let frame = match self.radio.read_received_frame() {
                        Ok(frame) => frame,
                        Err(e) => {
                            self.radio.clear_event(event);
                            return Err(e);
                        }
                    };
                    (cb.on_good_frame)(&frame);
                }
                RadioEvent::ReceiveTimeout => (cb.on_timeout)(),
                RadioEvent::ReceiveError => (cb.on_error)(),
                RadioEvent::TransmitDone => (cb.on_tx_confirmed)(),
            }
        }

        self.radio.clear_event(event);
        Ok(event)
    }
}

// ============================================================================
// Mock Radio for Testing
// ============================================================================

#[cfg(test)]
pub struct MockRadio {
    // Receive-side events in order (frames imply FrameReceived)
    script: std::collections::VecDeque<MockRx>,
    status: StatusRegister,
    // Next read of the received frame fails
    unreadable: bool,
    // Track what was transmitted
    tx_log: Vec<Vec<u8>>,
    // Expected transmissions for verification
    expected_tx: Vec<Vec<u8>>,
}

#[cfg(test)]
#[derive(Debug, Clone)]
pub enum MockRx {
    Frame(Vec<u8>),
    /// Frame is latched but reading it back fails
    Unreadable(Vec<u8>),
    Error,
    Timeout,
}

#[cfg(test)]
impl MockRadio {
    pub fn new(script: Vec<MockRx>, expected_tx: Vec<Vec<u8>>) -> Self {
        MockRadio {
            script: script.into(),
            status: StatusRegister::default(),
            unreadable: false,
            tx_log: Vec::new(),
            expected_tx,
        }
    }
}

#[cfg(test)]
impl Radio for MockRadio {
    fn transmit(&mut self, frame: &[u8], response_expected: bool) -> Result<(), RadioError> {
        self.tx_log.push(frame.to_vec());
        self.status.transmitted(response_expected);
        Ok(())
    }

    fn enable_receive(&mut self) -> Result<(), RadioError> {
        self.status.enable_receive();
        Ok(())
    }

    fn wait_event(&mut self) -> Result<RadioEvent, RadioError> {
        if let Some(event) = self.status.pending() {
            return Ok(event);
        }

        // Out of script = link gone
        match self.script.pop_front() {
            Some(MockRx::Frame(frame)) => self.status.deliver(frame),
            Some(MockRx::Unreadable(frame)) => {
                self.unreadable = true;
                self.status.deliver(frame);
            }
            Some(MockRx::Error) => self.status.receive_failed(),
            Some(MockRx::Timeout) => self.status.timed_out(),
            None => return Err(RadioError::Disconnected),
        }

        self.status.pending().ok_or(RadioError::Idle)
    }

    fn read_received_frame(&mut self) -> Result<Vec<u8>, RadioError> {
        if std::mem::take(&mut self.unreadable) {
            return Err(RadioError::Io(std::io::Error::other("mock read failure")));
        }
        Ok(self.status.rx_frame().to_vec())
    }

    fn clear_event(&mut self, event: RadioEvent) {
        self.status.clear(event);
    }

    fn set_response_timeout(&mut self, timeout: Duration) {
        self.status.set_response_timeout(timeout);
    }

    fn set_turnaround_delay(&mut self, delay: Duration) {
        self.status.set_turnaround_delay(delay);
    }
}

#[cfg(test)]
impl Drop for MockRadio {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }

        assert!(
            self.script.is_empty(),
            "MockRadio dropped with {} unconsumed receive events: {:?}",
            self.script.len(),
            self.script
        );

        assert_eq!(
            &self.tx_log,
            &self.expected_tx,
            "MockRadio transmit log mismatch!\nExpected {} frames:\n{:02X?}\nGot {} frames:\n{:02X?}",
            self.expected_tx.len(),
            self.expected_tx,
            self.tx_log.len(),
            self.tx_log
        );
    }
}

// ============================================================================
// Tests
// ============================================================================
