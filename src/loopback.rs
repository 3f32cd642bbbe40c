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

//! In-memory radio link joining two roles in one process

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use tracing::trace;
use crate::protocol::{FCS_LEN, MAX_FRAME_LEN};
use crate::radio::{Radio, RadioError, RadioEvent, StatusRegister};

/// One end of a loopback link. Frames sent while the far receiver is off
/// stay queued until it listens again.
pub struct LoopbackRadio {
    name: &'static str,
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
    status: StatusRegister,
    drop_every: Option<u32>,
    sent: u32,
}

impl LoopbackRadio {
    pub fn pair() -> (LoopbackRadio, LoopbackRadio) {
        let (a_tx, b_rx) = mpsc::channel();
        let (b_tx, a_rx) = mpsc::channel();
        (LoopbackRadio::end("a", a_tx, a_rx), LoopbackRadio::end("b", b_tx, b_rx))
    }

    fn end(name: &'static str, tx: Sender<Vec<u8>>, rx: Receiver<Vec<u8>>) -> Self {
        LoopbackRadio {
            name,
            tx,
            rx,
            status: StatusRegister::default(),
            drop_every: None,
            sent: 0,
        }
    }

    /// Lose every `n`th frame this end transmits
    pub fn with_loss(mut self, n: u32) -> Self {
        self.drop_every = (n > 0).then_some(n);
        self
    }
}

impl Radio for LoopbackRadio {
    fn transmit(&mut self, frame: &[u8], response_expected: bool) -> Result<(), RadioError> {
        if frame.len() < FCS_LEN || frame.len() > MAX_FRAME_LEN {
            return Err(RadioError::FrameLength(frame.len()));
        }

        self.sent = self.sent.wrapping_add(1);
        let lost = self.drop_every.is_some_and(|n| self.sent % n == 0);
        if lost {
            trace!(end = self.name, len = frame.len(), "frame lost");
        } else {
            self.tx.send(frame.to_vec()).map_err(|_| RadioError::Disconnected)?;
        }

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
        if !self.status.listening() {
            return Err(RadioError::Idle);
        }

        loop {
            if self.status.expire() {
                return Ok(RadioEvent::ReceiveTimeout);
            }

            let received = match self.status.remaining() {
                Some(left) => self.rx.recv_timeout(left),
                None => self.rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };
            match received {
                Ok(frame) => {
                    self.status.deliver(frame);
                    return self.status.pending().ok_or(RadioError::Idle);
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Err(RadioError::Disconnected),
            }
        }
    }

    fn read_received_frame(&mut self) -> Result<Vec<u8>, RadioError> {
        Ok(self.status.rx_frame().to_vec())
    }

    fn clear_event(&mut self, event: RadioEvent) {
        self.status.clear(event);
    }

    fn set_response_timeout(&mut self, timeout: std::time::Duration) {
        self.status.set_response_timeout(timeout);
    }

    fn set_turnaround_delay(&mut self, delay: std::time::Duration) {
        self.status.set_turnaround_delay(delay);
    }
}

// ============================================================================
// Tests
// ============================================================================
