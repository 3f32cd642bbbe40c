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

//! Radio modem attached over a serial line
//!
//! Each radio frame travels the UART as one SLIP packet. The modem is
//! transparent, so this side supplies what the transceiver would: the
//! frame check sequence, the receive window and the status events.

use std::collections::VecDeque;
use std::io::ErrorKind;
use std::time::Duration;
use serialport::{SerialPort as SerialPortTrait, DataBits, Parity, StopBits};
use crate::protocol::{FCS_LEN, MAX_FRAME_LEN};
use crate::radio::{Radio, RadioError, RadioEvent, StatusRegister};

pub const SLIP_END: u8 = 0xC0;
pub const SLIP_ESC: u8 = 0xDB;
pub const SLIP_ESC_END: u8 = 0xDC;
pub const SLIP_ESC_ESC: u8 = 0xDD;

/// Longest single read while the receiver is on
const READ_SLICE: Duration = Duration::from_millis(50);

// ============================================================================
// SerialPort Trait
// ============================================================================

/// Serial operations the radio adapter needs
pub trait SerialPort: Send {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()>;

    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> std::io::Result<usize>;
}

// ============================================================================
// Real Serial Port Implementation
// ============================================================================

/// Wraps a port opened through the serialport crate
pub struct RealSerialPort {
    port: Box<dyn SerialPortTrait>,
}

impl RealSerialPort {
    pub fn open(
        port_name: &str,
        baud_rate: u32,
        data_bits: DataBits,
        parity: Parity,
        stop_bits: StopBits,
    ) -> Result<Self, serialport::Error> {
        let port = serialport::new(port_name, baud_rate)
            .data_bits(data_bits)
            .parity(parity)
            .stop_bits(stop_bits)
            .timeout(READ_SLICE)
            .open()?;

        Ok(RealSerialPort { port })
    }
}

impl SerialPort for RealSerialPort {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.port.write_all(buf)?;
        self.port.flush()
    }

    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> std::io::Result<usize> {
        self.port.set_timeout(timeout)
            .map_err(std::io::Error::other)?;
        self.port.read(buf)
    }
}

// ============================================================================
// Frame Check Sequence
// ============================================================================

/// 16-bit ITU-T CRC, LSB first, as appended to 802.15.4 frames
pub fn fcs(bytes: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &b in bytes {
        crc ^= b as u16;
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0x8408;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

fn fcs_valid(frame: &[u8]) -> bool {
    if frame.len() < FCS_LEN {
        return false;
    }
    let body = frame.len() - FCS_LEN;
    fcs(&frame[..body]).to_le_bytes() == frame[body..]
}

// ============================================================================
// SLIP Framing
// ============================================================================

pub fn slip_encode(frame: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(frame.len() + 2);
    out.push(SLIP_END);
    for &byte in frame {
        match byte {
            SLIP_END => out.extend_from_slice(&[SLIP_ESC, SLIP_ESC_END]),
            SLIP_ESC => out.extend_from_slice(&[SLIP_ESC, SLIP_ESC_ESC]),
            _ => out.push(byte),
        }
    }
    out.push(SLIP_END);
    out
}

/// Reassembles SLIP packets from a byte stream. A packet with a bad escape or
/// more than `MAX_FRAME_LEN` bytes comes out as `None`.
#[derive(Debug, Default)]
pub struct SlipDecoder {
    buf: Vec<u8>,
    escaped: bool,
    broken: bool,
    frames: VecDeque<Option<Vec<u8>>>,
}

impl SlipDecoder {
    pub fn extend(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.push(byte);
        }
    }

    fn push(&mut self, byte: u8) {
        if byte == SLIP_END {
            if self.broken {
                self.frames.push_back(None);
            } else if !self.buf.is_empty() {
                self.frames.push_back(Some(std::mem::take(&mut self.buf)));
            }
            self.buf.clear();
            self.escaped = false;
            self.broken = false;
            return;
        }

        if self.broken {
            return;
        }

        let decoded = if self.escaped {
            self.escaped = false;
            match byte {
                SLIP_ESC_END => SLIP_END,
                SLIP_ESC_ESC => SLIP_ESC,
                _ => {
                    self.broken = true;
                    return;
                }
            }
        } else if byte == SLIP_ESC {
            self.escaped = true;
            return;
        } else {
            byte
        };

        if self.buf.len() == MAX_FRAME_LEN {
            self.broken = true;
            self.buf.clear();
        } else {
            self.buf.push(decoded);
        }
    }

    pub fn next_frame(&mut self) -> Option<Option<Vec<u8>>> {
        self.frames.pop_front()
    }
}

// ============================================================================
// Serial Radio
// ============================================================================

pub struct SerialRadio {
    port: Box<dyn SerialPort>,
    status: StatusRegister,
    decoder: SlipDecoder,
}

impl SerialRadio {
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        SerialRadio {
            port,
            status: StatusRegister::default(),
            decoder: SlipDecoder::default(),
        }
    }

    fn latch(&mut self, packet: Option<Vec<u8>>) {
        match packet {
            Some(frame) if fcs_valid(&frame) => self.status.deliver(frame),
            _ => self.status.receive_failed(),
        }
    }
}

impl Radio for SerialRadio {
    fn transmit(&mut self, frame: &[u8], response_expected: bool) -> Result<(), RadioError> {
        if frame.len() < FCS_LEN || frame.len() > MAX_FRAME_LEN {
            return Err(RadioError::FrameLength(frame.len()));
        }

        let mut air = frame.to_vec();
        let body = air.len() - FCS_LEN;
        let check = fcs(&air[..body]);
        air[body..].copy_from_slice(&check.to_le_bytes());

        self.port.write_all(&slip_encode(&air))?;
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

        let mut buf = [0u8; 64];
        loop {
            if let Some(packet) = self.decoder.next_frame() {
                self.latch(packet);
                return self.status.pending().ok_or(RadioError::Idle);
            }
            if self.status.expire() {
                return Ok(RadioEvent::ReceiveTimeout);
            }

            let wait = match self.status.remaining() {
                Some(left) => left.clamp(Duration::from_millis(1), READ_SLICE),
                None => READ_SLICE,
            };
            match self.port.read_timeout(&mut buf, wait) {
                Ok(n) => self.decoder.extend(&buf[..n]),
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn read_received_frame(&mut self) -> Result<Vec<u8>, RadioError> {
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

// ============================================================================
// Mock Serial Port for Testing
// ============================================================================

#[cfg(test)]
pub struct MockSerialPort {
    // Data to return on reads (None = timeout)
    reads: VecDeque<Option<Vec<u8>>>,
    // Track what was written
    write_log: Vec<u8>,
    // Expected writes for verification
    expected_writes: Vec<u8>,
}

#[cfg(test)]
impl MockSerialPort {
    pub fn new(reads: Vec<Option<Vec<u8>>>, expected_writes: Vec<u8>) -> Self {
        MockSerialPort {
            reads: reads.into(),
            write_log: Vec::new(),
            expected_writes,
        }
    }
}

#[cfg(test)]
impl SerialPort for MockSerialPort {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.write_log.extend_from_slice(buf);
        Ok(())
    }

    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> std::io::Result<usize> {
        match self.reads.pop_front() {
            Some(Some(mut data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                if n < data.len() {
                    self.reads.push_front(Some(data.split_off(n)));
                }
                Ok(n)
            }
            // Out of responses = timeout
            _ => {
                std::thread::sleep(timeout);
                Err(std::io::Error::new(ErrorKind::TimedOut, "Mock timeout"))
            }
        }
    }
}

#[cfg(test)]
impl Drop for MockSerialPort {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }

        assert!(
            self.reads.is_empty(),
            "MockSerialPort dropped with {} unconsumed reads",
            self.reads.len()
        );

        assert_eq!(
            &self.write_log,
            &self.expected_writes,
            "MockSerialPort write log mismatch!\nExpected {} bytes:\n{:02X?}\nGot {} bytes:\n{:02X?}",
            self.expected_writes.len(),
            self.expected_writes,
            self.write_log.len(),
            self.write_log
        );
    }
}

// ============================================================================
// Tests
// ============================================================================
