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

//! Event bridge between radio callbacks and the initiator loop
//!
//! Callbacks run in the radio's event context and report to the loop through
//! a single atomic slot. The slot holds the latest outcome only: an event that
//! lands before the loop has read the previous one replaces it.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, trace};
use crate::frame::decode_response;
use crate::radio::RadioCallbacks;

// ============================================================================
// Transfer Signal
// ============================================================================

/// How a poll exchange resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Response echoed the expected sequence; the sequence advanced
    Advanced,
    /// Response was malformed or answered another sequence
    Ignored,
    TimedOut,
    Failed,
}

impl Outcome {
    fn tag(self) -> u64 {
        match self {
            Outcome::Advanced => 1,
            Outcome::Ignored => 2,
            Outcome::TimedOut => 3,
            Outcome::Failed => 4,
        }
    }

    fn from_tag(tag: u64) -> Option<Outcome> {
        match tag {
            1 => Some(Outcome::Advanced),
            2 => Some(Outcome::Ignored),
            3 => Some(Outcome::TimedOut),
            4 => Some(Outcome::Failed),
            _ => None,
        }
    }
}

/// Outcome plus the delay to observe before the next poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signal {
    pub outcome: Outcome,
    pub delay: Duration,
}

const EMPTY: u64 = 0;

/// Single-slot, last-write-wins handoff. Bits 0-7 carry the outcome tag
/// (0 = empty), bits 8-39 the delay in milliseconds.
#[derive(Debug, Default)]
pub struct TransferSignal {
    slot: AtomicU64,
}

impl TransferSignal {
    pub const fn new() -> Self {
        TransferSignal { slot: AtomicU64::new(EMPTY) }
    }

    /// Store `signal`, returning whatever unread signal it replaced
    pub fn set(&self, signal: Signal) -> Option<Signal> {
        unpack(self.slot.swap(pack(signal), Ordering::AcqRel))
    }

    /// Read without consuming
    pub fn peek(&self) -> Option<Signal> {
        unpack(self.slot.load(Ordering::Acquire))
    }

    /// Read and reset the slot
    pub fn take(&self) -> Option<Signal> {
        unpack(self.slot.swap(EMPTY, Ordering::AcqRel))
    }
}

fn pack(signal: Signal) -> u64 {
    let millis = u64::try_from(signal.delay.as_millis()).unwrap_or(u64::MAX).min(u32::MAX as u64);
    signal.outcome.tag() | (millis << 8)
}

fn unpack(raw: u64) -> Option<Signal> {
    Outcome::from_tag(raw & 0xFF).map(|outcome| Signal {
        outcome,
        delay: Duration::from_millis(raw >> 8),
    })
}

// ============================================================================
// Retry Policy
// ============================================================================

/// Delay before the next poll after each kind of outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetryPolicy {
    pub after_response: Duration,
    pub after_timeout: Duration,
    pub after_error: Duration,
}

// ============================================================================
// Event Bridge
// ============================================================================

/// State shared between the initiator loop and its radio callbacks
#[derive(Clone)]
pub struct EventBridge {
    signal: Arc<TransferSignal>,
    expected: Arc<AtomicU8>,
    accepted: Arc<AtomicU32>,
    /// Second handoff slot, beside `signal`, for the accepted payload, which
    /// does not fit in the signal word. Written by the good-frame handler
    /// only on `Outcome::Advanced`, drained only by the loop's `Settling`
    /// state. Holds at most one payload; an unread one is replaced.
    latest: Arc<Mutex<Option<(u8, Vec<u8>)>>>,
    policy: RetryPolicy,
}

impl EventBridge {
    pub fn new(start_sequence: u8, policy: RetryPolicy) -> Self {
        EventBridge {
            signal: Arc::new(TransferSignal::new()),
            expected: Arc::new(AtomicU8::new(start_sequence)),
            accepted: Arc::new(AtomicU32::new(0)),
            latest: Arc::new(Mutex::new(None)),
            policy,
        }
    }

    pub fn signal(&self) -> &TransferSignal {
        &self.signal
    }

    /// Sequence number the next poll carries
    pub fn sequence(&self) -> u8 {
        self.expected.load(Ordering::Acquire)
    }

    /// Responses accepted so far
    pub fn accepted(&self) -> u32 {
        self.accepted.load(Ordering::Acquire)
    }

    /// Payload of the most recently accepted response, with its sequence
    pub fn take_payload(&self) -> Option<(u8, Vec<u8>)> {
        self.latest.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    pub fn on_good_frame(&self, frame: &[u8]) {
        let outcome = match decode_response(frame) {
            Ok(resp) => {
                let expected = self.expected.load(Ordering::Acquire);
                let matched = resp.sequence == expected
                    && self.expected
                        .compare_exchange(expected, expected.wrapping_add(1), Ordering::AcqRel, Ordering::Acquire)
                        .is_ok();

                if matched {
                    *self.latest.lock().unwrap_or_else(PoisonError::into_inner) =
                        Some((resp.sequence, resp.payload.to_vec()));
                    self.accepted.fetch_add(1, Ordering::AcqRel);
                    debug!(sequence = resp.sequence, len = frame.len(), "response accepted");
                    Outcome::Advanced
                } else {
                    debug!(echo = resp.sequence, expected, "response for another sequence");
                    Outcome::Ignored
                }
            }
            Err(e) => {
                trace!(error = %e, len = frame.len(), "malformed response discarded");
                Outcome::Ignored
            }
        };

        self.raise(outcome, self.policy.after_response);
    }

    pub fn on_timeout(&self) {
        debug!(sequence = self.sequence(), "response timeout");
        self.raise(Outcome::TimedOut, self.policy.after_timeout);
    }

    pub fn on_error(&self) {
        debug!(sequence = self.sequence(), "receive error");
        self.raise(Outcome::Failed, self.policy.after_error);
    }

    pub fn on_tx_confirmed(&self) {
        trace!(sequence = self.sequence(), "poll sent");
    }

    fn raise(&self, outcome: Outcome, delay: Duration) {
        if let Some(lost) = self.signal.set(Signal { outcome, delay }) {
            trace!(?lost, "unread event overwritten");
        }
    }

    /// Handlers for `InterruptRadio::register_callbacks`
    pub fn callbacks(&self) -> RadioCallbacks {
        let (good, timeout, error, tx) = (self.clone(), self.clone(), self.clone(), self.clone());
        RadioCallbacks {
            on_good_frame: Box::new(move |frame: &[u8]| good.on_good_frame(frame)),
            on_timeout: Box::new(move || timeout.on_timeout()),
            on_error: Box::new(move || error.on_error()),
            on_tx_confirmed: Box::new(move || tx.on_tx_confirmed()),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
