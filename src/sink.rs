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

//! Destinations for accepted response payloads

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use tracing::{debug, info};
use crate::chunk::chunk_index;

/// Receives each accepted response payload, in acceptance order
pub trait ChunkSink: Send {
    fn accept(&mut self, sequence: u8, payload: &[u8]) -> io::Result<()>;

    /// True once no further chunks are wanted
    fn is_complete(&self) -> bool {
        false
    }
}

/// Hex dump of every payload at debug level
pub struct LogSink;

impl ChunkSink for LogSink {
    fn accept(&mut self, sequence: u8, payload: &[u8]) -> io::Result<()> {
        debug!(sequence, len = payload.len(), data = %hex::encode_upper(payload), "payload");
        Ok(())
    }
}

/// Writes data chunks to `out`, skipping priming exchanges. With a known
/// blob length the padding of the last chunk is dropped and the sink
/// completes once that many bytes are written.
///
/// Chunks must arrive as indices 1, 2, 3 and so on. A chunk out of that
/// order, including the restart after the sequence number wraps, is
/// rejected with `InvalidData` rather than written at the wrong offset.
pub struct FileSink<W> {
    out: W,
    sequence_offset: u8,
    remaining: Option<u64>,
    written: u64,
    next_index: u32,
}

impl FileSink<File> {
    pub fn create(path: &Path, sequence_offset: u8, length: Option<u64>) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(FileSink::new(file, sequence_offset, length))
    }
}

impl<W: Write> FileSink<W> {
    pub fn new(out: W, sequence_offset: u8, length: Option<u64>) -> Self {
        FileSink {
            out,
            sequence_offset,
            remaining: length,
            written: 0,
            next_index: 1,
        }
    }
}

impl<W: Write + Send> ChunkSink for FileSink<W> {
    fn accept(&mut self, sequence: u8, payload: &[u8]) -> io::Result<()> {
        if self.is_complete() {
            return Ok(());
        }

        let index = match chunk_index(sequence, self.sequence_offset) {
            Some(0) | None if self.next_index == 1 => {
                debug!(sequence, "priming response");
                return Ok(());
            }
            Some(index) if index == self.next_index => index,
            other => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "sequence {} gives chunk {:?} but chunk {} is next ({} bytes written); \
                         the sequence number wrapped or started past the first chunk",
                        sequence, other, self.next_index, self.written
                    ),
                ));
            }
        };

        let take = match self.remaining {
            Some(remaining) => (remaining.min(payload.len() as u64)) as usize,
            None => payload.len(),
        };

        self.out.write_all(&payload[..take])?;
        self.written += take as u64;
        self.next_index += 1;
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= take as u64;
        }

        debug!(sequence, chunk = index, bytes = take, total = self.written, "chunk stored");

        if self.is_complete() {
            self.out.flush()?;
            info!(bytes = self.written, "blob complete");
        }
        Ok(())
    }

    fn is_complete(&self) -> bool {
        self.remaining == Some(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::SEQUENCE_OFFSET;

    #[test]
    fn test_file_sink_skips_priming() {
        let mut out = Vec::new();
        let mut sink = FileSink::new(&mut out, SEQUENCE_OFFSET, None);
        sink.accept(3, &[0xFF; 4]).unwrap();
        sink.accept(5, &[0xFF; 4]).unwrap();
        sink.accept(6, &[1, 2, 3, 4]).unwrap();
        sink.accept(7, &[5, 6, 7, 8]).unwrap();
        assert!(!sink.is_complete());
        drop(sink);

        assert_eq!(out, vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_file_sink_trims_padding() {
        let mut out = Vec::new();
        let mut sink = FileSink::new(&mut out, SEQUENCE_OFFSET, Some(6));
        sink.accept(6, &[1, 2, 3, 4]).unwrap();
        assert!(!sink.is_complete());
        sink.accept(7, &[5, 6, 0xAA, 0xAA]).unwrap();
        assert!(sink.is_complete());

        // Anything after completion is dropped
        sink.accept(8, &[0xAA; 4]).unwrap();
        drop(sink);
        assert_eq!(out, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_file_sink_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob.bin");

        let mut sink = FileSink::create(&path, SEQUENCE_OFFSET, Some(3)).unwrap();
        sink.accept(5, &[0xFF; 4]).unwrap();
        sink.accept(6, &[9, 8, 7, 0xAA]).unwrap();
        assert!(sink.is_complete());
        drop(sink);

        assert_eq!(std::fs::read(&path).unwrap(), vec![9, 8, 7]);
    }

    #[test]
    fn test_file_sink_rejects_wrapped_sequence() {
        let mut out = Vec::new();
        let mut sink = FileSink::new(&mut out, SEQUENCE_OFFSET, Some(300 * 2));
        for sequence in 6..=255u8 {
            sink.accept(sequence, &[sequence, sequence]).unwrap();
        }

        // After 255 the sequence restarts in the priming range
        let err = sink.accept(0, &[0xFF, 0xFF]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        let err = sink.accept(6, &[6, 6]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(!sink.is_complete());
        drop(sink);

        assert_eq!(out.len(), 250 * 2);
        assert_eq!(&out[out.len() - 2..], &[255, 255]);
    }

    #[test]
    fn test_file_sink_rejects_start_past_first_chunk() {
        let mut out = Vec::new();
        let mut sink = FileSink::new(&mut out, SEQUENCE_OFFSET, Some(8));
        let err = sink.accept(7, &[5, 6, 7, 8]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(!sink.is_complete());
        drop(sink);

        assert!(out.is_empty());
    }

    #[test]
    fn test_log_sink_never_completes() {
        let mut sink = LogSink;
        sink.accept(6, &[0xDE, 0xAD]).unwrap();
        assert!(!sink.is_complete());
    }
}
