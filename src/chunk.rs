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

//! Chunk store: maps a chunk index to one fixed-size block of the blob

use std::ops::Deref;
use crate::protocol::{PADDING_FILL, PRIMING_FILL};

// ============================================================================
// Blob Source
// ============================================================================

/// Externally managed bytes being transferred
pub trait BlobSource: Send {
    fn len(&self) -> usize;

    /// Byte at `offset`; callers stay within `[0, len())`
    fn byte_at(&self, offset: usize) -> u8;
}

impl BlobSource for [u8] {
    fn len(&self) -> usize {
        <[u8]>::len(self)
    }

    fn byte_at(&self, offset: usize) -> u8 {
        self[offset]
    }
}

impl BlobSource for Vec<u8> {
    fn len(&self) -> usize {
        Vec::len(self)
    }

    fn byte_at(&self, offset: usize) -> u8 {
        self[offset]
    }
}

impl<B: BlobSource + ?Sized> BlobSource for Box<B> {
    fn len(&self) -> usize {
        (**self).len()
    }

    fn byte_at(&self, offset: usize) -> u8 {
        (**self).byte_at(offset)
    }
}

// ============================================================================
// Chunks
// ============================================================================

/// Exactly `chunk_size` bytes, padded where the blob runs out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk(Vec<u8>);

impl Deref for Chunk {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

/// Chunk index requested by a poll, or `None` for sequences below the offset
pub fn chunk_index(sequence: u8, offset: u8) -> Option<u32> {
    sequence.checked_sub(offset).map(u32::from)
}

/// Largest blob one pass of the 8-bit sequence space can carry. Past it the
/// sequence wraps back into the priming range and chunk 1 is asked for again.
pub fn max_blob_len(offset: u8, chunk_size: usize) -> u64 {
    u64::from(u8::MAX - offset) * chunk_size as u64
}

pub struct ChunkStore<B> {
    blob: B,
    chunk_size: usize,
}

impl<B: BlobSource> ChunkStore<B> {
    pub fn new(blob: B, chunk_size: usize) -> Self {
        ChunkStore { blob, chunk_size }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn blob_len(&self) -> usize {
        self.blob.len()
    }

    /// Number of data chunks (index 1 and up) needed to cover the blob
    pub fn data_chunks(&self) -> u32 {
        if self.chunk_size == 0 {
            return 0;
        }
        u32::try_from(self.blob.len().div_ceil(self.chunk_size)).unwrap_or(u32::MAX)
    }

    /// Index 0 is the priming chunk. Index n covers blob bytes starting at
    /// `(n - 1) * chunk_size`; offsets past the end read as padding.
    pub fn get_chunk(&self, index: u32) -> Chunk {
        if index == 0 {
            return Chunk(vec![PRIMING_FILL; self.chunk_size]);
        }

        let len = self.blob.len();
        let start = (index as usize - 1).checked_mul(self.chunk_size);

        let bytes = (0..self.chunk_size)
            .map(|i| match start.and_then(|s| s.checked_add(i)) {
                Some(offset) if offset < len => self.blob.byte_at(offset),
                _ => PADDING_FILL,
            })
            .collect();

        Chunk(bytes)
    }
}

// ============================================================================
// Tests
// ============================================================================
