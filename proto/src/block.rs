// Copyright (c) 2019-2023 Crater Dog Technologies

//! Block chunking for MTU limited transports
//!
//! An encoded request longer than `capacity + 2` bytes is split into `N` blocks
//! which are transmitted in *descending* index order, `N-1` first and `0` last.
//!
//! ```text
//! extra block (index > 0):  | 0x00 | INDEX | PAYLOAD (<= capacity)      |
//! final block (index = 0):  | OPCODE | ARG_COUNT | DATA (<= capacity)   |
//! ```
//!
//! Block `k > 0` carries `encoded[k * capacity + 2..][..capacity]`, the final
//! block carries the start of the request including its two header bytes, so the
//! device rebuilds the request by appending blocks in *ascending* index order.
//! The leading `0x00` of an extra block is the `loadBlocks` opcode, which is how
//! firmware distinguishes intermediate blocks from the final one.
//!
//! The descending transmission order is part of the firmware contract and must
//! not be changed on one side only.

use alloc::vec::Vec;
use core::cmp::min;

use crate::{request::HEADER_LEN, Operation, ProtoError};

/// Default payload capacity per block (512 byte writes less two header bytes)
pub const BLOCK_CAPACITY: usize = 510;

/// Maximum number of blocks per request (one byte block index)
pub const MAX_BLOCKS: usize = u8::MAX as usize + 1;

/// Leading byte of every extra block
pub const BLOCK_MARKER: u8 = Operation::LoadBlocks as u8;

/// A single transport sized fragment of an encoded request
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Block {
    /// Block index, counting down to `0` for the final block
    pub index: u8,
    /// Request bytes carried by this block
    pub payload: Vec<u8>,
}

impl Block {
    /// Check whether this is the final (index 0) block
    pub fn is_final(&self) -> bool {
        self.index == 0
    }

    /// Length of the block on the wire
    pub fn wire_len(&self) -> usize {
        match self.is_final() {
            true => self.payload.len(),
            false => HEADER_LEN + self.payload.len(),
        }
    }

    /// Wire image of the block
    pub fn to_bytes(&self) -> Vec<u8> {
        if self.is_final() {
            return self.payload.clone();
        }

        let mut b = Vec::with_capacity(self.wire_len());
        b.push(BLOCK_MARKER);
        b.push(self.index);
        b.extend_from_slice(&self.payload);
        b
    }
}

/// Transmission cursor over the blocks of a request, highest index first
#[derive(Clone, Debug)]
pub struct Blocks {
    inner: alloc::vec::IntoIter<Block>,
    total: usize,
}

impl Blocks {
    /// Total number of blocks for the request
    pub fn total(&self) -> usize {
        self.total
    }

    /// Number of blocks not yet yielded
    pub fn remaining(&self) -> usize {
        self.inner.len()
    }
}

impl Iterator for Blocks {
    type Item = Block;

    fn next(&mut self) -> Option<Block> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for Blocks {}

/// Split an encoded request into blocks of at most `capacity` payload bytes
pub fn chunk(encoded: &[u8], capacity: usize) -> Result<Blocks, ProtoError> {
    if capacity == 0 {
        return Err(ProtoError::InvalidCapacity);
    }
    if encoded.len() < HEADER_LEN {
        return Err(ProtoError::InvalidLength);
    }

    // Header bytes are counted once, in the final block
    let data_len = encoded.len() - HEADER_LEN;
    let extra = match data_len {
        0 => 0,
        n => (n + capacity - 1) / capacity - 1,
    };

    if extra >= MAX_BLOCKS {
        return Err(ProtoError::TooManyBlocks(extra + 1));
    }

    let mut blocks = Vec::with_capacity(extra + 1);

    for index in (1..=extra).rev() {
        let offset = index * capacity + HEADER_LEN;
        let len = min(encoded.len() - offset, capacity);

        blocks.push(Block {
            index: index as u8,
            payload: encoded[offset..][..len].to_vec(),
        });
    }

    let len = min(encoded.len(), capacity + HEADER_LEN);
    blocks.push(Block {
        index: 0,
        payload: encoded[..len].to_vec(),
    });

    #[cfg(feature = "log")]
    log::trace!("chunked {} bytes into {} blocks", encoded.len(), blocks.len());

    Ok(Blocks {
        total: blocks.len(),
        inner: blocks.into_iter(),
    })
}

/// Device side reassembly of block wire images into a complete request
#[derive(Clone, Debug)]
pub struct Reassembler {
    capacity: usize,
    /// Index expected for the next block, `None` when idle
    expected: Option<u8>,
    /// Extra block payloads in arrival (descending index) order
    blocks: Vec<Vec<u8>>,
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new(BLOCK_CAPACITY)
    }
}

impl Reassembler {
    /// Create a reassembler for the given block capacity
    pub const fn new(capacity: usize) -> Self {
        Self {
            capacity,
            expected: None,
            blocks: Vec::new(),
        }
    }

    /// Number of extra blocks buffered
    pub fn pending(&self) -> usize {
        self.blocks.len()
    }

    /// Discard any partial request
    pub fn reset(&mut self) {
        self.expected = None;
        self.blocks.clear();
    }

    /// Accept a block wire image, returning the complete request once the final
    /// block has been received
    pub fn push(&mut self, wire: &[u8]) -> Result<Option<Vec<u8>>, ProtoError> {
        if wire.len() < HEADER_LEN {
            self.reset();
            return Err(ProtoError::InvalidLength);
        }

        // Final block, the request header occupies the block header slots
        if wire[0] != BLOCK_MARKER {
            let expected = self.expected.unwrap_or(0);
            if expected != 0 {
                self.reset();
                return Err(ProtoError::BlockSequence {
                    expected,
                    actual: 0,
                });
            }

            let full = self.capacity + HEADER_LEN;
            if wire.len() > full || (!self.blocks.is_empty() && wire.len() != full) {
                self.reset();
                return Err(ProtoError::InvalidLength);
            }

            let mut request = wire.to_vec();
            for b in self.blocks.drain(..).rev() {
                request.extend_from_slice(&b);
            }
            self.expected = None;

            return Ok(Some(request));
        }

        let index = wire[1];
        let payload = &wire[HEADER_LEN..];

        if index == 0 || payload.len() > self.capacity {
            self.reset();
            return Err(ProtoError::InvalidLength);
        }

        // Any index other than the expected one starts a new request,
        // the host re-sends whole requests on retry
        if self.expected != Some(index) {
            #[cfg(feature = "log")]
            log::debug!("block {} starts a new request (expected {:?})", index, self.expected);

            self.reset();
        } else if payload.len() != self.capacity {
            // Only the first (highest index) block may be short
            self.reset();
            return Err(ProtoError::InvalidLength);
        }

        self.blocks.push(payload.to_vec());
        self.expected = Some(index - 1);

        Ok(None)
    }
}
