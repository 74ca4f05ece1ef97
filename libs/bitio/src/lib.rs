// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! Shared plumbing for the bit-pipeline: the `BitSink` capability every
//! stage is written against, plus the error kinds every stage can raise.

use thiserror::Error;

/// The error kinds a pipeline stage can raise, per spec.md's error handling
/// design: I/O, an illegal whitespace encoding, Huffman buffer overflow, and
/// cipher key allocation failure.
#[derive(Debug, Error)]
pub enum StegoError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("illegal encoding: space run of length {0} exceeds 7")]
    IllegalEncoding(usize),

    #[error("huffman decompress buffer overflow (wrong password or corrupt input)")]
    HuffmanOverflow,

    #[error("cipher key allocation failed for level {0}")]
    KeyAllocation(usize),
}

pub type Result<T> = std::result::Result<T, StegoError>;

/// A push-style consumer of a single-bit stream.
///
/// Every stage in the pipeline (compressor, encryptor, whitespace encoder)
/// accepts a downstream `BitSink` instead of calling the next stage by name,
/// so stages compose by construction rather than by a hard-wired call chain.
pub trait BitSink {
    /// Push a single bit (0 or 1 in the low bit of `bit`) downstream.
    fn push_bit(&mut self, bit: u8) -> Result<()>;

    /// Flush any residual state, padding a partial group as each stage's
    /// semantics demand, and propagate the flush to the downstream sink.
    fn flush(&mut self) -> Result<()>;
}

/// Accumulates bits MSB-first into bytes, used by both the Huffman
/// compressor (grouping input bits into bytes) and the plain byte writer
/// (grouping decoded/pass-through bits back into bytes).
#[derive(Debug, Default, Clone, Copy)]
pub struct BitAccumulator {
    value: u8,
    count: u8,
}

impl BitAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push one bit in. Returns `Some(byte)` once 8 bits have accumulated,
    /// resetting the accumulator.
    pub fn push(&mut self, bit: u8) -> Option<u8> {
        self.value = (self.value << 1) | (bit & 1);
        self.count += 1;
        if self.count == 8 {
            let byte = self.value;
            self.value = 0;
            self.count = 0;
            Some(byte)
        } else {
            None
        }
    }

    /// Number of bits currently held (0..8).
    pub fn residual_bits(&self) -> u8 {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_accumulator_groups_msb_first() {
        let mut acc = BitAccumulator::new();
        let bits = [0, 1, 0, 0, 1, 0, 0, 0]; // 0x48 = 'H'
        let mut out = None;
        for b in bits {
            out = acc.push(b);
        }
        assert_eq!(out, Some(0x48));
        assert_eq!(acc.residual_bits(), 0);
    }

    #[test]
    fn bit_accumulator_tracks_residual() {
        let mut acc = BitAccumulator::new();
        acc.push(1);
        acc.push(0);
        acc.push(1);
        assert_eq!(acc.residual_bits(), 3);
    }
}
