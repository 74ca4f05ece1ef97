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

//! Fixed Huffman compression over the bit-pipeline (spec.md §4.1).
//!
//! The compressor groups input bits MSB-first into bytes and emits the
//! matching code word from the static table; the decompressor walks an
//! accumulated 0/1 prefix and, since the table is prefix-free, can stop as
//! soon as that prefix exactly matches a table entry.

mod table;

use bitio::{BitAccumulator, BitSink, Result, StegoError};
use lazy_static::lazy_static;
use log::{trace, warn};
use std::collections::HashMap;
use table::HUFFCODES;

lazy_static! {
    /// Reverse lookup from code word to byte value, built once from the
    /// static table, mirroring the teacher's `construct()` /
    /// `lazy_static!` pattern for building decode tables from compact data.
    static ref DECODE_TABLE: HashMap<&'static str, u8> = {
        trace!("building huffman decode table");
        HUFFCODES
            .iter()
            .enumerate()
            .map(|(byte, code)| (*code, byte as u8))
            .collect()
    };
}

/// Longest code word in the table; the decompressor treats reaching this
/// many accumulated bits without a match as a corrupt stream.
const MAX_CODE_LEN: usize = 255;

/// Push-style Huffman compressor. When `enabled` is false it is a
/// pass-through identity, matching spec.md's "compress flag OFF" behavior.
pub struct Compressor<S> {
    enabled: bool,
    acc: BitAccumulator,
    downstream: S,
    bits_in: u64,
    bits_out: u64,
}

impl<S: BitSink> Compressor<S> {
    pub fn new(enabled: bool, downstream: S) -> Self {
        Self {
            enabled,
            acc: BitAccumulator::new(),
            downstream,
            bits_in: 0,
            bits_out: 0,
        }
    }

    /// Input/output bit counters, used to report the compression ratio at
    /// flush.
    pub fn counters(&self) -> (u64, u64) {
        (self.bits_in, self.bits_out)
    }

    pub fn into_downstream(self) -> S {
        self.downstream
    }
}

impl<S: BitSink> BitSink for Compressor<S> {
    fn push_bit(&mut self, bit: u8) -> Result<()> {
        if !self.enabled {
            return self.downstream.push_bit(bit);
        }

        self.bits_in += 1;
        if let Some(byte) = self.acc.push(bit) {
            for c in HUFFCODES[byte as usize].chars() {
                let out_bit = if c == '1' { 1 } else { 0 };
                self.downstream.push_bit(out_bit)?;
                self.bits_out += 1;
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if self.enabled && self.acc.residual_bits() > 0 {
            warn!(
                "residual of {} bits not compressed",
                self.acc.residual_bits()
            );
        }
        if self.enabled && self.bits_out > 0 {
            let ratio = (self.bits_in as f64 - self.bits_out as f64) / self.bits_in as f64 * 100.0;
            if ratio < 0.0 {
                warn!(
                    "compression enlarged data by {:.2}% - recommend not using compression",
                    -ratio
                );
            } else {
                trace!("compressed by {:.2}%", ratio);
            }
        }
        self.downstream.flush()
    }
}

/// Push-style Huffman decompressor. Pass-through identity when `enabled`
/// is false.
pub struct Decompressor<S> {
    enabled: bool,
    prefix: String,
    downstream: S,
    byte_acc: BitAccumulator,
}

impl<S: BitSink> Decompressor<S> {
    pub fn new(enabled: bool, downstream: S) -> Self {
        Self {
            enabled,
            prefix: String::with_capacity(16),
            downstream,
            byte_acc: BitAccumulator::new(),
        }
    }

    pub fn into_downstream(self) -> S {
        self.downstream
    }
}

impl<S: BitSink> BitSink for Decompressor<S> {
    fn push_bit(&mut self, bit: u8) -> Result<()> {
        if !self.enabled {
            return self.downstream.push_bit(bit);
        }

        self.prefix.push(if bit != 0 { '1' } else { '0' });

        if let Some(&byte) = DECODE_TABLE.get(self.prefix.as_str()) {
            for i in 0..8 {
                let b = (byte >> (7 - i)) & 1;
                self.downstream.push_bit(b)?;
            }
            self.prefix.clear();
        } else if self.prefix.len() >= MAX_CODE_LEN {
            return Err(StegoError::HuffmanOverflow);
        }

        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if self.enabled && self.prefix.len() > 2 {
            warn!("residual of {} bits not uncompressed", self.prefix.len());
        }
        self.downstream.flush()
    }
}

/// A plain byte writer, used as the innermost downstream sink when testing
/// the codec in isolation: groups 8 bits MSB-first and appends each byte.
pub struct ByteCollector {
    acc: BitAccumulator,
    pub bytes: Vec<u8>,
}

impl Default for ByteCollector {
    fn default() -> Self {
        Self {
            acc: BitAccumulator::new(),
            bytes: Vec::new(),
        }
    }
}

impl BitSink for ByteCollector {
    fn push_bit(&mut self, bit: u8) -> Result<()> {
        if let Some(byte) = self.acc.push(bit) {
            self.bytes.push(byte);
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if self.acc.residual_bits() > 0 {
            warn!("residual of {} bits not output", self.acc.residual_bits());
        }
        Ok(())
    }
}

fn bits_of_byte(byte: u8) -> impl Iterator<Item = u8> {
    (0..8).map(move |i| (byte >> (7 - i)) & 1)
}

/// Feed a whole byte slice through a `BitSink`, MSB-first.
pub fn push_bytes<S: BitSink>(sink: &mut S, bytes: &[u8]) -> Result<()> {
    for &byte in bytes {
        for bit in bits_of_byte(byte) {
            sink.push_bit(bit)?;
        }
    }
    Ok(())
}
