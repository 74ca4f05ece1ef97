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

//! Wires the four bit-pipeline stages together end to end (spec.md §4.6):
//! embedding pushes a message through compress -> encrypt -> whitespace-encode,
//! extraction pulls the mirror-image chain pulling from the stego text and
//! writing the recovered bytes back out.

use bitio::{BitAccumulator, BitSink, Result};
use cfb::{CfbDecryptor, CfbEncryptor};
use huffman::{push_bytes, Compressor, Decompressor};
use std::io::{BufRead, Write};
use whitespace::{decode_into, Capacity, EncodeStats, WhitespaceEncoder};

/// Run parameters built once from parsed CLI options and held read-only for
/// the duration of a run (spec.md §5: no process-wide mutable globals).
#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    pub compress: bool,
    pub quiet: bool,
    pub line_length: usize,
}

impl PipelineConfig {
    pub fn new(compress: bool, quiet: bool, line_length: usize) -> Self {
        Self {
            compress,
            quiet,
            line_length,
        }
    }
}

/// Bit sink that regroups bits MSB-first into bytes and writes each
/// completed byte straight through to `W`, used as the innermost sink when
/// extracting a message.
struct ByteWriter<W> {
    acc: BitAccumulator,
    out: W,
}

impl<W: Write> ByteWriter<W> {
    fn new(out: W) -> Self {
        Self {
            acc: BitAccumulator::new(),
            out,
        }
    }
}

impl<W: Write> BitSink for ByteWriter<W> {
    fn push_bit(&mut self, bit: u8) -> Result<()> {
        if let Some(byte) = self.acc.push(bit) {
            self.out.write_all(&[byte])?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

/// Embed `message` into the cover text read from `cover`, writing the
/// resulting stego text to `stego_out`. Returns the encoder's usage
/// statistics for the caller to report (spec.md's advisory capacity and
/// compression-ratio output).
pub fn embed<R: BufRead, W: Write>(
    cover: R,
    stego_out: W,
    message: &[u8],
    config: &PipelineConfig,
    password: Option<&str>,
) -> Result<EncodeStats> {
    let whitespace_enc = WhitespaceEncoder::new(cover, stego_out, config.line_length);
    let encryptor = CfbEncryptor::new(password, whitespace_enc);
    let mut compressor = Compressor::new(config.compress, encryptor);

    push_bytes(&mut compressor, message)?;
    compressor.flush()?;

    let stats = compressor.into_downstream().into_downstream().stats();
    Ok(stats)
}

/// Extract a message from the stego text read from `stego`, writing the
/// recovered bytes to `message_out`.
pub fn extract<R: BufRead, W: Write>(
    stego: R,
    message_out: W,
    config: &PipelineConfig,
    password: Option<&str>,
) -> Result<()> {
    let byte_writer = ByteWriter::new(message_out);
    let decompressor = Decompressor::new(config.compress, byte_writer);
    let mut decryptor = CfbDecryptor::new(password, decompressor);

    decode_into(stego, &mut decryptor)
}

/// Estimate the cover text's storage capacity at the configured line
/// length, for the `-S` report.
pub fn estimate_capacity<R: BufRead>(cover: R, line_length: usize) -> std::io::Result<Capacity> {
    whitespace::calculate_capacity(cover, line_length)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn cover_text(lines: usize) -> String {
        "the quick brown fox jumps over the lazy dog\n".repeat(lines)
    }

    #[test]
    fn embed_then_extract_round_trip_uncompressed_unencrypted() {
        let cover = cover_text(20);
        let config = PipelineConfig::new(false, true, 80);
        let message = b"hidden message";

        let mut stego = Vec::new();
        embed(Cursor::new(cover.as_bytes()), &mut stego, message, &config, None).unwrap();

        let mut recovered = Vec::new();
        extract(Cursor::new(stego), &mut recovered, &config, None).unwrap();

        assert!(recovered.starts_with(message));
    }

    #[test]
    fn embed_then_extract_round_trip_with_compression_and_password() {
        let cover = cover_text(40);
        let config = PipelineConfig::new(true, true, 80);
        let message = b"the quick brown fox jumps over the lazy dog again and again";

        let mut stego = Vec::new();
        embed(
            Cursor::new(cover.as_bytes()),
            &mut stego,
            message,
            &config,
            Some("correct horse battery staple"),
        )
        .unwrap();

        let mut recovered = Vec::new();
        extract(
            Cursor::new(stego),
            &mut recovered,
            &config,
            Some("correct horse battery staple"),
        )
        .unwrap();

        assert!(recovered.starts_with(message));
    }

    #[test]
    fn wrong_password_does_not_recover_message() {
        let cover = cover_text(20);
        let config = PipelineConfig::new(false, true, 80);
        let message = b"secret";

        let mut stego = Vec::new();
        embed(
            Cursor::new(cover.as_bytes()),
            &mut stego,
            message,
            &config,
            Some("right"),
        )
        .unwrap();

        let mut recovered = Vec::new();
        extract(
            Cursor::new(stego),
            &mut recovered,
            &config,
            Some("wrong"),
        )
        .unwrap();

        assert_ne!(&recovered[..message.len().min(recovered.len())], message);
    }

    #[test]
    fn capacity_report_is_available_before_embedding() {
        let cover = cover_text(10);
        let capacity = estimate_capacity(Cursor::new(cover.as_bytes()), 80).unwrap();
        assert!(capacity.n_hi >= capacity.n_lo);
    }
}
