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

//! Whitespace encoder/decoder (spec.md §4.4/§4.5): packs 3-bit groups into
//! runs of 0-7 spaces terminated by tabs, line-length aware, and the
//! inverse that recovers them from a stego text's trailing whitespace.

use bitio::{BitSink, Result, StegoError};
use log::warn;
use std::io::{BufRead, Write};

/// Next tab stop at or after `n`, with stops every 8 columns.
fn tabpos(n: usize) -> usize {
    (n + 8) & !7
}

/// Strip trailing spaces, tabs, CR and LF, like the original's `wsgets`.
fn strip_trailing_ws(line: &str) -> &str {
    let bytes = line.as_bytes();
    let mut end = bytes.len();
    while end > 0 {
        match bytes[end - 1] {
            b' ' | b'\t' | b'\n' | b'\r' => end -= 1,
            _ => break,
        }
    }
    &line[..end]
}

/// Approximate bit capacity a single (already whitespace-stripped) cover
/// line contributes at a given target line length (spec.md's
/// `whitespace_storage`). Returns `(lo, hi)`: `lo` counts only the
/// fully-packed slots, `hi` adds the alignment/trailing bonus slots.
pub fn line_capacity(line: &str, line_length: usize) -> (u64, u64) {
    let len = line.len() as i64;
    let t = line_length as i64;

    if len > t - 2 {
        return (0, 0);
    }
    if len / 8 == t / 8 {
        return (0, 3);
    }

    let mut len = len;
    let mut hi = 0i64;
    let lo;

    if len & 7 > 0 {
        hi += 3;
        len = tabpos(len as usize) as i64;
    }
    if t & 7 > 0 {
        hi += 3;
    }

    let n = ((t - len) / 8) * 3;
    hi += n;
    lo = n;

    (lo.max(0) as u64, hi.max(0) as u64)
}

/// Estimated storage capacity of a whole cover text at a given line length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capacity {
    pub n_lo: u64,
    pub n_hi: u64,
}

/// Walk a whole cover text and sum its per-line capacity, matching the
/// original's `space_calculate` (minus its stdout printing, which is an
/// ambient-layer concern left to the caller).
pub fn calculate_capacity<R: BufRead>(mut infile: R, line_length: usize) -> std::io::Result<Capacity> {
    let mut n_lo = 0u64;
    let mut n_hi = 0u64;
    let mut raw = String::new();
    loop {
        raw.clear();
        if infile.read_line(&mut raw)? == 0 {
            break;
        }
        let line = strip_trailing_ws(&raw);
        let (lo, hi) = line_capacity(line, line_length);
        n_lo += lo;
        n_hi += hi;
    }
    if n_lo > 0 {
        // Allow for the initial sentinel tab.
        n_lo -= 1;
        n_hi -= 1;
    }
    Ok(Capacity { n_lo, n_hi })
}

/// Usage statistics reported at flush, mirroring spec.md's advisory
/// capacity/compression reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EncodeStats {
    pub bits_used: u64,
    pub bits_available: u64,
    pub lines_extra: u64,
}

/// Whitespace encoder: a `BitSink` that receives post-cipher bits 3 at a
/// time and emits them as whitespace runs appended to lines pulled from a
/// cover text reader, writing completed lines to the stego output.
pub struct WhitespaceEncoder<R, W> {
    infile: R,
    outfile: W,
    line_length: usize,

    bit_count: u8,
    value: u8,

    buffer_loaded: bool,
    buffer: String,
    buffer_column: usize,
    first_tab: bool,
    needs_tab: bool,

    bits_used: u64,
    bits_available: u64,
    lines_extra: u64,
}

impl<R: BufRead, W: Write> WhitespaceEncoder<R, W> {
    pub fn new(infile: R, outfile: W, line_length: usize) -> Self {
        assert!(line_length >= 8, "line length must be at least 8");
        Self {
            infile,
            outfile,
            line_length,
            bit_count: 0,
            value: 0,
            buffer_loaded: false,
            buffer: String::new(),
            buffer_column: 0,
            first_tab: false,
            needs_tab: false,
            bits_used: 0,
            bits_available: 0,
            lines_extra: 0,
        }
    }

    pub fn stats(&self) -> EncodeStats {
        EncodeStats {
            bits_used: self.bits_used,
            bits_available: self.bits_available,
            lines_extra: self.lines_extra,
        }
    }

    fn wsgets(&mut self) -> std::io::Result<Option<String>> {
        let mut raw = String::new();
        if self.infile.read_line(&mut raw)? == 0 {
            return Ok(None);
        }
        Ok(Some(strip_trailing_ws(&raw).to_owned()))
    }

    fn wsputs(&mut self) -> std::io::Result<()> {
        writeln!(self.outfile, "{}", self.buffer)
    }

    fn buffer_load(&mut self) -> Result<()> {
        match self.wsgets()? {
            Some(line) => self.buffer = line,
            None => {
                self.buffer.clear();
                self.lines_extra += 1;
            }
        }
        self.buffer_column = 0;
        for ch in self.buffer.chars() {
            if ch == '\t' {
                self.buffer_column = tabpos(self.buffer_column);
            } else {
                self.buffer_column += 1;
            }
        }
        self.buffer_loaded = true;
        self.needs_tab = false;
        Ok(())
    }

    /// Append a 0-7 space run (and its owed/terminating tab) to the loaded
    /// line if there's room; `false` means the line is full and must be
    /// flushed before retrying.
    fn append_whitespace(&mut self, nsp: usize) -> bool {
        let mut col = self.buffer_column;
        if self.needs_tab {
            col = tabpos(col);
        }
        if nsp == 0 {
            col = tabpos(col);
        } else {
            col += nsp;
        }
        if col >= self.line_length {
            return false;
        }

        if self.needs_tab {
            self.buffer.push('\t');
            self.buffer_column = tabpos(self.buffer_column);
        }

        if nsp == 0 {
            self.buffer.push('\t');
            self.buffer_column = tabpos(self.buffer_column);
            self.needs_tab = false;
        } else {
            for _ in 0..nsp {
                self.buffer.push(' ');
                self.buffer_column += 1;
            }
            self.needs_tab = true;
        }

        true
    }

    fn write_value(&mut self, val: u8) -> Result<()> {
        if !self.buffer_loaded {
            self.buffer_load()?;
        }

        if !self.first_tab {
            while tabpos(self.buffer_column) >= self.line_length {
                self.wsputs()?;
                self.buffer_load()?;
            }
            self.buffer.push('\t');
            self.buffer_column = tabpos(self.buffer_column);
            self.first_tab = true;
        }

        // Reverse the 3-bit group's bit ordering before writing it as a
        // space count (spec.md §4.4).
        let nspc = (((val & 1) << 2) | (val & 2) | ((val & 4) >> 2)) as usize;

        while !self.append_whitespace(nspc) {
            self.wsputs()?;
            self.buffer_load()?;
        }

        if self.lines_extra == 0 {
            self.bits_available += 3;
        }

        Ok(())
    }

    /// Copy through any unread cover lines unchanged after the payload has
    /// been fully written, accumulating their nominal capacity.
    fn write_flush(&mut self) -> Result<()> {
        if self.buffer_loaded {
            self.wsputs()?;
            self.buffer_loaded = false;
            self.buffer.clear();
            self.buffer_column = 0;
        }

        let mut n_lo = 0u64;
        let mut n_hi = 0u64;
        while let Some(line) = self.wsgets()? {
            let (lo, hi) = line_capacity(&line, self.line_length);
            n_lo += lo;
            n_hi += hi;
            self.buffer = line;
            self.wsputs()?;
        }

        self.bits_available += (n_lo + n_hi) / 2;
        Ok(())
    }
}

impl<R: BufRead, W: Write> BitSink for WhitespaceEncoder<R, W> {
    fn push_bit(&mut self, bit: u8) -> Result<()> {
        self.value = (self.value << 1) | (bit & 1);
        self.bits_used += 1;
        self.bit_count += 1;

        if self.bit_count == 3 {
            self.write_value(self.value)?;
            self.value = 0;
            self.bit_count = 0;
        }

        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if self.bit_count > 0 {
            while self.bit_count < 3 {
                self.value <<= 1;
                self.bit_count += 1;
            }
            self.write_value(self.value)?;
        }
        self.write_flush()
    }
}

fn decode_bits<S: BitSink>(spc: usize, downstream: &mut S) -> Result<()> {
    if spc > 7 {
        return Err(StegoError::IllegalEncoding(spc));
    }
    // Plaintext bit order is (LSB..MSB of spc) -> (b2, b1, b0), fed to the
    // decryptor in that order (spec.md §4.5).
    let b1 = u8::from(spc & 1 != 0);
    let b2 = u8::from(spc & 2 != 0);
    let b3 = u8::from(spc & 4 != 0);
    downstream.push_bit(b1)?;
    downstream.push_bit(b2)?;
    downstream.push_bit(b3)?;
    Ok(())
}

fn decode_whitespace<S: BitSink>(run: &str, downstream: &mut S) -> Result<()> {
    let mut spc = 0usize;
    for ch in run.chars() {
        match ch {
            ' ' => spc += 1,
            '\t' => {
                decode_bits(spc, downstream)?;
                spc = 0;
            }
            _ => {}
        }
    }
    if spc > 0 {
        decode_bits(spc, downstream)?;
    }
    Ok(())
}

/// Slice off everything from the first CR or LF onward, like the
/// original's bounded `for` loop over `buf`.
fn content_before_newline(line: &str) -> &str {
    match line.find(['\n', '\r']) {
        Some(idx) => &line[..idx],
        None => line,
    }
}

/// Find the start of the line's last run of trailing whitespace (spaces
/// and tabs only), if any.
fn last_trailing_run_start(content: &str) -> Option<usize> {
    let mut last_ws = None;
    for (i, ch) in content.char_indices() {
        if ch != ' ' && ch != '\t' {
            last_ws = None;
        } else if last_ws.is_none() {
            last_ws = Some(i);
        }
    }
    last_ws
}

/// Scan a stego text line-by-line, decoding whitespace runs into bits fed
/// to `downstream`, then flush it. This is the driving half of extraction
/// (spec.md §4.5/§4.6): it pulls lines rather than being pushed bits.
pub fn decode_into<R: BufRead, S: BitSink>(mut infile: R, downstream: &mut S) -> Result<()> {
    let mut start_tab_found = false;
    let mut raw = String::new();

    loop {
        raw.clear();
        if infile.read_line(&mut raw)? == 0 {
            break;
        }
        let content = content_before_newline(&raw);

        let Some(mut start) = last_trailing_run_start(content) else {
            continue;
        };

        if !start_tab_found {
            let first = content[start..].chars().next().expect("non-empty run");
            if first == ' ' {
                continue;
            }
            start_tab_found = true;
            start += 1; // skip the sentinel tab itself
            if start >= content.len() {
                continue;
            }
        }

        decode_whitespace(&content[start..], downstream)?;
    }

    downstream.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[derive(Default)]
    struct BitCollector(Vec<u8>);
    impl BitSink for BitCollector {
        fn push_bit(&mut self, bit: u8) -> Result<()> {
            self.0.push(bit);
            Ok(())
        }
        fn flush(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn push_msg_bits<S: BitSink>(sink: &mut S, bits: &[u8]) {
        for &b in bits {
            sink.push_bit(b).unwrap();
        }
    }

    #[test]
    fn encode_then_decode_round_trip() {
        let cover = "abcdefghij\n".repeat(10);
        let mut out = Vec::new();
        {
            let mut enc = WhitespaceEncoder::new(Cursor::new(cover.as_bytes()), &mut out, 80);
            // "Hi" = 0x48 0x69, MSB-first.
            let bits: Vec<u8> = [0x48u8, 0x69]
                .iter()
                .flat_map(|&b| (0..8).map(move |i| (b >> (7 - i)) & 1))
                .collect();
            push_msg_bits(&mut enc, &bits);
            enc.flush().unwrap();
        }

        let mut collector = BitCollector::default();
        decode_into(Cursor::new(out), &mut collector).unwrap();

        let decoded_bytes: Vec<u8> = collector
            .0
            .chunks(8)
            .filter(|c| c.len() == 8)
            .map(|c| c.iter().fold(0u8, |acc, &b| (acc << 1) | b))
            .collect();
        assert_eq!(&decoded_bytes[..2], &[0x48, 0x69]);
    }

    #[test]
    fn non_trailing_content_is_preserved() {
        let cover = "plain text line\n";
        let mut out = Vec::new();
        {
            let mut enc = WhitespaceEncoder::new(Cursor::new(cover.as_bytes()), &mut out, 80);
            push_msg_bits(&mut enc, &[1, 0, 1]);
            enc.flush().unwrap();
        }
        let produced = String::from_utf8(out).unwrap();
        assert!(produced.starts_with("plain text line\t"));
    }

    #[test]
    fn line_length_is_respected() {
        let cover = "x\n".repeat(3);
        let mut out = Vec::new();
        {
            let mut enc = WhitespaceEncoder::new(Cursor::new(cover.as_bytes()), &mut out, 16);
            push_msg_bits(&mut enc, &[1; 60]);
            enc.flush().unwrap();
        }
        let produced = String::from_utf8(out).unwrap();
        for line in produced.lines() {
            let mut col = 0usize;
            for ch in line.chars() {
                col = if ch == '\t' { tabpos(col) } else { col + 1 };
            }
            assert!(col < 16, "line {line:?} expands to column {col}");
        }
    }

    #[test]
    fn illegal_space_run_is_rejected() {
        let crafted = "x\t        \t\n"; // 8 spaces before a tab
        let mut collector = BitCollector::default();
        let err = decode_into(Cursor::new(crafted.as_bytes()), &mut collector).unwrap_err();
        matches!(err, StegoError::IllegalEncoding(8));
    }

    #[test]
    fn overflow_synthesizes_extra_lines() {
        let cover = "x\n";
        let mut out = Vec::new();
        let stats;
        {
            let mut enc = WhitespaceEncoder::new(Cursor::new(cover.as_bytes()), &mut out, 80);
            let bits: Vec<u8> = (0..8 * 100).map(|i| (i % 2) as u8).collect();
            push_msg_bits(&mut enc, &bits);
            enc.flush().unwrap();
            stats = enc.stats();
        }
        assert!(stats.lines_extra > 0);
    }

    #[test]
    fn capacity_grows_with_line_length() {
        let cover = "abc\n".repeat(5);
        let c1 = calculate_capacity(Cursor::new(cover.as_bytes()), 40).unwrap();
        let c2 = calculate_capacity(Cursor::new(cover.as_bytes()), 80).unwrap();
        assert!(c1.n_lo <= c2.n_lo);
        assert!(c1.n_hi <= c2.n_hi);
    }

    #[test]
    fn capacity_report_for_aligned_lines() {
        let cover = "\n\n\n"; // 3 empty lines
        let cap = calculate_capacity(Cursor::new(cover.as_bytes()), 80).unwrap();
        let expected = 3 * ((80 / 8) * 3) - 1;
        assert_eq!(cap.n_lo, expected as u64);
        assert_eq!(cap.n_hi, expected as u64);
    }
}
