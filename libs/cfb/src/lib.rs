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

//! 1-bit cipher-feedback (CFB) stream mode over any `BlockCipher`
//! (spec.md §4.3): encryption and decryption share the exact same feedback
//! update, keyed off the *ciphertext* bit in both directions, which is what
//! makes the mode self-synchronizing and symmetric.

use bitio::{BitSink, Result};
use ice::{BlockCipher, IceKey};
use log::warn;

/// Password -> key-schedule level, per spec.md: `ceil(len(P) * 7 / 64)`
/// clamped to `[1, 128]`, with an empty password warned down to level 1
/// and an over-long one warned down to 128 (1170 characters).
pub fn derive_level(password_len: usize) -> usize {
    let level = (password_len * 7 + 63) / 64;
    if level == 0 {
        warn!("an empty password is being used");
        1
    } else if level > 128 {
        warn!("password truncated to 1170 chars");
        128
    } else {
        level
    }
}

/// Pack the password's characters into a 1024-byte key-schedule buffer,
/// 7 low bits per character, MSB-first within each 7-bit unit. This is a
/// direct port of the original's three-case shift (`bit == 0`, `bit == 1`,
/// else) -- an implementer must reproduce it exactly to stay compatible
/// with existing stego files (spec.md's open question on password packing).
pub fn pack_password(password: &[u8]) -> [u8; 1024] {
    let mut buf = [0u8; 1024];
    let mut i: usize = 0;
    for &raw in password {
        let c = raw & 0x7f;
        let idx = i / 8;
        let bit = i & 7;

        if bit == 0 {
            buf[idx] = c << 1;
        } else if bit == 1 {
            buf[idx] |= c;
        } else {
            buf[idx] |= c >> (bit - 1);
            buf[idx + 1] = c << (9 - bit);
        }

        i += 7;
        if i > 8184 {
            break;
        }
    }
    buf
}

/// Build a keyed `IceKey` and its initial feedback register from a
/// password, or `None` (pass-through) if no password was supplied.
fn new_key_state(password: Option<&str>) -> Option<(IceKey, [u8; 8])> {
    let password = password?;
    let level = derive_level(password.len());
    let mut key = match IceKey::create(level) {
        Ok(key) => key,
        Err(_) => {
            warn!("failed to set password");
            return None;
        }
    };

    let buf = pack_password(password.as_bytes());
    key.set(&buf[0..8 * level]);

    let mut iv_input = [0u8; 8];
    iv_input.copy_from_slice(&buf[0..8]);
    let iv = key.encrypt_block(&iv_input);

    Some((key, iv))
}

/// Compute the keystream mask bit (MSB of `E(iv)`) and advance `iv` by
/// shifting it left one bit across all 8 bytes, feeding `feedback_bit`
/// (the ciphertext bit, in both directions) into the new low bit of the
/// last byte.
fn step<C: BlockCipher>(cipher: &C, iv: &mut [u8; 8]) -> u8 {
    let out = cipher.encrypt_block(iv);
    (out[0] >> 7) & 1
}

fn shift_feedback(iv: &mut [u8; 8], feedback_bit: u8) {
    let old = *iv;
    for i in 0..8 {
        let carry = if i < 7 { (old[i + 1] >> 7) & 1 } else { 0 };
        iv[i] = (old[i] << 1) | carry;
    }
    iv[7] |= feedback_bit;
}

/// CFB encryption stage: plaintext bits in, ciphertext bits downstream.
pub struct CfbEncryptor<C, S> {
    state: Option<(C, [u8; 8])>,
    downstream: S,
}

impl<S> CfbEncryptor<IceKey, S> {
    /// Build an encryptor keyed from a password (or pass-through without
    /// one), matching spec.md's `password_set` + `encrypt_init` flow.
    pub fn new(password: Option<&str>, downstream: S) -> Self {
        Self {
            state: new_key_state(password),
            downstream,
        }
    }
}

impl<C, S> CfbEncryptor<C, S> {
    pub fn into_downstream(self) -> S {
        self.downstream
    }
}

impl<C: BlockCipher, S: BitSink> BitSink for CfbEncryptor<C, S> {
    fn push_bit(&mut self, bit: u8) -> Result<()> {
        match &mut self.state {
            None => self.downstream.push_bit(bit),
            Some((cipher, iv)) => {
                let mask = step(cipher, iv);
                let ciphertext_bit = bit ^ mask;
                shift_feedback(iv, ciphertext_bit);
                self.downstream.push_bit(ciphertext_bit)
            }
        }
    }

    fn flush(&mut self) -> Result<()> {
        self.downstream.flush()
    }
}

/// CFB decryption stage: ciphertext bits in, plaintext bits downstream.
pub struct CfbDecryptor<C, S> {
    state: Option<(C, [u8; 8])>,
    downstream: S,
}

impl<S> CfbDecryptor<IceKey, S> {
    pub fn new(password: Option<&str>, downstream: S) -> Self {
        Self {
            state: new_key_state(password),
            downstream,
        }
    }
}

impl<C, S> CfbDecryptor<C, S> {
    pub fn into_downstream(self) -> S {
        self.downstream
    }
}

impl<C: BlockCipher, S: BitSink> BitSink for CfbDecryptor<C, S> {
    fn push_bit(&mut self, bit: u8) -> Result<()> {
        match &mut self.state {
            None => self.downstream.push_bit(bit),
            Some((cipher, iv)) => {
                let mask = step(cipher, iv);
                let plaintext_bit = bit ^ mask;
                // Feed the ciphertext bit back, not the plaintext bit: this
                // is what makes the encrypt/decrypt feedback updates
                // byte-identical.
                shift_feedback(iv, bit);
                self.downstream.push_bit(plaintext_bit)
            }
        }
    }

    fn flush(&mut self) -> Result<()> {
        self.downstream.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitio::BitSink;

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

    fn feed(bits: &[u8], password: Option<&str>) -> Vec<u8> {
        let collector = BitCollector::default();
        let mut enc = CfbEncryptor::new(password, collector);
        for &b in bits {
            enc.push_bit(b).unwrap();
        }
        enc.flush().unwrap();
        enc.into_downstream().0
    }

    fn pull(bits: &[u8], password: Option<&str>) -> Vec<u8> {
        let collector = BitCollector::default();
        let mut dec = CfbDecryptor::new(password, collector);
        for &b in bits {
            dec.push_bit(b).unwrap();
        }
        dec.flush().unwrap();
        dec.into_downstream().0
    }

    #[test]
    fn decrypt_inverts_encrypt_at_every_prefix_length() {
        let plaintext = [1u8, 0, 1, 1, 0, 0, 1, 0, 1, 1, 1, 0, 0, 0, 1];
        for prefix in 1..=plaintext.len() {
            let ct = feed(&plaintext[..prefix], Some("snow"));
            let pt = pull(&ct, Some("snow"));
            assert_eq!(pt, plaintext[..prefix], "mismatch at prefix {prefix}");
        }
    }

    #[test]
    fn no_password_is_pass_through() {
        let bits = [1, 1, 0, 0, 1];
        let ct = feed(&bits, None);
        assert_eq!(ct, bits);
        let pt = pull(&ct, None);
        assert_eq!(pt, bits);
    }

    #[test]
    fn wrong_password_does_not_recover_plaintext() {
        let plaintext = [1u8, 0, 1, 1, 0, 0, 1, 0, 1, 1, 0, 1, 0, 0, 1, 1];
        let ct = feed(&plaintext, Some("snow"));
        let pt = pull(&ct, Some("SNOW"));
        assert_ne!(pt, plaintext);
    }

    #[test]
    fn password_packing_matches_three_case_shift() {
        // 'A' = 0x41, low 7 bits = 0x41. First char: bit offset 0 -> buf[0] = c << 1.
        let buf = pack_password(b"A");
        assert_eq!(buf[0], 0x41 << 1);
    }

    #[test]
    fn empty_password_clamps_to_level_one() {
        assert_eq!(derive_level(0), 1);
    }

    #[test]
    fn very_long_password_clamps_to_level_128() {
        assert_eq!(derive_level(10_000), 128);
    }
}
