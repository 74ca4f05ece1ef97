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

//! A 64-bit Feistel block cipher with a variable-length key schedule
//! (`level` * 64 bits), exposed behind the `BlockCipher` capability.
//!
//! This crate implements the *contract* spec.md assigns to the ICE cipher
//! (a keyed, deterministic 8-byte -> 8-byte permutation with an inverse),
//! not a bit-for-bit port of the historical ICE algorithm — spec.md treats
//! the exact cipher schedule as an out-of-scope black box.

mod sbox;

use bitio::StegoError;
use sbox::SBOX;

/// A keyed 64-bit block permutation, plus its inverse.
///
/// `libs/cfb` is written against this trait rather than against `IceKey`
/// directly, so the stream mode is independent of the specific cipher.
pub trait BlockCipher {
    fn encrypt_block(&self, block: &[u8; 8]) -> [u8; 8];
    fn decrypt_block(&self, block: &[u8; 8]) -> [u8; 8];
}

/// Rounds scheduled per unit of key `level`, mirroring the historical ICE
/// key schedule's relationship between key size and round count.
const ROUNDS_PER_LEVEL: usize = 8;

/// A keyed ICE-style cipher handle. `level` bounds the key material to
/// `8 * level` bytes, matching spec.md's `[1,128]` range.
pub struct IceKey {
    level: usize,
    round_keys: Vec<u32>,
}

impl IceKey {
    /// `create(level)`: allocate a handle for the given key-schedule level.
    pub fn create(level: usize) -> Result<Self, StegoError> {
        if !(1..=128).contains(&level) {
            return Err(StegoError::KeyAllocation(level));
        }
        Ok(Self {
            level,
            round_keys: Vec::new(),
        })
    }

    pub fn level(&self) -> usize {
        self.level
    }

    /// `set(handle, key_bytes)`: load `8 * level` bytes of key material into
    /// the schedule, deriving one round key per scheduled round.
    pub fn set(&mut self, key_bytes: &[u8]) {
        assert_eq!(
            key_bytes.len(),
            8 * self.level,
            "ICE key material must be exactly 8 * level bytes"
        );
        let rounds = self.level * ROUNDS_PER_LEVEL;
        self.round_keys = derive_round_keys(key_bytes, rounds);
    }

    /// `destroy(handle)`: release the key schedule. In Rust this is just
    /// ownership drop, but kept as an explicit method to mirror the
    /// create/set/encrypt/decrypt/destroy contract spec.md describes.
    pub fn destroy(self) {
        drop(self);
    }
}

/// Derive one round key per round from the raw key bytes, mixing in the
/// round index so identical 4-byte windows of key material still yield
/// distinct round keys.
fn derive_round_keys(key_bytes: &[u8], rounds: usize) -> Vec<u32> {
    let mut keys = Vec::with_capacity(rounds);
    let mut acc: u32 = 0x9e37_79b9;
    for i in 0..rounds {
        let at = |o: usize| key_bytes[(i * 4 + o) % key_bytes.len()];
        let word = u32::from_be_bytes([at(0), at(1), at(2), at(3)]);
        acc = acc.rotate_left(7) ^ word ^ (i as u32);
        keys.push(acc);
    }
    keys
}

/// The round function: XOR in the round key, substitute each byte through
/// the fixed S-box, then rotate to diffuse the substitution across the
/// whole word.
fn round_function(half: u32, round_key: u32) -> u32 {
    let x = (half ^ round_key).to_be_bytes();
    let s = [
        SBOX[x[0] as usize],
        SBOX[x[1] as usize],
        SBOX[x[2] as usize],
        SBOX[x[3] as usize],
    ];
    u32::from_be_bytes(s).rotate_left(11)
}

fn split(block: &[u8; 8]) -> (u32, u32) {
    (
        u32::from_be_bytes([block[0], block[1], block[2], block[3]]),
        u32::from_be_bytes([block[4], block[5], block[6], block[7]]),
    )
}

fn join(l: u32, r: u32) -> [u8; 8] {
    let mut out = [0u8; 8];
    out[0..4].copy_from_slice(&l.to_be_bytes());
    out[4..8].copy_from_slice(&r.to_be_bytes());
    out
}

impl BlockCipher for IceKey {
    fn encrypt_block(&self, block: &[u8; 8]) -> [u8; 8] {
        let (mut l, mut r) = split(block);
        for &k in &self.round_keys {
            let new_r = l ^ round_function(r, k);
            l = r;
            r = new_r;
        }
        join(l, r)
    }

    fn decrypt_block(&self, block: &[u8; 8]) -> [u8; 8] {
        let (mut l, mut r) = split(block);
        for &k in self.round_keys.iter().rev() {
            let new_l = r ^ round_function(l, k);
            r = l;
            l = new_l;
        }
        join(l, r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keyed(level: usize, seed: u8) -> IceKey {
        let mut key = IceKey::create(level).unwrap();
        let bytes: Vec<u8> = (0..8 * level).map(|i| (i as u8).wrapping_add(seed)).collect();
        key.set(&bytes);
        key
    }

    #[test]
    fn encrypt_then_decrypt_is_identity() {
        let key = keyed(2, 0x5a);
        let block = [1, 2, 3, 4, 5, 6, 7, 8];
        let ct = key.encrypt_block(&block);
        assert_ne!(ct, block);
        let pt = key.decrypt_block(&ct);
        assert_eq!(pt, block);
    }

    #[test]
    fn different_keys_produce_different_ciphertext() {
        let a = keyed(1, 1);
        let b = keyed(1, 2);
        let block = [0u8; 8];
        assert_ne!(a.encrypt_block(&block), b.encrypt_block(&block));
    }

    #[test]
    fn rejects_out_of_range_level() {
        assert!(IceKey::create(0).is_err());
        assert!(IceKey::create(129).is_err());
        assert!(IceKey::create(1).is_ok());
        assert!(IceKey::create(128).is_ok());
    }

    #[test]
    fn round_trip_holds_across_all_levels_sampled() {
        for level in [1usize, 3, 16, 64, 128] {
            let key = keyed(level, level as u8);
            let block = [9, 8, 7, 6, 5, 4, 3, 2];
            let ct = key.encrypt_block(&block);
            assert_eq!(key.decrypt_block(&ct), block);
        }
    }
}
