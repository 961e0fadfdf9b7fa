//! Golomb-coded set block filters (version 2)
//!
//! Each block commits to a filter over the output scripts of its
//! transactions. Testing a set of scripts against it tells whether the block
//! may be worth downloading; false positives are possible, false negatives
//! are not.

use crate::hash::Hash256;
use siphasher::sip::SipHasher24;
use std::collections::BTreeSet;
use std::hash::Hasher;
use thiserror::Error;

/// Golomb-Rice remainder bits
pub const FILTER_B: u8 = 19;
/// Inverse false positive rate
pub const FILTER_M: u64 = 784_931;
/// SipHash key size taken from the block merkle root
pub const KEY_SIZE: usize = 16;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FilterError {
    #[error("Filter data truncated while reading item count")]
    Truncated,

    #[error("Filter item count {0} exceeds supported size")]
    TooLarge(u64),
}

/// Filter key derived from a block's merkle root
pub fn key_from_merkle_root(merkle_root: &Hash256) -> [u8; KEY_SIZE] {
    let mut key = [0u8; KEY_SIZE];
    key.copy_from_slice(&merkle_root.as_bytes()[..KEY_SIZE]);
    key
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactFilter {
    n: u32,
    /// Golomb-Rice coded deltas, without the item count prefix
    bits: Vec<u8>,
}

impl CompactFilter {
    /// Parse the serialized form: varint item count followed by the bitstream.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FilterError> {
        if bytes.is_empty() {
            return Ok(Self {
                n: 0,
                bits: Vec::new(),
            });
        }

        let (n, consumed) = read_varint(bytes).ok_or(FilterError::Truncated)?;
        let n = u32::try_from(n).map_err(|_| FilterError::TooLarge(n))?;

        Ok(Self {
            n,
            bits: bytes[consumed..].to_vec(),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        if self.n == 0 {
            return Vec::new();
        }
        let mut out = Vec::with_capacity(self.bits.len() + 9);
        write_varint(&mut out, self.n as u64);
        out.extend_from_slice(&self.bits);
        out
    }

    /// Build a filter committing to `items` under `key`.
    pub fn build<I, T>(key: &[u8; KEY_SIZE], items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        let unique: BTreeSet<Vec<u8>> = items.into_iter().map(|i| i.as_ref().to_vec()).collect();
        let n = unique.len() as u32;
        if n == 0 {
            return Self {
                n: 0,
                bits: Vec::new(),
            };
        }

        let modulus = n as u64 * FILTER_M;
        let hasher = ItemHasher::new(key);
        let mut values: Vec<u64> = unique
            .iter()
            .map(|item| hasher.reduced(item, modulus))
            .collect();
        values.sort_unstable();

        let mut writer = BitWriter::default();
        let mut last = 0u64;
        for value in values {
            let delta = value - last;
            last = value;
            let quotient = delta >> FILTER_B;
            for _ in 0..quotient {
                writer.write_bit(true);
            }
            writer.write_bit(false);
            writer.write_bits(delta, FILTER_B);
        }

        Self {
            n,
            bits: writer.into_bytes(),
        }
    }

    /// Number of items committed to
    pub fn len(&self) -> u32 {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    pub fn matches(&self, key: &[u8; KEY_SIZE], item: &[u8]) -> bool {
        self.match_any(key, [item])
    }

    /// Whether any of `items` may be in the filter.
    ///
    /// All items are tested in a single pass over the coded set. A bitstream
    /// that ends early is reported as a match so the caller falls back to
    /// inspecting the full block.
    pub fn match_any<I, T>(&self, key: &[u8; KEY_SIZE], items: I) -> bool
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        if self.n == 0 {
            return false;
        }

        let modulus = self.n as u64 * FILTER_M;
        let hasher = ItemHasher::new(key);
        let mut queries: Vec<u64> = items
            .into_iter()
            .map(|item| hasher.reduced(item.as_ref(), modulus))
            .collect();
        if queries.is_empty() {
            return false;
        }
        queries.sort_unstable();
        queries.dedup();

        let mut reader = BitReader::new(&self.bits);
        let mut last = 0u64;
        let mut qi = 0;
        for _ in 0..self.n {
            let value = match reader.read_delta() {
                Some(delta) => last + delta,
                None => return true,
            };
            last = value;

            while qi < queries.len() && queries[qi] < value {
                qi += 1;
            }
            if qi == queries.len() {
                return false;
            }
            if queries[qi] == value {
                return true;
            }
        }

        false
    }
}

struct ItemHasher {
    k0: u64,
    k1: u64,
}

impl ItemHasher {
    fn new(key: &[u8; KEY_SIZE]) -> Self {
        let mut k0 = [0u8; 8];
        let mut k1 = [0u8; 8];
        k0.copy_from_slice(&key[..8]);
        k1.copy_from_slice(&key[8..]);
        Self {
            k0: u64::from_le_bytes(k0),
            k1: u64::from_le_bytes(k1),
        }
    }

    /// SipHash-2-4 of the item mapped uniformly into [0, modulus)
    fn reduced(&self, item: &[u8], modulus: u64) -> u64 {
        let mut hasher = SipHasher24::new_with_keys(self.k0, self.k1);
        hasher.write(item);
        let hash = hasher.finish();
        ((hash as u128 * modulus as u128) >> 64) as u64
    }
}

#[derive(Default)]
struct BitWriter {
    bytes: Vec<u8>,
    len: usize,
}

impl BitWriter {
    fn write_bit(&mut self, bit: bool) {
        if self.len % 8 == 0 {
            self.bytes.push(0);
        }
        if bit {
            let last = self.bytes.len() - 1;
            self.bytes[last] |= 0x80 >> (self.len % 8);
        }
        self.len += 1;
    }

    /// Low `count` bits of `value`, most significant first
    fn write_bits(&mut self, value: u64, count: u8) {
        for i in (0..count).rev() {
            self.write_bit((value >> i) & 1 == 1);
        }
    }

    fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

struct BitReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn read_bit(&mut self) -> Option<bool> {
        let byte = *self.bytes.get(self.pos / 8)?;
        let bit = byte & (0x80 >> (self.pos % 8)) != 0;
        self.pos += 1;
        Some(bit)
    }

    fn read_bits(&mut self, count: u8) -> Option<u64> {
        let mut value = 0u64;
        for _ in 0..count {
            value = (value << 1) | self.read_bit()? as u64;
        }
        Some(value)
    }

    fn read_delta(&mut self) -> Option<u64> {
        let mut quotient = 0u64;
        while self.read_bit()? {
            quotient += 1;
        }
        let remainder = self.read_bits(FILTER_B)?;
        Some((quotient << FILTER_B) | remainder)
    }
}

fn read_varint(bytes: &[u8]) -> Option<(u64, usize)> {
    let first = *bytes.first()?;
    let width = match first {
        0xfd => 2,
        0xfe => 4,
        0xff => 8,
        small => return Some((small as u64, 1)),
    };
    let raw = bytes.get(1..1 + width)?;
    let mut buf = [0u8; 8];
    buf[..width].copy_from_slice(raw);
    Some((u64::from_le_bytes(buf), 1 + width))
}

fn write_varint(out: &mut Vec<u8>, value: u64) {
    match value {
        0..=0xfc => out.push(value as u8),
        0xfd..=0xffff => {
            out.push(0xfd);
            out.extend_from_slice(&(value as u16).to_le_bytes());
        }
        0x1_0000..=0xffff_ffff => {
            out.push(0xfe);
            out.extend_from_slice(&(value as u32).to_le_bytes());
        }
        _ => {
            out.push(0xff);
            out.extend_from_slice(&value.to_le_bytes());
        }
    }
}
