//! Packed array of 4-bit values used for block light and sky light.
//!
//! Nibble `p` lives at bit offset `(p % 16) * 4` of word `p / 16`. Writes
//! retry a compare-and-swap on the containing word, so concurrent writers to
//! neighboring nibbles of the same word never lose each other's update.
//!
//! The byte form is two nibbles per byte, low nibble first, which is what
//! [`NibbleArray::write`] emits and [`NibbleArray::read`] accepts.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::{Buf, BufMut};

use crate::error::CodecError;
use crate::varint::ensure_remaining;

/// Nibbles stored in one backing word.
const NIBBLES_PER_WORD: usize = 16;

/// A fixed-length array of 4-bit values with lock-free per-cell updates.
pub struct NibbleArray {
    words: Box<[AtomicU64]>,
    len: usize,
}

impl NibbleArray {
    /// Creates an array of `len` nibbles, all zero.
    pub fn new(len: usize) -> Self {
        Self::filled(len, 0)
    }

    /// Creates an array of `len` nibbles, all set to `value & 0xF`.
    pub fn filled(len: usize, value: u8) -> Self {
        let word = splat(value);
        let words = (0..len.div_ceil(NIBBLES_PER_WORD))
            .map(|_| AtomicU64::new(word))
            .collect();
        Self { words, len }
    }

    /// Returns the nibble at `position`.
    ///
    /// # Panics
    ///
    /// Panics if `position >= len`.
    pub fn get(&self, position: usize) -> u8 {
        assert!(position < self.len, "nibble index {position} out of bounds");
        let word = self.words[position / NIBBLES_PER_WORD].load(Ordering::Acquire);
        ((word >> shift(position)) & 0xF) as u8
    }

    /// Stores `value & 0xF` at `position`.
    ///
    /// # Panics
    ///
    /// Panics if `position >= len`.
    pub fn set(&self, position: usize, value: u8) {
        assert!(position < self.len, "nibble index {position} out of bounds");
        let shift = shift(position);
        let mask = 0xFu64 << shift;
        let bits = u64::from(value & 0xF) << shift;
        let word = &self.words[position / NIBBLES_PER_WORD];
        let mut current = word.load(Ordering::Acquire);
        loop {
            let next = (current & !mask) | bits;
            match word.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    /// Sets every nibble to `value & 0xF`.
    pub fn fill(&self, value: u8) {
        let word = splat(value);
        for w in self.words.iter() {
            w.store(word, Ordering::Release);
        }
    }

    /// Number of nibbles.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the array holds no nibbles.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of bytes [`write`](Self::write) emits.
    pub fn byte_len(&self) -> usize {
        self.len.div_ceil(2)
    }

    /// Emits the array two nibbles per byte, walking each word low byte first.
    pub fn write(&self, out: &mut impl BufMut) {
        let mut remaining = self.byte_len();
        for word in self.words.iter() {
            let word = word.load(Ordering::Acquire);
            for byte in 0..8 {
                if remaining == 0 {
                    return;
                }
                out.put_u8((word >> (byte * 8)) as u8);
                remaining -= 1;
            }
        }
    }

    /// Reads an array of `len` nibbles in the layout produced by [`write`](Self::write).
    pub fn read(buf: &mut impl Buf, len: usize) -> Result<Self, CodecError> {
        let byte_len = len.div_ceil(2);
        ensure_remaining(buf, byte_len)?;
        let mut words = Vec::with_capacity(len.div_ceil(NIBBLES_PER_WORD));
        let mut word = 0u64;
        for i in 0..byte_len {
            word |= u64::from(buf.get_u8()) << ((i % 8) * 8);
            if i % 8 == 7 {
                words.push(AtomicU64::new(word));
                word = 0;
            }
        }
        if byte_len % 8 != 0 {
            words.push(AtomicU64::new(word));
        }
        Ok(Self {
            words: words.into_boxed_slice(),
            len,
        })
    }
}

impl Clone for NibbleArray {
    fn clone(&self) -> Self {
        let words = self
            .words
            .iter()
            .map(|w| AtomicU64::new(w.load(Ordering::Acquire)))
            .collect();
        Self {
            words,
            len: self.len,
        }
    }
}

impl fmt::Debug for NibbleArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NibbleArray").field("len", &self.len).finish()
    }
}

fn shift(position: usize) -> u32 {
    ((position % NIBBLES_PER_WORD) * 4) as u32
}

/// Repeats a nibble across all 16 positions of a word.
fn splat(value: u8) -> u64 {
    u64::from(value & 0xF) * 0x1111_1111_1111_1111
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_every_value() {
        let arr = NibbleArray::new(64);
        for p in 0..64 {
            for v in 0..16u8 {
                arr.set(p, v);
                assert_eq!(arr.get(p), v, "position {p} value {v}");
            }
        }
    }

    #[test]
    fn test_set_masks_to_low_nibble() {
        let arr = NibbleArray::new(4);
        arr.set(1, 0xAB);
        assert_eq!(arr.get(1), 0xB);
        assert_eq!(arr.get(0), 0);
        assert_eq!(arr.get(2), 0);
    }

    #[test]
    fn test_neighbors_unaffected() {
        let arr = NibbleArray::new(32);
        for p in 0..32 {
            arr.set(p, (p % 16) as u8);
        }
        arr.set(5, 0);
        for p in (0..32).filter(|&p| p != 5) {
            assert_eq!(arr.get(p), (p % 16) as u8);
        }
    }

    #[test]
    fn test_fill() {
        let arr = NibbleArray::new(4096);
        arr.fill(15);
        assert!((0..4096).all(|p| arr.get(p) == 15));
        let lit = NibbleArray::filled(10, 7);
        assert!((0..10).all(|p| lit.get(p) == 7));
    }

    #[test]
    fn test_write_low_nibble_first() {
        let arr = NibbleArray::new(4);
        arr.set(0, 0x1);
        arr.set(1, 0x2);
        arr.set(2, 0x3);
        arr.set(3, 0x4);
        let mut out = Vec::new();
        arr.write(&mut out);
        assert_eq!(out, [0x21, 0x43]);
    }

    #[test]
    fn test_write_read_preserves_values() {
        let arr = NibbleArray::new(4096);
        for p in 0..4096 {
            arr.set(p, ((p * 7) % 16) as u8);
        }
        let mut out = Vec::new();
        arr.write(&mut out);
        assert_eq!(out.len(), 2048);

        let mut slice = &out[..];
        let back = NibbleArray::read(&mut slice, 4096).unwrap();
        assert!(slice.is_empty());
        for p in 0..4096 {
            assert_eq!(back.get(p), arr.get(p));
        }
    }

    #[test]
    fn test_read_truncated() {
        let mut slice: &[u8] = &[0u8; 10];
        assert!(matches!(
            NibbleArray::read(&mut slice, 4096),
            Err(CodecError::UnexpectedEof { .. })
        ));
    }

    #[test]
    fn test_concurrent_neighbor_writes_do_not_tear() {
        let arr = NibbleArray::new(16);
        std::thread::scope(|s| {
            for p in 0..16 {
                let arr = &arr;
                s.spawn(move || {
                    for _ in 0..1_000 {
                        arr.set(p, p as u8);
                    }
                });
            }
        });
        for p in 0..16 {
            assert_eq!(arr.get(p), p as u8);
        }
    }
}
