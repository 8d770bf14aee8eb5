//! 16×16×16 chunk sections and their self-describing wire codec.
//!
//! A section keeps one fixed-width 16-bit cell per voxel plus a set of the
//! block states written since the last encode. That set is only a sizing
//! hint: [`ChunkSection::write`] rebuilds the real index table by scanning
//! every cell, so no stored code is ever dropped or substituted.
//!
//! ## Wire layout
//!
//! | Field | Encoding |
//! |-------|----------|
//! | bits per block | `u8` (1..=8 indexed, [`DIRECT_BITS`] direct) |
//! | palette length | varint (0 in direct mode) |
//! | palette entries | varint each |
//! | packed word count | varint |
//! | packed words | `u64` big-endian each |
//! | block light | 2048 bytes, low nibble first |
//! | sky light | 2048 bytes, only for sky-lit dimensions |
//!
//! Values are packed from bit 0 of each word upward. A value that does not
//! fit in the rest of a word keeps its low bits there and continues with its
//! high bits at the bottom of the next word.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{LazyLock, Mutex, PoisonError};

use bytes::{Buf, BufMut};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::block::{AIR, BlockState};
use crate::error::CodecError;
use crate::nibble::NibbleArray;
use crate::varint::{ensure_remaining, read_length, write_varint};

/// Side length of a section in voxels.
pub const SECTION_EDGE: usize = 16;

/// Number of voxels in a section (16³).
pub const SECTION_VOLUME: usize = SECTION_EDGE * SECTION_EDGE * SECTION_EDGE;

/// Bits per cell in direct mode, where raw codes are packed.
pub const DIRECT_BITS: u8 = 13;

/// Smallest bit width that switches the encoder to direct mode.
const DIRECT_THRESHOLD: u8 = 9;

/// Sky light of a freshly allocated section in a sky-lit dimension.
const FULL_SKY_LIGHT: u8 = 15;

/// 16-bit cells per backing word.
const CELLS_PER_WORD: usize = 4;

static_assertions::const_assert_eq!(SECTION_VOLUME % CELLS_PER_WORD, 0);

static EMPTY_SKY_LIT: LazyLock<Box<[u8]>> = LazyLock::new(|| empty_image(true));
static EMPTY_SKYLESS: LazyLock<Box<[u8]>> = LazyLock::new(|| empty_image(false));

/// Encoding of a freshly allocated section: palette `[air]`, one bit per
/// cell, dark block light, and full sky light when present.
fn empty_image(sky_light: bool) -> Box<[u8]> {
    let words = packed_word_count(1);
    let mut out = Vec::new();
    out.put_u8(1);
    write_varint(&mut out, 1);
    write_varint(&mut out, i32::from(AIR.0));
    write_varint(&mut out, words as i32);
    out.put_bytes(0, words * 8);
    out.put_bytes(0, SECTION_VOLUME / 2);
    if sky_light {
        out.put_bytes(FULL_SKY_LIGHT | (FULL_SKY_LIGHT << 4), SECTION_VOLUME / 2);
    }
    out.into_boxed_slice()
}

/// One 16×16×16 slab of block states with block light and optional sky light.
///
/// All mutators take `&self`; cells and light nibbles are updated with
/// compare-and-swap on their backing word and the palette hint sits behind
/// its own lock.
pub struct ChunkSection {
    cells: Box<[AtomicU64]>,
    palette: Mutex<FxHashSet<BlockState>>,
    block_light: NibbleArray,
    sky_light: Option<NibbleArray>,
}

impl ChunkSection {
    /// Creates an all-air section. Sky light starts at full brightness when
    /// `sky_light` is set; block light starts dark.
    pub fn new(sky_light: bool) -> Self {
        let mut palette = FxHashSet::default();
        palette.insert(AIR);
        Self {
            cells: (0..SECTION_VOLUME / CELLS_PER_WORD)
                .map(|_| AtomicU64::new(0))
                .collect(),
            palette: Mutex::new(palette),
            block_light: NibbleArray::new(SECTION_VOLUME),
            sky_light: sky_light.then(|| NibbleArray::filled(SECTION_VOLUME, FULL_SKY_LIGHT)),
        }
    }

    /// Wire bytes emitted in place of an unallocated slot. Identical to
    /// what [`write`](Self::write) produces for a new all-air section.
    pub fn empty_bytes(sky_light: bool) -> &'static [u8] {
        if sky_light { &**EMPTY_SKY_LIT } else { &**EMPTY_SKYLESS }
    }

    /// Converts section-local coordinates to a cell index (y outer, z, x inner).
    pub fn index(x: usize, y: usize, z: usize) -> usize {
        debug_assert!(x < SECTION_EDGE && y < SECTION_EDGE && z < SECTION_EDGE);
        (y << 8) | (z << 4) | x
    }

    /// Returns the state stored at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= SECTION_VOLUME`.
    pub fn get(&self, index: usize) -> BlockState {
        let word = self.cells[index / CELLS_PER_WORD].load(Ordering::Acquire);
        BlockState((word >> cell_shift(index)) as u16)
    }

    /// Records `state` in the palette and stores it at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= SECTION_VOLUME`.
    pub fn set(&self, index: usize, state: BlockState) {
        assert!(index < SECTION_VOLUME, "cell index {index} out of bounds");
        self.palette
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(state);

        let shift = cell_shift(index);
        let mask = 0xFFFFu64 << shift;
        let bits = u64::from(state.0) << shift;
        let word = &self.cells[index / CELLS_PER_WORD];
        let mut current = word.load(Ordering::Acquire);
        loop {
            let next = (current & !mask) | bits;
            match word.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    /// Number of distinct states recorded since the last encode (air included).
    pub fn palette_len(&self) -> usize {
        self.palette
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Block light nibbles.
    pub fn block_light(&self) -> &NibbleArray {
        &self.block_light
    }

    /// Sky light nibbles, absent for sky-less dimensions.
    pub fn sky_light(&self) -> Option<&NibbleArray> {
        self.sky_light.as_ref()
    }

    /// Returns `true` if this section carries sky light.
    pub fn has_sky_light(&self) -> bool {
        self.sky_light.is_some()
    }

    /// Returns `true` if every cell holds air.
    pub fn is_air(&self) -> bool {
        self.cells
            .iter()
            .all(|w| w.load(Ordering::Acquire) == 0)
    }

    /// Highest section-local y holding a non-air state in column `(x, z)`.
    pub fn highest_block(&self, x: usize, z: usize) -> Option<usize> {
        (0..SECTION_EDGE)
            .rev()
            .find(|&y| !self.get(Self::index(x, y, z)).is_air())
    }

    /// Encodes the section.
    ///
    /// Takes and clears the palette hint (reseeding it with air), sizes the
    /// bit width from the hint, rebuilds the index table from the cells, and
    /// emits the layout described in the module docs. Nothing is written to
    /// `out` if the encode fails.
    pub fn write(&self, out: &mut impl BufMut) -> Result<(), CodecError> {
        let hint = {
            let mut palette = self.palette.lock().unwrap_or_else(PoisonError::into_inner);
            let size = palette.len();
            palette.clear();
            palette.insert(AIR);
            size
        };

        let cells: Vec<BlockState> = (0..SECTION_VOLUME).map(|i| self.get(i)).collect();
        let mut bits = bits_for_palette_size(hint);

        let mut table = Vec::new();
        let mut values = Vec::with_capacity(SECTION_VOLUME);
        if bits < DIRECT_THRESHOLD {
            let mut lookup: FxHashMap<BlockState, usize> = FxHashMap::default();
            table.push(AIR);
            lookup.insert(AIR, 0);
            for &state in &cells {
                let index = *lookup.entry(state).or_insert_with(|| {
                    table.push(state);
                    table.len() - 1
                });
                values.push(index as u64);
            }

            let needed = bits_for_palette_size(table.len());
            if needed > bits {
                tracing::debug!(hint, table = table.len(), "palette hint undersized, widening");
                bits = needed;
            }
        }

        if bits >= DIRECT_THRESHOLD {
            bits = DIRECT_BITS;
            table.clear();
            values.clear();
            values.extend(cells.iter().map(|s| u64::from(s.0)));
        }

        let words = pack(&values, bits, table.is_empty())?;

        out.put_u8(bits);
        write_varint(out, table.len() as i32);
        for state in &table {
            write_varint(out, i32::from(state.0));
        }
        write_varint(out, words.len() as i32);
        for word in &words {
            out.put_u64(*word);
        }
        self.block_light.write(out);
        if let Some(sky) = &self.sky_light {
            sky.write(out);
        }
        Ok(())
    }

    /// Decodes a section written by [`write`](Self::write).
    ///
    /// `sky_light` must match the dimension the section was encoded for,
    /// since the payload does not say whether sky light follows.
    pub fn read(buf: &mut impl Buf, sky_light: bool) -> Result<Self, CodecError> {
        ensure_remaining(buf, 1)?;
        let bits = buf.get_u8();
        let direct = match bits {
            1..=8 => false,
            DIRECT_BITS => true,
            other => return Err(CodecError::InvalidBitsPerBlock(other)),
        };

        let palette_len = read_length(buf)?;
        if direct && palette_len != 0 {
            return Err(CodecError::UnexpectedPalette(palette_len));
        }
        let mut table = Vec::with_capacity(palette_len.min(256));
        for _ in 0..palette_len {
            let entry = read_length(buf)?;
            let code = u16::try_from(entry).map_err(|_| CodecError::BlockStateOutOfRange(entry))?;
            table.push(BlockState(code));
        }

        let expected = packed_word_count(bits);
        let word_count = read_length(buf)?;
        if word_count != expected {
            return Err(CodecError::WordCountMismatch {
                expected,
                actual: word_count,
            });
        }
        ensure_remaining(buf, word_count * 8)?;
        let words: Vec<u64> = (0..word_count).map(|_| buf.get_u64()).collect();

        let section = Self {
            cells: (0..SECTION_VOLUME / CELLS_PER_WORD)
                .map(|_| AtomicU64::new(0))
                .collect(),
            palette: Mutex::new(FxHashSet::default()),
            block_light: NibbleArray::read(buf, SECTION_VOLUME)?,
            sky_light: if sky_light {
                Some(NibbleArray::read(buf, SECTION_VOLUME)?)
            } else {
                None
            },
        };

        {
            let mut palette = section.palette.lock().unwrap_or_else(PoisonError::into_inner);
            palette.insert(AIR);
        }
        for (index, value) in unpack(&words, bits).enumerate() {
            let state = if direct {
                BlockState(value as u16)
            } else {
                *table
                    .get(value as usize)
                    .ok_or(CodecError::PaletteIndexOutOfRange {
                        index: value as usize,
                        len: table.len(),
                    })?
            };
            section.set(index, state);
        }
        Ok(section)
    }
}

impl Clone for ChunkSection {
    fn clone(&self) -> Self {
        Self {
            cells: self
                .cells
                .iter()
                .map(|w| AtomicU64::new(w.load(Ordering::Acquire)))
                .collect(),
            palette: Mutex::new(
                self.palette
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone(),
            ),
            block_light: self.block_light.clone(),
            sky_light: self.sky_light.clone(),
        }
    }
}

impl fmt::Debug for ChunkSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkSection")
            .field("palette_len", &self.palette_len())
            .field("sky_light", &self.has_sky_light())
            .finish()
    }
}

/// Bit width for a palette of `size` entries: the position of its highest set bit.
///
/// Widths of [`DIRECT_THRESHOLD`] (9) or more select direct mode.
pub fn bits_for_palette_size(size: usize) -> u8 {
    (usize::BITS - size.leading_zeros()) as u8
}

fn cell_shift(index: usize) -> u32 {
    ((index % CELLS_PER_WORD) * 16) as u32
}

fn packed_word_count(bits: u8) -> usize {
    (SECTION_VOLUME * bits as usize).div_ceil(64)
}

/// Packs `values` at `bits` each, splitting values that straddle a word.
///
/// Indexed values wider than `bits` are a broken palette and abort the pack;
/// direct values are masked to `bits`.
fn pack(values: &[u64], bits: u8, direct: bool) -> Result<Vec<u64>, CodecError> {
    let width = bits as usize;
    let mask = (1u64 << bits) - 1;
    let mut words = vec![0u64; packed_word_count(bits)];
    for (i, &value) in values.iter().enumerate() {
        if !direct && value > mask {
            return Err(CodecError::IndexOverflow {
                index: value as usize,
                bits,
            });
        }
        let value = value & mask;
        let bit = i * width;
        let word = bit / 64;
        let offset = bit % 64;
        words[word] |= value << offset;
        if offset + width > 64 {
            words[word + 1] |= value >> (64 - offset);
        }
    }
    Ok(words)
}

/// Mirror of [`pack`]: yields one value per cell.
fn unpack(words: &[u64], bits: u8) -> impl Iterator<Item = u64> + '_ {
    let width = bits as usize;
    let mask = (1u64 << bits) - 1;
    (0..SECTION_VOLUME).map(move |i| {
        let bit = i * width;
        let word = bit / 64;
        let offset = bit % 64;
        let mut value = words[word] >> offset;
        if offset + width > 64 {
            value |= words[word + 1] << (64 - offset);
        }
        value & mask
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
