//! Chunk columns: sixteen stacked sections, a height map, and biomes.
//!
//! A column is created empty and not ready. [`ChunkColumn::generate`] runs
//! the world generator's phases on an executor and opens the column's
//! readiness gate once the generated content has been installed. Columns
//! decoded from bytes are ready immediately.
//!
//! Section slots start unallocated and are installed at most once; a
//! concurrent writer that loses the install race uses the winner's section.
//!
//! ## Wire layout
//!
//! | Field | Encoding |
//! |-------|----------|
//! | section mask | varint, bit `i` set for every emitted slot |
//! | data length | varint |
//! | section data | each emitted section, bottom to top |
//! | biomes | 256 bytes, `z * 16 + x` order, continuous only |
//! | block entities | varint count (always 0), continuous only |
//!
//! Every slot from 0 up to the highest allocated one is emitted; unallocated
//! slots below the top are sent as empty sections.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU16, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use bytes::{Buf, BufMut, BytesMut};

use crate::block::{AIR, BlockState};
use crate::error::{CodecError, WaitError};
use crate::gate::ReadyGate;
use crate::generation::{Executor, GenerationContext, WorldGenerator, run_pipeline};
use crate::section::{ChunkSection, SECTION_EDGE};
use crate::varint::{ensure_remaining, read_length, read_varint, write_varint};

/// Number of section slots in a column.
pub const SECTIONS_PER_COLUMN: usize = 16;

/// Number of `(x, z)` positions in a column.
pub const COLUMN_AREA: usize = SECTION_EDGE * SECTION_EDGE;

/// Height of a column in voxels.
pub const COLUMN_HEIGHT: usize = SECTION_EDGE * SECTIONS_PER_COLUMN;

/// Section slots, height map and biomes shared by columns and generation
/// contexts.
///
/// Heights hold `y + 1` of the highest non-air block, with 0 meaning the
/// column position is empty.
pub(crate) struct ColumnStorage {
    sky_light: bool,
    sections: [OnceLock<Arc<ChunkSection>>; SECTIONS_PER_COLUMN],
    heights: [AtomicU16; COLUMN_AREA],
    biomes: [AtomicU8; COLUMN_AREA],
}

impl ColumnStorage {
    pub(crate) fn new(sky_light: bool) -> Self {
        Self {
            sky_light,
            sections: std::array::from_fn(|_| OnceLock::new()),
            heights: std::array::from_fn(|_| AtomicU16::new(0)),
            biomes: std::array::from_fn(|_| AtomicU8::new(0)),
        }
    }

    pub(crate) fn has_sky_light(&self) -> bool {
        self.sky_light
    }

    pub(crate) fn section(&self, slot: usize) -> Option<&Arc<ChunkSection>> {
        self.sections[slot].get()
    }

    fn section_or_insert(&self, slot: usize) -> &Arc<ChunkSection> {
        self.sections[slot].get_or_init(|| Arc::new(ChunkSection::new(self.sky_light)))
    }

    /// Out-of-range coordinates read as air.
    pub(crate) fn get(&self, x: usize, y: usize, z: usize) -> BlockState {
        if !in_bounds(x, y, z) {
            tracing::warn!(x, y, z, "block read outside chunk column");
            return AIR;
        }
        match self.section(y / SECTION_EDGE) {
            Some(section) => section.get(ChunkSection::index(x, y % SECTION_EDGE, z)),
            None => AIR,
        }
    }

    /// Out-of-range writes are ignored.
    pub(crate) fn set(&self, x: usize, y: usize, z: usize, state: BlockState) {
        if !in_bounds(x, y, z) {
            tracing::warn!(x, y, z, "block write outside chunk column ignored");
            return;
        }
        let section = self.section_or_insert(y / SECTION_EDGE);
        section.set(ChunkSection::index(x, y % SECTION_EDGE, z), state);

        let height = &self.heights[area_index(x, z)];
        let top = (y + 1) as u16;
        if !state.is_air() {
            height.fetch_max(top, Ordering::AcqRel);
        } else if height.load(Ordering::Acquire) == top {
            self.recompute_height(x, z);
        }
    }

    pub(crate) fn highest_block(&self, x: usize, z: usize) -> Option<usize> {
        if x >= SECTION_EDGE || z >= SECTION_EDGE {
            return None;
        }
        match self.heights[area_index(x, z)].load(Ordering::Acquire) {
            0 => None,
            top => Some(usize::from(top) - 1),
        }
    }

    fn recompute_height(&self, x: usize, z: usize) {
        let top = (0..SECTIONS_PER_COLUMN)
            .rev()
            .find_map(|slot| {
                let local = self.section(slot)?.highest_block(x, z)?;
                Some(slot * SECTION_EDGE + local + 1)
            })
            .unwrap_or(0);
        self.heights[area_index(x, z)].store(top as u16, Ordering::Release);
    }

    /// Biome lookups wrap to the column like the column accessors do.
    pub(crate) fn biome(&self, x: usize, z: usize) -> u8 {
        self.biomes[area_index(x % SECTION_EDGE, z % SECTION_EDGE)].load(Ordering::Acquire)
    }

    pub(crate) fn set_biome(&self, x: usize, z: usize, biome: u8) {
        self.biomes[area_index(x % SECTION_EDGE, z % SECTION_EDGE)].store(biome, Ordering::Release);
    }

    /// Installs `other`'s sections into this storage's empty slots and copies
    /// its height map and biomes.
    fn adopt(&self, other: &ColumnStorage) {
        for (slot, section) in other.sections.iter().enumerate() {
            if let Some(section) = section.get()
                && self.sections[slot].set(Arc::clone(section)).is_err()
            {
                tracing::warn!(slot, "section slot populated before generation finished");
            }
        }
        for (dst, src) in self.heights.iter().zip(&other.heights) {
            dst.store(src.load(Ordering::Acquire), Ordering::Release);
        }
        for (dst, src) in self.biomes.iter().zip(&other.biomes) {
            dst.store(src.load(Ordering::Acquire), Ordering::Release);
        }
    }
}

fn area_index(x: usize, z: usize) -> usize {
    z * SECTION_EDGE + x
}

fn in_bounds(x: usize, y: usize, z: usize) -> bool {
    x < SECTION_EDGE && y < COLUMN_HEIGHT && z < SECTION_EDGE
}

/// A 16×256×16 column of the world.
pub struct ChunkColumn {
    x: i32,
    z: i32,
    storage: ColumnStorage,
    generation_started: AtomicBool,
    ready: ReadyGate,
}

impl ChunkColumn {
    /// Creates an empty column at chunk coordinates `(x, z)` that is not yet ready.
    pub fn new(x: i32, z: i32, sky_light: bool) -> Self {
        Self {
            x,
            z,
            storage: ColumnStorage::new(sky_light),
            generation_started: AtomicBool::new(false),
            ready: ReadyGate::new(),
        }
    }

    fn new_ready(x: i32, z: i32, sky_light: bool) -> Self {
        Self {
            x,
            z,
            storage: ColumnStorage::new(sky_light),
            generation_started: AtomicBool::new(true),
            ready: ReadyGate::opened(),
        }
    }

    /// Chunk X coordinate.
    pub fn x(&self) -> i32 {
        self.x
    }

    /// Chunk Z coordinate.
    pub fn z(&self) -> i32 {
        self.z
    }

    /// Whether sections of this column carry sky light.
    pub fn has_sky_light(&self) -> bool {
        self.storage.has_sky_light()
    }

    /// Starts generation on `executor`. Only the first call has any effect;
    /// it returns `true`.
    ///
    /// Phases run in order on the executor. When the last one finishes the
    /// generated sections, heights and biomes are installed and the column
    /// becomes ready.
    pub fn generate(
        self: &Arc<Self>,
        generator: &dyn WorldGenerator,
        executor: Arc<dyn Executor>,
    ) -> bool {
        if self.generation_started.swap(true, Ordering::AcqRel) {
            return false;
        }
        tracing::debug!(x = self.x, z = self.z, "generating chunk column");

        let context = Arc::new(GenerationContext::new(
            self.x,
            self.z,
            generator.seed(),
            self.has_sky_light(),
        ));
        let column = Arc::clone(self);
        let generated = Arc::clone(&context);
        run_pipeline(
            context,
            generator,
            executor,
            Box::new(move || {
                column.storage.adopt(&generated.storage);
                column.ready.open();
                tracing::debug!(x = column.x, z = column.z, "chunk column ready");
            }),
        );
        true
    }

    /// Returns `true` once generation has finished or the column was decoded.
    pub fn is_ready(&self) -> bool {
        self.ready.is_open()
    }

    /// Blocks until the column is ready.
    pub fn wait_ready(&self) -> &Self {
        self.ready.wait();
        self
    }

    /// Blocks until the column is ready or `timeout` elapses.
    pub fn wait_ready_timeout(&self, timeout: Duration) -> Result<&Self, WaitError> {
        self.ready.wait_timeout(timeout)?;
        Ok(self)
    }

    /// Returns the state at column-local `(x, y, z)`. Unallocated slots read
    /// as air, and so do out-of-range coordinates.
    pub fn get(&self, x: usize, y: usize, z: usize) -> BlockState {
        self.storage.get(x, y, z)
    }

    /// Stores `state` at column-local `(x, y, z)`, allocating the section
    /// slot if needed. Out-of-range writes are ignored.
    pub fn set(&self, x: usize, y: usize, z: usize, state: BlockState) {
        self.storage.set(x, y, z, state);
    }

    /// Highest y holding a non-air block at `(x, z)`, or `None` if the
    /// position is empty.
    pub fn highest_block(&self, x: usize, z: usize) -> Option<usize> {
        self.storage.highest_block(x, z)
    }

    /// Biome id at `(x, z)`.
    pub fn biome(&self, x: usize, z: usize) -> u8 {
        self.storage.biome(x, z)
    }

    /// Sets the biome id at `(x, z)`.
    pub fn set_biome(&self, x: usize, z: usize, biome: u8) {
        self.storage.set_biome(x, z, biome);
    }

    /// The section in slot `slot`, if allocated.
    pub fn section(&self, slot: usize) -> Option<&ChunkSection> {
        if slot >= SECTIONS_PER_COLUMN {
            return None;
        }
        self.storage.section(slot).map(|s| &**s)
    }

    /// Number of allocated section slots.
    pub fn allocated_sections(&self) -> usize {
        (0..SECTIONS_PER_COLUMN)
            .filter(|&slot| self.storage.section(slot).is_some())
            .count()
    }

    /// Encodes the column. `continuous` appends biomes and the block entity
    /// count.
    ///
    /// Slots are snapshotted once up front; a section allocated while
    /// encoding is not included.
    ///
    /// Sections are encoded into a scratch buffer first. If any section
    /// fails, the error is returned and nothing is written to `out`, so the
    /// caller never sees a partial column.
    pub fn write(&self, out: &mut impl BufMut, continuous: bool) -> Result<(), CodecError> {
        let slots: [Option<Arc<ChunkSection>>; SECTIONS_PER_COLUMN] =
            std::array::from_fn(|slot| self.storage.section(slot).cloned());
        let emitted = slots.iter().rposition(Option::is_some).map_or(0, |top| top + 1);
        let mask = ((1u32 << emitted) - 1) as i32;

        let mut data = BytesMut::new();
        for slot in &slots[..emitted] {
            match slot {
                Some(section) => section.write(&mut data)?,
                None => data.put_slice(ChunkSection::empty_bytes(self.has_sky_light())),
            }
        }

        write_varint(out, mask);
        write_varint(out, data.len() as i32);
        out.put_slice(&data);
        if continuous {
            for biome in &self.storage.biomes {
                out.put_u8(biome.load(Ordering::Acquire));
            }
            write_varint(out, 0);
        }
        Ok(())
    }

    /// Decodes a column written by [`write`](Self::write). The result is
    /// ready and its height map is rebuilt from the decoded sections.
    pub fn read(
        x: i32,
        z: i32,
        sky_light: bool,
        buf: &mut impl Buf,
        continuous: bool,
    ) -> Result<Self, CodecError> {
        let mask = read_varint(buf)?;
        if mask as u32 >> SECTIONS_PER_COLUMN != 0 {
            return Err(CodecError::InvalidSectionMask(mask));
        }
        let len = read_length(buf)?;
        ensure_remaining(buf, len)?;
        let mut data = buf.copy_to_bytes(len);

        let column = Self::new_ready(x, z, sky_light);
        for slot in 0..SECTIONS_PER_COLUMN {
            if (mask >> slot) & 1 != 0 {
                let section = ChunkSection::read(&mut data, sky_light)?;
                let _ = column.storage.sections[slot].set(Arc::new(section));
            }
        }
        if data.has_remaining() {
            return Err(CodecError::TrailingBytes(data.remaining()));
        }

        if continuous {
            ensure_remaining(buf, COLUMN_AREA)?;
            for biome in &column.storage.biomes {
                biome.store(buf.get_u8(), Ordering::Relaxed);
            }
            let block_entities = read_length(buf)?;
            if block_entities != 0 {
                tracing::debug!(block_entities, "ignoring block entities in column payload");
            }
        }

        for z in 0..SECTION_EDGE {
            for x in 0..SECTION_EDGE {
                column.storage.recompute_height(x, z);
            }
        }
        Ok(column)
    }
}

impl fmt::Debug for ChunkColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkColumn")
            .field("x", &self.x)
            .field("z", &self.z)
            .field("sky_light", &self.has_sky_light())
            .field("ready", &self.is_ready())
            .field("allocated_sections", &self.allocated_sections())
            .finish()
    }
}
