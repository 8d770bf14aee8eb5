//! Sector-allocated region files holding the payloads of 32×32 chunk columns.
//!
//! ## File layout
//!
//! | Sector | Contents |
//! |--------|----------|
//! | 0 | 1024 big-endian `u32` offset entries, `(start_sector << 8) \| sector_count` |
//! | 1 | 1024 big-endian `u32` timestamps (seconds since the Unix epoch) |
//! | 2.. | payloads, each padded with zeros to whole sectors |
//!
//! Entry `i` belongs to region-local chunk `(i % 32, i / 32)`. A payload
//! starts with a big-endian `u32` length covering the scheme byte and the
//! compressed bytes, then the scheme byte, then the compressed bytes.
//!
//! The allocator keeps an in-memory used/free map of every sector, rebuilt
//! from the offset table on open. Rewrites of the same sector count stay in
//! place; otherwise the old range is released and the first free run that
//! fits is taken. With no fitting run the file grows, reusing any free run
//! already at its end.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::compression::{CompressionScheme, compress, decompress};
use crate::error::RegionError;

/// Size of one allocation unit.
pub const SECTOR_BYTES: usize = 4096;

/// Chunks per region side.
pub const REGION_EDGE: i32 = 32;

/// Largest sector count one offset entry can address.
pub const MAX_CHUNK_SECTORS: usize = 255;

const ENTRY_COUNT: usize = (REGION_EDGE * REGION_EDGE) as usize;
const HEADER_SECTORS: usize = 2;

/// Length prefix plus scheme byte.
const PAYLOAD_HEADER: usize = 5;

struct RegionInner {
    file: File,
    offsets: Vec<u32>,
    timestamps: Vec<u32>,
    used: Vec<bool>,
    closed: bool,
}

impl RegionInner {
    fn mark(&mut self, start: usize, count: usize, used: bool) {
        self.used[start..start + count].fill(used);
    }

    /// Claims `count` sectors: the first free run that fits, else the free
    /// run at the end of the file extended by the shortfall.
    fn allocate(&mut self, count: usize) -> io::Result<usize> {
        let mut run_start = HEADER_SECTORS;
        let mut run_len = 0;
        for sector in HEADER_SECTORS..self.used.len() {
            if self.used[sector] {
                run_start = sector + 1;
                run_len = 0;
                continue;
            }
            run_len += 1;
            if run_len == count {
                self.mark(run_start, count, true);
                return Ok(run_start);
            }
        }

        let total = self.used.len();
        let start = total - run_len;
        let grown = start + count;
        self.file.set_len((grown * SECTOR_BYTES) as u64)?;
        self.used.resize(grown, false);
        self.mark(start, count, true);
        Ok(start)
    }

    fn write_sectors(&mut self, start: usize, payload: &[u8]) -> io::Result<()> {
        self.file
            .seek(SeekFrom::Start((start * SECTOR_BYTES) as u64))?;
        self.file.write_all(payload)
    }

    fn set_entry(&mut self, index: usize, entry: u32, timestamp: u32) -> io::Result<()> {
        self.offsets[index] = entry;
        self.timestamps[index] = timestamp;
        self.file.seek(SeekFrom::Start((index * 4) as u64))?;
        self.file.write_u32::<BigEndian>(entry)?;
        self.file
            .seek(SeekFrom::Start((SECTOR_BYTES + index * 4) as u64))?;
        self.file.write_u32::<BigEndian>(timestamp)
    }
}

/// One open region file. All I/O on an instance is serialized by its lock.
///
/// Once [`close`](Self::close)d, every I/O operation on the instance fails
/// with [`RegionError::Closed`], so a handle evicted from the cache can never
/// write alongside the instance that replaces it.
pub struct RegionFile {
    path: PathBuf,
    compression_level: u32,
    inner: Mutex<RegionInner>,
}

impl RegionFile {
    /// Opens or creates the region file at `path`.
    ///
    /// New and short files are zero-extended to whole sectors with a full
    /// header. Offset entries pointing outside the file, or into sectors
    /// already claimed by another entry, are dropped with a warning.
    pub fn open(path: impl AsRef<Path>, compression_level: u32) -> Result<Self, RegionError> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let len = file.metadata()?.len();
        let padded = len
            .next_multiple_of(SECTOR_BYTES as u64)
            .max((HEADER_SECTORS * SECTOR_BYTES) as u64);
        if padded != len {
            file.set_len(padded)?;
        }

        file.seek(SeekFrom::Start(0))?;
        let mut offsets = vec![0u32; ENTRY_COUNT];
        file.read_u32_into::<BigEndian>(&mut offsets)?;
        let mut timestamps = vec![0u32; ENTRY_COUNT];
        file.read_u32_into::<BigEndian>(&mut timestamps)?;

        let sector_count = (padded / SECTOR_BYTES as u64) as usize;
        let mut used = vec![false; sector_count];
        used[..HEADER_SECTORS].fill(true);
        for (index, entry) in offsets.iter_mut().enumerate() {
            if *entry == 0 {
                continue;
            }
            let (start, count) = split_entry(*entry);
            let in_file = count > 0 && start >= HEADER_SECTORS && start + count <= sector_count;
            if !in_file || used[start..start + count].contains(&true) {
                tracing::warn!(
                    path = %path.display(),
                    index,
                    start,
                    count,
                    "dropping invalid region offset entry"
                );
                *entry = 0;
                continue;
            }
            used[start..start + count].fill(true);
        }

        tracing::debug!(
            path = %path.display(),
            sectors = sector_count,
            chunks = offsets.iter().filter(|&&e| e != 0).count(),
            "opened region file"
        );
        Ok(Self {
            path,
            compression_level,
            inner: Mutex::new(RegionInner {
                file,
                offsets,
                timestamps,
                used,
                closed: false,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, RegionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Locks the file for I/O, failing if it has been closed.
    fn lock_open(&self) -> Result<MutexGuard<'_, RegionInner>, RegionError> {
        let inner = self.lock();
        if inner.closed {
            return Err(RegionError::Closed(self.path.clone()));
        }
        Ok(inner)
    }

    /// Path this file was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads and decompresses the payload of chunk `(x, z)`.
    ///
    /// Coordinates are reduced to the region with `& 31`. Missing entries,
    /// entries outside the file, and payloads whose declared length exceeds
    /// their sectors all read as `None`.
    pub fn read(&self, x: i32, z: i32) -> Result<Option<Vec<u8>>, RegionError> {
        let index = entry_index(x, z);
        let payload = {
            let mut inner = self.lock_open()?;
            let entry = inner.offsets[index];
            if entry == 0 {
                return Ok(None);
            }
            let (start, count) = split_entry(entry);
            if start + count > inner.used.len() {
                tracing::warn!(path = %self.path.display(), x, z, start, count, "chunk entry outside region file");
                return Ok(None);
            }

            inner
                .file
                .seek(SeekFrom::Start((start * SECTOR_BYTES) as u64))?;
            let length = inner.file.read_u32::<BigEndian>()? as usize;
            if length == 0 || length + 4 > count * SECTOR_BYTES {
                tracing::warn!(path = %self.path.display(), x, z, length, count, "chunk payload length exceeds its sectors");
                return Ok(None);
            }
            let mut payload = vec![0u8; length];
            inner.file.read_exact(&mut payload)?;
            payload
        };

        let scheme = CompressionScheme::from_version(payload[0])?;
        Ok(Some(decompress(&payload[1..], scheme)?))
    }

    /// Compresses `data` and stores it as chunk `(x, z)`, updating the offset
    /// entry and timestamp.
    ///
    /// Payloads needing more than [`MAX_CHUNK_SECTORS`] sectors are rejected
    /// with [`RegionError::PayloadTooLarge`] and leave the entry untouched.
    pub fn write(&self, x: i32, z: i32, data: &[u8]) -> Result<(), RegionError> {
        let compressed = compress(data, CompressionScheme::WRITER, self.compression_level)?;
        let sectors = (compressed.len() + PAYLOAD_HEADER).div_ceil(SECTOR_BYTES);
        if sectors > MAX_CHUNK_SECTORS {
            return Err(RegionError::PayloadTooLarge {
                len: compressed.len(),
                sectors,
            });
        }

        let mut payload = Vec::with_capacity(sectors * SECTOR_BYTES);
        payload.write_u32::<BigEndian>((compressed.len() + 1) as u32)?;
        payload.push(CompressionScheme::WRITER.version());
        payload.extend_from_slice(&compressed);
        payload.resize(sectors * SECTOR_BYTES, 0);

        let index = entry_index(x, z);
        let mut inner = self.lock_open()?;
        let old = inner.offsets[index];
        let (old_start, old_count) = split_entry(old);
        let in_place = old != 0 && old_count == sectors;

        let start = if in_place {
            old_start
        } else {
            if old != 0 {
                inner.mark(old_start, old_count, false);
            }
            match inner.allocate(sectors) {
                Ok(start) => start,
                Err(err) => {
                    if old != 0 {
                        inner.mark(old_start, old_count, true);
                    }
                    return Err(err.into());
                }
            }
        };

        if let Err(err) = inner.write_sectors(start, &payload) {
            if !in_place {
                inner.mark(start, sectors, false);
                if old != 0 {
                    inner.mark(old_start, old_count, true);
                }
            }
            return Err(err.into());
        }
        inner.set_entry(index, pack_entry(start, sectors), now())?;

        tracing::trace!(
            path = %self.path.display(),
            x,
            z,
            start,
            sectors,
            in_place,
            "wrote chunk payload"
        );
        Ok(())
    }

    /// Clears the entry for chunk `(x, z)` and frees its sectors. Returns
    /// `false` if there was nothing stored.
    pub fn remove(&self, x: i32, z: i32) -> Result<bool, RegionError> {
        let index = entry_index(x, z);
        let mut inner = self.lock_open()?;
        let entry = inner.offsets[index];
        if entry == 0 {
            return Ok(false);
        }
        let (start, count) = split_entry(entry);
        inner.mark(start, count, false);
        inner.set_entry(index, 0, 0)?;
        Ok(true)
    }

    /// Returns `true` if chunk `(x, z)` has a stored payload.
    pub fn contains(&self, x: i32, z: i32) -> bool {
        self.lock().offsets[entry_index(x, z)] != 0
    }

    /// Sector range `(start, count)` held by chunk `(x, z)`.
    pub fn allocation(&self, x: i32, z: i32) -> Option<(usize, usize)> {
        match self.lock().offsets[entry_index(x, z)] {
            0 => None,
            entry => Some(split_entry(entry)),
        }
    }

    /// Last write time of chunk `(x, z)` in seconds since the Unix epoch.
    pub fn timestamp(&self, x: i32, z: i32) -> Option<u32> {
        let inner = self.lock();
        let index = entry_index(x, z);
        (inner.offsets[index] != 0).then(|| inner.timestamps[index])
    }

    /// Number of sectors in the file, headers included.
    pub fn sector_count(&self) -> usize {
        self.lock().used.len()
    }

    /// Flushes file contents and metadata to disk.
    pub fn sync(&self) -> Result<(), RegionError> {
        self.lock_open()?.file.sync_all()?;
        Ok(())
    }

    /// Syncs the file and retires this handle. Closing twice is a no-op.
    pub fn close(&self) -> Result<(), RegionError> {
        let mut inner = self.lock();
        if inner.closed {
            return Ok(());
        }
        inner.file.sync_all()?;
        inner.closed = true;
        tracing::debug!(path = %self.path.display(), "closed region file");
        Ok(())
    }

    /// Returns `true` once [`close`](Self::close) has succeeded.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

impl std::fmt::Debug for RegionFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegionFile")
            .field("path", &self.path)
            .field("sectors", &self.sector_count())
            .finish()
    }
}

fn entry_index(x: i32, z: i32) -> usize {
    ((x & (REGION_EDGE - 1)) + (z & (REGION_EDGE - 1)) * REGION_EDGE) as usize
}

fn split_entry(entry: u32) -> (usize, usize) {
    ((entry >> 8) as usize, (entry & 0xFF) as usize)
}

fn pack_entry(start: usize, count: usize) -> u32 {
    ((start as u32) << 8) | count as u32
}

fn now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs() as u32)
}
