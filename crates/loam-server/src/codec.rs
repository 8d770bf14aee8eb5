//! Persistence format for chunk columns stored in region files.
//!
//! The region layer treats payloads as opaque bytes; a [`ColumnCodec`]
//! decides what those bytes are. [`SnapshotCodec`] stores:
//!
//! | Field | Encoding |
//! |-------|----------|
//! | magic | `b"LOAM"` |
//! | version | `u8`, currently 1 |
//! | flags | `u8`, bit 0 set when the column carries sky light |
//! | chunk x, chunk z | `i32` big-endian each |
//! | column | continuous wire encoding (sections, biomes, block entities) |

use bytes::{Buf, BufMut};
use loam_voxel::ChunkColumn;

use crate::error::WorldError;

/// Converts columns to and from region payloads.
pub trait ColumnCodec: Send + Sync {
    /// Serializes a ready column.
    fn encode(&self, column: &ChunkColumn) -> Result<Vec<u8>, WorldError>;

    /// Rebuilds the column at `(x, z)` from a stored payload.
    fn decode(&self, x: i32, z: i32, payload: &[u8]) -> Result<ChunkColumn, WorldError>;
}

const MAGIC: &[u8; 4] = b"LOAM";
const VERSION: u8 = 1;
const FLAG_SKY_LIGHT: u8 = 0x01;
const HEADER_LEN: usize = MAGIC.len() + 2 + 8;

/// Default codec: a small versioned header followed by the column's own wire
/// encoding.
#[derive(Clone, Copy, Debug, Default)]
pub struct SnapshotCodec;

impl ColumnCodec for SnapshotCodec {
    fn encode(&self, column: &ChunkColumn) -> Result<Vec<u8>, WorldError> {
        let mut out = Vec::with_capacity(HEADER_LEN + 4096);
        out.put_slice(MAGIC);
        out.put_u8(VERSION);
        out.put_u8(if column.has_sky_light() { FLAG_SKY_LIGHT } else { 0 });
        out.put_i32(column.x());
        out.put_i32(column.z());
        column.write(&mut out, true)?;
        Ok(out)
    }

    fn decode(&self, x: i32, z: i32, payload: &[u8]) -> Result<ChunkColumn, WorldError> {
        if payload.len() < HEADER_LEN {
            return Err(WorldError::CorruptSnapshot(format!(
                "{} bytes is shorter than the header",
                payload.len()
            )));
        }
        let mut buf = payload;
        if &buf[..MAGIC.len()] != MAGIC {
            return Err(WorldError::CorruptSnapshot("bad magic".to_string()));
        }
        buf.advance(MAGIC.len());

        let version = buf.get_u8();
        if version != VERSION {
            return Err(WorldError::UnsupportedSnapshotVersion(version));
        }
        let sky_light = buf.get_u8() & FLAG_SKY_LIGHT != 0;
        let (stored_x, stored_z) = (buf.get_i32(), buf.get_i32());
        if (stored_x, stored_z) != (x, z) {
            return Err(WorldError::CorruptSnapshot(format!(
                "stored column ({stored_x}, {stored_z}) found at ({x}, {z})"
            )));
        }

        let column = ChunkColumn::read(x, z, sky_light, &mut buf, true)?;
        if buf.has_remaining() {
            tracing::warn!(x, z, trailing = buf.remaining(), "trailing bytes after column snapshot");
        }
        Ok(column)
    }
}
