//! Errors surfaced by [`World`](crate::World) operations.

use loam_region::RegionError;
use loam_voxel::{CodecError, WaitError};

/// Failures while loading, generating, saving, or encoding columns.
#[derive(Debug, thiserror::Error)]
pub enum WorldError {
    /// Region file storage failed.
    #[error(transparent)]
    Region(#[from] RegionError),
    /// A column or section payload could not be encoded or decoded.
    #[error("column codec error: {0}")]
    Codec(#[from] CodecError),
    /// A column did not become ready in time.
    #[error(transparent)]
    Wait(#[from] WaitError),
    /// World directory I/O failed.
    #[error("world I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// A stored column snapshot is malformed.
    #[error("corrupt column snapshot: {0}")]
    CorruptSnapshot(String),
    /// A stored column snapshot uses a format version this build cannot read.
    #[error("unsupported column snapshot version {0}")]
    UnsupportedSnapshotVersion(u8),
    /// The registry declined to produce a column.
    #[error("column ({x}, {z}) is unavailable")]
    ColumnUnavailable {
        /// Chunk X coordinate.
        x: i32,
        /// Chunk Z coordinate.
        z: i32,
    },
}
