//! Errors raised by region files and the region cache.

/// Errors from opening, reading or writing a region file.
#[derive(Debug, thiserror::Error)]
pub enum RegionError {
    /// Underlying file I/O or (de)compression failed.
    #[error("region I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The compressed payload needs more sectors than one entry can address.
    /// The offset table is left unchanged.
    #[error("payload of {len} bytes needs {sectors} sectors, more than a chunk entry can hold")]
    PayloadTooLarge {
        /// Compressed payload length in bytes.
        len: usize,
        /// Sectors the payload would occupy.
        sectors: usize,
    },
    /// A stored payload names a compression scheme this build does not know.
    #[error("unknown compression scheme {0}")]
    UnknownCompression(u8),
    /// The handle was closed; reopen the file through the region cache.
    #[error("region file {} is closed", .0.display())]
    Closed(std::path::PathBuf),
}
