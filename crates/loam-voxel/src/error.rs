//! Error types for the section/column codec and the readiness gate.

use std::time::Duration;

/// Errors raised while encoding or decoding section and column payloads.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The input ended before a complete value was read.
    #[error("unexpected end of input: needed {needed} more bytes")]
    UnexpectedEof {
        /// Bytes still required when the input ran out.
        needed: usize,
    },
    /// A variable-length integer ran past five bytes.
    #[error("varint is longer than 5 bytes")]
    VarIntTooLong,
    /// The bits-per-block byte is neither an indexed width (1..=8) nor the direct width.
    #[error("invalid bits per block: {0}")]
    InvalidBitsPerBlock(u8),
    /// A packed value points past the end of the section palette.
    #[error("palette index {index} out of range (palette length {len})")]
    PaletteIndexOutOfRange {
        /// The decoded index.
        index: usize,
        /// Length of the palette table.
        len: usize,
    },
    /// A cell's palette index does not fit the chosen bit width.
    ///
    /// Raised on encode; the section is not emitted.
    #[error("palette index {index} does not fit in {bits} bits")]
    IndexOverflow {
        /// The index that overflowed.
        index: usize,
        /// The bit width selected for the section.
        bits: u8,
    },
    /// The packed word count disagrees with the bit width.
    #[error("packed word count mismatch: expected {expected}, got {actual}")]
    WordCountMismatch {
        /// Words implied by the bit width.
        expected: usize,
        /// Words declared in the payload.
        actual: usize,
    },
    /// A length prefix was negative.
    #[error("negative length prefix: {0}")]
    NegativeLength(i32),
    /// The column section mask names slots above the top of the column.
    #[error("section mask {0:#x} exceeds 16 sections")]
    InvalidSectionMask(i32),
    /// Section data was longer than the sections the mask announced.
    #[error("{0} trailing bytes after column section data")]
    TrailingBytes(usize),
    /// A palette entry does not fit a 16-bit block state.
    #[error("palette entry {0} exceeds the block state range")]
    BlockStateOutOfRange(usize),
    /// A direct-mode section carried palette entries.
    #[error("direct-mode section declares a palette of {0} entries")]
    UnexpectedPalette(usize),
}

/// Errors raised while waiting on a chunk column's readiness gate.
#[derive(Debug, thiserror::Error)]
pub enum WaitError {
    /// The gate did not open within the allotted time.
    #[error("chunk column not ready after {0:?}")]
    Timeout(Duration),
}
