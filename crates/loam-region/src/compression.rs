//! Payload compression for region file entries.
//!
//! Every stored payload carries a one-byte scheme id. Writers always use
//! zlib; gzip and uncompressed payloads are accepted on read.

use std::io::{self, Read, Write};

use flate2::Compression;
use flate2::read::{GzDecoder, ZlibDecoder};
use flate2::write::{GzEncoder, ZlibEncoder};

use crate::error::RegionError;

/// Compression scheme of a stored payload, identified by its version byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompressionScheme {
    /// Legacy gzip streams.
    Gzip,
    /// Zlib (deflate) streams. Used for every write.
    Zlib,
    /// Raw bytes.
    Uncompressed,
}

impl CompressionScheme {
    /// Scheme used by region writers.
    pub const WRITER: Self = Self::Zlib;

    /// Parses a payload version byte.
    pub fn from_version(version: u8) -> Result<Self, RegionError> {
        match version {
            1 => Ok(Self::Gzip),
            2 => Ok(Self::Zlib),
            3 => Ok(Self::Uncompressed),
            other => Err(RegionError::UnknownCompression(other)),
        }
    }

    /// The version byte stored ahead of the payload.
    pub fn version(self) -> u8 {
        match self {
            Self::Gzip => 1,
            Self::Zlib => 2,
            Self::Uncompressed => 3,
        }
    }
}

/// Compresses `data` with `scheme` at `level` (0-9, clamped).
pub fn compress(data: &[u8], scheme: CompressionScheme, level: u32) -> io::Result<Vec<u8>> {
    let level = Compression::new(level.min(9));
    match scheme {
        CompressionScheme::Gzip => {
            let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), level);
            encoder.write_all(data)?;
            encoder.finish()
        }
        CompressionScheme::Zlib => {
            let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 2), level);
            encoder.write_all(data)?;
            encoder.finish()
        }
        CompressionScheme::Uncompressed => Ok(data.to_vec()),
    }
}

/// Inflates `data` stored with `scheme`.
pub fn decompress(data: &[u8], scheme: CompressionScheme) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    match scheme {
        CompressionScheme::Gzip => {
            GzDecoder::new(data).read_to_end(&mut out)?;
        }
        CompressionScheme::Zlib => {
            ZlibDecoder::new(data).read_to_end(&mut out)?;
        }
        CompressionScheme::Uncompressed => out.extend_from_slice(data),
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<u8> {
        (0..10_000u32).map(|i| (i % 7) as u8).collect()
    }

    #[test]
    fn test_version_bytes() {
        for scheme in [
            CompressionScheme::Gzip,
            CompressionScheme::Zlib,
            CompressionScheme::Uncompressed,
        ] {
            assert_eq!(
                CompressionScheme::from_version(scheme.version()).unwrap(),
                scheme
            );
        }
        assert_eq!(CompressionScheme::WRITER.version(), 2);
        assert!(matches!(
            CompressionScheme::from_version(9),
            Err(RegionError::UnknownCompression(9))
        ));
    }

    #[test]
    fn test_zlib_shrinks_repetitive_data() {
        let data = sample();
        let packed = compress(&data, CompressionScheme::Zlib, 6).unwrap();
        assert!(packed.len() < data.len() / 10);
        assert_eq!(decompress(&packed, CompressionScheme::Zlib).unwrap(), data);
    }

    #[test]
    fn test_gzip_and_uncompressed() {
        let data = sample();
        let gz = compress(&data, CompressionScheme::Gzip, 9).unwrap();
        assert_eq!(&gz[..2], &[0x1F, 0x8B]);
        assert_eq!(decompress(&gz, CompressionScheme::Gzip).unwrap(), data);

        let raw = compress(&data, CompressionScheme::Uncompressed, 0).unwrap();
        assert_eq!(raw, data);
    }

    #[test]
    fn test_garbage_is_an_error() {
        assert!(decompress(&[1, 2, 3, 4], CompressionScheme::Zlib).is_err());
    }
}
