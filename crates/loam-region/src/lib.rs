//! On-disk world storage: sector-allocated region files holding compressed
//! chunk payloads, and the process-wide cache that keeps one open handle per
//! region path.

pub mod compression;
pub mod error;
pub mod region_cache;
pub mod region_file;

pub use compression::{CompressionScheme, compress, decompress};
pub use error::RegionError;
pub use region_cache::{RegionCache, region_coords, region_path};
pub use region_file::{MAX_CHUNK_SECTORS, REGION_EDGE, RegionFile, SECTOR_BYTES};
