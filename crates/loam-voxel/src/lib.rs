//! In-memory voxel world storage: nibble light arrays, palette-encoded chunk
//! sections, generated chunk columns, and the concurrent per-world chunk map.

pub mod block;
pub mod chunk_map;
pub mod column;
pub mod error;
pub mod gate;
pub mod generation;
pub mod nibble;
pub mod section;
pub mod varint;

pub use block::{AIR, BlockState};
pub use chunk_map::{ChunkMap, chunk_key};
pub use column::{COLUMN_AREA, COLUMN_HEIGHT, ChunkColumn, SECTIONS_PER_COLUMN};
pub use error::{CodecError, WaitError};
pub use gate::ReadyGate;
pub use generation::{
    Executor, GenerationContext, GenerationPhase, GenerationStage, InlineExecutor, Job,
    PhaseScope, WorldGenerator,
};
pub use nibble::NibbleArray;
pub use section::{ChunkSection, DIRECT_BITS, SECTION_EDGE, SECTION_VOLUME, bits_for_palette_size};
