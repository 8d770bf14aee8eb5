//! World server glue: ties the chunk map, region storage, and a worker pool
//! together behind [`World`], plus a flat terrain generator for the `loam`
//! binary.

pub mod codec;
pub mod error;
pub mod flat;
pub mod pool;
pub mod world;

pub use codec::{ColumnCodec, SnapshotCodec};
pub use error::WorldError;
pub use flat::FlatGenerator;
pub use pool::WorkerPool;
pub use world::World;
