//! A world: the in-memory chunk map backed by region files on disk.
//!
//! [`World::column`] serves a column from memory, else from its region file,
//! else by generating it. Saving is explicit ([`World::save_column`],
//! [`World::save_all`]) or happens on [`World::unload`] when configured.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use loam_config::Config;
use loam_region::{RegionCache, RegionError, RegionFile, region_coords, region_path};
use loam_voxel::{ChunkColumn, ChunkMap, Executor, WorldGenerator};

use crate::codec::{ColumnCodec, SnapshotCodec};
use crate::error::WorldError;

/// One world directory and everything loaded from it.
pub struct World {
    directory: PathBuf,
    region_extension: String,
    chunks: ChunkMap,
    regions: Arc<RegionCache>,
    codec: Box<dyn ColumnCodec>,
    save_on_remove: bool,
}

impl World {
    /// Opens the world described by `config`, creating its directory if
    /// needed. Missing columns are generated by `generator` on `executor`.
    pub fn open(
        config: &Config,
        generator: Arc<dyn WorldGenerator>,
        executor: Arc<dyn Executor>,
    ) -> Result<Self, WorldError> {
        let directory = config.world.directory.clone();
        std::fs::create_dir_all(directory.join("region"))?;

        if generator.has_sky_light() != config.world.sky_light {
            tracing::warn!(
                configured = config.world.sky_light,
                generator = generator.has_sky_light(),
                "generator sky light differs from config; using the generator's"
            );
        }

        let chunks = ChunkMap::new(generator, executor)
            .with_ready_timeout(config.generation.ready_timeout());
        tracing::info!(
            directory = %directory.display(),
            seed = config.world.seed,
            "opened world"
        );
        Ok(Self {
            directory,
            region_extension: config.world.region_extension.clone(),
            chunks,
            regions: Arc::new(RegionCache::new(config.storage.compression_level)),
            codec: Box::new(SnapshotCodec),
            save_on_remove: config.storage.save_on_remove,
        })
    }

    /// Shares `regions` with other worlds instead of a private cache.
    pub fn with_region_cache(mut self, regions: Arc<RegionCache>) -> Self {
        self.regions = regions;
        self
    }

    /// Replaces the persistence codec.
    pub fn with_codec(mut self, codec: Box<dyn ColumnCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// World directory.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// The in-memory chunk map.
    pub fn chunks(&self) -> &ChunkMap {
        &self.chunks
    }

    /// The region cache used for persistence.
    pub fn regions(&self) -> &RegionCache {
        &self.regions
    }

    fn region_for(&self, x: i32, z: i32) -> Result<Arc<RegionFile>, RegionError> {
        let (region_x, region_z) = region_coords(x, z);
        self.regions.open(region_path(
            &self.directory,
            region_x,
            region_z,
            &self.region_extension,
        ))
    }

    /// Runs `op` on the region file holding `(x, z)`, retrying once on a
    /// fresh instance if the cached handle was closed in the meantime.
    fn with_region<T>(
        &self,
        x: i32,
        z: i32,
        op: impl Fn(&RegionFile) -> Result<T, RegionError>,
    ) -> Result<T, RegionError> {
        match op(&*self.region_for(x, z)?) {
            Err(RegionError::Closed(path)) => {
                tracing::debug!(path = %path.display(), "region file closed during use; reopening");
                op(&*self.region_for(x, z)?)
            }
            result => result,
        }
    }

    /// Returns the ready column at `(x, z)`: cached, loaded from disk, or
    /// freshly generated, in that order.
    pub fn column(&self, x: i32, z: i32) -> Result<Arc<ChunkColumn>, WorldError> {
        if let Some(column) = self.chunks.get(x, z, false)? {
            return Ok(column);
        }
        if let Some(column) = self.load_column(x, z)? {
            return Ok(column);
        }
        self.chunks
            .get(x, z, true)?
            .ok_or(WorldError::ColumnUnavailable { x, z })
    }

    /// Loads `(x, z)` from its region file into the chunk map. Returns `None`
    /// if nothing is stored. A column already in memory wins over the stored
    /// copy.
    pub fn load_column(&self, x: i32, z: i32) -> Result<Option<Arc<ChunkColumn>>, WorldError> {
        let Some(payload) = self.with_region(x, z, |region| region.read(x, z))? else {
            return Ok(None);
        };
        let column = self.codec.decode(x, z, &payload)?;
        tracing::debug!(x, z, bytes = payload.len(), "loaded chunk column");
        let column = self.chunks.insert_loaded(column);
        self.chunks.await_ready(&column)?;
        Ok(Some(column))
    }

    /// Writes `column` to its region file. Columns still generating are
    /// skipped and `false` is returned.
    pub fn save_column(&self, column: &ChunkColumn) -> Result<bool, WorldError> {
        if !column.is_ready() {
            tracing::debug!(x = column.x(), z = column.z(), "skipping save of generating column");
            return Ok(false);
        }
        let payload = self.codec.encode(column)?;
        let (x, z) = (column.x(), column.z());
        self.with_region(x, z, |region| region.write(x, z, &payload))?;
        Ok(true)
    }

    /// Saves every ready column and syncs the region files. Returns the
    /// number of columns written.
    pub fn save_all(&self) -> Result<usize, WorldError> {
        let mut saved = 0;
        for column in self.chunks.values() {
            if self.save_column(&column)? {
                saved += 1;
            }
        }
        self.regions.sync_all()?;
        tracing::info!(saved, loaded = self.chunks.len(), "saved world");
        Ok(saved)
    }

    /// Evicts `(x, z)` from memory, saving it first when the world is
    /// configured to.
    ///
    /// The column stays registered until its save lands, so a concurrent
    /// [`column`](Self::column) either gets this instance or reads the saved
    /// record. A failed save leaves the column loaded.
    pub fn unload(&self, x: i32, z: i32) -> Result<Option<Arc<ChunkColumn>>, WorldError> {
        let Some(column) = self.chunks.peek(x, z) else {
            return Ok(None);
        };
        if self.save_on_remove {
            self.save_column(&column)?;
        }
        Ok(self.chunks.remove(x, z))
    }

    /// Encodes the column at `(x, z)` for a client, loading or generating it
    /// as needed.
    pub fn encode_for_network(&self, x: i32, z: i32, continuous: bool) -> Result<Bytes, WorldError> {
        let column = self.column(x, z)?;
        let mut out = BytesMut::new();
        column.write(&mut out, continuous)?;
        Ok(out.freeze())
    }

    /// Saves everything and closes the region files.
    pub fn close(self) -> Result<(), WorldError> {
        self.save_all()?;
        self.regions.close_all()?;
        tracing::info!(directory = %self.directory.display(), "closed world");
        Ok(())
    }
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("directory", &self.directory)
            .field("chunks", &self.chunks)
            .field("regions", &self.regions)
            .finish()
    }
}
