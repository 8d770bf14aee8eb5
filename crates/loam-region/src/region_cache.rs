//! Process-wide cache guaranteeing one [`RegionFile`] per physical path.
//!
//! Paths are resolved against the canonical form of their parent directory,
//! so two spellings of the same file share one instance and therefore one
//! lock.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::error::RegionError;
use crate::region_file::{REGION_EDGE, RegionFile};

/// Path of the region file holding region `(region_x, region_z)` of a world.
pub fn region_path(world_dir: &Path, region_x: i32, region_z: i32, extension: &str) -> PathBuf {
    world_dir
        .join("region")
        .join(format!("r.{region_x}.{region_z}.{extension}"))
}

/// Region coordinates of the region containing chunk `(chunk_x, chunk_z)`.
pub fn region_coords(chunk_x: i32, chunk_z: i32) -> (i32, i32) {
    let shift = REGION_EDGE.trailing_zeros();
    (chunk_x >> shift, chunk_z >> shift)
}

/// Open region files keyed by resolved path.
pub struct RegionCache {
    files: DashMap<PathBuf, Arc<RegionFile>>,
    compression_level: u32,
}

impl RegionCache {
    /// Creates an empty cache whose files compress at `compression_level`.
    pub fn new(compression_level: u32) -> Self {
        Self {
            files: DashMap::new(),
            compression_level,
        }
    }

    /// Returns the shared instance for `path`, opening (and creating) the
    /// file and its parent directories on first use.
    pub fn open(&self, path: impl AsRef<Path>) -> Result<Arc<RegionFile>, RegionError> {
        let key = resolve(path.as_ref(), true)?;
        if let Some(file) = self.files.get(&key) {
            return Ok(Arc::clone(file.value()));
        }

        match self.files.entry(key) {
            Entry::Occupied(entry) => Ok(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                let file = Arc::new(RegionFile::open(entry.key(), self.compression_level)?);
                tracing::debug!(path = %entry.key().display(), "cached region file");
                entry.insert(Arc::clone(&file));
                Ok(file)
            }
        }
    }

    /// Evicts and closes the instance for `path`. Returns `false` if it was
    /// not cached. Holders of the evicted `Arc` get [`RegionError::Closed`]
    /// from then on and must reopen through the cache.
    pub fn close(&self, path: impl AsRef<Path>) -> Result<bool, RegionError> {
        let key = resolve(path.as_ref(), false)?;
        match self.files.remove(&key) {
            Some((_, file)) => {
                file.close()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Evicts and closes every cached file. All files are attempted; the
    /// first error is returned.
    pub fn close_all(&self) -> Result<(), RegionError> {
        let keys: Vec<PathBuf> = self.files.iter().map(|e| e.key().clone()).collect();
        let mut first_error = None;
        for key in keys {
            if let Some((path, file)) = self.files.remove(&key)
                && let Err(err) = file.close()
            {
                tracing::warn!(path = %path.display(), error = %err, "failed to close region file");
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Syncs every cached file without evicting it.
    pub fn sync_all(&self) -> Result<(), RegionError> {
        for entry in self.files.iter() {
            entry.value().sync()?;
        }
        Ok(())
    }

    /// Number of cached files.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Returns `true` if no file is cached.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl Default for RegionCache {
    fn default() -> Self {
        Self::new(6)
    }
}

impl std::fmt::Debug for RegionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegionCache")
            .field("files", &self.files.len())
            .field("compression_level", &self.compression_level)
            .finish()
    }
}

/// Canonicalizes the parent directory of `path`, creating it when `create`
/// is set. A missing parent leaves the path as given.
fn resolve(path: &Path, create: bool) -> io::Result<PathBuf> {
    let file_name = path.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("region path {} has no file name", path.display()),
        )
    })?;
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    if create {
        std::fs::create_dir_all(parent)?;
    }
    match parent.canonicalize() {
        Ok(parent) => Ok(parent.join(file_name)),
        Err(err) if !create && err.kind() == io::ErrorKind::NotFound => Ok(path.to_path_buf()),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_region_path_layout() {
        let path = region_path(Path::new("world"), -1, 2, "mca");
        assert_eq!(path, Path::new("world/region/r.-1.2.mca"));
    }

    #[test]
    fn test_region_coords_floor_negative_chunks() {
        assert_eq!(region_coords(0, 31), (0, 0));
        assert_eq!(region_coords(32, -1), (1, -1));
        assert_eq!(region_coords(-32, -33), (-1, -2));
    }

    #[test]
    fn test_same_path_shares_one_instance() {
        let dir = tempdir().unwrap();
        let cache = RegionCache::new(6);
        let path = region_path(dir.path(), 0, 0, "mca");
        let a = cache.open(&path).unwrap();
        let b = cache.open(&path).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
        assert!(path.exists());
    }

    #[test]
    fn test_equivalent_spellings_share_one_instance() {
        let dir = tempdir().unwrap();
        let cache = RegionCache::new(6);
        let direct = region_path(dir.path(), 0, 0, "mca");
        let a = cache.open(&direct).unwrap();
        let dotted = dir.path().join("region").join(".").join("r.0.0.mca");
        let b = cache.open(&dotted).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_concurrent_opens_create_one_instance() {
        let dir = tempdir().unwrap();
        let cache = RegionCache::new(6);
        let path = region_path(dir.path(), 3, 4, "mca");
        let files: Vec<Arc<RegionFile>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| cache.open(&path).unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        for file in &files[1..] {
            assert!(Arc::ptr_eq(&files[0], file));
        }
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_close_evicts_and_reopen_sees_data() {
        let dir = tempdir().unwrap();
        let cache = RegionCache::new(6);
        let path = region_path(dir.path(), 0, 0, "mca");
        let first = cache.open(&path).unwrap();
        first.write(1, 1, b"saved").unwrap();

        assert!(cache.close(&path).unwrap());
        assert!(!cache.close(&path).unwrap());
        assert!(cache.is_empty());

        let second = cache.open(&path).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(first.is_closed());
        assert_eq!(second.read(1, 1).unwrap().unwrap(), b"saved");
    }

    #[test]
    fn test_evicted_handle_cannot_clobber_replacement() {
        let dir = tempdir().unwrap();
        let cache = RegionCache::new(6);
        let path = region_path(dir.path(), 0, 0, "mca");
        let stale = cache.open(&path).unwrap();
        cache.close(&path).unwrap();
        let live = cache.open(&path).unwrap();

        assert!(matches!(
            stale.write(0, 0, b"chunk zero"),
            Err(RegionError::Closed(_))
        ));
        live.write(1, 0, b"chunk one!").unwrap();
        cache.close_all().unwrap();

        let reopened = cache.open(&path).unwrap();
        assert_eq!(reopened.read(0, 0).unwrap(), None);
        assert_eq!(reopened.read(1, 0).unwrap().unwrap(), b"chunk one!");
    }

    #[test]
    fn test_close_all() {
        let dir = tempdir().unwrap();
        let cache = RegionCache::new(6);
        for rx in 0..3 {
            cache.open(region_path(dir.path(), rx, 0, "mca")).unwrap();
        }
        assert_eq!(cache.len(), 3);
        let held = cache.open(region_path(dir.path(), 0, 0, "mca")).unwrap();
        cache.sync_all().unwrap();
        cache.close_all().unwrap();
        assert!(cache.is_empty());
        assert!(held.is_closed());
    }
}
