//! Per-world registry of chunk columns keyed by chunk coordinates.
//!
//! The [`ChunkMap`] guarantees that concurrent requests for the same missing
//! column create and generate it exactly once: the placeholder is inserted
//! under the map lock, and generation plus the readiness wait happen after
//! the lock is released.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rustc_hash::FxHashMap;

use crate::column::ChunkColumn;
use crate::error::WaitError;
use crate::generation::{Executor, WorldGenerator};

/// Packs chunk coordinates into a map key: `x` in the high 32 bits, `z` in
/// the low 32 bits.
pub fn chunk_key(x: i32, z: i32) -> u64 {
    (u64::from(x as u32) << 32) | u64::from(z as u32)
}

/// Owns every loaded column of one world.
pub struct ChunkMap {
    columns: Mutex<FxHashMap<u64, Arc<ChunkColumn>>>,
    generator: Arc<dyn WorldGenerator>,
    executor: Arc<dyn Executor>,
    ready_timeout: Option<Duration>,
}

impl ChunkMap {
    /// Creates an empty map that generates missing columns with `generator`
    /// on `executor`.
    pub fn new(generator: Arc<dyn WorldGenerator>, executor: Arc<dyn Executor>) -> Self {
        Self {
            columns: Mutex::new(FxHashMap::default()),
            generator,
            executor,
            ready_timeout: None,
        }
    }

    /// Bounds how long [`get`](Self::get) waits for a column to become ready.
    /// `None` waits indefinitely.
    pub fn with_ready_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.ready_timeout = timeout;
        self
    }

    fn lock(&self) -> MutexGuard<'_, FxHashMap<u64, Arc<ChunkColumn>>> {
        self.columns.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the column at `(x, z)` once it is ready.
    ///
    /// A missing column is created and generated when `generate` is set;
    /// otherwise `Ok(None)` is returned. A present column that is still
    /// generating is waited on either way.
    pub fn get(
        &self,
        x: i32,
        z: i32,
        generate: bool,
    ) -> Result<Option<Arc<ChunkColumn>>, WaitError> {
        let (column, created) = {
            let mut columns = self.lock();
            match columns.get(&chunk_key(x, z)) {
                Some(column) => (Arc::clone(column), false),
                None if generate => {
                    let column = Arc::new(ChunkColumn::new(x, z, self.generator.has_sky_light()));
                    columns.insert(chunk_key(x, z), Arc::clone(&column));
                    (column, true)
                }
                None => return Ok(None),
            }
        };

        if created {
            column.generate(&*self.generator, Arc::clone(&self.executor));
        }
        self.await_ready(&column)?;
        Ok(Some(column))
    }

    /// Returns the column at `(x, z)` whether or not it is ready.
    pub fn peek(&self, x: i32, z: i32) -> Option<Arc<ChunkColumn>> {
        self.lock().get(&chunk_key(x, z)).cloned()
    }

    /// Inserts a column decoded from storage. If a column is already present
    /// at its coordinates, the existing one is kept and returned.
    pub fn insert_loaded(&self, column: ChunkColumn) -> Arc<ChunkColumn> {
        let key = chunk_key(column.x(), column.z());
        Arc::clone(self.lock().entry(key).or_insert_with(|| Arc::new(column)))
    }

    /// Waits for `column` using the configured timeout.
    pub fn await_ready(&self, column: &ChunkColumn) -> Result<(), WaitError> {
        match self.ready_timeout {
            Some(timeout) => column.wait_ready_timeout(timeout).map(|_| ()),
            None => {
                column.wait_ready();
                Ok(())
            }
        }
    }

    /// Removes and returns the column at `(x, z)`.
    pub fn remove(&self, x: i32, z: i32) -> Option<Arc<ChunkColumn>> {
        self.lock().remove(&chunk_key(x, z))
    }

    /// Returns `true` if a column is present at `(x, z)`.
    pub fn contains(&self, x: i32, z: i32) -> bool {
        self.lock().contains_key(&chunk_key(x, z))
    }

    /// Snapshot of every loaded column.
    pub fn values(&self) -> Vec<Arc<ChunkColumn>> {
        self.lock().values().cloned().collect()
    }

    /// Number of loaded columns.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if no column is loaded.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl fmt::Debug for ChunkMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkMap")
            .field("columns", &self.len())
            .field("ready_timeout", &self.ready_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockState;
    use crate::generation::{GenerationStage, InlineExecutor, Job, PhaseScope};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        runs: Arc<AtomicUsize>,
    }

    impl GenerationStage for Counting {
        fn run(&self, scope: &PhaseScope) {
            self.runs.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(10));
            scope.context().set_block(0, 0, 0, BlockState(7));
        }
    }

    struct CountingWorld {
        runs: Arc<AtomicUsize>,
    }

    impl WorldGenerator for CountingWorld {
        fn seed(&self) -> u64 {
            1
        }
        fn has_sky_light(&self) -> bool {
            true
        }
        fn terrain(&self) -> Arc<dyn GenerationStage> {
            Arc::new(Counting {
                runs: Arc::clone(&self.runs),
            })
        }
    }

    /// Runs each job on a fresh thread.
    struct Threaded;

    impl Executor for Threaded {
        fn execute(&self, job: Job) {
            std::thread::spawn(job);
        }
    }

    /// Drops every job, so columns never become ready.
    struct Stalled;

    impl Executor for Stalled {
        fn execute(&self, _job: Job) {}
    }

    fn map(executor: Arc<dyn Executor>) -> (ChunkMap, Arc<AtomicUsize>) {
        let runs = Arc::new(AtomicUsize::new(0));
        let world = CountingWorld {
            runs: Arc::clone(&runs),
        };
        (ChunkMap::new(Arc::new(world), executor), runs)
    }

    #[test]
    fn test_chunk_key_layout() {
        assert_eq!(chunk_key(0, 0), 0);
        assert_eq!(chunk_key(1, 2), (1 << 32) | 2);
        assert_eq!(chunk_key(-1, 0), 0xFFFF_FFFF_0000_0000);
        assert_eq!(chunk_key(0, -1), 0x0000_0000_FFFF_FFFF);
        assert_ne!(chunk_key(1, -1), chunk_key(-1, 1));
    }

    #[test]
    fn test_get_without_generate_returns_none() {
        let (map, runs) = map(Arc::new(InlineExecutor));
        assert!(map.get(3, 3, false).unwrap().is_none());
        assert!(map.is_empty());
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_get_generates_and_caches() {
        let (map, runs) = map(Arc::new(InlineExecutor));
        let first = map.get(-2, 5, true).unwrap().unwrap();
        assert!(first.is_ready());
        assert_eq!(first.get(0, 0, 0), BlockState(7));
        let again = map.get(-2, 5, false).unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(map.len(), 1);
        assert!(map.contains(-2, 5));
    }

    #[test]
    fn test_concurrent_gets_generate_once() {
        let (map, runs) = map(Arc::new(Threaded));
        let map = Arc::new(map);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let map = Arc::clone(&map);
                std::thread::spawn(move || map.get(4, 4, true).unwrap().unwrap())
            })
            .collect();
        let columns: Vec<_> = handles
            .into_iter()
            .map(|h| h.join().expect("getter panicked"))
            .collect();

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        for column in &columns[1..] {
            assert!(Arc::ptr_eq(&columns[0], column));
        }
        assert!(columns[0].is_ready());
        assert_eq!(columns[0].get(0, 0, 0), BlockState(7));
    }

    #[test]
    fn test_timeout_when_generation_stalls() {
        let (map, _) = map(Arc::new(Stalled));
        let map = map.with_ready_timeout(Some(Duration::from_millis(10)));
        assert!(matches!(map.get(0, 0, true), Err(WaitError::Timeout(_))));
        let column = map.peek(0, 0).unwrap();
        assert!(!column.is_ready());
        assert!(matches!(map.get(0, 0, false), Err(WaitError::Timeout(_))));
    }

    #[test]
    fn test_insert_loaded_keeps_existing() {
        let (map, _) = map(Arc::new(InlineExecutor));
        let generated = map.get(1, 1, true).unwrap().unwrap();
        let loaded = ChunkColumn::read(1, 1, true, &mut &[0u8, 0][..], false).unwrap();
        let kept = map.insert_loaded(loaded);
        assert!(Arc::ptr_eq(&generated, &kept));

        let fresh = ChunkColumn::read(2, 2, true, &mut &[0u8, 0][..], false).unwrap();
        let inserted = map.insert_loaded(fresh);
        assert!(inserted.is_ready());
        assert!(Arc::ptr_eq(&inserted, &map.peek(2, 2).unwrap()));
    }

    #[test]
    fn test_remove_and_values() {
        let (map, _) = map(Arc::new(InlineExecutor));
        map.get(0, 0, true).unwrap();
        map.get(0, 1, true).unwrap();
        assert_eq!(map.values().len(), 2);
        let removed = map.remove(0, 0).unwrap();
        assert_eq!((removed.x(), removed.z()), (0, 0));
        assert!(map.remove(0, 0).is_none());
        assert_eq!(map.len(), 1);
    }
}
