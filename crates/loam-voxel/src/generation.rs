//! Three-phase chunk generation contract and its join barriers.
//!
//! A [`WorldGenerator`] supplies one terrain stage, any number of feature
//! stages, and any number of decoration stages. Phases run strictly in that
//! order. Within a phase every stage runs as its own job on the caller's
//! [`Executor`], and a stage may fan out further through
//! [`PhaseScope::spawn`]. The next phase is launched by whichever job
//! finishes last, so no worker ever parks waiting on a barrier.
//!
//! This module never creates threads; all work goes through the executor.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::block::BlockState;
use crate::column::ColumnStorage;

/// A unit of work handed to an [`Executor`].
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Something that runs jobs, typically a worker pool owned by the server.
pub trait Executor: Send + Sync {
    /// Runs `job`, now or later, on any thread.
    fn execute(&self, job: Job);
}

/// Runs every job immediately on the submitting thread.
#[derive(Clone, Copy, Debug, Default)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn execute(&self, job: Job) {
        job();
    }
}

/// The ordered generation phases.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GenerationPhase {
    /// Raw terrain: fills sections and heights.
    Terrain,
    /// Structures placed on top of terrain.
    Features,
    /// Small decorations ("props") placed last.
    Decorations,
}

/// One generator step run inside a phase.
pub trait GenerationStage: Send + Sync {
    /// Populates `scope.context()`. Extra parallel work goes through
    /// [`PhaseScope::spawn`]; the phase ends when this returns and every
    /// spawned task has finished.
    fn run(&self, scope: &PhaseScope);
}

/// Per-world source of generation stages.
pub trait WorldGenerator: Send + Sync {
    /// World seed handed to every context.
    fn seed(&self) -> u64;

    /// Whether columns of this world carry sky light.
    fn has_sky_light(&self) -> bool;

    /// The terrain stage.
    fn terrain(&self) -> Arc<dyn GenerationStage>;

    /// Feature stages, run after terrain.
    fn features(&self) -> Vec<Arc<dyn GenerationStage>> {
        Vec::new()
    }

    /// Decoration stages, run after features.
    fn decorations(&self) -> Vec<Arc<dyn GenerationStage>> {
        Vec::new()
    }
}

/// Scratch column that generation stages write into.
///
/// Safe to mutate from many jobs at once. Its contents are copied into the
/// owning column after the last phase completes.
pub struct GenerationContext {
    chunk_x: i32,
    chunk_z: i32,
    seed: u64,
    pub(crate) storage: ColumnStorage,
}

impl GenerationContext {
    pub(crate) fn new(chunk_x: i32, chunk_z: i32, seed: u64, sky_light: bool) -> Self {
        Self {
            chunk_x,
            chunk_z,
            seed,
            storage: ColumnStorage::new(sky_light),
        }
    }

    /// Chunk X coordinate of the column being generated.
    pub fn chunk_x(&self) -> i32 {
        self.chunk_x
    }

    /// Chunk Z coordinate of the column being generated.
    pub fn chunk_z(&self) -> i32 {
        self.chunk_z
    }

    /// World seed.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Whether the column carries sky light.
    pub fn has_sky_light(&self) -> bool {
        self.storage.has_sky_light()
    }

    /// Returns the state at column-local `(x, y, z)`; air when out of range.
    pub fn get_block(&self, x: usize, y: usize, z: usize) -> BlockState {
        self.storage.get(x, y, z)
    }

    /// Stores `state` at column-local `(x, y, z)` and maintains the height map.
    /// Out-of-range writes are ignored with a warning.
    pub fn set_block(&self, x: usize, y: usize, z: usize, state: BlockState) {
        self.storage.set(x, y, z, state);
    }

    /// Highest occupied y in column `(x, z)`.
    pub fn highest_block(&self, x: usize, z: usize) -> Option<usize> {
        self.storage.highest_block(x, z)
    }

    /// Sets the biome id of column `(x, z)`.
    pub fn set_biome(&self, x: usize, z: usize, biome: u8) {
        self.storage.set_biome(x, z, biome);
    }

    /// Biome id of column `(x, z)`.
    pub fn biome(&self, x: usize, z: usize) -> u8 {
        self.storage.biome(x, z)
    }
}

impl fmt::Debug for GenerationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationContext")
            .field("chunk_x", &self.chunk_x)
            .field("chunk_z", &self.chunk_z)
            .field("seed", &self.seed)
            .finish()
    }
}

/// Counts outstanding jobs of one phase and runs a continuation when the
/// count reaches zero.
///
/// Starts at one: the launcher holds the phase open until every stage has
/// been submitted.
struct JoinBarrier {
    pending: AtomicUsize,
    on_complete: Mutex<Option<Job>>,
}

impl JoinBarrier {
    fn new(on_complete: Job) -> Self {
        Self {
            pending: AtomicUsize::new(1),
            on_complete: Mutex::new(Some(on_complete)),
        }
    }

    fn enter(&self) {
        self.pending.fetch_add(1, Ordering::AcqRel);
    }

    fn leave(&self) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            let job = self
                .on_complete
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            if let Some(job) = job {
                job();
            }
        }
    }
}

/// Handle given to a running stage: access to the context plus fan-out.
#[derive(Clone)]
pub struct PhaseScope {
    context: Arc<GenerationContext>,
    barrier: Arc<JoinBarrier>,
    executor: Arc<dyn Executor>,
    phase: GenerationPhase,
}

impl PhaseScope {
    /// The column being generated.
    pub fn context(&self) -> &GenerationContext {
        &self.context
    }

    /// The phase this scope belongs to.
    pub fn phase(&self) -> GenerationPhase {
        self.phase
    }

    /// Runs `task` on the executor as part of the current phase. The next
    /// phase does not start until `task` returns.
    pub fn spawn<F>(&self, task: F)
    where
        F: FnOnce(&PhaseScope) + Send + 'static,
    {
        self.barrier.enter();
        let scope = self.clone();
        self.executor.execute(Box::new(move || {
            task(&scope);
            scope.barrier.leave();
        }));
    }
}

type Phase = (GenerationPhase, Vec<Arc<dyn GenerationStage>>);

/// Runs `generator`'s phases over `context` in order, then calls `finish`.
pub(crate) fn run_pipeline(
    context: Arc<GenerationContext>,
    generator: &dyn WorldGenerator,
    executor: Arc<dyn Executor>,
    finish: Job,
) {
    let phases: VecDeque<Phase> = VecDeque::from([
        (GenerationPhase::Terrain, vec![generator.terrain()]),
        (GenerationPhase::Features, generator.features()),
        (GenerationPhase::Decorations, generator.decorations()),
    ]);
    launch_phase(context, phases, executor, finish);
}

fn launch_phase(
    context: Arc<GenerationContext>,
    mut phases: VecDeque<Phase>,
    executor: Arc<dyn Executor>,
    finish: Job,
) {
    let Some((phase, stages)) = phases.pop_front() else {
        finish();
        return;
    };

    tracing::trace!(
        chunk_x = context.chunk_x,
        chunk_z = context.chunk_z,
        ?phase,
        stages = stages.len(),
        "starting generation phase"
    );

    let next: Job = {
        let context = Arc::clone(&context);
        let executor = Arc::clone(&executor);
        Box::new(move || launch_phase(context, phases, executor, finish))
    };
    let scope = PhaseScope {
        context,
        barrier: Arc::new(JoinBarrier::new(next)),
        executor,
        phase,
    };
    for stage in stages {
        scope.spawn(move |scope| stage.run(scope));
    }
    scope.barrier.leave();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::AIR;
    use std::sync::atomic::AtomicBool;

    /// Records the order in which phases observe each other's output.
    struct Recorder {
        log: Arc<Mutex<Vec<GenerationPhase>>>,
    }

    impl GenerationStage for Recorder {
        fn run(&self, scope: &PhaseScope) {
            self.log.lock().unwrap().push(scope.phase());
        }
    }

    struct Phased {
        log: Arc<Mutex<Vec<GenerationPhase>>>,
    }

    impl WorldGenerator for Phased {
        fn seed(&self) -> u64 {
            7
        }

        fn has_sky_light(&self) -> bool {
            true
        }

        fn terrain(&self) -> Arc<dyn GenerationStage> {
            Arc::new(Recorder {
                log: Arc::clone(&self.log),
            })
        }

        fn features(&self) -> Vec<Arc<dyn GenerationStage>> {
            vec![
                Arc::new(Recorder {
                    log: Arc::clone(&self.log),
                }),
                Arc::new(Recorder {
                    log: Arc::clone(&self.log),
                }),
            ]
        }

        fn decorations(&self) -> Vec<Arc<dyn GenerationStage>> {
            vec![Arc::new(Recorder {
                log: Arc::clone(&self.log),
            })]
        }
    }

    /// Queues jobs until drained, to exercise out-of-order completion.
    #[derive(Default)]
    struct QueueExecutor {
        queue: Mutex<VecDeque<Job>>,
    }

    impl Executor for QueueExecutor {
        fn execute(&self, job: Job) {
            self.queue.lock().unwrap().push_back(job);
        }
    }

    impl QueueExecutor {
        fn drain_reversed(&self) -> usize {
            let mut ran = 0;
            loop {
                let job = self.queue.lock().unwrap().pop_back();
                match job {
                    Some(job) => {
                        job();
                        ran += 1;
                    }
                    None => return ran,
                }
            }
        }
    }

    fn context() -> Arc<GenerationContext> {
        Arc::new(GenerationContext::new(1, 2, 7, true))
    }

    #[test]
    fn test_phases_run_in_order_inline() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let generator = Phased {
            log: Arc::clone(&log),
        };
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);
        run_pipeline(
            context(),
            &generator,
            Arc::new(InlineExecutor),
            Box::new(move || flag.store(true, Ordering::SeqCst)),
        );
        assert!(finished.load(Ordering::SeqCst));
        assert_eq!(
            *log.lock().unwrap(),
            [
                GenerationPhase::Terrain,
                GenerationPhase::Features,
                GenerationPhase::Features,
                GenerationPhase::Decorations,
            ]
        );
    }

    #[test]
    fn test_phases_wait_for_spawned_subtasks() {
        struct FanOut;
        impl GenerationStage for FanOut {
            fn run(&self, scope: &PhaseScope) {
                for y in 0..16 {
                    scope.spawn(move |scope| {
                        scope.context().set_block(0, y, 0, BlockState(1));
                    });
                }
            }
        }

        struct CheckTerrain {
            saw: Arc<AtomicUsize>,
        }
        impl GenerationStage for CheckTerrain {
            fn run(&self, scope: &PhaseScope) {
                let filled = (0..16)
                    .filter(|&y| scope.context().get_block(0, y, 0) == BlockState(1))
                    .count();
                self.saw.store(filled, Ordering::SeqCst);
            }
        }

        struct Gen {
            saw: Arc<AtomicUsize>,
        }
        impl WorldGenerator for Gen {
            fn seed(&self) -> u64 {
                0
            }
            fn has_sky_light(&self) -> bool {
                false
            }
            fn terrain(&self) -> Arc<dyn GenerationStage> {
                Arc::new(FanOut)
            }
            fn features(&self) -> Vec<Arc<dyn GenerationStage>> {
                vec![Arc::new(CheckTerrain {
                    saw: Arc::clone(&self.saw),
                })]
            }
        }

        let saw = Arc::new(AtomicUsize::new(0));
        let executor = Arc::new(QueueExecutor::default());
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);
        let ctx = context();
        run_pipeline(
            Arc::clone(&ctx),
            &Gen {
                saw: Arc::clone(&saw),
            },
            executor.clone(),
            Box::new(move || flag.store(true, Ordering::SeqCst)),
        );
        assert!(!finished.load(Ordering::SeqCst));
        executor.drain_reversed();
        assert!(finished.load(Ordering::SeqCst));
        assert_eq!(saw.load(Ordering::SeqCst), 16);
        assert_eq!(ctx.highest_block(0, 0), Some(15));
        assert_eq!(ctx.get_block(1, 0, 0), AIR);
    }

    #[test]
    fn test_empty_phases_still_finish() {
        struct Nothing;
        impl GenerationStage for Nothing {
            fn run(&self, _scope: &PhaseScope) {}
        }
        struct Gen;
        impl WorldGenerator for Gen {
            fn seed(&self) -> u64 {
                0
            }
            fn has_sky_light(&self) -> bool {
                true
            }
            fn terrain(&self) -> Arc<dyn GenerationStage> {
                Arc::new(Nothing)
            }
        }

        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);
        run_pipeline(
            context(),
            &Gen,
            Arc::new(InlineExecutor),
            Box::new(move || flag.store(true, Ordering::SeqCst)),
        );
        assert!(finished.load(Ordering::SeqCst));
    }

    #[test]
    fn test_context_accessors() {
        let ctx = context();
        assert_eq!((ctx.chunk_x(), ctx.chunk_z(), ctx.seed()), (1, 2, 7));
        assert!(ctx.has_sky_light());
        ctx.set_biome(3, 4, 21);
        assert_eq!(ctx.biome(3, 4), 21);
        assert_eq!(ctx.highest_block(3, 4), None);
    }

    #[test]
    fn test_context_ignores_out_of_range_blocks() {
        let ctx = context();
        ctx.set_block(16, 0, 0, BlockState(9));
        ctx.set_block(0, 0, 16, BlockState(9));
        ctx.set_block(0, 256, 0, BlockState(9));
        assert_eq!(ctx.get_block(0, 0, 1), AIR);
        assert_eq!(ctx.get_block(1, 0, 0), AIR);
        assert_eq!(ctx.get_block(16, 0, 0), AIR);
        assert_eq!(ctx.get_block(0, 300, 0), AIR);
        assert_eq!(ctx.highest_block(0, 0), None);
        assert_eq!(ctx.highest_block(16, 0), None);
        assert!(ctx.storage.section(0).is_none());
    }
}
