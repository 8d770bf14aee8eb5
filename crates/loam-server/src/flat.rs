//! Superflat terrain generator used by the `loam` binary.
//!
//! Terrain is a stack of uniform layers. Features place small trees on a few
//! columns chosen from the seed, and decorations scatter tall grass on the
//! remaining grass surface.

use std::sync::Arc;

use loam_voxel::{
    AIR, BlockState, COLUMN_HEIGHT, GenerationContext, GenerationStage, PhaseScope, SECTION_EDGE,
    WorldGenerator,
};

/// `(block id << 4) | metadata` codes used by the flat world.
pub mod blocks {
    use loam_voxel::BlockState;

    /// Bedrock floor.
    pub const BEDROCK: BlockState = BlockState(7 << 4);
    /// Stone.
    pub const STONE: BlockState = BlockState(1 << 4);
    /// Dirt.
    pub const DIRT: BlockState = BlockState(3 << 4);
    /// Grass block.
    pub const GRASS: BlockState = BlockState(2 << 4);
    /// Oak log.
    pub const LOG: BlockState = BlockState(17 << 4);
    /// Oak leaves.
    pub const LEAVES: BlockState = BlockState(18 << 4);
    /// Tall grass plant.
    pub const TALL_GRASS: BlockState = BlockState((31 << 4) | 1);
}

/// Biome id written to every column.
pub const PLAINS: u8 = 1;

const TRUNK_HEIGHT: usize = 4;

/// One layer of the flat stack, bottom first.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Layer {
    /// Block filling the layer.
    pub block: BlockState,
    /// Layer thickness in blocks.
    pub thickness: usize,
}

/// Flat world generator.
#[derive(Clone, Debug)]
pub struct FlatGenerator {
    seed: u64,
    sky_light: bool,
    layers: Arc<[Layer]>,
    trees_per_column: u64,
    grass_rarity: u64,
}

impl FlatGenerator {
    /// Classic layers: one bedrock, 58 stone, 3 dirt, 1 grass.
    pub fn new(seed: u64, sky_light: bool) -> Self {
        Self::with_layers(
            seed,
            sky_light,
            vec![
                Layer {
                    block: blocks::BEDROCK,
                    thickness: 1,
                },
                Layer {
                    block: blocks::STONE,
                    thickness: 58,
                },
                Layer {
                    block: blocks::DIRT,
                    thickness: 3,
                },
                Layer {
                    block: blocks::GRASS,
                    thickness: 1,
                },
            ],
        )
    }

    /// Custom layer stack. Layers above the top of the column are cut off.
    pub fn with_layers(seed: u64, sky_light: bool, layers: Vec<Layer>) -> Self {
        Self {
            seed,
            sky_light,
            layers: layers.into(),
            trees_per_column: 2,
            grass_rarity: 8,
        }
    }

    /// Upper bound on trees per column (0 disables trees).
    pub fn with_trees(mut self, trees_per_column: u64) -> Self {
        self.trees_per_column = trees_per_column;
        self
    }

    /// One in `rarity` grass blocks get tall grass (0 disables it).
    pub fn with_grass_rarity(mut self, rarity: u64) -> Self {
        self.grass_rarity = rarity;
        self
    }

    /// Total height of the layer stack, capped at the column height.
    pub fn surface_height(&self) -> usize {
        self.layers
            .iter()
            .map(|l| l.thickness)
            .sum::<usize>()
            .min(COLUMN_HEIGHT)
    }
}

impl WorldGenerator for FlatGenerator {
    fn seed(&self) -> u64 {
        self.seed
    }

    fn has_sky_light(&self) -> bool {
        self.sky_light
    }

    fn terrain(&self) -> Arc<dyn GenerationStage> {
        Arc::new(LayerStage {
            layers: Arc::clone(&self.layers),
        })
    }

    fn features(&self) -> Vec<Arc<dyn GenerationStage>> {
        if self.trees_per_column == 0 {
            return Vec::new();
        }
        vec![Arc::new(TreeStage {
            max_trees: self.trees_per_column,
        })]
    }

    fn decorations(&self) -> Vec<Arc<dyn GenerationStage>> {
        if self.grass_rarity == 0 {
            return Vec::new();
        }
        vec![Arc::new(GrassStage {
            rarity: self.grass_rarity,
        })]
    }
}

/// Fills the layer stack, one job per z row.
struct LayerStage {
    layers: Arc<[Layer]>,
}

impl GenerationStage for LayerStage {
    fn run(&self, scope: &PhaseScope) {
        for z in 0..SECTION_EDGE {
            let layers = Arc::clone(&self.layers);
            scope.spawn(move |scope| {
                let ctx = scope.context();
                for x in 0..SECTION_EDGE {
                    let mut y = 0;
                    for layer in layers.iter() {
                        for _ in 0..layer.thickness {
                            if y >= COLUMN_HEIGHT {
                                break;
                            }
                            ctx.set_block(x, y, z, layer.block);
                            y += 1;
                        }
                    }
                    ctx.set_biome(x, z, PLAINS);
                }
            });
        }
    }
}

/// Plants up to `max_trees` small trees on grass.
struct TreeStage {
    max_trees: u64,
}

impl GenerationStage for TreeStage {
    fn run(&self, scope: &PhaseScope) {
        let ctx = scope.context();
        let mut rng = column_hash(ctx.seed(), ctx.chunk_x(), ctx.chunk_z(), 0x7EE5);
        let count = rng % (self.max_trees + 1);
        for _ in 0..count {
            rng = splitmix64(rng);
            // Keep the canopy inside the column.
            let x = 2 + (rng % 12) as usize;
            let z = 2 + ((rng >> 8) % 12) as usize;
            plant_tree(ctx, x, z);
        }
    }
}

fn plant_tree(ctx: &GenerationContext, x: usize, z: usize) {
    let Some(ground) = ctx.highest_block(x, z) else {
        return;
    };
    if ctx.get_block(x, ground, z) != blocks::GRASS {
        return;
    }
    let top = ground + TRUNK_HEIGHT;
    if top + 2 >= COLUMN_HEIGHT {
        return;
    }

    ctx.set_block(x, ground, z, blocks::DIRT);
    for y in ground + 1..=top {
        ctx.set_block(x, y, z, blocks::LOG);
    }
    for dy in 0..2 {
        for dz in 0..3 {
            for dx in 0..3 {
                let (lx, ly, lz) = (x + dx - 1, top + dy, z + dz - 1);
                if ctx.get_block(lx, ly, lz) == AIR {
                    ctx.set_block(lx, ly, lz, blocks::LEAVES);
                }
            }
        }
    }
    ctx.set_block(x, top + 2, z, blocks::LEAVES);
}

/// Scatters tall grass, one job per 8×8 quadrant.
struct GrassStage {
    rarity: u64,
}

impl GenerationStage for GrassStage {
    fn run(&self, scope: &PhaseScope) {
        const QUADRANT: usize = SECTION_EDGE / 2;
        for qz in 0..2 {
            for qx in 0..2 {
                let rarity = self.rarity;
                scope.spawn(move |scope| {
                    let ctx = scope.context();
                    for z in qz * QUADRANT..(qz + 1) * QUADRANT {
                        for x in qx * QUADRANT..(qx + 1) * QUADRANT {
                            let world_x = ctx.chunk_x() * SECTION_EDGE as i32 + x as i32;
                            let world_z = ctx.chunk_z() * SECTION_EDGE as i32 + z as i32;
                            if column_hash(ctx.seed(), world_x, world_z, 0x6A55) % rarity != 0 {
                                continue;
                            }
                            let Some(ground) = ctx.highest_block(x, z) else {
                                continue;
                            };
                            if ground + 1 < COLUMN_HEIGHT
                                && ctx.get_block(x, ground, z) == blocks::GRASS
                            {
                                ctx.set_block(x, ground + 1, z, blocks::TALL_GRASS);
                            }
                        }
                    }
                });
            }
        }
    }
}

fn splitmix64(state: u64) -> u64 {
    let mut z = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

fn column_hash(seed: u64, x: i32, z: i32, salt: u64) -> u64 {
    let packed = (u64::from(x as u32) << 32) | u64::from(z as u32);
    splitmix64(seed ^ splitmix64(packed ^ salt))
}
