//! `loam`: opens a world, prepares the spawn area, and saves it.
//!
//! Configuration is loaded from `config.ron` and can be overridden via CLI
//! flags. Run with `cargo run -p loam-server -- --world ./world --radius 4`.

use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use loam_config::{CliArgs, Config, default_config_dir};
use loam_server::{FlatGenerator, WorkerPool, World};
use tracing::info;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    let config_dir = args.config.clone().unwrap_or_else(default_config_dir);

    // Load or create config, then apply CLI overrides
    let mut config = Config::load_or_create(&config_dir).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}, using defaults");
        Config::default()
    });
    config.apply_cli_overrides(&args);
    config.validate()?;

    let log_dir = config_dir.join("logs");
    loam_log::init_logging(Some(&log_dir), cfg!(debug_assertions), Some(&config));

    let threads = config.generation.resolved_worker_threads(num_cpus::get());
    let pool = Arc::new(WorkerPool::new(threads)?);
    let generator = Arc::new(FlatGenerator::new(config.world.seed, config.world.sky_light));
    let world = World::open(&config, generator, pool.clone())?;

    let radius = config.spawn.radius as i32;
    let started = Instant::now();
    let mut network_bytes = 0;
    for z in -radius..=radius {
        for x in -radius..=radius {
            network_bytes += world.encode_for_network(x, z, true)?.len();
        }
    }
    info!(
        columns = world.chunks().len(),
        network_bytes,
        threads = pool.threads(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "spawn area ready"
    );

    world.close()?;
    Ok(())
}
