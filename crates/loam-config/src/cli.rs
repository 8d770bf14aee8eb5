//! Command-line arguments for the `loam` binary.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// loam command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "loam", about = "Chunk storage and generation server")]
pub struct CliArgs {
    /// World directory.
    #[arg(long)]
    pub world: Option<PathBuf>,

    /// World generation seed.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Generation worker threads (0 = automatic).
    #[arg(long)]
    pub threads: Option<usize>,

    /// Spawn area radius in chunks.
    #[arg(long)]
    pub radius: Option<u32>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(ref world) = args.world {
            self.world.directory = world.clone();
        }
        if let Some(seed) = args.seed {
            self.world.seed = seed;
        }
        if let Some(threads) = args.threads {
            self.generation.worker_threads = threads;
        }
        if let Some(radius) = args.radius {
            self.spawn.radius = radius;
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_override() {
        let mut config = Config::default();
        let args = CliArgs {
            world: Some(PathBuf::from("/tmp/w")),
            seed: Some(99),
            ..CliArgs::default()
        };
        config.apply_cli_overrides(&args);
        assert_eq!(config.world.directory, PathBuf::from("/tmp/w"));
        assert_eq!(config.world.seed, 99);
        // Non-overridden fields retain defaults
        assert_eq!(config.spawn.radius, 2);
        assert_eq!(config.debug.log_level, "info");
    }

    #[test]
    fn test_cli_no_override() {
        let original = Config::default();
        let mut config = Config::default();
        config.apply_cli_overrides(&CliArgs::default());
        assert_eq!(config, original);
    }

    #[test]
    fn test_parse_flags() {
        let args = CliArgs::parse_from([
            "loam",
            "--world",
            "saves/alpha",
            "--threads",
            "4",
            "--radius",
            "6",
            "--log-level",
            "debug",
        ]);
        assert_eq!(args.world, Some(PathBuf::from("saves/alpha")));
        assert_eq!(args.threads, Some(4));
        assert_eq!(args.radius, Some(6));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert_eq!(args.seed, None);
    }
}
