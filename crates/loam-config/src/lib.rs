//! Configuration for the loam world server.
//!
//! Settings persist to disk as `config.ron` and are created with defaults on
//! first run. CLI flags override loaded values, and [`Config::reload`] detects
//! on-disk changes.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{
    Config, DebugConfig, GenerationConfig, SpawnConfig, StorageConfig, WorldConfig,
    default_config_dir,
};
pub use error::ConfigError;
