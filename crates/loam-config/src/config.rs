//! Server settings with defaults and RON persistence.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const CONFIG_FILE: &str = "config.ron";

/// Platform config directory for loam, falling back to the working directory.
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("loam")
}

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// World location and dimension settings.
    pub world: WorldConfig,
    /// Chunk generation settings.
    pub generation: GenerationConfig,
    /// Region storage settings.
    pub storage: StorageConfig,
    /// Debug/development settings.
    pub debug: DebugConfig,
    /// Spawn area pre-generation.
    pub spawn: SpawnConfig,
}

/// Where the world lives and what kind of dimension it is.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorldConfig {
    /// World directory; region files go under `<directory>/region`.
    pub directory: PathBuf,
    /// Region file extension.
    pub region_extension: String,
    /// Whether sections carry sky light.
    pub sky_light: bool,
    /// World generation seed.
    pub seed: u64,
}

/// Chunk generation settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GenerationConfig {
    /// Worker threads for generation (0 = one less than the CPU count, at least 1).
    pub worker_threads: usize,
    /// Longest wait for a column to become ready, in milliseconds (0 = forever).
    pub ready_timeout_ms: u64,
}

/// Region storage settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// Zlib level for chunk payloads (0-9).
    pub compression_level: u32,
    /// Save columns to disk when they are unloaded.
    pub save_on_remove: bool,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level override (e.g., "debug", "info", "warn").
    pub log_level: String,
}

/// Spawn area settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SpawnConfig {
    /// Columns generated around the origin at startup, as a square radius.
    pub radius: u32,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("world"),
            region_extension: "mca".to_string(),
            sky_light: true,
            seed: 0,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            compression_level: 6,
            save_on_remove: true,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl Default for SpawnConfig {
    fn default() -> Self {
        Self { radius: 2 }
    }
}

impl GenerationConfig {
    /// Worker count with `0` resolved against the machine's CPU count.
    pub fn resolved_worker_threads(&self, cpus: usize) -> usize {
        match self.worker_threads {
            0 => cpus.saturating_sub(1).max(1),
            n => n,
        }
    }

    /// Readiness timeout, or `None` to wait indefinitely.
    pub fn ready_timeout(&self) -> Option<Duration> {
        (self.ready_timeout_ms > 0).then(|| Duration::from_millis(self.ready_timeout_ms))
    }
}

// --- Load / Save / Reload ---

impl Config {
    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE);

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
            let config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;
            config.validate()?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory as `config.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::WriteError)?;

        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .separate_tuple_members(true)
            .enumerate_arrays(false);
        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::SerializeError)?;

        std::fs::write(config_dir.join(CONFIG_FILE), serialized).map_err(ConfigError::WriteError)?;
        Ok(())
    }

    /// Hot-reload: returns `Some(new_config)` if the file changed, `None` otherwise.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let contents =
            std::fs::read_to_string(config_dir.join(CONFIG_FILE)).map_err(ConfigError::ReadError)?;
        let new_config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;
        new_config.validate()?;

        if &new_config != self {
            log::info!("Config reloaded with changes");
            Ok(Some(new_config))
        } else {
            Ok(None)
        }
    }

    /// Rejects settings that parse but cannot be used.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.compression_level > 9 {
            return Err(ConfigError::InvalidValue {
                field: "storage.compression_level",
                reason: format!("{} is outside 0-9", self.storage.compression_level),
            });
        }
        if self.world.region_extension.is_empty()
            || self.world.region_extension.contains(['/', '\\', '.'])
        {
            return Err(ConfigError::InvalidValue {
                field: "world.region_extension",
                reason: format!("{:?} is not a bare file extension", self.world.region_extension),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_serializes() {
        let config = Config::default();
        let ron_str =
            ron::ser::to_string_pretty(&config, ron::ser::PrettyConfig::new().depth_limit(3))
                .unwrap();
        assert!(ron_str.contains("region_extension: \"mca\""));
        assert!(ron_str.contains("compression_level: 6"));
    }

    #[test]
    fn test_config_roundtrip() {
        let mut config = Config::default();
        config.world.seed = 12345;
        config.generation.worker_threads = 3;
        let ron_str = ron::to_string(&config).unwrap();
        let deserialized: Config = ron::from_str(&ron_str).unwrap();
        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_missing_section_uses_default() {
        let config: Config = ron::from_str("(world: (seed: 9))").unwrap();
        assert_eq!(config.world.seed, 9);
        assert_eq!(config.world.region_extension, "mca");
        assert_eq!(config.storage, StorageConfig::default());
    }

    #[test]
    fn test_extra_field_ignored() {
        let result: Result<Config, _> = ron::from_str("(future_setting: true)");
        assert!(result.is_ok());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.world.directory = PathBuf::from("/srv/worlds/main");
        config.spawn.radius = 5;

        config.save(dir.path()).unwrap();
        let loaded = Config::load_or_create(dir.path()).unwrap();
        assert_eq!(config, loaded);
    }

    #[test]
    fn test_load_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("loam");
        let config = Config::load_or_create(&nested).unwrap();
        assert_eq!(config, Config::default());
        assert!(nested.join(CONFIG_FILE).exists());
    }

    #[test]
    fn test_reload_detects_changes() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        config.save(dir.path()).unwrap();
        assert!(config.reload(dir.path()).unwrap().is_none());

        let mut modified = config.clone();
        modified.storage.compression_level = 1;
        modified.save(dir.path()).unwrap();

        let reloaded = config.reload(dir.path()).unwrap().unwrap();
        assert_eq!(reloaded.storage.compression_level, 1);
    }

    #[test]
    fn test_invalid_ron_produces_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "{{not valid}}").unwrap();
        assert!(matches!(
            Config::load_or_create(dir.path()),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.storage.compression_level = 12;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue {
                field: "storage.compression_level",
                ..
            })
        ));

        let mut config = Config::default();
        config.world.region_extension = "../mca".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_worker_threads_resolution() {
        let generation = GenerationConfig::default();
        assert_eq!(generation.resolved_worker_threads(8), 7);
        assert_eq!(generation.resolved_worker_threads(1), 1);
        let fixed = GenerationConfig {
            worker_threads: 3,
            ..GenerationConfig::default()
        };
        assert_eq!(fixed.resolved_worker_threads(8), 3);
    }

    #[test]
    fn test_ready_timeout() {
        assert_eq!(GenerationConfig::default().ready_timeout(), None);
        let bounded = GenerationConfig {
            ready_timeout_ms: 250,
            ..GenerationConfig::default()
        };
        assert_eq!(bounded.ready_timeout(), Some(Duration::from_millis(250)));
    }
}
