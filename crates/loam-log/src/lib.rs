//! Structured logging for the loam server.
//!
//! Installs a `tracing` subscriber with a console layer and, in debug builds,
//! a JSON file layer. `log` records emitted by dependencies (the config crate
//! among them) are bridged into the same subscriber.

use std::path::Path;

use loam_config::Config;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when neither `RUST_LOG` nor the config names a level.
pub const DEFAULT_FILTER: &str = "info";

/// Name of the JSON log file written in debug builds.
pub const LOG_FILE_NAME: &str = "loam.log";

/// Filter directives for `config`: its `debug.log_level` when set, else
/// [`DEFAULT_FILTER`].
pub fn filter_directives(config: Option<&Config>) -> String {
    match config {
        Some(config) if !config.debug.log_level.trim().is_empty() => {
            config.debug.log_level.trim().to_string()
        }
        _ => DEFAULT_FILTER.to_string(),
    }
}

/// Initialize the tracing subscriber.
///
/// - Console output with uptime timestamps, targets, and thread names
/// - JSON file logging to `log_dir/loam.log` when `debug_build` is set
/// - `RUST_LOG` wins over the config's log level
///
/// Returns `false` if a global subscriber was already installed.
///
/// ```no_run
/// use loam_config::Config;
/// use loam_log::init_logging;
///
/// let config = Config::default();
/// init_logging(Some(std::path::Path::new("./logs")), cfg!(debug_assertions), Some(&config));
/// ```
pub fn init_logging(log_dir: Option<&Path>, debug_build: bool, config: Option<&Config>) -> bool {
    let filter = filter_directives(config);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(true) // generation workers are named
        .with_level(true)
        .with_timer(fmt::time::uptime());

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer);

    if debug_build
        && let Some(log_dir) = log_dir
        && std::fs::create_dir_all(log_dir).is_ok()
        && let Ok(log_file) = std::fs::File::create(log_dir.join(LOG_FILE_NAME))
    {
        let file_layer = fmt::layer()
            .with_writer(log_file)
            .with_ansi(false)
            .with_target(true)
            .with_timer(fmt::time::uptime())
            .json();

        return subscriber.with(file_layer).try_init().is_ok();
    }

    subscriber.try_init().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_without_config() {
        assert_eq!(filter_directives(None), "info");
    }

    #[test]
    fn test_config_level_used() {
        let mut config = Config::default();
        config.debug.log_level = " debug,loam_region=trace ".to_string();
        assert_eq!(filter_directives(Some(&config)), "debug,loam_region=trace");
    }

    #[test]
    fn test_blank_config_level_falls_back() {
        let mut config = Config::default();
        config.debug.log_level = "   ".to_string();
        assert_eq!(filter_directives(Some(&config)), DEFAULT_FILTER);
    }

    #[test]
    fn test_subsystem_filters_parse() {
        for directives in [
            "info",
            "debug,loam_voxel=trace",
            "warn,loam_region=debug,loam_server=info",
        ] {
            assert!(
                EnvFilter::try_new(directives).is_ok(),
                "failed to parse {directives}"
            );
        }
    }

    #[test]
    fn test_init_writes_log_file_in_debug_builds() {
        let dir = tempfile::tempdir().unwrap();
        let installed = init_logging(Some(dir.path()), true, None);
        if installed {
            tracing::info!("logging initialised");
            assert!(dir.path().join(LOG_FILE_NAME).exists());
        }
        // A second install is refused rather than panicking.
        assert!(!init_logging(None, false, None));
    }
}
