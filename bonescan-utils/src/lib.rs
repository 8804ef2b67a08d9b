//! Common helpers shared across the bone scan crates.

/// Service configuration and settings management.
pub mod config;
/// Image loading, resizing, and channel-layout conversion.
pub mod image_utils;
/// Instrumentation helpers for optional performance tracing.
pub mod telemetry;

use std::path::Path;

use anyhow::Result;
use log::LevelFilter;

pub use config::{ImageSettings, ServiceSettings, TelemetrySettings, default_settings_path};
pub use image_utils::{center_crop, load_rgb_image, resize_image, rgb_to_chw_normalized};
pub use telemetry::{
    TimingGuard, configure as configure_telemetry, telemetry_allows, telemetry_enabled,
    telemetry_level, timing_guard, timing_guard_if,
};

/// Initialize logging once for the server and any auxiliary binaries.
///
/// This function respects the `RUST_LOG` environment variable if it is set.
/// Otherwise, it falls back to the provided default filter level.
///
/// # Arguments
///
/// * `default_filter` - The `LevelFilter` to use if `RUST_LOG` is not set.
pub fn init_logging(default_filter: LevelFilter) -> Result<()> {
    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(default_filter.as_str()),
    );
    builder.filter_module("bonescan::telemetry", LevelFilter::Trace);

    if builder.try_init().is_err() {
        // Logger already initialized; nothing to do.
    }
    Ok(())
}

/// Validate that a path exists and resolve it to an absolute path.
///
/// # Arguments
///
/// * `path` - The path to validate and normalize.
pub fn normalize_path<P: AsRef<Path>>(path: P) -> Result<std::path::PathBuf> {
    let path = path.as_ref();
    anyhow::ensure!(path.exists(), "path does not exist: {}", path.display());
    Ok(path.canonicalize()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_path_resolves_existing_directories() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        let normalized = normalize_path(dir.path()).expect("normalize");
        assert!(normalized.is_absolute());
        assert!(normalized.is_dir());
    }

    #[test]
    fn normalize_path_rejects_missing_paths() {
        let err = normalize_path("no/such/model/dir").expect_err("missing path");
        assert!(format!("{err}").contains("does not exist"));
    }
}
