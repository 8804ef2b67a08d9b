//! Shared configuration types consumed across the bone scan workspace.
//!
//! These structures describe where model artifacts and region crop images
//! live on disk, which address the HTTP service binds, and how images are
//! preprocessed. They serialize to JSON so deployments can pin them to a
//! settings file and override individual fields from the command line.

use anyhow::{Context, Result};
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
};

/// Image preprocessing dimensions.
///
/// Region crops are resized to `resize x resize`, then center-cropped to
/// `crop x crop` before normalization. Both values are part of the trained
/// extractor contract and should not be changed independently of the
/// model artifacts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ImageSettings {
    /// Square edge length the source image is resized to first.
    pub resize: u32,
    /// Square edge length of the final center crop fed to the extractors.
    pub crop: u32,
}

impl Default for ImageSettings {
    fn default() -> Self {
        Self {
            resize: 256,
            crop: 224,
        }
    }
}

/// Settings controlling optional runtime telemetry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    /// Whether telemetry timing logs are enabled.
    pub enabled: bool,
    /// Logging level for telemetry output (error, warn, info, debug, trace).
    pub level: String,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            level: "debug".to_string(),
        }
    }
}

impl TelemetrySettings {
    /// Resolve the configured level string into a `LevelFilter`.
    pub fn level_filter(&self) -> LevelFilter {
        match self.level.trim().to_ascii_lowercase().as_str() {
            "off" => LevelFilter::Off,
            "error" => LevelFilter::Error,
            "warn" | "warning" => LevelFilter::Warn,
            "info" => LevelFilter::Info,
            "trace" => LevelFilter::Trace,
            _ => LevelFilter::Debug,
        }
    }
}

/// Persistent service settings loaded at startup.
///
/// All fields have defaults, so a partial settings file (or none at all)
/// is valid; the server binary additionally allows CLI overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Directory containing extractor and classifier artifacts.
    pub model_dir: PathBuf,
    /// Root directory holding one subdirectory of crops per region.
    pub region_image_root: PathBuf,
    /// Interface the HTTP service binds to.
    pub host: String,
    /// Port the HTTP service listens on.
    pub port: u16,
    /// Preprocessing dimensions shared by all region extractors.
    pub image: ImageSettings,
    /// Telemetry and diagnostics preferences.
    pub telemetry: TelemetrySettings,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("data/models"),
            region_image_root: PathBuf::from("data/images/temp"),
            host: "localhost".to_string(),
            port: 8000,
            image: ImageSettings::default(),
            telemetry: TelemetrySettings::default(),
        }
    }
}

impl ServiceSettings {
    /// Load settings from a JSON file.
    ///
    /// Missing fields fall back to their defaults; an unreadable or
    /// unparsable file is an error.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings file {}", path.display()))?;
        let settings: ServiceSettings = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse settings JSON at {}", path.display()))?;
        Ok(settings)
    }

    /// Serialize settings to disk in pretty-printed JSON.
    ///
    /// This will overwrite the file if it already exists.
    pub fn save_to_path<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let payload =
            serde_json::to_string_pretty(self).context("failed to serialize settings JSON")?;
        fs::write(path, payload)
            .with_context(|| format!("failed to write settings file {}", path.display()))?;
        Ok(())
    }
}

/// Returns the default path for persisted service settings (`config/service_settings.json`).
pub fn default_settings_path() -> PathBuf {
    env::current_dir()
        .map(|dir| dir.join("config/service_settings.json"))
        .unwrap_or_else(|_| PathBuf::from("config/service_settings.json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn default_settings_round_trip() {
        let file = NamedTempFile::new().expect("tempfile");
        let settings = ServiceSettings::default();
        settings.save_to_path(file.path()).expect("save");

        let loaded = ServiceSettings::load_from_path(file.path()).expect("load");
        assert_eq!(loaded.model_dir, settings.model_dir);
        assert_eq!(loaded.region_image_root, settings.region_image_root);
        assert_eq!(loaded.host, settings.host);
        assert_eq!(loaded.port, settings.port);
        assert_eq!(loaded.image, settings.image);
        assert_eq!(loaded.telemetry.enabled, settings.telemetry.enabled);
    }

    #[test]
    fn partial_settings_fall_back_to_defaults() {
        let file = NamedTempFile::new().expect("tempfile");
        let json = r#"{
            "port": 9000,
            "image": { "resize": 288 }
        }"#;
        fs::write(file.path(), json).expect("write custom settings");

        let loaded = ServiceSettings::load_from_path(file.path()).expect("load");
        assert_eq!(loaded.port, 9000);
        assert_eq!(loaded.image.resize, 288);
        assert_eq!(loaded.image.crop, 224);
        assert_eq!(loaded.host, "localhost");
        assert_eq!(loaded.model_dir, PathBuf::from("data/models"));
        assert_eq!(loaded.telemetry.level_filter(), LevelFilter::Debug);
    }

    #[test]
    fn telemetry_level_parses_variants() {
        let telemetry = TelemetrySettings {
            level: "TRACE".into(),
            ..TelemetrySettings::default()
        };
        assert_eq!(telemetry.level_filter(), LevelFilter::Trace);

        let telemetry = TelemetrySettings {
            level: "Warn".into(),
            ..TelemetrySettings::default()
        };
        assert_eq!(telemetry.level_filter(), LevelFilter::Warn);
    }
}
