use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use bonescan_core::ScanAnalyzer;
use bonescan_server::AppState;
use bonescan_utils::{
    ServiceSettings, configure_telemetry, default_settings_path, init_logging, normalize_path,
};

/// Serve bone scan metastasis predictions over HTTP.
#[derive(Debug, Parser)]
#[command(author, version, about)]
struct ServeArgs {
    /// Optional settings JSON (defaults to config/service_settings.json when present).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the model artifact directory.
    #[arg(long)]
    model_dir: Option<PathBuf>,

    /// Override the region crop image root.
    #[arg(long)]
    region_root: Option<PathBuf>,

    /// Override the bind host.
    #[arg(long)]
    host: Option<String>,

    /// Override the listen port.
    #[arg(long)]
    port: Option<u16>,
}

fn main() -> Result<()> {
    init_logging(log::LevelFilter::Info)?;
    let args = ServeArgs::parse();

    let mut settings = load_settings(args.config.as_ref())?;
    apply_cli_overrides(&mut settings, &args);
    configure_telemetry(settings.telemetry.enabled, settings.telemetry.level_filter());

    settings.model_dir =
        normalize_path(&settings.model_dir).context("invalid model directory")?;
    settings.region_image_root =
        normalize_path(&settings.region_image_root).context("invalid region image root")?;

    info!(
        "loading model artifacts from {} (bonescan-core {})",
        settings.model_dir.display(),
        bonescan_core::version()
    );
    let analyzer = ScanAnalyzer::load(
        &settings.model_dir,
        &settings.region_image_root,
        settings.image.into(),
    )
    .context("startup failed: could not load model artifacts")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(serve(settings, analyzer))
}

async fn serve(settings: ServiceSettings, analyzer: ScanAnalyzer) -> Result<()> {
    let state = AppState {
        analyzer: Arc::new(analyzer),
        region_root: settings.region_image_root.clone(),
        upload_dir: std::env::temp_dir(),
    };
    let app = bonescan_server::app(state);

    let addr = format!("{}:{}", settings.host, settings.port);
    info!("listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn load_settings(config: Option<&PathBuf>) -> Result<ServiceSettings> {
    match config {
        Some(path) => ServiceSettings::load_from_path(path),
        None => {
            let default_path = default_settings_path();
            if default_path.exists() {
                ServiceSettings::load_from_path(default_path)
            } else {
                Ok(ServiceSettings::default())
            }
        }
    }
}

fn apply_cli_overrides(settings: &mut ServiceSettings, args: &ServeArgs) {
    if let Some(model_dir) = args.model_dir.as_ref() {
        settings.model_dir = model_dir.clone();
    }
    if let Some(region_root) = args.region_root.as_ref() {
        settings.region_image_root = region_root.clone();
    }
    if let Some(host) = args.host.as_ref() {
        settings.host = host.clone();
    }
    if let Some(port) = args.port {
        settings.port = port;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_take_precedence() {
        let mut settings = ServiceSettings::default();
        let args = ServeArgs {
            config: None,
            model_dir: Some(PathBuf::from("/srv/models")),
            region_root: None,
            host: Some("0.0.0.0".into()),
            port: Some(9100),
        };

        apply_cli_overrides(&mut settings, &args);
        assert_eq!(settings.model_dir, PathBuf::from("/srv/models"));
        assert_eq!(settings.region_image_root, PathBuf::from("data/images/temp"));
        assert_eq!(settings.host, "0.0.0.0");
        assert_eq!(settings.port, 9100);
    }

    #[test]
    fn missing_settings_file_falls_back_to_defaults() {
        let settings = load_settings(None).expect("defaults");
        assert_eq!(settings.port, 8000);
    }
}
