//! Configuration loading

use anyhow::Result;
use std::path::Path;
use tracing::info;

use crate::Config;

/// Load configuration from config file or environment variables
///
/// Config file search order:
/// 1. `explicit` path (from `--config`); must exist
/// 2. FANOUT_CONFIG_PATH environment variable
/// 3. ./config.yaml (current working directory)
/// 4. Fall back to defaults and environment variables only
pub fn load_config(explicit: Option<&str>) -> Result<Config> {
    let config_path = explicit.map(str::to_string).or_else(|| {
        std::env::var("FANOUT_CONFIG_PATH")
            .ok()
            .filter(|p| Path::new(p).exists())
            .or_else(|| {
                let cwd = "config.yaml";
                Path::new(cwd).exists().then(|| cwd.to_string())
            })
    });

    let config = match &config_path {
        Some(path) => {
            eprintln!("Loading config from {path}");
            Config::from_file(path)
                .map_err(|e| anyhow::anyhow!("Failed to load config from {path}: {e}"))?
        }
        None => {
            eprintln!("No config file found, using environment variables");
            Config::from_env()?
        }
    };

    // Fail fast on misconfiguration
    if let Err(errors) = config.validate() {
        for error in &errors {
            eprintln!("Config validation error: {error}");
        }
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s): {}",
            errors.len(),
            errors.join("; ")
        ));
    }

    Ok(config)
}

/// Log the effective configuration once logging is up
pub fn log_config_summary(config: &Config) {
    info!("Configuration loaded and validated successfully");
    info!(
        http_address = %config.http_address(),
        static_dir = ?config.server.static_dir,
        cookie_name = %config.server.cookie_name,
        "HTTP server settings"
    );
    info!(
        selection = %config.sfu.selection,
        ice_servers = ?config.sfu.ice_servers,
        liveness_interval_secs = config.sfu.liveness_interval_secs,
        sweep_interval_secs = config.sfu.retention.sweep_interval_secs,
        "SFU settings"
    );
}
