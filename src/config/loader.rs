use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use eyre::{Context, Result};

use crate::config::{models::GatewayConfig, validation::GatewayConfigValidator};

/// Prefix for environment overrides, e.g. `BULWARK_BASE_URL` or
/// `BULWARK_HEALTH_CHECK__INTERVAL_SECS`.
pub const ENV_PREFIX: &str = "BULWARK";

fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

/// Load and validate configuration from a file, with environment overrides.
/// Supports multiple formats: YAML, JSON, TOML, INI.
pub async fn load_config(config_path: &str) -> Result<GatewayConfig> {
    let config = load_config_unchecked(config_path).await?;
    GatewayConfigValidator::validate(&config)
        .wrap_err_with(|| format!("Invalid configuration in {config_path}"))?;
    Ok(config)
}

/// Load configuration without validation (used for the validate command)
pub async fn load_config_unchecked(config_path: &str) -> Result<GatewayConfig> {
    load_config_sync(config_path)
}

/// Load configuration synchronously
pub fn load_config_sync(config_path: &str) -> Result<GatewayConfig> {
    let config_path = Path::new(config_path);

    // Determine file format based on extension
    let format = match config_path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => FileFormat::Yaml,
        Some("json") => FileFormat::Json,
        Some("toml") => FileFormat::Toml,
        Some("ini") => FileFormat::Ini,
        _ => FileFormat::Yaml,
    };

    let settings = Config::builder()
        .add_source(File::new(
            config_path
                .to_str()
                .ok_or_else(|| eyre::eyre!("Invalid UTF-8 path: {}", config_path.display()))?,
            format,
        ))
        .add_source(env_source())
        .build()
        .with_context(|| format!("Failed to build config from {}", config_path.display()))?;

    let gateway_config: GatewayConfig = settings.try_deserialize().with_context(|| {
        format!(
            "Failed to deserialize config from {}",
            config_path.display()
        )
    })?;

    Ok(gateway_config)
}

/// Load configuration purely from `BULWARK_*` environment variables.
pub fn load_config_from_env() -> Result<GatewayConfig> {
    let settings = Config::builder()
        .add_source(env_source())
        .build()
        .context("Failed to build config from environment")?;

    let gateway_config: GatewayConfig = settings
        .try_deserialize()
        .context("Failed to deserialize config from environment (is BULWARK_BASE_URL set?)")?;

    GatewayConfigValidator::validate(&gateway_config)
        .context("Invalid configuration in environment")?;
    Ok(gateway_config)
}
