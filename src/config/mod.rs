mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = [
        "./pkgferry.toml",
        "~/.config/pkgferry/config.toml",
        "/etc/pkgferry/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            tracing::debug!("Using config file {:?}", path);
            return load_config(path);
        }
    }

    Ok(Config::default())
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    let url = &config.server.url;
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        anyhow::bail!("Server url must start with http:// or https://, got '{}'", url);
    }

    let threshold = config.upload.completion_threshold;
    if !(threshold > 0.0 && threshold <= 100.0) {
        anyhow::bail!(
            "upload.completion_threshold must be in (0, 100], got {}",
            threshold
        );
    }

    if config.upload.min_pending_promotion == 0 {
        anyhow::bail!("upload.min_pending_promotion must be at least 1");
    }

    if config.server.connect_timeout_secs == 0 {
        tracing::warn!("server.connect_timeout_secs is 0, connections will fail immediately");
    }

    Ok(())
}
