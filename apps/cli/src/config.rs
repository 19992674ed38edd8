//! CLI configuration loading.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use strata_core::StrataConfig;

/// Local configuration file, looked up in the current directory.
pub const LOCAL_CONFIG: &str = "strata.toml";

/// Global configuration file path (~/.strata/config.toml).
pub fn default_global_path() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(".strata")
        .join("config.toml")
}

/// Load run configuration.
///
/// Precedence:
/// 1. CLI arguments (applied by each command)
/// 2. `--config <path>`, which must exist
/// 3. Local config file (./strata.toml)
/// 4. Global config file (~/.strata/config.toml)
/// 5. Defaults
pub fn load_config(explicit: Option<&Path>) -> Result<StrataConfig> {
    if let Some(path) = explicit {
        return StrataConfig::load_from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()));
    }

    for candidate in [PathBuf::from(LOCAL_CONFIG), default_global_path()] {
        if candidate.is_file() {
            tracing::debug!(path = %candidate.display(), "loading configuration");
            return StrataConfig::load_from_file(&candidate).with_context(|| {
                format!("Failed to load configuration from {}", candidate.display())
            });
        }
    }

    Ok(StrataConfig::default())
}
