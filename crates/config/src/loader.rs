use std::path::{Path, PathBuf};

use {
    secrecy::Secret,
    tracing::{debug, warn},
};

use crate::{
    Error, Result,
    env_subst::substitute_env,
    schema::BrokerConfig,
};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "bridgeway.toml",
    "bridgeway.yaml",
    "bridgeway.yml",
    "bridgeway.json",
];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> Result<BrokerConfig> {
    let raw = std::fs::read_to_string(path).map_err(|source| Error::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations, then apply
/// `BRIDGEWAY_*` environment overrides.
///
/// Search order:
/// 1. `./bridgeway.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/bridgeway/bridgeway.{toml,yaml,yml,json}` (user-global)
///
/// Falls back to `BrokerConfig::default()` if no file is found or it fails to parse.
pub fn discover_and_load() -> BrokerConfig {
    let mut config = match find_config_file() {
        Some(path) => {
            debug!(path = %path.display(), "loading broker config");
            load_config(&path).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
                BrokerConfig::default()
            })
        },
        None => {
            debug!("no config file found, using defaults");
            BrokerConfig::default()
        },
    };
    apply_env_overrides(&mut config, |name| std::env::var(name).ok());
    config
}

/// Override individual fields from `BRIDGEWAY_*` variables.
pub fn apply_env_overrides(config: &mut BrokerConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("BRIDGEWAY_BACKEND_URL") {
        config.backend.base_url = v;
    }
    if let Some(v) = lookup("BRIDGEWAY_BACKEND_API_KEY") {
        config.backend.api_key = Some(Secret::new(v));
    }
    if let Some(v) = lookup("BRIDGEWAY_APP_ORIGIN") {
        config.app.origin = v;
    }
    if let Some(v) = lookup("BRIDGEWAY_CALLBACK_PATH") {
        config.app.callback_path = v;
    }
}

fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    let dir = config_dir()?;
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

/// Returns the user-global config directory (`~/.config/bridgeway/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "bridgeway").map(|d| d.config_dir().to_path_buf())
}

fn parse_config(raw: &str, path: &Path) -> Result<BrokerConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        other => Err(Error::UnsupportedFormat {
            extension: other.to_string(),
        }),
    }
}
