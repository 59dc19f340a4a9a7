//! Broker configuration loading, env substitution, overrides and validation.
//!
//! Config files: `bridgeway.toml`, `bridgeway.yaml`, or `bridgeway.json`
//! Searched in `./` then `~/.config/bridgeway/`.
//!
//! Supports `${ENV_VAR}` and `${ENV_VAR:-fallback}` substitution in the raw text.

pub mod env_subst;
pub mod error;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    error::{Error, Result},
    loader::{apply_env_overrides, config_dir, discover_and_load, load_config},
    schema::{
        AppConfig, BackendConfig, BrokerConfig, HandshakeConfig, ProviderEndpointOverride,
    },
    validate::{Diagnostic, Severity, ValidationResult, validate},
};
