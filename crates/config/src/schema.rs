/// Config schema types for the connection broker.
use std::{collections::HashMap, time::Duration};

use {secrecy::Secret, serde::Deserialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub backend: BackendConfig,
    pub app: AppConfig,
    pub handshake: HandshakeConfig,
    /// Per-provider endpoint overrides, keyed by provider id.
    pub providers: HashMap<String, ProviderEndpointOverride>,
}

/// Where the backend functions live and how to reach them.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL every endpoint path is joined onto.
    pub base_url: String,
    /// Project key sent as the `apikey` header on every backend request.
    pub api_key: Option<Secret<String>>,
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:54321/functions/v1".into(),
            api_key: None,
            timeout_secs: 30,
        }
    }
}

impl BackendConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// The application's own identity on the web.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Scheme, host and port of the application. Signals from any other
    /// origin are dropped.
    pub origin: String,
    /// Return address the provider redirects to after consent.
    pub callback_path: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            origin: "http://localhost:3000".into(),
            callback_path: "/integrations/callback".into(),
        }
    }
}

impl AppConfig {
    /// Absolute callback URL handed to the backend as the return address.
    #[must_use]
    pub fn callback_url(&self) -> String {
        format!(
            "{}{}",
            self.origin.trim_end_matches('/'),
            self.callback_path
        )
    }
}

/// Popup geometry and the bounded status poll that runs during a handshake.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HandshakeConfig {
    pub poll_interval_ms: u64,
    pub poll_duration_ms: u64,
    pub popup_width: u32,
    pub popup_height: u32,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2_000,
            poll_duration_ms: 120_000,
            popup_width: 600,
            popup_height: 700,
        }
    }
}

impl HandshakeConfig {
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[must_use]
    pub fn poll_duration(&self) -> Duration {
        Duration::from_millis(self.poll_duration_ms)
    }
}

/// Replacement backend paths for a single provider.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProviderEndpointOverride {
    pub start_endpoint: Option<String>,
    pub status_endpoint: Option<String>,
    pub token_endpoint: Option<String>,
}
