//! Canonical connection status and the parse step that produces it.

use {
    serde::{Deserialize, Serialize, de::IgnoredAny},
    serde_json::Value,
};

use crate::registry::{AuthorityScope, ProviderDefinition, ProviderId};

/// Four-valued connection state shared by every provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionState {
    /// Not checked yet.
    #[default]
    Idle,
    /// Checked, no valid connection.
    NeedsAuth,
    Connected,
    Error,
}

impl ConnectionState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::NeedsAuth => "needs-auth",
            Self::Connected => "connected",
            Self::Error => "error",
        }
    }
}

/// Latest known status of one `(provider, scope)` connection.
///
/// Fields are private so that `account` can only be set on a connected
/// status and `detail` only on an errored one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    provider: ProviderId,
    level: AuthorityScope,
    state: ConnectionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    account: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

impl ConnectionStatus {
    #[must_use]
    pub fn idle(provider: ProviderId, level: AuthorityScope) -> Self {
        Self::bare(provider, level, ConnectionState::Idle)
    }

    #[must_use]
    pub fn needs_auth(provider: ProviderId, level: AuthorityScope) -> Self {
        Self::bare(provider, level, ConnectionState::NeedsAuth)
    }

    #[must_use]
    pub fn connected(provider: ProviderId, level: AuthorityScope, account: Option<String>) -> Self {
        Self {
            account,
            ..Self::bare(provider, level, ConnectionState::Connected)
        }
    }

    #[must_use]
    pub fn error(provider: ProviderId, level: AuthorityScope, detail: impl Into<String>) -> Self {
        Self {
            detail: Some(detail.into()),
            ..Self::bare(provider, level, ConnectionState::Error)
        }
    }

    fn bare(provider: ProviderId, level: AuthorityScope, state: ConnectionState) -> Self {
        Self {
            provider,
            level,
            state,
            account: None,
            detail: None,
        }
    }

    #[must_use]
    pub fn provider(&self) -> ProviderId {
        self.provider
    }

    #[must_use]
    pub fn level(&self) -> AuthorityScope {
        self.level
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    #[must_use]
    pub fn account(&self) -> Option<&str> {
        self.account.as_deref()
    }

    #[must_use]
    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }
}

/// Shapes the status endpoints reply with.
///
/// Untagged variants are tried in order: the current string field first,
/// then the legacy boolean, then anything else.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StatusShape {
    Current { status: String },
    Legacy { connected: bool },
    Unrecognized(IgnoredAny),
}

/// Map a raw status reply onto the canonical model.
#[must_use]
pub fn normalize(def: &ProviderDefinition, level: AuthorityScope, body: &Value) -> ConnectionStatus {
    let shape = StatusShape::deserialize(body).unwrap_or(StatusShape::Unrecognized(IgnoredAny));

    match shape {
        StatusShape::Current { status } => match status.trim().to_ascii_lowercase().as_str() {
            "connected" | "active" => {
                ConnectionStatus::connected(def.id, level, account_name(def, body))
            },
            "error" | "failed" => ConnectionStatus::error(
                def.id,
                level,
                error_detail(body).unwrap_or_else(|| "provider reported an error".into()),
            ),
            _ => ConnectionStatus::needs_auth(def.id, level),
        },
        StatusShape::Legacy { connected: true } => {
            ConnectionStatus::connected(def.id, level, account_name(def, body))
        },
        StatusShape::Legacy { connected: false } => ConnectionStatus::needs_auth(def.id, level),
        StatusShape::Unrecognized(_) => {
            ConnectionStatus::error(def.id, level, "unrecognized status response")
        },
    }
}

fn account_name(def: &ProviderDefinition, body: &Value) -> Option<String> {
    def.account_fields.iter().find_map(|field| non_empty_str(body, field))
}

fn error_detail(body: &Value) -> Option<String> {
    ["error", "message", "detail"]
        .iter()
        .find_map(|field| non_empty_str(body, field))
}

fn non_empty_str(body: &Value, field: &str) -> Option<String> {
    body.get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
}
