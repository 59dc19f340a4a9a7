//! Static provider table.
//!
//! Every provider-specific difference (scope, endpoints, how the connected
//! account is named in status replies, legacy names) lives in a
//! [`ProviderDefinition`]. Callers never branch on [`ProviderId`] directly.

use std::{collections::HashMap, fmt, str::FromStr};

use {
    bridgeway_config::ProviderEndpointOverride,
    serde::{Deserialize, Serialize},
    tracing::debug,
};

use crate::{Error, Result};

/// The closed set of providers the broker knows how to connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderId {
    Crm = 0,
    Chat = 1,
    FileStorage = 2,
    TaskTracker = 3,
    EmailA = 4,
    EmailB = 5,
}

impl ProviderId {
    /// Every id, ordered by discriminant.
    pub const ALL: [Self; 6] = [
        Self::Crm,
        Self::Chat,
        Self::FileStorage,
        Self::TaskTracker,
        Self::EmailA,
        Self::EmailB,
    ];

    /// Position of this id in [`ProviderId::ALL`].
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Crm => "crm",
            Self::Chat => "chat",
            Self::FileStorage => "file-storage",
            Self::TaskTracker => "task-tracker",
            Self::EmailA => "email-a",
            Self::EmailB => "email-b",
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = Error;

    /// Canonical ids only; aliases go through [`Registry::resolve`].
    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| Error::UnknownProvider { name: s.to_string() })
    }
}

/// Whether a connection belongs to the whole organization or to one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorityScope {
    Organization,
    User,
}

impl AuthorityScope {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Organization => "organization",
            Self::User => "user",
        }
    }
}

impl fmt::Display for AuthorityScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a provider gets connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    /// Detached-window consent flow.
    OAuthHandshake,
    /// User pastes a long-lived personal token.
    StaticToken,
}

/// Everything the broker needs to know about one provider.
#[derive(Debug, Clone)]
pub struct ProviderDefinition {
    pub id: ProviderId,
    pub display_name: &'static str,
    /// Scopes this provider can be connected at. The first one is the default.
    pub scopes: &'static [AuthorityScope],
    pub aliases: &'static [&'static str],
    pub auth_method: AuthMethod,
    /// Backend path returning the one-time authorization URL. `None` for
    /// static-token providers.
    pub start_endpoint: Option<String>,
    /// Backend path template for the status check; `{provider}` is replaced
    /// with the canonical id.
    pub status_endpoint: String,
    /// Backend path accepting a pasted personal token.
    pub token_endpoint: Option<String>,
    /// Fields of the status reply that name the connected account, most
    /// specific first.
    pub account_fields: &'static [&'static str],
}

impl ProviderDefinition {
    #[must_use]
    pub fn default_scope(&self) -> AuthorityScope {
        self.scopes
            .first()
            .copied()
            .unwrap_or(AuthorityScope::User)
    }

    #[must_use]
    pub fn supports(&self, scope: AuthorityScope) -> bool {
        self.scopes.contains(&scope)
    }

    #[must_use]
    pub fn status_path(&self) -> String {
        expand(&self.status_endpoint, self.id)
    }

    #[must_use]
    pub fn start_path(&self) -> Option<String> {
        self.start_endpoint.as_deref().map(|p| expand(p, self.id))
    }

    #[must_use]
    pub fn token_path(&self) -> Option<String> {
        self.token_endpoint.as_deref().map(|p| expand(p, self.id))
    }

    fn answers_to(&self, name: &str) -> bool {
        self.id.as_str() == name || self.aliases.contains(&name)
    }

    fn apply(&mut self, ov: &ProviderEndpointOverride) {
        if let Some(path) = &ov.start_endpoint {
            self.start_endpoint = Some(path.clone());
        }
        if let Some(path) = &ov.status_endpoint {
            self.status_endpoint = path.clone();
        }
        if let Some(path) = &ov.token_endpoint {
            self.token_endpoint = Some(path.clone());
        }
    }
}

fn expand(template: &str, id: ProviderId) -> String {
    template.replace("{provider}", id.as_str())
}

const ORG: &[AuthorityScope] = &[AuthorityScope::Organization];
const USER: &[AuthorityScope] = &[AuthorityScope::User];
const USER_OR_ORG: &[AuthorityScope] = &[AuthorityScope::User, AuthorityScope::Organization];

fn builtin_definition(id: ProviderId) -> ProviderDefinition {
    match id {
        ProviderId::Crm => ProviderDefinition {
            id,
            display_name: "CRM",
            scopes: ORG,
            aliases: &[],
            auth_method: AuthMethod::OAuthHandshake,
            start_endpoint: Some("/crm-oauth-start".into()),
            status_endpoint: "/crm-connection-status".into(),
            token_endpoint: None,
            account_fields: &["portal_name", "hub_domain", "account"],
        },
        ProviderId::Chat => ProviderDefinition {
            id,
            display_name: "Team Chat",
            scopes: USER,
            aliases: &["team-chat"],
            auth_method: AuthMethod::OAuthHandshake,
            start_endpoint: Some("/chat-oauth-start".into()),
            status_endpoint: "/chat-user-status".into(),
            token_endpoint: None,
            account_fields: &["team_name", "workspace", "account"],
        },
        ProviderId::FileStorage => ProviderDefinition {
            id,
            display_name: "File Storage",
            scopes: ORG,
            aliases: &["drive"],
            auth_method: AuthMethod::OAuthHandshake,
            start_endpoint: Some("/file-storage-oauth-start".into()),
            status_endpoint: "/file-storage-status".into(),
            token_endpoint: None,
            account_fields: &["email", "account"],
        },
        ProviderId::TaskTracker => ProviderDefinition {
            id,
            display_name: "Task Tracker",
            scopes: USER,
            aliases: &["tasks"],
            auth_method: AuthMethod::StaticToken,
            start_endpoint: None,
            status_endpoint: "/task-tracker-status".into(),
            token_endpoint: Some("/task-tracker-token".into()),
            account_fields: &["site", "user_name", "account"],
        },
        ProviderId::EmailA => ProviderDefinition {
            id,
            display_name: "Email (primary)",
            scopes: USER_OR_ORG,
            // Single-mailbox builds called this provider "email".
            aliases: &["email"],
            auth_method: AuthMethod::OAuthHandshake,
            start_endpoint: Some("/email-oauth-start/{provider}".into()),
            status_endpoint: "/email-status/{provider}".into(),
            token_endpoint: None,
            account_fields: &["email", "address", "account"],
        },
        ProviderId::EmailB => ProviderDefinition {
            id,
            display_name: "Email (secondary)",
            scopes: USER_OR_ORG,
            aliases: &["mail-b"],
            auth_method: AuthMethod::OAuthHandshake,
            start_endpoint: Some("/email-oauth-start/{provider}".into()),
            status_endpoint: "/email-status/{provider}".into(),
            token_endpoint: None,
            account_fields: &["email", "address", "account"],
        },
    }
}

/// Process-wide provider lookup. Pure, no I/O.
#[derive(Debug, Clone)]
pub struct Registry {
    /// Indexed by [`ProviderId::index`].
    definitions: [ProviderDefinition; 6],
}

impl Registry {
    #[must_use]
    pub fn builtin() -> Self {
        Self {
            definitions: ProviderId::ALL.map(builtin_definition),
        }
    }

    /// Built-in table with per-provider endpoint overrides from config.
    ///
    /// Override keys go through [`Registry::resolve`], so aliases work; unknown
    /// keys are reported.
    pub fn with_overrides(overrides: &HashMap<String, ProviderEndpointOverride>) -> Result<Self> {
        let mut registry = Self::builtin();
        for (name, ov) in overrides {
            let id = registry.resolve(name)?.id;
            debug!(provider = %id, "applying endpoint override");
            registry.entry_mut(id).apply(ov);
        }
        Ok(registry)
    }

    /// Look up a provider by canonical id or alias (case-insensitive).
    pub fn resolve(&self, name: &str) -> Result<&ProviderDefinition> {
        let needle = name.trim().to_ascii_lowercase();
        self.definitions
            .iter()
            .find(|d| d.answers_to(&needle))
            .ok_or_else(|| Error::UnknownProvider {
                name: name.to_string(),
            })
    }

    #[must_use]
    pub fn get(&self, id: ProviderId) -> &ProviderDefinition {
        &self.definitions[id.index()]
    }

    #[must_use]
    pub fn scope_of(&self, id: ProviderId) -> AuthorityScope {
        self.get(id).default_scope()
    }

    pub fn definitions(&self) -> impl Iterator<Item = &ProviderDefinition> {
        self.definitions.iter()
    }

    fn entry_mut(&mut self, id: ProviderId) -> &mut ProviderDefinition {
        &mut self.definitions[id.index()]
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_id_indexes_its_own_definition() {
        let mut overrides = HashMap::new();
        overrides.insert("tasks".to_string(), ProviderEndpointOverride {
            token_endpoint: Some("/tokens/{provider}".into()),
            ..Default::default()
        });
        let overridden = Registry::with_overrides(&overrides).unwrap();

        for id in ProviderId::ALL {
            assert_eq!(ProviderId::ALL[id.index()], id);
            assert_eq!(Registry::builtin().get(id).id, id);
            assert_eq!(overridden.get(id).id, id);
        }
        assert_eq!(
            overridden.get(ProviderId::TaskTracker).token_path().as_deref(),
            Some("/tokens/task-tracker")
        );
        assert_eq!(overridden.definitions().count(), ProviderId::ALL.len());
    }

    #[test]
    fn resolve_canonical_and_alias() {
        let registry = Registry::builtin();
        assert_eq!(registry.resolve("chat").unwrap().id, ProviderId::Chat);
        assert_eq!(registry.resolve("email").unwrap().id, ProviderId::EmailA);
        assert_eq!(registry.resolve(" Drive ").unwrap().id, ProviderId::FileStorage);
    }

    #[test]
    fn resolve_unknown_is_distinct_error() {
        let registry = Registry::builtin();
        for name in ["", "calendar", "crm2", "email-c"] {
            let err = registry.resolve(name).unwrap_err();
            assert!(matches!(err, Error::UnknownProvider { .. }), "{name}");
        }
    }

    #[test]
    fn scope_of_uses_first_scope() {
        let registry = Registry::builtin();
        assert_eq!(registry.scope_of(ProviderId::Crm), AuthorityScope::Organization);
        assert_eq!(registry.scope_of(ProviderId::Chat), AuthorityScope::User);
        assert_eq!(registry.scope_of(ProviderId::EmailB), AuthorityScope::User);
        assert!(registry.get(ProviderId::EmailB).supports(AuthorityScope::Organization));
        assert!(!registry.get(ProviderId::Chat).supports(AuthorityScope::Organization));
    }

    #[test]
    fn only_task_tracker_uses_static_token() {
        let registry = Registry::builtin();
        for def in registry.definitions() {
            let is_token = def.auth_method == AuthMethod::StaticToken;
            assert_eq!(is_token, def.id == ProviderId::TaskTracker);
            assert_eq!(is_token, def.start_endpoint.is_none());
            assert_eq!(is_token, def.token_endpoint.is_some());
        }
    }

    #[test]
    fn templates_expand_provider() {
        let registry = Registry::builtin();
        assert_eq!(
            registry.get(ProviderId::EmailB).status_path(),
            "/email-status/email-b"
        );
        assert_eq!(
            registry.get(ProviderId::EmailA).start_path().as_deref(),
            Some("/email-oauth-start/email-a")
        );
        assert_eq!(registry.get(ProviderId::Crm).status_path(), "/crm-connection-status");
    }

    #[test]
    fn overrides_replace_endpoints_by_alias() {
        let mut overrides = HashMap::new();
        overrides.insert("email".to_string(), ProviderEndpointOverride {
            status_endpoint: Some("/mail/{provider}/health".into()),
            ..Default::default()
        });
        let registry = Registry::with_overrides(&overrides).unwrap();
        assert_eq!(
            registry.get(ProviderId::EmailA).status_path(),
            "/mail/email-a/health"
        );
        assert_eq!(
            registry.get(ProviderId::EmailB).status_path(),
            "/email-status/email-b"
        );
    }

    #[test]
    fn overrides_reject_unknown_provider() {
        let mut overrides = HashMap::new();
        overrides.insert("fax".to_string(), ProviderEndpointOverride::default());
        assert!(Registry::with_overrides(&overrides).is_err());
    }

    #[test]
    fn provider_id_serde_is_kebab_case() {
        assert_eq!(
            serde_json::to_string(&ProviderId::FileStorage).unwrap(),
            "\"file-storage\""
        );
        assert_eq!("email-b".parse::<ProviderId>().unwrap(), ProviderId::EmailB);
        assert!("email".parse::<ProviderId>().is_err());
    }
}
