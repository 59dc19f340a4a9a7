//! Obtains one-time authorization URLs and guards single-flight per
//! `(provider, scope)`.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};

use tracing::{debug, warn};

use crate::{
    Error, Result,
    backend::{BackendClient, StartRequest},
    cache::CacheKey,
    error::Context,
    registry::{AuthMethod, AuthorityScope, ProviderDefinition, ProviderId},
    session::{ScopeContext, SessionSource},
};

pub struct AuthorizationDispatcher {
    backend: Arc<BackendClient>,
    session: Arc<dyn SessionSource>,
    callback_url: String,
    in_flight: Arc<Mutex<HashSet<CacheKey>>>,
}

impl AuthorizationDispatcher {
    #[must_use]
    pub fn new(
        backend: Arc<BackendClient>,
        session: Arc<dyn SessionSource>,
        callback_url: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            session,
            callback_url: callback_url.into(),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Everything that can be rejected without touching the network.
    pub fn check_preconditions(
        def: &ProviderDefinition,
        level: AuthorityScope,
        ctx: &ScopeContext,
    ) -> Result<()> {
        if def.auth_method != AuthMethod::OAuthHandshake {
            return Err(Error::NotHandshakeProvider { provider: def.id });
        }
        if !def.supports(level) {
            return Err(Error::UnsupportedScope {
                provider: def.id,
                scope: level,
            });
        }
        if level == AuthorityScope::Organization && ctx.organization_id().is_none() {
            return Err(Error::MissingScopeContext { provider: def.id });
        }
        Ok(())
    }

    /// Claim the single handshake slot for `(provider, level)`.
    pub fn reserve(&self, provider: ProviderId, level: AuthorityScope) -> Result<FlightSlot> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !in_flight.insert((provider, level)) {
            warn!(%provider, scope = %level, "handshake already pending");
            return Err(Error::HandshakeInProgress {
                provider,
                scope: level,
            });
        }
        Ok(FlightSlot {
            in_flight: Arc::clone(&self.in_flight),
            key: (provider, level),
        })
    }

    #[must_use]
    pub fn is_pending(&self, provider: ProviderId, level: AuthorityScope) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&(provider, level))
    }

    /// Ask the backend for the provider's authorization URL.
    ///
    /// Does not repeat [`Self::check_preconditions`]; callers run it before
    /// reserving the slot. Any backend or transport failure becomes
    /// [`Error::AuthorizationUrlUnavailable`] carrying the backend's message.
    pub async fn authorization_url(
        &self,
        def: &ProviderDefinition,
        level: AuthorityScope,
        ctx: &ScopeContext,
    ) -> Result<String> {
        let path = def
            .start_path()
            .with_context(|| format!("{} has no start endpoint", def.id))?;
        let token = self
            .session
            .access_token()
            .await
            .ok_or(Error::MissingSession)?;

        let request = StartRequest {
            provider: def.id,
            scope: level,
            organization_id: match level {
                AuthorityScope::Organization => ctx.organization_id(),
                AuthorityScope::User => None,
            },
            project_id: ctx.project_id.as_deref(),
            redirect_to: &self.callback_url,
        };

        let url = self
            .backend
            .start_authorization(&path, &token, &request)
            .await
            .map_err(|e| Error::AuthorizationUrlUnavailable {
                provider: def.id,
                message: match e {
                    Error::Backend { message, .. } => message,
                    other => other.to_string(),
                },
            })?;

        if url.trim().is_empty() {
            return Err(Error::AuthorizationUrlUnavailable {
                provider: def.id,
                message: "backend returned an empty authorization url".into(),
            });
        }
        debug!(provider = %def.id, scope = %level, "authorization url obtained");
        Ok(url)
    }
}

/// Held for the lifetime of one handshake attempt; releases the slot on drop.
pub struct FlightSlot {
    in_flight: Arc<Mutex<HashSet<CacheKey>>>,
    key: CacheKey,
}

impl Drop for FlightSlot {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.key);
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{registry::Registry, session::StaticSession},
        bridgeway_config::BackendConfig,
        mockito::Matcher,
    };

    fn dispatcher(url: String) -> AuthorizationDispatcher {
        let backend = BackendClient::new(&BackendConfig {
            base_url: url,
            api_key: None,
            timeout_secs: 5,
        })
        .unwrap();
        AuthorizationDispatcher::new(
            Arc::new(backend),
            Arc::new(StaticSession::new("session-tok")),
            "https://app.example.com/integrations/callback",
        )
    }

    #[test]
    fn organization_scope_needs_org_id() {
        let registry = Registry::builtin();
        for def in registry
            .definitions()
            .filter(|d| d.auth_method == AuthMethod::OAuthHandshake)
            .filter(|d| d.supports(AuthorityScope::Organization))
        {
            let err = AuthorizationDispatcher::check_preconditions(
                def,
                AuthorityScope::Organization,
                &ScopeContext::user().with_project("p1"),
            )
            .unwrap_err();
            assert!(matches!(err, Error::MissingScopeContext { .. }), "{}", def.id);
        }
    }

    #[test]
    fn static_token_and_wrong_scope_rejected() {
        let registry = Registry::builtin();
        assert!(matches!(
            AuthorizationDispatcher::check_preconditions(
                registry.get(ProviderId::TaskTracker),
                AuthorityScope::User,
                &ScopeContext::user(),
            ),
            Err(Error::NotHandshakeProvider { .. })
        ));
        assert!(matches!(
            AuthorizationDispatcher::check_preconditions(
                registry.get(ProviderId::Chat),
                AuthorityScope::Organization,
                &ScopeContext::organization("org_1"),
            ),
            Err(Error::UnsupportedScope { .. })
        ));
    }

    #[test]
    fn single_flight_per_provider_and_scope() {
        let dispatcher = dispatcher("http://127.0.0.1:9".into());
        let slot = dispatcher
            .reserve(ProviderId::EmailA, AuthorityScope::User)
            .unwrap();

        assert!(matches!(
            dispatcher.reserve(ProviderId::EmailA, AuthorityScope::User),
            Err(Error::HandshakeInProgress { .. })
        ));
        let other_scope = dispatcher
            .reserve(ProviderId::EmailA, AuthorityScope::Organization)
            .unwrap();

        drop(slot);
        assert!(!dispatcher.is_pending(ProviderId::EmailA, AuthorityScope::User));
        assert!(dispatcher.is_pending(ProviderId::EmailA, AuthorityScope::Organization));
        drop(other_scope);
    }

    #[tokio::test]
    async fn org_request_carries_org_and_project() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/crm-oauth-start")
            .match_header("authorization", "Bearer session-tok")
            .match_body(Matcher::Json(serde_json::json!({
                "provider": "crm",
                "scope": "organization",
                "organization_id": "org_1",
                "project_id": "proj_2",
                "redirect_to": "https://app.example.com/integrations/callback"
            })))
            .with_status(200)
            .with_body(r#"{"authorize_url":"https://crm.example.com/oauth/authorize?state=abc"}"#)
            .create_async()
            .await;

        let registry = Registry::builtin();
        let url = dispatcher(server.url())
            .authorization_url(
                registry.get(ProviderId::Crm),
                AuthorityScope::Organization,
                &ScopeContext::organization("org_1").with_project("proj_2"),
            )
            .await
            .unwrap();

        assert_eq!(url, "https://crm.example.com/oauth/authorize?state=abc");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn backend_error_becomes_url_unavailable() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat-oauth-start")
            .with_status(401)
            .with_body(r#"{"message":"session expired"}"#)
            .create_async()
            .await;

        let registry = Registry::builtin();
        let err = dispatcher(server.url())
            .authorization_url(registry.get(ProviderId::Chat), AuthorityScope::User, &ScopeContext::user())
            .await
            .unwrap_err();

        match err {
            Error::AuthorizationUrlUnavailable { provider, message } => {
                assert_eq!(provider, ProviderId::Chat);
                assert_eq!(message, "session expired");
            },
            other => panic!("unexpected error: {other}"),
        }
    }
}
