use std::sync::Arc;

use tracing::{debug, warn};

#[cfg(feature = "metrics")]
use bridgeway_metrics::{connect as connect_metrics, counter, labels};

use crate::{
    backend::{BackendClient, StatusAuth},
    registry::{AuthorityScope, ProviderDefinition},
    session::{ScopeContext, SessionSource},
    status::{ConnectionStatus, normalize},
};

/// Queries status endpoints and folds every reply into [`ConnectionStatus`].
///
/// Never fails. Network errors, non-2xx replies and unparsable bodies all
/// become an `error` status carrying the failure as detail.
pub struct StatusNormalizer {
    backend: Arc<BackendClient>,
    session: Arc<dyn SessionSource>,
}

impl StatusNormalizer {
    #[must_use]
    pub fn new(backend: Arc<BackendClient>, session: Arc<dyn SessionSource>) -> Self {
        Self { backend, session }
    }

    pub async fn check(
        &self,
        def: &ProviderDefinition,
        level: AuthorityScope,
        ctx: &ScopeContext,
    ) -> ConnectionStatus {
        let status = self.query(def, level, ctx).await;

        #[cfg(feature = "metrics")]
        counter!(
            connect_metrics::STATUS_CHECKS_TOTAL,
            labels::PROVIDER => def.id.as_str(),
            labels::STATE => status.state().as_str()
        )
        .increment(1);

        status
    }

    async fn query(
        &self,
        def: &ProviderDefinition,
        level: AuthorityScope,
        ctx: &ScopeContext,
    ) -> ConnectionStatus {
        if !def.supports(level) {
            return ConnectionStatus::error(
                def.id,
                level,
                format!("{} cannot be connected at {level} scope", def.display_name),
            );
        }

        let path = def.status_path();
        let result = match level {
            AuthorityScope::Organization => {
                let Some(organization_id) = ctx.organization_id() else {
                    return ConnectionStatus::error(def.id, level, "organization id required");
                };
                self.backend
                    .fetch_status(&path, StatusAuth::Organization(organization_id))
                    .await
            },
            AuthorityScope::User => {
                let Some(token) = self.session.access_token().await else {
                    return ConnectionStatus::error(def.id, level, "no active session");
                };
                self.backend
                    .fetch_status(&path, StatusAuth::Bearer(&token))
                    .await
            },
        };

        match result {
            Ok(body) => {
                let status = normalize(def, level, &body);
                debug!(provider = %def.id, scope = %level, state = status.state().as_str(), "status checked");
                status
            },
            Err(e) => {
                warn!(provider = %def.id, scope = %level, error = %e, "status check failed");
                ConnectionStatus::error(def.id, level, e.to_string())
            },
        }
    }
}
