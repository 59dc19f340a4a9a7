use {async_trait::async_trait, secrecy::Secret};

/// Caller-supplied scope for a broker call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeContext {
    pub organization_id: Option<String>,
    pub project_id: Option<String>,
}

impl ScopeContext {
    /// No organization: only user-scoped operations will succeed.
    #[must_use]
    pub fn user() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn organization(id: impl Into<String>) -> Self {
        Self {
            organization_id: Some(id.into()),
            project_id: None,
        }
    }

    #[must_use]
    pub fn with_project(mut self, id: impl Into<String>) -> Self {
        self.project_id = Some(id.into());
        self
    }

    /// Organization id, ignoring blank strings.
    #[must_use]
    pub fn organization_id(&self) -> Option<&str> {
        self.organization_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }
}

/// Source of the signed-in user's session credential.
#[async_trait]
pub trait SessionSource: Send + Sync {
    /// Current access token, or `None` when nobody is signed in.
    async fn access_token(&self) -> Option<Secret<String>>;
}

/// A session whose token never changes. Handy for tests and scripts.
#[derive(Default)]
pub struct StaticSession {
    token: Option<Secret<String>>,
}

impl StaticSession {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(Secret::new(token.into())),
        }
    }

    #[must_use]
    pub fn signed_out() -> Self {
        Self { token: None }
    }
}

#[async_trait]
impl SessionSource for StaticSession {
    async fn access_token(&self) -> Option<Secret<String>> {
        self.token.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_organization_counts_as_missing() {
        let ctx = ScopeContext::organization("  ");
        assert_eq!(ctx.organization_id(), None);
        assert_eq!(
            ScopeContext::organization("org_1").organization_id(),
            Some("org_1")
        );
    }

    #[test]
    fn with_project_keeps_organization() {
        let ctx = ScopeContext::organization("org_1").with_project("proj_9");
        assert_eq!(ctx.project_id.as_deref(), Some("proj_9"));
        assert_eq!(ctx.organization_id(), Some("org_1"));
    }
}
