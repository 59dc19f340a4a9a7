use std::error::Error as StdError;

use crate::registry::{AuthorityScope, ProviderId};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unknown provider: {name}")]
    UnknownProvider { name: String },

    #[error("{provider} requires an organization id at organization scope")]
    MissingScopeContext { provider: ProviderId },

    #[error("{provider} cannot be connected at {scope} scope")]
    UnsupportedScope {
        provider: ProviderId,
        scope: AuthorityScope,
    },

    #[error("no active session")]
    MissingSession,

    #[error("the authorization window for {provider} was blocked; allow pop-ups and try again")]
    PopupBlocked { provider: ProviderId },

    #[error("could not start authorization for {provider}: {message}")]
    AuthorizationUrlUnavailable {
        provider: ProviderId,
        message: String,
    },

    #[error("{provider} denied authorization: {message}")]
    ProviderDenied {
        provider: ProviderId,
        message: String,
    },

    #[error("an authorization for {provider} at {scope} scope is already in progress")]
    HandshakeInProgress {
        provider: ProviderId,
        scope: AuthorityScope,
    },

    #[error("authorization for {provider} was not completed")]
    HandshakeAbandoned { provider: ProviderId },

    #[error("{provider} is connected with a personal token, not a handshake")]
    NotHandshakeProvider { provider: ProviderId },

    #[error("{provider} does not accept personal tokens")]
    NotTokenProvider { provider: ProviderId },

    #[error("token must not be empty")]
    EmptyToken,

    #[error("{endpoint} failed: {message}")]
    Backend { endpoint: String, message: String },

    #[error("failed to disconnect {provider}: {message}")]
    Disconnect {
        provider: ProviderId,
        message: String,
    },

    #[error("{0}")]
    Message(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("{context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }

    #[must_use]
    pub fn external<E>(context: impl Into<String>, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Whether the user can reasonably try the same action again.
    ///
    /// Caller bugs and blocked pop-ups are not retryable without a code or
    /// browser-settings change.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::AuthorizationUrlUnavailable { .. }
                | Self::ProviderDenied { .. }
                | Self::HandshakeAbandoned { .. }
                | Self::Backend { .. }
                | Self::Disconnect { .. }
                | Self::Http(_)
        )
    }
}

impl bridgeway_common::FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message(message)
    }
}

bridgeway_common::impl_context!();

pub type Result<T> = std::result::Result<T, Error>;
