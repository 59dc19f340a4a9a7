//! The broker: one object the UI talks to.
//!
//! Owns the registry, the signal bus, the handshake channel, the status
//! normalizer and the cache, and wires the refresh triggers between them.

use std::{sync::Arc, time::Duration};

use {
    bridgeway_config::{BrokerConfig, Severity, validate},
    futures::future::join_all,
    secrecy::{ExposeSecret, Secret},
    serde::Serialize,
    tokio::{sync::broadcast, time::MissedTickBehavior},
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use bridgeway_metrics::{connect as connect_metrics, counter, histogram, labels};

use crate::{
    Error, Result,
    backend::{BackendClient, RevokeRequest, TokenRequest},
    cache::ConnectionCache,
    dispatcher::AuthorizationDispatcher,
    error::Context,
    handshake::{Handshake, HandshakeChannel},
    normalizer::StatusNormalizer,
    registry::{AuthMethod, AuthorityScope, ProviderDefinition, ProviderId, Registry},
    session::{ScopeContext, SessionSource, StaticSession},
    signal::{SignalBus, SignalReply, SignalStatus},
    status::ConnectionStatus,
    store::{ConnectionStore, StoreKey},
    window::{SystemBrowser, WindowHost},
};

/// What resolved a successful handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeSource {
    /// The relay posted a success signal.
    Signal,
    /// The bounded status poll saw the connection before any signal arrived.
    Poll,
}

/// A completed authorization.
#[derive(Debug, Clone, Serialize)]
pub struct HandshakeOutcome {
    pub provider: ProviderId,
    pub scope: AuthorityScope,
    /// Status after the post-handshake refresh.
    pub status: ConnectionStatus,
    /// Free-form message carried by the signal, if any.
    pub message: Option<String>,
    pub source: OutcomeSource,
}

pub struct BrokerBuilder {
    config: BrokerConfig,
    session: Option<Arc<dyn SessionSource>>,
    store: Option<Arc<dyn ConnectionStore>>,
    host: Option<Arc<dyn WindowHost>>,
}

impl BrokerBuilder {
    #[must_use]
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            session: None,
            store: None,
            host: None,
        }
    }

    #[must_use]
    pub fn session(mut self, session: Arc<dyn SessionSource>) -> Self {
        self.session = Some(session);
        self
    }

    #[must_use]
    pub fn store(mut self, store: Arc<dyn ConnectionStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn window_host(mut self, host: Arc<dyn WindowHost>) -> Self {
        self.host = Some(host);
        self
    }

    /// Build the broker. Defaults: signed-out session and the system browser
    /// as window host. A connection store must be supplied.
    pub fn build(self) -> Result<Broker> {
        let Self {
            config,
            session,
            store,
            host,
        } = self;

        let report = validate(&config);
        for diagnostic in &report.diagnostics {
            warn!(%diagnostic, "broker configuration");
        }
        if report.has_errors() {
            let errors: Vec<String> = report
                .diagnostics
                .iter()
                .filter(|d| d.severity == Severity::Error)
                .map(ToString::to_string)
                .collect();
            return Err(Error::message(format!(
                "invalid broker configuration: {}",
                errors.join("; ")
            )));
        }

        let registry = Arc::new(Registry::with_overrides(&config.providers)?);
        let backend = Arc::new(BackendClient::new(&config.backend)?);
        let session = session.unwrap_or_else(|| Arc::new(StaticSession::signed_out()));
        let store = store.ok_or_else(|| Error::message("a connection store is required"))?;
        let host = host.unwrap_or_else(|| Arc::new(SystemBrowser));

        let bus = Arc::new(SignalBus::new(config.app.origin.as_str(), Arc::clone(&registry)));
        let channel = HandshakeChannel::new(
            bus,
            host,
            config.handshake.popup_width,
            config.handshake.popup_height,
        );
        let dispatcher = AuthorizationDispatcher::new(
            Arc::clone(&backend),
            Arc::clone(&session),
            config.app.callback_url(),
        );
        let normalizer = StatusNormalizer::new(Arc::clone(&backend), Arc::clone(&session));

        debug!(
            origin = %config.app.origin,
            backend = %config.backend.base_url,
            "connection broker ready"
        );

        Ok(Broker {
            registry,
            backend,
            session,
            store,
            dispatcher,
            channel,
            normalizer,
            cache: ConnectionCache::new(),
            poll_interval: config.handshake.poll_interval(),
            poll_duration: config.handshake.poll_duration(),
        })
    }
}

pub struct Broker {
    registry: Arc<Registry>,
    backend: Arc<BackendClient>,
    session: Arc<dyn SessionSource>,
    store: Arc<dyn ConnectionStore>,
    dispatcher: AuthorizationDispatcher,
    channel: HandshakeChannel,
    normalizer: StatusNormalizer,
    cache: ConnectionCache,
    poll_interval: Duration,
    poll_duration: Duration,
}

impl Broker {
    #[must_use]
    pub fn builder(config: BrokerConfig) -> BrokerBuilder {
        BrokerBuilder::new(config)
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Look up a provider by id or alias. Never touches the network.
    pub fn resolve(&self, name: &str) -> Result<&ProviderDefinition> {
        self.registry.resolve(name)
    }

    /// The bus the host feeds cross-window messages into.
    #[must_use]
    pub fn signal_bus(&self) -> &Arc<SignalBus> {
        self.channel.bus()
    }

    #[must_use]
    pub fn cache(&self) -> &ConnectionCache {
        &self.cache
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionStatus> {
        self.cache.subscribe()
    }

    /// Whether a handshake for `(provider, level)` is in flight.
    #[must_use]
    pub fn is_pending(&self, provider: ProviderId, level: AuthorityScope) -> bool {
        self.dispatcher.is_pending(provider, level)
    }

    /// Run one authorization handshake to completion.
    ///
    /// Resolves on a success signal, or when the bounded poll sees the
    /// connection. Fails with [`Error::ProviderDenied`] on an error signal and
    /// with [`Error::HandshakeAbandoned`] once the window is closed or the
    /// poll window elapses without either.
    pub async fn begin_authorization(
        &self,
        provider: ProviderId,
        level: AuthorityScope,
        ctx: &ScopeContext,
    ) -> Result<HandshakeOutcome> {
        let def = self.registry.get(provider);
        AuthorizationDispatcher::check_preconditions(def, level, ctx)?;
        let _slot = self.dispatcher.reserve(provider, level)?;

        #[cfg(feature = "metrics")]
        counter!(
            connect_metrics::HANDSHAKES_STARTED_TOTAL,
            labels::PROVIDER => provider.as_str(),
            labels::SCOPE => level.as_str()
        )
        .increment(1);

        let url = self.dispatcher.authorization_url(def, level, ctx).await?;
        let mut handshake = self.channel.open(&url, provider, level)?;
        let result = self.await_outcome(def, level, ctx, &mut handshake).await;

        #[cfg(feature = "metrics")]
        {
            counter!(
                connect_metrics::HANDSHAKES_COMPLETED_TOTAL,
                labels::PROVIDER => provider.as_str(),
                labels::OUTCOME => outcome_label(&result)
            )
            .increment(1);
            histogram!(connect_metrics::HANDSHAKE_DURATION_SECONDS, labels::PROVIDER => provider.as_str())
                .record(handshake.requested_at.elapsed().as_secs_f64());
        }

        match &result {
            Ok(outcome) => info!(
                %provider,
                scope = %level,
                handshake = %handshake.id,
                source = ?outcome.source,
                "authorization completed"
            ),
            Err(e) => warn!(
                %provider,
                scope = %level,
                handshake = %handshake.id,
                error = %e,
                "authorization failed"
            ),
        }
        result
    }

    async fn await_outcome(
        &self,
        def: &ProviderDefinition,
        level: AuthorityScope,
        ctx: &ScopeContext,
        handshake: &mut Handshake,
    ) -> Result<HandshakeOutcome> {
        let provider = def.id;
        let started = handshake.requested_at;
        let deadline = tokio::time::sleep_until(started + self.poll_duration);
        tokio::pin!(deadline);
        let mut ticker = tokio::time::interval_at(started + self.poll_interval, self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let (waiter, window) = handshake.parts();
        loop {
            tokio::select! {
                biased;
                reply = waiter.recv() => {
                    let Some(reply) = reply else {
                        return Err(Error::HandshakeAbandoned { provider });
                    };
                    return self.finish_with_signal(def, level, ctx, reply).await;
                },
                () = &mut deadline => {
                    debug!(%provider, scope = %level, "poll window elapsed");
                    return Err(Error::HandshakeAbandoned { provider });
                },
                _ = ticker.tick() => {
                    let closed = window.is_closed();
                    let status = self.check_status_at(provider, level, ctx).await;
                    if status.is_connected() {
                        return Ok(HandshakeOutcome {
                            provider,
                            scope: level,
                            status,
                            message: None,
                            source: OutcomeSource::Poll,
                        });
                    }
                    if closed {
                        // The relay posts before it closes the window.
                        if let Some(reply) = waiter.try_recv() {
                            return self.finish_with_signal(def, level, ctx, reply).await;
                        }
                        debug!(%provider, scope = %level, "window closed without a signal");
                        return Err(Error::HandshakeAbandoned { provider });
                    }
                },
            }
        }
    }

    async fn finish_with_signal(
        &self,
        def: &ProviderDefinition,
        level: AuthorityScope,
        ctx: &ScopeContext,
        reply: SignalReply,
    ) -> Result<HandshakeOutcome> {
        match reply.status {
            SignalStatus::Success => {
                let status = self.check_status_at(def.id, level, ctx).await;
                Ok(HandshakeOutcome {
                    provider: def.id,
                    scope: level,
                    status,
                    message: reply.message,
                    source: OutcomeSource::Signal,
                })
            },
            SignalStatus::Error => Err(Error::ProviderDenied {
                provider: def.id,
                message: reply
                    .message
                    .unwrap_or_else(|| "authorization was not granted".into()),
            }),
        }
    }

    /// Check `provider` at its default scope.
    pub async fn check_status(&self, provider: ProviderId, ctx: &ScopeContext) -> ConnectionStatus {
        let level = self.registry.scope_of(provider);
        self.check_status_at(provider, level, ctx).await
    }

    /// Query the backend and update the cache.
    ///
    /// If a disconnect lands while the query is in flight the result is
    /// discarded and the post-disconnect entry is returned instead.
    pub async fn check_status_at(
        &self,
        provider: ProviderId,
        level: AuthorityScope,
        ctx: &ScopeContext,
    ) -> ConnectionStatus {
        let generation = self.cache.generation(provider, level);
        let status = self
            .normalizer
            .check(self.registry.get(provider), level, ctx)
            .await;
        self.cache.store_if_current(status, generation)
    }

    /// The user-initiated "Test" action.
    pub async fn test_connection(
        &self,
        provider: ProviderId,
        level: AuthorityScope,
        ctx: &ScopeContext,
    ) -> ConnectionStatus {
        info!(%provider, scope = %level, "testing connection");
        self.check_status_at(provider, level, ctx).await
    }

    /// Check every provider at its default scope, concurrently.
    pub async fn check_all(&self, ctx: &ScopeContext) -> Vec<ConnectionStatus> {
        let checks = self
            .registry
            .definitions()
            .map(|def| self.check_status_at(def.id, def.default_scope(), ctx));
        join_all(checks).await
    }

    /// Cached state only; never performs I/O.
    #[must_use]
    pub fn is_connected(&self, provider: ProviderId, level: AuthorityScope) -> bool {
        self.cache.get(provider, level).is_connected()
    }

    #[must_use]
    pub fn status(&self, provider: ProviderId, level: AuthorityScope) -> ConnectionStatus {
        self.cache.get(provider, level)
    }

    /// Connect a static-token provider with a pasted personal token.
    pub async fn connect_with_token(
        &self,
        provider: ProviderId,
        token: &Secret<String>,
        ctx: &ScopeContext,
    ) -> Result<ConnectionStatus> {
        let def = self.registry.get(provider);
        if def.auth_method != AuthMethod::StaticToken {
            return Err(Error::NotTokenProvider { provider });
        }
        let token = token.expose_secret().trim();
        if token.is_empty() {
            return Err(Error::EmptyToken);
        }
        let level = def.default_scope();
        let path = def
            .token_path()
            .with_context(|| format!("{provider} has no token endpoint"))?;
        let bearer = self
            .session
            .access_token()
            .await
            .ok_or(Error::MissingSession)?;

        self.backend
            .submit_token(&path, &bearer, &TokenRequest {
                token,
                organization_id: ctx.organization_id(),
                project_id: ctx.project_id.as_deref(),
            })
            .await?;
        info!(%provider, "personal token stored");

        Ok(self.check_status_at(provider, level, ctx).await)
    }

    /// Disconnect `provider` at `level` and move the cache to `needs-auth`.
    ///
    /// On failure the cached status is left as it was.
    pub async fn disconnect(
        &self,
        provider: ProviderId,
        level: AuthorityScope,
        ctx: &ScopeContext,
    ) -> Result<ConnectionStatus> {
        let def = self.registry.get(provider);
        if !def.supports(level) {
            return Err(Error::UnsupportedScope {
                provider,
                scope: level,
            });
        }

        let result = match (def.auth_method, level) {
            (AuthMethod::StaticToken, _) => {
                let key = StoreKey {
                    provider,
                    scope: level,
                    organization_id: ctx.organization_id().map(str::to_string),
                };
                match self.store.clear_token(&key).await {
                    Ok(()) => self.store.mark_inactive(&key).await,
                    Err(e) => Err(e),
                }
            },
            (AuthMethod::OAuthHandshake, AuthorityScope::Organization) => {
                let organization_id = ctx
                    .organization_id()
                    .ok_or(Error::MissingScopeContext { provider })?;
                self.store
                    .mark_inactive(&StoreKey {
                        provider,
                        scope: level,
                        organization_id: Some(organization_id.to_string()),
                    })
                    .await
            },
            (AuthMethod::OAuthHandshake, AuthorityScope::User) => {
                let bearer = self
                    .session
                    .access_token()
                    .await
                    .ok_or(Error::MissingSession)?;
                self.backend
                    .revoke(&bearer, &RevokeRequest {
                        provider,
                        organization_id: ctx.organization_id(),
                        user_scoped: true,
                    })
                    .await
            },
        };

        #[cfg(feature = "metrics")]
        counter!(
            connect_metrics::DISCONNECTS_TOTAL,
            labels::PROVIDER => provider.as_str(),
            labels::SUCCESS => if result.is_ok() { "true" } else { "false" }
        )
        .increment(1);

        if let Err(e) = result {
            warn!(%provider, scope = %level, error = %e, "disconnect failed");
            return Err(Error::Disconnect {
                provider,
                message: match e {
                    Error::Backend { message, .. } => message,
                    other => other.to_string(),
                },
            });
        }

        info!(%provider, scope = %level, "disconnected");
        Ok(self.cache.mark_disconnected(provider, level))
    }
}

#[cfg(feature = "metrics")]
fn outcome_label(result: &Result<HandshakeOutcome>) -> &'static str {
    match result {
        Ok(outcome) => match outcome.source {
            OutcomeSource::Signal => "signal",
            OutcomeSource::Poll => "poll",
        },
        Err(Error::ProviderDenied { .. }) => "denied",
        Err(Error::HandshakeAbandoned { .. }) => "abandoned",
        Err(_) => "failed",
    }
}
