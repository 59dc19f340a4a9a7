//! Cross-window signalling.
//!
//! The host owns exactly one real listener on the cross-window message
//! channel and feeds every message it receives into [`SignalBus::deliver`].
//! The bus validates it and fans it out to the per-provider waiters that
//! pending handshakes registered. A [`Waiter`] detaches itself on drop, so a
//! handshake that ends on any path leaves nothing behind.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
};

use {
    serde::{Deserialize, Serialize},
    serde_json::Value,
    tokio::sync::oneshot,
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use bridgeway_metrics::{connect as connect_metrics, counter, gauge, labels};

use crate::registry::{AuthorityScope, ProviderId, Registry};

/// Value of the `type` field every handshake signal carries.
pub const SIGNAL_TYPE: &str = "integration-oauth-result";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalStatus {
    Success,
    Error,
}

/// Structured message the relay posts back to the opener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signal {
    #[serde(rename = "type")]
    pub kind: String,
    pub provider: String,
    pub status: SignalStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Narrows delivery to handshakes at this scope when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<AuthorityScope>,
}

impl Signal {
    #[must_use]
    pub fn new(provider: impl Into<String>, status: SignalStatus) -> Self {
        Self {
            kind: SIGNAL_TYPE.to_string(),
            provider: provider.into(),
            status,
            message: None,
            scope: None,
        }
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    #[must_use]
    pub fn with_scope(mut self, scope: AuthorityScope) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// A raw message as the host's listener received it.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    /// Origin the messaging primitive reports for the sender.
    pub origin: String,
    pub data: Value,
}

/// What a waiting handshake receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalReply {
    pub provider: ProviderId,
    pub status: SignalStatus,
    pub message: Option<String>,
}

/// Why [`SignalBus::deliver`] dropped a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    ForeignOrigin,
    Malformed,
    WrongType,
    UnknownProvider,
    NoWaiter,
}

impl Rejection {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ForeignOrigin => "foreign_origin",
            Self::Malformed => "malformed",
            Self::WrongType => "wrong_type",
            Self::UnknownProvider => "unknown_provider",
            Self::NoWaiter => "no_waiter",
        }
    }
}

/// Result of [`SignalBus::deliver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Number of waiters resolved.
    Resolved(usize),
    Ignored(Rejection),
}

struct Slot {
    id: u64,
    scope: AuthorityScope,
    tx: oneshot::Sender<SignalReply>,
}

pub struct SignalBus {
    origin: String,
    registry: Arc<Registry>,
    waiters: Mutex<HashMap<ProviderId, Vec<Slot>>>,
    next_id: AtomicU64,
}

impl SignalBus {
    #[must_use]
    pub fn new(origin: impl Into<String>, registry: Arc<Registry>) -> Self {
        Self {
            origin: normalize_origin(&origin.into()),
            registry,
            waiters: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// The application's own origin; the only one signals are accepted from.
    #[must_use]
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Attach a waiter for `provider` at `scope`.
    #[must_use]
    pub fn register(self: &Arc<Self>, provider: ProviderId, scope: AuthorityScope) -> Waiter {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.waiters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(provider)
            .or_default()
            .push(Slot { id, scope, tx });

        #[cfg(feature = "metrics")]
        gauge!(connect_metrics::HANDSHAKES_PENDING).increment(1.0);

        debug!(%provider, %scope, waiter = id, "signal waiter attached");
        Waiter {
            bus: Arc::clone(self),
            provider,
            id,
            rx: Some(rx),
        }
    }

    /// Number of attached waiters across all providers.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.waiters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .map(Vec::len)
            .sum()
    }

    /// Validate a message from the channel and resolve matching waiters.
    ///
    /// Never fails: anything that does not pass is dropped and logged.
    pub fn deliver(&self, message: IncomingMessage) -> Delivery {
        let delivery = self.route(message);
        if let Delivery::Ignored(reason) = delivery {
            #[cfg(feature = "metrics")]
            counter!(connect_metrics::SIGNALS_REJECTED_TOTAL, labels::REASON => reason.as_str())
                .increment(1);
            debug!(reason = reason.as_str(), "signal ignored");
        }
        delivery
    }

    fn route(&self, message: IncomingMessage) -> Delivery {
        if normalize_origin(&message.origin) != self.origin {
            warn!(origin = %message.origin, "dropping signal from foreign origin");
            return Delivery::Ignored(Rejection::ForeignOrigin);
        }

        let Ok(signal) = serde_json::from_value::<Signal>(message.data) else {
            return Delivery::Ignored(Rejection::Malformed);
        };
        if signal.kind != SIGNAL_TYPE {
            return Delivery::Ignored(Rejection::WrongType);
        }
        let Ok(def) = self.registry.resolve(&signal.provider) else {
            return Delivery::Ignored(Rejection::UnknownProvider);
        };
        let provider = def.id;

        let matched: Vec<Slot> = {
            let mut waiters = self.waiters.lock().unwrap_or_else(|e| e.into_inner());
            let Some(slots) = waiters.get_mut(&provider) else {
                return Delivery::Ignored(Rejection::NoWaiter);
            };
            let (matched, kept): (Vec<Slot>, Vec<Slot>) = slots
                .drain(..)
                .partition(|slot| signal.scope.is_none_or(|scope| scope == slot.scope));
            *slots = kept;
            if slots.is_empty() {
                waiters.remove(&provider);
            }
            matched
        };

        if matched.is_empty() {
            return Delivery::Ignored(Rejection::NoWaiter);
        }

        let count = matched.len();
        for slot in matched {
            #[cfg(feature = "metrics")]
            gauge!(connect_metrics::HANDSHAKES_PENDING).decrement(1.0);

            let _ = slot.tx.send(SignalReply {
                provider,
                status: signal.status,
                message: signal.message.clone(),
            });
        }
        info!(%provider, status = ?signal.status, waiters = count, "signal delivered");
        Delivery::Resolved(count)
    }

    fn detach(&self, provider: ProviderId, id: u64) {
        let mut waiters = self.waiters.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(slots) = waiters.get_mut(&provider) {
            let before = slots.len();
            slots.retain(|slot| slot.id != id);
            if slots.len() < before {
                #[cfg(feature = "metrics")]
                gauge!(connect_metrics::HANDSHAKES_PENDING).decrement(1.0);
                debug!(%provider, waiter = id, "signal waiter detached");
            }
            if slots.is_empty() {
                waiters.remove(&provider);
            }
        }
    }
}

/// Registration of one pending handshake on the bus.
pub struct Waiter {
    bus: Arc<SignalBus>,
    provider: ProviderId,
    id: u64,
    rx: Option<oneshot::Receiver<SignalReply>>,
}

impl Waiter {
    /// Wait for the matching signal.
    ///
    /// Returns `None` once a reply has already been taken. Cancel-safe.
    pub async fn recv(&mut self) -> Option<SignalReply> {
        let rx = self.rx.as_mut()?;
        let reply = rx.await.ok();
        self.rx = None;
        reply
    }

    /// Take a reply that has already arrived, without waiting.
    pub fn try_recv(&mut self) -> Option<SignalReply> {
        let reply = self.rx.as_mut()?.try_recv().ok()?;
        self.rx = None;
        Some(reply)
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        self.bus.detach(self.provider, self.id);
    }
}

fn normalize_origin(origin: &str) -> String {
    origin.trim().trim_end_matches('/').to_ascii_lowercase()
}
