//! The detached-window handshake.
//!
//! [`HandshakeChannel::open`] attaches a signal waiter, then asks the host
//! for a centered popup. If the host refuses, the waiter is dropped with the
//! error and the bus is back where it started.

use std::sync::Arc;

use {
    tokio::time::Instant,
    tracing::{info, warn},
    uuid::Uuid,
};

#[cfg(feature = "metrics")]
use bridgeway_metrics::{connect as connect_metrics, counter, labels};

use crate::{
    Error, Result,
    registry::{AuthorityScope, ProviderId},
    signal::{SignalBus, SignalReply, Waiter},
    window::{WindowFeatures, WindowHandle, WindowHost},
};

pub struct HandshakeChannel {
    bus: Arc<SignalBus>,
    host: Arc<dyn WindowHost>,
    popup_width: u32,
    popup_height: u32,
}

impl HandshakeChannel {
    #[must_use]
    pub fn new(
        bus: Arc<SignalBus>,
        host: Arc<dyn WindowHost>,
        popup_width: u32,
        popup_height: u32,
    ) -> Self {
        Self {
            bus,
            host,
            popup_width,
            popup_height,
        }
    }

    #[must_use]
    pub fn bus(&self) -> &Arc<SignalBus> {
        &self.bus
    }

    /// Open the consent window for `provider` and start listening.
    pub fn open(&self, url: &str, provider: ProviderId, scope: AuthorityScope) -> Result<Handshake> {
        let waiter = self.bus.register(provider, scope);
        let features =
            WindowFeatures::centered(self.host.screen(), self.popup_width, self.popup_height);
        let name = format!("connect-{provider}");

        let Some(window) = self.host.open(url, &name, &features) else {
            #[cfg(feature = "metrics")]
            counter!(connect_metrics::POPUPS_BLOCKED_TOTAL, labels::PROVIDER => provider.as_str())
                .increment(1);
            warn!(%provider, %scope, "authorization window blocked");
            return Err(Error::PopupBlocked { provider });
        };

        let handshake = Handshake {
            id: Uuid::new_v4(),
            provider,
            scope,
            requested_at: Instant::now(),
            window,
            waiter,
        };
        info!(%provider, %scope, handshake = %handshake.id, "authorization window opened");
        Ok(handshake)
    }

    /// Open the window and wait for its signal, with no poll and no timeout.
    pub async fn open_and_wait(
        &self,
        url: &str,
        provider: ProviderId,
        scope: AuthorityScope,
    ) -> Result<SignalReply> {
        let mut handshake = self.open(url, provider, scope)?;
        Ok(handshake.signal().await)
    }
}

/// One in-flight authorization attempt.
///
/// Owns the window reference and the signal waiter; dropping it releases both.
pub struct Handshake {
    pub id: Uuid,
    pub provider: ProviderId,
    pub scope: AuthorityScope,
    pub requested_at: Instant,
    window: Box<dyn WindowHandle>,
    waiter: Waiter,
}

impl Handshake {
    /// Wait for the relay's signal. Pending forever if none arrives.
    pub async fn signal(&mut self) -> SignalReply {
        match self.waiter.recv().await {
            Some(reply) => reply,
            None => std::future::pending().await,
        }
    }

    #[must_use]
    pub fn window_closed(&self) -> bool {
        self.window.is_closed()
    }

    /// Borrow the waiter and the window separately so a caller can wait on
    /// the signal while watching the window.
    pub(crate) fn parts(&mut self) -> (&mut Waiter, &dyn WindowHandle) {
        (&mut self.waiter, self.window.as_ref())
    }
}
