//! Callback route for native hosts.
//!
//! When the consent page is opened in the system browser there is no opener
//! to post to. The provider's redirect lands on this route instead, which
//! plays the relay's part: it reads the signal from the query and delivers
//! it to the bus as the application's own origin.

use std::sync::Arc;

use {
    axum::{
        Router,
        extract::{OriginalUri, State},
        http::StatusCode,
        response::Html,
        routing::get,
    },
    tokio::net::TcpListener,
    tracing::{debug, info},
    url::Url,
};

use crate::{
    Result,
    error::Context,
    relay::signal_from_location,
    signal::{Delivery, IncomingMessage, SignalBus, SignalStatus},
};

const CLOSE_PAGE: &str = "<p>You can close this window.</p>";

/// Router serving `callback_path`.
pub fn router(bus: Arc<SignalBus>, callback_path: &str) -> Router {
    Router::new()
        .route(callback_path, get(handle_callback))
        .with_state(bus)
}

/// Serve [`router`] on `listener` until the task is dropped.
pub async fn serve(bus: Arc<SignalBus>, callback_path: &str, listener: TcpListener) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, path = callback_path, "callback listener started");
    }
    axum::serve(listener, router(bus, callback_path))
        .await
        .context("callback server exited")
}

async fn handle_callback(
    State(bus): State<Arc<SignalBus>>,
    OriginalUri(uri): OriginalUri,
) -> (StatusCode, Html<String>) {
    let signal = Url::parse(&format!("{}{uri}", bus.origin()))
        .ok()
        .and_then(|location| signal_from_location(&location));
    let Some(signal) = signal else {
        debug!(path = uri.path(), "callback without provider or status");
        return (
            StatusCode::BAD_REQUEST,
            Html("<h1>Missing authorization result</h1>".to_string()),
        );
    };

    let status = signal.status;
    let delivery = bus.deliver(IncomingMessage {
        origin: bus.origin().to_string(),
        data: signal.to_value(),
    });
    if let Delivery::Ignored(reason) = delivery {
        debug!(reason = reason.as_str(), "callback signal had no taker");
    }

    let heading = match status {
        SignalStatus::Success => "<h1>Connected</h1>",
        SignalStatus::Error => "<h1>Authorization did not complete</h1>",
    };
    (StatusCode::OK, Html(format!("{heading}{CLOSE_PAGE}")))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::registry::{AuthorityScope, ProviderId, Registry},
    };

    async fn start(bus: Arc<SignalBus>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(bus, "/integrations/callback", listener));
        format!("http://{addr}/integrations/callback")
    }

    fn bus() -> Arc<SignalBus> {
        Arc::new(SignalBus::new(
            "http://localhost:3000",
            Arc::new(Registry::builtin()),
        ))
    }

    #[tokio::test]
    async fn delivers_query_signal_to_waiter() {
        let bus = bus();
        let mut waiter = bus.register(ProviderId::EmailB, AuthorityScope::User);
        let url = start(Arc::clone(&bus)).await;

        let resp = reqwest::get(format!("{url}?provider=mail-b&status=error&message=consent+revoked"))
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert!(resp.text().await.unwrap().contains("close this window"));

        let reply = waiter.recv().await.unwrap();
        assert_eq!(reply.provider, ProviderId::EmailB);
        assert_eq!(reply.status, SignalStatus::Error);
        assert_eq!(reply.message.as_deref(), Some("consent revoked"));
    }

    #[tokio::test]
    async fn missing_fields_are_rejected() {
        let bus = bus();
        let _waiter = bus.register(ProviderId::Chat, AuthorityScope::User);
        let url = start(Arc::clone(&bus)).await;

        let resp = reqwest::get(format!("{url}?status=success")).await.unwrap();
        assert_eq!(resp.status(), 400);
        assert_eq!(bus.listener_count(), 1);
    }
}
