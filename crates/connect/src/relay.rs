//! The relay that runs inside the authorization window.
//!
//! The provider (or an intermediate backend redirect) lands the window on the
//! callback path with `provider`, `status` and optionally `message` in the
//! query string. The relay turns that into a [`Signal`], posts it to the
//! opener restricted to its own origin, and closes the window. It keeps no
//! state between runs.

use {serde_json::Value, tracing::debug, url::Url};

use crate::{
    registry::AuthorityScope,
    signal::{Signal, SignalStatus},
};

/// Browser facilities the relay needs.
pub trait RelayPage {
    /// The page's own URL.
    fn location(&self) -> Url;

    /// Post `message` to the window that opened this one, restricted to
    /// `target_origin`. Returns `false` when there is no opener.
    fn post_to_opener(&self, message: &Value, target_origin: &str) -> bool;

    fn close(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    Posted,
    /// The window was opened directly, not by the application.
    NoOpener,
    /// The URL lacked `provider` or a valid `status`.
    Incomplete,
}

/// Parse the signal carried by a callback URL.
///
/// `status` must be `success` or `error`. An `error` or
/// `error_description` parameter stands in for `message` when the provider
/// redirected with OAuth's own error fields.
#[must_use]
pub fn signal_from_location(location: &Url) -> Option<Signal> {
    let mut provider = None;
    let mut status = None;
    let mut message = None;
    let mut oauth_error = None;
    let mut scope = None;

    for (key, value) in location.query_pairs() {
        match key.as_ref() {
            "provider" => provider = Some(value.into_owned()),
            "status" => {
                status = match value.as_ref() {
                    "success" => Some(SignalStatus::Success),
                    "error" => Some(SignalStatus::Error),
                    _ => None,
                }
            },
            "message" => message = Some(value.into_owned()),
            "error_description" => oauth_error = Some(value.into_owned()),
            "error" if oauth_error.is_none() => oauth_error = Some(value.into_owned()),
            "scope" => {
                scope = match value.as_ref() {
                    "organization" => Some(AuthorityScope::Organization),
                    "user" => Some(AuthorityScope::User),
                    _ => None,
                }
            },
            _ => {},
        }
    }

    let provider = provider.filter(|p| !p.trim().is_empty())?;
    let mut signal = Signal::new(provider, status?);
    if let Some(message) = message.or(oauth_error) {
        signal = signal.with_message(message);
    }
    if let Some(scope) = scope {
        signal = signal.with_scope(scope);
    }
    Some(signal)
}

/// Run the relay once: parse, post, close.
///
/// The window is closed whether or not the post succeeded; an incomplete URL
/// leaves it open so the user can see what happened.
pub fn run(page: &dyn RelayPage) -> RelayOutcome {
    let location = page.location();
    let Some(signal) = signal_from_location(&location) else {
        debug!(path = location.path(), "callback url carries no signal");
        return RelayOutcome::Incomplete;
    };

    let origin = location.origin().ascii_serialization();
    let posted = page.post_to_opener(&signal.to_value(), &origin);
    page.close();

    if posted {
        debug!(provider = %signal.provider, "signal relayed to opener");
        RelayOutcome::Posted
    } else {
        RelayOutcome::NoOpener
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};

    use {super::*, crate::signal::SIGNAL_TYPE};

    struct FakePage {
        url: &'static str,
        has_opener: bool,
        posted: RefCell<Vec<(Value, String)>>,
        closed: Cell<bool>,
    }

    impl FakePage {
        fn new(url: &'static str, has_opener: bool) -> Self {
            Self {
                url,
                has_opener,
                posted: RefCell::new(Vec::new()),
                closed: Cell::new(false),
            }
        }
    }

    impl RelayPage for FakePage {
        fn location(&self) -> Url {
            Url::parse(self.url).unwrap()
        }

        fn post_to_opener(&self, message: &Value, target_origin: &str) -> bool {
            if self.has_opener {
                self.posted
                    .borrow_mut()
                    .push((message.clone(), target_origin.to_string()));
            }
            self.has_opener
        }

        fn close(&self) {
            self.closed.set(true);
        }
    }

    #[test]
    fn parses_success() {
        let url = Url::parse(
            "https://app.example.com/integrations/callback?provider=chat&status=success",
        )
        .unwrap();
        let signal = signal_from_location(&url).unwrap();
        assert_eq!(signal.kind, SIGNAL_TYPE);
        assert_eq!(signal.provider, "chat");
        assert_eq!(signal.status, SignalStatus::Success);
        assert!(signal.message.is_none());
        assert!(signal.scope.is_none());
    }

    #[test]
    fn oauth_error_fields_become_message() {
        let url = Url::parse(
            "https://app.example.com/cb?provider=crm&status=error&error=access_denied&error_description=User+declined",
        )
        .unwrap();
        let signal = signal_from_location(&url).unwrap();
        assert_eq!(signal.status, SignalStatus::Error);
        assert_eq!(signal.message.as_deref(), Some("User declined"));

        let url = Url::parse(
            "https://app.example.com/cb?provider=crm&status=error&message=token+exchange+failed&error=server_error",
        )
        .unwrap();
        assert_eq!(
            signal_from_location(&url).unwrap().message.as_deref(),
            Some("token exchange failed")
        );
    }

    #[test]
    fn incomplete_urls_yield_nothing() {
        for raw in [
            "https://app.example.com/cb",
            "https://app.example.com/cb?provider=chat",
            "https://app.example.com/cb?provider=chat&status=maybe",
            "https://app.example.com/cb?provider=&status=success",
        ] {
            assert!(signal_from_location(&Url::parse(raw).unwrap()).is_none(), "{raw}");
        }
    }

    #[test]
    fn run_posts_to_own_origin_and_closes() {
        let page = FakePage::new(
            "https://app.example.com:8443/integrations/callback?provider=email-a&status=success&scope=organization",
            true,
        );

        assert_eq!(run(&page), RelayOutcome::Posted);
        assert!(page.closed.get());

        let posted = page.posted.borrow();
        let (message, target) = &posted[0];
        assert_eq!(target, "https://app.example.com:8443");
        assert_eq!(message["type"], SIGNAL_TYPE);
        assert_eq!(message["provider"], "email-a");
        assert_eq!(message["scope"], "organization");
    }

    #[test]
    fn run_without_opener_still_closes() {
        let page = FakePage::new("https://app.example.com/cb?provider=chat&status=success", false);
        assert_eq!(run(&page), RelayOutcome::NoOpener);
        assert!(page.closed.get());
    }

    #[test]
    fn incomplete_url_keeps_window_open() {
        let page = FakePage::new("https://app.example.com/cb?status=success", true);
        assert_eq!(run(&page), RelayOutcome::Incomplete);
        assert!(!page.closed.get());
        assert!(page.posted.borrow().is_empty());
    }
}
