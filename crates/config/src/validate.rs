//! Semantic checks on a loaded [`BrokerConfig`].
//!
//! Parsing already rejected malformed documents; this catches values that
//! parse fine but would break the handshake at runtime.

use std::fmt;

use url::Url;

use crate::schema::BrokerConfig;

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Dotted path, e.g. "app.origin"
    pub path: &'static str,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.severity, self.path, self.message)
    }
}

/// Result of validating a configuration.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Count diagnostics by severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }

    fn push(&mut self, severity: Severity, path: &'static str, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            severity,
            path,
            message: message.into(),
        });
    }
}

/// Validate a config.
#[must_use]
pub fn validate(config: &BrokerConfig) -> ValidationResult {
    let mut result = ValidationResult::default();

    match Url::parse(&config.backend.base_url) {
        Ok(url) => {
            let loopback = matches!(
                url.host_str(),
                Some("localhost" | "127.0.0.1" | "[::1]")
            );
            if url.scheme() == "http" && !loopback {
                result.push(
                    Severity::Warning,
                    "backend.base_url",
                    "session credentials will be sent over plain HTTP",
                );
            }
        },
        Err(e) => result.push(
            Severity::Error,
            "backend.base_url",
            format!("not a valid URL: {e}"),
        ),
    }

    match Url::parse(&config.app.origin) {
        Ok(url) if url.cannot_be_a_base() || url.host_str().is_none() => result.push(
            Severity::Error,
            "app.origin",
            "must be scheme://host[:port]",
        ),
        Ok(url) if url.path() != "/" || url.query().is_some() => result.push(
            Severity::Error,
            "app.origin",
            "an origin has no path or query",
        ),
        Ok(_) => {},
        Err(e) => result.push(Severity::Error, "app.origin", format!("not a valid URL: {e}")),
    }

    if !config.app.callback_path.starts_with('/') {
        result.push(
            Severity::Error,
            "app.callback_path",
            "must start with '/'",
        );
    }

    let handshake = &config.handshake;
    if handshake.poll_interval_ms == 0 {
        result.push(
            Severity::Error,
            "handshake.poll_interval_ms",
            "must be greater than zero",
        );
    } else if handshake.poll_interval_ms > handshake.poll_duration_ms {
        result.push(
            Severity::Error,
            "handshake.poll_duration_ms",
            "shorter than the poll interval, no poll would ever run",
        );
    }
    if handshake.popup_width == 0 || handshake.popup_height == 0 {
        result.push(
            Severity::Error,
            "handshake.popup_width",
            "popup dimensions must be non-zero",
        );
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let result = validate(&BrokerConfig::default());
        assert!(!result.has_errors(), "{:?}", result.diagnostics);
        assert_eq!(result.count(Severity::Warning), 0);
    }

    #[test]
    fn origin_with_path_is_rejected() {
        let mut cfg = BrokerConfig::default();
        cfg.app.origin = "https://app.example.com/dashboard".into();
        let result = validate(&cfg);
        assert!(result.has_errors());
        assert!(result.diagnostics.iter().any(|d| d.path == "app.origin"));
    }

    #[test]
    fn callback_path_needs_leading_slash() {
        let mut cfg = BrokerConfig::default();
        cfg.app.callback_path = "integrations/callback".into();
        assert!(validate(&cfg).has_errors());
    }

    #[test]
    fn poll_interval_longer_than_duration() {
        let mut cfg = BrokerConfig::default();
        cfg.handshake.poll_interval_ms = 10_000;
        cfg.handshake.poll_duration_ms = 1_000;
        let result = validate(&cfg);
        assert_eq!(result.count(Severity::Error), 1);
        assert_eq!(result.diagnostics[0].path, "handshake.poll_duration_ms");
    }

    #[test]
    fn plain_http_remote_backend_warns() {
        let mut cfg = BrokerConfig::default();
        cfg.backend.base_url = "http://fn.example.com/v1".into();
        let result = validate(&cfg);
        assert!(!result.has_errors());
        assert_eq!(result.count(Severity::Warning), 1);
        assert!(result.diagnostics[0].to_string().starts_with("warning backend.base_url"));
    }
}
