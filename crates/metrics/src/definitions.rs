//! Metric name and label definitions.
//!
//! Every metric the broker emits is named here so dashboards have one place
//! to look.

/// Connection broker metrics
pub mod connect {
    /// Handshakes started, by provider and scope
    pub const HANDSHAKES_STARTED_TOTAL: &str = "bridgeway_connect_handshakes_started_total";
    /// Handshakes finished, by provider and outcome
    pub const HANDSHAKES_COMPLETED_TOTAL: &str = "bridgeway_connect_handshakes_completed_total";
    /// Handshake duration from window open to outcome, in seconds
    pub const HANDSHAKE_DURATION_SECONDS: &str = "bridgeway_connect_handshake_duration_seconds";
    /// Popups the host refused to open
    pub const POPUPS_BLOCKED_TOTAL: &str = "bridgeway_connect_popups_blocked_total";
    /// Cross-window signals dropped, by reason
    pub const SIGNALS_REJECTED_TOTAL: &str = "bridgeway_connect_signals_rejected_total";
    /// Handshakes currently waiting on a signal
    pub const HANDSHAKES_PENDING: &str = "bridgeway_connect_handshakes_pending";
    /// Status checks, by provider and canonical state
    pub const STATUS_CHECKS_TOTAL: &str = "bridgeway_connect_status_checks_total";
    /// Disconnects, by provider and success
    pub const DISCONNECTS_TOTAL: &str = "bridgeway_connect_disconnects_total";
}

/// Common label keys
pub mod labels {
    pub const PROVIDER: &str = "provider";
    pub const SCOPE: &str = "scope";
    pub const OUTCOME: &str = "outcome";
    pub const STATE: &str = "state";
    pub const REASON: &str = "reason";
    pub const SUCCESS: &str = "success";
}
