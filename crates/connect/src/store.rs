//! Seam to the relational store that holds connection rows.
//!
//! The broker only ever flips rows inactive or clears a stored token; rows
//! are created server-side when a handshake or token submission completes.

use std::{
    collections::HashMap,
    sync::Mutex,
};

use {async_trait::async_trait, tracing::info};

use crate::{
    Error, Result,
    registry::{AuthorityScope, ProviderId},
};

/// Identifies one stored connection row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoreKey {
    pub provider: ProviderId,
    pub scope: AuthorityScope,
    /// Present for organization-scoped rows; user rows are keyed by the
    /// session identity server-side.
    pub organization_id: Option<String>,
}

#[async_trait]
pub trait ConnectionStore: Send + Sync {
    /// Mark the connection inactive without deleting it.
    async fn mark_inactive(&self, key: &StoreKey) -> Result<()>;

    /// Remove a stored personal token.
    async fn clear_token(&self, key: &StoreKey) -> Result<()>;
}

/// A stored connection row as seen by [`MemoryConnectionStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionRow {
    pub active: bool,
    pub has_token: bool,
}

/// In-process store for tests and offline tooling.
///
/// Updating a row that was never inserted is an error.
#[derive(Debug, Default)]
pub struct MemoryConnectionStore {
    rows: Mutex<HashMap<StoreKey, ConnectionRow>>,
}

impl MemoryConnectionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: StoreKey, row: ConnectionRow) {
        self.rows
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, row);
    }

    #[must_use]
    pub fn row(&self, key: &StoreKey) -> Option<ConnectionRow> {
        self.rows
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .copied()
    }

    fn update(&self, key: &StoreKey, apply: impl FnOnce(&mut ConnectionRow)) -> Result<()> {
        let mut rows = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        let row = rows.get_mut(key).ok_or_else(|| {
            Error::message(format!(
                "no stored {} connection at {} scope",
                key.provider, key.scope
            ))
        })?;
        apply(row);
        Ok(())
    }
}

#[async_trait]
impl ConnectionStore for MemoryConnectionStore {
    async fn mark_inactive(&self, key: &StoreKey) -> Result<()> {
        self.update(key, |row| row.active = false)?;
        info!(provider = %key.provider, scope = %key.scope, "connection marked inactive");
        Ok(())
    }

    async fn clear_token(&self, key: &StoreKey) -> Result<()> {
        self.update(key, |row| row.has_token = false)?;
        info!(provider = %key.provider, "stored token cleared");
        Ok(())
    }
}
