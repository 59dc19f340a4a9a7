//! Last known status per `(provider, scope)`.
//!
//! Entries never expire on their own; a slightly stale badge beats a
//! blocking read. Every entry carries a generation that only a disconnect
//! bumps, so a status check that was already in flight when the user
//! disconnected cannot put `connected` back.

use std::{collections::HashMap, sync::RwLock};

use {tokio::sync::broadcast, tracing::debug};

use crate::{
    registry::{AuthorityScope, ProviderId},
    status::ConnectionStatus,
};

const UPDATE_BUFFER: usize = 64;

pub type CacheKey = (ProviderId, AuthorityScope);

#[derive(Debug, Default)]
struct Entry {
    status: Option<ConnectionStatus>,
    generation: u64,
}

pub struct ConnectionCache {
    entries: RwLock<HashMap<CacheKey, Entry>>,
    updates: broadcast::Sender<ConnectionStatus>,
}

impl ConnectionCache {
    #[must_use]
    pub fn new() -> Self {
        let (updates, _) = broadcast::channel(UPDATE_BUFFER);
        Self {
            entries: RwLock::new(HashMap::new()),
            updates,
        }
    }

    /// Cached status, `idle` if never checked.
    #[must_use]
    pub fn get(&self, provider: ProviderId, level: AuthorityScope) -> ConnectionStatus {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(provider, level))
            .and_then(|entry| entry.status.clone())
            .unwrap_or_else(|| ConnectionStatus::idle(provider, level))
    }

    #[must_use]
    pub fn generation(&self, provider: ProviderId, level: AuthorityScope) -> u64 {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(provider, level))
            .map_or(0, |entry| entry.generation)
    }

    /// Store a status observed while the entry was at `generation`.
    ///
    /// Returns what the cache holds afterwards: `status` itself, or the
    /// newer entry if a disconnect happened in between.
    pub fn store_if_current(&self, status: ConnectionStatus, generation: u64) -> ConnectionStatus {
        let key = (status.provider(), status.level());
        {
            let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
            let entry = entries.entry(key).or_default();
            if entry.generation != generation {
                debug!(
                    provider = %key.0,
                    scope = %key.1,
                    "discarding status observed before disconnect"
                );
                return entry
                    .status
                    .clone()
                    .unwrap_or_else(|| ConnectionStatus::idle(key.0, key.1));
            }
            entry.status = Some(status.clone());
        }
        self.publish(&status);
        status
    }

    /// Move an entry to `needs-auth` and invalidate in-flight checks.
    pub fn mark_disconnected(&self, provider: ProviderId, level: AuthorityScope) -> ConnectionStatus {
        let status = ConnectionStatus::needs_auth(provider, level);
        {
            let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
            let entry = entries.entry((provider, level)).or_default();
            entry.generation += 1;
            entry.status = Some(status.clone());
        }
        self.publish(&status);
        status
    }

    /// Every entry that has been checked at least once.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ConnectionStatus> {
        let mut all: Vec<ConnectionStatus> = self
            .entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter_map(|entry| entry.status.clone())
            .collect();
        all.sort_by_key(|s| (s.provider(), s.level() == AuthorityScope::Organization));
        all
    }

    /// Stream of every status written to the cache.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionStatus> {
        self.updates.subscribe()
    }

    fn publish(&self, status: &ConnectionStatus) {
        // No subscribers is fine.
        let _ = self.updates.send(status.clone());
    }
}

impl Default for ConnectionCache {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, crate::status::ConnectionState};

    #[test]
    fn unknown_entry_is_idle() {
        let cache = ConnectionCache::new();
        let status = cache.get(ProviderId::Crm, AuthorityScope::Organization);
        assert_eq!(status.state(), ConnectionState::Idle);
        assert!(cache.snapshot().is_empty());
    }

    #[test]
    fn scopes_are_separate_entries() {
        let cache = ConnectionCache::new();
        cache.store_if_current(
            ConnectionStatus::connected(ProviderId::EmailA, AuthorityScope::User, None),
            0,
        );
        assert!(cache.get(ProviderId::EmailA, AuthorityScope::User).is_connected());
        assert_eq!(
            cache
                .get(ProviderId::EmailA, AuthorityScope::Organization)
                .state(),
            ConnectionState::Idle
        );
    }

    #[test]
    fn stale_check_cannot_undo_disconnect() {
        let cache = ConnectionCache::new();
        let before = cache.generation(ProviderId::Chat, AuthorityScope::User);

        cache.mark_disconnected(ProviderId::Chat, AuthorityScope::User);
        let kept = cache.store_if_current(
            ConnectionStatus::connected(ProviderId::Chat, AuthorityScope::User, Some("acme".into())),
            before,
        );

        assert_eq!(kept.state(), ConnectionState::NeedsAuth);
        assert_eq!(
            cache.get(ProviderId::Chat, AuthorityScope::User).state(),
            ConnectionState::NeedsAuth
        );
    }

    #[test]
    fn check_after_disconnect_is_stored() {
        let cache = ConnectionCache::new();
        cache.mark_disconnected(ProviderId::Chat, AuthorityScope::User);
        let generation = cache.generation(ProviderId::Chat, AuthorityScope::User);

        cache.store_if_current(
            ConnectionStatus::connected(ProviderId::Chat, AuthorityScope::User, None),
            generation,
        );
        assert!(cache.get(ProviderId::Chat, AuthorityScope::User).is_connected());
    }

    #[tokio::test]
    async fn subscribers_see_updates() {
        let cache = ConnectionCache::new();
        let mut rx = cache.subscribe();

        cache.mark_disconnected(ProviderId::Crm, AuthorityScope::Organization);

        let update = rx.recv().await.unwrap();
        assert_eq!(update.provider(), ProviderId::Crm);
        assert_eq!(update.state(), ConnectionState::NeedsAuth);
    }
}
