//! Concurrent session cache with lazy expiry.
//!
//! Maps session tokens to the user that owns them. Entries expire passively:
//! an expired entry is removed by the first [`SessionStore::get`] that sees
//! it. The optional sweeper bounds memory held by abandoned sessions.

use std::sync::Arc;
use std::time::Duration;

use dashmap::{mapref::entry::Entry, DashMap};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use crate::services::token::SessionToken;

/// Smallest TTL accepted by [`SessionStore::put`]; keeps `expires_at`
/// strictly after `issued_at`.
const MIN_TTL: Duration = Duration::from_millis(1);

/// A cached session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionEntry {
    /// Owner of the session.
    pub user_id: i64,
    /// When the session was stored.
    pub issued_at: Instant,
    /// First instant at which the session is no longer valid.
    pub expires_at: Instant,
}

impl SessionEntry {
    /// Whether the entry is past its expiry at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

/// Sharded, lock-per-shard session cache. Cloning shares the cache.
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    sessions: Arc<DashMap<String, SessionEntry>>,
}

impl SessionStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the session for `token`, valid for `ttl` from now.
    pub fn put(&self, token: &SessionToken, user_id: i64, ttl: Duration) {
        let issued_at = Instant::now();
        let entry = SessionEntry {
            user_id,
            issued_at,
            expires_at: issued_at + ttl.max(MIN_TTL),
        };

        self.sessions.insert(token.as_str().to_owned(), entry);
        debug!(user_id, ?token, "session stored");
    }

    /// Resolve a token to its user.
    ///
    /// Returns `None` for absent and expired tokens. An expired entry is
    /// removed under the same shard lock that observed it, so concurrent
    /// readers agree on the outcome and a later `get` cannot revive it.
    #[must_use]
    pub fn get(&self, token: &SessionToken) -> Option<i64> {
        let now = Instant::now();

        match self.sessions.entry(token.as_str().to_owned()) {
            Entry::Occupied(entry) if entry.get().is_expired_at(now) => {
                let expired = entry.remove();
                debug!(user_id = expired.user_id, ?token, "session expired");
                None
            }
            Entry::Occupied(entry) => Some(entry.get().user_id),
            Entry::Vacant(_) => None,
        }
    }

    /// Snapshot of the entry for `token`, expired or not.
    #[must_use]
    pub fn entry(&self, token: &SessionToken) -> Option<SessionEntry> {
        self.sessions.get(token.as_str()).map(|entry| *entry)
    }

    /// Remove the session for `token`. Returns whether an entry was removed.
    pub fn delete(&self, token: &SessionToken) -> bool {
        let removed = self.sessions.remove(token.as_str()).is_some();
        debug!(?token, removed, "session deleted");
        removed
    }

    /// Remove every session owned by `user_id`. Returns the number removed.
    pub fn purge_user(&self, user_id: i64) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, entry| entry.user_id != user_id);
        let removed = before.saturating_sub(self.sessions.len());
        debug!(user_id, removed, "sessions purged for user");
        removed
    }

    /// Remove every expired session. Returns the number removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.sessions.len();
        self.sessions.retain(|_, entry| !entry.is_expired_at(now));
        before.saturating_sub(self.sessions.len())
    }

    /// Number of cached sessions, including expired ones not yet evicted.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether the cache holds no sessions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Spawn a task that evicts expired sessions every `every`.
    ///
    /// The task runs until aborted through the returned handle.
    #[must_use]
    pub fn spawn_sweeper(&self, every: Duration) -> JoinHandle<()> {
        let store = self.clone();
        let period = every.max(MIN_TTL);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let removed = store.cleanup_expired();
                debug!(removed, remaining = store.len(), "swept expired sessions");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60 * 60);

    fn token(name: &str) -> SessionToken {
        SessionToken::new(name.to_string())
    }

    #[tokio::test(start_paused = true)]
    async fn test_put_then_get() {
        let store = SessionStore::new();
        store.put(&token("a"), 7, TTL);

        assert_eq!(store.get(&token("a")), Some(7));
        assert_eq!(store.get(&token("b")), None);

        let entry = store.entry(&token("a")).unwrap();
        assert!(entry.expires_at > entry.issued_at);
    }

    #[tokio::test(start_paused = true)]
    async fn test_put_overwrites() {
        let store = SessionStore::new();
        store.put(&token("a"), 7, TTL);
        store.put(&token("a"), 8, TTL);

        assert_eq!(store.get(&token("a")), Some(8));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_does_not_resurrect() {
        let store = SessionStore::new();
        store.put(&token("a"), 7, TTL);

        tokio::time::advance(TTL + Duration::from_secs(1)).await;

        assert_eq!(store.get(&token("a")), None);
        assert!(store.is_empty());
        assert_eq!(store.get(&token("a")), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_boundary_is_exclusive() {
        let store = SessionStore::new();
        store.put(&token("a"), 7, TTL);

        tokio::time::advance(TTL - Duration::from_millis(1)).await;
        assert_eq!(store.get(&token("a")), Some(7));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(store.get(&token("a")), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_ttl_still_expires_after_issue() {
        let store = SessionStore::new();
        store.put(&token("a"), 7, Duration::ZERO);

        let entry = store.entry(&token("a")).unwrap();
        assert!(entry.expires_at > entry.issued_at);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete() {
        let store = SessionStore::new();
        store.put(&token("a"), 7, TTL);

        assert!(store.delete(&token("a")));
        assert_eq!(store.get(&token("a")), None);
        assert!(!store.delete(&token("a")));
        assert!(!store.delete(&token("never")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_user_removes_all_of_their_sessions() {
        let store = SessionStore::new();
        store.put(&token("phone"), 7, TTL);
        store.put(&token("laptop"), 7, TTL);
        store.put(&token("other"), 8, TTL);

        assert_eq!(store.purge_user(7), 2);
        assert_eq!(store.get(&token("phone")), None);
        assert_eq!(store.get(&token("laptop")), None);
        assert_eq!(store.get(&token("other")), Some(8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_expired() {
        let store = SessionStore::new();
        store.put(&token("short"), 1, Duration::from_secs(10));
        store.put(&token("long"), 2, TTL);

        tokio::time::advance(Duration::from_secs(11)).await;

        assert_eq!(store.cleanup_expired(), 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&token("long")), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_evicts_without_access() {
        let store = SessionStore::new();
        store.put(&token("short"), 1, Duration::from_secs(5));
        let sweeper = store.spawn_sweeper(Duration::from_secs(1));

        tokio::time::advance(Duration::from_secs(6)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert!(store.is_empty());
        sweeper.abort();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_get_on_expired_entry_agrees() {
        let store = SessionStore::new();
        store.put(&token("stale"), 7, Duration::from_millis(1));
        tokio::time::sleep(Duration::from_millis(10)).await;

        let readers: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.get(&token("stale")) })
            })
            .collect();

        for reader in readers {
            assert_eq!(reader.await.unwrap(), None);
        }
        assert!(store.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_disjoint_keys_under_contention() {
        let store = SessionStore::new();

        let workers: Vec<_> = (0..32_i64)
            .map(|worker| {
                let store = store.clone();
                tokio::spawn(async move {
                    for round in 0..200_i64 {
                        let t = token(&format!("w{worker}-r{round}"));
                        store.put(&t, worker, TTL);
                        assert_eq!(store.get(&t), Some(worker));
                        if round % 2 == 0 {
                            assert!(store.delete(&t));
                            assert_eq!(store.get(&t), None);
                        }
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.await.unwrap();
        }

        assert_eq!(store.len(), 32 * 100);
        for worker in 0..32_i64 {
            for round in (1..200_i64).step_by(2) {
                let t = token(&format!("w{worker}-r{round}"));
                assert_eq!(store.get(&t), Some(worker));
            }
        }
    }
}
