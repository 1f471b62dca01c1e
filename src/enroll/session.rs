//! Short-lived PKCE sessions keyed by the OAuth2 `state` parameter.
//!
//! A session is created by `/enroll` and consumed exactly once by `/callback`.
//! `consume` removes the record before handing out the verifier, so a replayed
//! `state` is always unknown. Records older than the TTL are treated as unknown
//! and pruned lazily on `create` and periodically by [`MemorySessionStore::spawn_sweeper`].

use crate::enroll::pkce::random_hex;
use anyhow::Result;
use secrecy::SecretString;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    time::{Duration, Instant},
};
use tokio::task::JoinHandle;
use tracing::debug;

/// Random bytes behind the `state` value (rendered as hex).
pub const STATE_BYTES: usize = 32;
/// Random bytes behind the PKCE `code_verifier` (rendered as hex, 128 chars).
pub const VERIFIER_BYTES: usize = 64;

#[derive(Debug, Clone)]
pub struct PkceSession {
    pub state: String,
    pub verifier: SecretString,
}

pub trait SessionStore: Send + Sync {
    /// Register a new session with fresh `state` and `verifier`.
    ///
    /// # Errors
    /// Returns an error if the random source fails.
    fn create(&self) -> Result<PkceSession>;

    /// Remove the session for `state` and return its verifier.
    /// Returns `None` for unknown, expired or already consumed states.
    fn consume(&self, state: &str) -> Option<SecretString>;
}

struct SessionRecord {
    verifier: SecretString,
    created_at: Instant,
}

pub struct MemorySessionStore {
    ttl: Duration,
    records: Mutex<HashMap<String, SessionRecord>>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            records: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired record, returning how many were removed.
    pub fn prune_expired(&self) -> usize {
        let mut records = self.records();
        let before = records.len();
        records.retain(|_, record| record.created_at.elapsed() < self.ttl);
        before - records.len()
    }

    /// Prune expired sessions every `every` until the store is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let store: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                let removed = store.prune_expired();
                if removed > 0 {
                    debug!("Pruned {removed} expired enrollment sessions");
                }
            }
        })
    }

    // A panic while holding the lock cannot leave a record half-written.
    fn records(&self) -> MutexGuard<'_, HashMap<String, SessionRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SessionStore for MemorySessionStore {
    fn create(&self) -> Result<PkceSession> {
        let state = random_hex(STATE_BYTES)?;
        let verifier = random_hex(VERIFIER_BYTES)?;

        let mut records = self.records();
        records.retain(|_, record| record.created_at.elapsed() < self.ttl);
        records.insert(
            state.clone(),
            SessionRecord {
                verifier: SecretString::from(verifier.clone()),
                created_at: Instant::now(),
            },
        );

        Ok(PkceSession {
            state,
            verifier: SecretString::from(verifier),
        })
    }

    fn consume(&self, state: &str) -> Option<SecretString> {
        let record = self.records().remove(state)?;
        (record.created_at.elapsed() < self.ttl).then_some(record.verifier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::thread;

    #[test]
    fn consume_is_single_use() -> Result<()> {
        let store = MemorySessionStore::new(Duration::from_secs(60));
        let session = store.create()?;

        let verifier = store
            .consume(&session.state)
            .map(|verifier| verifier.expose_secret().to_string());
        assert_eq!(verifier.as_deref(), Some(session.verifier.expose_secret()));
        assert!(store.consume(&session.state).is_none());
        assert!(store.is_empty());
        Ok(())
    }

    #[test]
    fn unknown_state_is_rejected() {
        let store = MemorySessionStore::new(Duration::from_secs(60));
        assert!(store.consume("not-a-state").is_none());
    }

    #[test]
    fn state_and_verifier_entropy() -> Result<()> {
        let store = MemorySessionStore::new(Duration::from_secs(60));
        let session = store.create()?;
        assert_eq!(session.state.len(), STATE_BYTES * 2);
        assert_eq!(session.verifier.expose_secret().len(), VERIFIER_BYTES * 2);
        assert!(session.state.chars().all(|c| c.is_ascii_hexdigit()));

        let other = store.create()?;
        assert_ne!(session.state, other.state);
        assert_eq!(store.len(), 2);
        Ok(())
    }

    #[test]
    fn concurrent_consumers_get_exactly_one_verifier() -> Result<()> {
        let store = Arc::new(MemorySessionStore::new(Duration::from_secs(60)));
        let session = store.create()?;

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = Arc::clone(&store);
                let state = session.state.clone();
                thread::spawn(move || store.consume(&state).is_some())
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|handle| handle.join().unwrap_or(false))
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
        Ok(())
    }

    #[test]
    fn expired_sessions_are_unknown() -> Result<()> {
        let store = MemorySessionStore::new(Duration::from_millis(20));
        let session = store.create()?;
        thread::sleep(Duration::from_millis(40));

        assert!(store.consume(&session.state).is_none());
        assert!(store.is_empty());
        Ok(())
    }

    #[test]
    fn create_prunes_expired_records() -> Result<()> {
        let store = MemorySessionStore::new(Duration::from_millis(20));
        store.create()?;
        store.create()?;
        thread::sleep(Duration::from_millis(40));

        let fresh = store.create()?;
        assert_eq!(store.len(), 1);
        assert!(store.consume(&fresh.state).is_some());
        Ok(())
    }

    #[tokio::test]
    async fn sweeper_prunes_in_background() -> Result<()> {
        let store = Arc::new(MemorySessionStore::new(Duration::from_millis(20)));
        store.create()?;
        let handle = store.spawn_sweeper(Duration::from_millis(10));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(store.is_empty());

        drop(store);
        tokio::time::timeout(Duration::from_secs(1), handle).await??;
        Ok(())
    }
}
