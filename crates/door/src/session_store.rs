//! Per-tenant session store.
//!
//! Tokens are 256 bits of CSPRNG output, hex-encoded. Expired entries are
//! evicted lazily on lookup and swept by a background compaction task every
//! minute. The store dies with its tenant: `destroy` aborts the sweeper and
//! drops every session regardless of remaining TTL.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agentdoor_core::Session;
use chrono::Utc;
use rand::RngCore;
use tokio::task::JoinHandle;
use tracing::debug;

/// Default session lifetime.
pub const SESSION_TTL: Duration = Duration::from_secs(3600);

/// How often the background sweep purges expired sessions.
const COMPACTION_INTERVAL: Duration = Duration::from_secs(60);

pub struct SessionStore {
    ttl: chrono::Duration,
    sessions: Arc<Mutex<HashMap<String, Session>>>,
    compactor: Mutex<Option<JoinHandle<()>>>,
}

impl SessionStore {
    /// Create a store with the default TTL. Must run inside a tokio runtime
    /// (the compaction task is spawned here).
    pub fn new() -> Self {
        Self::with_ttl(SESSION_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        let sessions: Arc<Mutex<HashMap<String, Session>>> = Arc::default();
        let sweep_target = Arc::clone(&sessions);
        let compactor = tokio::spawn(async move {
            let mut tick = tokio::time::interval(COMPACTION_INTERVAL);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                let now = Utc::now();
                let mut sessions = sweep_target.lock().unwrap_or_else(|e| e.into_inner());
                let before = sessions.len();
                sessions.retain(|_, session| !session.is_expired_at(now));
                let purged = before - sessions.len();
                if purged > 0 {
                    debug!(purged, "Purged expired sessions");
                }
            }
        });
        Self {
            ttl: chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::seconds(3600)),
            sessions,
            compactor: Mutex::new(Some(compactor)),
        }
    }

    /// Mint a session holding a snapshot of the tenant's capability names.
    pub fn create(&self, capabilities: Vec<String>) -> Session {
        let session = Session {
            token: random_token(),
            capabilities,
            expires_at: Utc::now() + self.ttl,
        };
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(session.token.clone(), session.clone());
        session
    }

    /// Look up a token. Unknown and expired tokens both come back `None`;
    /// an expired entry is evicted on the spot.
    pub fn validate(&self, token: &str) -> Option<Session> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        match sessions.get(token) {
            Some(session) if session.is_expired_at(Utc::now()) => {
                sessions.remove(token);
                None
            }
            Some(session) => Some(session.clone()),
            None => None,
        }
    }

    /// Remove a session. Idempotent; unknown tokens are a no-op.
    pub fn end(&self, token: &str) {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(token);
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop compaction and drop every session. Safe to call repeatedly.
    pub fn destroy(&self) {
        if let Some(handle) = self.compactor.lock().unwrap_or_else(|e| e.into_inner()).take() {
            handle.abort();
        }
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

impl Drop for SessionStore {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// 32 bytes from the thread CSPRNG, hex-encoded to 64 chars.
fn random_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
