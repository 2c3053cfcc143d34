//! Live terminal sessions.
//!
//! Every operation takes the one registry lock for a single map lookup,
//! insert or delete. The lock is never held across an await point.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Lifecycle of a bridge session. Phases only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionPhase {
    Negotiating,
    Attached,
    Bridging,
    Closed,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionPhase::Negotiating => "negotiating",
            SessionPhase::Attached => "attached",
            SessionPhase::Bridging => "bridging",
            SessionPhase::Closed => "closed",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
struct SessionRecord {
    target: String,
    created_at: DateTime<Utc>,
    bootstrap_sent: bool,
    phase: SessionPhase,
}

pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, SessionRecord>>,
    sequence: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            sequence: AtomicU64::new(0),
        }
    }

    /// Register a new session for `target`. The entry lives as long as the returned guard.
    pub fn create(self: &Arc<Self>, target: &str) -> SessionGuard {
        let created_at = Utc::now();
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let key = format!(
            "{}-{}-{}",
            target,
            created_at.format("%Y%m%d-%H%M%S%.3f"),
            seq
        );

        self.sessions.lock().insert(
            key.clone(),
            SessionRecord {
                target: target.to_string(),
                created_at,
                bootstrap_sent: false,
                phase: SessionPhase::Negotiating,
            },
        );
        debug!(session = %key, "session registered");

        SessionGuard {
            registry: Arc::clone(self),
            key,
        }
    }

    /// Atomically mark the bootstrap as sent.
    ///
    /// Returns true exactly once per session: the caller that sees `true` must send it.
    pub fn try_consume_bootstrap(&self, key: &str) -> bool {
        let mut sessions = self.sessions.lock();
        match sessions.get_mut(key) {
            Some(record) if !record.bootstrap_sent => {
                record.bootstrap_sent = true;
                true
            }
            _ => false,
        }
    }

    /// Move a session forward. Attempts to move backwards are ignored.
    pub fn advance(&self, key: &str, phase: SessionPhase) {
        let mut sessions = self.sessions.lock();
        if let Some(record) = sessions.get_mut(key) {
            if phase > record.phase {
                record.phase = phase;
            }
        }
    }

    pub fn phase(&self, key: &str) -> Option<SessionPhase> {
        self.sessions.lock().get(key).map(|record| record.phase)
    }

    pub fn remove(&self, key: &str) {
        let removed = self.sessions.lock().remove(key);
        if let Some(record) = removed {
            let lifetime = Utc::now() - record.created_at;
            debug!(
                session = %key,
                target = %record.target,
                phase = %record.phase,
                lifetime_ms = lifetime.num_milliseconds(),
                "session removed"
            );
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.sessions.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Scoped registry entry; removes the session when dropped, on every exit path.
pub struct SessionGuard {
    registry: Arc<SessionRegistry>,
    key: String,
}

impl SessionGuard {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn advance(&self, phase: SessionPhase) {
        self.registry.advance(&self.key, phase);
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.advance(&self.key, SessionPhase::Closed);
        self.registry.remove(&self.key);
    }
}
