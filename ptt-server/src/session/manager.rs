use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::cookie::SessionCookie;
use super::record::{ExpiryPolicy, Session, UserIdentity};
use crate::infra::config::SessionConfig;

const MAX_ID_ATTEMPTS: usize = 100;

type IdSource = Box<dyn Fn() -> String + Send + Sync>;

/// 32 random bytes, base64url without padding.
pub fn random_session_id() -> String {
    let bytes: [u8; 32] = rand::random();
    URL_SAFE_NO_PAD.encode(bytes)
}

/// In-memory session registry.
///
/// Every read goes through [`SessionManager::lookup`], which treats an
/// expired entry as absent and evicts it on the spot.
pub struct SessionManager {
    sessions: DashMap<String, Arc<Session>>,
    policy: ExpiryPolicy,
    cookie: SessionCookie,
    id_source: IdSource,
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("sessions", &self.sessions.len())
            .field("policy", &self.policy)
            .field("cookie", &self.cookie)
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            sessions: DashMap::new(),
            policy: ExpiryPolicy {
                idle: config.idle_timeout,
                absolute: config.absolute_timeout,
            },
            cookie: SessionCookie::new(config),
            id_source: Box::new(random_session_id),
        }
    }

    /// Replaces the id generator. Used to exercise collision handling.
    pub fn with_id_source<F>(mut self, source: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        self.id_source = Box::new(source);
        self
    }

    pub fn policy(&self) -> ExpiryPolicy {
        self.policy
    }

    pub fn cookie(&self) -> &SessionCookie {
        &self.cookie
    }

    /// Registers a session under a fresh id.
    ///
    /// # Panics
    ///
    /// When the id source yields a live id [`MAX_ID_ATTEMPTS`] times in a row.
    /// At that point the random source cannot be trusted to keep sessions
    /// apart, so serving anyone else would be worse than stopping.
    pub fn create(&self, identity: UserIdentity) -> Arc<Session> {
        for _ in 0..MAX_ID_ATTEMPTS {
            let id = (self.id_source)();
            match self.sessions.entry(id) {
                Entry::Occupied(_) => {
                    warn!("session id collision, regenerating");
                }
                Entry::Vacant(slot) => {
                    let session = Arc::new(Session::new(
                        slot.key().clone(),
                        identity,
                        Instant::now(),
                    ));
                    slot.insert(Arc::clone(&session));
                    info!(username = %session.username(), "session created");
                    return session;
                }
            }
        }
        panic!("no unused session id after {MAX_ID_ATTEMPTS} attempts");
    }

    /// Returns the live session for `id` and refreshes its idle window.
    pub fn lookup(&self, id: &str) -> Option<Arc<Session>> {
        let session = self.sessions.get(id).map(|entry| Arc::clone(entry.value()))?;
        if session.try_touch(Instant::now(), &self.policy) {
            return Some(session);
        }
        self.sessions
            .remove_if(id, |_, current| Arc::ptr_eq(current, &session));
        debug!(username = %session.username(), "expired session evicted on lookup");
        None
    }

    /// Whether `id` is registered, without touching it.
    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn delete(&self, id: &str) -> bool {
        let removed = self.sessions.remove(id).is_some();
        if removed {
            debug!("session deleted");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Signs a user out everywhere. Returns how many sessions went.
    pub fn delete_for_user(&self, user_id: &str) -> usize {
        let mut removed = 0;
        self.sessions.retain(|_, session| {
            let keep = session.user_id() != user_id;
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }

    /// Drops every expired session and returns how many went.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        self.sessions.retain(|_, session| {
            let keep = !session.is_expired(now, &self.policy);
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }

    /// Periodic [`SessionManager::purge_expired`] until `shutdown` fires or
    /// the manager is dropped.
    pub fn spawn_reaper(
        self: &Arc<Self>,
        every: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let manager = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                let removed = manager.purge_expired();
                if removed > 0 {
                    debug!(removed, remaining = manager.len(), "session reaper pass");
                }
            }
            debug!("session reaper stopped");
        })
    }
}
