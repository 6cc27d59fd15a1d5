use std::fmt;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::time::Instant;

/// Who a session belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub user_id: String,
    pub username: String,
    pub is_admin: bool,
}

/// The project a user currently works in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectRef {
    pub id: String,
    pub name: String,
}

/// Idle and absolute bounds. Reaching either one expires a session for good.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiryPolicy {
    pub idle: Duration,
    pub absolute: Duration,
}

impl ExpiryPolicy {
    pub fn is_expired(
        &self,
        now: Instant,
        created_at: Instant,
        last_activity: Instant,
    ) -> bool {
        now.saturating_duration_since(last_activity) >= self.idle
            || now.saturating_duration_since(created_at) >= self.absolute
    }
}

/// One authenticated browser.
pub struct Session {
    id: String,
    identity: UserIdentity,
    project: RwLock<Option<ProjectRef>>,
    created_at: Instant,
    last_activity: Mutex<Instant>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("username", &self.identity.username)
            .field("created_at", &self.created_at)
            .field("project", &*self.project.read())
            .finish_non_exhaustive()
    }
}

impl Session {
    pub(crate) fn new(id: String, identity: UserIdentity, now: Instant) -> Self {
        Self {
            id,
            identity,
            project: RwLock::new(None),
            created_at: now,
            last_activity: Mutex::new(now),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn identity(&self) -> &UserIdentity {
        &self.identity
    }

    pub fn user_id(&self) -> &str {
        &self.identity.user_id
    }

    pub fn username(&self) -> &str {
        &self.identity.username
    }

    pub fn is_admin(&self) -> bool {
        self.identity.is_admin
    }

    pub fn project(&self) -> Option<ProjectRef> {
        self.project.read().clone()
    }

    pub fn set_project(&self, project: Option<ProjectRef>) {
        *self.project.write() = project;
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn last_activity(&self) -> Instant {
        *self.last_activity.lock()
    }

    pub(crate) fn is_expired(&self, now: Instant, policy: &ExpiryPolicy) -> bool {
        policy.is_expired(now, self.created_at, *self.last_activity.lock())
    }

    /// Slides the idle window forward unless the session already expired.
    /// Check and refresh happen under one lock, so an expired session can
    /// never be revived by a concurrent request.
    pub(crate) fn try_touch(&self, now: Instant, policy: &ExpiryPolicy) -> bool {
        let mut last_activity = self.last_activity.lock();
        if policy.is_expired(now, self.created_at, *last_activity) {
            return false;
        }
        *last_activity = now;
        true
    }
}
