//! Authenticated browser sessions: an in-memory registry with idle and
//! absolute expiry, the session cookie, and the request guard.

mod cookie;
mod manager;
mod middleware;
mod record;

pub use cookie::SessionCookie;
pub use manager::{SessionManager, random_session_id};
pub use middleware::{CurrentSession, require_session};
pub use record::{ExpiryPolicy, ProjectRef, Session, UserIdentity};
