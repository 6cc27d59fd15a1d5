use std::fmt;
use std::sync::Arc;

use sqlx::SqlitePool;

use crate::infra::config::Config;
use crate::plugins::PluginRegistry;
use crate::session::SessionManager;
use crate::store::ScopedStore;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pool: SqlitePool,
    pub sessions: Arc<SessionManager>,
    pub plugins: Arc<PluginRegistry>,
    pub store: ScopedStore,
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState")
            .field("plugins", &self.plugins.len())
            .field("sessions", &self.sessions.len())
            .finish_non_exhaustive()
    }
}

impl AppState {
    pub fn config(&self) -> &Config {
        &self.config
    }
}
