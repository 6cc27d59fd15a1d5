use std::path::{Path, PathBuf};
use std::sync::Arc;

use ptt_contracts::rpc::serve_listener;
use ptt_contracts::store::{StoreCall, StoreReply, StoreService};
use rand::Rng;
use rand::distr::Alphanumeric;
use tokio::net::UnixListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{ScopedStore, StoreError};

/// Unix socket listener that serves the Store contract to modules.
///
/// The socket file is removed on [`StoreServer::shutdown`] and on drop.
#[derive(Debug)]
pub struct StoreServer {
    path: PathBuf,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl StoreServer {
    /// Binds a fresh socket inside `dir` and starts accepting.
    pub fn bind(dir: &Path, store: ScopedStore) -> Result<Self, StoreError> {
        std::fs::create_dir_all(dir)?;
        let suffix: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(12)
            .map(char::from)
            .collect();
        let path = dir.join(format!("ptt-store-{suffix}.sock"));
        let listener = UnixListener::bind(&path)?;

        let shutdown = CancellationToken::new();
        let service = Arc::new(StoreService::new(Arc::new(store)));
        let task = tokio::spawn(serve_listener::<StoreCall, StoreReply, _>(
            listener,
            service,
            shutdown.clone(),
        ));
        info!(socket = %path.display(), "store server listening");

        Ok(Self {
            path,
            shutdown,
            task: Some(task),
        })
    }

    /// Address handed to modules in `Register`.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stops accepting, closes live connections and removes the socket.
    pub async fn shutdown(&mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        self.remove_socket();
    }

    fn remove_socket(&self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                warn!(socket = %self.path.display(), error = %err, "failed to remove store socket")
            }
        }
    }
}

impl Drop for StoreServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.remove_socket();
    }
}

#[cfg(test)]
mod tests {
    use ptt_contracts::store::{Store, StoreClient, StoreKey};

    use super::*;
    use crate::db;

    #[tokio::test]
    async fn plugins_reach_the_store_over_the_socket() {
        let dir = tempfile::tempdir().unwrap();
        let pool = db::connect("sqlite::memory:").await.unwrap();
        db::initialize_schema(&pool).await.unwrap();
        let store = ScopedStore::new(pool);

        let mut server = StoreServer::bind(dir.path(), store.clone()).unwrap();
        let client = StoreClient::connect(server.path()).await.unwrap();
        let key = StoreKey::new("example", "u1", "p1", "sum");

        client.set(&key, b"7".to_vec()).await.unwrap();
        assert_eq!(store.get_value(&key).await.unwrap(), Some(b"7".to_vec()));
        assert_eq!(client.get(&key).await.unwrap(), Some(b"7".to_vec()));

        let socket = server.path().to_path_buf();
        server.shutdown().await;
        assert!(!socket.exists());
    }
}
