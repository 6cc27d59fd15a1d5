use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::future::join_all;
use ptt_contracts::{Module, ModuleClient};
use tracing::{error, info, warn};

use super::PluginError;
use super::discovery::discover;
use super::process::{PluginProcess, file_label};
use super::registry::{PluginHandle, PluginOrigin, PluginRegistry};
use crate::infra::config::PluginConfig;

/// Time a plugin gets to exit after its RPC channel closes.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Launches plugin executables and tears them down again.
#[derive(Debug)]
pub struct PluginSupervisor {
    config: PluginConfig,
    store_addr: PathBuf,
    stopped: AtomicBool,
}

impl PluginSupervisor {
    /// `store_addr` is handed to every plugin in `Register`.
    pub fn new(config: PluginConfig, store_addr: PathBuf) -> Self {
        Self {
            config,
            store_addr,
            stopped: AtomicBool::new(false),
        }
    }

    pub async fn discover(&self) -> Vec<PathBuf> {
        discover(&self.config.dir, &self.config.marker).await
    }

    /// Spawns `candidate`, handshakes, connects and registers it.
    ///
    /// The child is terminated on every failure, including an id that
    /// `registry` already holds.
    pub async fn start(
        &self,
        candidate: &Path,
        registry: &PluginRegistry,
    ) -> Result<PluginHandle, PluginError> {
        let file = file_label(candidate);
        let (process, handshake) =
            PluginProcess::launch(candidate, self.config.handshake_timeout).await?;

        match self.connect_and_register(&file, &handshake.socket, registry).await {
            Ok((client, info)) => {
                info!(
                    plugin = %file,
                    plugin_id = %info.id,
                    version = %info.version,
                    routes = info.routes.len(),
                    root = %info.root_path(),
                    "plugin started"
                );
                let module: Arc<dyn Module> = Arc::new(client.clone());
                Ok(PluginHandle::new(
                    info,
                    module,
                    PluginOrigin::Process { process, client },
                ))
            }
            Err(err) => {
                process.kill().await;
                Err(err)
            }
        }
    }

    async fn connect_and_register(
        &self,
        file: &str,
        socket: &Path,
        registry: &PluginRegistry,
    ) -> Result<(ModuleClient, ptt_contracts::ModuleInfo), PluginError> {
        let contract = |source| PluginError::Contract {
            file: file.to_string(),
            source,
        };
        let client = ModuleClient::connect(socket).await.map_err(contract)?;
        let registered = async {
            let info = client.register(self.store_addr.clone()).await.map_err(contract)?;
            info.validate().map_err(contract)?;
            if registry.contains_id(&info.id) {
                return Err(PluginError::DuplicateId(info.id));
            }
            Ok::<_, PluginError>(info)
        }
        .await;
        match registered {
            Ok(info) => Ok((client, info)),
            Err(err) => {
                client.close();
                Err(err)
            }
        }
    }

    /// Starts every discovered candidate. Failures are logged and skipped.
    pub async fn start_all(&self, registry: &mut PluginRegistry) -> usize {
        let candidates = self.discover().await;
        if candidates.is_empty() {
            info!(dir = %self.config.dir.display(), "no plugins found");
        }

        let mut started = 0;
        for candidate in candidates {
            let file = file_label(&candidate);
            let handle = match self.start(&candidate, registry).await {
                Ok(handle) => handle,
                Err(err) => {
                    error!(plugin = %file, error = %err, "failed to start plugin");
                    continue;
                }
            };
            if let Err(err) = registry.insert(handle) {
                // start() already checked the id; nothing else inserts here.
                warn!(plugin = %file, error = %err, "plugin rejected by registry");
                continue;
            }
            started += 1;
        }
        started
    }

    /// Closes every channel and terminates every process still running.
    /// Only the first call does any work.
    pub async fn shutdown(&self, registry: &PluginRegistry) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(plugins = registry.len(), "stopping plugins");
        join_all(registry.iter().map(|handle| handle.terminate(SHUTDOWN_GRACE))).await;
    }
}
