use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use ptt_contracts::{Module, ModuleClient, ModuleInfo};
use tracing::info;

use super::PluginError;
use super::process::PluginProcess;

/// Where a module runs.
#[derive(Debug)]
pub enum PluginOrigin {
    /// Compiled into the host.
    Local,
    /// A child process reached over RPC.
    Process {
        process: PluginProcess,
        client: ModuleClient,
    },
}

/// One loaded module and its validated identity.
pub struct PluginHandle {
    info: ModuleInfo,
    module: Arc<dyn Module>,
    origin: PluginOrigin,
}

impl fmt::Debug for PluginHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginHandle")
            .field("id", &self.info.id)
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

impl PluginHandle {
    pub(crate) fn new(
        info: ModuleInfo,
        module: Arc<dyn Module>,
        origin: PluginOrigin,
    ) -> Self {
        Self {
            info,
            module,
            origin,
        }
    }

    pub fn id(&self) -> &str {
        &self.info.id
    }

    pub fn info(&self) -> &ModuleInfo {
        &self.info
    }

    /// `/plugin/{id}`.
    pub fn root_path(&self) -> String {
        self.info.root_path()
    }

    pub fn module(&self) -> &Arc<dyn Module> {
        &self.module
    }

    pub fn process(&self) -> Option<&PluginProcess> {
        match &self.origin {
            PluginOrigin::Process { process, .. } => Some(process),
            PluginOrigin::Local => None,
        }
    }

    /// Closes the RPC channel, then stops the process.
    pub async fn terminate(&self, grace: Duration) {
        if let PluginOrigin::Process { process, client } = &self.origin {
            client.close();
            process.terminate(grace).await;
        }
    }
}

/// Arena of loaded modules, indexed by position and by module id.
///
/// Built once before the router exists and read-only afterwards.
#[derive(Debug, Default)]
pub struct PluginRegistry {
    handles: Vec<Arc<PluginHandle>>,
    by_id: HashMap<String, usize>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains_id(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    /// Adds `handle`, refusing a second module with the same id.
    pub fn insert(&mut self, handle: PluginHandle) -> Result<usize, PluginError> {
        if self.contains_id(handle.id()) {
            return Err(PluginError::DuplicateId(handle.id().to_string()));
        }
        let index = self.handles.len();
        self.by_id.insert(handle.id().to_string(), index);
        self.handles.push(Arc::new(handle));
        Ok(index)
    }

    /// Registers an in-process module the same way a plugin process is.
    pub async fn register_local(
        &mut self,
        module: Arc<dyn Module>,
        store_addr: &Path,
    ) -> Result<usize, PluginError> {
        let contract = |source| PluginError::Contract {
            file: "<local>".to_string(),
            source,
        };
        let info = module
            .register(store_addr.to_path_buf())
            .await
            .map_err(contract)?;
        info.validate().map_err(contract)?;
        let id = info.id.clone();
        let index = self.insert(PluginHandle::new(info, module, PluginOrigin::Local))?;
        info!(plugin_id = %id, "local module registered");
        Ok(index)
    }

    pub fn get(&self, index: usize) -> Option<&Arc<PluginHandle>> {
        self.handles.get(index)
    }

    pub fn by_id(&self, id: &str) -> Option<&Arc<PluginHandle>> {
        self.by_id.get(id).and_then(|&index| self.handles.get(index))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<PluginHandle>> {
        self.handles.iter()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}
