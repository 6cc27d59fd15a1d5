//! Plugin discovery, process supervision and the registry of loaded
//! modules.

mod discovery;
mod process;
mod registry;
mod supervisor;

pub use discovery::discover;
pub use process::PluginProcess;
pub use registry::{PluginHandle, PluginOrigin, PluginRegistry};
pub use supervisor::PluginSupervisor;

use std::time::Duration;

use ptt_contracts::ContractError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("failed to spawn {file}: {source}")]
    Spawn {
        file: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{0} exited before completing the handshake")]
    HandshakeClosed(String),
    #[error("{file} did not complete the handshake within {timeout:?}")]
    HandshakeTimeout { file: String, timeout: Duration },
    #[error("{file}: {source}")]
    Contract {
        file: String,
        #[source]
        source: ContractError,
    },
    #[error("module id `{0}` is already registered")]
    DuplicateId(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
