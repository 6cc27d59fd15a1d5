//! Error type shared by both contracts.

use thiserror::Error;

/// Failures raised by the RPC substrate and the contracts built on it.
#[derive(Debug, Error)]
pub enum ContractError {
    /// Socket or process I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A frame did not decode.
    #[error("frame codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// The peer closed the connection or the local side shut it down.
    #[error("connection closed")]
    Disconnected,

    /// The remote handler returned an error for this call.
    #[error("remote call failed: {0}")]
    Remote(String),

    /// The persistence layer behind a store call failed.
    #[error("store backend error: {0}")]
    Backend(String),

    /// The handshake line was missing or malformed.
    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error(
        "incompatible plugin protocol: host speaks {expected}, plugin speaks {found}"
    )]
    /// The module speaks another protocol version.
    VersionMismatch { expected: u32, found: u32 },

    /// `Register` returned a manifest that failed validation.
    #[error("invalid module info: {0}")]
    InvalidModuleInfo(String),

    /// The peer answered with a reply variant that does not belong to the call.
    #[error("unexpected reply to {0}")]
    UnexpectedReply(&'static str),

    #[error(
        "this binary is a PTT plugin; it must be launched by the PTT host, not run directly"
    )]
    /// The plugin binary was started without the handshake cookie.
    NotLaunchedByHost,
}

impl ContractError {
    /// True when the failure means the connection itself is gone.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, ContractError::Disconnected | ContractError::Io(_))
    }
}

/// Result alias for contract calls.
pub type ContractResult<T> = Result<T, ContractError>;
