//! One-time compatibility check between host and module.
//!
//! The host launches the module with [`MAGIC_COOKIE_KEY`] set to
//! [`MAGIC_COOKIE_VALUE`]. The module answers with one line on stdout:
//!
//! ```text
//! CORE|PROTOCOL|unix|/path/to/socket|json
//! ```
//!
//! Anything else on stdout before that line is a handshake failure.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::ContractError;

/// Version of the framing and handshake line layout.
pub const CORE_PROTOCOL_VERSION: u32 = 1;
/// Version of the Module and Store contracts.
pub const APP_PROTOCOL_VERSION: u32 = 1;

/// Environment variable the host sets on every module it launches.
pub const MAGIC_COOKIE_KEY: &str = "PTT_PLUGIN";
/// Expected value of [`MAGIC_COOKIE_KEY`].
pub const MAGIC_COOKIE_VALUE: &str = "HELLO_PLUGINS";

const NETWORK: &str = "unix";
const ENCODING: &str = "json";

/// Parsed form of the line a module prints once it is listening.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeLine {
    /// Version of the handshake format itself.
    pub core_version: u32,
    /// Version of the Module and Store contracts.
    pub app_version: u32,
    /// Unix socket the module listens on.
    pub socket: PathBuf,
}

impl HandshakeLine {
    /// Line announcing `socket` at the versions this build speaks.
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self {
            core_version: CORE_PROTOCOL_VERSION,
            app_version: APP_PROTOCOL_VERSION,
            socket: socket.into(),
        }
    }

    /// Rejects lines written for a different protocol generation.
    pub fn verify(&self) -> Result<(), ContractError> {
        if self.core_version != CORE_PROTOCOL_VERSION {
            return Err(ContractError::VersionMismatch {
                expected: CORE_PROTOCOL_VERSION,
                found: self.core_version,
            });
        }
        if self.app_version != APP_PROTOCOL_VERSION {
            return Err(ContractError::VersionMismatch {
                expected: APP_PROTOCOL_VERSION,
                found: self.app_version,
            });
        }
        Ok(())
    }
}

impl fmt::Display for HandshakeLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}|{NETWORK}|{}|{ENCODING}",
            self.core_version,
            self.app_version,
            self.socket.display()
        )
    }
}

impl FromStr for HandshakeLine {
    type Err = ContractError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let bad = |why: &str| {
            ContractError::Handshake(format!("{why} in line {line:?}"))
        };
        let parts: Vec<&str> = line.trim().split('|').collect();
        let [core, app, network, address, encoding] = parts.as_slice() else {
            return Err(bad("expected 5 '|'-separated fields"));
        };

        let core_version =
            core.parse().map_err(|_| bad("non-numeric core version"))?;
        let app_version =
            app.parse().map_err(|_| bad("non-numeric protocol version"))?;
        if *network != NETWORK {
            return Err(bad("unsupported network"));
        }
        if *encoding != ENCODING {
            return Err(bad("unsupported encoding"));
        }
        if address.is_empty() {
            return Err(bad("empty address"));
        }

        Ok(Self {
            core_version,
            app_version,
            socket: PathBuf::from(address),
        })
    }
}

/// Checks the environment a module was launched with.
pub fn check_magic_cookie() -> Result<(), ContractError> {
    match std::env::var(MAGIC_COOKIE_KEY) {
        Ok(value) if value == MAGIC_COOKIE_VALUE => Ok(()),
        _ => Err(ContractError::NotLaunchedByHost),
    }
}
