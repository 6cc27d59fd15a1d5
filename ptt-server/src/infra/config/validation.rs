use std::time::Duration;

use thiserror::Error;

use super::models::Config;

#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct ConfigWarnings {
    pub items: Vec<ConfigWarning>,
}

impl ConfigWarnings {
    pub fn push<S: Into<String>>(&mut self, message: S) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: None,
        });
    }

    pub fn push_with_hint<S: Into<String>, H: Into<String>>(
        &mut self,
        message: S,
        hint: H,
    ) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: Some(hint.into()),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn extend(&mut self, other: ConfigWarnings) {
        self.items.extend(other.items);
    }
}

#[derive(Debug, Error)]
pub enum ConfigGuardRailError {
    #[error("{field} must be greater than zero")]
    ZeroDuration { field: &'static str },
    #[error("session cookie name must not be empty")]
    EmptyCookieName,
    #[error("plugin marker must not be empty")]
    EmptyPluginMarker,
    #[error("sse relay buffer must hold at least one frame")]
    EmptyRelayBuffer,
}

pub fn apply_guard_rails(
    config: &Config,
) -> Result<ConfigWarnings, ConfigGuardRailError> {
    let mut warnings = ConfigWarnings::default();

    for (field, value) in [
        ("sessions.idle_timeout", config.sessions.idle_timeout),
        ("sessions.absolute_timeout", config.sessions.absolute_timeout),
        ("sessions.gc_interval", config.sessions.gc_interval),
        ("plugins.handshake_timeout", config.plugins.handshake_timeout),
    ] {
        if value == Duration::ZERO {
            return Err(ConfigGuardRailError::ZeroDuration { field });
        }
    }
    if config.sessions.cookie_name.trim().is_empty() {
        return Err(ConfigGuardRailError::EmptyCookieName);
    }
    if config.plugins.marker.is_empty() {
        return Err(ConfigGuardRailError::EmptyPluginMarker);
    }
    if config.sse.relay_buffer == 0 {
        return Err(ConfigGuardRailError::EmptyRelayBuffer);
    }

    if config.sessions.absolute_timeout < config.sessions.idle_timeout {
        warnings.push(
            "sessions.absolute_timeout is shorter than idle_timeout; the idle window will never be reached",
        );
    }

    if config.auth.is_default_root_password() {
        warnings.push_with_hint(
            "root account uses the default bootstrap password",
            "Set ROOT_PASSWORD (or auth.root_password) before first start",
        );
    }

    if !config.sessions.secure_cookie && !config.dev_mode {
        warnings.push(
            "session cookies are sent without the Secure attribute outside dev mode",
        );
    }

    Ok(warnings)
}
