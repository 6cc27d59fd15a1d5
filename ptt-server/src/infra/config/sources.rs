use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raw configuration as defined in a TOML file.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct FileConfig {
    #[serde(default)]
    pub server: FileServerConfig,
    #[serde(default)]
    pub database: FileDatabaseConfig,
    #[serde(default)]
    pub plugins: FilePluginConfig,
    #[serde(default)]
    pub sessions: FileSessionConfig,
    #[serde(default)]
    pub sse: FileSseConfig,
    #[serde(default)]
    pub auth: FileAuthConfig,
    #[serde(default)]
    pub logging: FileLoggingConfig,
    pub dev_mode: Option<bool>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileServerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileDatabaseConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FilePluginConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub marker: Option<String>,
    /// Humantime duration, e.g. `"10s"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handshake_timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub socket_dir: Option<PathBuf>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileSessionConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cookie_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle_timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub absolute_timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gc_interval: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secure_cookie: Option<bool>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileSseConfig {
    /// `"0s"` disables keep-alive comments.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_alive: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relay_buffer: Option<usize>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileAuthConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_owner: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileLoggingConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json: Option<bool>,
}

/// Environment-derived configuration values.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub config_path: Option<PathBuf>,
    pub server_host: Option<String>,
    pub server_port: Option<u16>,
    pub database_url: Option<String>,
    pub plugins_dir: Option<PathBuf>,
    pub plugin_marker: Option<String>,
    pub plugin_handshake_timeout: Option<String>,
    pub plugin_socket_dir: Option<PathBuf>,
    pub session_cookie_name: Option<String>,
    pub session_idle_timeout: Option<String>,
    pub session_absolute_timeout: Option<String>,
    pub session_gc_interval: Option<String>,
    pub session_secure_cookie: Option<bool>,
    pub sse_keep_alive: Option<String>,
    pub sse_relay_buffer: Option<usize>,
    pub root_password: Option<String>,
    pub fallback_owner: Option<String>,
    pub log_json: Option<bool>,
    pub dev_mode: Option<bool>,
}

impl EnvConfig {
    pub fn gather() -> Self {
        let mut env_config = Self::default();

        env_config.config_path =
            std::env::var("PTT_CONFIG").ok().map(PathBuf::from);

        // PTT_ADDR takes `host:port` or `:port`.
        if let Ok(addr) = std::env::var("PTT_ADDR")
            && let Some((host, port)) = addr.rsplit_once(':')
        {
            if !host.is_empty() {
                env_config.server_host = Some(host.to_string());
            }
            env_config.server_port = port.parse().ok();
        }
        if let Ok(host) = std::env::var("SERVER_HOST") {
            env_config.server_host = Some(host);
        }
        if let Some(port) = std::env::var("SERVER_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            env_config.server_port = Some(port);
        }

        env_config.database_url = std::env::var("DATABASE_URL").ok();

        env_config.plugins_dir =
            std::env::var("PLUGINS_DIR").ok().map(PathBuf::from);
        env_config.plugin_marker = std::env::var("PLUGIN_MARKER").ok();
        env_config.plugin_handshake_timeout =
            std::env::var("PLUGIN_HANDSHAKE_TIMEOUT").ok();
        env_config.plugin_socket_dir =
            std::env::var("PLUGIN_SOCKET_DIR").ok().map(PathBuf::from);

        env_config.session_cookie_name =
            std::env::var("SESSION_COOKIE_NAME").ok();
        env_config.session_idle_timeout =
            std::env::var("SESSION_IDLE_TIMEOUT").ok();
        env_config.session_absolute_timeout =
            std::env::var("SESSION_ABSOLUTE_TIMEOUT").ok();
        env_config.session_gc_interval =
            std::env::var("SESSION_GC_INTERVAL").ok();
        env_config.session_secure_cookie =
            parse_bool_var("SESSION_SECURE_COOKIE");

        env_config.sse_keep_alive = std::env::var("SSE_KEEP_ALIVE").ok();
        env_config.sse_relay_buffer = std::env::var("SSE_RELAY_BUFFER")
            .ok()
            .and_then(|s| s.parse().ok());

        env_config.root_password = std::env::var("ROOT_PASSWORD").ok();
        env_config.fallback_owner = std::env::var("FALLBACK_OWNER").ok();

        env_config.log_json =
            parse_bool_var("LOG_JSON").or_else(|| parse_bool_var("JSON"));

        env_config.dev_mode = parse_bool_var("DEV_MODE").or_else(|| {
            std::env::var("ENV")
                .ok()
                .map(|env| env.eq_ignore_ascii_case("dev"))
        });

        env_config
    }
}

fn parse_bool_var(name: &str) -> Option<bool> {
    std::env::var(name).ok().and_then(|raw| parse_bool(&raw))
}

pub(crate) fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_parsing_accepts_common_spellings() {
        assert_eq!(parse_bool("YES"), Some(true));
        assert_eq!(parse_bool(" off "), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn file_config_parses_partial_sections() {
        let file: FileConfig = toml::from_str(
            r#"
            dev_mode = true

            [server]
            port = 9000

            [sessions]
            idle_timeout = "30m"
            "#,
        )
        .unwrap();
        assert_eq!(file.server.port, Some(9000));
        assert_eq!(file.server.host, None);
        assert_eq!(file.sessions.idle_timeout.as_deref(), Some("30m"));
        assert_eq!(file.dev_mode, Some(true));
    }
}
