use std::path::PathBuf;
use std::time::Duration;

/// Fully resolved host configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub plugins: PluginConfig,
    pub sessions: SessionConfig,
    pub sse: SseConfig,
    pub auth: AuthConfig,
    pub logging: LoggingConfig,
    pub dev_mode: bool,
    pub metadata: ConfigMetadata,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// SQLite connection URL, e.g. `sqlite:db.sqlite`.
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:db.sqlite".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PluginConfig {
    pub dir: PathBuf,
    /// Substring a file name must contain to be launched.
    pub marker: String,
    pub handshake_timeout: Duration,
    /// Where the store RPC socket is created.
    pub socket_dir: PathBuf,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("plugins"),
            marker: ".plugin".to_string(),
            handshake_timeout: Duration::from_secs(10),
            socket_dir: std::env::temp_dir(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub cookie_name: String,
    pub idle_timeout: Duration,
    pub absolute_timeout: Duration,
    pub gc_interval: Duration,
    pub secure_cookie: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "session".to_string(),
            idle_timeout: Duration::from_secs(3 * 60 * 60),
            absolute_timeout: Duration::from_secs(12 * 60 * 60),
            gc_interval: Duration::from_secs(60),
            secure_cookie: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SseConfig {
    /// Interval for `: keep-alive` comments; `None` disables them.
    pub keep_alive: Option<Duration>,
    /// Frames buffered between the relay task and the response body.
    pub relay_buffer: usize,
}

impl Default for SseConfig {
    fn default() -> Self {
        Self {
            keep_alive: Some(Duration::from_secs(15)),
            relay_buffer: 16,
        }
    }
}

pub const DEFAULT_ROOT_PASSWORD: &str = "changeme!!";

#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Password given to the bootstrap `root` account on first start.
    pub root_password: String,
    /// Receives projects whose owner is deleted.
    pub fallback_owner: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            root_password: DEFAULT_ROOT_PASSWORD.to_string(),
            fallback_owner: "root".to_string(),
        }
    }
}

impl AuthConfig {
    pub fn is_default_root_password(&self) -> bool {
        self.root_password == DEFAULT_ROOT_PASSWORD
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoggingConfig {
    pub json: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ConfigMetadata {
    pub config_path: Option<PathBuf>,
    pub env_file_loaded: bool,
}
