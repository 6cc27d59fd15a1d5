use once_cell::sync::Lazy;
use std::{fs, path::PathBuf, time::Duration};
use thiserror::Error;

use super::{
    models::{
        AuthConfig, Config, ConfigMetadata, DatabaseConfig, LoggingConfig,
        PluginConfig, ServerConfig, SessionConfig, SseConfig,
    },
    sources::{EnvConfig, FileConfig},
    validation::{self, ConfigGuardRailError, ConfigWarnings},
};

static DEFAULT_CONFIG_LOCATIONS: Lazy<Vec<PathBuf>> = Lazy::new(|| {
    vec![PathBuf::from("ptt.toml"), PathBuf::from("config/ptt.toml")]
});

/// Reads `.env`, the process environment and an optional TOML file into a
/// [`Config`].
#[derive(Debug, Default)]
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses `path` instead of `PTT_CONFIG` or the default locations. The
    /// file must exist.
    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config_path = Some(path.into());
        self
    }

    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let env_file_loaded = match dotenvy::dotenv() {
            Ok(_) => true,
            Err(dotenvy::Error::Io(_)) => false,
            Err(err) => return Err(err.into()),
        };

        let env_config = EnvConfig::gather();
        let config_path = self.resolve_config_path(&env_config)?;
        let file_config = config_path.as_deref().map(read_config_file).transpose()?;

        let (config, warnings) =
            compose_config(file_config, env_config, config_path, env_file_loaded)?;
        Ok(ConfigLoad { config, warnings })
    }

    /// An explicitly named file must exist; the default locations are only
    /// used when present.
    fn resolve_config_path(
        &self,
        env_config: &EnvConfig,
    ) -> Result<Option<PathBuf>, ConfigLoadError> {
        let explicit = self
            .config_path
            .as_ref()
            .or(env_config.config_path.as_ref());
        match explicit {
            Some(path) if path.exists() => Ok(Some(path.clone())),
            Some(path) => Err(ConfigLoadError::MissingConfig { path: path.clone() }),
            None => Ok(DEFAULT_CONFIG_LOCATIONS
                .iter()
                .find(|candidate| candidate.exists())
                .cloned()),
        }
    }
}

fn read_config_file(path: &std::path::Path) -> Result<FileConfig, ConfigLoadError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigLoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigLoadError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Merges environment over file over defaults.
pub(crate) fn compose_config(
    file_config: Option<FileConfig>,
    env: EnvConfig,
    config_path: Option<PathBuf>,
    env_file_loaded: bool,
) -> Result<(Config, ConfigWarnings), ConfigLoadError> {
    let mut warnings = ConfigWarnings::default();

    if config_path.is_none() {
        warnings.push_with_hint(
            "No ptt.toml detected; using environment variables and defaults",
            "Create ptt.toml or set PTT_CONFIG to tune plugins and sessions",
        );
    }

    let FileConfig {
        server: file_server,
        database: file_database,
        plugins: file_plugins,
        sessions: file_sessions,
        sse: file_sse,
        auth: file_auth,
        logging: file_logging,
        dev_mode: file_dev_mode,
    } = file_config.unwrap_or_default();

    let server_defaults = ServerConfig::default();
    let server = ServerConfig {
        host: env
            .server_host
            .clone()
            .or(file_server.host)
            .unwrap_or(server_defaults.host),
        port: env
            .server_port
            .or(file_server.port)
            .unwrap_or(server_defaults.port),
    };

    let database = DatabaseConfig {
        url: env
            .database_url
            .clone()
            .filter(|value| !value.trim().is_empty())
            .or(file_database.url)
            .unwrap_or_else(|| DatabaseConfig::default().url),
    };

    let plugin_defaults = PluginConfig::default();
    let plugins = PluginConfig {
        dir: env
            .plugins_dir
            .clone()
            .or(file_plugins.dir)
            .unwrap_or(plugin_defaults.dir),
        marker: env
            .plugin_marker
            .clone()
            .or(file_plugins.marker)
            .unwrap_or(plugin_defaults.marker),
        handshake_timeout: duration_field(
            "plugins.handshake_timeout",
            env.plugin_handshake_timeout
                .as_deref()
                .or(file_plugins.handshake_timeout.as_deref()),
        )?
        .unwrap_or(plugin_defaults.handshake_timeout),
        socket_dir: env
            .plugin_socket_dir
            .clone()
            .or(file_plugins.socket_dir)
            .unwrap_or(plugin_defaults.socket_dir),
    };

    let session_defaults = SessionConfig::default();
    let sessions = SessionConfig {
        cookie_name: env
            .session_cookie_name
            .clone()
            .or(file_sessions.cookie_name)
            .unwrap_or(session_defaults.cookie_name),
        idle_timeout: duration_field(
            "sessions.idle_timeout",
            env.session_idle_timeout
                .as_deref()
                .or(file_sessions.idle_timeout.as_deref()),
        )?
        .unwrap_or(session_defaults.idle_timeout),
        absolute_timeout: duration_field(
            "sessions.absolute_timeout",
            env.session_absolute_timeout
                .as_deref()
                .or(file_sessions.absolute_timeout.as_deref()),
        )?
        .unwrap_or(session_defaults.absolute_timeout),
        gc_interval: duration_field(
            "sessions.gc_interval",
            env.session_gc_interval
                .as_deref()
                .or(file_sessions.gc_interval.as_deref()),
        )?
        .unwrap_or(session_defaults.gc_interval),
        secure_cookie: env
            .session_secure_cookie
            .or(file_sessions.secure_cookie)
            .unwrap_or(session_defaults.secure_cookie),
    };

    let sse_defaults = SseConfig::default();
    let keep_alive = match duration_field(
        "sse.keep_alive",
        env.sse_keep_alive
            .as_deref()
            .or(file_sse.keep_alive.as_deref()),
    )? {
        Some(Duration::ZERO) => None,
        Some(interval) => Some(interval),
        None => sse_defaults.keep_alive,
    };
    let sse = SseConfig {
        keep_alive,
        relay_buffer: env
            .sse_relay_buffer
            .or(file_sse.relay_buffer)
            .unwrap_or(sse_defaults.relay_buffer),
    };

    let auth_defaults = AuthConfig::default();
    let auth = AuthConfig {
        root_password: env
            .root_password
            .clone()
            .or(file_auth.root_password)
            .unwrap_or(auth_defaults.root_password),
        fallback_owner: env
            .fallback_owner
            .clone()
            .or(file_auth.fallback_owner)
            .unwrap_or(auth_defaults.fallback_owner),
    };

    let logging = LoggingConfig {
        json: env.log_json.or(file_logging.json).unwrap_or(false),
    };

    let dev_mode = env.dev_mode.or(file_dev_mode).unwrap_or(false);

    let config = Config {
        server,
        database,
        plugins,
        sessions,
        sse,
        auth,
        logging,
        dev_mode,
        metadata: ConfigMetadata {
            config_path,
            env_file_loaded,
        },
    };

    warnings.extend(validation::apply_guard_rails(&config)?);

    Ok((config, warnings))
}

fn duration_field(
    field: &'static str,
    raw: Option<&str>,
) -> Result<Option<Duration>, ConfigLoadError> {
    raw.map(|value| {
        humantime::parse_duration(value.trim()).map_err(|source| {
            ConfigLoadError::InvalidDuration {
                field,
                value: value.to_string(),
                source,
            }
        })
    })
    .transpose()
}

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("configuration file missing: {path}")]
    MissingConfig { path: PathBuf },
    #[error("failed to read configuration {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid duration '{value}' for {field}")]
    InvalidDuration {
        field: &'static str,
        value: String,
        #[source]
        source: humantime::DurationError,
    },
    #[error(transparent)]
    GuardRail(#[from] ConfigGuardRailError),
    #[error(transparent)]
    EnvFile(#[from] dotenvy::Error),
}

#[derive(Debug)]
pub struct ConfigLoad {
    pub config: Config,
    pub warnings: ConfigWarnings,
}
