pub mod loader;
pub mod models;
pub mod sources;
pub mod validation;

pub use loader::{ConfigLoad, ConfigLoadError, ConfigLoader};
pub use models::{
    AuthConfig, Config, ConfigMetadata, DatabaseConfig, LoggingConfig,
    PluginConfig, ServerConfig, SessionConfig, SseConfig,
};
pub use validation::{ConfigGuardRailError, ConfigWarning, ConfigWarnings};
