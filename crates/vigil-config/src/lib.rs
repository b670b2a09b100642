//! # vigil-config
//!
//! Configuration for the Vigil service and its clients. Reads from `vigil.toml`,
//! environment variables, and CLI overrides, in that precedence order.
//!
//! Supports hot-reload via filesystem watcher.

pub mod loader;
pub mod schema;

pub use loader::{ConfigLoader, SharedConfig};
pub use schema::VigilConfig;
pub use schema::{
    AppealsConfig, ConfigWarning, ConsoleConfig, EmailConfig, EnforcementConfig, LoggingConfig,
    ModerationConfig, NotificationsConfig, ServerConfig, ServicesConfig, StoreConfig,
    WarningSeverity,
};
