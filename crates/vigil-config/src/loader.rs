use notify::{Event as NotifyEvent, EventKind, RecursiveMode, Watcher};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::schema::VigilConfig;
use vigil_core::VigilError;

/// Handle on the live configuration. Every read sees the latest reload.
#[derive(Debug, Clone, Default)]
pub struct SharedConfig(Arc<RwLock<VigilConfig>>);

impl SharedConfig {
    /// A handle that is not attached to any file.
    pub fn new(config: VigilConfig) -> Self {
        Self(Arc::new(RwLock::new(config)))
    }

    pub fn snapshot(&self) -> VigilConfig {
        self.0.read().clone()
    }

    /// Read one value without cloning the whole config.
    pub fn read<R>(&self, f: impl FnOnce(&VigilConfig) -> R) -> R {
        f(&self.0.read())
    }

    pub fn replace(&self, config: VigilConfig) {
        *self.0.write() = config;
    }
}

/// Loads and optionally hot-reloads the Vigil configuration.
pub struct ConfigLoader {
    config: SharedConfig,
    config_path: PathBuf,
}

impl ConfigLoader {
    /// Resolve the config path: explicit path > VIGIL_CONFIG env > ~/.vigil/vigil.toml
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var("VIGIL_CONFIG") {
            return PathBuf::from(p);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".vigil")
            .join("vigil.toml")
    }

    /// Load the config from disk, falling back to defaults.
    pub fn load(path: Option<&Path>) -> vigil_core::Result<Self> {
        let config_path = Self::resolve_path(path);
        let config = if config_path.exists() {
            info!(?config_path, "loading configuration");
            Self::parse_file(&config_path)?
        } else {
            warn!(?config_path, "config file not found, using defaults");
            VigilConfig::default()
        };

        let config = Self::apply_env_overrides(config);

        match config.validate() {
            Ok(warnings) => {
                for w in &warnings {
                    warn!("{}", w);
                }
            }
            Err(e) => {
                return Err(VigilError::Config(e));
            }
        }

        Ok(Self {
            config: SharedConfig::new(config),
            config_path,
        })
    }

    fn parse_file(path: &Path) -> vigil_core::Result<VigilConfig> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str::<VigilConfig>(&raw).map_err(|e| {
            VigilError::Config(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    /// Get a read snapshot of the current config.
    pub fn get(&self) -> VigilConfig {
        self.config.snapshot()
    }

    /// Handle that follows reloads; hand it to long-lived components.
    pub fn shared(&self) -> SharedConfig {
        self.config.clone()
    }

    /// Path being watched.
    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Apply env var overrides (VIGIL_SERVER_LISTEN, VIGIL_MODERATION_MODEL, etc.)
    fn apply_env_overrides(mut config: VigilConfig) -> VigilConfig {
        if let Ok(v) = std::env::var("VIGIL_SERVER_LISTEN") {
            config.server.listen = v;
        }
        if let Ok(v) = std::env::var("VIGIL_SERVER_URL") {
            config.enforcement.server_url = v;
        }
        if let Ok(v) = std::env::var("VIGIL_LOG_LEVEL") {
            config.logging.level = v;
        }
        if let Ok(v) = std::env::var("VIGIL_MODERATION_MODEL") {
            config.moderation.model = v;
        }
        if let Ok(v) = std::env::var("VIGIL_DB_PATH") {
            config.store.db_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("VIGIL_API_KEY") {
            config.server.api_key = Some(v);
        }
        // API keys: env var fills in when the config file doesn't set one.
        if config.services.anthropic_api_key.is_none()
            && let Ok(v) = std::env::var("ANTHROPIC_API_KEY")
        {
            config.services.anthropic_api_key = Some(v);
        }
        if config.services.openai_api_key.is_none()
            && let Ok(v) = std::env::var("OPENAI_API_KEY")
        {
            config.services.openai_api_key = Some(v);
        }
        config
    }

    /// Reload the config from disk.
    pub fn reload(&self) -> vigil_core::Result<()> {
        if !self.config_path.exists() {
            return Err(VigilError::Config(format!(
                "config file not found: {}",
                self.config_path.display()
            )));
        }
        let new_config = Self::apply_env_overrides(Self::parse_file(&self.config_path)?);
        new_config.validate().map_err(VigilError::Config)?;
        self.config.replace(new_config);
        info!("configuration reloaded");
        Ok(())
    }

    /// Start a background file watcher that swaps in the new config when the file changes.
    /// Returns a handle to the watcher (must be kept alive for watching to continue).
    pub fn watch(&self) -> vigil_core::Result<notify::RecommendedWatcher> {
        let config = self.config.clone();
        let path_for_event = self.config_path.clone();

        info!(config_path = ?self.config_path, "starting config file watcher");

        let mut watcher = notify::recommended_watcher(
            move |res: Result<NotifyEvent, notify::Error>| match res {
                Ok(event) => {
                    if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                        return;
                    }
                    let is_our_file = event
                        .paths
                        .iter()
                        .any(|p| p.file_name() == path_for_event.file_name());
                    if !is_our_file {
                        return;
                    }

                    info!("config file changed, reloading");
                    match ConfigLoader::parse_file(&path_for_event) {
                        Ok(new_config) => {
                            let new_config = ConfigLoader::apply_env_overrides(new_config);
                            if let Err(e) = new_config.validate() {
                                warn!(error = %e, "config file is invalid, keeping current config");
                                return;
                            }
                            config.replace(new_config);
                            info!("configuration hot-reloaded successfully");
                        }
                        Err(e) => {
                            warn!(error = %e, "config file has errors, keeping current config");
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "file watcher error");
                }
            },
        )
        .map_err(|e| VigilError::Config(format!("failed to create file watcher: {}", e)))?;

        // Watch the parent directory (some editors create temp files + rename)
        let watch_path = self.config_path.parent().unwrap_or(Path::new("."));
        watcher
            .watch(watch_path, RecursiveMode::NonRecursive)
            .map_err(|e| VigilError::Config(format!("failed to watch config directory: {}", e)))?;

        Ok(watcher)
    }
}
