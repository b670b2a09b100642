use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration: maps to `vigil.toml`.
///
/// This is the service's own configuration. The parent's monitoring settings
/// (email, guidelines, auto-approve) live in the policy store instead, so an
/// edit from the oversight console takes effect on the next request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VigilConfig {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub moderation: ModerationConfig,
    pub appeals: AppealsConfig,
    pub enforcement: EnforcementConfig,
    pub console: ConsoleConfig,
    pub notifications: NotificationsConfig,
    pub logging: LoggingConfig,
    pub services: ServicesConfig,
}

// ── Server ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP listen address.
    pub listen: String,
    /// Optional bearer token required on every `/api/v1` route.
    pub api_key: Option<String>,
    /// Enable permissive CORS (the browser extension calls from page origins).
    pub cors: bool,
    /// Token-bucket burst per client IP.
    pub rate_limit_burst: u32,
    /// Tokens refilled per second per client IP.
    pub rate_limit_per_sec: f64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:5000".into(),
            api_key: None,
            cors: true,
            rate_limit_burst: 120,
            rate_limit_per_sec: 20.0,
        }
    }
}

// ── Store ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path to the SQLite database.
    pub db_path: PathBuf,
    /// Directory holding desktop screenshots.
    pub screenshot_dir: PathBuf,
    /// Default number of rows returned by the audit endpoint.
    pub audit_page_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        let base = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".vigil");
        Self {
            db_path: base.join("vigil.db"),
            screenshot_dir: base.join("screenshots"),
            audit_page_size: 100,
        }
    }
}

// ── Moderation ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModerationConfig {
    /// Model in "provider/model" form, e.g. "openai/gpt-5-mini".
    pub model: String,
    /// Model tried when the primary provider fails.
    pub fallback_model: Option<String>,
    /// Maximum tokens per verdict.
    pub max_tokens: u32,
    /// Temperature (0.0 - 2.0).
    pub temperature: f32,
    /// Page text beyond this many characters is not sent to the model.
    pub content_char_limit: usize,
    /// Upper bound on one moderation call before failing closed.
    pub timeout_secs: u64,
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            model: "openai/gpt-5-mini".into(),
            fallback_model: Some("anthropic/claude-haiku-3-5".into()),
            max_tokens: 1024,
            temperature: 0.2,
            content_char_limit: 5000,
            timeout_secs: 30,
        }
    }
}

// ── Appeals ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppealsConfig {
    /// Appeals a child may file per blocked resource.
    pub max_per_resource: u32,
}

impl Default for AppealsConfig {
    fn default() -> Self {
        Self { max_per_resource: 1 }
    }
}

// ── Clients ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnforcementConfig {
    /// Base URL of the Vigil service as seen by enforcement points.
    pub server_url: String,
    /// Local timeout for an evaluation call; expiry blocks the content.
    pub evaluation_timeout_secs: u64,
    /// Local timeout for appeal and escalation calls.
    pub appeal_timeout_secs: u64,
}

impl Default for EnforcementConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:5000".into(),
            evaluation_timeout_secs: 15,
            appeal_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    /// Seconds between background refreshes of the oversight console.
    pub poll_interval_secs: u64,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 120,
        }
    }
}

// ── Notifications ──────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
    /// When set, parent notifications are POSTed here as JSON.
    pub webhook_url: Option<String>,
    /// Base URL the parent's browser reaches the service at. Emailed
    /// approve/deny links point here.
    pub public_url: Option<String>,
    /// Email the parent through an HTTP mail API.
    pub email: Option<EmailConfig>,
}

impl NotificationsConfig {
    /// Base for links in messages sent to the parent.
    pub fn link_base(&self, server: &ServerConfig) -> String {
        match &self.public_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("http://{}", server.listen),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    /// Endpoint accepting `{from, to, subject, html}` as JSON.
    pub api_url: String,
    /// Sent as a bearer token.
    pub api_key: Option<String>,
    pub from: String,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            api_key: None,
            from: "Vigil <vigil@localhost>".into(),
        }
    }
}

// ── Logging ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Output format: "pretty", "json", "compact".
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

// ── Services ───────────────────────────────────────────────────

/// External service API keys.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServicesConfig {
    /// Anthropic API key. Can also be set via ANTHROPIC_API_KEY.
    /// Config file takes priority over environment variable.
    pub anthropic_api_key: Option<String>,
    /// OpenAI API key. Can also be set via OPENAI_API_KEY.
    pub openai_api_key: Option<String>,
    /// Base URL for an OpenAI-compatible endpoint (vLLM, Azure, Ollama).
    pub openai_base_url: Option<String>,
}

// ── Validation ─────────────────────────────────────────────────

/// A single config validation issue.
#[derive(Debug)]
pub struct ConfigWarning {
    pub field: String,
    pub message: String,
    pub severity: WarningSeverity,
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningSeverity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let icon = match self.severity {
            WarningSeverity::Error => "❌",
            WarningSeverity::Warning => "⚠️ ",
            WarningSeverity::Info => "💡",
        };
        write!(f, "{} {}: {}", icon, self.field, self.message)?;
        if let Some(ref h) = self.hint {
            write!(f, "\n   ↳ {}", h)?;
        }
        Ok(())
    }
}

impl VigilConfig {
    /// Validate the config and return a list of warnings/errors.
    /// Returns `Err` with all messages joined if any severity is Error.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, String> {
        let mut warnings = Vec::new();

        // ── Moderation model ───
        let model = &self.moderation.model;
        if model.is_empty() {
            warnings.push(ConfigWarning {
                field: "moderation.model".into(),
                message: "model is empty".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 'openai/gpt-5-mini' or 'anthropic/claude-haiku-3-5'".into()),
            });
        } else if !model.contains('/') {
            warnings.push(ConfigWarning {
                field: "moderation.model".into(),
                message: format!("model '{}' should be in 'provider/model' format", model),
                severity: WarningSeverity::Warning,
                hint: Some("Use 'openai/gpt-5-mini' or 'anthropic/claude-haiku-3-5'".into()),
            });
        }

        if self.moderation.temperature < 0.0 || self.moderation.temperature > 2.0 {
            warnings.push(ConfigWarning {
                field: "moderation.temperature".into(),
                message: format!("temperature {} is out of range", self.moderation.temperature),
                severity: WarningSeverity::Error,
                hint: Some("Temperature must be between 0.0 and 2.0".into()),
            });
        }

        if self.moderation.max_tokens == 0 {
            warnings.push(ConfigWarning {
                field: "moderation.max_tokens".into(),
                message: "max_tokens is 0: the model cannot return a verdict".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 1024".into()),
            });
        }

        if self.moderation.timeout_secs == 0 {
            warnings.push(ConfigWarning {
                field: "moderation.timeout_secs".into(),
                message: "timeout is 0: every evaluation would fail closed".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 30".into()),
            });
        }

        if self.services.anthropic_api_key.is_none()
            && self.services.openai_api_key.is_none()
            && self.services.openai_base_url.is_none()
        {
            warnings.push(ConfigWarning {
                field: "services".into(),
                message: "no moderation provider configured: unlisted sites will be blocked".into(),
                severity: WarningSeverity::Warning,
                hint: Some("Set OPENAI_API_KEY or ANTHROPIC_API_KEY".into()),
            });
        }

        // ── Appeals ───
        if self.appeals.max_per_resource == 0 {
            warnings.push(ConfigWarning {
                field: "appeals.max_per_resource".into(),
                message: "appeals are disabled".into(),
                severity: WarningSeverity::Info,
                hint: None,
            });
        } else if self.appeals.max_per_resource > 3 {
            warnings.push(ConfigWarning {
                field: "appeals.max_per_resource".into(),
                message: format!(
                    "{} appeals per resource lets a child retry the AI repeatedly",
                    self.appeals.max_per_resource
                ),
                severity: WarningSeverity::Warning,
                hint: Some("One appeal per resource is typical".into()),
            });
        }

        // ── Clients ───
        if self.enforcement.evaluation_timeout_secs == 0 {
            warnings.push(ConfigWarning {
                field: "enforcement.evaluation_timeout_secs".into(),
                message: "timeout is 0: every page would be blocked".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 15".into()),
            });
        }
        if self.console.poll_interval_secs == 0 {
            warnings.push(ConfigWarning {
                field: "console.poll_interval_secs".into(),
                message: "poll interval must be positive".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 120".into()),
            });
        }

        // ── Notifications ───
        if let Some(email) = &self.notifications.email
            && email.api_url.is_empty()
        {
            warnings.push(ConfigWarning {
                field: "notifications.email.api_url".into(),
                message: "email is enabled but has no API endpoint".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set the mail provider's send endpoint".into()),
            });
        }

        // ── Server listen address ───
        if self.server.listen.is_empty() {
            warnings.push(ConfigWarning {
                field: "server.listen".into(),
                message: "listen address is empty".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. '127.0.0.1:5000'".into()),
            });
        } else if self.server.listen.starts_with("0.0.0.0") && self.server.api_key.is_none() {
            warnings.push(ConfigWarning {
                field: "server.api_key".into(),
                message: "no API key set while server is network-accessible".into(),
                severity: WarningSeverity::Warning,
                hint: Some("Set server.api_key so the child cannot edit the policy".into()),
            });
        }

        // ── Logging ───
        let valid_formats = ["pretty", "json", "compact"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.format".into(),
                message: format!("unknown log format '{}'", self.logging.format),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Valid values: {}", valid_formats.join(", "))),
            });
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.level".into(),
                message: format!("unknown log level '{}'", self.logging.level),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Valid values: {}", valid_levels.join(", "))),
            });
        }

        let errors: Vec<String> = warnings
            .iter()
            .filter(|w| w.severity == WarningSeverity::Error)
            .map(|w| format!("{}: {}", w.field, w.message))
            .collect();

        if !errors.is_empty() {
            return Err(format!("Configuration errors:\n  • {}", errors.join("\n  • ")));
        }

        Ok(warnings)
    }
}
