use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{Shell, generate};
use std::path::PathBuf;
use uuid::Uuid;

use vigil_client::ApiClient;
use vigil_config::{ConfigLoader, VigilConfig, WarningSeverity};
use vigil_core::{ListKind, ResourceKind, VigilError};

use crate::output;

mod console;
mod enforce;
mod serve;

/// Vigil: parental-control access decisions and appeals
#[derive(Parser)]
#[command(name = "vigil", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to vigil.toml config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level override (e.g. debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress all log output (errors only)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the Vigil service (decision engine, appeals, HTTP API)
    Serve,
    /// Ask the service whether a page may be shown
    Check {
        url: String,
        #[arg(long)]
        title: Option<String>,
        /// File with the page's extracted text
        #[arg(long)]
        content_file: Option<PathBuf>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Ask the service whether a desktop app may stay open
    CheckApp {
        app_name: String,
        #[arg(long)]
        window_title: Option<String>,
        /// PNG screenshot of the window
        #[arg(long)]
        screenshot: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Appeal a block as the child would
    Appeal {
        /// Blocked URL (or app name with --app)
        target: String,
        /// Why access is needed
        #[arg(short, long)]
        reason: String,
        #[arg(long)]
        title: Option<String>,
        /// The target is a desktop app
        #[arg(long)]
        app: bool,
        /// Ask the parent if the AI says no
        #[arg(long)]
        escalate: bool,
    },
    /// Send an AI-denied appeal to the parent
    Escalate {
        approval_id: Uuid,
        /// The URL or app name the appeal was filed for
        target: String,
        #[arg(short, long)]
        reason: Option<String>,
    },
    /// Parent oversight: pending appeals, verdicts, lists, settings
    Console {
        #[command(subcommand)]
        action: ConsoleAction,
    },
    /// Show recent audit log entries
    Logs {
        /// Number of entries to show (default 50)
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,

        /// Filter by event type (e.g. blocked, appeal, whitelist)
        #[arg(short = 't', long)]
        event_type: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show version and build info
    Version,
    /// Show current configuration
    Config {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Set a config value in vigil.toml (dot-notation key)
    Set {
        /// Config key in dot notation (e.g. server.listen, appeals.max_per_resource)
        key: String,
        /// Value to set
        value: String,
    },
    /// Write a default vigil.toml
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Audit configuration for problems
    Doctor,
    /// Generate shell completions for bash, zsh, or fish
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ListArg {
    Whitelist,
    Blacklist,
}

impl From<ListArg> for ListKind {
    fn from(arg: ListArg) -> Self {
        match arg {
            ListArg::Whitelist => ListKind::Whitelist,
            ListArg::Blacklist => ListKind::Blacklist,
        }
    }
}

fn resource_kind(desktop: bool) -> ResourceKind {
    if desktop {
        ResourceKind::DesktopApp
    } else {
        ResourceKind::Website
    }
}

#[derive(Subcommand)]
enum ConsoleAction {
    /// Appeals waiting for your decision
    Pending {
        #[arg(long)]
        json: bool,
    },
    /// Approve an escalated appeal
    Approve { approval_id: Uuid },
    /// Deny an escalated appeal
    Deny { approval_id: Uuid },
    /// Appeal history for one site or app
    History {
        resource: String,
        #[arg(long)]
        json: bool,
    },
    /// Show whitelist and blacklist
    Lists {
        /// Desktop apps instead of websites
        #[arg(long)]
        desktop: bool,
        #[arg(long)]
        json: bool,
    },
    /// Add a site or app to a list (moves it off the other list)
    Add {
        #[arg(value_enum)]
        list: ListArg,
        identifier: String,
        #[arg(long)]
        desktop: bool,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Remove a site or app from a list
    Remove {
        #[arg(value_enum)]
        list: ListArg,
        identifier: String,
        #[arg(long)]
        desktop: bool,
    },
    /// Allow a desktop app
    ApproveApp { app_name: String },
    /// Show monitoring settings
    Settings {
        #[arg(long)]
        json: bool,
    },
    /// Change monitoring settings
    SetSettings {
        #[arg(long)]
        email: Option<String>,
        /// Guidelines the moderator applies
        #[arg(long)]
        prompt: Option<String>,
        #[arg(long)]
        auto_approve: Option<bool>,
        #[arg(long)]
        desktop_monitoring: Option<bool>,
        #[arg(long)]
        screenshot_interval: Option<u64>,
    },
    /// Keep refreshing and print changes
    Watch {
        /// Seconds between refreshes (default: console.poll_interval_secs)
        #[arg(long)]
        interval: Option<u64>,
    },
}

impl Cli {
    pub async fn run(self) -> vigil_core::Result<()> {
        // Load config first so we can use it for log format
        let config_loader = ConfigLoader::load(self.config.as_deref())?;
        let config = config_loader.get();

        // --verbose > --quiet > --log-level > config
        let log_level = if self.verbose {
            "debug"
        } else if self.quiet {
            "error"
        } else {
            self.log_level
                .as_deref()
                .unwrap_or(config.logging.level.as_str())
        };
        init_tracing(&config.logging.format, log_level);

        match self.command {
            Commands::Serve => serve::cmd_serve(config, config_loader).await,
            Commands::Check {
                url,
                title,
                content_file,
                json,
            } => enforce::cmd_check(&config, url, title, content_file, json).await,
            Commands::CheckApp {
                app_name,
                window_title,
                screenshot,
                json,
            } => enforce::cmd_check_app(&config, app_name, window_title, screenshot, json).await,
            Commands::Appeal {
                target,
                reason,
                title,
                app,
                escalate,
            } => {
                enforce::cmd_appeal(&config, resource_kind(app), target, title, reason, escalate)
                    .await
            }
            Commands::Escalate {
                approval_id,
                target,
                reason,
            } => enforce::cmd_escalate(&config, approval_id, target, reason).await,
            Commands::Console { action } => console::cmd_console(&config, action).await,
            Commands::Logs {
                limit,
                event_type,
                json,
            } => Self::cmd_logs(&config, limit, event_type, json).await,
            Commands::Version => Self::cmd_version(),
            Commands::Config { json } => Self::cmd_config(config, json),
            Commands::Set { key, value } => {
                Self::cmd_config_set(config_loader.path().to_path_buf(), key, value)
            }
            Commands::Init { force } => Self::cmd_init(config_loader.path().to_path_buf(), force),
            Commands::Doctor => Self::cmd_doctor(config),
            Commands::Completions { shell } => Self::cmd_completions(shell),
        }
    }

    fn cmd_config(config: VigilConfig, json: bool) -> vigil_core::Result<()> {
        if json {
            output::print_json(&config)
        } else {
            println!(
                "{}",
                toml::to_string_pretty(&config).map_err(|e| VigilError::Config(e.to_string()))?
            );
            Ok(())
        }
    }

    async fn cmd_logs(
        config: &VigilConfig,
        limit: usize,
        event_type: Option<String>,
        json: bool,
    ) -> vigil_core::Result<()> {
        let client = api_client(config)?;
        let events = client.audit(limit).await.map_err(|e| unreachable(config, e))?;

        let filtered: Vec<_> = events
            .iter()
            .filter(|e| {
                event_type
                    .as_deref()
                    .is_none_or(|t| e.event_type.contains(t))
            })
            .collect();

        if json {
            return output::print_json(&filtered);
        }

        if filtered.is_empty() {
            println!(
                "No audit log entries{}",
                event_type
                    .as_ref()
                    .map(|t| format!(" matching '{t}'"))
                    .unwrap_or_default()
            );
            return Ok(());
        }

        println!(
            "{} ({} entries)",
            ::console::style("Audit Log").bold(),
            filtered.len()
        );
        println!("{}", "-".repeat(80));

        for event in &filtered {
            let ts = event.timestamp.format("%Y-%m-%d %H:%M:%S");
            let etype = ::console::style(&event.event_type);
            // Color-code by event type
            let etype = match event.event_type.as_str() {
                t if t.contains("blocked") || t.contains("denied") || t.contains("blacklist") => {
                    etype.red()
                }
                t if t.contains("escalat") || t.contains("submitted") => etype.yellow(),
                t if t.contains("approved") || t.contains("whitelist") => etype.green(),
                _ => etype.cyan(),
            };
            println!(
                "{}  {etype}  {}",
                ::console::style(ts).dim(),
                event.resource.as_deref().unwrap_or("")
            );
            if let Some(details) = event.details.as_deref().filter(|d| !d.is_empty()) {
                println!("   {}", ::console::style(output::truncate(details, 120)).dim());
            }
        }

        Ok(())
    }

    fn cmd_config_set(path: PathBuf, key: String, value: String) -> vigil_core::Result<()> {
        if !path.exists() {
            return Err(VigilError::Config(format!(
                "No config file at {}. Run 'vigil init' first.",
                path.display()
            )));
        }

        let content = std::fs::read_to_string(&path).map_err(|e| {
            VigilError::Config(format!("Cannot read {}: {}", path.display(), e))
        })?;

        let mut doc = content.parse::<toml_edit::DocumentMut>().map_err(|e| {
            VigilError::Config(format!("Invalid TOML in {}: {}", path.display(), e))
        })?;

        let parts: Vec<&str> = key.split('.').collect();
        let Some((leaf_key, table_parts)) = parts.split_last() else {
            return Err(VigilError::Config("Empty key".into()));
        };

        // Intermediate tables are created as needed
        let mut table: &mut toml_edit::Item = doc.as_item_mut();
        for part in table_parts {
            if table.get(part).is_none() {
                table[part] = toml_edit::Item::Table(toml_edit::Table::new());
            }
            table = &mut table[part];
        }

        // Infer the value type: bool, integer, float, or string
        let toml_value = if value == "true" {
            toml_edit::value(true)
        } else if value == "false" {
            toml_edit::value(false)
        } else if let Ok(i) = value.parse::<i64>() {
            toml_edit::value(i)
        } else if let Ok(f) = value.parse::<f64>() {
            toml_edit::value(f)
        } else {
            toml_edit::value(&value)
        };

        let old_value = table.get(leaf_key).map(|v| v.to_string());
        table[*leaf_key] = toml_value;

        // Reject edits that would no longer load
        toml::from_str::<VigilConfig>(&doc.to_string())
            .map_err(|e| VigilError::Config(format!("{key} = {value} is not valid: {e}")))?;

        std::fs::write(&path, doc.to_string()).map_err(|e| {
            VigilError::Config(format!("Cannot write {}: {}", path.display(), e))
        })?;

        match old_value {
            Some(old) => output::print_success(&format!("{key} = {value} (was {})", old.trim())),
            None => output::print_success(&format!("{key} = {value} (new)")),
        }

        Ok(())
    }

    fn cmd_init(path: PathBuf, force: bool) -> vigil_core::Result<()> {
        if path.exists() && !force {
            return Err(VigilError::Config(format!(
                "{} already exists (use --force to overwrite)",
                path.display()
            )));
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let body = toml::to_string_pretty(&VigilConfig::default())
            .map_err(|e| VigilError::Config(e.to_string()))?;
        std::fs::write(&path, body)?;
        output::print_success(&format!("Wrote {}", path.display()));
        Ok(())
    }

    fn cmd_doctor(config: VigilConfig) -> vigil_core::Result<()> {
        println!("{}", ::console::style("Vigil Doctor: configuration audit").bold());
        println!();

        let warnings = match config.validate() {
            Ok(w) => w,
            Err(e) => {
                output::print_error(&e);
                return Ok(());
            }
        };

        let mut warn_count = 0;
        let mut info_count = 0;
        for w in &warnings {
            println!("  {w}");
            match w.severity {
                WarningSeverity::Warning => warn_count += 1,
                WarningSeverity::Info => info_count += 1,
                WarningSeverity::Error => {}
            }
        }

        let mut ok = 0;

        let exposed = !config.server.listen.starts_with("127.")
            && !config.server.listen.starts_with("localhost");
        if exposed && config.server.api_key.is_none() {
            output::print_warning(&format!(
                "server.listen {} is reachable from the network without server.api_key",
                config.server.listen
            ));
            warn_count += 1;
        } else {
            ok += 1;
        }

        if config.notifications.webhook_url.is_none() && config.notifications.email.is_none() {
            output::print_info("no email or webhook in [notifications]: escalations are only logged");
            info_count += 1;
        } else {
            ok += 1;
        }

        match config.store.db_path.parent() {
            Some(dir) if dir.as_os_str().is_empty() || dir.exists() => ok += 1,
            Some(dir) => {
                output::print_info(&format!("{} will be created on first start", dir.display()));
                info_count += 1;
            }
            None => ok += 1,
        }

        println!();
        println!("  {ok} checks passed, {warn_count} warnings, {info_count} suggestions");
        Ok(())
    }

    fn cmd_version() -> vigil_core::Result<()> {
        println!("Vigil v{}", env!("CARGO_PKG_VERSION"));
        println!("   Rust edition: 2024");
        println!("   Target: {}", std::env::consts::ARCH);
        println!("   OS: {}", std::env::consts::OS);
        #[cfg(debug_assertions)]
        println!("   Profile: debug");
        #[cfg(not(debug_assertions))]
        println!("   Profile: release");
        Ok(())
    }

    fn cmd_completions(shell: Shell) -> vigil_core::Result<()> {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "vigil", &mut std::io::stdout());
        Ok(())
    }
}

fn init_tracing(format: &str, level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    match format {
        "json" => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_target(true)
            .init(),
        "compact" => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .compact()
            .with_target(false)
            .init(),
        _ => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init(),
    }
}

/// Client for the configured service, authenticated with `server.api_key`.
fn api_client(config: &VigilConfig) -> vigil_core::Result<ApiClient> {
    ApiClient::new(
        &config.enforcement.server_url,
        config.server.api_key.clone(),
    )
}

/// Reword transport failures so the user knows where we looked.
fn unreachable(config: &VigilConfig, e: VigilError) -> VigilError {
    match e {
        VigilError::Transport(msg) => VigilError::Transport(format!(
            "Cannot reach Vigil at {} (is `vigil serve` running?): {msg}",
            config.enforcement.server_url
        )),
        other => other,
    }
}
