use std::sync::Arc;
use tracing::{info, warn};

use vigil_config::{ConfigLoader, VigilConfig};
use vigil_engine::{ConfiguredNotifier, Engine};
use vigil_moderation::{LlmModerator, router_from_config};
use vigil_server::{AppState, start_server};
use vigil_store::{PolicyStore, ScreenshotStore};

pub(super) async fn cmd_serve(
    config: VigilConfig,
    config_loader: ConfigLoader,
) -> vigil_core::Result<()> {
    println!("Vigil v{}", env!("CARGO_PKG_VERSION"));
    println!("   Listen: {}", config.server.listen);
    println!("   Model: {}", config.moderation.model);
    println!("   Database: {}", config.store.db_path.display());
    println!();

    // Moderation, appeal limit and notifications read this on every request.
    let live = config_loader.shared();

    // Kept alive for the lifetime of the server
    let _watcher = match config_loader.watch() {
        Ok(w) => {
            println!("   Config hot-reload: enabled");
            Some(w)
        }
        Err(e) => {
            warn!(error = %e, "config hot-reload disabled");
            None
        }
    };

    let store = PolicyStore::open(&config.store.db_path)?;
    let screenshots = ScreenshotStore::open(&config.store.screenshot_dir)?;

    let router = router_from_config(&config.services);
    if !router.has_providers() {
        eprintln!("⚠️  No LLM API keys found. Sites not on a list will be blocked.");
        eprintln!("   In vigil.toml:  [services]");
        eprintln!("                   openai_api_key = \"sk-...\"");
        eprintln!("   Or env var:     export OPENAI_API_KEY=sk-...");
        eprintln!();
    }
    let moderator = Arc::new(LlmModerator::live(router, live.clone()));
    let notifier = Arc::new(ConfiguredNotifier::new(live.clone())?);

    let engine = Engine::new(
        store,
        Some(screenshots.clone()),
        moderator,
        notifier,
        config.appeals.max_per_resource,
    )
    .follow_config(live);

    let recovered = engine.appeals.recover_interrupted().await?;
    if recovered > 0 {
        info!(count = recovered, "recovered appeals interrupted by a restart");
    }

    let state = AppState::new(config.server.clone(), engine, Some(screenshots))
        .with_audit_page_size(config.store.audit_page_size);
    start_server(state).await
}
