/*
hivesite - single-binary main.rs
This binary starts the Rocket HTTP server and, unless disabled, the recurring content fetch
inside the same process.
*/

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use common::Config;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use hivesite::chat::ChatResponder;
use hivesite::ingestion::Aggregator;
use hivesite::llm::remote::RemoteLlmProvider;
use hivesite::llm::LlmProvider;
use hivesite::scheduler::AutoFetcher;
use hivesite::server::{launch_rocket, AppState};
use hivesite::storage::{open_store, Store};

#[derive(Parser, Debug)]
#[command(name = "hivesite", about = "Hivesite backend: chat proxy, content updates and store")]
struct Args {
    /// Path to config.toml
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Do not start the recurring content fetch at boot
    #[arg(long)]
    no_auto_fetch: bool,

    /// Override log level (info, debug, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine
    dotenv::dotenv().ok();

    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let default_path = PathBuf::from("config.default.toml");
    let override_path = match args.config {
        Some(p) => {
            if !p.exists() {
                error!(path = ?p, "specified config file not found");
                return Err(anyhow::anyhow!("Config file not found: {}", p.display()));
            }
            Some(p)
        }
        None => Some(PathBuf::from("config.toml")).filter(|p| p.exists()),
    };

    let config = match Config::load_with_defaults(Some(&default_path), override_path.as_deref()).await {
        Ok(cfg) => cfg.with_env_overrides(),
        Err(e) => {
            error!(%e, "failed to load configuration");
            return Err(e);
        }
    };
    info!(default = ?default_path, override = ?override_path, "configuration loaded");

    let store = open_store(config.database.url.as_deref()).await?;

    let responder = build_responder(&config, Arc::clone(&store));

    let aggregator = Arc::new(Aggregator::from_config(Arc::clone(&store), &config)?);
    let fetcher = Arc::new(AutoFetcher::new(aggregator));

    match (args.no_auto_fetch, config.fetcher.auto_start_minutes) {
        (true, _) => info!("auto-fetch disabled via CLI (--no-auto-fetch)"),
        (false, Some(minutes)) => {
            fetcher.start(minutes);
        }
        (false, None) => info!("auto-fetch not configured; use the API to start it"),
    }

    let state = AppState::new(
        store,
        responder,
        Arc::clone(&fetcher),
        config.llm.api_key_env(),
    );

    info!("Launching Rocket HTTP server");
    let result = launch_rocket(state, &config.server).await;
    if let Err(e) = &result {
        error!(%e, "Rocket server failed");
    }

    fetcher.stop();
    info!("Shutdown complete");
    result
}

/// The chat responder exists only when the credential is present; otherwise every chat
/// request answers with a configuration error.
fn build_responder(config: &Config, store: Arc<dyn Store>) -> Option<Arc<ChatResponder>> {
    let llm = &config.llm;
    let Some(api_key) = llm.api_key() else {
        warn!("LLM API key env var '{}' not set; chat will report a configuration error", llm.api_key_env());
        return None;
    };

    let temperature = llm.temperature.unwrap_or(hivesite::chat::DEFAULT_TEMPERATURE);
    let max_tokens = llm.max_tokens.unwrap_or(hivesite::chat::DEFAULT_MAX_TOKENS);
    let timeout = llm.timeout_seconds.unwrap_or(60);

    let provider: Arc<dyn LlmProvider> = Arc::new(
        RemoteLlmProvider::new(llm.api_url(), api_key, llm.model()).with_defaults(timeout, max_tokens, temperature),
    );
    info!("LLM provider initialized: remote ({}) at {}", provider.model(), llm.api_url());

    let responder = ChatResponder::new(provider, store)
        .with_recent_updates_limit(
            config
                .fetcher
                .recent_updates_limit
                .unwrap_or(hivesite::chat::DEFAULT_RECENT_UPDATES),
        )
        .with_generation(temperature, max_tokens, Some(timeout));
    Some(Arc::new(responder))
}
