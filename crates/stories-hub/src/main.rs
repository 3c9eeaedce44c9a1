use clap::Parser;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stories_store::{Snapshot, StoryStore};

mod api;
mod error;

// =============================================================================
// CLI
// =============================================================================

#[derive(Parser)]
#[command(
    name = "stories-hub",
    version = "0.1.0",
    about = "Story search API"
)]
struct Args {
    /// JSON array of stories to load at startup (overrides `[store] data_file`)
    #[arg(long)]
    data: Option<PathBuf>,

    /// Server bind address
    #[arg(long, default_value = "127.0.0.1:8000")]
    bind: String,

    /// Path to config file
    #[arg(long, default_value = "stories-hub.toml")]
    config: PathBuf,
}

// =============================================================================
// Config
// =============================================================================

#[derive(Deserialize, Default, Clone)]
struct Config {
    #[serde(default)]
    server: ServerConfig,
    #[serde(default)]
    store: StoreConfig,
}

#[derive(Deserialize, Clone, Debug)]
struct ServerConfig {
    /// Page size for `/api/all` when the request gives none.
    #[serde(default = "default_limit")]
    default_limit: u32,
    /// Upper bound applied to any requested `/api/all` page size.
    #[serde(default = "default_max_limit")]
    max_limit: u32,
    /// Row cap for `/api/search`.
    #[serde(default = "default_search_limit")]
    search_limit: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            default_limit: 100,
            max_limit: 1000,
            search_limit: 100,
        }
    }
}

#[derive(Deserialize, Default, Clone)]
struct StoreConfig {
    data_file: Option<PathBuf>,
}

fn default_limit() -> u32 {
    100
}
fn default_max_limit() -> u32 {
    1000
}
fn default_search_limit() -> u32 {
    100
}

fn load_config(path: &Path) -> Config {
    if !path.exists() {
        return Config::default();
    }
    let parsed = std::fs::read_to_string(path)
        .map_err(|e| e.to_string())
        .and_then(|content| toml::from_str(&content).map_err(|e| e.to_string()));
    match parsed {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!("Ignoring config {:?}: {}", path, e);
            Config::default()
        }
    }
}

// =============================================================================
// Application State
// =============================================================================

struct AppState {
    store: StoryStore,
    server: ServerConfig,
    data_file: Option<PathBuf>,
    start_time: Instant,
}

impl AppState {
    fn new(store: StoryStore, server: ServerConfig, data_file: Option<PathBuf>) -> Self {
        Self {
            store,
            server,
            data_file,
            start_time: Instant::now(),
        }
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| {
                "stories_hub=info,stories_store=info,tower_http=info".into()
            }),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = load_config(&args.config);
    let data_file = args.data.clone().or(config.store.data_file.clone());

    let initial = match &data_file {
        Some(path) => Snapshot::load_json(path),
        None => {
            tracing::warn!("No data file configured, serving an empty story table");
            Snapshot::empty()
        }
    };
    let snapshot = match initial {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Failed to load stories: {}", e);
            std::process::exit(1);
        }
    };
    let row_count = snapshot.row_count();

    let state = Arc::new(AppState::new(
        StoryStore::new(snapshot),
        config.server.clone(),
        data_file.clone(),
    ));
    let app = api::router(state);

    let addr: SocketAddr = match args.bind.parse() {
        Ok(addr) => addr,
        Err(e) => {
            tracing::error!("Invalid bind address {:?}: {}", args.bind, e);
            std::process::exit(1);
        }
    };
    tracing::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    tracing::info!("  stories-hub v0.1.0");
    tracing::info!("  API:      http://{}/api/all", addr);
    tracing::info!("  Data:     {:?}", data_file);
    tracing::info!("  Stories:  {}", row_count);
    tracing::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
