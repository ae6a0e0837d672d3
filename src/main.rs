use polyledger::api::{self, AppState};
use polyledger::config::Config;
use polyledger::datasource::{GraphSource, SubgraphClient};
use polyledger::db::Store;
use polyledger::rebuild::RebuildEngine;
use polyledger::stats::StatsRegistry;
use polyledger::sync::{SyncCoordinator, TokenFiller};
use std::net::SocketAddr;
use std::sync::Arc;

const PERSIST_DIR: &str = "data/pnl";

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    let config_path = parse_config_path();
    let config = match Config::load(&config_path) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    tracing::info!("API key: {}...", &config.api_key[..config.api_key.len().min(8)]);
    tracing::info!("DB path: {}", config.db_path);
    tracing::info!("Active sources: {}", config.sources.len());
    for source in &config.sources {
        tracing::info!("  - {} ({} entities)", source.name, source.entities.len());
    }

    let store = match Store::open(&config.db_path) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            eprintln!("Failed to open database: {}", e);
            std::process::exit(1);
        }
    };

    let stats = Arc::new(StatsRegistry::new(store.clone()));
    let client: Arc<dyn GraphSource> = Arc::new(SubgraphClient::new(
        config.graph_host.clone(),
        config.api_key.clone(),
    ));
    let engine = Arc::new(RebuildEngine::new(store.clone(), PERSIST_DIR));
    let filler = Arc::new(TokenFiller::new(store.clone(), client.clone(), &config));

    let coordinator = SyncCoordinator::new(
        config.clone(),
        store.clone(),
        stats.clone(),
        client.clone(),
    );
    tokio::spawn(coordinator.run());

    let app = api::create_router(AppState {
        store,
        stats,
        engine,
        filler,
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    tracing::info!("API listening on {}", addr);

    if let Err(e) = axum::serve(listener, app).await {
        eprintln!("Server error: {}", e);
        std::process::exit(1);
    }
}

fn parse_config_path() -> String {
    let mut args = std::env::args().skip(1);
    let mut path = "config.json".to_string();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                if let Some(value) = args.next() {
                    path = value;
                }
            }
            "--help" | "-h" => {
                println!("usage: polyledger --config <config.json>");
                std::process::exit(0);
            }
            _ => {}
        }
    }
    path
}
