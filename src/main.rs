use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use questparty::{api, config::ServerConfig, llm, state::AppState};

#[tokio::main]
async fn main() {
    // Load .env file if present (before any env var reads)
    if let Err(e) = dotenvy::dotenv() {
        // Not an error if .env doesn't exist, only log if it's a different issue
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "questparty=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting QuestParty...");

    let server_config = ServerConfig::from_env();

    // Initialize narration and portrait providers
    let llm_config = llm::LlmConfig::from_env();
    let providers = match llm_config.build_providers() {
        Ok(providers) => {
            tracing::info!("AI providers initialized successfully");
            providers
        }
        Err(e) => {
            tracing::warn!(
                "Failed to initialize AI providers: {}. Rounds cannot be narrated.",
                e
            );
            llm::Providers::default()
        }
    };

    let state = Arc::new(AppState::new_with_providers(providers, llm_config));
    let app = api::router(state, &server_config.static_dir);

    let addr = server_config.socket_addr();
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };
    tracing::info!("Listening on http://{}", addr);

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
