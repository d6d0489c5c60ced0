//! Axum-based API Gateway for the listing analysis pipeline: run
//! lifecycle, job queue, SQLite run store, and AI runtime status around
//! `kenmerk-core`. Config-driven via `Settings::from_env`.
//!
//! This binary only wires dependencies together; the router and state
//! types live in `lib.rs` so integration tests can drive the same
//! `Router` in-process.

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use kenmerk_core::ai::{AiAuthority, AnthropicClient, CapabilityManager, GeminiClient, OllamaClient, OpenAiClient};
use kenmerk_core::{GovernanceConfig, TruthPolicy};

use kenmerk_gateway::job_queue::JobQueue;
use kenmerk_gateway::run_store::{RunStore, RunStoreDb};
use kenmerk_gateway::settings::Settings;
use kenmerk_gateway::{build_app, AppState};

#[tokio::main]
async fn main() {
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[kenmerk-gateway] .env not loaded: {e} (using system environment)");
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "kenmerk_gateway=info,kenmerk_core=info,tower_http=warn".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::from_env();

    let capability_manager = CapabilityManager::new();

    let clients: Vec<Box<dyn kenmerk_core::ai::AiProviderClient>> = vec![
        Box::new(OpenAiClient::new(settings.openai_api_key.clone())),
        Box::new(GeminiClient::new(settings.gemini_api_key.clone())),
        Box::new(AnthropicClient::new(settings.anthropic_api_key.clone())),
        Box::new(OllamaClient::new(settings.ollama_base_url.clone(), Duration::from_secs(settings.ollama_timeout_secs))),
    ];
    let authority = Arc::new(AiAuthority::new(clients, Arc::clone(&capability_manager)));

    let governance_config = GovernanceConfig {
        environment: settings.environment,
        allow_partial_generation: settings.allow_partial_generation,
        offline_structural_mode: settings.offline_structural_mode,
    };
    let governance = Arc::new(
        TruthPolicy::build(&governance_config)
            .unwrap_or_else(|err| panic!("governance configuration rejected at startup: {err}")),
    );

    let db = RunStoreDb::new(&settings.run_db_path).expect("failed to open run store database");
    let run_store = RunStore::new(db);

    let job_queue = JobQueue::new(Arc::clone(&run_store), Arc::clone(&authority), Arc::clone(&governance), settings.worker_pool_size, settings.zombie_timeout_secs);
    let _zombie_sweeper = job_queue.spawn_zombie_sweeper();

    let bind_addr = settings.bind_addr.clone();
    let state = AppState {
        settings: Arc::new(settings),
        run_store,
        job_queue,
        authority,
        capability_manager,
        governance,
    };

    let app = build_app(state);

    tracing::info!(target: "kenmerk::gateway", addr = %bind_addr, "kenmerk-gateway listening");
    let listener = tokio::net::TcpListener::bind(&bind_addr).await.expect("failed to bind gateway address");
    if let Err(err) = axum::serve(listener, app).await {
        tracing::error!(target: "kenmerk::gateway", error = %err, "server error");
    }
}
