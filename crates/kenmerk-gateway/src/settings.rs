//! Gateway configuration loaded from the environment (`.env` via `dotenvy`
//! in `main`). Grounded on `pagi-core::config::SovereignConfig::from_env`:
//! every field has a documented default and a dedicated `env_*` parser, no
//! pervasive global — `Settings` is built once in `main` and handed down
//! through `AppState`.

use kenmerk_core::DeploymentEnvironment;

/// | Env | Default | Description |
/// |-----|---------|--------------|
/// | KENMERK_OPENAI_API_KEY | unset | OpenAI provider credential. |
/// | KENMERK_GEMINI_API_KEY | unset | Gemini provider credential. |
/// | KENMERK_ANTHROPIC_API_KEY | unset | Anthropic provider credential. |
/// | KENMERK_OLLAMA_BASE_URL | http://localhost:11434 | Local Ollama endpoint. |
/// | KENMERK_OLLAMA_TIMEOUT_SECS | 60 | Ollama generation call timeout. |
/// | KENMERK_ENVIRONMENT | development | development \| staging \| production. |
/// | KENMERK_ALLOW_PARTIAL_GENERATION | false | Governance toggle; rejected at startup in production. |
/// | KENMERK_OFFLINE_STRUCTURAL_MODE | false | Governance toggle; rejected at startup in production. |
/// | KENMERK_WORKER_POOL_SIZE | 4 | Concurrent run-pipeline workers, clamped to [4, 10]. |
/// | KENMERK_ZOMBIE_TIMEOUT_SECS | 1800 | A `running` run with no progress for this long is swept to `failed`. |
/// | KENMERK_RUN_DB_PATH | ./data/kenmerk_runs.sqlite3 | SQLite mirror of the Run Store. |
/// | KENMERK_BIND_ADDR | 127.0.0.1:8080 | Gateway listen address. |
#[derive(Debug, Clone)]
pub struct Settings {
    pub openai_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub ollama_base_url: Option<String>,
    pub ollama_timeout_secs: u64,
    pub environment: DeploymentEnvironment,
    pub allow_partial_generation: bool,
    pub offline_structural_mode: bool,
    pub worker_pool_size: usize,
    pub zombie_timeout_secs: u64,
    pub run_db_path: String,
    pub bind_addr: String,
}

impl Settings {
    /// Load from environment. Unset or invalid => defaults (see field docs).
    pub fn from_env() -> Self {
        Self {
            openai_api_key: env_opt_string("KENMERK_OPENAI_API_KEY"),
            gemini_api_key: env_opt_string("KENMERK_GEMINI_API_KEY"),
            anthropic_api_key: env_opt_string("KENMERK_ANTHROPIC_API_KEY"),
            ollama_base_url: env_opt_string("KENMERK_OLLAMA_BASE_URL"),
            ollama_timeout_secs: env_u64("KENMERK_OLLAMA_TIMEOUT_SECS", 60),
            environment: env_environment(),
            allow_partial_generation: env_bool("KENMERK_ALLOW_PARTIAL_GENERATION", false),
            offline_structural_mode: env_bool("KENMERK_OFFLINE_STRUCTURAL_MODE", false),
            worker_pool_size: env_u64("KENMERK_WORKER_POOL_SIZE", 4).clamp(4, 10) as usize,
            zombie_timeout_secs: env_u64("KENMERK_ZOMBIE_TIMEOUT_SECS", 1800),
            run_db_path: std::env::var("KENMERK_RUN_DB_PATH").unwrap_or_else(|_| "./data/kenmerk_runs.sqlite3".to_string()),
            bind_addr: std::env::var("KENMERK_BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string()),
        }
    }
}

fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => v.trim().eq_ignore_ascii_case("true") || (v.trim().is_empty() && default),
        Err(_) => default,
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name).ok().and_then(|v| v.trim().parse::<u64>().ok()).unwrap_or(default)
}

fn env_opt_string(name: &str) -> Option<String> {
    std::env::var(name).ok().map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn env_environment() -> DeploymentEnvironment {
    match std::env::var("KENMERK_ENVIRONMENT") {
        Ok(v) => DeploymentEnvironment::from_str(v.trim()),
        Err(_) => DeploymentEnvironment::default(),
    }
}
