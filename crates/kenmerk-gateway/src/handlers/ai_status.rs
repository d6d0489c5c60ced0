//! `/ai` handlers: runtime provider status and cache invalidation. The
//! one place outside `kenmerk_core::ai` that is allowed to ask the AI
//! Authority anything — these handlers never choose a provider
//! themselves, they only report what the Authority already decided.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

use kenmerk_core::PipelineError;

use crate::state::AppState;

/// `GET /ai/runtime-status` -> active provider/model, per-provider
/// configured/operational/status/category, the fixed hierarchy, and (on
/// exhaustion) which fallbacks were tried and why.
pub async fn runtime_status(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let report = state.authority.provider_report().await;
    let providers: serde_json::Map<String, Value> = report
        .iter()
        .map(|d| {
            (
                d.provider.to_string(),
                json!({
                    "configured": d.configured,
                    "operational": d.operational,
                    "reason": d.reason,
                }),
            )
        })
        .collect();

    let text_generation = state.capability_manager.get("text_generation");

    let hierarchy: Vec<&'static str> = kenmerk_core::ai::PROVIDER_HIERARCHY.iter().map(|p| p.as_str()).collect();

    match state.authority.resolve(false).await {
        Ok(active) => (
            StatusCode::OK,
            Json(json!({
                "active_provider": active.as_str(),
                "active_model": Value::Null,
                "status": "AVAILABLE",
                "category": "IMPLEMENTATION_VALID",
                "user_message": "AI provider is configured and operational.",
                "providers": providers,
                "provider_hierarchy": hierarchy,
                "text_generation_capability": text_generation,
                "fallbacks_tried": Vec::<String>::new(),
                "reasons": Vec::<String>::new(),
                "timestamp": chrono::Utc::now().to_rfc3339(),
            })),
        ),
        Err(PipelineError::NoAvailableAIProvider { fallbacks_tried, decisions }) => (
            StatusCode::OK,
            Json(json!({
                "active_provider": Value::Null,
                "active_model": Value::Null,
                "status": "OFFLINE",
                "category": "OPERATIONALLY_LIMITED",
                "user_message": "No AI provider is currently reachable; every configured provider was tried and is unavailable.",
                "providers": providers,
                "provider_hierarchy": hierarchy,
                "text_generation_capability": text_generation,
                "fallbacks_tried": fallbacks_tried,
                "reasons": decisions.iter().map(|d| d.reason.clone()).collect::<Vec<_>>(),
                "timestamp": chrono::Utc::now().to_rfc3339(),
            })),
        ),
        Err(other) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": other.to_string()})),
        ),
    }
}

/// `POST /ai/invalidate-cache` -> forces the AI Authority to re-probe
/// every provider on the next `resolve`.
pub async fn invalidate_cache(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    state.authority.invalidate();
    (StatusCode::OK, Json(json!({"ok": true})))
}
