//! `/runs` handlers: submission, start, HTML paste, status, report, and
//! the live-status poll. Grounded on `handlers::chat`'s module-split
//! convention — one file per concern, handler functions taking `&AppState`
//! fields and returning `axum::Json`/`(StatusCode, Json<Value>)` tuples
//! the way the teacher's `main.rs` handlers do, rather than a custom
//! `IntoResponse` error type.
//!
//! `GET /runs/{id}/live-status` is a plain JSON poll, not the teacher's
//! SSE pulse stream (`maintenance_pulse_stream`) — spec §6 describes a
//! "real-time snapshot", which a client can get by polling; the SSE
//! machinery has no counterpart in the spec and was dropped (see
//! DESIGN.md).

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use kenmerk_core::RawListingInput;

use crate::personas::load_preferences;
use crate::run_store::RunRecord;
use crate::scrape::scrape_to_raw_input;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateRunRequest {
    pub funda_url: Option<String>,
    pub funda_html: Option<String>,
    #[serde(default)]
    pub media_urls: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct PasteHtmlRequest {
    pub funda_html: String,
    #[serde(default)]
    pub media_urls: Vec<String>,
}

fn not_found(run_id: &str) -> (StatusCode, Json<Value>) {
    (StatusCode::NOT_FOUND, Json(json!({"error": "run not found", "run_id": run_id})))
}

/// `POST /runs` body `{funda_url, funda_html?, media_urls?}` -> `{run_id,
/// status:"queued"}`. Creating a run never starts it — processing begins
/// only on `POST /runs/{id}/start`, so a caller whose fetch hit a paywall
/// can `paste` the HTML in between.
pub async fn create_run(State(state): State<AppState>, Json(body): Json<CreateRunRequest>) -> (StatusCode, Json<Value>) {
    if body.funda_url.is_none() && body.funda_html.is_none() {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": "one of funda_url or funda_html is required"})));
    }

    let run_id = uuid::Uuid::new_v4().to_string();
    let marker = body.funda_url.clone().unwrap_or_else(|| "pasted-html".to_string());
    state.run_store.create(run_id.clone(), marker, false);

    if let Some(html) = body.funda_html {
        state.run_store.set_pending_html(&run_id, html, body.media_urls);
    }

    tracing::info!(target: "kenmerk::handlers::runs", run_id = %run_id, "run created");
    (StatusCode::OK, Json(json!({"run_id": run_id, "status": "queued"})))
}

/// `POST /runs/{id}/start` -> `{ok:true, status:"processing"}`, returning
/// immediately; the Spine runs on the job queue's worker pool.
pub async fn start_run(State(state): State<AppState>, Path(run_id): Path<String>) -> (StatusCode, Json<Value>) {
    let Some(record) = state.run_store.get(&run_id) else {
        return not_found(&run_id);
    };

    let Some((html, media_urls)) = state.run_store.take_pending(&run_id) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "no HTML staged for this run; POST /runs/{id}/paste first"})),
        );
    };

    let canonical_url = if record.input_url_or_marker == "pasted-html" { None } else { Some(record.input_url_or_marker.clone()) };
    let raw: RawListingInput = scrape_to_raw_input(&html, canonical_url, media_urls);
    let prefs = load_preferences();

    state.job_queue.submit(run_id, raw, prefs);
    (StatusCode::OK, Json(json!({"ok": true, "status": "processing"})))
}

/// `POST /runs/{id}/paste` body `{funda_html}` -> `{ok:true}`. Lets a
/// caller supply HTML after the fact, e.g. once past a paywall the
/// initial fetch could not see through — scraping the HTML itself is an
/// external-collaborator concern (spec §1 non-goal), this endpoint just
/// stages it for `start`.
pub async fn paste_html(State(state): State<AppState>, Path(run_id): Path<String>, Json(body): Json<PasteHtmlRequest>) -> (StatusCode, Json<Value>) {
    if state.run_store.get(&run_id).is_none() {
        return not_found(&run_id);
    }
    state.run_store.set_pending_html(&run_id, body.funda_html, body.media_urls);
    (StatusCode::OK, Json(json!({"ok": true})))
}

fn status_payload(record: &RunRecord) -> Value {
    let (current, total, percent) = record.progress();
    json!({
        "run_id": record.run_id,
        "status": record.status,
        "phase": record.phase,
        "steps": record.steps,
        "progress": {"current": current, "total": total, "percent": percent},
        "unknowns": record.unknowns,
        "artifacts": { "chapter_count": record.chapters.len() },
        "updated_at": record.updated_at_ms,
    })
}

/// `GET /runs/{id}/status` -> run status, step timings, and progress
/// fraction (spec §4.10: `done_or_skipped_steps / total_steps`).
pub async fn get_status(State(state): State<AppState>, Path(run_id): Path<String>) -> (StatusCode, Json<Value>) {
    match state.run_store.get(&run_id) {
        Some(record) => (StatusCode::OK, Json(status_payload(&record))),
        None => not_found(&run_id),
    }
}

/// `GET /runs/{id}/report` -> full payload: `core_summary`, `chapters`
/// keyed by string id (wire shape is JS-object friendly), a flattened
/// `kpis` list pulled from every chapter's Plane C, `discovery`, and
/// `media_from_db`. The last two are thin stand-ins for collaborators
/// (search discovery, a media asset store) the core spec does not define
/// an interface for; see DESIGN.md.
pub async fn get_report(State(state): State<AppState>, Path(run_id): Path<String>) -> (StatusCode, Json<Value>) {
    let Some(record) = state.run_store.get(&run_id) else {
        return not_found(&run_id);
    };

    if record.status != crate::run_store::RunStatus::Done {
        return (
            StatusCode::CONFLICT,
            Json(json!({"error": "report not available", "status": record.status, "errors": record.errors})),
        );
    }

    let chapters_by_string_id: serde_json::Map<String, Value> = record
        .chapters
        .iter()
        .map(|(id, chapter)| (id.to_string(), serde_json::to_value(chapter).unwrap_or(Value::Null)))
        .collect();

    let kpis: Vec<&kenmerk_core::four_plane::FactualKPI> = record.chapters.values().flat_map(|c| c.plane_c.kpis.iter()).collect();

    (
        StatusCode::OK,
        Json(json!({
            "run_id": record.run_id,
            "status": record.status,
            "core_summary": record.core_summary,
            "chapters": chapters_by_string_id,
            "kpis": kpis,
            "discovery": Value::Null,
            "media_from_db": Vec::<String>::new(),
        })),
    )
}

/// `GET /runs/{id}/live-status` -> real-time snapshot including
/// per-chapter plane states. A JSON poll, see module docs.
pub async fn get_live_status(State(state): State<AppState>, Path(run_id): Path<String>) -> (StatusCode, Json<Value>) {
    let Some(record) = state.run_store.get(&run_id) else {
        return not_found(&run_id);
    };
    let (current, total, percent) = record.progress();
    (
        StatusCode::OK,
        Json(json!({
            "run_id": record.run_id,
            "status": record.status,
            "phase": record.phase,
            "chapter_statuses": record.chapter_statuses,
            "progress": {"current": current, "total": total, "percent": percent},
            "updated_at": record.updated_at_ms,
        })),
    )
}
