//! Integration test: drives the real `Router` in-process with
//! `tower::ServiceExt::oneshot`, the same way the teacher's handler tests
//! exercise `axum::Router` directly rather than spinning up a TCP
//! listener.
//!
//! ## Scenarios
//! 1. `POST /runs` with inline HTML, then `/start`, reaches `done` and
//!    `/report` returns the full 14-chapter roster.
//! 2. `/report` returns 409 before a run has finished.
//! 3. `/runs/{id}/status` 404s for an unknown run id.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use kenmerk_core::ai::{AiAuthority, AiProviderClient, CapabilityManager, CapabilityState, GenerateRequest, ProviderName};
use kenmerk_core::{DeploymentEnvironment, GovernanceConfig, TruthPolicy};

use kenmerk_gateway::job_queue::JobQueue;
use kenmerk_gateway::run_store::{RunStore, RunStoreDb};
use kenmerk_gateway::settings::Settings;
use kenmerk_gateway::{build_app, AppState};

struct ScriptedClient;

#[async_trait::async_trait]
impl AiProviderClient for ScriptedClient {
    fn name(&self) -> ProviderName {
        ProviderName::OpenAi
    }
    fn is_configured(&self) -> bool {
        true
    }
    async fn probe_health(&self) -> kenmerk_core::PipelineResult<CapabilityState> {
        Ok(CapabilityState::Available)
    }
    async fn generate(&self, _req: GenerateRequest<'_>) -> kenmerk_core::PipelineResult<String> {
        let narrative = "analyse ".repeat(520);
        Ok(json!({ "narrative": narrative }).to_string())
    }
}

fn temp_db_path() -> String {
    std::env::temp_dir().join(format!("kenmerk_gateway_test_{}.sqlite3", uuid::Uuid::new_v4())).to_string_lossy().to_string()
}

fn test_state() -> AppState {
    let settings = Settings {
        openai_api_key: Some("test-key".to_string()),
        gemini_api_key: None,
        anthropic_api_key: None,
        ollama_base_url: None,
        ollama_timeout_secs: 60,
        environment: DeploymentEnvironment::Development,
        allow_partial_generation: false,
        offline_structural_mode: false,
        worker_pool_size: 4,
        zombie_timeout_secs: 1800,
        run_db_path: temp_db_path(),
        bind_addr: "127.0.0.1:0".to_string(),
    };

    let capability_manager = CapabilityManager::new();
    let clients: Vec<Box<dyn AiProviderClient>> = vec![Box::new(ScriptedClient)];
    let authority = Arc::new(AiAuthority::new(clients, Arc::clone(&capability_manager)));

    let governance = Arc::new(
        TruthPolicy::build(&GovernanceConfig {
            environment: settings.environment,
            allow_partial_generation: settings.allow_partial_generation,
            offline_structural_mode: settings.offline_structural_mode,
        })
        .unwrap(),
    );

    let db = RunStoreDb::new(&settings.run_db_path).unwrap();
    let run_store = RunStore::new(db);
    let job_queue = JobQueue::new(Arc::clone(&run_store), Arc::clone(&authority), Arc::clone(&governance), settings.worker_pool_size, settings.zombie_timeout_secs);

    AppState {
        settings: Arc::new(settings),
        run_store,
        job_queue,
        authority,
        capability_manager,
        governance,
    }
}

const SAMPLE_HTML: &str = r#"
    <html><body>
        <h1 class="object-header__title">Teststraat 123, Amsterdam</h1>
        <span class="object-header__price">€ 450.000 k.k.</span>
        <dl>
            <dt>Woonoppervlakte</dt><dd>120 m²</dd>
            <dt>Bouwjaar</dt><dd>1985</dd>
            <dt>Energielabel</dt><dd>C</dd>
        </dl>
    </body></html>
"#;

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn full_run_reaches_done_and_report_lists_all_chapters() {
    let state = test_state();
    let app = build_app(state);

    let create_res = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/runs")
                .header("content-type", "application/json")
                .body(Body::from(json!({"funda_html": SAMPLE_HTML}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(create_res.status(), StatusCode::OK);
    let created = body_json(create_res).await;
    let run_id = created["run_id"].as_str().unwrap().to_string();
    assert_eq!(created["status"], "queued");

    let start_res = app
        .clone()
        .oneshot(Request::builder().method("POST").uri(format!("/runs/{run_id}/start")).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(start_res.status(), StatusCode::OK);

    let mut status = Value::Null;
    for _ in 0..200 {
        let res = app
            .clone()
            .oneshot(Request::builder().uri(format!("/runs/{run_id}/status")).body(Body::empty()).unwrap())
            .await
            .unwrap();
        status = body_json(res).await;
        if status["status"] == "done" || status["status"] == "error" || status["status"] == "validation_failed" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(status["status"], "done", "run did not reach done: {status:?}");

    let report_res = app
        .clone()
        .oneshot(Request::builder().uri(format!("/runs/{run_id}/report")).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(report_res.status(), StatusCode::OK);
    let report = body_json(report_res).await;
    assert_eq!(report["chapters"].as_object().unwrap().len(), kenmerk_core::chapters::CHAPTER_COUNT as usize);
    assert!(report["core_summary"]["fields"]["asking_price"]["value"].as_str().unwrap().contains("450.000"));
}

#[tokio::test]
async fn report_conflicts_before_run_is_done() {
    let state = test_state();
    let app = build_app(state);

    let create_res = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/runs")
                .header("content-type", "application/json")
                .body(Body::from(json!({"funda_html": SAMPLE_HTML}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let created = body_json(create_res).await;
    let run_id = created["run_id"].as_str().unwrap().to_string();

    let report_res = app
        .oneshot(Request::builder().uri(format!("/runs/{run_id}/report")).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(report_res.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn unknown_run_id_404s_on_status() {
    let state = test_state();
    let app = build_app(state);

    let res = app
        .oneshot(Request::builder().uri("/runs/does-not-exist/status").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}
