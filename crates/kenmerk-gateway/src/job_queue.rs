//! Job Queue & Worker Pool (spec §4.12). A bounded `Semaphore` caps how
//! many runs drive the Spine concurrently; `submit` returns immediately
//! and the run advances on its own spawned task, exactly like the
//! teacher's `init_maintenance_loop` spawns its own driving task rather
//! than blocking the caller.
//!
//! The zombie sweeper mirrors `orchestrator/maintenance.rs`'s
//! `tokio::time::interval` loop: a fixed-period background task, gated
//! only by elapsed time, logging under its own `tracing` target.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use kenmerk_core::ai::AiAuthority;
use kenmerk_core::{execute_report_pipeline, PipelineError, PreferenceConfig, ProgressEvent, RawListingInput, TruthPolicy};
use tokio::sync::Semaphore;

use crate::run_store::{RunStatus, RunStore};

const ZOMBIE_SWEEP_INTERVAL_SECS: u64 = 60;

/// Classifies a terminal `PipelineError` per spec §7's taxonomy: the
/// Validation category (`ValidationFailure`, `PlaneViolation`,
/// `AIOutputViolation`) produces `validation_failed`; everything else
/// (Structural/Operational) produces `error`.
fn terminal_status_for(err: &PipelineError) -> RunStatus {
    match err {
        PipelineError::ValidationFailure(..) | PipelineError::PlaneViolation(_) | PipelineError::AIOutputViolation { .. } => RunStatus::ValidationFailed,
        _ => RunStatus::Error,
    }
}

pub struct JobQueue {
    run_store: Arc<RunStore>,
    authority: Arc<AiAuthority>,
    governance: Arc<TruthPolicy>,
    semaphore: Arc<Semaphore>,
    cancel_flags: DashMap<String, Arc<AtomicBool>>,
    zombie_timeout_ms: i64,
}

impl JobQueue {
    pub fn new(run_store: Arc<RunStore>, authority: Arc<AiAuthority>, governance: Arc<TruthPolicy>, worker_pool_size: usize, zombie_timeout_secs: u64) -> Arc<Self> {
        Arc::new(Self {
            run_store,
            authority,
            governance,
            semaphore: Arc::new(Semaphore::new(worker_pool_size)),
            cancel_flags: DashMap::new(),
            zombie_timeout_ms: (zombie_timeout_secs as i64).saturating_mul(1000),
        })
    }

    /// Accepts a run for processing. Returns immediately; the worker
    /// drives `execute_report_pipeline` (spec §4.9) on a spawned task.
    pub fn submit(self: &Arc<Self>, run_id: String, raw: RawListingInput, prefs: PreferenceConfig) {
        let this = Arc::clone(self);
        let cancel = Arc::new(AtomicBool::new(false));
        this.cancel_flags.insert(run_id.clone(), Arc::clone(&cancel));

        tokio::spawn(async move {
            let permit = match this.semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };

            this.run_store.mark_running(&run_id);
            tracing::info!(target: "kenmerk::job_queue", run_id = %run_id, "run started");

            let store_for_progress = Arc::clone(&this.run_store);
            let run_id_for_progress = run_id.clone();
            let progress_cb = move |event: ProgressEvent| match event {
                ProgressEvent::PhaseEntered(phase) => store_for_progress.update_phase(&run_id_for_progress, phase),
                ProgressEvent::ChapterStatus { chapter_id, status, word_count } => {
                    store_for_progress.update_chapter_status(&run_id_for_progress, chapter_id, &status, word_count)
                }
            };

            let result = execute_report_pipeline(raw, prefs, &this.authority, &this.governance, cancel, progress_cb).await;

            match result {
                Ok(output) => {
                    tracing::info!(target: "kenmerk::job_queue", run_id = %run_id, chapters = output.chapters.len(), "run reached RENDERABLE");
                    this.run_store.complete(&run_id, RunStatus::Done, Some(output.core_summary), output.chapters);
                }
                Err(failure) => {
                    let status = terminal_status_for(&failure.error);
                    tracing::warn!(target: "kenmerk::job_queue", run_id = %run_id, status = ?status, error = %failure.error, "run terminated");
                    this.run_store.add_error(&run_id, failure.error.to_string());
                    this.run_store.complete(&run_id, status, failure.core_summary, BTreeMap::new());
                }
            }

            this.cancel_flags.remove(&run_id);
            drop(permit);
        });
    }

    /// Flags a running job's cancellation token. Honored at the next
    /// phase boundary or chapter boundary inside the Spine.
    pub fn cancel(&self, run_id: &str) -> bool {
        match self.cancel_flags.get(run_id) {
            Some(flag) => {
                flag.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    /// Spawns the periodic zombie sweeper. Mirrors the teacher's
    /// `init_maintenance_loop`: a `tokio::time::interval` loop with no
    /// external wakeup, logging what it swept.
    pub fn spawn_zombie_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(ZOMBIE_SWEEP_INTERVAL_SECS));
            loop {
                interval.tick().await;
                let swept = this.run_store.sweep_zombies(this.zombie_timeout_ms);
                if !swept.is_empty() {
                    tracing::warn!(target: "kenmerk::job_queue", run_ids = ?swept, "swept zombie runs to error");
                    for run_id in &swept {
                        this.cancel(run_id);
                    }
                }
                this.run_store.cleanup_old(24 * 60 * 60 * 1000);
            }
        })
    }
}
