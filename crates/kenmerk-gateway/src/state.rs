//! `AppState`: the Arc-wrapped bundle every handler gets via
//! `.with_state()`, grounded on the teacher's `AppState` shape in
//! `add-ons/pagi-gateway/src/main.rs` — one `Arc`/`Clone` struct holding
//! every long-lived service, constructed once in `main`.

use std::sync::Arc;

use kenmerk_core::ai::{AiAuthority, CapabilityManager};
use kenmerk_core::TruthPolicy;

use crate::job_queue::JobQueue;
use crate::run_store::RunStore;
use crate::settings::Settings;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub run_store: Arc<RunStore>,
    pub job_queue: Arc<JobQueue>,
    pub authority: Arc<AiAuthority>,
    pub capability_manager: Arc<CapabilityManager>,
    pub governance: Arc<TruthPolicy>,
}
