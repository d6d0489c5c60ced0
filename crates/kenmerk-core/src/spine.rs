//! Pipeline Spine — the single fail-closed entrypoint that drives a run
//! through its fixed phase sequence. No caller outside this module may
//! freeze a Registry, call the AI Authority, or mark a run renderable;
//! every one of those actions is gated behind an authorized transition
//! here.
//!
//! Grounded on `backend/pipeline/report_generator.py`'s
//! `generate_full_report` orchestration and the teacher's
//! `orchestrator/maintenance.rs` convention of a single driving loop with
//! cooperative cancellation checked between units of work.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ai::AiAuthority;
use crate::chapter_generator::{build_chapter_prompt, generate_chapter};
use crate::chapters::all_chapter_ids;
use crate::core_summary::CoreSummary;
use crate::enrichment::{enrich, PreferenceConfig, RawListingInput};
use crate::error::{PipelineError, PipelineResult};
use crate::four_plane::ChapterPlaneComposition;
use crate::governance::TruthPolicy;
use crate::registry::Registry;

/// The fixed phase sequence (spec §4.9). Each variant is reachable only
/// from its immediate predecessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelinePhase {
    Created,
    Ingested,
    Enriched,
    RegistryLocked,
    CoreSummaryBuilt,
    ChaptersGenerated,
    Validated,
    Renderable,
}

impl PipelinePhase {
    fn next(self) -> Option<PipelinePhase> {
        use PipelinePhase::*;
        match self {
            Created => Some(Ingested),
            Ingested => Some(Enriched),
            Enriched => Some(RegistryLocked),
            RegistryLocked => Some(CoreSummaryBuilt),
            CoreSummaryBuilt => Some(ChaptersGenerated),
            ChaptersGenerated => Some(Validated),
            Validated => Some(Renderable),
            Renderable => None,
        }
    }

    fn label(self) -> &'static str {
        match self {
            PipelinePhase::Created => "CREATED",
            PipelinePhase::Ingested => "INGESTED",
            PipelinePhase::Enriched => "ENRICHED",
            PipelinePhase::RegistryLocked => "REGISTRY_LOCKED",
            PipelinePhase::CoreSummaryBuilt => "CORE_SUMMARY_BUILT",
            PipelinePhase::ChaptersGenerated => "CHAPTERS_GENERATED",
            PipelinePhase::Validated => "VALIDATED",
            PipelinePhase::Renderable => "RENDERABLE",
        }
    }
}

/// Progress events emitted during a run, consumed by the Run Store to
/// update `RunRecord` (spec §4.10).
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    PhaseEntered(PipelinePhase),
    ChapterStatus { chapter_id: u32, status: String, word_count: Option<usize> },
}

/// The final renderable bundle a run produces (spec §4.9 step 7,
/// `get_renderable_output`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderableOutput {
    pub core_summary: CoreSummary,
    pub chapters: BTreeMap<u32, ChapterPlaneComposition>,
    pub registry_entry_count: usize,
}

/// A failed run's error, paired with whatever `CoreSummary` had already
/// been built before the failing phase. Spec §7's fail-closed rule only
/// discards `chapters` on a validation failure — "CoreSummary and
/// diagnostics survive" — so callers need it even though the run never
/// reached RENDERABLE.
#[derive(Debug)]
pub struct PipelineFailure {
    pub error: PipelineError,
    pub core_summary: Option<CoreSummary>,
}

impl std::fmt::Display for PipelineFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.error.fmt(f)
    }
}

impl std::error::Error for PipelineFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Drives one run through the Spine, holding the mutable state the
/// authorized transitions operate on. Each `pub(crate)` method is the
/// only legal way to perform its corresponding side effect; callers of
/// this crate only ever see [`execute_report_pipeline`].
struct PipelineRun {
    phase: PipelinePhase,
    registry: Registry,
    core_summary: Option<CoreSummary>,
    chapters: BTreeMap<u32, ChapterPlaneComposition>,
}

impl PipelineRun {
    fn new() -> Self {
        Self { phase: PipelinePhase::Created, registry: Registry::new(), core_summary: None, chapters: BTreeMap::new() }
    }

    fn require_phase(&self, attempted: &'static str, required: PipelinePhase) -> PipelineResult<()> {
        if self.phase != required {
            return Err(PipelineError::PipelineViolation { attempted, required: required.label(), actual: self.phase.label().to_string() });
        }
        Ok(())
    }

    fn advance(&mut self, progress_cb: &mut impl FnMut(ProgressEvent)) {
        if let Some(next) = self.phase.next() {
            self.phase = next;
            progress_cb(ProgressEvent::PhaseEntered(next));
        }
    }

    /// CREATED -> INGESTED. Raw data is accepted but not yet parsed.
    fn ingest_raw_data(&mut self, progress_cb: &mut impl FnMut(ProgressEvent)) -> PipelineResult<()> {
        self.require_phase("ingest_raw_data", PipelinePhase::Created)?;
        self.advance(progress_cb);
        Ok(())
    }

    /// INGESTED -> ENRICHED -> REGISTRY_LOCKED. Enrichment populates the
    /// Registry, then it is frozen in the same transition: nothing may
    /// observe an enriched-but-unlocked Registry (spec §4.2/§4.9).
    fn enrich_and_populate_registry(
        &mut self,
        raw: &RawListingInput,
        prefs: &PreferenceConfig,
        progress_cb: &mut impl FnMut(ProgressEvent),
    ) -> PipelineResult<()> {
        self.require_phase("enrich_and_populate_registry", PipelinePhase::Ingested)?;
        enrich(&mut self.registry, raw, prefs)?;
        self.advance(progress_cb);
        self.registry.freeze()?;
        self.advance(progress_cb);
        Ok(())
    }

    /// REGISTRY_LOCKED -> CORE_SUMMARY_BUILT.
    fn build_core_summary(&mut self, progress_cb: &mut impl FnMut(ProgressEvent)) -> PipelineResult<()> {
        self.require_phase("build_core_summary", PipelinePhase::RegistryLocked)?;
        self.core_summary = Some(CoreSummary::build(&self.registry));
        self.advance(progress_cb);
        Ok(())
    }

    /// CORE_SUMMARY_BUILT -> CHAPTERS_GENERATED. Cooperatively cancellable
    /// between chapters; a cancellation mid-chapter still lets that
    /// chapter's AI call finish rather than leaving a half-written
    /// composition.
    async fn generate_all_chapters(
        &mut self,
        authority: &AiAuthority,
        prefs: &PreferenceConfig,
        strict: bool,
        cancel: &AtomicBool,
        progress_cb: &mut impl FnMut(ProgressEvent),
    ) -> PipelineResult<()> {
        self.require_phase("generate_all_chapters", PipelinePhase::CoreSummaryBuilt)?;

        for chapter_id in all_chapter_ids() {
            if cancel.load(Ordering::SeqCst) {
                return Err(PipelineError::Cancelled);
            }

            progress_cb(ProgressEvent::ChapterStatus { chapter_id, status: "running".to_string(), word_count: None });

            let (system, prompt) = build_chapter_prompt(&self.registry, chapter_id, prefs)?;
            let (text, provider) = authority.generate_text(&prompt, &system, true).await?;
            let ai_response: serde_json::Value = serde_json::from_str(&text).unwrap_or_else(|_| serde_json::json!({"narrative": text}));

            let composition = generate_chapter(&self.registry, chapter_id, prefs, ai_response, provider.as_str(), "authority-selected", strict)?;
            progress_cb(ProgressEvent::ChapterStatus {
                chapter_id,
                status: "done".to_string(),
                word_count: Some(composition.plane_b.word_count),
            });
            self.chapters.insert(chapter_id, composition);
        }

        self.advance(progress_cb);
        Ok(())
    }

    /// CHAPTERS_GENERATED -> VALIDATED. Every chapter already validated
    /// itself during generation; this transition is the final gate that
    /// nothing is missing from the roster before RENDERABLE.
    fn validate(&mut self, progress_cb: &mut impl FnMut(ProgressEvent)) -> PipelineResult<()> {
        self.require_phase("validate", PipelinePhase::ChaptersGenerated)?;
        let expected: Vec<u32> = all_chapter_ids().collect();
        for id in &expected {
            if !self.chapters.contains_key(id) {
                return Err(PipelineError::PipelineViolation {
                    attempted: "validate",
                    required: "all chapters generated",
                    actual: format!("chapter {id} missing"),
                });
            }
        }
        self.advance(progress_cb);
        Ok(())
    }

    /// VALIDATED -> RENDERABLE.
    fn get_renderable_output(&mut self, progress_cb: &mut impl FnMut(ProgressEvent)) -> PipelineResult<RenderableOutput> {
        self.require_phase("get_renderable_output", PipelinePhase::Validated)?;
        self.advance(progress_cb);
        Ok(RenderableOutput {
            core_summary: self.core_summary.clone().expect("CORE_SUMMARY_BUILT guarantees this is set"),
            chapters: self.chapters.clone(),
            registry_entry_count: self.registry.len(),
        })
    }
}

/// The single fail-closed entrypoint (spec §4.9). Runs every phase in
/// order; any `PipelineError` aborts the run immediately rather than
/// producing a partial renderable output, except where `governance`
/// explicitly permits partial generation outside production.
pub async fn execute_report_pipeline(
    raw: RawListingInput,
    prefs: PreferenceConfig,
    authority: &AiAuthority,
    governance: &TruthPolicy,
    cancel: Arc<AtomicBool>,
    mut progress_cb: impl FnMut(ProgressEvent),
) -> Result<RenderableOutput, PipelineFailure> {
    let strict = governance.is_strict("enforce-four-plane-structure");
    let mut run = PipelineRun::new();

    if let Err(error) = run.ingest_raw_data(&mut progress_cb) {
        return Err(PipelineFailure { error, core_summary: run.core_summary.clone() });
    }
    if let Err(error) = run.enrich_and_populate_registry(&raw, &prefs, &mut progress_cb) {
        return Err(PipelineFailure { error, core_summary: run.core_summary.clone() });
    }
    if let Err(error) = run.build_core_summary(&mut progress_cb) {
        return Err(PipelineFailure { error, core_summary: run.core_summary.clone() });
    }
    if let Err(error) = run.generate_all_chapters(authority, &prefs, strict, &cancel, &mut progress_cb).await {
        return Err(PipelineFailure { error, core_summary: run.core_summary.clone() });
    }
    if let Err(error) = run.validate(&mut progress_cb) {
        return Err(PipelineFailure { error, core_summary: run.core_summary.clone() });
    }
    run.get_renderable_output(&mut progress_cb)
        .map_err(|error| PipelineFailure { error, core_summary: run.core_summary.clone() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::capability::CapabilityManager;
    use crate::ai::client::{AiProviderClient, GenerateRequest, ProviderName};
    use crate::ai::CapabilityState;
    use crate::governance::{DeploymentEnvironment, GovernanceConfig};
    use async_trait::async_trait;

    struct StubClient;

    #[async_trait]
    impl AiProviderClient for StubClient {
        fn name(&self) -> ProviderName {
            ProviderName::OpenAi
        }
        fn is_configured(&self) -> bool {
            true
        }
        async fn probe_health(&self) -> PipelineResult<CapabilityState> {
            Ok(CapabilityState::Available)
        }
        async fn generate(&self, _req: GenerateRequest<'_>) -> PipelineResult<String> {
            let narrative = "analyse ".repeat(520);
            Ok(serde_json::json!({ "narrative": narrative }).to_string())
        }
    }

    fn sample_raw() -> RawListingInput {
        RawListingInput {
            asking_price: Some("450000".to_string()),
            living_area: Some("120".to_string()),
            build_year: Some("1985".to_string()),
            energy_label: Some("C".to_string()),
            address: Some("Teststraat 123, Amsterdam".to_string()),
            description: Some("Woning met tuin en garage".to_string()),
            features: vec!["Tuin".to_string()],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn full_pipeline_run_reaches_renderable() {
        let clients: Vec<Box<dyn AiProviderClient>> = vec![Box::new(StubClient)];
        let authority = AiAuthority::new(clients, CapabilityManager::new());
        let governance = TruthPolicy::build(&GovernanceConfig {
            environment: DeploymentEnvironment::Development,
            allow_partial_generation: false,
            offline_structural_mode: false,
        })
        .unwrap();

        let cancel = Arc::new(AtomicBool::new(false));
        let mut events = Vec::new();
        let output = execute_report_pipeline(sample_raw(), PreferenceConfig::default(), &authority, &governance, cancel, |e| events.push(format!("{e:?}")))
            .await
            .unwrap();

        assert_eq!(output.chapters.len(), crate::chapters::CHAPTER_COUNT as usize);
        assert!(events.iter().any(|e| e.contains("Renderable")));
    }

    #[tokio::test]
    async fn cancellation_before_chapters_aborts_the_run() {
        let clients: Vec<Box<dyn AiProviderClient>> = vec![Box::new(StubClient)];
        let authority = AiAuthority::new(clients, CapabilityManager::new());
        let governance = TruthPolicy::build(&GovernanceConfig {
            environment: DeploymentEnvironment::Development,
            allow_partial_generation: false,
            offline_structural_mode: false,
        })
        .unwrap();

        let cancel = Arc::new(AtomicBool::new(true));
        let failure = execute_report_pipeline(sample_raw(), PreferenceConfig::default(), &authority, &governance, cancel, |_| {})
            .await
            .unwrap_err();
        assert!(matches!(failure.error, PipelineError::Cancelled));
    }

    #[test]
    fn out_of_order_transition_is_a_pipeline_violation() {
        let mut run = PipelineRun::new();
        let err = run.build_core_summary(&mut |_| {}).unwrap_err();
        assert!(matches!(err, PipelineError::PipelineViolation { .. }));
    }
}
