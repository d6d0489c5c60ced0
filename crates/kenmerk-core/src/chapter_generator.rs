//! Chapter Generator — the per-chapter procedure from spec §4.8: build a
//! scoped view, invoke AI under contract, construct the four-plane
//! composition, validate.
//!
//! Grounded on `backend/pipeline/chapter_generator.py`
//! (`generate_chapter_with_validation`, `_build_scoped_context`) and
//! `backend/pipeline/four_plane_extractors.py` for the deterministic
//! Plane A/Plane C/Plane D extraction that never goes through AI.

use std::collections::BTreeMap;

use serde_json::{json, Value};

use crate::ai::{validate_ai_output, AiAuthority};
use crate::chapters::{all_chapter_ids, chapter_spec, is_gallery_only, owned_keys, ALWAYS_AVAILABLE_KEYS, CORE_KEYS};
use crate::enrichment::PreferenceConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::four_plane::{
    validate_chapter, ChapterPlaneComposition, ChartSpec, DataPoint, Diagnostics, FactualKPI, PersonaScore, PlaneA,
    PlaneC, PlaneD, PlaneStatus, Provenance,
};
use crate::registry::{EntryKind, Registry, RegistryValue};

/// Builds the scoped view a chapter's AI prompt receives: its owned keys,
/// the always-available reference keys, core keys if this is chapter 0,
/// plus the preference config, serialized as the JSON prompt body.
fn build_scoped_view(registry: &Registry, chapter_id: u32, prefs: &PreferenceConfig) -> Value {
    let owned = owned_keys(chapter_id);
    let mut scoped = serde_json::Map::new();

    let mut visible: Vec<&str> = owned.iter().copied().collect();
    visible.extend(ALWAYS_AVAILABLE_KEYS.iter().copied());
    if chapter_id == 0 {
        visible.extend(CORE_KEYS.iter().copied());
    }

    for key in visible {
        if let Some(entry) = registry.get(key) {
            if let Ok(v) = serde_json::to_value(&entry.value) {
                scoped.insert(key.to_string(), v);
            }
        }
    }

    let persona_names: Vec<Value> = prefs.personas.iter().map(|p| json!(p.name)).collect();
    scoped.insert("_preferences".to_string(), json!(persona_names));
    Value::Object(scoped)
}

/// Deterministic extractor: builds Plane A charts from numeric facts this
/// chapter owns. Never reads AI output.
fn extract_plane_a(chapter_id: u32, chapter_title: &str, registry: &Registry) -> PlaneA {
    if is_gallery_only(chapter_id) {
        return PlaneA::not_applicable("gallery chapter; media is shown outside the chart plane");
    }

    let owned = owned_keys(chapter_id);
    let mut points = Vec::new();
    let mut data_source_ids = Vec::new();
    for key in owned.iter().copied() {
        if let Some(entry) = registry.get(key) {
            if let Some(v) = entry.value.as_f64() {
                points.push(DataPoint { label: entry.name.clone(), value: v });
                data_source_ids.push(key.to_string());
            }
        }
    }

    if points.is_empty() {
        return PlaneA::not_applicable("no chartable numeric facts are owned by this chapter");
    }

    let mut title: String = chapter_title.chars().take(50).collect();
    if title.is_empty() {
        title = format!("Chapter {chapter_id}");
    }
    let chart = ChartSpec { chart_type: "bar".to_string(), title, data_points: points, axes: None };
    PlaneA::new(vec![chart], data_source_ids)
}

fn provenance_for(kind: EntryKind) -> Provenance {
    match kind {
        EntryKind::Fact => Provenance::Fact,
        EntryKind::Variable | EntryKind::Kpi => Provenance::Derived,
        EntryKind::Uncertainty => Provenance::Unknown,
    }
}

/// Deterministic extractor: builds Plane C KPIs directly from the
/// Registry, emitting an explicit `missing_reason` for any owned key not
/// present.
fn extract_plane_c(chapter_id: u32, registry: &Registry) -> PlaneC {
    if is_gallery_only(chapter_id) {
        return PlaneC::not_applicable("gallery chapter; no factual anchor is owned");
    }

    let owned = owned_keys(chapter_id);
    if owned.is_empty() {
        return PlaneC::not_applicable("chapter owns no Registry-backed variables");
    }

    let mut kpis = Vec::new();
    let mut missing = Vec::new();
    let mut sources = Vec::new();

    for key in owned.iter().copied() {
        match registry.get(key) {
            Some(entry) => {
                sources.push(key.to_string());
                kpis.push(FactualKPI {
                    key: key.to_string(),
                    label: entry.name.clone(),
                    value: entry.value.to_string(),
                    unit: entry.unit.clone(),
                    provenance: provenance_for(entry.kind),
                    registry_id: Some(key.to_string()),
                    complete: entry.complete,
                    missing_reason: None,
                });
            }
            None => {
                missing.push(key.to_string());
                kpis.push(FactualKPI {
                    key: key.to_string(),
                    label: key.to_string(),
                    value: String::new(),
                    unit: None,
                    provenance: Provenance::Unknown,
                    registry_id: None,
                    complete: false,
                    missing_reason: Some("not available in the Registry for this listing".to_string()),
                });
            }
        }
    }

    PlaneC {
        plane: "C",
        plane_name: "factual_anchor",
        kpis,
        parameters: BTreeMap::new(),
        data_sources: sources,
        missing_data: missing,
        uncertainties: registry.incomplete_keys().iter().map(|s| s.to_string()).collect(),
        not_applicable: false,
        not_applicable_reason: None,
    }
}

fn mood_for_score(score: i64) -> &'static str {
    if score >= 70 {
        "enthusiast"
    } else if score >= 40 {
        "neutraal"
    } else {
        "terughoudend"
    }
}

/// Deterministic extractor: Plane D is built entirely from persona-match
/// KPIs already in the Registry (SPEC_FULL.md §12 Open Question 1 — the
/// per-persona `summary` is never AI-authored).
fn extract_plane_d(registry: &Registry, prefs: &PreferenceConfig) -> PlaneD {
    let mut personas = BTreeMap::new();
    let mut all_matched: Vec<Vec<String>> = Vec::new();

    for persona in &prefs.personas {
        let score_key = format!("persona_match_{}", persona.name.to_lowercase());
        let matched_key = format!("persona_matched_tokens_{}", persona.name.to_lowercase());

        let score = registry.get(&score_key).and_then(|e| e.value.as_i64()).unwrap_or(10);
        let matched: Vec<String> = registry
            .get(&matched_key)
            .and_then(|e| e.value.as_list())
            .map(|items| items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();

        let concerns: Vec<String> = persona.priorities.iter().filter(|p| !matched.contains(p)).cloned().collect();

        let summary = if matched.is_empty() {
            format!("{} vindt weinig aansluiting bij de genoemde prioriteiten.", persona.name)
        } else {
            format!("{} herkent {} van de genoemde prioriteiten terug in deze woning.", persona.name, matched.len())
        };

        all_matched.push(matched.clone());
        personas.insert(
            persona.name.to_lowercase(),
            PersonaScore { match_score: score, mood: mood_for_score(score).to_string(), key_values: matched, concerns, summary },
        );
    }

    let mut plane = PlaneD::new(personas);

    if all_matched.len() > 1 {
        let first = &all_matched[0];
        let overlap: Vec<String> = first.iter().filter(|t| all_matched[1..].iter().all(|m| m.contains(t))).cloned().collect();
        let tension: Vec<String> = prefs
            .personas
            .iter()
            .flat_map(|p| p.priorities.iter())
            .filter(|t| all_matched.iter().any(|m| m.contains(t)) && !all_matched.iter().all(|m| m.contains(t)))
            .cloned()
            .collect();
        plane.overlap_points = overlap;
        plane.tension_points = tension;
    }

    plane
}

/// Full per-chapter generation procedure (spec §4.8 steps 1–7).
/// `ai_response` is the already-validated-or-raw JSON object returned by
/// the AI call under contract; callers obtain it from
/// `AiAuthority::generate_text` with `json_mode = true` and parse it
/// before calling this function, or pass a pre-built value in tests.
pub fn generate_chapter(
    registry: &Registry,
    chapter_id: u32,
    prefs: &PreferenceConfig,
    ai_response: Value,
    ai_provider: &str,
    ai_model: &str,
    strict: bool,
) -> PipelineResult<ChapterPlaneComposition> {
    if !registry.is_frozen() {
        return Err(PipelineError::PipelineViolation {
            attempted: "generate_chapter",
            required: "REGISTRY_LOCKED",
            actual: "registry not frozen".to_string(),
        });
    }

    let spec = chapter_spec(chapter_id).ok_or(PipelineError::PipelineViolation {
        attempted: "generate_chapter",
        required: "known chapter id",
        actual: format!("chapter {chapter_id} is not in the roster"),
    })?;

    let (sanitized, validation) = validate_ai_output(chapter_id, &ai_response, strict)?;

    let plane_a = extract_plane_a(chapter_id, spec.title, registry);
    let plane_c = extract_plane_c(chapter_id, registry);
    let plane_d = extract_plane_d(registry, prefs);

    let narrative_text = sanitized.get("narrative").and_then(Value::as_str).unwrap_or_default().to_string();
    let plane_b = if is_gallery_only(chapter_id) && narrative_text.is_empty() {
        let mut b = crate::four_plane::PlaneB::from_narrative(String::new(), ai_provider, ai_model);
        b.not_applicable = true;
        b.not_applicable_reason = Some("gallery chapter carries no narrative".to_string());
        b.ai_generated = false;
        b
    } else {
        crate::four_plane::PlaneB::from_narrative(narrative_text, ai_provider, ai_model)
    };

    let registry_keys: std::collections::HashSet<String> = registry.keys().map(str::to_string).collect();

    let mut diagnostics = Diagnostics::new(chapter_id);
    diagnostics.plane_status.insert("A".to_string(), plane_status_of(&plane_a));
    diagnostics
        .plane_status
        .insert("B".to_string(), if plane_b.not_applicable { PlaneStatus::NotApplicable } else { PlaneStatus::Ok });
    diagnostics
        .plane_status
        .insert("C".to_string(), if plane_c.not_applicable { PlaneStatus::NotApplicable } else { PlaneStatus::Ok });
    diagnostics.plane_status.insert("D".to_string(), PlaneStatus::Ok);
    diagnostics.missing_required_fields = plane_c.missing_data.clone();
    if !validation.stripped_keys.is_empty() {
        diagnostics.errors.push(format!("stripped unauthorized AI keys: {:?}", validation.stripped_keys));
    }

    let mut composition = ChapterPlaneComposition {
        chapter_id,
        chapter_title: spec.title.to_string(),
        plane_structure: true,
        plane_a,
        plane_a2: None,
        plane_b,
        plane_c,
        plane_d,
        diagnostics,
    };

    let violations = validate_chapter(&composition, &registry_keys);
    composition.diagnostics.validation_passed = violations.is_empty();
    composition.diagnostics.errors.extend(violations.iter().map(|v| v.to_string()));

    if !violations.is_empty() {
        return Err(PipelineError::ValidationFailure(chapter_id, violations.len()));
    }

    Ok(composition)
}

fn plane_status_of(plane: &PlaneA) -> PlaneStatus {
    if plane.not_applicable {
        PlaneStatus::NotApplicable
    } else if plane.charts.is_empty() {
        PlaneStatus::Empty
    } else {
        PlaneStatus::Ok
    }
}

/// Builds the shared per-chapter AI prompt: the chapter's system prompt
/// plus a JSON-serialized scoped view of the frozen Registry.
pub fn build_chapter_prompt(registry: &Registry, chapter_id: u32, prefs: &PreferenceConfig) -> PipelineResult<(String, String)> {
    let spec = chapter_spec(chapter_id).ok_or(PipelineError::PipelineViolation {
        attempted: "build_chapter_prompt",
        required: "known chapter id",
        actual: format!("chapter {chapter_id} is not in the roster"),
    })?;
    let scoped = build_scoped_view(registry, chapter_id, prefs);
    let prompt = format!(
        "Scoped registry view for chapter '{}':\n{}\n\nRespond as JSON: {{\"narrative\": \"...\", \"variables\": {{...}}}}.",
        spec.title,
        serde_json::to_string_pretty(&scoped).unwrap_or_default()
    );
    Ok((spec.system_prompt.to_string(), prompt))
}

/// Calls the AI Authority for every chapter id in fixed order and
/// generates its composition, reporting progress via `progress_cb` after
/// each chapter (spec §4.9 `generate_all_chapters`). This is the only
/// place the Spine iterates chapters; ordering is sequential to preserve
/// bounded memory and progress reporting (spec §5).
pub async fn generate_all_chapters(
    registry: &Registry,
    authority: &AiAuthority,
    prefs: &PreferenceConfig,
    strict: bool,
    mut progress_cb: impl FnMut(u32, &str, Option<usize>),
) -> PipelineResult<BTreeMap<u32, ChapterPlaneComposition>> {
    let mut chapters = BTreeMap::new();
    for chapter_id in all_chapter_ids() {
        progress_cb(chapter_id, "running", None);
        let (system, prompt) = build_chapter_prompt(registry, chapter_id, prefs)?;
        let (text, provider) = authority.generate_text(&prompt, &system, true).await?;
        let ai_response: Value = serde_json::from_str(&text).unwrap_or_else(|_| json!({"narrative": text}));

        match generate_chapter(registry, chapter_id, prefs, ai_response, provider.as_str(), "authority-selected", strict) {
            Ok(comp) => {
                progress_cb(chapter_id, "done", Some(comp.plane_b.word_count));
                chapters.insert(chapter_id, comp);
            }
            Err(err) => {
                progress_cb(chapter_id, "error", None);
                return Err(err);
            }
        }
    }
    Ok(chapters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrichment::{enrich, PersonaPreferences, RawListingInput};

    fn frozen_registry_with_personas() -> (Registry, PreferenceConfig) {
        let mut reg = Registry::new();
        let input = RawListingInput {
            asking_price: Some("450000".to_string()),
            living_area: Some("120".to_string()),
            build_year: Some("1985".to_string()),
            energy_label: Some("C".to_string()),
            address: Some("Teststraat 123".to_string()),
            description: Some("Woning met tuin en garage".to_string()),
            features: vec!["Tuin".to_string(), "Garage".to_string()],
            ..Default::default()
        };
        let prefs = PreferenceConfig {
            personas: vec![
                PersonaPreferences { name: "marcel".to_string(), priorities: vec!["Garage".to_string()] },
                PersonaPreferences { name: "petra".to_string(), priorities: vec!["Open keuken".to_string()] },
            ],
        };
        enrich(&mut reg, &input, &prefs).unwrap();
        reg.freeze().unwrap();
        (reg, prefs)
    }

    fn long_narrative(words: usize) -> String {
        "analyse ".repeat(words)
    }

    #[test]
    fn unfrozen_registry_is_a_pipeline_violation() {
        let reg = Registry::new();
        let prefs = PreferenceConfig::default();
        let resp = json!({"narrative": long_narrative(350)});
        let err = generate_chapter(&reg, 1, &prefs, resp, "openai", "gpt", true).unwrap_err();
        assert!(matches!(err, PipelineError::PipelineViolation { .. }));
    }

    #[test]
    fn chapter_0_requires_500_words() {
        let (reg, prefs) = frozen_registry_with_personas();
        let resp = json!({"narrative": long_narrative(350)});
        let err = generate_chapter(&reg, 0, &prefs, resp, "openai", "gpt", true).unwrap_err();
        assert!(matches!(err, PipelineError::ValidationFailure(0, _)));
    }

    #[test]
    fn sufficient_narrative_produces_valid_composition() {
        let (reg, prefs) = frozen_registry_with_personas();
        let resp = json!({"narrative": long_narrative(520)});
        let comp = generate_chapter(&reg, 0, &prefs, resp, "openai", "gpt", true).unwrap();
        assert!(comp.diagnostics.validation_passed);
        assert_eq!(comp.chapter_id, 0);
    }

    #[test]
    fn gallery_chapter_tolerates_not_applicable_planes() {
        let (reg, prefs) = frozen_registry_with_personas();
        let resp = json!({});
        let comp = generate_chapter(&reg, 13, &prefs, resp, "openai", "gpt", true).unwrap();
        assert!(comp.plane_a.not_applicable);
        assert!(comp.plane_c.not_applicable);
        assert!(comp.plane_b.not_applicable);
    }

    #[test]
    fn plane_d_derives_persona_summary_without_ai() {
        let (reg, prefs) = frozen_registry_with_personas();
        let resp = json!({"narrative": long_narrative(350)});
        let comp = generate_chapter(&reg, 2, &prefs, resp, "openai", "gpt", true).unwrap();
        assert!(comp.plane_d.personas.contains_key("marcel"));
        assert!(comp.plane_d.personas.contains_key("petra"));
    }
}
