//! The Four-Plane Chapter Contract's data model: Plane A (visual), Plane A2
//! (optional synthesized visual), Plane B (narrative), Plane C (factual),
//! Plane D (preference), and the composition that bundles them with a
//! diagnostics block.
//!
//! Grounded on the wire shape in spec §6 ("Chapter payload shape") and the
//! plane dataclasses in `backend/domain/plane_validator.py` /
//! `backend/pipeline/ai_output_validator.py`. Kept as plain serde structs
//! rather than an inheritance hierarchy, per the Redesign Flags'
//! chapter-id-indexed-table instruction.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataPoint {
    pub label: String,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartSpec {
    pub chart_type: String,
    pub title: String,
    pub data_points: Vec<DataPoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub axes: Option<(String, String)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaneA {
    pub plane: &'static str,
    pub plane_name: &'static str,
    pub charts: Vec<ChartSpec>,
    pub data_source_ids: Vec<String>,
    pub not_applicable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_applicable_reason: Option<String>,
}

impl PlaneA {
    pub fn not_applicable(reason: impl Into<String>) -> Self {
        Self {
            plane: "A",
            plane_name: "visual_intelligence",
            charts: Vec::new(),
            data_source_ids: Vec::new(),
            not_applicable: true,
            not_applicable_reason: Some(reason.into()),
        }
    }

    pub fn new(charts: Vec<ChartSpec>, data_source_ids: Vec<String>) -> Self {
        Self {
            plane: "A",
            plane_name: "visual_intelligence",
            charts,
            data_source_ids,
            not_applicable: false,
            not_applicable_reason: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStatus {
    Generated,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisualConcept {
    pub title: String,
    pub visual_type: String,
    pub data_used: Vec<String>,
    pub insight_explained: String,
    pub generation_status: GenerationStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaneA2 {
    pub plane: &'static str,
    pub plane_name: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hero_infographic: Option<String>,
    pub concepts: Vec<VisualConcept>,
    pub not_applicable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_applicable_reason: Option<String>,
}

impl PlaneA2 {
    pub fn not_applicable(reason: impl Into<String>) -> Self {
        Self {
            plane: "A2",
            plane_name: "synthesized_visual_intelligence",
            hero_infographic: None,
            concepts: Vec::new(),
            not_applicable: true,
            not_applicable_reason: Some(reason.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaneB {
    pub plane: &'static str,
    pub plane_name: &'static str,
    pub narrative_text: String,
    pub word_count: usize,
    pub ai_generated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_model: Option<String>,
    pub not_applicable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_applicable_reason: Option<String>,
}

impl PlaneB {
    pub fn from_narrative(text: String, provider: &str, model: &str) -> Self {
        let word_count = text.split_whitespace().count();
        Self {
            plane: "B",
            plane_name: "narrative_reasoning",
            narrative_text: text,
            word_count,
            ai_generated: true,
            ai_provider: Some(provider.to_string()),
            ai_model: Some(model.to_string()),
            not_applicable: false,
            not_applicable_reason: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Fact,
    Inferred,
    Derived,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactualKPI {
    pub key: String,
    pub label: String,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    pub provenance: Provenance,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry_id: Option<String>,
    pub complete: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaneC {
    pub plane: &'static str,
    pub plane_name: &'static str,
    pub kpis: Vec<FactualKPI>,
    pub parameters: BTreeMap<String, String>,
    pub data_sources: Vec<String>,
    pub missing_data: Vec<String>,
    pub uncertainties: Vec<String>,
    pub not_applicable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_applicable_reason: Option<String>,
}

impl PlaneC {
    pub fn not_applicable(reason: impl Into<String>) -> Self {
        Self {
            plane: "C",
            plane_name: "factual_anchor",
            kpis: Vec::new(),
            parameters: BTreeMap::new(),
            data_sources: Vec::new(),
            missing_data: Vec::new(),
            uncertainties: Vec::new(),
            not_applicable: true,
            not_applicable_reason: Some(reason.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaScore {
    pub match_score: i64,
    pub mood: String,
    pub key_values: Vec<String>,
    pub concerns: Vec<String>,
    pub summary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaneD {
    pub plane: &'static str,
    pub plane_name: &'static str,
    #[serde(flatten)]
    pub personas: BTreeMap<String, PersonaScore>,
    pub comparisons: Vec<String>,
    pub overlap_points: Vec<String>,
    pub tension_points: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub joint_synthesis: Option<String>,
}

impl PlaneD {
    pub fn new(personas: BTreeMap<String, PersonaScore>) -> Self {
        Self {
            plane: "D",
            plane_name: "human_preference",
            personas,
            comparisons: Vec::new(),
            overlap_points: Vec::new(),
            tension_points: Vec::new(),
            joint_synthesis: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaneStatus {
    Ok,
    ConceptsOnly,
    NotApplicable,
    Empty,
    Missing,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostics {
    pub chapter_id: u32,
    pub plane_status: BTreeMap<String, PlaneStatus>,
    pub validation_passed: bool,
    pub missing_required_fields: Vec<String>,
    pub errors: Vec<String>,
}

impl Diagnostics {
    pub fn new(chapter_id: u32) -> Self {
        Self {
            chapter_id,
            plane_status: BTreeMap::new(),
            validation_passed: true,
            missing_required_fields: Vec::new(),
            errors: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChapterPlaneComposition {
    pub chapter_id: u32,
    pub chapter_title: String,
    pub plane_structure: bool,
    pub plane_a: PlaneA,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plane_a2: Option<PlaneA2>,
    pub plane_b: PlaneB,
    pub plane_c: PlaneC,
    pub plane_d: PlaneD,
    pub diagnostics: Diagnostics,
}
