//! The Four-Plane structural validator.
//!
//! Grounded on `backend/domain/plane_validator.py`: the same three regex
//! families (KPI-dump shape, narrative conjunctions, persona-scoring
//! leak), the same word-count floors, and the same character bounds on
//! chart titles and joint synthesis. A violation here is always a
//! [`PlaneViolationDetail`] — the Spine decides fatal-vs-warn via
//! `TruthPolicy`, the validator itself never decides.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::PlaneViolationDetail;
use crate::four_plane::models::{ChapterPlaneComposition, PlaneA, PlaneB, PlaneC, PlaneD};

pub const MIN_WORDS_CHAPTER_0: usize = 500;
pub const MIN_WORDS_CHAPTERS_1_N: usize = 300;
/// Raw-character floor on top of the word-count floor (spec §4.6: "raw
/// text must be >= floor chars"), guarding against a narrative that
/// clears `required_min_words` with pathological single-character
/// tokens ("a a a a ...") instead of real prose.
pub const MIN_CHARS_NARRATIVE: usize = 1200;
pub const MAX_CHART_TITLE_CHARS: usize = 50;
pub const MAX_JOINT_SYNTHESIS_CHARS: usize = 500;
pub const MAX_FACTUAL_VALUE_CHARS: usize = 200;
pub const MAX_NARRATIVE_CONJUNCTIONS_IN_FACT: usize = 1;

/// Repeated `Label: value` lines — the shape a KPI dump takes when it
/// leaks into prose.
static KPI_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?m)^[A-Za-z ]{2,30}:\s*[\d€%.,]+\s*$").unwrap(),
        Regex::new(r"(?i)(price|score|m²|eur)\s*[:=]\s*\d").unwrap(),
        Regex::new(r"(?m)^\s*[-*]\s*[A-Za-z ]{2,30}:\s*\S+\s*$").unwrap(),
    ]
});

/// Dutch narrative conjunctions. Their presence in bulk is the signature
/// of multi-sentence prose leaking into a fact value.
static NARRATIVE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?i)\b(echter|maar|ondanks|hoewel)\b").unwrap(),
        Regex::new(r"(?i)\b(daarom|dus|bovendien|tevens)\b").unwrap(),
        Regex::new(r"[.!?]\s+[A-Z]").unwrap(),
    ]
});

/// Persona-scoring sentences that belong only in Plane D.
static PREFERENCE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?i)\b(marcel|petra)\b").unwrap(),
        Regex::new(r"(?i)voorkeur").unwrap(),
        Regex::new(r"(?i)match[- ]score").unwrap(),
    ]
});

fn count_matches(patterns: &[Regex], text: &str) -> usize {
    patterns.iter().filter(|re| re.is_match(text)).count()
}

fn violation(chapter_id: u32, plane: &'static str, kind: &'static str, details: impl Into<String>) -> PlaneViolationDetail {
    PlaneViolationDetail {
        chapter_id,
        source_plane: plane,
        violation_type: kind,
        details: details.into(),
    }
}

pub fn validate_plane_a(chapter_id: u32, plane: &PlaneA, registry_keys: &HashSet<String>) -> Vec<PlaneViolationDetail> {
    let mut out = Vec::new();
    if plane.not_applicable {
        return out;
    }
    if plane.charts.is_empty() {
        out.push(violation(
            chapter_id,
            "A",
            "VISUAL_OUTSIDE_PLANE_A",
            "plane A has no charts and is not marked not_applicable",
        ));
    }
    for chart in &plane.charts {
        if chart.title.chars().count() > MAX_CHART_TITLE_CHARS {
            out.push(violation(
                chapter_id,
                "A",
                "VISUAL_OUTSIDE_PLANE_A",
                format!("chart title exceeds {MAX_CHART_TITLE_CHARS} characters: '{}'", chart.title),
            ));
        }
    }
    for id in &plane.data_source_ids {
        if !registry_keys.contains(id) {
            out.push(violation(
                chapter_id,
                "A",
                "VISUAL_OUTSIDE_PLANE_A",
                format!("data_source_id '{id}' is not a Registry key"),
            ));
        }
    }
    out
}

pub fn required_min_words(chapter_id: u32) -> usize {
    if chapter_id == 0 {
        MIN_WORDS_CHAPTER_0
    } else {
        MIN_WORDS_CHAPTERS_1_N
    }
}

pub fn validate_plane_b(chapter_id: u32, plane: &PlaneB) -> Vec<PlaneViolationDetail> {
    let mut out = Vec::new();
    if plane.not_applicable {
        return out;
    }
    let min_words = required_min_words(chapter_id);
    if plane.word_count < min_words {
        out.push(violation(
            chapter_id,
            "B",
            "INSUFFICIENT_NARRATIVE",
            format!("word_count {} below required minimum {min_words}", plane.word_count),
        ));
    }
    let char_count = plane.narrative_text.chars().count();
    if char_count < MIN_CHARS_NARRATIVE {
        out.push(violation(
            chapter_id,
            "B",
            "INSUFFICIENT_NARRATIVE",
            format!("raw character count {char_count} below required minimum {MIN_CHARS_NARRATIVE}"),
        ));
    }
    if count_matches(&KPI_PATTERNS, &plane.narrative_text) > 0 {
        out.push(violation(
            chapter_id,
            "B",
            "KPI_IN_NARRATIVE",
            "narrative text matches a KPI-dump shape",
        ));
    }
    if count_matches(&PREFERENCE_PATTERNS, &plane.narrative_text) > 0 {
        out.push(violation(
            chapter_id,
            "B",
            "PREFERENCE_LEAK",
            "narrative text contains persona-scoring language",
        ));
    }
    out
}

pub fn validate_plane_c(chapter_id: u32, plane: &PlaneC) -> Vec<PlaneViolationDetail> {
    let mut out = Vec::new();
    if plane.not_applicable {
        return out;
    }
    for kpi in &plane.kpis {
        if kpi.value.chars().count() > MAX_FACTUAL_VALUE_CHARS {
            out.push(violation(
                chapter_id,
                "C",
                "NARRATIVE_IN_FACTS",
                format!("KPI '{}' value exceeds {MAX_FACTUAL_VALUE_CHARS} characters", kpi.key),
            ));
            continue;
        }
        let conjunctions = count_matches(&NARRATIVE_PATTERNS, &kpi.value);
        if conjunctions > MAX_NARRATIVE_CONJUNCTIONS_IN_FACT {
            out.push(violation(
                chapter_id,
                "C",
                "NARRATIVE_IN_FACTS",
                format!("KPI '{}' value reads as narrative prose", kpi.key),
            ));
        }
    }
    out
}

pub fn validate_plane_d(chapter_id: u32, plane: &PlaneD) -> Vec<PlaneViolationDetail> {
    let mut out = Vec::new();
    if let Some(ref synthesis) = plane.joint_synthesis {
        if synthesis.chars().count() > MAX_JOINT_SYNTHESIS_CHARS {
            out.push(violation(
                chapter_id,
                "D",
                "CROSS_PLANE_CONTENT",
                format!("joint_synthesis exceeds {MAX_JOINT_SYNTHESIS_CHARS} characters"),
            ));
        }
        let paragraphs = synthesis.split("\n\n").filter(|p| !p.trim().is_empty()).count();
        if paragraphs > 1 {
            out.push(violation(
                chapter_id,
                "D",
                "CROSS_PLANE_CONTENT",
                "joint_synthesis contains more than one paragraph",
            ));
        }
    }
    out
}

/// Validates every plane of a composition and returns the full violation
/// list (empty means the chapter is structurally sound).
pub fn validate_chapter(comp: &ChapterPlaneComposition, registry_keys: &HashSet<String>) -> Vec<PlaneViolationDetail> {
    let mut violations = validate_plane_a(comp.chapter_id, &comp.plane_a, registry_keys);
    violations.extend(validate_plane_b(comp.chapter_id, &comp.plane_b));
    violations.extend(validate_plane_c(comp.chapter_id, &comp.plane_c));
    violations.extend(validate_plane_d(comp.chapter_id, &comp.plane_d));
    violations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::four_plane::models::{ChartSpec, DataPoint, FactualKPI, PersonaScore, PlaneStatus, Provenance};
    use std::collections::BTreeMap;

    #[test]
    fn chart_title_over_limit_is_a_violation() {
        let plane = PlaneA::new(
            vec![ChartSpec {
                chart_type: "bar".to_string(),
                title: "x".repeat(51),
                data_points: vec![DataPoint { label: "a".to_string(), value: 1.0 }],
                axes: None,
            }],
            vec!["asking_price_eur".to_string()],
        );
        let keys: HashSet<String> = ["asking_price_eur".to_string()].into_iter().collect();
        let violations = validate_plane_a(0, &plane, &keys);
        assert!(violations.iter().any(|v| v.violation_type == "VISUAL_OUTSIDE_PLANE_A"));
    }

    #[test]
    fn missing_data_source_key_is_a_violation() {
        let plane = PlaneA::new(
            vec![ChartSpec {
                chart_type: "bar".to_string(),
                title: "Price".to_string(),
                data_points: vec![DataPoint { label: "a".to_string(), value: 1.0 }],
                axes: None,
            }],
            vec!["nonexistent_key".to_string()],
        );
        let keys: HashSet<String> = HashSet::new();
        let violations = validate_plane_a(0, &plane, &keys);
        assert!(!violations.is_empty());
    }

    #[test]
    fn pathological_single_char_tokens_clear_word_count_but_fail_char_floor() {
        let text = "a ".repeat(MIN_WORDS_CHAPTERS_1_N + 10);
        let plane = PlaneB::from_narrative(text, "openai", "gpt");
        assert!(plane.word_count >= MIN_WORDS_CHAPTERS_1_N);
        let violations = validate_plane_b(1, &plane);
        assert!(violations.iter().any(|v| v.violation_type == "INSUFFICIENT_NARRATIVE"));
    }

    #[test]
    fn short_narrative_is_insufficient() {
        let plane = PlaneB::from_narrative("Te kort.".to_string(), "openai", "gpt");
        let violations = validate_plane_b(3, &plane);
        assert!(violations.iter().any(|v| v.violation_type == "INSUFFICIENT_NARRATIVE"));
    }

    #[test]
    fn narrative_mentioning_persona_names_is_a_leak() {
        let text = "Marcel zal deze woning erg waarderen. ".repeat(60);
        let plane = PlaneB::from_narrative(text, "openai", "gpt");
        let violations = validate_plane_b(1, &plane);
        assert!(violations.iter().any(|v| v.violation_type == "PREFERENCE_LEAK"));
    }

    #[test]
    fn factual_kpi_with_narrative_prose_is_rejected() {
        let plane = PlaneC {
            plane: "C",
            plane_name: "factual_anchor",
            kpis: vec![FactualKPI {
                key: "price".to_string(),
                label: "Price".to_string(),
                value: "Echter, de prijs is hoog. Dus dit is duur. Bovendien ongunstig.".to_string(),
                unit: None,
                provenance: Provenance::Fact,
                registry_id: Some("asking_price_eur".to_string()),
                complete: true,
                missing_reason: None,
            }],
            parameters: BTreeMap::new(),
            data_sources: Vec::new(),
            missing_data: Vec::new(),
            uncertainties: Vec::new(),
            not_applicable: false,
            not_applicable_reason: None,
        };
        let violations = validate_plane_c(3, &plane);
        assert!(violations.iter().any(|v| v.violation_type == "NARRATIVE_IN_FACTS"));
    }

    #[test]
    fn multi_paragraph_joint_synthesis_is_a_cross_plane_leak() {
        let mut personas = BTreeMap::new();
        personas.insert(
            "marcel".to_string(),
            PersonaScore {
                match_score: 80,
                mood: "positive".to_string(),
                key_values: vec![],
                concerns: vec![],
                summary: "Goede match.".to_string(),
            },
        );
        let mut plane = PlaneD::new(personas);
        plane.joint_synthesis = Some("Paragraaf een.\n\nParagraaf twee.".to_string());
        let violations = validate_plane_d(2, &plane);
        assert!(violations.iter().any(|v| v.violation_type == "CROSS_PLANE_CONTENT"));
    }

    #[test]
    fn plane_status_variants_are_distinct() {
        assert_ne!(PlaneStatus::Ok, PlaneStatus::Missing);
    }
}
