//! AI Output Validator — applied immediately after each AI call, before the
//! plane composition is constructed.
//!
//! Grounded on `backend/pipeline/ai_output_validator.py` ("LAW A/B/C") and
//! `backend/domain/ai_interpretation_schema.py`'s core invariant: AI output
//! may only touch the keys it owns, may never restate a numeric fact, and
//! may never be a boilerplate template pretending to be inference. The
//! original's schema module ships mostly as a docstring in this retrieval
//! pack; the three laws it documents are implemented here directly against
//! the chapter ownership table in [`crate::chapters`].

use std::collections::{BTreeMap, HashMap};

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::chapters::owned_keys;
use crate::error::{PipelineError, PipelineResult};

/// Top-level keys every chapter's AI output may carry regardless of
/// ownership — narrative prose and metadata, never facts.
pub const ALLOWED_META_KEYS: &[&str] = &["title", "narrative", "interpretation", "metadata", "variables"];

/// A bare four-digit token in this range is treated as a year reference,
/// not a forbidden numeric fact (SPEC_FULL.md §12 Open Question 3).
const YEAR_MIN: i64 = 1000;
const YEAR_MAX: i64 = 2999;

static NUMERIC_LITERAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d[\d.,]*").unwrap());
static BARE_FOUR_DIGIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{4}$").unwrap());
static HAS_UNIT_OR_SYMBOL: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)(€|%|eur|m²|m2)").unwrap());

/// Byte offset of the `n`th char boundary back from the end of `s`.
fn char_boundary_back(s: &str, n: usize) -> usize {
    s.char_indices().rev().nth(n.saturating_sub(1)).map(|(i, _)| i).unwrap_or(0)
}

/// Byte offset of the `n`th char boundary forward from the start of `s`.
fn char_boundary_fwd(s: &str, n: usize) -> usize {
    s.char_indices().nth(n).map(|(i, _)| i).unwrap_or(s.len())
}

/// True if `text` contains a numeric literal that counts as a forbidden
/// fact under LAW C, honoring the bare-year carve-out.
fn contains_forbidden_numeric_literal(text: &str) -> bool {
    for m in NUMERIC_LITERAL.find_iter(text) {
        let raw = m.as_str();
        let digits_only: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
        if BARE_FOUR_DIGIT.is_match(raw) && !raw.contains(['.', ',']) {
            if let Ok(year) = raw.parse::<i64>() {
                if (YEAR_MIN..=YEAR_MAX).contains(&year) {
                    // Still forbidden if immediately adjacent to a unit/currency
                    // marker. Walk by char boundaries rather than raw byte
                    // offsets: a neighbor like '²' is multi-byte, so a plain
                    // `m.end() + 3` byte window can slice mid-character.
                    let prefix = &text[..m.start()];
                    let suffix = &text[m.end()..];
                    let window_start = char_boundary_back(prefix, 3);
                    let window_end = char_boundary_fwd(suffix, 3);
                    let window = format!("{}{}", &prefix[window_start..], &suffix[..window_end]);
                    if !HAS_UNIT_OR_SYMBOL.is_match(&window) {
                        continue;
                    }
                }
            }
        }
        if !digits_only.is_empty() {
            return true;
        }
    }
    false
}

#[derive(Debug, Clone, Default)]
pub struct OutputValidationResult {
    pub valid: bool,
    pub violations: Vec<String>,
    pub stripped_keys: Vec<String>,
    pub numeric_violations: Vec<String>,
}

/// Recognizes identical boilerplate reasoning strings repeated across
/// unrelated variables — the signature of a placeholder template
/// pretending to be per-variable inference.
fn detect_synthetic_injection(variables: &serde_json::Map<String, Value>) -> Vec<String> {
    let mut seen: HashMap<String, Vec<String>> = HashMap::new();
    for (key, entry) in variables {
        let Some(text) = entry.get("value").and_then(Value::as_str) else { continue };
        let normalized = text.trim().to_lowercase();
        if normalized.chars().count() < 20 {
            continue;
        }
        seen.entry(normalized).or_default().push(key.clone());
    }
    seen.into_iter()
        .filter(|(_, keys)| keys.len() > 1)
        .map(|(text, keys)| format!("identical boilerplate value across variables {keys:?}: '{text}'"))
        .collect()
}

/// Validates a raw AI response object for a given chapter. `strict`
/// corresponds to TruthPolicy's production mode: the first violation
/// aborts. In non-strict mode, unauthorized keys are stripped and
/// recorded, but numeric-literal and synthetic-injection violations
/// remain fatal in every mode (spec §4.7).
pub fn validate_ai_output(chapter_id: u32, raw: &Value, strict: bool) -> PipelineResult<(Value, OutputValidationResult)> {
    let mut result = OutputValidationResult { valid: true, ..Default::default() };
    let Some(obj) = raw.as_object() else {
        return Err(PipelineError::AIOutputViolation {
            chapter_id,
            violations: vec!["AI output is not a JSON object".to_string()],
        });
    };

    let owned = owned_keys(chapter_id);
    let mut sanitized = obj.clone();

    for key in obj.keys() {
        if ALLOWED_META_KEYS.contains(&key.as_str()) || owned.contains(key.as_str()) {
            continue;
        }
        let msg = format!("key '{key}' is not in allowed_meta_keys or owned by chapter {chapter_id}");
        if strict {
            return Err(PipelineError::AIOutputViolation { chapter_id, violations: vec![msg] });
        }
        result.violations.push(msg);
        result.stripped_keys.push(key.clone());
        sanitized.remove(key);
    }

    if let Some(variables) = sanitized.get("variables").and_then(Value::as_object) {
        for (key, entry) in variables {
            if let Some(text) = entry.get("value").and_then(Value::as_str) {
                if contains_forbidden_numeric_literal(text) {
                    let msg = format!("variables.{key}.value contains a numeric literal: '{text}'");
                    result.numeric_violations.push(msg.clone());
                    return Err(PipelineError::AIOutputViolation { chapter_id, violations: vec![msg] });
                }
            }
        }
        let injections = detect_synthetic_injection(variables);
        if !injections.is_empty() {
            return Err(PipelineError::AIOutputViolation { chapter_id, violations: injections });
        }
    }

    result.valid = result.numeric_violations.is_empty();
    Ok((Value::Object(sanitized), result))
}

/// Flattens a validated AI response's `variables` map into plain strings,
/// for callers that only need the narrative-bearing text.
pub fn variables_as_strings(value: &Value) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    if let Some(vars) = value.get("variables").and_then(Value::as_object) {
        for (k, v) in vars {
            if let Some(s) = v.get("value").and_then(Value::as_str) {
                out.insert(k.clone(), s.to_string());
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unowned_key_is_rejected_in_strict_mode() {
        let raw = json!({"koopadvies": {"value": "Bieden onder vraagprijs"}});
        let err = validate_ai_output(1, &raw, true).unwrap_err();
        assert!(matches!(err, PipelineError::AIOutputViolation { .. }));
    }

    #[test]
    fn unowned_key_is_stripped_in_non_strict_mode() {
        let raw = json!({"narrative": "tekst", "koopadvies": {"value": "Bieden onder vraagprijs"}});
        let (sanitized, result) = validate_ai_output(1, &raw, false).unwrap();
        assert!(result.stripped_keys.contains(&"koopadvies".to_string()));
        assert!(sanitized.get("koopadvies").is_none());
    }

    #[test]
    fn numeric_literal_in_variable_value_is_always_fatal() {
        let raw = json!({
            "variables": {"verduurzaming_potentie": {"value": "Investering van 25000 euro nodig"}}
        });
        let err = validate_ai_output(4, &raw, false).unwrap_err();
        assert!(matches!(err, PipelineError::AIOutputViolation { .. }));
    }

    #[test]
    fn bare_year_is_not_a_forbidden_numeric_literal() {
        let raw = json!({
            "variables": {"bouwperiode_karakteristiek": {"value": "Gebouwd in de jaren 1930 met karakteristieke details"}}
        });
        let (_, result) = validate_ai_output(1, &raw, true).unwrap();
        assert!(result.valid);
        assert!(result.numeric_violations.is_empty());
    }

    #[test]
    fn repeated_boilerplate_value_is_synthetic_injection() {
        let raw = json!({
            "variables": {
                "a": {"value": "Dit is een uitstekende waarde voor deze woning."},
                "b": {"value": "Dit is een uitstekende waarde voor deze woning."},
            }
        });
        let err = validate_ai_output(1, &raw, false).unwrap_err();
        assert!(matches!(err, PipelineError::AIOutputViolation { .. }));
    }
}
