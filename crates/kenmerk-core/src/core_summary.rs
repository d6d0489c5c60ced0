//! Core Summary Builder — the mandatory dashboard header, built once from
//! the frozen Registry.
//!
//! Grounded on the formatting rules in `backend/pipeline/enrichment_adapter.py`
//! (European thousands separators) and the dashboard-header shape described
//! in spec §3/§4.4. Never fails: a missing slot becomes `UNKNOWN`, not an
//! error, which is why this builder returns `CoreSummary` directly rather
//! than a `PipelineResult`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::registry::Registry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FieldStatus {
    Present,
    Unknown,
    NotApplicable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreField {
    pub value: String,
    pub raw_value: Option<serde_json::Value>,
    pub status: FieldStatus,
    pub source: String,
    pub unit: Option<String>,
}

impl CoreField {
    fn unknown(source: &str) -> Self {
        Self {
            value: "Onbekend".to_string(),
            raw_value: None,
            status: FieldStatus::Unknown,
            source: source.to_string(),
            unit: None,
        }
    }
}

const REQUIRED_SLOTS: &[&str] = &["asking_price", "living_area", "location", "match_score"];
const OPTIONAL_SLOTS: &[&str] = &[
    "property_type",
    "build_year",
    "energy_label",
    "plot_area",
    "bedrooms",
];

/// Maps a CoreSummary slot name to the Registry key it is sourced from.
fn registry_key_for_slot(slot: &str) -> &'static str {
    match slot {
        "asking_price" => "asking_price_eur",
        "living_area" => "living_area_m2",
        "location" => "address",
        "match_score" => "match_score_aggregate",
        "property_type" => "property_type",
        "build_year" => "build_year",
        "energy_label" => "energy_label",
        "plot_area" => "plot_area_m2",
        "bedrooms" => "bedrooms",
        other => {
            // Only the slots above are ever queried; anything else is a
            // programming error in this module, not a runtime input.
            unreachable!("unknown CoreSummary slot '{other}'")
        }
    }
}

/// European thousands grouping with a trailing separator, e.g. `450.000`.
fn format_thousands(n: i64) -> String {
    let sign = if n < 0 { "-" } else { "" };
    let digits = n.unsigned_abs().to_string();
    let mut grouped = String::new();
    for (i, ch) in digits.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(ch);
    }
    format!("{sign}{}", grouped.chars().rev().collect::<String>())
}

fn format_slot(slot: &str, field: &mut CoreField, raw: &crate::registry::RegistryValue) {
    use crate::registry::RegistryValue as RV;
    match slot {
        "asking_price" => {
            if let Some(v) = raw.as_i64() {
                field.value = format!("€ {}", format_thousands(v));
                field.unit = Some("EUR".to_string());
            }
        }
        "living_area" | "plot_area" => {
            if let Some(v) = raw.as_i64() {
                field.value = format!("{v} m²");
                field.unit = Some("m2".to_string());
            }
        }
        "match_score" => {
            if let Some(v) = raw.as_f64() {
                field.value = format!("{}%", v.round() as i64);
                field.unit = Some("%".to_string());
            }
        }
        "location" => {
            if let RV::Text(s) = raw {
                field.value = s
                    .rsplit(',')
                    .next()
                    .map(|seg| seg.trim().to_string())
                    .filter(|seg| !seg.is_empty())
                    .unwrap_or_else(|| s.clone());
            }
        }
        _ => {
            field.value = raw.to_string();
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreSummary {
    pub fields: BTreeMap<String, CoreField>,
    pub completeness_score: f32,
    pub provenance: BTreeMap<String, String>,
    pub registry_entry_count: usize,
}

impl CoreSummary {
    pub fn get(&self, slot: &str) -> Option<&CoreField> {
        self.fields.get(slot)
    }

    /// Builds the CoreSummary from a frozen Registry. Never fails.
    ///
    /// Panics if `registry` is not yet frozen — building a CoreSummary
    /// from a mutable Registry would be reading state the Spine hasn't
    /// committed to yet, and the Spine is the only caller of this
    /// function, always after `freeze()`.
    pub fn build(registry: &Registry) -> CoreSummary {
        assert!(
            registry.is_frozen(),
            "CoreSummary::build called against a non-frozen Registry"
        );

        let mut fields = BTreeMap::new();
        let mut provenance = BTreeMap::new();
        let mut present = 0usize;
        let mut optional_present = 0usize;

        for slot in REQUIRED_SLOTS.iter().chain(OPTIONAL_SLOTS.iter()) {
            let key = registry_key_for_slot(slot);
            provenance.insert(slot.to_string(), key.to_string());

            let mut field = CoreField::unknown(key);
            if let Some(entry) = registry.get(key) {
                if !entry.value.is_null() {
                    field.status = FieldStatus::Present;
                    field.raw_value = serde_json::to_value(&entry.value).ok();
                    field.unit = entry.unit.clone();
                    format_slot(slot, &mut field, &entry.value);
                    present += 1;
                    if OPTIONAL_SLOTS.contains(slot) {
                        optional_present += 1;
                    }
                }
            }
            fields.insert(slot.to_string(), field);
        }

        let denom = REQUIRED_SLOTS.len() + optional_present;
        let completeness_score = if denom == 0 {
            0.0
        } else {
            present as f32 / denom as f32
        };

        CoreSummary {
            fields,
            completeness_score,
            provenance,
            registry_entry_count: registry.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegistryEntry;

    #[test]
    fn all_fields_missing_gives_zero_completeness() {
        let mut reg = Registry::new();
        reg.freeze().unwrap();
        let summary = CoreSummary::build(&reg);
        assert_eq!(summary.completeness_score, 0.0);
        for slot in REQUIRED_SLOTS {
            assert_eq!(summary.get(slot).unwrap().status, FieldStatus::Unknown);
        }
    }

    #[test]
    fn formats_price_with_european_thousands() {
        let mut reg = Registry::new();
        reg.register(RegistryEntry::fact("asking_price_eur", 450_000_i64, "Asking price", "test"))
            .unwrap();
        reg.freeze().unwrap();
        let summary = CoreSummary::build(&reg);
        assert_eq!(summary.get("asking_price").unwrap().value, "€ 450.000");
    }

    #[test]
    fn location_uses_last_comma_segment() {
        let mut reg = Registry::new();
        reg.register(RegistryEntry::fact(
            "address",
            "Teststraat 123, 1234 AB Amsterdam",
            "Address",
            "test",
        ))
        .unwrap();
        reg.freeze().unwrap();
        let summary = CoreSummary::build(&reg);
        assert_eq!(summary.get("location").unwrap().value, "1234 AB Amsterdam");
    }

    #[test]
    fn provenance_recorded_even_for_unknown_fields() {
        let mut reg = Registry::new();
        reg.freeze().unwrap();
        let summary = CoreSummary::build(&reg);
        assert_eq!(summary.provenance.get("asking_price").unwrap(), "asking_price_eur");
    }
}
