//! Enrichment Adapter — turns raw scraped listing fields into Registry
//! entries: parsing, normalization, derived metrics, persona match scoring.
//!
//! Grounded on `backend/pipeline/enrichment_adapter.py`. The market mean,
//! valuation bands, renovation-cost bands, and `ai_score` heuristic are
//! carried over verbatim (constants and all) per SPEC_FULL.md §11; this
//! module is also where the persona alias table is canonicalized into one
//! place per the Open Question decision in SPEC_FULL.md §12.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::PipelineResult;
use crate::registry::{EntryKind, Registry, RegistryEntry, RegistryValue};

/// Raw fields as scraped, tolerant of mixed formats: Dutch thousands
/// separators, embedded units, stray whitespace. Everything is a string
/// (or absent) because the source of these values is HTML text content,
/// not a typed API. Serde-ready: this is also the shape of the `POST
/// /runs` and `POST /runs/{id}/paste` request bodies.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawListingInput {
    pub asking_price: Option<String>,
    pub living_area: Option<String>,
    pub plot_area: Option<String>,
    pub volume_m3: Option<String>,
    pub bedrooms: Option<String>,
    pub build_year: Option<String>,
    pub energy_label: Option<String>,
    pub property_type: Option<String>,
    pub address: Option<String>,
    pub description: Option<String>,
    pub features: Vec<String>,
    pub media_urls: Vec<String>,
    pub canonical_url: Option<String>,
    /// Market mean price per m², EUR. Falls back to `DEFAULT_MARKET_MEAN_PRICE_PER_M2`.
    pub market_mean_price_per_m2: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaPreferences {
    pub name: String,
    pub priorities: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PreferenceConfig {
    pub personas: Vec<PersonaPreferences>,
}

pub const DEFAULT_MARKET_MEAN_PRICE_PER_M2: f64 = 4800.0;

/// Persona priority token -> canonical search term looked up in the
/// description/features/energy-label blob. The original duplicated this
/// table (with slight variation) across two modules; this is the one
/// place it lives now.
static PERSONA_TOKEN_ALIASES: Lazy<BTreeMap<&'static str, &'static str>> = Lazy::new(|| {
    let mut m = BTreeMap::new();
    m.insert("solar", "zonnepanelen");
    m.insert("zonnepaneel", "zonnepanelen");
    m.insert("zonnepanelen", "zonnepanelen");
    m.insert("jaren 30", "193");
    m.insert("jaren '30", "193");
    m.insert("warmtepomp", "warmtepomp");
    m.insert("visgraat", "visgraat");
    m
});

fn canonicalize_token(token: &str) -> String {
    let lower = token.to_lowercase();
    PERSONA_TOKEN_ALIASES
        .get(lower.as_str())
        .map(|s| s.to_string())
        .unwrap_or(lower)
}

static DIGIT_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[0-9][0-9.,]*").unwrap());

/// Tolerant integer parser: strips currency symbols, unit suffixes, and
/// Dutch thousands separators (`.`), keeping only the digit run.
/// `"€ 450.000 k.k."` -> `450000`; `"120 m²"` -> `120`.
pub fn parse_int(raw: &str) -> Option<i64> {
    let m = DIGIT_RUN.find(raw)?;
    let cleaned: String = m.as_str().chars().filter(|c| c.is_ascii_digit()).collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<i64>().ok()
}

/// Normalizes a free-form energy label string to a single uppercase
/// letter A–G, the only shape downstream valuation bands understand.
pub fn normalize_energy_label(raw: &str) -> Option<char> {
    raw.chars()
        .find(|c| c.is_ascii_alphabetic())
        .map(|c| c.to_ascii_uppercase())
        .filter(|c| ('A'..='G').contains(c))
}

fn register_fact(registry: &mut Registry, id: &str, value: RegistryValue, name: &str) -> PipelineResult<()> {
    registry.register(RegistryEntry::fact(id, value, name, "enrichment"))
}

fn register_variable(registry: &mut Registry, id: &str, value: RegistryValue, name: &str, derived_from: Vec<String>) -> PipelineResult<()> {
    registry.register(
        RegistryEntry::fact(id, value, name, "enrichment")
            .with_kind(EntryKind::Variable)
            .with_derived_from(derived_from),
    )
}

fn register_kpi(registry: &mut Registry, id: &str, value: RegistryValue, name: &str, derived_from: Vec<String>) -> PipelineResult<()> {
    registry.register(
        RegistryEntry::fact(id, value, name, "enrichment")
            .with_kind(EntryKind::Kpi)
            .with_derived_from(derived_from),
    )
}

/// Step 1+2: parse and register the primary scraped fields.
fn register_primary_fields(registry: &mut Registry, input: &RawListingInput) -> PipelineResult<Option<(i64, i64)>> {
    let price = input.asking_price.as_deref().and_then(parse_int);
    if let Some(p) = price {
        register_fact(registry, "asking_price_eur", RegistryValue::Int(p), "Asking price")?;
    }

    let area = input.living_area.as_deref().and_then(parse_int);
    if let Some(a) = area {
        register_fact(registry, "living_area_m2", RegistryValue::Int(a), "Living area")?;
    }

    if let Some(plot) = input.plot_area.as_deref().and_then(parse_int) {
        register_fact(registry, "plot_area_m2", RegistryValue::Int(plot), "Plot area")?;
    }

    if let Some(year) = input.build_year.as_deref().and_then(parse_int) {
        register_fact(registry, "build_year", RegistryValue::Int(year), "Build year")?;
    }

    if let Some(label) = input.energy_label.as_deref().and_then(normalize_energy_label) {
        register_fact(registry, "energy_label", RegistryValue::Text(label.to_string()), "Energy label")?;
    }

    if let Some(bedrooms) = input.bedrooms.as_deref().and_then(parse_int) {
        register_fact(registry, "bedrooms", RegistryValue::Int(bedrooms), "Bedrooms")?;
    }

    if let Some(ref pt) = input.property_type {
        register_fact(registry, "property_type", RegistryValue::Text(pt.clone()), "Property type")?;
    }

    if let Some(ref addr) = input.address {
        register_fact(registry, "address", RegistryValue::Text(addr.clone()), "Address")?;
    }

    Ok(match (price, area) {
        (Some(p), Some(a)) if a > 0 => Some((p, a)),
        _ => None,
    })
}

/// Step 3: derived metrics. All arithmetic in the crate lives here.
fn register_derived_metrics(registry: &mut Registry, input: &RawListingInput, price_area: Option<(i64, i64)>) -> PipelineResult<()> {
    let area = input.living_area.as_deref().and_then(parse_int);

    let price_per_m2 = price_area.map(|(p, a)| p / a);
    if let Some(ppm2) = price_per_m2 {
        register_variable(
            registry,
            "price_per_m2",
            RegistryValue::Int(ppm2),
            "Price per m²",
            vec!["asking_price_eur".to_string(), "living_area_m2".to_string()],
        )?;
    }

    let volume = input
        .volume_m3
        .as_deref()
        .and_then(parse_int)
        .or_else(|| area.map(|a| a * 3));
    if let Some(v) = volume {
        register_variable(
            registry,
            "volume_m3",
            RegistryValue::Int(v),
            "Estimated volume",
            vec!["living_area_m2".to_string()],
        )?;
    }

    let rooms = area.map(|a| (a / 25).max(2));
    if let Some(r) = rooms {
        register_variable(
            registry,
            "room_count_estimate",
            RegistryValue::Int(r),
            "Estimated room count",
            vec!["living_area_m2".to_string()],
        )?;
    }

    let market_mean = input.market_mean_price_per_m2.unwrap_or(DEFAULT_MARKET_MEAN_PRICE_PER_M2);
    if let Some(ppm2) = price_per_m2 {
        let ratio = ppm2 as f64 / market_mean;
        let (status, direction) = if ratio > 1.2 {
            ("Premium Segment", "up")
        } else if ratio < 0.8 {
            ("Potentiële Kans", "down")
        } else if ratio < 0.95 {
            ("Scherp Geprijsd", "down")
        } else {
            ("Marktconform", "flat")
        };
        register_variable(
            registry,
            "valuation_status",
            RegistryValue::Text(status.to_string()),
            "Valuation status",
            vec!["price_per_m2".to_string()],
        )?;
        register_variable(
            registry,
            "valuation_direction",
            RegistryValue::Text(direction.to_string()),
            "Valuation direction",
            vec!["price_per_m2".to_string()],
        )?;
    }

    let energy_label = input.energy_label.as_deref().and_then(normalize_energy_label);
    let energy_invest = match energy_label {
        Some('F') | Some('G') => Some((45_000_i64, "Ingrijpende verduurzaming nodig")),
        Some('D') | Some('E') => Some((25_000_i64, "Verduurzaming aanbevolen")),
        Some('C') => Some((10_000_i64, "Beperkte verduurzaming nodig")),
        Some(_) => Some((0, "Geen verduurzaming nodig")),
        None => None,
    };
    if let Some((amount, advice)) = energy_invest {
        register_variable(
            registry,
            "energy_invest",
            RegistryValue::Int(amount),
            "Energy renovation investment",
            vec!["energy_label".to_string()],
        )?;
        register_variable(
            registry,
            "sustainability_advice",
            RegistryValue::Text(advice.to_string()),
            "Sustainability advice",
            vec!["energy_label".to_string()],
        )?;
    }

    let build_year = input.build_year.as_deref().and_then(parse_int);
    let construction_risk = build_year.map(|y| {
        if y < 1930 {
            (25_000_i64, "Risico: Fundering & Loodgieterswerk")
        } else if y < 1990 {
            (15_000_i64, "Risico: Asbest & Isolatie")
        } else {
            (0, "Geen bijzonder bouwrisico")
        }
    });
    if let Some((amount, note)) = construction_risk {
        register_variable(
            registry,
            "construction_risk_invest",
            RegistryValue::Int(amount),
            "Construction-age risk investment",
            vec!["build_year".to_string()],
        )?;
        register_variable(
            registry,
            "construction_risk_note",
            RegistryValue::Text(note.to_string()),
            "Construction-age risk note",
            vec!["build_year".to_string()],
        )?;
    }

    let total_investment = energy_invest.map(|(a, _)| a).unwrap_or(0) + construction_risk.map(|(a, _)| a).unwrap_or(0);
    register_variable(
        registry,
        "total_investment_estimate",
        RegistryValue::Int(total_investment),
        "Total estimated investment",
        vec!["energy_invest".to_string(), "construction_risk_invest".to_string()],
    )?;

    let mut ai_score: i64 = 70;
    if let Some(ppm2) = price_per_m2 {
        if (ppm2 as f64) < market_mean {
            ai_score += 10;
        }
    }
    match energy_label {
        Some('A') | Some('B') => ai_score += 10,
        Some('F') | Some('G') => ai_score -= 15,
        _ => {}
    }
    if total_investment > 30_000 {
        ai_score -= 10;
    }
    let ai_score = ai_score.clamp(0, 100);
    register_variable(
        registry,
        "ai_score",
        RegistryValue::Int(ai_score),
        "Composite AI score",
        vec![
            "price_per_m2".to_string(),
            "energy_label".to_string(),
            "total_investment_estimate".to_string(),
        ],
    )?;

    Ok(())
}

/// Step 4: per-persona match scoring.
fn register_persona_matches(registry: &mut Registry, input: &RawListingInput, prefs: &PreferenceConfig) -> PipelineResult<()> {
    if prefs.personas.is_empty() {
        return Ok(());
    }

    let mut blob = String::new();
    if let Some(ref d) = input.description {
        blob.push_str(&d.to_lowercase());
        blob.push(' ');
    }
    for f in &input.features {
        blob.push_str(&f.to_lowercase());
        blob.push(' ');
    }
    if let Some(label) = input.energy_label.as_deref().and_then(normalize_energy_label) {
        blob.push(label.to_ascii_lowercase());
    }
    let build_year_str = input.build_year.as_deref().and_then(parse_int).map(|y| y.to_string()).unwrap_or_default();

    let mut scores = Vec::with_capacity(prefs.personas.len());

    for persona in &prefs.personas {
        let total = persona.priorities.len();
        let mut matched = Vec::new();
        for token in &persona.priorities {
            let canonical = canonicalize_token(token);
            let hit = if canonical == "193" {
                build_year_str.starts_with("193")
            } else {
                blob.contains(&canonical)
            };
            if hit {
                matched.push(token.clone());
            }
        }
        let hits = matched.len();
        let score = if total == 0 {
            10_i64
        } else {
            ((hits as f64 / total as f64) * 100.0).round() as i64
        }
        .clamp(10, 100);

        let key_score = format!("persona_match_{}", persona.name.to_lowercase());
        let key_matched = format!("persona_matched_tokens_{}", persona.name.to_lowercase());

        register_kpi(
            registry,
            &key_score,
            RegistryValue::Int(score),
            &format!("{} match score", persona.name),
            vec!["description".to_string(), "features".to_string(), "energy_label".to_string()],
        )?;
        register_variable(
            registry,
            &key_matched,
            RegistryValue::List(matched.into_iter().map(RegistryValue::Text).collect()),
            &format!("{} matched tokens", persona.name),
            vec![key_score.clone()],
        )?;

        scores.push(score);
    }

    let aggregate = if scores.is_empty() {
        0
    } else {
        (scores.iter().sum::<i64>() as f64 / scores.len() as f64).round() as i64
    };
    register_kpi(
        registry,
        "match_score_aggregate",
        RegistryValue::Int(aggregate),
        "Aggregate persona match score",
        prefs
            .personas
            .iter()
            .map(|p| format!("persona_match_{}", p.name.to_lowercase()))
            .collect(),
    )?;

    Ok(())
}

/// Step 5: preserve non-scalar inputs verbatim so chapters can reason
/// about them without re-parsing raw HTML.
fn register_non_scalar_facts(registry: &mut Registry, input: &RawListingInput) -> PipelineResult<()> {
    if let Some(ref d) = input.description {
        register_fact(registry, "description", RegistryValue::Text(d.clone()), "Description")?;
    }
    if !input.features.is_empty() {
        register_fact(
            registry,
            "features",
            RegistryValue::List(input.features.iter().cloned().map(RegistryValue::Text).collect()),
            "Features",
        )?;
    }
    if !input.media_urls.is_empty() {
        register_fact(
            registry,
            "media_urls",
            RegistryValue::List(input.media_urls.iter().cloned().map(RegistryValue::Text).collect()),
            "Media URLs",
        )?;
    }
    if let Some(ref url) = input.canonical_url {
        register_fact(registry, "canonical_url", RegistryValue::Text(url.clone()), "Canonical URL")?;
    }
    Ok(())
}

/// Enriches an empty Registry from raw scraped fields and a preference
/// config. Idempotent up to input equivalence: calling this twice with
/// the same `input`/`prefs` against the same Registry registers the same
/// values and is therefore a no-op the second time (Registry semantics).
pub fn enrich(registry: &mut Registry, input: &RawListingInput, prefs: &PreferenceConfig) -> PipelineResult<()> {
    let price_area = register_primary_fields(registry, input)?;
    register_derived_metrics(registry, input, price_area)?;
    register_persona_matches(registry, input, prefs)?;
    register_non_scalar_facts(registry, input)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_int_strips_currency_and_thousands_separators() {
        assert_eq!(parse_int("€ 450.000 k.k."), Some(450_000));
        assert_eq!(parse_int("120 m²"), Some(120));
        assert_eq!(parse_int("no digits here"), None);
    }

    #[test]
    fn normalize_energy_label_extracts_single_letter() {
        assert_eq!(normalize_energy_label("C"), Some('C'));
        assert_eq!(normalize_energy_label("energielabel: a+++"), Some('A'));
        assert_eq!(normalize_energy_label("?"), None);
    }

    fn sample_input() -> RawListingInput {
        RawListingInput {
            asking_price: Some("€ 450.000".to_string()),
            living_area: Some("120".to_string()),
            plot_area: Some("200".to_string()),
            build_year: Some("1985".to_string()),
            energy_label: Some("C".to_string()),
            address: Some("Teststraat 123".to_string()),
            description: Some("Woning met tuin".to_string()),
            features: vec!["Tuin".to_string(), "Garage".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn complete_listing_derives_price_per_m2() {
        let mut reg = Registry::new();
        let input = sample_input();
        enrich(&mut reg, &input, &PreferenceConfig::default()).unwrap();
        assert_eq!(reg.get("price_per_m2").unwrap().value.as_i64(), Some(3750));
    }

    #[test]
    fn label_f_triggers_large_energy_investment() {
        let mut reg = Registry::new();
        let mut input = sample_input();
        input.energy_label = Some("F".to_string());
        enrich(&mut reg, &input, &PreferenceConfig::default()).unwrap();
        let invest = reg.get("energy_invest").unwrap().value.as_i64().unwrap();
        assert!(invest >= 40_000);
        let score = reg.get("ai_score").unwrap().value.as_i64().unwrap();
        assert!(score <= 70);
    }

    #[test]
    fn persona_with_matching_token_outscores_non_matching() {
        let mut reg = Registry::new();
        let input = sample_input();
        let prefs = PreferenceConfig {
            personas: vec![
                PersonaPreferences {
                    name: "marcel".to_string(),
                    priorities: vec!["Garage".to_string(), "Zonnepanelen".to_string()],
                },
                PersonaPreferences {
                    name: "petra".to_string(),
                    priorities: vec!["Open keuken".to_string()],
                },
            ],
        };
        enrich(&mut reg, &input, &prefs).unwrap();
        let marcel = reg.get("persona_match_marcel").unwrap().value.as_i64().unwrap();
        let petra = reg.get("persona_match_petra").unwrap().value.as_i64().unwrap();
        assert!(marcel > petra);
    }

    #[test]
    fn idempotent_up_to_input_equivalence() {
        let mut reg = Registry::new();
        let input = sample_input();
        enrich(&mut reg, &input, &PreferenceConfig::default()).unwrap();
        let count = reg.len();
        enrich(&mut reg, &input, &PreferenceConfig::default()).unwrap();
        assert_eq!(reg.len(), count);
    }
}
