//! Best-effort HTML field extraction, converting a pasted Funda listing
//! page into a `RawListingInput`. Deliberately NOT a faithful port of
//! `backend/parser.py`'s BeautifulSoup extraction: how the HTML is
//! fetched or parsed is an explicit non-goal of the core spec. This
//! module exists only because `POST /runs`/`POST /runs/{id}/paste` must
//! accept raw HTML from *somewhere* — loosely grounded on `parser.py`'s
//! CSS selectors and `dt`/`dd` spec-table convention, trimmed to the
//! handful of fields the Enrichment Adapter actually consumes.
//!
//! Extraction failures are not fatal here: an absent field simply stays
//! `None`, and the Registry records it as UNCERTAINTY downstream (spec
//! §7, Transport category) rather than aborting the scrape.

use kenmerk_core::RawListingInput;
use scraper::{Html, Selector};

fn text_of(document: &Html, selector: &str) -> Option<String> {
    let sel = Selector::parse(selector).ok()?;
    document.select(&sel).next().map(|el| el.text().collect::<String>().trim().to_string()).filter(|s| !s.is_empty())
}

/// DT/DD spec-table lookup: Funda's listing detail tables pair a label
/// `<dt>` with its value `<dd>`, matched on a case-insensitive substring.
fn spec_value(document: &Html, labels: &[&str]) -> Option<String> {
    let dt_sel = Selector::parse("dt").ok()?;
    let dd_sel = Selector::parse("dd").ok()?;
    for dt in document.select(&dt_sel) {
        let label_text = dt.text().collect::<String>().to_lowercase();
        if !labels.iter().any(|l| label_text.contains(&l.to_lowercase())) {
            continue;
        }
        if let Some(dd) = dt.next_sibling_element().filter(|el| dd_sel.matches(el)) {
            let value = dd.text().collect::<String>().trim().to_string();
            if !value.is_empty() {
                return Some(value);
            }
        }
    }
    None
}

fn extract_price(document: &Html) -> Option<String> {
    text_of(document, ".object-header__price")
}

fn extract_address(document: &Html) -> Option<String> {
    text_of(document, ".object-header__title")
}

fn extract_media_urls(document: &Html) -> Vec<String> {
    let sel = match Selector::parse("img") {
        Ok(s) => s,
        Err(_) => return Vec::new(),
    };
    document
        .select(&sel)
        .filter_map(|el| el.value().attr("src").map(|s| s.to_string()))
        .filter(|src| src.starts_with("http"))
        .collect()
}

/// Builds a `RawListingInput` from raw listing HTML, falling back to the
/// supplied `media_urls` and `canonical_url` when extraction finds none.
pub fn scrape_to_raw_input(html: &str, canonical_url: Option<String>, extra_media_urls: Vec<String>) -> RawListingInput {
    let document = Html::parse_document(html);

    let mut media_urls = extract_media_urls(&document);
    media_urls.extend(extra_media_urls);
    media_urls.sort();
    media_urls.dedup();

    RawListingInput {
        asking_price: extract_price(&document),
        living_area: spec_value(&document, &["woonoppervlakte", "wonen", "gebruiksoppervlakte"]),
        plot_area: spec_value(&document, &["perceel"]),
        volume_m3: spec_value(&document, &["inhoud"]),
        bedrooms: spec_value(&document, &["aantal slaapkamers", "slaapkamers"]),
        build_year: spec_value(&document, &["bouwjaar"]),
        energy_label: spec_value(&document, &["energielabel"]),
        property_type: spec_value(&document, &["soort woonhuis", "soort appartement", "woningtype"]),
        address: extract_address(&document),
        description: text_of(&document, ".object-description-body"),
        features: Vec::new(),
        media_urls,
        canonical_url,
        market_mean_price_per_m2: None,
    }
}
