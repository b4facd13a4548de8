use std::collections::{BTreeMap, HashSet};
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::entities::event::EventRecord;

/// Mean first-option price of one region.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionPrice {
    pub location: String,
    pub mean_price: f64,
    pub hospitals: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PriceSummary {
    pub rows: usize,
    pub priced_rows: usize,
    pub events: usize,
    pub min_price: Option<u64>,
    pub max_price: Option<u64>,
    pub regions: Vec<RegionPrice>,
}

fn digits_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+").expect("valid regex"))
}

/// Concatenates every digit run: `"1,200,000원"` → `1200000`.
pub fn clean_price(value: &str) -> Option<u64> {
    let digits: String = digits_re()
        .find_iter(value)
        .map(|m| m.as_str())
        .collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

/// First priced row per `(hospital_name, location)`, in input order.
pub fn first_options(rows: &[EventRecord]) -> Vec<(&EventRecord, u64)> {
    let mut seen: HashSet<(&str, &str)> = HashSet::new();
    let mut out = Vec::new();
    for row in rows {
        let Some(price) = clean_price(&row.price) else {
            continue;
        };
        if seen.insert((row.hospital_name.as_str(), row.location.as_str())) {
            out.push((row, price));
        }
    }
    out
}

/// Mean first-option price per location, sorted by location.
pub fn region_means(rows: &[EventRecord]) -> Vec<RegionPrice> {
    let mut by_region: BTreeMap<&str, (u128, usize)> = BTreeMap::new();
    for (row, price) in first_options(rows) {
        let entry = by_region.entry(row.location.as_str()).or_default();
        entry.0 += u128::from(price);
        entry.1 += 1;
    }
    by_region
        .into_iter()
        .map(|(location, (sum, count))| RegionPrice {
            location: location.to_string(),
            mean_price: sum as f64 / count as f64,
            hospitals: count,
        })
        .collect()
}

pub fn summarize(rows: &[EventRecord]) -> PriceSummary {
    let prices: Vec<u64> = rows.iter().filter_map(|r| clean_price(&r.price)).collect();
    let events = rows
        .iter()
        .map(|r| r.exposure_order)
        .collect::<HashSet<_>>()
        .len();
    PriceSummary {
        rows: rows.len(),
        priced_rows: prices.len(),
        events,
        min_price: prices.iter().min().copied(),
        max_price: prices.iter().max().copied(),
        regions: region_means(rows),
    }
}

/// `1234567.0` → `"1,234,567"` (rounded to whole won).
pub fn format_won(value: f64) -> String {
    let rounded = value.round().max(0.0) as u64;
    let digits = rounded.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}
