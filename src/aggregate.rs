use std::collections::{BTreeMap, HashMap};

use rust_decimal::Decimal;
use serde::Serialize;

use crate::models::{Part, PartStatus};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statistics {
    pub total_parts: usize,
    pub parts_with_prices: usize,
    /// Percent of parts carrying a price.
    pub price_coverage: f64,
    /// Every status, including those with no parts.
    pub parts_by_status: BTreeMap<String, usize>,
    /// Absent when no part has a price.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_statistics: Option<PriceStatistics>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceStatistics {
    pub min_price: Decimal,
    pub max_price: Decimal,
    /// Full-precision mean; round when displaying.
    pub avg_price: Decimal,
    pub total_value: Decimal,
}

/// Fold fetched parts back into the extraction output. A fetched part
/// replaces the entry with the same part number; everything else passes
/// through in its original position.
pub fn merge(parts: Vec<Part>, fetched: Vec<Part>) -> Vec<Part> {
    let mut by_id: HashMap<String, Part> = fetched
        .into_iter()
        .map(|p| (p.part_number.clone(), p))
        .collect();
    parts
        .into_iter()
        .map(|p| by_id.remove(&p.part_number).unwrap_or(p))
        .collect()
}

pub fn statistics(parts: &[Part]) -> Statistics {
    let total_parts = parts.len();
    let prices: Vec<Decimal> = parts.iter().filter_map(|p| p.price).collect();
    let parts_with_prices = prices.len();

    let mut parts_by_status: BTreeMap<String, usize> = PartStatus::ALL
        .iter()
        .map(|s| (s.as_str().to_string(), 0))
        .collect();
    for part in parts {
        *parts_by_status.entry(part.status.as_str().to_string()).or_default() += 1;
    }

    let price_coverage = if total_parts > 0 {
        parts_with_prices as f64 / total_parts as f64 * 100.0
    } else {
        0.0
    };

    Statistics {
        total_parts,
        parts_with_prices,
        price_coverage,
        parts_by_status,
        price_statistics: price_statistics(&prices),
    }
}

fn price_statistics(prices: &[Decimal]) -> Option<PriceStatistics> {
    let min_price = prices.iter().min()?.to_owned();
    let max_price = prices.iter().max()?.to_owned();
    let total_value: Decimal = prices.iter().sum();
    let avg_price = total_value / Decimal::from(prices.len());
    Some(PriceStatistics {
        min_price,
        max_price,
        avg_price,
        total_value,
    })
}
