use std::sync::LazyLock;

use regex::Regex;
use rust_decimal::Decimal;

static AMOUNT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+\.?\d*").unwrap());

/// Net price from a lookup results table: the first data row's cell under
/// the first header containing both "net" and "price".
pub fn price_from_rows(rows: &[Vec<String>]) -> Option<Decimal> {
    let [header, first, ..] = rows else {
        return None;
    };
    let col = header.iter().position(|h| {
        let h = h.to_lowercase();
        h.contains("net") && h.contains("price")
    })?;
    parse_amount(first.get(col)?)
}

/// `"$1,234.50"` → 1234.50. Currency symbols and thousands separators are ignored.
pub fn parse_amount(cell: &str) -> Option<Decimal> {
    let cleaned = cell.replace(',', "");
    let m = AMOUNT_RE.find(&cleaned)?;
    m.as_str().trim_end_matches('.').parse().ok()
}
