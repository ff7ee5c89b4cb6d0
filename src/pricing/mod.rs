pub mod browser;
pub mod credentials;
pub mod price_table;
pub mod session;
pub mod webdriver;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::config::PricingConfig;
use crate::models::{KnownPrice, Part, PartStatus};

pub use credentials::CredentialStore;
pub use session::{fetch_prices, FetchReport};
pub use webdriver::WebDriverLauncher;

/// Carry price state from earlier runs onto freshly extracted parts.
///
/// Fresh prices keep their `priced`/`active` status. When a lookup will
/// follow (`will_fetch`), stale or force-refreshed ones drop back to
/// `extracted` so they are selected again; the old price stays on the part
/// until a new one arrives. Without a lookup every priced part keeps its
/// status.
pub fn apply_history(
    parts: &mut [Part],
    history: &HashMap<String, KnownPrice>,
    cfg: &PricingConfig,
    will_fetch: bool,
    force_refresh: bool,
    now: DateTime<Utc>,
) {
    let mut restored = 0;
    for part in parts.iter_mut() {
        let Some(known) = history.get(&part.part_number) else {
            continue;
        };
        part.restore_history(known.price, known.last_price_update, known.status);
        let fresh = !force_refresh && !part.is_price_stale(cfg.stale_days, now);
        let keep = match known.status {
            PartStatus::Discontinued | PartStatus::PriceFailed => true,
            PartStatus::Priced | PartStatus::Active => {
                (fresh || !will_fetch) && known.price.is_some()
            }
            PartStatus::Extracted | PartStatus::PricePending => false,
        };
        if !keep {
            part.status = PartStatus::Extracted;
        }
        restored += 1;
    }
    debug!(restored, "Applied price history");
}

/// Parts that need a lookup, moved to `price_pending`. The originals are
/// left untouched; the fetched copies replace them on merge.
pub fn select_for_pricing(parts: &[Part]) -> Vec<Part> {
    let selected: Vec<Part> = parts
        .iter()
        .filter(|p| matches!(p.status, PartStatus::Extracted | PartStatus::PriceFailed))
        .filter_map(|p| {
            let mut p = p.clone();
            p.advance(PartStatus::PricePending).ok()?;
            Some(p)
        })
        .collect();
    info!(selected = selected.len(), total = parts.len(), "Selected parts for pricing");
    selected
}
