use std::collections::HashMap;

use crate::models::Part;

/// Collapse records sharing a part number into one, keeping the record with
/// the longest description + category. Ties keep the earliest record.
/// Output follows the order in which each part number was first seen.
pub fn dedupe(parts: Vec<Part>) -> Vec<Part> {
    let mut slot_of: HashMap<String, usize> = HashMap::with_capacity(parts.len());
    let mut kept: Vec<Part> = Vec::with_capacity(parts.len());

    for part in parts {
        match slot_of.get(&part.part_number) {
            Some(&slot) => {
                if completeness(&part) > completeness(&kept[slot]) {
                    kept[slot] = part;
                }
            }
            None => {
                slot_of.insert(part.part_number.clone(), kept.len());
                kept.push(part);
            }
        }
    }

    kept
}

fn completeness(part: &Part) -> usize {
    part.description.chars().count() + part.category.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part(id: &str, desc: &str, cat: &str, page: u32) -> Part {
        Part::new(id, desc, cat, page)
    }

    #[test]
    fn most_complete_record_wins() {
        let out = dedupe(vec![
            part("6000-487", "Pump.", "", 1),
            part("6000-487", "Jet", "Pumps & Mo", 2),
        ]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].page_reference, 2);
        assert_eq!(out[0].category, "Pumps & Mo");
    }

    #[test]
    fn ties_keep_first_encountered() {
        let out = dedupe(vec![
            part("6000-487", "abc", "de", 1),
            part("6000-487", "abcde", "", 2),
            part("6000-487", "a", "b", 3),
        ]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].page_reference, 1);
    }

    #[test]
    fn singletons_pass_through_in_first_seen_order() {
        let out = dedupe(vec![
            part("A6000-123", "Filter", "", 3),
            part("6000-487", "Pump", "Pumps", 1),
            part("A6000-123", "Filter Cartridge", "", 3),
            part("2015-05", "", "", 4),
        ]);
        let ids: Vec<_> = out.iter().map(|p| p.part_number.as_str()).collect();
        assert_eq!(ids, vec!["A6000-123", "6000-487", "2015-05"]);
        assert_eq!(out[0].description, "Filter Cartridge");
    }

    #[test]
    fn idempotent_and_never_grows() {
        let input = vec![
            part("6000-487", "Pump", "", 1),
            part("6000-487", "Pump Motor Assembly", "Pumps", 1),
            part("6000-111", "Jet", "Jet", 2),
            part("6000-111", "", "", 5),
            part("2015-05", "Gasket", "", 9),
        ];
        let once = dedupe(input.clone());
        assert!(once.len() <= input.len());
        assert_eq!(dedupe(once.clone()), once);
    }

    #[test]
    fn multibyte_descriptions_count_characters() {
        // 4 chars / 8 bytes vs 5 chars / 5 bytes.
        let out = dedupe(vec![
            part("6000-487", "ééèè", "", 1),
            part("6000-487", "abcde", "", 2),
        ]);
        assert_eq!(out[0].page_reference, 2);
    }

    #[test]
    fn empty_input() {
        assert!(dedupe(Vec::new()).is_empty());
    }
}
