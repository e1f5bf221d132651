//! Comparing the precinct names of result rows with the canonical names of
//! the boundary dataset, and applying approved corrections.

use std::collections::BTreeMap;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::config::*;
use crate::identity::IdentityIndex;

/// A precinct whose declared name disagrees with its canonical name.
#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mismatch {
    pub county: String,
    pub precinct_code: String,
    pub canonical_name: String,
    pub source_name: String,
}

impl Mismatch {
    pub fn precinct(&self) -> PrecinctRef {
        PrecinctRef::new(&self.county, &self.precinct_code)
    }
}

#[derive(Eq, PartialEq, Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrectionOutcome {
    pub updated_count: usize,
}

/// Lists the precincts whose declared name differs from the canonical one,
/// ignoring case and whitespace.
///
/// Only rows with both a code and a name are considered, and for each
/// (county, code) pair only the first declared name is compared. Precincts
/// unknown to the index are not mismatches; see [`unmatched_precincts`].
/// The result is sorted by county then code.
pub fn find_mismatches(records: &[Record], index: &IdentityIndex) -> Vec<Mismatch> {
    let mut declared: BTreeMap<PrecinctRef, &str> = BTreeMap::new();
    for r in records.iter() {
        if r.precinct_code.is_empty() || r.precinct_name.is_empty() {
            continue;
        }
        declared
            .entry(PrecinctRef::new(&r.county, &r.precinct_code))
            .or_insert(r.precinct_name.as_str());
    }
    let mut res: Vec<Mismatch> = Vec::new();
    for (pref, source_name) in declared.into_iter() {
        if let Some(canonical) = index.canonical_name(&pref.county, &pref.precinct) {
            if normalize_label(canonical) != normalize_label(source_name) {
                debug!(
                    "find_mismatches: {}/{}: {:?} vs {:?}",
                    pref.county, pref.precinct, canonical, source_name
                );
                res.push(Mismatch {
                    county: pref.county,
                    precinct_code: pref.precinct,
                    canonical_name: canonical.to_string(),
                    source_name: source_name.to_string(),
                });
            }
        }
    }
    info!("find_mismatches: {} mismatches", res.len());
    res
}

/// The (county, code) pairs of the rows that the index does not know.
pub fn unmatched_precincts(records: &[Record], index: &IdentityIndex) -> Vec<PrecinctRef> {
    let mut res: Vec<PrecinctRef> = records
        .iter()
        .filter(|r| !r.precinct_code.is_empty())
        .map(|r| PrecinctRef::new(&r.county, &r.precinct_code))
        .filter(|p| index.canonical_name(&p.county, &p.precinct).is_none())
        .collect();
    res.sort();
    res.dedup();
    res
}

/// Applies the corrected names of the given mismatches to the index.
///
/// Mismatches without a corrected name are left alone. Counts only the
/// names that actually changed, so applying the same corrections twice
/// reports 0 the second time. The mismatch list must be recomputed after.
pub fn apply_corrections(
    index: &mut IdentityIndex,
    mismatches: &[Mismatch],
    corrected: &BTreeMap<PrecinctRef, String>,
) -> CorrectionOutcome {
    let mut outcome = CorrectionOutcome::default();
    for m in mismatches.iter() {
        let pref = m.precinct();
        if let Some(name) = corrected.get(&pref) {
            if index.set_canonical_name(&pref, name) {
                debug!(
                    "apply_corrections: {}/{} is now {:?}",
                    pref.county, pref.precinct, name
                );
                outcome.updated_count += 1;
            }
        }
    }
    info!("apply_corrections: {} names updated", outcome.updated_count);
    outcome
}

/// Corrections that adopt the declared name of every mismatch.
pub fn accept_source_names(mismatches: &[Mismatch]) -> BTreeMap<PrecinctRef, String> {
    mismatches
        .iter()
        .map(|m| (m.precinct(), m.source_name.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::PrecinctFeature;

    fn rec(county: &str, code: &str, name: &str) -> Record {
        Record {
            county: county.to_string(),
            precinct_code: code.to_string(),
            precinct_name: name.to_string(),
            contest_id: String::new(),
            contest_title: "SHERIFF".to_string(),
            scope_hint: String::new(),
            scope: ScopeCode::Other,
            candidate: "A".to_string(),
            party: String::new(),
            votes: 1,
        }
    }

    fn index() -> IdentityIndex {
        let f = |county: &str, code: &str, name: &str| PrecinctFeature {
            county: county.to_string(),
            code: code.to_string(),
            name: name.to_string(),
        };
        IdentityIndex::from_features(&[
            f("WAKE", "02", "Apex  South"),
            f("WAKE", "01", "Apex North"),
            f("DURHAM", "05", "Durham 5"),
        ])
    }

    #[test]
    fn mismatches_are_deduplicated_and_sorted() {
        let records = vec![
            rec("WAKE", "02", "APEX 2"),
            rec("WAKE", "02", "SOMETHING ELSE"),
            rec("WAKE", "01", "APEX NORTH"),
            rec("DURHAM", "05", "DURHAM FIVE"),
            rec("DURHAM", "05", "DURHAM FIVE"),
            rec("WAKE", "09", "UNKNOWN"),
            rec("WAKE", "", "NO CODE"),
            rec("WAKE", "01", ""),
        ];
        let ms = find_mismatches(&records, &index());
        assert_eq!(
            ms,
            vec![
                Mismatch {
                    county: "DURHAM".to_string(),
                    precinct_code: "05".to_string(),
                    canonical_name: "Durham 5".to_string(),
                    source_name: "DURHAM FIVE".to_string(),
                },
                Mismatch {
                    county: "WAKE".to_string(),
                    precinct_code: "02".to_string(),
                    canonical_name: "Apex  South".to_string(),
                    source_name: "APEX 2".to_string(),
                },
            ]
        );
        assert_eq!(
            unmatched_precincts(&records, &index()),
            vec![PrecinctRef::new("WAKE", "09")]
        );
    }

    #[test]
    fn corrections_are_idempotent() {
        let records = vec![rec("WAKE", "02", "APEX 2"), rec("DURHAM", "05", "DURHAM FIVE")];
        let mut idx = index();
        let ms = find_mismatches(&records, &idx);
        let mut corrected = accept_source_names(&ms);
        corrected.remove(&PrecinctRef::new("DURHAM", "05"));

        let first = apply_corrections(&mut idx, &ms, &corrected);
        assert_eq!(first.updated_count, 1);
        assert_eq!(idx.canonical_name("WAKE", "02"), Some("APEX 2"));
        let second = apply_corrections(&mut idx, &ms, &corrected);
        assert_eq!(second.updated_count, 0);

        let after = find_mismatches(&records, &idx);
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].precinct_code, "05");
    }
}
