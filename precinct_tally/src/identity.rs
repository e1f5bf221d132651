use std::collections::{BTreeMap, BTreeSet};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::config::*;

/// The identifying properties of one boundary feature. The geometry is not
/// needed here.
#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct PrecinctFeature {
    pub county: String,
    pub code: String,
    pub name: String,
}

/// Canonical display names of precincts, by county and precinct code.
///
/// Built from a boundary dataset. The only mutation afterwards is
/// [`IdentityIndex::set_canonical_name`], used when applying corrections.
#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct IdentityIndex {
    names: BTreeMap<PrecinctRef, String>,
}

impl IdentityIndex {
    /// Features without a county or a code are skipped. When a (county,
    /// code) pair is repeated, the first feature wins.
    pub fn from_features(features: &[PrecinctFeature]) -> IdentityIndex {
        let mut names: BTreeMap<PrecinctRef, String> = BTreeMap::new();
        let mut skipped = 0;
        for f in features.iter() {
            let r = PrecinctRef::new(&f.county, &f.code);
            if r.county.is_empty() || r.precinct.is_empty() {
                skipped += 1;
                continue;
            }
            if names.contains_key(&r) {
                debug!("from_features: repeated precinct {:?}, keeping the first", r);
                continue;
            }
            names.insert(r, f.name.trim().to_string());
        }
        info!(
            "from_features: {} precincts indexed, {} features without county or code",
            names.len(),
            skipped
        );
        IdentityIndex { names }
    }

    pub fn canonical_name(&self, county: &str, code: &str) -> Option<&str> {
        self.names
            .get(&PrecinctRef::new(county, code))
            .map(|s| s.as_str())
    }

    /// Replaces the canonical name. Returns true when the stored value
    /// changed, false when it was already equal or the precinct is unknown.
    pub fn set_canonical_name(&mut self, precinct: &PrecinctRef, name: &str) -> bool {
        match self.names.get_mut(precinct) {
            Some(current) if current.as_str() != name.trim() => {
                *current = name.trim().to_string();
                true
            }
            _ => false,
        }
    }

    pub fn counties(&self) -> BTreeSet<&str> {
        self.names.keys().map(|r| r.county.as_str()).collect()
    }

    /// Entries sorted by county then code.
    pub fn iter(&self) -> impl Iterator<Item = (&PrecinctRef, &str)> {
        self.names.iter().map(|(r, n)| (r, n.as_str()))
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feature(county: &str, code: &str, name: &str) -> PrecinctFeature {
        PrecinctFeature {
            county: county.to_string(),
            code: code.to_string(),
            name: name.to_string(),
        }
    }

    #[test]
    fn lookup_is_case_insensitive_on_keys() {
        let idx = IdentityIndex::from_features(&[
            feature("Wake", "01", " Apex North "),
            feature("DURHAM", "01", "Durham 1"),
        ]);
        assert_eq!(idx.len(), 2);
        assert_eq!(idx.canonical_name("WAKE", " 01"), Some("Apex North"));
        assert_eq!(idx.canonical_name("durham", "01"), Some("Durham 1"));
        assert_eq!(idx.canonical_name("WAKE", "02"), None);
        let counties: Vec<&str> = idx.counties().into_iter().collect();
        assert_eq!(counties, vec!["DURHAM", "WAKE"]);
    }

    #[test]
    fn incomplete_and_repeated_features() {
        let idx = IdentityIndex::from_features(&[
            feature("", "01", "x"),
            feature("WAKE", "", "y"),
            feature("WAKE", "01", "first"),
            feature("WAKE", "01", "second"),
        ]);
        assert_eq!(idx.len(), 1);
        assert_eq!(idx.canonical_name("WAKE", "01"), Some("first"));
    }

    #[test]
    fn set_name_reports_changes_only() {
        let mut idx = IdentityIndex::from_features(&[feature("WAKE", "01", "A")]);
        let r = PrecinctRef::new("WAKE", "01");
        assert!(idx.set_canonical_name(&r, "B"));
        assert!(!idx.set_canonical_name(&r, " B "));
        assert!(!idx.set_canonical_name(&PrecinctRef::new("WAKE", "09"), "C"));
        assert_eq!(idx.canonical_name("WAKE", "01"), Some("B"));
    }
}
