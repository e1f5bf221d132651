//! Composite views over a bloc of contests.
//!
//! Candidate names are not comparable across unrelated contests but parties
//! are, so a folder only keeps party-level information: in every precinct
//! (and every county) of every member contest, the full vote total of the
//! unit is credited to the party that won it. The composite winner is the
//! party with the largest credited total.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use log::{debug, info, warn};
use serde::Serialize;

use crate::config::*;
use crate::merge::find_contest;
use crate::{leader, margin_pct, AggregateSet};

/// A precinct of a folder, across contests.
#[derive(PartialEq, Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositePrecinct {
    pub county: String,
    /// The identifier of the first aggregate seen for this precinct.
    pub precinct: String,
    pub total: u64,
    pub party_votes: PartyTally,
    pub winner_party: Option<String>,
    pub winner_votes: u64,
    pub runner_up_votes: u64,
    pub margin_pct: f64,
}

#[derive(PartialEq, Eq, Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositeCounty {
    pub county: String,
    pub total: u64,
    pub party_votes: PartyTally,
    pub winner_party: Option<String>,
}

#[derive(PartialEq, Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderAggregate {
    /// The requested keys, joined by `,`.
    pub key: String,
    pub title: String,
    #[serde(rename = "scopeCode")]
    pub scope: ScopeCode,
    pub total_votes: u64,
    /// The metadata of every resolved member.
    pub contests: Vec<ContestAggregate>,
    /// The per-scope sources walked, without repeats.
    pub contest_keys: Vec<ContestKey>,
    /// Requested keys that matched nothing.
    pub unresolved: Vec<String>,
    precincts: Vec<CompositePrecinct>,
    counties: BTreeMap<String, CompositeCounty>,
    #[serde(skip)]
    index: HashMap<PrecinctRef, usize>,
    #[serde(skip)]
    joined: BTreeSet<usize>,
}

impl FolderAggregate {
    /// Looks up a composite precinct by any identifier of its members.
    pub fn precinct(&self, county: &str, precinct: &str) -> Option<&CompositePrecinct> {
        self.index
            .get(&PrecinctRef::new(county, precinct))
            .map(|idx| &self.precincts[*idx])
    }

    pub fn precincts(&self) -> impl Iterator<Item = &CompositePrecinct> {
        self.precincts.iter()
    }

    pub fn county(&self, county: &str) -> Option<&CompositeCounty> {
        self.counties.get(&norm(county))
    }

    pub fn counties(&self) -> impl Iterator<Item = &CompositeCounty> {
        self.counties.values()
    }

    /// The composite precinct of an aggregate. When its identifiers already
    /// point at several composites, those are joined into the earliest one.
    fn slot(&mut self, p: &PrecinctAggregate) -> usize {
        let ids: Vec<&String> = std::iter::once(&p.precinct)
            .chain(p.lookup_ids())
            .filter(|id| !id.is_empty())
            .collect();
        let mut found: Vec<usize> = ids
            .iter()
            .filter_map(|id| self.index.get(&PrecinctRef::new(&p.county, id)).cloned())
            .collect();
        found.sort_unstable();
        found.dedup();
        let idx = match found.first() {
            Some(idx) => *idx,
            None => {
                self.precincts.push(CompositePrecinct {
                    county: p.county.clone(),
                    precinct: p.precinct.clone(),
                    ..Default::default()
                });
                self.precincts.len() - 1
            }
        };
        for other in found.into_iter().skip(1) {
            self.join(idx, other);
        }
        for id in ids.into_iter() {
            self.index.insert(PrecinctRef::new(&p.county, id), idx);
        }
        idx
    }

    fn join(&mut self, into: usize, from: usize) {
        debug!(
            "combine_folder: joining {:?} into {:?}",
            self.precincts[from].precinct, self.precincts[into].precinct
        );
        let taken = std::mem::take(&mut self.precincts[from]);
        let slot = &mut self.precincts[into];
        slot.total = slot.total.saturating_add(taken.total);
        for (party, v) in taken.party_votes.iter() {
            slot.party_votes.add(party, *v);
        }
        for v in self.index.values_mut().filter(|v| **v == from) {
            *v = into;
        }
        self.joined.insert(from);
    }

    /// Drops the composites emptied by joins.
    fn compact(&mut self) {
        if self.joined.is_empty() {
            return;
        }
        let mut moved: Vec<usize> = Vec::with_capacity(self.precincts.len());
        let mut kept: Vec<CompositePrecinct> = Vec::new();
        for (idx, p) in std::mem::take(&mut self.precincts).into_iter().enumerate() {
            moved.push(kept.len());
            if !self.joined.contains(&idx) {
                kept.push(p);
            }
        }
        for v in self.index.values_mut() {
            *v = moved[*v];
        }
        self.precincts = kept;
        self.joined.clear();
    }
}

/// Resolves one folder entry: a per-scope key `ID||TITLE` that exists as is,
/// or else a logical contest (by title or by any of its source keys).
fn resolve_key<'a>(
    set: &'a AggregateSet,
    merged: &'a [ContestAggregate],
    key: &str,
) -> Option<(Vec<ContestKey>, &'a ContestAggregate)> {
    if key.contains("||") {
        let ck = ContestKey::parse(key);
        if let Some(c) = set.contests.get(&ck) {
            return Some((vec![ck], c));
        }
    }
    find_contest(merged, key).map(|c| (c.contest_keys.clone(), c))
}

/// Builds the composite aggregate of a list of contests.
///
/// `None` when no key resolves to a loaded contest.
pub fn combine_folder(
    set: &AggregateSet,
    merged: &[ContestAggregate],
    keys: &[String],
) -> Option<FolderAggregate> {
    let mut folder = FolderAggregate {
        key: keys.join(","),
        title: format!("Folder ({} contests)", keys.len()),
        scope: ScopeCode::Other,
        total_votes: 0,
        contests: Vec::new(),
        contest_keys: Vec::new(),
        unresolved: Vec::new(),
        precincts: Vec::new(),
        counties: BTreeMap::new(),
        index: HashMap::new(),
        joined: BTreeSet::new(),
    };
    let mut scopes: BTreeSet<ScopeCode> = BTreeSet::new();
    for key in keys.iter() {
        match resolve_key(set, merged, key) {
            Some((sources, meta)) => {
                folder.contests.push(meta.clone());
                scopes.insert(meta.scope);
                for ck in sources {
                    if !folder.contest_keys.contains(&ck) {
                        folder.contest_keys.push(ck);
                    }
                }
            }
            None => {
                warn!("combine_folder: contest {:?} is not loaded, skipping", key);
                folder.unresolved.push(key.clone());
            }
        }
    }
    if folder.contest_keys.is_empty() {
        info!("combine_folder: nothing to combine for {:?}", folder.key);
        return None;
    }
    folder.scope = scopes.into_iter().max().unwrap_or(ScopeCode::Other);

    let sources = folder.contest_keys.clone();
    for ck in sources.iter() {
        let total = set.contests.get(ck).map(|c| c.total_votes).unwrap_or(0);
        folder.total_votes = folder.total_votes.saturating_add(total);
        for p in set.precincts.for_contest(ck) {
            let idx = folder.slot(p);
            let slot = &mut folder.precincts[idx];
            slot.total = slot.total.saturating_add(p.total);
            if let Some(party) = p
                .winner
                .as_ref()
                .map(|w| w.party.as_str())
                .filter(|s| !s.is_empty())
            {
                slot.party_votes.add(party, p.total);
            }
        }
        for c in set.counties.for_contest(ck) {
            let slot = folder
                .counties
                .entry(c.county.clone())
                .or_insert_with(|| CompositeCounty {
                    county: c.county.clone(),
                    ..Default::default()
                });
            slot.total = slot.total.saturating_add(c.total);
            if let Some(party) = c.winner_party.as_deref().filter(|s| !s.is_empty()) {
                slot.party_votes.add(party, c.total);
            }
        }
    }

    folder.compact();
    for p in folder.precincts.iter_mut() {
        match leader(p.party_votes.iter().map(|(party, v)| (party, *v))) {
            Some((party, votes, second)) => {
                p.winner_party = Some(party.to_string());
                p.winner_votes = votes;
                p.runner_up_votes = second;
                p.margin_pct = margin_pct(votes, second, p.total);
            }
            None => {
                p.winner_party = None;
                p.winner_votes = 0;
                p.runner_up_votes = 0;
                p.margin_pct = 0.0;
            }
        }
    }
    for c in folder.counties.values_mut() {
        c.winner_party = leader(c.party_votes.iter().map(|(party, v)| (party, *v)))
            .map(|(party, _, _)| party.to_string());
    }
    debug!(
        "combine_folder: {:?} walked {} sources",
        folder.key,
        folder.contest_keys.len()
    );
    info!(
        "combine_folder: {} with {} precincts and {} counties",
        folder.title,
        folder.precincts.len(),
        folder.counties.len()
    );
    Some(folder)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate;
    use crate::merge::merge_contests;

    fn rec(id: &str, title: &str, county: &str, code: &str, name: &str, cand: &str, party: &str, votes: u64) -> Record {
        Record {
            county: county.to_string(),
            precinct_code: code.to_string(),
            precinct_name: name.to_string(),
            contest_id: id.to_string(),
            contest_title: title.to_string(),
            scope_hint: String::new(),
            scope: ScopeCode::Statewide,
            candidate: cand.to_string(),
            party: party.to_string(),
            votes,
        }
    }

    fn records() -> Vec<Record> {
        vec![
            // Sheriff identifies precincts by code only.
            rec("1", "Sheriff", "WAKE", "01", "", "A", "DEM", 60),
            rec("1", "Sheriff", "WAKE", "01", "", "B", "REP", 40),
            rec("1", "Sheriff", "WAKE", "02", "", "A", "DEM", 10),
            rec("1", "Sheriff", "WAKE", "02", "", "B", "REP", 30),
            // Mayor carries both code and name.
            rec("2", "Mayor", "WAKE", "01", "APEX 1", "M", "REP", 70),
            rec("2", "Mayor", "WAKE", "01", "APEX 1", "N", "", 20),
            rec("2", "Mayor", "WAKE", "02", "APEX 2", "N", "", 5),
        ]
    }

    #[test]
    fn credits_precinct_totals_to_winning_parties() {
        let set = aggregate(&records(), None);
        let merged = merge_contests(set.contests.values());
        let keys = vec!["SHERIFF".to_string(), "mayor".to_string()];
        let f = combine_folder(&set, &merged, &keys).unwrap();
        assert_eq!(f.title, "Folder (2 contests)");
        assert_eq!(f.key, "SHERIFF,mayor");
        assert_eq!(f.total_votes, 235);

        // Same precinct, found by code in one contest and by name in the other.
        let p = f.precinct("WAKE", "01").unwrap();
        assert!(std::ptr::eq(p, f.precinct("wake", "APEX 1").unwrap()));
        assert_eq!(p.total, 190);
        assert_eq!(p.party_votes.get("DEM"), Some(&100));
        assert_eq!(p.party_votes.get("REP"), Some(&90));
        assert_eq!(p.winner_party.as_deref(), Some("DEM"));
        assert_eq!(p.runner_up_votes, 90);
        assert!((p.margin_pct - 10.0 / 190.0).abs() < 1e-12);

        // The partyless winner of Mayor in 02 credits nobody.
        let p2 = f.precinct("WAKE", "02").unwrap();
        assert_eq!(p2.total, 45);
        assert_eq!(p2.party_votes.get("REP"), Some(&40));
        assert_eq!(p2.party_votes.len(), 1);
        assert_eq!(f.precincts().count(), 2);

        let wake = f.county("WAKE").unwrap();
        assert_eq!(wake.total, 235);
        assert_eq!(wake.party_votes.get("REP"), Some(&95));
        assert_eq!(wake.party_votes.get("DEM"), Some(&140));
        assert_eq!(wake.winner_party.as_deref(), Some("DEM"));
    }

    #[test]
    fn precincts_seen_apart_are_joined_by_a_later_contest() {
        let mut rs = records();
        rs.push(rec("3", "Clerk", "WAKE", "", "APEX 1", "C", "DEM", 5));
        rs.push(rec("3", "Clerk", "WAKE", "", "APEX 1", "D", "REP", 25));
        let set = aggregate(&rs, None);
        let merged = merge_contests(set.contests.values());
        // Sheriff knows 01 by code and Clerk knows it by name before Mayor
        // shows both.
        let keys = vec!["SHERIFF".to_string(), "CLERK".to_string(), "MAYOR".to_string()];
        let f = combine_folder(&set, &merged, &keys).unwrap();

        let p = f.precinct("WAKE", "01").unwrap();
        assert!(std::ptr::eq(p, f.precinct("WAKE", "APEX 1").unwrap()));
        assert_eq!(p.precinct, "01");
        assert_eq!(p.total, 220);
        assert_eq!(p.party_votes.get("DEM"), Some(&100));
        assert_eq!(p.party_votes.get("REP"), Some(&120));
        assert_eq!(p.winner_party.as_deref(), Some("REP"));
        assert!((p.margin_pct - 20.0 / 220.0).abs() < 1e-12);

        assert_eq!(f.precincts().count(), 2);
        assert_eq!(f.precinct("WAKE", "02").unwrap().total, 45);
        assert_eq!(f.precincts().map(|p| p.total).sum::<u64>(), 265);
    }

    #[test]
    fn unknown_keys_are_reported_and_sources_not_repeated() {
        let set = aggregate(&records(), None);
        let merged = merge_contests(set.contests.values());
        let keys = vec![
            "1||SHERIFF".to_string(),
            "Sheriff".to_string(),
            "GOVERNOR".to_string(),
        ];
        let f = combine_folder(&set, &merged, &keys).unwrap();
        assert_eq!(f.title, "Folder (3 contests)");
        assert_eq!(f.contest_keys, vec![ContestKey::new("1", "SHERIFF")]);
        assert_eq!(f.unresolved, vec!["GOVERNOR".to_string()]);
        assert_eq!(f.total_votes, 140);
        assert_eq!(f.scope, ScopeCode::Statewide);

        assert!(combine_folder(&set, &merged, &["GOVERNOR".to_string()]).is_none());
        assert!(combine_folder(&set, &merged, &[]).is_none());
    }
}
