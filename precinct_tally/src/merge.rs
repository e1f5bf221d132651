//! Grouping per-scope contest sources into logical contests.
//!
//! The same office is often reported once per scope (a statewide source and
//! a county source both titled `COUNTY COMMISSIONER`). The merged contest
//! answers queries by fanning out to all of its sources.

use std::collections::BTreeMap;

use log::{debug, info};

use crate::config::*;
use crate::{finalize_county, AggregateSet};

/// Groups contests by normalized title.
///
/// The display title of the first source seen is kept, sources are listed in
/// the order seen, the scope is the most specific one, counties are the
/// union and totals are summed. The result is sorted by display title.
pub fn merge_contests<'a, I>(contests: I) -> Vec<ContestAggregate>
where
    I: IntoIterator<Item = &'a ContestAggregate>,
{
    let mut by_title: BTreeMap<String, ContestAggregate> = BTreeMap::new();
    for c in contests {
        match by_title.get_mut(&c.key) {
            Some(m) => {
                for k in c.contest_keys.iter() {
                    if !m.contest_keys.contains(k) {
                        m.contest_keys.push(k.clone());
                    }
                }
                m.scope = m.scope.max(c.scope);
                m.scopes_seen.extend(c.scopes_seen.iter().cloned());
                m.counties.extend(c.counties.iter().cloned());
                m.total_votes = m.total_votes.saturating_add(c.total_votes);
            }
            None => {
                by_title.insert(c.key.clone(), c.clone());
            }
        }
    }
    let mut res: Vec<ContestAggregate> = by_title.into_values().collect();
    res.sort_by(|a, b| a.title.cmp(&b.title).then_with(|| a.key.cmp(&b.key)));
    let merged = res.iter().filter(|c| c.is_merged()).count();
    info!(
        "merge_contests: {} logical contests, {} of them merged from several sources",
        res.len(),
        merged
    );
    res
}

/// Finds a logical contest by normalized title or by one of its source keys
/// (`ID||TITLE`).
pub fn find_contest<'a>(contests: &'a [ContestAggregate], key: &str) -> Option<&'a ContestAggregate> {
    let title = normalize_label(key);
    contests.iter().find(|c| c.key == title).or_else(|| {
        let ck = ContestKey::parse(key);
        contests.iter().find(|c| c.contest_keys.contains(&ck))
    })
}

/// The county tallies of a logical contest, summed over its sources.
pub fn county_rollup(set: &AggregateSet, contest: &ContestAggregate) -> BTreeMap<String, CountyAggregate> {
    let mut res: BTreeMap<String, CountyAggregate> = BTreeMap::new();
    for ck in contest.contest_keys.iter() {
        for c in set.counties.for_contest(ck) {
            let acc = res.entry(c.county.clone()).or_insert_with(|| CountyAggregate {
                county: c.county.clone(),
                ..Default::default()
            });
            acc.total = acc.total.saturating_add(c.total);
            for (name, cv) in c.candidates.iter() {
                acc.candidates.add(name, &cv.party, cv.votes);
            }
            for (party, v) in c.party_votes.iter() {
                acc.party_votes.add(party, *v);
            }
        }
    }
    for acc in res.values_mut() {
        finalize_county(acc);
    }
    debug!(
        "county_rollup: {:?} over {} sources, {} counties",
        contest.title,
        contest.contest_keys.len(),
        res.len()
    );
    res
}

/// The precinct aggregates of a logical contest for one precinct identifier,
/// one per source that has it.
pub fn precincts_for<'a>(
    set: &'a AggregateSet,
    contest: &ContestAggregate,
    county: &str,
    precinct: &str,
) -> Vec<&'a PrecinctAggregate> {
    contest
        .contest_keys
        .iter()
        .filter_map(|ck| set.precincts.lookup(ck, county, precinct))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate;

    fn rec(id: &str, title: &str, scope: ScopeCode, county: &str, code: &str, cand: &str, party: &str, votes: u64) -> Record {
        Record {
            county: county.to_string(),
            precinct_code: code.to_string(),
            precinct_name: String::new(),
            contest_id: id.to_string(),
            contest_title: title.to_string(),
            scope_hint: String::new(),
            scope,
            candidate: cand.to_string(),
            party: party.to_string(),
            votes,
        }
    }

    fn commissioner_records() -> Vec<Record> {
        vec![
            rec("1020", "County Commissioner", ScopeCode::Statewide, "WAKE", "01", "A", "DEM", 10),
            rec("1020", "County Commissioner", ScopeCode::Statewide, "WAKE", "01", "B", "REP", 4),
            rec("2040", "COUNTY  COMMISSIONER", ScopeCode::County, "DURHAM", "01", "C", "REP", 7),
            rec("2040", "COUNTY  COMMISSIONER", ScopeCode::County, "WAKE", "01", "B", "REP", 9),
            rec("9", "Sheriff", ScopeCode::Other, "WAKE", "01", "S", "", 3),
        ]
    }

    #[test]
    fn same_title_different_scope_merges() {
        let set = aggregate(&commissioner_records(), None);
        assert_eq!(set.contests.len(), 3);
        let merged = merge_contests(set.contests.values());
        assert_eq!(merged.len(), 2);

        let m = &merged[0];
        assert_eq!(m.key, "COUNTY COMMISSIONER");
        assert_eq!(m.contest_keys.len(), 2);
        assert!(m.is_merged());
        assert_eq!(m.scope, ScopeCode::County);
        assert_eq!(m.total_votes, 30);
        let counties: Vec<&str> = m.counties.iter().map(|s| s.as_str()).collect();
        assert_eq!(counties, vec!["DURHAM", "WAKE"]);
        assert_eq!(merged[1].title, "Sheriff");
        assert!(!merged[1].is_merged());
    }

    #[test]
    fn merged_queries_equal_the_sum_of_sources() {
        let set = aggregate(&commissioner_records(), None);
        let merged = merge_contests(set.contests.values());
        let m = find_contest(&merged, "county commissioner").unwrap();
        assert!(std::ptr::eq(m, find_contest(&merged, "2040||County Commissioner").unwrap()));

        let rollup = county_rollup(&set, m);
        let wake = &rollup["WAKE"];
        let by_source: u64 = m
            .contest_keys
            .iter()
            .filter_map(|ck| set.counties.get(ck, "WAKE"))
            .map(|c| c.total)
            .sum();
        assert_eq!(wake.total, by_source);
        assert_eq!(wake.total, 23);
        assert_eq!(wake.candidates.get("B").map(|c| c.votes), Some(13));
        assert_eq!(wake.winner_party.as_deref(), Some("REP"));
        let total: u64 = rollup.values().map(|c| c.total).sum();
        assert_eq!(total, m.total_votes);

        let ps = precincts_for(&set, m, "WAKE", "01");
        assert_eq!(ps.len(), 2);
        assert_eq!(ps.iter().map(|p| p.total).sum::<u64>(), 23);
        assert!(precincts_for(&set, m, "ORANGE", "01").is_empty());
    }

    #[test]
    fn split_sources_match_a_single_combined_source() {
        let split = aggregate(&commissioner_records(), None);
        let merged = merge_contests(split.contests.values());
        let m = find_contest(&merged, "COUNTY COMMISSIONER").unwrap();
        let rollup = county_rollup(&split, m);

        let combined: Vec<Record> = commissioner_records()
            .into_iter()
            .filter(|r| r.contest_id != "9")
            .map(|mut r| {
                r.contest_id = "1".to_string();
                r
            })
            .collect();
        let single = aggregate(&combined, None);
        let key = ContestKey::new("1", "County Commissioner");
        for c in single.counties.for_contest(&key) {
            assert_eq!(rollup[&c.county].total, c.total);
            assert_eq!(rollup[&c.county].party_votes.get("REP"), c.party_votes.get("REP"));
        }
        assert_eq!(single.contests[&key].total_votes, m.total_votes);
    }

    #[test]
    fn unknown_contest() {
        let set = aggregate(&commissioner_records(), None);
        let merged = merge_contests(set.contests.values());
        assert!(find_contest(&merged, "MAYOR").is_none());
        assert!(merge_contests(Vec::<&ContestAggregate>::new()).is_empty());
    }
}
