/*!
Precinct, county and contest vote aggregation for election results.

The engine takes normalized result rows ([`Record`]) and builds three tables
in one pass: per precinct, per county and per contest. Winners, margins and
winning parties are derived once every row has been accumulated.

```
use precinct_tally::rows::parse_records;
use precinct_tally::{aggregate, ContestKey, RowRules};

let text = "county\tprecinct_code\tcontest_title\tcandidate\tparty\tvotes\n\
            WAKE\t01\tSHERIFF\tA SMITH\tDEM\t120\n\
            WAKE\t01\tSHERIFF\tB JONES\tREP\t80";
let (records, _stats) = parse_records(text, &RowRules::default());
let set = aggregate(&records, None);

let p = set
    .precincts
    .lookup(&ContestKey::new("", "Sheriff"), "WAKE", "01")
    .unwrap();
assert_eq!(p.total, 200);
assert_eq!(p.winner.as_ref().unwrap().name, "A SMITH");
assert_eq!(p.runner_up_votes, 80);
assert!((p.margin_pct - 0.20).abs() < 1e-9);
```

See the [`manual`] for the input formats and the [`session::Session`] for
the stateful entry point used by the command line.
*/

mod config;
pub mod folder;
pub mod identity;
pub mod manual;
pub mod merge;
pub mod pack;
pub mod reconcile;
pub mod report;
pub mod rows;
pub mod session;

use log::{debug, info};

use std::collections::{BTreeMap, HashMap};

pub use crate::config::*;
pub use crate::identity::{IdentityIndex, PrecinctFeature};

/// The position of a precinct aggregate in its table.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash)]
pub struct PrecinctHandle(usize);

/// Precinct aggregates, stored once, reachable by their primary key and by
/// any alias identifier.
#[derive(PartialEq, Debug, Clone, Default)]
pub struct PrecinctTable {
    arena: Vec<PrecinctAggregate>,
    primary: HashMap<PrecinctKey, PrecinctHandle>,
    aliases: HashMap<PrecinctKey, PrecinctHandle>,
    by_contest: BTreeMap<ContestKey, Vec<PrecinctHandle>>,
}

impl PrecinctTable {
    /// Looks up by primary key first, then by alias.
    pub fn handle(&self, key: &PrecinctKey) -> Option<PrecinctHandle> {
        self.primary
            .get(key)
            .or_else(|| self.aliases.get(key))
            .cloned()
    }

    pub fn get(&self, key: &PrecinctKey) -> Option<&PrecinctAggregate> {
        self.handle(key).map(|h| &self.arena[h.0])
    }

    pub fn lookup(
        &self,
        contest: &ContestKey,
        county: &str,
        precinct: &str,
    ) -> Option<&PrecinctAggregate> {
        self.get(&PrecinctKey::new(contest, county, precinct))
    }

    /// Panics if the handle comes from another table.
    pub fn by_handle(&self, handle: PrecinctHandle) -> &PrecinctAggregate {
        &self.arena[handle.0]
    }

    pub fn for_contest<'a>(
        &'a self,
        contest: &ContestKey,
    ) -> impl Iterator<Item = &'a PrecinctAggregate> + 'a {
        self.by_contest
            .get(contest)
            .into_iter()
            .flat_map(move |hs| hs.iter().map(move |h| &self.arena[h.0]))
    }

    pub fn iter(&self) -> impl Iterator<Item = &PrecinctAggregate> {
        self.arena.iter()
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    pub fn alias_count(&self) -> usize {
        self.aliases.len()
    }

    fn get_or_insert<F: FnOnce() -> PrecinctAggregate>(
        &mut self,
        key: PrecinctKey,
        make: F,
    ) -> PrecinctHandle {
        if let Some(h) = self.primary.get(&key) {
            return *h;
        }
        let h = PrecinctHandle(self.arena.len());
        self.by_contest
            .entry(key.contest.clone())
            .or_default()
            .push(h);
        self.arena.push(make());
        self.primary.insert(key, h);
        h
    }

    /// Stores an aggregate whose derived fields are already computed.
    pub(crate) fn insert_finalized(&mut self, agg: PrecinctAggregate) -> PrecinctHandle {
        let key = PrecinctKey::new(&agg.contest, &agg.county, &agg.precinct);
        match self.primary.get(&key) {
            Some(h) => {
                self.arena[h.0] = agg;
                *h
            }
            None => self.get_or_insert(key, || agg),
        }
    }

    /// Recomputes the alias lookup from the identifiers of every aggregate
    /// and from the display names of the identity index.
    ///
    /// Primary keys always win over aliases; among aliases the first
    /// registration wins.
    pub(crate) fn rebuild_aliases(&mut self, identity: Option<&IdentityIndex>) {
        self.aliases.clear();
        for (idx, agg) in self.arena.iter_mut().enumerate() {
            agg.display_alias = identity
                .filter(|_| !agg.code.is_empty())
                .and_then(|ix| ix.canonical_name(&agg.county, &agg.code))
                .map(norm)
                .filter(|n| !n.is_empty() && !agg.aliases.contains(n));
            for id in agg.lookup_ids().filter(|id| !id.is_empty()) {
                let key = PrecinctKey::new(&agg.contest, &agg.county, id);
                if self.primary.contains_key(&key) {
                    continue;
                }
                self.aliases.entry(key).or_insert(PrecinctHandle(idx));
            }
        }
        debug!("rebuild_aliases: {} alias keys", self.aliases.len());
    }
}

/// County aggregates, nested by contest then county.
#[derive(PartialEq, Eq, Debug, Clone, Default)]
pub struct CountyTable {
    by_contest: BTreeMap<ContestKey, BTreeMap<String, CountyAggregate>>,
}

impl CountyTable {
    pub fn get(&self, contest: &ContestKey, county: &str) -> Option<&CountyAggregate> {
        self.by_contest
            .get(contest)
            .and_then(|m| m.get(&norm(county)))
    }

    pub fn for_contest<'a>(
        &'a self,
        contest: &ContestKey,
    ) -> impl Iterator<Item = &'a CountyAggregate> + 'a {
        self.by_contest
            .get(contest)
            .into_iter()
            .flat_map(|m| m.values())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ContestKey, &CountyAggregate)> {
        self.by_contest
            .iter()
            .flat_map(|(ck, m)| m.values().map(move |c| (ck, c)))
    }

    pub fn len(&self) -> usize {
        self.by_contest.values().map(|m| m.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entry(&mut self, contest: &ContestKey, county: &str) -> &mut CountyAggregate {
        self.by_contest
            .entry(contest.clone())
            .or_default()
            .entry(county.to_string())
            .or_insert_with(|| CountyAggregate {
                county: county.to_string(),
                ..Default::default()
            })
    }

    pub(crate) fn insert(&mut self, contest: &ContestKey, agg: CountyAggregate) {
        self.by_contest
            .entry(contest.clone())
            .or_default()
            .insert(agg.county.clone(), agg);
    }
}

/// Everything built from one load.
#[derive(PartialEq, Debug, Clone, Default)]
pub struct AggregateSet {
    pub precincts: PrecinctTable,
    pub counties: CountyTable,
    /// Per-source contests, before merging by title.
    pub contests: BTreeMap<ContestKey, ContestAggregate>,
}

/// Builds the precinct, county and contest tables from records.
///
/// The identity index, when given, contributes one more alias per precinct:
/// the display name recorded for the precinct's code.
pub fn aggregate(records: &[Record], identity: Option<&IdentityIndex>) -> AggregateSet {
    info!("aggregate: processing {} records", records.len());
    let mut set = AggregateSet::default();

    for r in records.iter() {
        let ck = r.contest_key();
        let county = norm(&r.county);

        let contest = set
            .contests
            .entry(ck.clone())
            .or_insert_with(|| ContestAggregate::new(&ck, &r.contest_title));
        contest.counties.insert(county.clone());
        contest.total_votes = contest.total_votes.saturating_add(r.votes);
        contest.scopes_seen.insert(r.scope);

        let pkey = PrecinctKey::new(&ck, &county, r.precinct_id());
        let h = set.precincts.get_or_insert(pkey, || PrecinctAggregate {
            contest: ck.clone(),
            county: county.clone(),
            precinct: norm(r.precinct_id()),
            ..Default::default()
        });
        let p = &mut set.precincts.arena[h.0];
        p.total = p.total.saturating_add(r.votes);
        p.candidates.add(&r.candidate, &r.party, r.votes);
        if p.code.is_empty() {
            p.code = norm(&r.precinct_code);
        }
        if p.name.is_empty() {
            p.name = norm(&r.precinct_name);
        }

        let c = set.counties.entry(&ck, &county);
        c.total = c.total.saturating_add(r.votes);
        c.candidates.add(&r.candidate, &r.party, r.votes);
        if !r.party.is_empty() {
            c.party_votes.add(&r.party, r.votes);
        }
    }

    finalize(&mut set);
    set.precincts.rebuild_aliases(identity);
    info!(
        "aggregate: {} contests, {} precinct aggregates ({} aliases), {} county aggregates",
        set.contests.len(),
        set.precincts.len(),
        set.precincts.alias_count(),
        set.counties.len()
    );
    set
}

// The derived fields need the complete tallies, so they are only computed
// once all the records have been accumulated.
fn finalize(set: &mut AggregateSet) {
    for p in set.precincts.arena.iter_mut() {
        finalize_precinct(p);
        let mut ids: Vec<String> = Vec::new();
        for id in [&p.precinct, &p.code, &p.name] {
            if !id.is_empty() && !ids.contains(id) {
                ids.push(id.clone());
            }
        }
        p.aliases = ids;
    }
    for c in set
        .counties
        .by_contest
        .values_mut()
        .flat_map(|m| m.values_mut())
    {
        finalize_county(c);
    }
    for contest in set.contests.values_mut() {
        contest.scope = contest
            .scopes_seen
            .iter()
            .max()
            .cloned()
            .unwrap_or(ScopeCode::Other);
        debug!(
            "finalize: contest {:?} scope {:?} total {}",
            contest.title, contest.scope, contest.total_votes
        );
    }
}

/// Finds the leader of a tally walked in first-seen order, with the
/// runner-up votes.
///
/// A later entry displaces the leader only when strictly greater, so a tie
/// goes to the entry seen first. The runner-up is the largest entry that is
/// not the final leader, displaced leaders included.
pub fn leader<'a, I>(entries: I) -> Option<(&'a str, u64, u64)>
where
    I: IntoIterator<Item = (&'a str, u64)>,
{
    let mut best: Option<(&'a str, u64)> = None;
    let mut second: u64 = 0;
    for (name, votes) in entries {
        match best {
            Some((_, best_votes)) if votes <= best_votes => {
                second = second.max(votes);
            }
            Some((_, best_votes)) => {
                second = second.max(best_votes);
                best = Some((name, votes));
            }
            None => {
                best = Some((name, votes));
            }
        }
    }
    best.map(|(name, votes)| (name, votes, second))
}

/// `(winner - runner_up) / total`, 0 when there are no votes.
pub fn margin_pct(winner_votes: u64, runner_up_votes: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        winner_votes.saturating_sub(runner_up_votes) as f64 / total as f64
    }
}

pub(crate) fn finalize_precinct(p: &mut PrecinctAggregate) {
    match leader(p.candidates.iter().map(|(name, cv)| (name, cv.votes))) {
        Some((name, votes, second)) => {
            let party = p
                .candidates
                .get(name)
                .map(|cv| cv.party.clone())
                .unwrap_or_default();
            p.winner = Some(Winner {
                name: name.to_string(),
                party,
                votes,
            });
            p.runner_up_votes = second;
            p.margin_pct = margin_pct(votes, second, p.total);
        }
        None => {
            p.winner = None;
            p.runner_up_votes = 0;
            p.margin_pct = 0.0;
        }
    }
}

pub(crate) fn finalize_county(c: &mut CountyAggregate) {
    c.winner_party = leader(c.party_votes.iter().map(|(party, v)| (party, *v)))
        .map(|(party, _, _)| party.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(county: &str, code: &str, contest: &str, cand: &str, party: &str, votes: u64) -> Record {
        Record {
            county: county.to_string(),
            precinct_code: code.to_string(),
            precinct_name: String::new(),
            contest_id: String::new(),
            contest_title: contest.to_string(),
            scope_hint: String::new(),
            scope: ScopeCode::Other,
            candidate: cand.to_string(),
            party: party.to_string(),
            votes,
        }
    }

    fn sheriff() -> ContestKey {
        ContestKey::new("", "SHERIFF")
    }

    fn init_logs() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn end_to_end_example() {
        init_logs();
        let records = vec![
            rec("WAKE", "01", "SHERIFF", "A SMITH", "DEM", 120),
            rec("WAKE", "01", "SHERIFF", "B JONES", "REP", 80),
        ];
        let set = aggregate(&records, None);
        let p = set.precincts.lookup(&sheriff(), "WAKE", "01").unwrap();
        assert_eq!(p.total, 200);
        assert_eq!(
            p.winner,
            Some(Winner {
                name: "A SMITH".to_string(),
                party: "DEM".to_string(),
                votes: 120
            })
        );
        assert_eq!(p.runner_up_votes, 80);
        assert!((p.margin_pct - 0.20).abs() < 1e-12);

        let c = set.counties.get(&sheriff(), "wake").unwrap();
        assert_eq!(c.total, 200);
        assert_eq!(c.winner_party.as_deref(), Some("DEM"));
        assert_eq!(c.party_votes.get("REP"), Some(&80));
    }

    #[test]
    fn tie_goes_to_first_seen_and_follows_row_order() {
        let forward = vec![
            rec("WAKE", "01", "SHERIFF", "A SMITH", "DEM", 50),
            rec("WAKE", "01", "SHERIFF", "B JONES", "REP", 50),
        ];
        let mut backward = forward.clone();
        backward.reverse();

        let set = aggregate(&forward, None);
        let p = set.precincts.lookup(&sheriff(), "WAKE", "01").unwrap();
        assert_eq!(p.winner.as_ref().unwrap().name, "A SMITH");
        assert_eq!(p.margin_pct, 0.0);

        let set = aggregate(&backward, None);
        let p = set.precincts.lookup(&sheriff(), "WAKE", "01").unwrap();
        assert_eq!(p.winner.as_ref().unwrap().name, "B JONES");
        let c = set.counties.get(&sheriff(), "WAKE").unwrap();
        assert_eq!(c.winner_party.as_deref(), Some("REP"));
    }

    #[test]
    fn runner_up_includes_displaced_leaders() {
        let entries = vec![("a", 5), ("b", 9), ("c", 7), ("d", 12)];
        assert_eq!(leader(entries), Some(("d", 12, 9)));
        assert_eq!(leader(Vec::<(&str, u64)>::new()), None);
        assert_eq!(leader(vec![("a", 0)]), Some(("a", 0, 0)));
    }

    #[test]
    fn conservation_and_winner_properties() {
        init_logs();
        let mut records = Vec::new();
        let counties = ["WAKE", "DURHAM", "ORANGE"];
        for (ci, county) in counties.iter().enumerate() {
            for p in 0..4u64 {
                let code = format!("{:02}", p);
                for (k, cand) in ["X", "Y", "Z"].iter().enumerate() {
                    let votes = (ci as u64 + 1) * 13 + p * 7 + (k as u64) * (p % 3) * 5;
                    records.push(rec(county, &code, "MAYOR", cand, ["DEM", "REP", ""][k], votes));
                }
            }
        }
        let set = aggregate(&records, None);
        let mayor = ContestKey::new("", "MAYOR");
        let contest = &set.contests[&mayor];
        let mut sum_counties = 0;
        for county in counties.iter() {
            let c = set.counties.get(&mayor, county).unwrap();
            let from_precincts: u64 = set
                .precincts
                .for_contest(&mayor)
                .filter(|p| p.county == *county)
                .map(|p| p.total)
                .sum();
            assert_eq!(from_precincts, c.total);
            assert_eq!(c.candidates.total(), c.total);
            sum_counties += c.total;
        }
        assert_eq!(sum_counties, contest.total_votes);

        for p in set.precincts.iter() {
            let max = p.candidates.iter().map(|(_, cv)| cv.votes).max().unwrap();
            let w = p.winner.as_ref().unwrap();
            assert_eq!(w.votes, max);
            assert!(p.margin_pct >= 0.0 && p.margin_pct <= 1.0);
        }
    }

    #[test]
    fn precincts_are_reachable_by_every_identifier() {
        let mut r1 = rec("WAKE", "01", "SHERIFF", "A", "DEM", 3);
        r1.precinct_name = "APEX 1".to_string();
        let identity = IdentityIndex::from_features(&[PrecinctFeature {
            county: "WAKE".to_string(),
            code: "01".to_string(),
            name: "Apex North".to_string(),
        }]);
        let set = aggregate(&[r1], Some(&identity));
        let by_name = set.precincts.lookup(&sheriff(), "WAKE", "apex 1").unwrap();
        let by_code = set.precincts.lookup(&sheriff(), "WAKE", "01").unwrap();
        let by_display = set
            .precincts
            .lookup(&sheriff(), "WAKE", "APEX NORTH")
            .unwrap();
        assert_eq!(set.precincts.len(), 1);
        assert!(std::ptr::eq(by_name, by_code));
        assert!(std::ptr::eq(by_name, by_display));
        assert_eq!(by_name.precinct, "APEX 1");
        assert!(set.precincts.lookup(&sheriff(), "DURHAM", "01").is_none());
    }

    #[test]
    fn reaggregation_is_idempotent() {
        let records = vec![
            rec("WAKE", "01", "SHERIFF", "A SMITH", "DEM", 120),
            rec("WAKE", "02", "SHERIFF", "B JONES", "REP", 80),
        ];
        assert_eq!(aggregate(&records, None), aggregate(&records, None));
    }

    #[test]
    fn totals_saturate_at_the_largest_count() {
        let records = vec![
            rec("WAKE", "01", "SHERIFF", "A SMITH", "DEM", u64::MAX),
            rec("WAKE", "01", "SHERIFF", "A SMITH", "DEM", 5),
            rec("WAKE", "01", "SHERIFF", "B JONES", "REP", 5),
        ];
        let set = aggregate(&records, None);
        let p = set.precincts.lookup(&sheriff(), "WAKE", "01").unwrap();
        assert_eq!(p.total, u64::MAX);
        assert_eq!(p.winner.as_ref().unwrap().votes, u64::MAX);
        let c = set.counties.get(&sheriff(), "WAKE").unwrap();
        assert_eq!(c.total, u64::MAX);
        assert_eq!(c.party_votes.get("DEM"), Some(&u64::MAX));
        assert_eq!(set.contests[&sheriff()].total_votes, u64::MAX);
    }

    #[test]
    fn contest_scope_is_most_specific_seen() {
        let mut a = rec("WAKE", "01", "SHERIFF", "A", "DEM", 1);
        a.scope = ScopeCode::Statewide;
        let mut b = rec("WAKE", "02", "SHERIFF", "A", "DEM", 1);
        b.scope = ScopeCode::County;
        let set = aggregate(&[a, b], None);
        assert_eq!(set.contests[&sheriff()].scope, ScopeCode::County);
    }
}
