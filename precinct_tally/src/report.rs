//! Read-only reports over a contest or a folder.

use std::collections::BTreeMap;

use log::debug;
use serde::Serialize;

use crate::config::*;
use crate::folder::FolderAggregate;
use crate::identity::IdentityIndex;
use crate::merge::{county_rollup, precincts_for};
use crate::AggregateSet;

/// Number of counties the scoreboard shows by default.
pub const SCOREBOARD_SIZE: usize = 12;

/// What is being looked at: one logical contest or a folder.
#[derive(Debug, Clone, Copy)]
pub enum View<'a> {
    Contest {
        set: &'a AggregateSet,
        contest: &'a ContestAggregate,
    },
    Folder(&'a FolderAggregate),
}

/// How boundary precincts are matched with aggregates.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinField {
    /// The precinct code.
    Code,
    /// The canonical display name.
    Name,
}

impl JoinField {
    pub fn parse(s: &str) -> Option<JoinField> {
        match s.trim().to_lowercase().as_str() {
            "code" | "prec_id" => Some(JoinField::Code),
            "name" | "enr_desc" => Some(JoinField::Name),
            _ => None,
        }
    }
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreRow {
    pub county: String,
    pub total: u64,
    pub winner_party: Option<String>,
}

#[derive(Eq, PartialEq, Debug, Clone, Copy, Default, Serialize)]
pub struct Coverage {
    pub mapped: usize,
    pub missing: usize,
}

#[derive(PartialEq, Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrecinctRow {
    pub county: String,
    pub precinct: String,
    /// Candidate name for a contest, party for a folder.
    pub winner: Option<String>,
    pub party: Option<String>,
    pub total: u64,
    pub margin_pct: f64,
}

#[derive(PartialEq, Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub title: String,
    pub scope: String,
    pub is_folder: bool,
    pub county_filter: Option<String>,
    pub total_votes: u64,
    pub scoreboard: Vec<ScoreRow>,
    pub join: Option<JoinField>,
    pub coverage: Option<Coverage>,
    pub precincts: Vec<PrecinctRow>,
}

fn county_matches(filter: Option<&str>, county: &str) -> bool {
    match filter.map(norm).filter(|f| !f.is_empty()) {
        Some(f) => f == county,
        None => true,
    }
}

impl<'a> View<'a> {
    pub fn title(&self) -> &str {
        match self {
            View::Contest { contest, .. } => &contest.title,
            View::Folder(f) => &f.title,
        }
    }

    pub fn scope(&self) -> ScopeCode {
        match self {
            View::Contest { contest, .. } => contest.scope,
            View::Folder(f) => f.scope,
        }
    }

    /// The county totals, in county order.
    pub fn county_rows(&self) -> Vec<ScoreRow> {
        match self {
            View::Contest { set, contest } => county_rollup(set, contest)
                .into_values()
                .map(|c| ScoreRow {
                    county: c.county,
                    total: c.total,
                    winner_party: c.winner_party,
                })
                .collect(),
            View::Folder(f) => f
                .counties()
                .map(|c| ScoreRow {
                    county: c.county.clone(),
                    total: c.total,
                    winner_party: c.winner_party.clone(),
                })
                .collect(),
        }
    }

    /// Whether some aggregate with a winner exists for this precinct.
    pub fn has_winner(&self, county: &str, precinct: &str) -> bool {
        match self {
            View::Contest { set, contest } => precincts_for(set, contest, county, precinct)
                .iter()
                .any(|p| p.winner.is_some()),
            View::Folder(f) => f
                .precinct(county, precinct)
                .map(|p| p.winner_party.is_some())
                .unwrap_or(false),
        }
    }

    pub fn precinct_rows(&self) -> Vec<PrecinctRow> {
        match self {
            View::Contest { set, contest } => contest
                .contest_keys
                .iter()
                .flat_map(|ck| set.precincts.for_contest(ck))
                .map(|p| PrecinctRow {
                    county: p.county.clone(),
                    precinct: p.precinct.clone(),
                    winner: p.winner.as_ref().map(|w| w.name.clone()),
                    party: p
                        .winner
                        .as_ref()
                        .map(|w| w.party.clone())
                        .filter(|s| !s.is_empty()),
                    total: p.total,
                    margin_pct: p.margin_pct,
                })
                .collect(),
            View::Folder(f) => f
                .precincts()
                .map(|p| PrecinctRow {
                    county: p.county.clone(),
                    precinct: p.precinct.clone(),
                    winner: p.winner_party.clone(),
                    party: p.winner_party.clone(),
                    total: p.total,
                    margin_pct: p.margin_pct,
                })
                .collect(),
        }
    }
}

/// Total votes of the counties that pass the filter.
pub fn total_votes(view: &View, county_filter: Option<&str>) -> u64 {
    view.county_rows()
        .iter()
        .filter(|r| county_matches(county_filter, &r.county))
        .fold(0u64, |acc, r| acc.saturating_add(r.total))
}

/// The counties with the most votes, largest first. Equal totals keep
/// county order.
pub fn scoreboard(view: &View, county_filter: Option<&str>, limit: usize) -> Vec<ScoreRow> {
    let mut rows: Vec<ScoreRow> = view
        .county_rows()
        .into_iter()
        .filter(|r| county_matches(county_filter, &r.county))
        .collect();
    rows.sort_by(|a, b| b.total.cmp(&a.total));
    rows.truncate(limit);
    rows
}

/// Counts the boundary precincts that have a winner in the view.
pub fn coverage(view: &View, identity: &IdentityIndex, join: JoinField, county_filter: Option<&str>) -> Coverage {
    let mut res = Coverage::default();
    for (pref, name) in identity.iter() {
        if !county_matches(county_filter, &pref.county) {
            continue;
        }
        let id = match join {
            JoinField::Code => pref.precinct.as_str(),
            JoinField::Name => name,
        };
        if view.has_winner(&pref.county, id) {
            res.mapped += 1;
        } else {
            res.missing += 1;
        }
    }
    debug!(
        "coverage: {:?} by {:?}: {} mapped, {} missing",
        view.title(),
        join,
        res.mapped,
        res.missing
    );
    res
}

/// Everything shown about a view, ready to be serialized.
pub fn summarize(
    view: &View,
    identity: Option<&IdentityIndex>,
    join: JoinField,
    county_filter: Option<&str>,
) -> Summary {
    let county_filter = county_filter.map(norm).filter(|c| !c.is_empty());
    let filter = county_filter.as_deref();
    let mut precincts = view.precinct_rows();
    precincts.retain(|p| county_matches(filter, &p.county));
    let mut by_key: BTreeMap<(String, String), PrecinctRow> = BTreeMap::new();
    for p in precincts {
        by_key.entry((p.county.clone(), p.precinct.clone())).or_insert(p);
    }
    Summary {
        title: view.title().to_string(),
        scope: view.scope().to_string(),
        is_folder: matches!(view, View::Folder(_)),
        total_votes: total_votes(view, filter),
        scoreboard: scoreboard(view, filter, SCOREBOARD_SIZE),
        join: identity.map(|_| join),
        coverage: identity.map(|ix| coverage(view, ix, join, filter)),
        precincts: by_key.into_values().collect(),
        county_filter,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::PrecinctFeature;
    use crate::session::Session;

    const RESULTS: &str = "county\tprecinct_code\tprecinct_name\tcontest_title\tcandidate\tparty\tvote_ct\n\
        WAKE\t01\tAPEX 1\tMayor\tA\tDEM\t5\n\
        WAKE\t02\tAPEX 2\tMayor\tB\tREP\t7\n\
        DURHAM\t03\tDURHAM 3\tMayor\tA\tDEM\t20\n\
        ORANGE\t04\tHILLS 4\tMayor\tA\tDEM\t0";

    fn session() -> Session {
        let f = |county: &str, code: &str, name: &str| PrecinctFeature {
            county: county.to_string(),
            code: code.to_string(),
            name: name.to_string(),
        };
        let mut s = Session::new(RowRules::default());
        s.load_boundaries(&[
            f("WAKE", "01", "Apex 1"),
            f("WAKE", "02", "Apex Two"),
            f("WAKE", "09", "Apex 9"),
            f("DURHAM", "03", "Durham 3"),
        ]);
        s.load_results_text(RESULTS);
        s
    }

    #[test]
    fn scoreboard_sorts_by_total() {
        let s = session();
        let view = View::Contest {
            set: s.aggregates().unwrap(),
            contest: s.contest("MAYOR").unwrap(),
        };
        let board = scoreboard(&view, None, 2);
        assert_eq!(
            board,
            vec![
                ScoreRow {
                    county: "DURHAM".to_string(),
                    total: 20,
                    winner_party: Some("DEM".to_string())
                },
                ScoreRow {
                    county: "WAKE".to_string(),
                    total: 12,
                    winner_party: Some("REP".to_string())
                },
            ]
        );
        assert_eq!(scoreboard(&view, Some("wake"), 12).len(), 1);
        assert_eq!(total_votes(&view, None), 32);
        assert_eq!(total_votes(&view, Some("DURHAM")), 20);
    }

    #[test]
    fn coverage_by_code_and_by_name() {
        let s = session();
        let ix = s.identity().unwrap();
        let view = View::Contest {
            set: s.aggregates().unwrap(),
            contest: s.contest("MAYOR").unwrap(),
        };
        assert_eq!(
            coverage(&view, ix, JoinField::Code, None),
            Coverage { mapped: 3, missing: 1 }
        );
        // "Apex Two" only exists in the boundary data, and is the display
        // alias of code 02, so it still resolves.
        assert_eq!(
            coverage(&view, ix, JoinField::Name, Some("WAKE")),
            Coverage { mapped: 2, missing: 1 }
        );
    }

    #[test]
    fn summary_of_a_folder() {
        let s = session();
        let folder = s.combine_folder(&["Mayor".to_string()]).unwrap();
        let view = View::Folder(&folder);
        let summary = summarize(&view, s.identity(), JoinField::Code, Some("wake"));
        assert!(summary.is_folder);
        assert_eq!(summary.title, "Folder (1 contests)");
        assert_eq!(summary.county_filter.as_deref(), Some("WAKE"));
        assert_eq!(summary.total_votes, 12);
        assert_eq!(summary.precincts.len(), 2);
        assert_eq!(summary.precincts[1].winner.as_deref(), Some("REP"));
        assert_eq!(summary.coverage, Some(Coverage { mapped: 2, missing: 1 }));
        let js = serde_json::to_value(&summary).unwrap();
        assert_eq!(js["join"], "code");
        assert_eq!(js["scoreboard"][0]["winnerParty"], "REP");
    }
}
