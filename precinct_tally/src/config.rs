// ********* Input data structures ***********

use std::collections::{BTreeSet, HashMap};
use std::error::Error;
use std::fmt::{self, Display};
use std::marker::PhantomData;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Trims and uppercases a value. Counties, precinct codes and contest ids
/// are compared in this form.
pub fn norm(s: &str) -> String {
    s.trim().to_uppercase()
}

/// Uppercases and collapses every run of whitespace to a single space.
///
/// This is the identity of a contest title and the comparison form for
/// precinct display names.
pub fn normalize_label(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<&str>>()
        .join(" ")
        .to_uppercase()
}

/// The scope classification of a contest.
///
/// The declaration order is the specificity order: when several scopes are
/// observed for one contest, the maximum is kept.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum ScopeCode {
    #[serde(rename = "OT")]
    Other,
    #[serde(rename = "SW")]
    Statewide,
    #[serde(rename = "CO")]
    County,
}

impl ScopeCode {
    /// The short code used in packs and on the command line.
    pub fn code(&self) -> &'static str {
        match self {
            ScopeCode::Statewide => "SW",
            ScopeCode::County => "CO",
            ScopeCode::Other => "OT",
        }
    }

    pub fn from_code(code: &str) -> Option<ScopeCode> {
        match code.trim().to_uppercase().as_str() {
            "SW" | "STATEWIDE" => Some(ScopeCode::Statewide),
            "CO" | "COUNTY" => Some(ScopeCode::County),
            "OT" | "OTHER" => Some(ScopeCode::Other),
            _ => None,
        }
    }
}

impl Display for ScopeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ScopeCode::Statewide => "Statewide",
            ScopeCode::County => "County",
            ScopeCode::Other => "Other",
        };
        write!(f, "{}", label)
    }
}

/// One result row, after the column aliases have been resolved.
#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub county: String,
    pub precinct_code: String,
    pub precinct_name: String,
    pub contest_id: String,
    pub contest_title: String,
    /// The raw scope token, as found in the source.
    pub scope_hint: String,
    pub scope: ScopeCode,
    pub candidate: String,
    pub party: String,
    pub votes: u64,
}

impl Record {
    /// The identifier the precinct aggregate is stored under: the declared
    /// name when there is one, the code otherwise.
    pub fn precinct_id(&self) -> &str {
        if self.precinct_name.is_empty() {
            &self.precinct_code
        } else {
            &self.precinct_name
        }
    }

    pub fn contest_key(&self) -> ContestKey {
        ContestKey::new(&self.contest_id, &self.contest_title)
    }
}

/// Rules applied while turning raw rows into records.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct RowRules {
    /// Candidate labels that count ballot anomalies rather than votes.
    pub non_vote_markers: Vec<String>,
    /// Exact scope tokens (case-insensitive) that bypass the heuristic.
    pub scope_overrides: HashMap<String, ScopeCode>,
}

impl Default for RowRules {
    fn default() -> Self {
        RowRules {
            non_vote_markers: vec!["OVER VOTE".to_string(), "UNDER VOTE".to_string()],
            scope_overrides: HashMap::new(),
        }
    }
}

impl RowRules {
    /// Best-effort classification of a scope token.
    ///
    /// Sources encode the scope in many ways (free text, legacy numeric
    /// codes). Overrides are consulted first, then the substring and legacy
    /// code heuristics. Anything unrecognized is `Other`.
    pub fn classify_scope(&self, hint: &str) -> ScopeCode {
        let raw = hint.trim();
        if let Some(scope) = self
            .scope_overrides
            .iter()
            .find(|(token, _)| token.trim().eq_ignore_ascii_case(raw))
            .map(|(_, scope)| *scope)
        {
            return scope;
        }
        let lower = raw.to_lowercase();
        if lower.contains("state") {
            ScopeCode::Statewide
        } else if lower.contains("county") {
            ScopeCode::County
        } else if raw == "3" {
            ScopeCode::County
        } else if raw == "1" {
            ScopeCode::Statewide
        } else {
            ScopeCode::Other
        }
    }

    pub fn is_non_vote(&self, candidate: &str) -> bool {
        let c = normalize_label(candidate);
        self.non_vote_markers
            .iter()
            .any(|m| normalize_label(m) == c)
    }
}

// ********* Keys ***********

/// The identity of a per-scope contest source: the contest id column and
/// the normalized title.
///
/// Its string form is `ID||TITLE`.
#[derive(Eq, PartialEq, Debug, Clone, Hash, Ord, PartialOrd, Default)]
pub struct ContestKey {
    pub id: String,
    pub title: String,
}

impl ContestKey {
    pub fn new(id: &str, title: &str) -> ContestKey {
        ContestKey {
            id: norm(id),
            title: normalize_label(title),
        }
    }

    /// Parses the `ID||TITLE` form. A value without the separator is taken
    /// as a bare title.
    pub fn parse(s: &str) -> ContestKey {
        match s.split_once("||") {
            Some((id, title)) => ContestKey::new(id, title),
            None => ContestKey::new("", s),
        }
    }
}

impl Display for ContestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}||{}", self.id, self.title)
    }
}

impl Serialize for ContestKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ContestKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(ContestKey::parse(&s))
    }
}

/// A precinct within a county, independently of any contest.
///
/// In the identity index, `precinct` is the precinct code. In folder
/// overlays it is whichever identifier the precinct was stored under.
#[derive(Eq, PartialEq, Debug, Clone, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct PrecinctRef {
    pub county: String,
    pub precinct: String,
}

impl PrecinctRef {
    pub fn new(county: &str, precinct: &str) -> PrecinctRef {
        PrecinctRef {
            county: norm(county),
            precinct: norm(precinct),
        }
    }
}

#[derive(Eq, PartialEq, Debug, Clone, Hash, Ord, PartialOrd)]
pub struct PrecinctKey {
    pub contest: ContestKey,
    pub county: String,
    pub precinct: String,
}

impl PrecinctKey {
    pub fn new(contest: &ContestKey, county: &str, precinct: &str) -> PrecinctKey {
        PrecinctKey {
            contest: contest.clone(),
            county: norm(county),
            precinct: norm(precinct),
        }
    }
}

impl Display for PrecinctKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{}", self.contest, self.county, self.precinct)
    }
}

// ******** Tallies *********

/// A name → value mapping that remembers insertion order.
///
/// Winner determination walks the entries in first-seen order, so the
/// order is part of the value. Serialized as a JSON object in that order.
#[derive(PartialEq, Eq, Debug, Clone)]
pub struct Tally<V> {
    entries: Vec<(String, V)>,
    index: HashMap<String, usize>,
}

impl<V> Default for Tally<V> {
    fn default() -> Self {
        Tally {
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<V> Tally<V> {
    pub fn new() -> Tally<V> {
        Tally::default()
    }

    pub fn get(&self, name: &str) -> Option<&V> {
        self.index.get(name).map(|idx| &self.entries[*idx].1)
    }

    /// Returns the entry for `name`, creating it at the end of the order.
    pub fn entry_or_insert_with<F: FnOnce() -> V>(&mut self, name: &str, f: F) -> &mut V {
        let idx = match self.index.get(name) {
            Some(idx) => *idx,
            None => {
                self.entries.push((name.to_string(), f()));
                self.index.insert(name.to_string(), self.entries.len() - 1);
                self.entries.len() - 1
            }
        };
        &mut self.entries[idx].1
    }

    pub fn insert(&mut self, name: String, value: V) {
        match self.index.get(&name) {
            Some(idx) => self.entries[*idx].1 = value,
            None => {
                self.index.insert(name.clone(), self.entries.len());
                self.entries.push((name, value));
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.entries.iter().map(|(name, v)| (name.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<V: Serialize> Serialize for Tally<V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, value) in self.entries.iter() {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

struct TallyVisitor<V>(PhantomData<V>);

impl<'de, V: Deserialize<'de>> Visitor<'de> for TallyVisitor<V> {
    type Value = Tally<V>;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a map from names to tallies")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Tally<V>, A::Error> {
        let mut tally = Tally::new();
        while let Some((name, value)) = access.next_entry::<String, V>()? {
            tally.insert(name, value);
        }
        Ok(tally)
    }
}

impl<'de, V: Deserialize<'de>> Deserialize<'de> for Tally<V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(TallyVisitor(PhantomData))
    }
}

#[derive(Eq, PartialEq, Debug, Clone, Default, Serialize, Deserialize)]
pub struct CandidateVotes {
    pub votes: u64,
    #[serde(default)]
    pub party: String,
}

pub type CandidateTally = Tally<CandidateVotes>;
pub type PartyTally = Tally<u64>;

impl CandidateTally {
    /// Adds votes for a candidate. The first non-empty party seen is kept.
    pub fn add(&mut self, candidate: &str, party: &str, votes: u64) {
        let entry = self.entry_or_insert_with(candidate, || CandidateVotes {
            votes: 0,
            party: party.to_string(),
        });
        entry.votes = entry.votes.saturating_add(votes);
        if entry.party.is_empty() && !party.is_empty() {
            entry.party = party.to_string();
        }
    }

    pub fn total(&self) -> u64 {
        self.iter().fold(0u64, |acc, (_, cv)| acc.saturating_add(cv.votes))
    }
}

impl PartyTally {
    pub fn add(&mut self, party: &str, votes: u64) {
        let v = self.entry_or_insert_with(party, || 0);
        *v = v.saturating_add(votes);
    }
}

// ******** Output data structures *********

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct Winner {
    pub name: String,
    #[serde(default)]
    pub party: String,
    pub votes: u64,
}

/// The tally of one contest in one precinct.
#[derive(PartialEq, Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrecinctAggregate {
    #[serde(skip)]
    pub contest: ContestKey,
    #[serde(default)]
    pub county: String,
    /// The identifier this aggregate is stored under.
    #[serde(default)]
    pub precinct: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub code: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    pub total: u64,
    #[serde(rename = "candVotes", default)]
    pub candidates: CandidateTally,
    pub winner: Option<Winner>,
    #[serde(default)]
    pub runner_up_votes: u64,
    #[serde(default)]
    pub margin_pct: f64,
    /// Every identifier the aggregate can be looked up with, the primary one
    /// included.
    #[serde(skip)]
    pub aliases: Vec<String>,
    /// The display name the identity index gives to this precinct's code.
    #[serde(skip)]
    pub display_alias: Option<String>,
}

impl PrecinctAggregate {
    pub fn lookup_ids(&self) -> impl Iterator<Item = &String> {
        self.aliases.iter().chain(self.display_alias.iter())
    }
}

/// The tally of one contest in one county.
#[derive(PartialEq, Eq, Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountyAggregate {
    #[serde(default)]
    pub county: String,
    pub total: u64,
    #[serde(default)]
    pub party_votes: PartyTally,
    #[serde(rename = "candVotes", default)]
    pub candidates: CandidateTally,
    #[serde(default)]
    pub winner_party: Option<String>,
}

/// Metadata of a contest.
///
/// Before merging, there is one per contest source and `contest_keys` holds
/// that single source. After merging, `contest_keys` lists every source that
/// shares the title.
#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContestAggregate {
    /// The normalized title.
    pub key: String,
    pub title: String,
    #[serde(rename = "scopeCode")]
    pub scope: ScopeCode,
    pub counties: BTreeSet<String>,
    pub total_votes: u64,
    pub contest_keys: Vec<ContestKey>,
    #[serde(skip)]
    pub scopes_seen: BTreeSet<ScopeCode>,
}

impl ContestAggregate {
    pub fn new(key: &ContestKey, title: &str) -> ContestAggregate {
        ContestAggregate {
            key: key.title.clone(),
            title: title.trim().to_string(),
            scope: ScopeCode::Other,
            counties: BTreeSet::new(),
            total_votes: 0,
            contest_keys: vec![key.clone()],
            scopes_seen: BTreeSet::new(),
        }
    }

    pub fn is_merged(&self) -> bool {
        self.contest_keys.len() > 1
    }
}

/// What happened to the rows of one load.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestStats {
    pub rows_read: usize,
    pub rows_kept: usize,
    pub dropped_missing_field: usize,
    pub dropped_non_vote: usize,
}

/// Errors when accepting precompiled data.
#[derive(Eq, PartialEq, Debug, Clone)]
pub enum TallyErrors {
    /// A table key of a pack does not start with the pack's contest key or
    /// does not carry a county.
    MalformedPackKey { pack: String, key: String },
}

impl Error for TallyErrors {}

impl Display for TallyErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TallyErrors::MalformedPackKey { pack, key } => {
                write!(f, "pack {}: malformed table key {:?}", pack, key)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_heuristic() {
        let rules = RowRules::default();
        assert_eq!(rules.classify_scope("Statewide"), ScopeCode::Statewide);
        assert_eq!(rules.classify_scope("COUNTY WIDE"), ScopeCode::County);
        assert_eq!(rules.classify_scope(" 1 "), ScopeCode::Statewide);
        assert_eq!(rules.classify_scope("3"), ScopeCode::County);
        assert_eq!(rules.classify_scope("2"), ScopeCode::Other);
        assert_eq!(rules.classify_scope(""), ScopeCode::Other);
    }

    #[test]
    fn scope_overrides_win() {
        let mut rules = RowRules::default();
        rules
            .scope_overrides
            .insert("MUNI".to_string(), ScopeCode::County);
        rules
            .scope_overrides
            .insert("1".to_string(), ScopeCode::Other);
        assert_eq!(rules.classify_scope("muni"), ScopeCode::County);
        assert_eq!(rules.classify_scope("1"), ScopeCode::Other);
    }

    #[test]
    fn scope_specificity_order() {
        let seen = [ScopeCode::Statewide, ScopeCode::Other, ScopeCode::County];
        assert_eq!(seen.iter().max(), Some(&ScopeCode::County));
        assert!(ScopeCode::Statewide > ScopeCode::Other);
    }

    #[test]
    fn non_vote_markers() {
        let rules = RowRules::default();
        assert!(rules.is_non_vote("Over  Vote"));
        assert!(rules.is_non_vote("UNDER VOTE"));
        assert!(!rules.is_non_vote("A SMITH"));
    }

    #[test]
    fn contest_key_forms() {
        let k = ContestKey::new(" 1020 ", "  County   Commissioner ");
        assert_eq!(k.to_string(), "1020||COUNTY COMMISSIONER");
        assert_eq!(ContestKey::parse("1020||County Commissioner"), k);
        assert_eq!(ContestKey::parse("SHERIFF").id, "");
    }

    #[test]
    fn tally_keeps_insertion_order_and_first_party() {
        let mut t = CandidateTally::new();
        t.add("B JONES", "", 10);
        t.add("A SMITH", "DEM", 5);
        t.add("B JONES", "REP", 3);
        let names: Vec<&str> = t.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["B JONES", "A SMITH"]);
        assert_eq!(t.get("B JONES").map(|c| c.votes), Some(13));
        assert_eq!(t.get("B JONES").map(|c| c.party.as_str()), Some("REP"));
        assert_eq!(t.total(), 18);
    }

    #[test]
    fn tally_json_keeps_order() {
        let mut t = PartyTally::new();
        t.add("REP", 1);
        t.add("DEM", 2);
        t.add("LIB", 3);
        let js = serde_json::to_string(&t).unwrap();
        assert_eq!(js, r#"{"REP":1,"DEM":2,"LIB":3}"#);
        let back: PartyTally = serde_json::from_str(&js).unwrap();
        assert_eq!(back, t);
    }
}
