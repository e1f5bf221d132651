//! Precompiled per-contest packs.
//!
//! A pack holds the finalized tables of one contest source, so that a
//! viewer does not need to aggregate the full statewide file. Table keys
//! are flat strings on the wire (`ID||TITLE|COUNTY|PRECINCT` and
//! `ID||TITLE|COUNTY`), and are parsed back by stripping the pack's own
//! contest key, so a `|` inside a title cannot shift the fields. Keys written
//! with the title as it appeared in the source are accepted when their
//! contest part parses to the same key.

use std::collections::{BTreeMap, BTreeSet};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::config::*;
use crate::identity::IdentityIndex;
use crate::AggregateSet;

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestContest {
    pub key: ContestKey,
    pub id: String,
    pub title: String,
    pub scope_code: ScopeCode,
    pub counties: Vec<String>,
    pub total_votes: u64,
    /// File name of the pack, relative to the manifest's `contests/`
    /// directory.
    pub file: String,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub generated_from: String,
    pub contest_count: usize,
    pub contests: Vec<ManifestContest>,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackMeta {
    pub key: ContestKey,
    pub title: String,
    pub scope_code: ScopeCode,
    pub total_votes: u64,
}

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContestPack {
    pub meta: PackMeta,
    pub precinct_agg: BTreeMap<String, PrecinctAggregate>,
    /// Alias key to primary key.
    #[serde(default)]
    pub precinct_lookup: BTreeMap<String, String>,
    pub county_agg: BTreeMap<String, CountyAggregate>,
}

/// A file name made of word characters and `-` only.
///
/// Every other run of characters becomes a single `_`; the result is at most
/// 140 characters and never empty.
pub fn safe_filename(s: &str) -> String {
    let mut res = String::new();
    for c in s.trim().chars() {
        let c = if c.is_alphanumeric() || c == '-' { c } else { '_' };
        if c == '_' && res.ends_with('_') {
            continue;
        }
        res.push(c);
    }
    let res: String = res.trim_matches('_').chars().take(140).collect();
    if res.is_empty() {
        "contest".to_string()
    } else {
        res
    }
}

/// Builds the manifest and one pack per contest source.
///
/// File names are made unique by suffixing repeats with `_2`, `_3`, ...
pub fn build_packs(set: &AggregateSet, generated_from: &str) -> (Manifest, Vec<(String, ContestPack)>) {
    let mut used: BTreeSet<String> = BTreeSet::new();
    let mut entries: Vec<ManifestContest> = Vec::new();
    let mut packs: Vec<(String, ContestPack)> = Vec::new();
    for (ck, contest) in set.contests.iter() {
        let stem = safe_filename(&format!("{}_{}", ck.id, contest.title));
        let mut file = format!("{}.json", stem);
        let mut n = 1;
        while used.contains(&file) {
            n += 1;
            file = format!("{}_{}.json", stem, n);
        }
        used.insert(file.clone());

        let mut precinct_agg: BTreeMap<String, PrecinctAggregate> = BTreeMap::new();
        let mut precinct_lookup: BTreeMap<String, String> = BTreeMap::new();
        for p in set.precincts.for_contest(ck) {
            let primary = PrecinctKey::new(ck, &p.county, &p.precinct).to_string();
            for id in p.lookup_ids().filter(|id| **id != p.precinct) {
                precinct_lookup
                    .entry(PrecinctKey::new(ck, &p.county, id).to_string())
                    .or_insert_with(|| primary.clone());
            }
            precinct_agg.insert(primary, p.clone());
        }
        let county_agg: BTreeMap<String, CountyAggregate> = set
            .counties
            .for_contest(ck)
            .map(|c| (format!("{}|{}", ck, c.county), c.clone()))
            .collect();

        debug!(
            "build_packs: {} -> {} ({} precincts)",
            ck,
            file,
            precinct_agg.len()
        );
        entries.push(ManifestContest {
            key: ck.clone(),
            id: ck.id.clone(),
            title: contest.title.clone(),
            scope_code: contest.scope,
            counties: contest.counties.iter().cloned().collect(),
            total_votes: contest.total_votes,
            file: file.clone(),
        });
        packs.push((
            file,
            ContestPack {
                meta: PackMeta {
                    key: ck.clone(),
                    title: contest.title.clone(),
                    scope_code: contest.scope,
                    total_votes: contest.total_votes,
                },
                precinct_agg,
                precinct_lookup,
                county_agg,
            },
        ));
    }
    info!("build_packs: {} packs", packs.len());
    (
        Manifest {
            generated_from: generated_from.to_string(),
            contest_count: entries.len(),
            contests: entries,
        },
        packs,
    )
}

/// The `fields` last `|`-separated parts of a table key. The contest part
/// may carry the title as it was written (`1020||County Commissioner|...`)
/// as long as it parses to the pack's contest key.
fn key_suffix<'a>(ck: &ContestKey, prefix: &str, key: &'a str, fields: usize) -> Option<&'a str> {
    if let Some(rest) = key.strip_prefix(prefix) {
        return Some(rest);
    }
    let mut parts = key.rsplitn(fields + 1, '|');
    let suffix_len: usize = parts.by_ref().take(fields).map(|p| p.len() + 1).sum();
    let contest = parts.next()?;
    if ContestKey::parse(contest) != *ck {
        return None;
    }
    Some(&key[key.len() + 1 - suffix_len..])
}

fn malformed(pack: &ContestPack, key: &str) -> TallyErrors {
    TallyErrors::MalformedPackKey {
        pack: pack.meta.key.to_string(),
        key: key.to_string(),
    }
}

fn split_key<'a>(pack: &ContestPack, prefix: &str, key: &'a str) -> Result<(&'a str, &'a str), TallyErrors> {
    key_suffix(&pack.meta.key, prefix, key, 2)
        .and_then(|rest| rest.split_once('|'))
        .filter(|(county, _)| !county.trim().is_empty())
        .ok_or_else(|| malformed(pack, key))
}

impl AggregateSet {
    /// Accepts the tables of precompiled packs as they are: winners, margins
    /// and winning parties are not recomputed.
    pub fn from_packs<'a, I>(packs: I, identity: Option<&IdentityIndex>) -> Result<AggregateSet, TallyErrors>
    where
        I: IntoIterator<Item = &'a ContestPack>,
    {
        let mut set = AggregateSet::default();
        for pack in packs {
            let ck = &pack.meta.key;
            let prefix = format!("{}|", ck);

            let mut aliases: BTreeMap<&str, Vec<String>> = BTreeMap::new();
            for (alias_key, primary_key) in pack.precinct_lookup.iter() {
                let (_, alias) = split_key(pack, &prefix, alias_key)?;
                aliases
                    .entry(primary_key.as_str())
                    .or_default()
                    .push(norm(alias));
            }

            let mut counties: BTreeSet<String> = BTreeSet::new();
            for (key, p) in pack.precinct_agg.iter() {
                let (county, precinct) = split_key(pack, &prefix, key)?;
                let mut agg = p.clone();
                agg.contest = ck.clone();
                agg.county = norm(county);
                agg.precinct = norm(precinct);
                let mut ids: Vec<String> = Vec::new();
                let extra = aliases.get(key.as_str()).into_iter().flatten();
                for id in [&agg.precinct, &agg.code, &agg.name].into_iter().chain(extra) {
                    if !id.is_empty() && !ids.contains(id) {
                        ids.push(id.clone());
                    }
                }
                agg.aliases = ids;
                counties.insert(agg.county.clone());
                set.precincts.insert_finalized(agg);
            }

            for (key, c) in pack.county_agg.iter() {
                let county = key_suffix(ck, &prefix, key, 1)
                    .filter(|county| !county.trim().is_empty())
                    .ok_or_else(|| malformed(pack, key))?;
                let mut agg = c.clone();
                agg.county = norm(county);
                agg.winner_party = agg.winner_party.filter(|p| !p.is_empty());
                counties.insert(agg.county.clone());
                set.counties.insert(ck, agg);
            }

            let mut contest = ContestAggregate::new(ck, &pack.meta.title);
            contest.scope = pack.meta.scope_code;
            contest.scopes_seen.insert(pack.meta.scope_code);
            contest.total_votes = pack.meta.total_votes;
            contest.counties = counties;
            set.contests.insert(ck.clone(), contest);
        }
        set.precincts.rebuild_aliases(identity);
        info!(
            "from_packs: {} contests, {} precinct aggregates, {} county aggregates",
            set.contests.len(),
            set.precincts.len(),
            set.counties.len()
        );
        Ok(set)
    }
}
