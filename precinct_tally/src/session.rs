//! The state of one viewing session: the identity index, the loaded rows and
//! the tables built from them.
//!
//! Every load replaces the previous tables wholesale. Only the identity index
//! survives a reload, and it only changes through [`Session::apply_corrections`].

use std::collections::BTreeMap;

use log::{info, warn};

use crate::config::*;
use crate::folder::{combine_folder, FolderAggregate};
use crate::identity::{IdentityIndex, PrecinctFeature};
use crate::merge::{county_rollup, find_contest, merge_contests, precincts_for};
use crate::pack::ContestPack;
use crate::reconcile::{self, CorrectionOutcome, Mismatch};
use crate::rows::{normalize_records, RawTable};
use crate::{aggregate, AggregateSet};

/// Narrows the contest library.
#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct ContestFilter {
    pub scope: Option<ScopeCode>,
    /// Only contests that touched this county.
    pub county: Option<String>,
    /// Case-insensitive substring of the display title.
    pub search: Option<String>,
}

impl ContestFilter {
    pub fn matches(&self, contest: &ContestAggregate) -> bool {
        if let Some(scope) = self.scope {
            if contest.scope != scope {
                return false;
            }
        }
        if let Some(county) = self.county.as_deref().map(norm).filter(|c| !c.is_empty()) {
            if !contest.counties.contains(&county) {
                return false;
            }
        }
        if let Some(search) = self.search.as_deref().map(normalize_label).filter(|s| !s.is_empty()) {
            if !normalize_label(&contest.title).contains(&search) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Default)]
pub struct Session {
    rules: RowRules,
    identity: Option<IdentityIndex>,
    records: Vec<Record>,
    aggregates: Option<AggregateSet>,
    contests: Vec<ContestAggregate>,
    stats: IngestStats,
}

impl Session {
    pub fn new(rules: RowRules) -> Session {
        Session {
            rules,
            ..Default::default()
        }
    }

    pub fn rules(&self) -> &RowRules {
        &self.rules
    }

    /// Builds the identity index. Loaded tables pick up the new display
    /// names as lookup aliases.
    pub fn load_boundaries(&mut self, features: &[PrecinctFeature]) {
        let index = IdentityIndex::from_features(features);
        if let Some(set) = self.aggregates.as_mut() {
            set.precincts.rebuild_aliases(Some(&index));
        }
        self.identity = Some(index);
    }

    /// Replaces the loaded data with the rows of a table.
    pub fn load_results(&mut self, table: &RawTable) -> IngestStats {
        self.load_tables(std::iter::once(table))
    }

    /// Replaces the loaded data with the rows of several tables, read as if
    /// they were one.
    pub fn load_tables<'a, I>(&mut self, tables: I) -> IngestStats
    where
        I: IntoIterator<Item = &'a RawTable>,
    {
        self.reset();
        let mut records: Vec<Record> = Vec::new();
        let mut stats = IngestStats::default();
        for table in tables {
            let (mut rs, s) = normalize_records(table, &self.rules);
            records.append(&mut rs);
            stats.rows_read += s.rows_read;
            stats.rows_kept += s.rows_kept;
            stats.dropped_missing_field += s.dropped_missing_field;
            stats.dropped_non_vote += s.dropped_non_vote;
        }
        let set = aggregate(&records, self.identity.as_ref());
        self.contests = merge_contests(set.contests.values());
        self.aggregates = Some(set);
        self.records = records;
        self.stats = stats;
        stats
    }

    /// Replaces the loaded data with the rows of tab-delimited text.
    pub fn load_results_text(&mut self, text: &str) -> IngestStats {
        self.load_results(&RawTable::from_tsv(text))
    }

    /// Replaces the loaded data with precompiled packs. No rows are kept, so
    /// name reconciliation has nothing to compare afterwards.
    pub fn load_packs<'a, I>(&mut self, packs: I) -> Result<(), TallyErrors>
    where
        I: IntoIterator<Item = &'a ContestPack>,
    {
        self.reset();
        let set = AggregateSet::from_packs(packs, self.identity.as_ref())?;
        self.contests = merge_contests(set.contests.values());
        self.aggregates = Some(set);
        Ok(())
    }

    /// Drops the loaded rows and tables. The identity index is kept.
    pub fn reset(&mut self) {
        if self.aggregates.is_some() {
            info!("reset: dropping {} contests", self.contests.len());
        }
        self.records.clear();
        self.aggregates = None;
        self.contests.clear();
        self.stats = IngestStats::default();
    }

    pub fn has_data(&self) -> bool {
        self.aggregates.is_some()
    }

    pub fn aggregates(&self) -> Option<&AggregateSet> {
        self.aggregates.as_ref()
    }

    pub fn identity(&self) -> Option<&IdentityIndex> {
        self.identity.as_ref()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn stats(&self) -> IngestStats {
        self.stats
    }

    /// The logical contests, sorted by display title.
    pub fn contests(&self) -> &[ContestAggregate] {
        &self.contests
    }

    pub fn contest(&self, key: &str) -> Option<&ContestAggregate> {
        find_contest(&self.contests, key)
    }

    pub fn list_contests(&self, filter: &ContestFilter) -> Vec<&ContestAggregate> {
        self.contests.iter().filter(|c| filter.matches(c)).collect()
    }

    pub fn county_rollup(&self, contest: &ContestAggregate) -> Option<BTreeMap<String, CountyAggregate>> {
        self.aggregates.as_ref().map(|set| county_rollup(set, contest))
    }

    pub fn precinct(&self, contest: &ContestAggregate, county: &str, precinct: &str) -> Vec<&PrecinctAggregate> {
        match self.aggregates.as_ref() {
            Some(set) => precincts_for(set, contest, county, precinct),
            None => Vec::new(),
        }
    }

    pub fn combine_folder(&self, keys: &[String]) -> Option<FolderAggregate> {
        let set = self.aggregates.as_ref()?;
        combine_folder(set, &self.contests, keys)
    }

    /// Recomputed on every call from the current identity index.
    pub fn mismatches(&self) -> Vec<Mismatch> {
        match self.identity.as_ref() {
            Some(index) => reconcile::find_mismatches(&self.records, index),
            None => {
                warn!("mismatches: no boundary data loaded");
                Vec::new()
            }
        }
    }

    pub fn unmatched_precincts(&self) -> Vec<PrecinctRef> {
        match self.identity.as_ref() {
            Some(index) => reconcile::unmatched_precincts(&self.records, index),
            None => Vec::new(),
        }
    }

    /// Applies corrected names to the current mismatches and refreshes the
    /// lookup aliases of the loaded tables.
    pub fn apply_corrections(&mut self, corrected: &BTreeMap<PrecinctRef, String>) -> CorrectionOutcome {
        let mismatches = self.mismatches();
        let index = match self.identity.as_mut() {
            Some(index) => index,
            None => return CorrectionOutcome::default(),
        };
        let outcome = reconcile::apply_corrections(index, &mismatches, corrected);
        if outcome.updated_count > 0 {
            if let Some(set) = self.aggregates.as_mut() {
                set.precincts.rebuild_aliases(Some(&*index));
            }
        }
        outcome
    }
}
