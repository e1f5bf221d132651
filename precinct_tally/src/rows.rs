//! Turning delimited result text into records.
//!
//! Column names drift between elections (`precinct` vs `precinct_name`,
//! `Total Votes` vs `vote_ct`, ...). Every header is indexed under its raw
//! spelling and under a normalized spelling, and each logical field is
//! resolved through an ordered list of aliases. A row that cannot be
//! resolved is dropped and counted, never an error.

use std::collections::{BTreeSet, HashMap};

use log::{debug, info};

use crate::config::*;

pub const COUNTY_COLUMNS: &[&str] = &["county", "County"];
pub const PRECINCT_NAME_COLUMNS: &[&str] = &["precinct_name", "precinct", "Precinct", "precinct_desc"];
pub const PRECINCT_CODE_COLUMNS: &[&str] = &["precinct_code", "precinct_cd", "precinct_id"];
pub const CONTEST_ID_COLUMNS: &[&str] = &["contest_id", "contest", "contestid"];
pub const CONTEST_TITLE_COLUMNS: &[&str] = &["contest_title", "contest_name", "contest", "Contest"];
pub const CANDIDATE_COLUMNS: &[&str] = &["candidate", "choice", "Candidate"];
pub const PARTY_COLUMNS: &[&str] = &["candidate_party", "choice_party", "party", "Party"];
pub const VOTES_COLUMNS: &[&str] = &["vote_ct", "total votes", "votes", "Total Votes"];
pub const SCOPE_COLUMNS: &[&str] = &["contest_scope", "contest_sc", "contest_p", "scope"];

/// Lowercases a column name and collapses every run of non-alphanumeric
/// characters to a single `_`, without leading or trailing separators.
pub fn normalize_header(name: &str) -> String {
    let mut res = String::with_capacity(name.len());
    let mut pending_sep = false;
    for c in name.chars() {
        if c.is_alphanumeric() {
            if pending_sep && !res.is_empty() {
                res.push('_');
            }
            pending_sep = false;
            res.extend(c.to_lowercase());
        } else {
            pending_sep = true;
        }
    }
    res
}

/// Parses a vote count leniently: thousands separators are stripped and
/// anything that is not a non-negative number below `u64::MAX` counts as 0.
pub fn parse_votes(raw: &str) -> u64 {
    let cleaned: String = raw.trim().chars().filter(|c| *c != ',').collect();
    if cleaned.is_empty() {
        return 0;
    }
    match cleaned.parse::<u64>() {
        Ok(x) => x,
        Err(_) => match cleaned.parse::<f64>() {
            Ok(f) if f.is_finite() && f >= 0.0 && f < u64::MAX as f64 => f as u64,
            _ => 0,
        },
    }
}

/// Column positions by raw and by normalized name.
#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct HeaderIndex {
    raw: HashMap<String, usize>,
    normalized: HashMap<String, usize>,
}

impl HeaderIndex {
    pub fn new(names: &[String]) -> HeaderIndex {
        let mut raw: HashMap<String, usize> = HashMap::new();
        let mut normalized: HashMap<String, usize> = HashMap::new();
        for (idx, name) in names.iter().enumerate() {
            let name = name.trim();
            raw.entry(name.to_string()).or_insert(idx);
            let n = normalize_header(name);
            if !n.is_empty() {
                normalized.entry(n).or_insert(idx);
            }
        }
        HeaderIndex { raw, normalized }
    }
}

/// A header plus data rows, as read from a delimited file or a worksheet.
#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct RawTable {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
    index: HeaderIndex,
}

impl RawTable {
    pub fn new(header: Vec<String>, rows: Vec<Vec<String>>) -> RawTable {
        let index = HeaderIndex::new(&header);
        RawTable {
            header,
            rows,
            index,
        }
    }

    /// Reads tab-delimited text with a header line.
    pub fn from_tsv(text: &str) -> RawTable {
        RawTable::from_delimited(text, b'\t')
    }

    pub fn from_delimited(text: &str, delimiter: u8) -> RawTable {
        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(true)
            .flexible(true)
            .quoting(false)
            .trim(csv::Trim::All)
            .from_reader(text.as_bytes());
        let header: Vec<String> = match rdr.headers() {
            Ok(h) => h.iter().map(|s| s.to_string()).collect(),
            Err(e) => {
                debug!("from_delimited: unreadable header: {:?}", e);
                Vec::new()
            }
        };
        let mut rows: Vec<Vec<String>> = Vec::new();
        for (idx, line_r) in rdr.records().enumerate() {
            match line_r {
                Ok(line) => rows.push(line.iter().map(|s| s.to_string()).collect()),
                Err(e) => {
                    // Kept as an empty row so that it is counted as dropped.
                    debug!("from_delimited: line {}: {:?}", idx + 2, e);
                    rows.push(Vec::new());
                }
            }
        }
        RawTable::new(header, rows)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, idx: usize) -> Option<RawRow<'_>> {
        self.rows.get(idx).map(|cells| RawRow {
            index: &self.index,
            cells,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = RawRow<'_>> {
        self.rows.iter().map(move |cells| RawRow {
            index: &self.index,
            cells,
        })
    }
}

/// A field-addressable row.
#[derive(Debug, Clone, Copy)]
pub struct RawRow<'a> {
    index: &'a HeaderIndex,
    cells: &'a [String],
}

impl<'a> RawRow<'a> {
    /// The first non-empty value among the aliases, raw spellings first,
    /// then normalized spellings. Empty string when nothing matches.
    pub fn get(&self, names: &[&str]) -> &'a str {
        let by_raw = names.iter().filter_map(|n| self.index.raw.get(*n));
        let by_normalized = names
            .iter()
            .filter_map(|n| self.index.normalized.get(&normalize_header(n)));
        by_raw
            .chain(by_normalized)
            .filter_map(|idx| self.cells.get(*idx))
            .map(|s| s.trim())
            .find(|s| !s.is_empty())
            .unwrap_or("")
    }

    /// Resolves the logical fields. `None` when a required field is missing.
    pub fn to_record(&self, rules: &RowRules) -> Option<Record> {
        let county = norm(self.get(COUNTY_COLUMNS));
        let precinct_name = norm(self.get(PRECINCT_NAME_COLUMNS));
        let precinct_code = norm(self.get(PRECINCT_CODE_COLUMNS));
        let contest_title = self.get(CONTEST_TITLE_COLUMNS).to_string();
        let candidate = self.get(CANDIDATE_COLUMNS).to_string();
        if county.is_empty()
            || (precinct_name.is_empty() && precinct_code.is_empty())
            || contest_title.is_empty()
            || candidate.is_empty()
        {
            return None;
        }
        let scope_hint = self.get(SCOPE_COLUMNS).to_string();
        Some(Record {
            county,
            precinct_code,
            precinct_name,
            contest_id: norm(self.get(CONTEST_ID_COLUMNS)),
            contest_title,
            scope: rules.classify_scope(&scope_hint),
            scope_hint,
            candidate,
            party: self.get(PARTY_COLUMNS).to_string(),
            votes: parse_votes(self.get(VOTES_COLUMNS)),
        })
    }
}

/// Turns every row of a table into a record, dropping incomplete rows and
/// non-vote markers.
pub fn normalize_records(table: &RawTable, rules: &RowRules) -> (Vec<Record>, IngestStats) {
    let mut stats = IngestStats::default();
    let mut res: Vec<Record> = Vec::with_capacity(table.len());
    for (idx, row) in table.iter().enumerate() {
        stats.rows_read += 1;
        match row.to_record(rules) {
            None => {
                debug!("normalize_records: row {}: missing required field", idx + 1);
                stats.dropped_missing_field += 1;
            }
            Some(r) if rules.is_non_vote(&r.candidate) => {
                debug!(
                    "normalize_records: row {}: non-vote marker {:?}",
                    idx + 1,
                    r.candidate
                );
                stats.dropped_non_vote += 1;
            }
            Some(r) => {
                stats.rows_kept += 1;
                res.push(r);
            }
        }
    }
    info!(
        "normalize_records: read {} rows, kept {}, dropped {} incomplete and {} non-vote",
        stats.rows_read, stats.rows_kept, stats.dropped_missing_field, stats.dropped_non_vote
    );
    (res, stats)
}

/// Parses tab-delimited text straight into records.
pub fn parse_records(text: &str, rules: &RowRules) -> (Vec<Record>, IngestStats) {
    normalize_records(&RawTable::from_tsv(text), rules)
}

/// Keeps the header line and the lines whose `contest_title` column is one
/// of `titles` (compared after label normalization). Lines are copied
/// verbatim. `None` when the text has no `contest_title` column.
pub fn export_rows_for_titles(text: &str, titles: &BTreeSet<String>) -> Option<String> {
    let wanted: BTreeSet<String> = titles.iter().map(|t| normalize_label(t)).collect();
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());
    let header = lines.next()?;
    let title_idx = header
        .split('\t')
        .position(|h| normalize_header(h) == "contest_title")?;
    let mut output: Vec<&str> = vec![header];
    for line in lines {
        let title = line.split('\t').nth(title_idx).unwrap_or("");
        if wanted.contains(&normalize_label(title)) {
            output.push(line);
        }
    }
    Some(output.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "County\tPrecinct\tcontest_title\tchoice\tchoice_party\tTotal Votes\tcontest_scope";

    fn tsv(lines: &[&str]) -> String {
        let mut all = vec![HEADER];
        all.extend_from_slice(lines);
        all.join("\n")
    }

    #[test]
    fn header_normalization() {
        assert_eq!(normalize_header("Total Votes"), "total_votes");
        assert_eq!(normalize_header("  --Precinct  Code--"), "precinct_code");
        assert_eq!(normalize_header("contest_title"), "contest_title");
        assert_eq!(normalize_header("***"), "");
    }

    #[test]
    fn lenient_votes() {
        assert_eq!(parse_votes("1,234"), 1234);
        assert_eq!(parse_votes(" 12 "), 12);
        assert_eq!(parse_votes("12.0"), 12);
        assert_eq!(parse_votes("n/a"), 0);
        assert_eq!(parse_votes("-4"), 0);
        assert_eq!(parse_votes(""), 0);
        assert_eq!(parse_votes("99999999999999999999"), 0);
        assert_eq!(parse_votes("1e30"), 0);
        assert_eq!(parse_votes("18446744073709551615"), u64::MAX);
    }

    #[test]
    fn aliases_resolve_through_header_drift() {
        let text = tsv(&["wake\t01-05\tSheriff\tA SMITH\tDEM\t1,200\tCounty"]);
        let (records, stats) = parse_records(&text, &RowRules::default());
        assert_eq!(stats.rows_kept, 1);
        let r = &records[0];
        assert_eq!(r.county, "WAKE");
        assert_eq!(r.precinct_name, "01-05");
        assert_eq!(r.precinct_code, "");
        assert_eq!(r.contest_title, "Sheriff");
        assert_eq!(r.candidate, "A SMITH");
        assert_eq!(r.party, "DEM");
        assert_eq!(r.votes, 1200);
        assert_eq!(r.scope, ScopeCode::County);
    }

    #[test]
    fn normalized_spelling_is_a_fallback() {
        // None of the raw aliases match, only the normalized forms do.
        let text = "COUNTY\tPRECINCT-CODE\tContest Title\tCANDIDATE\tVote CT\n\
                    DURHAM\t07\tMayor\tX\t9";
        let (records, _) = parse_records(text, &RowRules::default());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].precinct_code, "07");
        assert_eq!(records[0].contest_title, "Mayor");
        assert_eq!(records[0].votes, 9);
    }

    #[test]
    fn incomplete_and_marker_rows_are_counted() {
        let text = tsv(&[
            "\t01\tSheriff\tA\tDEM\t1\t",
            "WAKE\t\tSheriff\tA\tDEM\t1\t",
            "WAKE\t01\t\tA\tDEM\t1\t",
            "WAKE\t01\tSheriff\t\tDEM\t1\t",
            "WAKE\t01\tSheriff\tOVER VOTE\t\t3\t",
            "WAKE\t01\tSheriff\tUnder Vote\t\t3\t",
            "WAKE\t01\tSheriff\tA\tDEM\tabc\t",
            "",
            "WAKE\t02",
        ]);
        let (records, stats) = parse_records(&text, &RowRules::default());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].votes, 0);
        assert_eq!(stats.rows_read, 8);
        assert_eq!(stats.dropped_missing_field, 5);
        assert_eq!(stats.dropped_non_vote, 2);
        assert_eq!(stats.rows_kept, 1);
    }

    #[test]
    fn empty_text_gives_no_rows() {
        let (records, stats) = parse_records("", &RowRules::default());
        assert!(records.is_empty());
        assert_eq!(stats, IngestStats::default());
    }

    #[test]
    fn export_keeps_matching_lines_verbatim() {
        let text = "county\tcontest_title\tvote_ct\n\
                    WAKE\tSheriff\t1\n\
                    WAKE\tMayor\t2\n\
                    \n\
                    DURHAM\tSHERIFF \t3";
        let titles: BTreeSet<String> = ["sheriff".to_string()].into_iter().collect();
        let out = export_rows_for_titles(text, &titles).unwrap();
        assert_eq!(
            out,
            "county\tcontest_title\tvote_ct\nWAKE\tSheriff\t1\nDURHAM\tSHERIFF \t3"
        );
        assert!(export_rows_for_titles("county\tvotes\nWAKE\t1", &titles).is_none());
    }
}
