use log::{debug, info, warn};

use precinct_tally::pack::{build_packs, safe_filename};
use precinct_tally::reconcile::accept_source_names;
use precinct_tally::report::{summarize, JoinField, View};
use precinct_tally::rows::RawTable;
use precinct_tally::session::{ContestFilter, Session};
use precinct_tally::*;
use snafu::{prelude::*, Snafu};

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::json;
use serde_json::Value as JSValue;
use text_diff::print_diff;

use crate::args::{Args, Command, FolderAction};
use crate::tally::config_reader::*;
use crate::tally::folders::FolderStore;
use crate::tally::io_common::*;
use crate::tally::io_geojson::BoundaryFile;
use crate::tally::io_packs::{read_packs, write_packs};
use crate::tally::io_tsv::{export_rows, read_delimited_file};
use crate::tally::io_xlsx::read_excel_file;

mod config_reader;
mod folders;
mod io_common;
mod io_geojson;
mod io_packs;
mod io_tsv;
mod io_xlsx;

#[derive(Debug, Snafu)]
pub enum TallyError {
    #[snafu(display("Error opening file {path}"))]
    OpeningFile {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Error writing file {path}"))]
    WritingFile {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Error parsing the JSON file {path}"))]
    ParsingJson {
        source: serde_json::Error,
        path: String,
    },
    #[snafu(display("Error serializing to JSON"))]
    SerializingJson { source: serde_json::Error },
    #[snafu(display("Error opening the Excel file {path}"))]
    OpeningExcel {
        source: calamine::XlsxError,
        path: String,
    },
    #[snafu(display("No worksheet {sheet} or empty worksheet in {path}"))]
    EmptyExcel { path: String, sheet: String },
    #[snafu(display("Unknown result provider {provider:?} (expected tsv, csv or xlsx)"))]
    UnsupportedProvider { provider: String },
    #[snafu(display("No FeatureCollection in the boundary file {path}"))]
    InvalidBoundaries { path: String },
    #[snafu(display("Invalid precompiled pack"))]
    InvalidPack { source: TallyErrors },
    #[snafu(display("Missing configuration: {what}"))]
    MissingConfig { what: String },
    #[snafu(display("Invalid value {value:?} for {option}"))]
    InvalidOption { option: String, value: String },
    #[snafu(display("No contest matches {key:?}"))]
    UnknownContest { key: String },
    #[snafu(display("No folder named {name:?}"))]
    UnknownFolder { name: String },
    #[snafu(display("None of the contests of folder {name:?} is loaded"))]
    EmptyFolder { name: String },
    #[snafu(display("No results loaded"))]
    NoData {},
    #[snafu(display("Difference detected between the computed summary and the reference {path}"))]
    ReferenceMismatch { path: String },

    #[snafu(whatever, display("{message}"))]
    Whatever {
        message: String,
        #[snafu(source(from(Box<dyn std::error::Error>, Some)))]
        source: Option<Box<dyn std::error::Error>>,
    },
}

pub type TallyResult<T> = Result<T, TallyError>;
pub type BTallyResult<T> = Result<T, Box<TallyError>>;

/// A session with the boundary file loaded, when there is one.
fn new_session(settings: &Settings) -> BTallyResult<(Session, Option<BoundaryFile>)> {
    let mut session = Session::new(settings.rules.clone());
    let boundaries = match settings.boundaries.as_ref() {
        Some(b) => {
            let file = BoundaryFile::read(b)?;
            session.load_boundaries(&file.features());
            Some(file)
        }
        None => None,
    };
    Ok((session, boundaries))
}

fn load_sources(settings: &Settings, session: &mut Session) -> BTallyResult<IngestStats> {
    if settings.sources.is_empty() {
        return MissingConfigSnafu {
            what: "a results file (--input or resultSources)",
        }
        .fail()
        .map_err(Box::new);
    }
    let mut tables: Vec<RawTable> = Vec::new();
    for source in settings.sources.iter() {
        info!("load_sources: reading {}", source.file_path);
        let table = match source.provider.as_str() {
            "tsv" | "csv" => read_delimited_file(&source.file_path, &source.provider)?,
            "xlsx" => read_excel_file(&source.file_path, source.excel_worksheet_name.as_deref())?,
            x => {
                return UnsupportedProviderSnafu { provider: x }
                    .fail()
                    .map_err(Box::new)
            }
        };
        tables.push(table);
    }
    let stats = session.load_tables(tables.iter());
    info!(
        "load_sources: {} rows read, {} kept, {} missing a field, {} non-votes",
        stats.rows_read, stats.rows_kept, stats.dropped_missing_field, stats.dropped_non_vote
    );
    Ok(stats)
}

/// Loads the packs of the manifest when one is set, and the result sources
/// otherwise.
fn load_session(settings: &Settings) -> BTallyResult<(Session, Option<BoundaryFile>)> {
    let (mut session, boundaries) = new_session(settings)?;
    match settings.manifest.as_deref() {
        Some(manifest) => {
            let (_, packs) = read_packs(manifest)?;
            session.load_packs(packs.iter()).context(InvalidPackSnafu {})?;
        }
        None => {
            load_sources(settings, &mut session)?;
        }
    }
    info!("load_session: {} contests", session.contests().len());
    Ok((session, boundaries))
}

fn to_pretty(js: &JSValue) -> BTallyResult<String> {
    let res = serde_json::to_string_pretty(js).context(SerializingJsonSnafu {})?;
    Ok(res)
}

/// Compares the computed summary with a reference summary, if provided.
fn check_reference(reference: Option<&str>, computed: &str) -> BTallyResult<()> {
    let path = match reference {
        Some(p) => p,
        None => return Ok(()),
    };
    let text = read_text(Path::new(path))?;
    let reference_js: JSValue = serde_json::from_str(&text).context(ParsingJsonSnafu { path })?;
    let expected = to_pretty(&reference_js)?;
    if expected != computed {
        warn!("check_reference: found differences with the reference summary");
        print_diff(expected.as_str(), computed, "\n");
        return ReferenceMismatchSnafu { path }.fail().map_err(Box::new);
    }
    info!("check_reference: summary matches {}", path);
    Ok(())
}

fn read_folders(settings: &Settings) -> BTallyResult<(PathBuf, FolderStore)> {
    let path = settings.folders.clone().context(MissingConfigSnafu {
        what: "a folder file (--folders or folders.filePath)",
    })?;
    let store = FolderStore::read(&path)?;
    Ok((path, store))
}

fn folder_keys(settings: &Settings, name: &str) -> BTallyResult<Vec<String>> {
    let (_, store) = read_folders(settings)?;
    let keys = store.get(name).context(UnknownFolderSnafu { name })?;
    Ok(keys.to_vec())
}

fn run_contests(settings: &Settings, scope: Option<&str>, county: Option<&str>, search: Option<&str>) -> BTallyResult<()> {
    let scope = match scope {
        Some(s) => Some(ScopeCode::from_code(s).context(InvalidOptionSnafu {
            option: "--scope",
            value: s,
        })?),
        None => None,
    };
    let filter = ContestFilter {
        scope,
        county: county.map(|c| c.to_string()),
        search: search.map(|s| s.to_string()),
    };
    let (session, _) = load_session(settings)?;
    let contests = session.list_contests(&filter);
    info!("run_contests: {} of {} contests", contests.len(), session.contests().len());
    let js = json!({
        "count": contests.len(),
        "contests": contests,
    });
    write_output(settings.output_target("contests.json").as_deref(), &to_pretty(&js)?)
}

fn run_show(
    settings: &Settings,
    contest: Option<&str>,
    folder: Option<&str>,
    county: Option<&str>,
    join: Option<&str>,
) -> BTallyResult<()> {
    let join = match join {
        Some(j) => JoinField::parse(j).context(InvalidOptionSnafu {
            option: "--join",
            value: j,
        })?,
        None => JoinField::Code,
    };
    let (session, _) = load_session(settings)?;
    let set = session.aggregates().context(NoDataSnafu {})?;
    let folder_agg;
    let view = match (folder, contest) {
        (Some(name), _) => {
            let keys = folder_keys(settings, name)?;
            folder_agg = session.combine_folder(&keys).context(EmptyFolderSnafu { name })?;
            if !folder_agg.unresolved.is_empty() {
                warn!(
                    "run_show: folder {}: not loaded: {:?}",
                    name, folder_agg.unresolved
                );
            }
            View::Folder(&folder_agg)
        }
        (None, Some(key)) => {
            let c = session.contest(key).context(UnknownContestSnafu { key })?;
            View::Contest { set, contest: c }
        }
        (None, None) => {
            return MissingConfigSnafu {
                what: "a contest or --folder",
            }
            .fail()
            .map_err(Box::new)
        }
    };
    let summary = summarize(&view, session.identity(), join, county);
    debug!("run_show: {} precinct rows", summary.precincts.len());
    let js = json!({
        "config": {"electionName": settings.election_name},
        "ingest": session.stats(),
        "summary": summary,
    });
    let pretty = to_pretty(&js)?;
    let default_name = format!("{}.json", safe_filename(view.title()));
    write_output(settings.output_target(&default_name).as_deref(), &pretty)?;
    check_reference(settings.reference.as_deref(), &pretty)
}

fn run_reconcile(settings: &Settings, corrections: Option<&str>, accept_source: bool, write: bool) -> BTallyResult<()> {
    if settings.boundaries.is_none() {
        return MissingConfigSnafu {
            what: "a boundary file (--boundaries or boundaries.filePath)",
        }
        .fail()
        .map_err(Box::new);
    }
    let (mut session, boundaries) = load_session(settings)?;
    if session.records().is_empty() {
        warn!("run_reconcile: no result rows loaded, nothing to compare");
    }
    let mismatches = session.mismatches();
    let unmatched = session.unmatched_precincts();
    info!(
        "run_reconcile: {} mismatches, {} precincts not in the boundary file",
        mismatches.len(),
        unmatched.len()
    );

    let mut corrected: BTreeMap<PrecinctRef, String> = BTreeMap::new();
    if accept_source {
        corrected.extend(accept_source_names(&mismatches));
    }
    // Explicit corrections win over the source names.
    if let Some(path) = corrections {
        corrected.extend(read_corrections(path)?);
    }
    let outcome = session.apply_corrections(&corrected);
    let remaining = session.mismatches();
    info!(
        "run_reconcile: {} names updated, {} mismatches remaining",
        outcome.updated_count,
        remaining.len()
    );

    if write {
        if let (Some(mut file), Some(index), Some(b)) =
            (boundaries, session.identity(), settings.boundaries.as_ref())
        {
            let renamed = file.apply_names(index);
            let source = PathBuf::from(&b.file_path);
            let target = match (settings.output_dir(), source.file_name()) {
                (Some(dir), Some(name)) => dir.join(name),
                _ => source.clone(),
            };
            info!("run_reconcile: {} features renamed in {}", renamed, target.display());
            file.write(&target)?;
        }
    }

    let js = json!({
        "mismatches": mismatches,
        "unmatched": unmatched,
        "updatedCount": outcome.updated_count,
        "remaining": remaining,
    });
    write_output(settings.output_target("reconcile.json").as_deref(), &to_pretty(&js)?)
}

fn run_precompile(settings: &Settings) -> BTallyResult<()> {
    let dir = settings.output_dir().context(MissingConfigSnafu {
        what: "an output directory (--out or outputSettings.outputDirectory)",
    })?;
    let (mut session, _) = new_session(settings)?;
    load_sources(settings, &mut session)?;
    let set = session.aggregates().context(NoDataSnafu {})?;
    let generated_from: Vec<String> = settings
        .sources
        .iter()
        .map(|s| simplify_file_name(&s.file_path))
        .collect();
    let (manifest, packs) = build_packs(set, &generated_from.join(","));
    let manifest_path = write_packs(&dir, &manifest, &packs)?;
    info!(
        "run_precompile: {} contests, manifest {}",
        manifest.contest_count,
        manifest_path.display()
    );
    Ok(())
}

fn run_folder(settings: &Settings, action: &FolderAction) -> BTallyResult<()> {
    let (path, mut store) = read_folders(settings)?;
    match action {
        FolderAction::List => {
            info!("run_folder: {} folders", store.names().count());
            let js = serde_json::to_value(&store).context(SerializingJsonSnafu {})?;
            return write_output(settings.output_target("folders.json").as_deref(), &to_pretty(&js)?);
        }
        FolderAction::Add { name } => {
            if !store.add(name) {
                warn!("run_folder: folder {} already exists", name);
            }
        }
        FolderAction::Assign { name, contests } => {
            let added = store.assign(name, contests);
            info!("run_folder: {} contests added to {}", added, name);
        }
        FolderAction::Remove { name } => {
            if !store.remove(name) {
                return UnknownFolderSnafu { name }.fail().map_err(Box::new);
            }
        }
    }
    store.write(&path)
}

fn run_export_folder(settings: &Settings, name: &str) -> BTallyResult<()> {
    let keys = folder_keys(settings, name)?;
    let (session, _) = load_session(settings)?;
    let folder = session.combine_folder(&keys).context(EmptyFolderSnafu { name })?;
    let titles: BTreeSet<String> = folder.contests.iter().map(|c| c.title.clone()).collect();
    debug!("run_export_folder: titles: {:?}", titles);

    let mut paths: Vec<&str> = Vec::new();
    for source in settings.sources.iter() {
        if source.provider == "tsv" {
            paths.push(source.file_path.as_str());
        } else {
            warn!(
                "run_export_folder: {} is not tab-delimited, skipping",
                source.file_path
            );
        }
    }
    let rows = export_rows(&paths, &titles)?.context(MissingConfigSnafu {
        what: "a tab-delimited results file with a contest_title column",
    })?;
    let default_name = format!("{}.txt", name.split_whitespace().collect::<Vec<_>>().join("_"));
    write_output(settings.output_target(&default_name).as_deref(), &rows)
}

pub fn run(args: &Args) -> BTallyResult<()> {
    let settings = settings(args)?;
    match &args.command {
        Command::Contests {
            scope,
            county,
            search,
        } => run_contests(&settings, scope.as_deref(), county.as_deref(), search.as_deref()),
        Command::Show {
            contest,
            folder,
            county,
            join,
        } => run_show(
            &settings,
            contest.as_deref(),
            folder.as_deref(),
            county.as_deref(),
            join.as_deref(),
        ),
        Command::Reconcile {
            corrections,
            accept_source,
            write,
        } => run_reconcile(&settings, corrections.as_deref(), *accept_source, *write),
        Command::Precompile => run_precompile(&settings),
        Command::Folder { action } => run_folder(&settings, action),
        Command::ExportFolder { name } => run_export_folder(&settings, name),
    }
}
