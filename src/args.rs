use clap::{Parser, Subcommand};

/// This is a precinct-level election results program: contest tallies, folders of contests and precinct name
/// reconciliation against a boundary file.
#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// (file path, optional) The JSON configuration file. Paths inside it are relative to its directory.
    #[clap(short, long, global = true, value_parser)]
    pub config: Option<String>,

    /// (file path) The results file. Setting this option overrides the result sources of the configuration.
    #[clap(short, long, global = true, value_parser)]
    pub input: Option<String>,

    /// (tsv, csv or xlsx, default from the file extension) The type of the input.
    #[clap(long, global = true, value_parser)]
    pub input_type: Option<String>,

    /// (default: first worksheet) When using an Excel file, indicates the name of the worksheet to use.
    #[clap(long, global = true, value_parser)]
    pub excel_worksheet_name: Option<String>,

    /// (file path) The GeoJSON boundary file, used to build the precinct names.
    #[clap(short, long, global = true, value_parser)]
    pub boundaries: Option<String>,

    /// (file path) A manifest of precompiled packs, read instead of the results file.
    #[clap(short, long, global = true, value_parser)]
    pub packs: Option<String>,

    /// (file path) The JSON file holding the folders.
    #[clap(short, long, global = true, value_parser)]
    pub folders: Option<String>,

    /// (file path, directory, 'stdout' or empty) Where to write the output. Setting this option overrides
    /// the output directory of the configuration.
    #[clap(short, long, global = true, value_parser)]
    pub out: Option<String>,

    /// (file path) A reference summary in JSON format. If provided, ptally will check that the computed
    /// summary matches the reference.
    #[clap(short, long, global = true, value_parser)]
    pub reference: Option<String>,

    /// If passed as an argument, will turn on verbose logging to the standard output.
    #[clap(long, global = true, takes_value = false)]
    pub verbose: bool,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Lists the contests, merged by title.
    Contests {
        /// (SW, CO or OT) Only the contests of this scope.
        #[clap(long, value_parser)]
        scope: Option<String>,
        /// Only the contests reported in this county.
        #[clap(long, value_parser)]
        county: Option<String>,
        /// Only the contests whose title contains this text.
        #[clap(long, value_parser)]
        search: Option<String>,
    },
    /// Prints the summary of a contest or of a folder.
    Show {
        /// The title of the contest, or its `ID||TITLE` key.
        #[clap(value_parser)]
        contest: Option<String>,
        /// Show this folder instead of a contest.
        #[clap(long, value_parser)]
        folder: Option<String>,
        /// Restricts the totals and the scoreboard to one county.
        #[clap(long, value_parser)]
        county: Option<String>,
        /// (code or name, default code) How boundary precincts are matched for coverage.
        #[clap(long, value_parser)]
        join: Option<String>,
    },
    /// Reports the precincts whose name differs from the boundary file, and applies corrections.
    Reconcile {
        /// (file path) A JSON list of {county, precinctCode, name} corrections to apply.
        #[clap(long, value_parser)]
        corrections: Option<String>,
        /// Corrects every mismatch with the name found in the results.
        #[clap(long, takes_value = false)]
        accept_source: bool,
        /// Writes the boundary file back with the corrected names.
        #[clap(long, takes_value = false)]
        write: bool,
    },
    /// Writes a manifest and one precompiled pack per contest.
    Precompile,
    /// Manages the folders of contests.
    Folder {
        #[clap(subcommand)]
        action: FolderAction,
    },
    /// Writes the result rows of the contests of a folder.
    ExportFolder {
        #[clap(value_parser)]
        name: String,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum FolderAction {
    /// Lists the folders and their contests.
    List,
    /// Creates an empty folder.
    Add {
        #[clap(value_parser)]
        name: String,
    },
    /// Adds contests to a folder, creating it when needed.
    Assign {
        #[clap(value_parser)]
        name: String,
        #[clap(value_parser, required = true)]
        contests: Vec<String>,
    },
    /// Deletes a folder.
    Remove {
        #[clap(value_parser)]
        name: String,
    },
}
