use crate::args::Args;
use crate::tally::*;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Eq, PartialEq, Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputSettings {
    #[serde(rename = "outputDirectory")]
    pub output_directory: Option<String>,
    #[serde(rename = "electionName")]
    pub election_name: Option<String>,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct ResultSource {
    /// tsv, csv or xlsx
    pub provider: String,
    #[serde(rename = "filePath")]
    pub file_path: String,
    #[serde(rename = "excelWorksheetName")]
    pub excel_worksheet_name: Option<String>,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct BoundarySettings {
    #[serde(rename = "filePath")]
    pub file_path: String,
    #[serde(rename = "countyProperty")]
    pub county_property: Option<String>,
    #[serde(rename = "codeProperty")]
    pub code_property: Option<String>,
    #[serde(rename = "nameProperty")]
    pub name_property: Option<String>,
}

impl BoundarySettings {
    pub fn county_property(&self) -> &str {
        self.county_property.as_deref().unwrap_or("county_nam")
    }

    pub fn code_property(&self) -> &str {
        self.code_property.as_deref().unwrap_or("prec_id")
    }

    pub fn name_property(&self) -> &str {
        self.name_property.as_deref().unwrap_or("enr_desc")
    }
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct PackSettings {
    #[serde(rename = "manifestPath")]
    pub manifest_path: String,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct FolderSettings {
    #[serde(rename = "filePath")]
    pub file_path: String,
}

#[derive(Eq, PartialEq, Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleSettings {
    #[serde(rename = "overvoteLabel")]
    pub overvote_label: Option<String>,
    #[serde(rename = "undervoteLabel")]
    pub undervote_label: Option<String>,
    #[serde(rename = "nonVoteMarkers")]
    pub non_vote_markers: Option<Vec<String>>,
    /// Scope token to SW, CO or OT.
    #[serde(rename = "scopeOverrides")]
    pub scope_overrides: Option<BTreeMap<String, String>>,
}

impl RuleSettings {
    pub fn row_rules(&self) -> TallyResult<RowRules> {
        let mut markers: Vec<String> = vec![
            self.overvote_label
                .clone()
                .unwrap_or_else(|| "OVER VOTE".to_string()),
            self.undervote_label
                .clone()
                .unwrap_or_else(|| "UNDER VOTE".to_string()),
        ];
        markers.extend(self.non_vote_markers.iter().flatten().cloned());
        let mut rules = RowRules {
            non_vote_markers: markers,
            ..Default::default()
        };
        for (token, code) in self.scope_overrides.iter().flatten() {
            match ScopeCode::from_code(code) {
                Some(scope) => {
                    rules.scope_overrides.insert(token.clone(), scope);
                }
                None => whatever!(
                    "scopeOverrides: unknown scope {:?} for {:?} (expected SW, CO or OT)",
                    code,
                    token
                ),
            }
        }
        Ok(rules)
    }
}

#[derive(Eq, PartialEq, Debug, Clone, Default, Serialize, Deserialize)]
pub struct TallyConfig {
    #[serde(rename = "outputSettings")]
    pub output_settings: Option<OutputSettings>,
    #[serde(rename = "resultSources", default)]
    pub result_sources: Vec<ResultSource>,
    pub boundaries: Option<BoundarySettings>,
    pub packs: Option<PackSettings>,
    pub folders: Option<FolderSettings>,
    pub rules: Option<RuleSettings>,
}

pub fn read_config(path: &str) -> BTallyResult<TallyConfig> {
    let contents = fs::read_to_string(path).context(OpeningFileSnafu { path })?;
    let config: TallyConfig =
        serde_json::from_str(contents.as_str()).context(ParsingJsonSnafu { path })?;
    debug!("read_config: {:?}", config);
    Ok(config)
}

/// Everything a command needs, once the configuration file and the command
/// line have been combined. Paths are resolved.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Settings {
    pub election_name: String,
    pub sources: Vec<ResultSource>,
    pub boundaries: Option<BoundarySettings>,
    pub manifest: Option<PathBuf>,
    pub folders: Option<PathBuf>,
    pub rules: RowRules,
    /// From the command line: a file, a directory or `stdout`.
    pub out: Option<String>,
    pub output_directory: Option<PathBuf>,
    pub reference: Option<String>,
}

impl Settings {
    /// Where a command writes its main output. `None` means stdout.
    pub fn output_target(&self, default_name: &str) -> Option<PathBuf> {
        match self.out.as_deref() {
            Some("stdout") | Some("") => None,
            Some(p) => Some(PathBuf::from(p)),
            None => self
                .output_directory
                .as_ref()
                .map(|dir| dir.join(default_name)),
        }
    }

    /// The directory for commands that write several files.
    pub fn output_dir(&self) -> Option<PathBuf> {
        match self.out.as_deref() {
            Some("stdout") | Some("") => None,
            Some(p) => Some(PathBuf::from(p)),
            None => self.output_directory.clone(),
        }
    }
}

fn provider_for(path: &str, input_type: Option<&str>) -> String {
    match input_type {
        Some(t) => t.trim().to_lowercase(),
        None => match Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .as_deref()
        {
            Some("xlsx") => "xlsx".to_string(),
            Some("csv") => "csv".to_string(),
            _ => "tsv".to_string(),
        },
    }
}

/// Combines the configuration file (when given) with the command line,
/// which takes precedence.
pub fn settings(args: &Args) -> BTallyResult<Settings> {
    let (config, root): (TallyConfig, Option<PathBuf>) = match args.config.as_deref() {
        Some(path) => {
            let config = read_config(path)?;
            let root = Path::new(path).parent().map(|p| p.to_path_buf());
            (config, root)
        }
        None => (TallyConfig::default(), None),
    };
    let root = root.as_deref();
    let output_settings = config.output_settings.clone().unwrap_or_default();

    let sources: Vec<ResultSource> = match args.input.as_deref() {
        Some(input) => vec![ResultSource {
            provider: provider_for(input, args.input_type.as_deref()),
            file_path: input.to_string(),
            excel_worksheet_name: args.excel_worksheet_name.clone(),
        }],
        None => config
            .result_sources
            .iter()
            .map(|s| ResultSource {
                provider: s.provider.trim().to_lowercase(),
                file_path: resolve_path(root, &s.file_path).display().to_string(),
                excel_worksheet_name: args
                    .excel_worksheet_name
                    .clone()
                    .or_else(|| s.excel_worksheet_name.clone()),
            })
            .collect(),
    };

    let boundaries = match (args.boundaries.as_deref(), config.boundaries.as_ref()) {
        (Some(p), Some(b)) => Some(BoundarySettings {
            file_path: p.to_string(),
            ..b.clone()
        }),
        (Some(p), None) => Some(BoundarySettings {
            file_path: p.to_string(),
            county_property: None,
            code_property: None,
            name_property: None,
        }),
        (None, Some(b)) => Some(BoundarySettings {
            file_path: resolve_path(root, &b.file_path).display().to_string(),
            ..b.clone()
        }),
        (None, None) => None,
    };

    let manifest = match args.packs.as_deref() {
        Some(p) => Some(PathBuf::from(p)),
        None => config
            .packs
            .as_ref()
            .map(|p| resolve_path(root, &p.manifest_path)),
    };
    let folders = match args.folders.as_deref() {
        Some(p) => Some(PathBuf::from(p)),
        None => config
            .folders
            .as_ref()
            .map(|f| resolve_path(root, &f.file_path)),
    };
    let rules = config.rules.clone().unwrap_or_default().row_rules()?;

    let res = Settings {
        election_name: output_settings
            .election_name
            .clone()
            .unwrap_or_else(|| "election".to_string()),
        sources,
        boundaries,
        manifest,
        folders,
        rules,
        out: args.out.clone(),
        output_directory: output_settings
            .output_directory
            .as_deref()
            .map(|p| resolve_path(root, p)),
        reference: args.reference.clone(),
    };
    info!("settings: {:?}", res);
    Ok(res)
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct Correction {
    pub county: String,
    #[serde(rename = "precinctCode")]
    pub precinct_code: String,
    pub name: String,
}

/// Reads a JSON list of corrected precinct names.
pub fn read_corrections(path: &str) -> BTallyResult<BTreeMap<PrecinctRef, String>> {
    let contents = fs::read_to_string(path).context(OpeningFileSnafu { path })?;
    let corrections: Vec<Correction> =
        serde_json::from_str(contents.as_str()).context(ParsingJsonSnafu { path })?;
    info!(
        "read_corrections: {} corrections in {}",
        corrections.len(),
        path
    );
    Ok(corrections
        .into_iter()
        .map(|c| (PrecinctRef::new(&c.county, &c.precinct_code), c.name))
        .collect())
}
