use crate::tally::*;

pub fn simplify_file_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(path)
        .to_string()
}

/// Relative paths are taken from `root` (the directory of the configuration
/// file) when there is one.
pub fn resolve_path(root: Option<&Path>, path: &str) -> PathBuf {
    let p = Path::new(path);
    match root {
        Some(r) if p.is_relative() => r.join(p),
        _ => p.to_path_buf(),
    }
}

/// Reads a text file. Invalid UTF-8 sequences are replaced rather than
/// rejected: some published result files mix encodings.
pub fn read_text(path: &Path) -> BTallyResult<String> {
    let display = path.display().to_string();
    let bytes = fs::read(path).context(OpeningFileSnafu { path: display })?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

pub fn write_text(path: &Path, contents: &str) -> BTallyResult<()> {
    let display = path.display().to_string();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).context(WritingFileSnafu {
            path: parent.display().to_string(),
        })?;
    }
    fs::write(path, contents).context(WritingFileSnafu { path: display.clone() })?;
    info!("write_text: wrote {}", display);
    Ok(())
}

/// Writes to the target file, or to stdout when there is none.
pub fn write_output(target: Option<&Path>, contents: &str) -> BTallyResult<()> {
    match target {
        Some(p) => write_text(p, contents),
        None => {
            println!("{}", contents);
            Ok(())
        }
    }
}
