use crate::tally::*;

use precinct_tally::pack::{ContestPack, Manifest};

/// Writes `manifest.json` and the packs under `contests/` of the directory.
/// Returns the path of the manifest.
pub fn write_packs(dir: &Path, manifest: &Manifest, packs: &[(String, ContestPack)]) -> BTallyResult<PathBuf> {
    let contests_dir = dir.join("contests");
    for (file, pack) in packs.iter() {
        let contents = serde_json::to_string(pack).context(SerializingJsonSnafu {})?;
        write_text(&contests_dir.join(file), &contents)?;
    }
    let manifest_path = contests_dir.join("manifest.json");
    let contents = serde_json::to_string_pretty(manifest).context(SerializingJsonSnafu {})?;
    write_text(&manifest_path, &contents)?;
    info!(
        "write_packs: {} packs in {}",
        packs.len(),
        contests_dir.display()
    );
    Ok(manifest_path)
}

/// Reads a manifest and the packs it lists, from the manifest's directory.
/// A listed pack that is missing is skipped with a warning.
pub fn read_packs(manifest_path: &Path) -> BTallyResult<(Manifest, Vec<ContestPack>)> {
    let display = manifest_path.display().to_string();
    let text = read_text(manifest_path)?;
    let manifest: Manifest = serde_json::from_str(&text).context(ParsingJsonSnafu {
        path: display.as_str(),
    })?;
    let root = manifest_path.parent();
    let mut packs: Vec<ContestPack> = Vec::new();
    for entry in manifest.contests.iter() {
        let path = resolve_path(root, &entry.file);
        if !path.exists() {
            warn!("read_packs: missing pack {} for {}", path.display(), entry.key);
            continue;
        }
        let text = read_text(&path)?;
        let pack: ContestPack = serde_json::from_str(&text).context(ParsingJsonSnafu {
            path: path.display().to_string(),
        })?;
        debug!("read_packs: {}: {} precincts", entry.key, pack.precinct_agg.len());
        packs.push(pack);
    }
    info!(
        "read_packs: {}: {} of {} packs",
        simplify_file_name(&display),
        packs.len(),
        manifest.contest_count
    );
    Ok((manifest, packs))
}
