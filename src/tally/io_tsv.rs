use crate::tally::*;

use precinct_tally::rows::{export_rows_for_titles, RawTable};
use std::collections::BTreeSet;

/// Reads a delimited results file (`tsv` or `csv`).
pub fn read_delimited_file(path: &str, provider: &str) -> BTallyResult<RawTable> {
    let text = read_text(Path::new(path))?;
    let delimiter = if provider == "csv" { b',' } else { b'\t' };
    let table = RawTable::from_delimited(&text, delimiter);
    info!(
        "read_delimited_file: {}: {} columns, {} rows",
        simplify_file_name(path),
        table.header.len(),
        table.len()
    );
    debug!("read_delimited_file: header: {:?}", table.header);
    Ok(table)
}

/// The header of the first file followed by the matching lines of every
/// file. `None` when no file has a `contest_title` column.
pub fn export_rows(paths: &[&str], titles: &BTreeSet<String>) -> BTallyResult<Option<String>> {
    let mut res: Option<String> = None;
    for path in paths.iter() {
        let text = read_text(Path::new(path))?;
        match export_rows_for_titles(&text, titles) {
            Some(rows) => {
                res = Some(match res {
                    None => rows,
                    Some(acc) => {
                        let body: Vec<&str> = rows.lines().skip(1).collect();
                        if body.is_empty() {
                            acc
                        } else {
                            format!("{}\n{}", acc, body.join("\n"))
                        }
                    }
                });
            }
            None => {
                warn!("export_rows: no contest_title column in {}, skipping", path);
            }
        }
    }
    Ok(res)
}
