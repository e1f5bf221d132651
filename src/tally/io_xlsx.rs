use crate::tally::*;

use calamine::{open_workbook, DataType, Reader, Xlsx};
use precinct_tally::rows::RawTable;

/// Reads the results from a worksheet (the first one by default). The first
/// row is the header.
pub fn read_excel_file(path: &str, worksheet: Option<&str>) -> BTallyResult<RawTable> {
    let mut workbook: Xlsx<_> = open_workbook(path).context(OpeningExcelSnafu { path })?;
    let sheet = worksheet.unwrap_or("(first)");
    let wrange = match worksheet {
        Some(name) => workbook.worksheet_range(name),
        None => workbook.worksheet_range_at(0),
    }
    .context(EmptyExcelSnafu { path, sheet })?
    .context(OpeningExcelSnafu { path })?;

    let mut iter = wrange.rows();
    let header: Vec<String> = iter
        .next()
        .context(EmptyExcelSnafu { path, sheet })?
        .iter()
        .map(cell_text)
        .collect();
    debug!("read_excel_file: header: {:?}", header);
    let rows: Vec<Vec<String>> = iter.map(|row| row.iter().map(cell_text).collect()).collect();
    info!(
        "read_excel_file: {} sheet {}: {} rows",
        simplify_file_name(path),
        sheet,
        rows.len()
    );
    Ok(RawTable::new(header, rows))
}

/// Renders a cell as the text a delimited export would contain. Whole
/// numbers stored as floats lose their decimal part, so that codes such as
/// `12` do not become `12.0`.
fn cell_text(cell: &DataType) -> String {
    match cell {
        DataType::String(s) => s.trim().to_string(),
        DataType::Int(i) => i.to_string(),
        DataType::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        DataType::Float(f) => f.to_string(),
        DataType::Bool(b) => b.to_string(),
        DataType::DateTime(f) => f.to_string(),
        DataType::Empty => String::new(),
        other => {
            debug!("cell_text: unreadable cell {:?}", other);
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cells_render_as_text() {
        assert_eq!(cell_text(&DataType::String(" WAKE ".to_string())), "WAKE");
        assert_eq!(cell_text(&DataType::Float(12.0)), "12");
        assert_eq!(cell_text(&DataType::Float(1.5)), "1.5");
        assert_eq!(cell_text(&DataType::Int(7)), "7");
        assert_eq!(cell_text(&DataType::Empty), "");
    }

    #[test]
    fn missing_workbook() {
        let err = read_excel_file("/nonexistent/results.xlsx", None).unwrap_err();
        assert!(matches!(*err, TallyError::OpeningExcel { .. }));
    }
}
