use calamine::{DataType, Range};

use crate::forms::*;

/// `/tmp/uploads/Members List.xlsx` -> `Members List`
pub fn simplify_file_name(path: &str) -> String {
    Path::new(path)
        .file_stem()
        .and_then(|s| s.to_str())
        .map(|s| s.to_string())
        .unwrap_or_else(|| path.to_string())
}

/// The text of a cell, as a respondent would have typed it. Empty cells give `None`.
pub fn cell_to_string(cell: &DataType) -> Option<String> {
    #[allow(unreachable_patterns)]
    match cell {
        DataType::Empty => None,
        DataType::String(s) if s.trim().is_empty() => None,
        DataType::String(s) => Some(s.clone()),
        DataType::Int(i) => Some(i.to_string()),
        DataType::Float(f) => Some(format_number(*f)),
        // Date cells only carry the serial number at this level.
        DataType::DateTime(f) => Some(format_number(*f)),
        DataType::Bool(b) => Some(if *b { "TRUE" } else { "FALSE" }.to_string()),
        DataType::Error(e) => {
            debug!("cell_to_string: dropping error cell {:?}", e);
            None
        }
        _ => None,
    }
}

/// Whole numbers lose their `.0`: a spreadsheet shows `29`, not `29.0`.
pub fn format_number(f: f64) -> String {
    if f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{}", f as i64)
    } else {
        format!("{}", f)
    }
}

/// Lays a calamine range out in absolute coordinates: the rows and columns before the
/// start of the range are padded with empty cells.
pub fn raw_sheet_from_range(range: &Range<DataType>) -> RawSheet {
    let (row_offset, col_offset) = match range.start() {
        Some((r, c)) => (r as usize, c as usize),
        None => return RawSheet::default(),
    };
    let mut rows: Vec<RawRow> = vec![Vec::new(); row_offset];
    for row in range.rows() {
        let mut cells: RawRow = vec![None; col_offset];
        cells.extend(row.iter().map(cell_to_string));
        // Trailing empty cells do not count towards the width.
        while let Some(None) = cells.last() {
            cells.pop();
        }
        rows.push(cells);
    }
    RawSheet::new(rows)
}

/// Which reader handles a file, from its extension.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum InputKind {
    Xlsx,
    Csv,
}

pub fn input_kind(path: &Path) -> FormsResult<InputKind> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase());
    match ext.as_deref() {
        Some("xlsx") | Some("xlsm") => Ok(InputKind::Xlsx),
        Some("csv") | Some("txt") => Ok(InputKind::Csv),
        _ => UnsupportedInputSnafu {
            path: path.display().to_string(),
        }
        .fail(),
    }
}
