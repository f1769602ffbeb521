// Primitives for reading CSV files.

use std::io::Read;

use csv::ReaderBuilder;

use crate::forms::*;

/// Reads a CSV file as a raw sheet. Nothing is assumed about headers: the first line is
/// row 0, and lines may have different lengths.
pub fn read_csv_sheet(path: &Path) -> FormsResult<RawSheet> {
    let file = fs::File::open(path).context(IoSnafu {
        path: path.display().to_string(),
    })?;
    csv_sheet_from_reader(file, &path.display().to_string())
}

pub fn csv_sheet_from_reader<R: Read>(rdr: R, label: &str) -> FormsResult<RawSheet> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(rdr);
    let mut rows: Vec<RawRow> = Vec::new();
    for record in reader.records() {
        let record = record.context(CsvReadSnafu { path: label })?;
        let mut row: RawRow = record
            .iter()
            .map(|s| {
                if s.trim().is_empty() {
                    None
                } else {
                    Some(s.to_string())
                }
            })
            .collect();
        while let Some(None) = row.last() {
            row.pop();
        }
        rows.push(row);
    }
    debug!("csv_sheet_from_reader: {}: {} rows", label, rows.len());
    Ok(RawSheet::new(rows))
}
