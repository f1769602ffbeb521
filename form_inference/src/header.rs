use log::debug;

use crate::config::*;

/// Finds the header row of a sheet.
///
/// Exports often start with a title, a logo or some merged cells before the actual
/// header, so the first row is not reliable. The sheet is scanned from the top and the
/// first row that passes the threshold is returned. Falls back to row 0.
pub fn detect_header_row(sheet: &RawSheet, threshold: &HeaderThreshold) -> usize {
    let width = sheet.width();
    for (idx, row) in sheet.rows().iter().enumerate() {
        let non_empty = row.iter().filter(|c| !is_blank(c)).count();
        if threshold.accepts(non_empty, width) {
            debug!(
                "detect_header_row: row {} has {} non-empty cells (width {})",
                idx, non_empty, width
            );
            return idx;
        }
    }
    debug!(
        "detect_header_row: no row passed {:?}, falling back to row 0",
        threshold
    );
    0
}

/// The first and last columns of a row that hold a non-blank value.
pub fn header_span(row: &RawRow) -> Option<(usize, usize)> {
    let first = row.iter().position(|c| !is_blank(c))?;
    let last = row.iter().rposition(|c| !is_blank(c))?;
    Some((first, last))
}
