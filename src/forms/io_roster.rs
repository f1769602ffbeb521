// Reading of member lists, to seed the roster of a form.

use form_inference::columns::normalize_headers;
use form_inference::header::{detect_header_row, header_span};

use crate::forms::config_reader::Settings;
use crate::forms::io_common::{input_kind, InputKind};
use crate::forms::io_csv::read_csv_sheet;
use crate::forms::io_xlsx::Workbook;
use crate::forms::*;

/// One expected respondent, as read from a member list.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Member {
    pub name: String,
    pub contact: Option<String>,
}

/// Reads the members listed in a spreadsheet (the active sheet of an xlsx file, or a
/// CSV file). The name and contact columns are the first header cells that contain one
/// of the configured hints.
pub fn read_members(path: &Path, settings: &Settings) -> FormsResult<Vec<Member>> {
    let sheet = match input_kind(path)? {
        InputKind::Xlsx => {
            let wb = Workbook::read_file(path)?;
            let name = wb.resolve_sheet_name(None)?;
            wb.sheet(&name).cloned().unwrap_or_default()
        }
        InputKind::Csv => read_csv_sheet(path)?,
    };
    members_from_sheet(&sheet, &path.display().to_string(), settings)
}

fn find_column(columns: &[(usize, String)], hints: &[String], skip: Option<usize>) -> Option<usize> {
    columns
        .iter()
        .filter(|(idx, _)| Some(*idx) != skip)
        .find(|(_, name)| {
            let lower = name.to_lowercase();
            hints.iter().any(|h| lower.contains(h.as_str()))
        })
        .map(|(idx, _)| *idx)
}

// Member lists only have one or two columns, so their header row is found by the
// name hints rather than by the number of cells.
const HEADER_SCAN_ROWS: usize = 20;

/// The normalized header cells of a row, with their column indexes.
fn header_columns(sheet: &RawSheet, row: usize) -> Vec<(usize, String)> {
    match sheet.row(row).and_then(header_span) {
        Some((first, last)) => {
            let cells = sheet.row(row).map(|r| &r[first..=last]).unwrap_or(&[]);
            normalize_headers(cells)
                .into_iter()
                .enumerate()
                .map(|(i, n)| (first + i, n))
                .collect()
        }
        None => Vec::new(),
    }
}

/// The widest of the first rows that has a column matching a name hint; the earliest
/// one on ties. Without such a row, the header is detected like the header of a form.
fn roster_header_row(sheet: &RawSheet, settings: &Settings) -> usize {
    let mut best: Option<(usize, usize)> = None;
    for row in 0..sheet.row_count().min(HEADER_SCAN_ROWS) {
        let columns = header_columns(sheet, row);
        if find_column(&columns, &settings.name_hints, None).is_none() {
            continue;
        }
        if best.map_or(true, |(_, width)| columns.len() > width) {
            best = Some((row, columns.len()));
        }
    }
    match best {
        Some((row, _)) => row,
        None => detect_header_row(sheet, &settings.header),
    }
}

pub fn members_from_sheet(
    sheet: &RawSheet,
    label: &str,
    settings: &Settings,
) -> FormsResult<Vec<Member>> {
    let header_row = roster_header_row(sheet, settings);
    let columns = header_columns(sheet, header_row);
    let name_col = find_column(&columns, &settings.name_hints, None).context(
        MissingRosterColumnSnafu {
            path: label,
            columns: columns.iter().map(|(_, n)| n.clone()).collect::<Vec<String>>(),
        },
    )?;
    let contact_col = find_column(&columns, &settings.contact_hints, Some(name_col));
    debug!(
        "members_from_sheet: {}: header row {}, name column {}, contact column {:?}",
        label, header_row, name_col, contact_col
    );

    let mut res: Vec<Member> = Vec::new();
    for row in (header_row + 1)..sheet.row_count() {
        let name = match sheet.cell(row, name_col) {
            Some(n) => n.to_string(),
            None => continue,
        };
        let contact = contact_col.and_then(|c| sheet.cell(row, c)).map(|c| c.to_string());
        res.push(Member { name, contact });
    }
    info!("members_from_sheet: {}: {} members", label, res.len());
    Ok(res)
}
