pub mod builder;
pub mod cell_ref;
pub mod columns;
mod config;
pub mod header;
pub mod roster;
pub mod validation;

use log::{debug, info};

pub use crate::config::*;
use crate::validation::{options_by_column, resolve_rules, RuleContext, ValidationRule};

/// Everything inferred from one sheet, before it is wrapped into a [`FormSchema`].
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct InferredForm {
    pub header_row: usize,
    /// Field names paired with the column they come from.
    pub columns: Vec<(usize, String)>,
    pub rules: Vec<ValidationRule>,
    pub fields: Vec<FieldDefinition>,
}

/// Runs the whole inference over one sheet: header detection, name normalization,
/// validation resolution and field construction.
///
/// Arguments:
/// * `sheet_name` the name of `sheet`, used for references without a sheet prefix
/// * `lookup` the other sheets of the workbook, for cross-sheet references
/// * `validations` the data validations declared on `sheet`
///
/// This never fails. A sheet without any header produces a form without fields.
pub fn infer_form(
    sheet_name: &str,
    sheet: &RawSheet,
    lookup: &dyn SheetLookup,
    validations: &[RawValidation],
    threshold: &HeaderThreshold,
) -> InferredForm {
    let header_row = header::detect_header_row(sheet, threshold);
    let span = sheet.row(header_row).and_then(header::header_span);
    let columns: Vec<(usize, String)> = match span {
        Some((first, last)) => {
            let cells = sheet.row(header_row).map(|r| &r[first..=last]).unwrap_or(&[]);
            columns::normalize_headers(cells)
                .into_iter()
                .enumerate()
                .map(|(i, name)| (first + i, name))
                .collect()
        }
        None => Vec::new(),
    };
    debug!(
        "infer_form: sheet {:?}: header row {}, columns {:?}",
        sheet_name, header_row, columns
    );

    let ctx = RuleContext {
        sheet_name,
        sheet,
        lookup,
        columns: span,
    };
    let rules = resolve_rules(validations, &ctx);
    let options = options_by_column(&rules);
    let fields = builder::build_fields(&columns, &options);
    info!(
        "infer_form: sheet {:?}: {} fields, {} dropdowns",
        sheet_name,
        fields.len(),
        fields.iter().filter(|f| f.is_select()).count()
    );
    InferredForm {
        header_row,
        columns,
        rules,
        fields,
    }
}
