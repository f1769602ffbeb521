use std::collections::{BTreeMap, BTreeSet};

use log::{debug, warn};

use crate::cell_ref::*;
use crate::config::*;

/// A list validation, resolved to its options and to the columns it governs.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct ValidationRule {
    pub affected_column_indexes: BTreeSet<usize>,
    pub kind: RuleKind,
    pub raw_formula: String,
    pub resolved_options: Vec<String>,
}

/// Where the rules are evaluated: the sheet that holds them and its header columns.
#[derive(Clone, Copy)]
pub struct RuleContext<'a> {
    pub sheet_name: &'a str,
    pub sheet: &'a RawSheet,
    pub lookup: &'a dyn SheetLookup,
    /// First and last column of the detected header, inclusive.
    pub columns: Option<(usize, usize)>,
}

/// Resolves every list validation. Each rule is handled on its own: a rule that fails
/// is logged and skipped, it never affects the other ones.
pub fn resolve_rules(validations: &[RawValidation], ctx: &RuleContext) -> Vec<ValidationRule> {
    let mut res: Vec<ValidationRule> = Vec::new();
    for (idx, v) in validations.iter().enumerate() {
        match resolve_rule(v, ctx) {
            Ok(Some(rule)) => {
                debug!(
                    "resolve_rules: rule {}: {:?} -> columns {:?}, {} options",
                    idx,
                    rule.raw_formula,
                    rule.affected_column_indexes,
                    rule.resolved_options.len()
                );
                res.push(rule);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(
                    "resolve_rules: dropping validation {} ({:?} on {:?}): {}",
                    idx, v.formula, v.sqref, e
                );
            }
        }
    }
    res
}

/// Resolves one validation.
///
/// Returns `None` for rules that do not produce a dropdown here: non-list validations,
/// and rules whose targets all fall outside the header columns.
pub fn resolve_rule(
    v: &RawValidation,
    ctx: &RuleContext,
) -> Result<Option<ValidationRule>, ValidationRuleParseError> {
    if !v.validation_type.eq_ignore_ascii_case("list") {
        return Ok(None);
    }
    if v.formula.trim().is_empty() {
        return Err(ValidationRuleParseError::EmptyFormula);
    }

    let targets = parse_sqref(&v.sqref);
    if targets.is_empty() {
        return Err(ValidationRuleParseError::MalformedTarget(v.sqref.clone()));
    }
    let mut affected: BTreeSet<usize> = BTreeSet::new();
    for t in targets.iter() {
        match t {
            Ok(range) => {
                let col = range.min_col();
                match ctx.columns {
                    Some((first, last)) if (first..=last).contains(&col) => {
                        affected.insert(col);
                    }
                    _ => debug!(
                        "resolve_rule: target {} is outside the header columns {:?}",
                        range, ctx.columns
                    ),
                }
            }
            Err(e) => warn!("resolve_rule: skipping target in {:?}: {}", v.sqref, e),
        }
    }
    if targets.iter().all(|t| t.is_err()) {
        return Err(ValidationRuleParseError::MalformedTarget(v.sqref.clone()));
    }
    if affected.is_empty() {
        return Ok(None);
    }

    let kind = classify_formula(&v.formula);
    let resolved_options = match kind {
        RuleKind::InlineList => split_inline_list(&v.formula),
        RuleKind::RangeReference => match resolve_range(&v.formula, ctx) {
            Ok(options) => options,
            Err(e) => {
                warn!(
                    "resolve_rule: could not resolve {:?}, the field stays free text: {}",
                    v.formula, e
                );
                Vec::new()
            }
        },
    };

    Ok(Some(ValidationRule {
        affected_column_indexes: affected,
        kind,
        raw_formula: v.formula.clone(),
        resolved_options,
    }))
}

/// Quoted formulas are literal lists. Unquoted formulas are references, unless they
/// hold a comma and nothing that looks like a reference.
pub fn classify_formula(formula: &str) -> RuleKind {
    let f = formula.trim();
    let f = f.strip_prefix('=').unwrap_or(f);
    if f.starts_with('"') {
        return RuleKind::InlineList;
    }
    let looks_like_reference = f.contains('!') || f.contains(':') || f.contains('$');
    if f.contains(',') && !looks_like_reference {
        RuleKind::InlineList
    } else {
        RuleKind::RangeReference
    }
}

/// `"Red, Green,Blue"` -> `[Red, Green, Blue]`. Order and duplicates are kept.
pub fn split_inline_list(formula: &str) -> Vec<String> {
    let f = formula.trim();
    let f = f.strip_prefix('=').unwrap_or(f);
    f.trim_matches('"')
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Reads the non-empty cells of a range, row by row. A reference without a sheet is read
/// from the sheet that holds the validation; a bare name is looked up in the workbook's
/// defined names first.
pub fn resolve_range(
    formula: &str,
    ctx: &RuleContext,
) -> Result<Vec<String>, ValidationRuleParseError> {
    let f = formula.trim();
    let f = f.strip_prefix('=').unwrap_or(f);
    let reference = match ctx.lookup.defined_name(ctx.sheet_name, f) {
        Some(target) => {
            debug!("resolve_range: defined name {:?} -> {:?}", f, target);
            target
        }
        None => f,
    };
    let range = RangeRef::parse(reference)?;
    let sheet = match &range.sheet {
        Some(name) if name != ctx.sheet_name => ctx
            .lookup
            .sheet(name)
            .ok_or_else(|| ValidationRuleParseError::UnknownSheet(name.clone()))?,
        _ => ctx.sheet,
    };
    Ok(read_range(sheet, &range))
}

fn read_range(sheet: &RawSheet, range: &RangeRef) -> Vec<String> {
    let mut res: Vec<String> = Vec::new();
    if sheet.row_count() == 0 {
        return res;
    }
    let last_row = range.end.row.min(sheet.row_count() - 1);
    for row in range.start.row..=last_row {
        let row_len = sheet.row(row).map(|r| r.len()).unwrap_or(0);
        if row_len == 0 {
            continue;
        }
        let last_col = range.end.col.min(row_len - 1);
        for col in range.start.col..=last_col {
            if let Some(v) = sheet.cell(row, col) {
                res.push(v.to_string());
            }
        }
    }
    res
}

/// The options of each column. Later rules win over earlier ones for the same column;
/// rules that resolved to nothing are ignored.
pub fn options_by_column(rules: &[ValidationRule]) -> BTreeMap<usize, Vec<String>> {
    let mut res: BTreeMap<usize, Vec<String>> = BTreeMap::new();
    for rule in rules.iter() {
        if rule.resolved_options.is_empty() {
            continue;
        }
        for col in rule.affected_column_indexes.iter() {
            res.insert(*col, rule.resolved_options.clone());
        }
    }
    res
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    struct Book {
        sheets: HashMap<String, RawSheet>,
        names: HashMap<String, String>,
    }

    impl SheetLookup for Book {
        fn sheet(&self, name: &str) -> Option<&RawSheet> {
            self.sheets.get(name)
        }
        fn defined_name(&self, _sheet: &str, name: &str) -> Option<&str> {
            self.names.get(name).map(|s| s.as_str())
        }
    }

    fn book() -> Book {
        let mut sheets = HashMap::new();
        sheets.insert(
            "Sheet2".to_string(),
            RawSheet::from_strings(&[&["X", "P"], &["", "Q"], &["Y", ""]]),
        );
        let mut names = HashMap::new();
        names.insert("Cities".to_string(), "Sheet2!$B$1:$B$2".to_string());
        Book { sheets, names }
    }

    fn list(sqref: &str, formula: &str) -> RawValidation {
        RawValidation {
            validation_type: "list".to_string(),
            sqref: sqref.to_string(),
            formula: formula.to_string(),
        }
    }

    fn with_ctx<T>(f: impl FnOnce(&RuleContext) -> T) -> T {
        let b = book();
        let main = RawSheet::from_strings(&[
            &["Name", "Team", "Color", "Size"],
            &["", "", "", ""],
            &["", "", "", ""],
            &["", "", "", ""],
            &["", "", "", ""],
            &["S", "M", "L", "XL"],
        ]);
        let ctx = RuleContext {
            sheet_name: "Form",
            sheet: &main,
            lookup: &b,
            columns: Some((0, 3)),
        };
        f(&ctx)
    }

    #[test]
    fn classifies_formulas() {
        assert_eq!(classify_formula("\"Red,Green,Blue\""), RuleKind::InlineList);
        assert_eq!(classify_formula("\"Yes\""), RuleKind::InlineList);
        assert_eq!(classify_formula("Red,Green"), RuleKind::InlineList);
        assert_eq!(classify_formula("Sheet2!$A$1:$A$3"), RuleKind::RangeReference);
        assert_eq!(classify_formula("$A$1:$A$3"), RuleKind::RangeReference);
        assert_eq!(classify_formula("Cities"), RuleKind::RangeReference);
    }

    #[test]
    fn inline_lists_keep_order_and_duplicates() {
        assert_eq!(
            split_inline_list("\"Red, Green ,Blue,Red\""),
            vec!["Red", "Green", "Blue", "Red"]
        );
        assert_eq!(split_inline_list("\"Yes\""), vec!["Yes"]);
        assert!(split_inline_list("\"\"").is_empty());
    }

    #[test]
    fn inline_rule_on_column_c() {
        with_ctx(|ctx| {
            let rule = resolve_rule(&list("C2:C100", "\"Red,Green,Blue\""), ctx)
                .unwrap()
                .unwrap();
            assert_eq!(rule.kind, RuleKind::InlineList);
            assert_eq!(rule.affected_column_indexes.iter().copied().collect::<Vec<_>>(), vec![2]);
            assert_eq!(rule.resolved_options, vec!["Red", "Green", "Blue"]);
        })
    }

    #[test]
    fn cross_sheet_range_skips_blanks() {
        with_ctx(|ctx| {
            let rule = resolve_rule(&list("B2:B50", "Sheet2!$A$1:$A$3"), ctx)
                .unwrap()
                .unwrap();
            assert_eq!(rule.kind, RuleKind::RangeReference);
            assert_eq!(rule.resolved_options, vec!["X", "Y"]);
            assert!(rule.affected_column_indexes.contains(&1));
        })
    }

    #[test]
    fn rectangular_ranges_read_row_by_row() {
        with_ctx(|ctx| {
            let options = resolve_range("Sheet2!A1:B3", ctx).unwrap();
            assert_eq!(options, vec!["X", "P", "Q", "Y"]);
            // Same sheet when there is no prefix; past-the-end rows are ignored.
            let options = resolve_range("$A$6:$D$900", ctx).unwrap();
            assert_eq!(options, vec!["S", "M", "L", "XL"]);
            let options = resolve_range("Form!$B$6", ctx).unwrap();
            assert_eq!(options, vec!["M"]);
        })
    }

    #[test]
    fn defined_names_are_followed() {
        with_ctx(|ctx| {
            assert_eq!(resolve_range("Cities", ctx).unwrap(), vec!["P", "Q"]);
        })
    }

    #[test]
    fn broken_references_fail_open() {
        with_ctx(|ctx| {
            let rule = resolve_rule(&list("D2", "Sheet2!$A$1:$A"), ctx)
                .unwrap()
                .unwrap();
            assert!(rule.resolved_options.is_empty());

            let rule = resolve_rule(&list("D2", "Missing!$A$1:$A$3"), ctx)
                .unwrap()
                .unwrap();
            assert!(rule.resolved_options.is_empty());
            assert_eq!(
                resolve_range("Missing!$A$1:$A$3", ctx),
                Err(ValidationRuleParseError::UnknownSheet("Missing".to_string()))
            );
        })
    }

    #[test]
    fn unknown_names_are_not_columns() {
        with_ctx(|ctx| {
            assert_eq!(
                resolve_range("=Day", ctx),
                Err(ValidationRuleParseError::MalformedReference("Day".to_string()))
            );
            let rule = resolve_rule(&list("B2:B9", "Day"), ctx).unwrap().unwrap();
            assert!(rule.resolved_options.is_empty());
        })
    }

    #[test]
    fn targets_outside_header_are_dropped() {
        with_ctx(|ctx| {
            assert_eq!(resolve_rule(&list("F2:F9", "\"a,b\""), ctx), Ok(None));
            let rule = resolve_rule(&list("F2:F9 A2:A9", "\"a,b\""), ctx)
                .unwrap()
                .unwrap();
            assert_eq!(rule.affected_column_indexes.len(), 1);
        })
    }

    #[test]
    fn a_bad_rule_does_not_stop_the_others() {
        with_ctx(|ctx| {
            let rules = resolve_rules(
                &[
                    list("##", "\"a,b\""),
                    list("A2", ""),
                    RawValidation {
                        validation_type: "whole".to_string(),
                        sqref: "B2".to_string(),
                        formula: "1".to_string(),
                    },
                    list("C2", "\"x,y\""),
                    list("D2", "Sheet2!$A$1:$A$"),
                ],
                ctx,
            );
            assert_eq!(rules.len(), 2);
            let by_col = options_by_column(&rules);
            assert_eq!(by_col.len(), 1);
            assert_eq!(by_col[&2], vec!["x", "y"]);
        })
    }

    #[test]
    fn later_rules_win() {
        with_ctx(|ctx| {
            let rules = resolve_rules(
                &[list("C2", "\"a,b\""), list("C5", "\"c\""), list("C9", "Nowhere!A1")],
                ctx,
            );
            assert_eq!(options_by_column(&rules)[&2], vec!["c"]);
        })
    }
}
