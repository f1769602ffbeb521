// ********* Input data structures ***********

use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::Display;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One row of a raw sheet. Cells that were never written are `None`.
pub type RawRow = Vec<Option<String>>;

/// A sheet as it was read from the file, before any interpretation.
///
/// Coordinates are absolute and 0-based: `rows()[3][2]` is the cell `C4`, even when the
/// populated area of the sheet starts further down or to the right.
#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct RawSheet {
    rows: Vec<RawRow>,
}

impl RawSheet {
    pub fn new(rows: Vec<RawRow>) -> RawSheet {
        RawSheet { rows }
    }

    /// Convenience constructor, mostly for tests: empty strings become empty cells.
    pub fn from_strings(rows: &[&[&str]]) -> RawSheet {
        RawSheet {
            rows: rows
                .iter()
                .map(|r| {
                    r.iter()
                        .map(|s| {
                            if s.is_empty() {
                                None
                            } else {
                                Some(s.to_string())
                            }
                        })
                        .collect()
                })
                .collect(),
        }
    }

    pub fn rows(&self) -> &[RawRow] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// The length of the longest row.
    pub fn width(&self) -> usize {
        self.rows.iter().map(|r| r.len()).max().unwrap_or(0)
    }

    pub fn row(&self, idx: usize) -> Option<&RawRow> {
        self.rows.get(idx)
    }

    /// The trimmed content of a cell, if the cell holds anything besides whitespace.
    pub fn cell(&self, row: usize, col: usize) -> Option<&str> {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .and_then(|c| c.as_deref())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

pub(crate) fn is_blank(cell: &Option<String>) -> bool {
    cell.as_deref().map(|s| s.trim().is_empty()).unwrap_or(true)
}

/// The two source shapes of a list validation.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Serialize, Deserialize)]
pub enum RuleKind {
    InlineList,
    RangeReference,
}

/// A data-validation rule as found in the worksheet, before any resolution.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct RawValidation {
    /// The `type` attribute (`list`, `whole`, `date`...).
    pub validation_type: String,
    /// Space separated list of the cell ranges the rule applies to.
    pub sqref: String,
    /// The content of `formula1`, XML-unescaped.
    pub formula: String,
}

/// Access to the other sheets of a workbook, for cross-sheet range references.
pub trait SheetLookup {
    fn sheet(&self, name: &str) -> Option<&RawSheet>;

    /// The reference text of a defined name, as seen from `sheet`: a name scoped to that
    /// sheet hides a workbook-level name with the same spelling.
    fn defined_name(&self, _sheet: &str, _name: &str) -> Option<&str> {
        None
    }
}

// ********* Configuration **********

/// When a row counts as the header row.
///
/// A row qualifies when its number of non-empty cells is strictly greater than every
/// threshold that is set. The fraction is taken against the width of the sheet.
#[derive(PartialEq, Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HeaderThreshold {
    #[serde(rename = "minNonEmptyAbsolute")]
    pub min_non_empty_absolute: Option<usize>,
    #[serde(rename = "minNonEmptyFraction")]
    pub min_non_empty_fraction: Option<f64>,
}

impl HeaderThreshold {
    pub const DEFAULT: HeaderThreshold = HeaderThreshold {
        min_non_empty_absolute: Some(2),
        min_non_empty_fraction: None,
    };

    pub const HALF_WIDTH: HeaderThreshold = HeaderThreshold {
        min_non_empty_absolute: None,
        min_non_empty_fraction: Some(0.5),
    };

    pub fn accepts(&self, non_empty: usize, width: usize) -> bool {
        let absolute_ok = self
            .min_non_empty_absolute
            .map(|m| non_empty > m)
            .unwrap_or(true);
        let fraction_ok = self
            .min_non_empty_fraction
            .map(|f| (non_empty as f64) > f * (width as f64))
            .unwrap_or(true);
        non_empty > 0 && absolute_ok && fraction_ok
    }
}

impl Default for HeaderThreshold {
    fn default() -> Self {
        HeaderThreshold::DEFAULT
    }
}

// ******** Output data structures *********

#[derive(Eq, PartialEq, Debug, Clone, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaId(pub String);

impl SchemaId {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Display for SchemaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What should be rendered for a field.
#[derive(Eq, PartialEq, Debug, Clone)]
pub enum FieldKind {
    Text,
    /// A dropdown. The options are never empty.
    SingleSelect(Vec<String>),
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
#[serde(into = "FieldRepr", try_from = "FieldRepr")]
pub struct FieldDefinition {
    pub name: String,
    pub kind: FieldKind,
    pub source_column_index: usize,
}

impl FieldDefinition {
    pub fn options(&self) -> &[String] {
        match &self.kind {
            FieldKind::Text => &[],
            FieldKind::SingleSelect(options) => options.as_slice(),
        }
    }

    pub fn is_select(&self) -> bool {
        matches!(self.kind, FieldKind::SingleSelect(_))
    }
}

#[derive(Eq, PartialEq, Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum FieldKindTag {
    Text,
    Select,
}

// The wire shape of a field: {"name": .., "kind": "text|select", "options": [..], "column": n}
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FieldRepr {
    name: String,
    kind: FieldKindTag,
    #[serde(default)]
    options: Vec<String>,
    #[serde(rename = "column")]
    source_column_index: usize,
}

impl From<FieldDefinition> for FieldRepr {
    fn from(fd: FieldDefinition) -> FieldRepr {
        let (kind, options) = match fd.kind {
            FieldKind::Text => (FieldKindTag::Text, Vec::new()),
            FieldKind::SingleSelect(options) => (FieldKindTag::Select, options),
        };
        FieldRepr {
            name: fd.name,
            kind,
            options,
            source_column_index: fd.source_column_index,
        }
    }
}

impl TryFrom<FieldRepr> for FieldDefinition {
    type Error = String;

    fn try_from(repr: FieldRepr) -> Result<FieldDefinition, String> {
        if repr.name.trim().is_empty() {
            return Err("field with an empty name".to_string());
        }
        let kind = match repr.kind {
            FieldKindTag::Text if repr.options.is_empty() => FieldKind::Text,
            FieldKindTag::Text => {
                return Err(format!("text field {} cannot carry options", repr.name));
            }
            FieldKindTag::Select if repr.options.is_empty() => {
                return Err(format!("select field {} has no options", repr.name));
            }
            FieldKindTag::Select => FieldKind::SingleSelect(repr.options),
        };
        Ok(FieldDefinition {
            name: repr.name,
            kind,
            source_column_index: repr.source_column_index,
        })
    }
}

/// The form inferred from one uploaded spreadsheet. It is never modified after it is
/// built: a new upload makes a new schema with a new id.
#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct FormSchema {
    pub id: SchemaId,
    pub title: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "sourceSheet")]
    pub source_sheet: Option<String>,
    #[serde(rename = "headerRow")]
    pub header_row: usize,
    pub fields: Vec<FieldDefinition>,
}

impl FormSchema {
    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    /// The keys of `values` that are not fields of this schema, in sorted order.
    pub fn unknown_fields<'a>(&self, values: &'a BTreeMap<String, String>) -> Vec<&'a str> {
        values
            .keys()
            .filter(|k| self.field(k).is_none())
            .map(|k| k.as_str())
            .collect()
    }
}

#[derive(Eq, PartialEq, Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RosterStatus {
    Pending,
    Filled,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct RosterEntry {
    #[serde(rename = "identityKey")]
    pub identity_key: String,
    #[serde(rename = "displayName")]
    pub display_name: String,
    pub contact: Option<String>,
    pub status: RosterStatus,
    #[serde(rename = "lastSubmittedAt")]
    pub last_submitted_at: Option<DateTime<Utc>>,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct ResponseRecord {
    pub id: u64,
    #[serde(rename = "schemaId")]
    pub schema_id: SchemaId,
    /// The identity as the respondent typed it, trimmed.
    pub identity: String,
    #[serde(rename = "identityKey")]
    pub identity_key: String,
    pub values: BTreeMap<String, String>,
    #[serde(rename = "submittedAt")]
    pub submitted_at: DateTime<Utc>,
    #[serde(rename = "updatedAt", default)]
    pub updated_at: Option<DateTime<Utc>>,
}

// ********* Errors **********

/// Why a single validation rule could not be turned into a dropdown.
///
/// These never leave the library: the rule is dropped and the field stays a text field.
#[derive(Eq, PartialEq, Debug, Clone)]
pub enum ValidationRuleParseError {
    EmptyFormula,
    MalformedReference(String),
    UnknownSheet(String),
    MalformedTarget(String),
}

impl Error for ValidationRuleParseError {}

impl Display for ValidationRuleParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationRuleParseError::EmptyFormula => write!(f, "empty validation formula"),
            ValidationRuleParseError::MalformedReference(s) => {
                write!(f, "malformed cell reference {:?}", s)
            }
            ValidationRuleParseError::UnknownSheet(s) => write!(f, "unknown sheet {:?}", s),
            ValidationRuleParseError::MalformedTarget(s) => {
                write!(f, "malformed target range {:?}", s)
            }
        }
    }
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub enum RosterError {
    EmptyIdentity,
}

impl Error for RosterError {}

impl Display for RosterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RosterError::EmptyIdentity => write!(f, "identity is empty after normalization"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_absolute_and_fraction() {
        let t = HeaderThreshold::DEFAULT;
        assert!(!t.accepts(2, 10));
        assert!(t.accepts(3, 10));

        let t = HeaderThreshold::HALF_WIDTH;
        assert!(!t.accepts(2, 4));
        assert!(t.accepts(3, 4));

        let both = HeaderThreshold {
            min_non_empty_absolute: Some(2),
            min_non_empty_fraction: Some(0.5),
        };
        assert!(!both.accepts(3, 8));
        assert!(both.accepts(5, 8));
        assert!(!HeaderThreshold::HALF_WIDTH.accepts(0, 0));
    }

    #[test]
    fn field_wire_format() {
        let fd = FieldDefinition {
            name: "City".to_string(),
            kind: FieldKind::SingleSelect(vec!["Lahore".to_string(), "Karachi".to_string()]),
            source_column_index: 1,
        };
        let js = serde_json::to_value(&fd).unwrap();
        assert_eq!(
            js,
            serde_json::json!({"name": "City", "kind": "select", "options": ["Lahore", "Karachi"], "column": 1})
        );
        let back: FieldDefinition = serde_json::from_value(js).unwrap();
        assert_eq!(back, fd);

        let text: FieldDefinition =
            serde_json::from_str(r#"{"name": "Age", "kind": "text", "column": 2}"#).unwrap();
        assert_eq!(text.kind, FieldKind::Text);
        assert!(text.options().is_empty());
    }

    #[test]
    fn select_without_options_is_rejected() {
        let res: Result<FieldDefinition, _> =
            serde_json::from_str(r#"{"name": "City", "kind": "select", "options": [], "column": 0}"#);
        assert!(res.is_err());
    }

    #[test]
    fn raw_sheet_cells() {
        let sheet = RawSheet::from_strings(&[&["a", "", " "], &["b"]]);
        assert_eq!(sheet.width(), 3);
        assert_eq!(sheet.cell(0, 0), Some("a"));
        assert_eq!(sheet.cell(0, 1), None);
        assert_eq!(sheet.cell(0, 2), None);
        assert_eq!(sheet.cell(5, 0), None);
    }
}
