use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

pub use crate::config::*;

/// Turns positional field names and per-column options into field definitions.
///
/// `columns` pairs each name with the sheet column it came from. A field is a dropdown
/// when its column has at least one option.
pub fn build_fields(
    columns: &[(usize, String)],
    options: &BTreeMap<usize, Vec<String>>,
) -> Vec<FieldDefinition> {
    columns
        .iter()
        .map(|(col, name)| {
            let kind = match options.get(col) {
                Some(opts) if !opts.is_empty() => FieldKind::SingleSelect(opts.clone()),
                _ => FieldKind::Text,
            };
            FieldDefinition {
                name: name.clone(),
                kind,
                source_column_index: *col,
            }
        })
        .collect()
}

/// Assembles a [`FormSchema`].
///
/// ```
/// use std::collections::BTreeMap;
/// use form_inference::builder::FormSchemaBuilder;
/// use form_inference::{FieldKind, SchemaId};
///
/// let mut options = BTreeMap::new();
/// options.insert(1, vec!["Lahore".to_string(), "Karachi".to_string()]);
/// let columns = vec![(0, "Name".to_string()), (1, "City".to_string())];
///
/// let schema = FormSchemaBuilder::from_columns(&columns, &options)
///     .source_sheet("Sheet1")
///     .build(SchemaId("f1".to_string()), "Members", chrono::Utc::now());
///
/// assert_eq!(schema.fields[0].kind, FieldKind::Text);
/// assert!(schema.fields[1].is_select());
/// ```
#[derive(Debug, Clone, Default)]
pub struct FormSchemaBuilder {
    fields: Vec<FieldDefinition>,
    source_sheet: Option<String>,
    header_row: usize,
}

impl FormSchemaBuilder {
    pub fn new(fields: Vec<FieldDefinition>) -> FormSchemaBuilder {
        FormSchemaBuilder {
            fields,
            source_sheet: None,
            header_row: 0,
        }
    }

    pub fn from_columns(
        columns: &[(usize, String)],
        options: &BTreeMap<usize, Vec<String>>,
    ) -> FormSchemaBuilder {
        FormSchemaBuilder::new(build_fields(columns, options))
    }

    pub fn source_sheet(self, name: &str) -> FormSchemaBuilder {
        FormSchemaBuilder {
            source_sheet: Some(name.to_string()),
            ..self
        }
    }

    pub fn header_row(self, row: usize) -> FormSchemaBuilder {
        FormSchemaBuilder {
            header_row: row,
            ..self
        }
    }

    pub fn fields(&self) -> &[FieldDefinition] {
        &self.fields
    }

    pub fn build(self, id: SchemaId, title: &str, created_at: DateTime<Utc>) -> FormSchema {
        FormSchema {
            id,
            title: title.to_string(),
            created_at,
            source_sheet: self.source_sheet,
            header_row: self.header_row,
            fields: self.fields,
        }
    }
}
