use std::collections::BTreeMap;
use std::fmt::Display;
use std::io::Write;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use form_inference::roster::normalize_identity;

use crate::forms::registry::SchemaRegistry;
use crate::forms::storage::{atomic_write_json, read_json, FormLocks};
use crate::forms::*;

/// The persisted responses of one form.
#[derive(Eq, PartialEq, Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct ResponseTable {
    #[serde(rename = "nextId")]
    pub(crate) next_id: u64,
    pub(crate) records: Vec<ResponseRecord>,
}

impl ResponseTable {
    /// Appends a record with the next id. Ids start at 1.
    pub(crate) fn push(
        &mut self,
        schema_id: &SchemaId,
        identity: &str,
        values: BTreeMap<String, String>,
        submitted_at: DateTime<Utc>,
    ) -> ResponseRecord {
        let id = self.next_id.max(1);
        self.next_id = id + 1;
        let record = ResponseRecord {
            id,
            schema_id: schema_id.clone(),
            identity: identity.trim().to_string(),
            identity_key: normalize_identity(identity),
            values,
            submitted_at,
            updated_at: None,
        };
        self.records.push(record.clone());
        record
    }
}

/// Points at one record: `<form id>:<record id>`.
#[derive(Eq, PartialEq, Debug, Clone, Hash)]
pub struct RecordRef {
    pub schema_id: SchemaId,
    pub id: u64,
}

impl RecordRef {
    pub fn of(record: &ResponseRecord) -> RecordRef {
        RecordRef {
            schema_id: record.schema_id.clone(),
            id: record.id,
        }
    }
}

impl Display for RecordRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.schema_id, self.id)
    }
}

impl FromStr for RecordRef {
    type Err = FormsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (schema, id) = s.rsplit_once(':').context(InvalidRecordRefSnafu { text: s })?;
        let id = id
            .trim()
            .parse::<u64>()
            .ok()
            .context(InvalidRecordRefSnafu { text: s })?;
        ensure!(!schema.trim().is_empty(), InvalidRecordRefSnafu { text: s });
        Ok(RecordRef {
            schema_id: SchemaId(schema.trim().to_string()),
            id,
        })
    }
}

/// Columns that precede the form fields in an export.
pub const EXPORT_METADATA_COLUMNS: [&str; 3] = ["RecordId", "Identity", "SubmittedAt"];

/// The submitted records of every form, one file per form under `<data dir>/responses/`.
pub struct ResponseStore {
    dir: PathBuf,
    registry: Arc<dyn SchemaRegistry>,
    locks: Arc<FormLocks>,
}

impl ResponseStore {
    pub fn new(dir: PathBuf, registry: Arc<dyn SchemaRegistry>, locks: Arc<FormLocks>) -> Self {
        ResponseStore {
            dir,
            registry,
            locks,
        }
    }

    fn path_of(&self, id: &SchemaId) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    pub(crate) fn schema(&self, id: &SchemaId) -> FormsResult<FormSchema> {
        self.registry.get(id)?.context(NotFoundSnafu {
            kind: "Form",
            key: id.to_string(),
        })
    }

    pub(crate) fn load_table(&self, id: &SchemaId) -> FormsResult<ResponseTable> {
        Ok(read_json(&self.path_of(id))?.unwrap_or_default())
    }

    pub(crate) fn save_table(&self, id: &SchemaId, table: &ResponseTable) -> FormsResult<()> {
        atomic_write_json(&self.path_of(id), table)
    }

    /// Checks a submission against its form before anything is written.
    pub(crate) fn check_values(
        schema: &FormSchema,
        identity: &str,
        values: &BTreeMap<String, String>,
    ) -> FormsResult<()> {
        ensure!(!normalize_identity(identity).is_empty(), EmptyIdentitySnafu {});
        let unknown = schema.unknown_fields(values);
        ensure!(
            unknown.is_empty(),
            UnknownFieldSnafu {
                schema_id: schema.id.clone(),
                fields: unknown.iter().map(|s| s.to_string()).collect::<Vec<String>>(),
            }
        );
        Ok(())
    }

    /// Stores a new record. Submitting twice under the same identity stores two records.
    pub fn append(
        &self,
        schema_id: &SchemaId,
        identity: &str,
        values: BTreeMap<String, String>,
    ) -> FormsResult<ResponseRecord> {
        let schema = self.schema(schema_id)?;
        ResponseStore::check_values(&schema, identity, &values)?;
        self.locks.with_lock(schema_id, || {
            let mut table = self.load_table(schema_id)?;
            let record = table.push(schema_id, identity, values, Utc::now());
            self.save_table(schema_id, &table)?;
            info!("append: stored record {}", RecordRef::of(&record));
            Ok(record)
        })
    }

    /// All the records of a form, oldest first.
    pub fn list_by_form(&self, schema_id: &SchemaId) -> FormsResult<Vec<ResponseRecord>> {
        self.schema(schema_id)?;
        Ok(self.load_table(schema_id)?.records)
    }

    pub fn list_latest_first(&self, schema_id: &SchemaId) -> FormsResult<Vec<ResponseRecord>> {
        let mut records = self.list_by_form(schema_id)?;
        records.reverse();
        Ok(records)
    }

    pub fn list_by_identity(
        &self,
        schema_id: &SchemaId,
        identity: &str,
    ) -> FormsResult<Vec<ResponseRecord>> {
        let key = normalize_identity(identity);
        Ok(self
            .list_by_form(schema_id)?
            .into_iter()
            .filter(|r| r.identity_key == key)
            .collect())
    }

    pub fn get(&self, rref: &RecordRef) -> FormsResult<ResponseRecord> {
        self.list_by_form(&rref.schema_id)?
            .into_iter()
            .find(|r| r.id == rref.id)
            .context(NotFoundSnafu {
                kind: "Record",
                key: rref.to_string(),
            })
    }

    /// Replaces all the values of a record.
    pub fn update(
        &self,
        rref: &RecordRef,
        values: BTreeMap<String, String>,
    ) -> FormsResult<ResponseRecord> {
        let schema = self.schema(&rref.schema_id)?;
        let unknown = schema.unknown_fields(&values);
        ensure!(
            unknown.is_empty(),
            UnknownFieldSnafu {
                schema_id: schema.id.clone(),
                fields: unknown.iter().map(|s| s.to_string()).collect::<Vec<String>>(),
            }
        );
        self.locks.with_lock(&rref.schema_id, || {
            let mut table = self.load_table(&rref.schema_id)?;
            let record = table
                .records
                .iter_mut()
                .find(|r| r.id == rref.id)
                .context(NotFoundSnafu {
                    kind: "Record",
                    key: rref.to_string(),
                })?;
            record.values = values;
            record.updated_at = Some(Utc::now());
            let updated = record.clone();
            self.save_table(&rref.schema_id, &table)?;
            info!("update: replaced the values of record {}", rref);
            Ok(updated)
        })
    }

    pub fn delete(&self, rref: &RecordRef) -> FormsResult<ResponseRecord> {
        self.schema(&rref.schema_id)?;
        self.locks.with_lock(&rref.schema_id, || {
            let mut table = self.load_table(&rref.schema_id)?;
            let pos = table
                .records
                .iter()
                .position(|r| r.id == rref.id)
                .context(NotFoundSnafu {
                    kind: "Record",
                    key: rref.to_string(),
                })?;
            let removed = table.records.remove(pos);
            self.save_table(&rref.schema_id, &table)?;
            info!("delete: removed record {}", rref);
            Ok(removed)
        })
    }

    /// The records of a form as a table: the metadata columns, then one column per field.
    pub fn export_rows(&self, schema_id: &SchemaId) -> FormsResult<(Vec<String>, Vec<Vec<String>>)> {
        let schema = self.schema(schema_id)?;
        let mut header: Vec<String> = EXPORT_METADATA_COLUMNS.iter().map(|s| s.to_string()).collect();
        header.extend(schema.fields.iter().map(|f| f.name.clone()));
        let rows = self
            .load_table(schema_id)?
            .records
            .iter()
            .map(|r| {
                let mut row = vec![
                    r.id.to_string(),
                    r.identity.clone(),
                    r.submitted_at.to_rfc3339(),
                ];
                row.extend(
                    schema
                        .fields
                        .iter()
                        .map(|f| r.values.get(&f.name).cloned().unwrap_or_default()),
                );
                row
            })
            .collect();
        Ok((header, rows))
    }

    /// Writes the export of a form as CSV.
    pub fn export_csv<W: Write>(&self, schema_id: &SchemaId, out: W) -> FormsResult<usize> {
        let (header, rows) = self.export_rows(schema_id)?;
        let label = format!("export of {}", schema_id);
        let mut wtr = csv::Writer::from_writer(out);
        wtr.write_record(&header)
            .context(CsvWriteSnafu { path: label.clone() })?;
        for row in rows.iter() {
            wtr.write_record(row)
                .context(CsvWriteSnafu { path: label.clone() })?;
        }
        wtr.flush().context(IoSnafu { path: label })?;
        Ok(rows.len())
    }
}
