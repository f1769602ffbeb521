use log::{debug, info, warn};

pub use form_inference::roster::{Progress, Reconciliation, Roster};
pub use form_inference::*;
use snafu::{prelude::*, Snafu};

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value as JSValue;
use text_diff::print_diff;

pub mod config_reader;
pub mod io_common;
pub mod io_csv;
pub mod io_roster;
pub mod io_xlsx;
pub mod reconciler;
pub mod registry;
pub mod responses;
pub mod service;
pub mod storage;
#[cfg(test)]
pub(crate) mod test_support;

use crate::forms::config_reader::*;
use crate::forms::service::FormService;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum FormsError {
    #[snafu(display("Could not read spreadsheet {path}: {source}"))]
    MalformedSpreadsheet {
        source: calamine::XlsxError,
        path: String,
    },
    #[snafu(display("Could not open the archive of spreadsheet {path}: {source}"))]
    MalformedArchive {
        source: zip::result::ZipError,
        path: String,
    },
    #[snafu(display("Could not parse {part} in spreadsheet {path}: {source}"))]
    MalformedXml {
        source: quick_xml::Error,
        path: String,
        part: String,
    },
    #[snafu(display("Sheet {sheet:?} not found in {path} (sheets: {available:?})"))]
    MissingSheet {
        sheet: String,
        path: String,
        available: Vec<String>,
    },
    #[snafu(display("Could not read CSV file {path}: {source}"))]
    CsvRead { source: csv::Error, path: String },
    #[snafu(display("Could not write CSV output {path}: {source}"))]
    CsvWrite { source: csv::Error, path: String },
    #[snafu(display("Unsupported input file {path}: expected .xlsx, .xlsm or .csv"))]
    UnsupportedInput { path: String },
    #[snafu(display("No name column found in {path} (columns: {columns:?})"))]
    MissingRosterColumn { path: String, columns: Vec<String> },

    #[snafu(display("Unknown field(s) for form {schema_id}: {}", fields.join(", ")))]
    UnknownField {
        schema_id: SchemaId,
        fields: Vec<String>,
    },
    #[snafu(display("The identity of a submission cannot be empty"))]
    EmptyIdentity {},
    #[snafu(display("{kind} {key} not found"))]
    NotFound { kind: String, key: String },
    #[snafu(display("Form {schema_id} already exists and cannot be replaced"))]
    SchemaExists { schema_id: SchemaId },
    #[snafu(display("Invalid form id {text:?}"))]
    InvalidSchemaId { text: String },
    #[snafu(display("Invalid record reference {text:?}, expected <form id>:<record number>"))]
    InvalidRecordRef { text: String },
    #[snafu(display("Concurrent write conflict on {target}: {reason}"))]
    ConcurrentWriteConflict { target: String, reason: String },

    #[snafu(display("I/O error on {path}: {source}"))]
    Io {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Could not read JSON file {path}: {source}"))]
    ParsingJson {
        source: serde_json::Error,
        path: String,
    },
    #[snafu(display("Could not serialize JSON: {source}"))]
    WritingJson { source: serde_json::Error },

    #[snafu(whatever, display("{message}"))]
    Whatever {
        message: String,
        #[snafu(source(from(Box<dyn std::error::Error + Send + Sync>, Some)))]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

pub type FormsResult<T> = Result<T, FormsError>;

/// The field part of a schema, which is what a reference file is compared against.
#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
struct FieldsSummary {
    title: String,
    fields: Vec<FieldDefinition>,
}

fn read_reference(path: &Path) -> FormsResult<JSValue> {
    let contents = fs::read_to_string(path).context(IoSnafu {
        path: path.display().to_string(),
    })?;
    let js: JSValue = serde_json::from_str(&contents).context(ParsingJsonSnafu {
        path: path.display().to_string(),
    })?;
    let summary: FieldsSummary =
        serde_json::from_value(js).context(ParsingJsonSnafu {
            path: path.display().to_string(),
        })?;
    serde_json::to_value(&summary).context(WritingJsonSnafu {})
}

/// Compares the fields of a freshly built schema with a reference file. The reference
/// may be a full schema; only its title and fields are looked at.
pub fn check_against_reference(schema: &FormSchema, reference_path: &Path) -> FormsResult<()> {
    let summary_ref = read_reference(reference_path)?;
    let summary = serde_json::to_value(&FieldsSummary {
        title: schema.title.clone(),
        fields: schema.fields.clone(),
    })
    .context(WritingJsonSnafu {})?;
    let pretty_ref = serde_json::to_string_pretty(&summary_ref).context(WritingJsonSnafu {})?;
    let pretty = serde_json::to_string_pretty(&summary).context(WritingJsonSnafu {})?;
    if pretty_ref != pretty {
        warn!("Found differences with the reference schema");
        print_diff(pretty_ref.as_str(), pretty.as_str(), "\n");
        whatever!(
            "Difference detected between the inferred schema and {}",
            reference_path.display()
        )
    }
    info!("check_against_reference: schema matches {:?}", reference_path);
    Ok(())
}

/// Opens the service described by an optional configuration file and an optional
/// data directory override.
pub fn open_service(
    config_path: Option<&Path>,
    data_dir: Option<PathBuf>,
) -> FormsResult<FormService> {
    let mut settings = match config_path {
        Some(p) => {
            let cfg = read_config(p)?;
            debug!("open_service: config {:?}: {:?}", p, cfg);
            Settings::from_config(&cfg, p.parent())
        }
        None => Settings::default(),
    };
    if let Some(dir) = data_dir {
        settings.data_dir = dir;
    }
    info!("open_service: data directory {:?}", settings.data_dir);
    FormService::open(settings)
}
