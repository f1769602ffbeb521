use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;

use chrono::Utc;
use form_inference::builder::FormSchemaBuilder;
use uuid::Uuid;

use crate::forms::config_reader::Settings;
use crate::forms::io_common::simplify_file_name;
use crate::forms::io_roster::read_members;
use crate::forms::io_xlsx::Workbook;
use crate::forms::reconciler::{IdentityReconciler, RosterLoad};
use crate::forms::registry::{FileSchemaRegistry, SchemaRegistry};
use crate::forms::responses::{RecordRef, ResponseStore};
use crate::forms::storage::FormLocks;
use crate::forms::*;

/// The result of a submission.
#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub record: ResponseRecord,
    /// False when the respondent was not on the roster and has been added to it.
    pub expected: bool,
}

/// Everything the application does, on top of one data directory.
pub struct FormService {
    settings: Settings,
    registry: Arc<dyn SchemaRegistry>,
    responses: ResponseStore,
    reconciler: IdentityReconciler,
    locks: Arc<FormLocks>,
}

impl FormService {
    pub fn open(settings: Settings) -> FormsResult<FormService> {
        let root = settings.data_dir.clone();
        for sub in ["schemas", "responses", "rosters", "locks"] {
            let dir = root.join(sub);
            fs::create_dir_all(&dir).context(IoSnafu {
                path: dir.display().to_string(),
            })?;
        }
        let locks = Arc::new(FormLocks::new(root.join("locks"), settings.lock_timeout));
        let registry: Arc<dyn SchemaRegistry> =
            Arc::new(FileSchemaRegistry::new(root.join("schemas")));
        Ok(FormService {
            responses: ResponseStore::new(root.join("responses"), registry.clone(), locks.clone()),
            reconciler: IdentityReconciler::new(root.join("rosters"), locks.clone()),
            registry,
            locks,
            settings,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Infers a form from a workbook on disk and registers it.
    pub fn build_schema(
        &self,
        path: &Path,
        sheet: Option<&str>,
        title: Option<&str>,
    ) -> FormsResult<FormSchema> {
        let wb = Workbook::read_file(path)?;
        let default_title = simplify_file_name(&path.display().to_string());
        self.register(&wb, sheet, title.unwrap_or(&default_title))
    }

    /// Same as [`FormService::build_schema`], for an uploaded file.
    pub fn build_schema_from_bytes(
        &self,
        bytes: Vec<u8>,
        label: &str,
        sheet: Option<&str>,
        title: Option<&str>,
    ) -> FormsResult<FormSchema> {
        let wb = Workbook::from_bytes(bytes, label)?;
        let default_title = simplify_file_name(label);
        self.register(&wb, sheet, title.unwrap_or(&default_title))
    }

    fn register(&self, wb: &Workbook, sheet: Option<&str>, title: &str) -> FormsResult<FormSchema> {
        let sheet_name = wb.resolve_sheet_name(sheet)?;
        let raw = wb.sheet(&sheet_name).cloned().unwrap_or_default();
        let inferred = infer_form(
            &sheet_name,
            &raw,
            wb,
            wb.validations(&sheet_name),
            &self.settings.header,
        );
        if inferred.fields.is_empty() {
            warn!(
                "register: {}: no header found in sheet {:?}, the form has no fields",
                wb.label(),
                sheet_name
            );
        }
        let id = SchemaId(Uuid::new_v4().simple().to_string());
        let schema = FormSchemaBuilder::new(inferred.fields)
            .source_sheet(&sheet_name)
            .header_row(inferred.header_row)
            .build(id, title.trim(), Utc::now());
        self.registry.put(&schema)?;
        Ok(schema)
    }

    pub fn schemas(&self) -> FormsResult<Vec<FormSchema>> {
        self.registry.list()
    }

    pub fn schema(&self, id: &SchemaId) -> FormsResult<FormSchema> {
        self.responses.schema(id)
    }

    pub fn load_roster(&self, id: &SchemaId, members_file: &Path) -> FormsResult<RosterLoad> {
        self.schema(id)?;
        let members = read_members(members_file, &self.settings)?;
        self.reconciler.load_members(id, &members)
    }

    /// Stores a response and marks its respondent as filled, as one step: either both
    /// the response table and the roster change, or neither does.
    pub fn submit(
        &self,
        id: &SchemaId,
        identity: &str,
        values: BTreeMap<String, String>,
    ) -> FormsResult<Submission> {
        let schema = self.schema(id)?;
        ResponseStore::check_values(&schema, identity, &values)?;
        self.locks.with_lock(id, || {
            let mut table = self.responses.load_table(id)?;
            let previous = table.clone();
            let record = table.push(id, identity, values, Utc::now());
            self.responses.save_table(id, &table)?;
            let outcome = match self
                .reconciler
                .reconcile_unlocked(id, identity, record.submitted_at)
            {
                Ok(o) => o,
                Err(e) => {
                    warn!(
                        "submit: form {}: roster update failed ({}), restoring the responses",
                        id, e
                    );
                    self.responses.save_table(id, &previous)?;
                    return Err(e);
                }
            };
            info!(
                "submit: stored record {} from {:?} ({:?})",
                RecordRef::of(&record),
                record.identity,
                outcome
            );
            Ok(Submission {
                record,
                expected: outcome == Reconciliation::Matched,
            })
        })
    }

    pub fn list_by_form(&self, id: &SchemaId) -> FormsResult<Vec<ResponseRecord>> {
        self.responses.list_by_form(id)
    }

    pub fn list_latest_first(&self, id: &SchemaId) -> FormsResult<Vec<ResponseRecord>> {
        self.responses.list_latest_first(id)
    }

    pub fn list_by_identity(&self, id: &SchemaId, identity: &str) -> FormsResult<Vec<ResponseRecord>> {
        self.responses.list_by_identity(id, identity)
    }

    pub fn progress(&self, id: &SchemaId) -> FormsResult<Progress> {
        self.schema(id)?;
        self.reconciler.progress(id)
    }

    pub fn pending(&self, id: &SchemaId) -> FormsResult<Vec<RosterEntry>> {
        self.schema(id)?;
        self.reconciler.pending(id)
    }

    pub fn roster(&self, id: &SchemaId) -> FormsResult<Roster> {
        self.schema(id)?;
        self.reconciler.roster(id)
    }

    pub fn update(
        &self,
        rref: &RecordRef,
        values: BTreeMap<String, String>,
    ) -> FormsResult<ResponseRecord> {
        self.responses.update(rref, values)
    }

    pub fn delete(&self, rref: &RecordRef) -> FormsResult<ResponseRecord> {
        self.responses.delete(rref)
    }

    /// Writes all the responses of a form as CSV; returns the number of records.
    pub fn export<W: Write>(&self, id: &SchemaId, out: W) -> FormsResult<usize> {
        self.responses.export_csv(id, out)
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::forms::test_support::*;

    fn values(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn census(service: &FormService) -> FormSchema {
        let bytes = XlsxFixture::new()
            .sheet("Sheet1", &[&["Name", "City", "Age"]])
            .validation("Sheet1", "list", "B2:B1000", "\"Lahore,Karachi\"")
            .to_bytes();
        service
            .build_schema_from_bytes(bytes, "uploads/census.xlsx", None, None)
            .unwrap()
    }

    #[test]
    fn end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let service = test_service(dir.path());
        let schema = census(&service);
        assert_eq!(schema.title, "census");
        assert_eq!(schema.source_sheet.as_deref(), Some("Sheet1"));
        assert_eq!(schema.field_names(), vec!["Name", "City", "Age"]);
        assert_eq!(schema.fields[0].kind, FieldKind::Text);
        assert_eq!(
            schema.fields[1].kind,
            FieldKind::SingleSelect(vec!["Lahore".to_string(), "Karachi".to_string()])
        );
        assert_eq!(schema.fields[2].kind, FieldKind::Text);
        assert_eq!(service.schemas().unwrap(), vec![schema.clone()]);

        let members = dir.path().join("members.csv");
        fs::write(&members, "Name,Phone,Team\nAli Khan,1,A\nSara,2,A\nBilal,3,B\nAmna,4,B\nZoya,5,C\n").unwrap();
        let load = service.load_roster(&schema.id, &members).unwrap();
        assert_eq!(load, RosterLoad { added: 5, total: 5 });

        let sub = service
            .submit(
                &schema.id,
                "Sara",
                values(&[("Name", "Sara"), ("City", "Lahore"), ("Age", "29")]),
            )
            .unwrap();
        assert!(sub.expected);
        let records = service.list_by_form(&schema.id).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].values["City"], "Lahore");
        assert_eq!(records[0], sub.record);
        assert_eq!(service.progress(&schema.id).unwrap(), Progress { filled: 1, total: 5 });
        assert_eq!(service.pending(&schema.id).unwrap().len(), 4);
    }

    #[test]
    fn walk_ins_and_case_insensitive_matches() {
        let dir = tempfile::tempdir().unwrap();
        let service = test_service(dir.path());
        let schema = census(&service);
        let members = dir.path().join("members.csv");
        fs::write(&members, "Member,Contact,Notes\nAli Khan,0300,x\nSara,0301,y\n").unwrap();
        service.load_roster(&schema.id, &members).unwrap();

        let sub = service.submit(&schema.id, "  ali   KHAN", values(&[])).unwrap();
        assert!(sub.expected);
        assert_eq!(service.progress(&schema.id).unwrap(), Progress { filled: 1, total: 2 });

        let sub = service.submit(&schema.id, "Walk In", values(&[])).unwrap();
        assert!(!sub.expected);
        assert_eq!(service.progress(&schema.id).unwrap(), Progress { filled: 2, total: 3 });

        // Submitting again keeps every record and does not change the counts.
        service.submit(&schema.id, "ali khan", values(&[])).unwrap();
        assert_eq!(service.progress(&schema.id).unwrap(), Progress { filled: 2, total: 3 });
        assert_eq!(service.list_by_identity(&schema.id, "Ali Khan").unwrap().len(), 2);
        assert_eq!(service.list_latest_first(&schema.id).unwrap()[0].identity, "ali khan");
    }

    #[test]
    fn failed_submissions_change_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let service = test_service(dir.path());
        let schema = census(&service);
        assert!(matches!(
            service.submit(&schema.id, "Sara", values(&[("Country", "PK")])),
            Err(FormsError::UnknownField { .. })
        ));
        assert!(matches!(
            service.submit(&schema.id, " ", values(&[("City", "Lahore")])),
            Err(FormsError::EmptyIdentity {})
        ));
        assert!(matches!(
            service.submit(&SchemaId("missing".to_string()), "Sara", values(&[])),
            Err(FormsError::NotFound { .. })
        ));
        assert!(service.list_by_form(&schema.id).unwrap().is_empty());
        assert_eq!(service.progress(&schema.id).unwrap(), Progress { filled: 0, total: 0 });
    }

    #[test]
    fn roster_failure_restores_the_responses() {
        let dir = tempfile::tempdir().unwrap();
        let service = test_service(dir.path());
        let schema = census(&service);
        service.submit(&schema.id, "Sara", values(&[])).unwrap();
        // A directory in place of the roster file makes the roster update fail.
        let roster_path = dir.path().join("rosters").join(format!("{}.json", schema.id));
        fs::remove_file(&roster_path).unwrap();
        fs::create_dir(&roster_path).unwrap();

        assert!(service.submit(&schema.id, "Ali", values(&[])).is_err());
        let records = service.list_by_form(&schema.id).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].identity, "Sara");
    }

    #[test]
    fn concurrent_submissions() {
        let dir = tempfile::tempdir().unwrap();
        let service = test_service(dir.path());
        let schema = census(&service);
        let n = 12;
        thread::scope(|s| {
            for i in 0..n {
                let service = &service;
                let id = &schema.id;
                s.spawn(move || {
                    let who = format!("Respondent {}", i % 4);
                    assert!(service.submit(id, &who, values(&[("Age", "1")])).is_ok());
                });
            }
        });
        assert_eq!(service.list_by_form(&schema.id).unwrap().len(), n);
        assert_eq!(service.progress(&schema.id).unwrap(), Progress { filled: 4, total: 4 });
    }

    #[test]
    fn services_sharing_a_data_directory() {
        // Each command of the binary opens its own service on the same directory.
        let dir = tempfile::tempdir().unwrap();
        let schema = census(&test_service(dir.path()));
        let per_service = 40;
        thread::scope(|s| {
            for t in 0..2 {
                let path = dir.path();
                let id = &schema.id;
                s.spawn(move || {
                    let service = test_service(path);
                    for i in 0..per_service {
                        let who = format!("Respondent {}-{}", t, i);
                        service.submit(id, &who, values(&[("Age", "1")])).unwrap();
                    }
                });
            }
        });
        let service = test_service(dir.path());
        let records = service.list_by_form(&schema.id).unwrap();
        assert_eq!(records.len(), 2 * per_service);
        let mut ids: Vec<u64> = records.iter().map(|r| r.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 2 * per_service);
        assert_eq!(
            service.progress(&schema.id).unwrap(),
            Progress {
                filled: 2 * per_service,
                total: 2 * per_service
            }
        );
    }

    #[test]
    fn progress_does_not_change_the_roster() {
        let dir = tempfile::tempdir().unwrap();
        let service = test_service(dir.path());
        let schema = census(&service);
        let members = dir.path().join("members.csv");
        fs::write(&members, "Name\nAli\nSara\nBilal\n").unwrap();
        service.load_roster(&schema.id, &members).unwrap();
        service.submit(&schema.id, "sara", values(&[])).unwrap();
        service.submit(&schema.id, "Guest", values(&[])).unwrap();

        let roster_path = dir.path().join("rosters").join(format!("{}.json", schema.id));
        let before = fs::read_to_string(&roster_path).unwrap();
        let first = service.progress(&schema.id).unwrap();
        let second = service.progress(&schema.id).unwrap();
        assert_eq!(first, Progress { filled: 2, total: 4 });
        assert_eq!(first, second);
        assert_eq!(service.pending(&schema.id).unwrap(), service.pending(&schema.id).unwrap());
        assert_eq!(fs::read_to_string(&roster_path).unwrap(), before);
    }

    #[test]
    fn missing_sheet_and_cross_sheet_lists() {
        let dir = tempfile::tempdir().unwrap();
        let service = test_service(dir.path());
        let bytes = XlsxFixture::new()
            .sheet("Form", &[&["Name", "Team", "Size", "Shirt"]])
            .sheet("Sheet2", &[&["X"], &[""], &["Y"]])
            .validation("Form", "list", "B2:B100", "Sheet2!$A$1:$A$3")
            .validation("Form", "list", "C2:C100", "Nowhere!$A$1:$A$3")
            .x14_validation("Form", "list", "D2:D100", "Sheet2!$A$1:$A$1")
            .to_bytes();
        assert!(matches!(
            service.build_schema_from_bytes(bytes.clone(), "teams.xlsx", Some("Other"), None),
            Err(FormsError::MissingSheet { .. })
        ));
        let schema = service
            .build_schema_from_bytes(bytes, "teams.xlsx", Some("form"), Some(" Teams "))
            .unwrap();
        assert_eq!(schema.title, "Teams");
        assert_eq!(schema.fields[1].options(), &["X".to_string(), "Y".to_string()]);
        assert_eq!(schema.fields[2].kind, FieldKind::Text);
        assert_eq!(schema.fields[3].options(), &["X".to_string()]);
        assert_eq!(service.schema(&schema.id).unwrap(), schema);
    }
}
