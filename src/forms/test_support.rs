// Helpers shared by the tests: in-memory xlsx files and services on temporary directories.

use std::io::{Cursor, Write};
use std::time::Duration;

use form_inference::cell_ref::column_letters;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::forms::config_reader::Settings;
use crate::forms::service::FormService;
use crate::forms::*;

pub fn test_service(dir: &Path) -> FormService {
    let _ = env_logger::builder().is_test(true).try_init();
    let settings = Settings {
        lock_timeout: Duration::from_secs(10),
        ..Settings::in_dir(dir)
    };
    FormService::open(settings).unwrap()
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

struct FixtureSheet {
    name: String,
    rows: Vec<Vec<String>>,
    validations: Vec<(String, String, String)>,
    x14_validations: Vec<(String, String, String)>,
}

/// Builds a minimal xlsx workbook: string cells, data validations (classic and x14),
/// defined names and the active tab.
#[derive(Default)]
pub struct XlsxFixture {
    sheets: Vec<FixtureSheet>,
    defined_names: Vec<(String, Option<usize>, String)>,
    active_tab: usize,
}

impl XlsxFixture {
    pub fn new() -> XlsxFixture {
        XlsxFixture::default()
    }

    /// Adds a sheet. Empty strings are left out of the file.
    pub fn sheet(mut self, name: &str, rows: &[&[&str]]) -> XlsxFixture {
        self.sheets.push(FixtureSheet {
            name: name.to_string(),
            rows: rows
                .iter()
                .map(|r| r.iter().map(|s| s.to_string()).collect())
                .collect(),
            validations: Vec::new(),
            x14_validations: Vec::new(),
        });
        self
    }

    fn sheet_mut(&mut self, name: &str) -> &mut FixtureSheet {
        self.sheets
            .iter_mut()
            .find(|s| s.name == name)
            .unwrap_or_else(|| panic!("no sheet {} in the fixture", name))
    }

    pub fn validation(mut self, sheet: &str, vtype: &str, sqref: &str, formula: &str) -> XlsxFixture {
        self.sheet_mut(sheet)
            .validations
            .push((vtype.to_string(), sqref.to_string(), formula.to_string()));
        self
    }

    pub fn x14_validation(
        mut self,
        sheet: &str,
        vtype: &str,
        sqref: &str,
        formula: &str,
    ) -> XlsxFixture {
        self.sheet_mut(sheet)
            .x14_validations
            .push((vtype.to_string(), sqref.to_string(), formula.to_string()));
        self
    }

    pub fn defined_name(mut self, name: &str, target: &str) -> XlsxFixture {
        self.defined_names
            .push((name.to_string(), None, target.to_string()));
        self
    }

    /// A name only visible from the sheet at `sheet_idx`.
    pub fn local_defined_name(mut self, sheet_idx: usize, name: &str, target: &str) -> XlsxFixture {
        self.defined_names
            .push((name.to_string(), Some(sheet_idx), target.to_string()));
        self
    }

    pub fn active_tab(mut self, idx: usize) -> XlsxFixture {
        self.active_tab = idx;
        self
    }

    fn content_types(&self) -> String {
        let mut s = String::from(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/>"#,
        );
        for i in 0..self.sheets.len() {
            s.push_str(&format!(
                r#"<Override PartName="/xl/worksheets/sheet{}.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/>"#,
                i + 1
            ));
        }
        s.push_str("</Types>");
        s
    }

    fn workbook(&self) -> String {
        let mut s = String::from(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">"#,
        );
        s.push_str(&format!(
            r#"<bookViews><workbookView activeTab="{}"/></bookViews><sheets>"#,
            self.active_tab
        ));
        for (i, sheet) in self.sheets.iter().enumerate() {
            s.push_str(&format!(
                r#"<sheet name="{}" sheetId="{}" r:id="rId{}"/>"#,
                escape(&sheet.name),
                i + 1,
                i + 1
            ));
        }
        s.push_str("</sheets>");
        if !self.defined_names.is_empty() {
            s.push_str("<definedNames>");
            for (name, scope, target) in self.defined_names.iter() {
                let scope = scope
                    .map(|idx| format!(r#" localSheetId="{}""#, idx))
                    .unwrap_or_default();
                s.push_str(&format!(
                    r#"<definedName name="{}"{}>{}</definedName>"#,
                    escape(name),
                    scope,
                    escape(target)
                ));
            }
            s.push_str("</definedNames>");
        }
        s.push_str("</workbook>");
        s
    }

    fn workbook_rels(&self) -> String {
        let mut s = String::from(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#,
        );
        for i in 0..self.sheets.len() {
            s.push_str(&format!(
                r#"<Relationship Id="rId{}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet{}.xml"/>"#,
                i + 1,
                i + 1
            ));
        }
        s.push_str("</Relationships>");
        s
    }

    fn worksheet(sheet: &FixtureSheet) -> String {
        let mut s = String::from(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships" xmlns:x14="http://schemas.microsoft.com/office/spreadsheetml/2009/9/main" xmlns:xm="http://schemas.microsoft.com/office/excel/2006/main"><sheetData>"#,
        );
        for (r, row) in sheet.rows.iter().enumerate() {
            if row.iter().all(|c| c.is_empty()) {
                continue;
            }
            s.push_str(&format!(r#"<row r="{}">"#, r + 1));
            for (c, value) in row.iter().enumerate() {
                if value.is_empty() {
                    continue;
                }
                s.push_str(&format!(
                    r#"<c r="{}{}" t="inlineStr"><is><t>{}</t></is></c>"#,
                    column_letters(c),
                    r + 1,
                    escape(value)
                ));
            }
            s.push_str("</row>");
        }
        s.push_str("</sheetData>");
        if !sheet.validations.is_empty() {
            s.push_str(&format!(
                r#"<dataValidations count="{}">"#,
                sheet.validations.len()
            ));
            for (vtype, sqref, formula) in sheet.validations.iter() {
                s.push_str(&format!(
                    r#"<dataValidation type="{}" allowBlank="1" showInputMessage="1" showErrorMessage="1" sqref="{}"><formula1>{}</formula1></dataValidation>"#,
                    escape(vtype),
                    escape(sqref),
                    escape(formula)
                ));
            }
            s.push_str("</dataValidations>");
        }
        if !sheet.x14_validations.is_empty() {
            s.push_str(&format!(
                r#"<extLst><ext uri="{{CCE6A557-97BC-4b89-ADB6-D9C93CAAB3DF}}"><x14:dataValidations count="{}">"#,
                sheet.x14_validations.len()
            ));
            for (vtype, sqref, formula) in sheet.x14_validations.iter() {
                s.push_str(&format!(
                    r#"<x14:dataValidation type="{}" allowBlank="1"><x14:formula1><xm:f>{}</xm:f></x14:formula1><xm:sqref>{}</xm:sqref></x14:dataValidation>"#,
                    escape(vtype),
                    escape(formula),
                    escape(sqref)
                ));
            }
            s.push_str("</x14:dataValidations></ext></extLst>");
        }
        s.push_str("</worksheet>");
        s
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
        let mut parts: Vec<(String, String)> = vec![
            ("[Content_Types].xml".to_string(), self.content_types()),
            (
                "_rels/.rels".to_string(),
                r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#
                    .to_string(),
            ),
            ("xl/workbook.xml".to_string(), self.workbook()),
            ("xl/_rels/workbook.xml.rels".to_string(), self.workbook_rels()),
        ];
        for (i, sheet) in self.sheets.iter().enumerate() {
            parts.push((
                format!("xl/worksheets/sheet{}.xml", i + 1),
                XlsxFixture::worksheet(sheet),
            ));
        }
        for (name, contents) in parts.iter() {
            zip.start_file(name.as_str(), options).unwrap();
            zip.write_all(contents.as_bytes()).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }
}
