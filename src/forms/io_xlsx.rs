// Reading of xlsx workbooks.
//
// The cell values come from calamine. The parts calamine does not expose (the data
// validations of each sheet, the defined names and the active tab) are read directly
// from the archive.

use std::collections::HashMap;
use std::io::{Cursor, Read, Seek};

use calamine::{Reader, Xlsx};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader as XmlReader;
use zip::result::ZipError;
use zip::ZipArchive;

use crate::forms::io_common::raw_sheet_from_range;
use crate::forms::*;

const WORKBOOK_PART: &str = "xl/workbook.xml";
const WORKBOOK_RELS_PART: &str = "xl/_rels/workbook.xml.rels";

/// A workbook, fully loaded in memory.
#[derive(Debug, Clone)]
pub struct Workbook {
    label: String,
    sheet_names: Vec<String>,
    active: usize,
    sheets: HashMap<String, RawSheet>,
    validations: HashMap<String, Vec<RawValidation>>,
    // Keys are lower case: names are case-insensitive in a workbook.
    defined_names: HashMap<String, String>,
    // (sheet name, lower case name) for the names scoped to one sheet.
    local_names: HashMap<(String, String), String>,
}

impl SheetLookup for Workbook {
    fn sheet(&self, name: &str) -> Option<&RawSheet> {
        self.canonical_name(name).and_then(|n| self.sheets.get(n))
    }

    fn defined_name(&self, sheet: &str, name: &str) -> Option<&str> {
        let key = name.to_lowercase();
        self.canonical_name(sheet)
            .and_then(|s| self.local_names.get(&(s.to_string(), key.clone())))
            .or_else(|| self.defined_names.get(&key))
            .map(|s| s.as_str())
    }
}

/// The pieces of xl/workbook.xml that matter here.
#[derive(Debug, Default)]
struct WorkbookPart {
    /// (sheet name, relationship id), in workbook order.
    sheets: Vec<(String, String)>,
    active_tab: Option<usize>,
    defined_names: HashMap<String, String>,
    /// Names with a `localSheetId`: (sheet index, lower case name) -> reference.
    local_names: HashMap<(usize, String), String>,
}

impl Workbook {
    pub fn read_file(path: &Path) -> FormsResult<Workbook> {
        let bytes = fs::read(path).context(IoSnafu {
            path: path.display().to_string(),
        })?;
        Workbook::from_bytes(bytes, &path.display().to_string())
    }

    /// Reads a workbook from its raw bytes. The label names the workbook in errors and
    /// logs.
    pub fn from_bytes(bytes: Vec<u8>, label: &str) -> FormsResult<Workbook> {
        let mut xlsx: Xlsx<_> = Xlsx::new(Cursor::new(bytes.as_slice()))
            .context(MalformedSpreadsheetSnafu { path: label })?;
        let sheet_names = xlsx.sheet_names().to_vec();
        debug!("from_bytes: {}: sheets {:?}", label, sheet_names);

        let mut sheets: HashMap<String, RawSheet> = HashMap::new();
        for name in sheet_names.iter() {
            let raw = match xlsx.worksheet_range(name) {
                Some(range) => {
                    let range = range.context(MalformedSpreadsheetSnafu { path: label })?;
                    raw_sheet_from_range(&range)
                }
                None => RawSheet::default(),
            };
            sheets.insert(name.clone(), raw);
        }

        let mut archive = ZipArchive::new(Cursor::new(bytes.as_slice()))
            .context(MalformedArchiveSnafu { path: label })?;
        let book = match read_optional_part(&mut archive, WORKBOOK_PART, label)? {
            Some(xml) => parse_workbook_part(&xml).context(MalformedXmlSnafu {
                path: label,
                part: WORKBOOK_PART,
            })?,
            None => WorkbookPart::default(),
        };
        let rels = match read_optional_part(&mut archive, WORKBOOK_RELS_PART, label)? {
            Some(xml) => parse_relationships(&xml).context(MalformedXmlSnafu {
                path: label,
                part: WORKBOOK_RELS_PART,
            })?,
            None => HashMap::new(),
        };

        let mut validations: HashMap<String, Vec<RawValidation>> = HashMap::new();
        for (name, rid) in book.sheets.iter() {
            let part = match rels.get(rid) {
                Some(p) => p,
                None => {
                    warn!("from_bytes: {}: no part for sheet {:?} ({})", label, name, rid);
                    continue;
                }
            };
            let xml = match read_optional_part(&mut archive, part, label)? {
                Some(xml) => xml,
                None => {
                    warn!("from_bytes: {}: missing part {} for sheet {:?}", label, part, name);
                    continue;
                }
            };
            let vs = parse_validations(&xml).context(MalformedXmlSnafu {
                path: label,
                part: part.as_str(),
            })?;
            debug!("from_bytes: {}: sheet {:?}: validations {:?}", label, name, vs);
            validations.insert(name.clone(), vs);
        }

        let mut local_names: HashMap<(String, String), String> = HashMap::new();
        for ((idx, name), target) in book.local_names.iter() {
            match book.sheets.get(*idx) {
                Some((sheet, _)) => {
                    local_names.insert((sheet.clone(), name.clone()), target.clone());
                }
                None => warn!(
                    "from_bytes: {}: name {:?} is scoped to a missing sheet {}",
                    label, name, idx
                ),
            }
        }

        let active = book
            .active_tab
            .filter(|idx| *idx < sheet_names.len())
            .unwrap_or(0);
        info!(
            "from_bytes: {}: {} sheets, active sheet {:?}, {} defined names",
            label,
            sheet_names.len(),
            sheet_names.get(active),
            book.defined_names.len() + local_names.len()
        );
        Ok(Workbook {
            label: label.to_string(),
            sheet_names,
            active,
            sheets,
            validations,
            defined_names: book.defined_names,
            local_names,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn sheet_names(&self) -> &[String] {
        &self.sheet_names
    }

    /// The sheet that was selected when the workbook was saved.
    pub fn active_sheet(&self) -> Option<&str> {
        self.sheet_names.get(self.active).map(|s| s.as_str())
    }

    /// The data validations declared on a sheet, in document order.
    pub fn validations(&self, sheet: &str) -> &[RawValidation] {
        self.canonical_name(sheet)
            .and_then(|n| self.validations.get(n))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// The sheet to read: the requested one (exact match first, then ignoring case), or
    /// the active sheet.
    pub fn resolve_sheet_name(&self, requested: Option<&str>) -> FormsResult<String> {
        let found = match requested {
            Some(name) => self.canonical_name(name),
            None => self.active_sheet(),
        };
        match found {
            Some(name) => Ok(name.to_string()),
            None => MissingSheetSnafu {
                sheet: requested.unwrap_or("<active>"),
                path: self.label.clone(),
                available: self.sheet_names.clone(),
            }
            .fail(),
        }
    }

    fn canonical_name(&self, name: &str) -> Option<&str> {
        let exact = self.sheet_names.iter().find(|n| n.as_str() == name);
        exact
            .or_else(|| {
                self.sheet_names
                    .iter()
                    .find(|n| n.to_lowercase() == name.to_lowercase())
            })
            .map(|n| n.as_str())
    }
}

fn read_optional_part<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    part: &str,
    label: &str,
) -> FormsResult<Option<String>> {
    let mut file = match archive.by_name(part) {
        Ok(f) => f,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e).context(MalformedArchiveSnafu { path: label }),
    };
    let mut contents = String::new();
    file.read_to_string(&mut contents).context(IoSnafu {
        path: format!("{}:{}", label, part),
    })?;
    Ok(Some(contents))
}

fn attribute(
    reader: &XmlReader<&[u8]>,
    e: &BytesStart,
    local: &[u8],
) -> Result<Option<String>, quick_xml::Error> {
    for attr in e.attributes() {
        let attr = attr?;
        if attr.key.local_name().as_ref() == local {
            return Ok(Some(attr.decode_and_unescape_value(reader)?.to_string()));
        }
    }
    Ok(None)
}

fn parse_workbook_part(xml: &str) -> Result<WorkbookPart, quick_xml::Error> {
    let mut reader = XmlReader::from_str(xml);
    reader.trim_text(true);
    let mut buf = Vec::new();
    let mut res = WorkbookPart::default();
    // Set while inside a <definedName> element, with its localSheetId.
    let mut current_name: Option<(String, Option<usize>)> = None;
    loop {
        let event = reader.read_event_into(&mut buf)?;
        match &event {
            Event::Start(e) | Event::Empty(e) => match e.local_name().as_ref() {
                b"sheet" => {
                    let name = attribute(&reader, e, b"name")?;
                    // r:id, whatever the prefix of the relationships namespace is.
                    let rid = attribute(&reader, e, b"id")?;
                    if let (Some(name), Some(rid)) = (name, rid) {
                        res.sheets.push((name, rid));
                    }
                }
                b"workbookView" if res.active_tab.is_none() => {
                    res.active_tab = attribute(&reader, e, b"activeTab")?
                        .and_then(|s| s.parse::<usize>().ok())
                        .or(Some(0));
                }
                b"definedName" if matches!(event, Event::Start(_)) => {
                    let scope = attribute(&reader, e, b"localSheetId")?
                        .and_then(|s| s.parse::<usize>().ok());
                    current_name = attribute(&reader, e, b"name")?.map(|n| (n, scope));
                }
                _ => {}
            },
            Event::Text(e) => {
                if let Some((name, scope)) = current_name.take() {
                    let target = e.unescape()?.to_string();
                    let key = name.to_lowercase();
                    match scope {
                        _ if name.starts_with("_xlnm.") => {
                            debug!("parse_workbook_part: skipping built-in name {}", name);
                        }
                        Some(idx) => {
                            res.local_names.entry((idx, key)).or_insert(target);
                        }
                        None => {
                            res.defined_names.entry(key).or_insert(target);
                        }
                    }
                }
            }
            Event::End(e) if e.local_name().as_ref() == b"definedName" => {
                current_name = None;
            }
            Event::Eof => break,
            _ => {}
        }
        drop(event);
        buf.clear();
    }
    Ok(res)
}

/// Relationship id -> path of the part inside the archive.
fn parse_relationships(xml: &str) -> Result<HashMap<String, String>, quick_xml::Error> {
    let mut reader = XmlReader::from_str(xml);
    reader.trim_text(true);
    let mut buf = Vec::new();
    let mut res: HashMap<String, String> = HashMap::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"Relationship" => {
                let id = attribute(&reader, &e, b"Id")?;
                let target = attribute(&reader, &e, b"Target")?;
                if let (Some(id), Some(target)) = (id, target) {
                    let part = match target.strip_prefix('/') {
                        Some(absolute) => absolute.to_string(),
                        None => format!("xl/{}", target),
                    };
                    res.insert(id, part);
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(res)
}

/// What is being read inside a data validation element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValidationText {
    Nothing,
    Formula,
    Sqref,
}

/// Reads both the classic `<dataValidation>` elements and the `<x14:dataValidation>`
/// extension, which Excel uses when a list points to another sheet.
fn parse_validations(xml: &str) -> Result<Vec<RawValidation>, quick_xml::Error> {
    let mut reader = XmlReader::from_str(xml);
    reader.trim_text(true);
    let mut buf = Vec::new();
    let mut res: Vec<RawValidation> = Vec::new();
    let mut current: Option<RawValidation> = None;
    let mut reading = ValidationText::Nothing;
    loop {
        let event = reader.read_event_into(&mut buf)?;
        match &event {
            Event::Start(e) | Event::Empty(e) => {
                let is_empty = matches!(event, Event::Empty(_));
                match e.local_name().as_ref() {
                    b"dataValidation" => {
                        let v = RawValidation {
                            validation_type: attribute(&reader, e, b"type")?.unwrap_or_default(),
                            sqref: attribute(&reader, e, b"sqref")?.unwrap_or_default(),
                            formula: String::new(),
                        };
                        if is_empty {
                            res.push(v);
                        } else {
                            current = Some(v);
                        }
                    }
                    b"formula1" if !is_empty => reading = ValidationText::Formula,
                    b"sqref" if !is_empty => reading = ValidationText::Sqref,
                    _ => {}
                }
            }
            Event::Text(e) => {
                if let Some(v) = current.as_mut() {
                    let text = e.unescape()?;
                    match reading {
                        ValidationText::Formula => v.formula.push_str(&text),
                        ValidationText::Sqref => {
                            if !v.sqref.is_empty() {
                                v.sqref.push(' ');
                            }
                            v.sqref.push_str(text.trim());
                        }
                        ValidationText::Nothing => {}
                    }
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"formula1" | b"sqref" => reading = ValidationText::Nothing,
                b"dataValidation" => {
                    if let Some(v) = current.take() {
                        res.push(v);
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        drop(event);
        buf.clear();
    }
    Ok(res)
}
