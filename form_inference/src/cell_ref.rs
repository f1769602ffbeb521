//! A1-style cell and range references.
//!
//! Everything here is 0-based: `A1` is row 0, column 0.

use std::fmt::Display;
use std::str::FromStr;

use crate::config::ValidationRuleParseError;

/// Largest column index of a worksheet (`XFD`).
pub const MAX_COLUMN: usize = 16_383;
/// Largest row index of a worksheet.
pub const MAX_ROW: usize = 1_048_575;

/// `A` -> 0, `Z` -> 25, `AA` -> 26. Case-insensitive.
pub fn column_index(letters: &str) -> Option<usize> {
    if letters.is_empty() || letters.len() > 3 {
        return None;
    }
    let mut acc: usize = 0;
    for c in letters.chars() {
        if !c.is_ascii_alphabetic() {
            return None;
        }
        let digit = (c.to_ascii_uppercase() as usize) - ('A' as usize) + 1;
        acc = acc * 26 + digit;
    }
    let idx = acc - 1;
    if idx > MAX_COLUMN {
        None
    } else {
        Some(idx)
    }
}

/// 0 -> `A`, 26 -> `AA`.
pub fn column_letters(index: usize) -> String {
    let mut n = index + 1;
    let mut letters: Vec<char> = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push((b'A' + rem as u8) as char);
        n = (n - 1) / 26;
    }
    letters.iter().rev().collect()
}

#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Ord, PartialOrd)]
pub struct CellRef {
    pub row: usize,
    pub col: usize,
}

impl Display for CellRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", column_letters(self.col), self.row + 1)
    }
}

// One side of a range. Whole-column (`A`) and whole-row (`3`) forms leave one part out.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
struct Corner {
    col: Option<usize>,
    row: Option<usize>,
}

fn parse_corner(s: &str) -> Option<Corner> {
    let s = s.trim();
    let (col_part, rest) = match s.strip_prefix('$') {
        Some(r) => split_letters(r),
        None => split_letters(s),
    };
    let row_part = rest.strip_prefix('$').unwrap_or(rest);
    let col = if col_part.is_empty() {
        None
    } else {
        Some(column_index(col_part)?)
    };
    let row = if row_part.is_empty() {
        None
    } else {
        if !row_part.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        let n: usize = row_part.parse().ok()?;
        if n == 0 || n > MAX_ROW + 1 {
            return None;
        }
        Some(n - 1)
    };
    if col.is_none() && row.is_none() {
        return None;
    }
    Some(Corner { col, row })
}

fn split_letters(s: &str) -> (&str, &str) {
    let end = s
        .char_indices()
        .find(|(_, c)| !c.is_ascii_alphabetic())
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    s.split_at(end)
}

impl FromStr for CellRef {
    type Err = ValidationRuleParseError;

    fn from_str(s: &str) -> Result<CellRef, ValidationRuleParseError> {
        match parse_corner(s) {
            Some(Corner {
                col: Some(col),
                row: Some(row),
            }) => Ok(CellRef { row, col }),
            _ => Err(ValidationRuleParseError::MalformedReference(s.to_string())),
        }
    }
}

/// A rectangular range, optionally on another sheet: `'Lists 2'!$A$1:$B$4`.
///
/// Corners are normalized so that `start` is the top-left one.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct RangeRef {
    pub sheet: Option<String>,
    pub start: CellRef,
    pub end: CellRef,
}

impl RangeRef {
    pub fn parse(s: &str) -> Result<RangeRef, ValidationRuleParseError> {
        let malformed = || ValidationRuleParseError::MalformedReference(s.to_string());
        let text = s.trim();
        let text = text.strip_prefix('=').unwrap_or(text);
        if text.is_empty() {
            return Err(ValidationRuleParseError::EmptyFormula);
        }
        let (sheet, reference) = split_sheet(text).ok_or_else(malformed)?;
        let (first, second) = match reference.split_once(':') {
            Some((a, b)) => (
                parse_corner(a).ok_or_else(malformed)?,
                parse_corner(b).ok_or_else(malformed)?,
            ),
            // Without a colon only a single cell is a reference: `Day` or `12` are not.
            None => match parse_corner(reference) {
                Some(c) if c.col.is_some() && c.row.is_some() => (c, c),
                _ => return Err(malformed()),
            },
        };
        // A1:B, A:3 and friends are not valid references.
        if first.col.is_some() != second.col.is_some()
            || first.row.is_some() != second.row.is_some()
        {
            return Err(malformed());
        }
        let (c1, c2) = (first.col.unwrap_or(0), second.col.unwrap_or(MAX_COLUMN));
        let (r1, r2) = (first.row.unwrap_or(0), second.row.unwrap_or(MAX_ROW));
        Ok(RangeRef {
            sheet,
            start: CellRef {
                row: r1.min(r2),
                col: c1.min(c2),
            },
            end: CellRef {
                row: r1.max(r2),
                col: c1.max(c2),
            },
        })
    }

    pub fn min_col(&self) -> usize {
        self.start.col
    }

    pub fn contains(&self, cell: &CellRef) -> bool {
        (self.start.row..=self.end.row).contains(&cell.row)
            && (self.start.col..=self.end.col).contains(&cell.col)
    }
}

impl Display for RangeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(sheet) = &self.sheet {
            write!(f, "'{}'!", sheet.replace('\'', "''"))?;
        }
        write!(f, "{}:{}", self.start, self.end)
    }
}

// Splits `Sheet!A1` / `'My ''quoted'' sheet'!A1` into the unquoted sheet name and the
// reference. `None` when the quoting is broken.
fn split_sheet(text: &str) -> Option<(Option<String>, &str)> {
    if let Some(rest) = text.strip_prefix('\'') {
        let mut name = String::new();
        let mut chars = rest.char_indices().peekable();
        while let Some((idx, c)) = chars.next() {
            if c != '\'' {
                name.push(c);
                continue;
            }
            if let Some((_, '\'')) = chars.peek() {
                name.push('\'');
                chars.next();
                continue;
            }
            let after = &rest[idx + 1..];
            let reference = after.strip_prefix('!')?;
            if name.is_empty() {
                return None;
            }
            return Some((Some(name), reference));
        }
        None
    } else {
        match text.rsplit_once('!') {
            Some((sheet, _)) if sheet.is_empty() => None,
            Some((sheet, reference)) => Some((Some(sheet.to_string()), reference)),
            None => Some((None, text)),
        }
    }
}

/// Parses the space separated `sqref` attribute of a validation.
pub fn parse_sqref(sqref: &str) -> Vec<Result<RangeRef, ValidationRuleParseError>> {
    sqref.split_whitespace().map(RangeRef::parse).collect()
}
