use std::collections::HashSet;

use log::debug;

/// Turns raw header cells into field names.
///
/// The output has exactly one name per input cell, in the same order, and no two names
/// are equal:
/// - a blank cell takes the name of the previous non-blank cell (merged headers span
///   several columns in the source files), or `Column N` when nothing precedes it;
/// - underscores become spaces and the text is title-cased;
/// - repeated names get `_2`, `_3`, ... in order of appearance.
pub fn normalize_headers(cells: &[Option<String>]) -> Vec<String> {
    let mut previous: Option<String> = None;
    let mut names: Vec<String> = Vec::with_capacity(cells.len());
    for (idx, cell) in cells.iter().enumerate() {
        let normalized = cell.as_deref().map(normalize_name).unwrap_or_default();
        let name = if !normalized.is_empty() {
            previous = Some(normalized.clone());
            normalized
        } else if let Some(p) = previous.clone() {
            p
        } else {
            format!("Column {}", idx + 1)
        };
        names.push(name);
    }
    dedup_names(names)
}

/// `first_name ` -> `First Name`
pub fn normalize_name(raw: &str) -> String {
    let spaced = raw.replace('_', " ");
    let collapsed: Vec<&str> = spaced.split_whitespace().collect();
    title_case(&collapsed.join(" "))
}

/// Upper-cases every letter that follows a character without case, lower-cases the others.
pub fn title_case(s: &str) -> String {
    let mut res = String::with_capacity(s.len());
    let mut prev_cased = false;
    for c in s.chars() {
        let cased = c.is_uppercase() || c.is_lowercase();
        if cased && prev_cased {
            res.extend(c.to_lowercase());
        } else if cased {
            res.extend(c.to_uppercase());
        } else {
            res.push(c);
        }
        prev_cased = cased;
    }
    res
}

fn dedup_names(names: Vec<String>) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut res: Vec<String> = Vec::with_capacity(names.len());
    for name in names {
        if seen.insert(name.clone()) {
            res.push(name);
            continue;
        }
        let mut n = 2;
        let mut candidate = format!("{}_{}", name, n);
        while seen.contains(&candidate) {
            n += 1;
            candidate = format!("{}_{}", name, n);
        }
        debug!("dedup_names: renaming duplicate {:?} to {:?}", name, candidate);
        seen.insert(candidate.clone());
        res.push(candidate);
    }
    res
}
