use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::config::*;

/// The key used to match respondents: trimmed, inner whitespace collapsed, lower-cased.
pub fn normalize_identity(raw: &str) -> String {
    let words: Vec<&str> = raw.split_whitespace().collect();
    words.join(" ").to_lowercase()
}

/// The expected respondents of one form.
///
/// The roster is advisory: a submission from someone who is not on it adds them.
/// Entries are never removed.
#[derive(Eq, PartialEq, Debug, Clone, Default, Serialize, Deserialize)]
pub struct Roster {
    entries: Vec<RosterEntry>,
}

/// What a reconciliation did to the roster.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum Reconciliation {
    /// An existing entry was marked as filled.
    Matched,
    /// The respondent was not expected and has been added.
    WalkIn,
}

#[derive(Eq, PartialEq, Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Progress {
    pub filled: usize,
    pub total: usize,
}

impl Progress {
    /// Between 0 and 1. An empty roster has no progress.
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.filled as f64 / self.total as f64
        }
    }
}

impl Roster {
    pub fn new() -> Roster {
        Roster::default()
    }

    pub fn entries(&self) -> &[RosterEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn find(&self, identity: &str) -> Option<&RosterEntry> {
        let key = normalize_identity(identity);
        self.entries.iter().find(|e| e.identity_key == key)
    }

    fn find_mut(&mut self, key: &str) -> Option<&mut RosterEntry> {
        self.entries.iter_mut().find(|e| e.identity_key == key)
    }

    /// Adds an expected respondent. An entry that already exists keeps its status; its
    /// contact is only filled in when it had none.
    ///
    /// Returns true when a new entry was created.
    pub fn add_expected(&mut self, name: &str, contact: Option<&str>) -> Result<bool, RosterError> {
        let key = normalize_identity(name);
        if key.is_empty() {
            return Err(RosterError::EmptyIdentity);
        }
        let contact = contact
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(|c| c.to_string());
        if let Some(existing) = self.find_mut(&key) {
            if existing.contact.is_none() {
                existing.contact = contact;
            }
            return Ok(false);
        }
        self.entries.push(RosterEntry {
            identity_key: key,
            display_name: name.trim().to_string(),
            contact,
            status: RosterStatus::Pending,
            last_submitted_at: None,
        });
        Ok(true)
    }

    /// Records a submission: the matching entry becomes (or stays) filled with a fresh
    /// timestamp, or a new filled entry is added.
    pub fn reconcile(
        &mut self,
        identity: &str,
        submitted_at: DateTime<Utc>,
    ) -> Result<Reconciliation, RosterError> {
        let key = normalize_identity(identity);
        if key.is_empty() {
            return Err(RosterError::EmptyIdentity);
        }
        if let Some(entry) = self.find_mut(&key) {
            debug!(
                "reconcile: {:?} matched {:?} ({:?})",
                identity, entry.display_name, entry.status
            );
            entry.status = RosterStatus::Filled;
            entry.last_submitted_at = Some(submitted_at);
            return Ok(Reconciliation::Matched);
        }
        info!("reconcile: adding walk-in respondent {:?}", identity.trim());
        self.entries.push(RosterEntry {
            identity_key: key,
            display_name: identity.trim().to_string(),
            contact: None,
            status: RosterStatus::Filled,
            last_submitted_at: Some(submitted_at),
        });
        Ok(Reconciliation::WalkIn)
    }

    pub fn progress(&self) -> Progress {
        Progress {
            filled: self
                .entries
                .iter()
                .filter(|e| e.status == RosterStatus::Filled)
                .count(),
            total: self.entries.len(),
        }
    }

    pub fn pending(&self) -> Vec<&RosterEntry> {
        self.entries
            .iter()
            .filter(|e| e.status == RosterStatus::Pending)
            .collect()
    }
}
