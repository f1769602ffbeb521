use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::forms::io_roster::Member;
use crate::forms::storage::{atomic_write_json, read_json, FormLocks};
use crate::forms::*;

/// What loading a member list did to a roster.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RosterLoad {
    pub added: usize,
    pub total: usize,
}

/// Keeps the roster of each form, one file per form under `<data dir>/rosters/`.
pub struct IdentityReconciler {
    dir: PathBuf,
    locks: Arc<FormLocks>,
}

impl IdentityReconciler {
    pub fn new(dir: PathBuf, locks: Arc<FormLocks>) -> IdentityReconciler {
        IdentityReconciler { dir, locks }
    }

    fn path_of(&self, id: &SchemaId) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    /// The roster of a form. A form without a roster has an empty one.
    pub fn roster(&self, id: &SchemaId) -> FormsResult<Roster> {
        Ok(read_json(&self.path_of(id))?.unwrap_or_default())
    }

    pub(crate) fn save_roster(&self, id: &SchemaId, roster: &Roster) -> FormsResult<()> {
        atomic_write_json(&self.path_of(id), roster)
    }

    /// Marks a respondent as filled, without taking the form lock. The caller holds it.
    pub(crate) fn reconcile_unlocked(
        &self,
        id: &SchemaId,
        identity: &str,
        submitted_at: DateTime<Utc>,
    ) -> FormsResult<Reconciliation> {
        let mut roster = self.roster(id)?;
        let outcome = roster
            .reconcile(identity, submitted_at)
            .map_err(|_| FormsError::EmptyIdentity {})?;
        self.save_roster(id, &roster)?;
        debug!("reconcile: form {}: {:?} -> {:?}", id, identity, outcome);
        Ok(outcome)
    }

    pub fn reconcile(
        &self,
        id: &SchemaId,
        identity: &str,
        submitted_at: DateTime<Utc>,
    ) -> FormsResult<Reconciliation> {
        self.locks
            .with_lock(id, || self.reconcile_unlocked(id, identity, submitted_at))
    }

    /// Merges members into the roster. Known members keep their status, whether they
    /// were loaded before or walked in.
    pub fn load_members(&self, id: &SchemaId, members: &[Member]) -> FormsResult<RosterLoad> {
        self.locks.with_lock(id, || {
            let mut roster = self.roster(id)?;
            let mut added = 0;
            for m in members.iter() {
                match roster.add_expected(&m.name, m.contact.as_deref()) {
                    Ok(true) => added += 1,
                    Ok(false) => {}
                    Err(e) => warn!("load_members: form {}: skipping {:?}: {}", id, m.name, e),
                }
            }
            self.save_roster(id, &roster)?;
            info!(
                "load_members: form {}: {} new members, {} in total",
                id,
                added,
                roster.len()
            );
            Ok(RosterLoad {
                added,
                total: roster.len(),
            })
        })
    }

    pub fn progress(&self, id: &SchemaId) -> FormsResult<Progress> {
        Ok(self.roster(id)?.progress())
    }

    pub fn pending(&self, id: &SchemaId) -> FormsResult<Vec<RosterEntry>> {
        Ok(self.roster(id)?.pending().into_iter().cloned().collect())
    }
}
