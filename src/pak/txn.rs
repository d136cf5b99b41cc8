#![forbid(unsafe_code)]

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::pak::backend::{ResourceBackend, UpdateSession};
use crate::pak::error::{PakError, PakResult};
use crate::pak::format::{ResourceEntry, ResourceKey, PAYLOAD_TYPE};

/// One update session against a target, committed or discarded as a unit.
///
/// `begin` opens the session. `commit` and `abort` consume the transaction,
/// so a finished session can never be reused. A transaction dropped while
/// still open discards everything it staged.
///
/// Only payload resources are ever removed. Whatever else the target holds
/// (icons, version info, manifests) is left alone.
pub struct ResourceTransaction {
    target: PathBuf,
    session: Option<Box<dyn UpdateSession>>,
    staged: HashSet<ResourceKey>,
    /// Payload resources the target held when the session began.
    existing: Vec<ResourceKey>,
    failed: bool,
}

impl ResourceTransaction {
    pub fn begin(
        backend: &dyn ResourceBackend,
        target: &Path,
        delete_existing: bool,
    ) -> PakResult<Self> {
        info!(
            target = %target.display(),
            backend = backend.name(),
            delete_existing,
            "beginning resource update"
        );
        let existing = existing_payload(backend, target)?;
        let session = backend.begin(target)?;
        let mut tx = Self {
            target: target.to_path_buf(),
            session: Some(session),
            staged: HashSet::new(),
            existing,
            failed: false,
        };
        if delete_existing {
            tx.remove_existing(false)?;
        }
        Ok(tx)
    }

    /// Number of resources staged so far.
    pub fn staged(&self) -> usize {
        self.staged.len()
    }

    /// Stages one entry. The first failure poisons the session.
    pub fn put(&mut self, entry: ResourceEntry) -> PakResult<()> {
        if self.failed {
            return Err(PakError::SessionFailed);
        }
        let session = self.session.as_mut().ok_or(PakError::SessionClosed)?;

        if !self.staged.insert(entry.key().clone()) {
            self.failed = true;
            return Err(PakError::DuplicateKey(entry.key().name.to_string()));
        }

        debug!(resource = %entry.key().name, bytes = entry.size(), "staging");
        if let Err(e) = session.update(entry.key(), entry.data()) {
            self.failed = true;
            return Err(e);
        }
        Ok(())
    }

    /// Removes payload resources from earlier runs that this transaction has
    /// not staged, so the target ends up holding exactly this payload.
    pub fn drop_unstaged(&mut self) -> PakResult<()> {
        self.remove_existing(true)
    }

    fn remove_existing(&mut self, keep_staged: bool) -> PakResult<()> {
        if self.failed {
            return Err(PakError::SessionFailed);
        }
        let session = self.session.as_mut().ok_or(PakError::SessionClosed)?;
        for key in &self.existing {
            if keep_staged && self.staged.contains(key) {
                continue;
            }
            debug!(resource = %key.name, "removing");
            if let Err(e) = session.delete(key) {
                self.failed = true;
                return Err(e);
            }
        }
        Ok(())
    }

    /// Writes every staged entry to the target in one step. On failure the
    /// session is discarded and the target keeps its previous contents.
    pub fn commit(mut self) -> PakResult<()> {
        let mut session = self.session.take().ok_or(PakError::SessionClosed)?;
        if self.failed {
            discard(session.as_mut());
            return Err(PakError::SessionFailed);
        }

        info!(resources = self.staged.len(), "finalizing update");
        match session.end(false) {
            Ok(()) => Ok(()),
            Err(e) => {
                discard(session.as_mut());
                Err(e)
            }
        }
    }

    pub fn abort(mut self) -> PakResult<()> {
        let mut session = self.session.take().ok_or(PakError::SessionClosed)?;
        info!(target = %self.target.display(), "discarding resource update");
        session.end(true)
    }
}

/// Reader is closed again before the session opens.
fn existing_payload(backend: &dyn ResourceBackend, target: &Path) -> PakResult<Vec<ResourceKey>> {
    let mut reader = backend.open_reader(target)?;
    Ok(reader
        .names(PAYLOAD_TYPE)?
        .into_iter()
        .map(ResourceKey::payload)
        .collect())
}

fn discard(session: &mut dyn UpdateSession) {
    match session.end(true) {
        Ok(()) | Err(PakError::SessionClosed) => {}
        Err(e) => warn!(error = %e, "failed to discard update session"),
    }
}

impl Drop for ResourceTransaction {
    fn drop(&mut self) {
        if let Some(mut session) = self.session.take() {
            warn!(target = %self.target.display(), "update session left open; discarding");
            discard(session.as_mut());
        }
    }
}
