//! Change queue: replays a changeset into a working copy, the store and
//! version history.
//!
//! ## Per-change protocol
//!
//! 1. Apply the file operation to the working copy (primary file, then the
//!    companion when there is one).
//! 2. Stage everything and commit with a message describing the change.
//! 3. Mutate the persisted record for the change.
//!
//! Step 3 runs only after step 2 succeeds and before the next change starts,
//! so the store always reflects exactly the committed prefix of the
//! changeset. There is no rollback of earlier changes on failure.

use std::path::Path;

use metatrack_core::{Change, EnvironmentName, Store, StoreError, TrackedObject};
use metatrack_scm::{Author, Branch};

use crate::error::SyncError;

/// Author name used when a change carries no `last_modified_by`.
pub const DEFAULT_AUTHOR: &str = "metatrack";

pub struct ChangeQueue<'a> {
    store: &'a Store,
    environment: &'a EnvironmentName,
    branch: &'a Branch,
    /// Directory holding freshly retrieved files, laid out by repository path.
    scratch: &'a Path,
    companion_suffix: &'a str,
    author_email: &'a str,
}

impl<'a> ChangeQueue<'a> {
    pub fn new(
        store: &'a Store,
        environment: &'a EnvironmentName,
        branch: &'a Branch,
        scratch: &'a Path,
        companion_suffix: &'a str,
        author_email: &'a str,
    ) -> Self {
        Self {
            store,
            environment,
            branch,
            scratch,
            companion_suffix,
            author_email,
        }
    }

    /// Apply `changes` in order, one commit each. Returns the number applied.
    pub fn replay(&self, changes: &[Change]) -> Result<usize, SyncError> {
        let total = changes.len();
        for (applied, change) in changes.iter().enumerate() {
            if let Err(err) = self.apply(change) {
                tracing::error!(org = %self.environment, %change, applied, total, error = %err, "replay stopped");
                return Err(SyncError::PartialReplay {
                    applied,
                    total,
                    change: change.to_string(),
                    source: Box::new(err),
                });
            }
        }
        tracing::info!(org = %self.environment, total, "replayed changeset");
        Ok(total)
    }

    fn apply(&self, change: &Change) -> Result<(), SyncError> {
        let stored = self.store.find_object(self.environment, &change.object().object_id)?;
        match change {
            Change::Addition { object } => {
                self.place(object, true)?;
                self.commit(change, stored.as_ref())?;
                self.store.insert_object(self.environment, object.clone())?;
            }
            Change::Modification { object } => {
                self.place(object, true)?;
                self.commit(change, stored.as_ref())?;
                if stored.is_some() {
                    self.store.replace_object(self.environment, object.clone())?;
                } else {
                    self.store.insert_object(self.environment, object.clone())?;
                }
            }
            Change::Deletion { object } => {
                let scm = self.branch.scm();
                let repo = self.branch.path();
                scm.delete_file(repo, &object.file_path)?;
                scm.delete_file(repo, &object.companion_path(self.companion_suffix))?;
                self.commit(change, stored.as_ref())?;
                match self.store.delete_object(self.environment, &object.object_id) {
                    Ok(()) => {}
                    Err(StoreError::ObjectNotFound { object_id, .. }) => {
                        tracing::warn!(%object_id, "deleted object was not in the store");
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            Change::Rename { old, new } => {
                let scm = self.branch.scm();
                let repo = self.branch.path();
                if old.file_path != new.file_path {
                    scm.rename_file(repo, &old.file_path, &new.file_path)?;
                    scm.rename_file(
                        repo,
                        &old.companion_path(self.companion_suffix),
                        &new.companion_path(self.companion_suffix),
                    )?;
                }
                self.place(new, false)?;
                self.commit(change, Some(old))?;
                if stored.is_some() {
                    self.store.replace_object(self.environment, new.clone())?;
                } else {
                    self.store.insert_object(self.environment, new.clone())?;
                }
            }
        }
        Ok(())
    }

    /// Copy the retrieved primary (required when `require_primary`) and
    /// companion files of `object` into the working copy.
    fn place(&self, object: &TrackedObject, require_primary: bool) -> Result<(), SyncError> {
        let scm = self.branch.scm();
        let repo = self.branch.path();
        let primary = self.scratch.join(&object.file_path);
        if primary.is_file() {
            if repo.join(&object.file_path).exists() {
                scm.overwrite_file(repo, &object.file_path, &primary)?;
            } else {
                scm.add_file(repo, &object.file_path, &primary)?;
            }
        } else if require_primary {
            return Err(crate::error::io_err(
                primary,
                std::io::Error::new(std::io::ErrorKind::NotFound, "retrieved file missing"),
            ));
        }

        let companion_rel = object.companion_path(self.companion_suffix);
        let companion = self.scratch.join(&companion_rel);
        if companion.is_file() {
            scm.overwrite_file(repo, &companion_rel, &companion)?;
        }
        Ok(())
    }

    fn commit(&self, change: &Change, previous: Option<&TrackedObject>) -> Result<(), SyncError> {
        let author = Author::new(
            change
                .object()
                .last_modified_by
                .as_deref()
                .unwrap_or(DEFAULT_AUTHOR),
            self.author_email,
        );
        let id = self.branch.commit_all(&commit_message(change, previous), &author)?;
        tracing::info!(org = %self.environment, %change, commit = %id, "committed");
        Ok(())
    }
}

/// `<Kind>: <full_name>`, a blank line, then the body.
///
/// Additions list every field, modifications the fields that differ from the
/// stored record, renames the fields that differ from the old object.
/// Deletions carry `<file_path> deleted`.
pub fn commit_message(change: &Change, previous: Option<&TrackedObject>) -> String {
    let object = change.object();
    let header = format!("{}: {}", change.kind(), object.full_name);
    let body = match change {
        Change::Deletion { object } => format!("{} deleted", object.file_path),
        Change::Addition { object } => render_fields(object.fields()),
        Change::Modification { object } => match previous {
            Some(prev) => render_fields(object.changed_fields(prev)),
            None => render_fields(object.fields()),
        },
        Change::Rename { old, new } => render_fields(new.changed_fields(old)),
    };
    format!("{header}\n\n{body}")
}

fn render_fields(fields: Vec<(&'static str, String)>) -> String {
    fields
        .into_iter()
        .map(|(k, v)| format!("{k}: {v}"))
        .collect::<Vec<_>>()
        .join("\n")
}
