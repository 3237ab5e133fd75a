// Copyright (c) The testwatch Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! On-disk storage for swapped-out sessions.

use crate::{
    errors::{ImportError, StoreError},
    model::{Session, SessionId},
    reports::{read_swapped_report, write_report},
};
use atomicwrites::{AtomicFile, OverwriteBehavior};
use camino::{Utf8Path, Utf8PathBuf};
use std::{fs, io};
use tracing::{debug, warn};

/// Stores sessions evicted from the in-memory history as one report file
/// per session.
#[derive(Clone, Debug)]
pub struct HistoryStore {
    dir: Utf8PathBuf,
}

impl HistoryStore {
    /// Opens a store rooted at `dir`, creating the directory if needed.
    pub fn new(dir: impl Into<Utf8PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|error| StoreError::CreateDir {
            path: dir.clone(),
            error,
        })?;
        Ok(Self { dir })
    }

    /// The directory swap files live in.
    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    /// The swap file a session is stored at.
    pub fn swap_path(&self, id: SessionId) -> Utf8PathBuf {
        self.dir.join(format!("{id}.xml"))
    }

    /// Serializes `session` to its swap file. The file is replaced
    /// atomically, so a crash mid-write cannot leave a truncated report
    /// behind.
    pub(crate) fn write_session(&self, session: &Session) -> Result<(), StoreError> {
        let path = self.swap_path(session.id());
        debug!("swapping session {} out to `{path}`", session.id());
        AtomicFile::new(&path, OverwriteBehavior::AllowOverwrite)
            .write(|out| write_report(session, out))
            .map_err(|error| match error {
                atomicwrites::Error::Internal(error) => StoreError::SwapWrite {
                    path: path.clone(),
                    error,
                },
                atomicwrites::Error::User(error) => StoreError::SwapSerialize { path, error },
            })
    }

    /// Reads a session back from its swap file. The returned session keeps
    /// `id` regardless of what the file says. A session without a swap file,
    /// e.g. one that is still resident, reports [`StoreError::NotSwapped`].
    pub(crate) fn read_session(&self, id: SessionId) -> Result<Session, StoreError> {
        let path = self.swap_path(id);
        debug!("reading session {id} back from `{path}`");
        read_swapped_report(&path, id).map_err(|error| {
            if matches!(
                &error,
                ImportError::FileOpen { error, .. } if error.kind() == io::ErrorKind::NotFound
            ) {
                StoreError::NotSwapped { id }
            } else {
                StoreError::SwapRead { path, error }
            }
        })
    }

    /// Deletes a session's swap file. Deleting a file that does not exist
    /// succeeds.
    pub(crate) fn delete_session(&self, id: SessionId) -> Result<(), StoreError> {
        let path = self.swap_path(id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(StoreError::SwapDelete { path, error }),
        }
    }

    /// Deletes every file in the store's directory, including swap files of
    /// sessions no registry knows about anymore. Files that cannot be
    /// removed are skipped with a warning.
    pub(crate) fn delete_all(&self) -> Result<(), StoreError> {
        debug!("deleting all swap files under `{}`", self.dir);
        let entries = fs::read_dir(&self.dir).map_err(|error| StoreError::SwapDelete {
            path: self.dir.clone(),
            error,
        })?;
        for entry in entries {
            let Ok(entry) = entry else { continue };
            let path = entry.path();
            if let Err(error) = fs::remove_file(&path) {
                warn!("failed to delete swap file `{}`: {error}", path.display());
            }
        }
        Ok(())
    }
}
