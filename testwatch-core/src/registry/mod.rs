// Copyright (c) The testwatch Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The session registry and its on-disk history.
//!
//! The registry keeps every known [`Session`] in most-recent-first order. At
//! most `max_history` sessions are resident in memory at a time; when a new
//! session pushes the count over that limit, the oldest inactive one is
//! serialized to a per-session report file and its entry becomes a
//! [`SessionSummary`] placeholder. Looking the session up again loads it
//! back, which may in turn swap out another one. Running and starting
//! sessions are never swapped, and swap file I/O happens outside the
//! registry lock.

mod history;

pub use history::HistoryStore;

use crate::{
    config::HistoryConfig,
    errors::StoreError,
    events::SessionListeners,
    model::{ElementId, ProgressState, Session, SessionCounts, SessionId, TestStatus},
};
use camino::Utf8Path;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

/// Locks a session handle, recovering the guard from a poisoned lock.
pub(crate) fn lock_session(session: &Arc<Mutex<Session>>) -> MutexGuard<'_, Session> {
    session.lock().unwrap_or_else(|error| error.into_inner())
}

/// Metadata kept in memory for a session whose contents live on disk.
#[derive(Clone, Debug)]
pub struct SessionSummary {
    id: SessionId,
    name: String,
    project: Option<String>,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    counts: SessionCounts,
    status: TestStatus,
    progress: ProgressState,
}

impl SessionSummary {
    /// Captures a summary of `session` as it is right now.
    pub fn of(session: &Session) -> Self {
        Self {
            id: session.id(),
            name: session.name().to_owned(),
            project: session.project().map(str::to_owned),
            started_at: session.started_at(),
            finished_at: session.finished_at(),
            counts: session.counts(),
            status: session.aggregate_status(ElementId::ROOT),
            progress: session.progress(),
        }
    }

    /// The session's id.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// The session's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The project the session belongs to, if known.
    pub fn project(&self) -> Option<&str> {
        self.project.as_deref()
    }

    /// When the run started.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// When the run reached a terminal state, if it has.
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// Session-level counters.
    pub fn counts(&self) -> SessionCounts {
        self.counts
    }

    /// The aggregate status of the whole run.
    pub fn status(&self) -> TestStatus {
        self.status
    }

    /// The lifecycle phase.
    pub fn progress(&self) -> ProgressState {
        self.progress
    }
}

#[derive(Debug)]
enum SessionState {
    /// Resident in memory.
    Loaded(Arc<Mutex<Session>>),
    /// Resident, with a swap write in flight. Reached from `Loaded` only;
    /// looking the session up during the write returns this handle.
    SwappingOut(Arc<Mutex<Session>>),
    /// On disk; only the summary remains in memory.
    Swapped(SessionSummary),
}

#[derive(Debug)]
struct SessionEntry {
    id: SessionId,
    state: SessionState,
}

/// The registry of known test run sessions, newest first.
#[derive(Debug)]
pub struct SessionRegistry {
    max_history: usize,
    store: Option<HistoryStore>,
    listeners: SessionListeners,
    inner: Mutex<Vec<SessionEntry>>,
}

impl SessionRegistry {
    /// Creates a registry without a history store. Nothing is ever swapped
    /// out; `max_history` only takes effect once a store is attached.
    pub fn new(max_history: usize) -> Self {
        Self {
            max_history,
            store: None,
            listeners: SessionListeners::new(),
            inner: Mutex::new(Vec::new()),
        }
    }

    /// Creates a registry that keeps at most `max_history` sessions resident
    /// and swaps the rest out to `store`.
    pub fn with_store(max_history: usize, store: HistoryStore) -> Self {
        Self {
            store: Some(store),
            ..Self::new(max_history)
        }
    }

    /// Creates a registry from a [`HistoryConfig`]. A configured history
    /// directory is opened as-is; without one, swap files land in `history`
    /// under `base`.
    pub fn from_config(config: &HistoryConfig, base: &Utf8Path) -> Result<Self, StoreError> {
        let dir = config
            .directory
            .clone()
            .unwrap_or_else(|| base.join("history"));
        Ok(Self::with_store(config.max_history, HistoryStore::new(dir)?))
    }

    /// A handle to the listener list shared by everything that reports into
    /// this registry.
    pub fn listeners(&self) -> SessionListeners {
        self.listeners.clone()
    }

    /// The resident session limit.
    pub fn max_history(&self) -> usize {
        self.max_history
    }

    /// The attached history store, if any.
    pub fn store(&self) -> Option<&HistoryStore> {
        self.store.as_ref()
    }

    /// How many sessions are registered, resident or swapped.
    pub fn len(&self) -> usize {
        self.lock_inner().len()
    }

    /// Returns true if no sessions are registered.
    pub fn is_empty(&self) -> bool {
        self.lock_inner().is_empty()
    }

    /// Registers `session` as the most recent one and announces it to
    /// listeners. If the limit is exceeded the oldest inactive session is
    /// swapped out.
    pub fn add_session(&self, session: Session) -> Arc<Mutex<Session>> {
        let id = session.id();
        debug!("registering session {id} (`{}`)", session.name());
        let handle = Arc::new(Mutex::new(session));
        {
            let mut entries = self.lock_inner();
            entries.retain(|entry| entry.id != id);
            entries.insert(
                0,
                SessionEntry {
                    id,
                    state: SessionState::Loaded(Arc::clone(&handle)),
                },
            );
        }
        {
            let session = lock_session(&handle);
            self.listeners
                .for_each(|listener| listener.session_launched(&session));
        }
        self.enforce_limit();
        handle
    }

    /// Registers an empty session awaiting results, e.g. for a run about to
    /// be driven through the remote engine.
    pub fn start_session(&self, name: &str, project: Option<&str>) -> Arc<Mutex<Session>> {
        let mut session = Session::new(name);
        if let Some(project) = project {
            session.set_project(project);
        }
        self.add_session(session)
    }

    /// Looks up a session, loading it back from the history store if it was
    /// swapped out. Returns `None` for unknown ids and for swapped sessions
    /// whose file cannot be read.
    pub fn session(&self, id: SessionId) -> Option<Arc<Mutex<Session>>> {
        let summary = {
            let entries = self.lock_inner();
            let entry = entries.iter().find(|entry| entry.id == id)?;
            match &entry.state {
                SessionState::Loaded(handle) | SessionState::SwappingOut(handle) => {
                    return Some(Arc::clone(handle));
                }
                SessionState::Swapped(summary) => summary.clone(),
            }
        };
        self.reactivate(summary)
    }

    /// The most recent session that is running or starting, if any.
    pub fn active_session(&self) -> Option<Arc<Mutex<Session>>> {
        let entries = self.lock_inner();
        for entry in entries.iter() {
            if let SessionState::Loaded(handle) | SessionState::SwappingOut(handle) = &entry.state
            {
                let session = lock_session(handle);
                if session.is_running() || session.is_starting() {
                    return Some(Arc::clone(handle));
                }
            }
        }
        None
    }

    /// Summaries of every registered session, newest first. Swapped sessions
    /// are described from their placeholders without touching the disk.
    pub fn overviews(&self) -> Vec<SessionSummary> {
        let entries = self.lock_inner();
        entries
            .iter()
            .map(|entry| match &entry.state {
                SessionState::Loaded(handle) | SessionState::SwappingOut(handle) => {
                    SessionSummary::of(&lock_session(handle))
                }
                SessionState::Swapped(summary) => summary.clone(),
            })
            .collect()
    }

    /// Removes a session from the registry and deletes its swap file. A
    /// session that is still live is stopped first, so listeners observe
    /// `session_stopped` before the entry disappears. Returns true if the
    /// session was registered.
    pub fn remove_session(&self, id: SessionId) -> bool {
        self.stop_session(id);
        let removed = {
            let mut entries = self.lock_inner();
            let before = entries.len();
            entries.retain(|entry| entry.id != id);
            entries.len() != before
        };
        if removed {
            debug!("removed session {id}");
            if let Some(store) = &self.store {
                if let Err(error) = store.delete_session(id) {
                    warn!("failed to delete swap file for session {id}: {error}");
                }
            }
        }
        removed
    }

    /// Stops a live session and notifies listeners. Returns true if the
    /// session transitioned; swapped and already terminal sessions are left
    /// alone.
    pub fn stop_session(&self, id: SessionId) -> bool {
        let handle = {
            let entries = self.lock_inner();
            let entry = entries.iter().find(|entry| entry.id == id);
            match entry.map(|entry| &entry.state) {
                Some(SessionState::Loaded(handle) | SessionState::SwappingOut(handle)) => {
                    Arc::clone(handle)
                }
                _ => return false,
            }
        };
        let mut session = lock_session(&handle);
        if session.is_done() {
            return false;
        }
        session.stop();
        self.listeners
            .for_each(|listener| listener.session_stopped(&session));
        true
    }

    /// Drops every session that is not running or starting, deleting swap
    /// files as it goes. Returns the removed ids, newest first.
    pub fn clear_history(&self) -> Vec<SessionId> {
        let removed: Vec<SessionId> = {
            let mut entries = self.lock_inner();
            let mut kept = Vec::with_capacity(entries.len());
            let mut dropped = Vec::new();
            for entry in entries.drain(..) {
                let active = match &entry.state {
                    SessionState::Loaded(handle) | SessionState::SwappingOut(handle) => {
                        let session = lock_session(handle);
                        session.is_running() || session.is_starting()
                    }
                    SessionState::Swapped(_) => false,
                };
                if active {
                    kept.push(entry);
                } else {
                    dropped.push(entry.id);
                }
            }
            *entries = kept;
            dropped
        };
        debug!("cleared {} sessions from history", removed.len());
        if let Some(store) = &self.store {
            for &id in &removed {
                if let Err(error) = store.delete_session(id) {
                    warn!("failed to delete swap file for session {id}: {error}");
                }
            }
        }
        removed
    }

    /// Swaps every inactive resident session out to the history store, e.g.
    /// before shutdown. Does nothing without a store.
    pub fn swap_out_all(&self) {
        if self.store.is_none() {
            return;
        }
        while let Some(victim) = self.mark_swap_victim(0) {
            if !self.complete_swap(victim) {
                break;
            }
        }
    }

    /// Deletes every file in the history directory, for shutdowns where the
    /// history should not survive. Swapped-out entries cannot be reactivated
    /// afterwards. Does nothing without a store.
    pub fn purge_history(&self) {
        if let Some(store) = &self.store {
            if let Err(error) = store.delete_all() {
                warn!("failed to purge the history directory: {error}");
            }
        }
    }

    fn enforce_limit(&self) {
        if self.store.is_none() {
            return;
        }
        while let Some(victim) = self.mark_swap_victim(self.max_history) {
            if !self.complete_swap(victim) {
                break;
            }
        }
    }

    /// Picks the oldest inactive loaded session, provided more than `limit`
    /// sessions are resident, and marks it as swapping out.
    fn mark_swap_victim(&self, limit: usize) -> Option<(SessionId, Arc<Mutex<Session>>)> {
        let mut entries = self.lock_inner();
        let resident = entries
            .iter()
            .filter(|entry| {
                matches!(
                    entry.state,
                    SessionState::Loaded(_) | SessionState::SwappingOut(_)
                )
            })
            .count();
        if resident <= limit {
            return None;
        }
        for entry in entries.iter_mut().rev() {
            let handle = match &entry.state {
                SessionState::Loaded(handle) => Arc::clone(handle),
                _ => continue,
            };
            let active = {
                let session = lock_session(&handle);
                session.is_running() || session.is_starting()
            };
            if active {
                continue;
            }
            entry.state = SessionState::SwappingOut(Arc::clone(&handle));
            return Some((entry.id, handle));
        }
        None
    }

    /// Writes the marked session to disk and retires its entry to a
    /// summary. The session stays resident if the write fails.
    fn complete_swap(&self, (id, handle): (SessionId, Arc<Mutex<Session>>)) -> bool {
        let Some(store) = &self.store else {
            return false;
        };
        let (summary, written) = {
            let session = lock_session(&handle);
            (SessionSummary::of(&session), store.write_session(&session))
        };
        let mut entries = self.lock_inner();
        let Some(entry) = entries.iter_mut().find(|entry| entry.id == id) else {
            // Removed while the write was in flight; nothing to retire.
            return true;
        };
        match written {
            Ok(()) => {
                if matches!(entry.state, SessionState::SwappingOut(_)) {
                    entry.state = SessionState::Swapped(summary);
                }
                true
            }
            Err(error) => {
                warn!("failed to swap out session {id}: {error}");
                if matches!(entry.state, SessionState::SwappingOut(_)) {
                    entry.state = SessionState::Loaded(handle);
                }
                false
            }
        }
    }

    /// Loads a swapped session back and makes it resident again.
    fn reactivate(&self, summary: SessionSummary) -> Option<Arc<Mutex<Session>>> {
        let id = summary.id;
        let store = self.store.as_ref()?;
        debug!("reactivating session {id} from history");
        let mut session = match store.read_session(id) {
            Ok(session) => session,
            Err(error) => {
                warn!("failed to reactivate session {id}: {error}");
                return None;
            }
        };
        // The file rebuilds the tree; the placeholder restores how the run
        // ended.
        match summary.progress {
            ProgressState::Stopped => session.stop(),
            _ => session.finish(),
        }
        session.set_finished_at(summary.finished_at);

        let handle = Arc::new(Mutex::new(session));
        let resolved = {
            let mut entries = self.lock_inner();
            let entry = entries.iter_mut().find(|entry| entry.id == id)?;
            match &entry.state {
                SessionState::Loaded(existing) | SessionState::SwappingOut(existing) => {
                    // Lost a race with another reactivation.
                    Arc::clone(existing)
                }
                SessionState::Swapped(_) => {
                    entry.state = SessionState::Loaded(Arc::clone(&handle));
                    handle
                }
            }
        };
        self.enforce_limit();
        Some(resolved)
    }

    fn lock_inner(&self) -> MutexGuard<'_, Vec<SessionEntry>> {
        self.inner.lock().unwrap_or_else(|error| error.into_inner())
    }
}
