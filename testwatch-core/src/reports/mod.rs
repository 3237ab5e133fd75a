// Copyright (c) The testwatch Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reading and writing test run reports.
//!
//! Reports are XML documents rooted at a `<testrun>` element (plain JUnit
//! documents rooted at `<testsuites>` or `<testsuite>` are also accepted).
//! The reader is a streaming state machine over [`quick_xml`] events; it
//! either produces a fully registered [`Session`] or fails without touching
//! the registry. The writer serializes a session back into the same format,
//! which is how the registry swaps inactive sessions out to disk.

mod reader;
mod writer;

use crate::{
    errors::ImportError,
    model::{Session, SessionId},
    registry::{lock_session, SessionRegistry},
};
use camino::Utf8Path;
use reader::ParseOptions;
use std::{
    collections::HashSet,
    fs::File,
    io::BufReader,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
    thread,
    time::Duration,
};
use tracing::debug;

pub use writer::{write_report, write_report_string};

/// How often [`UrlImport::wait`] polls the worker for a result.
const URL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Parses a report document held in memory.
///
/// The returned session is finished but not registered anywhere.
pub fn parse_report_str(xml: &str, default_project: Option<&str>) -> Result<Session, ImportError> {
    let mut session = Session::new("imported report");
    reader::parse_into(
        &mut session,
        xml.as_bytes(),
        ParseOptions {
            project_hint: default_project,
            ..ParseOptions::default()
        },
    )?;
    session.finish();
    Ok(session)
}

/// Imports a report file and registers the resulting session.
///
/// `default_project` is used when the document does not name a project
/// itself. On failure nothing is registered. Listeners observe the import
/// as a launch immediately followed by a finish.
pub fn import_report_file(
    registry: &SessionRegistry,
    path: &Utf8Path,
    default_project: Option<&str>,
) -> Result<SessionId, ImportError> {
    debug!("importing test run report from `{path}`");
    let file = File::open(path).map_err(|error| ImportError::FileOpen {
        path: path.to_owned(),
        error,
    })?;
    let mut session = Session::new(path.file_stem().unwrap_or("test run"));
    reader::parse_into(
        &mut session,
        BufReader::new(file),
        ParseOptions {
            project_hint: default_project,
            ..ParseOptions::default()
        },
    )?;
    session.finish();
    Ok(register(session, registry))
}

/// Re-reads a report file into an already registered session.
///
/// The session's tree is replaced by the document's contents; its id is
/// preserved. The document is parsed before the session is touched, so a
/// malformed file leaves the session as it was. Listeners are notified of
/// the delta against the previous contents: cases that newly completed fire
/// `test_case_finished`, cases that had already completed fire
/// `test_case_rerun`, and cases the document marks incomplete fire
/// `test_case_started`. When every case has completed the session finishes.
pub fn merge_report_file(
    registry: &SessionRegistry,
    id: SessionId,
    path: &Utf8Path,
) -> Result<(), ImportError> {
    debug!("merging test run report `{path}` into session {id}");
    let handle = registry
        .session(id)
        .ok_or(ImportError::SessionNotFound { id })?;
    let file = File::open(path).map_err(|error| ImportError::FileOpen {
        path: path.to_owned(),
        error,
    })?;
    let mut scratch = Session::new("merge");
    reader::parse_into(&mut scratch, BufReader::new(file), ParseOptions::default())?;
    let run_complete = scratch
        .elements()
        .all(|element| !element.is_case() || element.completed());

    let mut session = lock_session(&handle);
    let was_starting = session.is_starting();
    let previously_completed: HashSet<String> = session
        .elements()
        .filter(|element| element.is_case() && element.completed())
        .map(|element| element.name().to_owned())
        .collect();
    session.adopt(scratch);
    if run_complete {
        session.finish();
    }

    let listeners = registry.listeners();
    if was_starting {
        listeners.for_each(|listener| listener.session_started(&session));
    }
    for case_id in session.cases_in_order() {
        let case = session.element(case_id);
        if !case.completed() {
            listeners.for_each(|listener| listener.test_case_started(&session, case));
        } else if previously_completed.contains(case.name()) {
            listeners.for_each(|listener| listener.test_case_rerun(&session, case));
        } else {
            listeners.for_each(|listener| listener.test_case_finished(&session, case));
        }
    }
    if run_complete {
        listeners.for_each(|listener| listener.session_finished(&session));
    }
    Ok(())
}

/// Reads a swapped-out session file back into memory.
///
/// The id stored in the document is ignored in favor of `id`, which comes
/// from the registry's own bookkeeping.
pub(crate) fn read_swapped_report(path: &Utf8Path, id: SessionId) -> Result<Session, ImportError> {
    let file = File::open(path).map_err(|error| ImportError::FileOpen {
        path: path.to_owned(),
        error,
    })?;
    let mut session = Session::new(path.file_stem().unwrap_or("test run"));
    reader::parse_into(
        &mut session,
        BufReader::new(file),
        ParseOptions {
            keep_session_id: true,
            ..ParseOptions::default()
        },
    )?;
    session.set_id(id);
    Ok(session)
}

/// Shared progress and cancellation state for a report import.
#[derive(Debug, Default)]
pub struct ImportMonitor {
    cancelled: AtomicBool,
    elements_read: AtomicU64,
}

impl ImportMonitor {
    /// Creates a monitor in the not-cancelled state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. The reader stops at the next element boundary.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// Returns true once [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// How many XML elements the reader has consumed so far.
    pub fn elements_read(&self) -> u64 {
        self.elements_read.load(Ordering::Relaxed)
    }

    pub(crate) fn record_element(&self) {
        self.elements_read.fetch_add(1, Ordering::Relaxed);
    }
}

/// An in-flight import of a report from a URL.
///
/// The fetch and parse run on a dedicated worker thread so that a stalled
/// connection cannot wedge the caller; [`wait`](Self::wait) polls for the
/// outcome and registers the session from the calling thread. Cancelling
/// makes `wait` return promptly while the worker winds down on its own,
/// since a blocking HTTP read has no cancellation point.
pub struct UrlImport {
    url: String,
    monitor: Arc<ImportMonitor>,
    result: Arc<Mutex<Option<Result<Session, ImportError>>>>,
    worker: thread::JoinHandle<()>,
}

impl UrlImport {
    /// Starts fetching `url` on a worker thread.
    ///
    /// Whitespace is trimmed from the URL and embedded line breaks are
    /// removed, so values pasted from logs work unchanged.
    pub fn start(url: impl Into<String>, default_project: Option<&str>) -> Self {
        let raw = url.into();
        let url: String = raw
            .trim()
            .chars()
            .filter(|c| !matches!(c, '\r' | '\n'))
            .collect();
        let monitor = Arc::new(ImportMonitor::new());
        let result = Arc::new(Mutex::new(None));
        let project = default_project.map(str::to_owned);
        let worker = {
            let url = url.clone();
            let monitor = Arc::clone(&monitor);
            let result = Arc::clone(&result);
            thread::spawn(move || {
                let outcome = fetch_report(&url, project.as_deref(), &monitor);
                *result.lock().unwrap_or_else(|error| error.into_inner()) = Some(outcome);
            })
        };
        Self {
            url,
            monitor,
            result,
            worker,
        }
    }

    /// The URL being imported.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Requests cancellation of the import.
    pub fn cancel(&self) {
        self.monitor.cancel();
    }

    /// Returns true once cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.monitor.is_cancelled()
    }

    /// How many XML elements have been consumed so far.
    pub fn elements_read(&self) -> u64 {
        self.monitor.elements_read()
    }

    /// The monitor shared with the worker, for external progress reporting.
    pub fn monitor(&self) -> Arc<ImportMonitor> {
        Arc::clone(&self.monitor)
    }

    /// Blocks until the import finishes, was cancelled, or fails, then
    /// registers the session and returns its id.
    ///
    /// [`cancel`](Self::cancel) may be called from another thread while this
    /// blocks. The outcome is taken by the first `wait` that sees it; once
    /// the worker is gone, a later call reports
    /// [`WorkerExited`](ImportError::WorkerExited).
    pub fn wait(&self, registry: &SessionRegistry) -> Result<SessionId, ImportError> {
        loop {
            if let Some(outcome) = self.take_result() {
                return Ok(register(outcome?, registry));
            }
            if self.monitor.is_cancelled() {
                return Err(ImportError::Cancelled);
            }
            if self.worker.is_finished() {
                // The worker may have published between the take above and
                // exiting; look once more before giving up.
                return match self.take_result() {
                    Some(outcome) => Ok(register(outcome?, registry)),
                    None => Err(ImportError::WorkerExited),
                };
            }
            thread::sleep(URL_POLL_INTERVAL);
        }
    }

    fn take_result(&self) -> Option<Result<Session, ImportError>> {
        self.result
            .lock()
            .unwrap_or_else(|error| error.into_inner())
            .take()
    }
}

fn register(session: Session, registry: &SessionRegistry) -> SessionId {
    let id = session.id();
    let handle = registry.add_session(session);
    let session = lock_session(&handle);
    registry
        .listeners()
        .for_each(|listener| listener.session_finished(&session));
    id
}

fn fetch_report(
    url: &str,
    default_project: Option<&str>,
    monitor: &ImportMonitor,
) -> Result<Session, ImportError> {
    debug!("importing test run report from `{url}`");
    let response = ureq::get(url).call().map_err(|error| ImportError::Fetch {
        url: url.to_owned(),
        error: Box::new(error),
    })?;
    let mut session = Session::new(session_name_for_url(url));
    reader::parse_into(
        &mut session,
        BufReader::new(response.into_reader()),
        ParseOptions {
            project_hint: default_project,
            monitor: Some(monitor),
            ..ParseOptions::default()
        },
    )?;
    session.finish();
    Ok(session)
}

fn session_name_for_url(url: &str) -> &str {
    url.rsplit('/')
        .next()
        .filter(|tail| !tail.is_empty())
        .unwrap_or(url)
}

// Element and attribute names of the report format.

pub(super) const ELEM_TESTRUN: &str = "testrun";
pub(super) const ELEM_TESTSUITES: &str = "testsuites";
pub(super) const ELEM_TESTSUITE: &str = "testsuite";
pub(super) const ELEM_TESTCASE: &str = "testcase";
pub(super) const ELEM_PROPERTIES: &str = "properties";
pub(super) const ELEM_PROPERTY: &str = "property";
pub(super) const ELEM_ERROR: &str = "error";
pub(super) const ELEM_FAILURE: &str = "failure";
pub(super) const ELEM_SKIPPED: &str = "skipped";
pub(super) const ELEM_EXPECTED: &str = "expected";
pub(super) const ELEM_ACTUAL: &str = "actual";
pub(super) const ELEM_SYSTEM_OUT: &str = "system-out";
pub(super) const ELEM_SYSTEM_ERR: &str = "system-err";

pub(super) const ATTR_NAME: &str = "name";
pub(super) const ATTR_PROJECT: &str = "project";
pub(super) const ATTR_CONTEXT: &str = "context";
pub(super) const ATTR_TESTS: &str = "tests";
pub(super) const ATTR_STARTED: &str = "started";
pub(super) const ATTR_FAILURES: &str = "failures";
pub(super) const ATTR_ERRORS: &str = "errors";
pub(super) const ATTR_IGNORED: &str = "ignored";
pub(super) const ATTR_PACKAGE: &str = "package";
pub(super) const ATTR_ID: &str = "id";
pub(super) const ATTR_CLASSNAME: &str = "classname";
pub(super) const ATTR_INCOMPLETE: &str = "incomplete";
pub(super) const ATTR_TIME: &str = "time";
pub(super) const ATTR_TIMESTAMP: &str = "timestamp";
pub(super) const ATTR_MESSAGE: &str = "message";
pub(super) const ATTR_DISPLAY_NAME: &str = "displayname";
pub(super) const ATTR_DYNAMIC_TEST: &str = "dynamicTest";
pub(super) const ATTR_PARAMETERS: &str = "parameters";
pub(super) const ATTR_UNIQUE_ID: &str = "uniqueid";
pub(super) const ATTR_INCLUDE_TAGS: &str = "include_tags";
pub(super) const ATTR_EXCLUDE_TAGS: &str = "exclude_tags";
pub(super) const ATTR_TYPE: &str = "type";
