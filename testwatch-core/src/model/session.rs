// Copyright (c) The testwatch Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::model::{
    compose_case_name, CaseData, ElementId, ElementKind, ErrorInfo, ProgressState, SessionCounts,
    SuiteCounters, SuiteData, TestElement, TestStatus,
};
use chrono::{DateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, str::FromStr, time::Duration};
use uuid::Uuid;

/// Unique identifier for a [`Session`].
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Creates a new random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for SessionId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

// Serialized as the hyphenated UUID string, matching `Display`.
impl Serialize for SessionId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SessionId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

/// One observed test run: a tree of elements plus run-level metadata.
///
/// The session owns its elements in an arena; [`ElementId`]s index into it
/// and element 0 is always the root suite. A session has a single writer at
/// a time; once it reaches a terminal [`ProgressState`] the tree no longer
/// accepts results.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    name: String,
    project: Option<String>,
    include_tags: Option<String>,
    exclude_tags: Option<String>,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    progress: ProgressState,
    counts: SessionCounts,
    elements: Vec<TestElement>,
}

impl Session {
    /// Creates an empty session named `name`.
    pub fn new(name: impl Into<String>) -> Self {
        let mut session = Self {
            id: SessionId::new(),
            name: name.into(),
            project: None,
            include_tags: None,
            exclude_tags: None,
            started_at: Utc::now(),
            finished_at: None,
            progress: ProgressState::NotStarted,
            counts: SessionCounts::default(),
            elements: Vec::new(),
        };
        session.reset();
        session
    }

    /// Discards the tree and counters, keeping identity and metadata. The
    /// session drops back to [`ProgressState::NotStarted`].
    pub(crate) fn reset(&mut self) {
        self.elements.clear();
        self.elements.push(TestElement::new(
            ElementId::ROOT,
            None,
            self.name.clone(),
            ElementKind::Suite(SuiteData::default()),
        ));
        self.counts = SessionCounts::default();
        self.finished_at = None;
        self.progress = ProgressState::NotStarted;
    }

    /// Replaces everything but the id with `other`'s contents.
    pub(crate) fn adopt(&mut self, other: Session) {
        self.name = other.name;
        self.project = other.project;
        self.include_tags = other.include_tags;
        self.exclude_tags = other.exclude_tags;
        self.started_at = other.started_at;
        self.finished_at = other.finished_at;
        self.progress = other.progress;
        self.counts = other.counts;
        self.elements = other.elements;
    }

    /// The session's id.
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub(crate) fn set_id(&mut self, id: SessionId) {
        self.id = id;
    }

    /// The session's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
        self.elements[ElementId::ROOT.index()].name = self.name.clone();
    }

    /// The project this run belongs to, if known.
    pub fn project(&self) -> Option<&str> {
        self.project.as_deref()
    }

    pub(crate) fn set_project(&mut self, project: impl Into<String>) {
        self.project = Some(project.into());
    }

    /// Tag filter selecting what the run included, if reported.
    pub fn include_tags(&self) -> Option<&str> {
        self.include_tags.as_deref()
    }

    pub(crate) fn set_include_tags(&mut self, tags: impl Into<String>) {
        self.include_tags = Some(tags.into());
    }

    /// Tag filter selecting what the run excluded, if reported.
    pub fn exclude_tags(&self) -> Option<&str> {
        self.exclude_tags.as_deref()
    }

    pub(crate) fn set_exclude_tags(&mut self, tags: impl Into<String>) {
        self.exclude_tags = Some(tags.into());
    }

    /// When the run started.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub(crate) fn set_started_at(&mut self, at: DateTime<Utc>) {
        self.started_at = at;
    }

    /// When the run reached a terminal state, if it has.
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    pub(crate) fn set_finished_at(&mut self, at: Option<DateTime<Utc>>) {
        self.finished_at = at;
    }

    /// The lifecycle phase.
    pub fn progress(&self) -> ProgressState {
        self.progress
    }

    /// Session-level counters.
    pub fn counts(&self) -> SessionCounts {
        self.counts
    }

    /// Returns true if any non-assumption failure or error was registered.
    pub fn has_errors_or_failures(&self) -> bool {
        self.counts.errors + self.counts.failures > 0
    }

    /// Marks the session as running. No-op unless it is
    /// [`ProgressState::NotStarted`].
    pub fn start(&mut self) {
        if self.progress == ProgressState::NotStarted {
            self.progress = ProgressState::Running;
        }
    }

    /// Marks the session as completed. No-op if already terminal.
    pub fn finish(&mut self) {
        if !self.progress.is_terminal() {
            self.progress = ProgressState::Completed;
            self.finished_at = Some(Utc::now());
        }
    }

    /// Aborts a live run. No-op if already terminal.
    pub fn stop(&mut self) {
        if !self.progress.is_terminal() {
            self.progress = ProgressState::Stopped;
            self.finished_at = Some(Utc::now());
        }
    }

    /// Returns true while results are flowing in.
    pub fn is_running(&self) -> bool {
        self.progress == ProgressState::Running
    }

    /// Returns true for a session that was created but has no results yet.
    pub fn is_starting(&self) -> bool {
        self.progress == ProgressState::NotStarted
    }

    /// Returns true once the session is terminal.
    pub fn is_done(&self) -> bool {
        self.progress.is_terminal()
    }

    /// Looks up an element.
    ///
    /// # Panics
    ///
    /// Panics if `id` did not come from this session.
    pub fn element(&self, id: ElementId) -> &TestElement {
        &self.elements[id.index()]
    }

    pub(crate) fn element_mut(&mut self, id: ElementId) -> &mut TestElement {
        &mut self.elements[id.index()]
    }

    /// All elements, in creation order.
    pub fn elements(&self) -> impl Iterator<Item = &TestElement> {
        self.elements.iter()
    }

    /// Ids of all cases in document order (depth-first).
    pub fn cases_in_order(&self) -> Vec<ElementId> {
        let mut cases = Vec::new();
        let mut stack = vec![ElementId::ROOT];
        while let Some(id) = stack.pop() {
            let element = self.element(id);
            if element.is_case() {
                cases.push(id);
            } else {
                // Reverse so the explicit stack pops in document order.
                stack.extend(element.children().iter().rev().copied());
            }
        }
        cases
    }

    /// Creates a suite under `parent` and returns its id.
    ///
    /// # Panics
    ///
    /// Panics if the session is terminal or `parent` is not a suite.
    pub fn new_suite(&mut self, parent: ElementId, name: impl Into<String>) -> ElementId {
        self.new_element(parent, name.into(), ElementKind::Suite(SuiteData::default()))
    }

    /// Creates a case under `parent` and returns its id. The case's name is
    /// the composed form `method(Class)`.
    ///
    /// # Panics
    ///
    /// Panics if the session is terminal or `parent` is not a suite.
    pub fn new_case(
        &mut self,
        parent: ElementId,
        method: impl Into<String>,
        class_name: Option<&str>,
    ) -> ElementId {
        let method = method.into();
        let name = compose_case_name(&method, class_name);
        let class_name = class_name.filter(|c| !c.is_empty()).map(str::to_owned);
        self.new_element(
            parent,
            name,
            ElementKind::Case(CaseData {
                class_name,
                ..CaseData::default()
            }),
        )
    }

    fn new_element(&mut self, parent: ElementId, name: String, kind: ElementKind) -> ElementId {
        assert!(
            !self.progress.is_terminal(),
            "session {} no longer accepts elements",
            self.id
        );
        let id = ElementId(self.elements.len() as u32);
        match self.elements[parent.index()].suite_data_mut() {
            Some(data) => data.children.push(id),
            None => panic!("parent element {parent} is not a suite"),
        }
        self.elements.push(TestElement::new(id, Some(parent), name, kind));
        id
    }

    /// Sets an element's display status. No-op once the session is terminal.
    pub fn set_status(&mut self, id: ElementId, status: TestStatus) {
        if self.progress.is_terminal() {
            return;
        }
        self.element_mut(id).status = status;
    }

    /// Sets an element's duration. No-op once the session is terminal.
    pub fn set_elapsed(&mut self, id: ElementId, elapsed: Duration) {
        if self.progress.is_terminal() {
            return;
        }
        self.element_mut(id).elapsed = Some(elapsed);
    }

    /// Records a problem on an element. The pushed info becomes the
    /// element's display status; aggregation will consider the worst across
    /// all pushed infos. No-op once the session is terminal.
    pub fn push_error_info(&mut self, id: ElementId, info: ErrorInfo) {
        if self.progress.is_terminal() {
            return;
        }
        let element = self.element_mut(id);
        element.status = info.status;
        element.error_infos.push(info);
    }

    /// Marks an element as abandoned by a failed assumption.
    pub fn set_assumption_failed(&mut self, id: ElementId) {
        if self.progress.is_terminal() {
            return;
        }
        self.element_mut(id).assumption_failed = true;
    }

    /// Marks a case as ignored.
    pub fn set_ignored(&mut self, id: ElementId) {
        if self.progress.is_terminal() {
            return;
        }
        if let Some(data) = self.element_mut(id).case_data_mut() {
            data.ignored = true;
        }
    }

    /// Accounts for a recorded failure: bumps the session error/failure
    /// counters (assumption failures count separately at end registration)
    /// and flags every ancestor suite as having failures beneath it.
    pub fn register_failure(&mut self, id: ElementId, status: TestStatus, assumption: bool) {
        if self.progress.is_terminal() || assumption {
            return;
        }
        match status {
            TestStatus::Error => self.counts.errors += 1,
            TestStatus::Failure => self.counts.failures += 1,
            _ => return,
        }
        let mut cursor = self.element(id).parent;
        while let Some(parent_id) = cursor {
            let parent = self.element_mut(parent_id);
            cursor = parent.parent;
            if let Some(data) = parent.suite_data_mut() {
                data.has_failures_beneath = true;
            }
        }
    }

    /// Registers that an element has ended.
    ///
    /// The first call settles the element: for a case this updates the
    /// session tallies, promotes an unresolved status to `Ok` (or `Skipped`
    /// for ignored/assumption-failed cases) when the run completed, and
    /// walks the ancestor chain updating every suite's counters exactly
    /// once. Subsequent calls are no-ops, as is any call once the session
    /// is terminal.
    pub fn register_test_ended(&mut self, id: ElementId, completed: bool) {
        if self.progress.is_terminal() || self.element(id).ended {
            return;
        }

        let (assumption, settled_status) = {
            let element = self.element_mut(id);
            element.ended = true;
            element.completed = completed;
            let assumption = element.assumption_failed;
            let settled = match &element.kind {
                ElementKind::Case(data) => {
                    let ignored = data.ignored;
                    if completed && !element.status.is_error_or_failure() {
                        element.status = if ignored || assumption {
                            TestStatus::Skipped
                        } else {
                            TestStatus::Ok
                        };
                    }
                    Some((element.status, ignored))
                }
                ElementKind::Suite(_) => None,
            };
            (assumption, settled)
        };

        // A case abandoned mid-run never reached its assumption, so only
        // completed cases (and suites) tally one.
        if assumption && (completed || settled_status.is_none()) {
            self.counts.assumption_failures += 1;
        }

        let Some((status, ignored)) = settled_status else {
            return;
        };

        self.counts.total += 1;
        if completed {
            self.counts.started += 1;
            if ignored {
                self.counts.ignored += 1;
            }
        }

        let mut cursor = self.element(id).parent;
        while let Some(parent_id) = cursor {
            let parent = self.element_mut(parent_id);
            cursor = parent.parent;
            if let Some(data) = parent.suite_data_mut() {
                data.counters.tests += 1;
                match status {
                    TestStatus::Error => data.counters.errors += 1,
                    TestStatus::Failure => data.counters.failures += 1,
                    TestStatus::Skipped => data.counters.skipped += 1,
                    _ => {}
                }
            }
        }
    }

    /// The worst status among this element and its ended descendants.
    ///
    /// Suites fold their own recorded problems together with every child;
    /// a subtree where nothing ran reports [`TestStatus::NotRun`].
    pub fn aggregate_status(&self, id: ElementId) -> TestStatus {
        let element = self.element(id);
        match &element.kind {
            ElementKind::Case(_) => {
                if element.ended {
                    element.worst_status()
                } else {
                    TestStatus::NotRun
                }
            }
            ElementKind::Suite(data) => data
                .children
                .iter()
                .fold(element.worst_status(), |acc, &child| {
                    acc.combine(self.aggregate_status(child))
                }),
        }
    }

    /// Recounts a suite's counters by walking its descendants. Always equal
    /// to the incrementally maintained [`TestElement::counters`].
    pub fn computed_counters(&self, id: ElementId) -> SuiteCounters {
        let mut counters = SuiteCounters::default();
        let mut stack: Vec<ElementId> = self.element(id).children().to_vec();
        while let Some(child) = stack.pop() {
            let element = self.element(child);
            if element.is_case() {
                if element.ended {
                    counters.tests += 1;
                    match element.status {
                        TestStatus::Error => counters.errors += 1,
                        TestStatus::Failure => counters.failures += 1,
                        TestStatus::Skipped => counters.skipped += 1,
                        _ => {}
                    }
                }
            } else {
                stack.extend(element.children().iter().copied());
            }
        }
        counters
    }
}
