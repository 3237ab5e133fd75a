// Copyright (c) The testwatch Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::model::TestStatus;
use std::{fmt, time::Duration};

/// Index of an element within its session's arena.
///
/// Ids are handed out by [`Session`](crate::model::Session) and are only
/// meaningful for the session that created them.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ElementId(pub(crate) u32);

impl ElementId {
    /// The root suite present in every session.
    pub const ROOT: ElementId = ElementId(0);

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One recorded problem on a test element.
///
/// An element accumulates error infos in the order they were observed. The
/// last pushed info determines the element's display status; aggregation
/// considers the worst severity across all of them.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ErrorInfo {
    /// Severity this problem contributes: [`TestStatus::Error`],
    /// [`TestStatus::Failure`], or [`TestStatus::Skipped`] for a failed
    /// assumption.
    pub status: TestStatus,

    /// Short description of the problem.
    pub message: Option<String>,

    /// Problem classification, e.g. an exception type name.
    pub kind: Option<String>,

    /// Stack trace or equivalent diagnostic text.
    pub trace: Option<String>,

    /// Expected value, for comparison failures.
    pub expected: Option<String>,

    /// Actual value, for comparison failures.
    pub actual: Option<String>,
}

impl ErrorInfo {
    /// Creates an empty error info at the given severity.
    pub fn new(status: TestStatus) -> Self {
        Self {
            status,
            message: None,
            kind: None,
            trace: None,
            expected: None,
            actual: None,
        }
    }

    /// Sets the message.
    pub fn set_message(&mut self, message: impl Into<String>) -> &mut Self {
        self.message = Some(message.into());
        self
    }

    /// Sets the problem classification.
    pub fn set_kind(&mut self, kind: impl Into<String>) -> &mut Self {
        self.kind = Some(kind.into());
        self
    }

    /// Sets the trace.
    pub fn set_trace(&mut self, trace: impl Into<String>) -> &mut Self {
        self.trace = Some(trace.into());
        self
    }

    /// Sets the expected value.
    pub fn set_expected(&mut self, expected: impl Into<String>) -> &mut Self {
        self.expected = Some(expected.into());
        self
    }

    /// Sets the actual value.
    pub fn set_actual(&mut self, actual: impl Into<String>) -> &mut Self {
        self.actual = Some(actual.into());
        self
    }

    /// Returns true if there is non-blank trace text.
    pub fn has_trace(&self) -> bool {
        self.trace.as_deref().is_some_and(|t| !t.trim().is_empty())
    }

    /// Returns true if both an expected and an actual value were captured.
    pub fn is_comparison_failure(&self) -> bool {
        self.expected.is_some() && self.actual.is_some()
    }
}

/// Case counts for a suite subtree.
///
/// `tests` counts every descendant case that has ended (complete or not);
/// the remaining fields count ended cases by their display status.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SuiteCounters {
    /// Descendant cases that have ended.
    pub tests: usize,
    /// Descendant cases whose status is [`TestStatus::Error`].
    pub errors: usize,
    /// Descendant cases whose status is [`TestStatus::Failure`].
    pub failures: usize,
    /// Descendant cases whose status is [`TestStatus::Skipped`].
    pub skipped: usize,
}

/// Session-level tallies, updated as elements end.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SessionCounts {
    /// Cases seen, whether or not they completed.
    pub total: usize,
    /// Cases that actually executed.
    pub started: usize,
    /// Cases marked ignored.
    pub ignored: usize,
    /// Elements abandoned because an assumption did not hold.
    pub assumption_failures: usize,
    /// Failures recorded at error severity.
    pub errors: usize,
    /// Failures recorded at failure severity.
    pub failures: usize,
}

/// Kind-specific payload of a [`TestElement`].
#[derive(Clone, Debug)]
pub enum ElementKind {
    /// A suite: owns an ordered list of children.
    Suite(SuiteData),
    /// A test case: a leaf.
    Case(CaseData),
}

/// Suite-specific element data.
#[derive(Clone, Debug, Default)]
pub struct SuiteData {
    pub(crate) children: Vec<ElementId>,
    pub(crate) counters: SuiteCounters,
    pub(crate) has_failures_beneath: bool,
}

/// Case-specific element data.
#[derive(Clone, Debug, Default)]
pub struct CaseData {
    pub(crate) class_name: Option<String>,
    pub(crate) ignored: bool,
    pub(crate) dynamic: bool,
}

/// A node in a session's element tree: a suite or a test case.
///
/// Elements are owned by their session's arena. The parent link is a plain
/// back-index; ownership of tree membership lives in the parent suite's
/// ordered child list.
#[derive(Clone, Debug)]
pub struct TestElement {
    pub(crate) id: ElementId,
    pub(crate) parent: Option<ElementId>,
    pub(crate) name: String,
    pub(crate) display_name: Option<String>,
    pub(crate) unique_id: Option<String>,
    pub(crate) parameter_types: Vec<String>,
    pub(crate) context: Option<String>,
    pub(crate) status: TestStatus,
    pub(crate) error_infos: Vec<ErrorInfo>,
    pub(crate) elapsed: Option<Duration>,
    pub(crate) ended: bool,
    pub(crate) completed: bool,
    pub(crate) assumption_failed: bool,
    pub(crate) kind: ElementKind,
}

impl TestElement {
    pub(crate) fn new(id: ElementId, parent: Option<ElementId>, name: String, kind: ElementKind) -> Self {
        Self {
            id,
            parent,
            name,
            display_name: None,
            unique_id: None,
            parameter_types: Vec::new(),
            context: None,
            status: TestStatus::NotRun,
            error_infos: Vec::new(),
            elapsed: None,
            ended: false,
            completed: false,
            assumption_failed: false,
            kind,
        }
    }

    /// This element's id.
    pub fn id(&self) -> ElementId {
        self.id
    }

    /// The parent suite, or `None` for the root.
    pub fn parent(&self) -> Option<ElementId> {
        self.parent
    }

    /// The element's name. For cases this is the composed form
    /// `method(Class)`; for suites the package-qualified suite name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The name to display, falling back to [`TestElement::name`].
    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }

    /// The stable unique id supplied by the report, if any.
    pub fn unique_id(&self) -> Option<&str> {
        self.unique_id.as_deref()
    }

    /// Declared parameter types for parameterized cases.
    pub fn parameter_types(&self) -> &[String] {
        &self.parameter_types
    }

    /// The launch context this element ran in, if reported.
    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    /// The display status: the last pushed error info wins.
    pub fn status(&self) -> TestStatus {
        self.status
    }

    /// The worst severity across the display status and every pushed error
    /// info. This is what suite aggregation sees.
    pub fn worst_status(&self) -> TestStatus {
        self.error_infos
            .iter()
            .map(|info| info.status)
            .fold(self.status, TestStatus::combine)
    }

    /// All recorded problems, oldest first.
    pub fn error_infos(&self) -> &[ErrorInfo] {
        &self.error_infos
    }

    /// Returns true if the most recent problem captured both expected and
    /// actual values.
    pub fn is_comparison_failure(&self) -> bool {
        self.error_infos
            .last()
            .is_some_and(ErrorInfo::is_comparison_failure)
    }

    /// Wall-clock duration, when the report carried one.
    pub fn elapsed(&self) -> Option<Duration> {
        self.elapsed
    }

    /// [`TestElement::elapsed`] in fractional seconds.
    pub fn elapsed_seconds(&self) -> Option<f64> {
        self.elapsed.map(|d| d.as_secs_f64())
    }

    /// Returns true once the element's end has been registered.
    pub fn ended(&self) -> bool {
        self.ended
    }

    /// Returns true if the element ran to its natural end (it was not cut
    /// short by an aborted run).
    pub fn completed(&self) -> bool {
        self.completed
    }

    /// Returns true if the element was abandoned by a failed assumption.
    pub fn assumption_failed(&self) -> bool {
        self.assumption_failed
    }

    /// Returns true for suites.
    pub fn is_suite(&self) -> bool {
        matches!(self.kind, ElementKind::Suite(_))
    }

    /// Returns true for cases.
    pub fn is_case(&self) -> bool {
        matches!(self.kind, ElementKind::Case(_))
    }

    /// Child elements in document order. Empty for cases.
    pub fn children(&self) -> &[ElementId] {
        match &self.kind {
            ElementKind::Suite(data) => &data.children,
            ElementKind::Case(_) => &[],
        }
    }

    /// Incrementally maintained counters. `None` for cases.
    pub fn counters(&self) -> Option<SuiteCounters> {
        match &self.kind {
            ElementKind::Suite(data) => Some(data.counters),
            ElementKind::Case(_) => None,
        }
    }

    /// Returns true if any failure or error was registered beneath this
    /// suite. Always false for cases.
    pub fn has_failures_beneath(&self) -> bool {
        match &self.kind {
            ElementKind::Suite(data) => data.has_failures_beneath,
            ElementKind::Case(_) => false,
        }
    }

    /// The method part of a case name: everything before the first `(`
    /// or `@`.
    pub fn method_name(&self) -> &str {
        let end = self.name.find(['(', '@']).unwrap_or(self.name.len());
        &self.name[..end]
    }

    /// The class name of a case, if reported.
    pub fn class_name(&self) -> Option<&str> {
        match &self.kind {
            ElementKind::Case(data) => data.class_name.as_deref(),
            ElementKind::Suite(_) => None,
        }
    }

    /// Returns true if the case was marked ignored.
    pub fn ignored(&self) -> bool {
        match &self.kind {
            ElementKind::Case(data) => data.ignored,
            ElementKind::Suite(_) => false,
        }
    }

    /// Returns true if the case was generated dynamically at run time.
    pub fn dynamic(&self) -> bool {
        match &self.kind {
            ElementKind::Case(data) => data.dynamic,
            ElementKind::Suite(_) => false,
        }
    }

    pub(crate) fn suite_data_mut(&mut self) -> Option<&mut SuiteData> {
        match &mut self.kind {
            ElementKind::Suite(data) => Some(data),
            ElementKind::Case(_) => None,
        }
    }

    pub(crate) fn case_data_mut(&mut self) -> Option<&mut CaseData> {
        match &mut self.kind {
            ElementKind::Case(data) => Some(data),
            ElementKind::Suite(_) => None,
        }
    }
}

/// Composes the canonical case name from a method and an optional class.
pub(crate) fn compose_case_name(method: &str, class_name: Option<&str>) -> String {
    match class_name {
        Some(class) if !class.is_empty() => format!("{method}({class})"),
        _ => method.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_name_strips_at_paren_and_at() {
        let mut element = TestElement::new(
            ElementId(1),
            Some(ElementId::ROOT),
            "checkTotals(com.acme.TotalsTest)".to_owned(),
            ElementKind::Case(CaseData::default()),
        );
        assert_eq!(element.method_name(), "checkTotals");

        element.name = "checkTotals@v2".to_owned();
        assert_eq!(element.method_name(), "checkTotals");

        element.name = "plain".to_owned();
        assert_eq!(element.method_name(), "plain");
    }

    #[test]
    fn compose_name_skips_empty_class() {
        assert_eq!(compose_case_name("check", Some("A")), "check(A)");
        assert_eq!(compose_case_name("check", Some("")), "check");
        assert_eq!(compose_case_name("check", None), "check");
    }

    #[test]
    fn worst_status_considers_all_infos() {
        let mut element = TestElement::new(
            ElementId(1),
            None,
            "suite".to_owned(),
            ElementKind::Suite(SuiteData::default()),
        );
        element.error_infos.push(ErrorInfo::new(TestStatus::Error));
        element.error_infos.push(ErrorInfo::new(TestStatus::Failure));
        // Display follows the last push, aggregation the worst.
        element.status = TestStatus::Failure;
        assert_eq!(element.status(), TestStatus::Failure);
        assert_eq!(element.worst_status(), TestStatus::Error);
    }

    #[test]
    fn comparison_failure_requires_both_sides() {
        let mut info = ErrorInfo::new(TestStatus::Failure);
        assert!(!info.is_comparison_failure());
        info.set_expected("3");
        assert!(!info.is_comparison_failure());
        info.set_actual("4");
        assert!(info.is_comparison_failure());
    }
}
