// Copyright (c) The testwatch Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::fmt;

/// Outcome of a test element.
///
/// Severity increases from `Ok` to `Error`; [`TestStatus::combine`] picks the
/// worse of two statuses when rolling outcomes up a suite tree. `NotRun`
/// means the element never executed: it is the identity of `combine`, so
/// elements that did not run stay out of aggregation entirely.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum TestStatus {
    /// The element was never executed.
    NotRun,

    /// The element ran to completion without recorded problems.
    Ok,

    /// The element was skipped: ignored outright, or abandoned because an
    /// assumption did not hold.
    Skipped,

    /// An assertion failed.
    Failure,

    /// Execution aborted with an unexpected error.
    Error,
}

impl TestStatus {
    /// Returns the worse of two statuses.
    ///
    /// `NotRun` is the identity: combining it with any status yields the
    /// other status.
    pub fn combine(self, other: TestStatus) -> TestStatus {
        self.max(other)
    }

    /// Returns true if this is [`TestStatus::Ok`].
    pub fn is_ok(self) -> bool {
        self == TestStatus::Ok
    }

    /// Returns true if this is [`TestStatus::Skipped`].
    pub fn is_skipped(self) -> bool {
        self == TestStatus::Skipped
    }

    /// Returns true if this is [`TestStatus::Failure`].
    pub fn is_failure(self) -> bool {
        self == TestStatus::Failure
    }

    /// Returns true if this is [`TestStatus::Error`].
    pub fn is_error(self) -> bool {
        self == TestStatus::Error
    }

    /// Returns true if this is a failure or an error.
    pub fn is_error_or_failure(self) -> bool {
        matches!(self, TestStatus::Failure | TestStatus::Error)
    }

    /// Returns true if this is [`TestStatus::NotRun`].
    pub fn is_not_run(self) -> bool {
        self == TestStatus::NotRun
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TestStatus::NotRun => "not run",
            TestStatus::Ok => "ok",
            TestStatus::Skipped => "skipped",
            TestStatus::Failure => "failure",
            TestStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Lifecycle phase of a session.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ProgressState {
    /// The session exists but has not received any results yet.
    NotStarted,

    /// Results are flowing in.
    Running,

    /// The run was aborted before completion. Terminal.
    Stopped,

    /// All results are in. Terminal.
    Completed,
}

impl ProgressState {
    /// Returns true if no further results will be accepted.
    pub fn is_terminal(self) -> bool {
        matches!(self, ProgressState::Stopped | ProgressState::Completed)
    }
}
