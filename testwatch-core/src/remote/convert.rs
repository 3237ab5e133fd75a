// Copyright (c) The testwatch Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::model::{ElementId, ErrorInfo, Session, TestStatus};
use std::time::Duration;
use testwatch_wire::{RemoteErrorDetail, RemoteTestOutcome, ReportData};
use tracing::warn;

/// Applies a remote report to `session`: one suite named after `source` (the
/// reporting client's key) holding one case per outcome, in report order.
/// Returns the created case ids. An empty report leaves the tree untouched.
pub(super) fn apply_report(
    session: &mut Session,
    source: &str,
    report: &ReportData,
) -> Vec<ElementId> {
    if report.tests.is_empty() {
        return Vec::new();
    }
    let suite = session.new_suite(ElementId::ROOT, source);
    let cases: Vec<ElementId> = report
        .tests
        .iter()
        .map(|outcome| apply_outcome(session, suite, outcome))
        .collect();
    session.register_test_ended(suite, true);
    cases
}

fn apply_outcome(
    session: &mut Session,
    suite: ElementId,
    outcome: &RemoteTestOutcome,
) -> ElementId {
    let case = session.new_case(suite, &outcome.method, None);
    if let Some(present) = &outcome.present {
        session.element_mut(case).display_name = Some(present.clone());
    }
    session.set_elapsed(case, Duration::from_millis(outcome.duration));

    let mut completed = true;
    match remote_status(&outcome.status) {
        TestStatus::Ok => {}
        status @ (TestStatus::Failure | TestStatus::Error) => {
            if outcome.errors.is_empty() {
                session.push_error_info(case, ErrorInfo::new(status));
                session.register_failure(case, status, false);
            } else {
                for detail in &outcome.errors {
                    session.push_error_info(case, detail_info(status, detail));
                    session.register_failure(case, status, false);
                }
            }
        }
        TestStatus::Skipped => {
            // With recorded problems the skip was an assumption that did not
            // hold; without any it is a plain ignore.
            if outcome.errors.is_empty() {
                session.set_ignored(case);
            } else {
                for detail in &outcome.errors {
                    session.push_error_info(case, detail_info(TestStatus::Skipped, detail));
                }
                session.set_assumption_failed(case);
            }
        }
        TestStatus::NotRun => {
            warn!(
                "unknown remote test status `{}` for `{}`; leaving the case unresolved",
                outcome.status, outcome.method
            );
            completed = false;
        }
    }
    session.register_test_ended(case, completed);
    case
}

/// Maps a client's status string onto the model, case-insensitively.
/// Anything unrecognized maps to [`TestStatus::NotRun`].
fn remote_status(status: &str) -> TestStatus {
    match status.to_ascii_lowercase().as_str() {
        "passed" | "ok" => TestStatus::Ok,
        "failed" | "failure" => TestStatus::Failure,
        "error" | "broken" => TestStatus::Error,
        "skipped" | "ignored" | "notimplemented" => TestStatus::Skipped,
        _ => TestStatus::NotRun,
    }
}

fn detail_info(status: TestStatus, detail: &RemoteErrorDetail) -> ErrorInfo {
    let mut info = ErrorInfo::new(status);
    if let Some(message) = detail.message.as_deref() {
        info.set_message(message);
    }
    if let Some(kind) = detail.kind.as_deref() {
        info.set_kind(kind);
    }
    if let Some(trace) = detail.trace.as_deref() {
        info.set_trace(trace);
    }
    info
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn outcome(status: &str, method: &str) -> RemoteTestOutcome {
        RemoteTestOutcome {
            status: status.to_owned(),
            method: method.to_owned(),
            ..RemoteTestOutcome::default()
        }
    }

    #[test_case("passed", TestStatus::Ok; "passed")]
    #[test_case("ok", TestStatus::Ok; "ok")]
    #[test_case("Failed", TestStatus::Failure; "failed ignores case")]
    #[test_case("failure", TestStatus::Failure; "failure")]
    #[test_case("error", TestStatus::Error; "error")]
    #[test_case("broken", TestStatus::Error; "broken")]
    #[test_case("skipped", TestStatus::Skipped; "skipped")]
    #[test_case("ignored", TestStatus::Skipped; "ignored")]
    #[test_case("notImplemented", TestStatus::Skipped; "not implemented")]
    #[test_case("exploded", TestStatus::NotRun; "unknown")]
    #[test_case("", TestStatus::NotRun; "blank")]
    fn status_strings(input: &str, expected: TestStatus) {
        assert_eq!(remote_status(input), expected);
    }

    #[test]
    fn report_builds_one_suite_with_mapped_cases() {
        let report = ReportData {
            tests: vec![
                RemoteTestOutcome {
                    status: "passed".to_owned(),
                    present: Some("Check totals".to_owned()),
                    method: "CheckTotals".to_owned(),
                    duration: 42,
                    errors: Vec::new(),
                },
                RemoteTestOutcome {
                    status: "failed".to_owned(),
                    present: None,
                    method: "CheckRounding".to_owned(),
                    duration: 5,
                    errors: vec![RemoteErrorDetail {
                        message: Some("assertion failed".to_owned()),
                        trace: Some("at CheckRounding".to_owned()),
                        kind: Some("AssertionError".to_owned()),
                    }],
                },
                outcome("broken", "CheckSchema"),
            ],
        };

        let mut session = Session::new("remote");
        session.start();
        let cases = apply_report(&mut session, "c1", &report);
        session.finish();

        assert_eq!(cases.len(), 3);
        let suite = session.element(cases[0]).parent().expect("case has a suite");
        assert_eq!(session.element(suite).name(), "c1");

        let passed = session.element(cases[0]);
        assert_eq!(passed.status(), TestStatus::Ok);
        assert_eq!(passed.display_name(), "Check totals");
        assert_eq!(passed.method_name(), "CheckTotals");
        assert_eq!(passed.elapsed(), Some(Duration::from_millis(42)));

        let failed = session.element(cases[1]);
        assert_eq!(failed.status(), TestStatus::Failure);
        let info = &failed.error_infos()[0];
        assert_eq!(info.message.as_deref(), Some("assertion failed"));
        assert_eq!(info.trace.as_deref(), Some("at CheckRounding"));
        assert_eq!(info.kind.as_deref(), Some("AssertionError"));

        assert_eq!(session.element(cases[2]).status(), TestStatus::Error);
        assert_eq!(session.aggregate_status(suite), TestStatus::Error);

        let counts = session.counts();
        assert_eq!(counts.total, 3);
        assert_eq!(counts.started, 3);
        assert_eq!(counts.failures, 1);
        assert_eq!(counts.errors, 1);
        assert_eq!(
            session.element(suite).counters().expect("suite"),
            session.computed_counters(suite)
        );
    }

    #[test]
    fn skipped_with_problems_is_an_assumption_failure() {
        let report = ReportData {
            tests: vec![RemoteTestOutcome {
                status: "skipped".to_owned(),
                present: None,
                method: "NeedsDatabase".to_owned(),
                duration: 0,
                errors: vec![RemoteErrorDetail {
                    message: Some("database not reachable".to_owned()),
                    trace: None,
                    kind: None,
                }],
            }],
        };

        let mut session = Session::new("remote");
        session.start();
        let cases = apply_report(&mut session, "c1", &report);

        let case = session.element(cases[0]);
        assert!(case.assumption_failed());
        assert!(!case.ignored());
        assert_eq!(case.status(), TestStatus::Skipped);
        assert_eq!(session.counts().assumption_failures, 1);
        assert_eq!(session.counts().ignored, 0);
        assert!(!session.has_errors_or_failures());
    }

    #[test]
    fn bare_skipped_is_ignored() {
        let report = ReportData {
            tests: vec![outcome("skipped", "NotReady")],
        };

        let mut session = Session::new("remote");
        session.start();
        let cases = apply_report(&mut session, "c1", &report);

        let case = session.element(cases[0]);
        assert!(case.ignored());
        assert!(!case.assumption_failed());
        assert_eq!(session.counts().ignored, 1);
        assert_eq!(session.counts().assumption_failures, 0);
    }

    #[test]
    fn failed_outcome_without_details_still_records_a_problem() {
        let report = ReportData {
            tests: vec![outcome("failed", "CheckTotals")],
        };

        let mut session = Session::new("remote");
        session.start();
        let cases = apply_report(&mut session, "c1", &report);

        let case = session.element(cases[0]);
        assert_eq!(case.error_infos().len(), 1);
        assert_eq!(case.status(), TestStatus::Failure);
        assert_eq!(session.counts().failures, 1);
    }

    #[test]
    fn unknown_status_leaves_the_case_unresolved() {
        let report = ReportData {
            tests: vec![outcome("exploded", "CheckTotals")],
        };

        let mut session = Session::new("remote");
        session.start();
        let cases = apply_report(&mut session, "c1", &report);

        let case = session.element(cases[0]);
        assert_eq!(case.status(), TestStatus::NotRun);
        assert!(case.ended());
        assert!(!case.completed());
        assert_eq!(session.counts().total, 1);
        assert_eq!(session.counts().started, 0);
    }

    #[test]
    fn empty_report_adds_nothing() {
        let mut session = Session::new("remote");
        session.start();
        let cases = apply_report(&mut session, "c1", &ReportData::default());
        assert_eq!(cases, Vec::new());
        assert_eq!(session.elements().count(), 1);
    }
}
