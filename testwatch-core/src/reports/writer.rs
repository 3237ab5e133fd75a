// Copyright (c) The testwatch Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Serializing sessions back into report documents.

use crate::{
    errors::ExportError,
    model::{ElementId, Session, TestElement, TestStatus},
    reports::{
        ATTR_CLASSNAME, ATTR_DISPLAY_NAME, ATTR_DYNAMIC_TEST, ATTR_ERRORS, ATTR_EXCLUDE_TAGS,
        ATTR_FAILURES, ATTR_ID, ATTR_IGNORED, ATTR_INCLUDE_TAGS, ATTR_INCOMPLETE, ATTR_MESSAGE,
        ATTR_NAME, ATTR_PARAMETERS, ATTR_PROJECT, ATTR_STARTED, ATTR_TESTS, ATTR_TIME,
        ATTR_TIMESTAMP, ATTR_TYPE, ATTR_UNIQUE_ID, ELEM_ACTUAL, ELEM_ERROR, ELEM_EXPECTED,
        ELEM_FAILURE, ELEM_SKIPPED, ELEM_TESTCASE, ELEM_TESTRUN, ELEM_TESTSUITE,
    },
};
use quick_xml::{
    events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event},
    Writer,
};
use std::{borrow::Cow, fmt::Write as _, io};

/// Serializes `session` as a report document.
///
/// The output parses back into an equivalent session, which is what the
/// registry relies on when it swaps sessions out to disk.
pub fn write_report<W: io::Write>(session: &Session, sink: W) -> Result<(), ExportError> {
    let mut writer = Writer::new_with_indent(sink, b' ', 4);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let counts = session.counts();
    let mut run = BytesStart::new(ELEM_TESTRUN);
    run.push_attribute((ATTR_NAME, session.name()));
    if let Some(project) = session.project() {
        run.push_attribute((ATTR_PROJECT, project));
    }
    run.push_attribute((ATTR_TESTS, counts.total.to_string().as_str()));
    run.push_attribute((ATTR_STARTED, counts.started.to_string().as_str()));
    run.push_attribute((ATTR_FAILURES, counts.failures.to_string().as_str()));
    run.push_attribute((ATTR_ERRORS, counts.errors.to_string().as_str()));
    run.push_attribute((ATTR_IGNORED, counts.ignored.to_string().as_str()));
    if let Some(tags) = session.include_tags() {
        run.push_attribute((ATTR_INCLUDE_TAGS, tags));
    }
    if let Some(tags) = session.exclude_tags() {
        run.push_attribute((ATTR_EXCLUDE_TAGS, tags));
    }
    run.push_attribute((ATTR_TIMESTAMP, session.started_at().to_rfc3339().as_str()));
    run.push_attribute((ATTR_ID, session.id().to_string().as_str()));
    writer.write_event(Event::Start(run))?;

    let root = session.element(ElementId::ROOT);
    write_failure_block(&mut writer, root)?;
    for &child in root.children() {
        write_element(&mut writer, session, child)?;
    }
    writer.write_event(Event::End(BytesEnd::new(ELEM_TESTRUN)))?;
    Ok(())
}

/// [`write_report`] into a string.
pub fn write_report_string(session: &Session) -> Result<String, ExportError> {
    let mut bytes = Vec::new();
    write_report(session, &mut bytes)?;
    String::from_utf8(bytes)
        .map_err(|error| ExportError::Io(io::Error::new(io::ErrorKind::InvalidData, error)))
}

fn write_element<W: io::Write>(
    writer: &mut Writer<W>,
    session: &Session,
    id: ElementId,
) -> Result<(), ExportError> {
    let element = session.element(id);
    if element.is_suite() {
        let mut start = BytesStart::new(ELEM_TESTSUITE);
        start.push_attribute((ATTR_NAME, element.name()));
        if let Some(counters) = element.counters() {
            start.push_attribute((ATTR_TESTS, counters.tests.to_string().as_str()));
            start.push_attribute((ATTR_FAILURES, counters.failures.to_string().as_str()));
            start.push_attribute((ATTR_ERRORS, counters.errors.to_string().as_str()));
            start.push_attribute((ATTR_IGNORED, counters.skipped.to_string().as_str()));
        }
        if let Some(seconds) = element.elapsed_seconds() {
            start.push_attribute((ATTR_TIME, format_seconds(seconds).as_str()));
        }
        // A finished suite that never produced a result needs no marker;
        // everything else records whether it ran to completion.
        if !element.completed() || element.status() != TestStatus::NotRun {
            let incomplete = if element.completed() { "false" } else { "true" };
            start.push_attribute((ATTR_INCOMPLETE, incomplete));
        }
        push_common_attrs(&mut start, element);
        writer.write_event(Event::Start(start))?;
        write_failure_block(writer, element)?;
        for &child in element.children() {
            write_element(writer, session, child)?;
        }
        writer.write_event(Event::End(BytesEnd::new(ELEM_TESTSUITE)))?;
    } else {
        let mut start = BytesStart::new(ELEM_TESTCASE);
        start.push_attribute((ATTR_NAME, element.method_name()));
        if let Some(class_name) = element.class_name() {
            start.push_attribute((ATTR_CLASSNAME, class_name));
        }
        if let Some(seconds) = element.elapsed_seconds() {
            start.push_attribute((ATTR_TIME, format_seconds(seconds).as_str()));
        }
        if !element.completed() {
            start.push_attribute((ATTR_INCOMPLETE, "true"));
        }
        if element.ignored() {
            start.push_attribute((ATTR_IGNORED, "true"));
        }
        if element.dynamic() {
            start.push_attribute((ATTR_DYNAMIC_TEST, "true"));
        }
        push_common_attrs(&mut start, element);
        if element.error_infos().is_empty() && !element.assumption_failed() {
            writer.write_event(Event::Empty(start))?;
        } else {
            writer.write_event(Event::Start(start))?;
            write_failure_block(writer, element)?;
            writer.write_event(Event::End(BytesEnd::new(ELEM_TESTCASE)))?;
        }
    }
    Ok(())
}

fn push_common_attrs(start: &mut BytesStart<'_>, element: &TestElement) {
    if let Some(display) = element.display_name.as_deref() {
        start.push_attribute((ATTR_DISPLAY_NAME, display));
    }
    if !element.parameter_types().is_empty() {
        start.push_attribute((ATTR_PARAMETERS, element.parameter_types().join(",").as_str()));
    }
    if let Some(unique_id) = element.unique_id() {
        start.push_attribute((ATTR_UNIQUE_ID, unique_id));
    }
}

fn write_failure_block<W: io::Write>(
    writer: &mut Writer<W>,
    element: &TestElement,
) -> Result<(), ExportError> {
    if element.assumption_failed() {
        let info = element.error_infos().last();
        let trace = info.and_then(|info| info.trace.as_deref());
        let mut start = BytesStart::new(ELEM_SKIPPED);
        if trace.is_none() {
            // Without trace text the reason would otherwise be lost.
            if let Some(message) = info.and_then(|info| info.message.as_deref()) {
                start.push_attribute((ATTR_MESSAGE, message));
            }
        }
        match trace {
            Some(trace) => {
                writer.write_event(Event::Start(start))?;
                write_text(writer, trace)?;
                writer.write_event(Event::End(BytesEnd::new(ELEM_SKIPPED)))?;
            }
            None => writer.write_event(Event::Empty(start))?,
        }
        return Ok(());
    }
    for info in element.error_infos() {
        let tag = if info.status == TestStatus::Error {
            ELEM_ERROR
        } else {
            ELEM_FAILURE
        };
        let mut start = BytesStart::new(tag);
        if let Some(message) = info.message.as_deref() {
            start.push_attribute((ATTR_MESSAGE, message));
        }
        if let Some(kind) = info.kind.as_deref() {
            start.push_attribute((ATTR_TYPE, kind));
        }
        if info.trace.is_none() && info.expected.is_none() && info.actual.is_none() {
            writer.write_event(Event::Empty(start))?;
            continue;
        }
        writer.write_event(Event::Start(start))?;
        if let Some(expected) = info.expected.as_deref() {
            write_text_element(writer, ELEM_EXPECTED, expected)?;
        }
        if let Some(actual) = info.actual.as_deref() {
            write_text_element(writer, ELEM_ACTUAL, actual)?;
        }
        if let Some(trace) = info.trace.as_deref() {
            write_text(writer, trace)?;
        }
        writer.write_event(Event::End(BytesEnd::new(tag)))?;
    }
    Ok(())
}

fn write_text_element<W: io::Write>(
    writer: &mut Writer<W>,
    tag: &str,
    text: &str,
) -> Result<(), ExportError> {
    writer.write_event(Event::Start(BytesStart::new(tag)))?;
    write_text(writer, text)?;
    writer.write_event(Event::End(BytesEnd::new(tag)))?;
    Ok(())
}

fn write_text<W: io::Write>(writer: &mut Writer<W>, text: &str) -> Result<(), ExportError> {
    let text = escape_control_chars(text);
    writer.write_event(Event::Text(BytesText::new(text.as_ref())))?;
    Ok(())
}

/// Formats a duration in seconds with millisecond precision and no trailing
/// zeros, keeping at least one fractional digit.
fn format_seconds(seconds: f64) -> String {
    let mut formatted = format!("{seconds:.3}");
    while formatted.ends_with('0') {
        formatted.pop();
    }
    if formatted.ends_with('.') {
        formatted.push('0');
    }
    formatted
}

/// Replaces control characters XML 1.0 cannot carry with `\uXXXX` escapes.
/// Tab, line feed and carriage return pass through.
fn escape_control_chars(text: &str) -> Cow<'_, str> {
    if !text.chars().any(needs_escape) {
        return Cow::Borrowed(text);
    }
    let mut escaped = String::with_capacity(text.len() + 8);
    for c in text.chars() {
        if needs_escape(c) {
            let _ = write!(escaped, "\\u{:04x}", c as u32);
        } else {
            escaped.push(c);
        }
    }
    Cow::Owned(escaped)
}

fn needs_escape(c: char) -> bool {
    c < ' ' && !matches!(c, '\t' | '\n' | '\r')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{model::ErrorInfo, reports::parse_report_str};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn sample_session() -> Session {
        let mut session = Session::new("nightly totals");
        session.set_project("acme.billing");
        session.set_include_tags("fast");
        session.set_exclude_tags("flaky");
        session.start();
        let suite = session.new_suite(ElementId::ROOT, "com.acme.TotalsTest");
        session.set_elapsed(suite, Duration::from_millis(1250));

        let pass = session.new_case(suite, "adds", Some("TotalsTest"));
        session.set_elapsed(pass, Duration::from_millis(4));
        session.register_test_ended(pass, true);

        let fail = session.new_case(suite, "compares", Some("TotalsTest"));
        let mut info = ErrorInfo::new(TestStatus::Failure);
        info.set_message("values differ")
            .set_kind("ComparisonFailure")
            .set_trace("at com.acme.TotalsTest.compares(TotalsTest.bsl:12)")
            .set_expected("4")
            .set_actual("5");
        session.push_error_info(fail, info);
        session.register_failure(fail, TestStatus::Failure, false);
        session.register_test_ended(fail, true);

        let ignored = session.new_case(suite, "slow_path", Some("TotalsTest"));
        session.set_ignored(ignored);
        session.register_test_ended(ignored, true);

        let assumption = session.new_case(suite, "requires_db", Some("TotalsTest"));
        let mut skip = ErrorInfo::new(TestStatus::Skipped);
        skip.set_trace("database not reachable\n");
        session.push_error_info(assumption, skip);
        session.set_assumption_failed(assumption);
        session.register_test_ended(assumption, true);

        let incomplete = session.new_case(suite, "interrupted", Some("TotalsTest"));
        session.register_test_ended(incomplete, false);

        session.finish();
        session
    }

    #[test]
    fn written_report_parses_back_to_the_same_session() {
        let session = sample_session();
        let xml = write_report_string(&session).expect("serializes");
        let back = parse_report_str(&xml, None).expect("parses back");

        assert_eq!(back.name(), session.name());
        assert_eq!(back.project(), session.project());
        assert_eq!(back.include_tags(), Some("fast"));
        assert_eq!(back.exclude_tags(), Some("flaky"));
        assert_eq!(back.started_at(), session.started_at());
        assert_eq!(back.counts(), session.counts());

        let names: Vec<&str> = back
            .cases_in_order()
            .into_iter()
            .map(|id| back.element(id).name())
            .collect();
        assert_eq!(
            names,
            [
                "adds(TotalsTest)",
                "compares(TotalsTest)",
                "slow_path(TotalsTest)",
                "requires_db(TotalsTest)",
                "interrupted(TotalsTest)",
            ]
        );

        let suite = back.element(back.element(ElementId::ROOT).children()[0]);
        assert_eq!(suite.name(), "com.acme.TotalsTest");
        assert_eq!(suite.elapsed(), Some(Duration::from_millis(1250)));

        let compares = back.element(suite.children()[1]);
        let info = compares.error_infos().last().expect("failure info");
        assert_eq!(info.message.as_deref(), Some("values differ"));
        assert_eq!(info.kind.as_deref(), Some("ComparisonFailure"));
        assert_eq!(
            info.trace.as_deref(),
            Some("at com.acme.TotalsTest.compares(TotalsTest.bsl:12)")
        );
        assert_eq!(info.expected.as_deref(), Some("4"));
        assert_eq!(info.actual.as_deref(), Some("5"));

        let requires_db = back.element(suite.children()[3]);
        assert!(requires_db.assumption_failed());
        let skip = requires_db.error_infos().last().expect("skip info");
        assert_eq!(skip.trace.as_deref(), Some("database not reachable\n"));

        let interrupted = back.element(suite.children()[4]);
        assert!(interrupted.ended());
        assert!(!interrupted.completed());
    }

    #[test]
    fn clean_cases_self_close() {
        let xml = write_report_string(&sample_session()).expect("serializes");
        assert!(xml.contains(r#"<testcase name="adds" classname="TotalsTest" time="0.004"/>"#));
        assert!(xml.contains(r#"<testcase name="interrupted" classname="TotalsTest" incomplete="true"/>"#));
    }

    #[test]
    fn header_carries_session_counts() {
        let xml = write_report_string(&sample_session()).expect("serializes");
        assert!(xml.contains(r#"tests="5""#));
        assert!(xml.contains(r#"started="4""#));
        assert!(xml.contains(r#"failures="1""#));
        assert!(xml.contains(r#"errors="0""#));
        assert!(xml.contains(r#"ignored="1""#));
    }

    #[test]
    fn suites_carry_their_counters() {
        let xml = write_report_string(&sample_session()).expect("serializes");
        // `ignored` is the suite's skipped tally, so the assumption failure
        // counts here even though the session header lists it separately.
        assert!(xml.contains(
            r#"<testsuite name="com.acme.TotalsTest" tests="5" failures="1" errors="0" ignored="2" time="1.25""#
        ));
    }

    #[test]
    fn run_level_failures_survive_round_trips() {
        let mut session = Session::new("launch failed");
        session.start();
        let mut info = ErrorInfo::new(TestStatus::Error);
        info.set_message("runner crashed before any test");
        session.push_error_info(ElementId::ROOT, info);
        session.register_failure(ElementId::ROOT, TestStatus::Error, false);
        session.finish();

        let xml = write_report_string(&session).expect("serializes");
        let back = parse_report_str(&xml, None).expect("parses back");
        let info = back
            .element(ElementId::ROOT)
            .error_infos()
            .last()
            .expect("run-level error");
        assert_eq!(info.message.as_deref(), Some("runner crashed before any test"));
        assert_eq!(back.counts().errors, 1);
    }

    #[test]
    fn seconds_format_keeps_millisecond_precision() {
        assert_eq!(format_seconds(0.004), "0.004");
        assert_eq!(format_seconds(1.25), "1.25");
        assert_eq!(format_seconds(3.0), "3.0");
        assert_eq!(format_seconds(0.12349), "0.123");
        assert_eq!(format_seconds(61.5), "61.5");
    }

    #[test]
    fn control_characters_are_escaped() {
        assert_eq!(escape_control_chars("plain text"), "plain text");
        assert_eq!(escape_control_chars("tab\tand\nnewline"), "tab\tand\nnewline");
        assert_eq!(escape_control_chars("bell\x07here"), "bell\\u0007here");
        assert_eq!(escape_control_chars("\x1b[31m"), "\\u001b[31m");
    }
}
