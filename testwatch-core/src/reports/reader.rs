// Copyright (c) The testwatch Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The streaming report reader.

use crate::{
    errors::ImportError,
    model::{ElementId, ErrorInfo, Session, TestStatus},
    reports::{
        ImportMonitor, ATTR_CLASSNAME, ATTR_CONTEXT, ATTR_DISPLAY_NAME, ATTR_DYNAMIC_TEST,
        ATTR_EXCLUDE_TAGS, ATTR_ID, ATTR_IGNORED, ATTR_INCLUDE_TAGS, ATTR_INCOMPLETE,
        ATTR_MESSAGE, ATTR_NAME, ATTR_PACKAGE, ATTR_PARAMETERS, ATTR_PROJECT, ATTR_TIME,
        ATTR_TIMESTAMP, ATTR_TYPE, ATTR_UNIQUE_ID, ELEM_ACTUAL, ELEM_ERROR, ELEM_EXPECTED,
        ELEM_FAILURE, ELEM_PROPERTIES, ELEM_PROPERTY, ELEM_SKIPPED, ELEM_SYSTEM_ERR,
        ELEM_SYSTEM_OUT, ELEM_TESTCASE, ELEM_TESTRUN, ELEM_TESTSUITE, ELEM_TESTSUITES,
    },
};
use chrono::{DateTime, Utc};
use quick_xml::{
    events::{BytesStart, Event},
    Reader,
};
use std::{io::BufRead, mem, str, time::Duration};

/// Knobs for a single parse.
#[derive(Clone, Copy, Default)]
pub(crate) struct ParseOptions<'a> {
    /// Project to record when the document does not name one.
    pub(crate) project_hint: Option<&'a str>,

    /// Adopt the session id stored in the document. Used when reading the
    /// registry's own swap files; ids in foreign reports are ignored.
    pub(crate) keep_session_id: bool,

    /// Progress and cancellation state, checked at element boundaries.
    pub(crate) monitor: Option<&'a ImportMonitor>,
}

/// Parses a report document into `session`.
///
/// The session is reset as soon as the document's root test element is
/// seen, then rebuilt from the document; on success it is left running with
/// every reported result registered. Callers decide whether to finish it.
pub(crate) fn parse_into<R: BufRead>(
    session: &mut Session,
    input: R,
    options: ParseOptions<'_>,
) -> Result<(), ImportError> {
    let mut parser = Parser {
        session,
        options,
        state: State::Body,
        open: Vec::new(),
        capture: None,
        initialized: false,
        depth: 0,
        done: false,
        position: 0,
    };
    let mut reader = Reader::from_reader(input);
    let mut buf = Vec::new();
    loop {
        parser.position = reader.buffer_position() as u64;
        let event =
            reader
                .read_event_into(&mut buf)
                .map_err(|error| ImportError::Xml {
                    position: reader.buffer_position() as u64,
                    error,
                })?;
        match event {
            Event::Start(e) => parser.handle_start(&e, false)?,
            Event::Empty(e) => parser.handle_start(&e, true)?,
            Event::End(e) => {
                let name = element_name(e.name().as_ref(), parser.position)?.to_owned();
                parser.handle_end(&name)?;
            }
            Event::Text(e) => {
                let text = e.unescape().map_err(|error| parser.xml_error(error))?;
                parser.handle_text(&text);
            }
            Event::CData(e) => {
                let bytes = e.into_inner();
                parser.handle_text(&String::from_utf8_lossy(&bytes));
            }
            Event::Decl(_) | Event::Comment(_) | Event::PI(_) | Event::DocType(_) => {}
            Event::Eof => return parser.finish_document(),
        }
        buf.clear();
    }
}

/// Where in the document the parser currently is.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
    /// Between test elements.
    Body,
    /// Inside an `error`, `failure` or `skipped` element; text goes to the
    /// trace.
    Capture,
    /// Inside `expected` within a capture.
    Expected,
    /// Inside `actual` within a capture.
    Actual,
    /// Inside `properties`; contents are recognized but not recorded.
    Properties,
    /// Inside `system-out` or `system-err`; contents are not recorded.
    Output,
}

/// A suite or case whose end tag has not been seen yet.
#[derive(Clone, Copy)]
struct OpenElement {
    id: ElementId,
    incomplete: bool,
    is_case: bool,
}

/// Accumulated contents of an `error`/`failure`/`skipped` element.
struct Capture {
    status: TestStatus,
    message: Option<String>,
    kind: Option<String>,
    trace: String,
    /// Scratch buffer for the comparison value currently being read.
    aux: String,
    expected: Option<String>,
    actual: Option<String>,
}

struct Parser<'a> {
    session: &'a mut Session,
    options: ParseOptions<'a>,
    state: State,
    open: Vec<OpenElement>,
    capture: Option<Capture>,
    initialized: bool,
    depth: u32,
    done: bool,
    position: u64,
}

impl Parser<'_> {
    fn handle_start(&mut self, e: &BytesStart<'_>, empty: bool) -> Result<(), ImportError> {
        if let Some(monitor) = self.options.monitor {
            if monitor.is_cancelled() {
                return Err(ImportError::Cancelled);
            }
            monitor.record_element();
        }
        let name = element_name(e.name().as_ref(), self.position)?.to_owned();
        if !is_known_element(&name) {
            return Err(self.unexpected(&name));
        }
        if self.done {
            return Err(self.structure("content after the document root"));
        }
        self.depth += 1;
        match self.state {
            State::Body => self.start_in_body(&name, e)?,
            State::Capture => match name.as_str() {
                ELEM_EXPECTED => self.state = State::Expected,
                ELEM_ACTUAL => self.state = State::Actual,
                _ => {
                    return Err(
                        self.structure(format!("`{name}` is not allowed inside a failure element"))
                    );
                }
            },
            State::Expected | State::Actual => {
                return Err(
                    self.structure(format!("`{name}` is not allowed inside a comparison value"))
                );
            }
            State::Properties => {
                if name != ELEM_PROPERTY {
                    return Err(self.structure(format!("`{name}` is not allowed in `properties`")));
                }
            }
            State::Output => {
                return Err(self.structure(format!("`{name}` is not allowed in captured output")));
            }
        }
        if empty {
            self.handle_end(&name)?;
        }
        Ok(())
    }

    fn start_in_body(&mut self, name: &str, e: &BytesStart<'_>) -> Result<(), ImportError> {
        if !self.initialized && !matches!(name, ELEM_TESTRUN | ELEM_TESTSUITES | ELEM_TESTSUITE) {
            return Err(self.structure(format!("`{name}` before any test run element")));
        }
        let attrs = self.read_attrs(e)?;
        match name {
            ELEM_TESTRUN => {
                if self.depth != 1 {
                    return Err(self.structure("`testrun` must be the document root"));
                }
                self.begin_run(&attrs);
            }
            // Grouping wrapper only; contents are handled as if it were
            // absent. Valid at the root and nested inside `testrun`.
            ELEM_TESTSUITES => {}
            ELEM_TESTSUITE => {
                if !self.initialized {
                    self.begin_implicit_run(&attrs);
                }
                self.begin_suite(&attrs);
            }
            ELEM_TESTCASE => self.begin_case(&attrs),
            ELEM_ERROR => self.begin_capture(TestStatus::Error, &attrs),
            ELEM_FAILURE => self.begin_capture(TestStatus::Failure, &attrs),
            ELEM_SKIPPED => self.begin_capture(TestStatus::Skipped, &attrs),
            ELEM_PROPERTIES => self.state = State::Properties,
            ELEM_SYSTEM_OUT | ELEM_SYSTEM_ERR => self.state = State::Output,
            ELEM_PROPERTY => {
                return Err(self.structure("`property` is only allowed in `properties`"));
            }
            _ => {
                // expected/actual, which only make sense inside a capture
                return Err(
                    self.structure(format!("`{name}` is only allowed inside a failure element"))
                );
            }
        }
        Ok(())
    }

    fn handle_end(&mut self, name: &str) -> Result<(), ImportError> {
        self.depth = self.depth.saturating_sub(1);
        match self.state {
            State::Expected => {
                self.store_comparison(true);
                self.state = State::Capture;
            }
            State::Actual => {
                self.store_comparison(false);
                self.state = State::Capture;
            }
            State::Properties => {
                if name == ELEM_PROPERTIES {
                    self.state = State::Body;
                }
            }
            State::Output => self.state = State::Body,
            State::Capture => match name {
                ELEM_ERROR | ELEM_FAILURE | ELEM_SKIPPED => self.finish_capture()?,
                _ => return Err(self.structure(format!("unbalanced `{name}` end tag"))),
            },
            State::Body => match name {
                ELEM_TESTSUITE | ELEM_TESTCASE => self.finish_element(name)?,
                _ => {}
            },
        }
        if self.depth == 0 {
            self.done = true;
        }
        Ok(())
    }

    fn handle_text(&mut self, text: &str) {
        let Some(capture) = &mut self.capture else {
            return;
        };
        match self.state {
            State::Capture => capture.trace.push_str(text),
            State::Expected | State::Actual => capture.aux.push_str(text),
            _ => {}
        }
    }

    fn begin_run(&mut self, attrs: &Attrs) {
        self.session.reset();
        if let Some(name) = attrs.get(ATTR_NAME) {
            self.session.set_name(name);
        }
        let project = attrs
            .get(ATTR_PROJECT)
            .filter(|project| !project.is_empty())
            .or(self.options.project_hint);
        if let Some(project) = project {
            self.session.set_project(project);
        }
        if let Some(tags) = attrs.get(ATTR_INCLUDE_TAGS) {
            if !tags.trim().is_empty() {
                self.session.set_include_tags(tags);
            }
        }
        if let Some(tags) = attrs.get(ATTR_EXCLUDE_TAGS) {
            if !tags.trim().is_empty() {
                self.session.set_exclude_tags(tags);
            }
        }
        if let Some(timestamp) = attrs.get(ATTR_TIMESTAMP) {
            if let Ok(at) = DateTime::parse_from_rfc3339(timestamp) {
                self.session.set_started_at(at.with_timezone(&Utc));
            }
        }
        if self.options.keep_session_id {
            if let Some(id) = attrs.get(ATTR_ID).and_then(|raw| raw.parse().ok()) {
                self.session.set_id(id);
            }
        }
        // Count attributes are not read; tallies are rebuilt from the
        // registered elements.
        self.session.start();
        self.initialized = true;
    }

    /// A document rooted at `testsuite` has no `testrun` element; the first
    /// suite names the session.
    fn begin_implicit_run(&mut self, attrs: &Attrs) {
        self.session.reset();
        if let Some(name) = attrs.get(ATTR_NAME) {
            self.session.set_name(name);
        }
        if let Some(project) = self.options.project_hint {
            self.session.set_project(project);
        }
        self.session.start();
        self.initialized = true;
    }

    fn begin_suite(&mut self, attrs: &Attrs) {
        let name = attrs.get(ATTR_NAME).unwrap_or_default();
        let full_name = match attrs.get(ATTR_PACKAGE) {
            Some(package) if !package.is_empty() => format!("{package}.{name}"),
            _ => name.to_owned(),
        };
        let parent = self.attach_point();
        let id = self.session.new_suite(parent, full_name);
        self.apply_common_attrs(id, attrs);
        self.open.push(OpenElement {
            id,
            incomplete: attrs.flag(ATTR_INCOMPLETE),
            is_case: false,
        });
    }

    fn begin_case(&mut self, attrs: &Attrs) {
        let method = attrs.get(ATTR_NAME).unwrap_or_default();
        let class_name = attrs.get(ATTR_CLASSNAME);
        let parent = self.attach_point();
        let id = self.session.new_case(parent, method, class_name);
        self.apply_common_attrs(id, attrs);
        if attrs.flag(ATTR_DYNAMIC_TEST) {
            if let Some(data) = self.session.element_mut(id).case_data_mut() {
                data.dynamic = true;
            }
        }
        if attrs.flag(ATTR_IGNORED) {
            self.session.set_ignored(id);
        }
        self.open.push(OpenElement {
            id,
            incomplete: attrs.flag(ATTR_INCOMPLETE),
            is_case: true,
        });
    }

    fn apply_common_attrs(&mut self, id: ElementId, attrs: &Attrs) {
        let element = self.session.element_mut(id);
        if let Some(display) = attrs.get(ATTR_DISPLAY_NAME) {
            element.display_name = Some(display.to_owned());
        }
        if let Some(params) = attrs.get(ATTR_PARAMETERS) {
            if !params.trim().is_empty() {
                element.parameter_types = params.split(',').map(str::to_owned).collect();
            }
        }
        if let Some(unique_id) = attrs.get(ATTR_UNIQUE_ID) {
            if !unique_id.trim().is_empty() {
                element.unique_id = Some(unique_id.to_owned());
            }
        }
        if let Some(context) = attrs.get(ATTR_CONTEXT) {
            element.context = Some(context.to_owned());
        }
        if let Some(elapsed) = attrs.get(ATTR_TIME).and_then(parse_seconds) {
            element.elapsed = Some(elapsed);
        }
    }

    fn begin_capture(&mut self, status: TestStatus, attrs: &Attrs) {
        debug_assert!(self.capture.is_none());
        let message = attrs.get(ATTR_MESSAGE).map(str::to_owned);
        let kind = if status == TestStatus::Skipped {
            None
        } else {
            attrs.get(ATTR_TYPE).map(str::to_owned)
        };
        let mut trace = String::new();
        if status == TestStatus::Skipped {
            // The message doubles as the first trace line, which is how a
            // written report carries it.
            if let Some(message) = &message {
                trace.push_str(message);
                trace.push('\n');
            }
        }
        self.capture = Some(Capture {
            status,
            message,
            kind,
            trace,
            aux: String::new(),
            expected: None,
            actual: None,
        });
        self.state = State::Capture;
    }

    fn store_comparison(&mut self, expected: bool) {
        if let Some(capture) = &mut self.capture {
            let value = mem::take(&mut capture.aux);
            if !value.is_empty() {
                if expected {
                    capture.expected = Some(value);
                } else {
                    capture.actual = Some(value);
                }
            }
            // Whitespace between the comparison nodes is not trace content.
            capture.trace.clear();
        }
    }

    fn finish_element(&mut self, name: &str) -> Result<(), ImportError> {
        let Some(open) = self.open.pop() else {
            return Err(self.structure(format!("unbalanced `{name}` end tag")));
        };
        self.session.register_test_ended(open.id, !open.incomplete);
        Ok(())
    }

    fn finish_capture(&mut self) -> Result<(), ImportError> {
        let Some(capture) = self.capture.take() else {
            return Err(self.structure("unbalanced failure end tag"));
        };
        self.state = State::Body;
        let target = self.capture_target();
        match capture.status {
            TestStatus::Skipped => {
                if !capture.trace.is_empty() {
                    // A skip that carries a reason is a failed assumption.
                    let mut info = ErrorInfo::new(TestStatus::Skipped);
                    if let Some(message) = capture.message {
                        info.set_message(message);
                    }
                    info.set_trace(capture.trace);
                    if let Some(expected) = capture.expected {
                        info.set_expected(expected);
                    }
                    if let Some(actual) = capture.actual {
                        info.set_actual(actual);
                    }
                    self.session.push_error_info(target, info);
                    self.session.set_assumption_failed(target);
                } else if self.session.element(target).is_case() {
                    self.session.set_ignored(target);
                } else {
                    self.session.set_assumption_failed(target);
                }
            }
            status => {
                let mut info = ErrorInfo::new(status);
                if let Some(message) = capture.message {
                    info.set_message(message);
                }
                if let Some(kind) = capture.kind {
                    info.set_kind(kind);
                }
                if !capture.trace.is_empty() {
                    info.set_trace(capture.trace);
                }
                if let Some(expected) = capture.expected {
                    info.set_expected(expected);
                }
                if let Some(actual) = capture.actual {
                    info.set_actual(actual);
                }
                let assumption = self.session.element(target).assumption_failed();
                self.session.push_error_info(target, info);
                self.session.register_failure(target, status, assumption);
            }
        }
        Ok(())
    }

    fn finish_document(&self) -> Result<(), ImportError> {
        if self.done {
            Ok(())
        } else if !self.initialized {
            Err(self.structure("document contains no test run"))
        } else {
            Err(self.structure("truncated report"))
        }
    }

    /// The suite new elements attach to: the innermost open suite, or the
    /// session root.
    fn attach_point(&self) -> ElementId {
        self.open
            .iter()
            .rev()
            .find(|open| !open.is_case)
            .map(|open| open.id)
            .unwrap_or(ElementId::ROOT)
    }

    /// The element a finished capture lands on: the innermost open element,
    /// or the session root.
    fn capture_target(&self) -> ElementId {
        self.open
            .last()
            .map(|open| open.id)
            .unwrap_or(ElementId::ROOT)
    }

    fn read_attrs(&self, e: &BytesStart<'_>) -> Result<Attrs, ImportError> {
        let mut pairs = Vec::new();
        for attr in e.attributes() {
            let attr = attr.map_err(|error| self.xml_error(error.into()))?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map_err(|error| self.xml_error(error))?
                .into_owned();
            pairs.push((key, value));
        }
        Ok(Attrs(pairs))
    }

    fn structure(&self, reason: impl Into<String>) -> ImportError {
        ImportError::Structure {
            reason: reason.into(),
            position: self.position,
        }
    }

    fn unexpected(&self, element: &str) -> ImportError {
        ImportError::UnexpectedElement {
            element: element.to_owned(),
            position: self.position,
        }
    }

    fn xml_error(&self, error: quick_xml::Error) -> ImportError {
        ImportError::Xml {
            position: self.position,
            error,
        }
    }
}

struct Attrs(Vec<(String, String)>);

impl Attrs {
    fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    fn flag(&self, name: &str) -> bool {
        self.get(name)
            .is_some_and(|value| value.eq_ignore_ascii_case("true"))
    }
}

fn element_name(raw: &[u8], position: u64) -> Result<&str, ImportError> {
    str::from_utf8(raw).map_err(|_| ImportError::Structure {
        reason: "element name is not UTF-8".to_owned(),
        position,
    })
}

fn is_known_element(name: &str) -> bool {
    matches!(
        name,
        ELEM_TESTRUN
            | ELEM_TESTSUITES
            | ELEM_TESTSUITE
            | ELEM_TESTCASE
            | ELEM_PROPERTIES
            | ELEM_PROPERTY
            | ELEM_ERROR
            | ELEM_FAILURE
            | ELEM_SKIPPED
            | ELEM_EXPECTED
            | ELEM_ACTUAL
            | ELEM_SYSTEM_OUT
            | ELEM_SYSTEM_ERR
    )
}

fn parse_seconds(raw: &str) -> Option<Duration> {
    raw.parse::<f64>()
        .ok()
        .and_then(|seconds| Duration::try_from_secs_f64(seconds).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    fn parse(xml: &str) -> Session {
        let mut session = Session::new("under test");
        parse_into(&mut session, xml.as_bytes(), ParseOptions::default())
            .expect("document parses");
        session
    }

    #[test]
    fn standalone_suite_names_the_session() {
        let session = parse(indoc! {r#"
            <testsuite name="Totals" package="com.acme">
                <testcase name="adds" classname="Totals" time="0.004"/>
            </testsuite>
        "#});
        assert_eq!(session.name(), "Totals");
        let root = session.element(ElementId::ROOT);
        let suite = session.element(root.children()[0]);
        assert_eq!(suite.name(), "com.acme.Totals");
        assert_eq!(session.counts().total, 1);
    }

    #[test]
    fn suites_nest_and_cases_attach_to_the_innermost_suite() {
        let session = parse(indoc! {r#"
            <testrun name="nested">
                <testsuite name="outer">
                    <testsuite name="inner">
                        <testcase name="one" classname="inner"/>
                    </testsuite>
                    <testcase name="two" classname="outer"/>
                </testsuite>
            </testrun>
        "#});
        let root = session.element(ElementId::ROOT);
        let outer = session.element(root.children()[0]);
        assert_eq!(outer.name(), "outer");
        assert_eq!(outer.children().len(), 2);
        let inner = session.element(outer.children()[0]);
        assert_eq!(inner.children().len(), 1);
        assert_eq!(session.element(inner.children()[0]).name(), "one(inner)");
        assert_eq!(session.element(outer.children()[1]).name(), "two(outer)");
    }

    #[test]
    fn testsuites_grouping_is_transparent() {
        // Nested inside a testrun, as aggregating CI tools emit it.
        let session = parse(indoc! {r#"
            <testrun name="aggregated">
                <testsuites>
                    <testsuite name="Suite">
                        <testcase name="adds" classname="Suite"/>
                    </testsuite>
                </testsuites>
            </testrun>
        "#});
        assert_eq!(session.name(), "aggregated");
        assert_eq!(session.counts().total, 1);
        let root = session.element(ElementId::ROOT);
        assert_eq!(session.element(root.children()[0]).name(), "Suite");

        // As the document root, wrapping sibling suites.
        let session = parse(indoc! {r#"
            <testsuites>
                <testsuite name="First">
                    <testcase name="one" classname="First"/>
                </testsuite>
                <testsuite name="Second">
                    <testcase name="two" classname="Second"/>
                </testsuite>
            </testsuites>
        "#});
        assert_eq!(session.name(), "First");
        assert_eq!(session.counts().total, 2);
        let root = session.element(ElementId::ROOT);
        assert_eq!(root.children().len(), 2);
    }

    #[test]
    fn comparison_values_are_split_out_of_the_trace() {
        let session = parse(indoc! {r#"
            <testrun name="comparisons">
                <testsuite name="s">
                    <testcase name="compares" classname="s">
                        <failure message="values differ">
                            <expected>4</expected>
                            <actual>5</actual>
            at s.compares(s.bsl:12)</failure>
                    </testcase>
                </testsuite>
            </testrun>
        "#});
        let case_id = session.cases_in_order()[0];
        let case = session.element(case_id);
        let info = case.error_infos().last().expect("one failure");
        assert_eq!(info.expected.as_deref(), Some("4"));
        assert_eq!(info.actual.as_deref(), Some("5"));
        assert_eq!(info.trace.as_deref(), Some("\nat s.compares(s.bsl:12)"));
        assert!(case.is_comparison_failure());
        assert_eq!(session.counts().failures, 1);
    }

    #[test]
    fn case_attributes_are_recorded() {
        let session = parse(indoc! {r#"
            <testrun name="attrs">
                <testsuite name="s">
                    <testcase name="described" classname="s" displayname="human name"
                              parameters="int,string" uniqueid="u-17" time="1.25"
                              dynamicTest="true"/>
                </testsuite>
            </testrun>
        "#});
        let case = session.element(session.cases_in_order()[0]);
        assert_eq!(case.display_name(), "human name");
        assert_eq!(case.parameter_types(), ["int", "string"]);
        assert_eq!(case.unique_id(), Some("u-17"));
        assert_eq!(case.elapsed(), Some(Duration::from_millis(1250)));
        assert!(case.dynamic());
    }

    #[test]
    fn invalid_and_negative_times_leave_elapsed_unset() {
        let session = parse(indoc! {r#"
            <testrun name="times">
                <testsuite name="s">
                    <testcase name="garbled" classname="s" time="fast"/>
                    <testcase name="negative" classname="s" time="-1.5"/>
                    <testcase name="missing" classname="s"/>
                </testsuite>
            </testrun>
        "#});
        for id in session.cases_in_order() {
            assert_eq!(session.element(id).elapsed(), None);
        }
    }

    #[test]
    fn failure_after_case_lands_on_the_suite() {
        let session = parse(indoc! {r#"
            <testrun name="suite failures">
                <testsuite name="s">
                    <testcase name="fine" classname="s"/>
                    <error message="teardown blew up" type="SetupError">boom</error>
                </testsuite>
            </testrun>
        "#});
        let root = session.element(ElementId::ROOT);
        let suite = session.element(root.children()[0]);
        let info = suite.error_infos().last().expect("suite error");
        assert_eq!(info.message.as_deref(), Some("teardown blew up"));
        assert_eq!(info.kind.as_deref(), Some("SetupError"));
        assert_eq!(session.counts().errors, 1);
        assert_eq!(session.counts().total, 1);
    }

    #[test]
    fn cancellation_stops_the_parse() {
        let monitor = ImportMonitor::new();
        monitor.cancel();
        let mut session = Session::new("cancelled");
        let err = parse_into(
            &mut session,
            &b"<testrun name=\"n\"><testsuite name=\"s\"/></testrun>"[..],
            ParseOptions {
                monitor: Some(&monitor),
                ..ParseOptions::default()
            },
        )
        .expect_err("cancelled parse fails");
        assert!(err.is_cancelled());
    }
}
