// Copyright (c) The testwatch Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Wire-format types for the testwatch remote protocol.
//!
//! Remote clients and the testwatch engine exchange JSON text frames over a
//! WebSocket connection. Every frame is an [`Envelope`]: a `type` tag naming
//! one of four message shapes, a numeric `id`, and a `data` object whose
//! layout depends on the tag.
//!
//! Decoding is an explicit switch on the tag: unknown message types surface
//! as [`WireError::UnknownType`] instead of deserializing into the nearest
//! matching shape. Unknown *fields* inside a known payload are ignored, so
//! older engines stay compatible with newer clients.

#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The protocol version announced by this crate in `hello` messages.
pub const PROTOCOL_VERSION: &str = "1";

/// Wire tag for [`MessageBody::Hello`].
pub const TYPE_HELLO: &str = "hello";
/// Wire tag for [`MessageBody::RunTest`].
pub const TYPE_RUN_TEST: &str = "runTest";
/// Wire tag for [`MessageBody::Report`].
pub const TYPE_REPORT: &str = "report";
/// Wire tag for [`MessageBody::ReportFile`].
pub const TYPE_REPORT_FILE: &str = "reportFile";

/// A single protocol frame: a message body plus its sequence id.
///
/// Ids are assigned by the sender from a monotonically increasing counter.
/// The receiver treats them as opaque; nothing on the wire acknowledges or
/// correlates them.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Envelope {
    /// Sequence id assigned by the sender.
    pub id: u64,

    /// The tagged payload.
    pub body: MessageBody,
}

impl Envelope {
    /// Creates a new envelope.
    pub fn new(id: u64, body: MessageBody) -> Self {
        Self { id, body }
    }

    /// Decodes a JSON text frame.
    pub fn decode(text: &str) -> Result<Self, WireError> {
        let raw: RawEnvelope = serde_json::from_str(text)?;
        let body = match raw.kind.as_str() {
            TYPE_HELLO => MessageBody::Hello(serde_json::from_value(raw.data)?),
            TYPE_RUN_TEST => MessageBody::RunTest(serde_json::from_value(raw.data)?),
            TYPE_REPORT => MessageBody::Report(serde_json::from_value(raw.data)?),
            TYPE_REPORT_FILE => MessageBody::ReportFile(serde_json::from_value(raw.data)?),
            _ => return Err(WireError::UnknownType { tag: raw.kind }),
        };
        Ok(Self { id: raw.id, body })
    }

    /// Encodes this envelope as a JSON text frame.
    pub fn encode(&self) -> Result<String, WireError> {
        let data = match &self.body {
            MessageBody::Hello(data) => serde_json::to_value(data)?,
            MessageBody::RunTest(data) => serde_json::to_value(data)?,
            MessageBody::Report(data) => serde_json::to_value(data)?,
            MessageBody::ReportFile(data) => serde_json::to_value(data)?,
        };
        let raw = RawEnvelope {
            kind: self.body.type_tag().to_owned(),
            id: self.id,
            data,
        };
        Ok(serde_json::to_string(&raw)?)
    }
}

/// The JSON shell common to all frames. The payload stays an untyped value
/// until the tag has been examined.
#[derive(Deserialize, Serialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    id: u64,
    #[serde(default)]
    data: serde_json::Value,
}

/// The four message shapes of the protocol.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum MessageBody {
    /// Client handshake: announces the client's routing key.
    Hello(HelloData),

    /// Engine request: run a test method on the client.
    RunTest(RunTestData),

    /// Client response: outcomes of an executed run, inline.
    Report(ReportData),

    /// Client response: outcomes of an executed run, as a report file the
    /// engine should read from disk.
    ReportFile(ReportFileData),
}

impl MessageBody {
    /// Returns the wire tag for this message shape.
    pub fn type_tag(&self) -> &'static str {
        match self {
            Self::Hello(_) => TYPE_HELLO,
            Self::RunTest(_) => TYPE_RUN_TEST,
            Self::Report(_) => TYPE_REPORT,
            Self::ReportFile(_) => TYPE_REPORT_FILE,
        }
    }
}

/// Payload of a `hello` message.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloData {
    /// Key under which the client wants to be addressed.
    pub key: String,

    /// Protocol version the client speaks.
    pub protocol_version: String,
}

impl HelloData {
    /// Creates a handshake payload for `key` at [`PROTOCOL_VERSION`].
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            protocol_version: PROTOCOL_VERSION.to_owned(),
        }
    }
}

/// Payload of a `runTest` message.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunTestData {
    /// Module containing the test method.
    pub module: String,

    /// Human-readable module name, if it differs from `module`.
    #[serde(default)]
    pub module_name: String,

    /// Test method to execute.
    pub method: String,

    /// Run the method in the server context.
    #[serde(default)]
    pub server: bool,

    /// Run the method in the thick-client context.
    #[serde(default)]
    pub client: bool,

    /// Run the method in the ordinary (managed) client context.
    #[serde(default)]
    pub ordinary_client: bool,
}

/// Payload of a `report` message.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct ReportData {
    /// One entry per executed test method.
    #[serde(default)]
    pub tests: Vec<RemoteTestOutcome>,
}

/// Outcome of a single test method, as reported by a remote client.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct RemoteTestOutcome {
    /// Status string, e.g. `passed` or `failed`. Interpretation is up to the
    /// receiver; clients are free to extend the set.
    #[serde(default)]
    pub status: String,

    /// Presentation name for display, if the client supplies one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub present: Option<String>,

    /// Name of the executed method.
    #[serde(default)]
    pub method: String,

    /// Wall-clock duration in milliseconds.
    #[serde(default)]
    pub duration: u64,

    /// Problems recorded during execution, if any.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<RemoteErrorDetail>,
}

/// One problem attached to a [`RemoteTestOutcome`].
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct RemoteErrorDetail {
    /// Short description of the problem.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Stack trace or equivalent diagnostic text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,

    /// Problem classification, e.g. an exception type name.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

/// Payload of a `reportFile` message.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportFileData {
    /// Path to a report file on a filesystem shared with the engine.
    pub report_file: String,
}

/// An error that occurs while encoding or decoding a protocol frame.
#[derive(Debug, Error)]
pub enum WireError {
    /// The frame was not valid JSON, or a payload did not match the shape
    /// its tag promised.
    #[error("invalid protocol frame")]
    Json(#[from] serde_json::Error),

    /// The envelope named a message type this crate does not know.
    #[error("unknown message type `{tag}`")]
    UnknownType {
        /// The unrecognized tag.
        tag: String,
    },
}
