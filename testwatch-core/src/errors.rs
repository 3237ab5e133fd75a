// Copyright (c) The testwatch Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by testwatch.

use crate::model::SessionId;
use camino::Utf8PathBuf;
use std::net::SocketAddr;
use testwatch_wire::WireError;
use thiserror::Error;

/// An error that occurred while importing a test run report.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ImportError {
    /// The report file could not be opened.
    #[error("failed to open report file `{path}`")]
    FileOpen {
        /// The path to the report file.
        path: Utf8PathBuf,

        /// The error that occurred.
        #[source]
        error: std::io::Error,
    },

    /// The report could not be fetched over HTTP.
    #[error("failed to fetch report from `{url}`")]
    Fetch {
        /// The URL the report was requested from.
        url: String,

        /// The error that occurred.
        #[source]
        error: Box<ureq::Error>,
    },

    /// The document was not well-formed XML.
    #[error("malformed report XML near byte {position}")]
    Xml {
        /// Byte offset into the document where reading stopped.
        position: u64,

        /// The error that occurred.
        #[source]
        error: quick_xml::Error,
    },

    /// The document contained an element this format does not define.
    #[error("unexpected element `{element}` near byte {position}")]
    UnexpectedElement {
        /// The offending element name.
        element: String,

        /// Byte offset into the document where the element started.
        position: u64,
    },

    /// The document was well-formed XML but not a valid report.
    #[error("invalid report structure near byte {position}: {reason}")]
    Structure {
        /// What was wrong with the document.
        reason: String,

        /// Byte offset into the document where reading stopped.
        position: u64,
    },

    /// The import was cancelled before the document was fully read.
    #[error("import cancelled")]
    Cancelled,

    /// The import worker terminated without producing a result.
    #[error("import worker exited unexpectedly")]
    WorkerExited,

    /// The session targeted by a merge is not registered.
    #[error("session `{id}` not found")]
    SessionNotFound {
        /// The id of the missing session.
        id: SessionId,
    },
}

impl ImportError {
    /// Returns true if the import was cancelled rather than failing.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ImportError::Cancelled)
    }
}

/// An error that occurred while serializing a session to report XML.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ExportError {
    /// An error occurred while producing XML events.
    #[error("error writing report XML")]
    Xml(#[from] quick_xml::Error),

    /// An error occurred while writing to the underlying output.
    #[error("error writing to output")]
    Io(#[from] std::io::Error),
}

/// An error that occurred in the session history store.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// The history directory could not be created.
    #[error("failed to create history directory `{path}`")]
    CreateDir {
        /// The directory that could not be created.
        path: Utf8PathBuf,

        /// The error that occurred.
        #[source]
        error: std::io::Error,
    },

    /// A swapped-out session file could not be written.
    #[error("failed to write swap file `{path}`")]
    SwapWrite {
        /// The path to the swap file.
        path: Utf8PathBuf,

        /// The error that occurred.
        #[source]
        error: std::io::Error,
    },

    /// A session could not be serialized into its swap file.
    #[error("failed to serialize session into swap file `{path}`")]
    SwapSerialize {
        /// The path to the swap file.
        path: Utf8PathBuf,

        /// The error that occurred.
        #[source]
        error: ExportError,
    },

    /// A swapped-out session file could not be read back.
    #[error("failed to read swap file `{path}`")]
    SwapRead {
        /// The path to the swap file.
        path: Utf8PathBuf,

        /// The error that occurred.
        #[source]
        error: ImportError,
    },

    /// A swapped-out session file could not be deleted.
    #[error("failed to delete swap file `{path}`")]
    SwapDelete {
        /// The path to the swap file.
        path: Utf8PathBuf,

        /// The error that occurred.
        #[source]
        error: std::io::Error,
    },

    /// A session was expected on disk but has no swap file.
    #[error("session `{id}` is not swapped out")]
    NotSwapped {
        /// The id of the session.
        id: SessionId,
    },
}

/// An error that occurred in the remote test engine.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RemoteError {
    /// The engine's runtime could not be created.
    #[error("failed to create remote engine runtime")]
    RuntimeCreate(#[source] std::io::Error),

    /// The listening socket could not be bound.
    #[error("failed to bind remote engine to `{addr}`")]
    Bind {
        /// The address the engine tried to bind.
        addr: SocketAddr,

        /// The error that occurred.
        #[source]
        error: std::io::Error,
    },

    /// A request named a client key that is not connected.
    #[error("no connected client with key `{key}`")]
    ClientNotFound {
        /// The key the request named.
        key: String,
    },

    /// A request needs a client but none are connected.
    #[error("no clients connected")]
    NoClients,

    /// The targeted client disconnected while the message was being sent.
    #[error("client `{key}` closed the connection")]
    ClientClosed {
        /// The key of the client that went away.
        key: String,
    },

    /// An outbound message could not be encoded.
    #[error("failed to encode outbound message")]
    Encode(#[from] WireError),
}

/// An error that occurred while reading testwatch configuration.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigReadError {
    /// The configuration file could not be loaded.
    #[error("failed to load config at `{path}`")]
    Load {
        /// The path to the configuration file.
        path: Utf8PathBuf,

        /// The error that occurred.
        #[source]
        error: config::ConfigError,
    },

    /// The configuration contents could not be parsed.
    #[error("failed to parse config")]
    Parse(#[source] config::ConfigError),
}
