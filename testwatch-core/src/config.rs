// Copyright (c) The testwatch Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Testwatch configuration.
//!
//! Configuration is read from a TOML file:
//!
//! ```toml
//! [history]
//! max-history = 10
//! directory = "/var/lib/testwatch/history"
//!
//! [remote]
//! bind = "127.0.0.1:0"
//! ```
//!
//! Every field has a default, so an empty document is a valid configuration.

use crate::errors::ConfigReadError;
use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, File, FileFormat};
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// The default number of sessions kept resident in memory.
pub const DEFAULT_MAX_HISTORY: usize = 10;

/// Top-level testwatch configuration.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct TestwatchConfig {
    /// Session history settings.
    #[serde(default)]
    pub history: HistoryConfig,

    /// Remote test engine settings.
    #[serde(default)]
    pub remote: RemoteConfig,
}

impl TestwatchConfig {
    /// Reads configuration from a TOML file at `path`.
    pub fn from_file(path: &Utf8Path) -> Result<Self, ConfigReadError> {
        let config = Config::builder()
            .add_source(File::new(path.as_str(), FileFormat::Toml))
            .build()
            .map_err(|error| ConfigReadError::Load {
                path: path.to_owned(),
                error,
            })?;
        config.try_deserialize().map_err(|error| ConfigReadError::Load {
            path: path.to_owned(),
            error,
        })
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigReadError> {
        let config = Config::builder()
            .add_source(File::from_str(contents, FileFormat::Toml))
            .build()
            .map_err(ConfigReadError::Parse)?;
        config.try_deserialize().map_err(ConfigReadError::Parse)
    }
}

/// Settings for the bounded session history.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct HistoryConfig {
    /// How many sessions stay resident before the oldest inactive one is
    /// swapped out to disk.
    #[serde(default = "default_max_history")]
    pub max_history: usize,

    /// Where swapped-out session files live. When absent, the registry
    /// falls back to `history` under the base directory it is given at
    /// construction time.
    #[serde(default)]
    pub directory: Option<Utf8PathBuf>,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_history: DEFAULT_MAX_HISTORY,
            directory: None,
        }
    }
}

fn default_max_history() -> usize {
    DEFAULT_MAX_HISTORY
}

/// Settings for the remote test engine.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct RemoteConfig {
    /// The address the WebSocket listener binds. Port 0 picks an ephemeral
    /// port; query the engine for the bound address.
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
}
