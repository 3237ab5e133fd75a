// Copyright (c) The testwatch Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core functionality for testwatch: sessions of test run results, the
//! registry that keeps them with a bounded in-memory history, report file
//! import and export, and the remote engine external test clients report
//! into.
//!
//! The usual flow is to build a [`registry::SessionRegistry`], attach
//! [`events::SessionListener`]s, and feed it from report files via
//! [`reports`] or from live clients via [`remote::RemoteEngine`].

pub mod config;
pub mod errors;
pub mod events;
pub mod model;
pub mod registry;
pub mod remote;
pub mod reports;

pub use testwatch_wire as wire;
