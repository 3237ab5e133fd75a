// Copyright (c) The testwatch Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The test element tree.
//!
//! A [`Session`] owns an arena of [`TestElement`]s describing one test run:
//! a root suite, nested suites, and leaf cases. Results are registered
//! against elements by id; the session keeps suite counters and run-level
//! tallies in lockstep with the registrations.

mod element;
mod session;
mod status;

pub use element::*;
pub use session::*;
pub use status::*;
