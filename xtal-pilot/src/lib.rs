//! Branching run controller for a staged crystallography data-reduction
//! pipeline.
//!
//! Every attempted stage invocation becomes a step in a persistent
//! history tree. A step records its command, status, and the artifact
//! files it produced; each stage consumes the artifacts of the step
//! above it. Users rewind (`goto`), branch beside an attempt, edit
//! pending steps, and rerun, and no previous attempt is ever lost.
//!
//! [`core`] holds the pure logic: the stage graph, artifact planning,
//! and argument resolution. [`io`] holds the side effects: config,
//! session layout, persistence, and subprocess streaming. The
//! [`controller`] ties them together around the [`tree`], and
//! [`render`] draws the history listing front-ends show.

pub mod controller;
pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod render;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod tree;
pub mod watcher;
