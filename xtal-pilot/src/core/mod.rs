//! Deterministic, pure logic behind the run controller.
//!
//! Core modules must be free of I/O side effects. They map stages,
//! artifact kinds, and tree shapes to argument lists and violation
//! reports, and are exercised directly by unit tests.

pub mod artifacts;
pub mod command;
pub mod invariants;
pub mod stage;
