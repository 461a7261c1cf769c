//! Side-effecting halves of the controller: configuration, session
//! layout, persistence, and subprocess execution.

pub mod config;
pub mod executor;
pub mod process;
pub mod session_store;
pub mod workspace;
