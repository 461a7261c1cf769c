//! Exit codes for the `xtal-pilot` binary.
//!
//! Scripts wrapping the CLI rely on these, so they are part of the
//! contract: `0` success, `1` refused or broken session, `2` the stage
//! tool itself failed.

/// The command completed (including a cancelled run left pending).
pub const OK: i32 = 0;

/// The request was refused or the session is unusable: unknown stage,
/// illegal transition, missing input, corrupt session file.
pub const INVALID: i32 = 1;

/// The external stage tool ran and failed; the failure is recorded on
/// the step and its output captured to an error log.
pub const STEP_FAILED: i32 = 2;
