//! Stable exit codes for the `ralph` binary.

/// The agent signalled completion (also `--help` / `--version`).
pub const OK: i32 = 0;
/// The iteration budget ran out, the command line was invalid, or the run
/// hit a fatal error.
pub const FAILURE: i32 = 1;
