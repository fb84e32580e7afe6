//! Bounded autonomous agent loop.
//!
//! Repeatedly invokes an external coding agent on a fixed instruction payload
//! until the agent reports completion or the iteration budget runs out. The
//! agent owns all task state; the loop only streams, logs, and decides whether
//! to go on.
//!
//! - **[`core`]**: Pure logic (event classification, completion detection,
//!   iteration decisions, the task selection protocol). No I/O.
//! - **[`io`]**: Side-effecting operations (agent processes, run log, config,
//!   loop directory). Isolated behind traits so tests can script the agent.
//!
//! [`controller`] ties the two together into the loop itself.

pub mod controller;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
