//! I/O helpers for the loop controller.

pub mod config;
pub mod invoker;
pub mod process;
pub mod prompt;
pub mod run_log;
pub mod scratch;
pub mod workspace;
