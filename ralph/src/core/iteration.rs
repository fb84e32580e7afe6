//! Per-iteration bookkeeping and the continue/stop decision.

use std::fmt;

/// How a single iteration ended from the controller's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationOutcome {
    /// No completion signal; another iteration follows.
    Continued,
    /// The completion sentinel was detected.
    Completed,
    /// No completion signal and this was the last permitted iteration.
    Exhausted,
}

/// Why an invocation did not count as a completed iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvocationFailure {
    /// The agent process could not be launched.
    Spawn(String),
    /// The agent process exited unsuccessfully (`None` when killed by a signal).
    ExitStatus { code: Option<i32> },
    /// The agent process exceeded the configured invocation timeout.
    TimedOut { secs: u64 },
    /// The stream ended without a `result` event.
    NoResult,
    /// Reading the stream failed part way through.
    Stream(String),
}

impl fmt::Display for InvocationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvocationFailure::Spawn(err) => write!(f, "failed to launch agent: {err}"),
            InvocationFailure::ExitStatus { code: Some(code) } => {
                write!(f, "agent exited with status {code}")
            }
            InvocationFailure::ExitStatus { code: None } => {
                write!(f, "agent terminated by signal")
            }
            InvocationFailure::TimedOut { secs } => write!(f, "agent timed out after {secs}s"),
            InvocationFailure::NoResult => write!(f, "agent stream ended without a result event"),
            InvocationFailure::Stream(err) => write!(f, "agent stream read failed: {err}"),
        }
    }
}

/// Ephemeral record of one loop cycle.
///
/// Owned by the controller for the duration of the cycle and handed to the
/// `on_iteration` callback before being dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterationRecord {
    /// Sequence number (1-based).
    pub iter: u32,
    /// Human-readable local start time.
    pub started_at: String,
    /// Every recorded raw event line, in arrival order.
    pub raw_lines: Vec<String>,
    /// Assistant text chunks, in arrival order.
    pub text_chunks: Vec<String>,
    /// Terminal result texts (normally exactly one).
    pub results: Vec<String>,
    /// Number of lines that looked like JSON but failed to decode.
    pub malformed_lines: usize,
    pub failure: Option<InvocationFailure>,
    /// Trailing agent stderr, kept for failure diagnostics.
    pub stderr_tail: String,
    pub outcome: IterationOutcome,
}

impl IterationRecord {
    pub fn new(iter: u32, started_at: impl Into<String>) -> Self {
        Self {
            iter,
            started_at: started_at.into(),
            raw_lines: Vec::new(),
            text_chunks: Vec::new(),
            results: Vec::new(),
            malformed_lines: 0,
            failure: None,
            stderr_tail: String::new(),
            outcome: IterationOutcome::Continued,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }
}

/// Decide how iteration `iter` of `max_iterations` ends.
///
/// A failed invocation never completes the run, even if its partial output
/// happened to contain the sentinel.
pub fn decide(
    failed: bool,
    sentinel_found: bool,
    iter: u32,
    max_iterations: u32,
) -> IterationOutcome {
    if sentinel_found && !failed {
        IterationOutcome::Completed
    } else if iter >= max_iterations {
        IterationOutcome::Exhausted
    } else {
        IterationOutcome::Continued
    }
}
