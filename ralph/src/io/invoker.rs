//! Agent invocation abstraction.
//!
//! The [`AgentInvoker`] trait decouples the loop from the actual agent backend
//! (currently the `claude` CLI in stream-json mode). One call to
//! [`AgentInvoker::invoke`] is one agent run; its stdout lines are pulled
//! through the returned [`Invocation`] until exhausted, then [`Invocation::finish`]
//! reports how the run ended. Tests use scripted invokers that replay canned
//! lines without spawning processes.

use std::path::PathBuf;
use std::process::Command;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::io::config::AgentConfig;
use crate::io::process::{LineRead, StreamingChild, spawn_streaming};

/// Parameters for an agent invocation.
#[derive(Debug, Clone)]
pub struct InvokeRequest {
    /// Working directory for the agent process. Stable for the whole run.
    pub workdir: PathBuf,
    /// Instruction payload handed to the agent.
    pub payload: String,
    /// Kill the agent after this long. `None` waits indefinitely.
    pub timeout: Option<Duration>,
    /// Keep at most this many bytes of agent stderr.
    pub stderr_limit_bytes: usize,
}

/// How an invocation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationExit {
    /// Exit code, `None` when terminated by a signal.
    pub code: Option<i32>,
    pub success: bool,
    pub timed_out: bool,
    /// Last part of the agent's stderr, prefixed with a notice when earlier
    /// output was dropped.
    pub stderr_tail: String,
}

impl InvocationExit {
    pub fn ok() -> Self {
        Self {
            code: Some(0),
            success: true,
            timed_out: false,
            stderr_tail: String::new(),
        }
    }

    pub fn failed(code: i32) -> Self {
        Self {
            code: Some(code),
            success: false,
            timed_out: false,
            stderr_tail: String::new(),
        }
    }
}

/// A single in-flight agent run. Finite and not restartable.
pub trait Invocation {
    /// Next raw stdout line, or `None` once the stream is exhausted.
    fn next_line(&mut self) -> Result<Option<String>>;

    /// Wait for the run to end. Consumes the invocation.
    fn finish(self: Box<Self>) -> Result<InvocationExit>;
}

/// Abstraction over agent backends.
pub trait AgentInvoker {
    /// Launch one agent run. An error means the agent could not be started.
    fn invoke(&self, request: &InvokeRequest) -> Result<Box<dyn Invocation + '_>>;
}

/// Invoker that spawns the configured agent command with the payload as its
/// final argument.
#[derive(Debug, Clone)]
pub struct CommandInvoker {
    program: String,
    args: Vec<String>,
}

impl CommandInvoker {
    pub fn from_config(config: &AgentConfig) -> Self {
        let mut parts = config.command.iter().cloned();
        let program = parts.next().unwrap_or_default();
        Self {
            program,
            args: parts.collect(),
        }
    }

    fn build_command(&self, request: &InvokeRequest) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg(&request.payload)
            .current_dir(&request.workdir);
        cmd
    }
}

impl AgentInvoker for CommandInvoker {
    #[instrument(skip_all, fields(program = %self.program, timeout = ?request.timeout))]
    fn invoke(&self, request: &InvokeRequest) -> Result<Box<dyn Invocation + '_>> {
        info!(workdir = %request.workdir.display(), "starting agent");
        let child = spawn_streaming(self.build_command(request), request.stderr_limit_bytes)
            .with_context(|| format!("run {}", self.program))?;
        Ok(Box::new(CommandInvocation {
            child,
            deadline: request.timeout.map(|timeout| Instant::now() + timeout),
            timed_out: false,
        }))
    }
}

struct CommandInvocation {
    child: StreamingChild,
    deadline: Option<Instant>,
    timed_out: bool,
}

impl Invocation for CommandInvocation {
    fn next_line(&mut self) -> Result<Option<String>> {
        if self.timed_out {
            return Ok(None);
        }
        match self.child.next_line(self.deadline)? {
            LineRead::Line(line) => Ok(Some(line)),
            LineRead::Eof => Ok(None),
            LineRead::TimedOut => {
                warn!("agent exceeded invocation timeout, killing");
                self.timed_out = true;
                self.child.kill()?;
                Ok(None)
            }
        }
    }

    fn finish(self: Box<Self>) -> Result<InvocationExit> {
        let CommandInvocation {
            child,
            deadline,
            timed_out,
        } = *self;
        let exit = child.finish(deadline)?;
        let mut stderr_tail = exit.stderr_dropped_notice("agent");
        stderr_tail.push_str(&String::from_utf8_lossy(&exit.stderr_tail));
        let timed_out = exit.timed_out || timed_out;
        debug!(exit_code = ?exit.status.code(), timed_out, "agent finished");
        Ok(InvocationExit {
            code: exit.status.code(),
            success: exit.status.success() && !timed_out,
            timed_out,
            stderr_tail,
        })
    }
}
