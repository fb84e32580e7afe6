//! Child process with incrementally streamed stdout.
//!
//! Stdout is read line by line on a reader thread and handed over a channel,
//! so the caller consumes events as they are produced and can stop waiting at
//! a deadline. Stderr is drained concurrently to avoid pipe deadlocks, keeping
//! only its last bytes.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Instant;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// One read from the stdout channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineRead {
    /// A line with its trailing newline removed.
    Line(String),
    /// Stdout closed.
    Eof,
    /// The deadline passed before the next line arrived.
    TimedOut,
}

/// Final state of a streamed child.
#[derive(Debug)]
pub struct ProcessExit {
    pub status: ExitStatus,
    pub timed_out: bool,
    /// Last bytes written to stderr, at most the configured limit.
    pub stderr_tail: Vec<u8>,
    /// Leading stderr bytes discarded to stay within the limit.
    pub stderr_dropped: usize,
}

impl ProcessExit {
    pub fn stderr_dropped_notice(&self, label: &str) -> String {
        if self.stderr_dropped > 0 {
            format!(
                "[{label} stderr: {} leading bytes dropped]\n",
                self.stderr_dropped
            )
        } else {
            String::new()
        }
    }
}

/// Handle to a running child whose stdout is delivered line by line.
pub struct StreamingChild {
    child: Child,
    lines: Receiver<std::io::Result<String>>,
    stderr_handle: Option<thread::JoinHandle<Result<(Vec<u8>, usize)>>>,
    timed_out: bool,
}

/// Spawn `cmd` with null stdin and piped stdout/stderr.
#[instrument(skip_all, fields(stderr_limit_bytes))]
pub fn spawn_streaming(mut cmd: Command, stderr_limit_bytes: usize) -> Result<StreamingChild> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let (tx, rx) = mpsc::channel();
    // Detached: a grandchild holding stdout open must not block `finish`.
    thread::spawn(move || {
        let mut reader = BufReader::new(stdout);
        loop {
            let mut buf = Vec::new();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf)
                        .trim_end_matches(['\r', '\n'])
                        .to_string();
                    if tx.send(Ok(line)).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(e));
                    break;
                }
            }
        }
    });
    let stderr_handle = thread::spawn(move || read_stream_tail(stderr, stderr_limit_bytes));

    Ok(StreamingChild {
        child,
        lines: rx,
        stderr_handle: Some(stderr_handle),
        timed_out: false,
    })
}

impl StreamingChild {
    /// Block until the next stdout line, end of stream, or `deadline`.
    pub fn next_line(&mut self, deadline: Option<Instant>) -> Result<LineRead> {
        let received = match deadline {
            None => match self.lines.recv() {
                Ok(line) => line,
                Err(_) => return Ok(LineRead::Eof),
            },
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Ok(LineRead::TimedOut);
                }
                match self.lines.recv_timeout(remaining) {
                    Ok(line) => line,
                    Err(RecvTimeoutError::Timeout) => return Ok(LineRead::TimedOut),
                    Err(RecvTimeoutError::Disconnected) => return Ok(LineRead::Eof),
                }
            }
        };
        let line = received.context("read stdout line")?;
        Ok(LineRead::Line(line))
    }

    /// Terminate the child. Safe to call after it already exited.
    pub fn kill(&mut self) -> Result<()> {
        self.timed_out = true;
        match self.child.kill() {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(e).context("kill command"),
        }
    }

    /// Wait for the child to exit (killing it at `deadline`) and collect stderr.
    pub fn finish(mut self, deadline: Option<Instant>) -> Result<ProcessExit> {
        let status = match deadline {
            None => self.child.wait().context("wait for command")?,
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                match self
                    .child
                    .wait_timeout(remaining)
                    .context("wait for command")?
                {
                    Some(status) => status,
                    None => {
                        warn!("command exceeded deadline, killing");
                        self.kill()?;
                        self.child.wait().context("wait command after kill")?
                    }
                }
            }
        };

        // After a kill, descendants may still hold stderr open; leave the reader detached.
        let (stderr_tail, stderr_dropped) = match self.stderr_handle.take() {
            Some(handle) if !self.timed_out => join_output(handle).context("join stderr")?,
            _ => (Vec::new(), 0),
        };
        if stderr_dropped > 0 {
            warn!(stderr_dropped, "stderr exceeded limit, kept tail");
        }

        debug!(exit_code = ?status.code(), timed_out = self.timed_out, "command finished");
        Ok(ProcessExit {
            status,
            timed_out: self.timed_out,
            stderr_tail,
            stderr_dropped,
        })
    }
}

fn join_output(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

/// Drain `reader`, keeping only the last `limit` bytes.
///
/// Returns the kept tail and the number of leading bytes dropped.
fn read_stream_tail<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut tail: VecDeque<u8> = VecDeque::with_capacity(limit.min(64 * 1024));
    let mut dropped = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        tail.extend(&chunk[..n]);
        if tail.len() > limit {
            let excess = tail.len() - limit;
            tail.drain(..excess);
            dropped += excess;
        }
    }

    Ok((Vec::from(tail), dropped))
}
