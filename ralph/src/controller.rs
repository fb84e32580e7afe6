//! Iteration controller: the bounded agent loop.
//!
//! Each iteration launches the agent once, streams its events live to the
//! console and the run log, and checks the terminal result for the completion
//! sentinel. Agent failures are recorded and the loop moves on; only failures
//! of the run's own resources (log directory, log file, scratch buffer) abort.

use std::io::Write;
use std::path::Path;
use std::thread;
use std::time::Duration;

use anyhow::{Result, anyhow};
use chrono::Local;
use tracing::{debug, info, instrument, warn};

use crate::core::completion::detect_any;
use crate::core::event::{AgentEvent, StreamLine, classify_line, render_text_chunk};
use crate::core::iteration::{InvocationFailure, IterationOutcome, IterationRecord, decide};
use crate::exit_codes;
use crate::io::config::RalphConfig;
use crate::io::invoker::{AgentInvoker, Invocation, InvokeRequest};
use crate::io::prompt::{InstructionPayload, PayloadSource, load_payload};
use crate::io::run_log::RunLog;
use crate::io::scratch::IterationScratch;
use crate::io::workspace::{LoopPaths, ensure_ready};

/// Knobs for one run of the loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOptions {
    /// Upper bound on agent invocations. Must be at least 1.
    pub max_iterations: u32,
    /// Pause after an iteration that did not complete the run.
    pub cooldown: Duration,
    /// Per-invocation wall clock limit. `None` waits indefinitely.
    pub invocation_timeout: Option<Duration>,
    pub stderr_limit_bytes: usize,
}

impl LoopOptions {
    pub fn from_config(config: &RalphConfig, max_iterations: u32) -> Self {
        Self {
            max_iterations,
            cooldown: config.cooldown(),
            invocation_timeout: config.invocation_timeout(),
            stderr_limit_bytes: config.stderr_limit_bytes,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(anyhow!("max iterations must be > 0"));
        }
        Ok(())
    }
}

/// Reason why `run_loop` stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopStop {
    /// The agent reported completion on iteration `iter`.
    Complete { iter: u32 },
    /// Every permitted iteration ran without a completion signal.
    Exhausted { max_iterations: u32 },
}

/// Summary of a loop run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    /// Agent invocations attempted.
    pub iterations: u32,
    /// Iterations whose invocation failed.
    pub failed_invocations: u32,
    pub stop: LoopStop,
}

impl LoopOutcome {
    pub fn exit_code(&self) -> i32 {
        match self.stop {
            LoopStop::Complete { .. } => exit_codes::OK,
            LoopStop::Exhausted { .. } => exit_codes::FAILURE,
        }
    }
}

/// Prepare the loop directory, open the run log, and run the loop.
///
/// The run log lives exactly as long as this call.
pub fn run<I: AgentInvoker + ?Sized, F: FnMut(&IterationRecord)>(
    root: &Path,
    config: &RalphConfig,
    invoker: &I,
    max_iterations: u32,
    console: Box<dyn Write>,
    on_iteration: F,
) -> Result<LoopOutcome> {
    let options = LoopOptions::from_config(config, max_iterations);
    options.validate()?;

    let paths = LoopPaths::new(root, config);
    ensure_ready(&paths, &config.goal)?;
    let payload = load_payload(&paths, config)?;

    let mut log = RunLog::create(&paths.log_dir, &Local::now(), console)?;
    let banner = format!("Starting Ralph loop (log: {})", log.path().display());
    log.status(&banner)?;
    log.status(&format!("Max iterations: {max_iterations}"))?;
    if payload.source == PayloadSource::BuiltIn {
        let notice = format!(
            "No {} found, using built-in instructions",
            paths.prompt_path.display()
        );
        log.status(&notice)?;
    }

    run_loop(&paths, &payload, invoker, &options, &mut log, on_iteration)
}

/// Run up to `options.max_iterations` iterations, stopping at the first
/// completion signal.
///
/// Returns `Err` only for fatal run-log or scratch failures.
pub fn run_loop<I: AgentInvoker + ?Sized, F: FnMut(&IterationRecord)>(
    paths: &LoopPaths,
    payload: &InstructionPayload,
    invoker: &I,
    options: &LoopOptions,
    log: &mut RunLog,
    mut on_iteration: F,
) -> Result<LoopOutcome> {
    options.validate()?;
    let request = InvokeRequest {
        workdir: paths.root.clone(),
        payload: payload.text.clone(),
        timeout: options.invocation_timeout,
        stderr_limit_bytes: options.stderr_limit_bytes,
    };

    let mut failed_invocations = 0u32;
    for iter in 1..=options.max_iterations {
        let record = run_iteration(iter, paths, &request, invoker, options, log)?;
        if record.is_failed() {
            failed_invocations += 1;
        }
        let outcome = record.outcome;
        on_iteration(&record);

        match outcome {
            IterationOutcome::Completed => {
                log.status(&format!("Loop completed successfully (iteration {iter})"))?;
                info!(iter, "completion signal received");
                return Ok(LoopOutcome {
                    iterations: iter,
                    failed_invocations,
                    stop: LoopStop::Complete { iter },
                });
            }
            IterationOutcome::Exhausted => break,
            IterationOutcome::Continued => {
                if !options.cooldown.is_zero() {
                    debug!(cooldown_ms = options.cooldown.as_millis() as u64, "cooling down");
                    thread::sleep(options.cooldown);
                }
            }
        }
    }

    log.status(&format!(
        "Max iterations reached ({})",
        options.max_iterations
    ))?;
    warn!(max_iterations = options.max_iterations, "iteration budget exhausted");
    Ok(LoopOutcome {
        iterations: options.max_iterations,
        failed_invocations,
        stop: LoopStop::Exhausted {
            max_iterations: options.max_iterations,
        },
    })
}

#[instrument(skip_all, fields(iter))]
fn run_iteration<I: AgentInvoker + ?Sized>(
    iter: u32,
    paths: &LoopPaths,
    request: &InvokeRequest,
    invoker: &I,
    options: &LoopOptions,
    log: &mut RunLog,
) -> Result<IterationRecord> {
    let mut record = IterationRecord::new(
        iter,
        Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
    );
    log.status(&format!("═══ Iteration {iter} ═══"))?;
    let mut scratch = IterationScratch::create(&paths.log_dir)?;

    match invoker.invoke(request) {
        Ok(invocation) => {
            let failure = stream_invocation(invocation, &mut record, &mut scratch, log, options)?;
            record.failure = failure;
        }
        Err(err) => {
            warn!(err = %format!("{err:#}"), "agent launch failed");
            record.failure = Some(InvocationFailure::Spawn(format!("{err:#}")));
        }
    }

    record.results = scratch.read_results()?;
    if record.failure.is_none() && record.results.is_empty() {
        record.failure = Some(InvocationFailure::NoResult);
    }
    if record.results.len() > 1 {
        warn!(count = record.results.len(), "multiple result events in one invocation");
    }

    if record.malformed_lines > 0 {
        log.status(&format!(
            "Iteration {iter}: {} malformed event line(s)",
            record.malformed_lines
        ))?;
    }
    if let Some(failure) = &record.failure {
        let stderr = record.stderr_tail.trim();
        if stderr.is_empty() {
            log.status(&format!("Iteration {iter} failed: {failure}"))?;
        } else {
            log.status(&format!("Iteration {iter} failed: {failure}; stderr: {stderr}"))?;
        }
    }

    let sentinel = detect_any(&record.results);
    record.outcome = decide(record.is_failed(), sentinel, iter, options.max_iterations);
    debug!(
        lines = scratch.len(),
        results = record.results.len(),
        sentinel,
        outcome = ?record.outcome,
        "iteration finished"
    );
    Ok(record)
}

/// Consume the whole stream, then wait for the agent to exit.
///
/// Returns the transient failure for this invocation, if any.
fn stream_invocation(
    mut invocation: Box<dyn Invocation + '_>,
    record: &mut IterationRecord,
    scratch: &mut IterationScratch,
    log: &mut RunLog,
    options: &LoopOptions,
) -> Result<Option<InvocationFailure>> {
    let stream_error = loop {
        match invocation.next_line() {
            Ok(Some(line)) => consume_line(line, record, scratch, log)?,
            Ok(None) => break None,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "agent stream read failed");
                break Some(format!("{err:#}"));
            }
        }
    };

    let exit = match invocation.finish() {
        Ok(exit) => exit,
        Err(err) => {
            warn!(err = %format!("{err:#}"), "waiting for agent failed");
            return Ok(Some(InvocationFailure::Stream(format!("{err:#}"))));
        }
    };

    if !exit.success && !exit.stderr_tail.trim().is_empty() {
        warn!(exit_code = ?exit.code, stderr = %exit.stderr_tail.trim(), "agent reported errors");
    }
    record.stderr_tail = exit.stderr_tail;

    let failure = if exit.timed_out {
        let secs = options.invocation_timeout.map_or(0, |t| t.as_secs());
        Some(InvocationFailure::TimedOut { secs })
    } else if let Some(err) = stream_error {
        Some(InvocationFailure::Stream(err))
    } else if !exit.success {
        Some(InvocationFailure::ExitStatus { code: exit.code })
    } else {
        None
    };
    Ok(failure)
}

fn consume_line(
    line: String,
    record: &mut IterationRecord,
    scratch: &mut IterationScratch,
    log: &mut RunLog,
) -> Result<()> {
    let classified = classify_line(&line);
    if !classified.is_recorded() {
        debug!(line = %line, "skipping non-event output");
        return Ok(());
    }

    log.raw(&line)?;
    scratch.append(&line)?;

    match classified {
        StreamLine::Malformed(reason) => {
            warn!(reason = %reason, "malformed event line");
            record.malformed_lines += 1;
        }
        StreamLine::Events(events) => {
            for event in events {
                if let AgentEvent::Text(text) = event {
                    log.echo(&render_text_chunk(&text));
                    record.text_chunks.push(text);
                }
            }
        }
        StreamLine::Other | StreamLine::Ignored => {}
    }
    record.raw_lines.push(line);
    Ok(())
}
