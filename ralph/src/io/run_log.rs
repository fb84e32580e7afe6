//! Append-only run log under `logs/`.
//!
//! One file per run, named after the run's start time (with a `-N` suffix when
//! another run already took that second). The file is opened once
//! and released when the [`RunLog`] is dropped, whichever way the loop exits.
//! Status lines are mirrored to the console; raw agent event lines go to the
//! file only; live assistant text goes to the console only.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Local};
use tracing::{debug, warn};

const MAX_NAME_ATTEMPTS: u32 = 1000;

/// File name for a run started at `started_at`. `attempt` > 0 adds a suffix.
pub fn log_file_name(started_at: &DateTime<Local>, attempt: u32) -> String {
    let stamp = started_at.format("%Y%m%d-%H%M%S");
    if attempt == 0 {
        format!("ralph-{stamp}.log")
    } else {
        format!("ralph-{stamp}-{attempt}.log")
    }
}

/// `[HH:MM:SS] message`
pub fn format_status(at: &DateTime<Local>, message: &str) -> String {
    format!("[{}] {}", at.format("%H:%M:%S"), message)
}

pub struct RunLog {
    path: PathBuf,
    file: BufWriter<File>,
    console: Box<dyn Write>,
}

impl RunLog {
    /// Create the log directory and a fresh log file for this run.
    ///
    /// Never reuses an existing file.
    pub fn create(
        log_dir: &Path,
        started_at: &DateTime<Local>,
        console: Box<dyn Write>,
    ) -> Result<Self> {
        fs::create_dir_all(log_dir)
            .with_context(|| format!("create log dir {}", log_dir.display()))?;
        for attempt in 0..MAX_NAME_ATTEMPTS {
            let path = log_dir.join(log_file_name(started_at, attempt));
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => return Ok(Self::from_file(path, file, console)),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(e).with_context(|| format!("open run log {}", path.display()));
                }
            }
        }
        Err(anyhow!(
            "no free run log name in {} after {MAX_NAME_ATTEMPTS} attempts",
            log_dir.display()
        ))
    }

    /// Wrap an already open file.
    pub(crate) fn from_file(path: PathBuf, file: File, console: Box<dyn Write>) -> Self {
        debug!(path = %path.display(), "run log opened");
        Self {
            path,
            file: BufWriter::new(file),
            console,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write a timestamped status line to the file and the console.
    pub fn status(&mut self, message: &str) -> Result<()> {
        let line = format_status(&Local::now(), message);
        self.write_file(&line)?;
        self.write_console(&format!("{line}\n"));
        Ok(())
    }

    /// Append one raw agent event line to the file.
    pub fn raw(&mut self, line: &str) -> Result<()> {
        self.write_file(line)
    }

    /// Forward live text to the console.
    pub fn echo(&mut self, chunk: &str) {
        self.write_console(chunk);
    }

    fn write_file(&mut self, line: &str) -> Result<()> {
        writeln!(self.file, "{line}")
            .and_then(|()| self.file.flush())
            .with_context(|| format!("write run log {}", self.path.display()))
    }

    // The console is a mirror; losing it must not stop the run.
    fn write_console(&mut self, text: &str) {
        if let Err(e) = self
            .console
            .write_all(text.as_bytes())
            .and_then(|()| self.console.flush())
        {
            warn!(err = %e, "failed to write to console");
        }
    }
}

impl Drop for RunLog {
    fn drop(&mut self) {
        if let Err(e) = self.file.flush() {
            warn!(err = %e, path = %self.path.display(), "failed to flush run log");
        }
        debug!(path = %self.path.display(), "run log closed");
    }
}
