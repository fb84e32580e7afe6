//! Per-iteration capture of the raw event stream.
//!
//! Each iteration spools its recorded lines into an anonymous temp file and
//! re-reads it once the stream ends to extract the terminal result text. The
//! file disappears when the scratch is dropped.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

use anyhow::{Context, Result};

use crate::core::event::{AgentEvent, StreamLine, classify_line};

pub struct IterationScratch {
    writer: BufWriter<File>,
    lines: usize,
}

impl IterationScratch {
    /// Create an anonymous scratch file inside `dir`.
    pub fn create(dir: &Path) -> Result<Self> {
        let file = tempfile::tempfile_in(dir)
            .with_context(|| format!("create iteration scratch in {}", dir.display()))?;
        Ok(Self {
            writer: BufWriter::new(file),
            lines: 0,
        })
    }

    pub fn append(&mut self, line: &str) -> Result<()> {
        writeln!(self.writer, "{line}").context("write iteration scratch")?;
        self.lines += 1;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines == 0
    }

    /// Every `result` text in the captured stream, in order.
    pub fn read_results(&mut self) -> Result<Vec<String>> {
        self.writer.flush().context("flush iteration scratch")?;
        let file = self.writer.get_mut();
        file.seek(SeekFrom::Start(0))
            .context("rewind iteration scratch")?;

        let mut results = Vec::new();
        for line in BufReader::new(&*file).lines() {
            let line = line.context("read iteration scratch")?;
            if let StreamLine::Events(events) = classify_line(&line) {
                results.extend(events.into_iter().filter_map(|event| match event {
                    AgentEvent::Result(text) => Some(text),
                    AgentEvent::Text(_) => None,
                }));
            }
        }

        file.seek(SeekFrom::End(0))
            .context("restore iteration scratch position")?;
        Ok(results)
    }
}
