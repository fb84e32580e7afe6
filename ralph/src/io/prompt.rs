//! Instruction payload handed to every agent invocation.
//!
//! The payload is read once per run. A prompt document in the loop directory
//! is used verbatim; without one, a built-in payload carrying the task
//! selection protocol is rendered instead.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use tracing::{debug, warn};

use crate::core::completion::COMPLETION_SENTINEL;
use crate::io::config::RalphConfig;
use crate::io::workspace::LoopPaths;

const LOOP_TEMPLATE: &str = include_str!("prompts/loop.md");

/// Where the payload text came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadSource {
    File(PathBuf),
    BuiltIn,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructionPayload {
    pub text: String,
    pub source: PayloadSource,
}

/// Load the payload for this run.
pub fn load_payload(paths: &LoopPaths, config: &RalphConfig) -> Result<InstructionPayload> {
    if paths.prompt_path.exists() {
        let text = fs::read_to_string(&paths.prompt_path)
            .with_context(|| format!("read prompt {}", paths.prompt_path.display()))?;
        debug!(path = %paths.prompt_path.display(), bytes = text.len(), "loaded prompt document");
        return Ok(InstructionPayload {
            text,
            source: PayloadSource::File(paths.prompt_path.clone()),
        });
    }

    warn!(
        path = %paths.prompt_path.display(),
        "prompt document missing, using built-in instructions"
    );
    Ok(InstructionPayload {
        text: render_builtin(config)?,
        source: PayloadSource::BuiltIn,
    })
}

/// Render the built-in payload for `config`.
pub fn render_builtin(config: &RalphConfig) -> Result<String> {
    let mut env = Environment::new();
    env.add_template("loop", LOOP_TEMPLATE)
        .context("compile built-in prompt template")?;
    let template = env.get_template("loop")?;
    let goal = config.goal.trim();
    let rendered = template
        .render(context! {
            goal => (!goal.is_empty()).then_some(goal),
            progress_file => config.progress_file.as_str(),
            knowledge_file => config.knowledge_file.as_str(),
            sentinel => COMPLETION_SENTINEL,
        })
        .context("render built-in prompt")?;
    Ok(rendered)
}
