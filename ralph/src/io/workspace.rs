//! Canonical paths of a loop directory and the pre-run checks on them.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::Local;
use tracing::info;

use crate::io::config::RalphConfig;

/// All paths the loop and the agent share for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopPaths {
    pub root: PathBuf,
    pub prompt_path: PathBuf,
    pub progress_path: PathBuf,
    pub knowledge_path: PathBuf,
    pub log_dir: PathBuf,
}

impl LoopPaths {
    pub fn new(root: impl Into<PathBuf>, config: &RalphConfig) -> Self {
        let root = root.into();
        Self {
            prompt_path: root.join(&config.prompt_file),
            progress_path: root.join(&config.progress_file),
            knowledge_path: root.join(&config.knowledge_file),
            log_dir: root.join(&config.log_dir),
            root,
        }
    }
}

/// Make sure the agent-owned logs exist before the first iteration.
///
/// Existing files are never touched. Returns the paths that were created.
pub fn ensure_ready(paths: &LoopPaths, goal: &str) -> Result<Vec<PathBuf>> {
    if !paths.root.is_dir() {
        return Err(anyhow!(
            "loop directory {} does not exist",
            paths.root.display()
        ));
    }

    let mut created = Vec::new();
    let today = Local::now().format("%Y-%m-%d").to_string();
    if create_if_missing(&paths.progress_path, &progress_header(&today, goal))? {
        created.push(paths.progress_path.clone());
    }
    if create_if_missing(&paths.knowledge_path, &knowledge_header(goal))? {
        created.push(paths.knowledge_path.clone());
    }
    for path in &created {
        info!(path = %path.display(), "created missing agent log");
    }
    Ok(created)
}

fn create_if_missing(path: &Path, contents: &str) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("write file {}", path.display()))?;
    Ok(true)
}

fn progress_header(today: &str, goal: &str) -> String {
    format!("# Ralph Progress Log\n\nStarted: {today}\nGoal: {goal}\n\n---\n\n")
}

fn knowledge_header(goal: &str) -> String {
    format!(
        "# Ralph Loop Knowledge Base\n\nThis file accumulates learnings from iterative execution.\n\n## Overview\n\n{goal}\n\n## Patterns Discovered\n\n---\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_follow_config_names() {
        let cfg = RalphConfig {
            prompt_file: "PROMPT.md".to_string(),
            log_dir: "out/logs".to_string(),
            ..RalphConfig::default()
        };
        let paths = LoopPaths::new("/work", &cfg);
        assert_eq!(paths.prompt_path, Path::new("/work/PROMPT.md"));
        assert_eq!(paths.progress_path, Path::new("/work/progress.txt"));
        assert_eq!(paths.knowledge_path, Path::new("/work/knowledge.md"));
        assert_eq!(paths.log_dir, Path::new("/work/out/logs"));
    }

    #[test]
    fn creates_missing_agent_logs() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = LoopPaths::new(temp.path(), &RalphConfig::default());

        let created = ensure_ready(&paths, "ship it").expect("ready");
        assert_eq!(created.len(), 2);
        let progress = fs::read_to_string(&paths.progress_path).expect("progress");
        assert!(progress.contains("Goal: ship it"));
        assert!(paths.knowledge_path.is_file());
    }

    #[test]
    fn existing_logs_are_preserved() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = LoopPaths::new(temp.path(), &RalphConfig::default());
        fs::write(&paths.progress_path, "[10:00] - Completed: task 1").expect("write");

        let created = ensure_ready(&paths, "").expect("ready");
        assert_eq!(created, vec![paths.knowledge_path.clone()]);
        let progress = fs::read_to_string(&paths.progress_path).expect("progress");
        assert_eq!(progress, "[10:00] - Completed: task 1");
    }

    #[test]
    fn missing_root_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = LoopPaths::new(temp.path().join("nope"), &RalphConfig::default());
        let err = ensure_ready(&paths, "").unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }
}
