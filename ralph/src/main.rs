//! `ralph`: run the agent loop in a directory.
//!
//! Invokes the configured agent once per iteration with the loop directory's
//! `prompt.md` until the agent prints `<promise>COMPLETE</promise>` or the
//! iteration budget is spent.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::debug;

use ralph::controller::{self, LoopOutcome};
use ralph::exit_codes;
use ralph::io::config::{CONFIG_FILE, load_config};
use ralph::io::invoker::CommandInvoker;
use ralph::logging;

#[derive(Parser, Debug)]
#[command(name = "ralph", version, about = "Bounded autonomous agent loop")]
struct Cli {
    /// Maximum agent invocations. Defaults to `max_iterations` from the config.
    #[arg(value_parser = clap::value_parser!(u32).range(1..))]
    max_iterations: Option<u32>,
    /// Loop directory; the agent runs here.
    #[arg(short = 'C', long = "dir", default_value = ".")]
    dir: PathBuf,
    /// Config file. Defaults to `<DIR>/ralph.toml`.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() {
    logging::init();
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = parse_error_exit_code(&err);
            if let Err(e) = err.print() {
                eprintln!("ralph: {e}");
            }
            std::process::exit(code);
        }
    };
    let code = match run(cli) {
        Ok(outcome) => outcome.exit_code(),
        Err(err) => {
            eprintln!("ralph: {err:#}");
            exit_codes::FAILURE
        }
    };
    std::process::exit(code);
}

/// `--help` and `--version` succeed; every usage error is a failure.
fn parse_error_exit_code(err: &clap::Error) -> i32 {
    if err.use_stderr() {
        exit_codes::FAILURE
    } else {
        exit_codes::OK
    }
}

fn run(cli: Cli) -> Result<LoopOutcome> {
    let config_path = cli.config.unwrap_or_else(|| cli.dir.join(CONFIG_FILE));
    let config = load_config(&config_path)?;
    let max_iterations = cli.max_iterations.unwrap_or(config.max_iterations);
    let invoker = CommandInvoker::from_config(&config.agent);

    controller::run(
        &cli.dir,
        &config,
        &invoker,
        max_iterations,
        Box::new(std::io::stdout()),
        |record| {
            debug!(
                iter = record.iter,
                started_at = %record.started_at,
                outcome = ?record.outcome,
                failed = record.is_failed(),
                "iteration recorded"
            );
        },
    )
}
