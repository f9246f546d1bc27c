//! `taskloop`: plan, execute and replan a goal with a tool-using model.
//!
//! Runs are checkpointed to `.taskloop/state/snapshot.json` so they can be
//! inspected with `status` and continued with `resume`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};

use taskloop::core::types::RunStop;
use taskloop::exit_codes;
use taskloop::io::config::{EngineConfig, load_config};
use taskloop::io::init::{InitOptions, TaskloopPaths, init_taskloop};
use taskloop::io::model::CommandModelClient;
use taskloop::io::review::{
    AutoApprove, InteractiveReviewer, PlanReviewer, TerminalInput, UserInput,
};
use taskloop::io::snapshot::SnapshotStore;
use taskloop::logging;
use taskloop::orchestrate::{Orchestrator, RunReport};
use taskloop::status::status_from_root;
use taskloop::validate::{SnapshotValidation, validate_taskloop};

#[derive(Parser)]
#[command(
    name = "taskloop",
    version,
    about = "Plan, execute and replan a goal with a tool-using model"
)]
struct Cli {
    /// Project root; tools cannot touch files outside it.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    /// Log state transitions to stderr (`RUST_LOG` overrides).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.taskloop/` with a default config.
    Init {
        /// Overwrite existing files.
        #[arg(short, long)]
        force: bool,
    },
    /// Start a new run for GOAL.
    Run(RunArgs),
    /// Continue the checkpointed run.
    Resume {
        /// Answer to the question the run is waiting on.
        #[arg(long)]
        answer: Option<String>,
        /// Approve replanned tasks without asking.
        #[arg(long)]
        auto_approve: bool,
    },
    /// Print the checkpointed run.
    Status,
    /// Check layout, config and snapshot invariants.
    Validate,
}

#[derive(Args)]
struct RunArgs {
    goal: String,

    /// Approve plans without asking.
    #[arg(long)]
    auto_approve: bool,

    /// Extra path outside the root that tools may use (repeatable).
    #[arg(long = "allow-path")]
    allow_path: Vec<String>,

    #[arg(long)]
    max_inner_cycles: Option<u32>,

    #[arg(long)]
    max_outer_cycles: Option<u32>,
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    let root = cli
        .root
        .canonicalize()
        .with_context(|| format!("resolve project root {}", cli.root.display()))?;
    match cli.command {
        Command::Init { force } => cmd_init(&root, force),
        Command::Run(args) => cmd_run(&root, args),
        Command::Resume {
            answer,
            auto_approve,
        } => cmd_resume(&root, answer, auto_approve),
        Command::Status => cmd_status(&root),
        Command::Validate => cmd_validate(&root),
    }
}

fn cmd_init(root: &Path, force: bool) -> Result<i32> {
    let paths = init_taskloop(root, &InitOptions { force })?;
    println!("initialized {}", paths.taskloop_dir.display());
    Ok(exit_codes::OK)
}

fn cmd_run(root: &Path, args: RunArgs) -> Result<i32> {
    if args.goal.trim().is_empty() {
        bail!("goal must not be empty");
    }
    let paths = TaskloopPaths::new(root);
    let mut config = load_config(&paths.config_path)?;
    apply_run_overrides(&mut config, &args);
    config.validate()?;

    let store = SnapshotStore::open(&paths)?;
    if let Some(previous) = store.load()?
        && !previous.stop.is_some_and(RunStop::is_terminal)
    {
        bail!(
            "run {} has not finished; use `taskloop resume` to continue it",
            previous.run_id
        );
    }

    let terminal = TerminalInput::stdio();
    let interactive = InteractiveReviewer::new(&terminal);
    let reviewer: &dyn PlanReviewer = if config.auto_approve {
        &AutoApprove
    } else {
        &interactive
    };
    let model = CommandModelClient::new(&config.model, root, &paths.model_dir);
    let orchestrator = Orchestrator::new(root, config, model, reviewer)?
        .with_persistence(&store, &paths.runs_dir);

    let mut state = orchestrator.start(&args.goal);
    let report = orchestrator.run(&mut state)?;
    Ok(print_report(&report))
}

fn cmd_resume(root: &Path, answer: Option<String>, auto_approve: bool) -> Result<i32> {
    let paths = TaskloopPaths::new(root);
    let mut config = load_config(&paths.config_path)?;
    config.auto_approve |= auto_approve;
    let store = SnapshotStore::open(&paths)?;
    let Some(mut state) = store.load()? else {
        bail!("no run to resume in {}", paths.snapshot_path.display());
    };

    let terminal = TerminalInput::stdio();
    let answer = match (&state.pending_input, answer) {
        (Some(_), Some(answer)) => Some(answer),
        (Some(pending), None) => Some(terminal.ask(&pending.question, &pending.suggested_responses)?),
        (None, _) => None,
    };

    let interactive = InteractiveReviewer::new(&terminal);
    let reviewer: &dyn PlanReviewer = if config.auto_approve {
        &AutoApprove
    } else {
        &interactive
    };
    let model = CommandModelClient::new(&config.model, root, &paths.model_dir);
    let orchestrator = Orchestrator::new(root, config, model, reviewer)?
        .with_persistence(&store, &paths.runs_dir);

    let report = orchestrator.resume(&mut state, answer.as_deref())?;
    Ok(print_report(&report))
}

fn cmd_status(root: &Path) -> Result<i32> {
    match status_from_root(root)? {
        Some(text) => print!("{text}"),
        None => println!("no run recorded"),
    }
    Ok(exit_codes::OK)
}

fn cmd_validate(root: &Path) -> Result<i32> {
    match validate_taskloop(root)?.snapshot {
        SnapshotValidation::NoRun => println!("ok (no run recorded)"),
        SnapshotValidation::Ok {
            run_id,
            phase,
            stop,
        } => println!("ok ({run_id}, phase {phase:?}, stop {stop:?})"),
    }
    Ok(exit_codes::OK)
}

fn apply_run_overrides(config: &mut EngineConfig, args: &RunArgs) {
    config.auto_approve |= args.auto_approve;
    config
        .allowed_external_paths
        .extend(args.allow_path.iter().cloned());
    if let Some(max) = args.max_inner_cycles {
        config.max_inner_cycles = max;
    }
    if let Some(max) = args.max_outer_cycles {
        config.max_outer_cycles = max;
    }
}

fn print_report(report: &RunReport) -> i32 {
    println!("{}", report.response.trim_end());
    eprintln!("[{}] {:?}", report.run_id, report.stop);
    exit_codes::for_stop(report.stop)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_init_force() {
        let cli = Cli::parse_from(["taskloop", "init", "--force"]);
        assert!(matches!(cli.command, Command::Init { force: true }));
    }

    #[test]
    fn parse_run_with_overrides() {
        let cli = Cli::parse_from([
            "taskloop",
            "--root",
            "/tmp/project",
            "run",
            "add a README",
            "--auto-approve",
            "--allow-path",
            "/data/a",
            "--allow-path",
            "/data/b",
            "--max-inner-cycles",
            "7",
        ]);
        assert_eq!(cli.root, PathBuf::from("/tmp/project"));
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        let mut config = EngineConfig::default();
        apply_run_overrides(&mut config, &args);
        assert_eq!(args.goal, "add a README");
        assert!(config.auto_approve);
        assert_eq!(config.allowed_external_paths, vec!["/data/a", "/data/b"]);
        assert_eq!(config.max_inner_cycles, 7);
        assert_eq!(config.max_outer_cycles, EngineConfig::default().max_outer_cycles);
    }

    #[test]
    fn parse_resume_answer() {
        let cli = Cli::parse_from(["taskloop", "resume", "--answer", "sqlite"]);
        assert!(matches!(
            cli.command,
            Command::Resume { answer: Some(ref a), auto_approve: false } if a == "sqlite"
        ));
    }
}
