//! Command-line front-end for the pipeline run controller.
//!
//! Every subcommand opens the session under `--dir`, applies one
//! operation, and prints the refreshed history so the tree is always in
//! view. Exit codes are part of the contract; see [`xtal_pilot::exit_codes`].

use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;

use anyhow::Result;
use clap::{Parser, Subcommand};

use xtal_pilot::controller::RunController;
use xtal_pilot::exit_codes;
use xtal_pilot::io::executor::SubprocessExecutor;
use xtal_pilot::io::workspace::{InitOptions, Workspace, init_workspace};
use xtal_pilot::logging;
use xtal_pilot::render::HistoryRenderer;
use xtal_pilot::tree::StepStatus;
use xtal_pilot::watcher::{BusyEvent, spawn_busy_watcher};

#[derive(Parser)]
#[command(
    name = "xtal-pilot",
    version,
    about = "Branching run controller for a staged data-reduction pipeline"
)]
struct Cli {
    /// Session directory.
    #[arg(long, global = true, default_value = ".")]
    dir: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the session layout with an empty history.
    Init {
        /// Discard an existing session and start over.
        #[arg(short, long)]
        force: bool,
    },
    /// Run one pipeline stage at the current step.
    Run {
        /// Stage name (import, find_spots, index, ...).
        stage: String,
        /// Parameter strings forwarded to the stage tool.
        params: Vec<String>,
        /// Generate the report page after a successful run.
        #[arg(long)]
        report: bool,
        /// Generate predicted reflections after a successful run.
        #[arg(long)]
        predict: bool,
    },
    /// Move the current pointer to a step.
    Goto { line: u32 },
    /// Start an alternative attempt beside the current step.
    #[command(alias = "mkchi")]
    Branch,
    /// Print the step history.
    History,
    /// Generate the report page for the current step.
    Report,
    /// Generate predicted reflections for the current step.
    Predict,
    /// Check the persisted session against its structural rules.
    Validate,
}

fn main() {
    logging::init();
    let code = match run(Cli::parse()) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Init { force } => cmd_init(&cli.dir, force),
        Command::Run {
            stage,
            params,
            report,
            predict,
        } => cmd_run(&cli.dir, &stage, params, report, predict),
        Command::Goto { line } => cmd_goto(&cli.dir, line),
        Command::Branch => cmd_branch(&cli.dir),
        Command::History => cmd_history(&cli.dir),
        Command::Report => cmd_generate(&cli.dir, "report page", RunController::generate_report),
        Command::Predict => {
            cmd_generate(&cli.dir, "predictions", RunController::generate_predictions)
        }
        Command::Validate => cmd_validate(&cli.dir),
    }
}

fn open_controller(dir: &Path) -> Result<RunController<SubprocessExecutor>> {
    let workspace = Workspace::open(dir)?;
    RunController::open(workspace, SubprocessExecutor)
}

fn print_history(controller: &RunController<SubprocessExecutor>) {
    println!("{}", HistoryRenderer::default().render(controller.tree()));
}

fn cmd_init(dir: &Path, force: bool) -> Result<i32> {
    init_workspace(dir, &InitOptions { force })?;
    println!("initialized session in {}", dir.display());
    Ok(exit_codes::OK)
}

fn cmd_run(
    dir: &Path,
    stage: &str,
    params: Vec<String>,
    report: bool,
    predict: bool,
) -> Result<i32> {
    let mut controller = open_controller(dir)?;
    let outcome = controller.run(stage, params, |line| println!("{line}"))?;
    if outcome.status == StepStatus::Succeeded {
        if report {
            controller.generate_report()?;
        }
        if predict {
            controller.generate_predictions()?;
        }
    }
    print_history(&controller);
    if outcome.status == StepStatus::Failed {
        if let Some(log) = &outcome.error_log {
            eprintln!(
                "step {} failed; output captured in {}",
                outcome.line_number,
                log.display()
            );
        }
        return Ok(exit_codes::STEP_FAILED);
    }
    Ok(exit_codes::OK)
}

fn cmd_goto(dir: &Path, line: u32) -> Result<i32> {
    let mut controller = open_controller(dir)?;
    controller.goto(line)?;
    print_history(&controller);
    Ok(exit_codes::OK)
}

fn cmd_branch(dir: &Path) -> Result<i32> {
    let mut controller = open_controller(dir)?;
    let line = controller.branch()?;
    println!("branched: step {line} is a fresh attempt beside the previous one");
    print_history(&controller);
    Ok(exit_codes::OK)
}

fn cmd_history(dir: &Path) -> Result<i32> {
    let controller = open_controller(dir)?;
    print_history(&controller);
    Ok(exit_codes::OK)
}

/// Shared body of `report` and `predict`: generate with a busy note on
/// stderr while the tool runs.
fn cmd_generate(
    dir: &Path,
    what: &str,
    generate: fn(&mut RunController<SubprocessExecutor>) -> Result<Option<PathBuf>>,
) -> Result<i32> {
    let mut controller = open_controller(dir)?;
    let flag = controller.current()?.aux_flag();
    let interval = controller.workspace().config().poll_interval();

    let (busy_tx, busy_rx) = mpsc::channel();
    let watcher = spawn_busy_watcher(flag, interval, busy_tx);
    let label = what.to_string();
    let notifier = thread::spawn(move || {
        for event in busy_rx {
            if event == BusyEvent::Began {
                eprintln!("generating {label}...");
            }
        }
    });

    let generated = generate(&mut controller);
    let _ = watcher.join();
    let _ = notifier.join();

    match generated? {
        Some(path) => println!("{what} written to {}", path.display()),
        None => println!("no {what} available for this step"),
    }
    Ok(exit_codes::OK)
}

fn cmd_validate(dir: &Path) -> Result<i32> {
    let controller = open_controller(dir)?;
    println!(
        "session ok: {} steps, current at {}",
        controller.tree().step_count(),
        controller.tree().current_line()
    );
    Ok(exit_codes::OK)
}
