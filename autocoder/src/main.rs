//! `autocoder` command-line entry point.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use autocoder::core::response::parse_response;
use autocoder::core::task::TaskStatus;
use autocoder::error::Error;
use autocoder::exit_codes;
use autocoder::io::compiler::ProcessCompiler;
use autocoder::io::config::{AppConfig, CONFIG_FILE, load_config};
use autocoder::io::init::{InitOptions, init_project};
use autocoder::io::model::HttpModelClient;
use autocoder::io::preflight::run_preflight;
use autocoder::io::task_store::TaskStore;
use autocoder::logging;
use autocoder::orchestrator::{Orchestrator, RunStop};

#[derive(Parser)]
#[command(
    name = "autocoder",
    version,
    about = "Iterative code generation driven by a local language model"
)]
struct Cli {
    /// Config file (missing file means defaults).
    #[arg(long, global = true, default_value = CONFIG_FILE)]
    config: PathBuf,

    /// Override `tasks_file` from the config.
    #[arg(long, global = true)]
    tasks: Option<PathBuf>,

    /// Override `working_dir` from the config.
    #[arg(long, global = true)]
    workdir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default config and a sample task store.
    Init {
        /// Overwrite existing files.
        #[arg(short, long)]
        force: bool,
    },
    /// Process pending tasks until none remain or the task budget is spent.
    Run {
        /// Skip the model reachability and working-dir checks.
        #[arg(long)]
        skip_preflight: bool,
    },
    /// Print the next pending task (exit 2 when none is left).
    Next,
    /// Overwrite a task's status without lifecycle checks.
    Reset {
        /// Task number.
        num: u32,
        /// New status.
        #[arg(long, default_value = "new")]
        status: TaskStatus,
    },
    /// Parse a saved model reply and print the commands it holds.
    Parse {
        /// File holding the raw reply.
        file: PathBuf,
        /// Print the commands as a JSON array.
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    logging::init("info");
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::FAILED);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match &cli.command {
        Command::Init { force } => cmd_init(&cli, *force),
        Command::Run { skip_preflight } => cmd_run(&load(&cli)?, *skip_preflight),
        Command::Next => cmd_next(&load(&cli)?),
        Command::Reset { num, status } => cmd_reset(&load(&cli)?, *num, *status),
        Command::Parse { file, json } => cmd_parse(file, *json),
    }
}

fn load(cli: &Cli) -> Result<AppConfig> {
    let mut cfg = load_config(&cli.config)?;
    apply_overrides(cli, &mut cfg);
    Ok(cfg)
}

fn apply_overrides(cli: &Cli, cfg: &mut AppConfig) {
    if let Some(tasks) = &cli.tasks {
        cfg.tasks_file = tasks.clone();
    }
    if let Some(workdir) = &cli.workdir {
        cfg.working_dir = workdir.clone();
    }
}

fn cmd_init(cli: &Cli, force: bool) -> Result<i32> {
    let mut cfg = AppConfig::default();
    apply_overrides(cli, &mut cfg);
    let paths = init_project(&cli.config, &cfg, &InitOptions { force })?;
    println!("wrote {}", paths.config_path.display());
    println!("wrote {}", paths.tasks_path.display());
    Ok(exit_codes::OK)
}

fn cmd_run(cfg: &AppConfig, skip_preflight: bool) -> Result<i32> {
    let model = HttpModelClient::new(cfg.model.clone()).context("create model client")?;
    if !skip_preflight {
        run_preflight(&model, &cfg.compiler, &cfg.working_dir).context("preflight")?;
    }
    let orchestrator =
        Orchestrator::new(cfg.clone(), model, ProcessCompiler::new(cfg.compiler.clone()))?;
    let outcome = orchestrator.run(|report| {
        println!(
            "task {}: ok ({} commands, {} compile fixes, {} test fixes)",
            report.num, report.commands_applied, report.compile_fix_rounds, report.test_fix_rounds
        );
    })?;
    match outcome.stop {
        RunStop::NoPendingTask => println!("all tasks processed"),
        RunStop::MaxTasksReached { limit } => {
            println!("stopped after {limit} tasks; pending tasks remain")
        }
    }
    Ok(exit_codes::OK)
}

fn cmd_next(cfg: &AppConfig) -> Result<i32> {
    match TaskStore::new(&cfg.tasks_file).next_new() {
        Ok(task) => {
            println!("{}: {}", task.num, task.description);
            Ok(exit_codes::OK)
        }
        Err(Error::NoPendingTask) => Ok(exit_codes::COMPLETE),
        Err(err) => Err(err).with_context(|| format!("read {}", cfg.tasks_file.display())),
    }
}

fn cmd_reset(cfg: &AppConfig, num: u32, status: TaskStatus) -> Result<i32> {
    let previous = TaskStore::new(&cfg.tasks_file)
        .set_status(num, status)
        .with_context(|| format!("reset task {num}"))?;
    println!("task {num}: {previous} -> {status}");
    Ok(exit_codes::OK)
}

fn cmd_parse(file: &Path, json: bool) -> Result<i32> {
    let text = fs::read_to_string(file).with_context(|| format!("read {}", file.display()))?;
    let commands = parse_response(&text).with_context(|| format!("parse {}", file.display()))?;
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&commands).context("serialize commands")?
        );
    } else {
        for cmd in &commands {
            println!("{cmd}");
        }
    }
    Ok(exit_codes::OK)
}
