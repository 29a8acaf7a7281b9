//! The command-line surface: a project `init` wizard and a `run` command
//! which executes a task from a saved description file.

use std::fmt::Display;
use std::process::ExitCode;
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use clap::{ArgAction, Parser, Subcommand};
use console::style;
use dialoguer::{Confirm, Input};

use crate::config::{CONFIG_FILE, Project, ProjectConfig};
use crate::task::{Task, TaskSet};

#[derive(Debug, Parser)]
#[command(name = "memotask")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Set up the project layout interactively
    Init,

    /// Run a task from a saved description file
    Run {
        /// Path to the task description
        taskdesc: Utf8PathBuf,

        /// Don't write a run record
        #[arg(long = "no-record", action = ArgAction::SetFalse)]
        record: bool,

        /// Increase log verbosity (repeatable)
        #[arg(short, long, action = ArgAction::Count)]
        verbose: u8,

        /// Decrease log verbosity (repeatable)
        #[arg(short, long, action = ArgAction::Count)]
        quiet: u8,
    },
}

/// Parses arguments and dispatches. Call this from `main` with the task types
/// the binary knows how to run.
pub fn main(specs: &TaskSet) -> ExitCode {
    let cli = Cli::parse();
    let result = match cli.command {
        Command::Init => init(),
        Command::Run {
            taskdesc,
            record,
            verbose,
            quiet,
        } => {
            init_logging(verbose as i8 - quiet as i8);
            run(specs, &taskdesc, record)
        }
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:?}", style("Error:").red().bold());
            ExitCode::FAILURE
        }
    }
}

fn init() -> anyhow::Result<()> {
    let input_root: String = Input::new()
        .with_prompt("Input datastore")
        .default("data".to_string())
        .interact_text()?;
    let output_root: String = Input::new()
        .with_prompt("Output datastore (must differ from the input datastore)")
        .default("data/run_dump".to_string())
        .interact_text()?;
    let repository: String = Input::new()
        .with_prompt("Source repository to stamp run records with (empty for none)")
        .allow_empty(true)
        .interact_text()?;
    let repository = match repository.trim() {
        "" => None,
        path => Some(Utf8PathBuf::from(path)),
    };

    let config = ProjectConfig::new(input_root, output_root, repository);
    config.validate()?;

    let proceed = Confirm::new()
        .with_prompt(format!(
            "Create '{}' and '{}' and write {CONFIG_FILE}?",
            config.input_root, config.output_root
        ))
        .default(true)
        .interact()?;
    if !proceed {
        println!("{}", style("Aborted.").yellow());
        return Ok(());
    }

    crate::store::Store::open(&config.input_root)?;
    crate::store::Store::open(&config.output_root)?;
    config.save(Utf8Path::new(CONFIG_FILE))?;
    println!("Project layout written to {CONFIG_FILE}");
    Ok(())
}

fn run(specs: &TaskSet, taskdesc: &Utf8Path, record: bool) -> anyhow::Result<()> {
    let config = ProjectConfig::load(Utf8Path::new(CONFIG_FILE))?;
    let project = Project::from_config(&config, record)?;

    let s = Instant::now();
    let task = Task::load(specs, taskdesc)?;
    let fingerprint = task.fingerprint(&project.input_store)?;
    println!("Running {} ({fingerprint})", style(task.name()).bold());

    let outputs = task.run(&project)?;
    for (name, value) in &outputs {
        println!("  {name} = {value:?}");
    }
    println!("Finished {} {}", style(task.name()).bold(), as_overhead(s));
    Ok(())
}

fn as_overhead(s: Instant) -> impl Display {
    let f = format!("(+{}ms)", s.elapsed().as_millis());
    style(f).blue()
}

/// Maps counted `-v`/`-q` flags to a log level; the default is warnings only.
/// `RUST_LOG` takes precedence when set.
fn init_logging(net_verbosity: i8) {
    use tracing_subscriber::EnvFilter;

    let level = match net_verbosity {
        i8::MIN..=-2 => "off",
        -1 => "error",
        0 => "warn",
        1 => "info",
        2 => "debug",
        3..=i8::MAX => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
