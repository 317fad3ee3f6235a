//! The `smelter` command-line interface.
//!
//! Wires argument parsing and log initialization around the engine's
//! recipe-level entry points. In `--json` mode human logging is silenced and
//! the machine-readable result object is the only stdout output, emitted on
//! success and failure alike.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::filter::LevelFilter;

use smelter_engine::{recipe, RunOptions, RunReport};

#[derive(Parser)]
#[command(name = "smelter", version, about = "declarative multi-host remote-command orchestrator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Initialize a new recipe
    Init {
        /// Name of the recipe to initialize
        name: String,
        /// Explicit sequence names to initialize
        #[arg(short = 's', long = "sequence")]
        sequences: Vec<String>,
    },
    /// Run a recipe sequence against target hosts
    Run {
        /// The name of the sequence to execute
        sequence: String,
        /// Named machine targets and/or groups ("all" for all targets)
        #[arg(required = true)]
        targets: Vec<String>,
        /// Recipe directory (defaults to the current directory)
        #[arg(short = 'r', long = "recipe-dir")]
        recipe_dir: Option<PathBuf>,
        /// Config yaml overrides, stackable in order of occurrence
        #[arg(short = 'c', long = "config")]
        configs: Vec<PathBuf>,
        /// Values files, stackable in order of occurrence (excluding values.yaml)
        #[arg(short = 'v', long = "values")]
        values: Vec<PathBuf>,
        /// Enable debug mode
        #[arg(short = 'd', long = "debug")]
        debug: bool,
        /// Output results in json format, suppress normal logging
        #[arg(short = 'j', long = "json")]
        json: bool,
    },
    /// Lint a recipe
    Lint {
        /// Recipe directory (defaults to the current directory)
        #[arg(short = 'r', long = "recipe-dir")]
        recipe_dir: Option<PathBuf>,
    },
    /// Display recipe info
    Info {
        /// Recipe directory (defaults to the current directory)
        #[arg(short = 'r', long = "recipe-dir")]
        recipe_dir: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let (debug, json) = match &cli.command {
        Command::Run { debug, json, .. } => (*debug, *json),
        _ => (false, false),
    };
    init_tracing(debug, json);

    match dispatch(cli.command) {
        Ok(code) => code,
        Err(error) => {
            if !json {
                error!("{error:#}");
            }
            ExitCode::FAILURE
        }
    }
}

fn dispatch(command: Command) -> Result<ExitCode> {
    match command {
        Command::Init { name, sequences } => {
            let cwd = std::env::current_dir()?;
            let recipe_dir = recipe::init_recipe(&cwd, &name, &sequences)?;
            println!("initialized recipe \"{}\"", recipe_dir.display());
            Ok(ExitCode::SUCCESS)
        }
        Command::Run {
            sequence,
            targets,
            recipe_dir,
            configs,
            values,
            debug,
            json,
        } => run(RunOptions {
            recipe_dir: resolve_recipe_dir(recipe_dir)?,
            config_paths: configs,
            values_paths: values,
            sequence,
            targets,
            debug,
            json,
        }),
        Command::Lint { recipe_dir } => {
            let dir = resolve_recipe_dir(recipe_dir)?;
            let (_, ok) = recipe::lint_recipe(&dir)?;
            if ok {
                Ok(ExitCode::SUCCESS)
            } else {
                error!("lint was unsuccessful");
                Ok(ExitCode::FAILURE)
            }
        }
        Command::Info { recipe_dir } => {
            let dir = resolve_recipe_dir(recipe_dir)?;
            info(&dir)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn run(options: RunOptions) -> Result<ExitCode> {
    let json = options.json;
    match recipe::run_sequence(options) {
        Ok(report) => {
            if json {
                println!("{}", report.to_json_string());
            }
            if report.ok() {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::FAILURE)
            }
        }
        Err(error) => {
            // The run aborted before producing host results; the json
            // contract still expects a result object on stdout.
            if json {
                println!("{}", RunReport::aborted(format!("{error:#}")).to_json_string());
                return Ok(ExitCode::FAILURE);
            }
            Err(error)
        }
    }
}

fn info(dir: &std::path::Path) -> Result<()> {
    let recipe = recipe::load_recipe(dir)?;
    println!("Recipe: {}", recipe.name);
    println!("{}\n", recipe.description);
    for (name, path) in &recipe.sequences {
        println!("Sequence: {name}");
        match recipe::peek_sequence_description(dir, path) {
            Ok(description) => println!("{description}\n"),
            Err(error) => println!("error processing sequence: {error:#}\n"),
        }
    }
    Ok(())
}

fn resolve_recipe_dir(explicit: Option<PathBuf>) -> Result<PathBuf> {
    match explicit {
        Some(dir) => Ok(dir),
        None => Ok(std::env::current_dir()?),
    }
}

/// Human logs go to stderr; `--json` silences them entirely so stdout holds
/// nothing but the result object.
fn init_tracing(debug: bool, json: bool) {
    let level = if json {
        LevelFilter::OFF
    } else if debug {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
