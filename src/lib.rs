//! Hive CLI: create and manage evolutionary-coding experiments.
//!
//! An experiment pairs a code repository with an evaluation script. `hive
//! create` snapshots the repository, builds a sandbox image and registers the
//! experiment on the configured platform. Sandboxes run `hive sandbox serve`,
//! which polls a coordinator for candidate code and reports evaluation
//! results.
//!
//! # Examples
//!
//! ```bash
//! # Write a starter configuration to ~/.hive/hive.yaml
//! hive init
//!
//! # Create an experiment with a generated suffix
//! hive create my-exp-
//!
//! # How build secrets reach the image build
//! hive docs show build-secrets
//! ```
//!
//! # Crate Structure
//!
//! - [`core`]: configuration, errors, logging, process execution, naming
//! - [`plugins`]: git, overlays, images, storage, platforms, sandbox worker

pub mod core;
pub mod plugins;

use crate::core::{
    config::{self, PlatformType},
    docs_cli, error, logging, output, runtime, time,
};
use crate::plugins::{
    completers::{self, CompletionKind},
    evaluator::{self, PythonEvaluator},
    platform,
    sandbox::{self, BackoffPolicy, SandboxClient},
};

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[clap(
    name = "hive",
    version = env!("CARGO_PKG_VERSION"),
    about = "Create and manage Hive experiments"
)]
struct Cli {
    /// Enable debug logging.
    #[clap(short, long, global = true)]
    verbose: bool,
    /// Configuration file (defaults to $HIVE_CONFIG or ~/.hive/hive.yaml).
    #[clap(short = 'f', long = "config", global = true)]
    config: Option<PathBuf>,
    #[clap(subcommand)]
    command: Command,
}

#[derive(clap::Args, Debug)]
struct CreateCli {
    /// Experiment name; a trailing '-' appends a unique suffix.
    experiment: String,
    /// Override the platform from the configuration.
    #[clap(long, value_enum)]
    platform: Option<PlatformType>,
}

#[derive(clap::Args, Debug)]
struct DeleteCli {
    #[clap(subcommand)]
    command: DeleteCommand,
}

#[derive(Subcommand, Debug)]
enum DeleteCommand {
    /// Delete an experiment.
    Experiment { name: String },
}

#[derive(clap::Args, Debug)]
struct ShowCli {
    /// Print a JSON envelope instead of a list.
    #[clap(long, global = true)]
    json: bool,
    #[clap(subcommand)]
    command: ShowCommand,
}

#[derive(Subcommand, Debug)]
enum ShowCommand {
    /// List experiments.
    Experiments,
    /// List sandboxes, optionally for one experiment.
    Sandboxes {
        #[clap(long)]
        experiment: Option<String>,
    },
}

#[derive(clap::Args, Debug)]
struct LogCli {
    sandbox: String,
    #[clap(long)]
    follow: bool,
    #[clap(long)]
    tail: Option<u32>,
}

#[derive(clap::Args, Debug)]
struct SandboxCli {
    #[clap(subcommand)]
    command: SandboxCommand,
}

#[derive(Subcommand, Debug)]
enum SandboxCommand {
    /// Poll the coordinator and evaluate jobs until told to stop.
    Serve(ServeCli),
}

#[derive(clap::Args, Debug)]
struct ServeCli {
    /// Coordinator URL.
    #[clap(long)]
    endpoint: String,
    /// Repository checkout evaluated by this sandbox.
    #[clap(long, default_value = evaluator::REPO_DIR)]
    repo_dir: PathBuf,
    /// Python interpreter used for the evaluation script.
    #[clap(long, default_value = "python")]
    python: String,
    /// Seconds before the first retry.
    #[clap(long, default_value_t = 1.0)]
    initial_delay: f64,
    #[clap(long, default_value_t = 1.5)]
    delay_multiplier: f64,
    /// Per-request timeout in seconds.
    #[clap(long, default_value_t = 30.0)]
    request_timeout: f64,
    /// Give up after this many failed requests (default: retry forever).
    #[clap(long)]
    max_attempts: Option<u32>,
    /// Copy the repository for each job, symlinking only paths matching
    /// this regex (repeatable).
    #[clap(long = "copy-with-links", value_name = "PATTERN")]
    copy_with_links: Vec<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a starter configuration file.
    Init {
        #[clap(long)]
        force: bool,
    },
    /// Create an experiment.
    Create(CreateCli),
    /// Delete resources.
    Delete(DeleteCli),
    /// Check access to the platform.
    Login,
    /// List experiments or sandboxes.
    Show(ShowCli),
    /// Print sandbox logs.
    Log(LogCli),
    /// Sandbox worker commands.
    Sandbox(SandboxCli),
    /// Embedded guides.
    Docs(docs_cli::DocsCli),
    /// Print the version.
    Version,
    #[clap(name = "__complete", hide = true)]
    Complete {
        #[clap(value_enum)]
        kind: CompletionKind,
        #[clap(default_value = "")]
        prefix: String,
        #[clap(long)]
        experiment: Option<String>,
    },
}

pub fn run() -> Result<(), error::HiveError> {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    let config_path = config::resolve_config_path(cli.config.as_deref());

    match cli.command {
        Command::Version => {
            println!("v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Command::Init { force } => {
            config::write_config_template(&config_path, force)?;
            println!("{} {}", "Wrote".green(), config_path.display());
            println!("Next: edit the file, then run `hive create <experiment>`.");
            Ok(())
        }
        Command::Docs(docs) => docs_cli::run_docs_cli(docs),
        Command::Create(create) => run_create(&config_path, create),
        Command::Delete(delete) => {
            let config = config::load_config(&config_path)?;
            let target = platform::for_config(config.platform, &config);
            match delete.command {
                DeleteCommand::Experiment { name } => {
                    runtime::validate_object_name(&name)?;
                    target.delete(&name)?;
                    println!("{} {}", "Deleted".green(), name);
                }
            }
            Ok(())
        }
        Command::Login => {
            let config = config::load_config(&config_path)?;
            platform::for_config(config.platform, &config).login()?;
            println!("{}", "Logged in.".green());
            Ok(())
        }
        Command::Show(show) => {
            let config = config::load_config(&config_path)?;
            let target = platform::for_config(config.platform, &config);
            let (cmd, title, names) = match show.command {
                ShowCommand::Experiments => {
                    ("show.experiments", "Experiments", target.list_experiments()?)
                }
                ShowCommand::Sandboxes { experiment } => (
                    "show.sandboxes",
                    "Sandboxes",
                    target.list_sandboxes(experiment.as_deref())?,
                ),
            };
            if show.json {
                output::print_json(&time::command_envelope(
                    cmd,
                    "ok",
                    serde_json::json!({ "items": names }),
                ));
            } else {
                output::print_names(title, &names);
            }
            Ok(())
        }
        Command::Log(log) => {
            let config = config::load_config(&config_path)?;
            platform::for_config(config.platform, &config).logs(&log.sandbox, log.follow, log.tail)
        }
        Command::Sandbox(sandbox_cli) => match sandbox_cli.command {
            SandboxCommand::Serve(serve) => run_serve(serve),
        },
        Command::Complete {
            kind,
            prefix,
            experiment,
        } => {
            for candidate in completers::complete(kind, &prefix, &config_path, experiment.as_deref()) {
                println!("{}", candidate);
            }
            Ok(())
        }
    }
}

fn run_create(config_path: &Path, create: CreateCli) -> Result<(), error::HiveError> {
    let config = config::load_config(config_path)?;
    let kind = create.platform.unwrap_or(config.platform);

    let runtime = runtime::Runtime::new(Some(&create.experiment))?;
    let name = runtime.require_name()?;
    runtime::validate_object_name(name)?;

    let created = platform::for_config(kind, &config).create(name, &config)?;

    println!("{} {}", "Created experiment".green().bold(), created.name.bold());
    println!("  platform: {}", kind);
    println!("  source:   {}", output::compact_line(&config.repo.source, 80));
    if !created.code_version.is_empty() {
        println!("  version:  {}", created.code_version);
    }
    if let Some(image) = &created.image {
        println!("  image:    {}", image);
    }
    if !created.uploaded.is_empty() {
        println!("  uploaded: {} file(s)", created.uploaded.len());
    }
    Ok(())
}

fn seconds(name: &str, value: f64) -> Result<Duration, error::HiveError> {
    Duration::try_from_secs_f64(value)
        .ok()
        .filter(|d| !d.is_zero())
        .ok_or_else(|| {
            error::HiveError::ValidationError(format!(
                "--{} must be a positive number of seconds, got {}",
                name, value
            ))
        })
}

fn run_serve(serve: ServeCli) -> Result<(), error::HiveError> {
    if !serve.delay_multiplier.is_finite() || serve.delay_multiplier < 1.0 {
        return Err(error::HiveError::ValidationError(format!(
            "--delay-multiplier must be at least 1, got {}",
            serve.delay_multiplier
        )));
    }
    let policy = BackoffPolicy {
        initial_delay: seconds("initial-delay", serve.initial_delay)?,
        delay_multiplier: serve.delay_multiplier,
        request_timeout: seconds("request-timeout", serve.request_timeout)?,
        max_attempts: serve.max_attempts,
    };

    if !serve.repo_dir.is_dir() {
        return Err(error::HiveError::NotADirectory(
            serve.repo_dir.display().to_string(),
        ));
    }
    let executor = Arc::new(
        PythonEvaluator::new(&serve.repo_dir, &std::env::temp_dir())
            .with_interpreter(&serve.python)
            .with_copy_mode(&serve.copy_with_links),
    );
    let client = SandboxClient::new(&serve.endpoint, policy)?;
    tracing::info!("Sandbox worker polling {}", client.endpoint());

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    rt.block_on(sandbox::main_loop(&client, executor))
}
