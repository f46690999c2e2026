//! Thin command-line driver for the orrery core: apply patches, run tools,
//! evaluate sandbox code, compute forces, and parse agent replies against a
//! scene file. Prints the JSON result envelope; the exit code tracks
//! `success`.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use orrery_core::AppConfig;
use orrery_observe::Observer;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "orrery", version, about = "Agent-driven physics scene core")]
struct Cli {
    /// Workspace directory holding `.orrery/settings.json`.
    #[arg(long, default_value = ".", global = true)]
    workspace: PathBuf,

    /// Verbose logging to stderr.
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply a JSON patch batch to a scene file.
    Apply {
        #[arg(long)]
        scene: PathBuf,
        #[arg(long)]
        patches: PathBuf,
        /// Write the patched scene here on success.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Execute a registered tool against a scene.
    Tool {
        name: String,
        #[arg(long)]
        scene: PathBuf,
        /// Tool parameters as a JSON object.
        #[arg(long, default_value = "{}")]
        params: String,
    },
    /// Run code in the sandbox against a scene snapshot.
    Exec {
        #[arg(long)]
        scene: PathBuf,
        #[arg(long, conflicts_with = "file")]
        code: Option<String>,
        #[arg(long)]
        file: Option<PathBuf>,
        /// objects | scene | value
        #[arg(long, default_value = "value")]
        return_type: String,
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Compute per-frame gravitational forces for a scene.
    Forces {
        #[arg(long)]
        scene: PathBuf,
    },
    /// Parse an agent reply file and dispatch it against a scene.
    Parse {
        #[arg(long)]
        scene: PathBuf,
        #[arg(long)]
        reply: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(success) => {
            if success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(err) => {
            eprintln!("[orrery] error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<bool> {
    let cfg = AppConfig::load(&cli.workspace)?;
    let mut observer = Observer::new(&cli.workspace, &cfg.telemetry)?;
    observer.set_verbose(cli.verbose);
    let observer = Arc::new(observer);

    let (output, success) = match cli.command {
        Command::Apply {
            scene,
            patches,
            out,
        } => commands::apply::run(&scene, &patches, out.as_deref())?,
        Command::Tool {
            name,
            scene,
            params,
        } => commands::tool::run(&cfg, observer.clone(), &name, &scene, &params)?,
        Command::Exec {
            scene,
            code,
            file,
            return_type,
            timeout_ms,
        } => commands::exec::run(&cfg, &scene, code, file.as_deref(), &return_type, timeout_ms)?,
        Command::Forces { scene } => commands::forces::run(&scene)?,
        Command::Parse { scene, reply } => {
            commands::parse::run(&cfg, observer.clone(), &scene, &reply)?
        }
    };

    println!("{output}");
    Ok(success)
}
