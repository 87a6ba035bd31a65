use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use dragen_runner::{BatchOptions, FlowError, FlowSettings, ResourceCatalog};
use serde_json::{json, Value};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "dragenflow",
    version = "0.3.0",
    about = "Given a samplesheet, turn it into dragen commands."
)]
struct Cli {
    /// Write logs to this file instead of stderr.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the commands for every dragen row and run them.
    Run {
        samplesheet: PathBuf,
        #[arg(short = 'd', long)]
        dry_run: bool,
        #[arg(long)]
        disable_scripts: bool,
        /// Run commands through this program instead of `bash -c`.
        #[arg(short = 'c', long = "cmd")]
        cmd: Option<String>,
        #[arg(long, default_value = "config")]
        config_dir: PathBuf,
        #[arg(long)]
        keep_going: bool,
        #[arg(long)]
        json: bool,
    },
    /// Print the processing order and run category of every row.
    Classify {
        samplesheet: PathBuf,
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_file.as_deref())?;
    info!(version = env!("CARGO_PKG_VERSION"), "started new logging session");
    let json_mode = command_json_mode(&cli.command);
    let result = run_command(cli.command);
    match result {
        Ok(Some(payload)) => {
            emit_json(&payload);
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(err) => {
            if json_mode {
                let code = err
                    .downcast_ref::<FlowError>()
                    .map(FlowError::code)
                    .unwrap_or("command_failed");
                emit_json(&json_error(code, err.to_string(), json!({})));
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

fn init_tracing(log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    let installed = match log_file {
        Some(path) => {
            let file = File::create(path)
                .map_err(|e| anyhow!("cannot open log file {}: {}", path.display(), e))?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
        }
        None => builder.with_writer(std::io::stderr).try_init(),
    };
    installed.map_err(|e| anyhow!("failed to install log subscriber: {}", e))
}

fn run_command(command: Commands) -> Result<Option<Value>> {
    match command {
        Commands::Run {
            samplesheet,
            dry_run,
            disable_scripts,
            cmd,
            config_dir,
            keep_going,
            json,
        } => {
            let options = BatchOptions {
                settings: FlowSettings {
                    dry_run,
                    disable_scripts,
                    ..FlowSettings::default()
                },
                keep_going,
                base_command: cmd,
            };
            let catalog = ResourceCatalog::from_dir(config_dir);
            let result = dragen_runner::run_batch(&samplesheet, catalog, &options)?;
            if json {
                return Ok(Some(json!({
                    "ok": result.failures.is_empty(),
                    "command": "run",
                    "result": serde_json::to_value(&result)?
                })));
            }
            if result.dry_run {
                for (dir, command) in result.pending_commands() {
                    println!("{}", dragen_runner::dry_run_display(dir, command));
                }
            } else {
                for outcome in &result.executions {
                    println!(
                        "{}\treturn code: {}",
                        outcome.working_dir.display(),
                        outcome
                            .return_code
                            .map(|c| c.to_string())
                            .unwrap_or_else(|| "signal".to_string())
                    );
                }
            }
            for plan in result.plans.iter().filter(|p| p.already_run) {
                println!("skipped (already executed): {}", plan.sample_dir.display());
            }
            if !result.failures.is_empty() {
                for failure in &result.failures {
                    eprintln!(
                        "failed: {}/{} (row {}): {}",
                        failure.project, failure.sample_id, failure.index, failure.message
                    );
                }
                return Err(anyhow!("{} record(s) could not be planned", result.failures.len()));
            }
        }
        Commands::Classify { samplesheet, json } => {
            let summary = dragen_runner::describe_batch(&samplesheet)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "classify",
                    "summary": serde_json::to_value(&summary)?
                })));
            }
            println!("manifest: {}", summary.manifest.display());
            for record in &summary.records {
                println!(
                    "{}\t{}/{}\t{}\t{}",
                    record.index,
                    record.project,
                    record.sample_id,
                    record.family.as_str(),
                    record
                        .run_category
                        .map(|c| c.as_str())
                        .unwrap_or("-")
                );
            }
        }
    }
    Ok(None)
}

fn emit_json(value: &Value) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":{{\"code\":\"serialization_error\",\"message\":\"failed to serialize JSON payload\",\"details\":{{}}}}}}"
        ),
    }
}

fn json_error(code: &str, message: String, details: Value) -> Value {
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message,
            "details": details
        }
    })
}

fn command_json_mode(command: &Commands) -> bool {
    match command {
        Commands::Run { json, .. } | Commands::Classify { json, .. } => *json,
    }
}
