//! Sample directories, read staging and command execution.

use crate::error::{FlowError, Result};
use crate::sample::SampleRecord;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, info};

pub const LOGS_DIR: &str = "logs";
pub const SAMPLESHEET_EXPORT_FILE: &str = "samplesheet_text.json";
pub const JOB_FILE_EXTENSION: &str = "job";
pub const DRY_RUN_SEPARATOR: &str = "===========";

const OUTPUT_PREFIX_FLAG: &str = "--output-file-prefix";

fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|e| FlowError::io(path, e))
}

fn not_found(path: &Path) -> FlowError {
    FlowError::io(
        path,
        io::Error::new(io::ErrorKind::NotFound, "no such file or directory"),
    )
}

/// Creates every sample directory; a dry run only reports them.
pub fn prepare_sample_dirs(records: &[SampleRecord], dry_run: bool) -> Result<()> {
    for record in records {
        if dry_run {
            debug!(dir = %record.sample_dir.display(), "dry run: not creating sample dir");
            continue;
        }
        ensure_dir(&record.sample_dir)?;
    }
    Ok(())
}

/// Directory the sequencer wrote a project's reads into.
pub fn project_read_dir(record: &SampleRecord) -> PathBuf {
    record
        .manifest_path
        .parent()
        .map(|p| p.join(&record.project))
        .unwrap_or_else(|| PathBuf::from(&record.project))
}

/// Moves `file` from the project read directory into the sample directory.
///
/// A file already at the destination is left alone. In a dry run nothing moves
/// but the file must exist at one of the two locations.
pub fn stage_read_file(record: &SampleRecord, file: &str, dry_run: bool) -> Result<()> {
    let source = project_read_dir(record).join(file);
    let destination = record.sample_dir.join(file);
    if dry_run {
        if source.exists() || destination.exists() {
            return Ok(());
        }
        return Err(not_found(&source));
    }
    if source.exists() {
        if !destination.exists() {
            debug!(from = %source.display(), to = %destination.display(), "staging read file");
            fs::rename(&source, &destination).map_err(|e| FlowError::io(&source, e))?;
        }
        ensure_dir(&record.sample_dir.join(LOGS_DIR))?;
        return Ok(());
    }
    if destination.exists() {
        return Ok(());
    }
    Err(not_found(&source))
}

pub fn stage_read_files(record: &SampleRecord, files: &[String], dry_run: bool) -> Result<()> {
    for file in files {
        stage_read_file(record, file, dry_run)?;
    }
    Ok(())
}

/// Writes the listed manifest columns as sorted JSON under `logs/`.
///
/// Returns `None` when the sample directory does not exist yet (dry run).
pub fn write_samplesheet_columns(
    record: &SampleRecord,
    columns: &[String],
) -> Result<Option<PathBuf>> {
    if columns.is_empty() || !record.sample_dir.is_dir() {
        return Ok(None);
    }
    let selected: BTreeMap<&str, &str> = columns
        .iter()
        .filter_map(|c| {
            record
                .extra
                .get(c)
                .map(|v| (c.as_str(), v.as_str()))
        })
        .collect();
    let logs = record.sample_dir.join(LOGS_DIR);
    ensure_dir(&logs)?;
    let path = logs.join(SAMPLESHEET_EXPORT_FILE);
    let bytes = serde_json::to_vec(&selected).map_err(|e| FlowError::Json {
        path: path.clone(),
        source: e,
    })?;
    fs::write(&path, bytes).map_err(|e| FlowError::io(&path, e))?;
    Ok(Some(path))
}

fn job_output_prefixes(contents: &str) -> Vec<String> {
    let mut prefixes = Vec::new();
    for line in contents.lines() {
        if !line.starts_with("dragen") {
            continue;
        }
        let mut tokens = line.split_whitespace();
        while let Some(token) = tokens.next() {
            if token == OUTPUT_PREFIX_FLAG {
                if let Some(prefix) = tokens.next() {
                    prefixes.push(prefix.to_string());
                }
                break;
            }
        }
    }
    prefixes
}

/// True when the sample directory holds job files and every output prefix
/// they name has a replay sidecar next to it.
pub fn has_already_run(sample_dir: &Path) -> Result<bool> {
    let logs = sample_dir.join(LOGS_DIR);
    if !logs.is_dir() {
        return Ok(false);
    }
    let mut job_files = Vec::new();
    for entry in fs::read_dir(&logs).map_err(|e| FlowError::io(&logs, e))? {
        let entry = entry.map_err(|e| FlowError::io(&logs, e))?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some(JOB_FILE_EXTENSION) {
            job_files.push(path);
        }
    }
    if job_files.is_empty() {
        return Ok(false);
    }
    for job in job_files {
        let contents = fs::read_to_string(&job).map_err(|e| FlowError::io(&job, e))?;
        for prefix in job_output_prefixes(&contents) {
            if !sample_dir.join(format!("{}-replay.json", prefix)).is_file() {
                return Ok(false);
            }
        }
    }
    Ok(true)
}

/// Result of running one command.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionOutcome {
    pub working_dir: PathBuf,
    pub argv: Vec<String>,
    pub return_code: Option<i32>,
    pub stdout: String,
    pub started_at: DateTime<Utc>,
}

impl ExecutionOutcome {
    pub fn succeeded(&self) -> bool {
        self.return_code == Some(0)
    }
}

/// Argument vector for `command`: `bash -c <command>` or the words of
/// `base_command` followed by the command string.
pub fn command_argv(command: &str, base_command: Option<&str>) -> Vec<String> {
    match base_command.map(str::trim).filter(|b| !b.is_empty()) {
        Some(base) => base
            .split_whitespace()
            .map(str::to_string)
            .chain(std::iter::once(command.to_string()))
            .collect(),
        None => vec!["bash".to_string(), "-c".to_string(), command.to_string()],
    }
}

/// Runs `command` once in `working_dir` and waits for it.
pub fn execute_command(
    command: &str,
    base_command: Option<&str>,
    working_dir: &Path,
) -> Result<ExecutionOutcome> {
    let argv = command_argv(command, base_command);
    let started_at = Utc::now();
    info!(dir = %working_dir.display(), program = %argv[0], "executing command");
    let output = Command::new(&argv[0])
        .args(&argv[1..])
        .current_dir(working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .output()
        .map_err(|e| FlowError::io(working_dir, e))?;
    let outcome = ExecutionOutcome {
        working_dir: working_dir.to_path_buf(),
        argv,
        return_code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        started_at,
    };
    info!(
        dir = %working_dir.display(),
        return_code = outcome.return_code.unwrap_or(-1),
        "command finished"
    );
    Ok(outcome)
}

/// Lines printed for one command in a dry run.
pub fn dry_run_display(working_dir: &Path, command: &str) -> String {
    format!(
        "chdir {}\n{}\n{}",
        working_dir.display(),
        command,
        DRY_RUN_SEPARATOR
    )
}
