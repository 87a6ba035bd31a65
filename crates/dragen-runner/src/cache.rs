//! Batch-scoped memory of what earlier records produced.
//!
//! Paired records need their normal's output prefix and read parameters. The
//! normal is normally processed earlier in the same batch; when it was run by
//! a previous invocation its replay sidecar on disk is used instead.

use crate::error::{FlowError, Result};
use crate::resolve::ArgumentMap;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const READ_FILE_1: &str = "fastq-file1";
pub const READ_FILE_2: &str = "fastq-file2";
pub const READ_GROUP_ID: &str = "RGID";
pub const READ_GROUP_SAMPLE: &str = "RGSM";

pub const REPLAY_SUFFIX: &str = "-replay.json";

/// The four values a normal contributes to a combined tumor/normal stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalParameters {
    pub read_file_1: String,
    pub read_file_2: String,
    pub read_group_id: String,
    pub read_group_sample: String,
}

impl NormalParameters {
    pub fn to_arguments(&self) -> ArgumentMap {
        let mut arguments = ArgumentMap::new();
        arguments.insert(READ_FILE_1.to_string(), self.read_file_1.clone());
        arguments.insert(READ_FILE_2.to_string(), self.read_file_2.clone());
        arguments.insert(READ_GROUP_ID.to_string(), self.read_group_id.clone());
        arguments.insert(READ_GROUP_SAMPLE.to_string(), self.read_group_sample.clone());
        arguments
    }
}

#[derive(Debug, Deserialize)]
struct ReplayEntry {
    name: String,
    #[serde(default)]
    value: Value,
}

/// Reads a replay sidecar: either a bare `[{name, value}]` array or an object
/// carrying that array under `dragen_config`.
pub fn read_replay(path: &Path) -> Result<ArgumentMap> {
    let data = fs::read_to_string(path).map_err(|e| FlowError::io(path, e))?;
    let json_err = |e: serde_json::Error| FlowError::Json {
        path: path.to_path_buf(),
        source: e,
    };
    let mut value: Value = serde_json::from_str(&data).map_err(json_err)?;
    if let Some(inner) = value.get_mut("dragen_config") {
        value = inner.take();
    }
    let entries: Vec<ReplayEntry> = serde_json::from_value(value).map_err(json_err)?;
    let mut arguments = ArgumentMap::new();
    for entry in entries {
        let text = match entry.value {
            Value::String(s) => s,
            Value::Null => continue,
            other => other.to_string(),
        };
        arguments.insert(entry.name, text);
    }
    Ok(arguments)
}

/// Joins a relative read file onto the directory holding `prefix`.
fn rebase_read_file(prefix: &str, file: &str) -> String {
    if file.starts_with('/') {
        return file.to_string();
    }
    match Path::new(prefix).parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.join(file).to_string_lossy().to_string(),
        _ => file.to_string(),
    }
}

/// Copy of `arguments` whose relative read files point into the directory of `prefix`.
pub fn rebase_read_files(arguments: &ArgumentMap, prefix: &str) -> ArgumentMap {
    let mut rebased = arguments.clone();
    for key in [READ_FILE_1, READ_FILE_2] {
        if let Some(file) = rebased.get_mut(key) {
            if !file.is_empty() {
                *file = rebase_read_file(prefix, file);
            }
        }
    }
    rebased
}

#[derive(Debug, Default)]
pub struct CrossSampleCache {
    outputs: HashMap<String, String>,
    arguments: HashMap<String, ArgumentMap>,
}

impl CrossSampleCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_output(&mut self, key: impl Into<String>, prefix: impl Into<String>) {
        self.outputs.insert(key.into(), prefix.into());
    }

    pub fn record_arguments(&mut self, key: impl Into<String>, arguments: ArgumentMap) {
        self.arguments.insert(key.into(), arguments);
    }

    pub fn output_prefix(&self, key: &str) -> Option<&str> {
        self.outputs.get(key).map(String::as_str)
    }

    pub fn require_output_prefix(&self, key: &str) -> Result<&str> {
        self.output_prefix(key).ok_or_else(|| {
            FlowError::unresolved(format!("no output prefix recorded for normal {}", key))
        })
    }

    pub fn arguments(&self, key: &str) -> Option<&ArgumentMap> {
        self.arguments.get(key)
    }

    /// Normal read files and read-group values for `key`.
    ///
    /// In-memory arguments win; any value they lack is read from the normal's
    /// replay sidecar, whose relative paths resolve against `base_dir`.
    pub fn lookup_normal_parameters(&self, key: &str, base_dir: &Path) -> Result<NormalParameters> {
        let keys = [READ_FILE_1, READ_FILE_2, READ_GROUP_ID, READ_GROUP_SAMPLE];
        let mut found: ArgumentMap = ArgumentMap::new();
        if let Some(arguments) = self.arguments.get(key) {
            for k in keys {
                if let Some(v) = arguments.get(k).filter(|v| !v.is_empty()) {
                    found.insert(k.to_string(), v.clone());
                }
            }
        }

        if found.len() < keys.len() {
            let prefix = self.require_output_prefix(key)?;
            let replay = self.replay_path(prefix, base_dir);
            if !replay.is_file() {
                return Err(FlowError::unresolved(format!(
                    "normal {} has no cached arguments and no replay file at {}",
                    key,
                    replay.display()
                )));
            }
            debug!(normal = key, replay = %replay.display(), "recovering normal from replay file");
            let recovered = rebase_read_files(&read_replay(&replay)?, prefix);
            for k in keys {
                if found.contains_key(k) {
                    continue;
                }
                if let Some(v) = recovered.get(k).filter(|v| !v.is_empty()) {
                    found.insert(k.to_string(), v.clone());
                }
            }
        }

        let missing: Vec<&str> = keys
            .iter()
            .copied()
            .filter(|k| !found.contains_key(*k))
            .collect();
        if !missing.is_empty() {
            return Err(FlowError::unresolved(format!(
                "normal {} is missing {}",
                key,
                missing.join(", ")
            )));
        }
        let take = |k: &str| found.get(k).cloned().unwrap_or_default();
        Ok(NormalParameters {
            read_file_1: take(READ_FILE_1),
            read_file_2: take(READ_FILE_2),
            read_group_id: take(READ_GROUP_ID),
            read_group_sample: take(READ_GROUP_SAMPLE),
        })
    }

    fn replay_path(&self, prefix: &str, base_dir: &Path) -> PathBuf {
        let file = format!("{}{}", prefix, REPLAY_SUFFIX);
        let path = PathBuf::from(&file);
        if path.is_absolute() {
            path
        } else {
            base_dir.join(file)
        }
    }
}
