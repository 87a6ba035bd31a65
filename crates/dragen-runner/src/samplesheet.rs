//! Reads the `[Data]` section of an Illumina-style samplesheet into records.

use crate::error::{FlowError, Result};
use crate::sample::SampleRecord;
use indexmap::IndexMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const DATA_SECTION_MARKER: &str = "[Data]";

pub const COL_PROJECT: &str = "Sample_Project";
pub const COL_SAMPLE: &str = "SampleID";
pub const COL_SAMPLE_ALT: &str = "Sample_ID";
pub const COL_SAMPLE_NAME: &str = "Sample_Name";
pub const COL_LANE: &str = "Lane";
pub const COL_REF_GENOME: &str = "RefGenome";
pub const COL_TARGET: &str = "TargetRegions";
pub const COL_TUMOR: &str = "Is_this_tumor";
pub const COL_NORMAL: &str = "matching_normal_sample";
pub const COL_PARAMETERS: &str = "pipeline_parameters";
pub const COL_ADAPTER_TRIM: &str = "AdapterTrim";
pub const COL_OVERRIDE: &str = "override";
pub const COL_PIPELINE: &str = "pipeline";

/// Only rows for this pipeline are turned into records.
pub const HANDLED_PIPELINE: &str = "dragen";

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().map_err(|e| FlowError::io(path, e))?;
    Ok(cwd.join(path))
}

/// Parses the samplesheet at `path`.
///
/// Every data row receives its 1-based ordinal before rows for other
/// pipelines are dropped, so indices stay stable across the whole sheet.
pub fn read_samplesheet(path: &Path) -> Result<Vec<SampleRecord>> {
    let manifest_path = absolute(path)?;
    let data = fs::read_to_string(&manifest_path).map_err(|e| FlowError::io(path, e))?;
    parse_samplesheet(&data, &manifest_path)
}

pub fn parse_samplesheet(data: &str, manifest_path: &Path) -> Result<Vec<SampleRecord>> {
    let csv_err = |e: csv::Error| FlowError::Csv {
        path: manifest_path.to_path_buf(),
        source: e,
    };
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(data.as_bytes());
    let mut rows = reader.records();

    let mut header: Option<Vec<String>> = None;
    while let Some(row) = rows.next() {
        let row = row.map_err(csv_err)?;
        if row
            .get(0)
            .map(|cell| cell.starts_with(DATA_SECTION_MARKER))
            .unwrap_or(false)
        {
            header = match rows.next() {
                Some(h) => Some(h.map_err(csv_err)?.iter().map(str::to_string).collect()),
                None => None,
            };
            break;
        }
    }
    let header =
        header.ok_or_else(|| FlowError::Samplesheet("unable to determine header row".into()))?;

    let manifest_dir = manifest_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    let mut records = Vec::new();
    let mut index = 0;
    for row in rows {
        let row = row.map_err(csv_err)?;
        index += 1;
        let mut columns: IndexMap<String, String> = IndexMap::new();
        for (i, name) in header.iter().enumerate() {
            columns.insert(name.clone(), row.get(i).unwrap_or("").to_string());
        }
        if let Some(sample) = columns.shift_remove(COL_SAMPLE_ALT) {
            if !sample.is_empty() || !columns.contains_key(COL_SAMPLE) {
                columns.insert(COL_SAMPLE.to_string(), sample);
            }
        }
        if row.len() > header.len() {
            return Err(FlowError::Samplesheet(format!(
                "sample {} has more columns than header",
                column(&columns, COL_SAMPLE)
            )));
        }
        if columns.get(COL_PIPELINE).map(String::as_str) != Some(HANDLED_PIPELINE) {
            continue;
        }
        records.push(record_from_columns(index, columns, manifest_path, &manifest_dir));
    }
    debug!(
        rows = index,
        records = records.len(),
        manifest = %manifest_path.display(),
        "parsed samplesheet"
    );
    Ok(records)
}

fn column<'a>(columns: &'a IndexMap<String, String>, name: &str) -> &'a str {
    columns.get(name).map(|v| v.trim()).unwrap_or("")
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn record_from_columns(
    index: usize,
    columns: IndexMap<String, String>,
    manifest_path: &Path,
    manifest_dir: &Path,
) -> SampleRecord {
    let project = column(&columns, COL_PROJECT).to_string();
    let sample_id = column(&columns, COL_SAMPLE).to_string();
    SampleRecord {
        index,
        sample_dir: manifest_dir.join(&project).join(&sample_id),
        sample_name: column(&columns, COL_SAMPLE_NAME).to_string(),
        lane: non_empty(column(&columns, COL_LANE)),
        ref_genome: column(&columns, COL_REF_GENOME).to_string(),
        target: column(&columns, COL_TARGET).to_string(),
        target_name: None,
        tumor: column(&columns, COL_TUMOR).to_string(),
        normal: column(&columns, COL_NORMAL).to_string(),
        normal_path: None,
        pipeline_parameters: column(&columns, COL_PARAMETERS).to_string(),
        adapter_trim: column(&columns, COL_ADAPTER_TRIM).to_string(),
        override_table: non_empty(column(&columns, COL_OVERRIDE)).map(PathBuf::from),
        run_category: None,
        manifest_path: manifest_path.to_path_buf(),
        project,
        sample_id,
        extra: columns,
    }
}
