//! Run-category assignment and processing order for a batch.

use crate::error::{FlowError, Result};
use crate::sample::{AnalysisFamily, RunCategory, SampleRecord, TumorIndicator};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Rewrites an absolute normal reference to its base name, keeping the path.
fn annotate_external_normal(record: &mut SampleRecord) {
    if !record.normal.starts_with('/') {
        return;
    }
    let trimmed = record.normal.trim_end_matches('/').to_string();
    let path = PathBuf::from(&trimmed);
    record.normal = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string();
    record.normal_path = Some(path);
}

/// True when `dir` exists and holds `<basename>.bam`.
pub fn external_normal_exists(dir: &Path) -> bool {
    if !dir.is_dir() {
        return false;
    }
    let Some(base) = dir.file_name().and_then(|s| s.to_str()) else {
        return false;
    };
    dir.join(format!("{}.bam", base)).is_file()
}

fn normal_exists(record: &SampleRecord, batch: &[SampleRecord]) -> bool {
    if let Some(dir) = record.normal_path.as_deref() {
        return external_normal_exists(dir);
    }
    batch.iter().any(|other| {
        other.index != record.index
            && other.sample_id == record.normal
            && other.project == record.project
    })
}

/// Category for one record, validated against the rest of the batch.
///
/// RNA and methylation records carry no category.
pub fn classify_record(
    record: &SampleRecord,
    batch: &[SampleRecord],
) -> Result<Option<RunCategory>> {
    if record.family() != AnalysisFamily::Dna {
        return Ok(None);
    }
    let tumor = record.tumor_indicator().ok_or_else(|| {
        FlowError::classification(format!(
            "invalid tumor value {:?} at index {}",
            record.tumor, record.index
        ))
    })?;
    if !tumor.is_tumor() {
        return Ok(Some(RunCategory::Germline));
    }
    if record.normal.is_empty() {
        if tumor == TumorIndicator::Liquid {
            return Err(FlowError::classification(format!(
                "liquid mode needs normal sample in {} at {}",
                record.sample_id, record.index
            )));
        }
        return Ok(Some(RunCategory::SomaticSingle));
    }
    if normal_exists(record, batch) {
        return Ok(Some(RunCategory::SomaticPaired));
    }
    let normal = record
        .normal_path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| record.normal.clone());
    Err(FlowError::classification(format!(
        "normal sample {} doesn't exist for {} at {}",
        normal, record.sample_id, record.index
    )))
}

/// Assigns a run category to every record, or fails without assigning any.
pub fn classify_batch(records: &mut [SampleRecord]) -> Result<()> {
    for record in records.iter_mut() {
        annotate_external_normal(record);
    }
    let mut categories = Vec::with_capacity(records.len());
    for record in records.iter() {
        let category = classify_record(record, records)?;
        debug!(
            sample = %record.sample_id,
            index = record.index,
            category = category.map(|c| c.as_str()).unwrap_or("none"),
            "classified"
        );
        categories.push(category);
    }
    for (record, category) in records.iter_mut().zip(categories) {
        record.run_category = category;
    }
    info!(records = records.len(), "assigned run categories");
    Ok(())
}

/// Moves germline records ahead of all others, keeping relative order.
///
/// Paired records resolve their normal from the cross-sample cache, which
/// only holds normals already processed in this batch.
pub fn sort_for_processing(records: &mut [SampleRecord]) {
    records.sort_by_key(|r| r.run_category != Some(RunCategory::Germline));
}
