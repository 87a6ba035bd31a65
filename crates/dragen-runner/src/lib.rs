//! Turns sample manifest rows into resolved DRAGEN command lines.

mod cache;
mod classify;
mod command;
mod error;
mod orchestrator;
mod overlay;
mod registry;
mod resolve;
mod resources;
mod sample;
mod samplesheet;
mod workspace;

#[cfg(test)]
mod testutil;

pub use cache::{read_replay, rebase_read_files, CrossSampleCache, NormalParameters};
pub use classify::{classify_batch, classify_record, external_normal_exists, sort_for_processing};
pub use command::{argument_string, build_command, CommandStyle};
pub use error::{FlowError, Result};
pub use orchestrator::{
    apply_liquid, cnv_arguments, default_pipeline, liquid_arguments, resolve_target, sample_pon,
    FlowSettings, PipelineOrchestrator, PipelineState, RecordPlan, StageCommand,
};
pub use overlay::{OptionsOverlay, OverrideRow, STAGE_TUMOR_ALIGNMENT, STAGE_TUMOR_ANALYSIS};
pub use registry::{flow_cell_id, read_file_name, read_group_id, TemplateFamily, ValueRegistry};
pub use resolve::{
    adapter_sequence, adapter_trimming, merge_arguments, ArgumentMap, ArgumentSource,
    CompositeResolver, MissingValue, PairedVariantSource, TemplateResolver,
};
pub use resources::{
    ReferenceProfile, ResourceBundle, ResourceCatalog, Scripts, StageTemplate, TemplateValue,
};
pub use sample::{AnalysisFamily, RunCategory, SampleRecord, TumorIndicator};
pub use samplesheet::{parse_samplesheet, read_samplesheet};
pub use workspace::{
    dry_run_display, execute_command, has_already_run, prepare_sample_dirs, stage_read_files,
    write_samplesheet_columns, ExecutionOutcome,
};

use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// How a batch is driven beyond the per-record settings.
#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    pub settings: FlowSettings,
    /// Keep planning the remaining records after one fails.
    pub keep_going: bool,
    /// Run each command through this program instead of `bash -c`.
    pub base_command: Option<String>,
}

/// A record that could not be planned.
#[derive(Debug, Clone, Serialize)]
pub struct RecordFailure {
    pub index: usize,
    pub project: String,
    pub sample_id: String,
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub manifest: PathBuf,
    pub dry_run: bool,
    pub plans: Vec<RecordPlan>,
    pub failures: Vec<RecordFailure>,
    pub executions: Vec<ExecutionOutcome>,
}

impl BatchResult {
    /// `(working dir, command)` pairs that still need to run, in order.
    pub fn pending_commands(&self) -> Vec<(&Path, &str)> {
        self.plans
            .iter()
            .filter(|p| !p.already_run)
            .flat_map(|p| {
                p.commands
                    .iter()
                    .map(move |c| (p.sample_dir.as_path(), c.command.as_str()))
            })
            .collect()
    }
}

/// Processing order of a classified batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub manifest: PathBuf,
    pub records: Vec<ClassifiedRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClassifiedRecord {
    pub index: usize,
    pub project: String,
    pub sample_id: String,
    pub family: AnalysisFamily,
    pub run_category: Option<RunCategory>,
    pub normal: String,
    pub sample_dir: PathBuf,
}

/// Reads, classifies and orders a samplesheet without resolving anything.
pub fn load_classified(path: &Path) -> Result<Vec<SampleRecord>> {
    let mut records = read_samplesheet(path)?;
    classify_batch(&mut records)?;
    sort_for_processing(&mut records);
    Ok(records)
}

pub fn describe_batch(path: &Path) -> Result<BatchSummary> {
    let records = load_classified(path)?;
    let manifest = records
        .first()
        .map(|r| r.manifest_path.clone())
        .unwrap_or_else(|| path.to_path_buf());
    Ok(BatchSummary {
        manifest,
        records: records
            .iter()
            .map(|r| ClassifiedRecord {
                index: r.index,
                project: r.project.clone(),
                sample_id: r.sample_id.clone(),
                family: r.family(),
                run_category: r.run_category,
                normal: r.normal.clone(),
                sample_dir: r.sample_dir.clone(),
            })
            .collect(),
    })
}

/// Plans every record in processing order with one shared cache.
///
/// The first failing record aborts the batch unless `keep_going` is set.
pub fn plan_records(
    records: &mut [SampleRecord],
    orchestrator: &mut PipelineOrchestrator,
    keep_going: bool,
) -> Result<(Vec<RecordPlan>, Vec<RecordFailure>)> {
    let mut cache = CrossSampleCache::new();
    let mut plans = Vec::new();
    let mut failures = Vec::new();
    for record in records.iter_mut() {
        match orchestrator.plan_record(record, &mut cache) {
            Ok(Some(plan)) => plans.push(plan),
            Ok(None) => {}
            Err(err) if keep_going => {
                error!(sample = %record.label(), code = err.code(), "{}", err);
                failures.push(RecordFailure {
                    index: record.index,
                    project: record.project.clone(),
                    sample_id: record.sample_id.clone(),
                    code: err.code(),
                    message: err.to_string(),
                });
            }
            Err(err) => return Err(err),
        }
    }
    Ok((plans, failures))
}

/// Reads a samplesheet, builds every command and runs them unless dry run.
pub fn run_batch(
    path: &Path,
    catalog: ResourceCatalog,
    options: &BatchOptions,
) -> Result<BatchResult> {
    let settings = options.settings.clone();
    let dry_run = settings.dry_run;
    info!(manifest = %path.display(), dry_run, "starting batch");

    let mut records = read_samplesheet(path)?;
    prepare_sample_dirs(&records, dry_run)?;
    classify_batch(&mut records)?;
    sort_for_processing(&mut records);

    let mut orchestrator = PipelineOrchestrator::new(catalog, settings);
    let (plans, failures) = plan_records(&mut records, &mut orchestrator, options.keep_going)?;
    let mut result = BatchResult {
        manifest: records
            .first()
            .map(|r| r.manifest_path.clone())
            .unwrap_or_else(|| path.to_path_buf()),
        dry_run,
        plans,
        failures,
        executions: Vec::new(),
    };
    if dry_run {
        return Ok(result);
    }

    let mut executions = Vec::new();
    for (dir, command) in result.pending_commands() {
        executions.push(execute_command(
            command,
            options.base_command.as_deref(),
            dir,
        )?);
    }
    result.executions = executions;
    info!(
        plans = result.plans.len(),
        failures = result.failures.len(),
        executed = result.executions.len(),
        "batch finished"
    );
    Ok(result)
}
