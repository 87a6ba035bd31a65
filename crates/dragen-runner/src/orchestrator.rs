//! Per-record stage sequencing.
//!
//! Each record is routed to one pipeline state, which decides the stages it
//! runs, the template family every stage resolves with and which entries of
//! the cross-sample cache it reads or writes.

use crate::cache::{rebase_read_files, CrossSampleCache};
use crate::command::{build_command, CommandStyle};
use crate::error::{FlowError, Result};
use crate::overlay::{OptionsOverlay, STAGE_TUMOR_ALIGNMENT, STAGE_TUMOR_ANALYSIS};
use crate::registry::{output_prefix, TemplateFamily};
use crate::resolve::{
    adapter_trimming, merge_arguments, ArgumentMap, ArgumentSource, CompositeResolver,
    PairedVariantSource, TemplateResolver,
};
use crate::resources::{ReferenceProfile, ResourceBundle, ResourceCatalog, Scripts};
use crate::sample::{AnalysisFamily, RunCategory, SampleRecord, TumorIndicator};
use crate::workspace::{has_already_run, stage_read_files, write_samplesheet_columns, LOGS_DIR};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const RNA_STAGE: &str = "rna";
pub const CNV_PANEL_COPY: &str = "cnv_pon.txt";
pub const NORMAL_COUNTS_SUFFIX: &str = ".target.counts.gc-corrected.gz";

const UMI_SOLID: &str = "vc-enable-umi-solid";
const UMI_LIQUID: &str = "vc-enable-umi-liquid";
const SV_LIQUID_MODE: &str = "sv-enable-liquid-tumor-mode";
const VC_LIQUID_MODE: &str = "vc-enable-liquid-tumor-mode";
const CONTAMINATION_TOLERANCE: &str = "vc-tin-contam-tolerance";

/// Runtime switches shared by every record of a batch.
#[derive(Debug, Clone, Serialize)]
pub struct FlowSettings {
    /// Resolve and validate everything, mutate nothing.
    pub dry_run: bool,
    pub disable_scripts: bool,
    /// Move read files into sample directories while resolving.
    pub stage_reads: bool,
    pub command_style: CommandStyle,
}

impl Default for FlowSettings {
    fn default() -> Self {
        Self {
            dry_run: false,
            disable_scripts: false,
            stage_reads: true,
            command_style: CommandStyle::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Germline,
    SomaticSingle,
    SomaticPaired,
    Rna,
    Methylation,
    Unclassified,
}

impl PipelineState {
    pub fn for_record(record: &SampleRecord) -> Self {
        match record.family() {
            AnalysisFamily::Rna => PipelineState::Rna,
            AnalysisFamily::Methylation => PipelineState::Methylation,
            AnalysisFamily::Dna => match record.run_category {
                Some(RunCategory::Germline) => PipelineState::Germline,
                Some(RunCategory::SomaticSingle) => PipelineState::SomaticSingle,
                Some(RunCategory::SomaticPaired) => PipelineState::SomaticPaired,
                None => PipelineState::Unclassified,
            },
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Germline => "germline",
            PipelineState::SomaticSingle => "somatic_single",
            PipelineState::SomaticPaired => "somatic_paired",
            PipelineState::Rna => "rna",
            PipelineState::Methylation => "methylation",
            PipelineState::Unclassified => "unclassified",
        }
    }
}

/// One resolved stage and the command line built from it.
#[derive(Debug, Clone, Serialize)]
pub struct StageCommand {
    pub stage: String,
    pub arguments: ArgumentMap,
    pub command: String,
}

/// Everything planned for one record, in execution order.
#[derive(Debug, Clone, Serialize)]
pub struct RecordPlan {
    pub index: usize,
    pub project: String,
    pub sample_id: String,
    pub sample_dir: PathBuf,
    pub state: PipelineState,
    pub commands: Vec<StageCommand>,
    /// Commands were built but a previous invocation already ran them.
    pub already_run: bool,
}

/// An empty family parameter becomes `exome` with a target, `genome` without.
pub fn default_pipeline(record: &mut SampleRecord) {
    if record.pipeline_parameters.is_empty() {
        record.pipeline_parameters = if record.target.is_empty() {
            "genome".to_string()
        } else {
            "exome".to_string()
        };
    }
}

/// Rewrites a named target to its path, remembering the name.
pub fn resolve_target(record: &mut SampleRecord, profile: &ReferenceProfile) -> Result<()> {
    if record.target.is_empty() {
        if record.pipeline_parameters == "exome" || record.is_umi() {
            return Err(FlowError::config(format!(
                "no target defined for {} type in {}",
                record.pipeline_parameters, record.sample_id
            )));
        }
        return Ok(());
    }
    if record.target.starts_with('/') || record.target_name.is_some() {
        return Ok(());
    }
    let path = profile
        .target_path(&record.ref_genome, &record.target)
        .ok_or_else(|| {
            FlowError::config(format!(
                "target {:?} not present in resources for genome {}",
                record.target, record.ref_genome
            ))
        })?
        .to_string();
    record.target_name = Some(std::mem::replace(&mut record.target, path));
    Ok(())
}

/// Panel-of-normals arguments when the named target has a panel.
pub fn cnv_arguments(record: &SampleRecord, profile: &ReferenceProfile) -> Option<ArgumentMap> {
    let name = record.target_name.as_deref()?;
    let panel = profile.cnv_panel(&record.ref_genome, name)?;
    let mut arguments = ArgumentMap::new();
    arguments.insert("cnv-normals-list".to_string(), panel.to_string());
    arguments.insert("cnv-target-bed".to_string(), record.target.clone());
    arguments.insert("enable-cnv".to_string(), "true".to_string());
    Some(arguments)
}

/// Points `cnv-normals-list` at a per-sample copy of the panel with the
/// normal's count file appended. The copy is skipped in a dry run.
pub fn sample_pon(
    arguments: &mut ArgumentMap,
    sample_dir: &Path,
    normal_prefix: &str,
    dry_run: bool,
) -> Result<()> {
    let Some(panel) = arguments.get("cnv-normals-list").map(PathBuf::from) else {
        return Ok(());
    };
    if !panel.is_file() {
        return Err(FlowError::io(
            &panel,
            std::io::Error::new(std::io::ErrorKind::NotFound, "panel of normals list missing"),
        ));
    }
    let copy = sample_dir.join(LOGS_DIR).join(CNV_PANEL_COPY);
    if !dry_run {
        let mut contents = fs::read_to_string(&panel).map_err(|e| FlowError::io(&panel, e))?;
        if !contents.is_empty() && !contents.ends_with('\n') {
            contents.push('\n');
        }
        contents.push_str(&format!("{}{}\n", normal_prefix, NORMAL_COUNTS_SUFFIX));
        let logs = sample_dir.join(LOGS_DIR);
        fs::create_dir_all(&logs).map_err(|e| FlowError::io(&logs, e))?;
        fs::write(&copy, contents).map_err(|e| FlowError::io(&copy, e))?;
    }
    arguments.insert(
        "cnv-normals-list".to_string(),
        copy.to_string_lossy().to_string(),
    );
    Ok(())
}

/// Liquid-tumor and contamination-tolerance arguments for a tumor value.
pub fn liquid_arguments(indicator: &TumorIndicator) -> ArgumentMap {
    let mut arguments = ArgumentMap::new();
    match indicator {
        TumorIndicator::Liquid => {
            arguments.insert(SV_LIQUID_MODE.to_string(), "true".to_string());
        }
        TumorIndicator::Contamination(tolerance) => {
            arguments.insert(SV_LIQUID_MODE.to_string(), "true".to_string());
            arguments.insert(VC_LIQUID_MODE.to_string(), "true".to_string());
            arguments.insert(CONTAMINATION_TOLERANCE.to_string(), tolerance.clone());
        }
        TumorIndicator::NotTumor | TumorIndicator::Tumor => {}
    }
    arguments
}

/// Adds liquid arguments. UMI stages switch their solid flag to the UMI
/// liquid flag instead of the generic liquid mode.
pub fn apply_liquid(arguments: &mut ArgumentMap, indicator: &TumorIndicator, umi: bool) {
    let extra = liquid_arguments(indicator);
    if extra.is_empty() {
        return;
    }
    let umi_stage =
        umi && (arguments.contains_key(UMI_SOLID) || arguments.contains_key(UMI_LIQUID));
    for (key, value) in extra {
        if umi_stage && key == VC_LIQUID_MODE {
            continue;
        }
        arguments.insert(key, value);
    }
    if umi_stage {
        arguments.shift_remove(UMI_SOLID);
        arguments.insert(UMI_LIQUID.to_string(), "true".to_string());
    }
}

/// Builds the command plan of each record against the loaded resources.
#[derive(Debug)]
pub struct PipelineOrchestrator {
    catalog: ResourceCatalog,
    settings: FlowSettings,
}

impl PipelineOrchestrator {
    pub fn new(catalog: ResourceCatalog, settings: FlowSettings) -> Self {
        Self { catalog, settings }
    }

    /// Resolves every stage of `record`. Unclassified records yield `None`.
    pub fn plan_record(
        &mut self,
        record: &mut SampleRecord,
        cache: &mut CrossSampleCache,
    ) -> Result<Option<RecordPlan>> {
        let state = PipelineState::for_record(record);
        if state == PipelineState::Unclassified {
            info!(
                sample = %record.label(),
                "no known pipeline run type, skipping"
            );
            return Ok(None);
        }
        let family = record.family();
        let bundle = self.catalog.bundle(family)?;

        write_samplesheet_columns(record, &bundle.samplesheet)?;
        if family != AnalysisFamily::Rna {
            resolve_target(record, &bundle.reference)?;
        }
        if family == AnalysisFamily::Dna {
            default_pipeline(record);
        }
        let overlay = OptionsOverlay::load_optional(record.override_table.as_deref())?;
        let scripts = if self.settings.disable_scripts {
            None
        } else {
            bundle.scripts.as_ref()
        };

        let planner = StagePlanner {
            record: &*record,
            bundle: bundle.as_ref(),
            overlay: &overlay,
            settings: &self.settings,
            scripts,
        };
        info!(
            sample = %record.label(),
            state = state.as_str(),
            pipeline = %record.pipeline_parameters,
            "planning record"
        );
        let commands = match state {
            PipelineState::Germline => planner.germline(cache)?,
            PipelineState::SomaticSingle => planner.somatic_single()?,
            PipelineState::SomaticPaired if record.is_umi() => planner.umi_paired(cache)?,
            PipelineState::SomaticPaired => planner.combined_paired(cache)?,
            PipelineState::Rna => planner.single_stage(TemplateFamily::Rna, RNA_STAGE)?,
            PipelineState::Methylation => {
                planner.single_stage(TemplateFamily::Methylation, &record.pipeline_parameters)?
            }
            PipelineState::Unclassified => Vec::new(),
        };

        let already_run = has_already_run(&record.sample_dir)?;
        if already_run {
            info!(dir = %record.sample_dir.display(), "already executed, commands will not run");
        }
        Ok(Some(RecordPlan {
            index: record.index,
            project: record.project.clone(),
            sample_id: record.sample_id.clone(),
            sample_dir: record.sample_dir.clone(),
            state,
            commands,
            already_run,
        }))
    }
}

/// Stage building for one record.
struct StagePlanner<'a> {
    record: &'a SampleRecord,
    bundle: &'a ResourceBundle,
    overlay: &'a OptionsOverlay,
    settings: &'a FlowSettings,
    scripts: Option<&'a Scripts>,
}

impl<'a> StagePlanner<'a> {
    fn tumor_indicator(&self) -> Result<TumorIndicator> {
        self.record.tumor_indicator().ok_or_else(|| {
            FlowError::classification(format!(
                "invalid tumor value {:?} at index {}",
                self.record.tumor, self.record.index
            ))
        })
    }

    fn stage_name(&self, step: &str) -> String {
        format!("{}_{}", self.record.pipeline_parameters, step)
    }

    fn stage_reads(&self, resolver: &TemplateResolver<'_>) -> Result<()> {
        if !self.settings.stage_reads {
            return Ok(());
        }
        stage_read_files(
            self.record,
            &resolver.registry().read_files(),
            self.settings.dry_run,
        )
    }

    /// Template resolution followed by adapter trimming.
    fn trimmed_stage(&self, family: TemplateFamily, stage: &str) -> Result<ArgumentMap> {
        let resolver = TemplateResolver::new(family, self.record, self.bundle, stage)?;
        self.stage_reads(&resolver)?;
        let base = resolver.resolve()?;
        let trim = adapter_trimming(
            &self.bundle.reference,
            self.record,
            base.get("read-trimmers").map(String::as_str),
        )?;
        Ok(merge_arguments([base, trim]))
    }

    /// Template resolution with the UMI read layout; no adapter trimming.
    fn umi_stage(&self, stage: &str, is_tumor: bool) -> Result<ArgumentMap> {
        let mut resolver =
            TemplateResolver::new(TemplateFamily::DnaBase, self.record, self.bundle, stage)?;
        resolver.registry_mut().apply_umi(self.record, is_tumor);
        self.stage_reads(&resolver)?;
        resolver.resolve()
    }

    /// Single-sample DNA stage: UMI layout, or trimming plus CNV arguments.
    fn dna_stage(&self, stage: &str, is_tumor: bool) -> Result<ArgumentMap> {
        if self.record.is_umi() {
            return self.umi_stage(stage, is_tumor);
        }
        let mut arguments = self.trimmed_stage(TemplateFamily::DnaBase, stage)?;
        if let Some(cnv) = cnv_arguments(self.record, &self.bundle.reference) {
            arguments.extend(cnv);
        }
        Ok(arguments)
    }

    fn finish(
        &self,
        stage: &str,
        mut arguments: ArgumentMap,
        filters: &[&str],
        suffix: Option<&str>,
    ) -> StageCommand {
        self.overlay.apply_stages(&mut arguments, filters);
        let command = build_command(
            &self.settings.command_style,
            &arguments,
            &self.record.sample_name,
            suffix,
            self.scripts,
        );
        debug!(sample = %self.record.sample_id, stage, "resolved stage");
        StageCommand {
            stage: stage.to_string(),
            arguments,
            command,
        }
    }

    /// `../<sample>/<prefix>`: where this record's outputs sit relative to a
    /// sibling sample directory.
    fn relative_output(&self, arguments: &ArgumentMap) -> String {
        let prefix = arguments
            .get("output-file-prefix")
            .filter(|p| !p.is_empty())
            .cloned()
            .unwrap_or_else(|| output_prefix(self.record));
        format!("../{}/{}", self.record.sample_id, prefix)
    }

    /// Registers an externally supplied normal's location, returning its key.
    fn normal_key(&self, cache: &mut CrossSampleCache) -> String {
        let key = self.record.normal_cache_key();
        if let Some(path) = self.record.normal_path.as_deref() {
            cache.record_output(
                key.clone(),
                path.join(&self.record.normal).to_string_lossy().to_string(),
            );
        }
        key
    }

    fn germline(&self, cache: &mut CrossSampleCache) -> Result<Vec<StageCommand>> {
        let stage = self.stage_name("normal_pipeline");
        info!(sample = %self.record.sample_id, stage = %stage, "germline: normal pipeline");
        let arguments = self.dna_stage(&stage, false)?;
        let command = self.finish(&stage, arguments, &[], None);

        let relative = self.relative_output(&command.arguments);
        cache.record_arguments(
            self.record.cache_key(),
            rebase_read_files(&command.arguments, &relative),
        );
        cache.record_output(self.record.cache_key(), relative);
        Ok(vec![command])
    }

    fn somatic_single(&self) -> Result<Vec<StageCommand>> {
        let stage = self.stage_name("tumor_pipeline");
        info!(sample = %self.record.sample_id, stage = %stage, "somatic_single: tumor pipeline");
        let mut arguments = self.dna_stage(&stage, true)?;
        apply_liquid(&mut arguments, &self.tumor_indicator()?, self.record.is_umi());
        Ok(vec![self.finish(&stage, arguments, &[], None)])
    }

    /// Tumor alignment, then a paired variant call over the two alignments.
    fn umi_paired(&self, cache: &mut CrossSampleCache) -> Result<Vec<StageCommand>> {
        let normal_key = self.normal_key(cache);
        let alignment_stage = self.stage_name("tumor_alignment");
        info!(sample = %self.record.sample_id, stage = %alignment_stage, "somatic_paired: umi alignment");
        let alignment = self.umi_stage(&alignment_stage, true)?;
        let alignment = self.finish(
            &alignment_stage,
            alignment,
            &[STAGE_TUMOR_ALIGNMENT],
            Some("alignment"),
        );
        cache.record_output(
            self.record.cache_key(),
            self.relative_output(&alignment.arguments),
        );

        let variant_stage = self.stage_name("paired_variant_call");
        info!(sample = %self.record.sample_id, stage = %variant_stage, "somatic_paired: paired variant call");
        let normal_prefix = cache.require_output_prefix(&normal_key)?;
        let base = TemplateResolver::new(
            TemplateFamily::PairedVariant,
            self.record,
            self.bundle,
            variant_stage.as_str(),
        )?;
        let template = base.template()?;
        let derived = PairedVariantSource::new(
            &alignment.arguments,
            normal_prefix,
            &self.record.normal,
            &self.record.target,
        )?
        .with_template_tokens(template);
        let mut arguments = CompositeResolver::new()
            .add(ArgumentSource::Template(base))
            .add(ArgumentSource::PairedVariant(derived))
            .resolve()?;
        apply_liquid(&mut arguments, &self.tumor_indicator()?, true);
        let analysis = self.finish(
            &variant_stage,
            arguments,
            &[STAGE_TUMOR_ANALYSIS],
            Some("analysis"),
        );
        Ok(vec![alignment, analysis])
    }

    /// One combined tumor/normal stage with the normal's reads folded in.
    /// It covers both alignment and analysis, so both override qualifiers
    /// apply, analysis last.
    fn combined_paired(&self, cache: &mut CrossSampleCache) -> Result<Vec<StageCommand>> {
        let normal_key = self.normal_key(cache);
        let stage = self.stage_name("tumor_normal_pipeline");
        info!(sample = %self.record.sample_id, stage = %stage, normal = %normal_key, "somatic_paired: tumor/normal pipeline");
        let normal = cache.lookup_normal_parameters(&normal_key, &self.record.sample_dir)?;
        let base = self.trimmed_stage(TemplateFamily::DnaBase, &stage)?;
        let mut arguments = CompositeResolver::new()
            .add(ArgumentSource::Fixed(base))
            .add(ArgumentSource::Normal(normal))
            .resolve()?;
        if let Some(cnv) = cnv_arguments(self.record, &self.bundle.reference) {
            arguments.extend(cnv);
            let normal_prefix = cache.require_output_prefix(&normal_key)?;
            sample_pon(
                &mut arguments,
                &self.record.sample_dir,
                normal_prefix,
                self.settings.dry_run,
            )?;
        }
        apply_liquid(&mut arguments, &self.tumor_indicator()?, false);
        Ok(vec![self.finish(
            &stage,
            arguments,
            &[STAGE_TUMOR_ALIGNMENT, STAGE_TUMOR_ANALYSIS],
            None,
        )])
    }

    fn single_stage(&self, family: TemplateFamily, stage: &str) -> Result<Vec<StageCommand>> {
        info!(sample = %self.record.sample_id, stage, "executing single stage pipeline");
        let arguments = self.trimmed_stage(family, stage)?;
        Ok(vec![self.finish(stage, arguments, &[], None)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{classify_batch, sort_for_processing};
    use crate::testutil::{dna_bundle, methylation_bundle, rna_bundle, sample, TRUSEQ};
    use chrono::Utc;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "dragenflow_orchestrator_{}_{}_{}",
            name,
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        fs::create_dir_all(&dir).expect("scratch dir");
        dir
    }

    fn catalog_with(dna: ResourceBundle) -> ResourceCatalog {
        ResourceCatalog::default()
            .with_bundle(AnalysisFamily::Dna, dna)
            .with_bundle(AnalysisFamily::Rna, rna_bundle())
            .with_bundle(AnalysisFamily::Methylation, methylation_bundle())
    }

    fn dry_settings() -> FlowSettings {
        FlowSettings {
            dry_run: true,
            stage_reads: false,
            ..Default::default()
        }
    }

    fn orchestrator() -> PipelineOrchestrator {
        PipelineOrchestrator::new(catalog_with(dna_bundle()), dry_settings())
    }

    fn arg<'a>(command: &'a StageCommand, key: &str) -> Option<&'a str> {
        command.arguments.get(key).map(String::as_str)
    }

    fn classified(mut records: Vec<SampleRecord>) -> Vec<SampleRecord> {
        classify_batch(&mut records).expect("classify");
        sort_for_processing(&mut records);
        records
    }

    #[test]
    fn germline_exome_trims_adds_cnv_and_caches_the_normal() {
        let mut orchestrator = orchestrator();
        let mut cache = CrossSampleCache::new();
        let mut record = sample(1, "SampleA", "no", "");
        record.target = "exome_v1".to_string();
        record.adapter_trim = "truseq".to_string();
        record.run_category = Some(RunCategory::Germline);

        let plan = orchestrator
            .plan_record(&mut record, &mut cache)
            .expect("plan")
            .expect("classified");
        assert_eq!(plan.state, PipelineState::Germline);
        assert_eq!(record.pipeline_parameters, "exome");
        assert_eq!(record.target, "/beds/exome_v1.bed");
        assert_eq!(record.target_name.as_deref(), Some("exome_v1"));

        let command = &plan.commands[0];
        assert_eq!(command.stage, "exome_normal_pipeline");
        assert_eq!(arg(command, "read-trimmers"), Some("polyg,adapter"));
        assert_eq!(arg(command, "trim-adapter-read1"), Some(TRUSEQ));
        assert_eq!(arg(command, "cnv-normals-list"), Some("/pon/exome_v1_pon.txt"));
        assert_eq!(arg(command, "cnv-target-bed"), Some("/beds/exome_v1.bed"));
        assert_eq!(arg(command, "qc-coverage-region-1"), Some("/beds/exome_v1.bed"));
        assert!(command
            .command
            .starts_with("grun.py -n dragen-SampleA -L logs -q dragen.q -c 'source /opt/pre.sh\ndragen --ref-dir /ref/hg38"));

        assert_eq!(cache.output_prefix("ProjectX/SampleA"), Some("../SampleA/SampleA"));
        let cached = cache.arguments("ProjectX/SampleA").expect("cached arguments");
        assert_eq!(
            cached.get("fastq-file1").map(String::as_str),
            Some("../SampleA/SampleA_S1_R1_001.fastq.gz")
        );
    }

    #[test]
    fn germline_processed_first_feeds_the_paired_record() {
        let mut orchestrator = orchestrator();
        let mut cache = CrossSampleCache::new();
        let mut tumor = sample(1, "SampleB", "yes", "SampleA");
        let mut normal = sample(2, "SampleA", "", "");
        for record in [&mut tumor, &mut normal] {
            record.pipeline_parameters = "umi".to_string();
            record.target = "umi_panel".to_string();
        }
        let mut records = classified(vec![tumor, normal]);
        assert_eq!(records[0].sample_id, "SampleA");
        assert_eq!(records[1].sample_id, "SampleB");

        let mut plans = Vec::new();
        for record in records.iter_mut() {
            plans.push(
                orchestrator
                    .plan_record(record, &mut cache)
                    .expect("plan")
                    .expect("classified"),
            );
        }
        let normal_stage = &plans[0].commands[0];
        assert_eq!(normal_stage.stage, "umi_normal_pipeline");
        assert_eq!(arg(normal_stage, "fastq-file2"), Some("SampleA_S2_R3_001.fastq.gz"));
        assert_eq!(arg(normal_stage, "umi-fastq"), Some("SampleA_S2_R2_001.fastq.gz"));

        let paired = &plans[1];
        assert_eq!(paired.state, PipelineState::SomaticPaired);
        let stages: Vec<&str> = paired.commands.iter().map(|c| c.stage.as_str()).collect();
        assert_eq!(stages, vec!["umi_tumor_alignment", "umi_paired_variant_call"]);
        let alignment = &paired.commands[0];
        assert_eq!(arg(alignment, "tumor-fastq2"), Some("SampleB_S1_R3_001.fastq.gz"));
        assert!(alignment.command.contains("-n dragen-SampleB-alignment "));

        let analysis = &paired.commands[1];
        assert_eq!(arg(analysis, "bam-input"), Some("../SampleA/SampleA.bam"));
        assert_eq!(arg(analysis, "tumor-bam-input"), Some("SampleB_tumor.bam"));
        assert_eq!(arg(analysis, "output-file-prefix"), Some("SampleB.tn"));
        assert_eq!(arg(analysis, "vc-normal-sample-name"), Some("SampleA"));
        assert_eq!(arg(analysis, "vc-snp-error-cal-bed"), Some("/beds/umi_panel.bed"));
        assert!(analysis.command.contains("-n dragen-SampleB-analysis "));
        assert_eq!(cache.output_prefix("ProjectX/SampleB"), Some("../SampleB/SampleB"));
    }

    #[test]
    fn paired_before_its_normal_is_unresolved() {
        let mut orchestrator = orchestrator();
        let mut cache = CrossSampleCache::new();
        let mut tumor = sample(1, "SampleB", "yes", "SampleA");
        tumor.target = "/beds/exome_v1.bed".to_string();
        tumor.run_category = Some(RunCategory::SomaticPaired);
        let err = orchestrator
            .plan_record(&mut tumor, &mut cache)
            .expect_err("normal not cached");
        assert!(matches!(err, FlowError::DependencyUnresolved(_)), "{}", err);
    }

    #[test]
    fn combined_paired_folds_in_normal_and_extends_the_panel() {
        let root = scratch("pon");
        let panel = root.join("exome_v1_pon.txt");
        fs::write(&panel, "/pon/n1.counts.gz\n/pon/n2.counts.gz").expect("panel");
        let mut bundle = dna_bundle();
        bundle
            .reference
            .cnv_panels
            .get_mut("hg38")
            .expect("hg38 panels")
            .insert("exome_v1".to_string(), panel.to_string_lossy().to_string());

        for dry_run in [true, false] {
            let settings = FlowSettings {
                dry_run,
                stage_reads: false,
                disable_scripts: true,
                ..Default::default()
            };
            let mut orchestrator = PipelineOrchestrator::new(catalog_with(bundle.clone()), settings);
            let mut cache = CrossSampleCache::new();
            let mut normal = sample(1, "SampleA", "", "");
            let mut tumor = sample(2, "SampleB", "0.1", "SampleA");
            let run_dir = root.join(format!("dry_{}", dry_run));
            for record in [&mut normal, &mut tumor] {
                record.target = "exome_v1".to_string();
                record.sample_dir = run_dir.join(&record.sample_id);
            }
            let mut records = classified(vec![tumor, normal]);
            orchestrator
                .plan_record(&mut records[0], &mut cache)
                .expect("normal plan");
            let plan = orchestrator
                .plan_record(&mut records[1], &mut cache)
                .expect("paired plan")
                .expect("classified");

            assert_eq!(plan.commands.len(), 1);
            let command = &plan.commands[0];
            assert_eq!(command.stage, "exome_tumor_normal_pipeline");
            assert_eq!(arg(command, "fastq-file1"), Some("../SampleA/SampleA_S1_R1_001.fastq.gz"));
            assert_eq!(arg(command, "RGSM"), Some("SampleA"));
            assert_eq!(arg(command, "RGID"), Some("FCX-1"));
            assert_eq!(arg(command, "tumor-fastq1"), Some("SampleB_S2_R1_001.fastq.gz"));
            assert_eq!(arg(command, "RGSM-tumor"), Some("SampleB"));
            assert_eq!(arg(command, "vc-tin-contam-tolerance"), Some("0.1"));
            assert_eq!(arg(command, "vc-enable-liquid-tumor-mode"), Some("true"));
            assert!(command.command.contains("-n dragen-SampleB -L"));
            assert!(!command.command.contains("source /opt/pre.sh"));

            let copy = run_dir.join("SampleB").join(LOGS_DIR).join(CNV_PANEL_COPY);
            assert_eq!(
                arg(command, "cnv-normals-list").map(PathBuf::from),
                Some(copy.clone())
            );
            if dry_run {
                assert!(!copy.exists());
            } else {
                let text = fs::read_to_string(&copy).expect("panel copy");
                assert_eq!(
                    text,
                    "/pon/n1.counts.gz\n/pon/n2.counts.gz\n../SampleA/SampleA.target.counts.gc-corrected.gz\n"
                );
            }
        }
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn external_normal_is_recovered_from_its_replay_file() {
        let root = scratch("external");
        let normal_dir = root.join("NormalX");
        fs::create_dir_all(&normal_dir).expect("normal dir");
        fs::write(normal_dir.join("NormalX.bam"), b"").expect("bam");
        fs::write(
            normal_dir.join("NormalX-replay.json"),
            r#"{"dragen_config":[
                {"name":"fastq-file1","value":"NormalX_S4_R1_001.fastq.gz"},
                {"name":"fastq-file2","value":"NormalX_S4_R2_001.fastq.gz"},
                {"name":"RGID","value":"FCY-4"},
                {"name":"RGSM","value":"NormalX"}]}"#,
        )
        .expect("replay");

        let mut orchestrator = orchestrator();
        let mut cache = CrossSampleCache::new();
        let mut tumor = sample(1, "SampleB", "yes", &format!("{}/", normal_dir.display()));
        tumor.target = "/beds/exome_v1.bed".to_string();
        let mut records = classified(vec![tumor]);
        assert_eq!(records[0].normal, "NormalX");

        let plan = orchestrator
            .plan_record(&mut records[0], &mut cache)
            .expect("plan")
            .expect("classified");
        let command = &plan.commands[0];
        let expected_read = normal_dir.join("NormalX_S4_R1_001.fastq.gz");
        assert_eq!(
            arg(command, "fastq-file1").map(PathBuf::from),
            Some(expected_read)
        );
        assert_eq!(arg(command, "RGID"), Some("FCY-4"));
        // absolute target: no panel of normals
        assert_eq!(arg(command, "cnv-normals-list"), None);
        assert!(cache.output_prefix("ProjectX/NormalX/EXTERNAL").is_some());
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn umi_liquid_tumor_switches_to_umi_liquid_flag() {
        let mut orchestrator = orchestrator();
        let mut cache = CrossSampleCache::new();
        let mut normal = sample(1, "SampleA", "", "");
        let mut tumor = sample(2, "SampleB", "liquid", "SampleA");
        for record in [&mut normal, &mut tumor] {
            record.pipeline_parameters = "umi".to_string();
            record.target = "/beds/umi_panel.bed".to_string();
        }
        let mut records = classified(vec![normal, tumor]);
        let mut plans = Vec::new();
        for record in records.iter_mut() {
            plans.push(orchestrator.plan_record(record, &mut cache).expect("plan"));
        }
        let paired = plans[1].as_ref().expect("paired plan");
        let alignment = &paired.commands[0];
        assert_eq!(arg(alignment, "sv-enable-liquid-tumor-mode"), None);
        assert_eq!(arg(alignment, "vc-enable-liquid-tumor-mode"), None);

        let analysis = &paired.commands[1];
        assert_eq!(arg(analysis, "vc-enable-umi-solid"), None);
        assert_eq!(arg(analysis, "vc-enable-umi-liquid"), Some("true"));
        assert_eq!(arg(analysis, "sv-enable-liquid-tumor-mode"), Some("true"));
        assert_eq!(arg(analysis, "vc-enable-liquid-tumor-mode"), None);
    }

    #[test]
    fn overlay_rows_follow_their_stage_qualifier() {
        let root = scratch("overlay");
        let table = root.join("overrides.tsv");
        fs::write(
            &table,
            "dragen option\toption value\toption specifier\n\
             enable-cnv\tfalse\tTUMOR_ALIGNMENT\n\
             vc-min-reads\t4\tTUMOR_ANALYSIS\n\
             enable-sv\tfalse\t\n",
        )
        .expect("table");
        let mut orchestrator = orchestrator();
        let mut cache = CrossSampleCache::new();
        let mut normal = sample(1, "SampleA", "", "");
        let mut tumor = sample(2, "SampleB", "yes", "SampleA");
        for record in [&mut normal, &mut tumor] {
            record.pipeline_parameters = "umi".to_string();
            record.target = "/beds/umi_panel.bed".to_string();
        }
        tumor.override_table = Some(table);
        let mut records = classified(vec![normal, tumor]);
        orchestrator
            .plan_record(&mut records[0], &mut cache)
            .expect("normal");
        let plan = orchestrator
            .plan_record(&mut records[1], &mut cache)
            .expect("paired")
            .expect("classified");
        let (alignment, analysis) = (&plan.commands[0], &plan.commands[1]);
        assert_eq!(arg(alignment, "enable-cnv"), Some("false"));
        assert_eq!(arg(alignment, "vc-min-reads"), None);
        assert_eq!(arg(alignment, "enable-sv"), Some("false"));
        assert_eq!(arg(analysis, "enable-cnv"), None);
        assert_eq!(arg(analysis, "vc-min-reads"), Some("4"));
        assert_eq!(arg(analysis, "enable-sv"), Some("false"));
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn combined_paired_takes_alignment_then_analysis_overrides() {
        let root = scratch("combined_overlay");
        let table = root.join("overrides.tsv");
        fs::write(
            &table,
            "dragen option\toption value\toption specifier\n\
             enable-sv\tfalse\tTUMOR_ALIGNMENT\n\
             vc-min-reads\t2\tTUMOR_ALIGNMENT\n\
             vc-min-reads\t4\tTUMOR_ANALYSIS\n",
        )
        .expect("table");
        let mut orchestrator = orchestrator();
        let mut cache = CrossSampleCache::new();
        let mut normal = sample(1, "SampleA", "", "");
        let mut tumor = sample(2, "SampleB", "liquid", "SampleA");
        for record in [&mut normal, &mut tumor] {
            record.target = "/beds/exome_v1.bed".to_string();
        }
        tumor.override_table = Some(table);
        let mut records = classified(vec![tumor, normal]);
        orchestrator
            .plan_record(&mut records[0], &mut cache)
            .expect("normal");
        let plan = orchestrator
            .plan_record(&mut records[1], &mut cache)
            .expect("paired")
            .expect("classified");
        let command = &plan.commands[0];
        assert_eq!(command.stage, "exome_tumor_normal_pipeline");
        assert_eq!(arg(command, "enable-sv"), Some("false"));
        assert_eq!(arg(command, "vc-min-reads"), Some("4"));
        assert_eq!(arg(command, "sv-enable-liquid-tumor-mode"), Some("true"));
        assert_eq!(arg(command, "vc-enable-liquid-tumor-mode"), None);
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn somatic_single_runs_the_tumor_pipeline_without_caching() {
        let mut orchestrator = orchestrator();
        let mut cache = CrossSampleCache::new();
        let mut record = sample(3, "SampleC", "yes", "");
        record.run_category = Some(RunCategory::SomaticSingle);
        let plan = orchestrator
            .plan_record(&mut record, &mut cache)
            .expect("plan")
            .expect("classified");
        let command = &plan.commands[0];
        assert_eq!(record.pipeline_parameters, "genome");
        assert_eq!(command.stage, "genome_tumor_pipeline");
        assert_eq!(arg(command, "sv-enable-liquid-tumor-mode"), None);
        assert!(cache.output_prefix("ProjectX/SampleC").is_none());

        let mut record = sample(4, "SampleD", "0.2", "");
        record.target = "exome_v1".to_string();
        record.run_category = Some(RunCategory::SomaticSingle);
        let plan = orchestrator
            .plan_record(&mut record, &mut cache)
            .expect("plan")
            .expect("classified");
        let command = &plan.commands[0];
        assert_eq!(command.stage, "exome_tumor_pipeline");
        assert_eq!(arg(command, "vc-tin-contam-tolerance"), Some("0.2"));
        assert_eq!(arg(command, "cnv-population-b-allele-vcf"), Some("/ref/hg38/pop_af.vcf.gz"));
        assert_eq!(arg(command, "enable-cnv"), Some("true"));
    }

    #[test]
    fn genome_default_without_target() {
        let mut orchestrator = orchestrator();
        let mut cache = CrossSampleCache::new();
        let mut record = sample(1, "SampleG", "", "");
        record.run_category = Some(RunCategory::Germline);
        let plan = orchestrator
            .plan_record(&mut record, &mut cache)
            .expect("plan")
            .expect("classified");
        assert_eq!(plan.commands[0].stage, "genome_normal_pipeline");
        assert_eq!(arg(&plan.commands[0], "cnv-normals-list"), None);
    }

    #[test]
    fn target_problems_are_configuration_errors() {
        let mut orchestrator = orchestrator();
        let mut cache = CrossSampleCache::new();

        let mut record = sample(1, "SampleA", "", "");
        record.pipeline_parameters = "exome".to_string();
        record.run_category = Some(RunCategory::Germline);
        let err = orchestrator
            .plan_record(&mut record, &mut cache)
            .expect_err("exome needs a target");
        assert!(matches!(err, FlowError::Configuration(_)));

        let mut record = sample(1, "SampleA", "", "");
        record.target = "no_such_panel".to_string();
        record.run_category = Some(RunCategory::Germline);
        let err = orchestrator
            .plan_record(&mut record, &mut cache)
            .expect_err("unknown named target");
        assert!(matches!(err, FlowError::Configuration(_)));
    }

    #[test]
    fn rna_and_methylation_use_their_own_resources() {
        let mut orchestrator = orchestrator();
        let mut cache = CrossSampleCache::new();

        let mut rna = sample(5, "SampleR", "", "");
        rna.pipeline_parameters = "rna".to_string();
        rna.adapter_trim = "truseq".to_string();
        let plan = orchestrator
            .plan_record(&mut rna, &mut cache)
            .expect("rna")
            .expect("rna plan");
        assert_eq!(plan.state, PipelineState::Rna);
        let command = &plan.commands[0];
        assert_eq!(command.stage, "rna");
        assert_eq!(arg(command, "annotation-file"), Some("/ref/hg38/genes.gtf"));
        assert_eq!(arg(command, "rrna-filter-contig"), Some("chrM,chrUn_GL000220v1"));
        assert_eq!(arg(command, "read-trimmers"), Some("adapter"));

        let mut met = sample(6, "SampleM", "", "");
        met.pipeline_parameters = "methylation".to_string();
        met.target = "meth_panel".to_string();
        let plan = orchestrator
            .plan_record(&mut met, &mut cache)
            .expect("methylation")
            .expect("methylation plan");
        let command = &plan.commands[0];
        assert_eq!(command.stage, "methylation");
        assert_eq!(arg(command, "qc-coverage-region-1"), Some("/beds/meth_panel.bed"));
        assert_eq!(arg(command, "RGID"), Some("FCX-6"));
    }

    #[test]
    fn unclassified_dna_records_are_skipped() {
        let mut orchestrator = orchestrator();
        let mut cache = CrossSampleCache::new();
        let mut record = sample(1, "SampleA", "", "");
        assert!(orchestrator
            .plan_record(&mut record, &mut cache)
            .expect("skip")
            .is_none());
    }

    #[test]
    fn liquid_arguments_by_indicator() {
        let liquid = liquid_arguments(&TumorIndicator::Liquid);
        let keys: Vec<&str> = liquid.keys().map(String::as_str).collect();
        assert_eq!(keys, vec![SV_LIQUID_MODE]);

        let args = liquid_arguments(&TumorIndicator::Contamination("0.05".to_string()));
        let keys: Vec<&str> = args.keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec![SV_LIQUID_MODE, VC_LIQUID_MODE, CONTAMINATION_TOLERANCE]
        );
        assert!(liquid_arguments(&TumorIndicator::Tumor).is_empty());

        let mut plain = ArgumentMap::new();
        plain.insert("ref-dir".to_string(), "/ref".to_string());
        apply_liquid(&mut plain, &TumorIndicator::Liquid, true);
        assert_eq!(plain.get(SV_LIQUID_MODE).map(String::as_str), Some("true"));
        assert_eq!(plain.get(VC_LIQUID_MODE), None);

        let mut umi_args = ArgumentMap::new();
        umi_args.insert(UMI_SOLID.to_string(), "true".to_string());
        apply_liquid(
            &mut umi_args,
            &TumorIndicator::Contamination("0.05".to_string()),
            true,
        );
        assert_eq!(umi_args.get(UMI_SOLID), None);
        assert_eq!(umi_args.get(UMI_LIQUID).map(String::as_str), Some("true"));
        assert_eq!(umi_args.get(VC_LIQUID_MODE), None);
        assert_eq!(
            umi_args.get(CONTAMINATION_TOLERANCE).map(String::as_str),
            Some("0.05")
        );
    }

    #[test]
    fn staging_in_dry_run_requires_reads_on_disk() {
        let root = scratch("reads");
        let settings = FlowSettings {
            dry_run: true,
            stage_reads: true,
            ..Default::default()
        };
        let mut orchestrator = PipelineOrchestrator::new(catalog_with(dna_bundle()), settings);
        let mut cache = CrossSampleCache::new();
        let mut record = sample(1, "SampleA", "", "");
        record.manifest_path = root.join("SampleSheet.csv");
        record.sample_dir = root.join("ProjectX").join("SampleA");
        record.run_category = Some(RunCategory::Germline);
        let err = orchestrator
            .plan_record(&mut record.clone(), &mut cache)
            .expect_err("reads missing");
        assert!(matches!(err, FlowError::Io { .. }), "{}", err);

        fs::create_dir_all(root.join("ProjectX")).expect("project dir");
        for read in ["SampleA_S1_R1_001.fastq.gz", "SampleA_S1_R2_001.fastq.gz"] {
            fs::write(root.join("ProjectX").join(read), b"").expect("read");
        }
        orchestrator
            .plan_record(&mut record, &mut cache)
            .expect("reads present");
        let _ = fs::remove_dir_all(root);
    }
}
