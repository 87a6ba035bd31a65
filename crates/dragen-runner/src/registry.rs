//! Per-sample values that template placeholders resolve against first.

use crate::error::{FlowError, Result};
use crate::resources::ReferenceProfile;
use crate::sample::SampleRecord;
use indexmap::IndexMap;
use std::path::Path;

pub const INTERMEDIATE_RESULTS_DIR: &str = "/staging/intermediate";

/// Registry keys that name read files.
pub const READ_FILE_KEYS: [&str; 5] = [
    "fastq-file1",
    "fastq-file2",
    "tumor-fastq1",
    "tumor-fastq2",
    "umi-fastq",
];

/// Which set of derivation rules a registry is built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateFamily {
    DnaBase,
    PairedVariant,
    Rna,
    Methylation,
}

/// `<name>_S<index>[_L00<lane>]_R<read>_001.fastq.gz`
pub fn read_file_name(record: &SampleRecord, read: u8) -> String {
    match record.lane.as_deref() {
        Some(lane) => format!(
            "{}_S{}_L00{}_R{}_001.fastq.gz",
            record.sample_name, record.index, lane, read
        ),
        None => format!(
            "{}_S{}_R{}_001.fastq.gz",
            record.sample_name, record.index, read
        ),
    }
}

/// Last `_`-separated token of the directory two levels above the manifest.
pub fn flow_cell_id(manifest_path: &Path) -> Result<String> {
    let text = manifest_path.to_string_lossy();
    let parts: Vec<&str> = text.split('/').collect();
    if parts.len() < 3 {
        return Err(FlowError::config(format!(
            "cannot derive flow cell from manifest path {}",
            manifest_path.display()
        )));
    }
    let run_folder = parts[parts.len() - 3];
    Ok(run_folder.rsplit('_').next().unwrap_or(run_folder).to_string())
}

pub fn read_group_id(record: &SampleRecord) -> Result<String> {
    let mut flow_cell = flow_cell_id(&record.manifest_path)?;
    if let Some(lane) = record.lane.as_deref() {
        flow_cell = format!("{}-{}", flow_cell, lane);
    }
    Ok(format!("{}-{}", flow_cell, record.index))
}

pub fn output_prefix(record: &SampleRecord) -> String {
    record.sample_id.clone()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValueRegistry {
    values: IndexMap<String, String>,
}

impl ValueRegistry {
    pub fn build(
        family: TemplateFamily,
        record: &SampleRecord,
        profile: &ReferenceProfile,
    ) -> Result<Self> {
        profile.require_genome(&record.ref_genome)?;
        let genome = record.ref_genome.as_str();
        let param = |name: &str| profile.parameter(genome, name).unwrap_or_default();
        let rgid = read_group_id(record)?;
        let rgsm = record.sample_id.clone();

        let mut registry = ValueRegistry::default();
        registry.set("ref-dir", param("ref-dir"));
        registry.set("intermediate-results-dir", INTERMEDIATE_RESULTS_DIR);
        registry.set("output-file-prefix", output_prefix(record));
        match family {
            TemplateFamily::DnaBase | TemplateFamily::PairedVariant => {
                registry.set("fastq-file1", read_file_name(record, 1));
                registry.set("fastq-file2", read_file_name(record, 2));
                registry.set("tumor-fastq1", read_file_name(record, 1));
                registry.set("tumor-fastq2", read_file_name(record, 2));
                registry.set("qc-coverage-region-1", record.target.as_str());
                registry.set("RGID", rgid.as_str());
                registry.set("RGSM", rgsm.as_str());
                registry.set("RGID-tumor", rgid);
                registry.set("RGSM-tumor", rgsm);
                registry.set("vc-systematic-noise", param("noiseprofile"));
                registry.set("cnv-population-b-allele-vcf", param("pop_b_allele"));
                registry.set("sv-systematic-noise", param("sv_noiseprofile"));
                if family == TemplateFamily::PairedVariant {
                    registry.set("vc-snp-error-cal-bed", record.target.as_str());
                }
            }
            TemplateFamily::Rna => {
                registry.set("tumor-fastq1", read_file_name(record, 1));
                registry.set("tumor-fastq2", read_file_name(record, 2));
                registry.set("RGID-tumor", rgid);
                registry.set("RGSM-tumor", rgsm);
                registry.set("annotation-file", param("gtf"));
                registry.set("rrna-filter-contig", param("rrna-contig"));
            }
            TemplateFamily::Methylation => {
                registry.set("fastq-file1", read_file_name(record, 1));
                registry.set("fastq-file2", read_file_name(record, 2));
                registry.set("RGID", rgid);
                registry.set("RGSM", rgsm);
                registry.set("qc-coverage-region-1", record.target.as_str());
            }
        }
        Ok(registry)
    }

    /// Empty values are not stored, so lookups fall through to the reference profile.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        if value.is_empty() {
            self.values.shift_remove(key);
        } else {
            self.values.insert(key.to_string(), value);
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Swaps in the UMI read layout: read 3 carries the second mate and read 2
    /// the UMIs (only for the plain `umi` family).
    pub fn apply_umi(&mut self, record: &SampleRecord, is_tumor: bool) {
        if record.pipeline_parameters == "umi" {
            let mate = if is_tumor { "tumor-fastq2" } else { "fastq-file2" };
            self.set(mate, read_file_name(record, 3));
            self.set("umi-fastq", read_file_name(record, 2));
        }
        self.set("umi-metrics-interval-file", record.target.as_str());
        self.set("vc-snp-error-cal-bed", record.target.as_str());
    }

    /// Distinct read files this registry refers to.
    pub fn read_files(&self) -> Vec<String> {
        let mut files: Vec<String> = Vec::new();
        for key in READ_FILE_KEYS {
            if let Some(v) = self.get(key) {
                if !files.iter().any(|f| f == v) {
                    files.push(v.to_string());
                }
            }
        }
        files
    }
}
