use indexmap::IndexMap;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// Suffix marking a cache key whose normal lives outside the current batch.
pub const EXTERNAL_NORMAL_SUFFIX: &str = "EXTERNAL";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunCategory {
    Germline,
    SomaticSingle,
    SomaticPaired,
}

impl RunCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunCategory::Germline => "germline",
            RunCategory::SomaticSingle => "somatic_single",
            RunCategory::SomaticPaired => "somatic_paired",
        }
    }
}

impl fmt::Display for RunCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which resource file and template family a record is resolved with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisFamily {
    Dna,
    Rna,
    Methylation,
}

impl AnalysisFamily {
    pub fn from_parameters(parameters: &str) -> Self {
        if parameters.starts_with("rna") {
            AnalysisFamily::Rna
        } else if parameters.starts_with("methylation") {
            AnalysisFamily::Methylation
        } else {
            AnalysisFamily::Dna
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisFamily::Dna => "dna",
            AnalysisFamily::Rna => "rna",
            AnalysisFamily::Methylation => "methylation",
        }
    }
}

/// Parsed form of the manifest's tumor column.
#[derive(Debug, Clone, PartialEq)]
pub enum TumorIndicator {
    NotTumor,
    Liquid,
    /// Numeric tumor-in-normal contamination tolerance in `[0, 1]`, kept as written.
    Contamination(String),
    Tumor,
}

impl TumorIndicator {
    /// Returns `None` for values that look numeric but fall outside `[0, 1]`.
    pub fn parse(raw: &str) -> Option<Self> {
        let value = raw.trim();
        if value.is_empty() || value == "0" || value.eq_ignore_ascii_case("no") {
            return Some(TumorIndicator::NotTumor);
        }
        if value == "liquid" {
            return Some(TumorIndicator::Liquid);
        }
        match value.parse::<f64>() {
            Ok(v) if (0.0..=1.0).contains(&v) => {
                Some(TumorIndicator::Contamination(value.to_string()))
            }
            Ok(_) => None,
            Err(_) => Some(TumorIndicator::Tumor),
        }
    }

    pub fn is_tumor(&self) -> bool {
        !matches!(self, TumorIndicator::NotTumor)
    }
}

/// One manifest row plus the values derived for it during a batch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SampleRecord {
    /// 1-based position in the manifest, assigned before any filtering or sorting.
    pub index: usize,
    pub project: String,
    pub sample_id: String,
    pub sample_name: String,
    pub lane: Option<String>,
    pub ref_genome: String,
    pub target: String,
    /// Name the target was given as, once `target` has been rewritten to a path.
    pub target_name: Option<String>,
    pub tumor: String,
    pub normal: String,
    /// Set by the classifier when `normal` was given as an absolute path.
    pub normal_path: Option<PathBuf>,
    pub pipeline_parameters: String,
    pub adapter_trim: String,
    pub override_table: Option<PathBuf>,
    pub run_category: Option<RunCategory>,
    pub sample_dir: PathBuf,
    pub manifest_path: PathBuf,
    pub extra: IndexMap<String, String>,
}

impl SampleRecord {
    pub fn family(&self) -> AnalysisFamily {
        AnalysisFamily::from_parameters(&self.pipeline_parameters)
    }

    pub fn is_umi(&self) -> bool {
        self.pipeline_parameters.starts_with("umi")
    }

    pub fn cache_key(&self) -> String {
        format!("{}/{}", self.project, self.sample_id)
    }

    /// Key under which this record's matched normal is cached.
    pub fn normal_cache_key(&self) -> String {
        let key = format!("{}/{}", self.project, self.normal);
        if self.normal_path.is_some() {
            format!("{}/{}", key, EXTERNAL_NORMAL_SUFFIX)
        } else {
            key
        }
    }

    pub fn tumor_indicator(&self) -> Option<TumorIndicator> {
        TumorIndicator::parse(&self.tumor)
    }

    pub fn label(&self) -> String {
        format!("{}:{} (row {})", self.project, self.sample_id, self.index)
    }
}
