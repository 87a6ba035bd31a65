//! Typed view of the per-family resource files.
//!
//! A resource file carries the reference profile (`ref_parameters`), the
//! adapter table, optional pre/post scripts, an optional list of samplesheet
//! columns to export, and every stage template as a remaining top-level object.

use crate::error::{FlowError, Result};
use crate::sample::AnalysisFamily;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::debug;

pub const DNA_RESOURCE_FILE: &str = "dragen_config.json";
pub const DNA_PROFILE_KEY: &str = "profile1";
pub const RNA_RESOURCE_FILE: &str = "dragen_rna.json";
pub const METHYLATION_RESOURCE_FILE: &str = "dragen_met.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scripts {
    #[serde(default)]
    pub pre: String,
    #[serde(default)]
    pub post: String,
}

/// One template entry, classified when the template is loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateValue {
    Literal(String),
    /// Name between the `{` `}` delimiters.
    Placeholder(String),
}

impl TemplateValue {
    fn from_json(stage: &str, key: &str, value: &Value) -> Result<Self> {
        let text = match value {
            Value::String(s) => {
                if s.len() >= 2 && s.starts_with('{') && s.ends_with('}') {
                    return Ok(TemplateValue::Placeholder(s[1..s.len() - 1].to_string()));
                }
                s.clone()
            }
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => n.to_string(),
            Value::Array(items) => items
                .iter()
                .map(scalar_to_string)
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| {
                    FlowError::config(format!(
                        "stage {} argument {} holds a non-scalar list",
                        stage, key
                    ))
                })?
                .join(","),
            Value::Object(_) => {
                return Err(FlowError::config(format!(
                    "stage {} argument {} is an object",
                    stage, key
                )))
            }
        };
        Ok(TemplateValue::Literal(text))
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageTemplate {
    pub entries: IndexMap<String, TemplateValue>,
}

impl StageTemplate {
    pub fn from_json(stage: &str, value: &Value) -> Result<Self> {
        let map = value.as_object().ok_or_else(|| {
            FlowError::config(format!("stage {} is not an argument mapping", stage))
        })?;
        let mut entries = IndexMap::new();
        for (key, v) in map {
            entries.insert(key.clone(), TemplateValue::from_json(stage, key, v)?);
        }
        Ok(StageTemplate { entries })
    }

    pub fn placeholder_count(&self) -> usize {
        self.entries
            .values()
            .filter(|v| matches!(v, TemplateValue::Placeholder(_)))
            .count()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawReferenceParameters {
    #[serde(rename = "RefGenome", default)]
    genomes: IndexMap<String, IndexMap<String, Value>>,
    #[serde(default)]
    target: IndexMap<String, IndexMap<String, String>>,
    #[serde(default)]
    cnvpanelofnormals: IndexMap<String, IndexMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct RawBundle {
    #[serde(default)]
    ref_parameters: RawReferenceParameters,
    #[serde(default)]
    adapters: IndexMap<String, String>,
    #[serde(default)]
    scripts: Option<Scripts>,
    #[serde(default)]
    samplesheet: Option<Vec<String>>,
    #[serde(flatten)]
    rest: IndexMap<String, Value>,
}

/// Reference parameters per genome, plus the target, panel-of-normals and
/// adapter tables.
#[derive(Debug, Clone, Default)]
pub struct ReferenceProfile {
    pub genomes: IndexMap<String, IndexMap<String, Value>>,
    pub targets: IndexMap<String, IndexMap<String, String>>,
    pub cnv_panels: IndexMap<String, IndexMap<String, String>>,
    pub adapters: IndexMap<String, String>,
}

impl ReferenceProfile {
    pub fn has_genome(&self, genome: &str) -> bool {
        self.genomes.contains_key(genome)
    }

    pub fn require_genome(&self, genome: &str) -> Result<()> {
        if self.has_genome(genome) {
            Ok(())
        } else {
            Err(FlowError::config(format!(
                "reference genome {:?} not present in resource profile",
                genome
            )))
        }
    }

    /// Named parameter for a genome; lists are joined with commas, empty values are `None`.
    pub fn parameter(&self, genome: &str, name: &str) -> Option<String> {
        let value = self.genomes.get(genome)?.get(name)?;
        let text = match value {
            Value::Array(items) => items
                .iter()
                .filter_map(scalar_to_string)
                .collect::<Vec<_>>()
                .join(","),
            other => scalar_to_string(other)?,
        };
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }

    pub fn target_path(&self, genome: &str, name: &str) -> Option<&str> {
        self.targets
            .get(genome)
            .and_then(|t| t.get(name))
            .map(String::as_str)
    }

    pub fn cnv_panel(&self, genome: &str, target_name: &str) -> Option<&str> {
        self.cnv_panels
            .get(genome)
            .and_then(|t| t.get(target_name))
            .map(String::as_str)
    }

    pub fn adapter(&self, name: &str) -> Option<&str> {
        self.adapters.get(name).map(String::as_str)
    }
}

/// Everything one resource file provides.
#[derive(Debug, Clone, Default)]
pub struct ResourceBundle {
    pub reference: ReferenceProfile,
    pub stages: IndexMap<String, StageTemplate>,
    pub scripts: Option<Scripts>,
    pub samplesheet: Vec<String>,
}

impl ResourceBundle {
    pub fn from_json(value: Value) -> Result<Self> {
        let raw: RawBundle = serde_json::from_value(value)
            .map_err(|e| FlowError::config(format!("malformed resource bundle: {}", e)))?;
        let mut stages = IndexMap::new();
        for (name, v) in raw.rest.iter() {
            if !v.is_object() {
                continue;
            }
            stages.insert(name.clone(), StageTemplate::from_json(name, v)?);
        }
        Ok(ResourceBundle {
            reference: ReferenceProfile {
                genomes: raw.ref_parameters.genomes,
                targets: raw.ref_parameters.target,
                cnv_panels: raw.ref_parameters.cnvpanelofnormals,
                adapters: raw.adapters,
            },
            stages,
            scripts: raw.scripts,
            samplesheet: raw.samplesheet.unwrap_or_default(),
        })
    }

    /// Loads a resource file, descending into `root_key` first when given.
    pub fn load(path: &Path, root_key: Option<&str>) -> Result<Self> {
        let data = fs::read_to_string(path).map_err(|e| FlowError::io(path, e))?;
        let mut value: Value = serde_json::from_str(&data).map_err(|e| FlowError::Json {
            path: path.to_path_buf(),
            source: e,
        })?;
        if let Some(key) = root_key {
            value = value.get_mut(key).map(Value::take).ok_or_else(|| {
                FlowError::config(format!("{} has no {:?} entry", path.display(), key))
            })?;
        }
        ResourceBundle::from_json(value)
    }

    pub fn stage(&self, name: &str) -> Option<&StageTemplate> {
        self.stages.get(name)
    }
}

/// Lazily loaded resource bundles, one per analysis family.
#[derive(Debug, Default)]
pub struct ResourceCatalog {
    config_dir: Option<PathBuf>,
    bundles: HashMap<AnalysisFamily, Rc<ResourceBundle>>,
}

impl ResourceCatalog {
    pub fn from_dir(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: Some(config_dir.into()),
            bundles: HashMap::new(),
        }
    }

    pub fn with_bundle(mut self, family: AnalysisFamily, bundle: ResourceBundle) -> Self {
        self.bundles.insert(family, Rc::new(bundle));
        self
    }

    pub fn bundle(&mut self, family: AnalysisFamily) -> Result<Rc<ResourceBundle>> {
        if let Some(bundle) = self.bundles.get(&family) {
            return Ok(Rc::clone(bundle));
        }
        let dir = self.config_dir.as_ref().ok_or_else(|| {
            FlowError::config(format!(
                "no resources registered for the {} family",
                family.as_str()
            ))
        })?;
        let (file, root_key) = match family {
            AnalysisFamily::Dna => (DNA_RESOURCE_FILE, Some(DNA_PROFILE_KEY)),
            AnalysisFamily::Rna => (RNA_RESOURCE_FILE, None),
            AnalysisFamily::Methylation => (METHYLATION_RESOURCE_FILE, None),
        };
        let path = dir.join(file);
        debug!(path = %path.display(), family = family.as_str(), "loading resource bundle");
        let bundle = Rc::new(ResourceBundle::load(&path, root_key)?);
        self.bundles.insert(family, Rc::clone(&bundle));
        Ok(bundle)
    }
}
