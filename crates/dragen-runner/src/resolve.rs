//! Stage template resolution and merging of partial argument sets.

use crate::cache::NormalParameters;
use crate::error::{FlowError, Result};
use crate::registry::{TemplateFamily, ValueRegistry};
use crate::resources::{ReferenceProfile, ResourceBundle, StageTemplate, TemplateValue};
use crate::sample::SampleRecord;
use indexmap::IndexMap;
use tracing::warn;

/// Resolved `--key value` pairs in template order.
pub type ArgumentMap = IndexMap<String, String>;

/// Literal template values may embed this token; it is replaced by the
/// matched normal's sample identifier in paired-variant stages.
pub const NORMAL_SAMPLE_TOKEN: &str = "<normal>";

/// A placeholder that resolved to nothing. Reported, never fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingValue {
    pub key: String,
    pub placeholder: String,
}

/// Resolves one stage template for one record.
#[derive(Debug, Clone)]
pub struct TemplateResolver<'a> {
    record: &'a SampleRecord,
    bundle: &'a ResourceBundle,
    stage: String,
    registry: ValueRegistry,
}

impl<'a> TemplateResolver<'a> {
    pub fn new(
        family: TemplateFamily,
        record: &'a SampleRecord,
        bundle: &'a ResourceBundle,
        stage: impl Into<String>,
    ) -> Result<Self> {
        let registry = ValueRegistry::build(family, record, &bundle.reference)?;
        Ok(Self {
            record,
            bundle,
            stage: stage.into(),
            registry,
        })
    }

    pub fn registry(&self) -> &ValueRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ValueRegistry {
        &mut self.registry
    }

    pub fn template(&self) -> Result<&'a StageTemplate> {
        let template = self.bundle.stage(&self.stage).ok_or_else(|| {
            FlowError::config(format!(
                "stage {} not found in resources (template has no placeholders)",
                self.stage
            ))
        })?;
        if template.placeholder_count() == 0 {
            return Err(FlowError::config(format!(
                "stage {} has no placeholders; template is malformed",
                self.stage
            )));
        }
        Ok(template)
    }

    pub fn resolve_with_diagnostics(&self) -> Result<(ArgumentMap, Vec<MissingValue>)> {
        let template = self.template()?;
        let mut arguments = ArgumentMap::new();
        let mut missing = Vec::new();
        for (key, value) in &template.entries {
            let resolved = match value {
                TemplateValue::Literal(text) => text.clone(),
                TemplateValue::Placeholder(name) => match self.lookup(key, name) {
                    Some(v) => v,
                    None => {
                        missing.push(MissingValue {
                            key: key.clone(),
                            placeholder: name.clone(),
                        });
                        String::new()
                    }
                },
            };
            arguments.insert(key.clone(), resolved);
        }
        Ok((arguments, missing))
    }

    pub fn resolve(&self) -> Result<ArgumentMap> {
        let (arguments, missing) = self.resolve_with_diagnostics()?;
        for m in &missing {
            warn!(
                sample = %self.record.sample_id,
                stage = %self.stage,
                key = %m.key,
                "missing value for placeholder {{{}}} in registry and reference profile",
                m.placeholder
            );
        }
        Ok(arguments)
    }

    fn lookup(&self, key: &str, name: &str) -> Option<String> {
        if let Some(v) = self.registry.get(key) {
            return Some(v.to_string());
        }
        self.bundle
            .reference
            .parameter(&self.record.ref_genome, name)
    }
}

/// Adapter sequence for the record's trim column: a named adapter from the
/// profile, a literal absolute path, or nothing.
pub fn adapter_sequence(profile: &ReferenceProfile, adapter_trim: &str) -> Result<Option<String>> {
    let value = adapter_trim.trim();
    if value.is_empty() {
        return Ok(None);
    }
    if let Some(sequence) = profile.adapter(value) {
        return Ok(Some(sequence.to_string()));
    }
    if value.starts_with('/') {
        return Ok(Some(value.to_string()));
    }
    Err(FlowError::config(format!(
        "cannot retrieve adapters for value: {}",
        value
    )))
}

/// Extra arguments enabling adapter trimming, appended to `read_trimmers`.
pub fn adapter_trimming(
    profile: &ReferenceProfile,
    record: &SampleRecord,
    read_trimmers: Option<&str>,
) -> Result<ArgumentMap> {
    let mut arguments = ArgumentMap::new();
    let Some(sequence) = adapter_sequence(profile, &record.adapter_trim)? else {
        return Ok(arguments);
    };
    let trimmers = match read_trimmers {
        Some(existing) if !existing.is_empty() => format!("{},adapter", existing),
        _ => "adapter".to_string(),
    };
    arguments.insert("read-trimmers".to_string(), trimmers);
    arguments.insert("trim-adapter-read1".to_string(), sequence.clone());
    arguments.insert("trim-adapter-read2".to_string(), sequence);
    Ok(arguments)
}

/// Paths a paired variant call derives from the tumor alignment and the
/// cached normal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairedVariantSource {
    normal_prefix: String,
    normal_sample: String,
    tumor_prefix: String,
    error_cal_bed: String,
    token_literals: ArgumentMap,
}

impl PairedVariantSource {
    pub fn new(
        tumor_alignment: &ArgumentMap,
        normal_prefix: &str,
        normal_sample: &str,
        error_cal_bed: &str,
    ) -> Result<Self> {
        let tumor_prefix = tumor_alignment
            .get("output-file-prefix")
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                FlowError::config("tumor alignment arguments carry no output-file-prefix")
            })?;
        Ok(Self {
            normal_prefix: normal_prefix.to_string(),
            normal_sample: normal_sample.to_string(),
            tumor_prefix: tumor_prefix.clone(),
            error_cal_bed: error_cal_bed.to_string(),
            token_literals: ArgumentMap::new(),
        })
    }

    /// Picks up literal entries of `template` that embed the normal-sample token.
    pub fn with_template_tokens(mut self, template: &StageTemplate) -> Self {
        for (key, value) in &template.entries {
            if let TemplateValue::Literal(text) = value {
                if text.contains(NORMAL_SAMPLE_TOKEN) {
                    self.token_literals.insert(key.clone(), text.clone());
                }
            }
        }
        self
    }

    pub fn produce(&self) -> ArgumentMap {
        let mut arguments = ArgumentMap::new();
        arguments.insert("bam-input".to_string(), format!("{}.bam", self.normal_prefix));
        arguments.insert(
            "tumor-bam-input".to_string(),
            format!("{}_tumor.bam", self.tumor_prefix),
        );
        arguments.insert(
            "output-file-prefix".to_string(),
            format!("{}.tn", self.tumor_prefix),
        );
        if !self.error_cal_bed.is_empty() {
            arguments.insert("vc-snp-error-cal-bed".to_string(), self.error_cal_bed.clone());
        }
        for (key, text) in &self.token_literals {
            arguments.insert(
                key.clone(),
                text.replace(NORMAL_SAMPLE_TOKEN, &self.normal_sample),
            );
        }
        arguments
    }
}

/// Anything that contributes a partial argument mapping.
#[derive(Debug, Clone)]
pub enum ArgumentSource<'a> {
    Template(TemplateResolver<'a>),
    PairedVariant(PairedVariantSource),
    Normal(NormalParameters),
    Fixed(ArgumentMap),
}

impl ArgumentSource<'_> {
    pub fn produce(&self) -> Result<ArgumentMap> {
        match self {
            ArgumentSource::Template(resolver) => resolver.resolve(),
            ArgumentSource::PairedVariant(source) => Ok(source.produce()),
            ArgumentSource::Normal(params) => Ok(params.to_arguments()),
            ArgumentSource::Fixed(arguments) => Ok(arguments.clone()),
        }
    }
}

/// Right-biased merge: later maps overwrite earlier keys in place.
pub fn merge_arguments<I>(maps: I) -> ArgumentMap
where
    I: IntoIterator<Item = ArgumentMap>,
{
    let mut merged = ArgumentMap::new();
    for map in maps {
        for (key, value) in map {
            merged.insert(key, value);
        }
    }
    merged
}

/// Ordered list of sources merged into one mapping.
#[derive(Debug, Clone, Default)]
pub struct CompositeResolver<'a> {
    sources: Vec<ArgumentSource<'a>>,
}

impl<'a> CompositeResolver<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, source: ArgumentSource<'a>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn resolve(&self) -> Result<ArgumentMap> {
        let mut maps = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            maps.push(source.produce()?);
        }
        Ok(merge_arguments(maps))
    }
}
