//! User-supplied option overrides, applied as the last layer of every stage.

use crate::error::{FlowError, Result};
use crate::resolve::ArgumentMap;
use serde::Deserialize;
use std::path::Path;

pub const STAGE_TUMOR_ALIGNMENT: &str = "TUMOR_ALIGNMENT";
pub const STAGE_TUMOR_ANALYSIS: &str = "TUMOR_ANALYSIS";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OverrideRow {
    #[serde(rename = "dragen option", default)]
    pub option: String,
    #[serde(rename = "option value", default)]
    pub value: String,
    #[serde(rename = "option specifier", default)]
    pub specifier: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptionsOverlay {
    rows: Vec<OverrideRow>,
}

impl OptionsOverlay {
    /// Reads a tab-delimited table with `dragen option`, `option value` and an
    /// optional `option specifier` column.
    pub fn load(path: &Path) -> Result<Self> {
        let csv_err = |e: csv::Error| FlowError::Csv {
            path: path.to_path_buf(),
            source: e,
        };
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(true)
            .flexible(true)
            .from_path(path)
            .map_err(csv_err)?;
        let mut rows = Vec::new();
        for row in reader.deserialize::<OverrideRow>() {
            let row = row.map_err(csv_err)?;
            if row.option.trim().is_empty() {
                continue;
            }
            rows.push(row);
        }
        Ok(Self { rows })
    }

    /// Empty overlay when no table is configured.
    pub fn load_optional(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    /// Options whose specifier is empty or equals `filter`.
    pub fn for_stage(&self, filter: Option<&str>) -> ArgumentMap {
        let mut options = ArgumentMap::new();
        for row in &self.rows {
            let specifier = row.specifier.as_deref().map(str::trim).unwrap_or("");
            if !specifier.is_empty() && Some(specifier) != filter {
                continue;
            }
            options.insert(row.option.trim().to_string(), row.value.trim().to_string());
        }
        options
    }

    pub fn apply(&self, arguments: &mut ArgumentMap, filter: Option<&str>) {
        for (key, value) in self.for_stage(filter) {
            arguments.insert(key, value);
        }
    }

    /// Applies each qualifier in turn; later ones win on a shared option.
    /// No qualifiers means only the unqualified rows apply.
    pub fn apply_stages(&self, arguments: &mut ArgumentMap, filters: &[&str]) {
        if filters.is_empty() {
            self.apply(arguments, None);
            return;
        }
        for &filter in filters {
            self.apply(arguments, Some(filter));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
