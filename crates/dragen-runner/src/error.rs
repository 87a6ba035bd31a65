use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, FlowError>;

/// Failures raised while turning a sample row into commands.
///
/// Every variant is fatal for the record being processed; the batch driver
/// decides whether the remaining records continue.
#[derive(Debug, Error)]
pub enum FlowError {
    /// Resource files or manifest values that cannot be turned into arguments.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Tumor/normal columns that do not map onto exactly one run category.
    #[error("classification error: {0}")]
    Classification(String),

    /// A paired record whose normal could not be found in the cache or on disk.
    #[error("dependency unresolved: {0}")]
    DependencyUnresolved(String),

    #[error("samplesheet error: {0}")]
    Samplesheet(String),

    #[error("io error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid json in {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid table in {}: {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

impl FlowError {
    pub fn config(msg: impl Into<String>) -> Self {
        FlowError::Configuration(msg.into())
    }

    pub fn classification(msg: impl Into<String>) -> Self {
        FlowError::Classification(msg.into())
    }

    pub fn unresolved(msg: impl Into<String>) -> Self {
        FlowError::DependencyUnresolved(msg.into())
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        FlowError::Io {
            path: path.into(),
            source,
        }
    }

    /// Short machine-readable code used by the CLI's JSON error payloads.
    pub fn code(&self) -> &'static str {
        match self {
            FlowError::Configuration(_) => "configuration_error",
            FlowError::Classification(_) => "classification_error",
            FlowError::DependencyUnresolved(_) => "dependency_unresolved",
            FlowError::Samplesheet(_) => "samplesheet_error",
            FlowError::Io { .. } => "io_error",
            FlowError::Json { .. } => "json_error",
            FlowError::Csv { .. } => "csv_error",
        }
    }
}
