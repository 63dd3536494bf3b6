use std::path::PathBuf;

use thiserror::Error;

/// Fatal configuration errors. Raised before any provider call; never retried.
///
/// Provider and evaluation failures during execution are deliberately absent
/// here: those are caught at the unit boundary and recorded on the individual
/// `TestResult` instead of being propagated.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("duplicate provider id `{0}`")]
    DuplicateProvider(String),

    #[error("provider `{0}` not found in configuration")]
    ProviderNotFound(String),

    #[error("unknown assertion type `{0}`")]
    UnknownAssertionType(String),

    #[error("unresolvable reference `{0}`")]
    UnresolvedReference(String),

    #[error("assertion `{kind}` is missing a value")]
    MissingValue { kind: String },

    #[error("invalid JSON schema: {0}")]
    InvalidSchema(String),

    #[error("assertion `{0}` requires a grader but none is configured")]
    GraderRequired(String),

    #[error("dataset {path}: {message}")]
    Dataset { path: String, message: String },

    #[error("test case {index} has no assertions and no default assertion set is configured")]
    NoAssertions { index: usize },
}
