//! Error taxonomy for OUU compilation and engine runs
//!
//! Validation problems are raised synchronously while a job is being
//! compiled, before any subprocess exists. Engine problems are only ever
//! produced after a run and always carry the captured engine text.

use std::path::PathBuf;
use thiserror::Error;

/// Problems with the problem description itself
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("invalid problem: {0}")]
    InvalidProblem(String),

    #[error("multi-objective optimization not supported: found {0} objective outputs")]
    MultiObjectiveUnsupported(usize),

    #[error("constraint and derivative outputs cannot be combined ({constraints} constraints, {derivatives} derivatives)")]
    ConflictingRoles {
        constraints: usize,
        derivatives: usize,
    },

    #[error("number of derivative outputs ({derivatives}) must equal number of variable inputs ({inputs})")]
    DerivativeCountMismatch { derivatives: usize, inputs: usize },

    #[error("distribution `{distribution}` on variable `{variable}` is not supported")]
    UnsupportedDistribution {
        variable: String,
        distribution: String,
    },

    #[error("{0} variables are present but no sample was supplied")]
    MissingSample(&'static str),

    #[error("{kind} sample requires at least {required} samples, found {found}")]
    InsufficientSamples {
        kind: &'static str,
        required: usize,
        found: usize,
    },

    #[error("{kind} sample has {found} columns but the problem has {expected} such variables")]
    SampleDimensionMismatch {
        kind: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("response surface on a supplied continuous sample needs a training size")]
    MissingResponseSurfaceSize,

    #[error("no optimizer driver or ensemble optimizer driver configured")]
    NoDrivers,

    #[error("cannot select {requested} points from a cloud of {available}")]
    InvalidSubsampleSize { requested: usize, available: usize },

    #[error("cannot read {kind} sample file {path}: {reason}")]
    UnreadableSampleFile {
        kind: &'static str,
        path: PathBuf,
        reason: String,
    },

    #[error("malformed sample file {path}: {reason}")]
    MalformedSampleFile { path: PathBuf, reason: String },
}

/// Problems raised by the external engine or while talking to it
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("PSUADE executable not found: {0}")]
    NotFound(String),

    #[error("failed to spawn {executable}: {source}")]
    Spawn {
        executable: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("engine I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("engine exited with {status}: {stderr}")]
    NonZeroExit {
        status: String,
        stderr: String,
        output: String,
    },

    #[error("engine terminated abnormally: result marker not found in output")]
    NoResultMarker { output: String },

    #[error("engine did not produce expected file {0}")]
    MissingArtifact(PathBuf),

    #[error("engine worker thread exited without reporting")]
    WorkerDied,

    #[error("invalid engine output pattern: {0}")]
    Pattern(#[from] regex::Error),
}

impl EngineError {
    /// Raw engine text attached to this error, if any
    pub fn captured_output(&self) -> Option<&str> {
        match self {
            EngineError::NonZeroExit { output, .. } | EngineError::NoResultMarker { output } => {
                Some(output)
            }
            _ => None,
        }
    }
}

/// Top-level error for OUU operations
#[derive(Debug, Error)]
pub enum OuuError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("problem description error: {0}")]
    Json(#[from] serde_json::Error),
}

impl OuuError {
    pub fn is_validation(&self) -> bool {
        matches!(self, OuuError::Validation(_))
    }
}
