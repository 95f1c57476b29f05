//! OUU compiler library.
//!
//! Compiles optimization-under-uncertainty problems into PSUADE problem
//! files and command scripts, drives the engine on a background worker and
//! reads back its results. Scenario compression and convex-hull
//! subsampling prepare the uncertainty samples.

pub mod codegen;
pub mod engine;
pub mod error;
pub mod job;
pub mod partition;
pub mod problem;
pub mod results;
pub mod samples;
pub mod scenario;

pub use error::{EngineError, OuuError, ValidationError};
pub use job::{JobOutcome, OuuConfig, OuuJob, OuuSession};
pub use problem::OuuProblem;
pub use results::OptimizationResult;
