//! Code generation for the PSUADE engine
//!
//! - `psuade`: the block-structured problem file
//! - `script`: answers for the engine's interactive OUU menu

pub mod psuade;
pub mod script;

pub use psuade::{sci, OutputLayout, ProblemFileWriter};
pub use script::{
    render_script, ContinuousInput, ProblemShape, ResponseSurfaceInput, ScriptCompiler,
    TrainingPoints,
};
