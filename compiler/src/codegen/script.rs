//! Command script for the engine's interactive OUU menu
//!
//! After `run <file>` the engine walks a fixed menu whose questions depend
//! on the shape of the problem. The script is the ordered list of answers,
//! always terminated by `quit`.
//!
//! The menu is modelled as a table: a [`ProblemShape`] picks the sequence of
//! [`Stage`]s, and each stage emits its own answers (or nothing when its
//! guard does not hold). Numeric answers are clamped here, never upstream.

use crate::error::ValidationError;
use crate::partition::Partition;
use crate::problem::{Aggregation, OptimizerMode, SamplingScheme};
use std::path::{Path, PathBuf};

/// Upper bound on generated LH/QMC sample sizes
pub const MAX_GENERATED_SAMPLES: usize = 1000;
/// Factorial design level bounds
pub const MIN_FACTORIAL_LEVELS: usize = 3;
pub const MAX_FACTORIAL_LEVELS: usize = 100;

/// LH/QMC sample count, clamped to `[m4 + 1, 1000]`
pub fn clamp_sample_count(requested: usize, m4: usize) -> usize {
    requested.max(m4 + 1).min(MAX_GENERATED_SAMPLES)
}

/// Factorial levels per variable, clamped to `[3, 100]`
pub fn clamp_levels(requested: usize) -> usize {
    requested.clamp(MIN_FACTORIAL_LEVELS, MAX_FACTORIAL_LEVELS)
}

/// Response-surface training size, clamped to `[m4 + 1, n]`
pub fn clamp_training_size(requested: usize, m4: usize, n: usize) -> usize {
    requested.max(m4 + 1).min(n)
}

/// Continuous uncertainty sample as the script refers to it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContinuousInput {
    /// Sample file on disk with `n_samples` rows
    File { path: PathBuf, n_samples: usize },
    /// Let the engine generate the sample
    Generate(SamplingScheme),
}

/// Where response-surface training points come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrainingPoints {
    Random,
    File(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseSurfaceInput {
    pub training_size: Option<usize>,
    pub points: TrainingPoints,
}

/// Coarse classification deciding which menu branch the engine takes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProblemShape {
    /// Every variable is a design variable
    DesignOnly,
    /// Design and recourse variables, no uncertainty
    DesignRecourse,
    /// At least one uncertain variable
    Uncertain,
}

impl ProblemShape {
    pub fn of(partition: &Partition) -> Self {
        let total = partition.total();
        if partition.m1 == total {
            ProblemShape::DesignOnly
        } else if partition.m1 + partition.m2 == total {
            ProblemShape::DesignRecourse
        } else {
            ProblemShape::Uncertain
        }
    }

    pub fn stages(self) -> &'static [Stage] {
        use Stage::*;
        match self {
            ProblemShape::DesignOnly => &[Start],
            ProblemShape::DesignRecourse => &[Start, RecourseCount, RoleCodes, OptimizerChoice],
            ProblemShape::Uncertain => &[
                Start,
                RecourseCount,
                DiscreteCount,
                RoleCodes,
                Aggregation,
                ConstraintFlag,
                DiscreteSample,
                ContinuousSample,
                RecourseOptimizer,
                EnsembleDriver,
                AsyncMode,
            ],
        }
    }
}

/// One menu section
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// `run <file>`, confirmation, design variable count
    Start,
    RecourseCount,
    DiscreteCount,
    /// One role code per non-fixed variable
    RoleCodes,
    /// Recourse search without uncertainty: engine search or own driver
    OptimizerChoice,
    Aggregation,
    ConstraintFlag,
    DiscreteSample,
    ContinuousSample,
    RecourseOptimizer,
    EnsembleDriver,
    /// Asynchronous ensemble evaluation is never requested
    AsyncMode,
}

/// Compiler for the engine command script
#[derive(Debug, Clone)]
pub struct ScriptCompiler<'a> {
    pub problem_file: &'a Path,
    pub partition: &'a Partition,
    pub aggregation: Aggregation,
    pub has_constraints: bool,
    pub discrete_file: Option<PathBuf>,
    pub continuous: Option<ContinuousInput>,
    pub response_surface: Option<ResponseSurfaceInput>,
    pub mode: OptimizerMode,
    pub ensemble_driver: bool,
}

impl<'a> ScriptCompiler<'a> {
    pub fn new(problem_file: &'a Path, partition: &'a Partition) -> Self {
        Self {
            problem_file,
            partition,
            aggregation: Aggregation::Mean,
            has_constraints: false,
            discrete_file: None,
            continuous: None,
            response_surface: None,
            mode: OptimizerMode::default(),
            ensemble_driver: false,
        }
    }

    pub fn shape(&self) -> ProblemShape {
        ProblemShape::of(self.partition)
    }

    /// Produce the ordered answers, ending with `quit`
    pub fn compile(&self) -> Result<Vec<String>, ValidationError> {
        let mut lines = Vec::new();
        for &stage in self.shape().stages() {
            self.emit(stage, &mut lines)?;
        }
        lines.push("quit".to_string());
        Ok(lines)
    }

    fn emit(&self, stage: Stage, out: &mut Vec<String>) -> Result<(), ValidationError> {
        let p = self.partition;
        match stage {
            Stage::Start => {
                out.push(format!("run {}", self.problem_file.display()));
                out.push("y".into());
                out.push(p.m1.to_string());
            }
            Stage::RecourseCount => out.push(p.m2.to_string()),
            Stage::DiscreteCount => out.push(p.m3.to_string()),
            Stage::RoleCodes => out.extend(p.role_codes.iter().map(|c| c.to_string())),
            Stage::OptimizerChoice => out.push(yes_no(self.mode == OptimizerMode::OptimizerAsDriver)),
            Stage::Aggregation => {
                out.push(self.aggregation.code().to_string());
                if let Some(param) = self.aggregation.parameter() {
                    out.push(format!("{:.6}", param));
                }
            }
            Stage::ConstraintFlag => {
                if self.has_constraints {
                    out.push("1".into());
                }
            }
            Stage::DiscreteSample => {
                if p.m3 > 0 {
                    let file = self
                        .discrete_file
                        .as_ref()
                        .ok_or(ValidationError::MissingSample("Z3"))?;
                    out.push(file.display().to_string());
                }
            }
            Stage::ContinuousSample => {
                if p.m4 > 0 {
                    self.emit_continuous(out)?;
                }
            }
            // the caller's own driver always optimizes recourse here
            Stage::RecourseOptimizer => {
                if p.m2 > 0 {
                    out.push("y".into());
                }
            }
            Stage::EnsembleDriver => {
                if p.uncertain() > 0 {
                    out.push(yes_no(self.ensemble_driver));
                }
            }
            Stage::AsyncMode => {
                if p.uncertain() > 0 {
                    out.push("n".into());
                }
            }
        }
        Ok(())
    }

    fn emit_continuous(&self, out: &mut Vec<String>) -> Result<(), ValidationError> {
        let m4 = self.partition.m4;
        let continuous = self
            .continuous
            .as_ref()
            .ok_or(ValidationError::MissingSample("Z4"))?;

        match continuous {
            ContinuousInput::File { path, n_samples } => {
                if *n_samples < m4 + 1 {
                    return Err(ValidationError::InsufficientSamples {
                        kind: "Z4",
                        required: m4 + 1,
                        found: *n_samples,
                    });
                }
                out.push("1".into());
                out.push(path.display().to_string());
            }
            ContinuousInput::Generate(_) => out.push("2".into()),
        }

        match &self.response_surface {
            Some(rs) => {
                out.push("y".into());
                if let ContinuousInput::File { n_samples, .. } = continuous {
                    let requested = rs
                        .training_size
                        .ok_or(ValidationError::MissingResponseSurfaceSize)?;
                    out.push(clamp_training_size(requested, m4, *n_samples).to_string());
                    match &rs.points {
                        TrainingPoints::Random => out.push("2".into()),
                        TrainingPoints::File(path) => {
                            out.push("1".into());
                            out.push(path.display().to_string());
                        }
                    }
                }
            }
            None => out.push("n".into()),
        }

        if let ContinuousInput::Generate(scheme) = continuous {
            out.push(scheme.code().to_string());
            let count = match *scheme {
                SamplingScheme::LatinHypercube { samples }
                | SamplingScheme::QuasiMonteCarlo { samples } => clamp_sample_count(samples, m4),
                SamplingScheme::Factorial { levels } => clamp_levels(levels),
            };
            out.push(count.to_string());
        }
        Ok(())
    }
}

fn yes_no(flag: bool) -> String {
    if flag { "y" } else { "n" }.to_string()
}

/// Join script lines into the text fed to the engine's stdin
pub fn render_script(lines: &[String]) -> String {
    let mut text = lines.join("\n");
    text.push('\n');
    text
}
