//! OUU problem description
//!
//! The normalized form handed over by whatever collected the problem (tables,
//! dialogs, a JSON file): variables with their roles, bounds and
//! distributions, output roles, the uncertainty aggregation, sample sources
//! and driver executables.

use crate::error::OuuError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

// =============================================================================
// Variables
// =============================================================================

/// Role a variable plays in the OUU problem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableRole {
    /// Held at a fixed value, not passed to the optimizer
    Fixed,
    /// Z1: continuous design variable
    DesignContinuous,
    /// Z1d: discrete design variable
    DesignDiscrete,
    /// Z2: recourse variable, optimized per scenario
    Recourse,
    /// Z3: discrete uncertain variable (weighted scenario sample)
    UncertainDiscrete,
    /// Z4: continuous uncertain variable
    UncertainContinuous,
}

impl VariableRole {
    /// Engine role code: 1 design, 2 recourse, 3 discrete UQ, 4 continuous UQ
    pub fn code(self) -> Option<u8> {
        match self {
            VariableRole::Fixed => None,
            VariableRole::DesignContinuous | VariableRole::DesignDiscrete => Some(1),
            VariableRole::Recourse => Some(2),
            VariableRole::UncertainDiscrete => Some(3),
            VariableRole::UncertainContinuous => Some(4),
        }
    }

    pub fn is_fixed(self) -> bool {
        self == VariableRole::Fixed
    }

    pub fn label(self) -> &'static str {
        match self {
            VariableRole::Fixed => "Fixed",
            VariableRole::DesignContinuous => "Z1",
            VariableRole::DesignDiscrete => "Z1d",
            VariableRole::Recourse => "Z2",
            VariableRole::UncertainDiscrete => "Z3",
            VariableRole::UncertainContinuous => "Z4",
        }
    }
}

/// Probability distribution families understood by PSUADE
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DistributionKind {
    #[default]
    Uniform,
    Normal,
    Lognormal,
    Triangle,
    Gamma,
    Beta,
    Exponential,
    Weibull,
    /// Empirical sample distribution, not usable in OUU input blocks
    Sample,
}

impl DistributionKind {
    /// Single-letter code used in `PDF` directives
    pub fn psuade_code(self) -> char {
        match self {
            DistributionKind::Uniform => 'U',
            DistributionKind::Normal => 'N',
            DistributionKind::Lognormal => 'L',
            DistributionKind::Triangle => 'T',
            DistributionKind::Gamma => 'G',
            DistributionKind::Beta => 'B',
            DistributionKind::Exponential => 'E',
            DistributionKind::Weibull => 'W',
            DistributionKind::Sample => 'S',
        }
    }
}

impl fmt::Display for DistributionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DistributionKind::Uniform => "Uniform",
            DistributionKind::Normal => "Normal",
            DistributionKind::Lognormal => "Lognormal",
            DistributionKind::Triangle => "Triangle",
            DistributionKind::Gamma => "Gamma",
            DistributionKind::Beta => "Beta",
            DistributionKind::Exponential => "Exponential",
            DistributionKind::Weibull => "Weibull",
            DistributionKind::Sample => "Sample",
        };
        write!(f, "{}", name)
    }
}

/// Input distribution with up to two parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Distribution {
    #[serde(default)]
    pub kind: DistributionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub param1: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub param2: Option<f64>,
}

impl Distribution {
    pub fn uniform() -> Self {
        Self::default()
    }

    pub fn new(kind: DistributionKind, param1: Option<f64>, param2: Option<f64>) -> Self {
        Self {
            kind,
            param1,
            param2,
        }
    }

    pub fn normal(mean: f64, std_dev: f64) -> Self {
        Self::new(DistributionKind::Normal, Some(mean), Some(std_dev))
    }
}

/// A single problem variable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    pub role: VariableRole,
    pub min: f64,
    pub max: f64,
    #[serde(default)]
    pub distribution: Distribution,
    /// Fixed value for `Fixed` variables, starting value otherwise
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

impl Variable {
    pub fn new(name: impl Into<String>, role: VariableRole, min: f64, max: f64) -> Self {
        Self {
            name: name.into(),
            role,
            min,
            max,
            distribution: Distribution::uniform(),
            value: None,
        }
    }

    pub fn with_distribution(mut self, distribution: Distribution) -> Self {
        self.distribution = distribution;
        self
    }

    pub fn with_value(mut self, value: f64) -> Self {
        self.value = Some(value);
        self
    }

    /// Value written for fixed variables; midpoint of the bounds when unset
    pub fn fixed_value(&self) -> f64 {
        self.value.unwrap_or(0.5 * (self.min + self.max))
    }
}

// =============================================================================
// Outputs
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutputRole {
    Objective,
    Constraint,
    Derivative,
    #[default]
    Unused,
}

/// An output of the simulation; its 1-based index is its list position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSpec {
    pub name: String,
    #[serde(default)]
    pub role: OutputRole,
}

impl OutputSpec {
    pub fn new(name: impl Into<String>, role: OutputRole) -> Self {
        Self {
            name: name.into(),
            role,
        }
    }
}

// =============================================================================
// Uncertainty aggregation
// =============================================================================

/// Aggregation of the objective over the uncertain variables (phi)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Aggregation {
    #[default]
    Mean,
    MeanPlusBetaStd {
        beta: f64,
    },
    ValueAtRisk {
        alpha: f64,
    },
}

impl Aggregation {
    pub fn code(&self) -> u8 {
        match self {
            Aggregation::Mean => 1,
            Aggregation::MeanPlusBetaStd { .. } => 2,
            Aggregation::ValueAtRisk { .. } => 3,
        }
    }

    /// Parameter as sent to the engine, clamped into its legal range
    pub fn parameter(&self) -> Option<f64> {
        match *self {
            Aggregation::Mean => None,
            Aggregation::MeanPlusBetaStd { beta } => Some(beta.max(0.0)),
            Aggregation::ValueAtRisk { alpha } => Some(alpha.clamp(0.5, 1.0)),
        }
    }
}

// =============================================================================
// Sample sources
// =============================================================================

/// Sample for the discrete uncertain variables; rows end with a probability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum DiscreteSample {
    File { path: PathBuf },
    Inline { rows: Vec<Vec<f64>> },
}

/// Design used when the engine generates the continuous uncertainty sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scheme", rename_all = "snake_case")]
pub enum SamplingScheme {
    LatinHypercube { samples: usize },
    Factorial { levels: usize },
    QuasiMonteCarlo { samples: usize },
}

impl SamplingScheme {
    pub fn code(&self) -> u8 {
        match self {
            SamplingScheme::LatinHypercube { .. } => 1,
            SamplingScheme::Factorial { .. } => 2,
            SamplingScheme::QuasiMonteCarlo { .. } => 3,
        }
    }
}

/// Sample for the continuous uncertain variables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ContinuousSample {
    File { path: PathBuf },
    Inline { rows: Vec<Vec<f64>> },
    Generate { design: SamplingScheme },
}

/// How the response-surface training points are picked from a supplied sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RsSubsample {
    /// Let the engine draw a random subsample
    #[default]
    Random,
    /// Upload a subsample chosen by convex-hull coverage
    ConvexHull,
}

/// Response surface standing in for the simulator on continuous uncertainty
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ResponseSurface {
    /// Number of training points; required for supplied samples
    #[serde(default)]
    pub training_size: Option<usize>,
    #[serde(default)]
    pub subsample: RsSubsample,
}

// =============================================================================
// Drivers & modes
// =============================================================================

/// Executables referenced from the APPLICATION block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DriverPaths {
    #[serde(default)]
    pub driver: Option<PathBuf>,
    #[serde(default)]
    pub opt_driver: Option<PathBuf>,
    #[serde(default)]
    pub ensemble_opt_driver: Option<PathBuf>,
    #[serde(default)]
    pub aux_opt_driver: Option<PathBuf>,
}

impl DriverPaths {
    pub fn has_optimizer_driver(&self) -> bool {
        self.opt_driver.is_some() || self.ensemble_opt_driver.is_some()
    }
}

/// Response pattern of the configured driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerMode {
    /// Driver is a plain simulator; the engine's own search optimizes recourse
    SimulatorAsDriver,
    /// Driver is itself an optimizer for the recourse variables
    #[default]
    OptimizerAsDriver,
}

// =============================================================================
// Problem
// =============================================================================

/// Complete OUU problem description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OuuProblem {
    /// Stem used for generated file names
    pub name: String,
    pub variables: Vec<Variable>,
    pub outputs: Vec<OutputSpec>,
    #[serde(default)]
    pub aggregation: Aggregation,
    #[serde(default)]
    pub discrete_sample: Option<DiscreteSample>,
    #[serde(default)]
    pub continuous_sample: Option<ContinuousSample>,
    #[serde(default)]
    pub response_surface: Option<ResponseSurface>,
    #[serde(default)]
    pub drivers: DriverPaths,
    #[serde(default)]
    pub mode: OptimizerMode,
}

impl OuuProblem {
    /// Load a problem description from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, OuuError> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Non-fixed variables in declaration order
    pub fn active_variables(&self) -> impl Iterator<Item = &Variable> {
        self.variables.iter().filter(|v| !v.role.is_fixed())
    }

    pub fn outputs_with_role(&self, role: OutputRole) -> impl Iterator<Item = &OutputSpec> {
        self.outputs.iter().filter(move |o| o.role == role)
    }

    pub fn has_constraints(&self) -> bool {
        self.outputs_with_role(OutputRole::Constraint).next().is_some()
    }

    pub fn has_derivatives(&self) -> bool {
        self.outputs_with_role(OutputRole::Derivative).next().is_some()
    }

    /// Starting point, available only when every active variable has a value
    pub fn initial_point(&self) -> Option<Vec<f64>> {
        self.active_variables().map(|v| v.value).collect()
    }
}
