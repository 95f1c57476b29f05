//! PSUADE problem file generation
//!
//! Serializes an [`OuuProblem`] into the block-structured input file read by
//! the engine: INPUT, OUTPUT, METHOD, APPLICATION and ANALYSIS sections,
//! optionally preceded by a `PSUADE_IO` block holding the starting point.

use crate::error::{OuuError, ValidationError};
use crate::partition::discrete_design_indices;
use crate::problem::{DistributionKind, OuuProblem, OutputRole, OutputSpec};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// Placeholder written for outputs of a not-yet-evaluated starting point
const UNDEFINED_OUTPUT: &str = " 9.9999999999999997e+34";

/// Format a float the way the engine's reader expects: a sign column,
/// 16 digits after the point and a signed two-digit exponent
/// (`-1.5000000000000000e+01`, ` 2.0000000000000000e-03`).
pub fn sci(x: f64) -> String {
    if !x.is_finite() {
        return format!(" {}", x);
    }
    let sign = if x.is_sign_negative() && x != 0.0 { '-' } else { ' ' };
    let raw = format!("{:.16e}", x.abs());
    let (mantissa, exponent) = raw.split_once('e').unwrap_or((raw.as_str(), "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);
    let exp_sign = if exponent < 0 { '-' } else { '+' };
    format!("{}{}e{}{:02}", sign, mantissa, exp_sign, exponent.abs())
}

/// Active outputs in the order the engine numbers them
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout<'a> {
    pub objective: &'a OutputSpec,
    pub constraints: Vec<&'a OutputSpec>,
    pub derivatives: Vec<&'a OutputSpec>,
}

impl<'a> OutputLayout<'a> {
    /// Check output roles and order them objective, constraints, derivatives
    pub fn resolve(problem: &'a OuuProblem) -> Result<Self, ValidationError> {
        let objectives: Vec<&OutputSpec> = problem.outputs_with_role(OutputRole::Objective).collect();
        if objectives.len() != 1 {
            return Err(ValidationError::MultiObjectiveUnsupported(objectives.len()));
        }
        let constraints: Vec<&OutputSpec> =
            problem.outputs_with_role(OutputRole::Constraint).collect();
        let derivatives: Vec<&OutputSpec> =
            problem.outputs_with_role(OutputRole::Derivative).collect();

        if !constraints.is_empty() && !derivatives.is_empty() {
            return Err(ValidationError::ConflictingRoles {
                constraints: constraints.len(),
                derivatives: derivatives.len(),
            });
        }
        let inputs = problem.active_variables().count();
        if !derivatives.is_empty() && derivatives.len() != inputs {
            return Err(ValidationError::DerivativeCountMismatch {
                derivatives: derivatives.len(),
                inputs,
            });
        }

        Ok(Self {
            objective: objectives[0],
            constraints,
            derivatives,
        })
    }

    pub fn len(&self) -> usize {
        1 + self.constraints.len() + self.derivatives.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a OutputSpec> + '_ {
        std::iter::once(self.objective)
            .chain(self.constraints.iter().copied())
            .chain(self.derivatives.iter().copied())
    }

    /// Gradient-based OUU is selected whenever derivatives are supplied
    pub fn optimization_method(&self) -> &'static str {
        if self.derivatives.is_empty() {
            "ouu"
        } else {
            "ouu_lbfgs"
        }
    }
}

/// Writer for the engine's problem file
#[derive(Debug, Clone)]
pub struct ProblemFileWriter<'a> {
    problem: &'a OuuProblem,
    random_seed: Option<u64>,
    initial_point: Option<Vec<f64>>,
}

impl<'a> ProblemFileWriter<'a> {
    pub fn new(problem: &'a OuuProblem) -> Self {
        Self {
            problem,
            random_seed: None,
            initial_point: problem.initial_point(),
        }
    }

    /// Seed written into the METHOD block
    pub fn random_seed(mut self, seed: Option<u64>) -> Self {
        self.random_seed = seed;
        self
    }

    /// Override (or drop) the `PSUADE_IO` starting point
    pub fn initial_point(mut self, point: Option<Vec<f64>>) -> Self {
        self.initial_point = point;
        self
    }

    /// Render the complete problem file
    pub fn render(&self) -> Result<String, ValidationError> {
        let layout = OutputLayout::resolve(self.problem)?;
        let mut out = String::new();

        if let Some(point) = &self.initial_point {
            self.write_initial_point(&mut out, point, layout.len());
        }
        out.push_str("PSUADE\n");
        self.write_inputs(&mut out)?;
        write_outputs(&mut out, &layout);
        self.write_method(&mut out);
        self.write_application(&mut out);
        write_analysis(&mut out, &layout);
        out.push_str("END\n");

        Ok(out)
    }

    /// Render and write to `path`
    pub fn write_to(&self, path: &Path) -> Result<PathBuf, OuuError> {
        let text = self.render()?;
        std::fs::write(path, text)?;
        tracing::debug!(path = %path.display(), "wrote OUU problem file");
        Ok(path.to_path_buf())
    }

    fn write_initial_point(&self, out: &mut String, point: &[f64], n_outputs: usize) {
        out.push_str("PSUADE_IO\n");
        let _ = writeln!(out, "{} {} 1", point.len(), n_outputs);
        // one sample, not yet run
        out.push_str("1 0\n");
        for &x in point {
            let _ = writeln!(out, " {}", sci(x));
        }
        for _ in 0..n_outputs {
            out.push_str(UNDEFINED_OUTPUT);
            out.push('\n');
        }
        out.push_str("PSUADE_IO\n");
    }

    fn write_inputs(&self, out: &mut String) -> Result<(), ValidationError> {
        let variables = &self.problem.variables;
        let n_active = self.problem.active_variables().count();
        let n_fixed = variables.len() - n_active;

        out.push_str("INPUT\n");
        if n_fixed > 0 {
            let _ = writeln!(out, "   num_fixed {}", n_fixed);
        }
        let _ = writeln!(out, "   dimension = {}", n_active);

        let mut variable_index = 1;
        let mut fixed_index = 1;
        for v in variables {
            if v.role.is_fixed() {
                let _ = writeln!(
                    out,
                    "   fixed {} {} = {}",
                    fixed_index,
                    v.name,
                    sci(v.fixed_value())
                );
                fixed_index += 1;
            } else {
                let _ = writeln!(
                    out,
                    "   variable {} {}  =  {}  {}",
                    variable_index,
                    v.name,
                    sci(v.min),
                    sci(v.max)
                );
                variable_index += 1;
            }
        }

        for index in discrete_design_indices(variables) {
            let _ = writeln!(out, "   discrete {}", index);
        }

        for (i, v) in self.problem.active_variables().enumerate() {
            let dist = &v.distribution;
            match dist.kind {
                DistributionKind::Uniform => {}
                DistributionKind::Sample => {
                    return Err(ValidationError::UnsupportedDistribution {
                        variable: v.name.clone(),
                        distribution: dist.kind.to_string(),
                    });
                }
                kind => {
                    let _ = write!(out, "   PDF {} {}", i + 1, kind.psuade_code());
                    for p in [dist.param1, dist.param2].into_iter().flatten() {
                        let _ = write!(out, " {}", sci(p));
                    }
                    out.push('\n');
                }
            }
        }

        out.push_str("END\n");
        Ok(())
    }

    fn write_method(&self, out: &mut String) {
        out.push_str("METHOD\n");
        // the engine builds its initial guess from a single MC point
        out.push_str("   sampling = MC\n");
        out.push_str("   num_samples = 1\n");
        if let Some(seed) = self.random_seed {
            let _ = writeln!(out, "   random_seed = {}", seed);
        }
        out.push_str("END\n");
    }

    fn write_application(&self, out: &mut String) {
        let drivers = &self.problem.drivers;
        let show = |p: &Option<PathBuf>| {
            p.as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "NONE".to_string())
        };
        out.push_str("APPLICATION\n");
        let _ = writeln!(out, "   driver = {}", show(&drivers.driver));
        let _ = writeln!(out, "   opt_driver = {}", show(&drivers.opt_driver));
        let _ = writeln!(
            out,
            "   ensemble_opt_driver = {}",
            show(&drivers.ensemble_opt_driver)
        );
        let _ = writeln!(out, "   aux_opt_driver = {}", show(&drivers.aux_opt_driver));
        out.push_str("   launch_interval = 0\n");
        out.push_str("END\n");
    }
}

fn write_outputs(out: &mut String, layout: &OutputLayout<'_>) {
    out.push_str("OUTPUT\n");
    let _ = writeln!(out, "   dimension = {}", layout.len());
    for (i, output) in layout.iter().enumerate() {
        let _ = writeln!(out, "   variable {} {}", i + 1, output.name);
    }
    out.push_str("END\n");
}

fn write_analysis(out: &mut String, layout: &OutputLayout<'_>) {
    out.push_str("ANALYSIS\n");
    let _ = writeln!(out, "   optimization method = {}", layout.optimization_method());
    out.push_str("   optimization num_local_minima = 1\n");
    out.push_str("   optimization max_feval = 1000000\n");
    out.push_str("   optimization tolerance = 1.000000e-06\n");
    out.push_str("   optimization num_fmin = 1\n");
    out.push_str("   optimization print_level = 3\n");
    out.push_str("   analyzer output_id = 1\n");
    out.push_str("   opt_expert\n");
    out.push_str("   printlevel 0\n");
    out.push_str("END\n");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::{Distribution, Variable, VariableRole};

    fn problem() -> OuuProblem {
        OuuProblem {
            name: "unit".into(),
            variables: vec![
                Variable::new("x1", VariableRole::DesignContinuous, -5.0, 5.0),
                Variable::new("t", VariableRole::Fixed, 0.0, 1.0).with_value(0.25),
                Variable::new("x2", VariableRole::DesignDiscrete, 0.0, 4.0),
                Variable::new("u", VariableRole::UncertainContinuous, 0.0, 1.0)
                    .with_distribution(Distribution::normal(0.5, 0.1)),
            ],
            outputs: vec![
                OutputSpec::new("g1", OutputRole::Constraint),
                OutputSpec::new("f", OutputRole::Objective),
                OutputSpec::new("aux", OutputRole::Unused),
            ],
            aggregation: Default::default(),
            discrete_sample: None,
            continuous_sample: None,
            response_surface: None,
            drivers: Default::default(),
            mode: Default::default(),
        }
    }

    #[test]
    fn test_sci_format() {
        assert_eq!(sci(1.0), " 1.0000000000000000e+00");
        assert_eq!(sci(-15.0), "-1.5000000000000000e+01");
        assert_eq!(sci(0.002), " 2.0000000000000000e-03");
        assert_eq!(sci(0.0), " 0.0000000000000000e+00");
        assert_eq!(sci(1e300), " 1.0000000000000000e+300");
    }

    #[test]
    fn test_render_blocks() {
        let text = ProblemFileWriter::new(&problem()).render().unwrap();
        assert!(text.starts_with("PSUADE\nINPUT\n   num_fixed 1\n   dimension = 3\n"));
        assert!(text.contains("   variable 1 x1  =  -5.0000000000000000e+00   5.0000000000000000e+00\n"));
        assert!(text.contains("   fixed 1 t =  2.5000000000000000e-01\n"));
        assert!(text.contains("   discrete 2\n"));
        assert!(text.contains("   PDF 3 N  5.0000000000000000e-01  1.0000000000000000e-01\n"));
        // objective first, then constraints
        assert!(text.contains("OUTPUT\n   dimension = 2\n   variable 1 f\n   variable 2 g1\nEND\n"));
        assert!(text.contains("   driver = NONE\n"));
        assert!(text.contains("   optimization method = ouu\n"));
        assert!(text.ends_with("END\nEND\n"));
        assert!(!text.contains("random_seed"));
    }

    #[test]
    fn test_initial_point_block() {
        let mut p = problem();
        for v in p.variables.iter_mut() {
            v.value.get_or_insert(1.0);
        }
        let text = ProblemFileWriter::new(&p).random_seed(Some(41491431)).render().unwrap();
        assert!(text.starts_with("PSUADE_IO\n3 2 1\n1 0\n  1.0000000000000000e+00\n"));
        assert_eq!(text.matches(UNDEFINED_OUTPUT).count(), 2);
        assert!(text.contains("PSUADE_IO\nPSUADE\n"));
        assert!(text.contains("   random_seed = 41491431\n"));
    }

    #[test]
    fn test_rejects_sample_distribution() {
        let mut p = problem();
        p.variables[3].distribution = Distribution::new(DistributionKind::Sample, None, None);
        let err = ProblemFileWriter::new(&p).render().unwrap_err();
        assert!(matches!(err, ValidationError::UnsupportedDistribution { .. }));
    }

    #[test]
    fn test_objective_count_enforced() {
        let mut p = problem();
        p.outputs[2].role = OutputRole::Objective;
        assert_eq!(
            ProblemFileWriter::new(&p).render().unwrap_err(),
            ValidationError::MultiObjectiveUnsupported(2)
        );
        p.outputs.retain(|o| o.role != OutputRole::Objective);
        assert_eq!(
            ProblemFileWriter::new(&p).render().unwrap_err(),
            ValidationError::MultiObjectiveUnsupported(0)
        );
    }

    #[test]
    fn test_constraints_and_derivatives_conflict() {
        let mut p = problem();
        p.outputs[2].role = OutputRole::Derivative;
        assert!(matches!(
            ProblemFileWriter::new(&p).render().unwrap_err(),
            ValidationError::ConflictingRoles { constraints: 1, derivatives: 1 }
        ));
    }

    #[test]
    fn test_derivatives_select_lbfgs() {
        let mut p = problem();
        p.outputs = vec![
            OutputSpec::new("f", OutputRole::Objective),
            OutputSpec::new("d1", OutputRole::Derivative),
            OutputSpec::new("d2", OutputRole::Derivative),
            OutputSpec::new("d3", OutputRole::Derivative),
        ];
        let text = ProblemFileWriter::new(&p).render().unwrap();
        assert!(text.contains("   optimization method = ouu_lbfgs\n"));
        assert!(text.contains("   dimension = 4\n"));

        p.outputs.pop();
        assert!(matches!(
            ProblemFileWriter::new(&p).render().unwrap_err(),
            ValidationError::DerivativeCountMismatch { derivatives: 2, inputs: 3 }
        ));
    }
}
