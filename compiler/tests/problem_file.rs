use ouuc::codegen::ProblemFileWriter;
use ouuc::problem::{
    Distribution, DistributionKind, DriverPaths, OuuProblem, OutputRole, OutputSpec, Variable,
    VariableRole,
};
use ouuc::ValidationError;
use std::path::PathBuf;

fn demo_problem() -> OuuProblem {
    OuuProblem {
        name: "demo".into(),
        variables: vec![
            Variable::new("x1", VariableRole::DesignContinuous, -5.0, 5.0),
            Variable::new("t", VariableRole::Fixed, 0.0, 2.0).with_value(1.5),
            Variable::new("x2", VariableRole::DesignDiscrete, 0.0, 10.0),
            Variable::new("z", VariableRole::Recourse, 0.0, 1.0),
            Variable::new("u", VariableRole::UncertainContinuous, 0.0, 1.0)
                .with_distribution(Distribution::normal(0.5, 0.1)),
        ],
        outputs: vec![
            OutputSpec::new("cost", OutputRole::Objective),
            OutputSpec::new("ignored", OutputRole::Unused),
            OutputSpec::new("g1", OutputRole::Constraint),
            OutputSpec::new("g2", OutputRole::Constraint),
        ],
        aggregation: Default::default(),
        discrete_sample: None,
        continuous_sample: None,
        response_surface: None,
        drivers: DriverPaths {
            opt_driver: Some(PathBuf::from("/opt/ouu/bin/optdriver")),
            ..Default::default()
        },
        mode: Default::default(),
    }
}

/// Pull `dimension = <n>` and the number of `variable` lines out of a block
fn block_counts(text: &str, block: &str) -> (usize, usize) {
    let mut lines = text.lines().skip_while(|l| *l != block).skip(1);
    let mut dimension = 0;
    let mut variables = 0;
    for line in lines.by_ref() {
        let line = line.trim();
        if line == "END" {
            break;
        }
        if let Some(rest) = line.strip_prefix("dimension = ") {
            dimension = rest.parse().expect("dimension value");
        }
        if line.starts_with("variable ") {
            variables += 1;
        }
    }
    (dimension, variables)
}

#[test]
fn test_block_dimensions_match_counts() {
    let problem = demo_problem();
    let text = ProblemFileWriter::new(&problem)
        .render()
        .expect("render failed");

    let (in_dim, in_vars) = block_counts(&text, "INPUT");
    assert_eq!(in_dim, 4);
    assert_eq!(in_vars, 4);

    // objective first, then constraints; unused outputs are left out
    let (out_dim, out_vars) = block_counts(&text, "OUTPUT");
    assert_eq!(out_dim, 3);
    assert_eq!(out_vars, 3);
}

#[test]
fn test_input_block_contents() {
    let problem = demo_problem();
    let text = ProblemFileWriter::new(&problem).render().unwrap();

    assert!(text.starts_with("PSUADE\nINPUT\n"));
    assert!(text.contains("   num_fixed 1\n"));
    assert!(text.contains("   fixed 1 t =  1.5000000000000000e+00\n"));
    assert!(text.contains(
        "   variable 1 x1  =  -5.0000000000000000e+00   5.0000000000000000e+00\n"
    ));
    assert!(text.contains("   discrete 2\n"));
    assert!(text.contains("   PDF 4 N  5.0000000000000000e-01  1.0000000000000000e-01\n"));
    assert!(text.contains("   optimization method = ouu\n"));
    assert!(text.contains("   opt_driver = /opt/ouu/bin/optdriver\n"));
    assert!(text.contains("   driver = NONE\n"));
    assert!(text.ends_with("END\nEND\n"));
}

#[test]
fn test_initial_point_block_when_all_values_set() {
    let mut problem = demo_problem();
    for (v, x) in problem
        .variables
        .iter_mut()
        .filter(|v| !v.role.is_fixed())
        .zip([1.0, 2.0, 0.5, 0.25])
    {
        v.value = Some(x);
    }
    let text = ProblemFileWriter::new(&problem)
        .random_seed(Some(41))
        .render()
        .unwrap();

    let head: Vec<&str> = text.lines().take(4).collect();
    assert_eq!(head, vec!["PSUADE_IO", "4 3 1", "1 0", "  1.0000000000000000e+00"]);
    assert!(text.contains(" 9.9999999999999997e+34\nPSUADE_IO\nPSUADE\n"));
    assert!(text.contains("   random_seed = 41\n"));
}

#[test]
fn test_sample_distribution_rejected() {
    let mut problem = demo_problem();
    problem.variables[4].distribution = Distribution::new(DistributionKind::Sample, None, None);
    let err = ProblemFileWriter::new(&problem).render().unwrap_err();
    assert!(matches!(err, ValidationError::UnsupportedDistribution { .. }));
}

#[test]
fn test_two_objectives_rejected() {
    let mut problem = demo_problem();
    problem.outputs[1].role = OutputRole::Objective;
    assert_eq!(
        ProblemFileWriter::new(&problem).render().unwrap_err(),
        ValidationError::MultiObjectiveUnsupported(2)
    );
}
