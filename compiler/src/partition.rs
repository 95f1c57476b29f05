//! Variable partitioning into OUU roles
//!
//! Splits the non-fixed variables into the four engine classes and records
//! the per-variable role codes the engine's menu asks for.

use crate::error::ValidationError;
use crate::problem::{Variable, VariableRole};
use serde::{Deserialize, Serialize};

/// Role counts and codes for the non-fixed variables
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    /// Design variables (Z1 + Z1d)
    pub m1: usize,
    /// Recourse variables (Z2)
    pub m2: usize,
    /// Discrete uncertain variables (Z3)
    pub m3: usize,
    /// Continuous uncertain variables (Z4)
    pub m4: usize,
    /// Role code per non-fixed variable, in declaration order
    pub role_codes: Vec<u8>,
}

impl Partition {
    /// Number of non-fixed variables
    pub fn total(&self) -> usize {
        self.m1 + self.m2 + self.m3 + self.m4
    }

    pub fn uncertain(&self) -> usize {
        self.m3 + self.m4
    }
}

/// Classify variables and count each role
///
/// Fails when no design variable is present.
pub fn partition(variables: &[Variable]) -> Result<Partition, ValidationError> {
    let role_codes: Vec<u8> = variables.iter().filter_map(|v| v.role.code()).collect();
    let count = |code: u8| role_codes.iter().filter(|&&c| c == code).count();

    let part = Partition {
        m1: count(1),
        m2: count(2),
        m3: count(3),
        m4: count(4),
        role_codes,
    };

    if part.m1 == 0 {
        return Err(ValidationError::InvalidProblem(
            "number of Z1 (design opt) variables must be at least 1".to_string(),
        ));
    }

    Ok(part)
}

/// 1-based indices (among non-fixed variables) of discrete design variables
pub fn discrete_design_indices(variables: &[Variable]) -> Vec<usize> {
    variables
        .iter()
        .filter(|v| !v.role.is_fixed())
        .enumerate()
        .filter(|(_, v)| v.role == VariableRole::DesignDiscrete)
        .map(|(i, _)| i + 1)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::VariableRole::*;
    use proptest::prelude::*;

    fn vars(roles: &[VariableRole]) -> Vec<Variable> {
        roles
            .iter()
            .enumerate()
            .map(|(i, &r)| Variable::new(format!("x{}", i + 1), r, 0.0, 1.0))
            .collect()
    }

    #[test]
    fn test_partition_counts() {
        let p = partition(&vars(&[
            DesignContinuous,
            Fixed,
            DesignDiscrete,
            Recourse,
            UncertainDiscrete,
            UncertainContinuous,
            UncertainContinuous,
        ]))
        .unwrap();
        assert_eq!((p.m1, p.m2, p.m3, p.m4), (2, 1, 1, 2));
        assert_eq!(p.role_codes, vec![1, 1, 2, 3, 4, 4]);
        assert_eq!(p.total(), 6);
    }

    #[test]
    fn test_partition_requires_design_variable() {
        let err = partition(&vars(&[Recourse, UncertainDiscrete, Fixed])).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidProblem(_)));
        assert!(partition(&[]).is_err());
    }

    #[test]
    fn test_discrete_indices_skip_fixed() {
        let v = vars(&[Fixed, DesignContinuous, Fixed, DesignDiscrete]);
        assert_eq!(discrete_design_indices(&v), vec![2]);
    }

    fn role_strategy() -> impl Strategy<Value = VariableRole> {
        prop_oneof![
            Just(Fixed),
            Just(DesignContinuous),
            Just(DesignDiscrete),
            Just(Recourse),
            Just(UncertainDiscrete),
            Just(UncertainContinuous),
        ]
    }

    proptest! {
        #[test]
        fn counts_cover_every_active_variable(roles in prop::collection::vec(role_strategy(), 0..24)) {
            let v = vars(&roles);
            let active = roles.iter().filter(|r| !r.is_fixed()).count();
            match partition(&v) {
                Ok(p) => {
                    prop_assert_eq!(p.total(), active);
                    prop_assert_eq!(p.role_codes.len(), active);
                    prop_assert!(p.m1 >= 1);
                }
                Err(_) => {
                    let design = roles
                        .iter()
                        .filter(|r| matches!(r, DesignContinuous | DesignDiscrete))
                        .count();
                    prop_assert_eq!(design, 0);
                }
            }
        }
    }
}
