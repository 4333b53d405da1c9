//! Scaling diagnostics of the node subproblems. Badly scaled coefficients
//! lead to inaccurate duals and, consequently, to invalid cuts.

use crate::solver::Problem;

const MAX_RATIO: f64 = 1e7;
const SMALL_VALUE: f64 = 1e-3;
const LARGE_VALUE: f64 = 1e6;

/// Smallest and largest absolute values of a set of coefficients,
/// ignoring zeros and infinite values
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoefficientRange {
    pub min: f64,
    pub max: f64,
}

impl CoefficientRange {
    fn of(values: impl Iterator<Item = f64>) -> Option<Self> {
        values
            .map(f64::abs)
            .filter(|v| *v > 0.0 && v.is_finite())
            .fold(None, |range, v| match range {
                None => Some(Self { min: v, max: v }),
                Some(r) => Some(Self {
                    min: r.min.min(v),
                    max: r.max.max(v),
                }),
            })
    }

    pub fn is_well_scaled(&self) -> bool {
        self.max / self.min <= MAX_RATIO
            && self.min >= SMALL_VALUE
            && self.max <= LARGE_VALUE
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StabilityReport {
    pub node_id: usize,
    pub matrix: Option<CoefficientRange>,
    pub objective: Option<CoefficientRange>,
    pub bounds: Option<CoefficientRange>,
}

impl StabilityReport {
    pub fn is_well_scaled(&self) -> bool {
        [self.matrix, self.objective, self.bounds]
            .iter()
            .flatten()
            .all(|r| r.is_well_scaled())
    }
}

fn warn_range(node_id: usize, name: &str, range: &Option<CoefficientRange>) {
    if let Some(r) = range {
        if !r.is_well_scaled() {
            tracing::warn!(
                "node {node_id}: {name} coefficients range in [{:.2e}, {:.2e}], \
                 which may cause numerical issues",
                r.min,
                r.max
            );
        }
    }
}

/// Scans the matrix, objective and bound coefficients of a subproblem,
/// warning about the ones that may harm the solver accuracy.
pub fn report_problem(node_id: usize, problem: &Problem) -> StabilityReport {
    let report = StabilityReport {
        node_id,
        matrix: CoefficientRange::of(problem.matrix_values()),
        objective: CoefficientRange::of(problem.col_cost.iter().copied()),
        bounds: CoefficientRange::of(
            problem
                .col_lower
                .iter()
                .chain(problem.col_upper.iter())
                .chain(problem.row_lower.iter())
                .chain(problem.row_upper.iter())
                .copied(),
        ),
    };
    warn_range(node_id, "matrix", &report.matrix);
    warn_range(node_id, "objective", &report.objective);
    warn_range(node_id, "bound", &report.bounds);
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subproblem;
    use crate::system::System;

    #[test]
    fn test_coefficient_range_ignores_zeros_and_infinities() {
        let range = CoefficientRange::of(
            [0.0, -2.0, 5.0, f64::INFINITY, 0.5].into_iter(),
        )
        .unwrap();
        assert_eq!(range, CoefficientRange { min: 0.5, max: 5.0 });
        assert!(CoefficientRange::of([0.0].into_iter()).is_none());
    }

    #[test]
    fn test_default_system_is_well_scaled() {
        let (problem, _) = subproblem::build_template(&System::default(), 0.0);
        let report = report_problem(0, &problem);
        assert!(report.is_well_scaled());
        assert_eq!(report.matrix.unwrap().max, 1.0);
        assert_eq!(report.objective.unwrap().max, 50.0);
    }

    #[test]
    fn test_badly_scaled_problem() {
        let mut problem = Problem::new();
        let x = problem.add_column(1e-5, 0.0..1e8);
        problem.add_row(1.0.., &[(x, 1.0)]);
        let report = report_problem(4, &problem);
        assert!(!report.is_well_scaled());
        assert!(!report.objective.unwrap().is_well_scaled());
        assert!(!report.bounds.unwrap().is_well_scaled());
        assert!(report.matrix.unwrap().is_well_scaled());
    }
}
