use crate::error::{Result, SddpError};

/// Changes the probabilities of a set of outcomes given their costs, so
/// that the expectation under the new probabilities measures the risk of
/// the outcomes.
pub trait RiskMeasure: Send + Sync + std::fmt::Debug {
    fn adjust_probabilities(
        &self,
        probabilities: &[f64],
        costs: &[f64],
    ) -> Vec<f64>;
}

#[derive(Debug, Default)]
pub struct Expectation {}

impl Expectation {
    pub fn new() -> Self {
        Self {}
    }
}

impl RiskMeasure for Expectation {
    fn adjust_probabilities(
        &self,
        probabilities: &[f64],
        _costs: &[f64],
    ) -> Vec<f64> {
        probabilities.to_vec()
    }
}

#[derive(Debug, Default)]
pub struct WorstCase {}

impl RiskMeasure for WorstCase {
    fn adjust_probabilities(
        &self,
        probabilities: &[f64],
        costs: &[f64],
    ) -> Vec<f64> {
        let mut adjusted = vec![0.0; probabilities.len()];
        // only outcomes that can happen are candidates
        let worst = costs
            .iter()
            .enumerate()
            .filter(|(i, _)| probabilities[*i] > 0.0)
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i);
        if let Some(i) = worst {
            adjusted[i] = 1.0;
        }
        adjusted
    }
}

/// Average value at risk of the `alpha` fraction of costliest outcomes.
/// `alpha = 1` is the expectation, and alpha close to zero approaches the
/// worst case.
#[derive(Debug)]
pub struct ConditionalValueAtRisk {
    alpha: f64,
}

impl ConditionalValueAtRisk {
    pub fn new(alpha: f64) -> Result<Self> {
        if !(alpha > 0.0 && alpha <= 1.0) {
            return Err(SddpError::UnsupportedRiskMeasure(format!(
                "cvar({alpha})"
            )));
        }
        Ok(Self { alpha })
    }
}

impl RiskMeasure for ConditionalValueAtRisk {
    fn adjust_probabilities(
        &self,
        probabilities: &[f64],
        costs: &[f64],
    ) -> Vec<f64> {
        let mut order: Vec<usize> = (0..costs.len()).collect();
        order.sort_by(|&a, &b| costs[b].total_cmp(&costs[a]));
        let mut adjusted = vec![0.0; probabilities.len()];
        let mut remaining = 1.0;
        for i in order {
            if remaining <= 0.0 {
                break;
            }
            let mass = (probabilities[i] / self.alpha).min(remaining);
            adjusted[i] = mass;
            remaining -= mass;
        }
        adjusted
    }
}

/// lambda * E[X] + (1 - lambda) * AV@R_alpha[X]
#[derive(Debug)]
pub struct ConvexCombination {
    lambda: f64,
    cvar: ConditionalValueAtRisk,
}

impl ConvexCombination {
    pub fn new(lambda: f64, alpha: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&lambda) {
            return Err(SddpError::UnsupportedRiskMeasure(format!(
                "eavar({lambda},{alpha})"
            )));
        }
        Ok(Self {
            lambda,
            cvar: ConditionalValueAtRisk::new(alpha)?,
        })
    }
}

impl RiskMeasure for ConvexCombination {
    fn adjust_probabilities(
        &self,
        probabilities: &[f64],
        costs: &[f64],
    ) -> Vec<f64> {
        let tail = self.cvar.adjust_probabilities(probabilities, costs);
        probabilities
            .iter()
            .zip(tail.iter())
            .map(|(p, q)| self.lambda * p + (1.0 - self.lambda) * q)
            .collect()
    }
}

fn parse_arguments(kind: &str, name: &str) -> Option<Vec<f64>> {
    let inner = kind.strip_prefix(name)?.strip_prefix('(')?.strip_suffix(')')?;
    inner.split(',').map(|a| a.trim().parse::<f64>().ok()).collect()
}

/// Builds a risk measure from its textual description:
/// `expectation`, `worst_case`, `cvar(alpha)` or `eavar(lambda,alpha)`.
pub fn factory(kind: &str) -> Result<Box<dyn RiskMeasure>> {
    let unsupported = || SddpError::UnsupportedRiskMeasure(kind.to_string());
    let kind = kind.trim();
    match kind {
        "expectation" => Ok(Box::new(Expectation::new())),
        "worst_case" => Ok(Box::new(WorstCase::default())),
        _ if kind.starts_with("cvar") => {
            match parse_arguments(kind, "cvar").as_deref() {
                Some([alpha]) => {
                    Ok(Box::new(ConditionalValueAtRisk::new(*alpha)?))
                }
                _ => Err(unsupported()),
            }
        }
        _ if kind.starts_with("eavar") => {
            match parse_arguments(kind, "eavar").as_deref() {
                Some([lambda, alpha]) => {
                    Ok(Box::new(ConvexCombination::new(*lambda, *alpha)?))
                }
                _ => Err(unsupported()),
            }
        }
        _ => Err(unsupported()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: &[f64], b: &[f64]) {
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() < 1e-12, "{a:?} != {b:?}");
        }
    }

    #[test]
    fn test_expectation_adjust_probabilities() {
        let expectation = Expectation::new();
        let probabilities = vec![0.25, 0.75];
        let costs = vec![100.0, 200.0];
        let adjusted = expectation.adjust_probabilities(&probabilities, &costs);
        assert_eq!(adjusted, probabilities);
    }

    #[test]
    fn test_worst_case_adjust_probabilities() {
        let worst = WorstCase::default();
        let adjusted =
            worst.adjust_probabilities(&[0.5, 0.3, 0.2], &[10.0, 30.0, 20.0]);
        assert_eq!(adjusted, vec![0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_worst_case_ignores_impossible_outcomes() {
        let worst = WorstCase::default();
        let adjusted = worst.adjust_probabilities(&[1.0, 0.0], &[10.0, 30.0]);
        assert_eq!(adjusted, vec![1.0, 0.0]);
    }

    #[test]
    fn test_cvar_adjust_probabilities() {
        let cvar = ConditionalValueAtRisk::new(0.5).unwrap();
        let adjusted = cvar
            .adjust_probabilities(&[0.25, 0.25, 0.25, 0.25], &[1.0, 4.0, 3.0, 2.0]);
        assert_close(&adjusted, &[0.0, 0.5, 0.5, 0.0]);
    }

    #[test]
    fn test_cvar_splits_the_boundary_outcome() {
        let cvar = ConditionalValueAtRisk::new(0.4).unwrap();
        let adjusted = cvar.adjust_probabilities(&[0.5, 0.5], &[10.0, 20.0]);
        assert_close(&adjusted, &[0.0, 1.0]);
        let cvar = ConditionalValueAtRisk::new(0.8).unwrap();
        let adjusted = cvar.adjust_probabilities(&[0.5, 0.5], &[10.0, 20.0]);
        assert_close(&adjusted, &[0.375, 0.625]);
    }

    #[test]
    fn test_cvar_with_alpha_one_is_expectation() {
        let cvar = ConditionalValueAtRisk::new(1.0).unwrap();
        let adjusted = cvar.adjust_probabilities(&[0.2, 0.8], &[5.0, 1.0]);
        assert_close(&adjusted, &[0.2, 0.8]);
    }

    #[test]
    fn test_convex_combination() {
        let eavar = ConvexCombination::new(0.5, 0.5).unwrap();
        let adjusted = eavar.adjust_probabilities(&[0.5, 0.5], &[10.0, 20.0]);
        assert_close(&adjusted, &[0.25, 0.75]);
        assert!((adjusted.iter().sum::<f64>() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_factory_expectation() {
        let risk_measure = factory("expectation").unwrap();
        let adjusted = risk_measure.adjust_probabilities(&[0.5, 0.5], &[10.0, 20.0]);
        assert_eq!(adjusted, vec![0.5, 0.5]);
    }

    #[test]
    fn test_factory_parametrized_measures() {
        let cvar = factory("cvar(0.5)").unwrap();
        let adjusted = cvar.adjust_probabilities(&[0.5, 0.5], &[10.0, 20.0]);
        assert_close(&adjusted, &[0.0, 1.0]);
        let eavar = factory("eavar(0.5, 0.5)").unwrap();
        let adjusted = eavar.adjust_probabilities(&[0.5, 0.5], &[10.0, 20.0]);
        assert_close(&adjusted, &[0.25, 0.75]);
        assert!(factory("worst_case").is_ok());
    }

    #[test]
    fn test_factory_unsupported() {
        assert!(matches!(
            factory("entropic"),
            Err(SddpError::UnsupportedRiskMeasure(_))
        ));
        assert!(factory("cvar(1.5)").is_err());
        assert!(factory("cvar()").is_err());
        assert!(factory("eavar(0.5)").is_err());
    }
}
