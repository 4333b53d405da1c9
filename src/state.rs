use crate::cut;
use crate::risk_measure::RiskMeasure;
use crate::utils;

/// One solved (child node, noise term) pair of the backward pass, seen
/// from the parent node that is building a cut.
#[derive(Debug, Clone)]
pub struct CutOutcome {
    /// transition probability times noise probability
    pub probability: f64,
    pub discount_factor: f64,
    pub total_stage_objective: f64,
    pub water_value: Vec<f64>,
}

/// An outgoing state visited by the forward pass at some node, with the
/// cut that gives the highest future cost estimate at it.
#[derive(Debug, Clone, PartialEq)]
pub struct VisitedState {
    coefficients: Vec<f64>,
    dominating_objective: f64,
    dominating_cut_id: Option<usize>,
}

impl VisitedState {
    pub fn new(coefficients: Vec<f64>) -> Self {
        Self {
            coefficients,
            dominating_objective: f64::NEG_INFINITY,
            dominating_cut_id: None,
        }
    }

    pub fn get_dimension(&self) -> usize {
        self.coefficients.len()
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    pub fn get_dominating_objective(&self) -> f64 {
        self.dominating_objective
    }

    pub fn get_dominating_cut_id(&self) -> Option<usize> {
        self.dominating_cut_id
    }

    pub fn update_dominating_cut(&mut self, cut_id: usize, height: f64) {
        self.dominating_cut_id = Some(cut_id);
        self.dominating_objective = height;
    }

    /// Aggregates the outcomes of every child node and noise term into a
    /// single cut at this state. When the outgoing probabilities sum below
    /// one, the missing mass is a zero cost outcome (the trajectory ends).
    pub fn compute_new_cut(
        &self,
        cut_id: usize,
        iteration: usize,
        risk_measure: &dyn RiskMeasure,
        outcomes: &[CutOutcome],
    ) -> cut::BendersCut {
        let mut probabilities: Vec<f64> =
            outcomes.iter().map(|o| o.probability).collect();
        let mut costs: Vec<f64> = outcomes
            .iter()
            .map(|o| o.discount_factor * o.total_stage_objective)
            .collect();
        let total: f64 = probabilities.iter().sum();
        if total < 1.0 - 1e-9 {
            probabilities.push(1.0 - total);
            costs.push(0.0);
        }
        let adjusted_probabilities =
            risk_measure.adjust_probabilities(&probabilities, &costs);

        let mut cut_coefficients = vec![0.0; self.get_dimension()];
        let mut objective = 0.0;
        for (index, outcome) in outcomes.iter().enumerate() {
            let weight =
                adjusted_probabilities[index] * outcome.discount_factor;
            for (hydro_id, value) in outcome.water_value.iter().enumerate() {
                cut_coefficients[hydro_id] += weight * value;
            }
            objective += weight * outcome.total_stage_objective;
        }

        let cut_rhs = objective
            - utils::dot_product(&cut_coefficients, &self.coefficients);
        cut::BendersCut::new(cut_id, cut_coefficients, cut_rhs, iteration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::risk_measure::{Expectation, WorstCase};

    fn outcome(
        probability: f64,
        objective: f64,
        water_value: f64,
    ) -> CutOutcome {
        CutOutcome {
            probability,
            discount_factor: 1.0,
            total_stage_objective: objective,
            water_value: vec![water_value],
        }
    }

    #[test]
    fn test_new_visited_state() {
        let state = VisitedState::new(vec![10.0, 20.0]);
        assert_eq!(state.get_dimension(), 2);
        assert_eq!(state.coefficients(), &[10.0, 20.0]);
        assert_eq!(state.get_dominating_cut_id(), None);
        assert_eq!(state.get_dominating_objective(), f64::NEG_INFINITY);
    }

    #[test]
    fn test_compute_new_cut_with_expectation() {
        let state = VisitedState::new(vec![50.0]);
        let outcomes =
            vec![outcome(0.5, 100.0, -2.0), outcome(0.5, 300.0, -4.0)];
        let cut = state.compute_new_cut(3, 1, &Expectation::new(), &outcomes);
        assert_eq!(cut.id, 3);
        assert_eq!(cut.coefficients, vec![-3.0]);
        // 200 - (-3 * 50)
        assert_eq!(cut.rhs, 350.0);
        // the cut is tight at the state it was computed
        assert_eq!(cut.eval_height_at_state(state.coefficients()), 200.0);
    }

    #[test]
    fn test_compute_new_cut_with_worst_case() {
        let state = VisitedState::new(vec![50.0]);
        let outcomes =
            vec![outcome(0.5, 100.0, -2.0), outcome(0.5, 300.0, -4.0)];
        let cut = state.compute_new_cut(0, 1, &WorstCase::default(), &outcomes);
        assert_eq!(cut.coefficients, vec![-4.0]);
        assert_eq!(cut.eval_height_at_state(&[50.0]), 300.0);
    }

    #[test]
    fn test_compute_new_cut_with_discount_and_termination() {
        let state = VisitedState::new(vec![0.0]);
        let outcomes = vec![CutOutcome {
            probability: 0.5,
            discount_factor: 0.9,
            total_stage_objective: 100.0,
            water_value: vec![-1.0],
        }];
        let cut = state.compute_new_cut(0, 1, &Expectation::new(), &outcomes);
        assert!((cut.rhs - 45.0).abs() < 1e-12);
        assert!((cut.coefficients[0] + 0.45).abs() < 1e-12);
    }
}
