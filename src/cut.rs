use crate::utils;
use serde::{Deserialize, Serialize};

/// A supporting hyperplane of the future cost of a node:
/// `alpha >= rhs + coefficients * x`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BendersCut {
    pub id: usize,
    pub coefficients: Vec<f64>,
    pub rhs: f64,
    pub active: bool,
    pub non_dominated_state_count: usize,
    pub iteration: usize,
}

impl BendersCut {
    pub fn new(
        id: usize,
        coefficients: Vec<f64>,
        rhs: f64,
        iteration: usize,
    ) -> Self {
        Self {
            id,
            coefficients,
            rhs,
            active: true,
            non_dominated_state_count: 0,
            iteration,
        }
    }

    pub fn eval_height_at_state(&self, state_coefficients: &[f64]) -> f64 {
        self.rhs + utils::dot_product(&self.coefficients, state_coefficients)
    }

    /// The `(column, factor)` pairs of the cut row
    /// `alpha - coefficients * stored_volume >= rhs`
    pub fn row_factors(
        &self,
        alpha: usize,
        stored_volume: &[usize],
    ) -> Vec<(usize, f64)> {
        let mut factors =
            Vec::<(usize, f64)>::with_capacity(stored_volume.len() + 1);
        factors.push((alpha, 1.0));
        for (hydro_id, column) in stored_volume.iter().enumerate() {
            factors.push((*column, -self.coefficients[hydro_id]));
        }
        factors
    }
}

#[derive(Debug, Default)]
pub struct BendersCutPool {
    pub pool: Vec<BendersCut>,
    pub active_cut_ids: Vec<usize>,
    pub total_cut_count: usize,
}

impl BendersCutPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, cut: BendersCut) {
        if cut.active {
            self.active_cut_ids.push(cut.id);
        }
        self.pool.push(cut);
        self.total_cut_count += 1;
    }

    pub fn activate(&mut self, cut_id: usize) {
        if !self.pool[cut_id].active {
            self.pool[cut_id].active = true;
            self.active_cut_ids.push(cut_id);
        }
    }

    pub fn deactivate(&mut self, cut_id: usize) {
        if self.pool[cut_id].active {
            self.pool[cut_id].active = false;
            self.active_cut_ids.retain(|&id| id != cut_id);
        }
    }

    pub fn active_cuts(&self) -> impl Iterator<Item = &BendersCut> {
        self.active_cut_ids.iter().map(|&id| &self.pool[id])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_benders_cut() {
        let cut = BendersCut::new(1, vec![1.0, 2.0], 10.0, 3);
        assert_eq!(cut.id, 1);
        assert_eq!(cut.coefficients, vec![1.0, 2.0]);
        assert_eq!(cut.rhs, 10.0);
        assert!(cut.active);
        assert_eq!(cut.non_dominated_state_count, 0);
        assert_eq!(cut.iteration, 3);
    }

    #[test]
    fn test_eval_height_at_state() {
        let cut = BendersCut::new(1, vec![1.0, 2.0], 10.0, 0);
        // 10.0 + (1.0 * 3.0 + 2.0 * 4.0) = 10.0 + 3.0 + 8.0 = 21.0
        assert_eq!(cut.eval_height_at_state(&[3.0, 4.0]), 21.0);
    }

    #[test]
    fn test_row_factors() {
        let cut = BendersCut::new(0, vec![-2.0, 0.5], 10.0, 0);
        let factors = cut.row_factors(7, &[3, 4]);
        assert_eq!(factors, vec![(7, 1.0), (3, 2.0), (4, -0.5)]);
    }

    #[test]
    fn test_cut_pool_activation() {
        let mut pool = BendersCutPool::new();
        pool.push(BendersCut::new(0, vec![1.0], 1.0, 0));
        pool.push(BendersCut::new(1, vec![2.0], 2.0, 0));
        assert_eq!(pool.total_cut_count, 2);
        assert_eq!(pool.active_cut_ids, vec![0, 1]);
        pool.deactivate(0);
        assert!(!pool.pool[0].active);
        assert_eq!(pool.active_cut_ids, vec![1]);
        pool.deactivate(0);
        assert_eq!(pool.active_cut_ids, vec![1]);
        pool.activate(0);
        assert_eq!(pool.active_cut_ids, vec![1, 0]);
        assert_eq!(pool.active_cuts().count(), 2);
    }
}
