//! Piecewise-linear outer approximation of the future cost of a node,
//! with level-1 dominance cut selection: a cut is kept in the subproblem
//! only while it is the highest cut at some visited state.

use crate::cut;
use crate::state;

// a cut must beat the current one by this much to take a state over
const DOMINANCE_TOLERANCE: f64 = 1e-9;

/// Changes that must be mirrored in the subproblem rows after a cut or
/// a state is added.
#[derive(Debug, Default, PartialEq)]
pub struct CutSelection {
    pub removed_cut_ids: Vec<usize>,
    pub returned_cut_ids: Vec<usize>,
}

#[derive(Debug)]
pub struct FutureCostFunction {
    pub cut_pool: cut::BendersCutPool,
    pub state_pool: Vec<state::VisitedState>,
    cut_selection: bool,
}

impl FutureCostFunction {
    pub fn new(cut_selection: bool) -> Self {
        Self {
            cut_pool: cut::BendersCutPool::new(),
            state_pool: vec![],
            cut_selection,
        }
    }

    pub fn get_total_cut_count(&self) -> usize {
        self.cut_pool.total_cut_count
    }

    pub fn get_active_cut_count(&self) -> usize {
        self.cut_pool.active_cut_ids.len()
    }

    pub fn next_cut_id(&self) -> usize {
        self.cut_pool.pool.len()
    }

    /// The future cost estimate at `state`: the highest active cut.
    /// `None` when no cut was added yet.
    pub fn evaluate(&self, state: &[f64]) -> Option<f64> {
        self.cut_pool
            .active_cuts()
            .map(|c| c.eval_height_at_state(state))
            .max_by(|a, b| a.total_cmp(b))
    }

    /// Adds a cut without any dominance bookkeeping, as when loading cuts
    /// from a file.
    pub fn add_cut(&mut self, new_cut: cut::BendersCut) {
        self.cut_pool.push(new_cut);
    }

    /// Adds a new cut computed at the state `visited`. With cut selection
    /// enabled, the new cut takes over every stored state where it is the
    /// highest, the visited state joins the pool, and any cut left
    /// without states is removed from the model.
    pub fn add_cut_at_state(
        &mut self,
        mut new_cut: cut::BendersCut,
        visited: state::VisitedState,
    ) -> CutSelection {
        new_cut.active = true;
        new_cut.non_dominated_state_count = 0;
        let new_cut_id = new_cut.id;
        self.cut_pool.push(new_cut);
        if !self.cut_selection {
            return CutSelection::default();
        }

        self.eval_new_cut_domination(new_cut_id);
        let returned_cut_ids = self.add_state(visited);

        let removed_cut_ids: Vec<usize> = self
            .cut_pool
            .active_cut_ids
            .iter()
            .copied()
            .filter(|&id| self.cut_pool.pool[id].non_dominated_state_count == 0)
            .collect();
        for id in removed_cut_ids.iter() {
            self.cut_pool.deactivate(*id);
        }

        CutSelection {
            removed_cut_ids,
            returned_cut_ids,
        }
    }

    /// Tests the new cut on every previously visited state. If this cut
    /// dominates, decrements the previous dominating cut counter and
    /// updates the state.
    fn eval_new_cut_domination(&mut self, new_cut_id: usize) {
        for state in self.state_pool.iter_mut() {
            let new_cut = &self.cut_pool.pool[new_cut_id];
            let height = new_cut.eval_height_at_state(state.coefficients());
            if height > state.get_dominating_objective() + DOMINANCE_TOLERANCE {
                if let Some(old_id) = state.get_dominating_cut_id() {
                    let old_cut = &mut self.cut_pool.pool[old_id];
                    old_cut.non_dominated_state_count =
                        old_cut.non_dominated_state_count.saturating_sub(1);
                }
                self.cut_pool.pool[new_cut_id].non_dominated_state_count += 1;
                state.update_dominating_cut(new_cut_id, height);
            }
        }
    }

    /// Finds the dominating cut of a new visited state among all cuts,
    /// active or not. Returns the inactive cuts that must go back to the
    /// model.
    fn add_state(&mut self, mut new_state: state::VisitedState) -> Vec<usize> {
        let mut returned = vec![];
        // newest first, so ties keep the most recent cut
        let best = self
            .cut_pool
            .pool
            .iter()
            .rev()
            .map(|c| (c.id, c.eval_height_at_state(new_state.coefficients())))
            .fold(None, |best: Option<(usize, f64)>, (id, height)| match best {
                Some((_, h)) if h + DOMINANCE_TOLERANCE >= height => best,
                _ => Some((id, height)),
            });
        if let Some((cut_id, height)) = best {
            new_state.update_dominating_cut(cut_id, height);
            self.cut_pool.pool[cut_id].non_dominated_state_count += 1;
            if !self.cut_pool.pool[cut_id].active {
                self.cut_pool.activate(cut_id);
                returned.push(cut_id);
            }
        }
        self.state_pool.push(new_state);
        returned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cut::BendersCut;
    use crate::state::VisitedState;

    #[test]
    fn test_new_future_cost_function() {
        let fcf = FutureCostFunction::new(true);
        assert_eq!(fcf.get_total_cut_count(), 0);
        assert!(fcf.state_pool.is_empty());
        assert_eq!(fcf.evaluate(&[1.0]), None);
    }

    #[test]
    fn test_add_cut() {
        let mut fcf = FutureCostFunction::new(false);
        fcf.add_cut(BendersCut::new(0, vec![1.0], 10.0, 0));
        assert_eq!(fcf.cut_pool.pool.len(), 1);
        assert_eq!(fcf.get_active_cut_count(), 1);
        assert_eq!(fcf.next_cut_id(), 1);
    }

    #[test]
    fn test_evaluate_takes_highest_active_cut() {
        let mut fcf = FutureCostFunction::new(false);
        fcf.add_cut(BendersCut::new(0, vec![-1.0], 100.0, 0));
        fcf.add_cut(BendersCut::new(1, vec![-3.0], 200.0, 0));
        assert_eq!(fcf.evaluate(&[0.0]), Some(200.0));
        assert_eq!(fcf.evaluate(&[100.0]), Some(0.0));
    }

    #[test]
    fn test_without_cut_selection_nothing_is_removed() {
        let mut fcf = FutureCostFunction::new(false);
        let selection = fcf.add_cut_at_state(
            BendersCut::new(0, vec![-1.0], 100.0, 1),
            VisitedState::new(vec![10.0]),
        );
        assert_eq!(selection, CutSelection::default());
        assert!(fcf.state_pool.is_empty());
    }

    #[test]
    fn test_dominated_cut_is_removed() {
        let mut fcf = FutureCostFunction::new(true);
        // cut 0 at x = 10: height 90
        fcf.add_cut_at_state(
            BendersCut::new(0, vec![-1.0], 100.0, 1),
            VisitedState::new(vec![10.0]),
        );
        // cut 1 is above cut 0 everywhere
        let selection = fcf.add_cut_at_state(
            BendersCut::new(1, vec![-1.0], 150.0, 2),
            VisitedState::new(vec![20.0]),
        );
        assert_eq!(selection.removed_cut_ids, vec![0]);
        assert!(selection.returned_cut_ids.is_empty());
        assert!(!fcf.cut_pool.pool[0].active);
        assert_eq!(fcf.cut_pool.pool[1].non_dominated_state_count, 2);
        assert_eq!(fcf.get_active_cut_count(), 1);
        assert_eq!(fcf.get_total_cut_count(), 2);
    }

    #[test]
    fn test_cuts_dominating_different_states_are_kept() {
        let mut fcf = FutureCostFunction::new(true);
        fcf.add_cut_at_state(
            BendersCut::new(0, vec![-1.0], 100.0, 1),
            VisitedState::new(vec![0.0]),
        );
        let selection = fcf.add_cut_at_state(
            BendersCut::new(1, vec![-3.0], 180.0, 2),
            VisitedState::new(vec![10.0]),
        );
        // at x = 0: cut 0 = 100, cut 1 = 180 -> cut 1 takes over
        // at x = 10: cut 0 = 90, cut 1 = 150
        assert_eq!(selection.removed_cut_ids, vec![0]);

        let selection = fcf.add_cut_at_state(
            BendersCut::new(2, vec![-5.0], 200.0, 3),
            VisitedState::new(vec![50.0]),
        );
        // at x = 50: cut 0 = 50, cut 1 = 30, cut 2 = -50 -> cut 0 returns
        assert_eq!(selection.returned_cut_ids, vec![0]);
        assert!(fcf.cut_pool.pool[0].active);
        // cut 2 takes x = 0 over (200), x = 10 stays with cut 1 on a tie
        assert_eq!(fcf.state_pool[0].get_dominating_cut_id(), Some(2));
        assert_eq!(fcf.state_pool[1].get_dominating_cut_id(), Some(1));
        assert!(fcf.cut_pool.pool[2].active);
    }
}
