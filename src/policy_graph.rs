//! The policy graph of a study: one node per (stage, Markov state) pair,
//! each holding the data for building its dispatch subproblem, plus the
//! transitions leaving the root and the initial state.

use crate::error::{Result, SddpError};
use crate::graph::{DirectedGraph, Edge, Transition};
use crate::noise::NoiseSupport;
use crate::risk_measure::{Expectation, RiskMeasure};
use crate::system::System;
use chrono::NaiveDate;
use rand::Rng;

const PROBABILITY_TOLERANCE: f64 = 1e-9;

#[derive(Debug)]
pub struct NodeData {
    pub stage: usize,
    pub markov_state: usize,
    pub season_id: usize,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub system: System,
    pub risk_measure: Box<dyn RiskMeasure>,
    pub noise: NoiseSupport,
}

impl NodeData {
    pub fn new(
        stage: usize,
        markov_state: usize,
        system: System,
        risk_measure: Box<dyn RiskMeasure>,
        noise: NoiseSupport,
    ) -> Result<Self> {
        if noise.num_hydros() != system.meta.hydros_count
            || noise.num_buses() != system.meta.buses_count
        {
            return Err(SddpError::Validation(format!(
                "noise of stage {stage} (markov state {markov_state}) \
                 does not match the system dimensions"
            )));
        }
        Ok(Self {
            stage,
            markov_state,
            season_id: stage,
            start_date: NaiveDate::default(),
            end_date: NaiveDate::default(),
            system,
            risk_measure,
            noise,
        })
    }

    pub fn with_period(
        mut self,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Self> {
        if end_date < start_date {
            return Err(SddpError::Validation(format!(
                "stage {} ends ({end_date}) before it starts ({start_date})",
                self.stage
            )));
        }
        self.start_date = start_date;
        self.end_date = end_date;
        Ok(self)
    }

    pub fn with_season(mut self, season_id: usize) -> Self {
        self.season_id = season_id;
        self
    }
}

/// Picks an edge with its transition probability. The mass missing to
/// one is the chance of picking nothing.
fn sample_edge<'a, R: Rng + ?Sized>(edges: &'a [Edge], rng: &mut R) -> Option<&'a Edge> {
    let u: f64 = rng.random();
    let mut cumulative = 0.0;
    for edge in edges.iter() {
        cumulative += edge.transition.probability;
        if u < cumulative {
            return Some(edge);
        }
    }
    None
}

#[derive(Debug)]
pub struct PolicyGraph {
    pub graph: DirectedGraph<NodeData>,
    pub root_transitions: Vec<Edge>,
    pub initial_state: Vec<f64>,
    pub root_risk_measure: Box<dyn RiskMeasure>,
}

impl PolicyGraph {
    /// A chain of `num_stages` nodes linked by certain transitions.
    /// `builder(stage)` creates the data of each node.
    pub fn linear<F>(
        num_stages: usize,
        initial_state: Vec<f64>,
        mut builder: F,
    ) -> Result<Self>
    where
        F: FnMut(usize) -> Result<NodeData>,
    {
        if num_stages == 0 {
            return Err(SddpError::Validation(
                "a policy graph needs at least one stage".to_string(),
            ));
        }
        let mut graph = DirectedGraph::<NodeData>::new();
        for stage in 0..num_stages {
            let id = graph.add_node(builder(stage)?);
            if stage > 0 {
                graph.add_edge(id - 1, id, Transition::certain())?;
            }
        }
        let root_transitions = vec![Edge {
            target_id: 0,
            transition: Transition::certain(),
        }];
        Self::from_parts(graph, root_transitions, initial_state)
    }

    /// One node per stage and Markov state. `transition_matrices[t][i][j]`
    /// is the probability of going from state `i` at stage `t` to state `j`
    /// at stage `t + 1`, and `initial_distribution` gives the states of the
    /// first stage.
    pub fn markovian<F>(
        initial_distribution: &[f64],
        transition_matrices: &[Vec<Vec<f64>>],
        initial_state: Vec<f64>,
        mut builder: F,
    ) -> Result<Self>
    where
        F: FnMut(usize, usize) -> Result<NodeData>,
    {
        check_distribution(initial_distribution, "initial distribution")?;
        let mut graph = DirectedGraph::<NodeData>::new();

        let mut previous_ids: Vec<usize> = vec![];
        for markov_state in 0..initial_distribution.len() {
            previous_ids.push(graph.add_node(builder(0, markov_state)?));
        }
        let root_transitions = previous_ids
            .iter()
            .zip(initial_distribution.iter())
            .filter(|(_, p)| **p > 0.0)
            .map(|(id, p)| Edge {
                target_id: *id,
                transition: Transition::new(*p, 1.0),
            })
            .collect();

        for (t, matrix) in transition_matrices.iter().enumerate() {
            let stage = t + 1;
            if matrix.len() != previous_ids.len() {
                return Err(SddpError::Validation(format!(
                    "transition matrix {t} has {} rows, expected {}",
                    matrix.len(),
                    previous_ids.len()
                )));
            }
            let num_states = matrix.first().map_or(0, |row| row.len());
            let mut ids = Vec::<usize>::with_capacity(num_states);
            for markov_state in 0..num_states {
                ids.push(graph.add_node(builder(stage, markov_state)?));
            }
            for (i, row) in matrix.iter().enumerate() {
                if row.len() != num_states {
                    return Err(SddpError::Validation(format!(
                        "transition matrix {t} is not rectangular"
                    )));
                }
                check_distribution(row, &format!("row {i} of matrix {t}"))?;
                for (j, p) in row.iter().enumerate() {
                    if *p > 0.0 {
                        graph.add_edge(
                            previous_ids[i],
                            ids[j],
                            Transition::new(*p, 1.0),
                        )?;
                    }
                }
            }
            previous_ids = ids;
        }
        Self::from_parts(graph, root_transitions, initial_state)
    }

    /// Assembles a policy graph of any shape, including cyclic ones,
    /// validating the root transitions and the state dimensions.
    pub fn from_parts(
        graph: DirectedGraph<NodeData>,
        root_transitions: Vec<Edge>,
        initial_state: Vec<f64>,
    ) -> Result<Self> {
        if root_transitions.is_empty() {
            return Err(SddpError::Validation(
                "the root has no transitions".to_string(),
            ));
        }
        let mut total = 0.0;
        for edge in root_transitions.iter() {
            if graph.get_node(edge.target_id).is_none() {
                return Err(SddpError::Validation(format!(
                    "root transition to missing node {}",
                    edge.target_id
                )));
            }
            if !(0.0..=1.0).contains(&edge.transition.probability) {
                return Err(SddpError::Validation(format!(
                    "root transition to node {} has probability {}",
                    edge.target_id, edge.transition.probability
                )));
            }
            total += edge.transition.probability;
        }
        if total > 1.0 + PROBABILITY_TOLERANCE {
            return Err(SddpError::Validation(format!(
                "root transition probabilities sum to {total}"
            )));
        }
        for node in graph.nodes() {
            if node.data.system.state_dimension() != initial_state.len() {
                return Err(SddpError::Validation(format!(
                    "node {} has {} state variables, the initial state has {}",
                    node.id,
                    node.data.system.state_dimension(),
                    initial_state.len()
                )));
            }
        }
        let mut reachable = vec![false; graph.node_count()];
        for edge in root_transitions.iter() {
            for id in graph.get_bfs(edge.target_id) {
                reachable[id] = true;
            }
        }
        let unreachable: Vec<usize> = (0..graph.node_count())
            .filter(|id| !reachable[*id])
            .collect();
        if !unreachable.is_empty() {
            tracing::warn!(
                "nodes {unreachable:?} are not reachable from the root"
            );
        }
        Ok(Self {
            graph,
            root_transitions,
            initial_state,
            root_risk_measure: Box::new(Expectation::new()),
        })
    }

    pub fn with_root_risk_measure(
        mut self,
        risk_measure: Box<dyn RiskMeasure>,
    ) -> Self {
        self.root_risk_measure = risk_measure;
        self
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn node(&self, id: usize) -> Result<&NodeData> {
        self.graph
            .get_node(id)
            .map(|n| &n.data)
            .ok_or_else(|| {
                SddpError::Validation(format!("node {id} not found"))
            })
    }

    pub fn state_dimension(&self) -> usize {
        self.initial_state.len()
    }

    /// Whether the graph has cycles, making it an infinite horizon one
    pub fn is_cyclic(&self) -> bool {
        self.graph.has_cycle()
    }

    pub fn sample_root_child<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
    ) -> Option<(usize, Transition)> {
        sample_edge(&self.root_transitions, rng)
            .map(|e| (e.target_id, e.transition))
    }

    /// Samples the node visited after `node_id`, or `None` when the
    /// trajectory ends there
    pub fn sample_child<R: Rng + ?Sized>(
        &self,
        node_id: usize,
        rng: &mut R,
    ) -> Option<(usize, Transition)> {
        let edges = self.graph.get_transitions(node_id)?;
        sample_edge(edges, rng).map(|e| (e.target_id, e.transition))
    }
}

fn check_distribution(probabilities: &[f64], name: &str) -> Result<()> {
    if probabilities.is_empty() || probabilities.iter().any(|p| *p < 0.0) {
        return Err(SddpError::Validation(format!(
            "{name} is not a probability distribution"
        )));
    }
    let total: f64 = probabilities.iter().sum();
    if (total - 1.0).abs() > 1e-6 {
        return Err(SddpError::Validation(format!(
            "{name} sums to {total}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::noise::NoiseTerm;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256Plus;

    fn default_node(stage: usize, markov_state: usize) -> Result<NodeData> {
        let noise = NoiseSupport::new(vec![
            NoiseTerm::new(0.5, vec![0.0], vec![50.0]),
            NoiseTerm::new(0.5, vec![50.0], vec![50.0]),
        ])?;
        NodeData::new(
            stage,
            markov_state,
            System::default(),
            Box::new(Expectation::new()),
            noise,
        )
    }

    #[test]
    fn test_linear_policy_graph() {
        let policy =
            PolicyGraph::linear(3, vec![83.333], |t| default_node(t, 0))
                .unwrap();
        assert_eq!(policy.node_count(), 3);
        assert_eq!(policy.state_dimension(), 1);
        assert!(!policy.is_cyclic());
        assert_eq!(policy.graph.get_children(0), Some(vec![1]));
        assert!(policy.graph.is_leaf(2));
        assert_eq!(policy.node(2).unwrap().stage, 2);
    }

    #[test]
    fn test_linear_sampling_follows_the_chain() {
        let policy =
            PolicyGraph::linear(3, vec![83.333], |t| default_node(t, 0))
                .unwrap();
        let mut rng = Xoshiro256Plus::seed_from_u64(0);
        let (first, _) = policy.sample_root_child(&mut rng).unwrap();
        assert_eq!(first, 0);
        let (second, transition) = policy.sample_child(0, &mut rng).unwrap();
        assert_eq!(second, 1);
        assert_eq!(transition, Transition::certain());
        assert!(policy.sample_child(2, &mut rng).is_none());
    }

    #[test]
    fn test_markovian_policy_graph() {
        let matrices = vec![vec![vec![0.75, 0.25], vec![0.25, 0.75]]];
        let policy = PolicyGraph::markovian(
            &[1.0],
            &matrices,
            vec![83.333],
            default_node,
        )
        .unwrap();
        assert_eq!(policy.node_count(), 3);
        assert_eq!(policy.root_transitions.len(), 1);
        assert_eq!(policy.graph.get_children(0), Some(vec![1, 2]));
        assert_eq!(policy.node(2).unwrap().markov_state, 1);
        assert_eq!(policy.node(2).unwrap().stage, 1);
    }

    #[test]
    fn test_markovian_rejects_bad_matrices() {
        let not_stochastic = vec![vec![vec![0.5, 0.25]]];
        let result = PolicyGraph::markovian(
            &[1.0],
            &not_stochastic,
            vec![83.333],
            default_node,
        );
        assert!(matches!(result, Err(SddpError::Validation(_))));

        let wrong_rows = vec![vec![vec![0.5, 0.5], vec![0.5, 0.5]]];
        let result =
            PolicyGraph::markovian(&[1.0], &wrong_rows, vec![83.333], default_node);
        assert!(result.is_err());
    }

    #[test]
    fn test_cyclic_graph_ends_by_probability() {
        let mut graph = DirectedGraph::<NodeData>::new();
        graph.add_node(default_node(0, 0).unwrap());
        graph.add_edge(0, 0, Transition::new(0.5, 0.9)).unwrap();
        let root = vec![Edge {
            target_id: 0,
            transition: Transition::certain(),
        }];
        let policy = PolicyGraph::from_parts(graph, root, vec![50.0]).unwrap();
        assert!(policy.is_cyclic());
        let mut rng = Xoshiro256Plus::seed_from_u64(7);
        let n = 10_000;
        let ends = (0..n)
            .filter(|_| policy.sample_child(0, &mut rng).is_none())
            .count();
        assert!((ends as f64 / n as f64 - 0.5).abs() < 0.03);
    }

    #[test]
    fn test_reject_state_dimension_mismatch() {
        let result =
            PolicyGraph::linear(2, vec![10.0, 20.0], |t| default_node(t, 0));
        assert!(matches!(result, Err(SddpError::Validation(_))));
    }

    #[test]
    fn test_reject_noise_dimension_mismatch() {
        let noise = NoiseSupport::deterministic(vec![1.0, 2.0], vec![50.0]);
        let result = NodeData::new(
            0,
            0,
            System::default(),
            Box::new(Expectation::new()),
            noise,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_node_period() {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
        let node = default_node(0, 0).unwrap().with_period(start, end).unwrap();
        assert_eq!(node.start_date, start);
        let node = default_node(0, 0).unwrap();
        assert!(node.with_period(end, start).is_err());
    }
}
