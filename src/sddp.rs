//! Training and simulation of policies by stochastic dual dynamic
//! programming over a policy graph.

use crate::error::{Result, SddpError};
use crate::fcf::FutureCostFunction;
use crate::log;
use crate::policy_graph::PolicyGraph;
use crate::stability;
use crate::state::{CutOutcome, VisitedState};
use crate::stopping_rule::{
    IterationLimit, IterationRecord, StoppingRule, TrainingLog,
};
use crate::subproblem::{self, Realization, Subproblem};
use rand::prelude::*;
use rand_xoshiro::Xoshiro256Plus;
use rayon::prelude::*;
use std::path::Path;
use std::time::Instant;

// keeps simulation streams apart from the training and sampling ones,
// which are seeded with the same configured seed
const SIMULATION_SEED_OFFSET: u64 = 1 << 32;

#[derive(Debug)]
pub struct TrainingOptions {
    pub num_forward_passes: usize,
    pub max_depth: usize,
    pub cut_selection: bool,
    pub alpha_lower_bound: f64,
    pub seed: u64,
    pub stopping_rules: Vec<Box<dyn StoppingRule>>,
}

impl TrainingOptions {
    /// Options that stop after `num_iterations`, with one forward pass per
    /// iteration and cut selection enabled
    pub fn new(num_iterations: usize) -> Self {
        Self {
            num_forward_passes: 1,
            max_depth: 1000,
            cut_selection: true,
            alpha_lower_bound: 0.0,
            seed: 0,
            stopping_rules: vec![Box::new(IterationLimit::new(num_iterations))],
        }
    }

    pub fn with_stopping_rule(mut self, rule: Box<dyn StoppingRule>) -> Self {
        self.stopping_rules.push(rule);
        self
    }
}

/// A node visited by a forward pass, with the accumulated discount
/// applied to its costs
#[derive(Debug, Clone)]
pub struct TrajectoryStep {
    pub node_id: usize,
    pub noise_index: usize,
    pub discount: f64,
    pub realization: Realization,
}

#[derive(Debug, Clone, Default)]
pub struct Trajectory {
    pub steps: Vec<TrajectoryStep>,
    pub cost: f64,
}

#[derive(Debug)]
pub struct TrainingResult {
    pub fcfs: Vec<FutureCostFunction>,
    pub subproblems: Vec<Subproblem>,
    pub log: TrainingLog,
}

#[derive(Debug, Clone)]
pub struct SimulationRecord {
    pub node_id: usize,
    pub stage: usize,
    pub markov_state: usize,
    pub noise_index: usize,
    pub discount: f64,
    pub realization: Realization,
}

#[derive(Debug, Clone)]
pub struct SimulationTrajectory {
    pub replication: usize,
    pub records: Vec<SimulationRecord>,
    pub cost: f64,
}

/// Builds one subproblem per node, without cuts. Leaf nodes have no
/// future cost, so their `alpha` is bounded at zero.
pub fn build_subproblems(
    policy: &PolicyGraph,
    alpha_lower_bound: f64,
) -> Result<Vec<Subproblem>> {
    let mut subproblems = Vec::<Subproblem>::with_capacity(policy.node_count());
    for node in policy.graph.nodes() {
        let mut subproblem =
            Subproblem::new(node.id, &node.data.system, alpha_lower_bound)?;
        if policy.graph.is_leaf(node.id) {
            subproblem.set_alpha_lower_bound(0.0)?;
        }
        subproblems.push(subproblem);
    }
    Ok(subproblems)
}

/// Builds one subproblem per node, replaying the cuts of a trained
/// policy in creation order so that row indices match
pub fn build_policy_subproblems(
    policy: &PolicyGraph,
    fcfs: &[FutureCostFunction],
    alpha_lower_bound: f64,
) -> Result<Vec<Subproblem>> {
    if fcfs.len() != policy.node_count() {
        return Err(SddpError::Validation(format!(
            "{} future cost functions for {} nodes",
            fcfs.len(),
            policy.node_count()
        )));
    }
    let mut subproblems = build_subproblems(policy, alpha_lower_bound)?;
    for (subproblem, fcf) in subproblems.iter_mut().zip(fcfs.iter()) {
        for cut in fcf.cut_pool.pool.iter() {
            subproblem.add_cut_row(cut)?;
        }
    }
    Ok(subproblems)
}

/// Runs the scaling diagnostics of every node subproblem
pub fn stability_reports(
    policy: &PolicyGraph,
    alpha_lower_bound: f64,
) -> Vec<stability::StabilityReport> {
    policy
        .graph
        .nodes()
        .map(|node| {
            let (problem, _) = subproblem::build_template(
                &node.data.system,
                alpha_lower_bound,
            );
            stability::report_problem(node.id, &problem)
        })
        .collect()
}

/// Samples a path through the policy graph and solves each visited node
/// with the outgoing state of the previous one.
pub fn forward<R: Rng + ?Sized>(
    policy: &PolicyGraph,
    subproblems: &mut [Subproblem],
    max_depth: usize,
    rng: &mut R,
) -> Result<Trajectory> {
    let mut trajectory = Trajectory::default();
    let mut incoming_state = policy.initial_state.clone();
    let mut discount = 1.0;
    let mut next = policy.sample_root_child(rng);
    while let Some((node_id, transition)) = next {
        if trajectory.steps.len() >= max_depth {
            break;
        }
        let node = policy.node(node_id)?;
        discount *= transition.discount_factor;
        let noise_index = node.noise.sample_index(rng);
        let term = node.noise.get(noise_index).ok_or_else(|| {
            SddpError::Validation(format!("node {node_id} has no noise terms"))
        })?;
        let realization = subproblems[node_id].realize_uncertainties(
            &incoming_state,
            &term.load,
            &term.inflow,
        )?;
        trajectory.cost += discount * realization.current_stage_objective;
        incoming_state = realization.final_storage.clone();
        trajectory.steps.push(TrajectoryStep {
            node_id,
            noise_index,
            discount,
            realization,
        });
        next = policy.sample_child(node_id, rng);
    }
    Ok(trajectory)
}

/// Solves every child of `node_id` under every one of its noise terms,
/// starting from `state`
fn solve_children(
    policy: &PolicyGraph,
    subproblems: &mut [Subproblem],
    node_id: usize,
    state: &[f64],
) -> Result<Vec<CutOutcome>> {
    let edges = policy.graph.get_transitions(node_id).unwrap_or(&[]);
    let mut outcomes = Vec::<CutOutcome>::new();
    for edge in edges.iter() {
        let child = policy.node(edge.target_id)?;
        for term in child.noise.terms() {
            let realization = subproblems[edge.target_id].realize_uncertainties(
                state,
                &term.load,
                &term.inflow,
            )?;
            outcomes.push(CutOutcome {
                probability: edge.transition.probability * term.probability,
                discount_factor: edge.transition.discount_factor,
                total_stage_objective: realization.total_stage_objective,
                water_value: realization.water_value,
            });
        }
    }
    Ok(outcomes)
}

/// Walks a trajectory backwards, adding a cut to each visited node at the
/// state it left, built from the solutions of all its children.
pub fn backward(
    policy: &PolicyGraph,
    subproblems: &mut [Subproblem],
    fcfs: &mut [FutureCostFunction],
    trajectory: &Trajectory,
    iteration: usize,
) -> Result<()> {
    for step in trajectory.steps.iter().rev() {
        let node_id = step.node_id;
        if policy.graph.is_leaf(node_id) {
            continue;
        }
        let state = &step.realization.final_storage;
        let outcomes = solve_children(policy, subproblems, node_id, state)?;

        let node = policy.node(node_id)?;
        let fcf = &mut fcfs[node_id];
        let visited = VisitedState::new(state.clone());
        let cut = visited.compute_new_cut(
            fcf.next_cut_id(),
            iteration,
            node.risk_measure.as_ref(),
            &outcomes,
        );
        subproblems[node_id].add_cut_row(&cut)?;
        let selection = fcf.add_cut_at_state(cut, visited);
        for cut_id in selection.removed_cut_ids.iter() {
            subproblems[node_id].deactivate_cut_row(*cut_id)?;
        }
        for cut_id in selection.returned_cut_ids.iter() {
            subproblems[node_id].activate_cut_row(&fcf.cut_pool.pool[*cut_id])?;
        }
        if !selection.removed_cut_ids.is_empty() {
            tracing::trace!(
                "node {node_id}: removed cuts {:?}",
                selection.removed_cut_ids
            );
        }
    }
    Ok(())
}

/// Risk adjusted cost of the root children from the initial state, which
/// bounds the optimal policy cost from below.
pub fn lower_bound(
    policy: &PolicyGraph,
    subproblems: &mut [Subproblem],
) -> Result<f64> {
    let mut probabilities = Vec::<f64>::new();
    let mut costs = Vec::<f64>::new();
    for edge in policy.root_transitions.iter() {
        let node = policy.node(edge.target_id)?;
        for term in node.noise.terms() {
            let realization = subproblems[edge.target_id].realize_uncertainties(
                &policy.initial_state,
                &term.load,
                &term.inflow,
            )?;
            probabilities.push(edge.transition.probability * term.probability);
            costs.push(
                edge.transition.discount_factor
                    * realization.total_stage_objective,
            );
        }
    }
    let total: f64 = probabilities.iter().sum();
    if total < 1.0 - 1e-9 {
        probabilities.push(1.0 - total);
        costs.push(0.0);
    }
    let adjusted = policy
        .root_risk_measure
        .adjust_probabilities(&probabilities, &costs);
    Ok(adjusted.iter().zip(costs.iter()).map(|(p, c)| p * c).sum())
}

/// Trains a policy, iterating forward and backward passes until one of
/// the stopping rules is met.
pub fn train(
    policy: &PolicyGraph,
    options: &TrainingOptions,
) -> Result<TrainingResult> {
    if options.num_forward_passes == 0 {
        return Err(SddpError::Validation(
            "at least one forward pass per iteration is required".to_string(),
        ));
    }
    let reports = stability_reports(policy, options.alpha_lower_bound);
    let badly_scaled = reports.iter().filter(|r| !r.is_well_scaled()).count();
    if badly_scaled > 0 {
        tracing::warn!("{badly_scaled} subproblems may be badly scaled");
    }
    if policy.is_cyclic() {
        tracing::info!(
            "policy graph is cyclic, forward passes stop after {} nodes",
            options.max_depth
        );
    }

    let mut subproblems = build_subproblems(policy, options.alpha_lower_bound)?;
    let mut fcfs: Vec<FutureCostFunction> = (0..policy.node_count())
        .map(|_| FutureCostFunction::new(options.cut_selection))
        .collect();
    let mut rng = Xoshiro256Plus::seed_from_u64(options.seed);
    let mut training_log = TrainingLog::new();

    log::training_table_divider();
    log::training_table_header();
    log::training_table_divider();

    let begin = Instant::now();
    let mut iteration = 0;
    loop {
        iteration += 1;
        let iteration_begin = Instant::now();

        let mut simulation_value = 0.0;
        for _ in 0..options.num_forward_passes {
            let trajectory =
                forward(policy, &mut subproblems, options.max_depth, &mut rng)?;
            backward(
                policy,
                &mut subproblems,
                &mut fcfs,
                &trajectory,
                iteration,
            )?;
            simulation_value += trajectory.cost;
        }
        simulation_value /= options.num_forward_passes as f64;
        let lower_bound = lower_bound(policy, &mut subproblems)?;

        let record = IterationRecord {
            iteration,
            lower_bound,
            simulation_value,
            time: iteration_begin.elapsed(),
            cumulative_time: begin.elapsed(),
            total_cuts: fcfs.iter().map(|f| f.get_total_cut_count()).sum(),
        };
        log::training_table_row(&record);
        training_log.push(record);

        if let Some(rule) = options
            .stopping_rules
            .iter()
            .find(|rule| rule.should_stop(&training_log))
        {
            training_log.stopping_reason = Some(rule.name());
            break;
        }
    }

    log::training_table_divider();
    if let Some(reason) = training_log.stopping_reason.as_ref() {
        log::training_stopping_reason(reason);
    }
    tracing::debug!(
        "{} active cuts at the end of training",
        fcfs.iter().map(|f| f.get_active_cut_count()).sum::<usize>()
    );

    Ok(TrainingResult {
        fcfs,
        subproblems,
        log: training_log,
    })
}

fn simulate_replication(
    policy: &PolicyGraph,
    subproblems: &mut [Subproblem],
    replication: usize,
    seed: u64,
    max_depth: usize,
) -> Result<SimulationTrajectory> {
    let replication_seed = seed
        .wrapping_add(SIMULATION_SEED_OFFSET)
        .wrapping_add(replication as u64);
    let mut rng = Xoshiro256Plus::seed_from_u64(replication_seed);
    let trajectory = forward(policy, subproblems, max_depth, &mut rng)?;
    let mut records =
        Vec::<SimulationRecord>::with_capacity(trajectory.steps.len());
    for step in trajectory.steps.into_iter() {
        let node = policy.node(step.node_id)?;
        records.push(SimulationRecord {
            node_id: step.node_id,
            stage: node.stage,
            markov_state: node.markov_state,
            noise_index: step.noise_index,
            discount: step.discount,
            realization: step.realization,
        });
    }
    Ok(SimulationTrajectory {
        replication,
        records,
        cost: trajectory.cost,
    })
}

/// Simulates a trained policy over independent replications, in
/// parallel. Each replication has its own seeded generator, so the
/// results do not depend on the number of threads.
pub fn simulate(
    policy: &PolicyGraph,
    fcfs: &[FutureCostFunction],
    num_replications: usize,
    seed: u64,
    options: &TrainingOptions,
) -> Result<Vec<SimulationTrajectory>> {
    // fails early instead of once per worker
    build_policy_subproblems(policy, fcfs, options.alpha_lower_bound)?;
    (0..num_replications)
        .into_par_iter()
        .map_init(
            || {
                build_policy_subproblems(
                    policy,
                    fcfs,
                    options.alpha_lower_bound,
                )
            },
            |subproblems, replication| match subproblems {
                Ok(subproblems) => simulate_replication(
                    policy,
                    subproblems,
                    replication,
                    seed,
                    options.max_depth,
                ),
                Err(e) => Err(SddpError::Validation(e.to_string())),
            },
        )
        .collect()
}

/// Writes the current model of every node to `dir` in MPS format
pub fn write_subproblems(
    subproblems: &mut [Subproblem],
    dir: &Path,
) -> Result<()> {
    std::fs::create_dir_all(dir)
        .map_err(|e| SddpError::io(format!("creating {}", dir.display()), e))?;
    for subproblem in subproblems.iter_mut() {
        let path = dir.join(format!("node_{}.mps", subproblem.node_id));
        let path = path.to_str().ok_or_else(|| {
            SddpError::Validation(format!("invalid path {}", path.display()))
        })?;
        subproblem.model.write_model(path)?;
    }
    Ok(())
}
