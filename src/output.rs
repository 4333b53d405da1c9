use crate::cut::BendersCut;
use crate::error::{Result, SddpError};
use crate::fcf::FutureCostFunction;
use crate::policy_graph::PolicyGraph;
use crate::sddp::SimulationTrajectory;
use crate::stopping_rule::TrainingLog;
use crate::subproblem::Realization;
use crate::utils;

use chrono::NaiveDate;
use csv::Writer;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

const PLOT_QUANTILES: [f64; 5] = [0.0, 0.1, 0.5, 0.9, 1.0];

fn csv_writer(dir: &Path, filename: &str) -> Result<Writer<File>> {
    Ok(Writer::from_path(dir.join(filename))?)
}

fn flush(mut wtr: Writer<File>, filename: &str) -> Result<()> {
    wtr.flush()
        .map_err(|e| SddpError::io(format!("writing {filename}"), e))
}

#[derive(Serialize)]
struct BendersCutOutput<'a> {
    node_id: usize,
    stage: usize,
    markov_state: usize,
    cut_id: usize,
    iteration: usize,
    active: bool,
    coefficient_entity: &'a str,
    entity_index: Option<usize>,
    value: f64,
}

fn write_benders_cuts(
    policy: &PolicyGraph,
    fcfs: &[FutureCostFunction],
    dir: &Path,
) -> Result<()> {
    let mut wtr = csv_writer(dir, "cuts.csv")?;
    for (node_id, fcf) in fcfs.iter().enumerate() {
        let node = policy.node(node_id)?;
        for cut in fcf.cut_pool.pool.iter() {
            let row = |entity, entity_index, value| BendersCutOutput {
                node_id,
                stage: node.stage,
                markov_state: node.markov_state,
                cut_id: cut.id,
                iteration: cut.iteration,
                active: cut.active,
                coefficient_entity: entity,
                entity_index,
                value,
            };
            wtr.serialize(row("rhs", None, cut.rhs))?;
            for (index, coef) in cut.coefficients.iter().enumerate() {
                wtr.serialize(row("storage", Some(index), *coef))?;
            }
        }
    }
    flush(wtr, "cuts.csv")
}

#[derive(Serialize)]
struct VisitedStateOutput<'a> {
    node_id: usize,
    stage: usize,
    state_index: usize,
    dominating_cut_id: Option<usize>,
    coefficient_entity: &'a str,
    entity_index: Option<usize>,
    value: f64,
}

fn write_visited_states(
    policy: &PolicyGraph,
    fcfs: &[FutureCostFunction],
    dir: &Path,
) -> Result<()> {
    let mut wtr = csv_writer(dir, "states.csv")?;
    for (node_id, fcf) in fcfs.iter().enumerate() {
        let node = policy.node(node_id)?;
        for (state_index, state) in fcf.state_pool.iter().enumerate() {
            let row = |entity, entity_index, value| VisitedStateOutput {
                node_id,
                stage: node.stage,
                state_index,
                dominating_cut_id: state.get_dominating_cut_id(),
                coefficient_entity: entity,
                entity_index,
                value,
            };
            wtr.serialize(row(
                "dominating_objective",
                None,
                state.get_dominating_objective(),
            ))?;
            for (index, coef) in state.coefficients().iter().enumerate() {
                wtr.serialize(row("storage", Some(index), *coef))?;
            }
        }
    }
    flush(wtr, "states.csv")
}

#[derive(Serialize)]
struct TrainingOutput {
    iteration: usize,
    lower_bound: f64,
    simulation: f64,
    time: f64,
    cumulative_time: f64,
    total_cuts: usize,
}

fn write_training_log(log: &TrainingLog, dir: &Path) -> Result<()> {
    let mut wtr = csv_writer(dir, "training.csv")?;
    for record in log.records.iter() {
        wtr.serialize(TrainingOutput {
            iteration: record.iteration,
            lower_bound: record.lower_bound,
            simulation: record.simulation_value,
            time: record.time.as_secs_f64(),
            cumulative_time: record.cumulative_time.as_secs_f64(),
            total_cuts: record.total_cuts,
        })?;
    }
    flush(wtr, "training.csv")
}

/// Columns shared by every per entity simulation output
struct StepKey {
    series_index: usize,
    step_index: usize,
    node_id: usize,
    stage: usize,
    markov_state: usize,
    start_date: NaiveDate,
    end_date: NaiveDate,
    entity_index: usize,
}

/// Calls `f` once for every entity of every simulated step, with the key
/// columns and the position of the entity
fn for_each_entity<F>(
    policy: &PolicyGraph,
    trajectories: &[SimulationTrajectory],
    count: impl Fn(&Realization) -> usize,
    mut f: F,
) -> Result<()>
where
    F: FnMut(StepKey, &Realization) -> Result<()>,
{
    for trajectory in trajectories.iter() {
        for (step_index, record) in trajectory.records.iter().enumerate() {
            let node = policy.node(record.node_id)?;
            for entity_index in 0..count(&record.realization) {
                let key = StepKey {
                    series_index: trajectory.replication,
                    step_index,
                    node_id: record.node_id,
                    stage: record.stage,
                    markov_state: record.markov_state,
                    start_date: node.start_date,
                    end_date: node.end_date,
                    entity_index,
                };
                f(key, &record.realization)?;
            }
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct BusSimulationOutput {
    series_index: usize,
    step_index: usize,
    node_id: usize,
    stage: usize,
    markov_state: usize,
    start_date: NaiveDate,
    end_date: NaiveDate,
    entity_index: usize,
    load: f64,
    deficit: f64,
    marginal_cost: f64,
}

#[derive(Serialize)]
struct LineSimulationOutput {
    series_index: usize,
    step_index: usize,
    node_id: usize,
    stage: usize,
    markov_state: usize,
    start_date: NaiveDate,
    end_date: NaiveDate,
    entity_index: usize,
    exchange: f64,
}

#[derive(Serialize)]
struct ThermalSimulationOutput {
    series_index: usize,
    step_index: usize,
    node_id: usize,
    stage: usize,
    markov_state: usize,
    start_date: NaiveDate,
    end_date: NaiveDate,
    entity_index: usize,
    generation: f64,
}

#[derive(Serialize)]
struct HydroSimulationOutput {
    series_index: usize,
    step_index: usize,
    node_id: usize,
    stage: usize,
    markov_state: usize,
    start_date: NaiveDate,
    end_date: NaiveDate,
    entity_index: usize,
    initial_storage: f64,
    final_storage: f64,
    inflow: f64,
    turbined_flow: f64,
    spillage: f64,
    water_value: f64,
}

fn write_simulation_results(
    policy: &PolicyGraph,
    trajectories: &[SimulationTrajectory],
    dir: &Path,
) -> Result<()> {
    let mut wtr = csv_writer(dir, "simulation_buses.csv")?;
    for_each_entity(policy, trajectories, |r| r.loads.len(), |k, r| {
        let i = k.entity_index;
        Ok(wtr.serialize(BusSimulationOutput {
            series_index: k.series_index,
            step_index: k.step_index,
            node_id: k.node_id,
            stage: k.stage,
            markov_state: k.markov_state,
            start_date: k.start_date,
            end_date: k.end_date,
            entity_index: i,
            load: r.loads[i],
            deficit: r.deficit[i],
            marginal_cost: r.marginal_cost[i],
        })?)
    })?;
    flush(wtr, "simulation_buses.csv")?;

    let mut wtr = csv_writer(dir, "simulation_lines.csv")?;
    for_each_entity(policy, trajectories, |r| r.exchange.len(), |k, r| {
        let i = k.entity_index;
        Ok(wtr.serialize(LineSimulationOutput {
            series_index: k.series_index,
            step_index: k.step_index,
            node_id: k.node_id,
            stage: k.stage,
            markov_state: k.markov_state,
            start_date: k.start_date,
            end_date: k.end_date,
            entity_index: i,
            exchange: r.exchange[i],
        })?)
    })?;
    flush(wtr, "simulation_lines.csv")?;

    let mut wtr = csv_writer(dir, "simulation_thermals.csv")?;
    for_each_entity(policy, trajectories, |r| r.thermal_generation.len(), |k, r| {
        let i = k.entity_index;
        Ok(wtr.serialize(ThermalSimulationOutput {
            series_index: k.series_index,
            step_index: k.step_index,
            node_id: k.node_id,
            stage: k.stage,
            markov_state: k.markov_state,
            start_date: k.start_date,
            end_date: k.end_date,
            entity_index: i,
            generation: r.thermal_generation[i],
        })?)
    })?;
    flush(wtr, "simulation_thermals.csv")?;

    let mut wtr = csv_writer(dir, "simulation_hydros.csv")?;
    for_each_entity(policy, trajectories, |r| r.final_storage.len(), |k, r| {
        let i = k.entity_index;
        Ok(wtr.serialize(HydroSimulationOutput {
            series_index: k.series_index,
            step_index: k.step_index,
            node_id: k.node_id,
            stage: k.stage,
            markov_state: k.markov_state,
            start_date: k.start_date,
            end_date: k.end_date,
            entity_index: i,
            initial_storage: r.initial_storage[i],
            final_storage: r.final_storage[i],
            inflow: r.inflow[i],
            turbined_flow: r.turbined_flow[i],
            spillage: r.spillage[i],
            water_value: r.water_value[i],
        })?)
    })?;
    flush(wtr, "simulation_hydros.csv")
}

#[derive(Serialize)]
struct CostOutput {
    series_index: usize,
    num_steps: usize,
    total_cost: f64,
}

fn write_simulation_costs(
    trajectories: &[SimulationTrajectory],
    dir: &Path,
) -> Result<()> {
    let mut wtr = csv_writer(dir, "simulation_costs.csv")?;
    for trajectory in trajectories.iter() {
        wtr.serialize(CostOutput {
            series_index: trajectory.replication,
            num_steps: trajectory.records.len(),
            total_cost: trajectory.cost,
        })?;
    }
    flush(wtr, "simulation_costs.csv")
}

#[derive(Serialize, Debug, PartialEq)]
pub struct QuantileOutput {
    pub stage: usize,
    pub entity: &'static str,
    pub entity_index: usize,
    pub variable: &'static str,
    pub p0: f64,
    pub p10: f64,
    pub p50: f64,
    pub p90: f64,
    pub p100: f64,
}

/// Spread of the main hydro and thermal series across replications, for
/// each stage: the data behind the usual publication plots.
pub fn plot_quantiles(
    trajectories: &[SimulationTrajectory],
) -> Vec<QuantileOutput> {
    type SeriesKey = (usize, &'static str, usize, &'static str);
    let mut series: BTreeMap<SeriesKey, Vec<f64>> = BTreeMap::new();
    for trajectory in trajectories.iter() {
        for record in trajectory.records.iter() {
            let r = &record.realization;
            let mut push = |entity, variable, values: &[f64]| {
                for (index, value) in values.iter().enumerate() {
                    series
                        .entry((record.stage, entity, index, variable))
                        .or_default()
                        .push(*value);
                }
            };
            push("hydro", "final_storage", &r.final_storage);
            push("hydro", "turbined_flow", &r.turbined_flow);
            push("hydro", "spillage", &r.spillage);
            push("thermal", "generation", &r.thermal_generation);
        }
    }
    series
        .into_iter()
        .map(|((stage, entity, entity_index, variable), mut values)| {
            values.sort_by(|a, b| a.total_cmp(b));
            let q: Vec<f64> = PLOT_QUANTILES
                .iter()
                .map(|q| utils::sorted_quantile(&values, *q))
                .collect();
            QuantileOutput {
                stage,
                entity,
                entity_index,
                variable,
                p0: q[0],
                p10: q[1],
                p50: q[2],
                p90: q[3],
                p100: q[4],
            }
        })
        .collect()
}

fn write_plot_quantiles(
    trajectories: &[SimulationTrajectory],
    dir: &Path,
) -> Result<()> {
    let mut wtr = csv_writer(dir, "plot_quantiles.csv")?;
    for row in plot_quantiles(trajectories).iter() {
        wtr.serialize(row)?;
    }
    flush(wtr, "plot_quantiles.csv")
}

/// The cuts of a node, as stored in the cut file
#[derive(Serialize, Deserialize, Debug)]
struct NodeCuts {
    node_id: usize,
    stage: usize,
    markov_state: usize,
    cuts: Vec<BendersCut>,
}

/// Writes every cut of a trained policy to a JSON file, which can later
/// be loaded for simulating without training again.
pub fn write_cuts_to_file(
    policy: &PolicyGraph,
    fcfs: &[FutureCostFunction],
    path: &Path,
) -> Result<()> {
    let mut nodes = Vec::<NodeCuts>::with_capacity(fcfs.len());
    for (node_id, fcf) in fcfs.iter().enumerate() {
        let node = policy.node(node_id)?;
        nodes.push(NodeCuts {
            node_id,
            stage: node.stage,
            markov_state: node.markov_state,
            cuts: fcf.cut_pool.pool.clone(),
        });
    }
    let file = File::create(path)
        .map_err(|e| SddpError::io(format!("creating {}", path.display()), e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, &nodes)?;
    writer
        .flush()
        .map_err(|e| SddpError::io(format!("writing {}", path.display()), e))
}

/// Reads a cut file into one future cost function per node of `policy`,
/// checking that the file matches the policy graph.
pub fn read_cuts_from_file(
    policy: &PolicyGraph,
    path: &Path,
    cut_selection: bool,
) -> Result<Vec<FutureCostFunction>> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| SddpError::io(format!("reading {}", path.display()), e))?;
    let nodes: Vec<NodeCuts> = serde_json::from_str(&contents)?;
    let mut fcfs: Vec<FutureCostFunction> = (0..policy.node_count())
        .map(|_| FutureCostFunction::new(cut_selection))
        .collect();
    for node_cuts in nodes.into_iter() {
        let node = policy.node(node_cuts.node_id).map_err(|_| {
            SddpError::CutFile(format!(
                "node {} not in the policy",
                node_cuts.node_id
            ))
        })?;
        if node.stage != node_cuts.stage
            || node.markov_state != node_cuts.markov_state
        {
            return Err(SddpError::CutFile(format!(
                "node {} is at stage {} and markov state {} in the policy",
                node_cuts.node_id, node.stage, node.markov_state
            )));
        }
        let fcf = &mut fcfs[node_cuts.node_id];
        for cut in node_cuts.cuts.into_iter() {
            if cut.coefficients.len() != policy.state_dimension() {
                return Err(SddpError::CutFile(format!(
                    "cut {} of node {} has {} coefficients, expected {}",
                    cut.id,
                    node_cuts.node_id,
                    cut.coefficients.len(),
                    policy.state_dimension()
                )));
            }
            if cut.id != fcf.next_cut_id() {
                return Err(SddpError::CutFile(format!(
                    "cuts of node {} are not in order",
                    node_cuts.node_id
                )));
            }
            fcf.add_cut(cut);
        }
    }
    Ok(fcfs)
}

/// Writes every output of a study to `path`. Training outputs are only
/// written when a training log is given.
pub fn generate_outputs(
    policy: &PolicyGraph,
    fcfs: &[FutureCostFunction],
    training_log: Option<&TrainingLog>,
    trajectories: &[SimulationTrajectory],
    path: &str,
) -> Result<()> {
    let dir = Path::new(path);
    if let Some(log) = training_log {
        write_benders_cuts(policy, fcfs, dir)?;
        write_visited_states(policy, fcfs, dir)?;
        write_training_log(log, dir)?;
        write_cuts_to_file(policy, fcfs, &dir.join("cuts.json"))?;
    }
    if !trajectories.is_empty() {
        write_simulation_results(policy, trajectories, dir)?;
        write_simulation_costs(trajectories, dir)?;
        write_plot_quantiles(trajectories, dir)?;
    }
    Ok(())
}
