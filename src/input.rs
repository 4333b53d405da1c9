use crate::error::{Result, SddpError};
use crate::graph::{DirectedGraph, Edge, Transition};
use crate::noise::{
    NodeScenarioGenerator, NoiseSupport, NoiseTerm, ScenarioGenerator,
};
use crate::policy_graph::{NodeData, PolicyGraph};
use crate::risk_measure;
use crate::sddp::TrainingOptions;
use crate::stopping_rule::{BoundStalling, Statistical, TimeLimit};
use crate::system;
use chrono::NaiveDate;
use rand_distr::{LogNormal, Normal};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fs;
use std::path::Path;

const DATE_FORMAT: &str = "%Y-%m-%d";

fn read_json<T: DeserializeOwned>(filepath: &Path) -> Result<T> {
    let contents = fs::read_to_string(filepath).map_err(|e| {
        SddpError::io(format!("reading {}", filepath.display()), e)
    })?;
    Ok(serde_json::from_str(&contents)?)
}

fn default_num_forward_passes() -> usize {
    1
}

fn default_cut_selection() -> bool {
    true
}

fn default_max_forward_depth() -> usize {
    1000
}

fn default_root_risk_measure() -> String {
    "expectation".to_string()
}

#[derive(Deserialize, Debug, Clone)]
pub struct BoundStallingConfig {
    pub iterations: usize,
    pub tolerance: f64,
}

#[derive(Deserialize, Debug, Clone)]
pub struct StatisticalConfig {
    pub num_replications: usize,
    pub z_score: f64,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    pub num_iterations: usize,
    pub num_simulation_scenarios: usize,
    pub seed: u64,
    #[serde(default = "default_num_forward_passes")]
    pub num_forward_passes: usize,
    #[serde(default)]
    pub time_limit_seconds: Option<f64>,
    #[serde(default)]
    pub bound_stalling: Option<BoundStallingConfig>,
    #[serde(default)]
    pub statistical: Option<StatisticalConfig>,
    #[serde(default = "default_cut_selection")]
    pub cut_selection: bool,
    #[serde(default = "default_max_forward_depth")]
    pub max_forward_depth: usize,
    #[serde(default)]
    pub alpha_lower_bound: f64,
    #[serde(default = "default_root_risk_measure")]
    pub root_risk_measure: String,
    #[serde(default)]
    pub write_subproblems: bool,
}

pub fn read_config_input(filepath: &Path) -> Result<Config> {
    read_json(filepath)
}

impl Config {
    /// The training options described by the config. The iteration limit
    /// is always one of the stopping rules.
    pub fn training_options(&self) -> Result<TrainingOptions> {
        if self.num_iterations == 0 {
            return Err(SddpError::Validation(
                "num_iterations must be positive".to_string(),
            ));
        }
        if self.max_forward_depth == 0 {
            return Err(SddpError::Validation(
                "max_forward_depth must be positive".to_string(),
            ));
        }
        let mut options = TrainingOptions::new(self.num_iterations);
        options.num_forward_passes = self.num_forward_passes;
        options.max_depth = self.max_forward_depth;
        options.cut_selection = self.cut_selection;
        options.alpha_lower_bound = self.alpha_lower_bound;
        options.seed = self.seed;
        if let Some(seconds) = self.time_limit_seconds {
            options =
                options.with_stopping_rule(Box::new(TimeLimit::new(seconds)));
        }
        if let Some(b) = self.bound_stalling.as_ref() {
            options = options.with_stopping_rule(Box::new(BoundStalling::new(
                b.iterations,
                b.tolerance,
            )));
        }
        if let Some(s) = self.statistical.as_ref() {
            options = options.with_stopping_rule(Box::new(Statistical::new(
                s.num_replications,
                s.z_score,
            )));
        }
        Ok(options)
    }
}

#[derive(Deserialize, Debug)]
pub struct BusInput {
    pub id: usize,
    pub deficit_cost: f64,
}

#[derive(Deserialize, Debug)]
pub struct LineInput {
    pub id: usize,
    pub source_bus_id: usize,
    pub target_bus_id: usize,
    pub direct_capacity: f64,
    pub reverse_capacity: f64,
    pub exchange_penalty: f64,
}

#[derive(Deserialize, Debug)]
pub struct ThermalInput {
    pub id: usize,
    pub bus_id: usize,
    pub cost: f64,
    pub min_generation: f64,
    pub max_generation: f64,
}

#[derive(Deserialize, Debug)]
pub struct HydroInput {
    pub id: usize,
    pub downstream_hydro_id: Option<usize>,
    pub bus_id: usize,
    pub productivity: f64,
    pub min_storage: f64,
    pub max_storage: f64,
    pub min_turbined_flow: f64,
    pub max_turbined_flow: f64,
    pub spillage_penalty: f64,
}

#[derive(Deserialize, Debug)]
pub struct SystemInput {
    pub buses: Vec<BusInput>,
    #[serde(default)]
    pub lines: Vec<LineInput>,
    #[serde(default)]
    pub thermals: Vec<ThermalInput>,
    #[serde(default)]
    pub hydros: Vec<HydroInput>,
}

pub fn read_system_input(filepath: &Path) -> Result<SystemInput> {
    read_json(filepath)
}

/// Returns, for each id in `0..ids.len()`, the position where it is
/// found in `ids`
fn validate_id_range(ids: &[usize], elem_name: &str) -> Result<Vec<usize>> {
    (0..ids.len())
        .map(|elem_id| {
            ids.iter().position(|id| *id == elem_id).ok_or_else(|| {
                SddpError::Validation(format!(
                    "ID {elem_id} not found for {elem_name}"
                ))
            })
        })
        .collect()
}

fn validate_entity_count(
    count: usize,
    expected: usize,
    elem_name: &str,
) -> Result<()> {
    if count != expected {
        return Err(SddpError::Validation(format!(
            "Error matching recourse for {elem_name}: {count} != {expected}"
        )));
    }
    Ok(())
}

impl SystemInput {
    pub fn build_sddp_system(&self) -> Result<system::System> {
        let bus_ids: Vec<usize> = self.buses.iter().map(|b| b.id).collect();
        let buses = validate_id_range(&bus_ids, "buses")?
            .into_iter()
            .map(|i| {
                system::Bus::new(self.buses[i].id, self.buses[i].deficit_cost)
            })
            .collect();

        let line_ids: Vec<usize> = self.lines.iter().map(|l| l.id).collect();
        let lines = validate_id_range(&line_ids, "lines")?
            .into_iter()
            .map(|i| {
                let line = &self.lines[i];
                system::Line::new(
                    line.id,
                    line.source_bus_id,
                    line.target_bus_id,
                    line.direct_capacity,
                    line.reverse_capacity,
                    line.exchange_penalty,
                )
            })
            .collect();

        let thermal_ids: Vec<usize> =
            self.thermals.iter().map(|t| t.id).collect();
        let thermals = validate_id_range(&thermal_ids, "thermals")?
            .into_iter()
            .map(|i| {
                let thermal = &self.thermals[i];
                system::Thermal::new(
                    thermal.id,
                    thermal.bus_id,
                    thermal.cost,
                    thermal.min_generation,
                    thermal.max_generation,
                )
            })
            .collect();

        let hydro_ids: Vec<usize> = self.hydros.iter().map(|h| h.id).collect();
        let hydros = validate_id_range(&hydro_ids, "hydros")?
            .into_iter()
            .map(|i| {
                let hydro = &self.hydros[i];
                system::Hydro::new(
                    hydro.id,
                    hydro.downstream_hydro_id,
                    hydro.bus_id,
                    hydro.productivity,
                    hydro.min_storage,
                    hydro.max_storage,
                    hydro.min_turbined_flow,
                    hydro.max_turbined_flow,
                    hydro.spillage_penalty,
                )
            })
            .collect();

        system::System::new(buses, lines, thermals, hydros)
    }
}

#[derive(Deserialize, Debug)]
pub struct GraphNodeInput {
    pub id: usize,
    pub stage: usize,
    #[serde(default)]
    pub markov_state: usize,
    pub season_id: usize,
    pub start_date: String,
    pub end_date: String,
    pub risk_measure: String,
    // overrides the thermal costs of system.json for this node
    #[serde(default)]
    pub thermal_costs: Option<Vec<f64>>,
}

#[derive(Deserialize, Debug)]
pub struct GraphEdgeInput {
    pub source_id: usize,
    pub target_id: usize,
    pub probability: f64,
    pub discount_rate: f64,
}

#[derive(Deserialize, Debug)]
pub struct RootTransitionInput {
    pub target_id: usize,
    pub probability: f64,
}

#[derive(Deserialize, Debug)]
pub struct GraphInput {
    pub nodes: Vec<GraphNodeInput>,
    pub edges: Vec<GraphEdgeInput>,
    #[serde(default)]
    pub root_transitions: Vec<RootTransitionInput>,
}

pub fn read_graph_input(filepath: &Path) -> Result<GraphInput> {
    read_json(filepath)
}

fn parse_date(date: &str, node_id: usize) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(date, DATE_FORMAT).map_err(|e| {
        SddpError::Validation(format!(
            "node {node_id}: invalid date '{date}': {e}"
        ))
    })
}

fn discount_factor(discount_rate: f64) -> Result<f64> {
    if discount_rate <= -1.0 {
        return Err(SddpError::Validation(format!(
            "discount rate {discount_rate} must be greater than -1"
        )));
    }
    Ok(1.0 / (1.0 + discount_rate))
}

impl GraphInput {
    /// Node inputs ordered by id, validating that ids are contiguous
    pub fn ordered_nodes(&self) -> Result<Vec<&GraphNodeInput>> {
        let ids: Vec<usize> = self.nodes.iter().map(|n| n.id).collect();
        Ok(validate_id_range(&ids, "nodes")?
            .into_iter()
            .map(|i| &self.nodes[i])
            .collect())
    }

    /// Transitions from the root. When none is given, the trajectories
    /// start at node 0.
    pub fn build_root_transitions(&self) -> Vec<Edge> {
        if self.root_transitions.is_empty() {
            return vec![Edge {
                target_id: 0,
                transition: Transition::certain(),
            }];
        }
        self.root_transitions
            .iter()
            .map(|r| Edge {
                target_id: r.target_id,
                transition: Transition::new(r.probability, 1.0),
            })
            .collect()
    }
}

#[derive(Deserialize, Debug)]
pub struct InitialState {
    pub hydro_id: usize,
    pub initial_storage: f64,
}

#[derive(Deserialize, Debug)]
pub struct NormalParams {
    pub mu: f64,
    pub sigma: f64,
}

#[derive(Deserialize, Debug)]
pub struct LoadDistribution {
    pub bus_id: usize,
    pub normal: NormalParams,
}

#[derive(Deserialize, Debug)]
pub struct StageLoadDistributions {
    pub season_id: usize,
    pub num_branchings: usize,
    pub distributions: Vec<LoadDistribution>,
}

#[derive(Deserialize, Debug)]
pub struct LognormalParams {
    pub mu: f64,
    pub sigma: f64,
}

#[derive(Deserialize, Debug)]
pub struct InflowDistribution {
    pub hydro_id: usize,
    pub lognormal: LognormalParams,
}

#[derive(Deserialize, Debug)]
pub struct StageInflowDistributions {
    pub season_id: usize,
    pub num_branchings: usize,
    pub distributions: Vec<InflowDistribution>,
}

#[derive(Deserialize, Debug)]
pub struct NoiseTermInput {
    pub probability: f64,
    pub inflow: Vec<f64>,
    pub load: Vec<f64>,
}

/// An explicit discrete support for every node of a season
#[derive(Deserialize, Debug)]
pub struct SeasonNoiseTerms {
    pub season_id: usize,
    pub terms: Vec<NoiseTermInput>,
}

#[derive(Deserialize, Debug)]
pub struct Recourse {
    pub initial_states: Vec<InitialState>,
    #[serde(default)]
    pub load_distributions: Vec<StageLoadDistributions>,
    #[serde(default)]
    pub inflow_distributions: Vec<StageInflowDistributions>,
    #[serde(default)]
    pub noise_terms: Vec<SeasonNoiseTerms>,
}

pub fn read_recourse_input(filepath: &Path) -> Result<Recourse> {
    read_json(filepath)
}

impl Recourse {
    pub fn build_sddp_initial_state(
        &self,
        num_hydros: usize,
    ) -> Result<Vec<f64>> {
        let hydro_ids: Vec<usize> =
            self.initial_states.iter().map(|s| s.hydro_id).collect();
        validate_entity_count(hydro_ids.len(), num_hydros, "initial storages")?;
        Ok(validate_id_range(&hydro_ids, "initial storages")?
            .into_iter()
            .map(|i| self.initial_states[i].initial_storage)
            .collect())
    }

    fn explicit_noise(&self, season_id: usize) -> Option<Result<NoiseSupport>> {
        self.noise_terms
            .iter()
            .find(|s| s.season_id == season_id)
            .map(|s| {
                NoiseSupport::new(
                    s.terms
                        .iter()
                        .map(|t| {
                            NoiseTerm::new(
                                t.probability,
                                t.inflow.clone(),
                                t.load.clone(),
                            )
                        })
                        .collect(),
                )
            })
    }

    fn build_node_generator(
        &self,
        season_id: usize,
        node_id: usize,
        system: &system::System,
    ) -> Result<NodeScenarioGenerator> {
        let num_buses = system.meta.buses_count;
        let num_hydros = system.meta.hydros_count;
        let node_loads = self
            .load_distributions
            .iter()
            .find(|s| s.season_id == season_id)
            .ok_or_else(|| {
                SddpError::Validation(format!(
                    "Could not find load distributions for node {node_id}"
                ))
            })?;
        let node_inflows = self
            .inflow_distributions
            .iter()
            .find(|s| s.season_id == season_id)
            .ok_or_else(|| {
                SddpError::Validation(format!(
                    "Could not find inflow distributions for node {node_id}"
                ))
            })?;
        if node_loads.num_branchings != node_inflows.num_branchings {
            return Err(SddpError::Validation(format!(
                "season {season_id} has {} load and {} inflow branchings",
                node_loads.num_branchings, node_inflows.num_branchings
            )));
        }

        let bus_ids: Vec<usize> =
            node_loads.distributions.iter().map(|s| s.bus_id).collect();
        validate_entity_count(bus_ids.len(), num_buses, "bus loads")?;
        let load_distributions =
            validate_id_range(&bus_ids, "load distributions")?
                .into_iter()
                .map(|i| {
                    let params = &node_loads.distributions[i].normal;
                    Normal::new(params.mu, params.sigma).map_err(|e| {
                        SddpError::Distribution(format!(
                            "season {season_id} load: {e}"
                        ))
                    })
                })
                .collect::<Result<Vec<Normal<f64>>>>()?;

        let hydro_ids: Vec<usize> =
            node_inflows.distributions.iter().map(|s| s.hydro_id).collect();
        validate_entity_count(hydro_ids.len(), num_hydros, "hydro inflows")?;
        let inflow_distributions =
            validate_id_range(&hydro_ids, "inflow distributions")?
                .into_iter()
                .map(|i| {
                    let params = &node_inflows.distributions[i].lognormal;
                    LogNormal::new(params.mu, params.sigma).map_err(|e| {
                        SddpError::Distribution(format!(
                            "season {season_id} inflow: {e}"
                        ))
                    })
                })
                .collect::<Result<Vec<LogNormal<f64>>>>()?;

        NodeScenarioGenerator::new(
            inflow_distributions,
            load_distributions,
            node_loads.num_branchings,
        )
    }

    /// The noise support of each node, in node order. Nodes of seasons with
    /// explicit noise terms use them, the others get a sample average
    /// approximation of their season distributions.
    pub fn generate_sddp_noises(
        &self,
        nodes: &[&GraphNodeInput],
        system: &system::System,
        seed: u64,
    ) -> Result<Vec<NoiseSupport>> {
        let mut supports: Vec<Option<NoiseSupport>> =
            Vec::with_capacity(nodes.len());
        let mut sampled_nodes = Vec::<usize>::new();
        let mut scenario_generator = ScenarioGenerator::new();
        for (index, node) in nodes.iter().enumerate() {
            match self.explicit_noise(node.season_id) {
                Some(support) => supports.push(Some(support?)),
                None => {
                    let generator = self.build_node_generator(
                        node.season_id,
                        node.id,
                        system,
                    )?;
                    scenario_generator.add_node_generator(generator);
                    sampled_nodes.push(index);
                    supports.push(None);
                }
            }
        }
        let saa = scenario_generator.generate_saa(seed)?;
        for (index, support) in sampled_nodes.into_iter().zip(saa.into_iter()) {
            supports[index] = Some(support);
        }
        supports
            .into_iter()
            .enumerate()
            .map(|(index, s)| {
                s.ok_or_else(|| {
                    SddpError::Validation(format!("node {index} has no noise"))
                })
            })
            .collect()
    }
}

#[derive(Debug)]
pub struct Input {
    pub config: Config,
    pub system: SystemInput,
    pub graph: GraphInput,
    pub recourse: Recourse,
}

impl Input {
    pub fn build(path: &str) -> Result<Self> {
        let root = Path::new(path);
        let config = read_config_input(&root.join("config.json"))?;
        let system = read_system_input(&root.join("system.json"))?;
        let graph = read_graph_input(&root.join("graph.json"))?;
        let recourse = read_recourse_input(&root.join("recourse.json"))?;
        Ok(Self {
            config,
            system,
            graph,
            recourse,
        })
    }

    /// Builds the policy graph of the study, with the noise of every node
    /// already sampled from the configured seed.
    pub fn build_policy_graph(&self) -> Result<PolicyGraph> {
        let system = self.system.build_sddp_system()?;
        let initial_state = self
            .recourse
            .build_sddp_initial_state(system.meta.hydros_count)?;
        let nodes = self.graph.ordered_nodes()?;
        let noises =
            self.recourse
                .generate_sddp_noises(&nodes, &system, self.config.seed)?;

        let mut g = DirectedGraph::<NodeData>::new();
        for (node_input, noise) in nodes.iter().zip(noises.into_iter()) {
            let node_system = match node_input.thermal_costs.as_ref() {
                Some(costs) => system.with_thermal_costs(costs)?,
                None => system.clone(),
            };
            let data = NodeData::new(
                node_input.stage,
                node_input.markov_state,
                node_system,
                risk_measure::factory(&node_input.risk_measure)?,
                noise,
            )?
            .with_period(
                parse_date(&node_input.start_date, node_input.id)?,
                parse_date(&node_input.end_date, node_input.id)?,
            )?
            .with_season(node_input.season_id);
            g.add_node(data);
        }
        for edge_input in self.graph.edges.iter() {
            g.add_edge(
                edge_input.source_id,
                edge_input.target_id,
                Transition::new(
                    edge_input.probability,
                    discount_factor(edge_input.discount_rate)?,
                ),
            )?;
        }

        let root_risk_measure =
            risk_measure::factory(&self.config.root_risk_measure)?;
        Ok(PolicyGraph::from_parts(
            g,
            self.graph.build_root_transitions(),
            initial_state,
        )?
        .with_root_risk_measure(root_risk_measure))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEMO: &str = "demos/hydrothermal";
    const CYCLIC_DEMO: &str = "demos/infinite_horizon";

    #[test]
    fn test_read_config() {
        let config =
            read_config_input(&Path::new(DEMO).join("config.json")).unwrap();
        assert_eq!(config.num_iterations, 64);
        assert_eq!(config.num_simulation_scenarios, 200);
        assert_eq!(config.num_forward_passes, 1);
        assert!(config.cut_selection);
        assert_eq!(config.root_risk_measure, "expectation");
        assert!(config.bound_stalling.is_some());
    }

    #[test]
    fn test_config_defaults() {
        let config: Config = serde_json::from_str(
            r#"{"num_iterations": 8, "num_simulation_scenarios": 10, "seed": 3}"#,
        )
        .unwrap();
        assert_eq!(config.max_forward_depth, 1000);
        assert_eq!(config.alpha_lower_bound, 0.0);
        assert!(!config.write_subproblems);
        let options = config.training_options().unwrap();
        assert_eq!(options.stopping_rules.len(), 1);
        assert_eq!(options.seed, 3);
    }

    #[test]
    fn test_config_stopping_rules() {
        let config: Config = serde_json::from_str(
            r#"{"num_iterations": 8, "num_simulation_scenarios": 10, "seed": 3,
                "time_limit_seconds": 60.0,
                "statistical": {"num_replications": 5, "z_score": 1.96}}"#,
        )
        .unwrap();
        let options = config.training_options().unwrap();
        assert_eq!(options.stopping_rules.len(), 3);
    }

    #[test]
    fn test_read_system() {
        let system =
            read_system_input(&Path::new(DEMO).join("system.json")).unwrap();
        assert_eq!(system.buses.len(), 2);
        assert_eq!(system.lines.len(), 1);
        assert_eq!(system.thermals.len(), 3);
        assert_eq!(system.hydros.len(), 2);
    }

    #[test]
    fn test_build_sddp_system() {
        let system = read_system_input(&Path::new(DEMO).join("system.json"))
            .unwrap()
            .build_sddp_system()
            .unwrap();
        assert_eq!(system.hydros[1].upstream_hydro_ids, vec![0]);
    }

    #[test]
    fn test_reject_missing_ids() {
        let system: SystemInput = serde_json::from_str(
            r#"{"buses": [{"id": 1, "deficit_cost": 100.0}]}"#,
        )
        .unwrap();
        assert!(matches!(
            system.build_sddp_system(),
            Err(SddpError::Validation(_))
        ));
    }

    #[test]
    fn test_read_recourse() {
        let recourse =
            read_recourse_input(&Path::new(DEMO).join("recourse.json")).unwrap();
        assert_eq!(recourse.initial_states.len(), 2);
        assert_eq!(recourse.load_distributions.len(), 12);
        assert_eq!(recourse.inflow_distributions.len(), 12);
        assert!(recourse.noise_terms.is_empty());
        assert_eq!(
            recourse.build_sddp_initial_state(2).unwrap(),
            vec![100.0, 60.0]
        );
        assert!(recourse.build_sddp_initial_state(1).is_err());
    }

    #[test]
    fn test_read_input() {
        let input = Input::build(DEMO).unwrap();
        assert_eq!(input.config.num_iterations, 64);
        assert_eq!(input.graph.nodes.len(), 12);
    }

    #[test]
    fn test_missing_directory() {
        assert!(matches!(
            Input::build("demos/missing"),
            Err(SddpError::Io { .. })
        ));
    }

    #[test]
    fn test_build_policy_graph() {
        let input = Input::build(DEMO).unwrap();
        let policy = input.build_policy_graph().unwrap();
        assert_eq!(policy.node_count(), 12);
        assert_eq!(policy.state_dimension(), 2);
        assert!(!policy.is_cyclic());
        let node = policy.node(0).unwrap();
        assert_eq!(node.noise.len(), 10);
        assert_eq!(
            node.start_date,
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
        );
        // the saa is reproducible from the seed
        let again = input.build_policy_graph().unwrap();
        assert_eq!(again.node(5).unwrap().noise, policy.node(5).unwrap().noise);
    }

    #[test]
    fn test_build_cyclic_policy_graph() {
        let input = Input::build(CYCLIC_DEMO).unwrap();
        let policy = input.build_policy_graph().unwrap();
        assert!(policy.is_cyclic());
        assert_eq!(policy.node_count(), 4);
        // explicit noise terms are used as they are
        let node = policy.node(0).unwrap();
        assert_eq!(node.noise.len(), 3);
        assert_eq!(node.noise.get(0).unwrap().inflow, vec![10.0]);
        let edge = &policy.graph.get_transitions(3).unwrap()[0];
        assert_eq!(edge.target_id, 0);
        assert!((edge.transition.discount_factor - 1.0 / 1.05).abs() < 1e-12);
        // the dry season pays more for fuel
        let costs: Vec<f64> = policy
            .node(2)
            .unwrap()
            .system
            .thermals
            .iter()
            .map(|t| t.cost)
            .collect();
        assert_eq!(costs, vec![8.0, 16.0]);
        assert_eq!(policy.node(1).unwrap().system.thermals[0].cost, 5.0);
    }

    #[test]
    fn test_reject_invalid_date() {
        assert!(parse_date("2024-13-01", 0).is_err());
        assert_eq!(
            parse_date("2024-02-29", 0).unwrap(),
            NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()
        );
    }
}
