pub mod cut;
pub mod error;
pub mod fcf;
pub mod graph;
pub mod input;
mod log;
pub mod noise;
pub mod output;
pub mod policy_graph;
pub mod risk_measure;
pub mod sddp;
pub mod solver;
pub mod stability;
pub mod state;
pub mod stopping_rule;
pub mod subproblem;
pub mod system;
pub mod utils;
use error::Result;
use input::Input;
use std::path::Path;
use std::time::Instant;

/// Arguments of a study run
#[derive(Debug, Clone)]
pub struct InputArgs {
    /// Directory with the input files, where outputs are also written
    pub path: String,
    /// Cut file of a previous training. When given, training is skipped.
    pub cuts: Option<String>,
    pub simulate: bool,
}

impl InputArgs {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            cuts: None,
            simulate: true,
        }
    }
}

pub fn run(input_args: &InputArgs) -> Result<()> {
    log::show_greeting();

    let begin = Instant::now();
    log::input_reading_line(&input_args.path);
    let input = Input::build(&input_args.path)?;
    let config = &input.config;

    let policy = input.build_policy_graph()?;
    let options = config.training_options()?;

    let (fcfs, training_log) = match input_args.cuts.as_ref() {
        Some(cuts_path) => {
            log::cuts_loading_line(cuts_path);
            let fcfs = output::read_cuts_from_file(
                &policy,
                Path::new(cuts_path),
                options.cut_selection,
            )?;
            (fcfs, None)
        }
        None => {
            let rule_names: Vec<String> =
                options.stopping_rules.iter().map(|r| r.name()).collect();
            log::training_greeting(
                policy.node_count(),
                policy.state_dimension(),
                policy.is_cyclic(),
                &rule_names,
            );
            let training_begin = Instant::now();
            let mut result = sddp::train(&policy, &options)?;
            log::training_duration(training_begin.elapsed());
            if config.write_subproblems {
                sddp::write_subproblems(
                    &mut result.subproblems,
                    &Path::new(&input_args.path).join("subproblems"),
                )?;
            }
            (result.fcfs, Some(result.log))
        }
    };

    let simulate =
        input_args.simulate && config.num_simulation_scenarios > 0;
    let trajectories = if simulate {
        log::simulation_greeting(config.num_simulation_scenarios);
        let simulation_begin = Instant::now();
        let trajectories = sddp::simulate(
            &policy,
            &fcfs,
            config.num_simulation_scenarios,
            config.seed,
            &options,
        )?;
        let costs: Vec<f64> = trajectories.iter().map(|t| t.cost).collect();
        let (mean, std) = utils::mean_and_std(&costs);
        log::simulation_stats(mean, 1.96 * std / (costs.len() as f64).sqrt());
        log::simulation_duration(simulation_begin.elapsed());
        trajectories
    } else {
        vec![]
    };

    log::output_generation_line(&input_args.path);
    output::generate_outputs(
        &policy,
        &fcfs,
        training_log.as_ref(),
        &trajectories,
        &input_args.path,
    )?;

    log::show_farewell(begin.elapsed());

    Ok(())
}
