use crate::cut;
use crate::error::{Result, SddpError};
use crate::solver;
use crate::system;

/// Helper function for setting the same default solver options on
/// every solved problem.
fn set_default_solver_options(model: &mut solver::Model) -> Result<()> {
    model.set_option("presolve", "off")?;
    model.set_option("solver", "simplex")?;
    model.set_option("parallel", "off")?;
    model.set_option("threads", 1)?;
    model.set_option("primal_feasibility_tolerance", 1e-7)?;
    model.set_option("dual_feasibility_tolerance", 1e-7)?;
    model.set_option("simplex_strategy", 1)?;
    model.set_option("simplex_iteration_limit", i32::MAX)?;
    model.set_option("time_limit", 300.0)?;
    Ok(())
}

/// Each retry loosens the tolerances a bit more, before falling back to
/// the interior point solver
fn set_retry_solver_options(
    model: &mut solver::Model,
    retry: usize,
) -> Result<()> {
    match retry {
        1 => {
            model.set_option("primal_feasibility_tolerance", 1e-6)?;
            model.set_option("dual_feasibility_tolerance", 1e-6)?;
        }
        2 => {
            model.set_option("primal_feasibility_tolerance", 1e-5)?;
            model.set_option("dual_feasibility_tolerance", 1e-5)?;
        }
        3 => model.set_option("simplex_strategy", 4)?,
        4 => {
            model.set_option("presolve", "on")?;
            model.set_option("solver", "ipm")?;
            model.set_option("primal_feasibility_tolerance", 1e-7)?;
            model.set_option("dual_feasibility_tolerance", 1e-7)?;
        }
        _ => set_default_solver_options(model)?,
    }
    Ok(())
}

const MAX_RETRIES: usize = 4;

/// Helper accessor for indexing desired variables and constraints
/// in each subproblem
#[derive(Debug, Clone)]
pub struct Accessors {
    pub deficit: Vec<usize>,
    pub direct_exchange: Vec<usize>,
    pub reverse_exchange: Vec<usize>,
    pub thermal_gen: Vec<usize>,
    pub turbined_flow: Vec<usize>,
    pub spillage: Vec<usize>,
    pub stored_volume: Vec<usize>,
    pub alpha: usize,
    pub load_balance: Vec<usize>,
    pub hydro_balance: Vec<usize>,
}

/// Builds the dispatch LP of a node without any cuts. Loads and the
/// hydro balance right-hand sides are set to zero until a realization
/// is applied.
pub fn build_template(
    system: &system::System,
    alpha_lower_bound: f64,
) -> (solver::Problem, Accessors) {
    let mut pb = solver::Problem::new();

    // VARIABLES
    let deficit: Vec<usize> = system
        .buses
        .iter()
        .map(|bus| pb.add_column(bus.deficit_cost, 0.0..))
        .collect();
    let direct_exchange: Vec<usize> = system
        .lines
        .iter()
        .map(|line| {
            pb.add_column(line.exchange_penalty, 0.0..=line.direct_capacity)
        })
        .collect();
    let reverse_exchange: Vec<usize> = system
        .lines
        .iter()
        .map(|line| {
            pb.add_column(line.exchange_penalty, 0.0..=line.reverse_capacity)
        })
        .collect();
    let thermal_gen: Vec<usize> = system
        .thermals
        .iter()
        .map(|thermal| {
            pb.add_column(
                thermal.cost,
                thermal.min_generation..=thermal.max_generation,
            )
        })
        .collect();
    let turbined_flow: Vec<usize> = system
        .hydros
        .iter()
        .map(|hydro| {
            let bounds = hydro.min_turbined_flow..=hydro.max_turbined_flow;
            pb.add_column(0.0, bounds)
        })
        .collect();
    let spillage: Vec<usize> = system
        .hydros
        .iter()
        .map(|hydro| pb.add_column(hydro.spillage_penalty, 0.0..))
        .collect();
    let stored_volume: Vec<usize> = system
        .hydros
        .iter()
        .map(|hydro| pb.add_column(0.0, hydro.min_storage..=hydro.max_storage))
        .collect();

    let alpha = pb.add_column(1.0, alpha_lower_bound..);

    // Adds load balance with 0.0 as RHS
    let mut load_balance: Vec<usize> = vec![0; system.meta.buses_count];
    for bus in system.buses.iter() {
        let mut factors = vec![(deficit[bus.id], 1.0)];
        for thermal_id in bus.thermal_ids.iter() {
            factors.push((thermal_gen[*thermal_id], 1.0));
        }
        for hydro_id in bus.hydro_ids.iter() {
            factors.push((
                turbined_flow[*hydro_id],
                system.hydros[*hydro_id].productivity,
            ));
        }
        for line_id in bus.source_line_ids.iter() {
            factors.push((reverse_exchange[*line_id], 1.0));
            factors.push((direct_exchange[*line_id], -1.0));
        }
        for line_id in bus.target_line_ids.iter() {
            factors.push((direct_exchange[*line_id], 1.0));
            factors.push((reverse_exchange[*line_id], -1.0));
        }
        load_balance[bus.id] = pb.add_row(0.0..=0.0, &factors);
    }

    // Adds hydro balance with 0.0 as RHS
    let mut hydro_balance: Vec<usize> = vec![0; system.meta.hydros_count];
    for hydro in system.hydros.iter() {
        let mut factors: Vec<(usize, f64)> = vec![
            (stored_volume[hydro.id], 1.0),
            (turbined_flow[hydro.id], 1.0),
            (spillage[hydro.id], 1.0),
        ];
        for upstream_hydro_id in hydro.upstream_hydro_ids.iter() {
            factors.push((turbined_flow[*upstream_hydro_id], -1.0));
            factors.push((spillage[*upstream_hydro_id], -1.0));
        }
        hydro_balance[hydro.id] = pb.add_row(0.0..=0.0, &factors);
    }

    let accessors = Accessors {
        deficit,
        direct_exchange,
        reverse_exchange,
        thermal_gen,
        turbined_flow,
        spillage,
        stored_volume,
        alpha,
        load_balance,
        hydro_balance,
    };
    (pb, accessors)
}

/// A subproblem that contains a solver model and is associated to a single
/// node in the policy graph
#[derive(Debug)]
pub struct Subproblem {
    pub node_id: usize,
    pub model: solver::Model,
    pub accessors: Accessors,
    // row of each cut in the model, indexed by cut id
    cut_rows: Vec<usize>,
}

fn slice_of(values: &[f64], indices: &[usize]) -> Vec<f64> {
    indices.iter().map(|&i| values[i]).collect()
}

impl Subproblem {
    pub fn new(
        node_id: usize,
        system: &system::System,
        alpha_lower_bound: f64,
    ) -> Result<Self> {
        let (pb, accessors) = build_template(system, alpha_lower_bound);
        let mut model = pb.build_model()?;
        set_default_solver_options(&mut model)?;
        Ok(Subproblem {
            node_id,
            model,
            accessors,
            cut_rows: vec![],
        })
    }

    pub fn cut_count(&self) -> usize {
        self.cut_rows.len()
    }

    fn set_load_balance_rhs(&mut self, loads: &[f64]) -> Result<()> {
        for (index, row) in self.accessors.load_balance.iter().enumerate() {
            self.model
                .change_row_bounds(*row, loads[index], loads[index])?;
        }
        Ok(())
    }

    fn set_hydro_balance_rhs(
        &mut self,
        inflows: &[f64],
        initial_storages: &[f64],
    ) -> Result<()> {
        for (index, row) in self.accessors.hydro_balance.iter().enumerate() {
            let rhs = inflows[index] + initial_storages[index];
            self.model.change_row_bounds(*row, rhs, rhs)?;
        }
        Ok(())
    }

    fn check_dimensions(
        &self,
        initial_storage: &[f64],
        load: &[f64],
        inflow: &[f64],
    ) -> Result<()> {
        let num_hydros = self.accessors.hydro_balance.len();
        let num_buses = self.accessors.load_balance.len();
        if initial_storage.len() != num_hydros
            || inflow.len() != num_hydros
            || load.len() != num_buses
        {
            return Err(SddpError::Validation(format!(
                "node {} expects {} storages/inflows and {} loads",
                self.node_id, num_hydros, num_buses
            )));
        }
        Ok(())
    }

    fn retry_solve(&mut self) -> Result<()> {
        let mut retry: usize = 0;
        loop {
            // HiGHS returns an error status on numerical failures, which
            // the model status below also reports
            if let Err(e) = self.model.solve() {
                tracing::debug!(
                    "node {}: Highs_run returned {e:?}",
                    self.node_id
                );
            }
            let status = self.model.status();
            match status {
                solver::HighsModelStatus::Optimal => {
                    if retry != 0 {
                        tracing::debug!(
                            "node {} solved after {} retries",
                            self.node_id,
                            retry
                        );
                        set_default_solver_options(&mut self.model)?;
                    }
                    return Ok(());
                }
                solver::HighsModelStatus::Infeasible
                | solver::HighsModelStatus::UnboundedOrInfeasible
                | solver::HighsModelStatus::SolveError
                | solver::HighsModelStatus::Unknown
                    if retry < MAX_RETRIES =>
                {
                    retry += 1;
                    set_retry_solver_options(&mut self.model, retry)?;
                }
                _ => {
                    set_default_solver_options(&mut self.model)?;
                    self.model.clear_solver();
                    return Err(SddpError::Solver {
                        node_id: self.node_id,
                        status,
                    });
                }
            }
        }
    }

    /// Solves the subproblem for an incoming state and a realization of
    /// the uncertainties, extracting the primal and dual results.
    pub fn realize_uncertainties(
        &mut self,
        initial_storage: &[f64],
        load: &[f64],
        inflow: &[f64],
    ) -> Result<Realization> {
        self.check_dimensions(initial_storage, load, inflow)?;
        self.set_load_balance_rhs(load)?;
        self.set_hydro_balance_rhs(inflow, initial_storage)?;

        self.retry_solve()?;

        let solution = self.model.get_solution();
        let total_stage_objective = self.model.get_objective_value();
        let future_objective = solution.colvalue[self.accessors.alpha];
        let a = &self.accessors;
        let direct_exchange = slice_of(&solution.colvalue, &a.direct_exchange);
        let reverse_exchange =
            slice_of(&solution.colvalue, &a.reverse_exchange);
        // evals net exchange
        let exchange = direct_exchange
            .iter()
            .zip(reverse_exchange.iter())
            .map(|(d, r)| d - r)
            .collect();

        let realization = Realization {
            loads: load.to_vec(),
            deficit: slice_of(&solution.colvalue, &a.deficit),
            exchange,
            inflow: inflow.to_vec(),
            turbined_flow: slice_of(&solution.colvalue, &a.turbined_flow),
            spillage: slice_of(&solution.colvalue, &a.spillage),
            thermal_generation: slice_of(&solution.colvalue, &a.thermal_gen),
            water_value: slice_of(&solution.rowdual, &a.hydro_balance),
            marginal_cost: slice_of(&solution.rowdual, &a.load_balance),
            current_stage_objective: total_stage_objective - future_objective,
            future_objective,
            total_stage_objective,
            initial_storage: initial_storage.to_vec(),
            final_storage: slice_of(&solution.colvalue, &a.stored_volume),
        };

        self.model.clear_solver();
        Ok(realization)
    }

    /// Appends the row `alpha - coefficients * stored_volume >= rhs`
    pub fn add_cut_row(&mut self, cut: &cut::BendersCut) -> Result<usize> {
        if cut.id != self.cut_rows.len() {
            return Err(SddpError::Validation(format!(
                "cut {} added out of order to node {}",
                cut.id, self.node_id
            )));
        }
        let factors = cut
            .row_factors(self.accessors.alpha, &self.accessors.stored_volume);
        let row = if cut.active {
            self.model.add_row(cut.rhs.., &factors)?
        } else {
            self.model.add_row(.., &factors)?
        };
        self.cut_rows.push(row);
        Ok(row)
    }

    /// Puts back a previously removed cut by restoring its lower bound
    pub fn activate_cut_row(&mut self, cut: &cut::BendersCut) -> Result<()> {
        let row = self.cut_row(cut.id)?;
        self.model.change_row_bounds(row, cut.rhs, f64::INFINITY)?;
        Ok(())
    }

    /// Removes a cut from the model by freeing its row, so that the row
    /// indices of every other cut stay the same
    pub fn deactivate_cut_row(&mut self, cut_id: usize) -> Result<()> {
        let row = self.cut_row(cut_id)?;
        self.model
            .change_row_bounds(row, f64::NEG_INFINITY, f64::INFINITY)?;
        Ok(())
    }

    fn cut_row(&self, cut_id: usize) -> Result<usize> {
        self.cut_rows.get(cut_id).copied().ok_or_else(|| {
            SddpError::Validation(format!(
                "cut {} not found in node {}",
                cut_id, self.node_id
            ))
        })
    }

    pub fn set_alpha_lower_bound(&mut self, value: f64) -> Result<()> {
        self.model
            .change_col_bounds(self.accessors.alpha, value, f64::INFINITY)?;
        Ok(())
    }
}

/// Results of solving a node subproblem for one incoming state and one
/// uncertainty realization
#[derive(Debug, Clone, PartialEq)]
pub struct Realization {
    pub loads: Vec<f64>,
    pub deficit: Vec<f64>,
    pub exchange: Vec<f64>,
    pub inflow: Vec<f64>,
    pub turbined_flow: Vec<f64>,
    pub spillage: Vec<f64>,
    pub thermal_generation: Vec<f64>,
    pub water_value: Vec<f64>,
    pub marginal_cost: Vec<f64>,
    pub current_stage_objective: f64,
    pub future_objective: f64,
    pub total_stage_objective: f64,
    pub initial_storage: Vec<f64>,
    pub final_storage: Vec<f64>,
}
