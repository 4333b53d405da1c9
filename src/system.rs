use crate::error::{Result, SddpError};

#[derive(Debug, Clone)]
pub struct Bus {
    pub id: usize,
    pub deficit_cost: f64,
    pub hydro_ids: Vec<usize>,
    pub thermal_ids: Vec<usize>,
    pub source_line_ids: Vec<usize>,
    pub target_line_ids: Vec<usize>,
}

impl Bus {
    pub fn new(id: usize, deficit_cost: f64) -> Self {
        Self {
            id,
            deficit_cost,
            hydro_ids: vec![],
            thermal_ids: vec![],
            source_line_ids: vec![],
            target_line_ids: vec![],
        }
    }
}

#[derive(Debug, Clone)]
pub struct Line {
    pub id: usize,
    pub source_bus_id: usize,
    pub target_bus_id: usize,
    pub direct_capacity: f64,
    pub reverse_capacity: f64,
    pub exchange_penalty: f64,
}

impl Line {
    pub fn new(
        id: usize,
        source_bus_id: usize,
        target_bus_id: usize,
        direct_capacity: f64,
        reverse_capacity: f64,
        exchange_penalty: f64,
    ) -> Self {
        Self {
            id,
            source_bus_id,
            target_bus_id,
            direct_capacity,
            reverse_capacity,
            exchange_penalty,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Thermal {
    pub id: usize,
    pub bus_id: usize,
    pub cost: f64,
    pub min_generation: f64,
    pub max_generation: f64,
}

impl Thermal {
    pub fn new(
        id: usize,
        bus_id: usize,
        cost: f64,
        min_generation: f64,
        max_generation: f64,
    ) -> Self {
        Self {
            id,
            bus_id,
            cost,
            min_generation,
            max_generation,
        }
    }
}

/// A reservoir plant. Its stored volume is the state variable carried
/// between stages.
#[derive(Debug, Clone)]
pub struct Hydro {
    pub id: usize,
    pub downstream_hydro_id: Option<usize>,
    pub bus_id: usize,
    pub productivity: f64,
    pub min_storage: f64,
    pub max_storage: f64,
    pub min_turbined_flow: f64,
    pub max_turbined_flow: f64,
    pub spillage_penalty: f64,
    pub upstream_hydro_ids: Vec<usize>,
}

impl Hydro {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: usize,
        downstream_hydro_id: Option<usize>,
        bus_id: usize,
        productivity: f64,
        min_storage: f64,
        max_storage: f64,
        min_turbined_flow: f64,
        max_turbined_flow: f64,
        spillage_penalty: f64,
    ) -> Self {
        Self {
            id,
            downstream_hydro_id,
            bus_id,
            productivity,
            min_storage,
            max_storage,
            min_turbined_flow,
            max_turbined_flow,
            spillage_penalty,
            upstream_hydro_ids: vec![],
        }
    }
}

#[derive(Debug, Clone)]
pub struct SystemMetadata {
    pub buses_count: usize,
    pub lines_count: usize,
    pub thermals_count: usize,
    pub hydros_count: usize,
}

#[derive(Debug, Clone)]
pub struct System {
    pub buses: Vec<Bus>,
    pub lines: Vec<Line>,
    pub thermals: Vec<Thermal>,
    pub hydros: Vec<Hydro>,
    pub meta: SystemMetadata,
}

fn invalid(message: String) -> SddpError {
    SddpError::Validation(message)
}

fn check_bus(bus_id: usize, num_buses: usize, owner: &str) -> Result<()> {
    if bus_id >= num_buses {
        return Err(invalid(format!("{owner} refers to missing bus {bus_id}")));
    }
    Ok(())
}

fn check_range(min: f64, max: f64, owner: &str) -> Result<()> {
    if min < 0.0 || min > max {
        return Err(invalid(format!(
            "{owner} has invalid bounds [{min}, {max}]"
        )));
    }
    Ok(())
}

/// Entities are indexed by id, so every id must match its position
fn check_ids(ids: impl Iterator<Item = usize>, entity: &str) -> Result<()> {
    for (index, id) in ids.enumerate() {
        if id != index {
            return Err(invalid(format!(
                "{entity} id {id} found at position {index}, ids must be 0..n"
            )));
        }
    }
    Ok(())
}

/// Fails if following `downstream_hydro_id` from any plant comes back to it
fn check_cascade(hydros: &[Hydro]) -> Result<()> {
    for hydro in hydros.iter() {
        let mut current = hydro.downstream_hydro_id;
        let mut steps = 0;
        while let Some(id) = current {
            if id == hydro.id || steps > hydros.len() {
                return Err(invalid(format!(
                    "hydro cascade has a cycle through hydro {}",
                    hydro.id
                )));
            }
            current = hydros[id].downstream_hydro_id;
            steps += 1;
        }
    }
    Ok(())
}

impl System {
    pub fn new(
        mut buses: Vec<Bus>,
        lines: Vec<Line>,
        thermals: Vec<Thermal>,
        mut hydros: Vec<Hydro>,
    ) -> Result<Self> {
        let num_buses = buses.len();
        let num_hydros = hydros.len();
        check_ids(buses.iter().map(|b| b.id), "bus")?;
        check_ids(lines.iter().map(|l| l.id), "line")?;
        check_ids(thermals.iter().map(|t| t.id), "thermal")?;
        check_ids(hydros.iter().map(|h| h.id), "hydro")?;
        for bus in buses.iter() {
            if bus.deficit_cost < 0.0 {
                return Err(invalid(format!(
                    "bus {} has negative deficit cost",
                    bus.id
                )));
            }
        }
        for l in lines.iter() {
            let owner = format!("line {}", l.id);
            check_bus(l.source_bus_id, num_buses, &owner)?;
            check_bus(l.target_bus_id, num_buses, &owner)?;
            if l.direct_capacity < 0.0 || l.reverse_capacity < 0.0 {
                return Err(invalid(format!("{owner} has negative capacity")));
            }
            buses[l.source_bus_id].source_line_ids.push(l.id);
            buses[l.target_bus_id].target_line_ids.push(l.id);
        }
        for t in thermals.iter() {
            let owner = format!("thermal {}", t.id);
            check_bus(t.bus_id, num_buses, &owner)?;
            check_range(t.min_generation, t.max_generation, &owner)?;
            if t.cost < 0.0 {
                return Err(invalid(format!("{owner} has negative cost")));
            }
            buses[t.bus_id].thermal_ids.push(t.id);
        }
        for h in hydros.iter() {
            let owner = format!("hydro {}", h.id);
            check_bus(h.bus_id, num_buses, &owner)?;
            check_range(h.min_storage, h.max_storage, &owner)?;
            check_range(h.min_turbined_flow, h.max_turbined_flow, &owner)?;
            if let Some(downstream) = h.downstream_hydro_id {
                if downstream >= num_hydros {
                    return Err(invalid(format!(
                        "{owner} refers to missing downstream hydro {downstream}"
                    )));
                }
            }
            buses[h.bus_id].hydro_ids.push(h.id);
        }
        check_cascade(&hydros)?;
        for id in 0..num_hydros {
            if let Some(downstream) = hydros[id].downstream_hydro_id {
                hydros[downstream].upstream_hydro_ids.push(id);
            }
        }

        let meta = SystemMetadata {
            buses_count: num_buses,
            lines_count: lines.len(),
            thermals_count: thermals.len(),
            hydros_count: num_hydros,
        };

        Ok(Self {
            buses,
            lines,
            thermals,
            hydros,
            meta,
        })
    }

    /// Number of state variables of a node holding this system
    pub fn state_dimension(&self) -> usize {
        self.meta.hydros_count
    }

    /// Replaces the generation cost of every thermal plant, keeping the
    /// topology. Nodes with their own fuel prices in graph.json are built
    /// this way.
    pub fn with_thermal_costs(&self, costs: &[f64]) -> Result<Self> {
        if costs.len() != self.thermals.len() {
            return Err(invalid(format!(
                "expected {} thermal costs, got {}",
                self.thermals.len(),
                costs.len()
            )));
        }
        let mut system = self.clone();
        for (thermal, cost) in system.thermals.iter_mut().zip(costs.iter()) {
            thermal.cost = *cost;
        }
        Ok(system)
    }
}

impl Default for System {
    fn default() -> Self {
        let buses = vec![Bus::new(0, 50.0)];
        let thermals = vec![
            Thermal::new(0, 0, 5.0, 0.0, 15.0),
            Thermal::new(1, 0, 10.0, 0.0, 15.0),
        ];
        let hydros =
            vec![Hydro::new(0, None, 0, 1.0, 0.0, 100.0, 0.0, 60.0, 0.01)];

        Self::new(buses, vec![], thermals, hydros)
            .expect("default system is valid")
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn test_create_default_system() {
        let system = System::default();
        assert_eq!(system.buses.len(), 1);
        assert_eq!(system.lines.len(), 0);
        assert_eq!(system.thermals.len(), 2);
        assert_eq!(system.hydros.len(), 1);
        assert_eq!(system.buses[0].thermal_ids, vec![0, 1]);
        assert_eq!(system.buses[0].hydro_ids, vec![0]);
        assert_eq!(system.state_dimension(), 1);
    }

    #[test]
    fn test_upstream_hydros_are_linked() {
        let buses = vec![Bus::new(0, 100.0)];
        let hydros = vec![
            Hydro::new(0, Some(2), 0, 1.0, 0.0, 10.0, 0.0, 5.0, 0.01),
            Hydro::new(1, Some(2), 0, 1.0, 0.0, 10.0, 0.0, 5.0, 0.01),
            Hydro::new(2, None, 0, 1.0, 0.0, 10.0, 0.0, 5.0, 0.01),
        ];
        let system = System::new(buses, vec![], vec![], hydros).unwrap();
        assert_eq!(system.hydros[2].upstream_hydro_ids, vec![0, 1]);
        assert!(system.hydros[0].upstream_hydro_ids.is_empty());
    }

    #[test]
    fn test_lines_are_linked_to_buses() {
        let buses = vec![Bus::new(0, 100.0), Bus::new(1, 100.0)];
        let lines = vec![Line::new(0, 0, 1, 10.0, 5.0, 0.01)];
        let system = System::new(buses, lines, vec![], vec![]).unwrap();
        assert_eq!(system.buses[0].source_line_ids, vec![0]);
        assert_eq!(system.buses[1].target_line_ids, vec![0]);
    }

    #[test]
    fn test_reject_cyclic_cascade() {
        let buses = vec![Bus::new(0, 100.0)];
        let hydros = vec![
            Hydro::new(0, Some(1), 0, 1.0, 0.0, 10.0, 0.0, 5.0, 0.01),
            Hydro::new(1, Some(0), 0, 1.0, 0.0, 10.0, 0.0, 5.0, 0.01),
        ];
        let result = System::new(buses, vec![], vec![], hydros);
        assert!(matches!(result, Err(SddpError::Validation(_))));
    }

    #[test]
    fn test_reject_missing_bus() {
        let buses = vec![Bus::new(0, 100.0)];
        let thermals = vec![Thermal::new(0, 3, 5.0, 0.0, 10.0)];
        let result = System::new(buses, vec![], thermals, vec![]);
        assert!(matches!(result, Err(SddpError::Validation(_))));
    }

    #[test]
    fn test_reject_ids_out_of_position() {
        let result =
            System::new(vec![Bus::new(1, 50.0)], vec![], vec![], vec![]);
        assert!(matches!(result, Err(SddpError::Validation(_))));

        let buses = vec![Bus::new(0, 100.0)];
        let hydros = vec![
            Hydro::new(1, None, 0, 1.0, 0.0, 10.0, 0.0, 5.0, 0.01),
            Hydro::new(0, Some(1), 0, 1.0, 0.0, 10.0, 0.0, 5.0, 0.01),
        ];
        let result = System::new(buses, vec![], vec![], hydros);
        assert!(matches!(result, Err(SddpError::Validation(_))));
    }

    #[test]
    fn test_reject_inverted_bounds() {
        let buses = vec![Bus::new(0, 100.0)];
        let thermals = vec![Thermal::new(0, 0, 5.0, 20.0, 10.0)];
        let result = System::new(buses, vec![], thermals, vec![]);
        assert!(matches!(result, Err(SddpError::Validation(_))));
    }

    #[test]
    fn test_with_thermal_costs() {
        let system = System::default();
        let expensive = system.with_thermal_costs(&[50.0, 100.0]).unwrap();
        assert_eq!(expensive.thermals[0].cost, 50.0);
        assert_eq!(expensive.thermals[1].cost, 100.0);
        assert!(system.with_thermal_costs(&[1.0]).is_err());
    }
}
