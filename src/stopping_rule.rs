use crate::utils;
use std::time::Duration;

/// Results of a single training iteration
#[derive(Debug, Clone, PartialEq)]
pub struct IterationRecord {
    pub iteration: usize,
    pub lower_bound: f64,
    pub simulation_value: f64,
    pub time: Duration,
    pub cumulative_time: Duration,
    pub total_cuts: usize,
}

#[derive(Debug, Default, Clone)]
pub struct TrainingLog {
    pub records: Vec<IterationRecord>,
    pub stopping_reason: Option<String>,
}

impl TrainingLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: IterationRecord) {
        self.records.push(record);
    }

    pub fn last(&self) -> Option<&IterationRecord> {
        self.records.last()
    }

    pub fn iteration_count(&self) -> usize {
        self.records.len()
    }
}

/// A condition evaluated after every iteration that may end the training
pub trait StoppingRule: Send + Sync + std::fmt::Debug {
    fn name(&self) -> String;
    fn should_stop(&self, log: &TrainingLog) -> bool;
}

#[derive(Debug)]
pub struct IterationLimit {
    pub num_iterations: usize,
}

impl IterationLimit {
    pub fn new(num_iterations: usize) -> Self {
        Self { num_iterations }
    }
}

impl StoppingRule for IterationLimit {
    fn name(&self) -> String {
        format!("iteration limit ({})", self.num_iterations)
    }

    fn should_stop(&self, log: &TrainingLog) -> bool {
        log.iteration_count() >= self.num_iterations
    }
}

#[derive(Debug)]
pub struct TimeLimit {
    pub limit: Duration,
}

impl TimeLimit {
    pub fn new(seconds: f64) -> Self {
        Self {
            limit: Duration::from_secs_f64(seconds.max(0.0)),
        }
    }
}

impl StoppingRule for TimeLimit {
    fn name(&self) -> String {
        format!("time limit ({:.2} s)", self.limit.as_secs_f64())
    }

    fn should_stop(&self, log: &TrainingLog) -> bool {
        log.last()
            .is_some_and(|r| r.cumulative_time >= self.limit)
    }
}

/// Stops when the lower bound moved less than `tolerance` in each of the
/// last `iterations` iterations
#[derive(Debug)]
pub struct BoundStalling {
    pub iterations: usize,
    pub tolerance: f64,
}

impl BoundStalling {
    pub fn new(iterations: usize, tolerance: f64) -> Self {
        Self {
            iterations,
            tolerance,
        }
    }
}

impl StoppingRule for BoundStalling {
    fn name(&self) -> String {
        format!(
            "bound stalling ({} iterations, tolerance {})",
            self.iterations, self.tolerance
        )
    }

    fn should_stop(&self, log: &TrainingLog) -> bool {
        let n = log.records.len();
        if self.iterations == 0 || n <= self.iterations {
            return false;
        }
        log.records[n - self.iterations - 1..]
            .windows(2)
            .all(|w| {
                (w[1].lower_bound - w[0].lower_bound).abs() < self.tolerance
            })
    }
}

/// Stops when the lower bound lies inside the confidence interval of the
/// forward pass costs of the last `num_replications` iterations
#[derive(Debug)]
pub struct Statistical {
    pub num_replications: usize,
    pub z_score: f64,
}

impl Statistical {
    pub fn new(num_replications: usize, z_score: f64) -> Self {
        Self {
            num_replications,
            z_score,
        }
    }
}

impl StoppingRule for Statistical {
    fn name(&self) -> String {
        format!(
            "statistical ({} replications, z = {})",
            self.num_replications, self.z_score
        )
    }

    fn should_stop(&self, log: &TrainingLog) -> bool {
        let n = log.records.len();
        if self.num_replications < 2 || n < self.num_replications {
            return false;
        }
        let costs: Vec<f64> = log.records[n - self.num_replications..]
            .iter()
            .map(|r| r.simulation_value)
            .collect();
        let (mean, std) = utils::mean_and_std(&costs);
        let half_width = self.z_score * std / (costs.len() as f64).sqrt();
        let lower_bound = log.records[n - 1].lower_bound;
        (mean - half_width..=mean + half_width).contains(&lower_bound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log_with_bounds(bounds: &[f64], simulations: &[f64]) -> TrainingLog {
        let mut log = TrainingLog::new();
        let pairs = bounds.iter().zip(simulations.iter());
        for (i, (lb, sim)) in pairs.enumerate() {
            log.push(IterationRecord {
                iteration: i + 1,
                lower_bound: *lb,
                simulation_value: *sim,
                time: Duration::from_secs(1),
                cumulative_time: Duration::from_secs(i as u64 + 1),
                total_cuts: i + 1,
            });
        }
        log
    }

    #[test]
    fn test_iteration_limit() {
        let rule = IterationLimit::new(3);
        assert!(!rule.should_stop(&log_with_bounds(&[1.0, 2.0], &[0.0, 0.0])));
        assert!(rule.should_stop(&log_with_bounds(
            &[1.0, 2.0, 3.0],
            &[0.0, 0.0, 0.0]
        )));
    }

    #[test]
    fn test_time_limit() {
        let rule = TimeLimit::new(2.5);
        assert!(!rule.should_stop(&TrainingLog::new()));
        assert!(!rule.should_stop(&log_with_bounds(&[1.0, 2.0], &[0.0, 0.0])));
        assert!(rule.should_stop(&log_with_bounds(
            &[1.0, 2.0, 3.0],
            &[0.0, 0.0, 0.0]
        )));
    }

    #[test]
    fn test_bound_stalling() {
        let rule = BoundStalling::new(2, 1e-3);
        let sims = [0.0; 4];
        assert!(!rule.should_stop(&log_with_bounds(&[1.0, 5.0, 5.0], &sims[..3])));
        assert!(rule.should_stop(&log_with_bounds(&[1.0, 5.0, 5.0, 5.0], &sims)));
        assert!(!rule.should_stop(&log_with_bounds(&[5.0, 5.0, 5.0, 6.0], &sims)));
    }

    #[test]
    fn test_statistical() {
        let rule = Statistical::new(4, 1.96);
        let sims = [90.0, 110.0, 95.0, 105.0];
        // mean 100, std 9.13, half width 8.95
        assert!(rule.should_stop(&log_with_bounds(&[50.0, 60.0, 80.0, 95.0], &sims)));
        assert!(!rule.should_stop(&log_with_bounds(&[50.0, 60.0, 80.0, 85.0], &sims)));
        assert!(!rule.should_stop(&log_with_bounds(&[95.0, 95.0], &sims[..2])));
    }

    #[test]
    fn test_rule_names() {
        assert_eq!(IterationLimit::new(10).name(), "iteration limit (10)");
        assert!(Statistical::new(4, 1.96).name().starts_with("statistical"));
    }
}
