//! Discrete uncertainty attached to each node of the policy graph: the
//! inflows of every hydro and the loads of every bus, realized together
//! with a given probability.

use crate::error::{Result, SddpError};
use rand::prelude::*;
use rand_distr::{LogNormal, Normal};
use rand_xoshiro::Xoshiro256Plus;

const PROBABILITY_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq)]
pub struct NoiseTerm {
    pub probability: f64,
    pub inflow: Vec<f64>, // indexed by hydro_id
    pub load: Vec<f64>,   // indexed by bus_id
}

impl NoiseTerm {
    pub fn new(probability: f64, inflow: Vec<f64>, load: Vec<f64>) -> Self {
        Self {
            probability,
            inflow,
            load,
        }
    }
}

/// The finite set of uncertainty realizations of a node
#[derive(Debug, Clone, PartialEq)]
pub struct NoiseSupport {
    terms: Vec<NoiseTerm>,
}

impl NoiseSupport {
    pub fn new(terms: Vec<NoiseTerm>) -> Result<Self> {
        let first = terms.first().ok_or_else(|| {
            SddpError::Distribution("empty noise support".to_string())
        })?;
        let (num_hydros, num_buses) = (first.inflow.len(), first.load.len());
        let mut total = 0.0;
        for term in terms.iter() {
            if term.probability < 0.0 {
                return Err(SddpError::Distribution(format!(
                    "negative probability {}",
                    term.probability
                )));
            }
            if term.inflow.len() != num_hydros || term.load.len() != num_buses
            {
                return Err(SddpError::Distribution(
                    "noise terms with different dimensions".to_string(),
                ));
            }
            total += term.probability;
        }
        if (total - 1.0).abs() > PROBABILITY_TOLERANCE {
            return Err(SddpError::Distribution(format!(
                "noise probabilities sum to {total}"
            )));
        }
        Ok(Self { terms })
    }

    /// A support with a single, certain, realization
    pub fn deterministic(inflow: Vec<f64>, load: Vec<f64>) -> Self {
        Self {
            terms: vec![NoiseTerm::new(1.0, inflow, load)],
        }
    }

    pub fn terms(&self) -> &[NoiseTerm] {
        &self.terms
    }

    pub fn get(&self, index: usize) -> Option<&NoiseTerm> {
        self.terms.get(index)
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn num_hydros(&self) -> usize {
        self.terms[0].inflow.len()
    }

    pub fn num_buses(&self) -> usize {
        self.terms[0].load.len()
    }

    /// Draws the index of a term according to the term probabilities
    pub fn sample_index<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        let u: f64 = rng.random();
        let mut cumulative = 0.0;
        for (index, term) in self.terms.iter().enumerate() {
            cumulative += term.probability;
            if u < cumulative {
                return index;
            }
        }
        self.terms.len() - 1
    }
}

/// Distributions used for generating the sample average approximation of
/// a single node
pub struct NodeScenarioGenerator {
    pub inflow_distributions: Vec<LogNormal<f64>>, // indexed by hydro_id
    pub load_distributions: Vec<Normal<f64>>,      // indexed by bus_id
    pub num_branchings: usize,
}

impl NodeScenarioGenerator {
    pub fn new(
        inflow_distributions: Vec<LogNormal<f64>>,
        load_distributions: Vec<Normal<f64>>,
        num_branchings: usize,
    ) -> Result<Self> {
        if num_branchings == 0 {
            return Err(SddpError::Distribution(
                "at least one branching is required".to_string(),
            ));
        }
        Ok(Self {
            inflow_distributions,
            load_distributions,
            num_branchings,
        })
    }

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<NoiseSupport> {
        let p = 1.0 / self.num_branchings as f64;
        // draws all branchings of a hydro before moving to the next one
        let inflows: Vec<Vec<f64>> = self
            .inflow_distributions
            .iter()
            .map(|d| {
                d.sample_iter(&mut *rng).take(self.num_branchings).collect()
            })
            .collect();
        let loads: Vec<Vec<f64>> = self
            .load_distributions
            .iter()
            .map(|d| {
                d.sample_iter(&mut *rng)
                    .take(self.num_branchings)
                    .map(|l: f64| l.max(0.0))
                    .collect()
            })
            .collect();
        let terms = (0..self.num_branchings)
            .map(|b| {
                NoiseTerm::new(
                    p,
                    inflows.iter().map(|h| h[b]).collect(),
                    loads.iter().map(|l| l[b]).collect(),
                )
            })
            .collect();
        NoiseSupport::new(terms)
    }
}

/// Holds one generator per node of the policy graph, in node order
#[derive(Default)]
pub struct ScenarioGenerator {
    pub node_generators: Vec<NodeScenarioGenerator>,
}

impl ScenarioGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node_generator(&mut self, generator: NodeScenarioGenerator) {
        self.node_generators.push(generator);
    }

    /// Builds the sample average approximation of every node, in node
    /// order, with a single seeded stream.
    pub fn generate_saa(&self, seed: u64) -> Result<Vec<NoiseSupport>> {
        let mut rng = Xoshiro256Plus::seed_from_u64(seed);
        self.node_generators
            .iter()
            .map(|g| g.sample(&mut rng))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_term_support() -> NoiseSupport {
        NoiseSupport::new(vec![
            NoiseTerm::new(0.25, vec![0.0], vec![50.0]),
            NoiseTerm::new(0.75, vec![50.0], vec![50.0]),
        ])
        .unwrap()
    }

    #[test]
    fn test_new_noise_support() {
        let support = two_term_support();
        assert_eq!(support.len(), 2);
        assert_eq!(support.num_hydros(), 1);
        assert_eq!(support.num_buses(), 1);
        assert_eq!(support.get(1).unwrap().inflow, vec![50.0]);
    }

    #[test]
    fn test_reject_probabilities_not_summing_to_one() {
        let result = NoiseSupport::new(vec![
            NoiseTerm::new(0.5, vec![0.0], vec![50.0]),
            NoiseTerm::new(0.4, vec![50.0], vec![50.0]),
        ]);
        assert!(matches!(result, Err(SddpError::Distribution(_))));
    }

    #[test]
    fn test_reject_mismatched_dimensions() {
        let result = NoiseSupport::new(vec![
            NoiseTerm::new(0.5, vec![0.0], vec![50.0]),
            NoiseTerm::new(0.5, vec![50.0, 1.0], vec![50.0]),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_reject_empty_support() {
        assert!(NoiseSupport::new(vec![]).is_err());
    }

    #[test]
    fn test_deterministic_support_always_samples_zero() {
        let support = NoiseSupport::deterministic(vec![10.0], vec![20.0]);
        let mut rng = Xoshiro256Plus::seed_from_u64(0);
        for _ in 0..10 {
            assert_eq!(support.sample_index(&mut rng), 0);
        }
    }

    #[test]
    fn test_sample_index_follows_probabilities() {
        let support = two_term_support();
        let mut rng = Xoshiro256Plus::seed_from_u64(42);
        let n = 10_000;
        let hits = (0..n)
            .filter(|_| support.sample_index(&mut rng) == 1)
            .count();
        let frequency = hits as f64 / n as f64;
        assert!((frequency - 0.75).abs() < 0.03);
    }

    #[test]
    fn test_generate_saa_is_reproducible() {
        let mut generator = ScenarioGenerator::new();
        for _ in 0..3 {
            generator.add_node_generator(
                NodeScenarioGenerator::new(
                    vec![LogNormal::new(3.6, 0.6928).unwrap()],
                    vec![Normal::new(75.0, 5.0).unwrap()],
                    4,
                )
                .unwrap(),
            );
        }
        let a = generator.generate_saa(7).unwrap();
        let b = generator.generate_saa(7).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 3);
        assert_eq!(a[0].len(), 4);
        assert!(a[0].terms().iter().all(|t| t.inflow[0] > 0.0));
        assert!((a[0].terms()[0].probability - 0.25).abs() < 1e-12);
        assert_ne!(a[0], a[1]);
    }

    #[test]
    fn test_zero_branchings_is_rejected() {
        let result = NodeScenarioGenerator::new(vec![], vec![], 0);
        assert!(result.is_err());
    }
}
