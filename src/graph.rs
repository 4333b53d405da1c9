use thiserror::Error;

#[derive(Debug)]
pub struct Node<T> {
    pub id: usize,
    pub data: T,
}

impl<T> Node<T> {
    pub fn new(id: usize, data: T) -> Self {
        Self { id, data }
    }
}

/// The weight of an edge: the probability of moving from the source to
/// the target node, and the discount applied to the target's costs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transition {
    pub probability: f64,
    pub discount_factor: f64,
}

impl Transition {
    pub fn new(probability: f64, discount_factor: f64) -> Self {
        Self {
            probability,
            discount_factor,
        }
    }

    pub fn certain() -> Self {
        Self::new(1.0, 1.0)
    }
}

#[derive(Debug)]
pub struct Edge {
    pub target_id: usize,
    pub transition: Transition,
}

#[derive(Debug, PartialEq, Error)]
pub enum GraphBuildingError {
    #[error("node {0} not found")]
    NodeNotFound(usize),
    #[error("edge {0} -> {1} already exists")]
    EdgeAlreadyExists(usize, usize),
    #[error(
        "edge {source_id} -> {target_id} has invalid probability {probability}"
    )]
    InvalidProbability {
        source_id: usize,
        target_id: usize,
        probability: f64,
    },
    #[error("outgoing probabilities of node {source_id} sum to {sum}")]
    ProbabilitySumExceeded { source_id: usize, sum: f64 },
}

const PROBABILITY_TOLERANCE: f64 = 1e-9;

/// A simple directed graph structure for using in the SDDP algorithm, to
/// make the temporal and Markovian decomposition of the problem. Edges
/// carry the transition probabilities between nodes.
#[derive(Debug)]
pub struct DirectedGraph<T> {
    nodes: Vec<Node<T>>,
    // adjacency_list[i] contains the edges leaving node 'i'
    adjacency_list: Vec<Vec<Edge>>,
}

impl<T> Default for DirectedGraph<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> DirectedGraph<T> {
    pub fn new() -> Self {
        DirectedGraph {
            nodes: vec![],
            adjacency_list: vec![],
        }
    }

    /// Adds a new node to the node collection. Since the graph is only
    /// built at the beginning of the algorithm, the `push` call is not
    /// expensive for the total time
    pub fn add_node(&mut self, data: T) -> usize {
        let id = self.node_count();
        self.nodes.push(Node::new(id, data));
        self.adjacency_list.push(vec![]);
        id
    }

    /// Adds a new edge to the adjacency maps, validating that the
    /// outgoing probabilities of the source still sum at most to one.
    pub fn add_edge(
        &mut self,
        source_id: usize,
        target_id: usize,
        transition: Transition,
    ) -> Result<(), GraphBuildingError> {
        if source_id >= self.nodes.len() {
            return Err(GraphBuildingError::NodeNotFound(source_id));
        }
        if target_id >= self.nodes.len() {
            return Err(GraphBuildingError::NodeNotFound(target_id));
        }
        if !(0.0..=1.0).contains(&transition.probability) {
            return Err(GraphBuildingError::InvalidProbability {
                source_id,
                target_id,
                probability: transition.probability,
            });
        }
        let edges = &self.adjacency_list[source_id];
        if edges.iter().any(|e| e.target_id == target_id) {
            return Err(GraphBuildingError::EdgeAlreadyExists(
                source_id, target_id,
            ));
        }
        let sum = self.outgoing_probability(source_id) + transition.probability;
        if sum > 1.0 + PROBABILITY_TOLERANCE {
            return Err(GraphBuildingError::ProbabilitySumExceeded {
                source_id,
                sum,
            });
        }

        self.adjacency_list[source_id].push(Edge {
            target_id,
            transition,
        });
        Ok(())
    }

    pub fn get_node(&self, id: usize) -> Option<&Node<T>> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node<T>> {
        self.nodes.iter()
    }

    pub fn get_transitions(&self, id: usize) -> Option<&[Edge]> {
        self.adjacency_list.get(id).map(|edges| edges.as_slice())
    }

    pub fn get_children(&self, id: usize) -> Option<Vec<usize>> {
        self.adjacency_list
            .get(id)
            .map(|edges| edges.iter().map(|e| e.target_id).collect())
    }

    /// Sum of the probabilities of the edges leaving a node. The
    /// complement is the probability of the trajectory ending there.
    pub fn outgoing_probability(&self, id: usize) -> f64 {
        self.adjacency_list
            .get(id)
            .map(|edges| edges.iter().map(|e| e.transition.probability).sum())
            .unwrap_or(0.0)
    }

    /// Breadth-first ordering of the nodes reachable from `root_id`
    pub fn get_bfs(&self, root_id: usize) -> Vec<usize> {
        let node_count = self.node_count();
        if root_id >= node_count {
            return vec![];
        }
        let mut visited = vec![false; node_count];
        let mut queue = std::collections::VecDeque::from([root_id]);
        let mut bfs = Vec::<usize>::with_capacity(node_count);
        visited[root_id] = true;
        while let Some(node) = queue.pop_front() {
            bfs.push(node);
            for edge in self.adjacency_list[node].iter() {
                if !visited[edge.target_id] {
                    visited[edge.target_id] = true;
                    queue.push_back(edge.target_id);
                }
            }
        }
        bfs
    }

    /// Whether any directed cycle exists, which makes the policy graph
    /// an infinite horizon one.
    pub fn has_cycle(&self) -> bool {
        // 0: unvisited, 1: on the current path, 2: done
        let mut marks = vec![0u8; self.node_count()];
        for start in 0..self.node_count() {
            if marks[start] != 0 {
                continue;
            }
            let mut stack = vec![(start, 0usize)];
            marks[start] = 1;
            while let Some((node, next_edge)) = stack.pop() {
                let edges = &self.adjacency_list[node];
                if next_edge < edges.len() {
                    stack.push((node, next_edge + 1));
                    let target = edges[next_edge].target_id;
                    match marks[target] {
                        1 => return true,
                        0 => {
                            marks[target] = 1;
                            stack.push((target, 0));
                        }
                        _ => {}
                    }
                } else {
                    marks[node] = 2;
                }
            }
        }
        false
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_leaf(&self, id: usize) -> bool {
        self.adjacency_list
            .get(id)
            .is_some_and(|children| children.is_empty())
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    fn chain(len: usize) -> DirectedGraph<f64> {
        let mut graph = DirectedGraph::<f64>::new();
        for i in 0..len {
            graph.add_node(i as f64);
        }
        for i in 1..len {
            graph.add_edge(i - 1, i, Transition::certain()).unwrap();
        }
        graph
    }

    #[test]
    fn test_create_directed_graph() {
        let graph = DirectedGraph::<f64>::new();
        assert_eq!(graph.node_count(), 0);
    }

    #[test]
    fn test_add_node_to_directed_graph() {
        let mut graph = DirectedGraph::<f64>::new();
        assert_eq!(graph.add_node(10.0), 0);
        assert_eq!(graph.add_node(20.0), 1);
        assert_eq!(graph.node_count(), 2);
    }

    #[test]
    fn test_add_edge_to_directed_graph() {
        let graph = chain(2);
        assert_eq!(graph.get_children(0), Some(vec![1]));
        assert!(graph.is_leaf(1));
    }

    #[test]
    fn test_add_edge_to_missing_node() {
        let mut graph = chain(2);
        assert_eq!(
            graph.add_edge(0, 5, Transition::certain()),
            Err(GraphBuildingError::NodeNotFound(5))
        );
    }

    #[test]
    fn test_add_repeated_edge() {
        let mut graph = chain(2);
        assert_eq!(
            graph.add_edge(0, 1, Transition::new(0.0, 1.0)),
            Err(GraphBuildingError::EdgeAlreadyExists(0, 1))
        );
    }

    #[test]
    fn test_reject_probability_sum_above_one() {
        let mut graph = DirectedGraph::<f64>::new();
        for i in 0..3 {
            graph.add_node(i as f64);
        }
        graph.add_edge(0, 1, Transition::new(0.7, 1.0)).unwrap();
        let result = graph.add_edge(0, 2, Transition::new(0.4, 1.0));
        assert!(matches!(
            result,
            Err(GraphBuildingError::ProbabilitySumExceeded { source_id: 0, .. })
        ));
    }

    #[test]
    fn test_reject_invalid_probability() {
        let mut graph = chain(2);
        graph.add_node(3.0);
        let result = graph.add_edge(1, 2, Transition::new(-0.1, 1.0));
        assert!(matches!(
            result,
            Err(GraphBuildingError::InvalidProbability { .. })
        ));
    }

    #[test]
    fn test_outgoing_probability() {
        let mut graph = DirectedGraph::<f64>::new();
        graph.add_node(0.0);
        graph.add_node(1.0);
        graph.add_edge(0, 1, Transition::new(0.5, 1.0)).unwrap();
        graph.add_edge(1, 0, Transition::new(0.9, 0.95)).unwrap();
        assert_eq!(graph.outgoing_probability(0), 0.5);
        assert_eq!(graph.outgoing_probability(1), 0.9);
    }

    #[test]
    fn test_bfs() {
        let graph = chain(4);
        assert_eq!(graph.get_bfs(0), vec![0, 1, 2, 3]);
        assert_eq!(graph.get_bfs(2), vec![2, 3]);
        assert!(graph.get_bfs(7).is_empty());
    }

    #[test]
    fn test_has_cycle() {
        let mut graph = chain(3);
        assert!(!graph.has_cycle());
        graph.add_edge(2, 0, Transition::new(0.9, 0.9)).unwrap();
        assert!(graph.has_cycle());
    }
}
