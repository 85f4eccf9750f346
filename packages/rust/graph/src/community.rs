//! Seeded Louvain community detection.
//!
//! Each level runs local-moving passes (node order shuffled by a seeded
//! `StdRng`, candidate communities visited in ascending id order) until a
//! pass improves modularity by less than [`MIN_GAIN`], then aggregates
//! communities into super-nodes. Levels repeat until one no longer improves
//! modularity. The same graph and seed always give the same partition.

use std::cell::OnceCell;
use std::collections::BTreeMap;
use std::path::Path;

use indexmap::IndexMap;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use coursegraph_artifacts::{WriteOutcome, write_json_if_absent};
use coursegraph_shared::{CourseGraphError, Result};

use crate::model::Graph;

/// Modularity resolution used when none is configured.
pub const DEFAULT_RESOLUTION: f64 = 1.0;

/// Passes and levels stop once they improve modularity by less than this.
const MIN_GAIN: f64 = 1e-7;

/// Node id to community id, in graph node order. Ids run `0..C`.
pub type Partition = IndexMap<String, u32>;

/// One row of the community table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommunityRow {
    #[serde(deserialize_with = "coursegraph_shared::code_from_json")]
    pub code: String,
    pub label: String,
    pub community_id: u32,
}

/// Community partition over a graph, computed once on first access.
#[derive(Debug)]
pub struct CommunityDetector<'a> {
    graph: &'a Graph,
    seed: u64,
    resolution: f64,
    partition: OnceCell<Partition>,
}

impl<'a> CommunityDetector<'a> {
    pub fn new(graph: &'a Graph, seed: u64) -> Self {
        Self {
            graph,
            seed,
            resolution: DEFAULT_RESOLUTION,
            partition: OnceCell::new(),
        }
    }

    pub fn with_resolution(mut self, resolution: f64) -> Self {
        self.resolution = resolution;
        self
    }

    /// The partition, detected on the first call and cached afterwards.
    pub fn partition(&self) -> Result<&Partition> {
        if let Some(partition) = self.partition.get() {
            return Ok(partition);
        }
        let partition = detect_with_resolution(self.graph, self.seed, self.resolution)?;
        Ok(self.partition.get_or_init(|| partition))
    }

    /// `{code, label, community_id}` rows in graph node order.
    pub fn to_rows(&self) -> Result<Vec<CommunityRow>> {
        let partition = self.partition()?;
        Ok(self
            .graph
            .nodes()
            .filter_map(|(id, attrs)| {
                partition.get(id).map(|&community_id| CommunityRow {
                    code: id.to_string(),
                    label: attrs.label.clone(),
                    community_id,
                })
            })
            .collect())
    }

    /// Write the community table unless `path` exists. An existing file is
    /// authoritative: detection does not run.
    pub fn to_file(&self, path: &Path) -> Result<WriteOutcome> {
        if path.exists() {
            debug!(path = %path.display(), "community table exists, skipping detection");
            return Ok(WriteOutcome::AlreadyPresent);
        }
        write_json_if_absent(path, &self.to_rows()?)
    }
}

/// Detect communities with the default resolution.
pub fn detect(graph: &Graph, seed: u64) -> Result<Partition> {
    detect_with_resolution(graph, seed, DEFAULT_RESOLUTION)
}

/// Detect communities. Zero nodes is [`CourseGraphError::EmptyGraph`];
/// zero edges gives every node its own community.
#[instrument(skip_all, fields(nodes = graph.node_count(), edges = graph.edge_count(), seed = seed))]
pub fn detect_with_resolution(graph: &Graph, seed: u64, resolution: f64) -> Result<Partition> {
    if graph.is_empty() {
        return Err(CourseGraphError::EmptyGraph);
    }
    if !(resolution > 0.0) {
        return Err(CourseGraphError::validation(format!(
            "resolution must be positive, got {resolution}"
        )));
    }

    let n = graph.node_count();
    let mut membership: Vec<usize> = (0..n).collect();

    if graph.edge_count() > 0 {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut level = LevelGraph::from_graph(graph);
        let mut current = level.modularity(&(0..level.n).collect::<Vec<_>>(), resolution);
        let mut levels = 0usize;

        loop {
            let local = level.local_moving(&mut rng, resolution);
            let (communities, count) = renumber(&local);
            let improved = level.modularity(&communities, resolution);
            if improved - current <= MIN_GAIN {
                break;
            }
            for m in &mut membership {
                *m = communities[*m];
            }
            current = improved;
            levels += 1;
            if count == level.n {
                break;
            }
            level = level.aggregate(&communities, count);
        }
        debug!(levels, modularity = current, "louvain converged");
    }

    let (ids, count) = renumber(&membership);
    info!(communities = count, "communities detected");

    Ok(graph
        .node_ids()
        .zip(ids)
        .map(|(id, c)| (id.to_string(), c as u32))
        .collect())
}

/// Modularity of `partition` over the unweighted `graph` (resolution 1).
///
/// Nodes missing from the partition count as singleton communities.
pub fn modularity(graph: &Graph, partition: &Partition) -> f64 {
    let n = graph.node_count();
    let mut labels: Vec<usize> = Vec::with_capacity(n);
    let mut next_free = partition.values().map(|&c| c as usize + 1).max().unwrap_or(0);
    for id in graph.node_ids() {
        match partition.get(id) {
            Some(&c) => labels.push(c as usize),
            None => {
                labels.push(next_free);
                next_free += 1;
            }
        }
    }
    let (labels, _) = renumber(&labels);
    LevelGraph::from_graph(graph).modularity(&labels, DEFAULT_RESOLUTION)
}

/// Relabel communities `0..C` in order of first appearance.
fn renumber(labels: &[usize]) -> (Vec<usize>, usize) {
    let mut map: BTreeMap<usize, usize> = BTreeMap::new();
    let mut out = Vec::with_capacity(labels.len());
    for &label in labels {
        let next = map.len();
        out.push(*map.entry(label).or_insert(next));
    }
    (out, map.len())
}

/// Weighted graph for one Louvain level. Self-loops carry the internal
/// weight of aggregated communities.
struct LevelGraph {
    n: usize,
    adjacency: Vec<Vec<(usize, f64)>>,
    self_loops: Vec<f64>,
    degrees: Vec<f64>,
    total_weight: f64,
}

impl LevelGraph {
    fn from_graph(graph: &Graph) -> Self {
        let mut edges = BTreeMap::new();
        for (i, neighbors) in graph.adjacency().into_iter().enumerate() {
            for j in neighbors {
                if i < j {
                    *edges.entry((i, j)).or_insert(0.0) += 1.0;
                }
            }
        }
        Self::from_edges(graph.node_count(), edges)
    }

    /// Build from `(min, max) -> weight`; `(i, i)` is a self-loop.
    fn from_edges(n: usize, edges: BTreeMap<(usize, usize), f64>) -> Self {
        let mut adjacency = vec![Vec::new(); n];
        let mut self_loops = vec![0.0; n];
        let mut degrees = vec![0.0; n];
        let mut total_weight = 0.0;

        for ((i, j), w) in edges {
            total_weight += w;
            if i == j {
                self_loops[i] += w;
                degrees[i] += 2.0 * w;
            } else {
                adjacency[i].push((j, w));
                adjacency[j].push((i, w));
                degrees[i] += w;
                degrees[j] += w;
            }
        }

        Self {
            n,
            adjacency,
            self_loops,
            degrees,
            total_weight,
        }
    }

    fn modularity(&self, communities: &[usize], resolution: f64) -> f64 {
        let m = self.total_weight;
        if m == 0.0 {
            return 0.0;
        }
        let count = communities.iter().copied().max().map_or(0, |c| c + 1);
        let mut internal = vec![0.0; count];
        let mut totals = vec![0.0; count];

        for u in 0..self.n {
            let cu = communities[u];
            totals[cu] += self.degrees[u];
            internal[cu] += self.self_loops[u];
            for &(v, w) in &self.adjacency[u] {
                if u < v && communities[v] == cu {
                    internal[cu] += w;
                }
            }
        }

        internal
            .iter()
            .zip(&totals)
            .map(|(l, d)| l / m - resolution * (d / (2.0 * m)).powi(2))
            .sum()
    }

    /// Greedy local moving. Returns each node's community (not renumbered).
    fn local_moving(&self, rng: &mut StdRng, resolution: f64) -> Vec<usize> {
        let m = self.total_weight;
        let mut node2com: Vec<usize> = (0..self.n).collect();
        let mut totals = self.degrees.clone();
        let mut order: Vec<usize> = (0..self.n).collect();
        let mut current = self.modularity(&node2com, resolution);

        loop {
            order.shuffle(rng);
            let mut moves = 0usize;

            for &u in &order {
                let own = node2com[u];
                let degree = self.degrees[u];

                let mut weights: BTreeMap<usize, f64> = BTreeMap::new();
                for &(v, w) in &self.adjacency[u] {
                    *weights.entry(node2com[v]).or_insert(0.0) += w;
                }

                totals[own] -= degree;
                let remove_cost = -weights.get(&own).copied().unwrap_or(0.0) / m
                    + resolution * totals[own] * degree / (2.0 * m * m);

                let mut best = own;
                let mut best_gain = 0.0;
                for (&community, &w) in &weights {
                    let gain =
                        remove_cost + w / m - resolution * totals[community] * degree / (2.0 * m * m);
                    if gain > best_gain {
                        best_gain = gain;
                        best = community;
                    }
                }

                totals[best] += degree;
                if best != own {
                    node2com[u] = best;
                    moves += 1;
                }
            }

            let after = self.modularity(&renumber(&node2com).0, resolution);
            let gain = after - current;
            current = after;
            if moves == 0 || gain < MIN_GAIN {
                break;
            }
        }

        node2com
    }

    /// Collapse each community into one node. `communities` is renumbered
    /// `0..count`.
    fn aggregate(&self, communities: &[usize], count: usize) -> Self {
        let mut edges: BTreeMap<(usize, usize), f64> = BTreeMap::new();
        for u in 0..self.n {
            let cu = communities[u];
            if self.self_loops[u] > 0.0 {
                *edges.entry((cu, cu)).or_insert(0.0) += self.self_loops[u];
            }
            for &(v, w) in &self.adjacency[u] {
                if u < v {
                    let cv = communities[v];
                    let key = (cu.min(cv), cu.max(cv));
                    *edges.entry(key).or_insert(0.0) += w;
                }
            }
        }
        Self::from_edges(count, edges)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NodeAttrs;

    fn clique(graph: &mut Graph, prefix: &str, size: usize) {
        let ids: Vec<String> = (0..size).map(|i| format!("{prefix}{i}")).collect();
        for id in &ids {
            graph.upsert_node(id.as_str(), NodeAttrs::labeled(id.as_str()));
        }
        for i in 0..size {
            for j in i + 1..size {
                graph.add_edge(&ids[i], &ids[j]);
            }
        }
    }

    fn two_cliques() -> Graph {
        let mut g = Graph::new();
        clique(&mut g, "a", 5);
        clique(&mut g, "b", 5);
        g.add_edge("a0", "b0");
        g
    }

    #[test]
    fn two_cliques_split() {
        let g = two_cliques();
        let partition = detect(&g, 42).unwrap();

        assert_eq!(partition.len(), 10);
        let a = partition["a0"];
        let b = partition["b0"];
        assert_ne!(a, b);
        for i in 1..5 {
            assert_eq!(partition[format!("a{i}").as_str()], a);
            assert_eq!(partition[format!("b{i}").as_str()], b);
        }
        // renumbered in node order
        assert_eq!(a, 0);
        assert_eq!(b, 1);
        assert!(modularity(&g, &partition) > 0.4);
    }

    #[test]
    fn deterministic_for_a_seed() {
        let mut g = two_cliques();
        clique(&mut g, "c", 4);
        g.add_edge("c0", "b3");
        g.add_edge("c1", "a2");

        let first = detect(&g, 42).unwrap();
        for _ in 0..5 {
            assert_eq!(detect(&g, 42).unwrap(), first);
        }
    }

    #[test]
    fn no_edges_gives_singletons() {
        let mut g = Graph::new();
        for id in ["x", "y", "z"] {
            g.upsert_node(id, NodeAttrs::labeled(id));
        }
        let partition = detect(&g, 42).unwrap();
        assert_eq!(partition.values().copied().collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(modularity(&g, &partition), 0.0);
    }

    #[test]
    fn empty_graph_is_an_error() {
        assert!(matches!(
            detect(&Graph::new(), 42),
            Err(CourseGraphError::EmptyGraph)
        ));
    }

    #[test]
    fn single_community_modularity_is_zero() {
        let g = two_cliques();
        let partition: Partition = g.node_ids().map(|id| (id.to_string(), 0)).collect();
        assert!(modularity(&g, &partition).abs() < 1e-12);
    }

    #[test]
    fn detector_caches_and_writes_rows() {
        let g = two_cliques();
        let detector = CommunityDetector::new(&g, 42);
        let first = detector.partition().unwrap() as *const Partition;
        let second = detector.partition().unwrap() as *const Partition;
        assert_eq!(first, second);

        let rows = detector.to_rows().unwrap();
        assert_eq!(rows.len(), 10);
        assert_eq!(rows[0].code, "a0");
        assert_eq!(rows[0].label, "a0");

        let dir = std::env::temp_dir().join(format!("cg-community-test-{}", uuid::Uuid::now_v7()));
        let path = dir.join("communities.json");
        assert_eq!(detector.to_file(&path).unwrap(), WriteOutcome::Written);
        let stored: Vec<CommunityRow> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(stored, rows);

        // existing file wins, even for a different graph
        let other = Graph::new();
        let stale = CommunityDetector::new(&other, 1);
        assert_eq!(stale.to_file(&path).unwrap(), WriteOutcome::AlreadyPresent);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn community_rows_accept_numeric_codes() {
        let rows: Vec<CommunityRow> = serde_json::from_str(
            r#"[{"code": 110, "label": "Intro", "community_id": 0},
                {"code": "MAC0121", "label": "Algorithms", "community_id": 1}]"#,
        )
        .unwrap();
        assert_eq!(rows[0].code, "110");
        assert_eq!(rows[1].code, "MAC0121");
    }
}
