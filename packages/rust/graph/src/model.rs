//! Undirected attributed graph with deterministic ordering.
//!
//! Nodes and edges keep insertion order so two builds from the same input
//! serialize to identical bytes. On disk a graph is node-link JSON:
//!
//! ```json
//! {"directed": false, "multigraph": false, "graph": {},
//!  "nodes": [{"id": "MAC0110", "label": "Intro"}],
//!  "links": [{"source": "MAC0110", "target": "MAC0121"}]}
//! ```

use std::collections::HashSet;
use std::path::Path;

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use coursegraph_artifacts::{WriteOutcome, read_json, write_json_if_absent};
use coursegraph_shared::Result;

/// Graph attribute value for courses without a community.
pub const NO_COMMUNITY: i64 = -1;

/// Which side of the bipartite graph a node is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Course,
    Instructor,
}

/// Attributes attached to a node. Everything but `label` is optional and
/// omitted from the JSON when absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeAttrs {
    #[serde(default)]
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<NodeKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bipartite: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub community_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_mandatory: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credits: Option<u32>,
}

impl NodeAttrs {
    /// A node carrying only a label.
    pub fn labeled(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Self::default()
        }
    }

    /// Course side of the bipartite graph.
    pub fn course(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            kind: Some(NodeKind::Course),
            bipartite: Some(0),
            ..Self::default()
        }
    }

    /// Instructor side of the bipartite graph, labeled by name.
    pub fn instructor(name: impl Into<String>) -> Self {
        Self {
            label: name.into(),
            kind: Some(NodeKind::Instructor),
            bipartite: Some(1),
            ..Self::default()
        }
    }

    /// Overwrite the attributes `other` provides; keep the rest.
    pub fn merge(&mut self, other: NodeAttrs) {
        if !other.label.is_empty() {
            self.label = other.label;
        }
        if other.kind.is_some() {
            self.kind = other.kind;
        }
        if other.bipartite.is_some() {
            self.bipartite = other.bipartite;
        }
        if other.community_id.is_some() {
            self.community_id = other.community_id;
        }
        if other.is_mandatory.is_some() {
            self.is_mandatory = other.is_mandatory;
        }
        if other.scope.is_some() {
            self.scope = other.scope;
        }
        if other.credits.is_some() {
            self.credits = other.credits;
        }
    }

    pub fn is_course(&self) -> bool {
        self.kind == Some(NodeKind::Course)
    }

    pub fn is_instructor(&self) -> bool {
        self.kind == Some(NodeKind::Instructor)
    }
}

/// Simple undirected graph: no self-loops, no parallel edges, no weights.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Graph {
    nodes: IndexMap<String, NodeAttrs>,
    edges: IndexSet<(String, String)>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn node(&self, id: &str) -> Option<&NodeAttrs> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut NodeAttrs> {
        self.nodes.get_mut(id)
    }

    /// Position of a node in insertion order.
    pub fn node_index(&self, id: &str) -> Option<usize> {
        self.nodes.get_index_of(id)
    }

    /// Nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = (&str, &NodeAttrs)> {
        self.nodes.iter().map(|(id, attrs)| (id.as_str(), attrs))
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    /// Ids of nodes with `kind = course`.
    pub fn course_ids(&self) -> impl Iterator<Item = &str> {
        self.nodes()
            .filter(|(_, attrs)| attrs.is_course())
            .map(|(id, _)| id)
    }

    /// Edges in insertion order, as inserted.
    pub fn edges(&self) -> impl Iterator<Item = (&str, &str)> {
        self.edges.iter().map(|(a, b)| (a.as_str(), b.as_str()))
    }

    /// Insert a node, or merge `attrs` into the existing one.
    ///
    /// Returns `true` when the node was new.
    pub fn upsert_node(&mut self, id: impl Into<String>, attrs: NodeAttrs) -> bool {
        let id = id.into();
        match self.nodes.get_mut(&id) {
            Some(existing) => {
                existing.merge(attrs);
                false
            }
            None => {
                self.nodes.insert(id, attrs);
                true
            }
        }
    }

    pub fn has_edge(&self, a: &str, b: &str) -> bool {
        let forward = (a.to_string(), b.to_string());
        if self.edges.contains(&forward) {
            return true;
        }
        let (a, b) = forward;
        self.edges.contains(&(b, a))
    }

    /// Add an undirected edge. Unknown endpoints are inserted labeled by
    /// their id. Self-loops and duplicates (either orientation) are ignored.
    ///
    /// Returns `true` when a new edge was stored.
    pub fn add_edge(&mut self, a: &str, b: &str) -> bool {
        if a == b || self.has_edge(a, b) {
            return false;
        }
        for id in [a, b] {
            if !self.nodes.contains_key(id) {
                self.nodes.insert(id.to_string(), NodeAttrs::labeled(id));
            }
        }
        self.edges.insert((a.to_string(), b.to_string()))
    }

    /// Number of edges touching `id`.
    pub fn degree(&self, id: &str) -> usize {
        self.edges
            .iter()
            .filter(|(a, b)| a == id || b == id)
            .count()
    }

    /// Neighbors of `id` in edge order.
    pub fn neighbors(&self, id: &str) -> Vec<&str> {
        self.edges
            .iter()
            .filter_map(|(a, b)| {
                if a == id {
                    Some(b.as_str())
                } else if b == id {
                    Some(a.as_str())
                } else {
                    None
                }
            })
            .collect()
    }

    /// Index-based adjacency lists, aligned with node insertion order.
    pub fn adjacency(&self) -> Vec<Vec<usize>> {
        let mut adj = vec![Vec::new(); self.nodes.len()];
        for (a, b) in &self.edges {
            if let (Some(i), Some(j)) = (self.nodes.get_index_of(a), self.nodes.get_index_of(b)) {
                adj[i].push(j);
                adj[j].push(i);
            }
        }
        adj
    }

    /// Remove a node and its edges, preserving the order of the rest.
    pub fn remove_node(&mut self, id: &str) -> Option<NodeAttrs> {
        let removed = self.nodes.shift_remove(id)?;
        self.edges.retain(|(a, b)| a != id && b != id);
        Some(removed)
    }

    /// Keep only nodes for which `keep` holds. Returns the removed ids.
    pub fn retain_nodes<F>(&mut self, mut keep: F) -> Vec<String>
    where
        F: FnMut(&str, &NodeAttrs) -> bool,
    {
        let removed: Vec<String> = self
            .nodes
            .iter()
            .filter(|(id, attrs)| !keep(id, attrs))
            .map(|(id, _)| id.clone())
            .collect();
        if removed.is_empty() {
            return removed;
        }

        let gone: HashSet<&str> = removed.iter().map(String::as_str).collect();
        self.nodes.retain(|id, _| !gone.contains(id.as_str()));
        self.edges
            .retain(|(a, b)| !gone.contains(a.as_str()) && !gone.contains(b.as_str()));
        removed
    }

    /// Rebuild the graph with every node id passed through `normalize`.
    ///
    /// Nodes that collide after normalization are merged (attributes upserted
    /// in node order) and their edges re-pointed; edges that become
    /// self-loops are dropped. Returns the new graph plus the original ids
    /// that were merged into an earlier node.
    pub fn map_ids<F>(&self, normalize: F) -> (Graph, Vec<String>)
    where
        F: Fn(&str) -> String,
    {
        let mut out = Graph::new();
        let mut merged = Vec::new();

        for (id, attrs) in &self.nodes {
            let new_id = normalize(id);
            if !out.upsert_node(new_id, attrs.clone()) {
                merged.push(id.clone());
            }
        }
        for (a, b) in &self.edges {
            out.add_edge(&normalize(a), &normalize(b));
        }

        (out, merged)
    }

    /// Write node-link JSON unless `path` already exists.
    pub fn to_file(&self, path: &Path) -> Result<WriteOutcome> {
        write_json_if_absent(path, self)
    }

    /// Read a node-link JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        read_json(path)
    }
}

// ---------------------------------------------------------------------------
// Node-link serialization
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct NodeLinkRef<'a> {
    directed: bool,
    multigraph: bool,
    graph: serde_json::Map<String, serde_json::Value>,
    nodes: Vec<NodeRef<'a>>,
    links: Vec<LinkRef<'a>>,
}

#[derive(Serialize)]
struct NodeRef<'a> {
    id: &'a str,
    #[serde(flatten)]
    attrs: &'a NodeAttrs,
}

#[derive(Serialize)]
struct LinkRef<'a> {
    source: &'a str,
    target: &'a str,
}

#[derive(Deserialize)]
struct NodeLink {
    #[serde(default)]
    directed: bool,
    nodes: Vec<NodeOwned>,
    #[serde(default, alias = "edges")]
    links: Vec<LinkOwned>,
}

#[derive(Deserialize)]
struct NodeOwned {
    #[serde(deserialize_with = "id_from_json")]
    id: String,
    #[serde(flatten)]
    attrs: NodeAttrs,
}

#[derive(Deserialize)]
struct LinkOwned {
    #[serde(deserialize_with = "id_from_json")]
    source: String,
    #[serde(deserialize_with = "id_from_json")]
    target: String,
}

/// Node ids written by other tools may be numbers; keep them as strings.
fn id_from_json<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "node id must be a string or number, got {other}"
        ))),
    }
}

impl Serialize for Graph {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        NodeLinkRef {
            directed: false,
            multigraph: false,
            graph: serde_json::Map::new(),
            nodes: self
                .nodes
                .iter()
                .map(|(id, attrs)| NodeRef { id, attrs })
                .collect(),
            links: self
                .edges
                .iter()
                .map(|(source, target)| LinkRef { source, target })
                .collect(),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Graph {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = NodeLink::deserialize(deserializer)?;
        if raw.directed {
            return Err(serde::de::Error::custom("directed graphs are not supported"));
        }

        let mut graph = Graph::new();
        for node in raw.nodes {
            graph.upsert_node(node.id, node.attrs);
        }
        for link in raw.links {
            if !graph.contains_node(&link.source) || !graph.contains_node(&link.target) {
                return Err(serde::de::Error::custom(format!(
                    "link {} -- {} references an unknown node",
                    link.source, link.target
                )));
            }
            graph.add_edge(&link.source, &link.target);
        }
        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle() -> Graph {
        let mut g = Graph::new();
        for id in ["a", "b", "c"] {
            g.upsert_node(id, NodeAttrs::labeled(id.to_uppercase()));
        }
        g.add_edge("a", "b");
        g.add_edge("b", "c");
        g.add_edge("c", "a");
        g
    }

    #[test]
    fn upsert_keeps_absent_attributes() {
        let mut g = Graph::new();
        assert!(g.upsert_node("x", NodeAttrs::course("Course X")));
        assert!(!g.upsert_node(
            "x",
            NodeAttrs {
                community_id: Some(3),
                ..NodeAttrs::default()
            }
        ));

        let attrs = g.node("x").unwrap();
        assert_eq!(attrs.label, "Course X");
        assert_eq!(attrs.kind, Some(NodeKind::Course));
        assert_eq!(attrs.community_id, Some(3));
        assert_eq!(g.node_count(), 1);
    }

    #[test]
    fn edges_are_undirected_and_simple() {
        let mut g = triangle();
        assert!(!g.add_edge("b", "a"));
        assert!(!g.add_edge("a", "a"));
        assert_eq!(g.edge_count(), 3);
        assert!(g.has_edge("a", "c"));
        assert_eq!(g.degree("a"), 2);
        assert_eq!(g.neighbors("b"), vec!["a", "c"]);
    }

    #[test]
    fn add_edge_inserts_missing_endpoints() {
        let mut g = Graph::new();
        g.add_edge("p", "q");
        assert_eq!(g.node("q").unwrap().label, "q");
    }

    #[test]
    fn remove_and_retain() {
        let mut g = triangle();
        g.remove_node("a");
        assert_eq!(g.node_count(), 2);
        assert_eq!(g.edge_count(), 1);

        let mut g = triangle();
        let removed = g.retain_nodes(|id, _| id != "b");
        assert_eq!(removed, vec!["b".to_string()]);
        assert_eq!(g.node_ids().collect::<Vec<_>>(), vec!["a", "c"]);
        assert_eq!(g.edges().collect::<Vec<_>>(), vec![("c", "a")]);
    }

    #[test]
    fn map_ids_merges_collisions() {
        let mut g = Graph::new();
        g.upsert_node("MAC 110", NodeAttrs::labeled("first"));
        g.upsert_node(" MAC  110 ", NodeAttrs::labeled("second"));
        g.upsert_node("MAC 121", NodeAttrs::labeled("other"));
        g.add_edge("MAC 110", " MAC  110 ");
        g.add_edge(" MAC  110 ", "MAC 121");

        let (out, merged) = g.map_ids(|id| id.split_whitespace().collect::<Vec<_>>().join(" "));
        assert_eq!(merged, vec![" MAC  110 ".to_string()]);
        assert_eq!(out.node_count(), 2);
        assert_eq!(out.node("MAC 110").unwrap().label, "second");
        assert_eq!(out.edge_count(), 1);
        assert!(out.has_edge("MAC 110", "MAC 121"));
    }

    #[test]
    fn node_link_format() {
        let mut g = Graph::new();
        g.upsert_node("c1", NodeAttrs::course("Algebra"));
        g.upsert_node("Ana", NodeAttrs::instructor("Ana"));
        g.add_edge("c1", "Ana");

        let value = serde_json::to_value(&g).unwrap();
        assert_eq!(value["directed"], false);
        assert_eq!(value["multigraph"], false);
        assert_eq!(value["nodes"][0]["id"], "c1");
        assert_eq!(value["nodes"][0]["kind"], "course");
        assert_eq!(value["nodes"][0]["bipartite"], 0);
        assert!(value["nodes"][0].get("community_id").is_none());
        assert_eq!(value["links"][0]["source"], "c1");
        assert_eq!(value["links"][0]["target"], "Ana");

        let back: Graph = serde_json::from_value(value).unwrap();
        assert_eq!(back, g);
    }

    #[test]
    fn node_link_accepts_numeric_ids_and_rejects_dangling_links() {
        let g: Graph = serde_json::from_str(
            r#"{"nodes":[{"id":1,"label":"one"},{"id":"2"}],"links":[{"source":1,"target":"2"}]}"#,
        )
        .unwrap();
        assert!(g.has_edge("1", "2"));

        let err = serde_json::from_str::<Graph>(
            r#"{"nodes":[{"id":"a"}],"links":[{"source":"a","target":"z"}]}"#,
        );
        assert!(err.is_err());
    }

    #[test]
    fn file_round_trip_is_write_if_absent() {
        let dir = std::env::temp_dir().join(format!("cg-graph-test-{}", uuid::Uuid::now_v7()));
        let path = dir.join("g.json");

        let g = triangle();
        assert_eq!(g.to_file(&path).unwrap(), WriteOutcome::Written);
        assert_eq!(Graph::new().to_file(&path).unwrap(), WriteOutcome::AlreadyPresent);
        assert_eq!(Graph::from_file(&path).unwrap(), g);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
