//! Artifact fusion: one canonical course table, two re-scoped graphs.
//!
//! Records are joined with the community table on the normalized course
//! code, flagged as mandatory, and filtered by scope. Both graphs are then
//! cut down to exactly the surviving courses and stamped with their row
//! metadata. After fusion the table keys, the similarity graph nodes, and
//! the bipartite course nodes are the same set.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::PathBuf;

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use coursegraph_artifacts::read_json;
use coursegraph_graph::{CommunityRow, Graph, NO_COMMUNITY, NodeAttrs, NodeKind, split_instructors};
use coursegraph_shared::{CourseGraphError, CourseRecord, Result, UNKNOWN_SCOPE, normalize_code};

/// A fusion input held in memory or stored in a file.
#[derive(Debug, Clone)]
pub enum Input<T> {
    Value(T),
    Path(PathBuf),
}

impl<T: DeserializeOwned> Input<T> {
    /// Resolve to a value. A path that does not exist is `MissingArtifact`.
    pub fn load(self) -> Result<T> {
        match self {
            Input::Value(value) => Ok(value),
            Input::Path(path) => read_json(&path),
        }
    }
}

impl<T> From<T> for Input<T> {
    fn from(value: T) -> Self {
        Input::Value(value)
    }
}

/// One row of the fused course table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedCourse {
    pub code: String,
    pub title: String,
    pub scope: String,
    pub program: Option<String>,
    pub concentration_area: Option<String>,
    pub credits: Option<u32>,
    pub theory_hours: Option<u32>,
    pub practice_hours: Option<u32>,
    pub study_hours: Option<u32>,
    pub total_workload_hours: Option<u32>,
    pub duration_hours: Option<u32>,
    pub created_on: Option<NaiveDate>,
    pub instructors: Option<String>,
    /// `None` when the course is absent from the community table.
    pub community_id: Option<u32>,
    pub is_mandatory: bool,
}

impl FusedCourse {
    /// Node attributes stamped onto this course in both graphs.
    fn node_attrs(&self) -> NodeAttrs {
        NodeAttrs {
            label: self.title.clone(),
            kind: Some(NodeKind::Course),
            bipartite: None,
            community_id: Some(self.community_id.map_or(NO_COMMUNITY, i64::from)),
            is_mandatory: Some(self.is_mandatory),
            scope: Some(self.scope.clone()),
            credits: self.credits,
        }
    }
}

/// Recoverable anomaly found while fusing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FusionDiagnostic {
    /// No input row carries this column; a sentinel was used instead.
    MissingColumn { column: String },
    /// A key appeared more than once in `source`; the first row was kept.
    DuplicateKey { source: String, code: String },
    /// Graph node ids that collided after normalization were merged.
    MergedNodes { graph: String, id: String },
    /// A table row had no node in `graph` and one was inserted.
    ReconciledNode { graph: String, code: String },
}

/// Counts describing one fusion run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FusionReport {
    pub rows_before_filter: usize,
    pub rows_after_filter: usize,
    pub mandatory_count: usize,
    pub instructor_count: usize,
    pub similarity_nodes_dropped: usize,
    pub bipartite_courses_dropped: usize,
    pub bipartite_instructors_dropped: usize,
    pub similarity_nodes_reconciled: usize,
    pub bipartite_nodes_reconciled: usize,
    pub diagnostics: Vec<FusionDiagnostic>,
}

/// Fused table plus the two re-scoped graphs.
#[derive(Debug, Clone)]
pub struct FusionOutput {
    pub courses: Vec<FusedCourse>,
    pub similarity: Graph,
    pub bipartite: Graph,
    pub report: FusionReport,
}

/// Joins records, communities, and scope rules, then re-projects the
/// resulting table onto both graphs.
#[derive(Debug, Clone)]
pub struct ArtifactFusionEngine {
    scope_allow_list: BTreeSet<String>,
    mandatory: BTreeSet<String>,
    instructor_separator: String,
}

impl ArtifactFusionEngine {
    /// An empty allow-list keeps every scope.
    pub fn new(
        scope_allow_list: BTreeSet<String>,
        mandatory: BTreeSet<String>,
        instructor_separator: impl Into<String>,
    ) -> Self {
        Self {
            scope_allow_list: scope_allow_list
                .iter()
                .map(|s| s.trim().to_string())
                .collect(),
            mandatory: mandatory.iter().map(|c| normalize_code(c)).collect(),
            instructor_separator: instructor_separator.into(),
        }
    }

    fn allows(&self, scope: &str) -> bool {
        self.scope_allow_list.is_empty() || self.scope_allow_list.contains(scope)
    }

    #[instrument(skip_all, fields(allow_list = self.scope_allow_list.len()))]
    pub fn run(
        &self,
        records: Input<Vec<CourseRecord>>,
        communities: Input<Vec<CommunityRow>>,
        similarity: Input<Graph>,
        bipartite: Input<Graph>,
    ) -> Result<FusionOutput> {
        let records = records.load()?;
        let communities = communities.load()?;
        let similarity = similarity.load()?;
        let bipartite = bipartite.load()?;

        let mut report = FusionReport::default();

        let records = normalize_records(records, &mut report);
        let community_of = community_index(communities, &mut report);
        let mut similarity = normalize_graph(&similarity, "similarity", &mut report);
        let mut bipartite = normalize_graph(&bipartite, "bipartite", &mut report);

        let has_scope = records
            .iter()
            .any(|r| r.scope.as_deref().is_some_and(|s| !s.trim().is_empty()));
        if !has_scope {
            warn!(column = "scope", sentinel = UNKNOWN_SCOPE, "no record carries a scope");
            report.diagnostics.push(FusionDiagnostic::MissingColumn {
                column: "scope".to_string(),
            });
        }

        report.rows_before_filter = records.len();
        let mut instructors_of: HashMap<String, Option<String>> = HashMap::new();
        let mut courses = Vec::with_capacity(records.len());
        for record in records {
            let row = self.fuse_row(&record, &community_of);
            if self.allows(&row.scope) {
                instructors_of.insert(row.code.clone(), record.instructors.clone());
                courses.push(row);
            }
        }
        report.rows_after_filter = courses.len();
        report.mandatory_count = courses.iter().filter(|c| c.is_mandatory).count();

        self.rescope_similarity(&mut similarity, &courses, &mut report);
        self.rescope_bipartite(&mut bipartite, &courses, &instructors_of, &mut report);
        check_alignment(&courses, &similarity, &bipartite)?;

        report.instructor_count = bipartite
            .nodes()
            .filter(|(_, attrs)| is_instructor(attrs))
            .count();

        info!(
            before = report.rows_before_filter,
            after = report.rows_after_filter,
            mandatory = report.mandatory_count,
            instructors = report.instructor_count,
            diagnostics = report.diagnostics.len(),
            "artifacts fused"
        );

        Ok(FusionOutput {
            courses,
            similarity,
            bipartite,
            report,
        })
    }

    fn fuse_row(&self, record: &CourseRecord, community_of: &HashMap<String, u32>) -> FusedCourse {
        let scope = record
            .scope
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(UNKNOWN_SCOPE)
            .to_string();

        FusedCourse {
            code: record.code.clone(),
            title: record.label().to_string(),
            scope,
            program: record.program.clone(),
            concentration_area: record.concentration_area.clone(),
            credits: record.credits,
            theory_hours: record.theory_hours,
            practice_hours: record.practice_hours,
            study_hours: record.study_hours,
            total_workload_hours: record.total_workload_hours(),
            duration_hours: record.duration_hours(),
            created_on: record.created_on_date(),
            instructors: record.instructors.clone(),
            community_id: community_of.get(&record.code).copied(),
            is_mandatory: self.mandatory.contains(&record.code),
        }
    }

    fn rescope_similarity(&self, graph: &mut Graph, courses: &[FusedCourse], report: &mut FusionReport) {
        let keys: HashSet<&str> = courses.iter().map(|c| c.code.as_str()).collect();
        report.similarity_nodes_dropped = graph.retain_nodes(|id, _| keys.contains(id)).len();

        for course in courses {
            if !graph.contains_node(&course.code) {
                warn!(code = %course.code, "course missing from similarity graph, added as isolated node");
                report.similarity_nodes_reconciled += 1;
                report.diagnostics.push(FusionDiagnostic::ReconciledNode {
                    graph: "similarity".to_string(),
                    code: course.code.clone(),
                });
            }
            graph.upsert_node(course.code.as_str(), course.node_attrs());
        }
    }

    fn rescope_bipartite(
        &self,
        graph: &mut Graph,
        courses: &[FusedCourse],
        instructors_of: &HashMap<String, Option<String>>,
        report: &mut FusionReport,
    ) {
        let keys: HashSet<&str> = courses.iter().map(|c| c.code.as_str()).collect();
        report.bipartite_courses_dropped = graph
            .retain_nodes(|id, attrs| is_instructor(attrs) || keys.contains(id))
            .len();

        for course in courses {
            let mut attrs = course.node_attrs();
            attrs.bipartite = Some(0);

            if graph.node(&course.code).is_some_and(|a| !is_instructor(a)) {
                graph.upsert_node(course.code.as_str(), attrs);
                continue;
            }

            warn!(code = %course.code, "course missing from bipartite graph, added with its instructors");
            report.bipartite_nodes_reconciled += 1;
            report.diagnostics.push(FusionDiagnostic::ReconciledNode {
                graph: "bipartite".to_string(),
                code: course.code.clone(),
            });
            graph.upsert_node(course.code.as_str(), attrs);

            let list = instructors_of.get(&course.code).and_then(|l| l.as_deref());
            for name in list.map(|l| split_instructors(l, &self.instructor_separator)).unwrap_or_default() {
                if keys.contains(name) {
                    continue;
                }
                graph.upsert_node(name, NodeAttrs::instructor(name));
                graph.add_edge(&course.code, name);
            }
        }

        let connected: HashSet<String> = graph
            .edges()
            .flat_map(|(a, b)| [a.to_string(), b.to_string()])
            .collect();
        report.bipartite_instructors_dropped = graph
            .retain_nodes(|id, attrs| !is_instructor(attrs) || connected.contains(id))
            .len();
    }
}

fn is_instructor(attrs: &NodeAttrs) -> bool {
    attrs.is_instructor() || (attrs.kind.is_none() && attrs.bipartite == Some(1))
}

fn normalize_records(records: Vec<CourseRecord>, report: &mut FusionReport) -> Vec<CourseRecord> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(records.len());
    for mut record in records {
        record.code = normalize_code(&record.code);
        if record.code.is_empty() {
            warn!("record with an empty code skipped");
            continue;
        }
        if !seen.insert(record.code.clone()) {
            warn!(code = %record.code, "duplicate record code, keeping first");
            report.diagnostics.push(FusionDiagnostic::DuplicateKey {
                source: "records".to_string(),
                code: record.code,
            });
            continue;
        }
        out.push(record);
    }
    out
}

/// Normalized code to community id. The table's `label` column is not used.
fn community_index(rows: Vec<CommunityRow>, report: &mut FusionReport) -> HashMap<String, u32> {
    let mut index = HashMap::with_capacity(rows.len());
    for row in rows {
        let code = normalize_code(&row.code);
        if index.contains_key(&code) {
            warn!(code = %code, "duplicate community key, keeping first");
            report.diagnostics.push(FusionDiagnostic::DuplicateKey {
                source: "communities".to_string(),
                code,
            });
            continue;
        }
        index.insert(code, row.community_id);
    }
    index
}

fn normalize_graph(graph: &Graph, name: &str, report: &mut FusionReport) -> Graph {
    let (normalized, merged) = graph.map_ids(normalize_code);
    for id in merged {
        warn!(graph = name, id = %id, "node ids collide after normalization, merged");
        report.diagnostics.push(FusionDiagnostic::MergedNodes {
            graph: name.to_string(),
            id,
        });
    }
    normalized
}

/// Table keys, similarity nodes, and bipartite course nodes must coincide.
pub(crate) fn check_alignment(courses: &[FusedCourse], similarity: &Graph, bipartite: &Graph) -> Result<()> {
    let keys: BTreeSet<&str> = courses.iter().map(|c| c.code.as_str()).collect();
    let similarity_nodes: BTreeSet<&str> = similarity.node_ids().collect();
    let bipartite_courses: BTreeSet<&str> = bipartite
        .nodes()
        .filter(|(_, attrs)| !is_instructor(attrs))
        .map(|(id, _)| id)
        .collect();

    if keys != similarity_nodes {
        return Err(CourseGraphError::validation(format!(
            "fused table has {} keys but similarity graph has {} nodes",
            keys.len(),
            similarity_nodes.len()
        )));
    }
    if keys != bipartite_courses {
        return Err(CourseGraphError::validation(format!(
            "fused table has {} keys but bipartite graph has {} course nodes",
            keys.len(),
            bipartite_courses.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use coursegraph_graph::BipartiteGraphBuilder;

    fn record(code: &str, title: &str, scope: Option<&str>, instructors: &str) -> CourseRecord {
        CourseRecord {
            code: code.to_string(),
            title: Some(title.to_string()),
            scope: scope.map(str::to_string),
            credits: Some(4),
            instructors: Some(instructors.to_string()),
            ..CourseRecord::default()
        }
    }

    fn bipartite_for(records: &[CourseRecord]) -> Graph {
        let ids: Vec<String> = records.iter().map(|r| r.code.clone()).collect();
        let labels: Vec<String> = records.iter().map(|r| r.label().to_string()).collect();
        let lists: Vec<Option<String>> = records.iter().map(|r| r.instructors.clone()).collect();
        BipartiteGraphBuilder::new(&ids, &labels, &lists, " | ")
            .unwrap()
            .build()
    }

    fn similarity_for(codes: &[&str]) -> Graph {
        let mut g = Graph::new();
        for code in codes {
            g.upsert_node(*code, NodeAttrs::labeled(*code));
        }
        for pair in codes.windows(2) {
            g.add_edge(pair[0], pair[1]);
        }
        g
    }

    fn engine(allow: &[&str], mandatory: &[&str]) -> ArtifactFusionEngine {
        ArtifactFusionEngine::new(
            allow.iter().map(|s| s.to_string()).collect(),
            mandatory.iter().map(|s| s.to_string()).collect(),
            " | ",
        )
    }

    fn community_rows(pairs: &[(&str, u32)]) -> Vec<CommunityRow> {
        pairs
            .iter()
            .map(|(code, id)| CommunityRow {
                code: code.to_string(),
                label: "ignored".to_string(),
                community_id: *id,
            })
            .collect()
    }

    fn assert_aligned(out: &FusionOutput) {
        let keys: BTreeSet<&str> = out.courses.iter().map(|c| c.code.as_str()).collect();
        let sim: BTreeSet<&str> = out.similarity.node_ids().collect();
        let bip: BTreeSet<&str> = out.bipartite.course_ids().collect();
        assert_eq!(keys, sim);
        assert_eq!(keys, bip);
    }

    #[test]
    fn scope_filter_rescopes_both_graphs() {
        let records = vec![
            record("X1", "A", Some("S1"), "Bob | Alice"),
            record("X2", "B", Some("S2"), ""),
        ];
        let bipartite = bipartite_for(&records);
        let similarity = similarity_for(&["X1", "X2"]);

        let out = engine(&["S1"], &[])
            .run(
                records.into(),
                community_rows(&[("X1", 0), ("X2", 1)]).into(),
                similarity.into(),
                bipartite.into(),
            )
            .unwrap();

        assert_eq!(out.courses.len(), 1);
        assert_eq!(out.courses[0].code, "X1");
        let nodes: BTreeSet<&str> = out.bipartite.node_ids().collect();
        assert_eq!(nodes, BTreeSet::from(["X1", "Bob", "Alice"]));
        assert!(!out.similarity.contains_node("X2"));
        assert_eq!(out.report.rows_before_filter, 2);
        assert_eq!(out.report.rows_after_filter, 1);
        assert_eq!(out.report.similarity_nodes_dropped, 1);
        assert_eq!(out.report.bipartite_courses_dropped, 1);
        assert_eq!(out.report.instructor_count, 2);
        assert_aligned(&out);
    }

    #[test]
    fn metadata_is_stamped_onto_graph_nodes() {
        let records = vec![
            record("X1", "A", Some("S1"), "Bob"),
            record("X2", "B", Some("S1"), "Bob"),
        ];
        let out = engine(&[], &["X2"])
            .run(
                records.clone().into(),
                community_rows(&[("X1", 3)]).into(),
                similarity_for(&["X1", "X2"]).into(),
                bipartite_for(&records).into(),
            )
            .unwrap();

        assert_eq!(out.courses[0].community_id, Some(3));
        assert_eq!(out.courses[1].community_id, None);
        assert!(out.courses[1].is_mandatory);
        assert_eq!(out.report.mandatory_count, 1);

        let x1 = out.similarity.node("X1").unwrap();
        assert_eq!(x1.label, "A");
        assert_eq!(x1.community_id, Some(3));
        assert_eq!(x1.scope.as_deref(), Some("S1"));
        assert_eq!(x1.credits, Some(4));
        assert_eq!(x1.kind, Some(NodeKind::Course));

        let x2 = out.bipartite.node("X2").unwrap();
        assert_eq!(x2.community_id, Some(NO_COMMUNITY));
        assert_eq!(x2.is_mandatory, Some(true));
        assert_eq!(x2.bipartite, Some(0));
    }

    #[test]
    fn keys_are_normalized_across_inputs() {
        let records = vec![record(" MAC  110", "A", Some("S1"), "Ana")];
        let mut similarity = Graph::new();
        similarity.upsert_node("MAC 110 ", NodeAttrs::labeled("old"));
        similarity.upsert_node("MAC   110", NodeAttrs::labeled("dup"));
        let mut bipartite = Graph::new();
        bipartite.upsert_node("MAC 110", NodeAttrs::course("old"));
        bipartite.upsert_node("Ana", NodeAttrs::instructor("Ana"));
        bipartite.add_edge("MAC 110", "Ana");

        let out = engine(&[], &["mac 110", "MAC 110"])
            .run(
                records.into(),
                community_rows(&[("MAC 110  ", 7)]).into(),
                similarity.into(),
                bipartite.into(),
            )
            .unwrap();

        assert_eq!(out.courses[0].code, "MAC 110");
        assert_eq!(out.courses[0].community_id, Some(7));
        assert!(out.courses[0].is_mandatory);
        assert_eq!(out.similarity.node_count(), 1);
        assert!(out.report.diagnostics.contains(&FusionDiagnostic::MergedNodes {
            graph: "similarity".to_string(),
            id: "MAC   110".to_string(),
        }));
        assert_aligned(&out);
    }

    #[test]
    fn missing_scope_column_is_a_diagnostic() {
        let records = vec![record("X1", "A", None, ""), record("X2", "B", None, "")];
        let out = engine(&[], &[])
            .run(
                records.clone().into(),
                Vec::<CommunityRow>::new().into(),
                similarity_for(&["X1", "X2"]).into(),
                bipartite_for(&records).into(),
            )
            .unwrap();

        assert_eq!(out.courses.len(), 2);
        assert!(out.courses.iter().all(|c| c.scope == UNKNOWN_SCOPE));
        assert!(out.report.diagnostics.contains(&FusionDiagnostic::MissingColumn {
            column: "scope".to_string()
        }));
    }

    #[test]
    fn rows_missing_from_graphs_are_reconciled() {
        let records = vec![
            record("X1", "A", Some("S1"), "Bob"),
            record("X2", "B", Some("S1"), "Carol | Bob"),
        ];
        // both graphs only know X1; the bipartite one has a stray course too
        let similarity = similarity_for(&["X1"]);
        let mut bipartite = bipartite_for(&records[..1]);
        bipartite.upsert_node("Z9", NodeAttrs::course("stray"));
        bipartite.upsert_node("Dan", NodeAttrs::instructor("Dan"));
        bipartite.add_edge("Z9", "Dan");

        let out = engine(&[], &[])
            .run(
                records.into(),
                community_rows(&[("X1", 0), ("X2", 0)]).into(),
                similarity.into(),
                bipartite.into(),
            )
            .unwrap();

        assert_eq!(out.report.similarity_nodes_reconciled, 1);
        assert_eq!(out.report.bipartite_nodes_reconciled, 1);
        assert_eq!(out.similarity.degree("X2"), 0);
        assert!(out.bipartite.has_edge("X2", "Carol"));
        assert!(out.bipartite.has_edge("X2", "Bob"));
        assert!(!out.bipartite.contains_node("Z9"));
        assert!(!out.bipartite.contains_node("Dan"));
        assert_eq!(out.report.bipartite_instructors_dropped, 1);
        assert_aligned(&out);
    }

    #[test]
    fn duplicate_community_keys_keep_first() {
        let records = vec![record("X1", "A", Some("S1"), "")];
        let out = engine(&[], &[])
            .run(
                records.clone().into(),
                community_rows(&[("X1", 2), (" X1", 5)]).into(),
                similarity_for(&["X1"]).into(),
                bipartite_for(&records).into(),
            )
            .unwrap();

        assert_eq!(out.courses[0].community_id, Some(2));
        assert!(out.report.diagnostics.iter().any(|d| matches!(
            d,
            FusionDiagnostic::DuplicateKey { source, .. } if source == "communities"
        )));
    }

    #[test]
    fn missing_input_path_is_fatal() {
        let missing = std::env::temp_dir()
            .join(format!("cg-fusion-test-{}", uuid::Uuid::now_v7()))
            .join("communities.json");
        let records = vec![record("X1", "A", Some("S1"), "")];

        let err = engine(&[], &[])
            .run(
                records.clone().into(),
                Input::Path(missing),
                similarity_for(&["X1"]).into(),
                bipartite_for(&records).into(),
            )
            .unwrap_err();
        assert!(matches!(err, CourseGraphError::MissingArtifact { .. }));
    }
}
