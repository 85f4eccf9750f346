//! Course/instructor bipartite graph.

use std::path::Path;

use tracing::{debug, info, instrument, warn};

use coursegraph_artifacts::WriteOutcome;
use coursegraph_shared::{CourseGraphError, Result};

use crate::model::{Graph, NodeAttrs};

/// Split a delimited instructor list into trimmed, non-empty names.
///
/// The separator itself is trimmed first, so `" | "`, `"|"` and `"  |"`
/// split identically.
pub fn split_instructors<'s>(list: &'s str, separator: &str) -> Vec<&'s str> {
    let sep = separator.trim();
    if sep.is_empty() {
        let name = list.trim();
        return if name.is_empty() { Vec::new() } else { vec![name] };
    }
    list.split(sep)
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .collect()
}

/// Builds the bipartite graph from per-course instructor lists.
///
/// Course nodes carry `kind=course, bipartite=0`; instructor nodes carry
/// `kind=instructor, bipartite=1` and are merged by exact trimmed name.
#[derive(Debug)]
pub struct BipartiteGraphBuilder<'a> {
    node_ids: &'a [String],
    node_labels: &'a [String],
    instructor_lists: &'a [Option<String>],
    separator: &'a str,
}

impl<'a> BipartiteGraphBuilder<'a> {
    pub fn new(
        node_ids: &'a [String],
        node_labels: &'a [String],
        instructor_lists: &'a [Option<String>],
        separator: &'a str,
    ) -> Result<Self> {
        let n = node_ids.len();
        if node_labels.len() != n {
            return Err(CourseGraphError::dimension_mismatch(
                "node_labels",
                n,
                node_labels.len(),
            ));
        }
        if instructor_lists.len() != n {
            return Err(CourseGraphError::dimension_mismatch(
                "instructor_lists",
                n,
                instructor_lists.len(),
            ));
        }
        Ok(Self {
            node_ids,
            node_labels,
            instructor_lists,
            separator,
        })
    }

    #[instrument(skip_all, fields(courses = self.node_ids.len()))]
    pub fn build(&self) -> Graph {
        let mut graph = Graph::new();

        // Courses first, so a course code always wins over an instructor name.
        for (id, label) in self.node_ids.iter().zip(self.node_labels) {
            graph.upsert_node(id.as_str(), NodeAttrs::course(label.as_str()));
        }

        let mut instructors = 0usize;
        for (course, list) in self.node_ids.iter().zip(self.instructor_lists) {
            let Some(list) = list.as_deref() else {
                continue;
            };
            for name in split_instructors(list, self.separator) {
                if graph.node(name).is_some_and(|attrs| attrs.is_course()) {
                    warn!(course = %course, name, "instructor name collides with a course code, skipped");
                    continue;
                }
                if graph.upsert_node(name, NodeAttrs::instructor(name)) {
                    instructors += 1;
                }
                graph.add_edge(course, name);
            }
        }

        info!(
            courses = self.node_ids.len(),
            instructors,
            edges = graph.edge_count(),
            "bipartite graph built"
        );
        graph
    }

    /// Build and write the graph unless `path` exists.
    pub fn to_file(&self, path: &Path) -> Result<WriteOutcome> {
        if path.exists() {
            debug!(path = %path.display(), "bipartite graph exists, skipping build");
            return Ok(WriteOutcome::AlreadyPresent);
        }
        self.build().to_file(path)
    }
}
